//! Service names and versions for open TCP ports.
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;

const BANNER_WAIT: Duration = Duration::from_millis(200);
const PROBE_WAIT: Duration = Duration::from_millis(500);
const MAX_PRODUCT_LEN: usize = 60;

const HTTP_PORTS: &[u16] = &[80, 3000, 5000, 8000, 8008, 8080, 8081, 8088, 8888, 9000, 9200];
const TLS_PORTS: &[u16] = &[443, 465, 636, 993, 995, 5986, 8443];

/// Conventional service name for a TCP port, or `""` when there is none.
pub fn service_name(port: u16) -> &'static str {
    match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "domain",
        80 | 8000 | 8008 | 8080 | 8081 | 8088 => "http",
        110 => "pop3",
        111 => "rpcbind",
        135 => "msrpc",
        139 => "netbios-ssn",
        143 => "imap",
        389 => "ldap",
        443 | 8443 => "https",
        445 => "microsoft-ds",
        465 => "smtps",
        587 => "submission",
        631 => "ipp",
        636 => "ldaps",
        993 => "imaps",
        995 => "pop3s",
        1433 => "ms-sql-s",
        1521 => "oracle",
        1883 => "mqtt",
        2049 => "nfs",
        3000 => "ppp",
        3306 => "mysql",
        3389 => "ms-wbt-server",
        5000 => "upnp",
        5432 => "postgresql",
        5672 => "amqp",
        5900 => "vnc",
        5985 => "wsman",
        5986 => "wsmans",
        6379 => "redis",
        8888 => "sun-answerbook",
        9000 => "cslistener",
        9092 => "XmlIpcRegSvc",
        9200 => "wap-wsp",
        11211 => "memcache",
        27017 => "mongod",
        _ => "",
    }
}

/// Best-effort product/version string for an open port.
///
/// Tries a passive banner read on `stream` first, then an HTTP `HEAD` on HTTP ports,
/// then a TLS handshake on a fresh connection for TLS ports.
pub async fn identify(stream: &mut TcpStream, addr: SocketAddr, connect_timeout: Duration) -> String {
    if let Some(banner) = read_banner(stream).await {
        return product_from_banner(&banner);
    }
    if HTTP_PORTS.contains(&addr.port()) {
        if let Some(server) = http_server_header(stream).await {
            return server;
        }
    }
    if TLS_PORTS.contains(&addr.port()) {
        if let Some(subject) = tls_subject(addr, connect_timeout).await {
            return subject;
        }
    }
    String::new()
}

/// Reduce a greeting to a product string: SSH software version, SMTP/FTP greeting text,
/// otherwise the first non-empty line.
pub fn product_from_banner(banner: &str) -> String {
    let line = banner
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    let bytes = line.as_bytes();
    let product = if let Some(rest) = line.strip_prefix("SSH-") {
        rest.split_once('-').map(|(_, sw)| sw).unwrap_or(rest)
    } else if bytes.len() > 4
        && bytes[..3].iter().all(u8::is_ascii_digit)
        && matches!(bytes[3], b' ' | b'-')
    {
        &line[4..]
    } else {
        line
    };
    product
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_PRODUCT_LEN)
        .collect()
}

/// Try to read up to 256 bytes from the stream with a short timeout and convert to a lossy UTF-8 string.
async fn read_banner(stream: &mut TcpStream) -> Option<String> {
    let mut buf = vec![0u8; 256];
    match time::timeout(BANNER_WAIT, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            buf.truncate(n);
            Some(String::from_utf8_lossy(&buf).into_owned())
        }
        _ => None,
    }
}

async fn http_server_header(stream: &mut TcpStream) -> Option<String> {
    time::timeout(PROBE_WAIT, stream.write_all(b"HEAD / HTTP/1.0\r\n\r\n"))
        .await
        .ok()?
        .ok()?;
    let mut buf = vec![0u8; 1024];
    let n = time::timeout(PROBE_WAIT, stream.read(&mut buf)).await.ok()?.ok()?;
    server_from_response(&String::from_utf8_lossy(&buf[..n]))
}

fn server_from_response(response: &str) -> Option<String> {
    if !response.starts_with("HTTP/") {
        return None;
    }
    response.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("server")
            .then(|| value.trim().chars().take(MAX_PRODUCT_LEN).collect())
    })
}

async fn tls_subject(addr: SocketAddr, connect_timeout: Duration) -> Option<String> {
    // Fingerprinting only: the certificate is read, never trusted.
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .ok()?;
    let connector = tokio_native_tls::TlsConnector::from(connector);
    let tcp = time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .ok()?
        .ok()?;
    let domain = addr.ip().to_string();
    let tls = time::timeout(PROBE_WAIT, connector.connect(&domain, tcp))
        .await
        .ok()?
        .ok()?;
    let der = tls.get_ref().peer_certificate().ok()??.to_der().ok()?;
    let (_, cert) = x509_parser::parse_x509_certificate(&der).ok()?;
    let cn = cert.subject().iter_common_name().next()?.as_str().ok()?;
    Some(format!("TLS certificate CN={cn}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_names() {
        assert_eq!(service_name(22), "ssh");
        assert_eq!(service_name(8080), "http");
        assert_eq!(service_name(40000), "");
    }

    #[test]
    fn products_from_greetings() {
        assert_eq!(
            product_from_banner("SSH-2.0-OpenSSH_9.6p1 Ubuntu-3ubuntu13\r\n"),
            "OpenSSH_9.6p1 Ubuntu-3ubuntu13"
        );
        assert_eq!(
            product_from_banner("220 mail.example.org ESMTP Postfix\r\n"),
            "mail.example.org ESMTP Postfix"
        );
        assert_eq!(product_from_banner("\r\n+OK Dovecot ready.\r\n"), "+OK Dovecot ready.");
        assert_eq!(product_from_banner(&"x".repeat(200)).len(), MAX_PRODUCT_LEN);
    }

    #[test]
    fn server_header_is_case_insensitive() {
        let resp = "HTTP/1.1 200 OK\r\nserver: nginx/1.25.3\r\nContent-Length: 0\r\n\r\n";
        assert_eq!(server_from_response(resp).as_deref(), Some("nginx/1.25.3"));
        assert_eq!(server_from_response("HTTP/1.0 404 Not Found\r\n\r\n"), None);
        assert_eq!(server_from_response("garbage"), None);
    }
}
