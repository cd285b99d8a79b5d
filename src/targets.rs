use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::{IpNet, Ipv4Net};
use tokio::net::lookup_host;

use crate::engine::EngineError;

/// Smallest IPv4 prefix accepted for network targets (/16 = 65534 hosts).
const MIN_PREFIX_V4: u8 = 16;

/// One item of a target expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Addr(IpAddr),
    Network(Ipv4Net),
    Name(String),
}

/// Addresses to probe plus anything worth reporting about how they were found.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub hosts: Vec<ResolvedHost>,
    pub warnings: Vec<String>,
}

/// An address to probe, with the name it was reached through, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    pub addr: IpAddr,
    pub hostname: Option<String>,
}

/// Parse a target expression: IPs, IPv4 CIDRs and hostnames separated by commas or whitespace.
pub fn parse_targets(expr: &str) -> Result<Vec<TargetSpec>, EngineError> {
    let specs = expr
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(parse_item)
        .collect::<Result<Vec<_>, _>>()?;
    if specs.is_empty() {
        return Err(EngineError::InvalidTarget("no targets given".into()));
    }
    Ok(specs)
}

fn parse_item(item: &str) -> Result<TargetSpec, EngineError> {
    if item.contains('/') {
        return match item.parse::<IpNet>() {
            Ok(IpNet::V4(net)) if net.prefix_len() >= MIN_PREFIX_V4 => Ok(TargetSpec::Network(net)),
            Ok(IpNet::V4(net)) => Err(EngineError::InvalidTarget(format!(
                "{net} is too large (prefix must be /{MIN_PREFIX_V4} or longer)"
            ))),
            Ok(IpNet::V6(net)) => Err(EngineError::InvalidTarget(format!(
                "{net}: IPv6 networks are not supported"
            ))),
            Err(e) => Err(EngineError::InvalidTarget(format!("{item}: {e}"))),
        };
    }
    if let Ok(ip) = item.parse::<IpAddr>() {
        return Ok(TargetSpec::Addr(ip));
    }
    if is_hostname(item) {
        return Ok(TargetSpec::Name(item.to_ascii_lowercase()));
    }
    Err(EngineError::InvalidTarget(format!("{item}: not an address, network or hostname")))
}

fn is_hostname(s: &str) -> bool {
    s.len() <= 253
        && s.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Resolve parsed targets into unique addresses, in expression order.
///
/// A hostname with several addresses is scanned on its first one (IPv4 preferred);
/// the others are reported as warnings.
pub async fn resolve(specs: &[TargetSpec]) -> Result<Resolution, EngineError> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut warnings = Vec::new();
    for spec in specs {
        match spec {
            TargetSpec::Addr(ip) => push_unique(&mut out, &mut seen, *ip, None),
            TargetSpec::Network(net) => {
                for ip in expand_ipv4net_hosts(*net) {
                    push_unique(&mut out, &mut seen, IpAddr::V4(ip), None);
                }
            }
            TargetSpec::Name(name) => {
                let mut addrs: Vec<IpAddr> = Vec::new();
                let found = lookup_host((name.as_str(), 0))
                    .await
                    .map_err(|source| EngineError::Resolve {
                        target: name.clone(),
                        source,
                    })?;
                for sa in found {
                    if !addrs.contains(&sa.ip()) {
                        addrs.push(sa.ip());
                    }
                }
                // Stable sort: IPv4 first, resolver order otherwise.
                addrs.sort_by_key(|ip| ip.is_ipv6());
                let Some((first, rest)) = addrs.split_first() else {
                    return Err(EngineError::Resolve {
                        target: name.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "no addresses found",
                        ),
                    });
                };
                if !rest.is_empty() {
                    let others: Vec<String> = rest.iter().map(IpAddr::to_string).collect();
                    warnings.push(format!(
                        "other addresses for {name} (not scanned): {}",
                        others.join(" ")
                    ));
                }
                push_unique(&mut out, &mut seen, *first, Some(name.clone()));
            }
        }
    }
    Ok(Resolution {
        hosts: out,
        warnings,
    })
}

fn push_unique(
    out: &mut Vec<ResolvedHost>,
    seen: &mut HashSet<IpAddr>,
    addr: IpAddr,
    hostname: Option<String>,
) {
    if seen.insert(addr) {
        out.push(ResolvedHost { addr, hostname });
    }
}

/// Host addresses of an IPv4 network, excluding network and broadcast addresses.
/// Networks of one or two addresses are taken as they are.
pub fn expand_ipv4net_hosts(net: Ipv4Net) -> Vec<Ipv4Addr> {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    if end - start <= 1 {
        return (start..=end).map(Ipv4Addr::from).collect();
    }
    (start + 1..end).map(Ipv4Addr::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_expression() {
        let specs = parse_targets("127.0.0.1, 10.0.0.0/30 scanme.Example.org").unwrap();
        assert_eq!(
            specs,
            vec![
                TargetSpec::Addr(IpAddr::V4(Ipv4Addr::LOCALHOST)),
                TargetSpec::Network("10.0.0.0/30".parse().unwrap()),
                TargetSpec::Name("scanme.example.org".into()),
            ]
        );
    }

    #[test]
    fn rejects_garbage_and_huge_networks() {
        assert!(matches!(parse_targets("bad host!"), Err(EngineError::InvalidTarget(_))));
        assert!(matches!(parse_targets("10.0.0.0/8"), Err(EngineError::InvalidTarget(_))));
        assert!(matches!(parse_targets("fe80::/64"), Err(EngineError::InvalidTarget(_))));
        assert!(matches!(parse_targets(" , "), Err(EngineError::InvalidTarget(_))));
    }

    #[test]
    fn expand_small_cidr_excludes_network_and_broadcast() {
        let net = Ipv4Net::new(Ipv4Addr::new(192, 168, 1, 0), 30).unwrap();
        assert_eq!(
            expand_ipv4net_hosts(net),
            vec![Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 2)]
        );
        let single = Ipv4Net::new(Ipv4Addr::new(10, 1, 2, 3), 32).unwrap();
        assert_eq!(expand_ipv4net_hosts(single), vec![Ipv4Addr::new(10, 1, 2, 3)]);
        let top: Ipv4Net = "255.255.255.255/32".parse().unwrap();
        assert_eq!(expand_ipv4net_hosts(top), vec![Ipv4Addr::BROADCAST]);
        let top_pair: Ipv4Net = "255.255.255.254/31".parse().unwrap();
        assert_eq!(expand_ipv4net_hosts(top_pair).len(), 2);
    }

    #[tokio::test]
    async fn resolve_dedups_literal_addresses() {
        let specs = parse_targets("127.0.0.1 127.0.0.1/32").unwrap();
        let resolution = resolve(&specs).await.unwrap();
        assert_eq!(resolution.hosts.len(), 1);
        assert_eq!(resolution.hosts[0].hostname, None);
        assert!(resolution.warnings.is_empty());
    }

    #[tokio::test]
    async fn resolve_handles_last_address_of_the_space() {
        let specs = parse_targets("255.255.255.255/32").unwrap();
        let resolution = resolve(&specs).await.unwrap();
        let addrs: Vec<IpAddr> = resolution.hosts.iter().map(|h| h.addr).collect();
        assert_eq!(addrs, vec![IpAddr::V4(Ipv4Addr::BROADCAST)]);
    }
}
