use std::fmt::Write;

use crate::types::{HostResult, ScanResult};

/// Render a finished scan as the text report shown to the user.
///
/// Hosts and ports are printed in the order the engine produced them.
pub fn format_report(result: &ScanResult) -> String {
    let mut out = String::new();
    out.push_str("--- Scan Complete ---\n");
    let _ = writeln!(
        out,
        "Scan finished: {} hosts up, in {:.2} seconds.",
        result.hosts.len(),
        result.elapsed_seconds
    );
    out.push('\n');

    for host in &result.hosts {
        write_host(&mut out, host);
    }
    out
}

fn write_host(out: &mut String, host: &HostResult) {
    let addr = host.addresses.first().map(String::as_str).unwrap_or("<unknown>");
    match host.hostnames.first().filter(|n| !n.is_empty()) {
        Some(name) => {
            let _ = writeln!(out, "Host: {addr} ({name})");
        }
        None => {
            let _ = writeln!(out, "Host: {addr}");
        }
    }
    let _ = writeln!(out, "  Status: {}", host.status);

    if host.ports.is_empty() {
        out.push_str("  No open ports found.\n");
    } else {
        out.push_str("  Open Ports:\n");
        for port in &host.ports {
            let _ = writeln!(
                out,
                "    Port {}/{} - State: {}, Service: {}, Version: {}",
                port.id, port.protocol, port.state, port.service_name, port.service_product
            );
        }
    }
    out.push('\n');
}
