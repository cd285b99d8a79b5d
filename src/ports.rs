use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Parse a port expression such as `1-1000, 8080,8443` into deduplicated TCP ports.
///
/// Items are separated by commas or whitespace; each is a port or an inclusive `start-end` range.
/// Order of first appearance is kept.
pub fn parse_port_spec(spec: &str) -> Result<Vec<u16>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let items = spec
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty());
    for item in items {
        push_item(item, &mut out, &mut seen).with_context(|| format!("bad item `{item}`"))?;
    }
    if out.is_empty() {
        bail!("no ports given");
    }
    Ok(out)
}

/// Parse a ports file content into a deduplicated list of TCP ports (1..=65535).
///
/// Supported formats per line:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - comments: everything after `#` is ignored
/// - whitespace and blank lines are ignored
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }
        push_item(line, &mut out, &mut seen).with_context(|| format!("line {line_no}"))?;
    }

    Ok(out)
}

/// Load a ports list from a file path. Errors if the file cannot be read or parsed.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

/// Render ports back into a compact expression, folding consecutive runs into ranges.
pub fn to_port_spec(ports: &[u16]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut i = 0;
    while i < ports.len() {
        let start = ports[i];
        let mut end = start;
        while i + 1 < ports.len() && end < u16::MAX && ports[i + 1] == end + 1 {
            end += 1;
            i += 1;
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}-{end}"));
        }
        i += 1;
    }
    parts.join(",")
}

fn push_item(item: &str, out: &mut Vec<u16>, seen: &mut HashSet<u16>) -> Result<()> {
    if let Some((a, b)) = item.split_once('-') {
        let start = parse_port_str(a.trim())
            .with_context(|| format!("invalid start in range: {a}"))?;
        let end = parse_port_str(b.trim())
            .with_context(|| format!("invalid end in range: {b}"))?;
        if start > end {
            bail!("invalid range {start}-{end} (start > end)");
        }
        for p in start..=end {
            if seen.insert(p) {
                out.push(p);
            }
        }
        return Ok(());
    }

    let p = parse_port_str(item).with_context(|| format!("invalid port value: {item}"))?;
    if seen.insert(p) {
        out.push(p);
    }
    Ok(())
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
