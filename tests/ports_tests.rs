use scan_pilot::ports::{parse_port_spec, parse_ports_str, to_port_spec};

#[test]
fn parse_single_and_ranges_and_comments() {
    let input = r#"
        # common ports
        22
        80  # http
        443 # https
        8000-8002
        8001  # duplicate
        # blank line follows

    "#;

    let ports = parse_ports_str(input).expect("parse ok");
    // Dedup, preserve insertion order of first appearance in each range/line
    assert_eq!(ports, vec![22, 80, 443, 8000, 8001, 8002]);
}

#[test]
fn ports_file_renders_as_expression() {
    let ports = parse_ports_str("443\n22\n8000-8002\n").expect("parse ok");
    let spec = to_port_spec(&ports);
    assert_eq!(spec, "443,22,8000-8002");
    assert_eq!(parse_port_spec(&spec).unwrap(), ports);
}

#[test]
fn invalid_port_rejected() {
    assert!(parse_ports_str("0\n").is_err());
    assert!(parse_port_spec("1-65536").is_err());
}
