//! Best-effort mapping from TCP port numbers to service names.
//!
//! The system services database is read once; ports it does not list fall
//! back to a small built-in table. A miss is reported as `"unknown"`.
use log::debug;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fs;

/// Name reported when no registry knows the port.
pub const UNKNOWN_SERVICE: &str = "unknown";

const SERVICES_PATH: &str = "/etc/services";

const WELL_KNOWN: &[(u16, &str)] = &[
    (7, "echo"),
    (21, "ftp"),
    (22, "ssh"),
    (23, "telnet"),
    (25, "smtp"),
    (53, "domain"),
    (80, "http"),
    (110, "pop3"),
    (111, "sunrpc"),
    (135, "epmap"),
    (139, "netbios-ssn"),
    (143, "imap2"),
    (389, "ldap"),
    (443, "https"),
    (445, "microsoft-ds"),
    (465, "submissions"),
    (587, "submission"),
    (993, "imaps"),
    (995, "pop3s"),
    (1433, "ms-sql-s"),
    (1723, "pptp"),
    (3306, "mysql"),
    (3389, "ms-wbt-server"),
    (5432, "postgresql"),
    (5900, "vnc"),
    (6379, "redis"),
    (8080, "http-alt"),
    (8443, "https-alt"),
];

static REGISTRY: Lazy<HashMap<u16, String>> = Lazy::new(|| {
    let mut registry: HashMap<u16, String> = WELL_KNOWN
        .iter()
        .map(|&(port, name)| (port, name.to_owned()))
        .collect();

    match fs::read_to_string(SERVICES_PATH) {
        Ok(content) => registry.extend(parse_services(&content)),
        Err(e) => debug!("Services database unavailable, using built-in table: {e}"),
    }

    registry
});

/// Returns the registered TCP service name for `port`, or `"unknown"`.
pub fn service_name(port: u16) -> String {
    REGISTRY
        .get(&port)
        .cloned()
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_owned())
}

/// Extracts `port -> name` pairs for TCP entries of a services(5) file.
fn parse_services(content: &str) -> HashMap<u16, String> {
    let mut services = HashMap::new();

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or_default();
        let mut fields = line.split_whitespace();
        let (Some(name), Some(port_proto)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Some((port, proto)) = port_proto.split_once('/') else {
            continue;
        };
        if proto != "tcp" {
            continue;
        }
        if let Ok(port) = port.parse::<u16>() {
            // First entry wins, matching getservbyport.
            services.entry(port).or_insert_with(|| name.to_owned());
        }
    }

    services
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_entries_and_skips_comments() {
        let content = "# comment\n\
                       ftp\t\t21/tcp\n\
                       fsp\t\t21/udp\t\tfspd\n\
                       ssh\t\t22/tcp\t\t\t# SSH Remote Login Protocol\n\
                       http\t\t80/tcp\t\twww\n\
                       www-alt\t\t80/tcp\n\
                       broken line\n";
        let services = parse_services(content);

        assert_eq!(services.get(&21).map(String::as_str), Some("ftp"));
        assert_eq!(services.get(&22).map(String::as_str), Some("ssh"));
        assert_eq!(services.get(&80).map(String::as_str), Some("http"));
        assert_eq!(services.len(), 3);
    }

    #[test]
    fn well_known_ports_resolve() {
        assert_eq!(service_name(22), "ssh");
        assert_eq!(service_name(3306), "mysql");
    }

    #[test]
    fn unregistered_port_is_unknown() {
        assert_eq!(service_name(65000), UNKNOWN_SERVICE);
    }
}
