//! Rendering of a finished [`ScanSession`] to files and to the terminal.
use colored::Colorize;
use itertools::Itertools;
use log::debug;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::{ScanError, ScanResult};
use crate::input::OutputFormat;
use crate::os_detect::OsFingerprint;
use crate::session::{HostReport, ScanSession};
use crate::{detail, output};

/// Banner characters kept per port in the text report.
pub const TXT_BANNER_LENGTH: usize = 100;

const RULE: &str = "============================================================";

/// Renders the session as pretty-printed JSON.
pub fn to_json(session: &ScanSession) -> ScanResult<String> {
    serde_json::to_string_pretty(session).map_err(|e| ScanError::OutputError(e.to_string()))
}

/// Renders the session as the plain-text report.
pub fn to_txt(session: &ScanSession) -> String {
    let mut txt = String::new();
    let _ = writeln!(txt, "{RULE}\nELYSIUM SCAN REPORT\n{RULE}\n");
    let _ = writeln!(txt, "Scan Start: {}", session.scan_start.to_rfc3339());
    if let Some(end) = session.scan_end {
        let _ = writeln!(txt, "Scan End: {}", end.to_rfc3339());
    }
    let _ = writeln!(txt, "Target: {}", session.target);

    if let Some(active) = &session.active_hosts {
        let _ = writeln!(txt, "\nActive Hosts ({}):", active.len());
        for host in active {
            let _ = writeln!(txt, "  {host}");
        }
    }

    for (addr, host) in &session.hosts {
        let _ = writeln!(txt, "\n{RULE}\nHost: {addr}\n{RULE}");
        write_host(&mut txt, host);
    }

    txt
}

fn write_host(txt: &mut String, host: &HostReport) {
    if let Some(dns) = &host.dns_info {
        let _ = writeln!(txt, "\nDNS Information:\n  ip: {}", dns.ip);
        if let Some(name) = &dns.reverse_dns {
            let _ = writeln!(txt, "  reverse_dns: {name}");
        }
    }

    if let Some(os) = &host.os_info {
        let _ = writeln!(txt, "\nOS Information:");
        for (key, value) in os_fields(os) {
            let _ = writeln!(txt, "  {key}: {value}");
        }
    }

    if let Some(trace) = &host.hop_trace {
        let hops = trace.hop_count.map_or_else(|| "unknown".to_owned(), |h| h.to_string());
        let _ = writeln!(txt, "\nHop Count: {hops} ({})", trace.method);
    }

    let _ = writeln!(txt, "\nOpen Ports ({}):", host.open_ports.len());
    for port in &host.open_ports {
        let _ = writeln!(txt, "  Port {}/tcp - {}", port.port, port.service);
        if let Some(banner) = &port.banner {
            let short: String = banner.chars().take(TXT_BANNER_LENGTH).collect();
            let _ = writeln!(txt, "    Banner: {}", short.replace(['\r', '\n'], " "));
        }
        if let Some(advisories) = &port.advisories {
            let _ = writeln!(txt, "    Vulnerabilities: {}", advisories.join(", "));
        }
    }
}

/// The populated fields of a fingerprint as `(key, value)` pairs.
fn os_fields(os: &OsFingerprint) -> Vec<(&'static str, String)> {
    let mut fields = vec![("os", os.os.clone())];
    if let Some(ttl) = os.observed_ttl {
        fields.push(("observed_ttl", ttl.to_string()));
    }
    if let Some(ttl) = os.corrected_ttl {
        fields.push(("corrected_ttl", ttl.to_string()));
    }
    if let Some(hops) = os.hop_count {
        fields.push(("hop_count", hops.to_string()));
    }
    if let Some(confidence) = os.confidence {
        fields.push(("confidence", format!("{confidence}%")));
    }
    if let Some(reliability) = os.reliability {
        fields.push(("reliability", reliability.to_string()));
    }
    if let Some(method) = os.method {
        fields.push(("method", method.to_string()));
    }
    if let Some(note) = &os.note {
        fields.push(("note", note.clone()));
    }
    fields
}

/// Writes the session to `path` in `format`.
pub fn write(session: &ScanSession, path: &Path, format: OutputFormat) -> ScanResult<()> {
    let rendered = match format {
        OutputFormat::Json => to_json(session)?,
        OutputFormat::Txt => to_txt(session),
    };
    debug!("Writing {} bytes of {format:?} report to {}", rendered.len(), path.display());

    fs::write(path, rendered)
        .map_err(|e| ScanError::OutputError(format!("{}: {e}", path.display())))
}

/// Prints the end-of-run summary.
///
/// In greppable mode each host becomes one `ip -> [ports]` line.
pub fn print_summary(session: &ScanSession, greppable: bool, accessible: bool) {
    if session.hosts.is_empty() {
        return;
    }

    for (addr, host) in &session.hosts {
        let ports = host.open_ports.iter().map(|p| p.port).join(",");
        if greppable {
            println!("{addr} -> [{ports}]");
            continue;
        }

        if let Some(os) = host.os_info.as_ref().filter(|os| !os.is_unknown()) {
            let confidence = os.confidence.unwrap_or_default();
            detail!(
                format!("{addr} looks like {} ({confidence}% confidence)", os.os),
                greppable,
                accessible
            );
        }

        let ports = if accessible { ports } else { ports.green().to_string() };
        output!(format!("{addr} -> [{ports}]"), greppable, accessible);
    }

    detail!(
        format!(
            "{} open port(s) on {} host(s)",
            session.open_port_count(),
            session.hosts.len()
        ),
        greppable,
        accessible
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os_detect::{classify, TtlTable};
    use crate::scanner::{PortProbeResult, PortState};
    use crate::session::{DnsInfo, SessionAggregator};
    use std::net::IpAddr;

    fn session() -> ScanSession {
        let addr: IpAddr = "192.0.2.7".parse().unwrap();
        let aggregator = SessionAggregator::new("host.example");
        aggregator.record_dns(
            addr,
            DnsInfo {
                ip: addr,
                reverse_dns: None,
            },
        );
        aggregator.record_os(addr, classify(118, None, &TtlTable::default()));
        aggregator.record_ports(
            addr,
            [
                PortProbeResult {
                    port: 21,
                    service: "ftp".to_owned(),
                    state: PortState::Open,
                    banner: Some("x".repeat(300)),
                    advisories: Some(vec!["Anonymous FTP".to_owned()]),
                },
                PortProbeResult {
                    port: 80,
                    service: "http".to_owned(),
                    state: PortState::Open,
                    banner: None,
                    advisories: None,
                },
            ],
        );
        aggregator.finalize()
    }

    #[test]
    fn txt_report_has_sections() {
        let txt = to_txt(&session());

        assert!(txt.starts_with(RULE));
        assert!(txt.contains("Target: host.example"));
        assert!(txt.contains("Scan End: "));
        assert!(txt.contains("Host: 192.0.2.7"));
        assert!(txt.contains("  os: Windows"));
        assert!(txt.contains("  reliability: MEDIUM"));
        assert!(txt.contains("  method: ttl-basic"));
        assert!(txt.contains("Open Ports (2):"));
        assert!(txt.contains("  Port 80/tcp - http"));
        assert!(txt.contains("    Vulnerabilities: Anonymous FTP"));
    }

    #[test]
    fn txt_banner_is_shortened() {
        let txt = to_txt(&session());
        let banner_line = txt.lines().find(|l| l.trim_start().starts_with("Banner:")).unwrap();

        assert_eq!(banner_line.trim_start().trim_start_matches("Banner: ").len(), TXT_BANNER_LENGTH);
    }

    #[test]
    fn json_report_keeps_full_banner() {
        let json: serde_json::Value = serde_json::from_str(&to_json(&session()).unwrap()).unwrap();
        let port = &json["hosts"]["192.0.2.7"]["open_ports"][0];

        assert_eq!(port["banner"].as_str().map(str::len), Some(300));
        assert_eq!(port["state"], "open");
        assert_eq!(json["target"], "host.example");
    }

    #[test]
    fn write_creates_file() {
        let path = std::env::temp_dir().join(format!("elysium-report-{}.txt", std::process::id()));
        write(&session(), &path, OutputFormat::Txt).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(content.contains("ELYSIUM SCAN REPORT"));
    }

    #[test]
    fn write_to_missing_directory_fails() {
        let path = Path::new("/nonexistent-elysium-dir/report.json");

        assert!(matches!(
            write(&session(), path, OutputFormat::Json),
            Err(ScanError::OutputError(_))
        ));
    }
}
