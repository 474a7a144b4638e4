//! Static lookup of well-known risks for exposed services.
//!
//! This never touches the network. The table is a constant; the same input
//! always yields the same advisories.

/// Known issues for one well-known service.
#[derive(Debug)]
pub struct Advisory {
    pub port: u16,
    /// Service names that identify this service on a non-standard port.
    pub services: &'static [&'static str],
    pub issues: &'static [&'static str],
}

/// The advisory table, ordered by port.
pub const ADVISORIES: &[Advisory] = &[
    Advisory {
        port: 21,
        services: &["ftp"],
        issues: &["Anonymous FTP", "vsftpd 2.3.4 backdoor"],
    },
    Advisory {
        port: 22,
        services: &["ssh"],
        issues: &["Weak SSH algorithms", "Default credentials"],
    },
    Advisory {
        port: 23,
        services: &["telnet"],
        issues: &["Telnet plaintext", "No encryption"],
    },
    Advisory {
        port: 3306,
        services: &["mysql"],
        issues: &["MySQL default root", "No password"],
    },
    Advisory {
        port: 3389,
        services: &["ms-wbt-server", "rdp"],
        issues: &["RDP BlueKeep (CVE-2019-0708)", "Weak credentials"],
    },
    Advisory {
        port: 5900,
        services: &["vnc", "rfb"],
        issues: &["VNC no authentication", "Weak password"],
    },
    Advisory {
        port: 6379,
        services: &["redis"],
        issues: &["Redis no auth", "Unprotected instance"],
    },
];

/// Returns the advisories for a service found open on `port`.
///
/// The port decides first. When the port is not in the table, the service
/// name is matched instead, so `ssh` on 2222 still gets the SSH advisories.
pub fn check(port: u16, service: &str) -> Vec<String> {
    let by_port = ADVISORIES.iter().find(|advisory| advisory.port == port);
    let advisory = by_port.or_else(|| {
        ADVISORIES
            .iter()
            .find(|advisory| advisory.services.iter().any(|s| s.eq_ignore_ascii_case(service)))
    });

    advisory
        .map(|advisory| advisory.issues.iter().map(|&issue| issue.to_owned()).collect())
        .unwrap_or_default()
}
