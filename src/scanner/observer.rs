//! Progress notifications emitted while probes complete.
use colored::Colorize;
use log::info;
use std::net::IpAddr;

use super::PortProbeResult;

/// Receives one notification per discovery.
///
/// Called from inside the probe tasks, so implementations must be cheap and
/// must not block.
pub trait ScanObserver: Send + Sync {
    fn port_open(&self, _target: IpAddr, _result: &PortProbeResult) {}

    fn host_alive(&self, _host: IpAddr) {}
}

/// Reports discoveries through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ScanObserver for LogObserver {
    fn port_open(&self, target: IpAddr, result: &PortProbeResult) {
        info!("Open {target}:{} ({})", result.port, result.service);
    }

    fn host_alive(&self, host: IpAddr) {
        info!("Host alive: {host}");
    }
}

/// Prints discoveries as they happen.
#[derive(Debug, Clone, Copy)]
pub struct TerminalObserver {
    pub greppable: bool,
    pub accessible: bool,
}

impl ScanObserver for TerminalObserver {
    fn port_open(&self, target: IpAddr, result: &PortProbeResult) {
        if self.greppable {
            return;
        }

        let mut line = format!("{target}:{} - {}", result.port, result.service.to_uppercase());
        if let Some(banner) = &result.banner {
            let short: String = banner.chars().take(50).collect();
            line.push_str(&format!(" - {}", short.replace(['\r', '\n'], " ")));
        }

        if self.accessible {
            println!("Open {line}");
        } else {
            println!("Open {}", line.purple());
        }

        if let Some(advisories) = &result.advisories {
            crate::warning!(
                format!("Potential vulnerabilities: {}", advisories.join(", ")),
                self.greppable,
                self.accessible
            );
        }
    }

    fn host_alive(&self, host: IpAddr) {
        if self.greppable {
            println!("{host}");
        } else if self.accessible {
            println!("Host alive: {host}");
        } else {
            println!("Host alive: {}", host.to_string().green());
        }
    }
}
