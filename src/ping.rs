//! Reachability through the system `ping` utility.
//!
//! The echo reply's TTL is read from the tool's text output. The format is a
//! platform contract: every common `ping` prints a `ttl=<n>` token (`TTL=<n>`
//! on Windows) on the reply line, which is all that is relied upon here.
use log::debug;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;

/// A successful echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    /// TTL of the reply as printed by the tool, when it could be parsed.
    pub ttl: Option<u8>,
}

/// Sends one echo request and waits at most `wait` for the tool to finish.
///
/// Returns `None` when the host did not answer, the tool is missing or the
/// budget ran out. The child process is killed if it outlives the budget.
pub async fn echo(target: IpAddr, wait: Duration) -> Option<EchoReply> {
    let mut command = ping_command(target);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = match time::timeout(wait, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!("Could not run ping for {target}: {e}");
            return None;
        }
        Err(_) => {
            debug!("Ping to {target} exceeded {wait:?}");
            return None;
        }
    };

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Some(EchoReply {
        ttl: parse_ttl(&stdout),
    })
}

fn ping_command(target: IpAddr) -> Command {
    let mut command = Command::new("ping");
    if cfg!(windows) {
        command.args(["-n", "1"]);
    } else {
        command.args(["-c", "1"]);
    }
    command.arg(target.to_string());
    command
}

/// Extracts the first `ttl=<n>` value, ignoring case.
pub fn parse_ttl(output: &str) -> Option<u8> {
    output.lines().find_map(|line| {
        let lower = line.to_ascii_lowercase();
        let (_, rest) = lower.split_once("ttl=")?;
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    })
}
