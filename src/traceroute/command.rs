//! Hop counting through the system traceroute utility.
use log::debug;
use std::io::{self, Read};
use std::net::IpAddr;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wait_timeout::ChildExt;

use super::{HopError, HopMethod, HopProbe};

/// Time allowed for the whole external run.
pub const TOOL_BUDGET: Duration = Duration::from_secs(60);

/// How often a running tool is checked for an interrupt.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Runs `traceroute` (`tracert` on Windows) and reads the hop count from the
/// numbered lines of its output.
#[derive(Debug, Clone)]
pub struct TracerouteCommand {
    program: String,
    budget: Duration,
}

impl TracerouteCommand {
    pub fn system() -> Self {
        let program = if cfg!(windows) { "tracert" } else { "traceroute" };
        Self::with_program(program)
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            budget: TOOL_BUDGET,
        }
    }

    #[must_use]
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    fn args(&self, target: IpAddr, max_hops: u8) -> Vec<String> {
        let max_hops = max_hops.to_string();
        if cfg!(windows) {
            vec!["-h".into(), max_hops, "-w".into(), "1000".into(), target.to_string()]
        } else {
            vec!["-m".into(), max_hops, "-w".into(), "1".into(), target.to_string()]
        }
    }

    /// Waits for `child` until it exits, the budget runs out or `cancel`
    /// fires. The child is killed in the last two cases.
    fn wait(&self, child: &mut Child, cancel: &CancellationToken) -> Result<(), HopError> {
        let deadline = Instant::now() + self.budget;

        loop {
            let slice = deadline.saturating_duration_since(Instant::now()).min(CANCEL_POLL);
            if child.wait_timeout(slice)?.is_some() {
                return Ok(());
            }

            let error = if cancel.is_cancelled() {
                HopError::Cancelled
            } else if Instant::now() >= deadline {
                HopError::TimedOut(self.program.clone())
            } else {
                continue;
            };
            child.kill()?;
            child.wait()?;
            return Err(error);
        }
    }
}

impl HopProbe for TracerouteCommand {
    fn method(&self) -> HopMethod {
        HopMethod::Fallback
    }

    fn count_hops(
        &self,
        target: IpAddr,
        max_hops: u8,
        cancel: &CancellationToken,
    ) -> Result<Option<u8>, HopError> {
        if cancel.is_cancelled() {
            return Err(HopError::Cancelled);
        }

        let mut child = Command::new(&self.program)
            .args(self.args(target, max_hops))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    HopError::ToolMissing(self.program.clone())
                } else {
                    HopError::Io(e)
                }
            })?;

        self.wait(&mut child, cancel)?;

        let mut output = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout.read_to_string(&mut output)?;
        }
        debug!("{} printed {} lines", self.program, output.lines().count());

        Ok(parse_hops(&output))
    }
}

/// The highest hop number that starts a line, ignoring the header line.
pub fn parse_hops(output: &str) -> Option<u8> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("traceroute") && !line.starts_with("Tracing"))
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|first| first.parse::<u8>().ok())
        .filter(|&hop| hop > 0)
        .max()
}
