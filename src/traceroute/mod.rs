//! Hop counting towards a target.
//!
//! Two strategies implement [`HopProbe`]: raw incremental-TTL probing, which
//! needs the privilege to open a raw ICMP socket, and the system traceroute
//! utility. [`HopCounter::detect`] tries to open a raw socket once and picks
//! the strategy from the outcome. None of this is ever fatal: every failure
//! ends up as a [`HopTrace`] with [`HopMethod::Unavailable`].
use log::{debug, info, warn};
use serde_derive::Serialize;
use std::fmt;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

mod command;
mod raw;

pub use command::TracerouteCommand;
pub use raw::RawHopProbe;

/// Highest TTL tried by default.
pub const DEFAULT_MAX_HOPS: u8 = 30;

/// How long each TTL waits for an ICMP answer.
pub const DEFAULT_HOP_TIMEOUT: Duration = Duration::from_secs(2);

/// How the hop count was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HopMethod {
    Raw,
    Fallback,
    Unavailable,
}

impl fmt::Display for HopMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HopMethod::Raw => "raw",
            HopMethod::Fallback => "fallback",
            HopMethod::Unavailable => "unavailable",
        })
    }
}

/// Network distance to one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HopTrace {
    pub hop_count: Option<u8>,
    pub method: HopMethod,
}

impl HopTrace {
    pub fn unavailable() -> Self {
        Self {
            hop_count: None,
            method: HopMethod::Unavailable,
        }
    }
}

#[derive(Debug, Error)]
pub enum HopError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Raw probing does not support {0}")]
    Unsupported(IpAddr),

    #[error("{0} not found")]
    ToolMissing(String),

    #[error("{0} timed out")]
    TimedOut(String),

    #[error("Hop counting interrupted")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// One way of measuring the hop count.
///
/// Implementations block; [`HopCounter::trace_async`] moves them off the
/// async runtime.
pub trait HopProbe: Send + Sync {
    /// The method reported when this probe succeeds.
    fn method(&self) -> HopMethod;

    /// `Ok(None)` means the probe ran but nothing answered. Once `cancel`
    /// fires the probe stops sending and returns [`HopError::Cancelled`].
    fn count_hops(
        &self,
        target: IpAddr,
        max_hops: u8,
        cancel: &CancellationToken,
    ) -> Result<Option<u8>, HopError>;
}

/// Picks a hop probe by capability and turns its outcome into a [`HopTrace`].
#[derive(Clone)]
pub struct HopCounter {
    primary: Option<Arc<dyn HopProbe>>,
    fallback: Arc<dyn HopProbe>,
    max_hops: u8,
    cancel: CancellationToken,
}

impl HopCounter {
    /// Uses raw probing when a raw socket can be opened, the system
    /// traceroute otherwise.
    pub fn detect(max_hops: u8, hop_timeout: Duration) -> Self {
        let raw = RawHopProbe::open(hop_timeout).map(|probe| Arc::new(probe) as Arc<dyn HopProbe>);
        Self::select(raw, Arc::new(TracerouteCommand::system()), max_hops)
    }

    /// Keeps `raw` when the capability check succeeded.
    pub fn select(
        raw: Result<Arc<dyn HopProbe>, HopError>,
        fallback: Arc<dyn HopProbe>,
        max_hops: u8,
    ) -> Self {
        let primary = match raw {
            Ok(probe) => Some(probe),
            Err(e) => {
                info!("Raw sockets unavailable ({e}), using the system traceroute");
                None
            }
        };

        Self {
            primary,
            fallback,
            max_hops: max_hops.max(1),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn uses_raw_probe(&self) -> bool {
        self.primary.is_some()
    }

    /// Measures the hop count to `target`. Blocks for up to the probe budget.
    pub fn trace(&self, target: IpAddr) -> HopTrace {
        if let Some(primary) = &self.primary {
            match primary.count_hops(target, self.max_hops, &self.cancel) {
                Ok(hops) => return Self::to_trace(hops, primary.method()),
                Err(HopError::Cancelled) => {
                    info!("Hop count towards {target} interrupted");
                    return HopTrace::unavailable();
                }
                Err(e @ (HopError::PermissionDenied(_) | HopError::Unsupported(_))) => {
                    info!("{e}, using the system traceroute");
                }
                Err(e) => warn!("Raw hop probe failed ({e}), using the system traceroute"),
            }
        }

        match self.fallback.count_hops(target, self.max_hops, &self.cancel) {
            Ok(hops) => Self::to_trace(hops, self.fallback.method()),
            Err(e) => {
                warn!("Hop count unavailable for {target}: {e}");
                HopTrace::unavailable()
            }
        }
    }

    /// [`HopCounter::trace`] on the blocking thread pool.
    pub async fn trace_async(&self, target: IpAddr) -> HopTrace {
        let counter = self.clone();
        tokio::task::spawn_blocking(move || counter.trace(target))
            .await
            .unwrap_or_else(|e| {
                warn!("Hop count task failed: {e}");
                HopTrace::unavailable()
            })
    }

    fn to_trace(hops: Option<u8>, method: HopMethod) -> HopTrace {
        match hops {
            Some(hop_count) => {
                debug!("Hop count {hop_count} via {method:?}");
                HopTrace {
                    hop_count: Some(hop_count),
                    method,
                }
            }
            None => HopTrace::unavailable(),
        }
    }
}
