//! TTL-based operating system guess.
//!
//! Hosts start their packets with a TTL that depends mostly on the OS family
//! and every router on the path lowers it by one. Adding the hop count back
//! to the TTL seen on arrival estimates the initial value, which is matched
//! against a reference table. The result is a heuristic: callers get the
//! method and a reliability band so a LOW guess is not over-trusted.
use log::{debug, info};
use serde_derive::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::ping;
use crate::traceroute::{HopCounter, HopTrace};

/// Name reported when nothing could be measured.
pub const UNKNOWN_OS: &str = "Unknown";

/// Budget for the echo that supplies the observed TTL.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

const BASIC_NOTE: &str = "Accuracy limited without hop count data";

/// One reference entry: an OS family and its usual initial TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsReference {
    pub name: String,
    pub ttl: u8,
}

/// Ordered reference table. Earlier entries win ties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlTable(Vec<OsReference>);

impl TtlTable {
    pub fn new(entries: impl IntoIterator<Item = (impl Into<String>, u8)>) -> Self {
        Self(
            entries
                .into_iter()
                .map(|(name, ttl)| OsReference {
                    name: name.into(),
                    ttl,
                })
                .collect(),
        )
    }

    /// The entry nearest to `ttl` and its absolute distance.
    pub fn closest(&self, ttl: u16) -> Option<(&OsReference, u16)> {
        let mut best: Option<(&OsReference, u16)> = None;
        for entry in &self.0 {
            let diff = ttl.abs_diff(u16::from(entry.ttl));
            if best.map_or(true, |(_, best_diff)| diff < best_diff) {
                best = Some((entry, diff));
            }
        }
        best
    }
}

impl Default for TtlTable {
    fn default() -> Self {
        Self::new([("Linux/Unix", 64), ("Windows", 128), ("Cisco/Network", 255)])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Reliability {
    High,
    Medium,
    Low,
}

impl Reliability {
    pub fn from_diff(diff: u16) -> Self {
        match diff {
            0..=5 => Reliability::High,
            6..=15 => Reliability::Medium,
            _ => Reliability::Low,
        }
    }
}

impl fmt::Display for Reliability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reliability::High => "HIGH",
            Reliability::Medium => "MEDIUM",
            Reliability::Low => "LOW",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OsMethod {
    TtlWithHops,
    TtlBasic,
}

impl fmt::Display for OsMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OsMethod::TtlWithHops => "ttl-with-hops",
            OsMethod::TtlBasic => "ttl-basic",
        })
    }
}

/// An OS guess. The unknown guess carries no numeric fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OsFingerprint {
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_ttl: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_ttl: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hop_count: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reliability: Option<Reliability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<OsMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl OsFingerprint {
    pub fn unknown() -> Self {
        Self {
            os: UNKNOWN_OS.to_owned(),
            observed_ttl: None,
            corrected_ttl: None,
            hop_count: None,
            confidence: None,
            reliability: None,
            method: None,
            note: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.observed_ttl.is_none()
    }
}

/// `max(0, 100 - 10 * diff)`.
///
/// Already zero at a difference of 10 while the band is still MEDIUM up to
/// 15. Kept as is; see DESIGN.md.
pub fn confidence(diff: u16) -> u8 {
    let confidence = 100u32.saturating_sub(u32::from(diff) * 10);
    u8::try_from(confidence).unwrap_or(u8::MAX)
}

/// Matches an observed TTL, corrected by the hop count when known.
pub fn classify(observed_ttl: u8, hop_count: Option<u8>, table: &TtlTable) -> OsFingerprint {
    let corrected_ttl = hop_count.map(|hops| u16::from(observed_ttl) + u16::from(hops));
    let reference_ttl = corrected_ttl.unwrap_or_else(|| u16::from(observed_ttl));

    let Some((entry, diff)) = table.closest(reference_ttl) else {
        return OsFingerprint::unknown();
    };

    let (method, note) = match hop_count {
        Some(_) => (OsMethod::TtlWithHops, None),
        None => (OsMethod::TtlBasic, Some(BASIC_NOTE.to_owned())),
    };

    OsFingerprint {
        os: entry.name.clone(),
        observed_ttl: Some(observed_ttl),
        corrected_ttl,
        hop_count,
        confidence: Some(confidence(diff)),
        reliability: Some(Reliability::from_diff(diff)),
        method: Some(method),
        note,
    }
}

/// Measures the TTL of an echo reply (and optionally the hop count) and
/// classifies the result.
#[derive(Clone)]
pub struct OsDetector {
    table: TtlTable,
    hop_counter: Option<HopCounter>,
    ping_timeout: Duration,
    cancel: CancellationToken,
}

impl OsDetector {
    pub fn new(table: TtlTable) -> Self {
        Self {
            table,
            hop_counter: None,
            ping_timeout: PING_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    /// Abandons the echo once `cancel` fires. The hop counter carries its
    /// own token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Corrects the observed TTL with the hop count from `hop_counter`.
    #[must_use]
    pub fn with_hop_counter(mut self, hop_counter: HopCounter) -> Self {
        self.hop_counter = Some(hop_counter);
        self
    }

    /// Returns the guess plus the hop trace when one was attempted.
    pub async fn detect(&self, target: IpAddr) -> (OsFingerprint, Option<HopTrace>) {
        let trace = match &self.hop_counter {
            Some(counter) => Some(counter.trace_async(target).await),
            None => None,
        };

        let reply = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                debug!("OS detection of {target} interrupted");
                None
            }
            reply = ping::echo(target, self.ping_timeout) => reply,
        };

        let Some(observed_ttl) = reply.and_then(|reply| reply.ttl) else {
            debug!("No TTL observed for {target}");
            return (OsFingerprint::unknown(), trace);
        };
        info!("Received TTL {observed_ttl} from {target}");

        let hops = trace.and_then(|trace| trace.hop_count);
        (classify(observed_ttl, hops, &self.table), trace)
    }
}

impl Default for OsDetector {
    fn default() -> Self {
        Self::new(TtlTable::default())
    }
}
