//! Accumulates everything a run learns into one [`ScanSession`].
use chrono::{DateTime, Local};
use serde_derive::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::os_detect::OsFingerprint;
use crate::scanner::PortProbeResult;
use crate::traceroute::HopTrace;

/// Forward and reverse name information for a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsInfo {
    pub ip: IpAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverse_dns: Option<String>,
}

/// What is known about one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_info: Option<OsFingerprint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hop_trace: Option<HopTrace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_info: Option<DnsInfo>,
    pub open_ports: Vec<PortProbeResult>,
}

/// The outcome of one run, from start to (possibly interrupted) end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSession {
    pub scan_start: DateTime<Local>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_end: Option<DateTime<Local>>,
    /// The target as the user typed it.
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_hosts: Option<Vec<IpAddr>>,
    pub hosts: BTreeMap<IpAddr, HostReport>,
}

impl ScanSession {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            scan_start: Local::now(),
            scan_end: None,
            target: target.into(),
            active_hosts: None,
            hosts: BTreeMap::new(),
        }
    }

    pub fn host(&self, addr: &IpAddr) -> Option<&HostReport> {
        self.hosts.get(addr)
    }

    pub fn open_port_count(&self) -> usize {
        self.hosts.values().map(|host| host.open_ports.len()).sum()
    }
}

/// Cloneable, thread-safe handle on the session being built.
///
/// The lock is only held for the in-memory update; callers do their I/O
/// before recording.
#[derive(Debug, Clone)]
pub struct SessionAggregator {
    session: Arc<Mutex<ScanSession>>,
}

impl SessionAggregator {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            session: Arc::new(Mutex::new(ScanSession::new(target))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScanSession> {
        // A panicking recorder cannot leave a half-written entry behind.
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_host(&self, addr: IpAddr, update: impl FnOnce(&mut HostReport)) {
        let mut session = self.lock();
        update(session.hosts.entry(addr).or_default());
    }

    pub fn record_ports(&self, addr: IpAddr, results: impl IntoIterator<Item = PortProbeResult>) {
        self.update_host(addr, |host| host.open_ports.extend(results));
    }

    pub fn record_os(&self, addr: IpAddr, fingerprint: OsFingerprint) {
        self.update_host(addr, |host| host.os_info = Some(fingerprint));
    }

    pub fn record_hop_trace(&self, addr: IpAddr, trace: HopTrace) {
        self.update_host(addr, |host| host.hop_trace = Some(trace));
    }

    pub fn record_dns(&self, addr: IpAddr, dns: DnsInfo) {
        self.update_host(addr, |host| host.dns_info = Some(dns));
    }

    pub fn record_active_hosts(&self, hosts: Vec<IpAddr>) {
        self.lock().active_hosts = Some(hosts);
    }

    /// Stamps the end time and returns the session with every host's open
    /// ports sorted ascending and deduplicated by port.
    ///
    /// May be called after an interrupted run; everything recorded so far is
    /// kept.
    pub fn finalize(&self) -> ScanSession {
        let mut session = self.lock();
        session.scan_end = Some(Local::now());
        for host in session.hosts.values_mut() {
            host.open_ports.sort_by_key(|result| result.port);
            host.open_ports.dedup_by_key(|result| result.port);
        }
        session.clone()
    }
}
