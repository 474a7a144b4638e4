//! Host discovery across a subnet.
use cidr_utils::cidr::IpCidr;
use futures::Future;
use log::debug;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{LogObserver, ScanObserver, WorkerPool};
use crate::ping;

/// Default number of hosts pinged at the same time.
pub const DEFAULT_SWEEP_BATCH_SIZE: u16 = 50;

/// Time allowed for one echo before the host counts as down.
pub const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Walks the addresses worth probing in `cidr` without collecting them.
///
/// For IPv4 blocks wider than a /31 the network and broadcast addresses are
/// skipped.
pub fn candidate_hosts(cidr: &IpCidr) -> impl DoubleEndedIterator<Item = IpAddr> {
    let mut hosts = cidr.iter().addresses();

    if cidr.is_ipv4() && cidr.network_length() < 31 {
        hosts.next();
        hosts.next_back();
    }

    hosts
}

/// Pings every candidate host of a subnet through a bounded pool.
pub struct HostSweep {
    pool: WorkerPool,
    timeout: Duration,
    observer: Arc<dyn ScanObserver>,
}

impl HostSweep {
    pub fn new(batch_size: u16, timeout: Duration) -> Self {
        Self {
            pool: WorkerPool::new(usize::from(batch_size), CancellationToken::new()),
            timeout,
            observer: Arc::new(LogObserver),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ScanObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.pool = WorkerPool::new(self.pool.capacity(), cancel);
        self
    }

    /// Returns the responsive hosts of `cidr`, sorted ascending.
    pub async fn run(&self, cidr: &IpCidr) -> Vec<IpAddr> {
        debug!("Sweeping {cidr}");
        let timeout = self.timeout;
        self.run_with(candidate_hosts(cidr), move |host| async move {
            ping::echo(host, timeout).await.is_some()
        })
        .await
    }

    /// Same as [`HostSweep::run`] with a caller-supplied reachability check.
    pub async fn run_with<I, F, Fut>(&self, hosts: I, is_alive: F) -> Vec<IpAddr>
    where
        I: IntoIterator<Item = IpAddr>,
        F: Fn(IpAddr) -> Fut,
        Fut: Future<Output = bool>,
    {
        debug!("Pinging with {} workers", self.pool.capacity());

        let mut alive = self
            .pool
            .run(hosts, |host| {
                let observer = Arc::clone(&self.observer);
                let check = is_alive(host);
                async move {
                    if !check.await {
                        return None;
                    }
                    observer.host_alive(host);
                    Some(host)
                }
            })
            .await;

        alive.sort_unstable();
        alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cidr(s: &str) -> IpCidr {
        IpCidr::from_str(s).unwrap()
    }

    #[test]
    fn skips_network_and_broadcast() {
        let hosts: Vec<IpAddr> = candidate_hosts(&cidr("192.168.0.0/30")).collect();

        assert_eq!(
            hosts,
            vec![
                "192.168.0.1".parse::<IpAddr>().unwrap(),
                "192.168.0.2".parse::<IpAddr>().unwrap()
            ]
        );
    }

    #[test]
    fn point_to_point_and_single_host_keep_every_address() {
        assert_eq!(candidate_hosts(&cidr("10.0.0.0/31")).count(), 2);
        assert_eq!(candidate_hosts(&cidr("10.0.0.7/32")).count(), 1);
        assert_eq!(candidate_hosts(&cidr("10.0.0.0/24")).count(), 254);
    }

    #[test]
    fn wide_blocks_are_walked_lazily() {
        let mut hosts = candidate_hosts(&cidr("10.0.0.0/8"));

        assert_eq!(hosts.next(), Some("10.0.0.1".parse().unwrap()));
        assert_eq!(hosts.next_back(), Some("10.255.255.254".parse().unwrap()));

        let v6: Vec<IpAddr> = candidate_hosts(&cidr("2001:db8::/64")).take(2).collect();
        assert_eq!(
            v6,
            vec![
                "2001:db8::".parse::<IpAddr>().unwrap(),
                "2001:db8::1".parse::<IpAddr>().unwrap()
            ]
        );
    }

    #[tokio::test]
    async fn cancelling_a_wide_sweep_stops_dispatch() {
        let cancel = CancellationToken::new();
        let sweep = HostSweep::new(4, PING_TIMEOUT).with_cancellation(cancel.clone());
        let checked = Arc::new(AtomicUsize::new(0));

        let alive = sweep
            .run_with(candidate_hosts(&cidr("10.0.0.0/8")), |_| {
                let checked = Arc::clone(&checked);
                let cancel = cancel.clone();
                async move {
                    if checked.fetch_add(1, Ordering::SeqCst) == 9 {
                        cancel.cancel();
                    }
                    true
                }
            })
            .await;

        assert!(checked.load(Ordering::SeqCst) < 20);
        assert_eq!(alive.len(), checked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn alive_hosts_are_sorted() {
        let sweep = HostSweep::new(DEFAULT_SWEEP_BATCH_SIZE, PING_TIMEOUT);
        let hosts = candidate_hosts(&cidr("10.1.0.0/28")).rev();

        let alive = sweep
            .run_with(hosts, |host| async move {
                match host {
                    IpAddr::V4(v4) => v4.octets()[3] % 3 == 0,
                    IpAddr::V6(_) => false,
                }
            })
            .await;

        let expected: Vec<IpAddr> = ["10.1.0.3", "10.1.0.6", "10.1.0.9", "10.1.0.12"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        assert_eq!(alive, expected);
    }

    #[tokio::test]
    async fn cancelled_sweep_returns_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sweep = HostSweep::new(4, PING_TIMEOUT).with_cancellation(cancel);

        let alive = sweep
            .run_with(candidate_hosts(&cidr("10.1.0.0/29")), |_| async { true })
            .await;
        assert!(alive.is_empty());
    }
}
