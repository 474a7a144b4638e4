//! Core functionality for actual scanning behaviour.
use crate::port_strategy::PortStrategy;
use crate::vulns;
use log::debug;

pub mod banner;
pub mod connect;
mod observer;
mod pool;
pub mod sweep;

pub use observer::{LogObserver, ScanObserver, TerminalObserver};
pub use pool::WorkerPool;

use connect::Connection;
use serde_derive::Serialize;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tokio_util::sync::CancellationToken;

/// Default number of ports probed at the same time.
pub const DEFAULT_BATCH_SIZE: u16 = 200;

/// Timeout used when a zero timeout is requested.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
}

/// Everything learned about one probed port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortProbeResult {
    pub port: u16,
    pub service: String,
    pub state: PortState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisories: Option<Vec<String>>,
}

impl PortProbeResult {
    pub fn closed(port: u16) -> Self {
        Self {
            port,
            service: crate::services::UNKNOWN_SERVICE.to_owned(),
            state: PortState::Closed,
            banner: None,
            advisories: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == PortState::Open
    }
}

#[derive(Debug)]
struct PortProber {
    timeout: Duration,
    capture_banner: bool,
    check_vulns: bool,
}

impl PortProber {
    /// Connects to `socket`, optionally grabs a banner on the same stream and
    /// attaches advisories. Never fails: any error yields a closed result.
    async fn probe(&self, socket: SocketAddr) -> PortProbeResult {
        let port = socket.port();
        let Connection::Open { stream, service } = connect::probe(socket, self.timeout).await
        else {
            return PortProbeResult::closed(port);
        };

        let banner = if self.capture_banner {
            banner::grab(stream, banner::BANNER_TIMEOUT).await
        } else {
            drop(stream);
            None
        };

        let advisories = if self.check_vulns {
            Some(vulns::check(port, &service)).filter(|issues| !issues.is_empty())
        } else {
            None
        };

        PortProbeResult {
            port,
            service,
            state: PortState::Open,
            banner,
            advisories,
        }
    }
}

/// The port scheduler for one target.
///
/// Each port gets its own probe task; at most `batch_size` run at once. The
/// open ports are returned sorted ascending no matter in which order the
/// probes completed.
pub struct Scanner {
    target: IpAddr,
    port_strategy: PortStrategy,
    pool: WorkerPool,
    prober: Arc<PortProber>,
    observer: Arc<dyn ScanObserver>,
}

impl Scanner {
    /// A zero `batch_size` is corrected to one and a zero `timeout` to
    /// [`DEFAULT_TIMEOUT`].
    pub fn new(
        target: IpAddr,
        batch_size: u16,
        timeout: Duration,
        port_strategy: PortStrategy,
        capture_banner: bool,
        check_vulns: bool,
    ) -> Self {
        let timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };

        Self {
            target,
            port_strategy,
            pool: WorkerPool::new(usize::from(batch_size), CancellationToken::new()),
            prober: Arc::new(PortProber {
                timeout,
                capture_banner,
                check_vulns,
            }),
            observer: Arc::new(LogObserver),
        }
    }

    /// Routes open-port notifications to `observer` instead of the log.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ScanObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Stops dispatching new probes once `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.pool = WorkerPool::new(self.pool.capacity(), cancel);
        self
    }

    pub fn target(&self) -> IpAddr {
        self.target
    }

    /// Probes every port of the strategy and returns the open ones, sorted.
    ///
    /// After cancellation only the probes that were already dispatched are
    /// awaited; their results are returned like any other.
    pub async fn run(&self) -> Vec<PortProbeResult> {
        let ports = self.port_strategy.order();
        let ports_len = ports.len();
        let target = self.target;

        debug!(
            "Start scanning {}. \nBatch size {}\nNumber of ports {}",
            target,
            self.pool.capacity(),
            ports_len
        );

        let mut open_ports = self
            .pool
            .run(ports, |port| {
                let prober = Arc::clone(&self.prober);
                let observer = Arc::clone(&self.observer);
                async move {
                    let result = prober.probe(SocketAddr::new(target, port)).await;
                    if !result.is_open() {
                        return None;
                    }
                    observer.port_open(target, &result);
                    Some(result)
                }
            })
            .await;

        open_ports.sort_unstable_by_key(|result| result.port);

        if self.pool.cancel_token().is_cancelled() {
            debug!("Scan of {target} cancelled, keeping {} results", open_ports.len());
        }
        debug!("Open ports found: {:?}", open_ports.iter().map(|r| r.port).collect::<Vec<_>>());
        open_ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{PortSpec, ScanOrder};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u16>>);

    impl ScanObserver for Recorder {
        fn port_open(&self, _target: IpAddr, result: &PortProbeResult) {
            self.0.lock().unwrap().push(result.port);
        }
    }

    async fn listeners(count: usize) -> (Vec<TcpListener>, Vec<u16>) {
        let mut listeners = Vec::new();
        let mut ports = Vec::new();
        for _ in 0..count {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            ports.push(listener.local_addr().unwrap().port());
            listeners.push(listener);
        }
        (listeners, ports)
    }

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[tokio::test]
    async fn scanner_runs() {
        // Makes sure the program still runs and doesn't panic
        let strategy = PortStrategy::pick(PortSpec::new(1..=1_000).unwrap(), ScanOrder::Random);
        let scanner = Scanner::new(localhost(), 10, Duration::from_millis(100), strategy, false, false);
        scanner.run().await;
    }

    #[tokio::test]
    async fn ipv6_scanner_runs() {
        let addr = "::1".parse::<IpAddr>().unwrap();
        let strategy = PortStrategy::pick(PortSpec::new(1..=1_000).unwrap(), ScanOrder::Serial);
        let scanner = Scanner::new(addr, 10, Duration::from_millis(100), strategy, true, true);
        scanner.run().await;
    }

    #[tokio::test]
    async fn open_ports_are_sorted_regardless_of_dispatch_order() {
        let (_listeners, mut ports) = listeners(3).await;
        ports.reverse();
        let spec = PortSpec::new(ports.iter().copied()).unwrap();
        let recorder = Arc::new(Recorder::default());

        let scanner = Scanner::new(
            localhost(),
            50,
            Duration::from_millis(500),
            PortStrategy::pick(spec, ScanOrder::Random),
            false,
            false,
        )
        .with_observer(recorder.clone());
        let results = scanner.run().await;

        ports.sort_unstable();
        assert_eq!(results.iter().map(|r| r.port).collect::<Vec<_>>(), ports);
        assert!(results.iter().all(PortProbeResult::is_open));

        let mut notified = recorder.0.lock().unwrap().clone();
        notified.sort_unstable();
        assert_eq!(notified, ports);
    }

    #[tokio::test]
    async fn closed_ports_are_left_out() {
        let (_listeners, open) = listeners(1).await;
        let (released, closed) = listeners(1).await;
        drop(released);

        let spec = PortSpec::new([open[0], closed[0]]).unwrap();
        let scanner = Scanner::new(
            localhost(),
            2,
            Duration::from_millis(500),
            PortStrategy::pick(spec, ScanOrder::Serial),
            false,
            false,
        );
        let results = scanner.run().await;

        assert_eq!(results.iter().map(|r| r.port).collect::<Vec<_>>(), open);
    }

    #[tokio::test]
    async fn banner_is_captured_on_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"220 test FTP ready\r\n").await.unwrap();
            let mut request = [0u8; banner::PROBE_LINE.len()];
            let _ = stream.read_exact(&mut request).await;
        });

        let scanner = Scanner::new(
            localhost(),
            1,
            Duration::from_millis(500),
            PortStrategy::pick(PortSpec::new([port]).unwrap(), ScanOrder::Serial),
            true,
            true,
        );
        let results = scanner.run().await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].banner.as_deref(), Some("220 test FTP ready"));
    }

    #[tokio::test]
    async fn cancelled_scan_dispatches_nothing() {
        let (_listeners, ports) = listeners(3).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let scanner = Scanner::new(
            localhost(),
            10,
            Duration::from_millis(500),
            PortStrategy::pick(PortSpec::new(ports).unwrap(), ScanOrder::Serial),
            false,
            false,
        )
        .with_cancellation(cancel);

        assert!(scanner.run().await.is_empty());
    }
}
