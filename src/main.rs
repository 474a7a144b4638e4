//! Command line entry point.
use anyhow::Context;
use colored::Colorize;
use elysium::address::{lookup_dns, parse_cidr, resolve_target};
use elysium::input::{Config, Opts};
use elysium::os_detect::OsDetector;
use elysium::port_strategy::PortStrategy;
use elysium::report;
use elysium::scanner::sweep::HostSweep;
use elysium::scanner::{ScanObserver, Scanner, TerminalObserver};
use elysium::session::SessionAggregator;
use elysium::traceroute::{HopCounter, DEFAULT_HOP_TIMEOUT};
use elysium::{detail, output, warning};
use log::{debug, info};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// Average value for Ubuntu
#[cfg(unix)]
const DEFAULT_FILE_DESCRIPTORS_LIMIT: u64 = 8000;
// Safest batch size when the file limit is tiny
#[cfg(unix)]
const MIN_BATCH_SIZE: u64 = 50;

#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> anyhow::Result<()> {
    #[cfg(windows)]
    let _ = ansi_term_support();

    env_logger::init();

    let mut opts: Opts = Opts::read();
    let config = if opts.no_config {
        Config::default()
    } else {
        Config::read(opts.config_path.clone()).context("Could not load the configuration file")?
    };
    opts.merge(&config);

    debug!("Main() `opts` arguments are {opts:?}");

    if !opts.greppable && !opts.accessible && !opts.no_banner {
        print_opening(&opts);
    }

    #[cfg(unix)]
    let batch_size: u16 = infer_batch_size(&opts, adjust_ulimit_size(&opts));

    #[cfg(not(unix))]
    let batch_size: u16 = opts.batch_size;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let observer: Arc<dyn ScanObserver> = Arc::new(TerminalObserver {
        greppable: opts.greppable,
        accessible: opts.accessible,
    });
    let aggregator = SessionAggregator::new(opts.target.clone());

    if opts.ping {
        if let Some(cidr) = parse_cidr(&opts.target) {
            detail!(
                format!("Sweeping {} for live hosts", opts.target),
                opts.greppable,
                opts.accessible
            );
            let sweep = HostSweep::new(opts.sweep_batch_size, elysium::scanner::sweep::PING_TIMEOUT)
                .with_observer(Arc::clone(&observer))
                .with_cancellation(cancel.clone());
            let alive = sweep.run(&cidr).await;
            detail!(
                format!("{} host(s) alive", alive.len()),
                opts.greppable,
                opts.accessible
            );
            aggregator.record_active_hosts(alive);
            return finish(&opts, &aggregator, &cancel);
        }
    }

    let target = match resolve_target(&opts.target, &opts.resolver).await {
        Ok(target) => target,
        Err(e) => {
            warning!(format!("Error: {e}"));
            process::exit(1);
        }
    };

    if opts.dns {
        let dns = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            dns = lookup_dns(target, &opts.resolver) => Some(dns),
        };
        if let Some(dns) = dns {
            if let Some(name) = &dns.reverse_dns {
                detail!(format!("Reverse DNS: {name}"), opts.greppable, opts.accessible);
            }
            aggregator.record_dns(target, dns);
        }
    }

    if opts.os {
        let mut detector = OsDetector::default().with_cancellation(cancel.clone());
        if opts.traceroute {
            let counter = HopCounter::detect(opts.max_hops, DEFAULT_HOP_TIMEOUT)
                .with_cancellation(cancel.clone());
            if !counter.uses_raw_probe() {
                warning!(
                    "Raw sockets unavailable, counting hops with the system traceroute.",
                    opts.greppable,
                    opts.accessible
                );
            }
            detector = detector.with_hop_counter(counter);
        }

        let (fingerprint, trace) = detector.detect(target).await;
        if let Some(trace) = trace {
            aggregator.record_hop_trace(target, trace);
        }
        aggregator.record_os(target, fingerprint);
    }

    let ports = opts.port_spec();
    detail!(
        format!(
            "Target: {} ({target}) | Ports: {} | Batch size: {batch_size} | Timeout: {}ms",
            opts.target,
            ports.len(),
            opts.timeout
        ),
        opts.greppable,
        opts.accessible
    );

    let scanner = Scanner::new(
        target,
        batch_size,
        Duration::from_millis(opts.timeout.into()),
        PortStrategy::pick(ports, opts.scan_order),
        opts.banner,
        opts.vulns,
    )
    .with_observer(observer)
    .with_cancellation(cancel.clone());
    debug!("Scanner finished building: {:?}", scanner.target());

    let open_ports = scanner.run().await;
    info!("Scan of {target} found {} open ports", open_ports.len());
    aggregator.record_ports(target, open_ports);

    finish(&opts, &aggregator, &cancel)
}

/// Seals the session, prints the summary and writes the requested report.
/// Runs after interrupted scans as well.
fn finish(
    opts: &Opts,
    aggregator: &SessionAggregator,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    if cancel.is_cancelled() {
        warning!("Scan interrupted");
    }

    let session = aggregator.finalize();
    report::print_summary(&session, opts.greppable, opts.accessible);

    if let Some(path) = &opts.output {
        report::write(&session, path, opts.format)?;
        output!(
            format!("Results saved to {}", path.display()),
            opts.greppable,
            opts.accessible
        );
    }

    Ok(())
}

/// Prints the opening title of Elysium
#[allow(clippy::items_after_statements, clippy::needless_raw_string_hashes)]
fn print_opening(opts: &Opts) {
    debug!("Printing opening");
    let s = r#"
 _____ _                 _
| ____| |_   _ ___(_)_   _ _ __ ___
|  _| | | | | / __| | | | | '_ ` _ \
| |___| | |_| \__ \ | |_| | | | | | |
|_____|_|\__, |___/_|\__,_|_| |_| |_|
         |___/
"#;
    println!("{}", s.bright_magenta().bold());

    let info = r#"________________________________________
: Host & network reconnaissance         :
: Ports, banners, OS guesses, advisories:
 ----------------------------------------"#;
    println!("{}", info.bright_blue());
    println!(
        "{}\n",
        "Only scan hosts and networks you are authorised to test.".italic()
    );

    let config_path = opts
        .config_path
        .clone()
        .or_else(|| elysium::input::default_config_path().ok());
    if let Some(path) = config_path {
        detail!(
            format!("The config file is expected to be at {path:?}"),
            opts.greppable,
            opts.accessible
        );
    }
}

#[cfg(unix)]
fn adjust_ulimit_size(opts: &Opts) -> u64 {
    use rlimit::Resource;

    if let Some(limit) = opts.ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            detail!(
                format!("Automatically increasing ulimit value to {limit}."),
                opts.greppable,
                opts.accessible
            );
        } else {
            warning!(
                "ERROR. Failed to set ulimit value.",
                opts.greppable,
                opts.accessible
            );
        }
    }

    match Resource::NOFILE.get() {
        Ok((soft, _)) => soft,
        Err(e) => {
            debug!("Could not read the file descriptor limit: {e}");
            DEFAULT_FILE_DESCRIPTORS_LIMIT
        }
    }
}

#[cfg(unix)]
fn infer_batch_size(opts: &Opts, ulimit: u64) -> u16 {
    let mut batch_size: u64 = opts.batch_size.into();

    // Probes, stdio and the resolver all need descriptors.
    let usable = ulimit.saturating_sub(100);
    if usable < batch_size {
        warning!(
            "File limit is lower than the batch size. Consider upping with --ulimit.",
            opts.greppable,
            opts.accessible
        );

        if usable < MIN_BATCH_SIZE {
            info!("Halving batch_size because ulimit is very small");
            batch_size = (ulimit / 2).max(1);
        } else {
            batch_size = usable;
        }
    } else if ulimit > DEFAULT_FILE_DESCRIPTORS_LIMIT && opts.ulimit.is_none() {
        debug!("File limit {ulimit} leaves room for a larger batch size");
    }

    batch_size.try_into().unwrap_or(u16::MAX)
}

#[cfg(windows)]
fn ansi_term_support() -> bool {
    colored::control::set_virtual_terminal(true).is_ok()
}
