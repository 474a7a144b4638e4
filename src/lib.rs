//! This crate exposes the internal functionality of the Elysium network
//! reconnaissance tool.
//!
//! Given a target address or subnet, Elysium discovers live hosts, open TCP
//! ports, service banners, a heuristic guess of the remote operating system
//! and known-issue advisories for the services it finds.
//!
//! ## Architecture Overview
//!
//! The port scheduler is [`Scanner`](crate::scanner::Scanner), which walks
//! the ports of a [`PortStrategy`](crate::port_strategy::PortStrategy) through
//! a bounded [`WorkerPool`](crate::scanner::WorkerPool). The same pool drives
//! the [`HostSweep`](crate::scanner::sweep::HostSweep) of a subnet.
//!
//! 1. **Input Processing**: the target and the port specification are parsed
//!    and validated
//! 2. **Port Strategy**: decides the order in which ports are dispatched
//! 3. **Probing**: concurrent TCP connects, optionally followed by a banner
//!    read and an advisory lookup
//! 4. **OS Guess**: the TTL of an echo reply, corrected by the
//!    [hop count](crate::traceroute), is matched against a
//!    [`TtlTable`](crate::os_detect::TtlTable)
//! 5. **Aggregation**: everything ends up in one
//!    [`ScanSession`](crate::session::ScanSession), which the
//!    [`report`] module renders as JSON or text
//!
//! ## Basic Usage Example
//!
//! ```rust
//! use std::{net::IpAddr, time::Duration};
//!
//! use elysium::input::{PortSpec, ScanOrder};
//! use elysium::port_strategy::PortStrategy;
//! use elysium::scanner::Scanner;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let target = "127.0.0.1".parse::<IpAddr>()?;
//!     let ports = PortSpec::parse("1-1000")?;
//!     let strategy = PortStrategy::pick(ports, ScanOrder::Random);
//!
//!     let scanner = Scanner::new(
//!         target,
//!         10,                         // Batch size (concurrent connections)
//!         Duration::from_millis(100), // Connection timeout
//!         strategy,
//!         false,                      // Capture banners
//!         false,                      // Attach advisories
//!     );
//!
//!     let runtime = tokio::runtime::Runtime::new()?;
//!     let open_ports = runtime.block_on(scanner.run());
//!
//!     println!("Discovered {} open ports:", open_ports.len());
//!     for result in &open_ports {
//!         println!("  {}/tcp {}", result.port, result.service);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Only a bad target, a bad port specification, a broken configuration
//! file or a failed report write are errors
//! ([`ScanError`](crate::error::ScanError)). Everything that goes wrong
//! while probing is recorded as a closed port, an unknown OS or an
//! unavailable hop count.
#![allow(clippy::needless_doctest_main)]

pub mod tui;

pub mod error;

pub mod input;

pub mod scanner;

pub mod port_strategy;

pub mod address;

pub mod services;

pub mod vulns;

pub mod ping;

pub mod traceroute;

pub mod os_detect;

pub mod session;

pub mod report;
