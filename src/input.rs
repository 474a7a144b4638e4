//! Provides a means to read, parse and hold configuration options for scans.
use clap::{Parser, ValueEnum};
use serde_derive::Deserialize;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{ScanError, ScanResult};

const LOWEST_PORT_NUMBER: u16 = 1;
const TOP_PORT_NUMBER: u16 = 65535;

/// Ports probed by the `common` keyword.
pub const COMMON_PORTS: [u16; 24] = [
    21, 22, 23, 25, 53, 80, 110, 111, 135, 139, 143, 443, 445, 993, 995, 1433, 1723, 3306, 3389,
    5432, 5900, 6379, 8080, 8443,
];

// https://nmap.org/book/performance-port-selection.html
/// Ports probed by the `top100` keyword.
pub const TOP_100_PORTS: [u16; 100] = [
    7, 9, 13, 21, 22, 23, 25, 26, 37, 53, 79, 80, 81, 88, 106, 110, 111, 113, 119, 135, 139, 143,
    144, 179, 199, 389, 427, 443, 444, 445, 465, 513, 514, 515, 543, 544, 548, 554, 587, 631, 646,
    873, 990, 993, 995, 1025, 1026, 1027, 1028, 1029, 1110, 1433, 1720, 1723, 1755, 1900, 2000,
    2001, 2049, 2121, 2717, 3000, 3128, 3306, 3389, 3986, 4899, 5000, 5009, 5051, 5060, 5101, 5190,
    5357, 5432, 5631, 5666, 5800, 5900, 6000, 6001, 6646, 7070, 8000, 8008, 8009, 8080, 8081, 8443,
    8888, 9100, 9999, 10000, 32768, 49152, 49153, 49154, 49155, 49156, 49157,
];

/// Represents the order in which ports are handed to the workers.
///   - Serial dispatches from the lowest to the highest port.
///   - Random shuffles the dispatch order.
///
/// Results are always reported in ascending order regardless of this setting.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Serial,
    Random,
}

/// File format used when writing a report with `--output`.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Txt,
}

/// An ordered set of distinct ports, always sorted ascending and never empty.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<u16>")]
pub struct PortSpec(Vec<u16>);

impl PortSpec {
    /// Builds the set from arbitrary ports, sorting and removing duplicates.
    pub fn new(ports: impl IntoIterator<Item = u16>) -> Result<Self, String> {
        let mut ports: Vec<u16> = ports.into_iter().collect();
        if let Some(port) = ports.iter().find(|&&p| p < LOWEST_PORT_NUMBER) {
            return Err(format!(
                "Port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
            ));
        }

        if ports.is_empty() {
            return Err(String::from("No valid ports or ranges provided"));
        }

        ports.sort_unstable();
        ports.dedup();

        Ok(Self(ports))
    }

    /// Parses a port specification, reporting failures as a fatal scan error.
    pub fn parse(input: &str) -> ScanResult<Self> {
        parse_port_spec(input).map_err(ScanError::PortRangeError)
    }

    pub fn ports(&self) -> &[u16] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for PortSpec {
    fn default() -> Self {
        Self(COMMON_PORTS.to_vec())
    }
}

impl TryFrom<Vec<u16>> for PortSpec {
    type Error = String;

    fn try_from(ports: Vec<u16>) -> Result<Self, Self::Error> {
        Self::new(ports)
    }
}

impl FromStr for PortSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_port_spec(s)
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", itertools::join(&self.0, ","))
    }
}

/// Parses `all`, `common`, `top100` or a comma-separated list of ports and
/// `start-end` ranges into a [`PortSpec`].
#[cfg(not(tarpaulin_include))]
pub fn parse_port_spec(input: &str) -> Result<PortSpec, String> {
    match input.trim().to_ascii_lowercase().as_str() {
        "all" => return PortSpec::new(LOWEST_PORT_NUMBER..=TOP_PORT_NUMBER),
        "common" => return PortSpec::new(COMMON_PORTS),
        "top100" => return PortSpec::new(TOP_100_PORTS),
        _ => {}
    }

    let mut ports = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('-') {
            let range_ports = parse_port_range(part)?;
            ports.extend(range_ports);
        } else {
            let port = parse_single_port(part)?;
            ports.push(port);
        }
    }

    PortSpec::new(ports)
}

fn parse_port_range(range_str: &str) -> Result<Vec<u16>, String> {
    let range_parts: Vec<&str> = range_str.split('-').collect();
    if range_parts.len() != 2 {
        return Err(format!(
            "Invalid range format '{range_str}'. Expected 'start-end'. Example: 1-1000.",
        ));
    }

    let start: u16 = range_parts[0].trim().parse().map_err(|_| {
        format!(
            "Invalid start port '{}' in range '{range_str}'",
            range_parts[0]
        )
    })?;
    let end: u16 = range_parts[1].trim().parse().map_err(|_| {
        format!(
            "Invalid end port '{}' in range '{range_str}'",
            range_parts[1]
        )
    })?;

    if start > end {
        return Err(format!(
            "Start port {start} is greater than end port {end} in range '{range_str}'",
        ));
    }

    if start < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Ports in range '{range_str}' must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok((start..=end).collect())
}

fn parse_single_port(port_str: &str) -> Result<u16, String> {
    let port: u16 = port_str
        .parse()
        .map_err(|_| format!("Invalid port number '{port_str}'"))?;

    if port < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok(port)
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "elysium",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Network reconnaissance: open ports, banners, OS guesses and advisories.
/// Only scan hosts and networks you are authorised to test.
pub struct Opts {
    /// Target IP, hostname, or network in CIDR notation (e.g. 192.168.1.0/24).
    pub target: String,

    /// Ports to scan: common, top100, all, or a list such as 80,443,1-1000.
    #[arg(short, long, value_parser = parse_port_spec)]
    pub ports: Option<PortSpec>,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Hide the banner
    #[arg(long)]
    pub no_banner: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,

    /// Greppable mode. Only output the open ports.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// A comma-delimited list or file of DNS resolvers.
    #[arg(long)]
    pub resolver: Option<String>,

    /// How many ports are probed at the same time.
    #[arg(short, long, default_value = "200")]
    pub batch_size: u16,

    /// How many hosts are pinged at the same time during a sweep.
    #[arg(long, default_value = "50")]
    pub sweep_batch_size: u16,

    /// The timeout in milliseconds before a port is assumed to be closed.
    #[arg(short, long, default_value = "2000")]
    pub timeout: u32,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// The order in which ports are dispatched to the workers.
    #[arg(long, value_enum, ignore_case = true, default_value = "serial")]
    pub scan_order: ScanOrder,

    /// Ping every host of the target network instead of scanning ports.
    #[arg(long)]
    pub ping: bool,

    /// Guess the remote operating system from the TTL of an echo reply.
    #[arg(long)]
    pub os: bool,

    /// Count hops to the target so the OS guess can correct the TTL.
    #[arg(long)]
    pub traceroute: bool,

    /// Highest TTL tried while counting hops.
    #[arg(long, default_value = "30")]
    pub max_hops: u8,

    /// Include forward and reverse DNS information.
    #[arg(long)]
    pub dns: bool,

    /// Grab service banners from open ports.
    #[arg(long)]
    pub banner: bool,

    /// Attach known advisories to open ports.
    #[arg(long)]
    pub vulns: bool,

    /// Save results to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Report format used with --output.
    #[arg(long, value_enum, ignore_case = true, default_value = "json")]
    pub format: OutputFormat,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Opts::parse()
    }

    /// The ports to scan, falling back to the `common` set.
    pub fn port_spec(&self) -> PortSpec {
        self.ports.clone().unwrap_or_default()
    }

    /// Reads the command line arguments into an Opts struct and merge
    /// values found within the user configuration file.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            greppable,
            accessible,
            batch_size,
            sweep_batch_size,
            timeout,
            max_hops,
            scan_order,
            format
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        // Ports given on the command line win over the configuration file.
        if self.ports.is_none() {
            self.ports.clone_from(&config.ports);
        }

        merge_optional!(resolver, ulimit);
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            target: String::new(),
            ports: None,
            no_config: true,
            no_banner: false,
            config_path: None,
            greppable: true,
            accessible: false,
            resolver: None,
            batch_size: 0,
            sweep_batch_size: 0,
            timeout: 0,
            ulimit: None,
            scan_order: ScanOrder::Serial,
            ping: false,
            os: false,
            traceroute: false,
            max_hops: 30,
            dns: false,
            banner: false,
            vulns: false,
            output: None,
            format: OutputFormat::Json,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[cfg(not(tarpaulin_include))]
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    ports: Option<PortSpec>,
    greppable: Option<bool>,
    accessible: Option<bool>,
    batch_size: Option<u16>,
    sweep_batch_size: Option<u16>,
    timeout: Option<u32>,
    max_hops: Option<u8>,
    ulimit: Option<u64>,
    resolver: Option<String>,
    scan_order: Option<ScanOrder>,
    format: Option<OutputFormat>,
}

#[cfg(not(tarpaulin_include))]
#[allow(clippy::doc_link_with_quotes)]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file yields an empty configuration.
    ///
    /// # Format
    ///
    /// ports = [22, 80, 443]
    /// greppable = true
    /// batch_size = 500
    /// scan_order = "Serial"
    /// format = "txt"
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> ScanResult<Self> {
        let config_path = match custom_config_path {
            Some(path) => path,
            None => default_config_path()?,
        };
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)?;
        toml::from_str(&content).map_err(|e| {
            ScanError::ConfigError(format!("{} in {}", e.message(), config_path.display()))
        })
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> ScanResult<PathBuf> {
    let Some(mut config_path) = dirs::home_dir() else {
        return Err(ScanError::ConfigError(String::from(
            "Could not infer config file path.",
        )));
    };
    config_path.push(".elysium.toml");
    Ok(config_path)
}
