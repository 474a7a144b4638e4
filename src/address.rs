//! Turns the user's target string into an address, a subnet or DNS info.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use cidr_utils::cidr::IpCidr;
use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use itertools::Itertools;
use log::debug;
use tokio::{fs, io};

use crate::error::{ScanError, ScanResult};
use crate::session::DnsInfo;

/// Parses `target` as a subnet in `addr/prefix` notation.
///
/// A bare address is not treated as a subnet even though it would parse as
/// a single-host CIDR.
///
/// ```rust
/// # use elysium::address::parse_cidr;
/// assert!(parse_cidr("192.168.0.0/30").is_some());
/// assert!(parse_cidr("192.168.0.1").is_none());
/// ```
pub fn parse_cidr(target: &str) -> Option<IpCidr> {
    if !target.contains('/') {
        return None;
    }
    IpCidr::from_str(target.trim()).ok()
}

/// Resolves a literal address or hostname to one address, preferring IPv4.
///
/// Literals are taken as is. Hostnames go through the system resolver
/// first and then through the backup resolver built from `resolver`.
pub async fn resolve_target(target: &str, resolver: &Option<String>) -> ScanResult<IpAddr> {
    let target = target.trim();
    if let Ok(addr) = IpAddr::from_str(target) {
        return Ok(addr);
    }

    let backup_resolver = get_resolver(resolver).await;
    let addrs = resolve_ips_from_host(target, &backup_resolver).await;
    debug!("{target} resolved to {addrs:?}");

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| ScanError::InvalidTarget(target.to_owned()))
}

/// Uses DNS to get the IPs associated with host.
async fn resolve_ips_from_host(source: &str, backup_resolver: &TokioAsyncResolver) -> Vec<IpAddr> {
    if let Ok(addrs) = tokio::net::lookup_host((source, 80)).await {
        let addrs = addrs.map(|x| x.ip()).unique().collect_vec();
        if !addrs.is_empty() {
            return addrs;
        }
    }

    match backup_resolver.lookup_ip(source).await {
        Ok(addrs) => addrs.iter().collect_vec(),
        Err(e) => {
            debug!("Backup resolver failed for {source}: {e}");
            Vec::new()
        }
    }
}

/// Forward address plus the reverse name of `ip`, when one exists.
///
/// Reverse lookup failure is not an error: the name is simply left out.
pub async fn lookup_dns(ip: IpAddr, resolver: &Option<String>) -> DnsInfo {
    let resolver = get_resolver(resolver).await;
    let reverse_dns = match resolver.reverse_lookup(ip).await {
        Ok(names) => names
            .iter()
            .next()
            .map(|name| name.to_string().trim_end_matches('.').to_owned()),
        Err(e) => {
            debug!("No reverse DNS record for {ip}: {e}");
            None
        }
    };

    DnsInfo { ip, reverse_dns }
}

/// Derive a DNS resolver.
///
/// 1. if the `resolver` parameter has been set:
///     1. assume the parameter is a path and attempt to read IPs.
///     2. parse the input as a comma-separated list of IPs.
/// 2. if `resolver` is not set:
///    1. attempt to derive a resolver from the system config. (e.g.
///       `/etc/resolv.conf` on *nix).
///    2. finally, build a CloudFlare-based resolver (default
///       behaviour).
async fn get_resolver(resolver: &Option<String>) -> TokioAsyncResolver {
    match resolver {
        Some(r) => {
            let mut config = ResolverConfig::new();
            let resolver_ips = match read_resolver_from_file(r).await {
                Ok(ips) => ips,
                Err(_) => r
                    .split(',')
                    .filter_map(|r| IpAddr::from_str(r.trim()).ok())
                    .collect::<Vec<_>>(),
            };
            for ip in resolver_ips {
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(ip, 53),
                    Protocol::Udp,
                ));
            }
            TokioAsyncResolver::tokio(config, ResolverOpts::default())
        }
        None => TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
        }),
    }
}

/// Parses an input file of IPs for use in DNS resolution.
async fn read_resolver_from_file(path: &str) -> io::Result<Vec<IpAddr>> {
    let ips = fs::read_to_string(path)
        .await?
        .lines()
        .filter_map(|line| IpAddr::from_str(line.trim()).ok())
        .collect();

    Ok(ips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[tokio::test]
    async fn literal_addresses_skip_resolution() {
        assert_eq!(
            resolve_target("127.0.0.1", &None).await.unwrap(),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
        assert_eq!(
            resolve_target(" ::1 ", &None).await.unwrap(),
            IpAddr::V6(Ipv6Addr::LOCALHOST)
        );
    }

    #[tokio::test]
    async fn localhost_resolves_to_loopback() {
        let addr = resolve_target("localhost", &None).await.unwrap();

        assert!(addr.is_loopback());
    }

    #[tokio::test]
    async fn unresolvable_target_is_an_error() {
        let result = resolve_target("im_wrong.invalid", &Some("127.0.0.1".to_owned())).await;

        assert!(matches!(result, Err(ScanError::InvalidTarget(t)) if t == "im_wrong.invalid"));
    }

    #[tokio::test]
    async fn out_of_range_octets_are_not_literals() {
        let result = resolve_target("300.10.1.1", &Some("127.0.0.1".to_owned())).await;

        assert!(result.is_err());
    }

    #[test]
    fn subnets_need_a_prefix() {
        let cidr = parse_cidr("192.168.0.0/30").unwrap();

        assert_eq!(cidr.network_length(), 30);
        assert!(parse_cidr("192.168.0.1").is_none());
        assert!(parse_cidr("example.com").is_none());
        assert!(parse_cidr("10.0.0.0/33").is_none());
        assert!(parse_cidr("fd00::/126").is_some());
    }

    #[tokio::test]
    async fn resolver_args_from_file() {
        let path = std::env::temp_dir().join(format!("elysium-resolvers-{}", std::process::id()));
        std::fs::write(&path, "1.1.1.1\n# comment\n  8.8.8.8  \n").unwrap();

        let ips = read_resolver_from_file(path.to_str().unwrap()).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(
            ips,
            [
                IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
                IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))
            ]
        );
    }

    #[tokio::test]
    async fn missing_resolver_file_is_an_error() {
        assert!(read_resolver_from_file("/nonexistent/resolvers.txt").await.is_err());
    }

    #[tokio::test]
    async fn dns_info_keeps_forward_address_without_reverse_record() {
        // TEST-NET-1 has no PTR records and nothing answers DNS on loopback.
        let ip = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        let info = lookup_dns(ip, &Some("127.0.0.1".to_owned())).await;

        assert_eq!(info.ip, ip);
        assert_eq!(info.reverse_dns, None);
    }
}
