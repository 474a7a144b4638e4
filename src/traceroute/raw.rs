//! Incremental-TTL probing with raw ICMP receive.
use log::debug;
use pnet::packet::icmp::{IcmpPacket, IcmpTypes};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::{HopError, HopMethod, HopProbe};

/// Classic traceroute base port. The datagram for TTL `n` goes to
/// `BASE_PORT + n`, so a late answer cannot be mistaken for the next hop.
pub const BASE_PORT: u16 = 33434;

/// Sends an empty UDP datagram per TTL and listens for the ICMP
/// time-exceeded or port-unreachable answer. IPv4 only.
#[derive(Debug)]
pub struct RawHopProbe {
    hop_timeout: Duration,
}

/// Who answered one TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HopReply {
    Router(Ipv4Addr),
    Target,
}

impl RawHopProbe {
    /// Opens and closes a raw ICMP socket to check the privilege up front.
    pub fn open(hop_timeout: Duration) -> Result<Self, HopError> {
        drop(icmp_socket()?);
        Ok(Self { hop_timeout })
    }

    /// Waits for an ICMP error that quotes a datagram sent to `dest:port`.
    fn await_reply(&self, socket: &Socket, dest: Ipv4Addr, port: u16) -> io::Result<Option<HopReply>> {
        let deadline = Instant::now() + self.hop_timeout;
        let mut buf = [0u8; 512];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            socket.set_read_timeout(Some(remaining))?;

            let size = match (&*socket).read(&mut buf) {
                Ok(size) => size,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            if let Some(reply) = parse_reply(&buf[..size], dest, port) {
                return Ok(Some(reply));
            }
        }
    }
}

impl HopProbe for RawHopProbe {
    fn method(&self) -> HopMethod {
        HopMethod::Raw
    }

    fn count_hops(
        &self,
        target: IpAddr,
        max_hops: u8,
        cancel: &CancellationToken,
    ) -> Result<Option<u8>, HopError> {
        let IpAddr::V4(dest) = target else {
            return Err(HopError::Unsupported(target));
        };
        let receiver = icmp_socket()?;

        let hops = walk_ttls(max_hops, cancel, |ttl| {
            let port = BASE_PORT + u16::from(ttl);
            let sender = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
            sender.set_ttl(u32::from(ttl))?;
            sender.send_to(&[], &SockAddr::from(SocketAddr::new(target, port)))?;
            self.await_reply(&receiver, dest, port)
        })?;

        debug!("Hop walk towards {dest} ended with {hops:?}");
        Ok(hops)
    }
}

/// Asks `reply_for` about each TTL from 1 to `max_hops`.
///
/// Stops at the TTL the target itself answers. Otherwise the highest TTL
/// that got any answer is the estimate, or `None` when nothing answered. A
/// failed TTL counts as unanswered. The token is checked before every TTL.
fn walk_ttls(
    max_hops: u8,
    cancel: &CancellationToken,
    mut reply_for: impl FnMut(u8) -> io::Result<Option<HopReply>>,
) -> Result<Option<u8>, HopError> {
    let mut last_responding = None;

    for ttl in 1..=max_hops {
        if cancel.is_cancelled() {
            debug!("Hop walk interrupted before TTL {ttl}");
            return Err(HopError::Cancelled);
        }

        match reply_for(ttl) {
            Ok(Some(HopReply::Target)) => {
                debug!("Target reached at hop {ttl}");
                return Ok(Some(ttl));
            }
            Ok(Some(HopReply::Router(router))) => {
                debug!("Hop {ttl}: {router}");
                last_responding = Some(ttl);
            }
            Ok(None) => debug!("Hop {ttl}: no answer"),
            Err(e) => debug!("Hop {ttl}: {e}"),
        }
    }

    Ok(last_responding)
}

fn icmp_socket() -> Result<Socket, HopError> {
    Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            HopError::PermissionDenied("raw ICMP socket".to_string())
        } else {
            HopError::Io(e)
        }
    })
}

/// Interprets one packet read from the raw ICMP socket.
///
/// Only time-exceeded and destination-unreachable messages quoting a UDP
/// datagram sent to `dest:port` count. Anything else on the socket is
/// ignored.
fn parse_reply(packet: &[u8], dest: Ipv4Addr, port: u16) -> Option<HopReply> {
    let ip = Ipv4Packet::new(packet)?;
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
        return None;
    }
    let header_len = usize::from(ip.get_header_length()) * 4;
    let icmp = IcmpPacket::new(packet.get(header_len..)?)?;

    let icmp_type = icmp.get_icmp_type();
    if icmp_type != IcmpTypes::TimeExceeded && icmp_type != IcmpTypes::DestinationUnreachable {
        return None;
    }

    // Four unused bytes precede the quoted IP header.
    let quoted = Ipv4Packet::new(icmp.payload().get(4..)?)?;
    if quoted.get_destination() != dest
        || quoted.get_next_level_protocol() != IpNextHeaderProtocols::Udp
    {
        return None;
    }
    let quoted_len = usize::from(quoted.get_header_length()) * 4;
    let datagram = UdpPacket::new(quoted.packet().get(quoted_len..)?)?;
    if datagram.get_destination() != port {
        return None;
    }

    let source = ip.get_source();
    if source == dest {
        Some(HopReply::Target)
    } else {
        Some(HopReply::Router(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_header(protocol: u8, source: Ipv4Addr, dest: Ipv4Addr) -> Vec<u8> {
        let mut header = vec![0x45, 0, 0, 0, 0, 0, 0, 0, 64, protocol, 0, 0];
        header.extend_from_slice(&source.octets());
        header.extend_from_slice(&dest.octets());
        header
    }

    fn icmp_error(icmp_type: u8, from: Ipv4Addr, probed: Ipv4Addr, port: u16) -> Vec<u8> {
        let scanner = Ipv4Addr::new(10, 0, 0, 2);
        let mut packet = ipv4_header(1, from, scanner);
        packet.extend_from_slice(&[icmp_type, 0, 0, 0, 0, 0, 0, 0]);
        packet.extend(ipv4_header(17, scanner, probed));
        packet.extend_from_slice(&[0xc3, 0x50]);
        packet.extend_from_slice(&port.to_be_bytes());
        packet.extend_from_slice(&[0, 8, 0, 0]);
        packet
    }

    /// Answers TTL `n` with `script[n - 1]` and remembers every TTL asked.
    fn scripted(
        script: Vec<io::Result<Option<HopReply>>>,
        asked: &mut Vec<u8>,
    ) -> impl FnMut(u8) -> io::Result<Option<HopReply>> + '_ {
        let mut script = script.into_iter();
        move |ttl| {
            asked.push(ttl);
            script.next().unwrap_or(Ok(None))
        }
    }

    fn router(last: u8) -> io::Result<Option<HopReply>> {
        Ok(Some(HopReply::Router(Ipv4Addr::new(10, 0, 0, last))))
    }

    #[test]
    fn time_exceeded_from_router() {
        let dest = Ipv4Addr::new(198, 51, 100, 7);
        let router = Ipv4Addr::new(10, 0, 0, 1);

        assert_eq!(
            parse_reply(&icmp_error(11, router, dest, BASE_PORT + 3), dest, BASE_PORT + 3),
            Some(HopReply::Router(router))
        );
    }

    #[test]
    fn port_unreachable_from_target() {
        let dest = Ipv4Addr::new(198, 51, 100, 7);

        assert_eq!(
            parse_reply(&icmp_error(3, dest, dest, BASE_PORT + 9), dest, BASE_PORT + 9),
            Some(HopReply::Target)
        );
    }

    #[test]
    fn unrelated_icmp_is_ignored() {
        let dest = Ipv4Addr::new(198, 51, 100, 7);
        let other = Ipv4Addr::new(203, 0, 113, 1);

        // Echo reply.
        assert_eq!(parse_reply(&icmp_error(0, dest, dest, BASE_PORT + 1), dest, BASE_PORT + 1), None);
        // Error about a datagram sent somewhere else.
        assert_eq!(
            parse_reply(
                &icmp_error(11, Ipv4Addr::new(10, 0, 0, 1), other, BASE_PORT + 1),
                dest,
                BASE_PORT + 1
            ),
            None
        );
        // Truncated packet.
        assert_eq!(parse_reply(&[0x45, 0, 0], dest, BASE_PORT + 1), None);
    }

    #[test]
    fn late_answer_for_an_earlier_ttl_is_ignored() {
        let dest = Ipv4Addr::new(198, 51, 100, 7);
        let router = Ipv4Addr::new(10, 0, 0, 1);
        let late = icmp_error(11, router, dest, BASE_PORT + 4);

        assert_eq!(parse_reply(&late, dest, BASE_PORT + 5), None);
        assert_eq!(parse_reply(&late, dest, BASE_PORT + 4), Some(HopReply::Router(router)));
    }

    #[test]
    fn walk_stops_at_the_target() {
        let mut asked = Vec::new();
        let replies = vec![router(1), router(2), Ok(Some(HopReply::Target)), router(4)];

        let hops = walk_ttls(30, &CancellationToken::new(), scripted(replies, &mut asked));

        assert_eq!(hops.unwrap(), Some(3));
        assert_eq!(asked, [1, 2, 3]);
    }

    #[test]
    fn walk_reports_the_highest_answering_ttl() {
        let mut asked = Vec::new();
        let replies = vec![
            router(1),
            Err(io::Error::other("send failed")),
            router(3),
            Ok(None),
        ];

        let hops = walk_ttls(6, &CancellationToken::new(), scripted(replies, &mut asked));

        assert_eq!(hops.unwrap(), Some(3));
        assert_eq!(asked, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn silent_walk_has_no_estimate() {
        let mut asked = Vec::new();

        let hops = walk_ttls(5, &CancellationToken::new(), scripted(Vec::new(), &mut asked));

        assert_eq!(hops.unwrap(), None);
        assert_eq!(asked.len(), 5);
    }

    #[test]
    fn cancelled_walk_sends_nothing_more() {
        let cancel = CancellationToken::new();
        let mut asked = Vec::new();

        let hops = walk_ttls(30, &cancel, |ttl| {
            asked.push(ttl);
            if ttl == 2 {
                cancel.cancel();
            }
            router(ttl)
        });

        assert!(matches!(hops, Err(HopError::Cancelled)));
        assert_eq!(asked, [1, 2]);
    }

    #[test]
    fn cancelled_counter_returns_without_waiting() {
        use crate::traceroute::{HopCounter, HopTrace, TracerouteCommand, DEFAULT_MAX_HOPS};
        use std::sync::Arc;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let raw = RawHopProbe {
            hop_timeout: Duration::from_secs(2),
        };
        let counter = HopCounter::select(
            Ok(Arc::new(raw) as Arc<dyn HopProbe>),
            Arc::new(TracerouteCommand::with_program("elysium-no-such-traceroute")),
            DEFAULT_MAX_HOPS,
        )
        .with_cancellation(cancel);

        let started = Instant::now();
        assert_eq!(counter.trace("192.0.2.10".parse().unwrap()), HopTrace::unavailable());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn ipv6_target_is_unsupported() {
        let probe = RawHopProbe {
            hop_timeout: Duration::from_millis(10),
        };

        assert!(matches!(
            probe.count_hops("::1".parse().unwrap(), 3, &CancellationToken::new()),
            Err(HopError::Unsupported(_))
        ));
    }
}
