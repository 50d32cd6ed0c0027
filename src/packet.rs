use chrono::{DateTime, Utc};
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::icmpv6::Icmpv6Packet;
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::vlan::VlanPacket;
use pnet::packet::Packet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::error::FrameError;

/// Transport classification of a captured packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
            Protocol::Other => "OTHER",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized representation of one captured frame.
///
/// Constructed only through the per-protocol constructors, so TCP/UDP
/// records always carry both ports and ICMP/OTHER records never do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    timestamp: DateTime<Utc>,
    protocol: Protocol,
    src: IpAddr,
    dst: IpAddr,
    ports: Option<(u16, u16)>,
    length: usize,
    summary: String,
}

impl PacketRecord {
    pub fn tcp(
        timestamp: DateTime<Utc>,
        src: SocketAddr,
        dst: SocketAddr,
        length: usize,
    ) -> Self {
        Self::with_ports(Protocol::Tcp, timestamp, src, dst, length)
    }

    pub fn udp(
        timestamp: DateTime<Utc>,
        src: SocketAddr,
        dst: SocketAddr,
        length: usize,
    ) -> Self {
        Self::with_ports(Protocol::Udp, timestamp, src, dst, length)
    }

    pub fn icmp(
        timestamp: DateTime<Utc>,
        src: IpAddr,
        dst: IpAddr,
        icmp_type: u8,
        length: usize,
    ) -> Self {
        Self {
            timestamp,
            protocol: Protocol::Icmp,
            src,
            dst,
            ports: None,
            length,
            summary: format!("ICMP: {} -> {} Type: {}", src, dst, icmp_type),
        }
    }

    pub fn other(timestamp: DateTime<Utc>, src: IpAddr, dst: IpAddr, length: usize) -> Self {
        Self {
            timestamp,
            protocol: Protocol::Other,
            src,
            dst,
            ports: None,
            length,
            summary: format!("IP: {} -> {}", src, dst),
        }
    }

    fn with_ports(
        protocol: Protocol,
        timestamp: DateTime<Utc>,
        src: SocketAddr,
        dst: SocketAddr,
        length: usize,
    ) -> Self {
        Self {
            timestamp,
            protocol,
            src: src.ip(),
            dst: dst.ip(),
            ports: Some((src.port(), dst.port())),
            length,
            summary: format!("{}: {} -> {}", protocol, src, dst),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn src_addr(&self) -> IpAddr {
        self.src
    }

    pub fn dst_addr(&self) -> IpAddr {
        self.dst
    }

    pub fn src_port(&self) -> Option<u16> {
        self.ports.map(|(src, _)| src)
    }

    pub fn dst_port(&self) -> Option<u16> {
        self.ports.map(|(_, dst)| dst)
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }
}

/// Link-layer framing of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    /// BSD loopback: 4-byte address family, then the IP packet
    Null,
    /// Bare IPv4/IPv6 packet
    RawIp,
    /// Linux cooked capture v1 (16-byte header)
    LinuxSll,
    /// Linux cooked capture v2 (20-byte header)
    LinuxSll2,
}

impl LinkType {
    /// Map a libpcap DLT value onto a supported framing
    pub fn from_dlt(dlt: i32) -> Result<Self, FrameError> {
        match dlt {
            1 => Ok(LinkType::Ethernet),
            0 | 108 => Ok(LinkType::Null),
            12 | 14 | 101 | 228 | 229 => Ok(LinkType::RawIp),
            113 => Ok(LinkType::LinuxSll),
            276 => Ok(LinkType::LinuxSll2),
            other => Err(FrameError::UnsupportedLink(other)),
        }
    }
}

/// Raw capture unit as handed over by a capture session
#[derive(Debug, Clone)]
pub struct Frame {
    pub link: LinkType,
    pub timestamp: DateTime<Utc>,
    /// Length on the wire; may exceed `data.len()` when snaplen truncated it
    pub wire_len: usize,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(link: LinkType, timestamp: DateTime<Utc>, data: Vec<u8>) -> Self {
        Self {
            link,
            timestamp,
            wire_len: data.len(),
            data,
        }
    }
}

/// Classify a frame into a packet record.
///
/// Frames without an IPv4/IPv6 layer yield `Ok(None)`; frames whose
/// headers are cut short yield an error.
pub fn parse_frame(frame: &Frame) -> Result<Option<PacketRecord>, FrameError> {
    let data = frame.data.as_slice();
    let ip = match frame.link {
        LinkType::Ethernet => {
            let ethernet = EthernetPacket::new(data).ok_or(FrameError::Truncated {
                layer: "ethernet",
                len: data.len(),
            })?;
            let payload = &data[EthernetPacket::minimum_packet_size()..];
            match ethertype_payload(ethernet.get_ethertype(), payload)? {
                Some(ip) => ip,
                None => return Ok(None),
            }
        }
        LinkType::Null => {
            if data.len() < 4 {
                return Err(FrameError::Truncated { layer: "loopback", len: data.len() });
            }
            IpPayload::sniff(&data[4..])
        }
        LinkType::RawIp => IpPayload::sniff(data),
        LinkType::LinuxSll => {
            if data.len() < 16 {
                return Err(FrameError::Truncated { layer: "sll", len: data.len() });
            }
            let ethertype = EtherType(u16::from_be_bytes([data[14], data[15]]));
            match ethertype_payload(ethertype, &data[16..])? {
                Some(ip) => ip,
                None => return Ok(None),
            }
        }
        LinkType::LinuxSll2 => {
            if data.len() < 20 {
                return Err(FrameError::Truncated { layer: "sll2", len: data.len() });
            }
            let ethertype = EtherType(u16::from_be_bytes([data[0], data[1]]));
            match ethertype_payload(ethertype, &data[20..])? {
                Some(ip) => ip,
                None => return Ok(None),
            }
        }
    };

    match ip {
        IpPayload::V4(bytes) => parse_ipv4(frame, bytes).map(Some),
        IpPayload::V6(bytes) => parse_ipv6(frame, bytes).map(Some),
        IpPayload::None => Ok(None),
    }
}

enum IpPayload<'a> {
    V4(&'a [u8]),
    V6(&'a [u8]),
    None,
}

impl<'a> IpPayload<'a> {
    /// Pick the IP version from the first nibble
    fn sniff(bytes: &'a [u8]) -> Self {
        match bytes.first().map(|b| b >> 4) {
            Some(4) => IpPayload::V4(bytes),
            Some(6) => IpPayload::V6(bytes),
            _ => IpPayload::None,
        }
    }
}

fn ethertype_payload(ethertype: EtherType, payload: &[u8]) -> Result<Option<IpPayload<'_>>, FrameError> {
    match ethertype {
        EtherTypes::Ipv4 => Ok(Some(IpPayload::V4(payload))),
        EtherTypes::Ipv6 => Ok(Some(IpPayload::V6(payload))),
        EtherTypes::Vlan => {
            let vlan = VlanPacket::new(payload).ok_or(FrameError::Truncated {
                layer: "vlan",
                len: payload.len(),
            })?;
            let inner = vlan.get_ethertype();
            // A single 802.1Q tag; stacked tags are not unwrapped
            match inner {
                EtherTypes::Ipv4 | EtherTypes::Ipv6 => {
                    let offset = payload.len() - vlan.payload().len();
                    ethertype_payload(inner, &payload[offset..])
                }
                _ => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

fn parse_ipv4(frame: &Frame, bytes: &[u8]) -> Result<PacketRecord, FrameError> {
    let ipv4 = Ipv4Packet::new(bytes).ok_or(FrameError::Truncated {
        layer: "ipv4",
        len: bytes.len(),
    })?;
    let header_len = ipv4.get_header_length() as usize * 4;
    if header_len < Ipv4Packet::minimum_packet_size() || header_len > bytes.len() {
        return Err(FrameError::Truncated { layer: "ipv4", len: bytes.len() });
    }

    let src = IpAddr::V4(ipv4.get_source());
    let dst = IpAddr::V4(ipv4.get_destination());
    let end = (ipv4.get_total_length() as usize).clamp(header_len, bytes.len());
    // Some NICs hand over frames with a zero total length (TSO); fall back to the capture
    let end = if ipv4.get_total_length() == 0 { bytes.len() } else { end };
    // Later fragments carry no transport header
    if ipv4.get_fragment_offset() != 0 {
        return Ok(PacketRecord::other(frame.timestamp, src, dst, frame.wire_len));
    }
    transport(frame, ipv4.get_next_level_protocol(), src, dst, &bytes[header_len..end])
}

fn parse_ipv6(frame: &Frame, bytes: &[u8]) -> Result<PacketRecord, FrameError> {
    let ipv6 = Ipv6Packet::new(bytes).ok_or(FrameError::Truncated {
        layer: "ipv6",
        len: bytes.len(),
    })?;
    let src = IpAddr::V6(ipv6.get_source());
    let dst = IpAddr::V6(ipv6.get_destination());
    let header_len = Ipv6Packet::minimum_packet_size();
    transport(frame, ipv6.get_next_header(), src, dst, &bytes[header_len..])
}

fn transport(
    frame: &Frame,
    next: IpNextHeaderProtocol,
    src: IpAddr,
    dst: IpAddr,
    payload: &[u8],
) -> Result<PacketRecord, FrameError> {
    let ts = frame.timestamp;
    let len = frame.wire_len;
    match next {
        IpNextHeaderProtocols::Tcp => {
            let tcp = TcpPacket::new(payload).ok_or(FrameError::Truncated {
                layer: "tcp",
                len: payload.len(),
            })?;
            Ok(PacketRecord::tcp(
                ts,
                SocketAddr::new(src, tcp.get_source()),
                SocketAddr::new(dst, tcp.get_destination()),
                len,
            ))
        }
        IpNextHeaderProtocols::Udp => {
            let udp = UdpPacket::new(payload).ok_or(FrameError::Truncated {
                layer: "udp",
                len: payload.len(),
            })?;
            Ok(PacketRecord::udp(
                ts,
                SocketAddr::new(src, udp.get_source()),
                SocketAddr::new(dst, udp.get_destination()),
                len,
            ))
        }
        IpNextHeaderProtocols::Icmp => {
            let icmp = IcmpPacket::new(payload).ok_or(FrameError::Truncated {
                layer: "icmp",
                len: payload.len(),
            })?;
            Ok(PacketRecord::icmp(ts, src, dst, icmp.get_icmp_type().0, len))
        }
        IpNextHeaderProtocols::Icmpv6 => {
            let icmp = Icmpv6Packet::new(payload).ok_or(FrameError::Truncated {
                layer: "icmpv6",
                len: payload.len(),
            })?;
            Ok(PacketRecord::icmp(ts, src, dst, icmp.get_icmpv6_type().0, len))
        }
        _ => Ok(PacketRecord::other(ts, src, dst, len)),
    }
}
