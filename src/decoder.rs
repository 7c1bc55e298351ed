//! Frame decoder - turns raw link-layer frames into IP records.
//!
//! Decoding is best-effort per frame: anything that is not IPv4 (or IPv6,
//! when enabled), or whose IP header is malformed, is reported as absent
//! (`None`) and never aborts the analysis.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use etherparse::{
    Ethernet2HeaderSlice, Ipv4HeaderSlice, Ipv6HeaderSlice, LinuxSllHeaderSlice,
    LinuxSllProtocolType, SingleVlanHeaderSlice,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::capture::{LinkType, RawFrame};

/// Well-known EtherTypes.
pub mod ethertype {
    pub const IPV4: u16 = 0x0800;
    pub const IPV6: u16 = 0x86DD;
    pub const VLAN: u16 = 0x8100;
    pub const QINQ: u16 = 0x88A8;
    pub const VLAN_DOUBLE: u16 = 0x9100;
}

/// Address families used by BSD null/loopback encapsulation.
mod bsd_af {
    pub const INET: u32 = 2;
    pub const INET6_BSD: u32 = 24;
    pub const INET6_FREEBSD: u32 = 28;
    pub const INET6_DARWIN: u32 = 30;
}

/// Maximum number of stacked 802.1Q tags we walk through.
const MAX_VLAN_TAGS: usize = 2;

/// etherparse has no SLL2 header type; its protocol field leads the header.
const LINUX_SLL2_HEADER_LEN: usize = 20;

/// How the byte size of a frame is accounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteAccounting {
    /// Bytes actually present in the capture record.
    #[default]
    Captured,
    /// Original frame length on the wire, as declared by the record header.
    Wire,
}

impl FromStr for ByteAccounting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "captured" => Ok(Self::Captured),
            "wire" => Ok(Self::Wire),
            _ => Err(format!("Unknown byte accounting: {}", s)),
        }
    }
}

impl fmt::Display for ByteAccounting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Captured => write!(f, "captured"),
            Self::Wire => write!(f, "wire"),
        }
    }
}

/// A distinct source -> destination address pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FlowKey {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
}

impl FlowKey {
    pub fn new(src_ip: IpAddr, dst_ip: IpAddr) -> Self {
        Self { src_ip, dst_ip }
    }

    /// Reports list flows by the text of their addresses, source first, so
    /// `10.0.0.10` sorts before `10.0.0.2`.
    pub fn sort_key(&self) -> (String, String) {
        (self.src_ip.to_string(), self.dst_ip.to_string())
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src_ip, self.dst_ip)
    }
}

/// IP-layer summary of one captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IpRecord {
    /// Capture timestamp, seconds since the Unix epoch.
    pub timestamp: f64,
    /// Frame size in bytes, link-layer header included.
    pub total_length: u32,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
}

impl IpRecord {
    pub fn new(timestamp: f64, total_length: u32, src_ip: IpAddr, dst_ip: IpAddr) -> Self {
        Self {
            timestamp,
            total_length,
            src_ip,
            dst_ip,
        }
    }

    pub fn flow_key(&self) -> FlowKey {
        FlowKey::new(self.src_ip, self.dst_ip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetworkLayer {
    Ipv4,
    Ipv6,
}

/// Extracts `IpRecord`s from raw frames.
///
/// Only IPv4 counts as IP unless [`FrameDecoder::with_ipv6`] opts in.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder {
    accounting: ByteAccounting,
    include_ipv6: bool,
}

impl FrameDecoder {
    pub fn new(accounting: ByteAccounting) -> Self {
        Self {
            accounting,
            include_ipv6: false,
        }
    }

    /// Also count IPv6 frames as IP records.
    pub fn with_ipv6(mut self, include: bool) -> Self {
        self.include_ipv6 = include;
        self
    }

    pub fn accounting(&self) -> ByteAccounting {
        self.accounting
    }

    pub fn includes_ipv6(&self) -> bool {
        self.include_ipv6
    }

    /// Decodes a frame; returns `None` when it does not carry a well-formed
    /// IP header.
    pub fn decode(&self, frame: &RawFrame) -> Option<IpRecord> {
        let Some((layer, payload)) = network_payload(frame.link_type, &frame.data) else {
            trace!("Frame {}: no IP payload", frame.frame_number);
            return None;
        };

        if layer == NetworkLayer::Ipv6 && !self.include_ipv6 {
            trace!("Frame {}: IPv6 not counted", frame.frame_number);
            return None;
        }

        let Some((src_ip, dst_ip)) = ip_addresses(layer, payload) else {
            trace!("Frame {}: malformed {:?} header", frame.frame_number, layer);
            return None;
        };

        let total_length = match self.accounting {
            ByteAccounting::Captured => frame.data.len() as u32,
            ByteAccounting::Wire => frame.original_len,
        };

        Some(IpRecord::new(frame.timestamp(), total_length, src_ip, dst_ip))
    }
}

/// Locates the network-layer payload for the given link type.
fn network_payload(link_type: LinkType, data: &[u8]) -> Option<(NetworkLayer, &[u8])> {
    match link_type {
        LinkType::ETHERNET => {
            let eth = Ethernet2HeaderSlice::from_slice(data).ok()?;
            let rest = &data[eth.slice().len()..];
            from_ether_type(eth.ether_type().0, rest)
        }
        LinkType::NULL => {
            let header = data.get(..4)?;
            let le = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            // Family is in the capturing host's byte order; a real value fits in 16 bits
            let family = if le & 0xFFFF_0000 != 0 { le.swap_bytes() } else { le };
            from_address_family(family, &data[4..])
        }
        LinkType::LOOP => {
            let header = data.get(..4)?;
            let family = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
            from_address_family(family, &data[4..])
        }
        LinkType::RAW | LinkType::RAW_OPENBSD | LinkType::RAW_BSDOS | LinkType::IPV4 | LinkType::IPV6 => {
            match data.first()? >> 4 {
                4 => Some((NetworkLayer::Ipv4, data)),
                6 => Some((NetworkLayer::Ipv6, data)),
                _ => None,
            }
        }
        LinkType::LINUX_SLL => {
            let sll = LinuxSllHeaderSlice::from_slice(data).ok()?;
            let rest = &data[sll.slice().len()..];
            match sll.protocol_type() {
                LinuxSllProtocolType::EtherType(ether_type) => from_ether_type(ether_type.0, rest),
                _ => None,
            }
        }
        LinkType::LINUX_SLL2 => {
            let header = data.get(..LINUX_SLL2_HEADER_LEN)?;
            let protocol = u16::from_be_bytes([header[0], header[1]]);
            from_ether_type(protocol, &data[LINUX_SLL2_HEADER_LEN..])
        }
        _ => None,
    }
}

/// Follows an EtherType (through VLAN tags) to an IP payload.
fn from_ether_type(mut ether_type: u16, mut rest: &[u8]) -> Option<(NetworkLayer, &[u8])> {
    for _ in 0..MAX_VLAN_TAGS {
        if !matches!(
            ether_type,
            ethertype::VLAN | ethertype::QINQ | ethertype::VLAN_DOUBLE
        ) {
            break;
        }
        let vlan = SingleVlanHeaderSlice::from_slice(rest).ok()?;
        ether_type = vlan.ether_type().0;
        rest = &rest[vlan.slice().len()..];
    }

    match ether_type {
        ethertype::IPV4 => Some((NetworkLayer::Ipv4, rest)),
        ethertype::IPV6 => Some((NetworkLayer::Ipv6, rest)),
        _ => None,
    }
}

fn from_address_family(family: u32, rest: &[u8]) -> Option<(NetworkLayer, &[u8])> {
    match family {
        bsd_af::INET => Some((NetworkLayer::Ipv4, rest)),
        bsd_af::INET6_BSD | bsd_af::INET6_FREEBSD | bsd_af::INET6_DARWIN => {
            Some((NetworkLayer::Ipv6, rest))
        }
        _ => None,
    }
}

/// Validates the IP header and extracts source/destination addresses.
fn ip_addresses(layer: NetworkLayer, payload: &[u8]) -> Option<(IpAddr, IpAddr)> {
    match layer {
        NetworkLayer::Ipv4 => {
            let header = Ipv4HeaderSlice::from_slice(payload).ok()?;
            Some((
                IpAddr::V4(header.source_addr()),
                IpAddr::V4(header.destination_addr()),
            ))
        }
        NetworkLayer::Ipv6 => {
            let header = Ipv6HeaderSlice::from_slice(payload).ok()?;
            Some((
                IpAddr::V6(header.source_addr()),
                IpAddr::V6(header.destination_addr()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_header(src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let mut header = vec![
            0x45, 0x00, // Version 4, IHL 5
            0x00, 0x1c, // Total length: 28
            0x00, 0x01, 0x00, 0x00, // Identification, flags
            0x40, 0x01, // TTL 64, protocol ICMP
            0x00, 0x00, // Checksum
        ];
        header.extend_from_slice(&src);
        header.extend_from_slice(&dst);
        // ICMP echo request
        header.extend_from_slice(&[0x08, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01]);
        header
    }

    fn ipv6_header() -> Vec<u8> {
        let mut header = vec![0x60, 0x00, 0x00, 0x00, 0x00, 0x00, 59, 64];
        header.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8]);
        header.extend_from_slice(&[0; 11]);
        header.push(0x01);
        header.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8]);
        header.extend_from_slice(&[0; 11]);
        header.push(0x02);
        header
    }

    fn ethernet(ether_type: u16, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // dst MAC
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // src MAC
        ];
        frame.extend_from_slice(&ether_type.to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    fn frame(link_type: LinkType, data: Vec<u8>) -> RawFrame {
        RawFrame {
            frame_number: 1,
            ts_sec: 10,
            ts_frac: 250_000,
            ts_units: 1_000_000,
            captured_len: data.len() as u32,
            original_len: data.len() as u32 + 100,
            link_type,
            data,
        }
    }

    #[test]
    fn test_decode_ethernet_ipv4() {
        let data = ethernet(ethertype::IPV4, &ipv4_header([192, 168, 1, 10], [10, 0, 0, 1]));
        let record = FrameDecoder::default()
            .decode(&frame(LinkType::ETHERNET, data))
            .unwrap();

        assert_eq!(record.src_ip, "192.168.1.10".parse::<IpAddr>().unwrap());
        assert_eq!(record.dst_ip, "10.0.0.1".parse::<IpAddr>().unwrap());
        // Link-layer header included
        assert_eq!(record.total_length, 14 + 28);
        assert!((record.timestamp - 10.25).abs() < 1e-12);
    }

    #[test]
    fn test_decode_ethernet_ipv6_when_enabled() {
        let data = ethernet(ethertype::IPV6, &ipv6_header());
        let record = FrameDecoder::default()
            .with_ipv6(true)
            .decode(&frame(LinkType::ETHERNET, data))
            .unwrap();

        assert_eq!(record.src_ip, "2001:db8::1".parse::<IpAddr>().unwrap());
        assert_eq!(record.dst_ip, "2001:db8::2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_ipv6_is_absent_by_default() {
        let decoder = FrameDecoder::default();
        assert!(!decoder.includes_ipv6());

        let data = ethernet(ethertype::IPV6, &ipv6_header());
        assert!(decoder.decode(&frame(LinkType::ETHERNET, data)).is_none());

        assert!(decoder.decode(&frame(LinkType::RAW, ipv6_header())).is_none());
    }

    #[test]
    fn test_decode_vlan_tagged() {
        let mut tagged = vec![0x00, 0x64]; // VLAN 100
        tagged.extend_from_slice(&ethertype::IPV4.to_be_bytes());
        tagged.extend_from_slice(&ipv4_header([1, 1, 1, 1], [2, 2, 2, 2]));
        let data = ethernet(ethertype::VLAN, &tagged);

        let record = FrameDecoder::default()
            .decode(&frame(LinkType::ETHERNET, data))
            .unwrap();
        assert_eq!(record.flow_key().to_string(), "1.1.1.1 -> 2.2.2.2");
    }

    #[test]
    fn test_arp_is_absent() {
        let data = ethernet(0x0806, &[0x00, 0x01, 0x08, 0x00, 0x06, 0x04, 0x00, 0x01]);
        assert!(FrameDecoder::default()
            .decode(&frame(LinkType::ETHERNET, data))
            .is_none());
    }

    #[test]
    fn test_header_length_beyond_frame_is_absent() {
        let mut ip = ipv4_header([1, 2, 3, 4], [5, 6, 7, 8]);
        ip[0] = 0x4f; // IHL 15 -> 60 byte header, frame only has 28
        let data = ethernet(ethertype::IPV4, &ip);
        assert!(FrameDecoder::default()
            .decode(&frame(LinkType::ETHERNET, data))
            .is_none());
    }

    #[test]
    fn test_wrong_ip_version_is_absent() {
        let mut ip = ipv4_header([1, 2, 3, 4], [5, 6, 7, 8]);
        ip[0] = 0x65;
        let data = ethernet(ethertype::IPV4, &ip);
        assert!(FrameDecoder::default()
            .decode(&frame(LinkType::ETHERNET, data))
            .is_none());
    }

    #[test]
    fn test_short_ethernet_is_absent() {
        let data = vec![0xff; 5];
        assert!(FrameDecoder::default()
            .decode(&frame(LinkType::ETHERNET, data))
            .is_none());
    }

    #[test]
    fn test_decode_raw_ip() {
        let data = ipv4_header([8, 8, 8, 8], [9, 9, 9, 9]);
        let record = FrameDecoder::default()
            .decode(&frame(LinkType::RAW, data))
            .unwrap();
        assert_eq!(record.total_length, 28);

        let data = ipv6_header();
        assert!(FrameDecoder::default()
            .with_ipv6(true)
            .decode(&frame(LinkType::IPV6, data))
            .is_some());
    }

    #[test]
    fn test_decode_null_loopback_both_byte_orders() {
        let ip = ipv4_header([127, 0, 0, 1], [127, 0, 0, 1]);

        let mut little = 2u32.to_le_bytes().to_vec();
        little.extend_from_slice(&ip);
        assert!(FrameDecoder::default()
            .decode(&frame(LinkType::NULL, little))
            .is_some());

        let mut big = 2u32.to_be_bytes().to_vec();
        big.extend_from_slice(&ip);
        assert!(FrameDecoder::default()
            .decode(&frame(LinkType::NULL, big))
            .is_some());

        let mut unknown = 7u32.to_le_bytes().to_vec();
        unknown.extend_from_slice(&ip);
        assert!(FrameDecoder::default()
            .decode(&frame(LinkType::NULL, unknown))
            .is_none());
    }

    fn linux_sll(protocol: u16, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![
            0x00, 0x00, // Packet type: to us
            0x00, 0x01, // ARPHRD_ETHER
            0x00, 0x06, // Address length
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x00, 0x00, // Address, padded
        ];
        data.extend_from_slice(&protocol.to_be_bytes());
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn test_decode_linux_sll() {
        let data = linux_sll(ethertype::IPV4, &ipv4_header([10, 1, 1, 1], [10, 2, 2, 2]));
        let record = FrameDecoder::default()
            .decode(&frame(LinkType::LINUX_SLL, data))
            .unwrap();
        assert_eq!(record.dst_ip, "10.2.2.2".parse::<IpAddr>().unwrap());
        assert_eq!(record.total_length, 16 + 28);
    }

    #[test]
    fn test_linux_sll_non_ip_and_short_are_absent() {
        let arp = linux_sll(0x0806, &[0u8; 28]);
        assert!(FrameDecoder::default()
            .decode(&frame(LinkType::LINUX_SLL, arp))
            .is_none());

        let short = linux_sll(ethertype::IPV4, &[])[..10].to_vec();
        assert!(FrameDecoder::default()
            .decode(&frame(LinkType::LINUX_SLL, short))
            .is_none());
    }

    #[test]
    fn test_decode_linux_sll2() {
        let mut data = Vec::new();
        data.extend_from_slice(&ethertype::IPV4.to_be_bytes()); // Protocol
        data.extend_from_slice(&[0x00, 0x00]); // Reserved
        data.extend_from_slice(&3u32.to_be_bytes()); // Interface index
        data.extend_from_slice(&[0x00, 0x01, 0x00, 0x06]); // ARPHRD_ETHER, to us, addr len
        data.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x00, 0x00]);
        data.extend_from_slice(&ipv4_header([10, 3, 3, 3], [10, 4, 4, 4]));

        let record = FrameDecoder::default()
            .decode(&frame(LinkType::LINUX_SLL2, data))
            .unwrap();
        assert_eq!(record.src_ip, "10.3.3.3".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_unknown_link_type_is_absent() {
        let data = ipv4_header([1, 1, 1, 1], [2, 2, 2, 2]);
        assert!(FrameDecoder::default()
            .decode(&frame(LinkType(147), data))
            .is_none());
    }

    #[test]
    fn test_wire_accounting_uses_original_length() {
        let data = ethernet(ethertype::IPV4, &ipv4_header([1, 1, 1, 1], [2, 2, 2, 2]));
        let raw = frame(LinkType::ETHERNET, data);

        let record = FrameDecoder::new(ByteAccounting::Wire).decode(&raw).unwrap();
        assert_eq!(record.total_length, raw.original_len);
    }

    #[test]
    fn test_byte_accounting_parse() {
        assert_eq!(
            "captured".parse::<ByteAccounting>().unwrap(),
            ByteAccounting::Captured
        );
        assert_eq!("WIRE".parse::<ByteAccounting>().unwrap(), ByteAccounting::Wire);
        assert!("payload".parse::<ByteAccounting>().is_err());
        assert_eq!(ByteAccounting::Wire.to_string(), "wire");
    }

    #[test]
    fn test_flow_key_sorts_as_text() {
        let a = FlowKey::new(
            "10.0.0.2".parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
        );
        let b = FlowKey::new(
            "10.0.0.10".parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
        );
        let c = FlowKey::new(
            "10.0.0.2".parse().unwrap(),
            "10.0.0.3".parse().unwrap(),
        );
        assert!(b.sort_key() < a.sort_key(), "addresses compare as text");
        assert!(a.sort_key() < c.sort_key(), "destination breaks ties");
    }
}
