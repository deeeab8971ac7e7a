//! Link layer: Ethernet II protocol
//!
//! Diagram at https://en.wikipedia.org/wiki/Ethernet_frame#Ethernet_II

use crate::codec::ethernet_fcs;
use crate::MacAddr;

use byte_struct::*;

/// Header for Ethernet II frame like
///
/// value [0:5] dst macaddr ([0xFF_u8; 6] for broadcast, e.g. an ARP request)
///
/// value [6:11] src macaddr
///
/// value [12:13] ethertype
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct EthernetHeader {
    pub dst_macaddr: MacAddr,
    pub src_macaddr: MacAddr,
    pub ethertype: EtherType,
}

/// Ethernet frame around arbitrary data, with the 4-byte IEEE 802.3 frame check sequence
/// computed over the header and data and carried as a trailing footer.
#[derive(Clone, Copy, Debug)]
pub struct EthernetFrame<T>
where
    T: ByteStruct,
{
    pub header: EthernetHeader,
    pub data: T,
    checksum: u32,
}

impl<T> EthernetFrame<T>
where
    T: ByteStruct,
{
    /// Builds a frame and computes its frame check sequence over the header and data.
    pub fn new(header: EthernetHeader, data: T) -> Self {
        let mut unchecked = EthernetFrame { header, data, checksum: 0 };
        let mut bytes = vec![0_u8; Self::BYTE_LEN];
        unchecked.write_bytes(&mut bytes);
        unchecked.checksum = ethernet_fcs(&bytes[0..Self::BYTE_LEN - 4]);
        unchecked
    }

    /// The frame check sequence as computed at construction time.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Recomputes the frame check sequence over the header and data and compares it against the
    /// one this frame carries. A mismatch means the frame was corrupted or truncated in transit.
    pub fn checksum_is_valid(&self) -> bool {
        let mut bytes = vec![0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut bytes);
        ethernet_fcs(&bytes[0..Self::BYTE_LEN - 4]) == self.checksum
    }
}

impl<T> ByteStructLen for EthernetFrame<T>
where
    T: ByteStruct,
{
    const BYTE_LEN: usize = EthernetHeader::BYTE_LEN + T::BYTE_LEN + 4;
}

impl<T> ByteStruct for EthernetFrame<T>
where
    T: ByteStruct,
{
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut checksum_bytes = [0_u8; 4];
        checksum_bytes.copy_from_slice(&bytes[Self::BYTE_LEN - 4..Self::BYTE_LEN]);
        EthernetFrame::<T> {
            header: EthernetHeader::read_bytes(&bytes[0..EthernetHeader::BYTE_LEN]),
            data: T::read_bytes(&bytes[EthernetHeader::BYTE_LEN..Self::BYTE_LEN - 4]),
            checksum: u32::from_be_bytes(checksum_bytes),
        }
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        self.header
            .write_bytes(&mut bytes[0..EthernetHeader::BYTE_LEN]);
        self.data
            .write_bytes(&mut bytes[EthernetHeader::BYTE_LEN..Self::BYTE_LEN - 4]);
        let checksum_bytes = self.checksum.to_be_bytes();
        bytes[Self::BYTE_LEN - 4..Self::BYTE_LEN].copy_from_slice(&checksum_bytes);
    }
}

/// Decodes only the Ethernet header from a raw frame and returns it with the remaining payload
/// bytes, per the stack coordinator's "decode header, then dispatch on ethertype" contract.
/// Frames delivered off a TAP device carry no frame check sequence - the kernel already validated
/// and stripped it - so this does not expect or strip a footer.
pub fn decode_header(raw_frame: &[u8]) -> Option<(EthernetHeader, &[u8])> {
    if raw_frame.len() < EthernetHeader::BYTE_LEN {
        return None;
    }
    let header = EthernetHeader::read_bytes(&raw_frame[0..EthernetHeader::BYTE_LEN]);
    Some((header, &raw_frame[EthernetHeader::BYTE_LEN..]))
}

/// EtherType tag values this stack dispatches on.
///
/// See https://en.wikipedia.org/wiki/EtherType
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum EtherType {
    /// Internet Protocol version 4
    IPV4 = 0x0800,
    /// Address Resolution Protocol
    ARP = 0x0806,
    /// Catch-all for EtherTypes this stack does not dispatch
    Unimplemented,
}

impl From<u16> for EtherType {
    fn from(value: u16) -> Self {
        match value {
            x if x == EtherType::ARP as u16 => EtherType::ARP,
            x if x == EtherType::IPV4 as u16 => EtherType::IPV4,
            _ => EtherType::Unimplemented,
        }
    }
}

impl ByteStructLen for EtherType {
    const BYTE_LEN: usize = 2;
}

impl ByteStruct for EtherType {
    fn read_bytes(bytes: &[u8]) -> Self {
        if bytes.len() < 2 {
            return EtherType::Unimplemented;
        } else {
            let mut bytes_read = [0_u8; 2];
            bytes_read.copy_from_slice(&bytes[0..=1]);
            return EtherType::from(u16::from_be_bytes(bytes_read));
        }
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        if bytes.len() >= 2 {
            let bytes_to_write = (*self as u16).to_be_bytes();
            bytes[0] = bytes_to_write[0];
            bytes[1] = bytes_to_write[1];
        } else {
            // Do nothing - no bytes to write
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arp::{ArpOperation, ArpPayload};
    use crate::IpV4Addr;

    fn sample_arp() -> ArpPayload {
        ArpPayload::new(
            MacAddr::new([0x01, 0x23, 0x45, 0x67, 0x89, 0xab]),
            IpV4Addr::new([10, 0, 0, 1]),
            MacAddr::UNSPECIFIED,
            IpV4Addr::new([10, 0, 0, 2]),
            ArpOperation::Request,
        )
    }

    #[test]
    fn header_round_trips() {
        let header = EthernetHeader {
            dst_macaddr: MacAddr::BROADCAST,
            src_macaddr: MacAddr::new([0x01, 0x23, 0x45, 0x67, 0x89, 0xab]),
            ethertype: EtherType::ARP,
        };
        let mut bytes = [0_u8; EthernetHeader::BYTE_LEN];
        header.write_bytes(&mut bytes);
        let parsed = EthernetHeader::read_bytes(&bytes);
        assert_eq!(parsed.dst_macaddr, header.dst_macaddr);
        assert_eq!(parsed.src_macaddr, header.src_macaddr);
    }

    #[test]
    fn frame_checksum_round_trips_and_detects_corruption() {
        let header = EthernetHeader {
            dst_macaddr: MacAddr::BROADCAST,
            src_macaddr: MacAddr::new([0x01, 0x23, 0x45, 0x67, 0x89, 0xab]),
            ethertype: EtherType::ARP,
        };
        let frame = EthernetFrame::new(header, sample_arp());
        assert!(frame.checksum_is_valid());

        let mut bytes = vec![0_u8; EthernetFrame::<ArpPayload>::BYTE_LEN];
        frame.write_bytes(&mut bytes);
        let mut parsed = EthernetFrame::<ArpPayload>::read_bytes(&bytes);
        assert!(parsed.checksum_is_valid());

        parsed.data.src_ipaddr = IpV4Addr::new([10, 0, 0, 99]);
        assert!(!parsed.checksum_is_valid());
    }

    #[test]
    fn decode_header_splits_payload() {
        let header = EthernetHeader {
            dst_macaddr: MacAddr::BROADCAST,
            src_macaddr: MacAddr::new([0x01, 0x23, 0x45, 0x67, 0x89, 0xab]),
            ethertype: EtherType::IPV4,
        };
        let frame = EthernetFrame::new(header, sample_arp());
        let mut bytes = vec![0_u8; EthernetFrame::<ArpPayload>::BYTE_LEN];
        frame.write_bytes(&mut bytes);

        let (decoded, payload) = decode_header(&bytes).unwrap();
        assert_eq!(decoded.ethertype, EtherType::IPV4);
        assert_eq!(payload.len(), ArpPayload::BYTE_LEN + 4);
    }

    #[test]
    fn short_frame_is_rejected() {
        assert!(decode_header(&[0_u8; 4]).is_none());
    }
}
