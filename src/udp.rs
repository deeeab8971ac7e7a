//! Transport layer: User Datagram Protocol

use crate::codec::{finalize_checksum, partial_checksum, pseudo_header_sum};
use crate::ip::Protocol;
use crate::IpV4Addr;

use byte_struct::*;

/// UDP datagram header structure like
///
/// value [0:1] source port [u16]
///
/// value [2:3] destination port [u16]
///
/// value [4:5] total length in bytes [u16], header + data
///
/// value [6:7] checksum [u16]
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct UdpHeader {
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// Total frame length including header and data
    pub length: u16,
    /// Checksum, computed over the IPV4 pseudo-header plus this header and data
    pub checksum: u16,
}

impl UdpHeader {
    /// Pack into big-endian (network) byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut header_bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut header_bytes);

        header_bytes
    }
}

/// IPV4 message frame for UDP protocol.
#[derive(Clone, Copy, Debug)]
pub struct UdpFrame<T>
where
    T: ByteStruct,
{
    /// UDP packet header
    pub header: UdpHeader,
    /// Data to transmit
    pub data: T,
}

impl<T> ByteStructLen for UdpFrame<T>
where
    T: ByteStruct,
{
    const BYTE_LEN: usize = UdpHeader::BYTE_LEN + T::BYTE_LEN;
}

impl<T> ByteStruct for UdpFrame<T>
where
    T: ByteStruct,
{
    fn read_bytes(bytes: &[u8]) -> Self {
        UdpFrame::<T> {
            header: UdpHeader::read_bytes(&bytes[0..UdpHeader::BYTE_LEN]),
            data: T::read_bytes(&bytes[UdpHeader::BYTE_LEN..Self::BYTE_LEN]),
        }
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        self.header.write_bytes(&mut bytes[0..UdpHeader::BYTE_LEN]);
        self.data
            .write_bytes(&mut bytes[UdpHeader::BYTE_LEN..Self::BYTE_LEN]);
    }
}

/// Builds a UDP header for `data`, with the checksum computed over the pseudo-header, this
/// header (checksum field zeroed), and `data`.
pub fn build_header(src_ipaddr: IpV4Addr, dst_ipaddr: IpV4Addr, src_port: u16, dst_port: u16, data: &[u8]) -> UdpHeader {
    let length = (UdpHeader::BYTE_LEN + data.len()) as u16;
    let mut header = UdpHeader { src_port, dst_port, length, checksum: 0 };

    let sum = pseudo_header_sum(src_ipaddr, dst_ipaddr, Protocol::UDP as u8, length)
        + partial_checksum(&header.to_be_bytes())
        + partial_checksum(data);
    header.checksum = finalize_checksum(sum);
    header
}

/// Verifies a UDP datagram's checksum. A checksum of zero means the sender opted out, per RFC 768,
/// and is treated as always valid.
pub fn checksum_is_valid(header: &UdpHeader, src_ipaddr: IpV4Addr, dst_ipaddr: IpV4Addr, data: &[u8]) -> bool {
    if header.checksum == 0 {
        return true;
    }
    let sum = pseudo_header_sum(src_ipaddr, dst_ipaddr, Protocol::UDP as u8, header.length)
        + partial_checksum(&header.to_be_bytes())
        + partial_checksum(data);
    finalize_checksum(sum) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_checksum_round_trips() {
        let src = IpV4Addr::new([10, 0, 0, 1]);
        let dst = IpV4Addr::new([10, 0, 0, 2]);
        let data = b"hello";
        let header = build_header(src, dst, 5000, 7, data);
        assert!(checksum_is_valid(&header, src, dst, data));
    }

    #[test]
    fn wrong_address_fails_checksum() {
        let src = IpV4Addr::new([10, 0, 0, 1]);
        let dst = IpV4Addr::new([10, 0, 0, 2]);
        let data = b"hello";
        let header = build_header(src, dst, 5000, 7, data);
        assert!(!checksum_is_valid(&header, src, IpV4Addr::new([10, 0, 0, 99]), data));
    }

    #[test]
    fn zero_checksum_is_accepted() {
        let header = UdpHeader { src_port: 1, dst_port: 2, length: UdpHeader::BYTE_LEN as u16, checksum: 0 };
        assert!(checksum_is_valid(&header, IpV4Addr::ANY, IpV4Addr::ANY, &[]));
    }

    #[test]
    fn frame_byte_len_excludes_ip_header() {
        assert_eq!(UdpFrame::<crate::ByteArray<4>>::BYTE_LEN, UdpHeader::BYTE_LEN + 4);
    }
}
