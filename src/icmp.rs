//! Internet Control Message Protocol: echo request/reply only.
//!
//! See https://en.wikipedia.org/wiki/Ping_(networking_utility)#ICMP_packet. This stack answers
//! echo requests addressed to its own IP address and otherwise drops ICMP traffic; destination
//! unreachable, time exceeded, and other diagnostic messages are out of scope.

use crate::codec::{finalize_checksum, partial_checksum};

use byte_struct::*;

/// Header common to all ICMP message types, followed by a type-specific payload.
///
/// value [0] Type
///
/// value [1] Code
///
/// value [2:3] Checksum
///
/// value [4:5] Identifier (echo request/reply only)
///
/// value [6:7] Sequence number (echo request/reply only)
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct IcmpHeader {
    pub icmp_type: IcmpType,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
}

/// ICMP message type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum IcmpType {
    EchoReply = 0,
    EchoRequest = 8,
    Unimplemented,
}

impl From<u8> for IcmpType {
    fn from(value: u8) -> Self {
        match value {
            x if x == IcmpType::EchoReply as u8 => IcmpType::EchoReply,
            x if x == IcmpType::EchoRequest as u8 => IcmpType::EchoRequest,
            _ => IcmpType::Unimplemented,
        }
    }
}

impl ByteStructLen for IcmpType {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for IcmpType {
    fn read_bytes(bytes: &[u8]) -> Self {
        IcmpType::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = *self as u8;
    }
}

/// Given an echo request's header and trailing data, builds the echo reply: identifier and
/// sequence number copied verbatim, type changed to echo reply, checksum recomputed.
///
/// Returns `None` if `request` is not an echo request.
pub fn build_echo_reply(request: &IcmpHeader, data: &[u8]) -> Option<(IcmpHeader, Vec<u8>)> {
    if request.icmp_type != IcmpType::EchoRequest {
        return None;
    }

    let mut reply = IcmpHeader {
        icmp_type: IcmpType::EchoReply,
        code: 0,
        checksum: 0,
        identifier: request.identifier,
        sequence: request.sequence,
    };

    let mut header_bytes = [0_u8; IcmpHeader::BYTE_LEN];
    reply.write_bytes(&mut header_bytes);
    let sum = partial_checksum(&header_bytes) + partial_checksum(data);
    reply.checksum = finalize_checksum(sum);

    Some((reply, data.to_vec()))
}

/// Verifies an ICMP message's checksum over its header and trailing `data`.
pub fn checksum_is_valid(header: &IcmpHeader, data: &[u8]) -> bool {
    let mut header_bytes = [0_u8; IcmpHeader::BYTE_LEN];
    header.write_bytes(&mut header_bytes);
    finalize_checksum(partial_checksum(&header_bytes) + partial_checksum(data)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_checksum(identifier: u16, sequence: u16, data: &[u8]) -> IcmpHeader {
        let mut header = IcmpHeader {
            icmp_type: IcmpType::EchoRequest,
            code: 0,
            checksum: 0,
            identifier,
            sequence,
        };
        let mut header_bytes = [0_u8; IcmpHeader::BYTE_LEN];
        header.write_bytes(&mut header_bytes);
        header.checksum = finalize_checksum(partial_checksum(&header_bytes) + partial_checksum(data));
        header
    }

    #[test]
    fn echo_request_produces_matching_reply() {
        let data = b"pingpayload";
        let request = request_with_checksum(0x1234, 7, data);
        assert!(checksum_is_valid(&request, data));

        let (reply, reply_data) = build_echo_reply(&request, data).unwrap();
        assert_eq!(reply.icmp_type, IcmpType::EchoReply);
        assert_eq!(reply.identifier, 0x1234);
        assert_eq!(reply.sequence, 7);
        assert_eq!(reply_data, data);
        assert!(checksum_is_valid(&reply, &reply_data));
    }

    #[test]
    fn non_echo_request_is_not_replied_to() {
        let header = IcmpHeader {
            icmp_type: IcmpType::EchoReply,
            code: 0,
            checksum: 0,
            identifier: 0,
            sequence: 0,
        };
        assert!(build_echo_reply(&header, &[]).is_none());
    }
}
