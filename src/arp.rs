//! Address Resolution Protocol implementation with generation of requests and responses to received requests.
//!
//! ARP is not a distinct network abstraction layer, but is still required for most networks to function
//! because socket abstractions frequently require an ARP request and response to be completed before sending data
//! even if the router is actually going to be handling the association between MAC addresses and IP addresses,
//! so resolving the target's MAC address is not explicitly necessary.
//!
//! This is a noisy process, but on a statically-addressed network, it will ideally only occur once
//! during network initialization or if a host resets its network drivers and needs to re-connect.
//! In practice, most systems send out ARP requests about once per second.
//!
//! This process is not useful on a statically-addressed network, but on a mixed statically-and-dynamically-addressed network, it can help
//! in the case where the target device does exist on the network, but has not yet sent a packet and does not have an entry in the
//! router/switch's MAC address table. In that case, the broadcasted ARP request will still reach that device and produce a response,
//! which will be noted by the router/switch and allow its MAC address table entry to be populated.
//!
//! It can also be useful for networks with not-smart network switches where the hosts have to self-assemble the addressing space,
//! because ARP allows each host on the network to poll the others to check if an address is already taken before assigning
//! that address to itself. The success of that method requires that all devices on the network be configured to respond to ARP requests,
//! which is not necessarily the case.

use crate::*;

use byte_struct::*;
use static_assertions::const_assert;
use std::collections::HashMap;

const_assert!(ArpPayload::BYTE_LEN == 46);  // Make sure the ARP frame is at least sized for the minimum ethernet payload

/// An ARP request or response with IPV4 addresses and standard MAC addresses.
/// Assumes 6-byte standard MAC addresses and 4-byte IPV4 addresses; this function can't be as general as the parser
/// because we need to know the size of the output at compile time.
/// See https://en.wikipedia.org/wiki/Address_Resolution_Protocol .
///
/// Hardware type is 1 for ethernet.
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[byte_struct_be]
pub struct ArpPayload {
    /// Hardware type (1 for ethernet)
    pub htype: u16,
    /// Protocol type (same as ethertype from ethernet header)
    pub ptype: ProtocolType,
    /// Hardware address length (6 for standard MAC)
    pub hlen: u8,
    /// Protocol address length (4 for IPV4)
    pub plen: u8,
    /// ARP operation type
    pub operation: ArpOperation,
    /// Source MAC address
    pub src_mac: MacAddr,
    /// Source IP address
    pub src_ipaddr: IpV4Addr,
    /// Destination MAC address
    pub dst_mac: MacAddr,
    /// Destination IP address
    pub dst_ipaddr: IpV4Addr,
    /// Pad to minimum frame size
    _pad0: u128,
    _pad1: u16
}

impl ArpPayload {
    /// Create a new ARP payload for IPV4 on ethernet
    pub fn new(
        src_mac: MacAddr,
        src_ipaddr: IpV4Addr,
        dst_mac: MacAddr,
        dst_ipaddr: IpV4Addr,
        operation: ArpOperation,
    ) -> Self {
        ArpPayload {
            htype: 1,  // Always on ethernet
            ptype: ProtocolType::IpV4,  // Always resolving an IPV4 address
            hlen: 6,
            plen: 4,
            operation: operation,
            src_mac: src_mac,
            src_ipaddr: src_ipaddr,
            dst_mac: dst_mac,
            dst_ipaddr: dst_ipaddr,
            _pad0: 0,
            _pad1: 0
        }
    }

    /// Convert to big-endian byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut bytes);
        bytes
    }
}

/// ARP request or response flag values
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum ArpOperation {
    /// This is a request to confirm target IP address and acquire associated MAC address
    Request = 1,
    /// This is a response to confirm our IP address and provide associated MAC address
    Response = 2,
    /// Invalid operation
    Unimplemented,
}

impl From<u16> for ArpOperation {
    fn from(value: u16) -> Self {
        match value {
            x if x == ArpOperation::Request as u16 => ArpOperation::Request,
            x if x == ArpOperation::Response as u16 => ArpOperation::Response,
            _ => ArpOperation::Unimplemented,
        }
    }
}

impl ByteStructLen for ArpOperation {
    const BYTE_LEN: usize = 2;
}

impl ByteStruct for ArpOperation {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut bytes_read = [0_u8; 2];
        bytes_read.copy_from_slice(&bytes[0..=1]);
        return ArpOperation::from(u16::from_be_bytes(bytes_read));
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        let bytes_to_write = self.to_be_bytes();
        bytes[0] = bytes_to_write[0];
        bytes[1] = bytes_to_write[1];
    }
}

impl ArpOperation {
    /// Convert to big-endian byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        (*self as u16).to_be_bytes()
    }
}

/// Protocol Type flags are the same as EtherType but must be reimplemented to avoid run-time recursion
///
/// See https://en.wikipedia.org/wiki/EtherType
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum ProtocolType {
    /// Internet protocol version 4
    IpV4 = 0x0800,
    /// Address resolution protocol
    Arp = 0x0806,
    /// Tagged virtual LAN - if this tag is encountered, then this is not the real ethertype field, and we're reading an 802.1Q Vlan tag instead
    /// This crate does not support tagged Vlan, which is a trust-based and inefficient system. Untagged Vlan should be used instead.
    Vlan = 0x8100,
    /// Internet protocol version 6
    IpV6 = 0x86DD,
    /// EtherCat
    EtherCat = 0x88A4,
    /// Precision Time Protocol
    Ptp = 0x88A7,
    /// Catch-all for uncommon types not handled here
    Unimplemented = 0x0,
}

impl From<u16> for ProtocolType {
    fn from(value: u16) -> Self {
        match value {
            x if x == ProtocolType::Arp as u16 => ProtocolType::Arp,
            x if x == ProtocolType::EtherCat as u16 => ProtocolType::EtherCat,
            x if x == ProtocolType::IpV4 as u16 => ProtocolType::IpV4,
            x if x == ProtocolType::IpV6 as u16 => ProtocolType::IpV6,
            x if x == ProtocolType::Ptp as u16 => ProtocolType::Ptp,
            x if x == ProtocolType::Vlan as u16 => ProtocolType::Vlan,
            _ => ProtocolType::Unimplemented,
        }
    }
}

impl ByteStructLen for ProtocolType {
    const BYTE_LEN: usize = 2;
}

impl ByteStruct for ProtocolType {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut bytes_read = [0_u8; 2];
        bytes_read.copy_from_slice(&bytes[0..=1]);
        return ProtocolType::from(u16::from_be_bytes(bytes_read));
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        let bytes_to_write = (*self as u16).to_be_bytes();
        bytes[0] = bytes_to_write[0];
        bytes[1] = bytes_to_write[1];
    }
}

impl ProtocolType {
    /// Pack into big-endian (network) byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        (*self as u16).to_be_bytes()
    }
}

/// Cached mapping from IP address to hardware address, with RFC 826's merge-flag update rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpEntry {
    pub mac: MacAddr,
}

/// Address resolution cache, keyed by the IPV4 address being resolved.
///
/// Grounded on the Python reference's `arp.py` table, which keeps at most one entry per protocol
/// address and updates it in place on every observed request or response ("merge flag" set).
#[derive(Clone, Debug, Default)]
pub struct ArpTable {
    entries: HashMap<IpV4Addr, ArpEntry>,
}

/// What the caller should do after [`ArpTable::process`] observes an incoming ARP message.
pub enum ArpAction {
    /// Nothing further to send.
    None,
    /// Send this payload back to the sender as an ARP reply.
    Reply(ArpPayload),
}

impl ArpTable {
    pub fn new() -> Self {
        ArpTable::default()
    }

    /// Looks up a cached hardware address.
    pub fn get(&self, ip: &IpV4Addr) -> Option<MacAddr> {
        self.entries.get(ip).map(|e| e.mac)
    }

    /// Unconditionally records or overwrites a mapping, e.g. for the stack's own loopback entry.
    pub fn insert(&mut self, ip: IpV4Addr, mac: MacAddr) {
        self.entries.insert(ip, ArpEntry { mac });
    }

    /// Applies RFC 826's processing rules for an incoming ARP message addressed to `local_ip`:
    ///
    /// 1. If the sender's protocol address is already cached, update the cached hardware address
    ///    (the "merge flag" case) regardless of whether this packet targets us.
    /// 2. Otherwise, if this message's target protocol address is `local_ip`, insert a new entry
    ///    for the sender.
    /// 3. If the operation was a request and it targeted `local_ip`, reply with the fields
    ///    swapped and our own address filled in as the sender.
    pub fn process(&mut self, msg: &ArpPayload, local_mac: MacAddr, local_ip: IpV4Addr) -> ArpAction {
        let merge = self.entries.contains_key(&msg.src_ipaddr);
        if merge {
            self.entries.insert(msg.src_ipaddr, ArpEntry { mac: msg.src_mac });
        }

        let targets_us = msg.dst_ipaddr == local_ip;
        if !merge && targets_us {
            self.entries.insert(msg.src_ipaddr, ArpEntry { mac: msg.src_mac });
        }

        if targets_us && msg.operation == ArpOperation::Request {
            ArpAction::Reply(ArpPayload::new(local_mac, local_ip, msg.src_mac, msg.src_ipaddr, ArpOperation::Response))
        } else {
            ArpAction::None
        }
    }

    /// Builds a broadcast ARP request asking who has `target_ip`.
    pub fn build_request(local_mac: MacAddr, local_ip: IpV4Addr, target_ip: IpV4Addr) -> ArpPayload {
        ArpPayload::new(local_mac, local_ip, MacAddr::UNSPECIFIED, target_ip, ArpOperation::Request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an ARP message and make sure the parser returns the same values from the input
    #[test]
    fn test_serialization_loop() -> () {
        let msg = ArpPayload::new(
            MacAddr::new([7_u8; 6]),
            IpV4Addr::new([8_u8; 4]),
            MacAddr::new([9_u8; 6]),
            IpV4Addr::new([10_u8; 4]),
            ArpOperation::Request,
        );
        // Serialize
        let bytes: [u8; ArpPayload::BYTE_LEN] = msg.to_be_bytes();
        // Deserialize
        let msg_parsed = ArpPayload::read_bytes(&bytes);

        assert_eq!(msg, msg_parsed);
    }

    #[test]
    fn request_for_local_ip_gets_reply_and_caches_sender() {
        let local_mac = MacAddr::new([0xaa; 6]);
        let local_ip = IpV4Addr::new([10, 0, 0, 1]);
        let peer_mac = MacAddr::new([0xbb; 6]);
        let peer_ip = IpV4Addr::new([10, 0, 0, 2]);

        let mut table = ArpTable::new();
        let request = ArpPayload::new(peer_mac, peer_ip, MacAddr::UNSPECIFIED, local_ip, ArpOperation::Request);

        match table.process(&request, local_mac, local_ip) {
            ArpAction::Reply(reply) => {
                assert_eq!(reply.src_mac, local_mac);
                assert_eq!(reply.src_ipaddr, local_ip);
                assert_eq!(reply.dst_mac, peer_mac);
                assert_eq!(reply.dst_ipaddr, peer_ip);
                assert_eq!(reply.operation, ArpOperation::Response);
            }
            ArpAction::None => panic!("expected a reply"),
        }
        assert_eq!(table.get(&peer_ip), Some(peer_mac));
    }

    #[test]
    fn request_for_other_ip_is_ignored_and_not_cached() {
        let local_mac = MacAddr::new([0xaa; 6]);
        let local_ip = IpV4Addr::new([10, 0, 0, 1]);
        let peer_mac = MacAddr::new([0xbb; 6]);
        let peer_ip = IpV4Addr::new([10, 0, 0, 2]);
        let other_ip = IpV4Addr::new([10, 0, 0, 99]);

        let mut table = ArpTable::new();
        let request = ArpPayload::new(peer_mac, peer_ip, MacAddr::UNSPECIFIED, other_ip, ArpOperation::Request);

        assert!(matches!(table.process(&request, local_mac, local_ip), ArpAction::None));
        assert_eq!(table.get(&peer_ip), None);
    }

    #[test]
    fn cached_entry_is_updated_on_any_observed_message() {
        let local_mac = MacAddr::new([0xaa; 6]);
        let local_ip = IpV4Addr::new([10, 0, 0, 1]);
        let peer_ip = IpV4Addr::new([10, 0, 0, 2]);
        let stale_mac = MacAddr::new([0xbb; 6]);
        let fresh_mac = MacAddr::new([0xcc; 6]);

        let mut table = ArpTable::new();
        table.insert(peer_ip, stale_mac);

        // Addressed to someone else entirely, but the sender is already cached, so the merge
        // rule still refreshes its mapping.
        let gratuitous = ArpPayload::new(
            fresh_mac,
            peer_ip,
            MacAddr::UNSPECIFIED,
            IpV4Addr::new([10, 0, 0, 250]),
            ArpOperation::Request,
        );
        table.process(&gratuitous, local_mac, local_ip);
        assert_eq!(table.get(&peer_ip), Some(fresh_mac));
    }
}
