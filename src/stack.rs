//! The coordinator: owns the TAP device and all per-protocol state, and runs the single event
//! loop that processes every inbound frame and outbound command in the order it arrives.
//!
//! Grounded on the reference implementation's `stack.py`, which is likewise a single-threaded
//! dispatch loop reading frames off the TAP device and handing them to each protocol module in
//! turn. This crate keeps that single-owner design but moves the TAP read onto its own thread so
//! a blocking read never stalls socket commands - both feed the same channel, so the coordinator
//! itself still only ever touches its state from one thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use log::{debug, info, trace, warn};

use byte_struct::*;

use crate::arp::{ArpAction, ArpPayload, ArpTable, ProtocolType};
use crate::config::StackConfig;
use crate::enet::{self, EtherType, EthernetHeader};
use crate::icmp::{self, IcmpHeader};
use crate::ip::{IpV4Header, Protocol as IpProtocol};
use crate::route::{RouteFlags, RouteTable};
use crate::socket::{Protocol as SocketProtocol, ReceivedDatagram, SocketId, SocketRegistry};
use crate::tap::Tap;
use crate::tcp::{self, TcpAction, TcpConnection, TcpHeader};
use crate::udp::{self, UdpHeader};
use crate::{IpV4Addr, MacAddr, StackError};

/// Key identifying one passive-open TCP connection: the 4-tuple a segment arrives on.
type TcpConnectionKey = (IpV4Addr, u16, u16);

/// Result of handing a segment to IP egress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed off to the link layer.
    Sent,
    /// No route matched the destination; the packet was dropped.
    RoutingError,
    /// The next hop has no ARP entry yet; a request was queued and the packet was dropped.
    ArpMiss,
}

/// Everything that can enter the event loop's single inbox.
pub enum StackEvent {
    /// A raw Ethernet frame was read off the TAP device.
    FrameReceived(Vec<u8>),
    /// A socket-facing command issued by an application thread.
    Command(SocketCommand),
}

/// Commands a caller can issue against the running stack without touching its state directly -
/// they cross the same channel the TAP reader thread feeds, so they never race protocol state.
pub enum SocketCommand {
    Bind { protocol: SocketProtocol, port: u16, reply: Sender<Result<SocketId, StackError>> },
    SendUdp { socket: SocketId, dst_addr: IpV4Addr, dst_port: u16, data: Vec<u8> },
}

/// Handle used by application code to talk to a running [`Stack`] from another thread.
#[derive(Clone)]
pub struct StackHandle {
    events: Sender<StackEvent>,
}

impl StackHandle {
    /// Binds a port, blocking until the coordinator thread replies.
    pub fn bind(&self, protocol: SocketProtocol, port: u16) -> Result<SocketId, StackError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.events
            .send(StackEvent::Command(SocketCommand::Bind { protocol, port, reply: reply_tx }))
            .map_err(|_| StackError::InvalidConfig("stack event loop is no longer running".into()))?;
        reply_rx
            .recv()
            .map_err(|_| StackError::InvalidConfig("stack event loop is no longer running".into()))?
    }

    /// Queues a UDP datagram for transmission from a bound socket.
    pub fn send_udp(&self, socket: SocketId, dst_addr: IpV4Addr, dst_port: u16, data: Vec<u8>) -> Result<(), StackError> {
        self.events
            .send(StackEvent::Command(SocketCommand::SendUdp { socket, dst_addr, dst_port, data }))
            .map_err(|_| StackError::InvalidConfig("stack event loop is no longer running".into()))
    }
}

/// Owns the TAP device and every piece of per-protocol state, and drives them all from one
/// thread via [`Stack::run`]'s event loop.
pub struct Stack {
    tap: Box<dyn Tap + Send>,
    local_mac: MacAddr,
    local_ip: IpV4Addr,
    routes: RouteTable,
    arp_table: ArpTable,
    sockets: SocketRegistry,
    tcp_connections: HashMap<TcpConnectionKey, TcpConnection>,
    next_ip_id: u16,
    events: Receiver<StackEvent>,
    event_sender: Sender<StackEvent>,
    /// Count of frames dropped for being malformed or failing a checksum; exposed for
    /// diagnostics rather than acted on.
    pub malformed_frame_count: Arc<AtomicU64>,
}

impl Stack {
    /// Builds a stack from a TAP device and validated configuration. The default route points at
    /// the TAP interface's own address, since this is a single-hop lab network with no separate
    /// gateway host.
    pub fn new(tap: Box<dyn Tap + Send>, config: &StackConfig, local_mac: MacAddr) -> Self {
        let (event_sender, events) = mpsc::channel();
        let mut routes = RouteTable::new();
        routes.add(crate::route::RouteEntry {
            dst_network: config.tap_addr.into(),
            netmask: config.tap_netmask.into(),
            gateway: IpV4Addr::ANY,
            iface: config.tap_name.clone(),
            flags: RouteFlags::UP,
        });

        let mut arp_table = ArpTable::new();
        arp_table.insert(config.node_ip_addr, local_mac);

        Stack {
            tap,
            local_mac,
            local_ip: config.node_ip_addr,
            routes,
            arp_table,
            sockets: SocketRegistry::new(),
            tcp_connections: HashMap::new(),
            next_ip_id: 1,
            events,
            event_sender,
            malformed_frame_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A handle application threads can use to issue commands into the running event loop.
    pub fn handle(&self) -> StackHandle {
        StackHandle { events: self.event_sender.clone() }
    }

    /// Spawns the background thread that reads frames off an independent handle to this stack's
    /// TAP device and feeds them into the event channel [`Stack::run`] drains. The coordinator
    /// keeps writing through its own handle, so the two threads never touch the same `Tap` value.
    pub fn spawn_tap_reader(&self) -> Result<thread::JoinHandle<()>, StackError> {
        let mut reader = self.tap.try_clone().map_err(StackError::TapIo)?;
        let tx = self.event_sender.clone();
        Ok(thread::spawn(move || {
            let mut buf = vec![0_u8; 65536];
            loop {
                match reader.recv(&mut buf) {
                    Ok(n) if n > 0 => {
                        if tx.send(StackEvent::FrameReceived(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                    Err(e) => {
                        warn!("tap read failed, stopping reader thread: {e}");
                        break;
                    }
                }
            }
        }))
    }

    /// Runs the event loop forever, processing exactly one [`StackEvent`] at a time so protocol
    /// state is never touched from more than one thread.
    pub fn run(&mut self) -> Result<(), StackError> {
        info!("stack event loop starting for {}", self.local_ip);
        loop {
            let event = self
                .events
                .recv()
                .map_err(|_| StackError::InvalidConfig("event channel closed".into()))?;
            self.handle_event(event)?;
        }
    }

    fn handle_event(&mut self, event: StackEvent) -> Result<(), StackError> {
        match event {
            StackEvent::FrameReceived(frame) => self.process_frame(&frame),
            StackEvent::Command(SocketCommand::Bind { protocol, port, reply }) => {
                let _ = reply.send(self.sockets.bind(protocol, port));
                Ok(())
            }
            StackEvent::Command(SocketCommand::SendUdp { socket: _, dst_addr, dst_port, data }) => {
                self.send_udp(dst_addr, dst_port, &data).map(|_| ())
            }
        }
    }

    fn drop_malformed(&self, reason: &str) {
        self.malformed_frame_count.fetch_add(1, Ordering::Relaxed);
        trace!("dropping malformed frame: {reason}");
    }

    fn process_frame(&mut self, frame: &[u8]) -> Result<(), StackError> {
        let Some((header, payload)) = enet::decode_header(frame) else {
            self.drop_malformed("frame shorter than an Ethernet header");
            return Ok(());
        };

        match header.ethertype {
            EtherType::ARP => self.process_arp(payload),
            EtherType::IPV4 => self.process_ip(payload),
            EtherType::Unimplemented => {
                debug!("ignoring frame with unsupported ethertype");
                Ok(())
            }
        }
    }

    fn process_arp(&mut self, payload: &[u8]) -> Result<(), StackError> {
        if payload.len() < ArpPayload::BYTE_LEN {
            self.drop_malformed("ARP payload too short");
            return Ok(());
        }
        let msg = ArpPayload::read_bytes(&payload[0..ArpPayload::BYTE_LEN]);
        if msg.htype != 1 {
            self.drop_malformed("ARP hardware type is not Ethernet");
            return Ok(());
        }
        if msg.ptype != ProtocolType::IpV4 {
            return Ok(());
        }

        match self.arp_table.process(&msg, self.local_mac, self.local_ip) {
            ArpAction::Reply(reply) => self.send_ethernet(reply.dst_mac, EtherType::ARP, &reply.to_be_bytes()),
            ArpAction::None => Ok(()),
        }
    }

    fn process_ip(&mut self, payload: &[u8]) -> Result<(), StackError> {
        if payload.len() < IpV4Header::BYTE_LEN {
            self.drop_malformed("IPV4 payload shorter than a header");
            return Ok(());
        }
        let header = IpV4Header::read_bytes(&payload[0..IpV4Header::BYTE_LEN]);

        let mut version_and_length = [0_u8; 1];
        header.version_and_length.write_bytes(&mut version_and_length);
        let version = version_and_length[0] >> 4;
        let ihl = version_and_length[0] & 0x0f;
        if version != 4 || ihl < 5 {
            self.drop_malformed("IPV4 header has unsupported version or IHL");
            return Ok(());
        }

        if !header.checksum_is_valid() {
            self.drop_malformed("IPV4 header checksum mismatch");
            return Ok(());
        }
        if header.dst_ipaddr != self.local_ip {
            return Ok(());
        }

        let total_len = header.total_length as usize;
        if payload.len() < total_len || total_len < IpV4Header::BYTE_LEN {
            self.drop_malformed("IPV4 total length inconsistent with frame size");
            return Ok(());
        }
        let segment = &payload[IpV4Header::BYTE_LEN..total_len];

        match header.protocol {
            IpProtocol::ICMP => self.process_icmp(&header, segment),
            IpProtocol::UDP => self.process_udp(&header, segment),
            IpProtocol::TCP => self.process_tcp(&header, segment),
            IpProtocol::Unimplemented => {
                debug!("ignoring IPV4 payload with unsupported protocol");
                Ok(())
            }
        }
    }

    fn process_icmp(&mut self, ip_header: &IpV4Header, segment: &[u8]) -> Result<(), StackError> {
        if segment.len() < IcmpHeader::BYTE_LEN {
            self.drop_malformed("ICMP segment shorter than a header");
            return Ok(());
        }
        let icmp_header = IcmpHeader::read_bytes(&segment[0..IcmpHeader::BYTE_LEN]);
        let data = &segment[IcmpHeader::BYTE_LEN..];
        if !icmp::checksum_is_valid(&icmp_header, data) {
            self.drop_malformed("ICMP checksum mismatch");
            return Ok(());
        }

        if let Some((reply_header, reply_data)) = icmp::build_echo_reply(&icmp_header, data) {
            let mut reply_bytes = vec![0_u8; IcmpHeader::BYTE_LEN + reply_data.len()];
            reply_header.write_bytes(&mut reply_bytes[0..IcmpHeader::BYTE_LEN]);
            reply_bytes[IcmpHeader::BYTE_LEN..].copy_from_slice(&reply_data);
            self.send_ip(ip_header.src_ipaddr, IpProtocol::ICMP, &reply_bytes).map(|_| ())?;
        } else {
            debug!("dropping ICMP message of type {:?}, not an echo request", icmp_header.icmp_type);
        }
        Ok(())
    }

    fn process_udp(&mut self, ip_header: &IpV4Header, segment: &[u8]) -> Result<(), StackError> {
        if segment.len() < UdpHeader::BYTE_LEN {
            self.drop_malformed("UDP segment shorter than a header");
            return Ok(());
        }
        let header = UdpHeader::read_bytes(&segment[0..UdpHeader::BYTE_LEN]);
        let data = &segment[UdpHeader::BYTE_LEN..];
        if !udp::checksum_is_valid(&header, ip_header.src_ipaddr, ip_header.dst_ipaddr, data) {
            self.drop_malformed("UDP checksum mismatch");
            return Ok(());
        }
        self.sockets.deliver(
            SocketProtocol::Dgram,
            header.dst_port,
            ReceivedDatagram { src_addr: ip_header.src_ipaddr, src_port: header.src_port, data: data.to_vec() },
        );
        Ok(())
    }

    fn process_tcp(&mut self, ip_header: &IpV4Header, segment: &[u8]) -> Result<(), StackError> {
        if segment.len() < TcpHeader::BYTE_LEN {
            self.drop_malformed("TCP segment shorter than a header");
            return Ok(());
        }
        let header = TcpHeader::read_bytes(&segment[0..TcpHeader::BYTE_LEN]);
        let data = &segment[TcpHeader::BYTE_LEN..];
        if !tcp::checksum_is_valid(&header, ip_header.src_ipaddr, ip_header.dst_ipaddr, data) {
            self.drop_malformed("TCP checksum mismatch");
            return Ok(());
        }
        if self.sockets.find_by_port(SocketProtocol::Stream, header.dst_port).is_none() {
            return Ok(());
        }

        let key = (ip_header.src_ipaddr, header.src_port, header.dst_port);
        let connection = self.tcp_connections.entry(key).or_insert_with(TcpConnection::new);
        let action = connection.on_segment(&header);
        match action {
            TcpAction::Send(mut reply) => {
                reply.src_port = header.dst_port;
                reply.dst_port = header.src_port;
                tcp::finalize_header_checksum(&mut reply, ip_header.dst_ipaddr, ip_header.src_ipaddr);
                self.send_ip(ip_header.src_ipaddr, IpProtocol::TCP, &reply.to_be_bytes()).map(|_| ())
            }
            TcpAction::Reset => {
                self.tcp_connections.remove(&key);
                Ok(())
            }
            TcpAction::None => Ok(()),
        }
    }

    fn send_udp(&mut self, dst_addr: IpV4Addr, dst_port: u16, data: &[u8]) -> Result<SendOutcome, StackError> {
        let header = udp::build_header(self.local_ip, dst_addr, 0, dst_port, data);
        let mut segment = header.to_be_bytes().to_vec();
        segment.extend_from_slice(data);
        self.send_ip(dst_addr, IpProtocol::UDP, &segment)
    }

    fn send_ip(&mut self, dst_addr: IpV4Addr, protocol: IpProtocol, segment: &[u8]) -> Result<SendOutcome, StackError> {
        let identification = self.next_ip_id;
        self.next_ip_id = self.next_ip_id.wrapping_add(1);
        let header = IpV4Header::new(self.local_ip, dst_addr, protocol, identification, segment.len() as u16);

        let mut packet = header.to_be_bytes().to_vec();
        packet.extend_from_slice(segment);

        let Some(route) = self.routes.lookup(dst_addr) else {
            warn!("no route to {dst_addr}, dropping outbound packet");
            return Ok(SendOutcome::RoutingError);
        };
        let next_hop = if route.flags.gateway { route.gateway } else { dst_addr };

        let Some(dst_mac) = self.arp_table.get(&next_hop) else {
            let request = ArpTable::build_request(self.local_mac, self.local_ip, next_hop);
            self.send_ethernet(MacAddr::BROADCAST, EtherType::ARP, &request.to_be_bytes())?;
            debug!("no ARP entry for {next_hop} yet; queued a request and dropped this packet");
            return Ok(SendOutcome::ArpMiss);
        };

        self.send_ethernet(dst_mac, EtherType::IPV4, &packet)?;
        Ok(SendOutcome::Sent)
    }

    fn send_ethernet(&mut self, dst_mac: MacAddr, ethertype: EtherType, payload: &[u8]) -> Result<(), StackError> {
        let header = EthernetHeader { dst_macaddr: dst_mac, src_macaddr: self.local_mac, ethertype };
        let mut frame = vec![0_u8; EthernetHeader::BYTE_LEN];
        header.write_bytes(&mut frame);
        frame.extend_from_slice(payload);
        let fcs = crate::codec::ethernet_fcs(&frame);
        frame.extend_from_slice(&fcs.to_be_bytes());
        self.tap.send(&frame).map_err(StackError::TapIo)
    }
}
