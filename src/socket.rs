//! Socket facade: a userspace port table and bounded receive queues, sitting between the
//! transport layer and whatever calls into this crate (a CLI command, an embedding application).
//!
//! Grounded on the reference implementation's `pysocket.py`/`pytransport.py`, which bind a port,
//! hand back a socket id, and let the caller poll a bounded receive queue rather than being woken
//! per-datagram.

use std::collections::{HashMap, VecDeque};

use crate::{IpV4Addr, StackError};

/// Transport-layer protocol a socket is bound for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Dgram,
    Stream,
}

/// Opaque handle returned by [`SocketRegistry::bind`].
pub type SocketId = u64;

/// Maximum number of queued-but-unread datagrams per socket before the oldest is dropped.
pub const MAX_RECV_WIN_SIZE: usize = 256;

/// One received datagram, queued for a bound socket to read.
#[derive(Clone, Debug)]
pub struct ReceivedDatagram {
    pub src_addr: IpV4Addr,
    pub src_port: u16,
    pub data: Vec<u8>,
}

struct Socket {
    protocol: Protocol,
    port: u16,
    queue: VecDeque<ReceivedDatagram>,
}

/// Maps bound ports to sockets and queues inbound datagrams for them to read.
///
/// Mirrors a conventional socket API's separation of concerns: binding claims a port and returns
/// an id; enqueueing (driven by the UDP/TCP ingress path) and draining (driven by the
/// application) are independent operations, so a slow reader never blocks the receive path - it
/// just starts losing its oldest unread datagrams.
#[derive(Default)]
pub struct SocketRegistry {
    next_id: SocketId,
    sockets: HashMap<SocketId, Socket>,
    ports: HashMap<(Protocol, u16), SocketId>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        SocketRegistry { next_id: 1, sockets: HashMap::new(), ports: HashMap::new() }
    }

    /// Binds `port` for `protocol`, returning a fresh socket id. Fails if the port is already
    /// bound for that protocol - UDP and TCP port spaces are independent.
    pub fn bind(&mut self, protocol: Protocol, port: u16) -> Result<SocketId, StackError> {
        if self.ports.contains_key(&(protocol, port)) {
            return Err(StackError::PortInUse(port));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.sockets.insert(id, Socket { protocol, port, queue: VecDeque::new() });
        self.ports.insert((protocol, port), id);
        Ok(id)
    }

    /// Releases a socket and its port.
    pub fn unbind(&mut self, id: SocketId) {
        if let Some(socket) = self.sockets.remove(&id) {
            self.ports.remove(&(socket.protocol, socket.port));
        }
    }

    /// Looks up the socket bound to `(protocol, port)`, if any.
    pub fn find_by_port(&self, protocol: Protocol, port: u16) -> Option<SocketId> {
        self.ports.get(&(protocol, port)).copied()
    }

    /// Delivers a datagram to the socket bound to `(protocol, dst_port)`. Drops the oldest queued
    /// datagram when the queue is full, so one unresponsive reader cannot grow without bound.
    /// Silently drops the datagram if nothing is bound to that port - there is no ICMP port
    /// unreachable message to send back, since that diagnostic is out of scope.
    pub fn deliver(&mut self, protocol: Protocol, dst_port: u16, datagram: ReceivedDatagram) {
        let Some(&id) = self.ports.get(&(protocol, dst_port)) else { return };
        let Some(socket) = self.sockets.get_mut(&id) else { return };
        if socket.queue.len() >= MAX_RECV_WIN_SIZE {
            socket.queue.pop_front();
        }
        socket.queue.push_back(datagram);
    }

    /// Pops the oldest unread datagram queued for `id`.
    pub fn recv(&mut self, id: SocketId) -> Result<Option<ReceivedDatagram>, StackError> {
        let socket = self.sockets.get_mut(&id).ok_or(StackError::UnknownSocket(id))?;
        Ok(socket.queue.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_deliver_round_trips() {
        let mut registry = SocketRegistry::new();
        let id = registry.bind(Protocol::Dgram, 9000).unwrap();

        registry.deliver(
            Protocol::Dgram,
            9000,
            ReceivedDatagram { src_addr: IpV4Addr::new([10, 0, 0, 2]), src_port: 1234, data: vec![1, 2, 3] },
        );

        let received = registry.recv(id).unwrap().unwrap();
        assert_eq!(received.data, vec![1, 2, 3]);
        assert!(registry.recv(id).unwrap().is_none());
    }

    #[test]
    fn duplicate_bind_is_rejected() {
        let mut registry = SocketRegistry::new();
        registry.bind(Protocol::Dgram, 9000).unwrap();
        assert!(matches!(registry.bind(Protocol::Dgram, 9000), Err(StackError::PortInUse(9000))));
    }

    #[test]
    fn udp_and_tcp_port_spaces_are_independent() {
        let mut registry = SocketRegistry::new();
        assert!(registry.bind(Protocol::Dgram, 80).is_ok());
        assert!(registry.bind(Protocol::Stream, 80).is_ok());
    }

    #[test]
    fn full_queue_drops_oldest() {
        let mut registry = SocketRegistry::new();
        let id = registry.bind(Protocol::Dgram, 9000).unwrap();
        for i in 0..MAX_RECV_WIN_SIZE + 1 {
            registry.deliver(
                Protocol::Dgram,
                9000,
                ReceivedDatagram { src_addr: IpV4Addr::ANY, src_port: 0, data: vec![i as u8] },
            );
        }
        let first = registry.recv(id).unwrap().unwrap();
        assert_eq!(first.data, vec![1]);
    }

    #[test]
    fn delivery_to_unbound_port_is_dropped_silently() {
        let mut registry = SocketRegistry::new();
        registry.deliver(Protocol::Dgram, 12345, ReceivedDatagram { src_addr: IpV4Addr::ANY, src_port: 0, data: vec![] });
    }
}
