//! Platform glue: attaching to a host TAP device.
//!
//! Grounded on the reference implementation's `tap.py`: open `/dev/net/tun`, claim a TAP
//! interface (no protocol-information prefix) via `TUNSETIFF`, read its hardware address via
//! `SIOCGIFHWADDR`, and bring the interface up and address it by shelling out to `ip`, since
//! there is no ioctl for address assignment as simple as the interface-creation one.

use std::io;

use crate::{MacAddr, StackError};

/// Everything the protocol engine needs from a link-layer transport. Exists so the engine can be
/// driven by a real TAP device in production and by an in-memory fake in tests, without either
/// one knowing about the other.
pub trait Tap {
    /// Reads one frame, blocking until one is available. Returns the number of bytes read.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Writes one frame.
    fn send(&mut self, buf: &[u8]) -> io::Result<()>;
    /// The interface's hardware address, as read back from the kernel at creation time.
    fn hardware_address(&self) -> MacAddr;
    /// Maximum transmission unit; frames built for this interface must not exceed it.
    fn mtu(&self) -> usize;
    /// Produces an independent handle onto the same device, so a reader thread can block in
    /// `recv` while the coordinator thread keeps sending through the original handle.
    fn try_clone(&self) -> io::Result<Box<dyn Tap + Send>>;
}

/// An in-memory [`Tap`] for tests: frames written are queued up to be "received" back, and an
/// explicit inbound queue can be primed to feed frames as if they arrived off the wire.
#[derive(Default)]
pub struct MemTap {
    pub sent: Vec<Vec<u8>>,
    pub inbound: std::collections::VecDeque<Vec<u8>>,
    pub hw_addr: MacAddr,
}

impl MemTap {
    pub fn new(hw_addr: MacAddr) -> Self {
        MemTap { sent: Vec::new(), inbound: std::collections::VecDeque::new(), hw_addr }
    }

    /// Queues a frame to be returned by the next [`Tap::recv`].
    pub fn push_inbound(&mut self, frame: Vec<u8>) {
        self.inbound.push_back(frame);
    }
}

impl Tap for MemTap {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let frame = self.inbound.pop_front().ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Ok(n)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        self.sent.push(buf.to_vec());
        Ok(())
    }

    fn hardware_address(&self) -> MacAddr {
        self.hw_addr
    }

    fn mtu(&self) -> usize {
        1500
    }

    /// Fakes cloning by handing back an empty `MemTap` sharing nothing with the original - tests
    /// drive `MemTap` synchronously and never need the clone to observe the same queues.
    fn try_clone(&self) -> io::Result<Box<dyn Tap + Send>> {
        Ok(Box::new(MemTap::new(self.hw_addr)))
    }
}

#[cfg(all(target_os = "linux", unix))]
mod linux {
    use super::*;
    use std::ffi::CString;
    use std::fs::File;
    use std::io::{Read, Write};
    use std::os::unix::io::{AsRawFd, FromRawFd};

    const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
    const SIOCGIFHWADDR: libc::c_ulong = 0x0000_8927;
    const IFF_TAP: i16 = 0x0002;
    const IFF_NO_PI: i16 = 0x1000;
    const IFNAMSIZ: usize = 16;

    /// Mirrors the kernel's `struct ifreq`, trimmed to the union arms this module uses
    /// (`ifr_flags` for `TUNSETIFF`, `ifr_hwaddr` for `SIOCGIFHWADDR`).
    #[repr(C)]
    struct IfReq {
        ifr_name: [libc::c_char; IFNAMSIZ],
        union_data: IfReqUnion,
    }

    #[repr(C)]
    union IfReqUnion {
        ifr_flags: libc::c_short,
        ifr_hwaddr: libc::sockaddr,
    }

    impl IfReq {
        fn with_name(name: &str) -> Self {
            let mut ifr_name = [0 as libc::c_char; IFNAMSIZ];
            for (slot, byte) in ifr_name.iter_mut().zip(name.as_bytes().iter()) {
                *slot = *byte as libc::c_char;
            }
            IfReq { ifr_name, union_data: IfReqUnion { ifr_flags: 0 } }
        }
    }

    /// A host TAP device, claimed and addressed via ioctls and the `ip` command-line tool.
    pub struct LinuxTap {
        file: File,
        hw_addr: MacAddr,
        mtu: usize,
    }

    impl LinuxTap {
        /// Opens `/dev/net/tun`, claims interface `name` as a TAP device, brings it up, assigns
        /// `addr`/`netmask` to it, and reads back its kernel-assigned hardware address.
        pub fn open(name: &str, addr: std::net::Ipv4Addr, netmask: std::net::Ipv4Addr, mtu: usize) -> Result<Self, StackError> {
            let device_path = CString::new("/dev/net/tun").expect("no interior NUL");
            let fd = unsafe { libc::open(device_path.as_ptr(), libc::O_RDWR) };
            if fd < 0 {
                return Err(StackError::TapIo(io::Error::last_os_error()));
            }

            let mut ifr = IfReq::with_name(name);
            ifr.union_data.ifr_flags = (IFF_TAP | IFF_NO_PI) as libc::c_short;
            if unsafe { libc::ioctl(fd, TUNSETIFF, &ifr as *const IfReq) } < 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(StackError::TapIo(err));
            }

            let file = unsafe { File::from_raw_fd(fd) };

            let prefix_len = u32::from(netmask).count_ones();
            run_ip(&["link", "set", "dev", name, "up"])?;
            run_ip(&["addr", "add", &format!("{addr}/{prefix_len}"), "dev", name])?;

            let hw_addr = read_hardware_address(file.as_raw_fd(), name)?;

            Ok(LinuxTap { file, hw_addr, mtu })
        }
    }

    fn run_ip(args: &[&str]) -> Result<(), StackError> {
        let status = std::process::Command::new("ip")
            .args(args)
            .status()
            .map_err(StackError::TapIo)?;
        if !status.success() {
            return Err(StackError::InvalidConfig(format!("`ip {}` failed: {status}", args.join(" "))));
        }
        Ok(())
    }

    fn read_hardware_address(fd: i32, name: &str) -> Result<MacAddr, StackError> {
        let mut ifr = IfReq::with_name(name);
        if unsafe { libc::ioctl(fd, SIOCGIFHWADDR, &mut ifr as *mut IfReq) } < 0 {
            return Err(StackError::TapIo(io::Error::last_os_error()));
        }
        let sa_data = unsafe { ifr.union_data.ifr_hwaddr.sa_data };
        let mut mac = [0_u8; 6];
        for (slot, byte) in mac.iter_mut().zip(sa_data.iter()) {
            *slot = *byte as u8;
        }
        Ok(MacAddr::new(mac))
    }

    impl Tap for LinuxTap {
        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.file.read(buf)
        }

        fn send(&mut self, buf: &[u8]) -> io::Result<()> {
            self.file.write_all(buf)
        }

        fn hardware_address(&self) -> MacAddr {
            self.hw_addr
        }

        fn mtu(&self) -> usize {
            self.mtu
        }

        fn try_clone(&self) -> io::Result<Box<dyn Tap + Send>> {
            let file = self.file.try_clone()?;
            Ok(Box::new(LinuxTap { file, hw_addr: self.hw_addr, mtu: self.mtu }))
        }
    }
}

#[cfg(all(target_os = "linux", unix))]
pub use linux::LinuxTap;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_tap_echoes_queued_inbound_frames() {
        let mut tap = MemTap::new(MacAddr::new([1, 2, 3, 4, 5, 6]));
        tap.push_inbound(vec![0xde, 0xad, 0xbe, 0xef]);

        let mut buf = [0_u8; 16];
        let n = tap.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn mem_tap_records_sent_frames() {
        let mut tap = MemTap::new(MacAddr::new([1, 2, 3, 4, 5, 6]));
        tap.send(&[1, 2, 3]).unwrap();
        assert_eq!(tap.sent, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn recv_on_empty_queue_would_block() {
        let mut tap = MemTap::new(MacAddr::UNSPECIFIED);
        let mut buf = [0_u8; 4];
        assert_eq!(tap.recv(&mut buf).unwrap_err().kind(), io::ErrorKind::WouldBlock);
    }
}
