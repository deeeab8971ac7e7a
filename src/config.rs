//! Stack configuration: CLI argument parsing and the validated configuration it produces.
//!
//! Grounded on the reference implementation's `stack.py` entry point, which takes the same three
//! knobs - the TAP interface's address/mask, this node's MAC address, and this node's IP address
//! - as command-line flags with the same defaults.

use std::net::Ipv4Addr;

use clap::Parser;

use crate::{IpV4Addr, MacAddr, StackError};

/// Command-line arguments for the `tapstackd` binary.
#[derive(Parser, Debug)]
#[command(name = "tapstackd", about = "User-space TCP/IP stack over a host TAP device")]
pub struct CliArgs {
    /// Name of the TAP interface to create and attach to.
    #[arg(long, default_value = "tap0")]
    pub tap_name: String,

    /// IPV4 address (with prefix length) assigned to the TAP interface itself, e.g. `10.0.0.1/24`.
    #[arg(long, default_value = "10.0.0.1/24")]
    pub tap_addr: String,

    /// This node's hardware address, in `aa:bb:cc:dd:ee:ff` form.
    #[arg(long, default_value = "01:23:45:67:89:ab")]
    pub node_mac_addr: Option<String>,

    /// This node's IPV4 address on the TAP subnet.
    #[arg(long, default_value = "10.0.0.4")]
    pub node_ip_addr: String,

    /// Maximum transmission unit for frames sent on the TAP interface.
    #[arg(long, default_value_t = 1500)]
    pub mtu: usize,
}

/// Validated, resolved configuration the stack coordinator is built from.
#[derive(Clone, Debug)]
pub struct StackConfig {
    pub tap_name: String,
    pub tap_addr: Ipv4Addr,
    pub tap_netmask: Ipv4Addr,
    pub node_mac_addr: Option<MacAddr>,
    pub node_ip_addr: IpV4Addr,
    pub mtu: usize,
}

impl StackConfig {
    /// Parses and validates CLI arguments, checking that the node's address actually falls
    /// inside the TAP interface's subnet - a stack addressed outside its own attached network
    /// cannot reach its gateway, so this is rejected up front rather than failing on first send.
    pub fn from_args(args: CliArgs) -> Result<Self, StackError> {
        let (tap_addr, prefix_len) = parse_cidr(&args.tap_addr)?;
        let tap_netmask = netmask_for_prefix(prefix_len);

        let node_ip_addr: Ipv4Addr = args
            .node_ip_addr
            .parse()
            .map_err(|_| StackError::InvalidConfig(format!("invalid node IP address: {}", args.node_ip_addr)))?;

        let node_mac_addr = args.node_mac_addr.as_deref().map(MacAddr::parse).transpose()?;

        let tap_network = u32::from(tap_addr) & u32::from(tap_netmask);
        let node_network = u32::from(node_ip_addr) & u32::from(tap_netmask);
        if tap_network != node_network {
            return Err(StackError::InvalidConfig(format!(
                "node address {node_ip_addr} is not on the TAP subnet {tap_addr}/{prefix_len}"
            )));
        }

        Ok(StackConfig {
            tap_name: args.tap_name,
            tap_addr,
            tap_netmask,
            node_mac_addr,
            node_ip_addr: node_ip_addr.into(),
            mtu: args.mtu,
        })
    }
}

fn parse_cidr(s: &str) -> Result<(Ipv4Addr, u32), StackError> {
    let (addr_part, prefix_part) = s
        .split_once('/')
        .ok_or_else(|| StackError::InvalidConfig(format!("expected address/prefix, got: {s}")))?;
    let addr: Ipv4Addr = addr_part
        .parse()
        .map_err(|_| StackError::InvalidConfig(format!("invalid address in {s}")))?;
    let prefix: u32 = prefix_part
        .parse()
        .map_err(|_| StackError::InvalidConfig(format!("invalid prefix length in {s}")))?;
    if prefix > 32 {
        return Err(StackError::InvalidConfig(format!("prefix length out of range in {s}")));
    }
    Ok((addr, prefix))
}

fn netmask_for_prefix(prefix_len: u32) -> Ipv4Addr {
    let mask: u32 = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len) };
    Ipv4Addr::from(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(tap_addr: &str, node_ip_addr: &str) -> CliArgs {
        CliArgs {
            tap_name: "tap0".into(),
            tap_addr: tap_addr.into(),
            node_mac_addr: None,
            node_ip_addr: node_ip_addr.into(),
            mtu: 1500,
        }
    }

    #[test]
    fn node_address_on_subnet_is_accepted() {
        let config = StackConfig::from_args(args("10.0.0.1/24", "10.0.0.2")).unwrap();
        assert_eq!(config.tap_netmask, Ipv4Addr::new(255, 255, 255, 0));
    }

    #[test]
    fn node_address_off_subnet_is_rejected() {
        assert!(StackConfig::from_args(args("10.0.0.1/24", "192.168.1.2")).is_err());
    }

    #[test]
    fn malformed_cidr_is_rejected() {
        assert!(StackConfig::from_args(args("10.0.0.1", "10.0.0.2")).is_err());
    }
}
