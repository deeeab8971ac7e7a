//! `tapstackd`: attaches to a host TAP device and runs the user-space stack until interrupted.

use clap::Parser;
use log::{error, info};

use tapstack::config::{CliArgs, StackConfig};
use tapstack::stack::Stack;
use tapstack::tap::{LinuxTap, Tap};
use tapstack::StackError;

fn main() {
    env_logger::init();

    if let Err(err) = run() {
        error!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), StackError> {
    let args = CliArgs::parse();
    let config = StackConfig::from_args(args)?;

    let tap = LinuxTap::open(&config.tap_name, config.tap_addr, config.tap_netmask, config.mtu)?;
    let local_mac = config.node_mac_addr.unwrap_or_else(|| tap.hardware_address());
    info!("attached to {} ({}) with hardware address {local_mac}", config.tap_name, config.node_ip_addr);

    let mut stack = Stack::new(Box::new(tap), &config, local_mac);
    stack.spawn_tap_reader()?;
    stack.run()
}
