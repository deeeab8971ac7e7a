//! Internet layer: routing table and longest-prefix-match lookup.
//!
//! A single table holds both directly-connected subnets and a default gateway; IPv4 egress
//! consults it to decide which next-hop IP address to ARP for before handing a frame to the link
//! layer. See [`crate::ip`] for the caller.

use crate::IpV4Addr;

/// A route's flags, a subset of the conventional `{UP, LOOPBACK, GATEWAY, HOST, REJECT}` set
/// reported by `netstat -rn`/`route`. `gateway` is the one egress actually consults: it decides
/// whether to ARP for this entry's `gateway` address or for the destination itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouteFlags {
    /// Route is active and usable.
    pub up: bool,
    /// Destination is this host itself.
    pub loopback: bool,
    /// Reachable via a gateway rather than directly on-link; egress ARPs for `gateway` instead of
    /// the packet's destination address when this is set.
    pub gateway: bool,
    /// Route matches a single host rather than a subnet.
    pub host: bool,
    /// Matching destinations are unreachable and should be dropped rather than forwarded.
    pub reject: bool,
}

impl RouteFlags {
    /// A plain active on-link route: reachable directly, no gateway hop.
    pub const UP: RouteFlags = RouteFlags { up: true, loopback: false, gateway: false, host: false, reject: false };
    /// An active route reached via a gateway, e.g. the default route.
    pub const GATEWAY: RouteFlags = RouteFlags { up: true, loopback: false, gateway: true, host: false, reject: false };
}

/// One routing table entry: "destinations matching `dst & netmask == dst_network & netmask` are
/// reachable via `gateway` over `iface`, subject to `flags`".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    /// Network address this entry matches against, after masking.
    pub dst_network: IpV4Addr,
    /// Subnet mask; longer (more specific) masks are preferred by [`RouteTable::lookup`].
    pub netmask: IpV4Addr,
    /// Next-hop IP address to ARP for when `flags.gateway` is set; otherwise ignored, since
    /// on-link routes ARP for the destination address itself.
    pub gateway: IpV4Addr,
    /// Name of the outbound interface; informational, since this stack has exactly one.
    pub iface: String,
    /// This entry's flags; see [`RouteFlags`].
    pub flags: RouteFlags,
}

/// Ordered set of [`RouteEntry`] rows, consulted by longest-prefix match.
///
/// Entries are kept sorted by netmask length descending so the most specific match is always
/// checked first; rows with an equally specific mask keep their relative insertion order, so the
/// first one added wins ties, matching standard routing table semantics.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// Builds an empty table.
    pub fn new() -> Self {
        RouteTable { entries: Vec::new() }
    }

    /// Builds a table with a single default route (netmask `0.0.0.0`) via `gateway`, flagged
    /// `GATEWAY` per the default route's conventional flag set.
    pub fn with_default_gateway(gateway: IpV4Addr, iface: impl Into<String>) -> Self {
        let mut table = RouteTable::new();
        table.add(RouteEntry {
            dst_network: IpV4Addr::ANY,
            netmask: IpV4Addr::ANY,
            gateway,
            iface: iface.into(),
            flags: RouteFlags::GATEWAY,
        });
        table
    }

    /// Inserts `entry`, keeping entries sorted by netmask length (most specific first). A `Vec`'s
    /// `sort_by_key` is stable, so equally specific entries keep insertion order as their tie
    /// break.
    pub fn add(&mut self, entry: RouteEntry) {
        self.entries.push(entry);
        self.entries
            .sort_by_key(|e| std::cmp::Reverse(e.netmask.to_u32().count_ones()));
    }

    /// Finds the most specific entry matching `dst`, comparing masked addresses for *equality*
    /// rather than testing the masked result for truthiness - a bitwise-AND-is-nonzero test would
    /// wrongly match any destination whose masked bits happen to be nonzero instead of requiring
    /// them to equal the configured network.
    pub fn lookup(&self, dst: IpV4Addr) -> Option<&RouteEntry> {
        self.entries
            .iter()
            .find(|entry| dst.mask(&entry.netmask) == entry.dst_network.mask(&entry.netmask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn more_specific_route_wins() {
        let mut table = RouteTable::with_default_gateway(IpV4Addr::new([10, 0, 0, 1]), "tap0");
        table.add(RouteEntry {
            dst_network: IpV4Addr::new([10, 0, 0, 0]),
            netmask: IpV4Addr::new([255, 255, 255, 0]),
            gateway: IpV4Addr::new([10, 0, 0, 0]),
            iface: "tap0".into(),
            flags: RouteFlags::UP,
        });

        let matched = table.lookup(IpV4Addr::new([10, 0, 0, 42])).unwrap();
        assert_eq!(matched.netmask, IpV4Addr::new([255, 255, 255, 0]));
        assert!(!matched.flags.gateway);
    }

    #[test]
    fn falls_back_to_default_route() {
        let table = RouteTable::with_default_gateway(IpV4Addr::new([10, 0, 0, 1]), "tap0");
        let matched = table.lookup(IpV4Addr::new([8, 8, 8, 8])).unwrap();
        assert_eq!(matched.gateway, IpV4Addr::new([10, 0, 0, 1]));
        assert!(matched.flags.gateway);
    }

    #[test]
    fn equality_match_rejects_false_positive_that_bitand_truthiness_would_accept() {
        // dst 10.0.0.5 & netmask 0.0.0.255 = 0.0.0.5, nonzero, but does not equal the configured
        // network 0.0.0.0 under that mask - a bitwise-truthy test would wrongly match this route.
        let mut table = RouteTable::new();
        table.add(RouteEntry {
            dst_network: IpV4Addr::new([0, 0, 0, 0]),
            netmask: IpV4Addr::new([0, 0, 0, 255]),
            gateway: IpV4Addr::new([10, 0, 0, 1]),
            iface: "tap0".into(),
            flags: RouteFlags::GATEWAY,
        });
        assert!(table.lookup(IpV4Addr::new([10, 0, 0, 5])).is_none());
    }

    #[test]
    fn ties_break_on_insertion_order() {
        let mut table = RouteTable::new();
        table.add(RouteEntry {
            dst_network: IpV4Addr::new([10, 0, 0, 0]),
            netmask: IpV4Addr::new([255, 255, 255, 0]),
            gateway: IpV4Addr::new([10, 0, 0, 1]),
            iface: "first".into(),
            flags: RouteFlags::UP,
        });
        table.add(RouteEntry {
            dst_network: IpV4Addr::new([10, 0, 0, 0]),
            netmask: IpV4Addr::new([255, 255, 255, 0]),
            gateway: IpV4Addr::new([10, 0, 0, 2]),
            iface: "second".into(),
            flags: RouteFlags::UP,
        });
        let matched = table.lookup(IpV4Addr::new([10, 0, 0, 42])).unwrap();
        assert_eq!(matched.iface, "first");
    }
}
