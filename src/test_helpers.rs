#![cfg(test)]

//! In-memory [`NodeShell`] for tests.
//!
//! [`FakeShell`] understands the handful of commands the lab issues and
//! keeps per-node kernel state the way the real tools would: sysctls,
//! `ip route replace`, `ip neigh flush/replace`, and OpenFlow rules on
//! switches. Pings succeed when a route exists in both directions and no
//! drop rule sits on the switch ports involved.

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use anyhow::{Context, Result, bail};
use ipnet::Ipv4Net;
use mac_address::MacAddress;
use network_sim::format_mac;

use crate::platform::NodeShell;
use crate::sysctl::IP_FORWARD;
use crate::topo::Topology;

/// Hops after which a packet is considered looping.
const MAX_HOPS: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeNeighbor {
    pub lladdr: MacAddress,
    pub permanent: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeRoute {
    pub via: Ipv4Addr,
    pub dev: String,
}

/// Kernel and switch state per node.
#[derive(Debug, Default)]
pub struct FakeState {
    /// Every command in order, as `(node, command)`.
    pub log: Vec<(String, String)>,
    pub sysctls: BTreeMap<(String, String), String>,
    pub routes: BTreeMap<String, BTreeMap<Ipv4Net, FakeRoute>>,
    /// Keyed by `(address, device)` like the kernel neighbor table.
    pub neighbors: BTreeMap<String, BTreeMap<(Ipv4Addr, String), FakeNeighbor>>,
    /// OpenFlow rules as given to `add-flow`, per switch.
    pub flows: BTreeMap<String, Vec<String>>,
}

impl FakeState {
    pub fn sysctl(&self, node: &str, key: &str) -> Option<&str> {
        self.sysctls
            .get(&(node.to_string(), key.to_string()))
            .map(String::as_str)
    }

    pub fn neighbors_of(&self, node: &str) -> Vec<(Ipv4Addr, String, FakeNeighbor)> {
        self.neighbors
            .get(node)
            .into_iter()
            .flatten()
            .map(|((ip, dev), n)| (*ip, dev.clone(), n.clone()))
            .collect()
    }

    pub fn commands_on(&self, node: &str) -> Vec<String> {
        self.log
            .iter()
            .filter(|(n, _)| n == node)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

pub struct FakeShell {
    topo: Topology,
    state: RefCell<FakeState>,
}

impl FakeShell {
    pub fn new(topo: &Topology) -> Self {
        Self {
            topo: topo.clone(),
            state: RefCell::new(FakeState::default()),
        }
    }

    pub fn state(&self) -> Ref<'_, FakeState> {
        self.state.borrow()
    }

    /// Add a learned (non-permanent) neighbor entry.
    pub fn seed_dynamic_neighbor(&self, node: &str, ip: Ipv4Addr, dev: &str) {
        self.state
            .borrow_mut()
            .neighbors
            .entry(node.to_string())
            .or_default()
            .insert(
                (ip, dev.to_string()),
                FakeNeighbor {
                    lladdr: MacAddress::new([0x02, 0xff, 0, 0, 0, 1]),
                    permanent: false,
                },
            );
    }

    /// Deterministic MAC: `02:00:00:00:00:NN` by endpoint declaration order.
    pub fn mac_of(&self, node: &str, intf: &str) -> Option<MacAddress> {
        self.topo
            .links()
            .iter()
            .flat_map(|l| l.endpoints())
            .position(|ep| ep.node == node && ep.intf == intf)
            .map(|i| MacAddress::new([0x02, 0, 0, 0, 0, (i + 1) as u8]))
    }

    fn owner_of(&self, ip: Ipv4Addr) -> Option<&str> {
        self.topo
            .links()
            .iter()
            .flat_map(|l| l.endpoints())
            .find(|ep| ep.addr() == Some(ip))
            .map(|ep| ep.node.as_str())
    }

    /// Follow the forwarding decisions from `src` until `dst` is on-link.
    fn routes_to(&self, state: &FakeState, src: &str, dst: Ipv4Addr) -> bool {
        let mut current = src.to_string();
        for _ in 0..MAX_HOPS {
            if self
                .topo
                .attached_subnets(&current)
                .iter()
                .any(|net| net.contains(&dst))
            {
                return self.owner_of(dst).is_some();
            }

            let node = match self.topo.node(&current) {
                Some(node) => node,
                None => return false,
            };
            let via = if node.kind.is_host() {
                node.default_route
            } else {
                if current != src && state.sysctl(&current, IP_FORWARD) != Some("1") {
                    return false;
                }
                state
                    .routes
                    .get(&current)
                    .into_iter()
                    .flatten()
                    .filter(|(net, _)| net.contains(&dst))
                    .max_by_key(|(net, _)| net.prefix_len())
                    .map(|(_, route)| route.via)
            };

            match via.and_then(|via| self.owner_of(via)) {
                Some(next) => {
                    // A router only forwards if forwarding is on
                    if self.topo.node(next).is_some_and(|n| n.kind.is_router())
                        && state.sysctl(next, IP_FORWARD) != Some("1")
                    {
                        return false;
                    }
                    current = next.to_string();
                }
                None => return false,
            }
        }
        false
    }

    /// Whether a drop rule sits on the switch port `node` is attached to.
    fn dropped_at_switch(&self, state: &FakeState, node: &str) -> bool {
        self.topo.endpoints_of(node).into_iter().any(|ep| {
            let Some(peer) = self.topo.peer(node, &ep.intf) else {
                return false;
            };
            let rule = format!("in_port={},actions=drop", peer.port);
            state
                .flows
                .get(&peer.node)
                .is_some_and(|flows| flows.contains(&rule))
        })
    }

    fn ping(&self, src: &str, dst: Ipv4Addr, count: u32) -> String {
        let state = self.state.borrow();
        let reachable = match (self.topo.primary_ip(src), self.owner_of(dst)) {
            (Some(src_ip), Some(dst_node)) => {
                self.routes_to(&state, src, dst)
                    && self.routes_to(&state, dst_node, src_ip)
                    && !self.dropped_at_switch(&state, src)
                    && !self.dropped_at_switch(&state, dst_node)
            }
            _ => false,
        };

        let mut out = format!("PING {dst} ({dst}) 56(84) bytes of data.\n");
        if reachable {
            for seq in 1..=count {
                out.push_str(&format!(
                    "64 bytes from {dst}: icmp_seq={seq} ttl=64 time=0.050 ms\n"
                ));
            }
        }
        out.push_str(&format!("\n--- {dst} ping statistics ---\n"));
        if reachable {
            out.push_str(&format!(
                "{count} packets transmitted, {count} received, 0% packet loss, time 0ms\n\
                 rtt min/avg/max/mdev = 0.050/0.050/0.050/0.000 ms\n"
            ));
        } else {
            out.push_str(&format!(
                "{count} packets transmitted, 0 received, 100% packet loss, time 0ms\n"
            ));
        }
        out
    }

    fn route_table(&self, node: &str) -> String {
        let state = self.state.borrow();
        let mut out = String::from(
            "Kernel IP routing table\n\
             Destination     Gateway         Genmask         Flags Metric Ref    Use Iface\n",
        );
        let row = |dst: Ipv4Addr, gw: Ipv4Addr, mask: Ipv4Addr, flags: &str, dev: &str| {
            format!("{dst:<16}{gw:<16}{mask:<16}{flags:<6}0      0        0 {dev}\n")
        };

        if let Some(gw) = self.topo.node(node).and_then(|n| n.default_route)
            && let Some(ep) = self
                .topo
                .endpoints_of(node)
                .into_iter()
                .find(|ep| ep.ip.is_some_and(|net| net.contains(&gw)))
        {
            out.push_str(&row(
                Ipv4Addr::UNSPECIFIED,
                gw,
                Ipv4Addr::UNSPECIFIED,
                "UG",
                &ep.intf,
            ));
        }
        for ep in self.topo.endpoints_of(node) {
            if let Some(net) = ep.subnet() {
                out.push_str(&row(
                    net.network(),
                    Ipv4Addr::UNSPECIFIED,
                    net.netmask(),
                    "U",
                    &ep.intf,
                ));
            }
        }
        for (net, route) in state.routes.get(node).into_iter().flatten() {
            out.push_str(&row(net.network(), route.via, net.netmask(), "UG", &route.dev));
        }
        out
    }

    fn arp_table(&self, node: &str) -> String {
        let state = self.state.borrow();
        let entries = state.neighbors_of(node);
        if entries.is_empty() {
            return String::new();
        }
        let mut out = String::from(
            "Address                  HWtype  HWaddress           Flags Mask            Iface\n",
        );
        for (ip, dev, n) in entries {
            let flags = if n.permanent { "CM" } else { "C" };
            out.push_str(&format!(
                "{:<25}ether   {:<20}{flags:<22}{dev}\n",
                ip.to_string(),
                format_mac(n.lladdr)
            ));
        }
        out
    }

    fn ofctl_show(&self, switch: &str) -> String {
        let mut out = String::from("OFPT_FEATURES_REPLY (xid=0x2): dpid:0000000000000001\n");
        out.push_str("n_tables:254, n_buffers:0\n");
        for ep in self.topo.endpoints_of(switch) {
            let mac = self.mac_of(switch, &ep.intf).map(format_mac).unwrap_or_default();
            out.push_str(&format!(" {}({}): addr:{mac}\n", ep.port, ep.intf));
        }
        out.push_str(&format!(" LOCAL({switch}): addr:02:00:00:00:00:ff\n"));
        out
    }

    fn ofctl_dump_flows(&self, switch: &str) -> String {
        let state = self.state.borrow();
        let mut out = String::from("NXST_FLOW reply (xid=0x4):\n");
        for rule in state.flows.get(switch).into_iter().flatten() {
            let (matches, actions) = rule
                .split_once(",actions=")
                .unwrap_or((rule.as_str(), ""));
            out.push_str(&format!(
                " cookie=0x0, duration=1.0s, table=0, n_packets=0, n_bytes=0, \
                 priority=32768,{matches} actions={actions}\n"
            ));
        }
        out.push_str(
            " cookie=0x0, duration=5.0s, table=0, n_packets=0, n_bytes=0, \
             priority=0 actions=NORMAL\n",
        );
        out
    }
}

impl NodeShell for FakeShell {
    fn cmd(&self, node: &str, command: &str) -> Result<String> {
        if self.topo.node(node).is_none() {
            bail!("unknown node '{node}'");
        }
        self.state
            .borrow_mut()
            .log
            .push((node.to_string(), command.to_string()));

        let words: Vec<&str> = command.split_whitespace().collect();
        let output = match words.as_slice() {
            ["sysctl", "-w", assignment] => {
                let (key, value) = assignment
                    .split_once('=')
                    .with_context(|| format!("bad sysctl '{assignment}'"))?;
                self.state
                    .borrow_mut()
                    .sysctls
                    .insert((node.to_string(), key.to_string()), value.to_string());
                format!("{key} = {value}\n")
            }
            ["ip", "route", "replace", prefix, "via", via, "dev", dev] => {
                let prefix: Ipv4Net = prefix.parse()?;
                let route = FakeRoute {
                    via: via.parse()?,
                    dev: dev.to_string(),
                };
                self.state
                    .borrow_mut()
                    .routes
                    .entry(node.to_string())
                    .or_default()
                    .insert(prefix.trunc(), route);
                String::new()
            }
            ["ip", "neigh", "flush", "dev", dev] => {
                if let Some(table) = self.state.borrow_mut().neighbors.get_mut(node) {
                    table.retain(|(_, d), n| n.permanent || d != dev);
                }
                String::new()
            }
            ["ip", "neigh", "replace", ip, "lladdr", mac, "dev", dev, "nud", nud] => {
                let lladdr: MacAddress = mac.parse()?;
                self.state
                    .borrow_mut()
                    .neighbors
                    .entry(node.to_string())
                    .or_default()
                    .insert(
                        (ip.parse()?, dev.to_string()),
                        FakeNeighbor {
                            lladdr,
                            permanent: *nud == "permanent",
                        },
                    );
                String::new()
            }
            ["ping", "-c", count, .., dst] => self.ping(node, dst.parse()?, count.parse()?),
            ["route", "-n"] => self.route_table(node),
            ["arp", "-n"] => self.arp_table(node),
            ["ovs-ofctl", "show", switch] => self.ofctl_show(switch),
            ["ovs-ofctl", "dump-flows", switch] => self.ofctl_dump_flows(switch),
            ["ovs-ofctl", "add-flow", switch, rule @ ..] => {
                let rule = rule.join(" ").trim_matches('"').to_string();
                self.state
                    .borrow_mut()
                    .flows
                    .entry(switch.to_string())
                    .or_default()
                    .push(rule);
                String::new()
            }
            [] => String::new(),
            [program, ..] => format!("sh: 1: {program}: not found\n"),
        };
        Ok(output)
    }

    fn intf_names(&self, node: &str) -> Result<Vec<String>> {
        if self.topo.node(node).is_none() {
            bail!("unknown node '{node}'");
        }
        Ok(self
            .topo
            .endpoints_of(node)
            .into_iter()
            .map(|ep| ep.intf.clone())
            .collect())
    }

    fn mac(&self, node: &str, intf: &str) -> Result<MacAddress> {
        self.mac_of(node, intf)
            .with_context(|| format!("no MAC for {node}:{intf}"))
    }
}
