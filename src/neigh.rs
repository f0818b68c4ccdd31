//! Static neighbor (ARP) entries.
//!
//! Pinning removes ARP negotiation from the picture so table dumps and
//! ping transcripts are the same on every run. Link-layer addresses are
//! read from the live interfaces, so pinning can only happen after the
//! network has been built.

use std::net::Ipv4Addr;

use anyhow::{Context, Result, bail};
use mac_address::MacAddress;
use network_sim::format_mac;
use tracing::info;

use crate::platform::NodeShell;
use crate::topo::Topology;

/// One `ip neigh` entry on a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NeighborEntry {
    pub ip: Ipv4Addr,
    pub lladdr: MacAddress,
    pub dev: String,
    pub permanent: bool,
}

impl NeighborEntry {
    pub fn command(&self) -> String {
        let nud = if self.permanent { "permanent" } else { "reachable" };
        format!(
            "ip neigh replace {} lladdr {} dev {} nud {nud}",
            self.ip,
            format_mac(self.lladdr),
            self.dev
        )
    }
}

/// A neighbor to pin on `node`, before its MAC is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NeighborPin {
    pub node: String,
    pub dev: String,
    pub ip: Ipv4Addr,
    pub peer_node: String,
    pub peer_intf: String,
}

/// For every addressed link between two non-switch nodes, each side pins
/// the other on its own interface. Grouped by node in declaration order.
pub fn plan_pins(topo: &Topology) -> Vec<NeighborPin> {
    let mut pins = Vec::new();
    for node in topo.nodes().iter().filter(|n| !n.kind.is_switch()) {
        for ep in topo.endpoints_of(&node.name) {
            let Some(peer) = topo.peer(&node.name, &ep.intf) else {
                continue;
            };
            let peer_is_switch = topo.node(&peer.node).is_some_and(|n| n.kind.is_switch());
            if peer_is_switch || ep.ip.is_none() {
                continue;
            }
            if let Some(ip) = peer.addr() {
                pins.push(NeighborPin {
                    node: node.name.clone(),
                    dev: ep.intf.clone(),
                    ip,
                    peer_node: peer.node.clone(),
                    peer_intf: peer.intf.clone(),
                });
            }
        }
    }
    pins
}

/// Reject entries that name an address not reachable at L2 from `node`
/// through `entry.dev`.
pub fn verify_directly_connected(
    topo: &Topology,
    node: &str,
    entry: &NeighborEntry,
) -> Result<()> {
    let ep = topo
        .endpoint(node, &entry.dev)
        .with_context(|| format!("{node} has no interface '{}'", entry.dev))?;
    let Some(subnet) = ep.subnet() else {
        bail!("{node}:{} carries no address", entry.dev);
    };
    if !subnet.contains(&entry.ip) || ep.addr() == Some(entry.ip) {
        bail!("{} is not a neighbor of {node} on {}", entry.ip, entry.dev);
    }

    let direct_peer = topo
        .peer(node, &entry.dev)
        .filter(|peer| topo.node(&peer.node).is_some_and(|n| !n.kind.is_switch()));
    if let Some(peer) = direct_peer
        && peer.addr() != Some(entry.ip)
    {
        bail!(
            "{} is not the peer of {node}:{} (that is {peer})",
            entry.ip,
            entry.dev
        );
    }
    Ok(())
}

/// Remove all dynamic neighbor entries on every interface of `node`.
pub fn flush_neighbors(shell: &dyn NodeShell, node: &str) -> Result<()> {
    for intf in shell.intf_names(node)? {
        shell.cmd(node, &format!("ip neigh flush dev {intf}"))?;
    }
    Ok(())
}

/// Flush router neighbor tables, then pin every planned neighbor.
///
/// MACs are resolved and every entry is verified before the first entry
/// is installed. Returns the installed entries keyed by node.
pub fn pin_neighbors(
    shell: &dyn NodeShell,
    topo: &Topology,
) -> Result<Vec<(String, NeighborEntry)>> {
    info!("*** Configuring static ARP entries");

    let mut entries = Vec::new();
    for pin in plan_pins(topo) {
        let lladdr = shell
            .mac(&pin.peer_node, &pin.peer_intf)
            .with_context(|| format!("read MAC of {}:{}", pin.peer_node, pin.peer_intf))?;
        let entry = NeighborEntry {
            ip: pin.ip,
            lladdr,
            dev: pin.dev,
            permanent: true,
        };
        verify_directly_connected(topo, &pin.node, &entry)?;
        entries.push((pin.node, entry));
    }

    for router in topo.routers() {
        flush_neighbors(shell, &router.name)?;
    }

    for (node, entry) in &entries {
        shell.cmd(node, &entry.command())?;
        info!("{node}: pinned {} on {}", entry.ip, entry.dev);
    }

    info!("*** ARP entries configured successfully");
    Ok(entries)
}
