//! Static routes on router nodes.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::net::Ipv4Addr;

use anyhow::{Context, Result, bail};
use ipnet::Ipv4Net;
use tracing::info;

use crate::platform::NodeShell;
use crate::topo::Topology;

/// `prefix via next-hop dev egress`, installed with replace semantics.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct StaticRoute {
    pub prefix: Ipv4Net,
    pub via: Ipv4Addr,
    pub dev: String,
}

impl StaticRoute {
    pub fn new(prefix: Ipv4Net, via: Ipv4Addr, dev: &str) -> Self {
        Self {
            prefix: prefix.trunc(),
            via,
            dev: dev.to_string(),
        }
    }

    /// `ip route replace` overwrites an existing route for the exact prefix
    /// instead of adding a competing one.
    pub fn command(&self) -> String {
        format!(
            "ip route replace {} via {} dev {}",
            self.prefix, self.via, self.dev
        )
    }

    /// Reject routes whose egress or next hop is not directly connected on
    /// `node`, and routes for subnets the node is already attached to.
    pub fn verify(&self, topo: &Topology, node: &str) -> Result<()> {
        let ep = topo
            .endpoint(node, &self.dev)
            .with_context(|| format!("{node} has no interface '{}' for {self}", self.dev))?;
        let Some(subnet) = ep.subnet() else {
            bail!("{node}:{} carries no address, cannot route {self}", self.dev);
        };
        if !subnet.contains(&self.via) || ep.addr() == Some(self.via) {
            bail!("next hop {} is not a neighbor on {node}:{}", self.via, self.dev);
        }
        if topo.attached_subnets(node).contains(&self.prefix) {
            bail!("{} is directly attached to {node}", self.prefix);
        }
        Ok(())
    }
}

impl fmt::Display for StaticRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {} dev {}", self.prefix, self.via, self.dev)
    }
}

/// Static routes per router, keyed by node name.
pub type RouteTable = BTreeMap<String, Vec<StaticRoute>>;

/// Install `routes` on `node`. Every route is verified before the first
/// command is issued.
pub fn install_routes(
    shell: &dyn NodeShell,
    topo: &Topology,
    node: &str,
    routes: &[StaticRoute],
) -> Result<()> {
    for route in routes {
        route.verify(topo, node)?;
    }
    for route in routes {
        shell.cmd(node, &route.command())?;
        info!("{node}: Added route to {route}");
    }
    Ok(())
}

/// Compute the minimal static routes for every router.
///
/// Each router gets exactly one route per subnet it is not attached to,
/// through the first hop towards the nearest router that is attached to
/// it. Routers are explored breadth-first over router-to-router links.
pub fn derive_static_routes(topo: &Topology) -> RouteTable {
    let routers: Vec<&str> = topo.routers().map(|n| n.name.as_str()).collect();

    // router -> [(neighbor router, next hop address, local egress)]
    let mut adjacency: BTreeMap<&str, Vec<(&str, Ipv4Addr, &str)>> = BTreeMap::new();
    for link in topo.links() {
        for (local, remote) in [(&link.a, &link.b), (&link.b, &link.a)] {
            if routers.contains(&local.node.as_str())
                && routers.contains(&remote.node.as_str())
                && let Some(via) = remote.addr()
            {
                adjacency
                    .entry(local.node.as_str())
                    .or_default()
                    .push((remote.node.as_str(), via, local.intf.as_str()));
            }
        }
    }

    let all_subnets: Vec<Ipv4Net> = {
        let mut subnets: Vec<Ipv4Net> = topo
            .links()
            .iter()
            .flat_map(|l| l.endpoints())
            .filter_map(|ep| ep.subnet())
            .collect();
        subnets.sort();
        subnets.dedup();
        subnets
    };

    let mut table = RouteTable::new();
    for &router in &routers {
        // BFS: visit order plus the first hop used to reach each router.
        let mut first_hop: BTreeMap<&str, Option<(Ipv4Addr, &str)>> = BTreeMap::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([router]);
        first_hop.insert(router, None);

        while let Some(current) = queue.pop_front() {
            order.push(current);
            let hop_here = first_hop[current];
            for &(next, via, dev) in adjacency.get(current).into_iter().flatten() {
                if first_hop.contains_key(next) {
                    continue;
                }
                first_hop.insert(next, hop_here.or(Some((via, dev))));
                queue.push_back(next);
            }
        }

        let attached = topo.attached_subnets(router);
        let routes: Vec<StaticRoute> = all_subnets
            .iter()
            .filter(|subnet| !attached.contains(*subnet))
            .filter_map(|subnet| {
                order
                    .iter()
                    .find(|r| topo.attached_subnets(r).contains(subnet))
                    .and_then(|r| first_hop[r])
                    .map(|(via, dev)| StaticRoute::new(*subnet, via, dev))
            })
            .collect();

        table.insert(router.to_string(), routes);
    }

    table
}
