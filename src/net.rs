//! A running emulated network built from a [`Topology`].
//!
//! Hosts and routers are network namespaces, switches are Open vSwitch
//! bridges in the root namespace, links are veth pairs. Everything is
//! released by [`EmulatedNetwork::stop`], which also runs on drop.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use mac_address::MacAddress;
use network_sim::{Namespace, OvsBridge, VethPair, root_links, root_sh};
use tracing::{debug, info, warn};

use crate::platform::NodeShell;
use crate::sysctl::SysctlSetting;
use crate::topo::{Endpoint, NodeKind, Topology};

/// How a topology is realized on this host.
#[derive(Clone, Debug)]
pub struct NetOptions {
    /// Prepended to node names to form namespace names.
    pub ns_prefix: String,
    /// Give hosts deterministic MACs `00:00:00:00:00:NN`.
    pub auto_set_macs: bool,
}

pub struct EmulatedNetwork {
    topo: Topology,
    namespaces: BTreeMap<String, Namespace>,
    bridges: BTreeMap<String, OvsBridge>,
    veths: Vec<VethPair>,
    stopped: bool,
}

impl EmulatedNetwork {
    /// Build and start `topo`. Any failure is fatal; resources created so
    /// far are released when the partial network is dropped.
    pub fn start(topo: &Topology, opts: &NetOptions) -> Result<Self> {
        topo.validate()
            .with_context(|| format!("invalid topology '{}'", topo.name))?;

        info!("*** Creating network");
        let mut net = Self {
            topo: topo.clone(),
            namespaces: BTreeMap::new(),
            bridges: BTreeMap::new(),
            veths: Vec::new(),
            stopped: false,
        };

        for node in topo.nodes() {
            match node.kind {
                NodeKind::Switch { fail_mode } => {
                    let bridge = OvsBridge::new(&node.name, fail_mode)?;
                    net.bridges.insert(node.name.clone(), bridge);
                }
                NodeKind::Host | NodeKind::Router => {
                    let ns = Namespace::new(&format!("{}{}", opts.ns_prefix, node.name))?;
                    net.namespaces.insert(node.name.clone(), ns);
                }
            }
        }

        let macs = if opts.auto_set_macs {
            auto_macs(topo)
        } else {
            BTreeMap::new()
        };

        info!("*** Adding links");
        for link in topo.links() {
            let pair = VethPair::new(&link.a.intf, &link.b.intf)?;
            net.veths.push(pair);
            for ep in link.endpoints() {
                let mac = (ep.port == 0).then(|| macs.get(&ep.node).copied()).flatten();
                net.attach(ep, mac)?;
            }
            debug!(a = %link.a, b = %link.b, "link up");
        }

        for host in topo.hosts() {
            if let Some(gw) = host.default_route {
                let gw = gw.to_string();
                net.namespace(&host.name)?
                    .exec_checked("ip", &["route", "replace", "default", "via", &gw])
                    .with_context(|| format!("default route of {}", host.name))?;
            }
        }

        for router in topo.routers() {
            net.cmd(&router.name, &SysctlSetting::forwarding(true).command())?;
        }

        info!("*** Network started");
        Ok(net)
    }

    fn attach(&self, ep: &Endpoint, mac: Option<MacAddress>) -> Result<()> {
        if let Some(ns) = self.namespaces.get(&ep.node) {
            ns.adopt(&ep.intf)?;
            let addr = ep.ip.map(|ip| ip.to_string());
            ns.configure_iface(&ep.intf, addr.as_deref(), mac)
        } else if let Some(bridge) = self.bridges.get(&ep.node) {
            bridge.add_port(&ep.intf, ep.port)
        } else {
            bail!("unknown node '{}'", ep.node)
        }
    }

    fn namespace(&self, node: &str) -> Result<&Namespace> {
        self.namespaces
            .get(node)
            .with_context(|| format!("'{node}' is not a namespaced node"))
    }

    pub fn topology(&self) -> &Topology {
        &self.topo
    }

    /// Tear the network down. Idempotent.
    ///
    /// Routers get forwarding switched off first, then bridges, links and
    /// namespaces are deleted.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        info!("*** Stopping network");
        let off = SysctlSetting::forwarding(false).command();
        for router in self.topo.routers() {
            if let Some(ns) = self.namespaces.get(&router.name)
                && let Err(e) = ns.sh(&off)
            {
                warn!(node = router.name, "failed to disable forwarding: {e:#}");
            }
        }

        self.bridges.clear();
        self.veths.clear();
        self.namespaces.clear();
        info!("*** Network stopped");
    }
}

impl Drop for EmulatedNetwork {
    fn drop(&mut self) {
        self.stop();
    }
}

impl NodeShell for EmulatedNetwork {
    fn cmd(&self, node: &str, command: &str) -> Result<String> {
        debug!(node, command, "cmd");
        if let Some(ns) = self.namespaces.get(node) {
            ns.sh(command)
        } else if self.bridges.contains_key(node) {
            // Switches live in the root namespace
            root_sh(command)
        } else {
            bail!("unknown node '{node}'")
        }
    }

    fn intf_names(&self, node: &str) -> Result<Vec<String>> {
        if let Some(ns) = self.namespaces.get(node) {
            Ok(ns
                .links()?
                .into_iter()
                .filter(|l| l.name != "lo")
                .map(|l| l.name)
                .collect())
        } else if let Some(bridge) = self.bridges.get(node) {
            bridge.ports()
        } else {
            bail!("unknown node '{node}'")
        }
    }

    fn mac(&self, node: &str, intf: &str) -> Result<MacAddress> {
        let links = match self.namespaces.get(node) {
            Some(ns) => ns.links()?,
            None if self.bridges.contains_key(node) => root_links()?,
            None => bail!("unknown node '{node}'"),
        };
        links
            .into_iter()
            .find(|l| l.name == intf)
            .and_then(|l| l.mac)
            .with_context(|| format!("no MAC for {node}:{intf}"))
    }
}

/// `00:00:00:00:00:NN` for the N-th host in declaration order.
pub fn auto_macs(topo: &Topology) -> BTreeMap<String, MacAddress> {
    topo.hosts()
        .enumerate()
        .map(|(i, host)| {
            let n = (i as u64 + 1).to_be_bytes();
            let mut bytes = [0u8; 6];
            bytes.copy_from_slice(&n[2..]);
            (host.name.clone(), MacAddress::new(bytes))
        })
        .collect()
}
