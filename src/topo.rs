//! Declarative lab topologies: nodes, links and per-interface addressing.
//!
//! A [`Topology`] only describes the network. [`crate::net::EmulatedNetwork`]
//! turns it into namespaces, veth pairs and bridges.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use network_sim::{FailMode, MAX_IFACE_NAME};
use serde::{Serialize, Serializer};

/// Role of a node in the lab.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Host,
    /// A namespace with IPv4 forwarding enabled.
    Router,
    /// An Open vSwitch bridge in the root namespace.
    Switch {
        #[serde(serialize_with = "serialize_fail_mode")]
        fail_mode: FailMode,
    },
}

impl NodeKind {
    /// First port number handed out on this kind of node.
    ///
    /// Switch ports start at 1 so interface `sN-ethK` is OpenFlow port K.
    pub const fn port_base(self) -> u16 {
        match self {
            NodeKind::Switch { .. } => 1,
            NodeKind::Host | NodeKind::Router => 0,
        }
    }

    pub const fn is_switch(self) -> bool {
        matches!(self, NodeKind::Switch { .. })
    }

    pub const fn is_router(self) -> bool {
        matches!(self, NodeKind::Router)
    }

    pub const fn is_host(self) -> bool {
        matches!(self, NodeKind::Host)
    }
}

fn serialize_fail_mode<S: Serializer>(mode: &FailMode, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(mode.as_str())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    /// Host address, applied to the host's first interface when the link
    /// does not give one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ipv4Net>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_route: Option<Ipv4Addr>,
}

/// One side of a link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub node: String,
    pub intf: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ipv4Net>,
}

impl Endpoint {
    pub fn addr(&self) -> Option<Ipv4Addr> {
        self.ip.map(|net| net.addr())
    }

    /// The attached subnet, host bits cleared.
    pub fn subnet(&self) -> Option<Ipv4Net> {
        self.ip.map(|net| net.trunc())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            Some(ip) => write!(f, "{}:{} ({ip})", self.node, self.intf),
            None => write!(f, "{}:{}", self.node, self.intf),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Link {
    pub a: Endpoint,
    pub b: Endpoint,
}

impl Link {
    pub fn endpoints(&self) -> [&Endpoint; 2] {
        [&self.a, &self.b]
    }

    /// The far side of the link as seen from `node`/`intf`.
    pub fn peer_of(&self, node: &str, intf: &str) -> Option<&Endpoint> {
        if self.a.node == node && self.a.intf == intf {
            Some(&self.b)
        } else if self.b.node == node && self.b.intf == intf {
            Some(&self.a)
        } else {
            None
        }
    }
}

/// Per-link options. Unset names and addresses fall back to the
/// `<node>-eth<port>` convention and the host address respectively.
#[derive(Clone, Debug, Default)]
pub struct LinkOpts {
    pub intf1: Option<String>,
    pub intf2: Option<String>,
    pub ip1: Option<Ipv4Net>,
    pub ip2: Option<Ipv4Net>,
}

impl LinkOpts {
    pub fn named(intf1: &str, intf2: &str) -> Self {
        Self {
            intf1: Some(intf1.to_string()),
            intf2: Some(intf2.to_string()),
            ..Default::default()
        }
    }

    pub fn addressed(mut self, ip1: Ipv4Net, ip2: Ipv4Net) -> Self {
        self.ip1 = Some(ip1);
        self.ip2 = Some(ip2);
        self
    }
}

/// Declaration errors caught before anything touches the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    DuplicateNode(String),
    UnknownNode(String),
    SelfLink(String),
    InvalidInterfaceName { node: String, intf: String },
    DuplicateInterface { node: String, intf: String },
    SubnetMismatch { a: String, b: String },
    DuplicateAddress(Ipv4Addr),
    UnreachableGateway { node: String, gateway: Ipv4Addr },
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyError::DuplicateNode(n) => write!(f, "node '{n}' declared twice"),
            TopologyError::UnknownNode(n) => write!(f, "link references unknown node '{n}'"),
            TopologyError::SelfLink(n) => write!(f, "node '{n}' is linked to itself"),
            TopologyError::InvalidInterfaceName { node, intf } => write!(
                f,
                "interface '{intf}' on '{node}' must be 1..={MAX_IFACE_NAME} bytes"
            ),
            TopologyError::DuplicateInterface { node, intf } => {
                write!(f, "interface '{intf}' used twice on '{node}'")
            }
            TopologyError::SubnetMismatch { a, b } => {
                write!(f, "link endpoints {a} and {b} are not in the same subnet")
            }
            TopologyError::DuplicateAddress(ip) => write!(f, "address {ip} assigned twice"),
            TopologyError::UnreachableGateway { node, gateway } => write!(
                f,
                "default route of '{node}' via {gateway} is not on an attached subnet"
            ),
        }
    }
}

impl std::error::Error for TopologyError {}

/// A fixed set of node and link declarations.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Topology {
    pub name: String,
    nodes: Vec<Node>,
    links: Vec<Link>,
    #[serde(skip)]
    next_port: BTreeMap<String, u16>,
}

impl Topology {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn add_host(
        &mut self,
        name: &str,
        ip: Option<Ipv4Net>,
        default_route: Option<Ipv4Addr>,
    ) -> &mut Self {
        self.push_node(name, NodeKind::Host, ip, default_route)
    }

    pub fn add_router(&mut self, name: &str) -> &mut Self {
        self.push_node(name, NodeKind::Router, None, None)
    }

    pub fn add_switch(&mut self, name: &str, fail_mode: FailMode) -> &mut Self {
        self.push_node(name, NodeKind::Switch { fail_mode }, None, None)
    }

    fn push_node(
        &mut self,
        name: &str,
        kind: NodeKind,
        ip: Option<Ipv4Net>,
        default_route: Option<Ipv4Addr>,
    ) -> &mut Self {
        self.nodes.push(Node {
            name: name.to_string(),
            kind,
            ip,
            default_route,
        });
        self
    }

    /// Connect `n1` and `n2`. Each side consumes the next port number of
    /// its node, even when the interface name is given explicitly.
    pub fn add_link(&mut self, n1: &str, n2: &str, opts: LinkOpts) -> Result<&Link, TopologyError> {
        let a = self.next_endpoint(n1, opts.intf1, opts.ip1)?;
        let b = self.next_endpoint(n2, opts.intf2, opts.ip2)?;
        self.links.push(Link { a, b });
        Ok(&self.links[self.links.len() - 1])
    }

    fn next_endpoint(
        &mut self,
        node: &str,
        intf: Option<String>,
        ip: Option<Ipv4Net>,
    ) -> Result<Endpoint, TopologyError> {
        let decl = self
            .node(node)
            .ok_or_else(|| TopologyError::UnknownNode(node.to_string()))?;
        let base = decl.kind.port_base();
        let host_ip = decl.kind.is_host().then_some(decl.ip).flatten();

        let counter = self.next_port.entry(node.to_string()).or_insert(base);
        let port = *counter;
        *counter += 1;

        let ip = match ip {
            Some(ip) => Some(ip),
            None if port == base => host_ip,
            None => None,
        };

        Ok(Endpoint {
            node: node.to_string(),
            intf: intf.unwrap_or_else(|| format!("{node}-eth{port}")),
            port,
            ip,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.kind.is_host())
    }

    pub fn routers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.kind.is_router())
    }

    /// Interfaces of `node` in port order.
    pub fn endpoints_of(&self, node: &str) -> Vec<&Endpoint> {
        let mut eps: Vec<&Endpoint> = self
            .links
            .iter()
            .flat_map(Link::endpoints)
            .filter(|ep| ep.node == node)
            .collect();
        eps.sort_by_key(|ep| ep.port);
        eps
    }

    pub fn endpoint(&self, node: &str, intf: &str) -> Option<&Endpoint> {
        self.links
            .iter()
            .flat_map(Link::endpoints)
            .find(|ep| ep.node == node && ep.intf == intf)
    }

    pub fn peer(&self, node: &str, intf: &str) -> Option<&Endpoint> {
        self.links.iter().find_map(|l| l.peer_of(node, intf))
    }

    pub fn port_number(&self, node: &str, intf: &str) -> Option<u16> {
        self.endpoint(node, intf).map(|ep| ep.port)
    }

    /// Subnets directly attached to `node`.
    pub fn attached_subnets(&self, node: &str) -> BTreeSet<Ipv4Net> {
        self.endpoints_of(node)
            .into_iter()
            .filter_map(Endpoint::subnet)
            .collect()
    }

    /// First address of `node`, used to stand in for its name.
    pub fn primary_ip(&self, node: &str) -> Option<Ipv4Addr> {
        self.endpoints_of(node)
            .into_iter()
            .find_map(Endpoint::addr)
            .or_else(|| self.node(node).and_then(|n| n.ip).map(|ip| ip.addr()))
    }

    /// Check the declarations for mistakes the kernel would only report
    /// halfway through building the network, or not at all.
    pub fn validate(&self) -> Result<(), TopologyError> {
        let mut names = BTreeSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return Err(TopologyError::DuplicateNode(node.name.clone()));
            }
        }

        let mut intfs = BTreeSet::new();
        let mut addrs = BTreeSet::new();
        for link in &self.links {
            if link.a.node == link.b.node {
                return Err(TopologyError::SelfLink(link.a.node.clone()));
            }
            for ep in link.endpoints() {
                if !names.contains(ep.node.as_str()) {
                    return Err(TopologyError::UnknownNode(ep.node.clone()));
                }
                if ep.intf.is_empty() || ep.intf.len() > MAX_IFACE_NAME {
                    return Err(TopologyError::InvalidInterfaceName {
                        node: ep.node.clone(),
                        intf: ep.intf.clone(),
                    });
                }
                if !intfs.insert((ep.node.as_str(), ep.intf.as_str())) {
                    return Err(TopologyError::DuplicateInterface {
                        node: ep.node.clone(),
                        intf: ep.intf.clone(),
                    });
                }
                if let Some(addr) = ep.addr()
                    && !addrs.insert(addr)
                {
                    return Err(TopologyError::DuplicateAddress(addr));
                }
            }
            if let (Some(sa), Some(sb)) = (link.a.subnet(), link.b.subnet())
                && sa != sb
            {
                return Err(TopologyError::SubnetMismatch {
                    a: link.a.to_string(),
                    b: link.b.to_string(),
                });
            }
        }

        for node in &self.nodes {
            if let Some(gateway) = node.default_route
                && !self
                    .attached_subnets(&node.name)
                    .iter()
                    .any(|net| net.contains(&gateway))
            {
                return Err(TopologyError::UnreachableGateway {
                    node: node.name.clone(),
                    gateway,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    fn star() -> Topology {
        let mut topo = Topology::new("star");
        topo.add_switch("s1", FailMode::Standalone)
            .add_host("h1", Some(net("10.0.0.1/24")), None)
            .add_host("h2", Some(net("10.0.0.2/24")), None);
        topo.add_link("h1", "s1", LinkOpts::default()).unwrap();
        topo.add_link("h2", "s1", LinkOpts::default()).unwrap();
        topo
    }

    #[test]
    fn switch_ports_start_at_one() {
        let topo = star();
        let ports: Vec<_> = topo
            .endpoints_of("s1")
            .iter()
            .map(|ep| (ep.intf.clone(), ep.port))
            .collect();
        assert_eq!(
            ports,
            vec![("s1-eth1".to_string(), 1), ("s1-eth2".to_string(), 2)]
        );
        assert_eq!(topo.endpoints_of("h1")[0].intf, "h1-eth0");
    }

    #[test]
    fn host_ip_lands_on_first_interface() {
        let topo = star();
        let h2 = topo.endpoint("h2", "h2-eth0").unwrap();
        assert_eq!(h2.ip, Some(net("10.0.0.2/24")));
        assert_eq!(topo.peer("h2", "h2-eth0").unwrap().intf, "s1-eth2");
        assert_eq!(topo.primary_ip("h2"), Some("10.0.0.2".parse().unwrap()));
        assert!(topo.validate().is_ok());
    }

    #[test]
    fn explicit_names_still_consume_ports() {
        let mut topo = Topology::new("t");
        topo.add_router("r1").add_router("r2").add_router("r3");
        topo.add_link("r1", "r2", LinkOpts::named("up", "down")).unwrap();
        topo.add_link("r1", "r3", LinkOpts::default()).unwrap();
        assert_eq!(topo.endpoints_of("r1")[1].intf, "r1-eth1");
        assert_eq!(topo.port_number("r1", "up"), Some(0));
    }

    #[test]
    fn unknown_node_is_rejected() {
        let mut topo = Topology::new("t");
        topo.add_router("r1");
        let err = topo.add_link("r1", "ghost", LinkOpts::default()).unwrap_err();
        assert_eq!(err, TopologyError::UnknownNode("ghost".into()));
    }

    #[test]
    fn duplicate_node_is_rejected() {
        let mut topo = Topology::new("t");
        topo.add_router("r1").add_router("r1");
        assert_eq!(
            topo.validate(),
            Err(TopologyError::DuplicateNode("r1".into()))
        );
    }

    #[test]
    fn subnet_mismatch_is_rejected() {
        let mut topo = Topology::new("t");
        topo.add_router("r1").add_router("r2");
        topo.add_link(
            "r1",
            "r2",
            LinkOpts::default().addressed(net("10.0.1.1/24"), net("10.0.2.2/24")),
        )
        .unwrap();
        assert!(matches!(
            topo.validate(),
            Err(TopologyError::SubnetMismatch { .. })
        ));
    }

    #[test]
    fn long_interface_name_is_rejected() {
        let mut topo = Topology::new("t");
        topo.add_router("r1").add_router("r2");
        topo.add_link("r1", "r2", LinkOpts::named("a-very-long-ifname", "ok"))
            .unwrap();
        assert!(matches!(
            topo.validate(),
            Err(TopologyError::InvalidInterfaceName { .. })
        ));
    }

    #[test]
    fn gateway_must_be_attached() {
        let mut topo = Topology::new("t");
        topo.add_host(
            "h1",
            Some(net("10.0.0.3/24")),
            Some("10.9.9.1".parse().unwrap()),
        )
        .add_router("r1");
        topo.add_link("h1", "r1", LinkOpts::default()).unwrap();
        let err = topo.validate().unwrap_err();
        assert!(err.to_string().contains("10.9.9.1"));
    }

    #[test]
    fn serializes_to_json() {
        let json = serde_json::to_value(star()).unwrap();
        assert_eq!(json["name"], "star");
        assert_eq!(json["nodes"][0]["kind"]["switch"]["fail_mode"], "standalone");
        assert_eq!(json["links"][1]["b"]["intf"], "s1-eth2");
        assert!(json.get("next_port").is_none());
    }
}
