//! Emulation platform for small lab topologies.
//!
//! Uses Linux network namespaces, veth pairs and Open vSwitch bridges to
//! stand up isolated hosts, routers and switches, and to run commands on
//! them.
//!
//! # Modules
//!
//! - [`topology`]: Namespace and veth management (RAII cleanup on drop)
//! - [`ovs`]: Open vSwitch bridges with pinned OpenFlow port numbers
//! - [`deps`]: Checks for root access and required system tools
//! - [`test_util`]: Privilege checks and unique name generation for tests

pub mod deps;
pub mod ovs;
pub mod test_util;
pub mod topology;

pub use deps::{SkipReason, check_binary, check_lab_deps, check_ovs_deps};
pub use mac_address::MacAddress;
pub use ovs::{FailMode, OvsBridge};
pub use test_util::{check_privileges, unique_ns_name};
pub use topology::{
    LinkInfo, MAX_IFACE_NAME, Namespace, VethPair, format_mac, parse_link_list, root_links,
    root_sh,
};
