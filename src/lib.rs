//! netlab: reproducible routing and switching lab experiments.
//!
//! A lab is a fixed [`Topology`] realized as network namespaces, veth
//! pairs and Open vSwitch bridges by [`EmulatedNetwork`]. Experiments
//! configure it through the [`NodeShell`] seam and write what they observe
//! into a plain-text report.

// Use mimalloc as the global allocator for tests (non-Windows only)
#[cfg(not(windows))]
#[cfg(test)]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod config;
pub mod experiments;
pub mod gate;
pub mod interrupt;
pub mod neigh;
pub mod net;
pub mod platform;
pub mod probe;
pub mod report;
pub mod routes;
pub mod session;
pub mod sysctl;
pub mod topo;

#[cfg(test)]
pub mod test_helpers;


pub use config::LabConfig;
pub use net::EmulatedNetwork;
pub use platform::NodeShell;
pub use topo::{Topology, TopologyError};
