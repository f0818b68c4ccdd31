//! The two lab procedures.
//!
//! Each experiment declares a fixed topology, configures it through a
//! [`crate::platform::NodeShell`] and records what it observes into a
//! [`crate::report::Report`]. `run` wires the procedure to a real
//! [`crate::net::EmulatedNetwork`] and always tears it down afterwards,
//! including when the run is interrupted by a signal.

use std::io;

use anyhow::{Context, Result};
use ipnet::Ipv4Net;
use tracing::info;

use crate::platform::NodeShell;
use crate::session;
use crate::topo::Topology;

pub mod ip_routing;
pub mod l2_switch;

pub(crate) fn cidr(s: &str) -> Result<Ipv4Net> {
    s.parse().with_context(|| format!("invalid address '{s}'"))
}

/// Hand the terminal to the operator until `exit` or EOF.
pub(crate) async fn interactive(shell: &dyn NodeShell, topo: &Topology) -> Result<()> {
    info!("*** Starting CLI (type \"exit\" to quit)");
    let lines = session::read_lines(|| io::stdin().lock());
    session::run(shell, topo, lines, io::stdout()).await
}
