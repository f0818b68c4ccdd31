//! Experiment 1: static IP routing between three hosts over two routers.
//!
//! ```text
//!  h1 -- r1 -- r2 -- h3
//!        |
//!        h2
//! ```

use std::io::Write;
use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use ipnet::Ipv4Net;
use tracing::info;

use super::cidr;
use crate::config::LabConfig;
use crate::interrupt::{Interrupts, until_interrupted};
use crate::neigh;
use crate::net::EmulatedNetwork;
use crate::platform::NodeShell;
use crate::probe::Probe;
use crate::report::{self, Report};
use crate::routes::{self, RouteTable, StaticRoute};
use crate::sysctl::{self, RouterTuning};
use crate::topo::{LinkOpts, Topology};

pub const REPORT_TITLE: &str = "Experiment 1: IP Routing - Ping Test Results";
pub const DEFAULT_OUTPUT: &str = "result1.txt";

pub const ROUTERS: [&str; 2] = ["r1", "r2"];

/// Probe battery, in report order.
pub const PROBES: [(&str, &str); 4] = [("h1", "h3"), ("h2", "h3"), ("h3", "h1"), ("h3", "h2")];

/// Nodes whose neighbor tables are dumped, in report order.
pub const ARP_NODES: [&str; 5] = ["h1", "h2", "h3", "r1", "r2"];

const H1_LAN: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::new(10, 0, 0, 0), 24);
const H3_LAN: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::new(10, 0, 2, 0), 24);
const H2_LAN: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::new(10, 0, 3, 0), 24);

pub fn topology() -> Result<Topology> {
    let mut topo = Topology::new("ip-routing");
    topo.add_router("r1")
        .add_router("r2")
        .add_host("h1", Some(cidr("10.0.0.3/24")?), Some(Ipv4Addr::new(10, 0, 0, 1)))
        .add_host("h2", Some(cidr("10.0.3.2/24")?), Some(Ipv4Addr::new(10, 0, 3, 4)))
        .add_host("h3", Some(cidr("10.0.2.2/24")?), Some(Ipv4Addr::new(10, 0, 2, 1)));

    let links = [
        ("h1", "r1", "h1-eth0", "r1-eth0", "10.0.0.3/24", "10.0.0.1/24"),
        ("r1", "r2", "r1-eth1", "r2-eth0", "10.0.1.1/24", "10.0.1.2/24"),
        ("r2", "h3", "r2-eth1", "h3-eth0", "10.0.2.1/24", "10.0.2.2/24"),
        ("h2", "r1", "h2-eth0", "r1-eth2", "10.0.3.2/24", "10.0.3.4/24"),
    ];
    for (n1, n2, intf1, intf2, ip1, ip2) in links {
        let opts = LinkOpts::named(intf1, intf2).addressed(cidr(ip1)?, cidr(ip2)?);
        topo.add_link(n1, n2, opts)?;
    }

    topo.validate()?;
    Ok(topo)
}

/// The lab's hand-written routing table.
pub fn static_routes() -> RouteTable {
    let r1_to_r2 = Ipv4Addr::new(10, 0, 1, 2);
    let r2_to_r1 = Ipv4Addr::new(10, 0, 1, 1);
    RouteTable::from([
        (
            "r1".to_string(),
            vec![StaticRoute::new(H3_LAN, r1_to_r2, "r1-eth1")],
        ),
        (
            "r2".to_string(),
            vec![
                StaticRoute::new(H1_LAN, r2_to_r1, "r2-eth0"),
                StaticRoute::new(H2_LAN, r2_to_r1, "r2-eth0"),
            ],
        ),
    ])
}

/// Install the routing table on both routers.
pub fn configure_routes(shell: &dyn NodeShell, topo: &Topology) -> Result<()> {
    info!("*** Configuring routes");
    for (router, table) in static_routes() {
        routes::install_routes(shell, topo, &router, &table)?;
    }
    info!("*** Routes configured successfully");
    Ok(())
}

/// Tune router kernels, then install routes and pin neighbors. Safe to
/// repeat: every step replaces rather than adds.
pub fn configure(shell: &dyn NodeShell, topo: &Topology, tuning: &RouterTuning) -> Result<()> {
    for router in ROUTERS {
        sysctl::tune_router(shell, router, tuning)
            .with_context(|| format!("tune {router}"))?;
    }
    info!("*** Router sysctls applied");

    for router in ROUTERS {
        neigh::flush_neighbors(shell, router)?;
    }
    configure_routes(shell, topo)?;
    neigh::pin_neighbors(shell, topo)?;
    Ok(())
}

/// Run the probe battery and dump routing and neighbor tables into
/// `report`. Probe failures are recorded, not raised.
pub fn write_report<W: Write>(
    shell: &dyn NodeShell,
    topo: &Topology,
    report: &mut Report<W>,
    ping_count: u32,
) -> Result<()> {
    info!("*** Running ping tests");
    report.header(REPORT_TITLE)?;

    for (i, (src, dst)) in PROBES.into_iter().enumerate() {
        let probe = Probe::between(topo, src, dst)?;
        let src_ip = topo
            .primary_ip(src)
            .with_context(|| format!("probe source '{src}' has no address"))?;
        if i > 0 {
            report.write("\n")?;
        }
        let label = format!("Test {}: {src} ({src_ip}) to {dst} ({})", i + 1, probe.dst_ip);
        report.block(&label, &probe.run(shell, ping_count)?)?;
    }

    report.banner("Routing Tables")?;
    for (i, router) in ROUTERS.into_iter().enumerate() {
        if i > 0 {
            report.write("\n")?;
        }
        let table = shell.cmd(router, "route -n")?;
        report.block(&format!("Router {router} routing table:"), &table)?;
    }

    report.banner("ARP Tables")?;
    for node in ARP_NODES {
        let table = shell.cmd(node, "arp -n")?;
        report.block(&format!("{node} ARP table:"), &table)?;
        report.write("\n")?;
    }
    Ok(())
}

/// Build the network, configure it, write the report and optionally hand
/// over to the interactive session. The network is torn down on every
/// exit path, SIGINT and SIGTERM included.
pub async fn run(config: &LabConfig) -> Result<()> {
    let mut interrupts = Interrupts::install()?;
    let topo = topology()?;
    let mut net = EmulatedNetwork::start(&topo, &config.net_options(false))?;
    let result = until_interrupted(drive(&net, &topo, config), interrupts.recv()).await;
    net.stop();
    result
}

async fn drive(net: &EmulatedNetwork, topo: &Topology, config: &LabConfig) -> Result<()> {
    configure(net, topo, &RouterTuning::default())?;

    let mut report = Report::create(&config.output)?;
    write_report(net, topo, &mut report, config.ping_count)?;
    drop(report);
    info!("*** Ping test results saved to {}", config.output.display());
    report::echo(&config.output)?;

    if config.interactive {
        super::interactive(net, topo).await?;
    }
    Ok(())
}
