//! Experiment 2: pure L2 switching, then OpenFlow rules on `s1`.
//!
//! ```text
//!  h1 -- s1 -- s2 -- h3
//!        |
//!        h2
//! ```
//!
//! Both switches start in standalone mode (MAC learning, no controller).
//! Connectivity and the switch state are recorded before and after the
//! operator adds flows on `s1`.

use std::fmt;
use std::io::Write;

use anyhow::{Context, Result, bail};
use network_sim::FailMode;
use tracing::{debug, info, warn};

use super::cidr;
use crate::config::LabConfig;
use crate::gate::OperatorGate;
use crate::interrupt::{Interrupts, until_interrupted};
use crate::net::EmulatedNetwork;
use crate::platform::NodeShell;
use crate::probe::Probe;
use crate::report::{self, Report};
use crate::topo::{LinkOpts, Topology};

pub const REPORT_TITLE: &str = "Experiment 2: SDN (L2) Results";
pub const DEFAULT_OUTPUT: &str = "result2.txt";

/// The switch the operator programs.
pub const SWITCH: &str = "s1";

/// Probe pairs, in report order.
pub const PROBES: [(&str, &str); 2] = [("h1", "h3"), ("h2", "h3")];

pub fn topology() -> Result<Topology> {
    let mut topo = Topology::new("l2-switch");
    topo.add_switch("s1", FailMode::Standalone)
        .add_switch("s2", FailMode::Standalone)
        .add_host("h1", Some(cidr("10.0.0.1/24")?), None)
        .add_host("h2", Some(cidr("10.0.0.2/24")?), None)
        .add_host("h3", Some(cidr("10.0.0.3/24")?), None);

    // s1-eth1 to h1, s1-eth2 to h2, s1-eth3 to s2-eth1, s2-eth2 to h3
    for (n1, n2) in [("h1", "s1"), ("h2", "s1"), ("s1", "s2"), ("s2", "h3")] {
        topo.add_link(n1, n2, LinkOpts::default())?;
    }

    topo.validate()?;
    Ok(topo)
}

/// Where the procedure is. Stages only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Built,
    BaselineTested,
    PreFlowCaptured,
    AwaitingOperator,
    PostFlowCaptured,
    PostTested,
    InteractiveSession,
    TornDown,
}

impl Stage {
    pub const fn next(self) -> Option<Stage> {
        match self {
            Stage::Built => Some(Stage::BaselineTested),
            Stage::BaselineTested => Some(Stage::PreFlowCaptured),
            Stage::PreFlowCaptured => Some(Stage::AwaitingOperator),
            Stage::AwaitingOperator => Some(Stage::PostFlowCaptured),
            Stage::PostFlowCaptured => Some(Stage::PostTested),
            Stage::PostTested => Some(Stage::InteractiveSession),
            Stage::InteractiveSession => Some(Stage::TornDown),
            Stage::TornDown => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Built => "built",
            Stage::BaselineTested => "baseline-tested",
            Stage::PreFlowCaptured => "pre-flow-captured",
            Stage::AwaitingOperator => "awaiting-operator",
            Stage::PostFlowCaptured => "post-flow-captured",
            Stage::PostTested => "post-tested",
            Stage::InteractiveSession => "interactive-session",
            Stage::TornDown => "torn-down",
        };
        f.write_str(name)
    }
}

/// Stage tracker for one run.
#[derive(Debug)]
pub struct Procedure {
    stage: Stage,
    history: Vec<Stage>,
}

impl Procedure {
    pub fn new() -> Self {
        Self {
            stage: Stage::Built,
            history: vec![Stage::Built],
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Every stage entered so far, in order.
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    /// Move to the stage directly after the current one.
    pub fn advance_to(&mut self, stage: Stage) -> Result<()> {
        if self.stage.next() != Some(stage) {
            bail!("cannot move from {} to {stage}", self.stage);
        }
        debug!(from = %self.stage, to = %stage, "stage");
        self.stage = stage;
        self.history.push(stage);
        Ok(())
    }

    /// Teardown ends every run, whatever stage it reached.
    pub fn tear_down(&mut self) {
        if self.stage != Stage::TornDown {
            self.stage = Stage::TornDown;
            self.history.push(Stage::TornDown);
        }
    }
}

impl Default for Procedure {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowAction {
    Drop,
    Output(u16),
}

/// An OpenFlow rule matching on ingress port only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowRule {
    pub in_port: u16,
    pub action: FlowAction,
}

impl FlowRule {
    pub fn drop_from(in_port: u16) -> Self {
        Self {
            in_port,
            action: FlowAction::Drop,
        }
    }

    pub fn forward(in_port: u16, out_port: u16) -> Self {
        Self {
            in_port,
            action: FlowAction::Output(out_port),
        }
    }

    pub fn add_flow_command(&self, switch: &str) -> String {
        format!("ovs-ofctl add-flow {switch} \"{self}\"")
    }
}

impl fmt::Display for FlowRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            FlowAction::Drop => write!(f, "in_port={},actions=drop", self.in_port),
            FlowAction::Output(port) => {
                write!(f, "in_port={},actions=output:{port}", self.in_port)
            }
        }
    }
}

/// Port of `switch` whose link leads to `neighbor`.
pub fn switch_port_towards(topo: &Topology, switch: &str, neighbor: &str) -> Result<u16> {
    topo.endpoints_of(switch)
        .into_iter()
        .find(|ep| topo.peer(switch, &ep.intf).is_some_and(|p| p.node == neighbor))
        .map(|ep| ep.port)
        .with_context(|| format!("{switch} has no link to {neighbor}"))
}

/// Drop everything arriving from h2, send everything from h1 towards s2.
pub fn documented_flows(topo: &Topology) -> Result<[FlowRule; 2]> {
    let from_h2 = switch_port_towards(topo, SWITCH, "h2")?;
    let from_h1 = switch_port_towards(topo, SWITCH, "h1")?;
    let to_s2 = switch_port_towards(topo, SWITCH, "s2")?;
    Ok([FlowRule::drop_from(from_h2), FlowRule::forward(from_h1, to_s2)])
}

/// What releases the procedure once the pre-flow state is recorded.
pub enum Checkpoint {
    /// Print instructions and wait for ENTER on stdin.
    Prompt,
    /// Install the documented flows and continue.
    AutoInstall,
    /// Wait for an externally fired gate.
    Signal(OperatorGate),
}

impl Checkpoint {
    async fn pass(self, shell: &dyn NodeShell, flows: &[FlowRule]) -> Result<()> {
        match self {
            Checkpoint::Prompt => {
                info!("*** Waiting for the operator to add flows on {SWITCH}");
                OperatorGate::stdin(operator_prompt(flows)).wait().await
            }
            Checkpoint::AutoInstall => {
                for rule in flows {
                    let out = shell.cmd(SWITCH, &rule.add_flow_command(SWITCH))?;
                    if !out.trim().is_empty() {
                        warn!("{SWITCH}: add-flow {rule}: {}", out.trim());
                    }
                    info!("{SWITCH}: Added flow {rule}");
                }
                OperatorGate::open().wait().await
            }
            Checkpoint::Signal(gate) => gate.wait().await,
        }
    }
}

/// Operator instructions for adding `flows` from another terminal.
pub fn instructions(flows: &[FlowRule]) -> String {
    let mut text = String::from("\n=== ACTION REQUIRED (in another terminal) ===\n");
    text.push_str("1) Inspect port numbers:\n");
    text.push_str(&format!("   sudo ovs-ofctl show {SWITCH}\n\n"));
    text.push_str(&format!("2) Add flows on {SWITCH}:\n"));
    for rule in flows {
        text.push_str(&format!("   sudo {}\n", rule.add_flow_command(SWITCH)));
    }
    text
}

/// What the operator sees on stdout at the checkpoint. Printed rather
/// than logged, so it shows at any log level.
pub fn operator_prompt(flows: &[FlowRule]) -> String {
    format!(
        "{}\nPress ENTER here after you have added the flows on {SWITCH}...",
        instructions(flows)
    )
}

fn ping_pairs<W: Write>(
    shell: &dyn NodeShell,
    topo: &Topology,
    report: &mut Report<W>,
    count: u32,
) -> Result<()> {
    for (src, dst) in PROBES {
        let probe = Probe::between(topo, src, dst)?;
        let out = probe.run(shell, count)?;
        report.write(&format!("{src} -> {dst} (ping -c {count}):\n{out}\n"))?;
    }
    Ok(())
}

fn capture_switch<W: Write>(
    shell: &dyn NodeShell,
    report: &mut Report<W>,
    when: &str,
) -> Result<()> {
    report.section(&format!("\nSwitch {SWITCH} state {when}:"))?;
    for cmd in [
        format!("ovs-ofctl show {SWITCH}"),
        format!("ovs-ofctl dump-flows {SWITCH}"),
    ] {
        let out = shell.cmd(SWITCH, &cmd)?;
        report.write(&format!("sudo {cmd}\n{out}\n"))?;
    }
    Ok(())
}

/// Baseline pings, pre-flow capture, checkpoint, post-flow capture and
/// post-rule pings, strictly in that order.
pub async fn record<W: Write>(
    shell: &dyn NodeShell,
    topo: &Topology,
    report: &mut Report<W>,
    ping_count: u32,
    checkpoint: Checkpoint,
    procedure: &mut Procedure,
) -> Result<()> {
    let flows = documented_flows(topo)?;
    report.header(REPORT_TITLE)?;

    info!("*** Baseline pings");
    report.section("Baseline connectivity (before adding flows):")?;
    ping_pairs(shell, topo, report, ping_count)?;
    procedure.advance_to(Stage::BaselineTested)?;

    capture_switch(shell, report, "BEFORE adding flows")?;
    procedure.advance_to(Stage::PreFlowCaptured)?;

    procedure.advance_to(Stage::AwaitingOperator)?;
    checkpoint.pass(shell, &flows).await?;

    capture_switch(shell, report, "AFTER adding flows")?;
    report.write(&format!("Commands used on {SWITCH}:\n"))?;
    for rule in &flows {
        report.write(&format!("sudo {}\n", rule.add_flow_command(SWITCH)))?;
    }
    procedure.advance_to(Stage::PostFlowCaptured)?;

    info!("*** Pings after adding flows");
    report.section(&format!("\nConnectivity AFTER adding flows to {SWITCH}:"))?;
    ping_pairs(shell, topo, report, ping_count)?;
    procedure.advance_to(Stage::PostTested)?;
    Ok(())
}

/// Build the network, record both halves of the experiment around the
/// operator checkpoint, then optionally hand over to the interactive
/// session. The network is torn down on every exit path, SIGINT and
/// SIGTERM included.
pub async fn run(config: &LabConfig) -> Result<()> {
    let mut interrupts = Interrupts::install()?;
    let topo = topology()?;
    let mut net = EmulatedNetwork::start(&topo, &config.net_options(true))?;
    let mut procedure = Procedure::new();
    let result = until_interrupted(
        drive(&net, &topo, config, &mut procedure),
        interrupts.recv(),
    )
    .await;
    net.stop();
    procedure.tear_down();
    result
}

async fn drive(
    net: &EmulatedNetwork,
    topo: &Topology,
    config: &LabConfig,
    procedure: &mut Procedure,
) -> Result<()> {
    let checkpoint = if config.auto_flows {
        Checkpoint::AutoInstall
    } else {
        Checkpoint::Prompt
    };

    let mut report = Report::create(&config.output)?;
    record(net, topo, &mut report, config.ping_count, checkpoint, procedure).await?;
    drop(report);
    info!("*** All results saved to {}", config.output.display());
    report::echo(&config.output)?;

    if config.interactive {
        procedure.advance_to(Stage::InteractiveSession)?;
        super::interactive(net, topo).await?;
    }
    Ok(())
}
