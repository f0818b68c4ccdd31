//! Line-oriented interactive session over a running network.
//!
//! Commands:
//! - `help`
//! - `nodes`, `net`, `intfs`, `dump`
//! - `pingall`
//! - `<node> <command...>`: run a shell command on a node
//! - `exit` / `quit` (EOF also ends the session)

use std::io::{BufRead, Write};

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::platform::NodeShell;
use crate::probe::PingSummary;
use crate::topo::{NodeKind, Topology};

pub const PROMPT: &str = "netlab> ";

const HELP: &str = "\
Documented commands:
  help                 show this message
  nodes                list nodes
  net                  list links
  intfs                list interfaces per node
  dump                 show nodes with their addresses
  pingall              ping between every pair of hosts
  <node> <cmd...>      run cmd on node; node names in cmd become addresses
  exit | quit          leave the session
";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Empty,
    Help,
    Nodes,
    Net,
    Intfs,
    Dump,
    PingAll,
    Exit,
    /// Run `command` on `node`.
    Node { node: String, command: String },
    /// A node name without a command.
    MissingCommand(String),
    Unknown(String),
}

/// Parse one input line. Words after a node name that name another node
/// with an address are replaced by that address.
pub fn parse(topo: &Topology, line: &str) -> Command {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Command::Empty;
    }

    match parts[0] {
        "help" | "?" => Command::Help,
        "nodes" => Command::Nodes,
        "net" => Command::Net,
        "intfs" => Command::Intfs,
        "dump" => Command::Dump,
        "pingall" => Command::PingAll,
        "exit" | "quit" => Command::Exit,
        node if topo.node(node).is_some() => {
            if parts.len() < 2 {
                return Command::MissingCommand(node.to_string());
            }
            let command = parts[1..]
                .iter()
                .map(|word| substitute(topo, word))
                .collect::<Vec<_>>()
                .join(" ");
            Command::Node {
                node: node.to_string(),
                command,
            }
        }
        other => Command::Unknown(other.to_string()),
    }
}

fn substitute(topo: &Topology, word: &str) -> String {
    match topo.node(word).and_then(|_| topo.primary_ip(word)) {
        Some(ip) => ip.to_string(),
        None => word.to_string(),
    }
}

/// Result of [`ping_all`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PingAllResult {
    /// Per source host: each destination and whether it answered.
    pub rows: Vec<(String, Vec<(String, bool)>)>,
    pub sent: u32,
    pub received: u32,
}

impl PingAllResult {
    pub fn dropped_percent(&self) -> u32 {
        if self.sent == 0 {
            return 0;
        }
        (self.sent - self.received) * 100 / self.sent
    }
}

/// One packet from every host to every other host.
pub fn ping_all(shell: &dyn NodeShell, topo: &Topology) -> Result<PingAllResult> {
    let hosts: Vec<&str> = topo.hosts().map(|h| h.name.as_str()).collect();
    let mut result = PingAllResult::default();

    for &src in &hosts {
        let mut row = Vec::new();
        for &dst in hosts.iter().filter(|&&d| d != src) {
            let Some(ip) = topo.primary_ip(dst) else {
                continue;
            };
            let out = shell.cmd(src, &format!("ping -c 1 -W 1 {ip}"))?;
            let ok = PingSummary::parse(&out).is_some_and(|s| s.all_received());
            result.sent += 1;
            result.received += u32::from(ok);
            row.push((dst.to_string(), ok));
        }
        result.rows.push((src.to_string(), row));
    }
    Ok(result)
}

/// Feed lines from the input `open` returns into a channel.
///
/// Reading happens on a plain thread, so a blocked read never stalls the
/// runtime. The channel closes at EOF.
pub fn read_lines<F, R>(open: F) -> mpsc::Receiver<String>
where
    F: FnOnce() -> R + Send + 'static,
    R: BufRead,
{
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in open().lines().map_while(|line| line.ok()) {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Run commands from `lines` until `exit` or EOF, writing output to `out`.
pub async fn run<W: Write>(
    shell: &dyn NodeShell,
    topo: &Topology,
    mut lines: mpsc::Receiver<String>,
    mut out: W,
) -> Result<()> {
    loop {
        write!(out, "{PROMPT}")?;
        out.flush()?;

        let Some(line) = lines.recv().await else {
            writeln!(out)?;
            break;
        };

        let cmd = parse(topo, &line);
        debug!(?cmd, "session command");
        match cmd {
            Command::Empty => {}
            Command::Exit => break,
            Command::Help => write!(out, "{HELP}")?,
            Command::Nodes => {
                let names: Vec<&str> = topo.nodes().iter().map(|n| n.name.as_str()).collect();
                writeln!(out, "available nodes are: \n{}", names.join(" "))?;
            }
            Command::Net => write_net(topo, &mut out)?,
            Command::Intfs => {
                for node in topo.nodes() {
                    match shell.intf_names(&node.name) {
                        Ok(intfs) => writeln!(out, "{}: {}", node.name, intfs.join(","))?,
                        Err(e) => writeln!(out, "{}: *** {e:#}", node.name)?,
                    }
                }
            }
            Command::Dump => write_dump(topo, &mut out)?,
            Command::PingAll => {
                writeln!(out, "*** Ping: testing ping reachability")?;
                match ping_all(shell, topo) {
                    Ok(result) => write_ping_all(&result, &mut out)?,
                    Err(e) => writeln!(out, "*** Error: {e:#}")?,
                }
            }
            Command::Node { node, command } => match shell.cmd(&node, &command) {
                Ok(output) => write!(out, "{output}")?,
                Err(e) => {
                    warn!(node, "command failed: {e:#}");
                    writeln!(out, "*** Error: {e:#}")?;
                }
            },
            Command::MissingCommand(node) => {
                writeln!(out, "*** Enter a command for node: {node} <cmd>")?
            }
            Command::Unknown(word) => writeln!(out, "*** Unknown command: {word}")?,
        }
    }
    Ok(())
}

fn write_net<W: Write>(topo: &Topology, out: &mut W) -> Result<()> {
    for node in topo.nodes() {
        let peers: Vec<String> = topo
            .endpoints_of(&node.name)
            .into_iter()
            .filter_map(|ep| {
                topo.peer(&node.name, &ep.intf)
                    .map(|peer| format!("{}:{}", ep.intf, peer.intf))
            })
            .collect();
        writeln!(out, "{} {}", node.name, peers.join(" "))?;
    }
    Ok(())
}

fn write_dump<W: Write>(topo: &Topology, out: &mut W) -> Result<()> {
    for node in topo.nodes() {
        let intfs: Vec<String> = topo
            .endpoints_of(&node.name)
            .into_iter()
            .map(|ep| match ep.ip {
                Some(ip) => format!("{}:{ip}", ep.intf),
                None => format!("{}:None", ep.intf),
            })
            .collect();
        let kind = match node.kind {
            NodeKind::Host => "Host",
            NodeKind::Router => "Router",
            NodeKind::Switch { .. } => "Switch",
        };
        writeln!(out, "<{kind} {}: {}>", node.name, intfs.join(","))?;
    }
    Ok(())
}

fn write_ping_all<W: Write>(result: &PingAllResult, out: &mut W) -> Result<()> {
    for (src, row) in &result.rows {
        let cells: Vec<&str> = row
            .iter()
            .map(|(dst, ok)| if *ok { dst.as_str() } else { "X" })
            .collect();
        writeln!(out, "{src} -> {}", cells.join(" "))?;
    }
    writeln!(
        out,
        "*** Results: {}% dropped ({}/{} received)",
        result.dropped_percent(),
        result.received,
        result.sent
    )?;
    Ok(())
}
