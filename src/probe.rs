//! Single-packet reachability probes.

use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use tracing::debug;

use crate::platform::NodeShell;
use crate::topo::Topology;

/// Ping from `src` to `dst`'s primary address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Probe {
    pub src: String,
    pub dst: String,
    pub dst_ip: Ipv4Addr,
}

impl Probe {
    pub fn between(topo: &Topology, src: &str, dst: &str) -> Result<Self> {
        let dst_ip = topo
            .primary_ip(dst)
            .with_context(|| format!("probe target '{dst}' has no address"))?;
        Ok(Self {
            src: src.to_string(),
            dst: dst.to_string(),
            dst_ip,
        })
    }

    pub fn command(&self, count: u32) -> String {
        format!("ping -c {count} {}", self.dst_ip)
    }

    /// Run the probe and return ping's raw transcript.
    pub fn run(&self, shell: &dyn NodeShell, count: u32) -> Result<String> {
        let out = shell.cmd(&self.src, &self.command(count))?;
        match PingSummary::parse(&out) {
            Some(summary) => debug!(
                src = self.src,
                dst = %self.dst_ip,
                loss = summary.loss_percent(),
                "probe"
            ),
            None => debug!(src = self.src, dst = %self.dst_ip, "probe without ping summary"),
        }
        Ok(out)
    }
}

/// Packet counts from ping's summary line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PingSummary {
    pub transmitted: u32,
    pub received: u32,
}

impl PingSummary {
    /// Find `N packets transmitted, M received, ...` in a ping transcript.
    pub fn parse(output: &str) -> Option<Self> {
        let line = output.lines().find(|l| l.contains("packets transmitted"))?;
        let mut fields = line.split(',').map(str::trim);
        let transmitted = leading_number(fields.next()?)?;
        let received = fields
            .find(|f| f.ends_with("received"))
            .and_then(leading_number)?;
        Some(Self {
            transmitted,
            received,
        })
    }

    pub fn loss_percent(&self) -> u32 {
        if self.transmitted == 0 {
            return 100;
        }
        100 - self.received.min(self.transmitted) * 100 / self.transmitted
    }

    pub fn all_received(&self) -> bool {
        self.transmitted > 0 && self.received >= self.transmitted
    }
}

fn leading_number(field: &str) -> Option<u32> {
    field.split_whitespace().next()?.parse().ok()
}
