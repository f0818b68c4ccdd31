use std::fmt;

use anyhow::{Context, Result};
use tracing::debug;

use crate::topology::{set_root_link_up, sudo, sudo_checked};

/// What an Open vSwitch bridge does when no controller is connected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailMode {
    /// Behave as a plain MAC-learning switch.
    #[default]
    Standalone,
    /// Forward only according to installed flows.
    Secure,
}

impl FailMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            FailMode::Standalone => "standalone",
            FailMode::Secure => "secure",
        }
    }
}

impl fmt::Display for FailMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An Open vSwitch bridge in the root namespace, deleted on drop.
pub struct OvsBridge {
    pub name: String,
}

impl OvsBridge {
    pub fn new(name: &str, fail_mode: FailMode) -> Result<Self> {
        // Stale bridge from an aborted run
        let _ = sudo(&["ovs-vsctl", "--if-exists", "del-br", name]);

        sudo_checked(&[
            "ovs-vsctl",
            "add-br",
            name,
            "--",
            "set-fail-mode",
            name,
            fail_mode.as_str(),
        ])
        .with_context(|| format!("create OVS bridge '{name}'"))?;

        set_root_link_up(name)?;

        debug!(bridge = name, %fail_mode, "created OVS bridge");

        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Attach root-namespace interface `iface` as OpenFlow port `ofport`.
    ///
    /// The port number is requested explicitly so flow rules written
    /// against `in_port=N` do not depend on attachment order.
    pub fn add_port(&self, iface: &str, ofport: u16) -> Result<()> {
        let request = format!("ofport_request={ofport}");
        sudo_checked(&[
            "ovs-vsctl",
            "add-port",
            &self.name,
            iface,
            "--",
            "set",
            "Interface",
            iface,
            &request,
        ])
        .with_context(|| format!("add port '{iface}' to bridge '{}'", self.name))?;

        set_root_link_up(iface)?;

        debug!(bridge = self.name, iface, ofport, "added OVS port");
        Ok(())
    }

    /// Names of the ports attached to this bridge, as OVS lists them.
    pub fn ports(&self) -> Result<Vec<String>> {
        let out = sudo_checked(&["ovs-vsctl", "list-ports", &self.name])
            .with_context(|| format!("list ports of '{}'", self.name))?;
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

impl Drop for OvsBridge {
    fn drop(&mut self) {
        debug!(bridge = self.name, "deleting OVS bridge");
        let _ = sudo(&["ovs-vsctl", "--if-exists", "del-br", &self.name]);
    }
}
