//! Kernel network parameters applied to router nodes.

use std::fmt;

use anyhow::Result;
use tracing::debug;

use crate::platform::NodeShell;

pub const IP_FORWARD: &str = "net.ipv4.ip_forward";

/// One `key=value` kernel parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SysctlSetting {
    pub key: String,
    pub value: String,
}

impl SysctlSetting {
    pub fn new(key: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
        }
    }

    /// `net.ipv4.conf.<scope>.<param>` where scope is `all`, `default` or
    /// an interface name.
    pub fn conf(scope: &str, param: &str, value: impl fmt::Display) -> Self {
        Self::new(format!("net.ipv4.conf.{scope}.{param}"), value)
    }

    pub fn forwarding(enabled: bool) -> Self {
        Self::new(IP_FORWARD, u8::from(enabled))
    }

    pub fn command(&self) -> String {
        format!("sysctl -w {}={}", self.key, self.value)
    }
}

impl fmt::Display for SysctlSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Forwarding and ARP behavior of a router.
///
/// The default is the deterministic lab profile: forwarding on, no
/// reverse-path filtering, no proxy ARP, answer ARP only for addresses
/// local to the receiving interface (`arp_ignore=1`) and always announce
/// the best local source address (`arp_announce=2`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouterTuning {
    pub ip_forward: bool,
    /// 0 = off, 1 = strict, 2 = loose.
    pub rp_filter: u8,
    pub proxy_arp: bool,
    pub arp_ignore: u8,
    pub arp_announce: u8,
}

impl Default for RouterTuning {
    fn default() -> Self {
        Self {
            ip_forward: true,
            rp_filter: 0,
            proxy_arp: false,
            arp_ignore: 1,
            arp_announce: 2,
        }
    }
}

impl RouterTuning {
    /// Expand into ordered settings: global ones first, then four per
    /// interface.
    pub fn settings(&self, intfs: &[String]) -> Vec<SysctlSetting> {
        let proxy_arp = u8::from(self.proxy_arp);

        let mut settings = vec![
            SysctlSetting::forwarding(self.ip_forward),
            SysctlSetting::conf("all", "rp_filter", self.rp_filter),
            SysctlSetting::conf("default", "rp_filter", self.rp_filter),
            SysctlSetting::conf("all", "proxy_arp", proxy_arp),
            SysctlSetting::conf("default", "proxy_arp", proxy_arp),
            SysctlSetting::conf("all", "arp_ignore", self.arp_ignore),
            SysctlSetting::conf("all", "arp_announce", self.arp_announce),
        ];

        for intf in intfs {
            settings.extend([
                SysctlSetting::conf(intf, "rp_filter", self.rp_filter),
                SysctlSetting::conf(intf, "proxy_arp", proxy_arp),
                SysctlSetting::conf(intf, "arp_ignore", self.arp_ignore),
                SysctlSetting::conf(intf, "arp_announce", self.arp_announce),
            ]);
        }

        settings
    }
}

/// Apply one kernel parameter on `node`. Returns the command output.
pub fn apply(shell: &dyn NodeShell, node: &str, setting: &SysctlSetting) -> Result<String> {
    debug!(node, %setting, "sysctl");
    shell.cmd(node, &setting.command())
}

/// Apply `tuning` to `node` and every interface it currently has.
pub fn tune_router(shell: &dyn NodeShell, node: &str, tuning: &RouterTuning) -> Result<()> {
    let intfs = shell.intf_names(node)?;
    for setting in tuning.settings(&intfs) {
        apply(shell, node, &setting)?;
    }
    Ok(())
}
