//! Host prerequisites for running labs against real namespaces.

use std::path::PathBuf;
use std::process::Command;

/// Check if a binary exists in PATH.
pub fn check_binary(name: &str) -> Option<PathBuf> {
    Command::new("sh")
        .args(["-c", &format!("command -v {name}")])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| PathBuf::from(String::from_utf8_lossy(&o.stdout).trim().to_string()))
}

/// Reason why a lab cannot run on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotRoot,
    MissingTool(String),
    NoOvsDaemon,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NotRoot => write!(f, "requires root / passwordless sudo"),
            SkipReason::MissingTool(t) => write!(f, "system tool '{t}' not found"),
            SkipReason::NoOvsDaemon => write!(
                f,
                "ovs-vswitchd is not reachable (try: sudo systemctl start openvswitch-switch)"
            ),
        }
    }
}

/// Tools every lab needs inside its namespaces.
pub const BASE_TOOLS: &[&str] = &["ip", "sysctl", "ping"];

/// Check privileges plus `BASE_TOOLS` and `extra` tools.
///
/// Returns the first missing prerequisite.
pub fn check_lab_deps(extra: &[&str]) -> Result<(), SkipReason> {
    if !crate::test_util::check_privileges() {
        return Err(SkipReason::NotRoot);
    }

    for tool in BASE_TOOLS.iter().chain(extra) {
        if check_binary(tool).is_none() {
            return Err(SkipReason::MissingTool(tool.to_string()));
        }
    }

    Ok(())
}

/// Check deps including a running Open vSwitch.
pub fn check_ovs_deps() -> Result<(), SkipReason> {
    check_lab_deps(&["ovs-vsctl", "ovs-ofctl"])?;

    let daemon_ok = Command::new("sudo")
        .args(["-n", "ovs-vsctl", "show"])
        .output()
        .is_ok_and(|o| o.status.success());

    if !daemon_ok {
        return Err(SkipReason::NoOvsDaemon);
    }

    Ok(())
}
