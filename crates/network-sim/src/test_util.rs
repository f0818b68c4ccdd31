use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::topology::MAX_IFACE_NAME;

static NS_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Returns `true` if the environment supports namespace-based tests
/// (requires `ip` tool and passwordless `sudo`).
pub fn check_privileges() -> bool {
    let has_ip = Command::new("ip")
        .arg("netns")
        .output()
        .is_ok_and(|o| o.status.success());

    has_ip
        && Command::new("sudo")
            .args(["-n", "ip", "netns", "list"])
            .output()
            .is_ok_and(|o| o.status.success())
}

/// Generate a unique namespace/interface name safe for parallel tests.
///
/// Combines prefix + PID + atomic counter, truncated to the Linux netdev
/// name limit.
pub fn unique_ns_name(prefix: &str) -> String {
    let seq = NS_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id() % 0xffff;
    let mut name = format!("{prefix}_{pid:x}_{seq}");
    name.truncate(MAX_IFACE_NAME);
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_and_short() {
        let a = unique_ns_name("a_rather_long_prefix");
        let b = unique_ns_name("x");
        let c = unique_ns_name("x");
        assert!(a.len() <= MAX_IFACE_NAME);
        assert_ne!(b, c);
    }
}
