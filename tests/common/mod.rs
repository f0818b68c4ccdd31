//! Shared utilities for integration tests.
#![allow(dead_code)]

use network_sim::{check_lab_deps, check_ovs_deps, unique_ns_name};

/// Check the namespace test dependencies plus `extra` tools. Returns `true`
/// if tests should be skipped (prints the reason to stderr). Use at the top
/// of every test.
pub fn skip_without_lab_deps(extra: &[&str]) -> bool {
    match check_lab_deps(extra) {
        Ok(()) => false,
        Err(reason) => {
            eprintln!("Skipping: {reason}");
            true
        }
    }
}

/// Like `skip_without_lab_deps` but also requires a running Open vSwitch.
pub fn skip_without_ovs_deps() -> bool {
    match check_ovs_deps() {
        Ok(()) => false,
        Err(reason) => {
            eprintln!("Skipping: {reason}");
            true
        }
    }
}

/// Namespace prefix unique to this test process, so leftovers from an
/// aborted run never collide.
pub fn ns_prefix() -> String {
    format!("{}-", unique_ns_name("nlt"))
}
