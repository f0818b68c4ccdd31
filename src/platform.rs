//! The seam between lab procedures and the emulation platform.

use anyhow::Result;
use mac_address::MacAddress;

/// Run commands on emulated nodes and query their interfaces.
///
/// Implemented by [`crate::net::EmulatedNetwork`] over real namespaces and
/// by an in-memory fake in tests.
pub trait NodeShell {
    /// Run `command` on `node` and return its combined stdout/stderr.
    ///
    /// A command that runs and fails is not an error: its output is the
    /// result. `Err` means the command could not be run at all.
    fn cmd(&self, node: &str, command: &str) -> Result<String>;

    /// Interface names of `node` in creation order, loopback excluded.
    fn intf_names(&self, node: &str) -> Result<Vec<String>>;

    /// Live link-layer address of `intf` on `node`.
    fn mac(&self, node: &str, intf: &str) -> Result<MacAddress>;
}
