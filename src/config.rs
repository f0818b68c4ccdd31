//! Run configuration for lab experiments.

use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::net::NetOptions;

/// Probes send a single echo request unless told otherwise.
pub const DEFAULT_PING_COUNT: u32 = 1;

/// Namespace names are `<prefix><node>`, e.g. `nl-h1`.
pub const DEFAULT_NS_PREFIX: &str = "nl-";

/// Everything a lab run needs besides its fixed topology.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabConfig {
    /// Report file, truncated at start.
    pub output: PathBuf,
    pub ns_prefix: String,
    pub ping_count: u32,
    /// Drop into the interactive session after the automated steps.
    pub interactive: bool,
    /// Install the documented flows instead of waiting for an operator
    /// (L2 experiment only).
    pub auto_flows: bool,
}

impl LabConfig {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            ns_prefix: DEFAULT_NS_PREFIX.to_string(),
            ping_count: DEFAULT_PING_COUNT,
            interactive: true,
            auto_flows: false,
        }
    }

    /// Create config from CLI arguments.
    pub fn from_cli(
        output: PathBuf,
        ns_prefix: String,
        ping_count: u32,
        no_cli: bool,
        auto_flows: bool,
    ) -> Result<Self> {
        if ping_count == 0 {
            bail!("ping count must be at least 1");
        }
        if ns_prefix.contains('/') || ns_prefix.chars().any(char::is_whitespace) {
            bail!("invalid namespace prefix '{ns_prefix}'");
        }
        Ok(Self {
            output,
            ns_prefix,
            ping_count,
            interactive: !no_cli,
            auto_flows,
        })
    }

    pub fn net_options(&self, auto_set_macs: bool) -> NetOptions {
        NetOptions {
            ns_prefix: self.ns_prefix.clone(),
            auto_set_macs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = LabConfig::new("result1.txt");
        assert_eq!(config.output, PathBuf::from("result1.txt"));
        assert_eq!(config.ns_prefix, DEFAULT_NS_PREFIX);
        assert_eq!(config.ping_count, DEFAULT_PING_COUNT);
        assert!(config.interactive);
        assert!(!config.auto_flows);
    }

    #[test]
    fn test_config_from_cli() {
        let config =
            LabConfig::from_cli("out.txt".into(), "lab_".into(), 3, true, true).unwrap();
        assert_eq!(config.ns_prefix, "lab_");
        assert_eq!(config.ping_count, 3);
        assert!(!config.interactive); // no_cli=true means no session
        assert!(config.auto_flows);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(LabConfig::from_cli("o".into(), "nl-".into(), 0, false, false).is_err());
        assert!(LabConfig::from_cli("o".into(), "a/b".into(), 1, false, false).is_err());
        assert!(LabConfig::from_cli("o".into(), "a b".into(), 1, false, false).is_err());
    }

    #[test]
    fn test_net_options() {
        let opts = LabConfig::new("x").net_options(true);
        assert_eq!(opts.ns_prefix, "nl-");
        assert!(opts.auto_set_macs);
    }
}
