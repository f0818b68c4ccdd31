use std::process::{Command, Output};

use anyhow::{Context, Result, bail};
use mac_address::MacAddress;
use tracing::debug;

/// Longest network device name Linux accepts (`IFNAMSIZ - 1`).
pub const MAX_IFACE_NAME: usize = 15;

/// A Linux network namespace with RAII cleanup.
///
/// Creates the namespace on construction, brings up loopback, and deletes
/// it on drop. Deleting the namespace also destroys every veth end that was
/// moved into it. All commands inside the namespace run via
/// `sudo ip netns exec`.
pub struct Namespace {
    pub name: String,
}

impl Namespace {
    pub fn new(name: &str) -> Result<Self> {
        // Clean up stale namespace with same name (idempotent)
        let _ = sudo(&["ip", "netns", "del", name]);

        sudo_checked(&["ip", "netns", "add", name])
            .with_context(|| format!("create netns '{name}'"))?;

        debug!(ns = name, "created network namespace");

        // Loopback is best-effort
        let _ = sudo(&["ip", "netns", "exec", name, "ip", "link", "set", "lo", "up"]);

        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Run a command inside this namespace, returning raw output.
    pub fn exec(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let mut full_args = vec!["ip", "netns", "exec", &self.name, cmd];
        full_args.extend_from_slice(args);
        sudo(&full_args).with_context(|| format!("exec '{cmd}' in ns '{}'", self.name))
    }

    /// Run a command inside this namespace, failing if it exits non-zero.
    pub fn exec_checked(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let mut full_args = vec!["ip", "netns", "exec", &self.name, cmd];
        full_args.extend_from_slice(args);
        sudo_checked(&full_args).with_context(|| format!("exec '{cmd}' in ns '{}'", self.name))
    }

    /// Run `command_line` through `sh -c` inside this namespace.
    ///
    /// Returns stdout and stderr interleaved, the way an interactive shell
    /// would show them. The exit status is not inspected: a failing command
    /// is still a successful call whose output describes the failure.
    pub fn sh(&self, command_line: &str) -> Result<String> {
        let script = format!("exec 2>&1; {command_line}");
        let out = self.exec("sh", &["-c", &script])?;
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    /// Move `iface` from the root namespace into this namespace.
    pub fn adopt(&self, iface: &str) -> Result<()> {
        sudo_checked(&["ip", "link", "set", iface, "netns", &self.name])
            .with_context(|| format!("move '{iface}' into ns '{}'", self.name))?;
        Ok(())
    }

    /// Set MAC and address on `iface` (both optional) and bring it up.
    pub fn configure_iface(
        &self,
        iface: &str,
        addr: Option<&str>,
        mac: Option<MacAddress>,
    ) -> Result<()> {
        if let Some(mac) = mac {
            let mac = format_mac(mac);
            self.exec_checked("ip", &["link", "set", "dev", iface, "address", &mac])
                .with_context(|| format!("set MAC {mac} on '{iface}'"))?;
        }
        if let Some(addr) = addr {
            self.exec_checked("ip", &["addr", "add", addr, "dev", iface])
                .with_context(|| format!("set IP {addr} on '{iface}'"))?;
        }
        self.exec_checked("ip", &["link", "set", iface, "up"])
            .with_context(|| format!("bring '{iface}' up"))?;

        debug!(ns = self.name, iface, addr, "interface configured");
        Ok(())
    }

    /// List the links visible inside this namespace, in kernel index order.
    pub fn links(&self) -> Result<Vec<LinkInfo>> {
        let out = self.exec_checked("ip", &["-o", "link", "show"])?;
        Ok(parse_link_list(&String::from_utf8_lossy(&out.stdout)))
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        debug!(ns = self.name, "deleting network namespace");
        let _ = sudo(&["ip", "netns", "del", &self.name]);
    }
}

/// A veth pair created in the root namespace, deleted on drop.
///
/// Either end may be moved into a [`Namespace`] afterwards. Once an end
/// lives in a namespace, deleting that namespace destroys the pair and the
/// delete issued on drop becomes a harmless no-op.
pub struct VethPair {
    pub a: String,
    pub b: String,
}

impl VethPair {
    pub fn new(a: &str, b: &str) -> Result<Self> {
        for name in [a, b] {
            if name.is_empty() || name.len() > MAX_IFACE_NAME {
                bail!("invalid interface name '{name}' (1..={MAX_IFACE_NAME} bytes)");
            }
        }

        // Clean up stale veth ends (idempotent)
        for name in [a, b] {
            let _ = sudo(&["ip", "link", "del", name]);
        }

        sudo_checked(&["ip", "link", "add", a, "type", "veth", "peer", "name", b])
            .with_context(|| format!("create veth pair {a} <-> {b}"))?;

        debug!(a, b, "created veth pair");

        Ok(Self {
            a: a.to_string(),
            b: b.to_string(),
        })
    }
}

impl Drop for VethPair {
    fn drop(&mut self) {
        let _ = sudo(&["ip", "link", "del", &self.a]);
    }
}

/// One line of `ip -o link show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Device name without the `@peer` suffix veth ends carry.
    pub name: String,
    pub mac: Option<MacAddress>,
}

/// Parse the one-line-per-device output of `ip -o link show`.
pub fn parse_link_list(output: &str) -> Vec<LinkInfo> {
    output.lines().filter_map(parse_link_line).collect()
}

fn parse_link_line(line: &str) -> Option<LinkInfo> {
    let mut parts = line.splitn(3, ": ");
    // Every device line starts with its kernel index
    parts.next()?.trim().parse::<u32>().ok()?;
    let name = parts.next()?.split('@').next()?.to_string();
    let rest = parts.next()?;

    let mut tokens = rest.split_whitespace();
    let mac = tokens
        .by_ref()
        .find(|t| t.starts_with("link/"))
        .and_then(|_| tokens.next())
        .and_then(|m| m.parse().ok());

    Some(LinkInfo { name, mac })
}

/// Lowercase colon-separated form, as `ip` prints it.
pub fn format_mac(mac: MacAddress) -> String {
    mac.bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Run `command_line` through `sh -c` in the root namespace, as root.
///
/// Output handling matches [`Namespace::sh`].
pub fn root_sh(command_line: &str) -> Result<String> {
    let script = format!("exec 2>&1; {command_line}");
    let out = sudo(&["sh", "-c", &script])?;
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// List the links of the root namespace.
pub fn root_links() -> Result<Vec<LinkInfo>> {
    let out = sudo_checked(&["ip", "-o", "link", "show"])?;
    Ok(parse_link_list(&String::from_utf8_lossy(&out.stdout)))
}

/// Bring a root-namespace interface up.
pub fn set_root_link_up(iface: &str) -> Result<()> {
    sudo_checked(&["ip", "link", "set", iface, "up"])
        .with_context(|| format!("bring '{iface}' up"))?;
    Ok(())
}

// -- helpers --

/// Run `sudo <args>`, returning raw output.
pub(crate) fn sudo(args: &[&str]) -> Result<Output> {
    Command::new("sudo")
        .args(args)
        .output()
        .with_context(|| format!("sudo {}", args.join(" ")))
}

/// Run `sudo <args>`, returning output on success or bailing with stderr.
pub(crate) fn sudo_checked(args: &[&str]) -> Result<Output> {
    let output = sudo(args)?;
    if !output.status.success() {
        bail!(
            "command failed: sudo {}\n{}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{check_privileges, unique_ns_name};

    const SAMPLE: &str = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN mode DEFAULT group default qlen 1000\\    link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00
7: r1-eth0@if6: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc noqueue state UP mode DEFAULT group default qlen 1000\\    link/ether 9a:3c:01:de:77:10 brd ff:ff:ff:ff:ff:ff link-netns nl-h1
9: r1-eth1@if8: <BROADCAST,MULTICAST> mtu 1500 qdisc noop state DOWN mode DEFAULT group default qlen 1000\\    link/ether 0e:55:aa:01:02:03 brd ff:ff:ff:ff:ff:ff link-netns nl-r2
";

    #[test]
    fn parses_ip_link_output() {
        let links = parse_link_list(SAMPLE);
        assert_eq!(links.len(), 3);

        assert_eq!(links[0].name, "lo");

        assert_eq!(links[1].name, "r1-eth0");
        assert_eq!(
            links[1].mac,
            Some(MacAddress::new([0x9a, 0x3c, 0x01, 0xde, 0x77, 0x10]))
        );

        assert_eq!(links[2].name, "r1-eth1");
    }

    #[test]
    fn skips_garbage_lines() {
        let links = parse_link_list("not a link line\n\n");
        assert!(links.is_empty());
    }

    #[test]
    fn mac_is_formatted_lowercase() {
        let mac = MacAddress::new([0xAA, 0x0b, 0, 0, 0, 0x01]);
        assert_eq!(format_mac(mac), "aa:0b:00:00:00:01");
    }

    #[test]
    fn rejects_overlong_veth_name() {
        let err = VethPair::new("this-name-is-too-long", "ok").err().expect("must fail");
        assert!(err.to_string().contains("invalid interface name"));
    }

    #[test]
    fn test_namespace_has_loopback() {
        if !check_privileges() {
            eprintln!("Skipping: insufficient privileges");
            return;
        }

        let ns = Namespace::new(&unique_ns_name("nst_a")).expect("create ns");
        let links = ns.links().expect("ip link");
        assert!(links.iter().any(|l| l.name == "lo"), "loopback missing");
    }

    #[test]
    fn test_veth_ping() {
        if !check_privileges() {
            eprintln!("Skipping: insufficient privileges");
            return;
        }

        let ns1 = Namespace::new(&unique_ns_name("nst_a")).expect("create ns1");
        let ns2 = Namespace::new(&unique_ns_name("nst_b")).expect("create ns2");

        let id = std::process::id() % 100_000;
        let v_a = format!("va_{id}");
        let v_b = format!("vb_{id}");

        let _pair = VethPair::new(&v_a, &v_b).expect("create veth");
        ns1.adopt(&v_a).expect("move a");
        ns2.adopt(&v_b).expect("move b");
        ns1.configure_iface(&v_a, Some("10.200.1.1/24"), None)
            .expect("configure a");
        ns2.configure_iface(&v_b, Some("10.200.1.2/24"), None)
            .expect("configure b");

        let out = ns1.sh("ping -c 1 -W 1 10.200.1.2").expect("ping");
        assert!(out.contains(" 0% packet loss"), "ping failed:\n{out}");

        let links = ns1.links().expect("links");
        let veth = links.iter().find(|l| l.name == v_a).expect("veth listed");
        assert!(veth.mac.is_some());
    }
}
