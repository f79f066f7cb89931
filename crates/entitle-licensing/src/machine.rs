//! Machine fingerprinting for node-locked activation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

const FINGERPRINT_LEN: usize = 32;
const PROCESSOR_LEN: usize = 32;

/// Hardware and OS attributes that identify a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub hostname: Option<String>,
    /// 48-bit node id derived from the primary network interface.
    pub node_id: Option<u64>,
    pub os_name: Option<String>,
    pub os_release: Option<String>,
    pub processor: Option<String>,
}

impl MachineInfo {
    /// Read the attributes of the current machine. Never fails; unreadable
    /// attributes are left empty.
    pub fn collect() -> Self {
        let hostname = hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().trim().to_string())
            .filter(|h| !h.is_empty());

        Self {
            hostname,
            node_id: node_id(),
            os_name: sysinfo::System::name(),
            os_release: sysinfo::System::os_version(),
            processor: processor_brand(),
        }
    }

    /// First 32 hex chars of SHA-256 over the `|`-joined attributes. Falls
    /// back to the hostname alone when any attribute is missing.
    pub fn fingerprint(&self) -> String {
        let material = match (
            &self.hostname,
            self.node_id,
            &self.os_name,
            &self.os_release,
            &self.processor,
        ) {
            (Some(host), Some(node), Some(os), Some(release), Some(cpu)) => {
                let cpu: String = cpu.chars().take(PROCESSOR_LEN).collect();
                format!("{host}|{node}|{os}|{release}|{cpu}")
            }
            _ => self
                .hostname
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        };

        let digest = hex::encode(Sha256::digest(material.as_bytes()));
        digest[..FINGERPRINT_LEN].to_string()
    }

    pub fn is_complete(&self) -> bool {
        self.hostname.is_some()
            && self.node_id.is_some()
            && self.os_name.is_some()
            && self.os_release.is_some()
            && self.processor.is_some()
    }

    /// Short OS label recorded in activation device info.
    pub fn os_label(&self) -> String {
        match (&self.os_name, &self.os_release) {
            (Some(name), Some(release)) => format!("{name} {release}"),
            (Some(name), None) => name.clone(),
            _ => std::env::consts::OS.to_string(),
        }
    }
}

/// The current machine's identity, computed once.
#[derive(Debug, Clone)]
pub struct MachineIdentity {
    info: MachineInfo,
    fingerprint: String,
}

impl MachineIdentity {
    pub fn detect() -> Self {
        let identity = Self::from_info(MachineInfo::collect());
        if !identity.info.is_complete() {
            tracing::warn!(
                fingerprint = %identity.fingerprint,
                "Some machine attributes are unreadable, fingerprint uses hostname only"
            );
        }
        identity
    }

    pub fn from_info(info: MachineInfo) -> Self {
        let fingerprint = info.fingerprint();
        Self { info, fingerprint }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn info(&self) -> &MachineInfo {
        &self.info
    }

    pub fn hostname(&self) -> &str {
        self.info.hostname.as_deref().unwrap_or("unknown")
    }
}

fn processor_brand() -> Option<String> {
    let mut sys = sysinfo::System::new();
    sys.refresh_cpu_all();
    sys.cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
}

fn node_id() -> Option<u64> {
    mac_node_id(Path::new("/sys/class/net"))
        .or_else(|| machine_id_node(Path::new("/etc/machine-id")))
}

/// MAC address of the first non-loopback interface, by name order.
fn mac_node_id(net_dir: &Path) -> Option<u64> {
    let mut interfaces: Vec<_> = std::fs::read_dir(net_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.file_name().is_some_and(|name| name != "lo"))
        .collect();
    interfaces.sort();

    interfaces.iter().find_map(|iface| {
        let raw = std::fs::read_to_string(iface.join("address")).ok()?;
        parse_mac(raw.trim())
    })
}

fn parse_mac(raw: &str) -> Option<u64> {
    let hex: String = raw.split(':').collect();
    if hex.len() != 12 {
        return None;
    }
    u64::from_str_radix(&hex, 16).ok().filter(|node| *node != 0)
}

fn machine_id_node(path: &Path) -> Option<u64> {
    let raw = std::fs::read_to_string(path).ok()?;
    let raw = raw.trim();
    u64::from_str_radix(raw.get(..12)?, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pinned() -> MachineInfo {
        MachineInfo {
            hostname: Some("build-host".into()),
            node_id: Some(0x0242_ac11_0002),
            os_name: Some("Ubuntu".into()),
            os_release: Some("24.04".into()),
            processor: Some("AMD EPYC 7763 64-Core Processor with a long suffix".into()),
        }
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let info = pinned();
        let fp = info.fingerprint();
        assert_eq!(fp.len(), 32);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, info.fingerprint());
    }

    #[test]
    fn test_processor_truncated_before_hashing() {
        let mut longer = pinned();
        longer.processor = Some(format!("{}-extra-text", pinned().processor.unwrap()));
        assert_eq!(pinned().fingerprint(), longer.fingerprint());
    }

    #[test]
    fn test_missing_attribute_hashes_hostname_only() {
        let mut partial = pinned();
        partial.node_id = None;
        let hostname_only = MachineInfo {
            hostname: Some("build-host".into()),
            ..Default::default()
        };
        assert_eq!(partial.fingerprint(), hostname_only.fingerprint());
        assert_ne!(partial.fingerprint(), pinned().fingerprint());
        assert_eq!(MachineInfo::default().fingerprint().len(), 32);
    }

    #[test]
    fn test_detected_identity_is_deterministic() {
        let first = MachineIdentity::detect();
        let second = MachineIdentity::detect();
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint().len(), 32);
    }

    #[test]
    fn test_parse_mac() {
        assert_eq!(parse_mac("02:42:ac:11:00:02"), Some(0x0242_ac11_0002));
        assert_eq!(parse_mac("00:00:00:00:00:00"), None);
        assert_eq!(parse_mac("garbage"), None);
    }
}
