//! Shared types for the vSphere client core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Connection / Config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Top-level configuration for one hypervisor endpoint (a standalone ESXi
/// host or a vCenter cluster endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Endpoint display name / DNS name (e.g. "esx1.lab.local")
    pub host: String,
    /// SDK endpoint URL (e.g. "https://esx1.lab.local/sdk")
    pub url: String,
    /// Username (e.g. "administrator@vsphere.local")
    pub user: String,
    /// Password
    pub password: String,
    /// `<datacenter>/<cluster>/<pool>`, matched case-insensitively
    #[serde(default)]
    pub pool_path: String,
    /// Distributed switch name, host vSwitch name, or `nsx.<uplink>`
    #[serde(default)]
    pub uplink: String,
    /// Force the overlay (NSX) network manager
    #[serde(default)]
    pub is_nsx_network: bool,
    /// SDDC identifier for the overlay control plane
    #[serde(default)]
    pub sddc: String,
    /// Datastore path pattern for deployed VMs; `{host}` is replaced with
    /// the first DNS label of `host`
    #[serde(default)]
    pub vm_store: String,
    /// Tenant string matched against the suffix of a VM name after `#`
    #[serde(default)]
    pub tenant: String,
    /// Port groups matching this pattern are never provisioned or swept
    #[serde(default)]
    pub exclude_network_mask: String,
    /// Idle minutes before the session monitor disconnects
    #[serde(default = "default_keep_alive")]
    pub keep_alive_minutes: i64,
    /// Skip TLS certificate verification (self-signed labs)
    #[serde(default)]
    pub ignore_certificate_errors: bool,
    /// Enable fine-grained trace logging
    #[serde(default)]
    pub debug_verbose: bool,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_keep_alive() -> i64 { 30 }
fn default_timeout() -> u64 { 100 }

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            url: String::new(),
            user: String::new(),
            password: String::new(),
            pool_path: String::new(),
            uplink: String::new(),
            is_nsx_network: false,
            sddc: String::new(),
            vm_store: String::new(),
            tenant: String::new(),
            exclude_network_mask: String::new(),
            keep_alive_minutes: 30,
            ignore_certificate_errors: false,
            debug_verbose: false,
            timeout_secs: 100,
        }
    }
}

impl ClientConfig {
    /// First DNS label of `host` ("esx1.lab.local" → "esx1").
    pub fn host_prefix(&self) -> &str {
        self.host.split('.').next().unwrap_or(&self.host)
    }

    /// The configured `vm_store` pattern with `{host}` substituted.
    pub fn vm_store_resolved(&self) -> String {
        self.vm_store.replace("{host}", self.host_prefix())
    }

    /// Config without the password, safe to log or hand out.
    pub fn redacted(&self) -> ClientConfig {
        ClientConfig {
            password: String::new(),
            ..self.clone()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Managed references
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Opaque `{type, value}` handle identifying an object on the endpoint.
/// Stringified as `type|value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedRef {
    pub kind: String,
    pub value: String,
}

impl ManagedRef {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self { kind: kind.into(), value: value.into() }
    }

    /// Parse the `type|value` string form.
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, value) = s.split_once('|')?;
        if kind.is_empty() || value.is_empty() {
            return None;
        }
        Some(Self::new(kind, value))
    }

    /// Serialize as a SOAP element, e.g. `<_this type="VirtualMachine">vm-42</_this>`.
    pub fn xml(&self, tag: &str) -> String {
        format!(
            "<{tag} type=\"{}\">{}</{tag}>",
            self.kind,
            crate::soap::xml_escape(&self.value)
        )
    }
}

impl fmt::Display for ManagedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.kind, self.value)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Datastore paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parsed `[datastore] top/sub/file` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastorePath {
    pub datastore: String,
    pub folder_path: String,
    pub file: String,
}

impl DatastorePath {
    /// Parse a bracketed datastore path. The final component is treated as
    /// the file; everything before it is the folder path.
    pub fn parse(path: &str) -> Option<Self> {
        let rest = path.strip_prefix('[')?;
        let (datastore, tail) = rest.split_once(']')?;
        let tail = tail.trim_start();
        let (folder_path, file) = match tail.rsplit_once('/') {
            Some((folder, file)) => (folder.to_string(), file.to_string()),
            None => (String::new(), tail.to_string()),
        };
        Some(Self {
            datastore: datastore.to_string(),
            folder_path,
            file,
        })
    }

    /// First folder component, empty if the path has no folder.
    pub fn top_level_folder(&self) -> &str {
        self.folder_path.split('/').next().unwrap_or("")
    }

    /// Folder components after the top level ("a/b/c" → "b/c").
    pub fn below_top_level(&self) -> &str {
        match self.folder_path.split_once('/') {
            Some((_, rest)) => rest,
            None => "",
        }
    }

    /// Extension of the file component including the dot, or empty.
    pub fn file_extension(&self) -> &str {
        match self.file.rfind('.') {
            Some(idx) if idx > 0 => &self.file[idx..],
            _ => "",
        }
    }

    /// The bracketed folder part only, without the file component.
    pub fn folder(&self) -> String {
        if self.folder_path.is_empty() {
            format!("[{}]", self.datastore)
        } else {
            format!("[{}] {}", self.datastore, self.folder_path)
        }
    }
}

impl fmt::Display for DatastorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.folder_path.is_empty() {
            write!(f, "[{}] {}", self.datastore, self.file)
        } else {
            write!(f, "[{}] {}/{}", self.datastore, self.folder_path, self.file)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  VM model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    Off,
    Running,
}

impl PowerState {
    /// Map the endpoint's `runtime.powerState` string.
    pub fn from_vim(s: &str) -> Self {
        if s.eq_ignore_ascii_case("poweredOn") {
            PowerState::Running
        } else {
            PowerState::Off
        }
    }
}

impl Default for PowerState {
    fn default() -> Self { PowerState::Off }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VmStatus {
    Initialized,
    Deployed,
}

impl Default for VmStatus {
    fn default() -> Self { VmStatus::Initialized }
}

/// Progress view of a long-running operation attached to a VM.
/// `-1` encodes error, `100` terminal success.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmTask {
    pub name: String,
    pub when_created: DateTime<Utc>,
    pub progress: i32,
}

/// A pending interactive prompt blocking a VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmQuestion {
    pub id: String,
    pub prompt: String,
    pub default_choice: String,
    pub choices: Vec<String>,
}

/// One virtual machine as observed on the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vm {
    /// Stable UUID reported by the hypervisor
    pub id: String,
    pub name: String,
    /// Endpoint name this VM is owned by
    pub host: String,
    /// Datastore path to the .vmx file
    pub path: String,
    pub disk_path: String,
    pub state: PowerState,
    /// Managed reference, stringified `type|value`
    pub reference: String,
    pub stats: String,
    pub status: VmStatus,
    #[serde(default)]
    pub question: Option<VmQuestion>,
    #[serde(default)]
    pub task: Option<VmTask>,
}

impl Vm {
    pub fn managed_ref(&self) -> Option<ManagedRef> {
        ManagedRef::parse(&self.reference)
    }
}

/// Tag after the final `#` of a VM name; `None` when there is no `#`.
pub fn name_tag(name: &str) -> Option<&str> {
    name.rsplit_once('#').map(|(_, tag)| tag)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Deploy inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmDisk {
    /// Source path; `blank-<size>-<adapter>.vmdk` creates a fresh disk
    #[serde(default)]
    pub path: String,
    /// Size in GiB
    pub size: i64,
    /// Controller kind (`lsiLogic`, `busLogic`, ...)
    #[serde(default)]
    pub controller: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmNic {
    /// Port-group name this NIC attaches to
    pub net: String,
    /// Adapter type, defaults to vmxnet3
    #[serde(default)]
    pub adapter: String,
}

/// Declarative input to `deploy`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmTemplate {
    pub name: String,
    /// Guest OS identifier (e.g. "ubuntu64Guest")
    #[serde(default)]
    pub os: String,
    #[serde(default = "default_cpu")]
    pub cpu: i32,
    /// Memory in MiB
    #[serde(default = "default_memory")]
    pub memory: i64,
    #[serde(default)]
    pub disks: Vec<VmDisk>,
    #[serde(default)]
    pub nics: Vec<VmNic>,
    /// ISO datastore path mounted at deploy time
    #[serde(default)]
    pub iso: String,
    /// guestinfo key/value pairs pushed as extraConfig
    #[serde(default)]
    pub guestinfo: HashMap<String, String>,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub host_affinity_tag: String,
    /// Attach NICs to the uplink switch rather than host-local groups
    #[serde(default)]
    pub use_uplink_switch: bool,
}

fn default_cpu() -> i32 { 1 }
fn default_memory() -> i64 { 1024 }

/// One mutation request against a deployed VM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmKeyValue {
    /// One of `iso`, `net`, `eth`, `boot`, `guest`
    pub key: String,
    /// Dialectal payload; an optional `:<label>` suffix selects the device
    pub value: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Ethernet backing dialects
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// NIC backing across the three network strata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EthernetBacking {
    /// Host-local standard port group
    Standard { network: String },
    /// Distributed-switch port group
    Distributed { switch_uuid: String, portgroup_key: String },
    /// NSX opaque network / segment
    Opaque { network_id: String, network_type: String },
}

/// A NIC device spec as held between lookup and reconfigure.
#[derive(Debug, Clone)]
pub struct EthernetCard {
    pub key: i32,
    pub label: String,
    /// vim device type, e.g. "VirtualVmxnet3"
    pub type_name: String,
    pub backing: EthernetBacking,
    pub connected: bool,
    pub start_connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_prefix_first_label() {
        let cfg = ClientConfig { host: "esx1.lab.local".into(), ..Default::default() };
        assert_eq!(cfg.host_prefix(), "esx1");
    }

    #[test]
    fn host_prefix_bare_name() {
        let cfg = ClientConfig { host: "esx1".into(), ..Default::default() };
        assert_eq!(cfg.host_prefix(), "esx1");
    }

    #[test]
    fn vm_store_substitution() {
        let cfg = ClientConfig {
            host: "esx1.lab.local".into(),
            vm_store: "[{host}-store] vms".into(),
            ..Default::default()
        };
        assert_eq!(cfg.vm_store_resolved(), "[esx1-store] vms");
    }

    #[test]
    fn redacted_drops_password() {
        let cfg = ClientConfig { password: "secret".into(), ..Default::default() };
        assert!(cfg.redacted().password.is_empty());
    }

    #[test]
    fn managed_ref_round_trip() {
        let r = ManagedRef::new("VirtualMachine", "vm-42");
        assert_eq!(r.to_string(), "VirtualMachine|vm-42");
        assert_eq!(ManagedRef::parse("VirtualMachine|vm-42"), Some(r));
    }

    #[test]
    fn managed_ref_rejects_malformed() {
        assert_eq!(ManagedRef::parse("vm-42"), None);
        assert_eq!(ManagedRef::parse("|vm-42"), None);
    }

    #[test]
    fn managed_ref_xml() {
        let r = ManagedRef::new("Task", "task-7");
        assert_eq!(r.xml("_this"), "<_this type=\"Task\">task-7</_this>");
    }

    #[test]
    fn datastore_path_full() {
        let p = DatastorePath::parse("[ds1] ws1/sub/box.vmx").unwrap();
        assert_eq!(p.datastore, "ds1");
        assert_eq!(p.folder_path, "ws1/sub");
        assert_eq!(p.file, "box.vmx");
        assert_eq!(p.top_level_folder(), "ws1");
        assert_eq!(p.below_top_level(), "sub");
        assert_eq!(p.file_extension(), ".vmx");
        assert_eq!(p.to_string(), "[ds1] ws1/sub/box.vmx");
    }

    #[test]
    fn datastore_path_no_folder() {
        let p = DatastorePath::parse("[ds1] box.vmx").unwrap();
        assert_eq!(p.folder_path, "");
        assert_eq!(p.file, "box.vmx");
        assert_eq!(p.top_level_folder(), "");
        assert_eq!(p.folder(), "[ds1]");
    }

    #[test]
    fn datastore_path_wildcard() {
        let p = DatastorePath::parse("[vsan] ws1/*").unwrap();
        assert_eq!(p.top_level_folder(), "ws1");
        assert_eq!(p.file, "*");
        assert_eq!(p.file_extension(), "");
    }

    #[test]
    fn datastore_path_rejects_unbracketed() {
        assert!(DatastorePath::parse("ws1/box.vmx").is_none());
    }

    #[test]
    fn name_tag_suffix() {
        assert_eq!(name_tag("alpha#ws1"), Some("ws1"));
        assert_eq!(name_tag("a#b#ws2"), Some("ws2"));
        assert_eq!(name_tag("alpha"), None);
        assert_eq!(name_tag("alpha#"), Some(""));
    }

    #[test]
    fn power_state_mapping() {
        assert_eq!(PowerState::from_vim("poweredOn"), PowerState::Running);
        assert_eq!(PowerState::from_vim("poweredOff"), PowerState::Off);
        assert_eq!(PowerState::from_vim("suspended"), PowerState::Off);
    }
}
