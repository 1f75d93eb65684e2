//! Property-collector filter construction and response parsing.
//!
//! The endpoint returns property values as a tagged union keyed by an
//! `xsi:type` attribute. We parse the handful of payload shapes the core
//! consumes into [`PropValue`] and dispatch by match everywhere else.

use crate::soap::{elem, xml_attr, xml_block, xml_blocks, xml_text};
use crate::types::{ManagedRef, VmQuestion};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Parsed payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `runtime` on a VirtualMachine.
#[derive(Debug, Clone, Default)]
pub struct RuntimeInfo {
    pub power_state: String,
    pub max_cpu_usage: i64,
    pub max_memory_usage: i64,
    pub question: Option<VmQuestion>,
}

/// `summary` on a VirtualMachine.
#[derive(Debug, Clone, Default)]
pub struct VmSummaryInfo {
    pub name: String,
    pub uuid: String,
    pub vmx_path: String,
    pub overall_status: String,
    pub guest_memory_usage: i64,
    pub overall_cpu_usage: i64,
}

/// `snapshot` on a VirtualMachine.
#[derive(Debug, Clone, Default)]
pub struct SnapshotInfo {
    pub current: Option<ManagedRef>,
}

/// One `layoutEx.file` entry.
#[derive(Debug, Clone)]
pub struct LayoutFile {
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cdrom,
    Ethernet,
    Disk,
    Controller,
    Other,
}

/// One entry of `config.hardware.device`.
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    pub key: i32,
    pub label: String,
    /// vim device type from `xsi:type`, e.g. "VirtualVmxnet3"
    pub type_name: String,
    pub kind: DeviceKind,
    pub backing_file: Option<String>,
    pub connected: bool,
    pub start_connected: bool,
    pub controller_key: Option<i32>,
    pub unit_number: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

impl TaskState {
    pub fn from_vim(s: &str) -> Self {
        match s {
            "queued" => TaskState::Queued,
            "running" => TaskState::Running,
            "success" => TaskState::Success,
            _ => TaskState::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Error)
    }
}

/// `info` on a Task.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub state: TaskState,
    pub progress: Option<i32>,
    pub description_message: Option<String>,
    pub error_message: Option<String>,
    /// Raw `<result>` block for callers that know its shape
    pub result_xml: Option<String>,
    pub entity: Option<ManagedRef>,
}

impl TaskInfo {
    /// "description.message - error.localizedMessage" for error reporting.
    pub fn failure_text(&self) -> String {
        format!(
            "{} - {}",
            self.description_message.as_deref().unwrap_or(""),
            self.error_message.as_deref().unwrap_or("unknown error")
        )
    }
}

/// `capability` on a Datastore.
#[derive(Debug, Clone)]
pub struct DatastoreCapability {
    pub top_level_directory_create: bool,
}

/// `summary` on a Datastore.
#[derive(Debug, Clone, Default)]
pub struct DatastoreSummaryInfo {
    pub name: String,
    pub url: String,
    pub accessible: bool,
}

/// `configManager` on a HostSystem.
#[derive(Debug, Clone, Default)]
pub struct HostConfigManager {
    pub network_system: Option<ManagedRef>,
}

/// One `networkInfo.portgroup` entry on a HostNetworkSystem.
#[derive(Debug, Clone)]
pub struct HostPortGroup {
    pub name: String,
    pub vswitch: String,
}

/// `config` on a DistributedVirtualPortgroup.
#[derive(Debug, Clone, Default)]
pub struct PortgroupConfig {
    pub key: String,
}

/// Tagged union of the property payloads the core consumes.
#[derive(Debug, Clone)]
pub enum PropValue {
    Text(String),
    Ref(ManagedRef),
    RefList(Vec<ManagedRef>),
    Runtime(RuntimeInfo),
    Summary(VmSummaryInfo),
    Snapshot(SnapshotInfo),
    Layout(Vec<LayoutFile>),
    Devices(Vec<VirtualDevice>),
    Task(TaskInfo),
    DsCapability(DatastoreCapability),
    DsSummary(DatastoreSummaryInfo),
    ConfigManager(HostConfigManager),
    PortGroups(Vec<HostPortGroup>),
    PortgroupConfig(PortgroupConfig),
    /// Unrecognised payload, kept verbatim
    Raw(String),
}

#[derive(Debug, Clone)]
pub struct DynamicProperty {
    pub name: String,
    pub val: PropValue,
}

/// One object and its requested properties.
#[derive(Debug, Clone)]
pub struct ObjectContent {
    pub obj: ManagedRef,
    pub props: Vec<DynamicProperty>,
}

impl ObjectContent {
    pub fn prop(&self, name: &str) -> Option<&PropValue> {
        self.props.iter().find(|p| p.name == name).map(|p| &p.val)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.prop(name) {
            Some(PropValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn reference(&self, name: &str) -> Option<&ManagedRef> {
        match self.prop(name) {
            Some(PropValue::Ref(r)) => Some(r),
            _ => None,
        }
    }

    pub fn ref_list(&self, name: &str) -> &[ManagedRef] {
        match self.prop(name) {
            Some(PropValue::RefList(rs)) => rs,
            _ => &[],
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Filter builders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn prop_set(type_name: &str, paths: &[&str]) -> String {
    let mut s = format!("<propSet><type>{type_name}</type><all>false</all>");
    for p in paths {
        s.push_str(&elem("pathSet", p));
    }
    s.push_str("</propSet>");
    s
}

fn traversal(name: &str, type_name: &str, path: &str, selects: &[&str]) -> String {
    let mut s = format!(
        "<selectSet xsi:type=\"TraversalSpec\"><name>{name}</name>\
         <type>{type_name}</type><path>{path}</path><skip>false</skip>"
    );
    for sel in selects {
        s.push_str(&format!("<selectSet><name>{sel}</name></selectSet>"));
    }
    s.push_str("</selectSet>");
    s
}

fn object_set(obj: &ManagedRef, traversals: &str) -> String {
    format!(
        "<objectSet>{}<skip>false</skip>{traversals}</objectSet>",
        obj.xml("obj")
    )
}

/// Properties of exactly one object, no traversal.
pub fn single_object_filter(obj: &ManagedRef, props: &[&str]) -> String {
    format!(
        "<specSet>{}{}</specSet>",
        prop_set(&obj.kind, props),
        object_set(obj, "")
    )
}

/// Properties of several objects of one type, no traversal.
pub fn objects_filter(objs: &[ManagedRef], type_name: &str, props: &[&str]) -> String {
    let mut sets = String::new();
    for o in objs {
        sets.push_str(&object_set(o, ""));
    }
    format!("<specSet>{}{sets}</specSet>", prop_set(type_name, props))
}

/// The connect-time inventory traversal rooted at the service root folder.
pub fn inventory_filter(root: &ManagedRef) -> String {
    let traversals = [
        traversal(
            "folders",
            "Folder",
            "childEntity",
            &["folders", "dcHostFolder", "dcNetworkFolder", "crPool", "crHost"],
        ),
        traversal("dcHostFolder", "Datacenter", "hostFolder", &["folders"]),
        traversal("dcNetworkFolder", "Datacenter", "networkFolder", &["folders"]),
        traversal("crPool", "ComputeResource", "resourcePool", &["pools"]),
        traversal("crHost", "ComputeResource", "host", &[]),
        traversal("pools", "ResourcePool", "resourcePool", &["pools"]),
    ]
    .concat();

    let props = [
        prop_set("Datacenter", &["name", "parent", "vmFolder"]),
        prop_set("ComputeResource", &["name", "parent", "resourcePool", "host"]),
        prop_set("HostSystem", &["configManager"]),
        prop_set("ResourcePool", &["name", "parent", "resourcePool"]),
        prop_set("DistributedVirtualSwitch", &["name", "parent", "uuid"]),
        prop_set("DistributedVirtualPortgroup", &["name", "parent", "config"]),
    ]
    .concat();

    format!("<specSet>{props}{}</specSet>", object_set(root, &traversals))
}

/// Every VM reachable from the resolved pool, with the cache property set.
pub fn pool_vms_filter(pool: &ManagedRef) -> String {
    let traversals = [
        traversal("pools", "ResourcePool", "resourcePool", &["pools", "poolVms"]),
        traversal("poolVms", "ResourcePool", "vm", &[]),
    ]
    .concat();
    // The pool itself also carries vm directly
    let direct = traversal("rootVms", "ResourcePool", "vm", &[]);
    format!(
        "<specSet>{}{}</specSet>",
        prop_set(
            "VirtualMachine",
            &["name", "summary", "runtime", "snapshot", "layoutEx.file"],
        ),
        object_set(pool, &format!("{direct}{traversals}"))
    )
}

/// Datastores reachable from the cluster, with browser/capability/summary.
pub fn cluster_datastores_filter(cluster: &ManagedRef) -> String {
    let t = traversal("crDatastores", "ComputeResource", "datastore", &[]);
    format!(
        "<specSet>{}{}</specSet>",
        prop_set("Datastore", &["browser", "capability", "summary"]),
        object_set(cluster, &t)
    )
}

/// Networks reachable from the cluster, with their attached-VM lists.
pub fn cluster_networks_filter(cluster: &ManagedRef) -> String {
    let t = traversal("crNetworks", "ComputeResource", "network", &[]);
    format!(
        "<specSet>{}{}</specSet>",
        prop_set("Network", &["name", "vm"]),
        object_set(cluster, &t)
    )
}

/// Port groups of one distributed switch.
pub fn dvs_portgroups_filter(dvs: &ManagedRef) -> String {
    let t = traversal("dvsPg", "DistributedVirtualSwitch", "portgroup", &[]);
    format!(
        "<specSet>{}{}</specSet>",
        prop_set("DistributedVirtualPortgroup", &["name", "config", "vm"]),
        object_set(dvs, &t)
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse every `<returnval>` of a RetrieveProperties response.
pub fn parse_object_contents(xml: &str) -> Vec<ObjectContent> {
    let mut out = Vec::new();
    for block in xml_blocks(xml, "returnval") {
        let Some(obj) = parse_ref_block(&block, "obj") else { continue };
        let mut props = Vec::new();
        for ps in xml_blocks(&block, "propSet") {
            let Some(name) = xml_text(&ps, "name") else { continue };
            let Some(val) = xml_block(&ps, "val") else { continue };
            props.push(DynamicProperty {
                val: parse_prop_value(&name, &val),
                name,
            });
        }
        out.push(ObjectContent { obj, props });
    }
    out
}

/// Parse a `<tag type="...">value</tag>` managed reference element.
pub fn parse_ref_block(xml: &str, tag: &str) -> Option<ManagedRef> {
    let block = xml_block(xml, tag)?;
    let kind = xml_attr(&block, "type")?;
    let value = xml_text(&block, tag)?;
    Some(ManagedRef::new(kind, value))
}

fn parse_prop_value(name: &str, val: &str) -> PropValue {
    let xsi = xml_attr(val, "xsi:type").unwrap_or_default();
    match xsi.as_str() {
        "ManagedObjectReference" => match xml_text(val, "val") {
            Some(v) => PropValue::Ref(ManagedRef::new(
                xml_attr(val, "type").unwrap_or_default(),
                v,
            )),
            None => PropValue::Raw(val.to_string()),
        },
        "ArrayOfManagedObjectReference" => PropValue::RefList(
            xml_blocks(val, "ManagedObjectReference")
                .iter()
                .filter_map(|b| {
                    Some(ManagedRef::new(
                        xml_attr(b, "type")?,
                        xml_text(b, "ManagedObjectReference")?,
                    ))
                })
                .collect(),
        ),
        "VirtualMachineRuntimeInfo" => PropValue::Runtime(parse_runtime(val)),
        "VirtualMachineSummary" => PropValue::Summary(parse_vm_summary(val)),
        "VirtualMachineSnapshotInfo" => PropValue::Snapshot(SnapshotInfo {
            current: parse_ref_block(val, "currentSnapshot"),
        }),
        "ArrayOfVirtualMachineFileLayoutExFileInfo" => PropValue::Layout(
            xml_blocks(val, "VirtualMachineFileLayoutExFileInfo")
                .iter()
                .map(|b| LayoutFile {
                    name: xml_text(b, "name").unwrap_or_default(),
                    kind: xml_text(b, "type").unwrap_or_default(),
                })
                .collect(),
        ),
        "ArrayOfVirtualDevice" => PropValue::Devices(
            xml_blocks(val, "VirtualDevice")
                .iter()
                .filter_map(|b| parse_device(b))
                .collect(),
        ),
        "TaskInfo" => PropValue::Task(parse_task_info(val)),
        "DatastoreCapability" => PropValue::DsCapability(DatastoreCapability {
            top_level_directory_create: xml_text(val, "topLevelDirectoryCreateSupported")
                .map(|v| v == "true")
                .unwrap_or(true),
        }),
        "DatastoreSummary" => PropValue::DsSummary(DatastoreSummaryInfo {
            name: xml_text(val, "name").unwrap_or_default(),
            url: xml_text(val, "url").unwrap_or_default(),
            accessible: xml_text(val, "accessible").map(|v| v == "true").unwrap_or(false),
        }),
        "HostConfigManager" => PropValue::ConfigManager(HostConfigManager {
            network_system: parse_ref_block(val, "networkSystem"),
        }),
        "ArrayOfHostPortGroup" => PropValue::PortGroups(
            xml_blocks(val, "HostPortGroup")
                .iter()
                .filter_map(|b| {
                    let spec = xml_block(b, "spec")?;
                    Some(HostPortGroup {
                        name: xml_text(&spec, "name")?,
                        vswitch: xml_text(&spec, "vswitchName").unwrap_or_default(),
                    })
                })
                .collect(),
        ),
        "DVPortgroupConfigInfo" => PropValue::PortgroupConfig(PortgroupConfig {
            key: xml_text(val, "key").unwrap_or_default(),
        }),
        _ => {
            // Plain leaves come through with xsd types or none at all
            match xml_text(val, "val") {
                Some(text) if !text.contains('<') => PropValue::Text(text),
                _ => {
                    log::trace!("unparsed property payload {name} ({xsi})");
                    PropValue::Raw(val.to_string())
                }
            }
        }
    }
}

fn parse_runtime(val: &str) -> RuntimeInfo {
    RuntimeInfo {
        power_state: xml_text(val, "powerState").unwrap_or_default(),
        max_cpu_usage: xml_text(val, "maxCpuUsage")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        max_memory_usage: xml_text(val, "maxMemoryUsage")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        question: xml_block(val, "question").and_then(|q| parse_question(&q)),
    }
}

fn parse_question(q: &str) -> Option<VmQuestion> {
    let id = xml_text(q, "id")?;
    let prompt = xml_text(q, "text").unwrap_or_default();
    let choice = xml_block(q, "choice").unwrap_or_default();
    let choices: Vec<String> = xml_blocks(&choice, "choiceInfo")
        .iter()
        .filter_map(|c| xml_text(c, "label").or_else(|| xml_text(c, "key")))
        .collect();
    let default_choice = xml_text(&choice, "defaultIndex")
        .and_then(|i| i.parse::<usize>().ok())
        .and_then(|i| choices.get(i).cloned())
        .unwrap_or_default();
    Some(VmQuestion { id, prompt, default_choice, choices })
}

fn parse_vm_summary(val: &str) -> VmSummaryInfo {
    let quick = xml_block(val, "quickStats").unwrap_or_default();
    VmSummaryInfo {
        name: xml_text(val, "name").unwrap_or_default(),
        uuid: xml_text(val, "uuid").unwrap_or_default(),
        vmx_path: xml_text(val, "vmPathName").unwrap_or_default(),
        overall_status: xml_text(val, "overallStatus").unwrap_or_default(),
        guest_memory_usage: xml_text(&quick, "guestMemoryUsage")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        overall_cpu_usage: xml_text(&quick, "overallCpuUsage")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    }
}

fn classify_device(type_name: &str) -> DeviceKind {
    if type_name.contains("Cdrom") {
        DeviceKind::Cdrom
    } else if type_name.contains("Vmxnet")
        || type_name.contains("E1000")
        || type_name.contains("PCNet")
        || type_name.contains("Sriov")
    {
        DeviceKind::Ethernet
    } else if type_name == "VirtualDisk" {
        DeviceKind::Disk
    } else if type_name.contains("Controller") {
        DeviceKind::Controller
    } else {
        DeviceKind::Other
    }
}

fn parse_device(b: &str) -> Option<VirtualDevice> {
    let type_name = xml_attr(b, "xsi:type").unwrap_or_else(|| "VirtualDevice".into());
    let key: i32 = xml_text(b, "key")?.parse().ok()?;
    let info = xml_block(b, "deviceInfo").unwrap_or_default();
    let backing = xml_block(b, "backing").unwrap_or_default();
    let connectable = xml_block(b, "connectable").unwrap_or_default();
    Some(VirtualDevice {
        key,
        label: xml_text(&info, "label").unwrap_or_default(),
        kind: classify_device(&type_name),
        backing_file: xml_text(&backing, "fileName"),
        connected: xml_text(&connectable, "connected").map(|v| v == "true").unwrap_or(false),
        start_connected: xml_text(&connectable, "startConnected")
            .map(|v| v == "true")
            .unwrap_or(false),
        controller_key: xml_text(b, "controllerKey").and_then(|v| v.parse().ok()),
        unit_number: xml_text(b, "unitNumber").and_then(|v| v.parse().ok()),
        type_name,
    })
}

/// Parse a `TaskInfo` payload (from a `val` block or a raw `info` block).
pub fn parse_task_info(val: &str) -> TaskInfo {
    let error = xml_block(val, "error");
    TaskInfo {
        state: TaskState::from_vim(&xml_text(val, "state").unwrap_or_default()),
        progress: xml_text(val, "progress").and_then(|v| v.parse().ok()),
        description_message: xml_block(val, "description").and_then(|d| xml_text(&d, "message")),
        error_message: error.as_deref().and_then(|e| xml_text(e, "localizedMessage")),
        result_xml: xml_block(val, "result"),
        entity: parse_ref_block(val, "entity"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VM_RETURNVAL: &str = r#"<returnval>
      <obj type="VirtualMachine">vm-11</obj>
      <propSet><name>name</name><val xsi:type="xsd:string">alpha#ws1</val></propSet>
      <propSet><name>runtime</name><val xsi:type="VirtualMachineRuntimeInfo">
        <powerState>poweredOn</powerState>
        <maxCpuUsage>4000</maxCpuUsage><maxMemoryUsage>2048</maxMemoryUsage>
      </val></propSet>
      <propSet><name>summary</name><val xsi:type="VirtualMachineSummary">
        <config><name>alpha#ws1</name><uuid>u-1</uuid>
          <vmPathName>[ds1] alpha/alpha.vmx</vmPathName></config>
        <quickStats><guestMemoryUsage>1024</guestMemoryUsage>
          <overallCpuUsage>1000</overallCpuUsage></quickStats>
        <overallStatus>green</overallStatus>
      </val></propSet>
      <propSet><name>snapshot</name><val xsi:type="VirtualMachineSnapshotInfo">
        <currentSnapshot type="VirtualMachineSnapshot">snap-3</currentSnapshot>
      </val></propSet>
    </returnval>"#;

    #[test]
    fn parses_vm_object_content() {
        let contents = parse_object_contents(VM_RETURNVAL);
        assert_eq!(contents.len(), 1);
        let oc = &contents[0];
        assert_eq!(oc.obj, ManagedRef::new("VirtualMachine", "vm-11"));
        assert_eq!(oc.text("name"), Some("alpha#ws1"));
        match oc.prop("runtime") {
            Some(PropValue::Runtime(rt)) => {
                assert_eq!(rt.power_state, "poweredOn");
                assert_eq!(rt.max_cpu_usage, 4000);
            }
            other => panic!("unexpected runtime: {other:?}"),
        }
        match oc.prop("summary") {
            Some(PropValue::Summary(s)) => {
                assert_eq!(s.uuid, "u-1");
                assert_eq!(s.vmx_path, "[ds1] alpha/alpha.vmx");
                assert_eq!(s.guest_memory_usage, 1024);
            }
            other => panic!("unexpected summary: {other:?}"),
        }
        match oc.prop("snapshot") {
            Some(PropValue::Snapshot(s)) => {
                assert_eq!(s.current, Some(ManagedRef::new("VirtualMachineSnapshot", "snap-3")));
            }
            other => panic!("unexpected snapshot: {other:?}"),
        }
    }

    #[test]
    fn parses_ref_list() {
        let xml = r#"<returnval><obj type="ComputeResource">domain-c1</obj>
          <propSet><name>host</name><val xsi:type="ArrayOfManagedObjectReference">
            <ManagedObjectReference type="HostSystem">host-1</ManagedObjectReference>
            <ManagedObjectReference type="HostSystem">host-2</ManagedObjectReference>
          </val></propSet></returnval>"#;
        let oc = &parse_object_contents(xml)[0];
        assert_eq!(oc.ref_list("host").len(), 2);
        assert_eq!(oc.ref_list("host")[1].value, "host-2");
    }

    #[test]
    fn parses_devices() {
        let xml = r#"<val xsi:type="ArrayOfVirtualDevice">
          <VirtualDevice xsi:type="VirtualCdrom"><key>3000</key>
            <deviceInfo><label>CD/DVD drive 1</label></deviceInfo>
            <backing xsi:type="VirtualCdromIsoBackingInfo"><fileName>[ds1] a.iso</fileName></backing>
            <connectable><startConnected>true</startConnected><connected>true</connected></connectable>
            <controllerKey>200</controllerKey><unitNumber>0</unitNumber>
          </VirtualDevice>
          <VirtualDevice xsi:type="VirtualVmxnet3"><key>4000</key>
            <deviceInfo><label>Network adapter 1</label></deviceInfo>
          </VirtualDevice>
        </val>"#;
        match parse_prop_value("config.hardware.device", xml) {
            PropValue::Devices(devices) => {
                assert_eq!(devices.len(), 2);
                assert_eq!(devices[0].kind, DeviceKind::Cdrom);
                assert_eq!(devices[0].backing_file.as_deref(), Some("[ds1] a.iso"));
                assert!(devices[0].connected);
                assert_eq!(devices[1].kind, DeviceKind::Ethernet);
                assert_eq!(devices[1].label, "Network adapter 1");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_task_info_error() {
        let xml = r#"<val xsi:type="TaskInfo">
          <state>error</state>
          <description><message>Power On virtual machine</message></description>
          <error xsi:type="InvalidPowerState">
            <localizedMessage>The virtual machine is already powered on.</localizedMessage>
          </error>
        </val>"#;
        let info = parse_task_info(xml);
        assert_eq!(info.state, TaskState::Error);
        assert!(info.state.is_terminal());
        assert_eq!(
            info.failure_text(),
            "Power On virtual machine - The virtual machine is already powered on."
        );
    }

    #[test]
    fn parses_datastore_capability() {
        let xml = r#"<val xsi:type="DatastoreCapability">
          <topLevelDirectoryCreateSupported>false</topLevelDirectoryCreateSupported>
        </val>"#;
        match parse_prop_value("capability", xml) {
            PropValue::DsCapability(c) => assert!(!c.top_level_directory_create),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn capability_defaults_to_classic() {
        match parse_prop_value("capability", r#"<val xsi:type="DatastoreCapability"></val>"#) {
            PropValue::DsCapability(c) => assert!(c.top_level_directory_create),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_question() {
        let xml = r#"<val xsi:type="VirtualMachineRuntimeInfo">
          <powerState>poweredOn</powerState>
          <question><id>q-1</id><text>This disk was moved. Did you move it?</text>
            <choice>
              <choiceInfo><key>0</key><label>Cancel</label></choiceInfo>
              <choiceInfo><key>1</key><label>I moved it</label></choiceInfo>
              <choiceInfo><key>2</key><label>I copied it</label></choiceInfo>
              <defaultIndex>1</defaultIndex>
            </choice>
          </question>
        </val>"#;
        let rt = parse_runtime(xml);
        let q = rt.question.unwrap();
        assert_eq!(q.id, "q-1");
        assert_eq!(q.choices.len(), 3);
        assert_eq!(q.default_choice, "I moved it");
    }

    #[test]
    fn filter_builders_shape() {
        let pool = ManagedRef::new("ResourcePool", "resgroup-8");
        let f = pool_vms_filter(&pool);
        assert!(f.contains("<type>VirtualMachine</type>"));
        assert!(f.contains("<pathSet>layoutEx.file</pathSet>"));
        assert!(f.contains("<obj type=\"ResourcePool\">resgroup-8</obj>"));

        let root = ManagedRef::new("Folder", "group-d1");
        let inv = inventory_filter(&root);
        assert!(inv.contains("<path>childEntity</path>"));
        assert!(inv.contains("<type>DistributedVirtualSwitch</type>"));
        assert!(inv.contains("<pathSet>configManager</pathSet>"));
    }
}
