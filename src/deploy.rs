//! Translation of declarative VM templates into vim device specs.
//!
//! Everything here is pure string building; the service issues the
//! resulting bodies through the RPC adapter. Element order follows the
//! vim25 schema sequences.

use crate::types::{ClientConfig, EthernetBacking, EthernetCard, VmTemplate};
use crate::property::VirtualDevice;
use crate::soap::elem;

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref BLANK_DISK: Regex =
        Regex::new(r"^blank-(\d+)-([^.]+)\.vmdk$").unwrap();
}

/// Boot delay pushed onto deployed VMs so consoles can attach in time.
const DEFAULT_BOOT_DELAY_MS: i64 = 1000;

/// Adapter names arrive lowercased from template sources.
pub fn normalize_adapter(adapter: &str) -> String {
    match adapter.to_ascii_lowercase().as_str() {
        "lsilogic" => "lsiLogic".to_string(),
        "buslogic" => "busLogic".to_string(),
        other => other.to_string(),
    }
}

/// Parse a `blank-<size>-<adapter>.vmdk` source into (GiB, adapter).
pub fn parse_blank_disk(source: &str) -> Option<(i64, String)> {
    let caps = BLANK_DISK.captures(source)?;
    let size: i64 = caps.get(1)?.as_str().parse().ok()?;
    Some((size, normalize_adapter(caps.get(2)?.as_str())))
}

fn controller_type(controller: &str) -> &'static str {
    match normalize_adapter(controller).as_str() {
        "busLogic" => "VirtualBusLogicController",
        "lsiLogicsas" | "lsilogicsas" => "VirtualLsiLogicSASController",
        _ => "VirtualLsiLogicController",
    }
}

fn nic_type(adapter: &str) -> &'static str {
    match adapter.to_ascii_lowercase().as_str() {
        "e1000" => "VirtualE1000",
        "e1000e" => "VirtualE1000e",
        _ => "VirtualVmxnet3",
    }
}

/// Backing element for a NIC across the three network strata.
pub fn ethernet_backing_xml(backing: &EthernetBacking) -> String {
    match backing {
        EthernetBacking::Standard { network } => format!(
            "<backing xsi:type=\"VirtualEthernetCardNetworkBackingInfo\">{}</backing>",
            elem("deviceName", network),
        ),
        EthernetBacking::Distributed { switch_uuid, portgroup_key } => format!(
            "<backing xsi:type=\"VirtualEthernetCardDistributedVirtualPortBackingInfo\">\
             <port>{}{}</port></backing>",
            elem("switchUuid", switch_uuid),
            elem("portgroupKey", portgroup_key),
        ),
        EthernetBacking::Opaque { network_id, network_type } => format!(
            "<backing xsi:type=\"VirtualEthernetCardOpaqueNetworkBackingInfo\">{}{}</backing>",
            elem("opaqueNetworkId", network_id),
            elem("opaqueNetworkType", network_type),
        ),
    }
}

fn connectable_xml(connected: bool, start_connected: bool) -> String {
    format!(
        "<connectable><startConnected>{start_connected}</startConnected>\
         <allowGuestControl>true</allowGuestControl>\
         <connected>{connected}</connected></connectable>"
    )
}

fn guestinfo_key(key: &str) -> String {
    if key.starts_with("guestinfo.") {
        key.to_string()
    } else {
        format!("guestinfo.{key}")
    }
}

fn extra_config_xml(key: &str, value: &str) -> String {
    format!(
        "<extraConfig xsi:type=\"OptionValue\">{}<value xsi:type=\"xsd:string\">{}</value></extraConfig>",
        elem("key", &guestinfo_key(key)),
        crate::soap::xml_escape(value),
    )
}

/// Build the `VirtualMachineConfigSpec` body for `CreateVM_Task`.
///
/// Disks with a concrete path are attached in place; blank or empty
/// sources create fresh thin disks alongside the VM. NIC backings come
/// from the network manager's resolution, keyed by port-group name.
pub fn build_config_spec(
    template: &VmTemplate,
    config: &ClientConfig,
    backings: &HashMap<String, EthernetBacking>,
) -> String {
    let store = config.vm_store_resolved();
    let vmx_path = format!("{}/{}/{}.vmx", store, template.name, template.name);

    let mut spec = String::new();
    spec.push_str(&elem("name", &template.name));
    if !template.os.is_empty() {
        spec.push_str(&elem("guestId", &template.os));
    }
    spec.push_str(&format!("<files>{}</files>", elem("vmPathName", &vmx_path)));
    spec.push_str(&format!("<numCPUs>{}</numCPUs>", template.cpu));
    spec.push_str(&format!("<memoryMB>{}</memoryMB>", template.memory));

    // One controller per distinct disk controller kind
    let mut controllers: Vec<String> = Vec::new();
    for disk in &template.disks {
        let kind = normalize_adapter(if disk.controller.is_empty() {
            "lsiLogic"
        } else {
            &disk.controller
        });
        if !controllers.contains(&kind) {
            controllers.push(kind);
        }
    }
    if controllers.is_empty() && !template.disks.is_empty() {
        controllers.push("lsiLogic".to_string());
    }
    for (bus, kind) in controllers.iter().enumerate() {
        spec.push_str(&format!(
            "<deviceChange><operation>add</operation>\
             <device xsi:type=\"{}\"><key>{}</key>\
             <busNumber>{bus}</busNumber><sharedBus>noSharing</sharedBus>\
             </device></deviceChange>",
            controller_type(kind),
            controller_key(bus),
        ));
    }

    for (i, disk) in template.disks.iter().enumerate() {
        let kind = normalize_adapter(if disk.controller.is_empty() {
            "lsiLogic"
        } else {
            &disk.controller
        });
        let bus = controllers.iter().position(|c| c == &kind).unwrap_or(0);
        let attach_existing =
            !disk.path.is_empty() && parse_blank_disk(&disk.path).is_none();
        let file_op = if attach_existing {
            ""
        } else {
            "<fileOperation>create</fileOperation>"
        };
        let file_name = if attach_existing { disk.path.as_str() } else { "" };
        // Unit 7 is reserved for the controller itself
        let unit = if i >= 7 { i + 1 } else { i };
        spec.push_str(&format!(
            "<deviceChange><operation>add</operation>{file_op}\
             <device xsi:type=\"VirtualDisk\"><key>{}</key>\
             <backing xsi:type=\"VirtualDiskFlatVer2BackingInfo\">{}\
             <diskMode>persistent</diskMode><thinProvisioned>true</thinProvisioned>\
             </backing>\
             <controllerKey>{}</controllerKey><unitNumber>{unit}</unitNumber>\
             <capacityInKB>{}</capacityInKB></device></deviceChange>",
            -200 - i as i64,
            elem("fileName", file_name),
            controller_key(bus),
            disk.size * 1024 * 1024,
        ));
    }

    if !template.iso.is_empty() {
        // New VMs carry a default IDE controller at key 200
        spec.push_str(&format!(
            "<deviceChange><operation>add</operation>\
             <device xsi:type=\"VirtualCdrom\"><key>-300</key>\
             <backing xsi:type=\"VirtualCdromIsoBackingInfo\">{}</backing>\
             {}<controllerKey>200</controllerKey><unitNumber>0</unitNumber>\
             </device></deviceChange>",
            elem("fileName", &template.iso),
            connectable_xml(true, true),
        ));
    }

    for (i, nic) in template.nics.iter().enumerate() {
        let backing = backings
            .get(&nic.net)
            .cloned()
            .unwrap_or(EthernetBacking::Standard { network: nic.net.clone() });
        // A NIC with no net is created parked: present but disconnected
        let attached = !nic.net.is_empty();
        spec.push_str(&format!(
            "<deviceChange><operation>add</operation>\
             <device xsi:type=\"{}\"><key>{}</key>{}{}\
             <addressType>generated</addressType></device></deviceChange>",
            nic_type(&nic.adapter),
            -400 - i as i64,
            ethernet_backing_xml(&backing),
            connectable_xml(attached, attached),
        ));
    }

    let mut keys: Vec<&String> = template.guestinfo.keys().collect();
    keys.sort();
    for key in keys {
        spec.push_str(&extra_config_xml(key, &template.guestinfo[key]));
    }

    spec.push_str(&format!(
        "<bootOptions><bootDelay>{DEFAULT_BOOT_DELAY_MS}</bootDelay></bootOptions>"
    ));
    spec
}

fn controller_key(bus: usize) -> i64 {
    -100 - bus as i64
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Reconfigure edit specs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Point an existing CD-ROM at an ISO and connect it.
pub fn edit_cdrom_spec(device: &VirtualDevice, iso_path: &str) -> String {
    format!(
        "<deviceChange><operation>edit</operation>\
         <device xsi:type=\"{}\"><key>{}</key>\
         <backing xsi:type=\"VirtualCdromIsoBackingInfo\">{}</backing>{}\
         </device></deviceChange>",
        device.type_name,
        device.key,
        elem("fileName", iso_path),
        connectable_xml(true, true),
    )
}

/// Rewrite an ethernet card from its resolved backing.
pub fn edit_ethernet_spec(card: &EthernetCard) -> String {
    format!(
        "<deviceChange><operation>edit</operation>\
         <device xsi:type=\"{}\"><key>{}</key>{}{}</device></deviceChange>",
        card.type_name,
        card.key,
        ethernet_backing_xml(&card.backing),
        connectable_xml(card.connected, card.start_connected),
    )
}

/// Disconnect an ethernet card, leaving its backing alone.
pub fn disconnect_ethernet_spec(device: &VirtualDevice) -> String {
    format!(
        "<deviceChange><operation>edit</operation>\
         <device xsi:type=\"{}\"><key>{}</key>{}</device></deviceChange>",
        device.type_name,
        device.key,
        connectable_xml(false, false),
    )
}

/// Boot-delay option appended by the `boot` feature.
pub fn boot_delay_spec(delay_ms: i64) -> String {
    format!("<bootOptions><bootDelay>{delay_ms}</bootDelay></bootOptions>")
}

/// Replace the VM annotation, optionally pushing guestinfo pairs.
pub fn annotation_spec(annotation: &str, guestinfo: &[(String, String)]) -> String {
    let mut spec = elem("annotation", annotation);
    for (key, value) in guestinfo {
        spec.push_str(&extra_config_xml(key, value));
    }
    spec
}

/// `ClusterConfigSpecEx` rules entry adding a mandatory enabled affinity
/// rule named `Affinity#<tag>`.
pub fn affinity_rule_spec(tag: &str, vms: &[crate::types::ManagedRef]) -> String {
    let mut spec = String::from(
        "<rulesSpec><operation>add</operation>\
         <info xsi:type=\"ClusterAffinityRuleSpec\">\
         <enabled>true</enabled>",
    );
    spec.push_str(&elem("name", &format!("Affinity#{tag}")));
    spec.push_str("<mandatory>true</mandatory>");
    for vm in vms {
        spec.push_str(&vm.xml("vm"));
    }
    spec.push_str("</info></rulesSpec>");
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::DeviceKind;
    use crate::types::{ManagedRef, VmDisk, VmNic};

    #[test]
    fn blank_disk_parsing() {
        assert_eq!(parse_blank_disk("blank-40-lsilogic.vmdk"), Some((40, "lsiLogic".into())));
        assert_eq!(parse_blank_disk("blank-20-buslogic.vmdk"), Some((20, "busLogic".into())));
        assert_eq!(parse_blank_disk("blank-8-ide.vmdk"), Some((8, "ide".into())));
        assert_eq!(parse_blank_disk("disk-40-lsilogic.vmdk"), None);
        assert_eq!(parse_blank_disk("blank-x-lsilogic.vmdk"), None);
        assert_eq!(parse_blank_disk("[ds1] ws1/a.vmdk"), None);
    }

    #[test]
    fn adapter_normalization() {
        assert_eq!(normalize_adapter("lsilogic"), "lsiLogic");
        assert_eq!(normalize_adapter("BUSLOGIC"), "busLogic");
        assert_eq!(normalize_adapter("pvscsi"), "pvscsi");
    }

    fn template() -> VmTemplate {
        VmTemplate {
            name: "alpha#ws1".into(),
            os: "ubuntu64Guest".into(),
            cpu: 2,
            memory: 2048,
            disks: vec![VmDisk { path: String::new(), size: 10, controller: "lsilogic".into() }],
            nics: vec![VmNic { net: "lan#ws1".into(), adapter: String::new() }],
            iso: "[ds1] isos/linux.iso".into(),
            ..Default::default()
        }
    }

    fn config() -> ClientConfig {
        ClientConfig {
            host: "esx1.lab.local".into(),
            vm_store: "[{host}-store] vms".into(),
            ..Default::default()
        }
    }

    #[test]
    fn config_spec_carries_identity_and_store() {
        let spec = build_config_spec(&template(), &config(), &HashMap::new());
        assert!(spec.contains("<name>alpha#ws1</name>"));
        assert!(spec.contains("<guestId>ubuntu64Guest</guestId>"));
        assert!(spec.contains(
            "<vmPathName>[esx1-store] vms/alpha#ws1/alpha#ws1.vmx</vmPathName>"
        ));
        assert!(spec.contains("<numCPUs>2</numCPUs>"));
        assert!(spec.contains("<memoryMB>2048</memoryMB>"));
    }

    #[test]
    fn config_spec_creates_blank_disk_with_controller() {
        let spec = build_config_spec(&template(), &config(), &HashMap::new());
        assert!(spec.contains("VirtualLsiLogicController"));
        assert!(spec.contains("<fileOperation>create</fileOperation>"));
        assert!(spec.contains("<capacityInKB>10485760</capacityInKB>"));
        assert!(spec.contains("<thinProvisioned>true</thinProvisioned>"));
    }

    #[test]
    fn config_spec_attaches_existing_disk_without_create() {
        let mut t = template();
        t.disks[0].path = "[ds1] ws1/a.vmdk".into();
        let spec = build_config_spec(&t, &config(), &HashMap::new());
        assert!(!spec.contains("<fileOperation>create</fileOperation>"));
        assert!(spec.contains("<fileName>[ds1] ws1/a.vmdk</fileName>"));
    }

    #[test]
    fn config_spec_mounts_iso_connected() {
        let spec = build_config_spec(&template(), &config(), &HashMap::new());
        assert!(spec.contains("VirtualCdromIsoBackingInfo"));
        assert!(spec.contains("<fileName>[ds1] isos/linux.iso</fileName>"));
        assert!(spec.contains("<startConnected>true</startConnected>"));
    }

    #[test]
    fn config_spec_uses_resolved_nic_backing() {
        let mut backings = HashMap::new();
        backings.insert(
            "lan#ws1".to_string(),
            EthernetBacking::Distributed {
                switch_uuid: "50 2f ab".into(),
                portgroup_key: "pg-101".into(),
            },
        );
        let spec = build_config_spec(&template(), &config(), &backings);
        assert!(spec.contains("VirtualEthernetCardDistributedVirtualPortBackingInfo"));
        assert!(spec.contains("<portgroupKey>pg-101</portgroupKey>"));
    }

    #[test]
    fn config_spec_falls_back_to_standard_backing() {
        let spec = build_config_spec(&template(), &config(), &HashMap::new());
        assert!(spec.contains("VirtualEthernetCardNetworkBackingInfo"));
        assert!(spec.contains("<deviceName>lan#ws1</deviceName>"));
    }

    #[test]
    fn config_spec_parks_nic_without_net() {
        let mut t = template();
        t.iso.clear();
        t.nics = vec![VmNic { net: String::new(), adapter: String::new() }];
        let spec = build_config_spec(&t, &config(), &HashMap::new());
        assert!(spec.contains("<startConnected>false</startConnected>"));
        assert!(spec.contains("<connected>false</connected>"));
    }

    #[test]
    fn guestinfo_keys_are_prefixed_once() {
        let mut t = template();
        t.guestinfo.insert("role".into(), "router".into());
        t.guestinfo.insert("guestinfo.ip".into(), "10.0.0.1".into());
        let spec = build_config_spec(&t, &config(), &HashMap::new());
        assert!(spec.contains("<key>guestinfo.role</key>"));
        assert!(spec.contains("<key>guestinfo.ip</key>"));
        assert!(!spec.contains("guestinfo.guestinfo."));
    }

    fn cdrom(key: i32, label: &str) -> VirtualDevice {
        VirtualDevice {
            key,
            label: label.into(),
            type_name: "VirtualCdrom".into(),
            kind: DeviceKind::Cdrom,
            backing_file: None,
            connected: false,
            start_connected: false,
            controller_key: Some(200),
            unit_number: Some(0),
        }
    }

    #[test]
    fn cdrom_edit_targets_device_key() {
        let spec = edit_cdrom_spec(&cdrom(3002, "CD/DVD drive 2"), "[ds1] isos/linux.iso");
        assert!(spec.contains("<operation>edit</operation>"));
        assert!(spec.contains("<key>3002</key>"));
        assert!(spec.contains("<fileName>[ds1] isos/linux.iso</fileName>"));
        assert!(spec.contains("<connected>true</connected>"));
    }

    #[test]
    fn ethernet_disconnect_keeps_backing() {
        let mut dev = cdrom(4000, "Network adapter 1");
        dev.type_name = "VirtualVmxnet3".into();
        dev.kind = DeviceKind::Ethernet;
        let spec = disconnect_ethernet_spec(&dev);
        assert!(spec.contains("<connected>false</connected>"));
        assert!(!spec.contains("<backing"));
    }

    #[test]
    fn affinity_rule_lists_vms() {
        let vms = vec![
            ManagedRef::new("VirtualMachine", "vm-1"),
            ManagedRef::new("VirtualMachine", "vm-2"),
        ];
        let spec = affinity_rule_spec("ws1", &vms);
        assert!(spec.contains("<name>Affinity#ws1</name>"));
        assert!(spec.contains("<enabled>true</enabled>"));
        assert!(spec.contains("<mandatory>true</mandatory>"));
        assert!(spec.contains("<vm type=\"VirtualMachine\">vm-1</vm>"));
        assert!(spec.contains("<vm type=\"VirtualMachine\">vm-2</vm>"));
        assert!(spec.contains("<operation>add</operation>"));
    }

    #[test]
    fn boot_delay_and_annotation_specs() {
        assert_eq!(boot_delay_spec(2500), "<bootOptions><bootDelay>2500</bootDelay></bootOptions>");
        let spec = annotation_spec("role=router\n", &[("role".into(), "router".into())]);
        assert!(spec.contains("<annotation>role=router\n</annotation>"));
        assert!(spec.contains("<key>guestinfo.role</key>"));
    }
}
