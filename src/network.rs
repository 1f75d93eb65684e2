//! Port-group provisioning across the three network strata.
//!
//! The variant is wired at connect time: a standalone host gets the
//! host-local manager bound to its HostNetworkSystem, a cluster with a
//! plain uplink gets the distributed-switch manager bound to the switch
//! uuid, and an `nsx.`-prefixed uplink (or explicit overlay config) gets
//! the overlay manager that talks the NSX policy API.
//!
//! VLAN tags come from the external [`VlanAllocator`] collaborator; the
//! allocation policy itself lives outside this crate.

use crate::error::{VimError, VimResult};
use crate::property::{self, PropValue};
use crate::resolver::ResolvedRefs;
use crate::soap::elem;
use crate::tasks;
use crate::types::{ClientConfig, EthernetBacking, EthernetCard, ManagedRef, VmNic, VmTemplate};
use crate::vim::VimClient;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Collaborators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// External VLAN tag source. Allocation policy is the collaborator's
/// concern; managers only query and return tags.
#[async_trait]
pub trait VlanAllocator: Send + Sync {
    async fn allocate(&self, port_group: &str) -> VimResult<i32>;
    async fn release(&self, port_group: &str) -> VimResult<()>;
}

/// Sequential in-process allocator for labs and tests.
#[derive(Default)]
pub struct StaticVlanAllocator {
    state: Mutex<(i32, HashMap<String, i32>)>,
}

impl StaticVlanAllocator {
    pub fn new() -> Self {
        Self { state: Mutex::new((100, HashMap::new())) }
    }
}

#[async_trait]
impl VlanAllocator for StaticVlanAllocator {
    async fn allocate(&self, port_group: &str) -> VimResult<i32> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(tag) = state.1.get(port_group) {
            return Ok(*tag);
        }
        state.0 += 1;
        let tag = state.0;
        state.1.insert(port_group.to_string(), tag);
        Ok(tag)
    }

    async fn release(&self, port_group: &str) -> VimResult<()> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.1.remove(port_group);
        Ok(())
    }
}

/// Port groups matching the configured mask are never provisioned or swept.
#[derive(Debug, Clone, Default)]
pub struct ExcludeMask {
    raw: String,
    re: Option<Regex>,
}

impl ExcludeMask {
    pub fn new(mask: &str) -> Self {
        if mask.is_empty() {
            return Self::default();
        }
        let re = Regex::new(mask).ok();
        if re.is_none() {
            log::warn!("excludeNetworkMask '{mask}' is not a valid pattern; matching as substring");
        }
        Self { raw: mask.to_string(), re }
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.raw.is_empty() {
            return false;
        }
        match &self.re {
            Some(re) => re.is_match(name),
            None => name.contains(&self.raw),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Common contract of the three network strata.
#[async_trait]
pub trait VirtualNetworkManager: Send + Sync {
    /// Prime internal state after the resolver has run.
    async fn initialize(&self) -> VimResult<()>;
    /// Ensure every NIC port group declared by the template exists.
    async fn provision(&self, template: &VmTemplate) -> VimResult<()>;
    /// Idempotent bulk form used for pre-deploy.
    async fn provision_all(&self, nics: &[VmNic], use_uplink: bool) -> VimResult<()>;
    /// Release port groups used only by this VM.
    async fn unprovision(&self, vm: &ManagedRef) -> VimResult<()>;
    /// Point a NIC device spec at a named port group on the correct switch.
    async fn update_ethernet_backing(
        &self,
        card: &mut EthernetCard,
        port_group: &str,
    ) -> VimResult<()>;
    /// Sweep orphaned port groups.
    async fn clean(&self) -> VimResult<()>;
}

/// Which stratum a config selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    Host,
    Distributed,
    Overlay,
}

impl NetworkKind {
    pub fn select(is_vcenter: bool, uplink: &str, is_nsx_network: bool) -> Self {
        if is_nsx_network || uplink.starts_with("nsx.") {
            NetworkKind::Overlay
        } else if !is_vcenter {
            NetworkKind::Host
        } else {
            NetworkKind::Distributed
        }
    }
}

/// Construct the manager variant for this endpoint.
pub fn build_network_manager(
    config: &ClientConfig,
    refs: &ResolvedRefs,
    vim: Arc<VimClient>,
    vlan: Arc<dyn VlanAllocator>,
    is_vcenter: bool,
) -> VimResult<Arc<dyn VirtualNetworkManager>> {
    let exclude = ExcludeMask::new(&config.exclude_network_mask);
    match NetworkKind::select(is_vcenter, &config.uplink, config.is_nsx_network) {
        NetworkKind::Host => {
            let network_system = refs
                .network_system
                .clone()
                .ok_or_else(|| VimError::network("standalone host has no network system"))?;
            Ok(Arc::new(HostNetworkManager {
                vim,
                network_system,
                cluster: refs.cluster.clone(),
                vswitch: if config.uplink.is_empty() {
                    "vSwitch0".to_string()
                } else {
                    config.uplink.clone()
                },
                vlan,
                exclude,
            }))
        }
        NetworkKind::Distributed => {
            let dvs = refs
                .dvs
                .clone()
                .ok_or_else(|| VimError::network(format!("uplink switch '{}' not found", config.uplink)))?;
            let dvs_uuid = refs
                .dvs_uuid
                .clone()
                .ok_or_else(|| VimError::network("distributed switch has no uuid"))?;
            Ok(Arc::new(DistributedNetworkManager { vim, dvs, dvs_uuid, vlan, exclude }))
        }
        NetworkKind::Overlay => Ok(Arc::new(OverlayNetworkManager::new(
            config,
            refs.cluster.clone(),
            vim,
            exclude,
        )?)),
    }
}

/// Networks reachable from the cluster with their attached-VM lists.
async fn cluster_networks(
    vim: &VimClient,
    cluster: &ManagedRef,
) -> VimResult<Vec<(String, Vec<ManagedRef>, ManagedRef)>> {
    let contents = vim
        .retrieve_properties(&property::cluster_networks_filter(cluster))
        .await?;
    Ok(contents
        .into_iter()
        .filter_map(|oc| {
            let name = oc.text("name")?.to_string();
            let vms = oc.ref_list("vm").to_vec();
            Some((name, vms, oc.obj))
        })
        .collect())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Host-local stratum
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HostNetworkManager {
    vim: Arc<VimClient>,
    network_system: ManagedRef,
    cluster: ManagedRef,
    vswitch: String,
    vlan: Arc<dyn VlanAllocator>,
    exclude: ExcludeMask,
}

impl HostNetworkManager {
    async fn port_group_names(&self) -> VimResult<Vec<String>> {
        let contents = self
            .vim
            .retrieve_properties(&property::single_object_filter(
                &self.network_system,
                &["networkInfo.portgroup"],
            ))
            .await?;
        for oc in &contents {
            if let Some(PropValue::PortGroups(pgs)) = oc.prop("networkInfo.portgroup") {
                return Ok(pgs.iter().map(|pg| pg.name.clone()).collect());
            }
        }
        Ok(Vec::new())
    }

    async fn add_port_group(&self, name: &str) -> VimResult<()> {
        let vlan = self.vlan.allocate(name).await?;
        let body = format!(
            "<AddPortGroup xmlns=\"urn:vim25\">{}<portgrp>{}\
             <vlanId>{vlan}</vlanId>{}<policy/></portgrp></AddPortGroup>",
            self.network_system.xml("_this"),
            elem("name", name),
            elem("vswitchName", &self.vswitch),
        );
        self.vim.call("AddPortGroup", body).await?;
        log::info!("added port group '{name}' (vlan {vlan}) on {}", self.vswitch);
        Ok(())
    }

    async fn remove_port_group(&self, name: &str) -> VimResult<()> {
        let body = format!(
            "<RemovePortGroup xmlns=\"urn:vim25\">{}{}</RemovePortGroup>",
            self.network_system.xml("_this"),
            elem("pgName", name),
        );
        self.vim.call("RemovePortGroup", body).await?;
        self.vlan.release(name).await?;
        log::info!("removed port group '{name}'");
        Ok(())
    }
}

#[async_trait]
impl VirtualNetworkManager for HostNetworkManager {
    async fn initialize(&self) -> VimResult<()> {
        let names = self.port_group_names().await?;
        log::debug!("host network manager: {} port groups on {}", names.len(), self.vswitch);
        Ok(())
    }

    async fn provision(&self, template: &VmTemplate) -> VimResult<()> {
        self.provision_all(&template.nics, template.use_uplink_switch).await
    }

    async fn provision_all(&self, nics: &[VmNic], _use_uplink: bool) -> VimResult<()> {
        let existing = self.port_group_names().await?;
        for nic in nics {
            if nic.net.is_empty() || self.exclude.matches(&nic.net) {
                continue;
            }
            if !existing.iter().any(|n| n == &nic.net) {
                self.add_port_group(&nic.net).await?;
            }
        }
        Ok(())
    }

    async fn unprovision(&self, vm: &ManagedRef) -> VimResult<()> {
        for (name, vms, _) in cluster_networks(&self.vim, &self.cluster).await? {
            if self.exclude.matches(&name) {
                continue;
            }
            if vms.len() == 1 && &vms[0] == vm {
                if let Err(e) = self.remove_port_group(&name).await {
                    log::warn!("unprovision of '{name}' failed: {e}");
                }
            }
        }
        Ok(())
    }

    async fn update_ethernet_backing(
        &self,
        card: &mut EthernetCard,
        port_group: &str,
    ) -> VimResult<()> {
        card.backing = EthernetBacking::Standard { network: port_group.to_string() };
        card.connected = true;
        card.start_connected = true;
        Ok(())
    }

    async fn clean(&self) -> VimResult<()> {
        for (name, vms, _) in cluster_networks(&self.vim, &self.cluster).await? {
            if vms.is_empty() && !self.exclude.matches(&name) {
                if let Err(e) = self.remove_port_group(&name).await {
                    log::debug!("sweep of '{name}' failed: {e}");
                }
            }
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Distributed-switch stratum
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DistributedNetworkManager {
    vim: Arc<VimClient>,
    dvs: ManagedRef,
    dvs_uuid: String,
    vlan: Arc<dyn VlanAllocator>,
    exclude: ExcludeMask,
}

struct DvPortgroup {
    name: String,
    key: String,
    vms: Vec<ManagedRef>,
    obj: ManagedRef,
}

impl DistributedNetworkManager {
    async fn portgroups(&self) -> VimResult<Vec<DvPortgroup>> {
        let contents = self
            .vim
            .retrieve_properties(&property::dvs_portgroups_filter(&self.dvs))
            .await?;
        Ok(contents
            .into_iter()
            .filter_map(|oc| {
                let name = oc.text("name")?.to_string();
                let key = match oc.prop("config") {
                    Some(PropValue::PortgroupConfig(c)) => c.key.clone(),
                    _ => String::new(),
                };
                let vms = oc.ref_list("vm").to_vec();
                Some(DvPortgroup { name, key, vms, obj: oc.obj })
            })
            .collect())
    }

    async fn create_portgroup(&self, name: &str) -> VimResult<()> {
        let vlan = self.vlan.allocate(name).await?;
        let body = format!(
            "<CreateDVPortgroup_Task xmlns=\"urn:vim25\">{}<spec>{}\
             <numPorts>128</numPorts><type>earlyBinding</type>\
             <defaultPortConfig xsi:type=\"VMwareDVSPortSetting\">\
             <vlan xsi:type=\"VmwareDistributedVirtualSwitchVlanIdSpec\">\
             <inherited>false</inherited><vlanId>{vlan}</vlanId></vlan>\
             </defaultPortConfig></spec></CreateDVPortgroup_Task>",
            self.dvs.xml("_this"),
            elem("name", name),
        );
        let task = self.vim.call_task("CreateDVPortgroup_Task", body).await?;
        tasks::task_result(tasks::wait_for_task(&self.vim, &task).await?)?;
        log::info!("created dv port group '{name}' (vlan {vlan})");
        Ok(())
    }
}

#[async_trait]
impl VirtualNetworkManager for DistributedNetworkManager {
    async fn initialize(&self) -> VimResult<()> {
        let pgs = self.portgroups().await?;
        log::debug!("distributed network manager: {} port groups on dvs {}", pgs.len(), self.dvs_uuid);
        Ok(())
    }

    async fn provision(&self, template: &VmTemplate) -> VimResult<()> {
        self.provision_all(&template.nics, template.use_uplink_switch).await
    }

    async fn provision_all(&self, nics: &[VmNic], _use_uplink: bool) -> VimResult<()> {
        let existing = self.portgroups().await?;
        for nic in nics {
            if nic.net.is_empty() || self.exclude.matches(&nic.net) {
                continue;
            }
            if !existing.iter().any(|pg| pg.name == nic.net) {
                self.create_portgroup(&nic.net).await?;
            }
        }
        Ok(())
    }

    async fn unprovision(&self, vm: &ManagedRef) -> VimResult<()> {
        for pg in self.portgroups().await? {
            if self.exclude.matches(&pg.name) {
                continue;
            }
            if pg.vms.len() == 1 && &pg.vms[0] == vm {
                match self.vim.destroy(&pg.obj).await {
                    Ok(task) => {
                        if let Err(e) = tasks::wait_for_task(&self.vim, &task).await {
                            log::warn!("destroy of dv port group '{}' failed: {e}", pg.name);
                        } else {
                            self.vlan.release(&pg.name).await?;
                        }
                    }
                    Err(e) => log::warn!("destroy of dv port group '{}' failed: {e}", pg.name),
                }
            }
        }
        Ok(())
    }

    async fn update_ethernet_backing(
        &self,
        card: &mut EthernetCard,
        port_group: &str,
    ) -> VimResult<()> {
        let pgs = self.portgroups().await?;
        let pg = pgs
            .iter()
            .find(|pg| pg.name == port_group)
            .ok_or_else(|| VimError::network(format!("port group '{port_group}' not on uplink switch")))?;
        card.backing = EthernetBacking::Distributed {
            switch_uuid: self.dvs_uuid.clone(),
            portgroup_key: pg.key.clone(),
        };
        card.connected = true;
        card.start_connected = true;
        Ok(())
    }

    async fn clean(&self) -> VimResult<()> {
        for pg in self.portgroups().await? {
            if pg.vms.is_empty() && !self.exclude.matches(&pg.name) {
                if let Ok(task) = self.vim.destroy(&pg.obj).await {
                    let _ = tasks::wait_for_task(&self.vim, &task).await;
                    let _ = self.vlan.release(&pg.name).await;
                    log::info!("swept orphaned dv port group '{}'", pg.name);
                }
            }
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Overlay (NSX) stratum
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Segment {
    id: String,
    display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transport_zone_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SegmentList {
    #[serde(default)]
    results: Vec<Segment>,
}

pub struct OverlayNetworkManager {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    sddc: String,
    transport_zone: String,
    cluster: ManagedRef,
    vim: Arc<VimClient>,
    exclude: ExcludeMask,
}

impl OverlayNetworkManager {
    fn new(
        config: &ClientConfig,
        cluster: ManagedRef,
        vim: Arc<VimClient>,
        exclude: ExcludeMask,
    ) -> VimResult<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.ignore_certificate_errors)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VimError::network(format!("Failed to build NSX client: {e}")))?;
        Ok(Self {
            http,
            base_url: format!("https://{}", config.host),
            user: config.user.clone(),
            password: config.password.clone(),
            sddc: config.sddc.clone(),
            transport_zone: config.uplink.strip_prefix("nsx.").unwrap_or(&config.uplink).to_string(),
            cluster,
            vim,
            exclude,
        })
    }

    fn segment_id(name: &str) -> String {
        name.replace(['/', ' '], "-")
    }

    async fn list_segments(&self) -> VimResult<Vec<Segment>> {
        let url = format!("{}/policy/api/v1/infra/segments", self.base_url);
        let resp = self
            .http
            .get(&url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| VimError::network(format!("NSX segment list failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(VimError::network(format!(
                "NSX segment list failed with HTTP {}",
                resp.status()
            )));
        }
        let list: SegmentList = resp
            .json()
            .await
            .map_err(|e| VimError::parse(format!("NSX segment list parse error: {e}")))?;
        Ok(list.results)
    }

    async fn put_segment(&self, name: &str) -> VimResult<()> {
        let id = Self::segment_id(name);
        let url = format!("{}/policy/api/v1/infra/segments/{id}", self.base_url);
        let segment = Segment {
            id: id.clone(),
            display_name: name.to_string(),
            transport_zone_path: Some(format!(
                "/infra/sites/{}/enforcement-points/default/transport-zones/{}",
                self.sddc, self.transport_zone
            )),
        };
        let resp = self
            .http
            .put(&url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&segment)
            .send()
            .await
            .map_err(|e| VimError::network(format!("NSX segment create failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(VimError::network(format!(
                "NSX segment '{name}' create failed with HTTP {}",
                resp.status()
            )));
        }
        log::info!("created overlay segment '{name}'");
        Ok(())
    }

    async fn delete_segment(&self, name: &str) -> VimResult<()> {
        let url = format!(
            "{}/policy/api/v1/infra/segments/{}",
            self.base_url,
            Self::segment_id(name)
        );
        let resp = self
            .http
            .delete(&url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| VimError::network(format!("NSX segment delete failed: {e}")))?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(VimError::network(format!(
                "NSX segment '{name}' delete failed with HTTP {}",
                resp.status()
            )));
        }
        log::info!("deleted overlay segment '{name}'");
        Ok(())
    }
}

#[async_trait]
impl VirtualNetworkManager for OverlayNetworkManager {
    async fn initialize(&self) -> VimResult<()> {
        let segments = self.list_segments().await?;
        log::debug!(
            "overlay network manager: {} segments in sddc {}",
            segments.len(),
            self.sddc
        );
        Ok(())
    }

    async fn provision(&self, template: &VmTemplate) -> VimResult<()> {
        self.provision_all(&template.nics, template.use_uplink_switch).await
    }

    async fn provision_all(&self, nics: &[VmNic], _use_uplink: bool) -> VimResult<()> {
        let existing = self.list_segments().await?;
        for nic in nics {
            if nic.net.is_empty() || self.exclude.matches(&nic.net) {
                continue;
            }
            if !existing.iter().any(|s| s.display_name == nic.net) {
                self.put_segment(&nic.net).await?;
            }
        }
        Ok(())
    }

    async fn unprovision(&self, vm: &ManagedRef) -> VimResult<()> {
        // Overlay segments surface in the vSphere inventory as opaque
        // networks, so attachment is read from the same Network.vm lists.
        for (name, vms, _) in cluster_networks(&self.vim, &self.cluster).await? {
            if self.exclude.matches(&name) {
                continue;
            }
            if vms.len() == 1 && &vms[0] == vm {
                if let Err(e) = self.delete_segment(&name).await {
                    log::warn!("unprovision of segment '{name}' failed: {e}");
                }
            }
        }
        Ok(())
    }

    async fn update_ethernet_backing(
        &self,
        card: &mut EthernetCard,
        port_group: &str,
    ) -> VimResult<()> {
        card.backing = EthernetBacking::Opaque {
            network_id: Self::segment_id(port_group),
            network_type: "nsx.LogicalSwitch".to_string(),
        };
        card.connected = true;
        card.start_connected = true;
        Ok(())
    }

    async fn clean(&self) -> VimResult<()> {
        let segments = self.list_segments().await?;
        let attached = cluster_networks(&self.vim, &self.cluster).await?;
        for segment in segments {
            if self.exclude.matches(&segment.display_name) {
                continue;
            }
            let in_use = attached
                .iter()
                .any(|(name, vms, _)| name == &segment.display_name && !vms.is_empty());
            if !in_use {
                if let Err(e) = self.delete_segment(&segment.display_name).await {
                    log::debug!("sweep of segment '{}' failed: {e}", segment.display_name);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_overlay_on_prefix_or_flag() {
        assert_eq!(NetworkKind::select(true, "nsx.tz0", false), NetworkKind::Overlay);
        assert_eq!(NetworkKind::select(true, "dvSwitch0", true), NetworkKind::Overlay);
        assert_eq!(NetworkKind::select(false, "nsx.tz0", false), NetworkKind::Overlay);
    }

    #[test]
    fn selects_host_for_standalone() {
        assert_eq!(NetworkKind::select(false, "vSwitch0", false), NetworkKind::Host);
        assert_eq!(NetworkKind::select(false, "", false), NetworkKind::Host);
    }

    #[test]
    fn selects_distributed_for_cluster() {
        assert_eq!(NetworkKind::select(true, "dvSwitch0", false), NetworkKind::Distributed);
    }

    #[test]
    fn exclude_mask_regex_and_substring() {
        let re = ExcludeMask::new("^(Management|VM) Network$");
        assert!(re.matches("Management Network"));
        assert!(!re.matches("lan#ws1"));

        let broken = ExcludeMask::new("uplink[");
        assert!(broken.matches("dvs-uplink[0]"));
        assert!(!broken.matches("lan"));

        assert!(!ExcludeMask::new("").matches("anything"));
    }

    #[test]
    fn segment_id_is_url_safe() {
        assert_eq!(OverlayNetworkManager::segment_id("lan net/a"), "lan-net-a");
    }

    #[tokio::test]
    async fn static_vlan_allocator_is_stable_per_name() {
        let alloc = StaticVlanAllocator::new();
        let a = alloc.allocate("lan").await.unwrap();
        let b = alloc.allocate("dmz").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(alloc.allocate("lan").await.unwrap(), a);
        alloc.release("lan").await.unwrap();
        assert_ne!(alloc.allocate("lan").await.unwrap(), a);
    }
}
