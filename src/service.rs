//! Public operations surface and session lifecycle.
//!
//! One `VsphereService` mediates between the lab orchestrator and one
//! hypervisor endpoint. Every public operation begins with `connect()`,
//! which is serialized by an explicit mutex and rebuilds the session after
//! faults. Two background loops run per instance: the session loop
//! (reconnect, keep-alive, cache reload, network sweep) and the task loop
//! (asynchronous task monitor).

use crate::browser::DatastoreBrowser;
use crate::deploy;
use crate::error::{VimError, VimErrorKind, VimResult};
use crate::inventory::{self, InventoryStore, MemoryInventory};
use crate::network::{self, StaticVlanAllocator, VirtualNetworkManager, VlanAllocator};
use crate::property::{self, DeviceKind, PropValue, TaskState, VirtualDevice};
use crate::resolver::{self, ResolvedRefs};
use crate::tasks::{self, TaskMonitor};
use crate::types::{
    name_tag, ClientConfig, DatastorePath, EthernetBacking, EthernetCard, ManagedRef,
    PowerState, Vm, VmKeyValue, VmStatus, VmTemplate,
};
use crate::vim::VimClient;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

const SESSION_TICK: Duration = Duration::from_secs(30);
const TASK_TICK: Duration = Duration::from_secs(3);
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);
const SNAPSHOT_SETTLE: Duration = Duration::from_millis(500);
const REMOVE_RETRY: Duration = Duration::from_millis(100);
const CLONE_INFO_DELAY: Duration = Duration::from_secs(1);

/// Everything bound to one open session.
struct SessionState {
    vim: Arc<VimClient>,
    refs: ResolvedRefs,
    network: Arc<dyn VirtualNetworkManager>,
    is_vcenter: bool,
}

struct ServiceInner {
    /// Distinguishes clients in logs when several endpoints share a process
    instance: uuid::Uuid,
    config: ClientConfig,
    inventory: Arc<dyn InventoryStore>,
    vlan: Arc<dyn VlanAllocator>,
    monitor: TaskMonitor,
    session: RwLock<Option<Arc<SessionState>>>,
    connect_lock: Mutex<()>,
    last_action: std::sync::Mutex<DateTime<Utc>>,
    session_ticks: AtomicU64,
}

/// Hypervisor client core for one endpoint.
#[derive(Clone)]
pub struct VsphereService {
    inner: Arc<ServiceInner>,
}

impl VsphereService {
    /// Create a service with explicit collaborators and launch its
    /// background loops.
    pub fn new(
        config: ClientConfig,
        inventory: Arc<dyn InventoryStore>,
        vlan: Arc<dyn VlanAllocator>,
    ) -> Self {
        let inner = Arc::new(ServiceInner {
            instance: uuid::Uuid::new_v4(),
            config,
            inventory,
            vlan,
            monitor: TaskMonitor::new(),
            session: RwLock::new(None),
            connect_lock: Mutex::new(()),
            last_action: std::sync::Mutex::new(Utc::now()),
            session_ticks: AtomicU64::new(0),
        });
        Self::spawn_loops(&inner);
        Self { inner }
    }

    /// Create a service with an in-memory inventory and the in-process
    /// VLAN allocator.
    pub fn with_defaults(config: ClientConfig) -> Self {
        Self::new(
            config,
            Arc::new(MemoryInventory::new()),
            Arc::new(StaticVlanAllocator::new()),
        )
    }

    fn spawn_loops(inner: &Arc<ServiceInner>) {
        let weak = Arc::downgrade(inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SESSION_TICK);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                VsphereService { inner }.session_tick().await;
            }
        });

        let weak = Arc::downgrade(inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TASK_TICK);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                VsphereService { inner }.task_tick().await;
            }
        });
    }

    pub fn config(&self) -> ClientConfig {
        self.inner.config.redacted()
    }

    pub async fn is_connected(&self) -> bool {
        match &*self.inner.session.read().await {
            Some(state) => !state.vim.is_faulted(),
            None => false,
        }
    }

    fn touch(&self) {
        *self
            .inner
            .last_action
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Utc::now();
    }

    fn idle_for(&self) -> ChronoDuration {
        let last = *self
            .inner
            .last_action
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        Utc::now() - last
    }

    async fn session(&self) -> Option<Arc<SessionState>> {
        self.inner.session.read().await.clone()
    }

    async fn require_session(&self) -> VimResult<Arc<SessionState>> {
        self.session()
            .await
            .ok_or_else(|| VimError::connection("no open session"))
    }

    // ── Session lifecycle ───────────────────────────────────────────

    /// Idempotent session establishment. A faulted session is torn down
    /// before any new work proceeds.
    pub async fn connect(&self) -> VimResult<()> {
        self.touch();
        let _guard = self.inner.connect_lock.lock().await;

        if let Some(state) = self.session().await {
            if !state.vim.is_faulted() {
                return Ok(());
            }
            log::warn!("session to {} is faulted; tearing down", self.inner.config.host);
            self.teardown().await;
        }

        let config = &self.inner.config;
        let vim = Arc::new(VimClient::new(config)?);
        let content = vim.connect(&config.user, &config.password).await?;
        let is_vcenter = content.is_vcenter();
        let refs = resolver::resolve(&vim, config, is_vcenter).await?;
        let network = network::build_network_manager(
            config,
            &refs,
            vim.clone(),
            self.inner.vlan.clone(),
            is_vcenter,
        )?;
        network.initialize().await?;

        *self.inner.session.write().await = Some(Arc::new(SessionState {
            vim,
            refs,
            network,
            is_vcenter,
        }));
        log::info!(
            "client {} has an open session to {}",
            self.inner.instance,
            config.host
        );

        // Reload inline; the first network sweep waits for the monitor tick
        if let Err(e) = self.reload_vm_cache().await {
            log::warn!("initial cache reload failed: {e}");
        }
        Ok(())
    }

    /// Lazy disconnect: a short grace period, then session teardown.
    pub async fn disconnect(&self) {
        tokio::time::sleep(DISCONNECT_GRACE).await;
        self.teardown().await;
    }

    async fn teardown(&self) {
        if let Some(state) = self.inner.session.write().await.take() {
            state.vim.logout().await;
            log::info!("session to {} closed", self.inner.config.host);
        }
    }

    async fn session_tick(&self) {
        let config = &self.inner.config;
        if let Some(state) = self.session().await {
            if self.idle_for() > ChronoDuration::minutes(config.keep_alive_minutes) {
                log::info!(
                    "idle for over {} minutes; disconnecting from {}",
                    config.keep_alive_minutes,
                    config.host
                );
                self.teardown().await;
                return;
            }

            match self.reload_vm_cache().await {
                Ok(()) => {}
                Err(e) if e.is_session_fatal() => {
                    log::warn!("session to {} failed ({e}); tearing down", config.host);
                    self.teardown().await;
                    return;
                }
                Err(e) => log::warn!("cache reload failed: {e}"),
            }

            let tick = self.inner.session_ticks.fetch_add(1, Ordering::Relaxed);
            if tick % 2 == 1 {
                if let Err(e) = state.network.clean().await {
                    log::warn!("network sweep failed: {e}");
                }
            }
        } else if let Err(e) = self.connect().await {
            log::warn!("reconnect to {} failed: {e}", config.host);
        }
    }

    async fn task_tick(&self) {
        if let Some(state) = self.session().await {
            self.inner
                .monitor
                .tick(&state.vim, self.inner.inventory.as_ref())
                .await;
        }
    }

    // ── Inventory ───────────────────────────────────────────────────

    /// Rebuild the cache from a fresh observation of the pool; entries
    /// observed earlier but missing now are evicted.
    pub async fn reload_vm_cache(&self) -> VimResult<()> {
        let state = self.require_session().await?;
        let config = &self.inner.config;
        let store = self.inner.inventory.as_ref();

        let contents = state
            .vim
            .retrieve_properties(&property::pool_vms_filter(&state.refs.pool))
            .await?;
        let observed: Vec<Vm> = contents
            .iter()
            .filter_map(|oc| inventory::vm_from_properties(oc, &config.host, &config.tenant))
            .collect();
        log::debug!("cache reload: {} owned vms on {}", observed.len(), config.host);
        inventory::reconcile(store, &config.host, observed);
        Ok(())
    }

    fn cached_vm(&self, id: &str) -> VimResult<Vm> {
        self.inner
            .inventory
            .get(id)
            .ok_or_else(|| VimError::not_found(format!("vm {id} not in inventory")))
    }

    fn vm_ref(vm: &Vm) -> VimResult<ManagedRef> {
        vm.managed_ref()
            .ok_or_else(|| VimError::parse(format!("vm {} has no valid reference", vm.id)))
    }

    /// Refresh one VM from the endpoint and upsert it.
    async fn load_vm(&self, vm_ref: &ManagedRef) -> VimResult<Vm> {
        let state = self.require_session().await?;
        let config = &self.inner.config;
        let contents = state
            .vim
            .retrieve_properties(&property::single_object_filter(
                vm_ref,
                &["name", "summary", "runtime", "snapshot", "layoutEx.file"],
            ))
            .await?;
        let vm = contents
            .iter()
            .find_map(|oc| inventory::vm_from_properties(oc, &config.host, &config.tenant))
            .ok_or_else(|| VimError::not_found(format!("vm {vm_ref} not visible or not owned")))?;
        self.inner.inventory.upsert(vm.clone());
        Ok(vm)
    }

    /// Cached entries whose id or name contain `term`; empty term lists all.
    pub async fn find(&self, term: &str) -> VimResult<Vec<Vm>> {
        self.connect().await?;
        self.reload_vm_cache().await?;
        Ok(self.inner.inventory.find(&self.inner.config.host, term))
    }

    /// Progress of a keyed (clone) task; `-1` when unknown.
    pub async fn task_progress(&self, id: &str) -> i32 {
        self.inner.monitor.task_progress(id).await
    }

    // ── Power ───────────────────────────────────────────────────────

    /// Power a VM on. A power-on that fails because the VM is already
    /// running is success; annotations are then pushed as guestinfo.
    pub async fn start(&self, id: &str) -> VimResult<Vm> {
        self.connect().await?;
        let state = self.require_session().await?;
        let vm = self.cached_vm(id)?;

        if vm.state != PowerState::Running {
            let vm_ref = Self::vm_ref(&vm)?;
            let task = state.vim.power_on_vm(&vm_ref).await?;
            let info = tasks::wait_for_task(&state.vim, &task).await?;
            if info.state == TaskState::Error {
                let message = info.error_message.clone().unwrap_or_default();
                if !tasks::is_already_in_power_state(&message, PowerState::Running) {
                    return Err(VimError::task(message));
                }
                log::debug!("power-on of {id} was a no-op: {message}");
            }
        }

        let mut vm = self.cached_vm(id)?;
        vm.state = PowerState::Running;
        self.inner.inventory.upsert(vm);

        if let Err(e) = self.reconfigure(id, "guest", "", "").await {
            log::debug!("guestinfo push after start of {id} failed: {e}");
        }
        self.cached_vm(id)
    }

    /// Power a VM off; "already powered off" is success.
    pub async fn stop(&self, id: &str) -> VimResult<Vm> {
        self.connect().await?;
        let state = self.require_session().await?;
        let vm = self.cached_vm(id)?;

        if vm.state == PowerState::Running {
            let vm_ref = Self::vm_ref(&vm)?;
            let task = state.vim.power_off_vm(&vm_ref).await?;
            let info = tasks::wait_for_task(&state.vim, &task).await?;
            if info.state == TaskState::Error {
                let message = info.error_message.clone().unwrap_or_default();
                if !tasks::is_already_in_power_state(&message, PowerState::Off) {
                    return Err(VimError::task(message));
                }
                log::debug!("power-off of {id} was a no-op: {message}");
            }
        }

        let mut vm = self.cached_vm(id)?;
        vm.state = PowerState::Off;
        self.inner.inventory.upsert(vm.clone());
        Ok(vm)
    }

    // ── Snapshots ───────────────────────────────────────────────────

    async fn current_snapshot(
        &self,
        state: &SessionState,
        vm_ref: &ManagedRef,
    ) -> VimResult<Option<ManagedRef>> {
        let contents = state
            .vim
            .retrieve_properties(&property::single_object_filter(vm_ref, &["snapshot"]))
            .await?;
        for oc in &contents {
            if let Some(PropValue::Snapshot(info)) = oc.prop("snapshot") {
                return Ok(info.current.clone());
            }
        }
        Ok(None)
    }

    /// Snapshot the VM as its new "Root Snap", consolidating away the
    /// previous snapshot. Slow removals continue in the background.
    pub async fn save(&self, id: &str) -> VimResult<Vm> {
        self.connect().await?;
        let state = self.require_session().await?;
        let vm = self.cached_vm(id)?;

        // Stock disks of other workspaces must never be snapshotted over
        if save_violates_workspace_tag(&vm.name, &vm.disk_path) {
            return Err(VimError::invalid(format!(
                "disk {} does not belong to the workspace of '{}'; refusing to save",
                vm.disk_path, vm.name
            )));
        }

        let vm_ref = Self::vm_ref(&vm)?;
        let previous = self.current_snapshot(&state, &vm_ref).await?;

        let task = state
            .vim
            .create_snapshot(&vm_ref, "Root Snap", &Utc::now().to_rfc3339())
            .await?;
        tasks::task_result(tasks::wait_for_task(&state.vim, &task).await?)?;

        if let Some(previous) = previous {
            let removal = state.vim.remove_snapshot(&previous, false, true).await?;
            tokio::time::sleep(SNAPSHOT_SETTLE).await;
            let info = tasks::fetch_task_info(&state.vim, &removal).await?;
            if !info.state.is_terminal() {
                log::debug!("snapshot consolidation for {id} continues in background");
                self.inner
                    .monitor
                    .register_vm_task(id, removal, "save")
                    .await;
                return self.cached_vm(id);
            }
            tasks::task_result(info)?;
        }
        self.cached_vm(id)
    }

    /// Revert to the current snapshot, restoring the running state the VM
    /// had before the revert was issued.
    pub async fn revert(&self, id: &str) -> VimResult<Vm> {
        self.connect().await?;
        let state = self.require_session().await?;
        let vm = self.cached_vm(id)?;
        let was_running = vm.state == PowerState::Running;
        let vm_ref = Self::vm_ref(&vm)?;

        let task = state.vim.revert_to_current_snapshot(&vm_ref).await?;
        tasks::task_result(tasks::wait_for_task(&state.vim, &task).await?)?;

        let mut vm = self.cached_vm(id)?;
        vm.state = PowerState::Off;
        self.inner.inventory.upsert(vm);

        if was_running {
            return self.start(id).await;
        }
        self.cached_vm(id)
    }

    // ── Deploy / Delete ─────────────────────────────────────────────

    /// Create a VM from a declarative template, snapshot it as "Root
    /// Snap", and optionally start it.
    pub async fn deploy(&self, template: &VmTemplate) -> VimResult<Vm> {
        self.connect().await?;
        let state = self.require_session().await?;
        let config = &self.inner.config;

        state.network.provision(template).await?;

        let mut backings: HashMap<String, EthernetBacking> = HashMap::new();
        for nic in &template.nics {
            // An empty net means the NIC stays unattached; provisioning
            // skips those too, so there is nothing to resolve against
            if nic.net.is_empty() || backings.contains_key(&nic.net) {
                continue;
            }
            let mut card = EthernetCard {
                key: 0,
                label: String::new(),
                type_name: "VirtualVmxnet3".into(),
                backing: EthernetBacking::Standard { network: nic.net.clone() },
                connected: false,
                start_connected: false,
            };
            state
                .network
                .update_ethernet_backing(&mut card, &nic.net)
                .await?;
            backings.insert(nic.net.clone(), card.backing);
        }

        let spec = deploy::build_config_spec(template, config, &backings);
        let task = state
            .vim
            .create_vm(&state.refs.vm_folder, &spec, &state.refs.pool)
            .await?;
        let info = tasks::task_result(tasks::wait_for_task(&state.vim, &task).await?)?;
        let created = info
            .result_xml
            .as_deref()
            .and_then(|r| property::parse_ref_block(r, "result"))
            .ok_or_else(|| VimError::parse("CreateVM task returned no reference"))?;
        log::info!("deployed '{}' as {created}", template.name);

        let mut vm = self.load_vm(&created).await?;

        let snap = state
            .vim
            .create_snapshot(&created, "Root Snap", &Utc::now().to_rfc3339())
            .await?;
        tasks::task_result(tasks::wait_for_task(&state.vim, &snap).await?)?;

        vm.status = VmStatus::Deployed;
        self.inner.inventory.upsert(vm.clone());

        if template.auto_start {
            vm = self.start(&vm.id).await?;
        }
        Ok(vm)
    }

    /// Stop, unprovision networks, unregister, and remove the VM's
    /// datastore folder; finally evict it from the cache.
    pub async fn delete(&self, id: &str) -> VimResult<Vm> {
        self.connect().await?;
        let state = self.require_session().await?;

        let mut vm = self.stop(id).await?;
        let vm_ref = Self::vm_ref(&vm)?;

        if let Err(e) = state.network.unprovision(&vm_ref).await {
            log::warn!("network unprovision for {id} failed: {e}");
        }

        state.vim.unregister_vm(&vm_ref).await?;

        // The VM folder is everything before the last '/' of the vmx path
        if let Some((folder, _)) = vm.path.rsplit_once('/') {
            match state
                .vim
                .delete_datastore_file(folder, &state.refs.datacenter)
                .await
            {
                Ok(task) => match tasks::wait_for_task(&state.vim, &task).await {
                    Ok(info) => {
                        if let Err(e) = tasks::task_result(info) {
                            log::warn!("folder delete for {id} failed: {e}");
                        }
                    }
                    Err(e) => log::warn!("folder delete for {id} failed: {e}"),
                },
                Err(e) if e.kind == VimErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        if !self.inner.inventory.remove(id) {
            tokio::time::sleep(REMOVE_RETRY).await;
            self.inner.inventory.remove(id);
        }

        vm.status = VmStatus::Initialized;
        vm.state = PowerState::Off;
        Ok(vm)
    }

    // ── Reconfiguration ─────────────────────────────────────────────

    /// Apply one key/value mutation; the value's `:<label>` suffix selects
    /// the target device.
    pub async fn change(&self, id: &str, change: &VmKeyValue) -> VimResult<Vm> {
        let (setting, label) = split_change_value(&change.value);
        self.reconfigure(id, &change.key, &label, &setting).await
    }

    async fn vm_devices(&self, vm_ref: &ManagedRef) -> VimResult<Vec<VirtualDevice>> {
        let state = self.require_session().await?;
        let contents = state
            .vim
            .retrieve_properties(&property::single_object_filter(
                vm_ref,
                &["config.hardware.device"],
            ))
            .await?;
        for oc in contents {
            if let Some(PropValue::Devices(devices)) = oc.prop("config.hardware.device") {
                return Ok(devices.clone());
            }
        }
        Ok(Vec::new())
    }

    async fn vm_annotation(&self, vm_ref: &ManagedRef) -> VimResult<String> {
        let state = self.require_session().await?;
        let contents = state
            .vim
            .retrieve_properties(&property::single_object_filter(vm_ref, &["config.annotation"]))
            .await?;
        Ok(contents
            .iter()
            .find_map(|oc| oc.text("config.annotation"))
            .unwrap_or_default()
            .to_string())
    }

    /// Reconfigure one feature of a VM and return the refreshed view.
    pub async fn reconfigure(
        &self,
        id: &str,
        feature: &str,
        label: &str,
        value: &str,
    ) -> VimResult<Vm> {
        self.connect().await?;
        let state = self.require_session().await?;
        let vm = self.cached_vm(id)?;
        let vm_ref = Self::vm_ref(&vm)?;

        let spec_inner = match feature {
            "iso" => {
                let devices = self.vm_devices(&vm_ref).await?;
                let device = select_device(&devices, DeviceKind::Cdrom, label)
                    .ok_or_else(|| VimError::not_found(format!("no CD-ROM '{label}' on {id}")))?;
                deploy::edit_cdrom_spec(device, value)
            }
            "net" | "eth" => {
                let devices = self.vm_devices(&vm_ref).await?;
                let device = select_device(&devices, DeviceKind::Ethernet, label)
                    .ok_or_else(|| VimError::not_found(format!("no NIC '{label}' on {id}")))?;
                if value.starts_with("_none_") {
                    deploy::disconnect_ethernet_spec(device)
                } else {
                    let mut card = EthernetCard {
                        key: device.key,
                        label: device.label.clone(),
                        type_name: device.type_name.clone(),
                        backing: EthernetBacking::Standard { network: value.to_string() },
                        connected: false,
                        start_connected: false,
                    };
                    state.network.update_ethernet_backing(&mut card, value).await?;
                    deploy::edit_ethernet_spec(&card)
                }
            }
            "boot" => {
                let delay: i64 = value
                    .parse()
                    .map_err(|_| VimError::invalid(format!("boot delay '{value}' is not a number")))?;
                deploy::boot_delay_spec(delay)
            }
            "guest" => {
                let mut annotation = self.vm_annotation(&vm_ref).await?;
                annotation.push_str(value);
                if !annotation.ends_with('\n') {
                    annotation.push('\n');
                }
                let pairs = if vm.state == PowerState::Running {
                    guestinfo_pairs(&annotation)
                } else {
                    Vec::new()
                };
                deploy::annotation_spec(&annotation, &pairs)
            }
            other => {
                return Err(VimError::invalid(format!("unknown change key '{other}'")));
            }
        };

        let task = state.vim.reconfig_vm(&vm_ref, &spec_inner).await?;
        tasks::task_result(tasks::wait_for_task(&state.vim, &task).await?)?;
        self.load_vm(&vm_ref).await
    }

    // ── Console / questions ─────────────────────────────────────────

    /// Acquire a webmks console ticket and shape it into a wss URL.
    pub async fn get_ticket(&self, id: &str) -> VimResult<String> {
        self.connect().await?;
        let state = self.require_session().await?;
        let vm = self.cached_vm(id)?;
        let vm_ref = Self::vm_ref(&vm)?;
        let ticket = state.vim.acquire_ticket(&vm_ref, "webmks").await?;
        let host = ticket
            .host
            .clone()
            .unwrap_or_else(|| self.inner.config.host.clone());
        Ok(format_mks_url(&host, ticket.port, &ticket.ticket))
    }

    /// Answer a pending interactive question and clear it from the view.
    pub async fn answer_question(&self, id: &str, question_id: &str, answer: &str) -> VimResult<Vm> {
        self.connect().await?;
        let state = self.require_session().await?;
        let vm = self.cached_vm(id)?;
        let vm_ref = Self::vm_ref(&vm)?;
        state.vim.answer_vm(&vm_ref, question_id, answer).await?;

        let mut vm = self.cached_vm(id)?;
        vm.question = None;
        self.inner.inventory.upsert(vm.clone());
        Ok(vm)
    }

    // ── Disks and files ─────────────────────────────────────────────

    async fn make_directories(&self, path: &str) -> VimResult<()> {
        let state = self.require_session().await?;
        let ds = DatastorePath::parse(path)
            .ok_or_else(|| VimError::invalid(format!("not a datastore path: {path}")))?;
        match state
            .vim
            .make_directory(&ds.folder(), &state.refs.datacenter, true)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.message.to_ascii_lowercase().contains("already exists") => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Clone a disk to `dest`. `blank-<size>-<adapter>.vmdk` sources create
    /// a fresh thin disk instead of copying. Progress is tracked under the
    /// destination path via [`VsphereService::task_progress`].
    pub async fn clone_disk(&self, source: &str, dest: &str) -> VimResult<()> {
        self.connect().await?;
        let state = self.require_session().await?;

        self.make_directories(dest).await?;

        let task = match deploy::parse_blank_disk(source) {
            Some((size_gb, adapter)) => {
                state
                    .vim
                    .create_virtual_disk(dest, &state.refs.datacenter, &adapter, size_gb * 1024 * 1024)
                    .await?
            }
            None => {
                state
                    .vim
                    .copy_virtual_disk(source, dest, &state.refs.datacenter)
                    .await?
            }
        };

        // Freshly created tasks can report empty info for a moment
        tokio::time::sleep(CLONE_INFO_DELAY).await;
        let info = tasks::fetch_task_info(&state.vim, &task).await.ok();
        self.inner.monitor.register_keyed(dest, task, info).await;
        Ok(())
    }

    /// Create a virtual disk without awaiting the task.
    pub async fn create_disk(&self, path: &str, adapter: &str, size_gb: i64) -> VimResult<()> {
        self.connect().await?;
        let state = self.require_session().await?;
        let task = state
            .vim
            .create_virtual_disk(
                path,
                &state.refs.datacenter,
                &deploy::normalize_adapter(adapter),
                size_gb * 1024 * 1024,
            )
            .await?;
        log::debug!("disk create at {path} running as {task}");
        Ok(())
    }

    /// Delete a virtual disk and await the result.
    pub async fn delete_disk(&self, path: &str) -> VimResult<()> {
        self.connect().await?;
        let state = self.require_session().await?;
        let task = state
            .vim
            .delete_virtual_disk(path, &state.refs.datacenter)
            .await?;
        tasks::task_result(tasks::wait_for_task(&state.vim, &task).await?)?;
        Ok(())
    }

    pub async fn get_files(&self, path: &str, recursive: bool) -> VimResult<Vec<String>> {
        self.connect().await?;
        let state = self.require_session().await?;
        DatastoreBrowser::new(&state.vim, &state.refs)
            .get_files(path, recursive)
            .await
    }

    pub async fn folder_exists(&self, folder: &str) -> VimResult<bool> {
        self.connect().await?;
        let state = self.require_session().await?;
        DatastoreBrowser::new(&state.vim, &state.refs)
            .folder_exists(folder)
            .await
    }

    pub async fn file_exists(&self, path: &str) -> VimResult<bool> {
        self.connect().await?;
        let state = self.require_session().await?;
        DatastoreBrowser::new(&state.vim, &state.refs)
            .file_exists(path)
            .await
    }

    // ── Affinity ────────────────────────────────────────────────────

    /// Add a mandatory enabled `Affinity#<tag>` rule for the given VMs on
    /// cluster endpoints, then optionally start them in parallel.
    pub async fn set_affinity(&self, tag: &str, ids: &[String], start: bool) -> VimResult<()> {
        self.connect().await?;
        let state = self.require_session().await?;

        if state.is_vcenter {
            let mut refs = Vec::with_capacity(ids.len());
            for id in ids {
                refs.push(Self::vm_ref(&self.cached_vm(id)?)?);
            }
            let spec = deploy::affinity_rule_spec(tag, &refs);
            let task = state.vim.reconfigure_cluster(&state.refs.cluster, &spec).await?;
            tasks::task_result(tasks::wait_for_task(&state.vim, &task).await?)?;
            log::info!("affinity rule Affinity#{tag} set for {} vms", ids.len());
        }

        if start {
            let mut handles = Vec::with_capacity(ids.len());
            for id in ids {
                let service = self.clone();
                let id = id.clone();
                handles.push(tokio::spawn(async move { service.start(&id).await }));
            }
            for handle in handles {
                match handle.await {
                    Ok(result) => {
                        result?;
                    }
                    Err(e) => return Err(VimError::new(VimErrorKind::Other, e.to_string())),
                }
            }
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Pure helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Saving a VM whose name carries a workspace tag is refused unless the
/// tag appears in the disk path: the disk would otherwise be a stock
/// template belonging to someone else.
fn save_violates_workspace_tag(name: &str, disk_path: &str) -> bool {
    match name_tag(name) {
        Some(tag) if !tag.is_empty() => !disk_path.contains(tag),
        _ => false,
    }
}

/// Split a change value into (setting, device label); the label is the
/// text after the final ':' when present.
fn split_change_value(value: &str) -> (String, String) {
    match value.rsplit_once(':') {
        Some((setting, label)) => (setting.to_string(), label.to_string()),
        None => (value.to_string(), String::new()),
    }
}

/// Select a device by label when given (a plain integer indexes into the
/// feature-typed device list), defaulting to the first of its kind.
fn select_device<'a>(
    devices: &'a [VirtualDevice],
    kind: DeviceKind,
    label: &str,
) -> Option<&'a VirtualDevice> {
    let typed: Vec<&VirtualDevice> = devices.iter().filter(|d| d.kind == kind).collect();
    if label.is_empty() {
        return typed.first().copied();
    }
    if let Ok(index) = label.parse::<usize>() {
        return typed.get(index).copied();
    }
    typed.into_iter().find(|d| d.label.eq_ignore_ascii_case(label))
}

/// Split an annotation into guestinfo pairs, one per CR/LF-separated
/// `key=value` line.
fn guestinfo_pairs(annotation: &str) -> Vec<(String, String)> {
    annotation
        .split(['\r', '\n'])
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            if key.is_empty() {
                return None;
            }
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// `wss://<host>[:<port>]/ticket/<ticket>`, eliding the default port.
fn format_mks_url(host: &str, port: Option<u16>, ticket: &str) -> String {
    match port {
        Some(p) if p != 443 => format!("wss://{host}:{p}/ticket/{ticket}"),
        _ => format!("wss://{host}/ticket/{ticket}"),
    }
}
