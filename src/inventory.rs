//! Eventually-consistent VM inventory.
//!
//! The store is an explicit collaborator so tests can substitute their own
//! and multiple endpoint clients can share or partition one mapping. Keys
//! are VM UUIDs as reported by the hypervisor; only entries whose `host`
//! matches the endpoint name are owned by a given client.

use crate::property::{ObjectContent, PropValue};
use crate::types::{name_tag, PowerState, Vm, VmStatus};

use std::collections::HashMap;
use std::sync::RwLock;

/// Process-level VM mapping, id → view.
pub trait InventoryStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Vm>;
    fn upsert(&self, vm: Vm);
    /// Returns whether the entry was present.
    fn remove(&self, id: &str) -> bool;
    fn ids_for_host(&self, host: &str) -> Vec<String>;
    fn all_for_host(&self, host: &str) -> Vec<Vm>;
    /// Entries owned by `host` whose id or name contain `term`; empty term
    /// returns all.
    fn find(&self, host: &str, term: &str) -> Vec<Vm>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store used by default.
#[derive(Default)]
pub struct MemoryInventory {
    vms: RwLock<HashMap<String, Vm>>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

impl InventoryStore for MemoryInventory {
    fn get(&self, id: &str) -> Option<Vm> {
        read_lock(&self.vms).get(id).cloned()
    }

    fn upsert(&self, vm: Vm) {
        write_lock(&self.vms).insert(vm.id.clone(), vm);
    }

    fn remove(&self, id: &str) -> bool {
        write_lock(&self.vms).remove(id).is_some()
    }

    fn ids_for_host(&self, host: &str) -> Vec<String> {
        read_lock(&self.vms)
            .values()
            .filter(|vm| vm.host == host)
            .map(|vm| vm.id.clone())
            .collect()
    }

    fn all_for_host(&self, host: &str) -> Vec<Vm> {
        read_lock(&self.vms)
            .values()
            .filter(|vm| vm.host == host)
            .cloned()
            .collect()
    }

    fn find(&self, host: &str, term: &str) -> Vec<Vm> {
        read_lock(&self.vms)
            .values()
            .filter(|vm| vm.host == host)
            .filter(|vm| term.is_empty() || vm.id.contains(term) || vm.name.contains(term))
            .cloned()
            .collect()
    }

    fn len(&self) -> usize {
        read_lock(&self.vms).len()
    }
}

/// Fold one full observation of an endpoint into the store: upsert every
/// observed VM (preserving any watched task view) and evict entries that
/// were owned before but are missing from this observation.
pub fn reconcile(store: &dyn InventoryStore, host: &str, observed: Vec<Vm>) {
    let before: std::collections::HashSet<String> =
        store.ids_for_host(host).into_iter().collect();
    let mut seen = std::collections::HashSet::new();
    for mut vm in observed {
        if let Some(prev) = store.get(&vm.id) {
            vm.task = prev.task;
        }
        seen.insert(vm.id.clone());
        store.upsert(vm);
    }
    for id in before.difference(&seen) {
        store.remove(id);
    }
}

/// Format the stats line from a summary observation.
pub fn format_stats(
    overall_status: &str,
    guest_memory: i64,
    max_memory: i64,
    overall_cpu: i64,
    max_cpu: i64,
) -> String {
    let pct = |used: i64, max: i64| -> i64 {
        if max <= 0 {
            0
        } else {
            ((used as f64 / max as f64) * 100.0).round() as i64
        }
    };
    format!(
        "{} | mem-{}% cpu-{}%",
        overall_status,
        pct(guest_memory, max_memory),
        pct(overall_cpu, max_cpu)
    )
}

/// Build a [`Vm`] from a properties snapshot, applying the tenant filter.
///
/// Returns `None` when the VM does not belong to this endpoint (no `#`
/// suffix, or the suffix differs from the configured tenant).
pub fn vm_from_properties(oc: &ObjectContent, endpoint: &str, tenant: &str) -> Option<Vm> {
    let summary = match oc.prop("summary") {
        Some(PropValue::Summary(s)) => s,
        _ => return None,
    };
    let name = if summary.name.is_empty() {
        oc.text("name").unwrap_or_default().to_string()
    } else {
        summary.name.clone()
    };
    if name_tag(&name)? != tenant {
        return None;
    }
    if summary.uuid.is_empty() {
        return None;
    }

    let runtime = match oc.prop("runtime") {
        Some(PropValue::Runtime(rt)) => Some(rt),
        _ => None,
    };
    let disk_path = match oc.prop("layoutEx.file") {
        Some(PropValue::Layout(files)) => files
            .iter()
            .find(|f| f.kind == "diskDescriptor")
            .map(|f| f.name.clone())
            .unwrap_or_default(),
        _ => String::new(),
    };

    let stats = format_stats(
        &summary.overall_status,
        summary.guest_memory_usage,
        runtime.map(|r| r.max_memory_usage).unwrap_or(0),
        summary.overall_cpu_usage,
        runtime.map(|r| r.max_cpu_usage).unwrap_or(0),
    );

    Some(Vm {
        id: summary.uuid.clone(),
        name,
        host: endpoint.to_string(),
        path: summary.vmx_path.clone(),
        disk_path,
        state: runtime
            .map(|r| PowerState::from_vim(&r.power_state))
            .unwrap_or(PowerState::Off),
        reference: oc.obj.to_string(),
        stats,
        status: VmStatus::Deployed,
        question: runtime.and_then(|r| r.question.clone()),
        task: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{DynamicProperty, LayoutFile, RuntimeInfo, VmSummaryInfo};
    use crate::types::ManagedRef;

    fn sample_content(name: &str, uuid: &str) -> ObjectContent {
        ObjectContent {
            obj: ManagedRef::new("VirtualMachine", "vm-1"),
            props: vec![
                DynamicProperty {
                    name: "summary".into(),
                    val: PropValue::Summary(VmSummaryInfo {
                        name: name.into(),
                        uuid: uuid.into(),
                        vmx_path: "[ds1] alpha/alpha.vmx".into(),
                        overall_status: "green".into(),
                        guest_memory_usage: 512,
                        overall_cpu_usage: 500,
                    }),
                },
                DynamicProperty {
                    name: "runtime".into(),
                    val: PropValue::Runtime(RuntimeInfo {
                        power_state: "poweredOn".into(),
                        max_cpu_usage: 2000,
                        max_memory_usage: 1024,
                        question: None,
                    }),
                },
                DynamicProperty {
                    name: "layoutEx.file".into(),
                    val: PropValue::Layout(vec![
                        LayoutFile { name: "[ds1] alpha/alpha.vmx".into(), kind: "config".into() },
                        LayoutFile { name: "[ds1] alpha/alpha.vmdk".into(), kind: "diskDescriptor".into() },
                    ]),
                },
            ],
        }
    }

    #[test]
    fn builds_owned_vm() {
        let vm = vm_from_properties(&sample_content("alpha#ws1", "u-1"), "esx1", "ws1").unwrap();
        assert_eq!(vm.id, "u-1");
        assert_eq!(vm.host, "esx1");
        assert_eq!(vm.state, PowerState::Running);
        assert_eq!(vm.disk_path, "[ds1] alpha/alpha.vmdk");
        assert_eq!(vm.stats, "green | mem-50% cpu-25%");
        assert_eq!(vm.status, VmStatus::Deployed);
    }

    #[test]
    fn tenant_filter_rejects_foreign_and_untagged() {
        assert!(vm_from_properties(&sample_content("alpha#other", "u-1"), "esx1", "ws1").is_none());
        assert!(vm_from_properties(&sample_content("alpha", "u-1"), "esx1", "ws1").is_none());
    }

    #[test]
    fn stats_survive_zero_maximums() {
        assert_eq!(format_stats("gray", 100, 0, 50, 0), "gray | mem-0% cpu-0%");
    }

    #[test]
    fn store_scopes_by_host() {
        let store = MemoryInventory::new();
        let mut vm = vm_from_properties(&sample_content("alpha#ws1", "u-1"), "esx1", "ws1").unwrap();
        store.upsert(vm.clone());
        vm.id = "u-2".into();
        vm.host = "esx2".into();
        store.upsert(vm);
        assert_eq!(store.len(), 2);
        assert_eq!(store.ids_for_host("esx1"), vec!["u-1".to_string()]);
        assert_eq!(store.all_for_host("esx2").len(), 1);
    }

    #[test]
    fn find_matches_id_name_or_everything() {
        let store = MemoryInventory::new();
        store.upsert(vm_from_properties(&sample_content("alpha#ws1", "u-1"), "esx1", "ws1").unwrap());
        store.upsert(vm_from_properties(&sample_content("beta#ws1", "u-2"), "esx1", "ws1").unwrap());
        assert_eq!(store.find("esx1", "alpha").len(), 1);
        assert_eq!(store.find("esx1", "u-2").len(), 1);
        assert_eq!(store.find("esx1", "").len(), 2);
        assert!(store.find("esx2", "").is_empty());
    }

    #[test]
    fn reconcile_evicts_stale_entries() {
        let store = MemoryInventory::new();
        let alpha = vm_from_properties(&sample_content("alpha#ws1", "u-1"), "esx1", "ws1").unwrap();
        let beta = vm_from_properties(&sample_content("beta#ws1", "u-2"), "esx1", "ws1").unwrap();
        store.upsert(alpha.clone());
        store.upsert(beta);

        // beta is no longer observed
        reconcile(&store, "esx1", vec![alpha]);
        assert!(store.get("u-1").is_some());
        assert!(store.get("u-2").is_none());
    }

    #[test]
    fn reconcile_keeps_watched_task_and_foreign_hosts() {
        let store = MemoryInventory::new();
        let mut alpha = vm_from_properties(&sample_content("alpha#ws1", "u-1"), "esx1", "ws1").unwrap();
        alpha.task = Some(crate::types::VmTask {
            name: "save".into(),
            when_created: chrono::Utc::now(),
            progress: 40,
        });
        store.upsert(alpha.clone());

        let mut foreign = alpha.clone();
        foreign.id = "u-9".into();
        foreign.host = "esx2".into();
        foreign.task = None;
        store.upsert(foreign);

        let fresh = vm_from_properties(&sample_content("alpha#ws1", "u-1"), "esx1", "ws1").unwrap();
        reconcile(&store, "esx1", vec![fresh]);
        // the watched task view survives the reload
        assert_eq!(store.get("u-1").unwrap().task.unwrap().progress, 40);
        // other endpoints' entries are untouched
        assert!(store.get("u-9").is_some());
    }

    #[test]
    fn remove_reports_presence() {
        let store = MemoryInventory::new();
        store.upsert(vm_from_properties(&sample_content("alpha#ws1", "u-1"), "esx1", "ws1").unwrap());
        assert!(store.remove("u-1"));
        assert!(!store.remove("u-1"));
    }
}
