//! Long-running task tracking.
//!
//! Two facilities: a synchronous await that polls one task to its terminal
//! state, and an asynchronous monitor for operations that must not block
//! their caller (background snapshot removal, disk clones). The monitor is
//! driven by the service's 3-second loop.

use crate::error::{VimError, VimResult};
use crate::inventory::InventoryStore;
use crate::property::{self, TaskInfo, TaskState};
use crate::types::{ManagedRef, PowerState, VmTask};
use crate::vim::VimClient;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Poll interval of the synchronous await.
const WAIT_POLL: Duration = Duration::from_secs(1);

/// Fetch a task's `info` property.
pub async fn fetch_task_info(vim: &VimClient, task: &ManagedRef) -> VimResult<TaskInfo> {
    let contents = vim
        .retrieve_properties(&property::single_object_filter(task, &["info"]))
        .await?;
    for oc in &contents {
        if let Some(property::PropValue::Task(info)) = oc.prop("info") {
            return Ok(info.clone());
        }
    }
    Err(VimError::parse(format!("no task info for {task}")))
}

/// Poll every second until the task leaves `queued`/`running`.
///
/// Never times out on its own; cancellation comes from disconnecting the
/// session, which makes the next poll fail.
pub async fn wait_for_task(vim: &VimClient, task: &ManagedRef) -> VimResult<TaskInfo> {
    loop {
        let info = fetch_task_info(vim, task).await?;
        if info.state.is_terminal() {
            return Ok(info);
        }
        tokio::time::sleep(WAIT_POLL).await;
    }
}

/// Raise `TaskError` for a terminal error state, using the localized message.
pub fn task_result(info: TaskInfo) -> VimResult<TaskInfo> {
    if info.state == TaskState::Error {
        return Err(VimError::task(
            info.error_message.clone().unwrap_or_else(|| info.failure_text()),
        ));
    }
    Ok(info)
}

/// Power transitions that failed because the VM is already in the desired
/// state are success. Localized messages are scanned in one place so locale
/// drift has a single home.
pub fn is_already_in_power_state(error_text: &str, target: PowerState) -> bool {
    let lower = error_text.to_ascii_lowercase();
    match target {
        PowerState::Running => lower.contains("powered on"),
        PowerState::Off => lower.contains("powered off"),
    }
}

/// A task being watched on behalf of one VM.
#[derive(Debug, Clone)]
pub struct VimHostTask {
    pub task: ManagedRef,
    pub action: String,
    pub when_created: DateTime<Utc>,
    pub progress: i32,
}

struct KeyedTask {
    task: ManagedRef,
    info: Option<TaskInfo>,
    error_logged: bool,
}

fn keyed_progress(info: Option<&TaskInfo>) -> i32 {
    match info {
        None => 0,
        Some(info) => match info.state {
            TaskState::Success | TaskState::Error => 100,
            _ => info.progress.unwrap_or(0).clamp(0, 99),
        },
    }
}

/// Asynchronous task monitor: per-VM tasks and keyed (clone) tasks.
#[derive(Default)]
pub struct TaskMonitor {
    /// VM id → watched task; at most one per VM
    tasks: Mutex<HashMap<String, VimHostTask>>,
    /// Arbitrary id (typically clone destination path) → task
    task_map: Mutex<HashMap<String, KeyedTask>>,
}

impl TaskMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `task` on behalf of `vm_id`, replacing any previous watch.
    pub async fn register_vm_task(&self, vm_id: &str, task: ManagedRef, action: &str) {
        let entry = VimHostTask {
            task,
            action: action.to_string(),
            when_created: Utc::now(),
            progress: 0,
        };
        self.tasks.lock().await.insert(vm_id.to_string(), entry);
    }

    /// Track a task under an arbitrary id for `task_progress` queries.
    pub async fn register_keyed(&self, id: &str, task: ManagedRef, info: Option<TaskInfo>) {
        self.task_map.lock().await.insert(
            id.to_string(),
            KeyedTask { task, info, error_logged: false },
        );
    }

    /// `-1` unknown, `0` registered, `1..=99` running, `100` terminal.
    pub async fn task_progress(&self, id: &str) -> i32 {
        match self.task_map.lock().await.get(id) {
            None => -1,
            Some(entry) => keyed_progress(entry.info.as_ref()),
        }
    }

    /// One refresh pass; invoked from the service's task loop.
    pub async fn tick(&self, vim: &VimClient, inventory: &dyn InventoryStore) {
        self.tick_vm_tasks(vim, inventory).await;
        self.tick_keyed_tasks(vim).await;
    }

    async fn tick_vm_tasks(&self, vim: &VimClient, inventory: &dyn InventoryStore) {
        let snapshot: Vec<(String, VimHostTask)> = self
            .tasks
            .lock()
            .await
            .iter()
            .map(|(id, t)| (id.clone(), t.clone()))
            .collect();

        for (vm_id, watched) in snapshot {
            let info = match fetch_task_info(vim, &watched.task).await {
                Ok(info) => info,
                Err(e) => {
                    log::debug!("task refresh for vm {vm_id} failed: {e}");
                    continue;
                }
            };

            let progress = match info.state {
                TaskState::Success => 100,
                TaskState::Error => {
                    log::warn!("task '{}' on vm {vm_id} failed: {}", watched.action, info.failure_text());
                    -1
                }
                _ => info.progress.unwrap_or(watched.progress).clamp(0, 99),
            };

            if let Some(mut vm) = inventory.get(&vm_id) {
                vm.task = Some(VmTask {
                    name: watched.action.clone(),
                    when_created: watched.when_created,
                    progress,
                });
                inventory.upsert(vm);
            }

            let mut tasks = self.tasks.lock().await;
            if info.state.is_terminal() {
                tasks.remove(&vm_id);
            } else if let Some(entry) = tasks.get_mut(&vm_id) {
                entry.progress = progress;
            }
        }
    }

    async fn tick_keyed_tasks(&self, vim: &VimClient) {
        let pending: Vec<(String, ManagedRef)> = self
            .task_map
            .lock()
            .await
            .iter()
            .filter(|(_, entry)| {
                entry.info.as_ref().map(|i| !i.state.is_terminal()).unwrap_or(true)
            })
            .map(|(id, entry)| (id.clone(), entry.task.clone()))
            .collect();

        for (id, task) in pending {
            match fetch_task_info(vim, &task).await {
                Ok(info) => {
                    let mut map = self.task_map.lock().await;
                    if let Some(entry) = map.get_mut(&id) {
                        if info.state == TaskState::Error && !entry.error_logged {
                            log::warn!("task '{id}' failed: {}", info.failure_text());
                            entry.error_logged = true;
                        }
                        entry.info = Some(info);
                    }
                }
                Err(e) => log::debug!("task refresh for '{id}' failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(state: TaskState, progress: Option<i32>) -> TaskInfo {
        TaskInfo {
            state,
            progress,
            description_message: None,
            error_message: None,
            result_xml: None,
            entity: None,
        }
    }

    #[test]
    fn power_predicate_matches_substring_case_insensitive() {
        assert!(is_already_in_power_state(
            "The attempted operation cannot be performed in the current state (Powered on).",
            PowerState::Running
        ));
        assert!(is_already_in_power_state(
            "The virtual machine is already powered off.",
            PowerState::Off
        ));
        assert!(!is_already_in_power_state(
            "The virtual machine is already powered on.",
            PowerState::Off
        ));
        assert!(!is_already_in_power_state("Insufficient resources", PowerState::Running));
    }

    #[test]
    fn task_result_raises_localized_message() {
        let mut i = info(TaskState::Error, None);
        i.error_message = Some("The operation is not allowed".into());
        let err = task_result(i).unwrap_err();
        assert_eq!(err.message, "The operation is not allowed");
        assert!(task_result(info(TaskState::Success, Some(100))).is_ok());
    }

    #[test]
    fn keyed_progress_state_machine() {
        assert_eq!(keyed_progress(None), 0);
        assert_eq!(keyed_progress(Some(&info(TaskState::Running, Some(42)))), 42);
        // running progress never reads as terminal
        assert_eq!(keyed_progress(Some(&info(TaskState::Running, Some(100)))), 99);
        assert_eq!(keyed_progress(Some(&info(TaskState::Queued, None))), 0);
        assert_eq!(keyed_progress(Some(&info(TaskState::Success, Some(100)))), 100);
        // errors read 100 so pollers stop, the failure is logged instead
        assert_eq!(keyed_progress(Some(&info(TaskState::Error, None))), 100);
    }

    #[tokio::test]
    async fn unknown_task_progress_is_minus_one() {
        let monitor = TaskMonitor::new();
        assert_eq!(monitor.task_progress("[ds1] a.vmdk").await, -1);

        monitor
            .register_keyed("[ds1] a.vmdk", ManagedRef::new("Task", "task-1"), None)
            .await;
        assert_eq!(monitor.task_progress("[ds1] a.vmdk").await, 0);

        monitor
            .register_keyed(
                "[ds1] a.vmdk",
                ManagedRef::new("Task", "task-1"),
                Some(info(TaskState::Running, Some(61))),
            )
            .await;
        assert_eq!(monitor.task_progress("[ds1] a.vmdk").await, 61);
    }

    #[tokio::test]
    async fn one_watched_task_per_vm() {
        let monitor = TaskMonitor::new();
        monitor
            .register_vm_task("u-1", ManagedRef::new("Task", "task-1"), "save")
            .await;
        monitor
            .register_vm_task("u-1", ManagedRef::new("Task", "task-2"), "save")
            .await;
        let tasks = monitor.tasks.lock().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks.get("u-1").unwrap().task.value, "task-2");
    }
}
