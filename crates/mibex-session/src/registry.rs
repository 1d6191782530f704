//! Process and thread registry
//!
//! Tracks live process/thread identities for attach and display. Process
//! listing prefers the backend's native `-list-thread-groups --available`
//! and degrades to an OS-level enumeration collaborator when the backend
//! lacks that command — selection is the `supports_process_list` capability
//! flag, not a hard dependency.
//!
//! Thread display names resolve against the last successful listing; a
//! request arriving before any listing triggers one lazy population instead
//! of answering "unknown" forever.

use crate::dispatcher::Dispatcher;
use async_trait::async_trait;
use mibex_config::BackendCapabilities;
use mibex_core::{Error, Result};
use mibex_mi::{MiCommand, MiListItem, MiValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// One attachable or attached process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub user: Option<String>,
}

/// OS-level process enumeration, used when the backend cannot list
/// processes itself.
#[async_trait]
pub trait ProcessEnumerator: Send + Sync {
    async fn list(&self) -> Result<Vec<ProcessInfo>>;
}

/// Default enumerator backed by the host's process table
pub struct SystemProcessEnumerator;

#[async_trait]
impl ProcessEnumerator for SystemProcessEnumerator {
    async fn list(&self) -> Result<Vec<ProcessInfo>> {
        // sysinfo scans /proc synchronously; keep it off the runtime
        tokio::task::spawn_blocking(|| {
            let system = sysinfo::System::new_all();
            let mut processes: Vec<ProcessInfo> = system
                .processes()
                .iter()
                .map(|(pid, process)| ProcessInfo {
                    pid: pid.as_u32(),
                    name: process.name().to_string(),
                    user: None,
                })
                .collect();
            processes.sort_by_key(|p| p.pid);
            processes
        })
        .await
        .map_err(|e| Error::Io(e.to_string()))
    }
}

#[derive(Default)]
struct RegistryState {
    /// Last successful listing, keyed by pid
    listing: HashMap<u32, ProcessInfo>,
    listing_populated: bool,
    /// Live thread ids and the thread group each belongs to
    threads: HashMap<u32, String>,
}

pub struct ProcessRegistry {
    dispatcher: Arc<Dispatcher>,
    capabilities: BackendCapabilities,
    enumerator: Arc<dyn ProcessEnumerator>,
    state: Mutex<RegistryState>,
}

impl ProcessRegistry {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        capabilities: BackendCapabilities,
        enumerator: Arc<dyn ProcessEnumerator>,
    ) -> Self {
        Self {
            dispatcher,
            capabilities,
            enumerator,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// List attachable processes, native or OS-level per capability, and
    /// refresh the name cache.
    pub async fn list_processes(&self) -> Result<Vec<ProcessInfo>> {
        let processes = if self.capabilities.supports_process_list {
            let result = self
                .dispatcher
                .execute(MiCommand::new("list-thread-groups").option("--available"))
                .await?;
            parse_thread_groups(result.get("groups"))
        } else {
            debug!("backend cannot list processes, using OS enumeration");
            self.enumerator.list().await?
        };

        let mut state = self.lock_state();
        state.listing = processes.iter().map(|p| (p.pid, p.clone())).collect();
        state.listing_populated = true;
        drop(state);
        Ok(processes)
    }

    /// Display name for a process id. Populates the listing lazily on
    /// first use rather than returning "unknown" permanently.
    pub async fn process_display_name(&self, pid: u32) -> Result<String> {
        let populated = self.lock_state().listing_populated;
        if !populated {
            if let Err(e) = self.list_processes().await {
                // A failed lazy listing degrades to a numeric name; the
                // next explicit listing may still succeed.
                warn!(error = %e, "lazy process listing failed");
            }
        }
        let state = self.lock_state();
        Ok(state
            .listing
            .get(&pid)
            .map(|p| format!("{} ({})", p.name, p.pid))
            .unwrap_or_else(|| pid.to_string()))
    }

    /// Bookkeeping for `=thread-created`
    pub fn thread_created(&self, id: u32, group_id: &str) {
        self.lock_state().threads.insert(id, group_id.to_string());
    }

    /// Bookkeeping for `=thread-exited`
    pub fn thread_exited(&self, id: u32) {
        self.lock_state().threads.remove(&id);
    }

    /// Thread group for a live thread id
    pub fn thread_group(&self, id: u32) -> Option<String> {
        self.lock_state().threads.get(&id).cloned()
    }

    /// Live thread ids, ascending
    pub fn live_threads(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.lock_state().threads.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().expect("registry state lock")
    }
}

/// Decode `groups=[{id="42",type="process",description="...",user="..."},...]`
fn parse_thread_groups(groups: Option<&MiValue>) -> Vec<ProcessInfo> {
    let Some(items) = groups.and_then(MiValue::as_list) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let tuple = match item {
                MiListItem::Value(v) => v,
                MiListItem::Pair(_, v) => v,
            };
            let pid = tuple
                .field_str("pid")
                .or_else(|| tuple.field_str("id"))
                .and_then(|s| s.trim_start_matches('i').parse().ok())?;
            Some(ProcessInfo {
                pid,
                name: tuple
                    .field_str("description")
                    .or_else(|| tuple.field_str("executable"))
                    .unwrap_or("<unknown>")
                    .to_string(),
                user: tuple.field_str("user").map(str::to_string),
            })
        })
        .collect()
}
