//! Breakpoint mediation: IDE-side markers ⇄ backend breakpoint state
//!
//! Each logical breakpoint moves through `Pending → Installed → Removed`,
//! with `Failed` as the terminal error state. The mediator owns the records,
//! keyed by identity — `(path, line)` for line breakpoints, `(function,
//! variable)` for watchpoints — and enforces:
//!
//! - no duplicate pending installs for one identity (`AlreadySet`),
//! - an Installed record is never discarded without attempting backend
//!   removal first (otherwise the backend leaks a stale breakpoint),
//! - attribute changes the backend cannot apply in place are handled by
//!   remove-then-reinstall instead of failing outright.
//!
//! Translating platform marker attributes into MI arguments is a capability
//! supplied by the debugging-language collaborator ([`AttributeTranslator`]);
//! [`CAttributeTranslator`] covers the C-family defaults.

use crate::dispatcher::Dispatcher;
use indexmap::IndexMap;
use mibex_config::BackendCapabilities;
use mibex_core::{
    attrs, AttributeMap, BackendRef, BreakpointIdentity, BreakpointRecord, Context,
    ContextInterner, Error, InstallState, Result,
};
use mibex_mi::{MiCommand, MiValue};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Maps platform marker attributes to MI commands for one language family.
pub trait AttributeTranslator: Send + Sync {
    /// The insert command for a fresh breakpoint
    fn insert_command(&self, identity: &BreakpointIdentity, attributes: &AttributeMap)
        -> MiCommand;

    /// Commands applying `delta` to an installed breakpoint in place.
    /// Only called when [`Self::supports_in_place`] said yes.
    fn modify_commands(&self, backend_ref: &BackendRef, delta: &AttributeMap) -> Vec<MiCommand>;

    /// Whether every attribute in `delta` is expressible in place
    fn supports_in_place(&self, delta: &AttributeMap) -> bool;
}

/// Default translator for C-family debugging
pub struct CAttributeTranslator;

impl AttributeTranslator for CAttributeTranslator {
    fn insert_command(
        &self,
        identity: &BreakpointIdentity,
        attributes: &AttributeMap,
    ) -> MiCommand {
        match identity {
            BreakpointIdentity::Line { path, line } => {
                let mut cmd = MiCommand::new("break-insert").option("-f");
                if let Some(condition) = attributes.get(attrs::CONDITION).and_then(|v| v.as_str())
                {
                    // Option value rides with its flag: `-c "expr"`
                    cmd = cmd
                        .option("-c")
                        .option(format!("\"{}\"", mibex_mi::escape_c_string(condition)));
                }
                if let Some(ignore) = attributes.get(attrs::IGNORE_COUNT).and_then(|v| v.as_u64())
                {
                    cmd = cmd.option("-i").option(ignore.to_string());
                }
                let enabled = attributes
                    .get(attrs::ENABLED)
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true);
                if !enabled {
                    cmd = cmd.option("-d");
                }
                cmd.path_parameter(format!("{path}:{line}"))
            }
            BreakpointIdentity::Watch { function, variable } => {
                // Watch expressions are scoped to their function
                MiCommand::new("break-watch").quoted_parameter(format!("{function}::{variable}"))
            }
        }
    }

    fn modify_commands(&self, backend_ref: &BackendRef, delta: &AttributeMap) -> Vec<MiCommand> {
        let mut commands = Vec::new();
        for (key, value) in delta {
            match key.as_str() {
                attrs::CONDITION => {
                    let mut cmd = MiCommand::new("break-condition")
                        .parameter(backend_ref.0.clone());
                    if let Some(condition) = value.as_str() {
                        if !condition.is_empty() {
                            cmd = cmd.quoted_parameter(condition);
                        }
                    }
                    commands.push(cmd);
                }
                attrs::ENABLED => {
                    let op = if value.as_bool().unwrap_or(true) {
                        "break-enable"
                    } else {
                        "break-disable"
                    };
                    commands.push(MiCommand::new(op).parameter(backend_ref.0.clone()));
                }
                attrs::IGNORE_COUNT => {
                    commands.push(
                        MiCommand::new("break-after")
                            .parameter(backend_ref.0.clone())
                            .parameter(value.as_u64().unwrap_or(0).to_string()),
                    );
                }
                _ => {}
            }
        }
        commands
    }

    fn supports_in_place(&self, delta: &AttributeMap) -> bool {
        delta.keys().all(|key| {
            matches!(
                key.as_str(),
                attrs::CONDITION | attrs::ENABLED | attrs::IGNORE_COUNT
            )
        })
    }
}

pub struct BreakpointMediator {
    dispatcher: Arc<Dispatcher>,
    translator: Arc<dyn AttributeTranslator>,
    capabilities: BackendCapabilities,
    interner: Arc<ContextInterner>,
    records: Mutex<IndexMap<BreakpointIdentity, BreakpointRecord>>,
}

impl BreakpointMediator {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        translator: Arc<dyn AttributeTranslator>,
        capabilities: BackendCapabilities,
        interner: Arc<ContextInterner>,
    ) -> Self {
        Self {
            dispatcher,
            translator,
            capabilities,
            interner,
            records: Mutex::new(IndexMap::new()),
        }
    }

    /// Install a breakpoint for a new marker. Duplicate identity (pending
    /// or installed) is rejected with `AlreadySet`; a second backend
    /// breakpoint is never created silently.
    pub async fn insert(
        &self,
        identity: BreakpointIdentity,
        attributes: AttributeMap,
    ) -> Result<Context> {
        {
            let mut records = self.records.lock().await;
            if let Some(existing) = records.get(&identity) {
                match existing.state {
                    InstallState::Pending | InstallState::Installed => {
                        return Err(Error::AlreadySet(identity));
                    }
                    // A failed or removed record may be retried with a
                    // fresh Pending→Installed cycle.
                    InstallState::Failed | InstallState::Removed => {
                        records.shift_remove(&identity);
                    }
                }
            }
            records.insert(
                identity.clone(),
                BreakpointRecord::pending(identity.clone(), attributes.clone()),
            );
        }

        let command = self.translator.insert_command(&identity, &attributes);
        let outcome = match self.dispatcher.submit(command).await {
            Ok(pending) => pending.wait().await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                let number = breakpoint_number(result.get("bkpt").or_else(|| result.get("wpt")));
                let Some(number) = number else {
                    let mut records = self.records.lock().await;
                    if let Some(record) = records.get_mut(&identity) {
                        record.mark_failed();
                    }
                    return Err(Error::InstallFailed(
                        "insert acknowledged without a breakpoint number".into(),
                    ));
                };

                let mut records = self.records.lock().await;
                match records.get_mut(&identity) {
                    Some(record) if record.state == InstallState::Pending => {
                        record.mark_installed(BackendRef(number.to_string()));
                        debug!(identity = %identity, number, "breakpoint installed");
                    }
                    _ => {
                        // Marker vanished while the insert was in flight.
                        // Delete straight away so the backend does not keep
                        // a breakpoint nothing tracks.
                        drop(records);
                        warn!(identity = %identity, number, "marker removed mid-install, deleting backend breakpoint");
                        let _ = self
                            .dispatcher
                            .execute(
                                MiCommand::new("break-delete").parameter(number.to_string()),
                            )
                            .await;
                        return Err(Error::NotFound(identity));
                    }
                }

                Ok(match identity.kind() {
                    mibex_core::BreakpointKind::Line => self.interner.breakpoint(number),
                    mibex_core::BreakpointKind::Watch => self.interner.watchpoint(number),
                })
            }
            Err(e) => {
                let mut records = self.records.lock().await;
                if let Some(record) = records.get_mut(&identity) {
                    record.mark_failed();
                }
                warn!(identity = %identity, error = %e, "breakpoint install failed");
                Err(Error::InstallFailed(e.to_string()))
            }
        }
    }

    /// Remove the breakpoint for a deleted marker. An installed backend
    /// breakpoint is deleted first; only then is the record discarded.
    pub async fn remove(&self, identity: &BreakpointIdentity) -> Result<()> {
        let backend_ref = {
            let records = self.records.lock().await;
            let record = records
                .get(identity)
                .ok_or_else(|| Error::NotFound(identity.clone()))?;
            record.backend_ref.clone()
        };

        if let Some(backend_ref) = backend_ref {
            let delete = MiCommand::new("break-delete").parameter(backend_ref.0.clone());
            if let Err(e) = self.dispatcher.execute(delete).await {
                // Removal was attempted; the record is still discarded so a
                // dead marker cannot pin engine state, but the failure is
                // surfaced in the log.
                warn!(identity = %identity, error = %e, "backend breakpoint delete failed");
            }
        }

        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(identity) {
            if record.is_installed() {
                record.mark_removed();
            }
        }
        records.shift_remove(identity);
        Ok(())
    }

    /// Apply changed marker attributes. In-place when the backend and the
    /// translator both support the delta; otherwise remove-then-reinstall.
    pub async fn update(
        &self,
        identity: &BreakpointIdentity,
        new_attributes: AttributeMap,
    ) -> Result<()> {
        let (delta, merged, backend_ref, installed) = {
            let records = self.records.lock().await;
            let record = records
                .get(identity)
                .ok_or_else(|| Error::NotFound(identity.clone()))?;

            let mut delta = AttributeMap::new();
            for (key, value) in &new_attributes {
                if record.attributes.get(key) != Some(value) {
                    delta.insert(key.clone(), value.clone());
                }
            }
            let mut merged = record.attributes.clone();
            for (key, value) in &new_attributes {
                merged.insert(key.clone(), value.clone());
            }
            (
                delta,
                merged,
                record.backend_ref.clone(),
                record.is_installed(),
            )
        };

        if delta.is_empty() {
            return Ok(());
        }

        let in_place = installed
            && self.capabilities.supports_breakpoint_modification
            && self.translator.supports_in_place(&delta);

        if in_place {
            let backend_ref = backend_ref.expect("installed record carries a backend ref");
            for command in self.translator.modify_commands(&backend_ref, &delta) {
                self.dispatcher.execute(command).await?;
            }
            let mut records = self.records.lock().await;
            if let Some(record) = records.get_mut(identity) {
                record.attributes = merged;
            }
            Ok(())
        } else {
            debug!(identity = %identity, "delta not applicable in place, reinstalling");
            self.remove(identity).await?;
            self.insert(identity.clone(), merged).await.map(|_| ())
        }
    }

    /// Snapshot of one record (for inspection and tests)
    pub async fn record(&self, identity: &BreakpointIdentity) -> Option<BreakpointRecord> {
        self.records.lock().await.get(identity).cloned()
    }

    /// Number of live (pending or installed) records
    pub async fn live_count(&self) -> usize {
        self.records
            .lock()
            .await
            .values()
            .filter(|r| matches!(r.state, InstallState::Pending | InstallState::Installed))
            .count()
    }

    /// Whether the given backend breakpoint number belongs to this mediator
    pub async fn owns_number(&self, number: u32) -> bool {
        let wanted = number.to_string();
        self.records
            .lock()
            .await
            .values()
            .any(|r| r.backend_ref.as_ref().map(|b| b.0.as_str()) == Some(wanted.as_str()))
    }
}

fn breakpoint_number(value: Option<&MiValue>) -> Option<u32> {
    value.and_then(|v| v.field_u32("number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn line_attrs(enabled: bool) -> AttributeMap {
        let mut map = AttributeMap::new();
        map.insert(attrs::ENABLED.into(), json!(enabled));
        map
    }

    #[test]
    fn translator_builds_break_insert_with_flags() {
        let mut attributes = line_attrs(false);
        attributes.insert(attrs::CONDITION.into(), json!("x > 3"));
        let cmd = CAttributeTranslator.insert_command(
            &BreakpointIdentity::line("src/main.c", 10),
            &attributes,
        );
        let wire = cmd.serialize(mibex_mi::PathQuoting::Standard);
        assert!(wire.starts_with("-break-insert -f -c \"x > 3\" -d "));
        assert!(wire.contains("src/main.c:10"));
    }

    #[test]
    fn translator_builds_watch_for_function_variable_identity() {
        let cmd = CAttributeTranslator
            .insert_command(&BreakpointIdentity::watch("main", "counter"), &AttributeMap::new());
        assert_eq!(
            cmd.serialize(mibex_mi::PathQuoting::Standard),
            "-break-watch \"main::counter\"\n"
        );
    }

    #[test]
    fn in_place_support_covers_condition_enable_ignore_only() {
        let translator = CAttributeTranslator;
        let mut delta = AttributeMap::new();
        delta.insert(attrs::CONDITION.into(), json!("y == 0"));
        delta.insert(attrs::ENABLED.into(), json!(true));
        assert!(translator.supports_in_place(&delta));

        delta.insert(attrs::LINE.into(), json!(12));
        assert!(!translator.supports_in_place(&delta));
    }

    #[test]
    fn modify_commands_toggle_enablement() {
        let commands = CAttributeTranslator
            .modify_commands(&BackendRef("4".into()), &{
                let mut delta = AttributeMap::new();
                delta.insert(attrs::ENABLED.into(), json!(false));
                delta
            });
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0].serialize(mibex_mi::PathQuoting::Standard),
            "-break-disable 4\n"
        );
    }
}
