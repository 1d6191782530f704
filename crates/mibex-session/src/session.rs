//! Session façade: one backend process, one protocol engine
//!
//! A [`Session`] ties the pieces together: it launches (or is handed) a
//! backend stream pair, builds the dispatcher over it, wires the run-control
//! tracker into the event router, and spawns the pump task that turns raw
//! backend records into [`SessionEvent`]s. Consumers talk to the façade;
//! the internal services never reach around it.
//!
//! The pump is the single consumer of the dispatcher's record channel and
//! the single caller of [`EventRouter::publish`], so listeners observe a
//! serialized event stream without further locking on their side.

use crate::breakpoints::{AttributeTranslator, BreakpointMediator, CAttributeTranslator};
use crate::dispatcher::{BackendRecord, CommandResult, Dispatcher, PendingCommand};
use crate::registry::{ProcessEnumerator, ProcessInfo, ProcessRegistry, SystemProcessEnumerator};
use crate::router::{EventRouter, KindFilter, ListenerId, RouterHandle};
use crate::run_control::RunControlTracker;
use mibex_config::Config;
use mibex_core::{
    AttributeMap, BreakpointIdentity, BreakpointRecord, Context, ContextInterner, DebugEvent,
    DebugEventKind, Error, FrameInfo, Result, RunState, SessionEvent, SessionId, StepKind,
    StopReason,
};
use mibex_mi::{AsyncKind, MiCommand, MiResults, MiValue, PathQuoting};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

/// A live debug session over one MI backend
pub struct Session {
    id: SessionId,
    config: Config,
    interner: Arc<ContextInterner>,
    dispatcher: Arc<Dispatcher>,
    breakpoints: BreakpointMediator,
    registry: Arc<ProcessRegistry>,
    tracker: Arc<StdMutex<RunControlTracker>>,
    router: Arc<Mutex<EventRouter>>,
    router_handle: RouterHandle,
    pump: StdMutex<Option<JoinHandle<()>>>,
    child: Mutex<Option<Child>>,
    shut_down: AtomicBool,
}

impl Session {
    /// Launch the configured backend as a child process and build a session
    /// over its stdio.
    pub async fn launch(config: Config) -> Result<Self> {
        let backend = &config.backend;
        let mut command = Command::new(&backend.program);
        command
            .args(&backend.args)
            .envs(&backend.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &backend.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Io("backend child has no captured stdout".to_string())
        })?;
        let stdin = child.stdin.take().ok_or_else(|| {
            Error::Io("backend child has no captured stdin".to_string())
        })?;

        info!(program = %backend.program, "launched debug backend");
        Ok(Self::over_streams(stdout, stdin, config, Some(child)))
    }

    /// Build a session over an arbitrary stream pair. Tests drive this with
    /// in-memory duplex streams; production goes through [`Session::launch`].
    pub fn over_streams<R, W>(reader: R, writer: W, config: Config, child: Option<Child>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let capabilities = config.backend.capabilities.clone();
        let quoting = if capabilities.strip_leading_path_separator {
            PathQuoting::StripLeadingSeparator
        } else {
            PathQuoting::Standard
        };

        let id = SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));
        let interner = Arc::new(ContextInterner::new(id));
        let (dispatcher, records) = Dispatcher::new(reader, writer, &config.session, quoting);
        let dispatcher = Arc::new(dispatcher);

        let translator: Arc<dyn AttributeTranslator> = Arc::new(CAttributeTranslator);
        let breakpoints = BreakpointMediator::new(
            dispatcher.clone(),
            translator,
            capabilities.clone(),
            interner.clone(),
        );
        let enumerator: Arc<dyn ProcessEnumerator> = Arc::new(SystemProcessEnumerator);
        let registry = Arc::new(ProcessRegistry::new(
            dispatcher.clone(),
            capabilities.clone(),
            enumerator,
        ));
        let tracker = Arc::new(StdMutex::new(RunControlTracker::new(capabilities)));

        let mut router = EventRouter::new(config.session.event_channel_capacity);
        let router_handle = router.handle();
        wire_run_control(&mut router, tracker.clone());
        let router = Arc::new(Mutex::new(router));

        let pump = Pump {
            interner: interner.clone(),
            registry: registry.clone(),
            tracker: tracker.clone(),
            router: router.clone(),
            default_group: None,
        };
        let pump_task = tokio::spawn(pump.run(records));

        Self {
            id,
            config,
            interner,
            dispatcher,
            breakpoints,
            registry,
            tracker,
            router,
            router_handle,
            pump: StdMutex::new(Some(pump_task)),
            child: Mutex::new(child),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The session's context interner; all contexts for this session come
    /// from here.
    pub fn contexts(&self) -> &Arc<ContextInterner> {
        &self.interner
    }

    /// Queue a raw MI command; the caller correlates via the returned handle.
    pub async fn submit(&self, command: MiCommand) -> Result<PendingCommand> {
        self.dispatcher.submit(command).await
    }

    /// Queue a raw MI command and wait for its result.
    pub async fn execute(&self, command: MiCommand) -> Result<CommandResult> {
        self.dispatcher.execute(command).await
    }

    /// Resume the whole target. The state change lands when the backend's
    /// `*running` notification arrives, not here.
    pub async fn resume(&self) -> Result<()> {
        self.dispatcher
            .execute(MiCommand::new("exec-continue"))
            .await?;
        Ok(())
    }

    /// Ask the backend to suspend the target.
    pub async fn interrupt(&self) -> Result<()> {
        self.dispatcher
            .execute(MiCommand::new("exec-interrupt"))
            .await?;
        Ok(())
    }

    /// Step one thread. On backend confirmation the thread is marked
    /// `Stepping`, which the later `*running` notification must not demote.
    pub async fn step(&self, thread_id: u32, kind: StepKind) -> Result<()> {
        self.dispatcher
            .execute(
                MiCommand::new(kind.operation())
                    .option("--thread")
                    .option(thread_id.to_string()),
            )
            .await?;
        let ctx = self.thread_context(thread_id);
        self.tracker.lock().expect("tracker lock").stepping(&ctx);
        Ok(())
    }

    /// Resume execution at a different source location. Requires the jump
    /// capability; on backends without it this fails before anything is
    /// sent to the backend.
    pub async fn resume_at(&self, thread_id: u32, file: &str, line: u32) -> Result<()> {
        if !self
            .tracker
            .lock()
            .expect("tracker lock")
            .can_resume_at_location()
        {
            return Err(Error::CapabilityUnsupported("resume at location"));
        }
        let location = format!("{file}:{line}");
        // Temporary breakpoint first so the jump stops where it lands.
        self.dispatcher
            .execute(
                MiCommand::new("break-insert")
                    .option("-t")
                    .path_parameter(location.clone()),
            )
            .await?;
        self.dispatcher
            .execute(
                MiCommand::new("exec-jump")
                    .option("--thread")
                    .option(thread_id.to_string())
                    .path_parameter(location),
            )
            .await?;
        Ok(())
    }

    /// Detach from the target. All contexts retire; the backend stays up.
    pub async fn detach(&self) -> Result<()> {
        self.dispatcher
            .execute(MiCommand::new("target-detach"))
            .await?;
        let event = SessionEvent::new(self.interner.session(), DebugEvent::Detached);
        self.router.lock().await.publish(&event);
        Ok(())
    }

    pub async fn insert_breakpoint(
        &self,
        identity: BreakpointIdentity,
        attributes: AttributeMap,
    ) -> Result<Context> {
        self.breakpoints.insert(identity, attributes).await
    }

    pub async fn remove_breakpoint(&self, identity: &BreakpointIdentity) -> Result<()> {
        self.breakpoints.remove(identity).await
    }

    pub async fn update_breakpoint(
        &self,
        identity: &BreakpointIdentity,
        attributes: AttributeMap,
    ) -> Result<()> {
        self.breakpoints.update(identity, attributes).await
    }

    pub async fn breakpoint(&self, identity: &BreakpointIdentity) -> Option<BreakpointRecord> {
        self.breakpoints.record(identity).await
    }

    pub async fn list_processes(&self) -> Result<Vec<ProcessInfo>> {
        self.registry.list_processes().await
    }

    pub async fn process_display_name(&self, pid: u32) -> Result<String> {
        self.registry.process_display_name(pid).await
    }

    /// Current run state of a context, if the tracker has seen it.
    pub fn run_state(&self, ctx: &Context) -> Option<RunState> {
        self.tracker.lock().expect("tracker lock").state(ctx)
    }

    /// The thread context for a backend thread id, under the thread's known
    /// group or the default container.
    pub fn thread_context(&self, thread_id: u32) -> Context {
        let group = self
            .registry
            .thread_group(thread_id)
            .unwrap_or_else(|| DEFAULT_THREAD_GROUP.to_string());
        let container = self.interner.container(group);
        self.interner.thread(&container, thread_id)
    }

    /// New bounded subscriber channel carrying every published event.
    pub async fn subscribe_events(&self) -> mpsc::Receiver<SessionEvent> {
        self.router.lock().await.subscribe()
    }

    /// Register a synchronous listener. Safe to call from inside another
    /// listener; the registration lands before the next publish.
    pub fn add_listener<F>(&self, filter: KindFilter, callback: F) -> ListenerId
    where
        F: FnMut(&SessionEvent) -> Result<()> + Send + 'static,
    {
        self.router_handle.register(filter, callback)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.router_handle.remove(id);
    }

    /// Whether the backend connection is still accepting commands.
    pub fn is_alive(&self) -> bool {
        self.dispatcher.is_alive()
    }

    /// Tear the session down: best-effort `-gdb-exit`, dispatcher shutdown,
    /// pump join, child reap. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(session = self.id.0, "shutting down session");

        // The backend may already be gone; a refused or timed-out exit
        // command is not an error here.
        let exit = self.dispatcher.execute(MiCommand::new("gdb-exit"));
        if tokio::time::timeout(Duration::from_millis(500), exit)
            .await
            .is_err()
        {
            debug!("backend did not acknowledge exit command");
        }

        self.dispatcher.shutdown().await;

        if let Some(mut child) = self.child.lock().await.take() {
            let grace = Duration::from_millis(self.config.session.shutdown_timeout_ms);
            if tokio::time::timeout(grace, child.wait()).await.is_err() {
                warn!("backend did not exit in time, killing it");
                let _ = child.kill().await;
            }
        }

        let pump = self.pump.lock().expect("pump lock").take();
        if let Some(task) = pump {
            let _ = task.await;
        }
    }
}

/// Group id used for threads the backend never announced a group for.
const DEFAULT_THREAD_GROUP: &str = "i1";

/// Install the run-control tracker as router listeners, so every state
/// transition flows through the same published event all other listeners
/// see.
fn wire_run_control(router: &mut EventRouter, tracker: Arc<StdMutex<RunControlTracker>>) {
    {
        let tracker = tracker.clone();
        router.register(
            KindFilter::Only(vec![DebugEventKind::Stopped]),
            move |ev| {
                let mut tracker = tracker.lock().expect("tracker lock");
                match &ev.event {
                    DebugEvent::Stopped {
                        reason: StopReason::Exited { .. },
                        ..
                    } => tracker.exited(&ev.context),
                    _ => tracker.stopped(&ev.context),
                }
                Ok(())
            },
        );
    }
    {
        let tracker = tracker.clone();
        router.register(
            KindFilter::Only(vec![DebugEventKind::Running]),
            move |ev| {
                tracker.lock().expect("tracker lock").running(&ev.context);
                Ok(())
            },
        );
    }
    {
        let tracker = tracker.clone();
        router.register(
            KindFilter::Only(vec![DebugEventKind::ThreadCreated]),
            move |ev| {
                tracker
                    .lock()
                    .expect("tracker lock")
                    .context_created(&ev.context);
                Ok(())
            },
        );
    }
    {
        let tracker = tracker.clone();
        router.register(
            KindFilter::Only(vec![DebugEventKind::ThreadExited]),
            move |ev| {
                tracker.lock().expect("tracker lock").exited(&ev.context);
                Ok(())
            },
        );
    }
    router.register(
        KindFilter::Only(vec![DebugEventKind::Detached, DebugEventKind::BackendExited]),
        move |_| {
            tracker.lock().expect("tracker lock").mark_all_exited();
            Ok(())
        },
    );
}

/// The pump task: sole consumer of the dispatcher's record channel.
struct Pump {
    interner: Arc<ContextInterner>,
    registry: Arc<ProcessRegistry>,
    tracker: Arc<StdMutex<RunControlTracker>>,
    router: Arc<Mutex<EventRouter>>,
    /// Most recent `=thread-group-started` group id
    default_group: Option<String>,
}

impl Pump {
    async fn run(mut self, mut records: mpsc::Receiver<BackendRecord>) {
        let mut backend_gone = false;
        while let Some(record) = records.recv().await {
            match record {
                BackendRecord::Async {
                    kind,
                    class,
                    results,
                } => self.handle_async(kind, &class, results).await,
                BackendRecord::Stream { channel, text } => {
                    self.publish(
                        self.interner.session(),
                        DebugEvent::Stream { channel, text },
                    )
                    .await;
                }
                BackendRecord::ParseFailure { line } => {
                    self.publish(self.interner.session(), DebugEvent::ParseFailure { line })
                        .await;
                }
                BackendRecord::Eof => {
                    self.backend_gone().await;
                    backend_gone = true;
                }
            }
        }
        // Reader task torn down without a clean EOF record (forced
        // shutdown): contexts still retire exactly once.
        if !backend_gone {
            self.backend_gone().await;
        }
        debug!("session pump finished");
    }

    async fn handle_async(&mut self, kind: AsyncKind, class: &str, results: MiResults) {
        match (kind, class) {
            (AsyncKind::Exec, "stopped") => self.handle_stopped(results).await,
            (AsyncKind::Exec, "running") => self.handle_running(results).await,
            (AsyncKind::Notify, "thread-created") => {
                let Some(id) = field_u32(&results, "id") else {
                    warn!("thread-created notification without a thread id");
                    return;
                };
                let group = results
                    .get("group-id")
                    .and_then(MiValue::as_str)
                    .unwrap_or(DEFAULT_THREAD_GROUP);
                self.registry.thread_created(id, group);
                let ctx = self.thread_context(id);
                self.publish(ctx, DebugEvent::ThreadCreated { id }).await;
            }
            (AsyncKind::Notify, "thread-exited") => {
                let Some(id) = field_u32(&results, "id") else {
                    warn!("thread-exited notification without a thread id");
                    return;
                };
                let ctx = self.thread_context(id);
                self.publish(ctx, DebugEvent::ThreadExited { id }).await;
                self.registry.thread_exited(id);
            }
            (AsyncKind::Notify, "thread-group-started") => {
                if let Some(group) = results.get("id").and_then(MiValue::as_str) {
                    self.default_group = Some(group.to_string());
                    let container = self.interner.container(group);
                    self.tracker
                        .lock()
                        .expect("tracker lock")
                        .context_created(&container);
                }
            }
            (AsyncKind::Notify, "thread-group-exited") => {
                if let Some(group) = results.get("id").and_then(MiValue::as_str) {
                    let container = self.interner.container(group);
                    self.tracker.lock().expect("tracker lock").exited(&container);
                }
            }
            (
                AsyncKind::Notify,
                "breakpoint-created" | "breakpoint-modified" | "breakpoint-deleted",
            ) => {
                let number = results
                    .get("bkpt")
                    .and_then(|b| b.field_u32("number"))
                    .or_else(|| field_u32(&results, "id"));
                let Some(number) = number else {
                    warn!(class, "breakpoint notification without a number");
                    return;
                };
                let ctx = self.interner.breakpoint(number);
                self.publish(ctx, DebugEvent::BreakpointChanged { number })
                    .await;
            }
            _ => {
                debug!(?kind, class, "unhandled async notification");
            }
        }
    }

    async fn handle_stopped(&mut self, results: MiResults) {
        let reason = results
            .get("reason")
            .and_then(MiValue::as_str)
            .map(|r| StopReason::from_mi(r, &results))
            .unwrap_or(StopReason::Other(String::new()));
        let frame = results.get("frame").map(FrameInfo::from_mi);
        let ctx = match field_u32(&results, "thread-id") {
            Some(id) => self.thread_context(id),
            // "all" or absent: the stop applies to the whole container
            None => self.default_container(),
        };
        self.publish(ctx, DebugEvent::Stopped { reason, frame }).await;
    }

    async fn handle_running(&mut self, results: MiResults) {
        match field_u32(&results, "thread-id") {
            Some(id) => {
                let ctx = self.thread_context(id);
                self.publish(ctx, DebugEvent::Running).await;
            }
            None => {
                // "all": every live thread resumes; with none known yet the
                // container itself carries the transition.
                let live = self.registry.live_threads();
                if live.is_empty() {
                    let ctx = self.default_container();
                    self.publish(ctx, DebugEvent::Running).await;
                } else {
                    for id in live {
                        let ctx = self.thread_context(id);
                        self.publish(ctx, DebugEvent::Running).await;
                    }
                }
            }
        }
    }

    async fn backend_gone(&mut self) {
        info!("backend output closed, retiring all contexts");
        self.publish(self.interner.session(), DebugEvent::BackendExited)
            .await;
    }

    async fn publish(&self, context: Context, event: DebugEvent) {
        let event = SessionEvent::new(context, event);
        self.router.lock().await.publish(&event);
    }

    fn thread_context(&self, thread_id: u32) -> Context {
        let group = self
            .registry
            .thread_group(thread_id)
            .or_else(|| self.default_group.clone())
            .unwrap_or_else(|| DEFAULT_THREAD_GROUP.to_string());
        let container = self.interner.container(group);
        self.interner.thread(&container, thread_id)
    }

    fn default_container(&self) -> Context {
        let group = self
            .default_group
            .clone()
            .unwrap_or_else(|| DEFAULT_THREAD_GROUP.to_string());
        self.interner.container(group)
    }
}

fn field_u32(results: &MiResults, key: &str) -> Option<u32> {
    results
        .get(key)
        .and_then(MiValue::as_str)
        .and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn test_config(capabilities: mibex_config::BackendCapabilities) -> Config {
        let mut config = Config::default();
        config.backend.capabilities = capabilities;
        config.session.command_timeout_ms = 1_000;
        config
    }

    #[tokio::test]
    async fn resume_at_fails_fast_without_jump_capability() {
        let (_backend_side, session_side) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(session_side);
        let session = Session::over_streams(
            read_half,
            write_half,
            test_config(mibex_config::BackendCapabilities::lldb_mi()),
            None,
        );

        let err = session.resume_at(1, "/src/main.c", 10).await.unwrap_err();
        assert_eq!(err, Error::CapabilityUnsupported("resume at location"));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (_backend_side, session_side) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(session_side);
        let session = Session::over_streams(
            read_half,
            write_half,
            test_config(mibex_config::BackendCapabilities::gdb()),
            None,
        );

        session.shutdown().await;
        session.shutdown().await;
        assert!(!session.is_alive());
    }
}
