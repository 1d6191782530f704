//! Command dispatcher: the serialized front door to one backend process
//!
//! All commands for a session funnel through one bounded queue consumed by a
//! single writer task, so the backend sees them in submission order with
//! strictly increasing tokens. A dedicated reader task decodes the backend's
//! output lines: tagged result records resolve the matching pending request
//! through a oneshot channel; everything else (async records, stream output,
//! malformed lines) is handed to the session pump over a bounded channel —
//! if the pump is saturated the reader blocks, which is the intended
//! backpressure path.
//!
//! EOF on the backend's output is fatal: every outstanding request fails
//! with `BackendTerminated` exactly once and a final `Eof` item tells the
//! pump to retire all live contexts.

use mibex_config::SessionConfig;
use mibex_core::{Error, Result};
use mibex_mi::{
    parse_line, AsyncKind, MiCommand, MiRecord, MiResults, PathQuoting, ResultClass, StreamChannel,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Successful outcome of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub class: ResultClass,
    pub results: MiResults,
}

impl CommandResult {
    /// Field accessor on the result payload
    pub fn get(&self, key: &str) -> Option<&mibex_mi::MiValue> {
        self.results.get(key)
    }
}

/// Non-result material the reader hands to the session pump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendRecord {
    Async {
        kind: AsyncKind,
        class: String,
        results: MiResults,
    },
    Stream {
        channel: StreamChannel,
        text: String,
    },
    /// A line the codec could not parse; reported, never fatal
    ParseFailure {
        line: String,
    },
    /// Backend output stream closed
    Eof,
}

type PendingMap = HashMap<u32, oneshot::Sender<Result<CommandResult>>>;

struct QueueItem {
    token: u32,
    command: MiCommand,
    cancelled: Arc<AtomicBool>,
}

/// A submitted command awaiting its tagged result record.
///
/// Exactly one outcome is delivered: the backend's result, `Timeout`,
/// `Cancelled`, or `BackendTerminated`.
#[derive(Debug)]
pub struct PendingCommand {
    token: u32,
    rx: oneshot::Receiver<Result<CommandResult>>,
    cancelled: Arc<AtomicBool>,
    timeout_ms: u64,
    pending: Arc<Mutex<PendingMap>>,
}

impl PendingCommand {
    /// Token assigned at submission
    pub fn token(&self) -> u32 {
        self.token
    }

    /// Stop waiting. A command not yet transmitted is dropped before it
    /// reaches the backend; a transmitted command keeps executing — the
    /// protocol offers no abort.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// A clonable cancel control, for callers that hand the wait elsewhere
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancelled.clone())
    }

    /// Await the outcome, bounded by the per-command timeout. A timeout is
    /// surfaced, logged, and never retransmitted: the MI protocol may have
    /// partially executed the command. The pending entry is discarded here,
    /// so a backend that never answers cannot grow the pending map; a stray
    /// late result for the token is logged and dropped by the reader.
    pub async fn wait(self) -> Result<CommandResult> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        match tokio::time::timeout(Duration::from_millis(self.timeout_ms), self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                if self.cancelled.load(Ordering::SeqCst) {
                    Err(Error::Cancelled)
                } else {
                    Err(Error::ChannelClosed)
                }
            }
            Err(_) => {
                warn!(token = self.token, timeout_ms = self.timeout_ms, "command timed out");
                self.pending.lock().await.remove(&self.token);
                Err(Error::Timeout(self.timeout_ms))
            }
        }
    }
}

/// Clonable cancellation control for a [`PendingCommand`]
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// The dispatcher proper. Generic over the backend's stream pair so tests
/// drive it with in-memory duplex streams.
pub struct Dispatcher {
    next_token: Mutex<u32>,
    pending: Arc<Mutex<PendingMap>>,
    queue_tx: StdMutex<Option<mpsc::Sender<QueueItem>>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    timeout_ms: u64,
}

impl Dispatcher {
    /// Build a dispatcher over the backend's stdio pair. Returns the
    /// dispatcher and the record channel the session pump consumes.
    pub fn new<R, W>(
        reader: R,
        writer: W,
        config: &SessionConfig,
        quoting: PathQuoting,
    ) -> (Self, mpsc::Receiver<BackendRecord>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
        let (queue_tx, queue_rx) = mpsc::channel(config.command_queue_capacity);
        let (record_tx, record_rx) = mpsc::channel(config.record_channel_capacity);

        let writer_task = Self::spawn_writer_task(writer, queue_rx, pending.clone(), quoting);
        let reader_task = Self::spawn_reader_task(reader, pending.clone(), record_tx);

        (
            Self {
                next_token: Mutex::new(1),
                pending,
                queue_tx: StdMutex::new(Some(queue_tx)),
                tasks: StdMutex::new(vec![writer_task, reader_task]),
                timeout_ms: config.command_timeout_ms,
            },
            record_rx,
        )
    }

    /// Queue a command for transmission.
    ///
    /// Token assignment happens under the same lock as the queue insert, so
    /// token order equals write order. A full queue blocks the submitter
    /// (bounded backpressure), never drops.
    pub async fn submit(&self, command: MiCommand) -> Result<PendingCommand> {
        let queue_tx = match self.queue_tx.lock().expect("queue lock").clone() {
            Some(tx) => tx,
            None => return Err(Error::BackendTerminated),
        };

        // Waiters dropped without calling `wait` leave closed senders
        // behind; prune them before adding another entry.
        let orphaned = self.cleanup_orphaned().await;
        if orphaned > 0 {
            debug!(orphaned, "pruned abandoned pending commands");
        }

        let (tx, rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let mut next = self.next_token.lock().await;
        let token = *next;
        *next = next.wrapping_add(1);
        self.pending.lock().await.insert(token, tx);
        let sent = queue_tx
            .send(QueueItem {
                token,
                command,
                cancelled: cancelled.clone(),
            })
            .await;
        drop(next);

        if sent.is_err() {
            self.pending.lock().await.remove(&token);
            return Err(Error::BackendTerminated);
        }

        Ok(PendingCommand {
            token,
            rx,
            cancelled,
            timeout_ms: self.timeout_ms,
            pending: self.pending.clone(),
        })
    }

    /// Submit and wait in one call
    pub async fn execute(&self, command: MiCommand) -> Result<CommandResult> {
        self.submit(command).await?.wait().await
    }

    /// Whether the reader loop is still attached to a live backend
    pub fn is_alive(&self) -> bool {
        let tasks = self.tasks.lock().expect("task lock");
        tasks.iter().all(|t| !t.is_finished()) && self.queue_tx.lock().expect("queue lock").is_some()
    }

    /// Outstanding request count (diagnostics)
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Drop pending entries whose waiters went away (abandoned futures).
    /// Runs on every submission; a stray late result for such an entry is
    /// logged and discarded either way.
    pub async fn cleanup_orphaned(&self) -> usize {
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|_, tx| !tx.is_closed());
        before - pending.len()
    }

    /// Stop accepting commands, fail everything outstanding, and join the
    /// I/O tasks. Idempotent: the second call finds nothing to do.
    pub async fn shutdown(&self) {
        let queue_tx = self.queue_tx.lock().expect("queue lock").take();
        drop(queue_tx); // writer task drains and exits

        drain_pending(&self.pending).await;

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().expect("task lock"));
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
    }

    fn spawn_writer_task<W>(
        mut writer: W,
        mut queue_rx: mpsc::Receiver<QueueItem>,
        pending: Arc<Mutex<PendingMap>>,
        quoting: PathQuoting,
    ) -> JoinHandle<()>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        tokio::spawn(async move {
            debug!("writer task started");
            while let Some(item) = queue_rx.recv().await {
                let QueueItem {
                    token,
                    command,
                    cancelled,
                } = item;

                // A cancel that lands before transmission wins: resolve the
                // waiter without touching the backend.
                if cancelled.load(Ordering::SeqCst) {
                    if let Some(tx) = pending.lock().await.remove(&token) {
                        let _ = tx.send(Err(Error::Cancelled));
                    }
                    continue;
                }

                let line = command.with_token(token).serialize(quoting);
                trace!(token, line = line.trim_end(), "sending command");
                let write = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.flush().await
                };
                if let Err(e) = write.await {
                    warn!(token, error = %e, "write to backend failed");
                    if let Some(tx) = pending.lock().await.remove(&token) {
                        let _ = tx.send(Err(Error::Io(e.to_string())));
                    }
                    break;
                }
            }
            debug!("writer task exiting");
        })
    }

    fn spawn_reader_task<R>(
        reader: R,
        pending: Arc<Mutex<PendingMap>>,
        record_tx: mpsc::Sender<BackendRecord>,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        tokio::spawn(async move {
            debug!("reader task started");
            let mut lines = BufReader::new(reader).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        trace!(line = line.as_str(), "received line");
                        match parse_line(&line) {
                            Ok(MiRecord::Result {
                                token,
                                class,
                                results,
                            }) => {
                                Self::resolve_result(&pending, token, class, results).await;
                            }
                            Ok(MiRecord::Async {
                                kind,
                                class,
                                results,
                                ..
                            }) => {
                                if record_tx
                                    .send(BackendRecord::Async {
                                        kind,
                                        class,
                                        results,
                                    })
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Ok(MiRecord::Stream { channel, text }) => {
                                if record_tx
                                    .send(BackendRecord::Stream { channel, text })
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Ok(MiRecord::Prompt) => {}
                            Err(e) => {
                                warn!(error = %e, line = line.as_str(), "malformed MI line");
                                if record_tx
                                    .send(BackendRecord::ParseFailure { line })
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("backend output closed (EOF)");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "backend read error");
                        break;
                    }
                }
            }

            // Fatal to the session: every outstanding request fails once,
            // then the pump learns about the termination.
            drain_pending(&pending).await;
            let _ = record_tx.send(BackendRecord::Eof).await;
            debug!("reader task exiting");
        })
    }

    async fn resolve_result(
        pending: &Arc<Mutex<PendingMap>>,
        token: Option<u32>,
        class: ResultClass,
        results: MiResults,
    ) {
        let Some(token) = token else {
            // Untagged results come from commands this engine never sent
            // (e.g. banner replies); nothing is waiting on them.
            debug!(class = %class, "untagged result record ignored");
            return;
        };
        let Some(tx) = pending.lock().await.remove(&token) else {
            warn!(token, class = %class, "result for unknown token");
            return;
        };
        let outcome = match class {
            ResultClass::Error => {
                let msg = results
                    .get("msg")
                    .and_then(mibex_mi::MiValue::as_str)
                    .unwrap_or("unspecified backend error")
                    .to_string();
                Err(Error::Backend(msg))
            }
            _ => Ok(CommandResult { class, results }),
        };
        if tx.send(outcome).is_err() {
            debug!(token, "waiter gone before result delivery");
        }
    }
}

async fn drain_pending(pending: &Arc<Mutex<PendingMap>>) {
    let drained: Vec<_> = pending.lock().await.drain().collect();
    if !drained.is_empty() {
        warn!(count = drained.len(), "failing outstanding commands: backend terminated");
    }
    for (_, tx) in drained {
        let _ = tx.send(Err(Error::BackendTerminated));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mibex_config::SessionConfig;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn test_config() -> SessionConfig {
        SessionConfig::default().command_timeout_ms(2_000)
    }

    #[tokio::test]
    async fn tokens_are_assigned_in_submission_order() {
        let (backend_io, engine_io) = duplex(4096);
        let (engine_read, engine_write) = tokio::io::split(engine_io);
        let (dispatcher, _records) =
            Dispatcher::new(engine_read, engine_write, &test_config(), PathQuoting::Standard);

        let first = dispatcher.submit(MiCommand::new("exec-continue")).await.unwrap();
        let second = dispatcher.submit(MiCommand::new("exec-next")).await.unwrap();
        let third = dispatcher.submit(MiCommand::new("exec-step")).await.unwrap();
        assert_eq!(first.token(), 1);
        assert_eq!(second.token(), 2);
        assert_eq!(third.token(), 3);

        let (mut backend_read, _backend_write) = tokio::io::split(backend_io);
        let mut received = vec![0u8; 256];
        let mut collected = String::new();
        while !collected.contains("3-exec-step") {
            let n = backend_read.read(&mut received).await.unwrap();
            collected.push_str(std::str::from_utf8(&received[..n]).unwrap());
        }
        assert_eq!(
            collected,
            "1-exec-continue\n2-exec-next\n3-exec-step\n"
        );
    }

    #[tokio::test]
    async fn result_resolves_matching_waiter_exactly_once() {
        let (backend_io, engine_io) = duplex(4096);
        let (engine_read, engine_write) = tokio::io::split(engine_io);
        let (dispatcher, _records) =
            Dispatcher::new(engine_read, engine_write, &test_config(), PathQuoting::Standard);
        let (_backend_read, mut backend_write) = tokio::io::split(backend_io);

        let a = dispatcher.submit(MiCommand::new("break-list")).await.unwrap();
        let b = dispatcher.submit(MiCommand::new("thread-info")).await.unwrap();

        // Replies arrive out of order; correlation is by token, not arrival.
        backend_write
            .write_all(b"2^done,threads=[]\n1^error,msg=\"no table\"\n")
            .await
            .unwrap();

        let b_result = b.wait().await.unwrap();
        assert_eq!(b_result.class, ResultClass::Done);
        assert_eq!(
            a.wait().await.unwrap_err(),
            Error::Backend("no table".into())
        );
        assert_eq!(dispatcher.pending_count().await, 0);
    }

    #[tokio::test]
    async fn cancel_before_transmission_suppresses_the_write() {
        // Tiny pipe plus a parked writer: the first command sticks in the
        // duplex buffer unread, the second waits in the queue where cancel
        // can still reach it.
        let (backend_io, engine_io) = duplex(16);
        let (engine_read, engine_write) = tokio::io::split(engine_io);
        let mut config = test_config();
        config.command_queue_capacity = 8;
        let (dispatcher, _records) =
            Dispatcher::new(engine_read, engine_write, &config, PathQuoting::Standard);

        let blocker = dispatcher
            .submit(MiCommand::new("data-evaluate-expression").quoted_parameter("x".repeat(64)))
            .await
            .unwrap();
        let doomed = dispatcher.submit(MiCommand::new("exec-continue")).await.unwrap();
        doomed.cancel();
        assert_eq!(doomed.wait().await.unwrap_err(), Error::Cancelled);

        // Unblock and verify the cancelled command never hits the wire.
        let (mut backend_read, mut backend_write) = tokio::io::split(backend_io);
        let mut collected = String::new();
        let mut buf = vec![0u8; 256];
        while !collected.ends_with("\n") || !collected.contains("data-evaluate-expression") {
            let n = backend_read.read(&mut buf).await.unwrap();
            collected.push_str(std::str::from_utf8(&buf[..n]).unwrap());
        }
        backend_write.write_all(b"1^done\n").await.unwrap();
        assert_eq!(blocker.wait().await.unwrap().class, ResultClass::Done);
        assert!(!collected.contains("exec-continue"));
    }

    #[tokio::test]
    async fn eof_fails_all_outstanding_commands_with_backend_terminated() {
        let (backend_io, engine_io) = duplex(4096);
        let (engine_read, engine_write) = tokio::io::split(engine_io);
        let (dispatcher, mut records) =
            Dispatcher::new(engine_read, engine_write, &test_config(), PathQuoting::Standard);

        let five = dispatcher.submit(MiCommand::new("exec-continue")).await.unwrap();
        let six = dispatcher.submit(MiCommand::new("exec-next")).await.unwrap();

        drop(backend_io); // simulated subprocess death

        assert_eq!(five.wait().await.unwrap_err(), Error::BackendTerminated);
        assert_eq!(six.wait().await.unwrap_err(), Error::BackendTerminated);

        // The pump is told exactly once.
        loop {
            match records.recv().await {
                Some(BackendRecord::Eof) => break,
                Some(_) => continue,
                None => panic!("record channel closed before Eof"),
            }
        }
        assert!(records.recv().await.is_none());
    }

    #[tokio::test]
    async fn timeout_surfaces_without_retransmission() {
        let (backend_io, engine_io) = duplex(4096);
        let (engine_read, engine_write) = tokio::io::split(engine_io);
        let config = SessionConfig::default().command_timeout_ms(50);
        let (dispatcher, _records) =
            Dispatcher::new(engine_read, engine_write, &config, PathQuoting::Standard);
        let (mut backend_read, _backend_write) = tokio::io::split(backend_io);

        let pending = dispatcher.submit(MiCommand::new("exec-run")).await.unwrap();
        assert_eq!(pending.wait().await.unwrap_err(), Error::Timeout(50));

        // Exactly one transmission, despite the timeout.
        let mut buf = vec![0u8; 64];
        let n = backend_read.read(&mut buf).await.unwrap();
        assert_eq!(std::str::from_utf8(&buf[..n]).unwrap(), "1-exec-run\n");
        // The timed-out entry is gone, not parked until session end.
        assert_eq!(dispatcher.pending_count().await, 0);
    }

    #[tokio::test]
    async fn pending_map_does_not_accumulate_timed_out_commands() {
        let (backend_io, engine_io) = duplex(4096);
        let (engine_read, engine_write) = tokio::io::split(engine_io);
        let config = SessionConfig::default().command_timeout_ms(20);
        let (dispatcher, _records) =
            Dispatcher::new(engine_read, engine_write, &config, PathQuoting::Standard);
        let (_backend_read, _backend_write) = tokio::io::split(backend_io);

        // A mute backend: every command times out in turn.
        for _ in 0..5 {
            let pending = dispatcher.submit(MiCommand::new("thread-info")).await.unwrap();
            assert_eq!(pending.wait().await.unwrap_err(), Error::Timeout(20));
        }
        assert_eq!(dispatcher.pending_count().await, 0);

        // Waiters dropped without waiting are pruned by the next submission.
        drop(dispatcher.submit(MiCommand::new("break-list")).await.unwrap());
        let live = dispatcher.submit(MiCommand::new("thread-info")).await.unwrap();
        assert_eq!(dispatcher.pending_count().await, 1);
        assert_eq!(live.token(), 7);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (_backend_io, engine_io) = duplex(4096);
        let (engine_read, engine_write) = tokio::io::split(engine_io);
        let (dispatcher, _records) =
            Dispatcher::new(engine_read, engine_write, &test_config(), PathQuoting::Standard);

        let stranded = dispatcher.submit(MiCommand::new("exec-run")).await.unwrap();
        dispatcher.shutdown().await;
        dispatcher.shutdown().await;

        assert_eq!(stranded.wait().await.unwrap_err(), Error::BackendTerminated);
        assert!(matches!(
            dispatcher.submit(MiCommand::new("exec-run")).await.unwrap_err(),
            Error::BackendTerminated
        ));
        assert!(!dispatcher.is_alive());
    }

    #[tokio::test]
    async fn parse_failures_are_reported_and_parsing_resumes() {
        let (backend_io, engine_io) = duplex(4096);
        let (engine_read, engine_write) = tokio::io::split(engine_io);
        let (dispatcher, mut records) =
            Dispatcher::new(engine_read, engine_write, &test_config(), PathQuoting::Standard);
        let (_backend_read, mut backend_write) = tokio::io::split(backend_io);

        let pending = dispatcher.submit(MiCommand::new("exec-continue")).await.unwrap();
        backend_write
            .write_all(b"!!! not mi at all\n1^done\n")
            .await
            .unwrap();

        assert!(matches!(
            records.recv().await,
            Some(BackendRecord::ParseFailure { line }) if line.starts_with("!!!")
        ));
        assert_eq!(pending.wait().await.unwrap().class, ResultClass::Done);
    }
}
