//! Scripted in-memory backend for session tests
//!
//! Stands in for a real MI backend over a duplex pipe: reads command lines,
//! parses them with the crate's own command codec, and answers with scripted
//! response lines. `{token}` in a scripted line is substituted with the
//! incoming command's token, so scripts do not hard-code dispatcher counters.

use mibex_config::{BackendCapabilities, Config};
use mibex_mi::MiCommand;
use mibex_session::Session;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;

/// What the scripted backend does with one incoming command
pub enum ScriptAction {
    /// Write these lines, in order
    Respond(Vec<String>),
    /// Never answer; the command stays pending
    Hang,
    /// Drop the stream, which the session observes as EOF
    Close,
}

pub fn respond(lines: &[&str]) -> ScriptAction {
    ScriptAction::Respond(lines.iter().map(|s| s.to_string()).collect())
}

/// Run a scripted backend over its side of the duplex pipe.
pub fn spawn_backend<F>(stream: DuplexStream, mut script: F) -> JoinHandle<()>
where
    F: FnMut(&MiCommand) -> ScriptAction + Send + 'static,
{
    tokio::spawn(async move {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let command = MiCommand::parse(&line).expect("session sent a malformed command");
            let token = command
                .token
                .map(|t| t.to_string())
                .unwrap_or_default();
            match script(&command) {
                ScriptAction::Respond(out) => {
                    for response in out {
                        let response = response.replace("{token}", &token);
                        write_half
                            .write_all(response.as_bytes())
                            .await
                            .expect("backend write");
                        write_half.write_all(b"\n").await.expect("backend write");
                    }
                }
                ScriptAction::Hang => {}
                ScriptAction::Close => return,
            }
        }
    })
}

/// A session over an in-memory pipe plus the backend-side stream to script.
pub fn session_over(capabilities: BackendCapabilities) -> (Session, DuplexStream) {
    // Safe to call per test; repeat initialization is a no-op.
    mibex_logging::init(mibex_logging::LogConfig::new().output(mibex_logging::LogOutput::Stderr));

    let mut config = Config::default();
    config.backend.capabilities = capabilities;
    config.session.command_timeout_ms = 2_000;
    config.session.shutdown_timeout_ms = 500;

    let (backend_side, session_side) = tokio::io::duplex(16 * 1024);
    let (read_half, write_half) = tokio::io::split(session_side);
    let session = Session::over_streams(read_half, write_half, config, None);
    (session, backend_side)
}
