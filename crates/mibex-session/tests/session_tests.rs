//! End-to-end session scenarios over a scripted in-memory backend

mod common;

use common::{respond, session_over, spawn_backend, ScriptAction};
use mibex_core::{
    attrs, BreakpointIdentity, DebugEvent, Error, InstallState, RunState, SessionEvent, StopReason,
};
use mibex_config::BackendCapabilities;
use mibex_mi::MiCommand;
use std::time::Duration;
use tokio::sync::mpsc;

async fn next_event(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("event channel closed early")
}

async fn assert_no_event(rx: &mut mpsc::Receiver<SessionEvent>) {
    let outcome = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(outcome.is_err(), "unexpected extra event: {outcome:?}");
}

#[tokio::test]
async fn resume_runs_until_breakpoint_stop() {
    let (session, backend_side) = session_over(BackendCapabilities::gdb());
    let backend = spawn_backend(backend_side, |command| match command.operation.as_str() {
        "exec-continue" => respond(&[
            r#"=thread-group-started,id="i1",pid="4242""#,
            r#"=thread-created,id="1",group-id="i1""#,
            "{token}^running",
            r#"*running,thread-id="all""#,
            r#"*stopped,reason="breakpoint-hit",disp="keep",bkptno="2",thread-id="1",frame={addr="0x0000555555555131",func="main",args=[],file="main.c",fullname="/src/main.c",line="12"}"#,
        ]),
        "gdb-exit" => ScriptAction::Close,
        _ => ScriptAction::Hang,
    });
    let mut events = session.subscribe_events().await;

    session.resume().await.unwrap();

    let created = next_event(&mut events).await;
    assert_eq!(created.event, DebugEvent::ThreadCreated { id: 1 });

    let running = next_event(&mut events).await;
    assert_eq!(running.event, DebugEvent::Running);
    assert_eq!(running.context, session.thread_context(1));

    let stopped = next_event(&mut events).await;
    match &stopped.event {
        DebugEvent::Stopped { reason, frame } => {
            assert_eq!(*reason, StopReason::BreakpointHit { number: 2 });
            let frame = frame.as_ref().expect("stop carries a frame");
            assert_eq!(frame.file.as_deref(), Some("/src/main.c"));
            assert_eq!(frame.line, Some(12));
        }
        other => panic!("expected a stop event, got {other:?}"),
    }

    // Same thread id resolves to the identical interned context.
    let thread_ctx = session.thread_context(1);
    assert_eq!(stopped.context, thread_ctx);

    // The stop suspends the thread and its containing process.
    assert_eq!(session.run_state(&thread_ctx), Some(RunState::Suspended));
    let container = session.contexts().container("i1");
    assert_eq!(session.run_state(&container), Some(RunState::Suspended));

    session.shutdown().await;
    backend.abort();
}

#[tokio::test]
async fn backend_termination_fails_all_outstanding_commands() {
    let (session, backend_side) = session_over(BackendCapabilities::gdb());
    let backend = spawn_backend(backend_side, |command| match command.operation.as_str() {
        "exec-run" => respond(&[
            r#"=thread-group-started,id="i1",pid="99""#,
            r#"=thread-created,id="1",group-id="i1""#,
            "{token}^running",
            r#"*running,thread-id="all""#,
        ]),
        "gdb-exit" => ScriptAction::Close,
        _ => ScriptAction::Hang,
    });
    let mut events = session.subscribe_events().await;

    session.execute(MiCommand::new("exec-run")).await.unwrap();
    assert_eq!(
        next_event(&mut events).await.event,
        DebugEvent::ThreadCreated { id: 1 }
    );
    assert_eq!(next_event(&mut events).await.event, DebugEvent::Running);

    // Two commands the backend never answers, then one that closes the
    // stream while they are still pending.
    let first = session
        .submit(MiCommand::new("data-evaluate-expression").quoted_parameter("x"))
        .await
        .unwrap();
    let second = session
        .submit(MiCommand::new("data-evaluate-expression").quoted_parameter("y"))
        .await
        .unwrap();
    session.submit(MiCommand::new("gdb-exit")).await.unwrap();

    assert_eq!(first.wait().await.unwrap_err(), Error::BackendTerminated);
    assert_eq!(second.wait().await.unwrap_err(), Error::BackendTerminated);

    // Exactly one terminal event, and every context retires.
    assert_eq!(next_event(&mut events).await.event, DebugEvent::BackendExited);
    assert_no_event(&mut events).await;

    let thread_ctx = session.thread_context(1);
    assert_eq!(session.run_state(&thread_ctx), Some(RunState::Exited));
    let container = session.contexts().container("i1");
    assert_eq!(session.run_state(&container), Some(RunState::Exited));

    session.shutdown().await;
    backend.abort();
}

#[tokio::test]
async fn duplicate_breakpoint_identity_is_rejected() {
    let (session, backend_side) = session_over(BackendCapabilities::gdb());
    let mut next_number = 1u32;
    let backend = spawn_backend(backend_side, move |command| {
        match command.operation.as_str() {
            "break-insert" => {
                let line = format!(
                    r#"{{token}}^done,bkpt={{number="{next_number}",type="breakpoint",enabled="y"}}"#
                );
                next_number += 1;
                ScriptAction::Respond(vec![line])
            }
            "break-delete" => respond(&["{token}^done"]),
            "gdb-exit" => ScriptAction::Close,
            _ => ScriptAction::Hang,
        }
    });

    let identity = BreakpointIdentity::line("/src/main.c", 12);
    let ctx = session
        .insert_breakpoint(identity.clone(), Default::default())
        .await
        .unwrap();
    assert_eq!(ctx, session.contexts().breakpoint(1));

    let record = session.breakpoint(&identity).await.unwrap();
    assert_eq!(record.state, InstallState::Installed);
    assert_eq!(record.backend_ref.unwrap().0, "1");

    // Second marker with the same identity: no second backend breakpoint.
    let err = session
        .insert_breakpoint(identity.clone(), Default::default())
        .await
        .unwrap_err();
    assert_eq!(err, Error::AlreadySet(identity.clone()));

    // After removal the identity is free again.
    session.remove_breakpoint(&identity).await.unwrap();
    assert!(session.breakpoint(&identity).await.is_none());
    let ctx = session
        .insert_breakpoint(identity.clone(), Default::default())
        .await
        .unwrap();
    assert_eq!(ctx, session.contexts().breakpoint(2));

    session.shutdown().await;
    backend.abort();
}

#[tokio::test]
async fn condition_change_is_applied_in_place_when_supported() {
    let (session, backend_side) = session_over(BackendCapabilities::gdb());
    let backend = spawn_backend(backend_side, |command| match command.operation.as_str() {
        "break-insert" => respond(&[r#"{token}^done,bkpt={number="3",type="breakpoint",enabled="y"}"#]),
        "break-condition" => respond(&["{token}^done"]),
        "gdb-exit" => ScriptAction::Close,
        _ => ScriptAction::Hang,
    });

    let identity = BreakpointIdentity::line("/src/lib.rs", 40);
    session
        .insert_breakpoint(identity.clone(), Default::default())
        .await
        .unwrap();

    let mut changed = mibex_core::AttributeMap::new();
    changed.insert(attrs::CONDITION.to_string(), serde_json::json!("x > 3"));
    session.update_breakpoint(&identity, changed).await.unwrap();

    // In-place: the record keeps its original backend breakpoint.
    let record = session.breakpoint(&identity).await.unwrap();
    assert_eq!(record.state, InstallState::Installed);
    assert_eq!(record.backend_ref.unwrap().0, "3");
    assert_eq!(
        record.attributes.get(attrs::CONDITION),
        Some(&serde_json::json!("x > 3"))
    );

    session.shutdown().await;
    backend.abort();
}

#[tokio::test]
async fn step_marks_thread_stepping_until_the_stop() {
    let (session, backend_side) = session_over(BackendCapabilities::gdb());
    let backend = spawn_backend(backend_side, |command| match command.operation.as_str() {
        "exec-next" => respond(&["{token}^running", r#"*running,thread-id="1""#]),
        "gdb-exit" => ScriptAction::Close,
        _ => ScriptAction::Hang,
    });
    let mut events = session.subscribe_events().await;

    session
        .step(1, mibex_core::StepKind::Over)
        .await
        .unwrap();

    // The backend's running confirmation must not demote Stepping.
    assert_eq!(next_event(&mut events).await.event, DebugEvent::Running);
    let thread_ctx = session.thread_context(1);
    assert_eq!(session.run_state(&thread_ctx), Some(RunState::Stepping));

    session.shutdown().await;
    backend.abort();
}
