// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// End-to-end scenarios for the agent engine, driven by the scripted mock
/// model client.  No network, no real LLM.
use std::sync::Arc;
use std::time::Duration;

use orca_config::{PermissionMode, ToolsConfig};
use orca_core::{
    AgentEvent, CancelToken, Conversation, LoopOutcome, LoopRunner, SessionStore, TurnEngine,
};
use orca_model::{Message, ModelClient, ResponseEvent, Role, ScriptedMockClient};
use orca_tools::{
    CheckpointStore, HookRunner, MemoryStore, PermissionGate, ProcessSupervisor, RateLimiter,
};
use tokio::sync::mpsc;

struct Harness {
    runner: LoopRunner,
    events: mpsc::Receiver<AgentEvent>,
    checkpoint_root: std::path::PathBuf,
}

fn harness(
    model: Arc<dyn ModelClient>,
    dir: &std::path::Path,
    native: bool,
    context_window: usize,
) -> Harness {
    let supervisor = ProcessSupervisor::new();
    let limiter = Arc::new(RateLimiter::new(Duration::ZERO));
    let memory = Arc::new(MemoryStore::new(None, dir.join("memory"), 10));
    let registry =
        Arc::new(orca_tools::builtin_registry(supervisor, limiter, memory, 10).unwrap());
    let gate = Arc::new(PermissionGate::from_config(&ToolsConfig {
        auto_approve_all: true,
        ..ToolsConfig::default()
    }));
    let checkpoint_root = dir.join("checkpoints");
    let (tx, rx) = mpsc::channel(4096);
    let engine = TurnEngine::new(
        model,
        Arc::clone(&registry),
        gate,
        Arc::new(HookRunner::new(Default::default())),
        Arc::new(CheckpointStore::new(checkpoint_root.clone())),
        "sess0001".into(),
        PermissionMode::Normal,
        native,
        Duration::from_secs(5),
        tx.clone(),
    );
    let runner = LoopRunner::new(
        engine,
        25,
        0.8,
        4,
        context_window,
        None,
        registry.names(),
        tx,
    );
    Harness { runner, events: rx, checkpoint_root }
}

fn drain(events: &mut mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = events.try_recv() {
        out.push(ev);
    }
    out
}

// ── Scenario 1: simple text turn ──────────────────────────────────────────────

#[tokio::test]
async fn simple_text_turn() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedMockClient::always_text("Hi!"));
    let requests = model.requests.clone();
    let mut h = harness(model, dir.path(), true, 32_768);

    let mut convo = Conversation::with_system(3.5, "You are an assistant");
    convo.push(Message::user("Say hi"));
    let outcome = h.runner.run(&mut convo, &CancelToken::never()).await.unwrap();

    assert_eq!(outcome, LoopOutcome::Completed);
    assert_eq!(requests.lock().unwrap().len(), 1, "one iteration only");
    assert_eq!(convo.messages.len(), 2);
    assert_eq!(convo.last_assistant_text().as_deref(), Some("Hi!"));
    // No tools executed.
    assert!(!drain(&mut h.events)
        .iter()
        .any(|e| matches!(e, AgentEvent::ToolCallStarted { .. })));
}

// ── Scenario 2: native tool round ─────────────────────────────────────────────

#[tokio::test]
async fn native_tool_round_deletes_file_with_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("temp.txt");
    std::fs::write(&target, "12345").unwrap();

    let model = Arc::new(ScriptedMockClient::tool_then_text(
        "call_1",
        "delete_file",
        format!(r#"{{"path": "{}"}}"#, target.display()),
        "Deleted it.",
    ));
    let mut h = harness(model, dir.path(), true, 32_768);

    let mut convo = Conversation::new(3.5);
    convo.push(Message::user("Delete temp.txt"));
    let outcome = h.runner.run(&mut convo, &CancelToken::never()).await.unwrap();

    assert_eq!(outcome, LoopOutcome::Completed);
    assert!(!target.exists(), "the file must be deleted");

    // A snapshot exists under <ckpt>/<sid>/.
    let baks: Vec<_> = std::fs::read_dir(h.checkpoint_root.join("sess0001"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "bak"))
        .collect();
    assert_eq!(baks.len(), 1);
    assert_eq!(std::fs::read(baks[0].path()).unwrap(), b"12345");

    // The conversation holds the call and its paired result.
    let call = convo
        .messages
        .iter()
        .flat_map(|m| m.calls())
        .next()
        .expect("function call recorded");
    assert_eq!(call.name, "delete_file");
    let result = convo
        .messages
        .iter()
        .flat_map(|m| m.results())
        .find(|r| r.call_id == call.call_id)
        .expect("paired result");
    assert!(result.result.starts_with("Deleted: "));
    assert!(convo.dangling_calls().is_empty());
}

// ── Scenario 3: text-tag tool call and nudge ──────────────────────────────────

#[tokio::test]
async fn text_tag_call_after_nudge() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("foo.txt");
    let tagged = format!(
        r#"<tool_call>{{"name":"write_file","arguments":{{"path":"{}","content":"bar"}}}}</tool_call>"#,
        target.display()
    );
    let model = Arc::new(ScriptedMockClient::new(vec![
        vec![
            ResponseEvent::TextDelta("You can write:\n```bar```".into()),
            ResponseEvent::Done,
        ],
        vec![ResponseEvent::TextDelta(tagged), ResponseEvent::Done],
        vec![ResponseEvent::TextDelta("Done, foo.txt created.".into()), ResponseEvent::Done],
    ]));
    let mut h = harness(model, dir.path(), false, 32_768);

    let mut convo = Conversation::new(3.5);
    convo.push(Message::user("Create a file foo.txt containing bar"));
    let outcome = h.runner.run(&mut convo, &CancelToken::never()).await.unwrap();

    assert_eq!(outcome, LoopOutcome::Completed);
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "bar");
    // The nudge was recorded as a user message, followed by the
    // assistant call + tool result pair.
    let nudge_idx = convo
        .messages
        .iter()
        .position(|m| m.role == Role::User && m.text().contains("tool call"))
        .expect("nudge present");
    let has_result_after = convo.messages[nudge_idx..]
        .iter()
        .any(|m| m.results().next().is_some());
    assert!(has_result_after);
}

// ── Scenario 4: compaction trigger ────────────────────────────────────────────

#[tokio::test]
async fn compaction_replaces_old_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedMockClient::new(vec![
        vec![ResponseEvent::TextDelta("dense summary".into()), ResponseEvent::Done],
        vec![ResponseEvent::TextDelta("onward".into()), ResponseEvent::Done],
    ]));
    // Window 8192, threshold 0.8.
    let mut h = harness(model, dir.path(), true, 8_192);

    let mut convo = Conversation::new(3.5);
    for i in 0..10 {
        convo.push(Message::user(format!("u{i} {}", "words ".repeat(250))));
        convo.push(Message::assistant(format!("a{i} {}", "words ".repeat(250))));
    }
    let before = convo.estimate_tokens();
    assert!(before >= 7_000 * 8 / 10, "fixture must sit near the window");

    let outcome = h.runner.run(&mut convo, &CancelToken::never()).await.unwrap();
    assert_eq!(outcome, LoopOutcome::Completed);

    let summary_idx = convo
        .messages
        .iter()
        .position(|m| m.text().starts_with("[Conversation summary]\ndense summary"))
        .expect("summary message present");
    // Only the preserved tail (last 4 user messages and onward) survives
    // behind the summary.
    let users_before_summary = convo.messages[..summary_idx]
        .iter()
        .filter(|m| m.role == Role::User)
        .count();
    assert_eq!(users_before_summary, 0);
    assert!((convo.estimate_tokens() as f32) / 8_192.0 < 0.8);
}

// ── Scenario 5: background spawn via bash ─────────────────────────────────────

#[tokio::test]
async fn bash_timeout_hands_off_to_background() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new();
    let tool = orca_tools::BashTool {
        supervisor: Arc::clone(&supervisor),
        default_timeout_secs: 30,
    };
    let call = orca_tools::ToolCall {
        id: "c1".into(),
        name: "bash".into(),
        args: serde_json::json!({
            "command": "sleep 60 && echo done",
            "cwd": dir.path(),
            "timeout_seconds": 2
        }),
    };
    let out = orca_tools::Tool::execute(&tool, &call).await;
    assert!(!out.is_error());
    assert!(out
        .content
        .starts_with("Command is still running in the background (process ID: \""));
    assert!(out.content.contains(&dir.path().display().to_string()));
    assert!(out.content.contains("get_process_output"));
    assert!(out.content.contains("stop_process"));

    // The record is retrievable and still running.
    let id = out.content.split('"').nth(1).unwrap().to_string();
    let record = supervisor.get(&id).expect("record retrievable");
    assert!(record.is_running());
    // Not waiting 60 s here: stop and confirm exit is observed.
    supervisor.stop(&id);
    assert!(record.wait_for_exit(Duration::from_secs(5)).await);
}

// ── Scenario 6: fork and rewind ───────────────────────────────────────────────

#[tokio::test]
async fn fork_and_rewind() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("sessions"));

    // 6 messages: u a u [call result] a
    let mut convo = Conversation::new(3.5);
    convo.push(Message::user("first question"));
    convo.push(Message::assistant("first answer"));
    convo.push(Message::user("second question"));
    convo.push(Message::assistant_with_calls(
        "",
        vec![orca_model::FunctionCall {
            call_id: "c1".into(),
            name: "bash".into(),
            args: serde_json::json!({"command": "ls"}).as_object().unwrap().clone(),
        }],
    ));
    convo.push(Message::tool_result("c1", "bash", "files"));
    convo.push(Message::assistant("second answer"));

    let sid = store.save(&convo, None, None, "/work", "m").unwrap();
    let sid2 = store.fork(&convo, Some("alt"), &sid, 4).unwrap();
    assert_ne!(sid2, sid);

    let (forked, record) = store.load(&sid2, 3.5).unwrap();
    assert_eq!(forked.messages.len(), 4);
    assert_eq!(forked.messages, convo.messages[..4].to_vec());
    assert_eq!(record.parent_session_id.as_deref(), Some(sid.as_str()));
    assert_eq!(record.fork_point_message_index, Some(4));

    // Rewind on the original: trailing run (call, result, answer) + user.
    let removed = convo.remove_last_turns(1);
    assert_eq!(removed, 4);
    assert_eq!(convo.messages.len(), 2);
    assert_eq!(convo.last_assistant_text().as_deref(), Some("first answer"));
}

// ── Cross-cutting: round-trip with malformed arguments ────────────────────────

#[tokio::test]
async fn session_round_trip_preserves_raw_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("sessions"));

    let mut convo = Conversation::with_system(3.5, "sys");
    convo.push(Message::user("hi"));
    convo.push(Message::assistant_with_calls(
        "running",
        vec![orca_model::FunctionCall {
            call_id: "c1".into(),
            name: "grep".into(),
            args: serde_json::json!({"pattern": "x"}).as_object().unwrap().clone(),
        }],
    ));
    convo.push(Message::tool_result("c1", "grep", "no matches"));

    let id = store.save(&convo, None, None, "", "").unwrap();
    let (loaded, _) = store.load(&id, 3.5).unwrap();
    assert_eq!(loaded.messages, convo.messages);
    assert_eq!(loaded.system_prompt.as_deref(), Some("sys"));
}

// ── Cross-cutting: dangling-call invariant under cancellation ─────────────────

#[tokio::test]
async fn cancellation_fills_dangling_calls() {
    let dir = tempfile::tempdir().unwrap();
    // Model emits a call; cancellation fires while the tool runs.
    let model = Arc::new(ScriptedMockClient::new(vec![vec![
        ResponseEvent::ToolCall {
            index: 0,
            id: "c1".into(),
            name: "bash".into(),
            arguments: r#"{"command": "sleep 30", "timeout_seconds": 25}"#.into(),
        },
        ResponseEvent::Done,
    ]]));
    let mut h = harness(model, dir.path(), true, 32_768);

    let mut convo = Conversation::new(3.5);
    convo.push(Message::user("run something slow"));

    let (handle, token) = orca_core::cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.cancel();
    });
    let outcome = h.runner.run(&mut convo, &token).await.unwrap();
    assert_eq!(outcome, LoopOutcome::Cancelled);
    assert!(
        convo.dangling_calls().is_empty(),
        "every call must have a matching result after cancellation"
    );
}
