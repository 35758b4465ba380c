use std::time::Duration;

use subagent_trace::detector::SubagentDetector;
use subagent_trace::model::{Confidence, MessageKind, ParentSessionId, SessionState, Subtype, Topic};
use subagent_trace::{AggregatorConfig, LocalBus, OpenOptions, SessionAggregator, SessionHandle};
use tokio::time::timeout;

// A parent session that spawns one Task sub-agent, which reports twice and
// finishes. The parent also chats on its own between the steps.
const PARENT_LOG: &[&str] = &[
    r#"{"type":"system","subtype":"init","session_id":"sess-1"}"#,
    r#"{"type":"assistant","session_id":"sess-1","message":{"content":[{"type":"text","text":"Let me delegate."}]}}"#,
    r#"{"type":"assistant","session_id":"sess-1","message":{"content":[{"type":"tool_use","id":"toolu_A","name":"Task","input":{"description":"Audit deps","prompt":"check Cargo.toml","subagent_type":"general-purpose"}}]}}"#,
    r#"{"type":"assistant","session_id":"sess-1","parent_tool_use_id":"toolu_A","message":{"content":[{"type":"text","text":"Reading Cargo.toml"}]}}"#,
    r#"not json at all"#,
    r#"{"type":"assistant","session_id":"sess-1","parent_tool_use_id":"toolu_A","message":{"content":[{"type":"text","text":"Two outdated crates"}]}}"#,
    r#"{"type":"user","session_id":"sess-1","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_A","content":"Found 2 outdated crates"}]}}"#,
    r#"{"type":"result","subtype":"success","session_id":"sess-1"}"#,
];

async fn run(log: &[&str], options: OpenOptions) -> (LocalBus, Vec<SessionHandle>) {
    let bus = LocalBus::new();
    let mut detector = SubagentDetector::new(None, Topic::broadcast("claude-output"));
    let mut sessions = Vec::new();

    for line in log {
        for emission in detector.inspect(line) {
            if let Some(identity) = emission.started.clone() {
                sessions.push(SessionAggregator::open(&bus, identity, options.clone()).await.unwrap());
            }
            emission.publish(&bus);
        }
    }
    (bus, sessions)
}

fn options() -> OpenOptions {
    OpenOptions::new().with_config(AggregatorConfig::default().with_grace_period(None))
}

#[tokio::test]
async fn detected_subagent_produces_full_transcript() {
    let (_bus, sessions) = run(PARENT_LOG, options()).await;
    assert_eq!(sessions.len(), 1);

    let handle = &sessions[0];
    assert_eq!(handle.identity().parent_session_id, ParentSessionId::new("sess-1"));
    assert_eq!(handle.identity().tool_id.as_str(), "toolu_A");

    let mut view = handle.view();
    let state = timeout(Duration::from_secs(2), view.wait_terminal()).await.unwrap();
    assert_eq!(state, SessionState::Completed);

    let transcript = view.transcript();
    let texts: Vec<String> = transcript.iter().map(|m| m.display_text()).collect();
    assert_eq!(
        texts,
        vec!["Audit deps", "Reading Cargo.toml", "Two outdated crates", "Found 2 outdated crates"]
    );
    assert_eq!(transcript[1].kind, MessageKind::Assistant);
    assert_eq!(transcript[3].kind, MessageKind::Result);
    assert_eq!(transcript[3].subtype, Some(Subtype::Completed));
    assert!(transcript.iter().all(|m| m.provenance.confidence == Confidence::Exact));
}

#[tokio::test]
async fn fallback_adds_only_heuristic_entries() {
    let (_bus, sessions) = run(PARENT_LOG, options().with_fallback(true)).await;
    let mut view = sessions[0].view();
    timeout(Duration::from_secs(2), view.wait_terminal()).await.unwrap();

    let transcript = view.transcript();
    let exact: Vec<String> = transcript
        .iter()
        .filter(|m| m.provenance.confidence.is_exact())
        .map(|m| m.display_text())
        .collect();
    assert_eq!(
        exact,
        vec!["Audit deps", "Reading Cargo.toml", "Two outdated crates", "Found 2 outdated crates"]
    );
    assert!(transcript
        .iter()
        .filter(|m| !m.provenance.confidence.is_exact())
        .all(|m| matches!(m.provenance.confidence, Confidence::Heuristic(_))));
    // Published before the sub-agent existed.
    assert!(!transcript.iter().any(|m| m.display_text().contains("Let me delegate")));
}

#[tokio::test]
async fn failing_subagent_ends_errored() {
    let log = [
        r#"{"type":"system","session_id":"sess-2"}"#,
        r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"toolu_B","name":"Agent","input":{"description":"Flaky job"}}]}}"#,
        r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_B","content":"timed out","is_error":true}]}}"#,
    ];
    let (_bus, sessions) = run(&log, options()).await;
    let mut view = sessions[0].view();

    let state = timeout(Duration::from_secs(2), view.wait_terminal()).await.unwrap();
    assert_eq!(state, SessionState::Errored);
    assert_eq!(view.transcript().last().unwrap().display_text(), "timed out");
}

#[tokio::test]
async fn two_parallel_subagents_are_kept_apart() {
    let log = [
        r#"{"type":"system","session_id":"sess-3"}"#,
        r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"toolu_1","name":"Task","input":{"description":"one"}},{"type":"tool_use","id":"toolu_2","name":"Task","input":{"description":"two"}}]}}"#,
        r#"{"type":"assistant","parent_tool_use_id":"toolu_2","message":{"content":[{"type":"text","text":"two working"}]}}"#,
        r#"{"type":"assistant","parent_tool_use_id":"toolu_1","message":{"content":[{"type":"text","text":"one working"}]}}"#,
        r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_1","content":"one done"},{"type":"tool_result","tool_use_id":"toolu_2","content":"two done"}]}}"#,
    ];
    let (bus, sessions) = run(&log, options()).await;
    assert_eq!(sessions.len(), 2);

    for (handle, name) in sessions.iter().zip(["one", "two"]) {
        let mut view = handle.view();
        timeout(Duration::from_secs(2), view.wait_terminal()).await.unwrap();
        let texts: Vec<String> = view.transcript().iter().map(|m| m.display_text()).collect();
        assert_eq!(
            texts,
            vec![name.to_string(), format!("{name} working"), format!("{name} done")]
        );
    }

    for handle in sessions {
        handle.close().await.unwrap();
    }
    assert_eq!(bus.topic_count(), 0);
}
