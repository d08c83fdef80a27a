//! End-to-end pipeline tests: chunked ingest through diff, coalescing,
//! and bus delivery.

use deltaform_core::config::EngineConfig;
use deltaform_core::events::{DeltaEvent, EventKind};
use deltaform_core::path::{Path, PathStyle};
use deltaform_engine::{Engine, FieldFilter, SessionOptions, SubscriptionFilter, Subscription};

fn quiet_config() -> EngineConfig {
    // A huge window keeps timing out of the picture; flushes happen via
    // stability, caps, or explicit drains.
    EngineConfig {
        coalesce_window_ms: 3_600_000,
        ..Default::default()
    }
}

fn drain(sub: &mut Subscription) -> Vec<DeltaEvent> {
    let mut events = Vec::new();
    while let Some(event) = sub.try_recv() {
        events.push(event);
    }
    events
}

fn kinds_and_paths(events: &[DeltaEvent]) -> Vec<(EventKind, String)> {
    events.iter().map(|e| (e.kind, e.path.clone())).collect()
}

#[tokio::test]
async fn streaming_array_produces_coalesced_adds() {
    let engine = Engine::new(quiet_config()).unwrap();
    let mut sub = engine.subscribe(SubscriptionFilter::default());
    let id = engine.create_session(SessionOptions::default()).unwrap();

    let chunks: [&[u8]; 4] = [b"{\"users\":[", b"{\"id\":1},", b"{\"id\":2}", b"]}"];
    for chunk in chunks {
        let _ = engine.ingest(&id, chunk, false).unwrap();
    }
    let result = engine.finalize(&id).unwrap();
    assert!(result.is_valid);

    let events = drain(&mut sub);
    let added: Vec<&DeltaEvent> = events
        .iter()
        .filter(|e| e.kind == EventKind::PathAdded)
        .collect();

    // One added per array position, exactly once.
    let index_paths: Vec<&str> = added
        .iter()
        .map(|e| e.path.as_str())
        .filter(|p| p.starts_with("users["))
        .collect();
    assert_eq!(index_paths, vec!["users[0]", "users[1]"]);
    assert_eq!(
        added.iter().filter(|e| e.path == "users[1]").count(),
        1,
        "intermediate null for the dangling comma must be coalesced away"
    );
    let users1 = added.iter().find(|e| e.path == "users[1]").unwrap();
    assert_eq!(users1.value, Some(serde_json::json!({"id": 2})));

    // Terminal event closes the stream.
    assert_eq!(events.last().unwrap().kind, EventKind::Complete);

    // Sequence numbers strictly ascend.
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "seqs {seqs:?}");
}

#[tokio::test]
async fn identical_sessions_emit_identical_events() {
    let engine = Engine::new(quiet_config()).unwrap();
    let mut sub = engine.subscribe(SubscriptionFilter::default());

    let mut runs = Vec::new();
    for _ in 0..2 {
        let id = engine.create_session(SessionOptions::default()).unwrap();
        let _ = engine.ingest(&id, br#"{"a":1,"b":2}"#, false).unwrap();
        let _ = engine.finalize(&id).unwrap();
        let events: Vec<DeltaEvent> = drain(&mut sub)
            .into_iter()
            .filter(|e| e.session_id == id)
            .collect();
        runs.push(events);
    }

    let strip = |events: &[DeltaEvent]| -> Vec<(EventKind, String, Option<serde_json::Value>, u64)> {
        events
            .iter()
            .map(|e| (e.kind, e.path.clone(), e.value.clone(), e.seq))
            .collect()
    };
    assert_eq!(strip(&runs[0]), strip(&runs[1]));
}

#[tokio::test]
async fn quiet_ingest_produces_no_delta_events() {
    let engine = Engine::new(quiet_config()).unwrap();
    let id = engine.create_session(SessionOptions::default()).unwrap();

    let _ = engine.ingest(&id, br#"{"a": 1"#, false).unwrap();
    let stats_before = engine.session_stats(&id).unwrap();
    // The same probe content again: same tree, same hashes, no new events.
    let _ = engine.ingest(&id, b"", false).unwrap();
    let stats_after = engine.session_stats(&id).unwrap();

    assert_eq!(
        stats_before.events_emitted + 1, // the empty-chunk progress event
        stats_after.events_emitted
    );
}

#[tokio::test]
async fn no_path_is_removed_before_terminal() {
    let engine = Engine::new(quiet_config()).unwrap();
    let mut sub = engine.subscribe(SubscriptionFilter::default());
    let id = engine.create_session(SessionOptions::default()).unwrap();

    // The partial key "b is dropped by the completer, but the committed
    // tree must retain nothing-yet-emitted rather than remove.
    let _ = engine.ingest(&id, br#"{"a": 1, "b"#, false).unwrap();
    let _ = engine.ingest(&id, br#"": 2}"#, false).unwrap();
    let _ = engine.finalize(&id).unwrap();

    let events = drain(&mut sub);
    let complete_at = events
        .iter()
        .position(|e| e.kind == EventKind::Complete)
        .unwrap();
    assert!(events[..complete_at]
        .iter()
        .all(|e| e.kind != EventKind::PathRemoved));

    let tree = engine.current_tree(&id).unwrap();
    let obj = tree.as_object().unwrap();
    assert!(obj.contains_key("a"));
    assert!(obj.contains_key("b"));
}

#[tokio::test]
async fn empty_chunk_emits_size_zero_progress() {
    let engine = Engine::new(quiet_config()).unwrap();
    let mut sub = engine.subscribe(SubscriptionFilter::default());
    let id = engine.create_session(SessionOptions::default()).unwrap();

    let report = engine.ingest(&id, b"", false).unwrap();
    assert!(!report.tree_updated);
    assert_eq!(report.events_emitted, 1);

    let events = drain(&mut sub);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Progress);
    assert_eq!(
        events[0].value,
        Some(serde_json::json!({"bytes_dropped": 0}))
    );
}

#[tokio::test]
async fn buffer_overflow_drops_at_safe_split_and_reports() {
    let config = EngineConfig {
        max_buffer_bytes: 32,
        coalesce_window_ms: 3_600_000,
        ..Default::default()
    };
    let engine = Engine::new(config).unwrap();
    let mut sub = engine.subscribe(SubscriptionFilter::default());
    let id = engine.create_session(SessionOptions::default()).unwrap();

    let _ = engine.ingest(&id, br#"[{"id": 111},"#, false).unwrap();
    let _ = engine.ingest(&id, br#"{"id": 222},"#, false).unwrap();
    let report = engine.ingest(&id, br#"{"id": 333},"#, false).unwrap();
    assert!(report.bytes_dropped > 0);

    let stats = engine.session_stats(&id).unwrap();
    assert_eq!(stats.buffer_overflows, 1);
    assert_eq!(stats.bytes_dropped, report.bytes_dropped as u64);

    let events = drain(&mut sub);
    assert!(events
        .iter()
        .any(|e| e.kind == EventKind::Progress
            && e.value
                .as_ref()
                .and_then(|v| v["bytes_dropped"].as_u64())
                .unwrap_or(0)
                > 0));
}

#[tokio::test]
async fn field_filter_suppresses_events_but_not_tree() {
    let engine = Engine::new(quiet_config()).unwrap();
    let mut sub = engine.subscribe(SubscriptionFilter::default());
    let id = engine
        .create_session(SessionOptions {
            field_filter: Some(FieldFilter::include(&["name"]).unwrap()),
            ..Default::default()
        })
        .unwrap();

    let _ = engine
        .ingest(&id, br#"{"name": "x", "secret": "y"}"#, false)
        .unwrap();
    let tree = engine.current_tree(&id).unwrap();
    assert!(tree.as_object().unwrap().contains_key("secret"));

    let _ = engine.finalize(&id).unwrap();
    let events = drain(&mut sub);
    assert!(events.iter().all(|e| !e.path.contains("secret")));
    assert!(events
        .iter()
        .any(|e| e.kind == EventKind::PathAdded && e.path == "name"));
}

#[tokio::test]
async fn path_style_controls_event_rendering() {
    let engine = Engine::new(quiet_config()).unwrap();
    let mut sub = engine.subscribe(SubscriptionFilter::default());
    let id = engine
        .create_session(SessionOptions {
            path_style: Some(PathStyle::Slash),
            ..Default::default()
        })
        .unwrap();

    let _ = engine.ingest(&id, br#"{"users": [{"n": 1}]}"#, false).unwrap();
    let _ = engine.finalize(&id).unwrap();

    let events = drain(&mut sub);
    assert!(events
        .iter()
        .filter(|e| e.kind == EventKind::PathAdded)
        .all(|e| e.path.starts_with('/')));
}

#[tokio::test]
async fn prefix_subscription_scopes_delivery() {
    let engine = Engine::new(quiet_config()).unwrap();
    let mut sub = engine.subscribe(SubscriptionFilter {
        path_prefix: Some(Path::parse("users", PathStyle::Dot).unwrap()),
        ..Default::default()
    });
    let id = engine.create_session(SessionOptions::default()).unwrap();

    let _ = engine
        .ingest(&id, br#"{"users": [1], "meta": {"n": 2}}"#, false)
        .unwrap();
    let _ = engine.finalize(&id).unwrap();

    let events = drain(&mut sub);
    for event in &events {
        match event.kind {
            EventKind::PathAdded | EventKind::ValueChanged | EventKind::PathRemoved => {
                assert!(event.path.starts_with("users"), "leaked {:?}", event.path);
            }
            _ => {}
        }
    }
    assert!(events.iter().any(|e| e.kind == EventKind::Complete));
}

#[tokio::test]
async fn explicit_flush_releases_pending_paths() {
    let engine = Engine::new(quiet_config()).unwrap();
    let mut sub = engine.subscribe(SubscriptionFilter::default());
    let id = engine.create_session(SessionOptions::default()).unwrap();

    let _ = engine.ingest(&id, br#"{"a": 1"#, false).unwrap();
    assert!(drain(&mut sub).is_empty(), "still coalescing");

    let flushed = engine.flush(&id, None).unwrap();
    assert!(flushed > 0);
    let events = drain(&mut sub);
    assert_eq!(
        kinds_and_paths(&events),
        vec![(EventKind::PathAdded, "a".to_string())]
    );
}

#[tokio::test]
async fn pull_subscription_awaits_events() {
    let engine = Engine::new(quiet_config()).unwrap();
    let mut sub = engine.subscribe(SubscriptionFilter {
        kinds: Some(vec![EventKind::Complete]),
        ..Default::default()
    });
    let id = engine.create_session(SessionOptions::default()).unwrap();
    let _ = engine.ingest(&id, br#"{"done": true}"#, true).unwrap();

    let event = sub.recv().await.unwrap();
    assert_eq!(event.kind, EventKind::Complete);
    assert_eq!(event.session_id, id);
}
