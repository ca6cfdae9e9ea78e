// tests/runtime_replay.rs

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use seedflow::actions::BuilderRegistry;
use seedflow::config::parse_str;
use seedflow::engine::{
    DispatcherOptions, Runtime, RuntimeEvent, RuntimeOptions, RuntimeStats, TriggerDispatcher,
};
use seedflow::session::{spawn_replay, InfoHash, ReplaySource, SessionCall};
use seedflow::types::{EventKind, OverflowBehaviour};
use seedflow::workflow::{Trigger, WorkflowDefinition};
use seedflow_test_utils::{finished, init_tracing, with_timeout, Harness, Recorder};

fn runtime(
    h: &Harness,
    workflows: Vec<Arc<WorkflowDefinition>>,
    registry: BuilderRegistry,
    options: DispatcherOptions,
    exit_when_idle: bool,
) -> (Runtime, mpsc::UnboundedSender<RuntimeEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let dispatcher = TriggerDispatcher::new(
        workflows,
        Arc::new(registry),
        h.resources.clone(),
        options,
        tx.clone(),
    );
    let runtime = Runtime::new(dispatcher, rx, h.bus.clone(), RuntimeOptions { exit_when_idle });
    (runtime, tx)
}

fn event_file(lines: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file.flush().unwrap();
    file
}

#[tokio::test(flavor = "multi_thread")]
async fn replayed_events_drive_workflows_until_idle() {
    init_tracing();
    let h = Harness::new();

    let config = parse_str(
        r#"
        [workflow.file-away]
        on = "torrent_finished"
        filter = [ { field = "torrent.name", glob = "*.mkv" } ]
        actions = [
          { use = "pause_torrent" },
          { use = "move_storage", path = "/done/{{torrent.name}}" },
          { use = "log", message = "filed {{torrent.name}}" },
        ]

        [workflow.noisy]
        on = ["tracker_error"]
        actions = [ { use = "log", level = "warn", message = "tracker down for {{torrent.name}}" } ]
        "#,
    )
    .unwrap();

    let events = event_file(&[
        r#"{"event":"torrent_added","torrent":{"info_hash":"aa","name":"movie.mkv"}}"#,
        r#"{"event":"torrent_added","torrent":{"info_hash":"bb","name":"notes.txt"}}"#,
        "# comments and garbage are skipped",
        "not an event",
        r#"{"event":"torrent_finished","torrent":{"info_hash":"aa","name":"movie.mkv","progress":1.0}}"#,
        r#"{"event":"torrent_finished","torrent":{"info_hash":"bb","name":"notes.txt","progress":1.0}}"#,
        r#"{"event":"tracker_error","torrent":{"info_hash":"bb","name":"notes.txt"},"tracker_url":"udp://t","message":"timeout"}"#,
    ]);

    let (runtime, tx) = runtime(
        &h,
        config.workflows,
        BuilderRegistry::with_builtins(),
        config.options,
        true,
    );
    spawn_replay(
        ReplaySource::File(events.path().to_path_buf()),
        h.session.clone(),
        h.bus.clone(),
        tx,
    );

    let stats = with_timeout(runtime.run()).await.unwrap();
    assert_eq!(
        stats,
        RuntimeStats {
            events: 3,
            runs_matched: 2,
            runs_completed: 2,
            runs_halted: 0,
            runs_dropped: 0,
        }
    );

    let aa = InfoHash::new("aa");
    assert_eq!(
        h.session.calls(),
        vec![
            SessionCall::PauseTorrent(aa.clone()),
            SessionCall::MoveStorage {
                hash: aa.clone(),
                path: PathBuf::from("/done/movie.mkv")
            },
        ]
    );
    let moved = h.session.torrent(&aa).unwrap();
    assert!(moved.paused);
    assert_eq!(moved.save_path, "/done/movie.mkv");
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_event_file_still_lets_once_mode_exit() {
    init_tracing();
    let h = Harness::new();
    let def = WorkflowDefinition::builder("idle", Trigger::on(EventKind::TorrentFinished)).build();

    let (runtime, tx) = runtime(
        &h,
        vec![Arc::new(def)],
        BuilderRegistry::with_builtins(),
        DispatcherOptions::default(),
        true,
    );
    spawn_replay(
        ReplaySource::File(PathBuf::from("/definitely/not/here.jsonl")),
        h.session.clone(),
        h.bus.clone(),
        tx,
    );

    let stats = with_timeout(runtime.run()).await.unwrap();
    assert_eq!(stats, RuntimeStats::default());
}

#[tokio::test(flavor = "multi_thread")]
async fn once_mode_waits_for_runs_started_by_the_last_event() {
    init_tracing();
    let h = Harness::new();
    let recorder = Recorder::new();

    let def = WorkflowDefinition::builder("slow", Trigger::on(EventKind::TorrentFinished))
        .builtin("record", json!({ "label": "a", "mode": "async", "delay_ms": 40 }))
        .builtin("record", json!({ "label": "b", "mode": "async", "delay_ms": 10 }))
        .build();
    let (runtime, tx) = runtime(
        &h,
        vec![Arc::new(def)],
        recorder.registry(),
        DispatcherOptions::default(),
        true,
    );

    h.bus.publish(finished("aa", "x"));
    tx.send(RuntimeEvent::EventSourceClosed).unwrap();

    let stats = with_timeout(runtime.run()).await.unwrap();
    assert_eq!(stats.runs_completed, 1);
    assert_eq!(recorder.started(1), vec!["a", "b"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn reload_swaps_workflows_and_subscriptions() {
    init_tracing();
    let h = Harness::new();
    let recorder = Recorder::new();

    let old = WorkflowDefinition::builder("old", Trigger::on(EventKind::TorrentAdded))
        .builtin("record", json!({ "label": "old" }))
        .build();
    let (runtime, tx) = runtime(
        &h,
        vec![Arc::new(old)],
        recorder.registry(),
        DispatcherOptions::default(),
        true,
    );
    let task = tokio::spawn(runtime.run());

    let reloaded = parse_str(
        r#"
        [config]
        max_active_runners = 2

        [workflow.new]
        on = "torrent_finished"
        actions = [ { use = "record", label = "new" } ]
        "#,
    )
    .unwrap();
    tx.send(RuntimeEvent::Reload(reloaded)).unwrap();

    // Nothing listens for torrent_finished until the reload is applied.
    with_timeout(async {
        while h.bus.publish(finished("aa", "x")) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    h.bus.publish(seedflow_test_utils::added("bb", "y"));
    tx.send(RuntimeEvent::EventSourceClosed).unwrap();

    let stats = with_timeout(task).await.unwrap().unwrap();
    assert_eq!(stats.events, 1);
    assert_eq!(stats.runs_completed, 1);
    assert_eq!(recorder.started(1), vec!["new"]);
    assert_eq!(recorder.invocations(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_the_loop_with_runs_in_flight() {
    init_tracing();
    let h = Harness::new();
    let recorder = Recorder::new();

    let def = WorkflowDefinition::builder("stuck", Trigger::on(EventKind::TorrentFinished))
        .builtin("record", json!({ "label": "a", "mode": "never" }))
        .build();
    let (runtime, tx) = runtime(
        &h,
        vec![Arc::new(def)],
        recorder.registry(),
        DispatcherOptions::default(),
        false,
    );

    h.bus.publish(finished("aa", "x"));
    let task = tokio::spawn(runtime.run());

    with_timeout(async {
        while recorder.invocations() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    tx.send(RuntimeEvent::ShutdownRequested).unwrap();

    let stats = with_timeout(task).await.unwrap().unwrap();
    assert_eq!(stats.events, 1);
    assert_eq!(stats.runs_matched, 1);
    assert_eq!(stats.runs_completed, 0);
    drop(recorder.take_held());
}

#[tokio::test(flavor = "multi_thread")]
async fn control_events_are_not_starved_by_a_busy_bus() {
    init_tracing();
    let h = Harness::new();
    let recorder = Recorder::new();

    let def = WorkflowDefinition::builder("busy", Trigger::on(EventKind::TorrentFinished))
        .builtin("record", json!({ "label": "a" }))
        .build();
    let (runtime, tx) = runtime(
        &h,
        vec![Arc::new(def)],
        recorder.registry(),
        DispatcherOptions::default(),
        false,
    );

    for i in 0..50 {
        assert_eq!(h.bus.publish(finished(&format!("{i:02x}"), "x")), 1);
    }
    tx.send(RuntimeEvent::ShutdownRequested).unwrap();

    let stats = with_timeout(runtime.run()).await.unwrap();
    assert_eq!(stats.events, 0);
    assert_eq!(recorder.invocations(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn runs_dropped_at_the_cap_are_counted_as_matched_and_dropped() {
    init_tracing();
    let h = Harness::new();
    let recorder = Recorder::new();

    let def = WorkflowDefinition::builder("capped", Trigger::on(EventKind::TorrentFinished))
        .builtin("record", json!({ "label": "a", "mode": "async", "delay_ms": 20 }))
        .build();
    let options = DispatcherOptions {
        max_active_runners: Some(1),
        pending_queue_length: 1,
        overflow: OverflowBehaviour::Queue,
        ..DispatcherOptions::default()
    };
    let (runtime, tx) = runtime(&h, vec![Arc::new(def)], recorder.registry(), options, true);

    for hash in ["aa", "bb", "cc"] {
        h.bus.publish(finished(hash, "x"));
    }
    tx.send(RuntimeEvent::EventSourceClosed).unwrap();

    let stats = with_timeout(runtime.run()).await.unwrap();
    assert_eq!(
        stats,
        RuntimeStats {
            events: 3,
            runs_matched: 3,
            runs_completed: 2,
            runs_halted: 0,
            runs_dropped: 1,
        }
    );
    assert_eq!(
        stats.runs_matched,
        stats.runs_completed + stats.runs_halted + stats.runs_dropped
    );
    assert_eq!(recorder.invocations(), 2);
}
