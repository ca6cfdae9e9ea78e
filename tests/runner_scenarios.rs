// tests/runner_scenarios.rs

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use serde_json::{json, Value};

use seedflow::actions::{Action, ActionBuilder, ActionResources, BuilderRegistry};
use seedflow::engine::{Continuation, RunOutcome, RunnerOptions, RunnerPhase};
use seedflow::errors::ActionError;
use seedflow::types::EventKind;
use seedflow::workflow::{ExecutionContext, Trigger, WorkflowDefinition};
use seedflow_test_utils::{finished, init_tracing, with_timeout, Harness, Recorder};

fn on_finished(name: &str) -> seedflow::workflow::WorkflowBuilder {
    WorkflowDefinition::builder(name, Trigger::on(EventKind::TorrentFinished))
}

#[tokio::test(flavor = "multi_thread")]
async fn second_action_reads_first_output() {
    init_tracing();
    let h = Harness::new();

    let def = on_finished("pair")
        .call(|_ctx: &ExecutionContext| -> anyhow::Result<Value> { Ok(json!({ "ok": true })) })
        .call(|ctx: &ExecutionContext| -> anyhow::Result<Value> {
            anyhow::ensure!(ctx.actions() == [json!({ "ok": true })], "unexpected outputs");
            Ok(json!({ "combined": true }))
        })
        .build();

    let runner = h.runner(&def, &finished("aa", "x"), BuilderRegistry::new(), RunnerOptions::default());
    let signal = runner.finished_signal();
    assert!(runner.start());

    let report = with_timeout(signal).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.completed_actions, 2);
    assert_eq!(
        runner.context().actions(),
        &[json!({ "ok": true }), json!({ "combined": true })]
    );
    assert_eq!(runner.phase(), RunnerPhase::Completed);
    assert_eq!(runner.current_index(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_first_action_halts_without_running_the_rest() {
    init_tracing();
    let h = Harness::new();
    let second_ran = Arc::new(AtomicBool::new(false));
    let fires = Arc::new(AtomicUsize::new(0));

    let flag = second_ran.clone();
    let def = on_finished("fails")
        .call(|_ctx: &ExecutionContext| -> anyhow::Result<Value> { Err(anyhow!("boom")) })
        .call(move |_ctx: &ExecutionContext| -> anyhow::Result<Value> {
            flag.store(true, Ordering::SeqCst);
            Ok(Value::Null)
        })
        .build();

    let runner = h.runner(&def, &finished("aa", "x"), BuilderRegistry::new(), RunnerOptions::default());
    let counter = fires.clone();
    runner.on_finished(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let signal = runner.finished_signal();
    runner.start();

    let report = with_timeout(signal).await.unwrap();
    match &report.outcome {
        RunOutcome::Halted { step, error: ActionError::Invoke(msg) } => {
            assert_eq!(*step, 0);
            assert!(msg.contains("boom"), "{msg}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(runner.context().actions().is_empty());
    assert_eq!(runner.current_index(), 0);

    // Releasing the last reference does not fire a second time.
    drop(runner);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!second_ran.load(Ordering::SeqCst));
    assert_eq!(fires.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn start_is_idempotent() {
    init_tracing();
    let h = Harness::new();
    let recorder = Recorder::new();

    let def = on_finished("twice")
        .builtin("record", json!({ "label": "a" }))
        .builtin("record", json!({ "label": "b", "mode": "async", "delay_ms": 10 }))
        .build();

    let runner = h.runner(&def, &finished("aa", "x"), recorder.registry(), RunnerOptions::default());
    let signal = runner.finished_signal();
    assert!(runner.start());
    assert!(!runner.start());

    let report = with_timeout(signal).await.unwrap();
    assert!(!runner.start());
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(recorder.invocations(), 2);
    assert_eq!(recorder.started(1), vec!["a", "b"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_workflow_completes_without_invoking() {
    init_tracing();
    let h = Harness::new();
    let recorder = Recorder::new();
    let def = on_finished("empty").build();

    let runner = h.runner(&def, &finished("aa", "x"), recorder.registry(), RunnerOptions::default());
    let signal = runner.finished_signal();
    runner.start();

    let report = with_timeout(signal).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.completed_actions, 0);
    assert_eq!(recorder.invocations(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn async_steps_complete_in_order_without_overlap() {
    init_tracing();
    let h = Harness::new();
    let recorder = Recorder::new();

    let def = on_finished("async")
        .builtin("record", json!({ "label": "a", "mode": "async", "delay_ms": 30 }))
        .builtin("record", json!({ "label": "b", "mode": "sync" }))
        .builtin("record", json!({ "label": "c", "mode": "async", "delay_ms": 5 }))
        .build();

    let runner = h.runner(&def, &finished("aa", "x"), recorder.registry(), RunnerOptions::default());
    let signal = runner.finished_signal();
    runner.start();
    with_timeout(signal).await.unwrap();

    let seen: Vec<_> = runner.context().actions().iter().map(|o| o["seen"].clone()).collect();
    assert_eq!(seen, vec![json!(0), json!(1), json!(2)]);
    assert_eq!(recorder.max_in_flight(1), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn long_synchronous_sequences_do_not_recurse() {
    init_tracing();
    let h = Harness::new();
    let recorder = Recorder::new();

    let mut builder = on_finished("long");
    for i in 0..2_000 {
        builder = builder.builtin("record", json!({ "label": format!("s{i}") }));
    }
    let def = builder.build();

    let runner = h.runner(&def, &finished("aa", "x"), recorder.registry(), RunnerOptions::default());
    let signal = runner.finished_signal();
    runner.start();

    let report = with_timeout(signal).await.unwrap();
    assert_eq!(report.completed_actions, 2_000);
    assert_eq!(runner.context().actions().len(), 2_000);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_builder_halts_at_that_step() {
    init_tracing();
    let h = Harness::new();
    let recorder = Recorder::new();

    let def = on_finished("late-binding")
        .builtin("record", json!({ "label": "a" }))
        .builtin("does_not_exist", json!({}))
        .builtin("record", json!({ "label": "c" }))
        .build();

    let runner = h.runner(&def, &finished("aa", "x"), recorder.registry(), RunnerOptions::default());
    let signal = runner.finished_signal();
    runner.start();

    let report = with_timeout(signal).await.unwrap();
    assert_eq!(
        report.outcome,
        RunOutcome::Halted {
            step: 1,
            error: ActionError::UnknownBuilder("does_not_exist".into())
        }
    );
    assert_eq!(runner.context().actions().len(), 1);
    assert_eq!(recorder.started(1), vec!["a"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_parameters_are_a_build_error() {
    init_tracing();
    let h = Harness::new();
    let recorder = Recorder::new();
    let def = on_finished("bad-params")
        .builtin("record", json!({ "mode": "sync" }))
        .build();

    let runner = h.runner(&def, &finished("aa", "x"), recorder.registry(), RunnerOptions::default());
    let signal = runner.finished_signal();
    runner.start();

    match with_timeout(signal).await.unwrap().outcome {
        RunOutcome::Halted { step: 0, error: ActionError::Build { builder, message } } => {
            assert_eq!(builder, "record");
            assert!(message.contains("label"), "{message}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn dropped_continuation_halts_the_run() {
    init_tracing();
    let h = Harness::new();
    let recorder = Recorder::new();
    let def = on_finished("abandon")
        .builtin("record", json!({ "label": "a" }))
        .builtin("record", json!({ "label": "b", "mode": "abandon" }))
        .builtin("record", json!({ "label": "c" }))
        .build();

    let runner = h.runner(&def, &finished("aa", "x"), recorder.registry(), RunnerOptions::default());
    let signal = runner.finished_signal();
    runner.start();

    let report = with_timeout(signal).await.unwrap();
    assert_eq!(
        report.outcome,
        RunOutcome::Halted {
            step: 1,
            error: ActionError::Abandoned
        }
    );
    assert_eq!(recorder.started(1), vec!["a", "b"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn stalled_action_times_out_and_late_completion_is_ignored() {
    init_tracing();
    let h = Harness::new();
    let recorder = Recorder::new();
    let def = on_finished("stall")
        .builtin("record", json!({ "label": "a", "mode": "never" }))
        .builtin("record", json!({ "label": "b" }))
        .build();

    let options = RunnerOptions {
        action_timeout: Some(Duration::from_millis(50)),
    };
    let runner = h.runner(&def, &finished("aa", "x"), recorder.registry(), options);
    let signal = runner.finished_signal();
    runner.start();

    let report = with_timeout(signal).await.unwrap();
    assert_eq!(
        report.outcome,
        RunOutcome::Halted {
            step: 0,
            error: ActionError::TimedOut(Duration::from_millis(50))
        }
    );

    for late in recorder.take_held() {
        late.complete(json!({ "late": true }));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(runner.context().actions().is_empty());
    assert_eq!(recorder.started(1), vec!["a"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_action_is_contained() {
    init_tracing();
    let h = Harness::new();
    let def = on_finished("panics")
        .call(|_ctx: &ExecutionContext| -> anyhow::Result<Value> { panic!("kaboom") })
        .build();

    let runner = h.runner(&def, &finished("aa", "x"), BuilderRegistry::new(), RunnerOptions::default());
    let signal = runner.finished_signal();
    runner.start();

    match with_timeout(signal).await.unwrap().outcome {
        RunOutcome::Halted { step: 0, error: ActionError::Invoke(msg) } => {
            assert!(msg.contains("kaboom"), "{msg}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn runner_released_before_start_reports_dropped() {
    init_tracing();
    let h = Harness::new();
    let def = on_finished("never-started")
        .builtin("log", json!({ "message": "unused" }))
        .build();

    let runner = h.runner(&def, &finished("aa", "x"), BuilderRegistry::with_builtins(), RunnerOptions::default());
    let signal = runner.finished_signal();
    drop(runner);

    let report = with_timeout(signal).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Dropped { step: 0 });
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn exec_step_sees_event_fields_in_its_environment() {
    init_tracing();
    let h = Harness::new();
    let def = on_finished("exec")
        .builtin("exec", json!({ "cmd": "echo \"$SEEDFLOW_NAME\" {{torrent.info_hash}}" }))
        .builtin("exec", json!({ "cmd": "exit 4" }))
        .build();

    let runner = h.runner(&def, &finished("aa", "movie"), BuilderRegistry::with_builtins(), RunnerOptions::default());
    let signal = runner.finished_signal();
    runner.start();

    let report = with_timeout(signal).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    let outputs = runner.context().actions().to_vec();
    assert_eq!(outputs[0]["stdout"], "movie aa");
    assert_eq!(outputs[0]["success"], true);
    assert_eq!(outputs[1]["exit_code"], 4);
    assert_eq!(outputs[1]["success"], false);
}

type Log = Arc<Mutex<Vec<String>>>;

/// Completes from another thread, then keeps working inside `invoke`.
struct CompletesEarly {
    label: String,
    log: Log,
    then_fail: bool,
}

impl Action for CompletesEarly {
    fn invoke(self: Box<Self>, _ctx: &ExecutionContext, done: Continuation) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(format!("start {}", self.label));

        let label = self.label.clone();
        std::thread::spawn(move || done.complete(json!({ "label": label })))
            .join()
            .unwrap();

        std::thread::sleep(Duration::from_millis(30));
        self.log.lock().unwrap().push(format!("end {}", self.label));

        if self.then_fail {
            anyhow::bail!("{} failed after completing", self.label);
        }
        Ok(())
    }
}

struct CompletesEarlyBuilder(Log);

impl ActionBuilder for CompletesEarlyBuilder {
    fn build(&self, params: &Value, _resources: &ActionResources) -> anyhow::Result<Box<dyn Action>> {
        Ok(Box::new(CompletesEarly {
            label: params["label"].as_str().unwrap_or("?").to_string(),
            log: Arc::clone(&self.0),
            then_fail: params["then_fail"].as_bool().unwrap_or(false),
        }))
    }
}

fn early_registry(log: &Log) -> BuilderRegistry {
    let mut registry = BuilderRegistry::new();
    registry.register("early", CompletesEarlyBuilder(Arc::clone(log)));
    registry
}

#[tokio::test(flavor = "multi_thread")]
async fn next_step_waits_for_invoke_to_return() {
    init_tracing();
    let h = Harness::new();
    let log: Log = Default::default();
    let def = on_finished("early")
        .builtin("early", json!({ "label": "a" }))
        .builtin("early", json!({ "label": "b" }))
        .builtin("early", json!({ "label": "c" }))
        .build();

    let runner = h.runner(&def, &finished("aa", "x"), early_registry(&log), RunnerOptions::default());
    let signal = runner.finished_signal();
    runner.start();

    let report = with_timeout(signal).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(
        *log.lock().unwrap(),
        ["start a", "end a", "start b", "end b", "start c", "end c"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn error_after_completing_keeps_the_output_and_advances() {
    init_tracing();
    let h = Harness::new();
    let log: Log = Default::default();
    let def = on_finished("late-error")
        .builtin("early", json!({ "label": "a", "then_fail": true }))
        .builtin("early", json!({ "label": "b" }))
        .build();

    let runner = h.runner(&def, &finished("aa", "x"), early_registry(&log), RunnerOptions::default());
    let signal = runner.finished_signal();
    runner.start();

    let report = with_timeout(signal).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.completed_actions, 2);
    assert_eq!(
        runner.context().actions(),
        &[json!({ "label": "a" }), json!({ "label": "b" })]
    );
    assert_eq!(*log.lock().unwrap(), ["start a", "end a", "start b", "end b"]);
}
