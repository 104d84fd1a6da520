//! Integration tests for the TCC coordinator.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;
use tcc::{
    Checkpoint, HandlerError, InMemoryStateStore, RecordingStrategy, StepFn,
    StepParameter, TRANSACTION_ID_KEY, TccCoordinator, TccError, TccHandler, TccStatus,
};

/// Shared call journal so tests can assert ordering across handlers.
#[derive(Clone, Default)]
struct Journal(Arc<RwLock<Vec<String>>>);

impl Journal {
    fn record(&self, entry: impl Into<String>) {
        self.0.write().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.read().unwrap().clone()
    }

    fn entries_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.starts_with(prefix))
            .collect()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum FailureMode {
    Never,
    Fail,
    Timeout,
}

impl FailureMode {
    fn check(self, op: &str, name: &str) -> Result<(), HandlerError> {
        match self {
            FailureMode::Never => Ok(()),
            FailureMode::Fail => Err(HandlerError::failed(format!("{op} {name} failed"))),
            FailureMode::Timeout => Err(HandlerError::timeout(format!("{op} {name} timed out"))),
        }
    }
}

/// TCC participant that journals every call.
struct Participant {
    name: &'static str,
    journal: Journal,
    on_reserve: FailureMode,
    on_confirm: FailureMode,
    on_cancel: FailureMode,
}

impl Participant {
    fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: journal.clone(),
            on_reserve: FailureMode::Never,
            on_confirm: FailureMode::Never,
            on_cancel: FailureMode::Never,
        }
    }

    fn failing_reserve(mut self) -> Self {
        self.on_reserve = FailureMode::Fail;
        self
    }

    fn failing_confirm(mut self, mode: FailureMode) -> Self {
        self.on_confirm = mode;
        self
    }

    fn failing_cancel(mut self, mode: FailureMode) -> Self {
        self.on_cancel = mode;
        self
    }
}

impl TccHandler for Participant {
    fn name(&self) -> &str {
        self.name
    }

    fn try_reserve(&self, _: &StepParameter) -> Result<serde_json::Value, HandlerError> {
        self.journal.record(format!("reserve:{}", self.name));
        self.on_reserve.check("reserve", self.name)?;
        Ok(json!(self.name))
    }

    fn confirm(&self) -> Result<(), HandlerError> {
        self.journal.record(format!("confirm:{}", self.name));
        self.on_confirm.check("confirm", self.name)
    }

    fn cancel(&self) -> Result<(), HandlerError> {
        self.journal.record(format!("cancel:{}", self.name));
        self.on_cancel.check("cancel", self.name)
    }
}

struct TestHarness {
    coordinator: TccCoordinator<InMemoryStateStore, RecordingStrategy, RecordingStrategy>,
    store: InMemoryStateStore,
    confirm_strategy: RecordingStrategy,
    cancel_strategy: RecordingStrategy,
    journal: Journal,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryStateStore::new();
        let confirm_strategy = RecordingStrategy::new();
        let cancel_strategy = RecordingStrategy::new();
        let coordinator =
            TccCoordinator::new(store.clone(), confirm_strategy.clone(), cancel_strategy.clone());

        Self {
            coordinator,
            store,
            confirm_strategy,
            cancel_strategy,
            journal: Journal::default(),
        }
    }

    fn plain(&mut self, name: &'static str) {
        let journal = self.journal.clone();
        self.coordinator
            .add_plain(StepFn::new(name, move |parameter: &StepParameter| {
                journal.record(format!("act:{name}"));
                Ok(parameter.payload().clone())
            }));
    }

    fn failing_plain(&mut self, name: &'static str) {
        let journal = self.journal.clone();
        self.coordinator
            .add_plain(StepFn::new(name, move |_: &StepParameter| {
                journal.record(format!("act:{name}"));
                Err(HandlerError::failed(format!("{name} blew up")))
            }));
    }

    fn participant(&mut self, participant: Participant) {
        self.coordinator.add_tcc(participant);
    }
}

#[test]
fn test_plain_only_chain_returns_final_result() {
    let mut harness = TestHarness::new();
    let journal = harness.journal.clone();
    harness.coordinator.add_plain(StepFn::new("produce", {
        let journal = journal.clone();
        move |_: &StepParameter| {
            journal.record("act:produce");
            Ok(json!(10))
        }
    }));
    harness.coordinator.add_plain(StepFn::new("triple", {
        let journal = journal.clone();
        move |parameter: &StepParameter| {
            journal.record("act:triple");
            Ok(json!(parameter.payload().as_i64().unwrap_or(0) * 3))
        }
    }));

    let result = harness.coordinator.execute(StepParameter::empty()).unwrap();

    assert_eq!(result.payload(), &json!(30));
    assert_eq!(journal.entries(), vec!["act:produce", "act:triple"]);
    // No TCC participants, so the confirm phase is a no-op.
    assert!(journal.entries_with_prefix("confirm:").is_empty());
    assert!(journal.entries_with_prefix("cancel:").is_empty());

    let end = harness.store.snapshot_at(Checkpoint::End).unwrap();
    assert!(end.end);
    assert!(!end.rollback);
    assert!(end.tried.is_empty());
}

#[test]
fn test_tcc_chain_confirms_in_reservation_order() {
    let mut harness = TestHarness::new();
    let journal = harness.journal.clone();
    harness.participant(Participant::new("a", &journal));
    harness.participant(Participant::new("b", &journal));
    harness.participant(Participant::new("c", &journal));

    harness.coordinator.execute(StepParameter::empty()).unwrap();

    assert_eq!(
        journal.entries(),
        vec![
            "reserve:a",
            "reserve:b",
            "reserve:c",
            "confirm:a",
            "confirm:b",
            "confirm:c",
        ]
    );

    let end = harness.store.snapshot_at(Checkpoint::End).unwrap();
    assert!(end.end);
    assert!(!end.rollback);
    assert_eq!(end.status, Some(TccStatus::ConfirmSuccess));
    assert_eq!(harness.confirm_strategy.retry_count(), 0);
    assert_eq!(harness.cancel_strategy.retry_count(), 0);
}

#[test]
fn test_mixed_chain_tracks_only_tcc_units() {
    let mut harness = TestHarness::new();
    let journal = harness.journal.clone();
    harness.participant(Participant::new("a", &journal));
    harness.plain("b");
    harness.participant(Participant::new("c", &journal));

    harness.coordinator.execute(StepParameter::empty()).unwrap();

    // Tried list holds the two TCC units, in execution order.
    let update = harness.store.snapshot_at(Checkpoint::Update).unwrap();
    assert_eq!(update.tried, vec![0, 2]);

    assert_eq!(
        journal.entries_with_prefix("confirm:"),
        vec!["confirm:a", "confirm:c"]
    );
    assert!(journal.entries_with_prefix("cancel:").is_empty());
}

#[test]
fn test_reservation_failure_cancels_in_reverse_order() {
    let mut harness = TestHarness::new();
    let journal = harness.journal.clone();
    harness.participant(Participant::new("a", &journal));
    harness.participant(Participant::new("b", &journal));
    harness.participant(Participant::new("c", &journal).failing_reserve());

    let err = harness
        .coordinator
        .execute(StepParameter::empty())
        .unwrap_err();

    assert_eq!(err.node_name(), Some("c"));
    // c entered its reservation step, so it is cancelled too, first.
    assert_eq!(
        journal.entries(),
        vec![
            "reserve:a",
            "reserve:b",
            "reserve:c",
            "cancel:c",
            "cancel:b",
            "cancel:a",
        ]
    );

    let update = harness.store.snapshot_at(Checkpoint::Update).unwrap();
    assert!(update.rollback);
    assert!(!update.end);
    assert_eq!(update.tried, vec![0, 1, 2]);

    let end = harness.store.snapshot_at(Checkpoint::End).unwrap();
    assert_eq!(end.status, Some(TccStatus::CancelSuccess));
}

#[test]
fn test_plain_failure_rolls_back_reserved_units() {
    let mut harness = TestHarness::new();
    let journal = harness.journal.clone();
    harness.participant(Participant::new("reserve_stock", &journal));
    harness.failing_plain("audit");
    harness.participant(Participant::new("charge_card", &journal));

    let err = harness
        .coordinator
        .execute(StepParameter::empty())
        .unwrap_err();

    assert_eq!(err.node_name(), Some("audit"));
    // charge_card never ran; reserve_stock is cancelled.
    assert_eq!(
        journal.entries(),
        vec!["reserve:reserve_stock", "act:audit", "cancel:reserve_stock"]
    );
}

#[test]
fn test_empty_chain_passes_input_through() {
    let harness = TestHarness::new();
    let parameter = StepParameter::new(json!({"untouched": true}));

    let result = harness.coordinator.execute(parameter).unwrap();

    assert_eq!(result.payload(), &json!({"untouched": true}));
    assert_eq!(harness.store.record_count(), 0);
    assert_eq!(harness.confirm_strategy.retry_count(), 0);
    assert_eq!(harness.cancel_strategy.retry_count(), 0);
}

#[test]
fn test_confirm_failure_stops_and_delegates_once() {
    let mut harness = TestHarness::new();
    let journal = harness.journal.clone();
    harness.participant(Participant::new("a", &journal).failing_confirm(FailureMode::Fail));
    harness.participant(Participant::new("b", &journal));
    harness.participant(Participant::new("c", &journal));

    // The reservation failure is what surfaces to the caller; a confirm
    // failure is the strategy's to handle, so execute still succeeds.
    harness.coordinator.execute(StepParameter::empty()).unwrap();

    assert_eq!(
        journal.entries_with_prefix("confirm:"),
        vec!["confirm:a"],
        "confirm stops at the first failure"
    );

    assert_eq!(harness.confirm_strategy.retry_count(), 1);
    let state = harness.confirm_strategy.last_state().unwrap();
    assert_eq!(state.status, Some(TccStatus::ConfirmFailed));
    assert_eq!(state.tried, vec![0, 1, 2]);

    let end = harness.store.snapshot_at(Checkpoint::End).unwrap();
    assert_eq!(end.status, Some(TccStatus::ConfirmFailed));
}

#[test]
fn test_confirm_timeout_is_classified() {
    let mut harness = TestHarness::new();
    let journal = harness.journal.clone();
    harness.participant(Participant::new("slow", &journal).failing_confirm(FailureMode::Timeout));

    harness.coordinator.execute(StepParameter::empty()).unwrap();

    assert_eq!(harness.confirm_strategy.retry_count(), 1);
    assert_eq!(
        harness.confirm_strategy.last_state().unwrap().status,
        Some(TccStatus::ConfirmTimeout)
    );
}

#[test]
fn test_cancel_failure_stops_and_delegates_once() {
    let mut harness = TestHarness::new();
    let journal = harness.journal.clone();
    harness.participant(Participant::new("a", &journal));
    harness.participant(Participant::new("b", &journal).failing_cancel(FailureMode::Fail));
    harness.participant(Participant::new("trigger", &journal).failing_reserve());

    let err = harness
        .coordinator
        .execute(StepParameter::empty())
        .unwrap_err();
    assert_eq!(err.node_name(), Some("trigger"));

    // Cancellation runs in reverse and stops at b's failure, so a is
    // never cancelled; the strategy takes over from there.
    assert_eq!(
        journal.entries_with_prefix("cancel:"),
        vec!["cancel:trigger", "cancel:b"]
    );
    assert_eq!(harness.cancel_strategy.retry_count(), 1);

    let state = harness.cancel_strategy.last_state().unwrap();
    assert_eq!(state.status, Some(TccStatus::CancelFailed));
    assert_eq!(state.tried, vec![0, 1, 2]);
    assert_eq!(state.failure.as_deref(), Some(err.to_string().as_str()));
}

#[test]
fn test_failed_reservation_is_still_cancelled() {
    let mut harness = TestHarness::new();
    let journal = harness.journal.clone();
    harness.participant(Participant::new("solo", &journal).failing_reserve());

    harness
        .coordinator
        .execute(StepParameter::empty())
        .unwrap_err();

    // The unit entered its reservation step, so it is tracked and its
    // (idempotent) cancel releases whatever partially applied.
    let update = harness.store.snapshot_at(Checkpoint::Update).unwrap();
    assert_eq!(update.tried, vec![0]);
    assert_eq!(journal.entries(), vec!["reserve:solo", "cancel:solo"]);
}

#[test]
fn test_cancel_timeout_is_classified() {
    let mut harness = TestHarness::new();
    let journal = harness.journal.clone();
    harness.participant(Participant::new("a", &journal).failing_cancel(FailureMode::Timeout));
    harness.participant(Participant::new("trigger", &journal).failing_reserve());

    harness
        .coordinator
        .execute(StepParameter::empty())
        .unwrap_err();

    assert_eq!(harness.cancel_strategy.retry_count(), 1);
    assert_eq!(
        harness.cancel_strategy.last_state().unwrap().status,
        Some(TccStatus::CancelTimeout)
    );
}

#[test]
fn test_checkpoints_are_recorded_in_order() {
    let mut harness = TestHarness::new();
    let journal = harness.journal.clone();
    harness.participant(Participant::new("a", &journal));

    harness.coordinator.execute(StepParameter::empty()).unwrap();

    assert_eq!(
        harness.store.checkpoints(),
        vec![Checkpoint::Begin, Checkpoint::Update, Checkpoint::End]
    );
}

#[test]
fn test_rollback_and_end_are_never_both_set() {
    let mut failing = TestHarness::new();
    let journal = failing.journal.clone();
    failing.participant(Participant::new("a", &journal));
    failing.participant(Participant::new("b", &journal).failing_reserve());
    failing
        .coordinator
        .execute(StepParameter::empty())
        .unwrap_err();

    let mut succeeding = TestHarness::new();
    let journal = succeeding.journal.clone();
    succeeding.participant(Participant::new("a", &journal));
    succeeding
        .coordinator
        .execute(StepParameter::empty())
        .unwrap();

    for harness in [&failing, &succeeding] {
        for checkpoint in harness.store.checkpoints() {
            let snapshot = harness.store.snapshot_at(checkpoint).unwrap();
            assert!(
                !(snapshot.rollback && snapshot.end),
                "rollback and end are mutually exclusive"
            );
        }
    }
}

#[test]
fn test_context_is_shared_across_the_chain() {
    let mut harness = TestHarness::new();
    harness
        .coordinator
        .add_plain(StepFn::new("writer", |parameter: &StepParameter| {
            parameter.context().set("order_id", "ORD-7");
            Ok(json!(null))
        }));
    harness
        .coordinator
        .add_plain(StepFn::new("reader", |parameter: &StepParameter| {
            Ok(parameter
                .context()
                .get("order_id")
                .unwrap_or(serde_json::Value::Null))
        }));

    let result = harness.coordinator.execute(StepParameter::empty()).unwrap();
    assert_eq!(result.payload(), &json!("ORD-7"));
}

#[test]
fn test_transaction_id_is_published_into_context() {
    let mut harness = TestHarness::new();
    harness
        .coordinator
        .add_plain(StepFn::new("inspect", |parameter: &StepParameter| {
            Ok(parameter
                .context()
                .get(TRANSACTION_ID_KEY)
                .unwrap_or(serde_json::Value::Null))
        }));

    let result = harness.coordinator.execute(StepParameter::empty()).unwrap();

    let published = result.payload().as_str().unwrap();
    let begin = harness.store.snapshot_at(Checkpoint::Begin).unwrap();
    assert_eq!(published, begin.transaction_id.to_string());
}

#[test]
fn test_failure_carries_parameter_at_time_of_failure() {
    let mut harness = TestHarness::new();
    let journal = harness.journal.clone();
    harness
        .coordinator
        .add_plain(StepFn::new("produce", |_: &StepParameter| Ok(json!(99))));
    harness.participant(Participant::new("reject", &journal).failing_reserve());

    let err = harness
        .coordinator
        .execute(StepParameter::empty())
        .unwrap_err();

    match &err {
        TccError::NodeExecution { parameter, .. } => {
            assert_eq!(parameter.payload(), &json!(99));
        }
        other => panic!("expected node failure, got {other:?}"),
    }
}

fn counters(snapshotter: &Snapshotter) -> HashMap<String, u64> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter_map(|(key, _, _, value)| match value {
            DebugValue::Counter(count) => Some((key.key().name().to_string(), count)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_successful_transaction_counts_as_completed() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let mut harness = TestHarness::new();
    let journal = harness.journal.clone();
    harness.participant(Participant::new("a", &journal));

    metrics::with_local_recorder(&recorder, || {
        harness.coordinator.execute(StepParameter::empty()).unwrap();
    });

    let counters = counters(&snapshotter);
    assert_eq!(counters.get("tcc_executions_total"), Some(&1));
    assert_eq!(counters.get("tcc_completed"), Some(&1));
    assert!(!counters.contains_key("tcc_confirm_delegated"));
    assert!(!counters.contains_key("tcc_rolled_back"));
}

#[test]
fn test_delegated_confirm_is_not_counted_as_completed() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let mut harness = TestHarness::new();
    let journal = harness.journal.clone();
    harness.participant(Participant::new("a", &journal).failing_confirm(FailureMode::Fail));

    metrics::with_local_recorder(&recorder, || {
        harness.coordinator.execute(StepParameter::empty()).unwrap();
    });

    let counters = counters(&snapshotter);
    assert_eq!(counters.get("tcc_executions_total"), Some(&1));
    assert_eq!(counters.get("tcc_confirm_delegated"), Some(&1));
    assert!(!counters.contains_key("tcc_completed"));
}
