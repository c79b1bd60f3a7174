//! The model coordinator (component E): the public facade that owns
//! committed data, dirty tracking, per-field error state, and wires the
//! event bus, error classifier, validation pipeline, and reaction graph
//! together behind `set_field`/`set_fields`/`validate_all`.
//!
//! Instrumentation (`tracing` spans around `set_field`/`validate_all`/each
//! reaction dispatch) is grounded in `effect_system.rs`'s
//! `trace_command_effect` span-per-effectful-call convention, folded in here
//! rather than kept as a standalone module since this crate has exactly one
//! place effectful calls originate from.
//!
//! `ModelCoordinator` is always held behind an `Rc` (see [`ModelCoordinator::new`]);
//! a weak self-handle lets any `&self` method hand out a fresh `Rc<dyn ReactionHost>`
//! to the reaction graph without changing every method's receiver type to `Rc<Self>`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use futures::future::LocalBoxFuture;
use indexmap::IndexMap;

use crate::config::ModelOptions;
use crate::error::{ErrorClassifier, ErrorKind, ErrorRecord};
use crate::events::{event_name, EventBus, EventPayload, SubId};
use crate::reaction::{ReactionGraph, ReactionHost};
use crate::schema::{DataSnapshot, FieldSchema, Schema, Value, ValueKind};
use crate::validation::{self, PipelineConfig};

/// A per-kind "nothing here yet" sentinel for `validate_all`, used only when
/// a field has neither a dirty candidate, a schema default, nor a committed
/// value. Chosen so that an unset field reads as *empty*, not as some
/// arbitrarily "valid" value of the right type (an empty string fails
/// `required`, `NAN` fails `number`, an empty array/object fails a
/// non-empty-collection rule).
fn absent_value(kind: ValueKind) -> Value {
    match kind {
        ValueKind::String | ValueKind::Enum => Value::String(String::new()),
        ValueKind::Number => Value::Number(f64::NAN),
        ValueKind::Boolean => Value::Boolean(false),
        ValueKind::Object => Value::Object(serde_json::Map::new()),
        ValueKind::Array => Value::Array(Vec::new()),
        ValueKind::Date => Value::Date(chrono::DateTime::from_timestamp(0, 0).expect("unix epoch is representable")),
    }
}

/// Snapshot of the model's current error state, returned by
/// [`ModelCoordinator::get_validation_errors`] (spec §6 `validation-errors`).
#[derive(Debug, Clone, Default)]
pub struct ValidationSummary {
    pub is_valid: bool,
    pub errors: IndexMap<String, Vec<ErrorRecord>>,
}

/// Synthetic field key under which reaction/dependency/circular errors are
/// filed — they are not associated with the field the user set, but with the
/// reaction graph as a whole.
const REACTION_ERRORS_KEY: &str = "__reactions";

enum CommitOutcome {
    FieldNotFound,
    /// A newer `set_field` call for the same field committed first (spec §9
    /// request-ticket race discipline); this call's result is discarded.
    Stale,
    Invalid,
    NoOp,
    Committed(Value),
}

pub struct ModelCoordinator {
    schema: Schema,
    data: RefCell<DataSnapshot>,
    dirty: RefCell<DataSnapshot>,
    errors: RefCell<IndexMap<String, Vec<ErrorRecord>>>,
    request_ids: RefCell<IndexMap<String, u64>>,
    pipeline_config: PipelineConfig,
    error_formatter: Option<Rc<dyn Fn(&ErrorRecord) -> String>>,
    events: EventBus,
    classifier: ErrorClassifier,
    graph: Rc<ReactionGraph>,
    self_weak: RefCell<Weak<ModelCoordinator>>,
}

impl ModelCoordinator {
    pub fn new(schema: Schema, options: ModelOptions) -> Rc<Self> {
        let mut data = DataSnapshot::new();
        for (name, field) in schema.iter() {
            if let Some(default) = &field.default {
                data.insert(name.to_string(), default.clone());
            }
        }
        let graph = ReactionGraph::build(&schema, options.reaction_debounce());
        let error_formatter = options.error_formatter.clone();
        let coordinator = Rc::new(Self {
            schema,
            data: RefCell::new(data),
            dirty: RefCell::new(DataSnapshot::new()),
            errors: RefCell::new(IndexMap::new()),
            request_ids: RefCell::new(IndexMap::new()),
            pipeline_config: options.pipeline_config(),
            error_formatter,
            events: EventBus::new(),
            classifier: ErrorClassifier::new(),
            graph,
            self_weak: RefCell::new(Weak::new()),
        });
        *coordinator.self_weak.borrow_mut() = Rc::downgrade(&coordinator);
        coordinator.wire_error_forwarders();
        coordinator
    }

    fn self_rc(&self) -> Rc<Self> {
        self.self_weak
            .borrow()
            .upgrade()
            .expect("ModelCoordinator is always held behind an Rc from construction onward")
    }

    /// The four classifier → event-bus forwarders (spec §4.B/§4.E): each
    /// error kind is filed into `errors` and, where the event taxonomy names
    /// one, re-emitted on the bus.
    fn wire_error_forwarders(self: &Rc<Self>) {
        let this = Rc::clone(self);
        self.classifier.on_error(ErrorKind::Validation, move |record| {
            this.file_error(record.clone());
            this.events.emit(event_name::VALIDATION_ERROR, &EventPayload::ValidationError(record.clone()));
        });

        let this = Rc::clone(self);
        self.classifier.on_error(ErrorKind::Reaction, move |record| {
            this.file_error(record.clone());
            this.events.emit(event_name::REACTION_ERROR, &EventPayload::ReactionError(record.clone()));
        });

        let this = Rc::clone(self);
        self.classifier.on_error(ErrorKind::FieldNotFound, move |record| {
            this.file_error(record.clone());
            this.events.emit(event_name::FIELD_NOT_FOUND, &EventPayload::FieldNotFound(record.clone()));
        });

        // Catch-all: dependency-missing and circular-dependency errors have
        // no dedicated ErrorKind handler above, so they fall through here.
        // Validation/Reaction/FieldNotFound records also reach this handler
        // (the classifier always dispatches the catch-all too) but are
        // already filed and emitted by their specific handlers, so this one
        // ignores them.
        let this = Rc::clone(self);
        self.classifier.on_error(ErrorKind::Unknown, move |record| {
            if matches!(record.kind, ErrorKind::DependencyError | ErrorKind::CircularDependency) {
                this.file_error(record.clone());
                this.events.emit(event_name::REACTION_ERROR, &EventPayload::ReactionError(record.clone()));
            }
        });
    }

    fn file_error(&self, record: ErrorRecord) {
        let key = record.field.clone().unwrap_or_else(|| REACTION_ERRORS_KEY.to_string());
        self.errors.borrow_mut().entry(key).or_default().push(record);
    }

    fn clear_field_errors(&self, field: &str) {
        self.errors.borrow_mut().shift_remove(field);
    }

    /// Apply a fully-validated candidate's data/dirty/error bookkeeping
    /// (spec §4.E `setField`/`validateAll` commit step, shared by both).
    ///
    /// On success: remove `dirty[field]`, replace `errors[field]` (i.e.
    /// clear it), and commit+emit only if the candidate actually differs
    /// from the current value. On failure: replace `errors[field]` with the
    /// freshly-collected list (not append — a stale error list must not
    /// outlive the commit call that produced it) and set `dirty[field]` to
    /// the rejected candidate (spec §3: a field is in `dirty` iff its last
    /// set attempt failed validation).
    fn apply_commit(&self, field: &str, candidate: Value, field_schema: &FieldSchema, valid: bool, errors: Vec<ErrorRecord>) -> CommitOutcome {
        if !valid {
            self.dirty.borrow_mut().insert(field.to_string(), candidate);
            self.errors.borrow_mut().insert(field.to_string(), errors);
            return CommitOutcome::Invalid;
        }

        self.dirty.borrow_mut().shift_remove(field);
        self.clear_field_errors(field);

        let transformed = match &field_schema.transform {
            Some(transform) => transform(&candidate),
            None => candidate,
        };

        if self.data.borrow().get(field) == Some(&transformed) {
            return CommitOutcome::NoOp;
        }

        self.data.borrow_mut().insert(field.to_string(), transformed.clone());
        self.events.emit(
            event_name::FIELD_CHANGE,
            &EventPayload::FieldChange {
                field: field.to_string(),
                value: transformed.clone(),
            },
        );

        CommitOutcome::Committed(transformed)
    }

    async fn commit(self: &Rc<Self>, field: &str, value: Value) -> CommitOutcome {
        if !self.schema.contains(field) {
            self.classifier.trigger_error(ErrorRecord::field_not_found(field));
            return CommitOutcome::FieldNotFound;
        }

        let ticket = {
            let mut ids = self.request_ids.borrow_mut();
            let next = ids.get(field).copied().unwrap_or(0) + 1;
            ids.insert(field.to_string(), next);
            next
        };

        let snapshot = self.data.borrow().clone();
        let field_schema = self.schema.field(field).expect("checked above");
        let mut errors = Vec::new();
        let valid = validation::validate_field(field_schema, &value, field, &snapshot, &self.pipeline_config, &self.classifier, &mut errors).await;

        let still_current = self.request_ids.borrow().get(field).copied() == Some(ticket);
        if !still_current {
            return CommitOutcome::Stale;
        }

        self.events.emit(event_name::VALIDATION_COMPLETE, &EventPayload::ValidationComplete { is_valid: valid });

        self.apply_commit(field, value, field_schema, valid, errors)
    }

    /// Set a single field's value (spec §4.E `setField`). Returns `true`
    /// when the candidate value passed validation (whether or not it
    /// actually changed anything), `false` otherwise.
    #[tracing::instrument(level = "debug", skip(self, value), fields(field = field))]
    pub async fn set_field(self: &Rc<Self>, field: &str, value: Value) -> bool {
        self.set_field_with_stack(field, value, Vec::new()).await
    }

    async fn set_field_with_stack(self: &Rc<Self>, field: &str, value: Value, stack: Vec<String>) -> bool {
        match self.commit(field, value).await {
            CommitOutcome::FieldNotFound | CommitOutcome::Stale | CommitOutcome::Invalid => false,
            CommitOutcome::NoOp => true,
            CommitOutcome::Committed(_) => {
                self.graph.trigger(field, stack, self.as_host());
                true
            }
        }
    }

    /// Set several fields at once (spec §4.E `setFields`): every field is
    /// validated and committed independently, but reactions dependent on
    /// more than one changed field fire at most once (batch de-duplication
    /// lives in [`ReactionGraph::batch_trigger`]).
    #[tracing::instrument(level = "debug", skip(self, entries))]
    pub async fn set_fields(self: &Rc<Self>, entries: Vec<(String, Value)>) -> IndexMap<String, bool> {
        let mut results = IndexMap::new();
        let mut changed = Vec::new();
        for (field, value) in entries {
            let outcome = self.commit(&field, value).await;
            let ok = !matches!(outcome, CommitOutcome::FieldNotFound | CommitOutcome::Stale | CommitOutcome::Invalid);
            if let CommitOutcome::Committed(_) = outcome {
                changed.push(field.clone());
            }
            results.insert(field, ok);
        }
        if !changed.is_empty() {
            self.graph.batch_trigger(&changed, self.as_host());
        }
        results
    }

    pub fn get_field(&self, field: &str) -> Option<Value> {
        self.data.borrow().get(field).cloned()
    }

    /// Fields committed since the last [`ModelCoordinator::clear_dirty_data`] call.
    pub fn get_dirty_data(&self) -> DataSnapshot {
        self.dirty.borrow().clone()
    }

    pub fn clear_dirty_data(&self) {
        self.dirty.borrow_mut().clear();
    }

    /// Re-validate every declared field (spec §4.E `validateAll`): the
    /// candidate is `dirty[f]` when present (a retry of a previously-rejected
    /// value), else the currently committed `data[f]`. A candidate that now
    /// passes is committed — `dirty[f]` is cleared, `field:change` is
    /// emitted if it actually changed the value, and dependent reactions are
    /// triggered (batched, as in `set_fields`). A candidate that still fails
    /// stays in `dirty[f]`. `fail_fast` still governs each field's own
    /// validator list; the walk over fields themselves never short-circuits
    /// (open question #3, recorded in DESIGN.md).
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn validate_all(self: &Rc<Self>) -> bool {
        let data_snapshot = self.data.borrow().clone();
        let dirty_snapshot = self.dirty.borrow().clone();
        let mut overall_valid = true;
        let mut changed = Vec::new();

        for field in self.schema.field_names().map(str::to_string).collect::<Vec<_>>() {
            let field_schema = self.schema.field(&field).expect("declared field");
            let candidate = dirty_snapshot
                .get(&field)
                .cloned()
                .or_else(|| data_snapshot.get(&field).cloned())
                .unwrap_or_else(|| absent_value(field_schema.kind));

            let mut errors = Vec::new();
            let valid =
                validation::validate_field(field_schema, &candidate, &field, &data_snapshot, &self.pipeline_config, &self.classifier, &mut errors).await;
            if !valid {
                overall_valid = false;
            }

            if let CommitOutcome::Committed(_) = self.apply_commit(&field, candidate, field_schema, valid, errors) {
                changed.push(field);
            }
        }

        if !changed.is_empty() {
            self.graph.batch_trigger(&changed, self.as_host());
        }

        self.events.emit(event_name::VALIDATION_COMPLETE, &EventPayload::ValidationComplete { is_valid: overall_valid });
        overall_valid
    }

    /// Snapshot of the model's current per-field error state (spec §6
    /// `validation-errors`: "snapshot of errors").
    pub fn get_validation_errors(&self) -> ValidationSummary {
        let errors = self.errors.borrow().clone();
        ValidationSummary {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    /// The user-facing validation message (spec §6 `validation-summary`):
    /// `"Validation passed"` when every error list is empty, otherwise each
    /// error rendered (via the configured `error_formatter`, or
    /// [`ErrorRecord`]'s own `Display` impl — `"<field>: <message>"`, or
    /// just `"<message>"` for the synthetic `__reactions` bucket) and
    /// joined with `"; "`.
    pub fn get_validation_summary(&self) -> String {
        let errors = self.errors.borrow();
        if errors.is_empty() {
            return "Validation passed".to_string();
        }
        errors
            .values()
            .flatten()
            .map(|record| match &self.error_formatter {
                Some(formatter) => formatter(record),
                None => record.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn on(&self, event: &str, cb: impl Fn(&EventPayload) + 'static) -> SubId {
        self.events.on(event, cb)
    }

    pub fn off(&self, event: &str, id: Option<SubId>) {
        self.events.off(event, id);
    }

    /// Resolves once no debounce timer or in-flight reaction remains
    /// (spec §4.D/§4.E settle barrier).
    pub async fn settled(&self) {
        self.graph.settled().await;
    }

    /// Tear down: cancel every pending reaction timer, abort in-flight
    /// reaction tasks, and drop every event/error subscriber.
    pub fn dispose(&self) {
        self.graph.dispose();
        self.events.clear();
        self.classifier.clear();
    }

    fn as_host(self: &Rc<Self>) -> Rc<dyn ReactionHost> {
        Rc::clone(self) as Rc<dyn ReactionHost>
    }
}

impl ReactionHost for ModelCoordinator {
    fn get_value(&self, field: &str) -> Option<Value> {
        self.get_field(field)
    }

    fn record_reaction_error(&self, error: ErrorRecord) {
        self.classifier.trigger_error(error);
    }

    fn set_from_reaction(&self, field: String, value: Value, stack: Vec<String>) -> LocalBoxFuture<'static, bool> {
        let me = self.self_rc();
        Box::pin(async move { me.set_field_with_stack(&field, value, stack).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSchema, Reaction, ValueKind};
    use std::cell::Cell;
    use std::time::Duration;

    fn string(s: &str) -> Value {
        Value::String(s.to_string())
    }

    fn build_schema() -> Schema {
        let double = Reaction::new(vec!["base".into()], |deps| {
            let base = deps.get("base").and_then(|v| v.clone()).and_then(|v| v.as_f64()).unwrap_or(0.0);
            Value::Number(base * 2.0)
        });
        Schema::builder()
            .field("name", FieldSchema::new(ValueKind::String).validator(crate::rules::required()))
            .field("base", FieldSchema::new(ValueKind::Number).default_value(Value::Number(0.0)))
            .field("doubled", FieldSchema::new(ValueKind::Number).reaction(double))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn invalid_value_is_rejected_and_does_not_commit() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let model = ModelCoordinator::new(build_schema(), ModelOptions::default());
                let ok = model.set_field("name", string("")).await;
                assert!(!ok);
                assert_eq!(model.get_field("name"), None);
                assert_eq!(model.get_dirty_data().get("name"), Some(&string("")), "rejected candidate must land in dirty");
                let errors = model.get_validation_errors();
                assert!(!errors.is_valid);
                assert_ne!(model.get_validation_summary(), "Validation passed");
            })
            .await;
    }

    #[tokio::test]
    async fn valid_value_commits_leaves_no_dirty_entry_and_triggers_reaction() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let model = ModelCoordinator::new(build_schema(), ModelOptions::default());
                let ok = model.set_field("base", Value::Number(5.0)).await;
                assert!(ok);
                model.settled().await;
                assert_eq!(model.get_field("doubled"), Some(Value::Number(10.0)));
                assert!(model.get_dirty_data().is_empty(), "a successful commit must not leave a residual dirty entry");
            })
            .await;
    }

    #[tokio::test]
    async fn repeated_rejection_replaces_rather_than_accumulates_errors() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let model = ModelCoordinator::new(build_schema(), ModelOptions::default());
                assert!(!model.set_field("name", string("")).await);
                assert_eq!(model.get_validation_errors().errors.get("name").map(Vec::len), Some(1));
                assert!(!model.set_field("name", string("")).await);
                assert_eq!(
                    model.get_validation_errors().errors.get("name").map(Vec::len),
                    Some(1),
                    "a field's error list must be replaced on each commit, not grown forever"
                );
            })
            .await;
    }

    #[tokio::test]
    async fn validate_all_retries_a_dirty_candidate_and_commits_on_success() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                // `name`'s `required` rule is gated on `gate`, so flipping
                // `gate` to false turns the same rejected candidate valid on
                // the next validate_all pass without ever re-submitting it.
                let schema = Schema::builder()
                    .field("gate", FieldSchema::new(ValueKind::Boolean).default_value(Value::Boolean(true)))
                    .field(
                        "name",
                        FieldSchema::new(ValueKind::String).validator(
                            crate::rules::required().when(|data: &DataSnapshot| matches!(data.get("gate"), Some(Value::Boolean(true)))),
                        ),
                    )
                    .build()
                    .unwrap();
                let model = ModelCoordinator::new(schema, ModelOptions::default());

                assert!(!model.set_field("name", string("")).await);
                assert_eq!(model.get_dirty_data().get("name"), Some(&string("")));
                assert_eq!(model.get_validation_errors().errors.get("name").map(Vec::len), Some(1));

                assert!(model.set_field("gate", Value::Boolean(false)).await);

                let all_valid = model.validate_all().await;
                assert!(all_valid);
                assert_eq!(model.get_field("name"), Some(string("")));
                assert!(model.get_dirty_data().get("name").is_none());
                assert!(model.get_validation_errors().errors.get("name").is_none());
            })
            .await;
    }

    #[tokio::test]
    async fn validate_all_leaves_a_still_invalid_field_dirty() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let model = ModelCoordinator::new(build_schema(), ModelOptions::default());
                assert!(!model.set_field("name", string("")).await);

                let all_valid = model.validate_all().await;
                assert!(!all_valid);
                assert_eq!(model.get_dirty_data().get("name"), Some(&string("")));
            })
            .await;
    }

    #[tokio::test]
    async fn setting_equal_value_is_a_no_op() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let model = ModelCoordinator::new(build_schema(), ModelOptions::default());
                assert!(model.set_field("base", Value::Number(5.0)).await);
                model.clear_dirty_data();
                assert!(model.set_field("base", Value::Number(5.0)).await);
                assert!(model.get_dirty_data().is_empty(), "equal value must not re-mark dirty");
            })
            .await;
    }

    #[tokio::test]
    async fn unknown_field_emits_field_not_found() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let model = ModelCoordinator::new(build_schema(), ModelOptions::default());
                let seen = Rc::new(Cell::new(false));
                let seen2 = Rc::clone(&seen);
                model.on(event_name::FIELD_NOT_FOUND, move |_| seen2.set(true));
                let ok = model.set_field("nope", string("x")).await;
                assert!(!ok);
                assert!(seen.get());
            })
            .await;
    }

    #[tokio::test]
    async fn validation_summary_string_uses_default_then_custom_formatter() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let model = ModelCoordinator::new(build_schema(), ModelOptions::default());
                assert_eq!(model.get_validation_summary(), "Validation passed");

                assert!(!model.set_field("name", string("")).await);
                assert_eq!(model.get_validation_summary(), "name: This field is required");

                let mut opts = ModelOptions::default();
                opts.error_formatter = Some(Rc::new(|record: &ErrorRecord| format!("custom:{}", record.message)));
                let model = ModelCoordinator::new(build_schema(), opts);
                assert!(!model.set_field("name", string("")).await);
                assert_eq!(model.get_validation_summary(), "custom:This field is required");
            })
            .await;
    }

    #[tokio::test]
    async fn dispose_prevents_late_reactions_from_landing() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let mut opts = ModelOptions::default();
                opts.reaction_debounce_ms = 50;
                let model = ModelCoordinator::new(build_schema(), opts);
                model.set_field("base", Value::Number(1.0)).await;
                model.dispose();
                tokio::time::sleep(Duration::from_millis(80)).await;
                assert_eq!(model.get_field("doubled"), None);
            })
            .await;
    }
}
