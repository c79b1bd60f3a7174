//! Integration tests driving [`reactive_model::ModelCoordinator`] end to end
//! through its public API only (no internal module access).

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use reactive_model::events::event_name;
use reactive_model::schema::{FieldSchema, Reaction, Schema, Value, ValueKind};
use reactive_model::{ModelCoordinator, ModelOptions};

fn run<F: std::future::Future>(fut: F) -> F::Output {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, fut)
}

fn number(n: f64) -> Value {
    Value::Number(n)
}

#[test]
fn only_the_latest_in_flight_validation_commits() {
    run(async {
        // Only the candidate value "first" incurs a delay, so a concurrent
        // call for "second" is guaranteed to land while "first" is still
        // mid-validation.
        let validator = reactive_model::Validator::new_async("slow_check", "rejected", |value| async move {
            if value.as_str() == Some("first") {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(true)
        });
        let schema = Schema::builder()
            .field("code", FieldSchema::new(ValueKind::String).validator(validator))
            .build()
            .unwrap();
        let model = ModelCoordinator::new(schema, ModelOptions::default());

        let model_for_slow_call = Rc::clone(&model);
        let slow_call = tokio::task::spawn_local(async move { model_for_slow_call.set_field("code", Value::String("first".into())).await });
        tokio::task::yield_now().await;

        let fast_result = model.set_field("code", Value::String("second".into())).await;
        let slow_result = slow_call.await.unwrap();

        assert!(fast_result);
        assert!(!slow_result, "stale commit must be discarded, not silently accepted");
        assert_eq!(model.get_field("code"), Some(Value::String("second".into())));
    });
}

#[test]
fn reaction_shared_by_two_changed_fields_runs_once_per_batch() {
    run(async {
        let calls = Rc::new(Cell::new(0u32));
        let calls_in_reaction = Rc::clone(&calls);
        let sum = Reaction::new(vec!["a".into(), "b".into()], move |deps| {
            calls_in_reaction.set(calls_in_reaction.get() + 1);
            let a = deps.get("a").and_then(|v| v.clone()).and_then(|v| v.as_f64()).unwrap_or(0.0);
            let b = deps.get("b").and_then(|v| v.clone()).and_then(|v| v.as_f64()).unwrap_or(0.0);
            Value::Number(a + b)
        });
        let schema = Schema::builder()
            .field("a", FieldSchema::new(ValueKind::Number).default_value(number(0.0)))
            .field("b", FieldSchema::new(ValueKind::Number).default_value(number(0.0)))
            .field("sum", FieldSchema::new(ValueKind::Number).reaction(sum))
            .build()
            .unwrap();
        let model = ModelCoordinator::new(schema, ModelOptions::default());

        model.set_fields(vec![("a".to_string(), number(2.0)), ("b".to_string(), number(3.0))]).await;
        model.settled().await;

        assert_eq!(calls.get(), 1);
        assert_eq!(model.get_field("sum"), Some(number(5.0)));
    });
}

#[test]
fn a_chain_of_reactions_propagates_to_the_end() {
    run(async {
        let doubled = Reaction::new(vec!["base".into()], |deps| {
            let base = deps.get("base").and_then(|v| v.clone()).and_then(|v| v.as_f64()).unwrap_or(0.0);
            Value::Number(base * 2.0)
        });
        let plus_one = Reaction::new(vec!["doubled".into()], |deps| {
            let doubled = deps.get("doubled").and_then(|v| v.clone()).and_then(|v| v.as_f64()).unwrap_or(0.0);
            Value::Number(doubled + 1.0)
        });
        let schema = Schema::builder()
            .field("base", FieldSchema::new(ValueKind::Number).default_value(number(0.0)))
            .field("doubled", FieldSchema::new(ValueKind::Number).reaction(doubled))
            .field("final_value", FieldSchema::new(ValueKind::Number).reaction(plus_one))
            .build()
            .unwrap();
        let model = ModelCoordinator::new(schema, ModelOptions::default());

        model.set_field("base", number(4.0)).await;
        model.settled().await;

        assert_eq!(model.get_field("doubled"), Some(number(8.0)));
        assert_eq!(model.get_field("final_value"), Some(number(9.0)));
    });
}

#[test]
fn rapid_fire_updates_collapse_into_one_debounced_reaction_run() {
    run(async {
        let calls = Rc::new(Cell::new(0u32));
        let calls_in_reaction = Rc::clone(&calls);
        let echo = Reaction::new(vec!["query".into()], move |deps| {
            calls_in_reaction.set(calls_in_reaction.get() + 1);
            deps.get("query").and_then(|v| v.clone()).unwrap_or(Value::String(String::new()))
        });
        let schema = Schema::builder()
            .field("query", FieldSchema::new(ValueKind::String).default_value(Value::String(String::new())))
            .field("search_results", FieldSchema::new(ValueKind::String).reaction(echo))
            .build()
            .unwrap();
        let mut options = ModelOptions::default();
        options.reaction_debounce_ms = 30;
        let model = ModelCoordinator::new(schema, options);

        for keystroke in ["r", "ru", "rus", "rust"] {
            model.set_field("query", Value::String(keystroke.to_string())).await;
        }
        assert_eq!(model.get_field("search_results"), None, "reaction must not have fired yet");

        model.settled().await;
        assert_eq!(calls.get(), 1, "debounce must collapse all keystrokes into a single reaction run");
        assert_eq!(model.get_field("search_results"), Some(Value::String("rust".into())));
    });
}

#[test]
fn mutual_dependency_is_reported_once_and_does_not_hang() {
    run(async {
        let error_count = Rc::new(Cell::new(0u32));
        let error_count_cb = Rc::clone(&error_count);
        let x_from_y = Reaction::new(vec!["y".into()], |deps| {
            let y = deps.get("y").and_then(|v| v.clone()).and_then(|v| v.as_f64()).unwrap_or(0.0);
            Value::Number(y + 1.0)
        });
        let y_from_x = Reaction::new(vec!["x".into()], |deps| {
            let x = deps.get("x").and_then(|v| v.clone()).and_then(|v| v.as_f64()).unwrap_or(0.0);
            Value::Number(x + 1.0)
        });
        let schema = Schema::builder()
            .field("x", FieldSchema::new(ValueKind::Number).default_value(number(0.0)).reaction(x_from_y))
            .field("y", FieldSchema::new(ValueKind::Number).default_value(number(0.0)).reaction(y_from_x))
            .build()
            .unwrap();
        let model = ModelCoordinator::new(schema, ModelOptions::default());
        model.on(event_name::REACTION_ERROR, move |_| error_count_cb.set(error_count_cb.get() + 1));

        model.set_field("x", number(5.0)).await;
        model.settled().await;

        assert_eq!(error_count.get(), 1, "exactly one circular-dependency record, not an infinite cascade");
    });
}

#[test]
fn async_validator_timeout_is_recorded_as_a_validation_error() {
    run(async {
        let validator = reactive_model::Validator::new_async("remote_check", "check failed", |_| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(true)
        });
        let schema = Schema::builder()
            .field("username", FieldSchema::new(ValueKind::String).validator(validator))
            .build()
            .unwrap();
        let mut options = ModelOptions::default();
        options.async_validation_timeout_ms = 5;
        let model = ModelCoordinator::new(schema, options);

        let ok = model.set_field("username", Value::String("alice".into())).await;

        assert!(!ok);
        let summary = model.get_validation_errors();
        let errors = summary.errors.get("username").expect("username errors recorded");
        assert!(errors[0].message.to_lowercase().contains("timeout"));
        assert!(model.get_validation_summary().to_lowercase().contains("timeout"));
    });
}
