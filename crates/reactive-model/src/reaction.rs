//! The reaction graph (component D): a static reverse-dependency index,
//! debounced/cycle-safe fan-out, and the settle barrier.
//!
//! Supersede-not-reject debounce is grounded in `cancellation.rs`'s
//! token/source split (a superseded timer simply never gets to run, the
//! same way a cancelled task there observes `is_cancelled()` and exits
//! quietly rather than erroring); here the Rust-native mechanism is
//! `JoinHandle::abort` on the previous pending timer for the same reaction
//! instance. The settle barrier's "await everything, yield a tick, recheck"
//! loop is the single-threaded-cooperative analogue of the same module's
//! `wait_timeout`-on-a-condvar pattern.
//!
//! This module assumes it runs inside a `tokio::task::LocalSet` on a single
//! `current_thread` runtime — the spec's single execution context — so the
//! `WorkTracker`'s check-then-await below never races: nothing else can run
//! between the check and the `notified().await` because there is no
//! concurrent thread and no intervening suspension point.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use indexmap::IndexMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::ErrorRecord;
use crate::schema::{DepValues, Reaction, Schema, Value};

/// The callback contract a reaction graph needs from its owning model
/// coordinator (spec §4.D step 3 / ownership note in §3).
pub trait ReactionHost {
    /// Last-committed value for `field`, or `None` if never committed.
    fn get_value(&self, field: &str) -> Option<Value>;

    /// Record a reaction-side error under the model's synthetic
    /// `__reactions` error key.
    fn record_reaction_error(&self, error: ErrorRecord);

    /// Commit `value` into `field`, as if via `setField`, carrying the
    /// propagation stack through. Returns the validation verdict.
    fn set_from_reaction(&self, field: String, value: Value, stack: Vec<String>) -> LocalBoxFuture<'static, bool>;
}

#[derive(Default)]
struct WorkTracker {
    count: Cell<u64>,
    notify: Notify,
}

impl WorkTracker {
    fn inc(&self) {
        self.count.set(self.count.get() + 1);
    }

    fn dec(&self) {
        let n = self.count.get().saturating_sub(1);
        self.count.set(n);
        if n == 0 {
            self.notify.notify_waiters();
        }
    }

    fn reset(&self) {
        self.count.set(0);
        self.notify.notify_waiters();
    }

    /// Resolves once no work is tracked *and* a fresh tick observes the
    /// count is still zero (a reaction completing during this round may
    /// itself have scheduled more work).
    async fn settled(&self) {
        loop {
            if self.count.get() == 0 {
                tokio::task::yield_now().await;
                if self.count.get() == 0 {
                    return;
                }
                continue;
            }
            self.notify.notified().await;
        }
    }
}

/// Reverse index from dependency field to the `(owner, reaction)` pairs
/// that depend on it, built once at construction and immutable thereafter.
pub struct ReactionGraph {
    deps_index: IndexMap<String, Vec<(String, Reaction)>>,
    debounce: Duration,
    pending_timers: RefCell<HashMap<usize, JoinHandle<()>>>,
    in_flight: RefCell<Vec<JoinHandle<()>>>,
    tracker: WorkTracker,
}

impl ReactionGraph {
    pub fn build(schema: &Schema, debounce: Duration) -> Rc<Self> {
        let mut deps_index: IndexMap<String, Vec<(String, Reaction)>> = IndexMap::new();
        for (owner, field_schema) in schema.iter() {
            for reaction in &field_schema.reactions {
                for dep in reaction.deps() {
                    deps_index
                        .entry(dep.clone())
                        .or_default()
                        .push((owner.to_string(), reaction.clone()));
                }
            }
        }
        Rc::new(Self {
            deps_index,
            debounce,
            pending_timers: RefCell::new(HashMap::new()),
            in_flight: RefCell::new(Vec::new()),
            tracker: WorkTracker::default(),
        })
    }

    /// Fan out from a single changed field (spec §4.D "Triggering").
    pub fn trigger(self: &Rc<Self>, changed_field: &str, stack: Vec<String>, host: Rc<dyn ReactionHost>) {
        let Some(pairs) = self.deps_index.get(changed_field) else {
            return;
        };
        for (owner, reaction) in pairs.clone() {
            self.dispatch_one(owner, reaction, &stack, changed_field, Rc::clone(&host));
        }
    }

    /// Fan out from a batch of input field names, scheduling every
    /// dependent reaction at most once (spec §4.D "Batch triggering").
    pub fn batch_trigger(self: &Rc<Self>, changed_fields: &[String], host: Rc<dyn ReactionHost>) {
        let mut seen_keys = Vec::new();
        let mut scheduled = Vec::new();
        for field in changed_fields {
            let Some(pairs) = self.deps_index.get(field) else {
                continue;
            };
            for (owner, reaction) in pairs {
                let key = reaction.instance_key();
                if seen_keys.contains(&key) {
                    continue;
                }
                seen_keys.push(key);
                scheduled.push((owner.clone(), reaction.clone(), field.clone()));
            }
        }
        for (owner, reaction, matched_dep) in scheduled {
            self.dispatch_one(owner, reaction, &[], &matched_dep, Rc::clone(&host));
        }
    }

    fn dispatch_one(
        self: &Rc<Self>,
        owner: String,
        reaction: Reaction,
        stack: &[String],
        changed_field: &str,
        host: Rc<dyn ReactionHost>,
    ) {
        if stack.iter().any(|visited| visited == &owner) {
            let mut path = stack.to_vec();
            path.push(owner);
            host.record_reaction_error(ErrorRecord::circular_dependency(&path));
            return;
        }

        let mut recursion_stack = stack.to_vec();
        recursion_stack.push(changed_field.to_string());

        if self.debounce.is_zero() {
            self.tracker.inc();
            let graph = Rc::clone(self);
            let handle = tokio::task::spawn_local(async move {
                graph.clone().execute_reaction(owner, reaction, recursion_stack, host).await;
                graph.tracker.dec();
            });
            self.track_in_flight(handle);
        } else {
            self.schedule_debounced(owner, reaction, recursion_stack, host);
        }
    }

    fn schedule_debounced(self: &Rc<Self>, owner: String, reaction: Reaction, recursion_stack: Vec<String>, host: Rc<dyn ReactionHost>) {
        let key = reaction.instance_key();
        if let Some(previous) = self.pending_timers.borrow_mut().remove(&key) {
            previous.abort();
            self.tracker.dec();
        }
        self.tracker.inc();

        let graph = Rc::clone(self);
        let debounce = self.debounce;
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(debounce).await;
            graph.pending_timers.borrow_mut().remove(&key);
            graph.clone().execute_reaction(owner, reaction, recursion_stack, host).await;
            graph.tracker.dec();
        });
        self.pending_timers.borrow_mut().insert(key, handle);
    }

    fn track_in_flight(&self, handle: JoinHandle<()>) {
        let mut in_flight = self.in_flight.borrow_mut();
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    async fn execute_reaction(self: Rc<Self>, owner: String, reaction: Reaction, recursion_stack: Vec<String>, host: Rc<dyn ReactionHost>) {
        let mut deps: DepValues = HashMap::new();
        for dep in reaction.deps() {
            match host.get_value(dep) {
                Some(value) => {
                    deps.insert(dep.clone(), Some(value));
                }
                None => {
                    host.record_reaction_error(ErrorRecord::dependency_missing(&owner, dep));
                    deps.insert(dep.clone(), None);
                }
            }
        }

        let computed = match std::panic::catch_unwind(AssertUnwindSafe(|| reaction.compute(&deps))) {
            Ok(value) => value,
            Err(payload) => {
                host.record_reaction_error(ErrorRecord::reaction(&owner, panic_message(&payload)));
                return;
            }
        };

        host.set_from_reaction(owner, computed.clone(), recursion_stack).await;
        reaction.run_action(&deps, &computed);
    }

    /// Resolves once no debounce timers or reaction futures remain in
    /// flight (spec §4.D "Settle barrier").
    pub async fn settled(&self) {
        self.tracker.settled().await;
    }

    /// Cancel every pending timer, abort every in-flight reaction task,
    /// and empty the dependency index's bookkeeping (spec §3 dispose).
    pub fn dispose(&self) {
        for (_, handle) in self.pending_timers.borrow_mut().drain() {
            handle.abort();
        }
        for handle in self.in_flight.borrow_mut().drain(..) {
            handle.abort();
        }
        self.tracker.reset();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "reaction panicked".to_string()
    }
}
