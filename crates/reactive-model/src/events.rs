//! The event bus (component A): subscribe/unsubscribe/emit for named
//! events, with one-shot listeners and bulk clear.
//!
//! Subscribers for a given event fire synchronously, in registration order,
//! during `emit`. A panicking subscriber does not stop its siblings and
//! does not escape `emit` — the same "flush keeps going after one callback
//! panics" discipline as the teacher's `reactive/batch.rs::flush`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use crate::error::ErrorRecord;
use crate::schema::Value;

/// Payload carried by the five events this engine defines (spec §6).
#[derive(Debug, Clone)]
pub enum EventPayload {
    FieldChange { field: String, value: Value },
    FieldNotFound(ErrorRecord),
    ValidationError(ErrorRecord),
    ValidationComplete { is_valid: bool },
    ReactionError(ErrorRecord),
}

pub mod event_name {
    pub const FIELD_CHANGE: &str = "field:change";
    pub const FIELD_NOT_FOUND: &str = "field:not-found";
    pub const VALIDATION_ERROR: &str = "validation:error";
    pub const VALIDATION_COMPLETE: &str = "validation:complete";
    pub const REACTION_ERROR: &str = "reaction:error";
}

/// Opaque handle returned by `on`/`once`, passed back to `off` to remove
/// exactly that subscriber.
pub type SubId = u64;

type Subscriber = Rc<dyn Fn(&EventPayload)>;

struct Entry {
    id: SubId,
    cb: Subscriber,
    /// Set for listeners registered via `once`; removed after first fire.
    once: bool,
}

/// Registration-ordered, synchronous pub/sub keyed by event name.
#[derive(Default)]
pub struct EventBus {
    listeners: RefCell<HashMap<String, Vec<Entry>>>,
    next_id: Cell<u64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, event: &str, cb: impl Fn(&EventPayload) + 'static) -> SubId {
        self.register(event, cb, false)
    }

    pub fn once(&self, event: &str, cb: impl Fn(&EventPayload) + 'static) -> SubId {
        self.register(event, cb, true)
    }

    fn register(&self, event: &str, cb: impl Fn(&EventPayload) + 'static, once: bool) -> SubId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.listeners
            .borrow_mut()
            .entry(event.to_string())
            .or_default()
            .push(Entry { id, cb: Rc::new(cb), once });
        id
    }

    /// Remove one subscriber by id, or every subscriber for `event` when
    /// `id` is `None` (spec: "off without a callback removes all
    /// subscribers for that event").
    pub fn off(&self, event: &str, id: Option<SubId>) {
        let mut listeners = self.listeners.borrow_mut();
        match id {
            Some(id) => {
                if let Some(list) = listeners.get_mut(event) {
                    list.retain(|entry| entry.id != id);
                }
            }
            None => {
                listeners.remove(event);
            }
        }
    }

    /// Invoke every subscriber registered for `event`, in registration
    /// order, removing any `once` listeners that just fired.
    pub fn emit(&self, event: &str, data: &EventPayload) {
        let snapshot: Vec<(SubId, Subscriber, bool)> = self
            .listeners
            .borrow()
            .get(event)
            .map(|list| list.iter().map(|e| (e.id, Rc::clone(&e.cb), e.once)).collect())
            .unwrap_or_default();

        let mut fired_once = Vec::new();
        for (id, cb, once) in snapshot {
            let _ = std::panic::catch_unwind(AssertUnwindSafe(|| cb(data)));
            if once {
                fired_once.push(id);
            }
        }
        if !fired_once.is_empty() {
            if let Some(list) = self.listeners.borrow_mut().get_mut(event) {
                list.retain(|entry| !fired_once.contains(&entry.id));
            }
        }
    }

    /// Remove every subscriber for every event.
    pub fn clear(&self) {
        self.listeners.borrow_mut().clear();
    }
}
