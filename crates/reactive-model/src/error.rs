//! The error classifier (component B): a typed, closed vocabulary of
//! failure kinds dispatched to per-kind subscribers and a catch-all.
//!
//! Mirrors the registration-ordered, panic-isolated dispatch style of
//! [`crate::events::EventBus`] — the two are siblings in the teacher's
//! "observer list invoked in registration order" shape (`reactive/batch.rs`'s
//! flush-continues-after-panic behavior), just keyed by a closed enum
//! instead of an open string.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

/// The exhaustive set of error kinds this engine ever produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Reaction,
    FieldNotFound,
    DependencyError,
    CircularDependency,
    /// Catch-all kind; every subscriber here observes every error of every kind.
    Unknown,
}

/// A single classified error. `rule` carries the validator tag for
/// validation errors (spec §4.C: `{field, rule: validator.tag, message}`).
/// `original_error` carries the formatted cause when one exists (a caught
/// panic payload, a rejected async predicate) — Rust has no exception
/// object to attach verbatim, so the message is captured as text at the
/// point of classification.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub field: Option<String>,
    pub rule: Option<String>,
    pub message: String,
    pub original_error: Option<String>,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl ErrorRecord {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Validation,
            field: Some(field.into()),
            rule: None,
            message: message.into(),
            original_error: None,
        }
    }

    /// Attach the validator's rule tag (builder touch used by the
    /// validation pipeline only).
    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    /// `owner` is the field the failing reaction would have written to, kept
    /// for diagnostics but deliberately not filed under `self.field`: spec
    /// §3 reserves reaction/dependency/cycle failures for the synthetic
    /// `__reactions` error bucket, not the owner field's own error list.
    pub fn reaction(owner: impl Into<String>, cause: impl fmt::Display) -> Self {
        let owner = owner.into();
        let cause = cause.to_string();
        Self {
            kind: ErrorKind::Reaction,
            field: None,
            rule: None,
            message: format!("Reaction failed for '{owner}': {cause}"),
            original_error: Some(cause),
        }
    }

    pub fn field_not_found(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            message: format!("Field '{field}' is not declared in the schema"),
            kind: ErrorKind::FieldNotFound,
            field: Some(field),
            rule: None,
            original_error: None,
        }
    }

    pub fn dependency_missing(owner: impl Into<String>, dep: impl Into<String>) -> Self {
        let owner = owner.into();
        let dep = dep.into();
        Self {
            message: format!("Dependency '{dep}' for field '{owner}' is undefined"),
            kind: ErrorKind::DependencyError,
            field: None,
            rule: None,
            original_error: None,
        }
    }

    pub fn circular_dependency(path: &[String]) -> Self {
        Self {
            kind: ErrorKind::CircularDependency,
            field: None,
            rule: None,
            message: format!("Circular dependency detected: {}", path.join(" -> ")),
            original_error: None,
        }
    }
}

type ErrorSubscriber = Rc<dyn Fn(&ErrorRecord)>;

/// Typed publish/subscribe for [`ErrorRecord`]s, dispatched by kind then by
/// the `Unknown` catch-all, in registration order.
#[derive(Default)]
pub struct ErrorClassifier {
    subscribers: RefCell<HashMap<ErrorKind, Vec<(u64, ErrorSubscriber)>>>,
    next_id: Cell<u64>,
}

/// Opaque subscription handle returned by `on_error`, passed back to
/// `off_error` to remove exactly that subscriber.
pub type ErrorSubId = u64;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_error(&self, kind: ErrorKind, cb: impl Fn(&ErrorRecord) + 'static) -> ErrorSubId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.subscribers
            .borrow_mut()
            .entry(kind)
            .or_default()
            .push((id, Rc::new(cb)));
        id
    }

    pub fn off_error(&self, kind: ErrorKind, id: ErrorSubId) {
        if let Some(list) = self.subscribers.borrow_mut().get_mut(&kind) {
            list.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Remove every subscriber of every kind.
    pub fn clear(&self) {
        self.subscribers.borrow_mut().clear();
    }

    /// Dispatch to every subscriber of `record.kind`, then (unless that
    /// kind is already `Unknown`) to every subscriber of the catch-all.
    pub fn trigger_error(&self, record: ErrorRecord) {
        self.dispatch(record.kind, &record);
        if record.kind != ErrorKind::Unknown {
            self.dispatch(ErrorKind::Unknown, &record);
        }
    }

    fn dispatch(&self, kind: ErrorKind, record: &ErrorRecord) {
        let subscribers: Vec<ErrorSubscriber> = self
            .subscribers
            .borrow()
            .get(&kind)
            .map(|list| list.iter().map(|(_, cb)| Rc::clone(cb)).collect())
            .unwrap_or_default();
        for cb in subscribers {
            let _ = std::panic::catch_unwind(AssertUnwindSafe(|| cb(record)));
        }
    }
}
