//! Declarative field schema: value kinds, validators, reactions.
//!
//! A [`Schema`] is built once (at model construction) and is immutable
//! thereafter — schema evolution at runtime is an explicit non-goal of this
//! engine. Validators and reactions hold their predicate/compute/action
//! closures behind `Rc<dyn Fn>` rather than generic type parameters: the
//! whole point of a schema-driven engine is that the set of fields and
//! rules is only known at construction time, not at compile time.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The closed set of value kinds a field may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Date,
    Enum,
}

/// A value held in `data` or `dirty`. Deep equality (used to decide whether
/// a commit actually changes anything) is plain [`PartialEq`] — the
/// "deep-equality utility" the spec calls an external collaborator is a
/// trivial leaf in Rust once values are a closed, derive-able enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Number(f64),
    Boolean(bool),
    Object(serde_json::Map<String, serde_json::Value>),
    Array(Vec<Value>),
    Date(chrono::DateTime<chrono::Utc>),
    Enum(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Number(_) => ValueKind::Number,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Object(_) => ValueKind::Object,
            Value::Array(_) => ValueKind::Array,
            Value::Date(_) => ValueKind::Date,
            Value::Enum(_) => ValueKind::Enum,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) | Value::Enum(s) => write!(f, "{s}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::Object(_) | Value::Array(_) => write!(f, "{self:?}"),
        }
    }
}

/// A read-only snapshot of committed field values, handed to validator
/// `condition` predicates and to reaction dependency gathering.
pub type DataSnapshot = IndexMap<String, Value>;

/// Dependency values gathered for a reaction's `compute`: `None` when the
/// dependency field has never been committed (spec §4.D step 3).
pub type DepValues = HashMap<String, Option<Value>>;

/// A validator's truth test. Sync predicates run inline; async predicates
/// race against the pipeline's timeout and may "reject" by returning `Err`
/// (the Rust analogue of a promise rejection).
#[derive(Clone)]
pub enum Predicate {
    Sync(Rc<dyn Fn(&Value) -> bool>),
    Async(Rc<dyn Fn(Value) -> LocalBoxFuture<'static, Result<bool, String>>>),
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Sync(_) => f.write_str("Predicate::Sync(..)"),
            Predicate::Async(_) => f.write_str("Predicate::Async(..)"),
        }
    }
}

/// One validation rule: a tag (for error identification), a message, and a
/// predicate. An optional `condition` gates whether the validator runs at
/// all for the current data snapshot.
#[derive(Clone)]
pub struct Validator {
    pub tag: String,
    pub message: String,
    pub predicate: Predicate,
    pub condition: Option<Rc<dyn Fn(&DataSnapshot) -> bool>>,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("tag", &self.tag)
            .field("message", &self.message)
            .field("predicate", &self.predicate)
            .field("has_condition", &self.condition.is_some())
            .finish()
    }
}

impl Validator {
    /// Build a validator around a synchronous predicate.
    pub fn new(tag: impl Into<String>, message: impl Into<String>, predicate: impl Fn(&Value) -> bool + 'static) -> Self {
        Self {
            tag: tag.into(),
            message: message.into(),
            predicate: Predicate::Sync(Rc::new(predicate)),
            condition: None,
        }
    }

    /// Build a validator around an async predicate.
    pub fn new_async<F, Fut>(tag: impl Into<String>, message: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(Value) -> Fut + 'static,
        Fut: std::future::Future<Output = Result<bool, String>> + 'static,
    {
        Self {
            tag: tag.into(),
            message: message.into(),
            predicate: Predicate::Async(Rc::new(move |v| Box::pin(predicate(v)))),
            condition: None,
        }
    }

    /// Derive a new validator sharing this one's predicate with a different
    /// message — the `withMessage` derivation of spec §6's rule constructor.
    #[must_use]
    pub fn with_message(&self, message: impl Into<String>) -> Self {
        Self {
            tag: self.tag.clone(),
            message: message.into(),
            predicate: self.predicate.clone(),
            condition: self.condition.clone(),
        }
    }

    /// Gate this validator on a predicate over the whole data object.
    #[must_use]
    pub fn when(mut self, condition: impl Fn(&DataSnapshot) -> bool + 'static) -> Self {
        self.condition = Some(Rc::new(condition));
        self
    }
}

/// A unique, cloneable handle to one reaction. Identity (for batch
/// de-duplication) is `Rc` pointer identity, not structural equality — two
/// reactions with identical dependency lists are still distinct instances.
#[derive(Clone)]
pub struct Reaction(Rc<ReactionInner>);

struct ReactionInner {
    deps: Vec<String>,
    compute: Box<dyn Fn(&DepValues) -> Value>,
    action: Option<Box<dyn Fn(&DepValues, &Value)>>,
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("deps", &self.0.deps)
            .field("has_action", &self.0.action.is_some())
            .finish()
    }
}

impl Reaction {
    pub fn new(deps: Vec<String>, compute: impl Fn(&DepValues) -> Value + 'static) -> Self {
        Self(Rc::new(ReactionInner {
            deps,
            compute: Box::new(compute),
            action: None,
        }))
    }

    #[must_use]
    pub fn with_action(mut self, action: impl Fn(&DepValues, &Value) + 'static) -> Self {
        Rc::get_mut(&mut self.0)
            .map(|inner| inner.action = Some(Box::new(action)))
            .unwrap_or_else(|| unreachable!("Reaction built exclusively before sharing"));
        self
    }

    pub fn deps(&self) -> &[String] {
        &self.0.deps
    }

    pub fn compute(&self, deps: &DepValues) -> Value {
        (self.0.compute)(deps)
    }

    pub fn run_action(&self, deps: &DepValues, computed: &Value) {
        if let Some(action) = &self.0.action {
            action(deps, computed);
        }
    }

    /// Identity equality used for batch de-duplication (spec §4.D).
    pub fn is_same(&self, other: &Reaction) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// A stable key for this instance, used to index debounce timers.
    pub fn instance_key(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

/// A single declared field: its kind, validators, default, transform, and
/// the reactions it owns (computed from other fields' values).
#[derive(Clone)]
pub struct FieldSchema {
    pub kind: ValueKind,
    pub validators: Vec<Validator>,
    pub default: Option<Value>,
    pub transform: Option<Rc<dyn Fn(&Value) -> Value>>,
    pub reactions: Vec<Reaction>,
}

impl fmt::Debug for FieldSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSchema")
            .field("kind", &self.kind)
            .field("validators", &self.validators)
            .field("default", &self.default)
            .field("has_transform", &self.transform.is_some())
            .field("reactions", &self.reactions)
            .finish()
    }
}

impl FieldSchema {
    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            validators: Vec::new(),
            default: None,
            transform: None,
            reactions: Vec::new(),
        }
    }

    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    #[must_use]
    pub fn transform(mut self, transform: impl Fn(&Value) -> Value + 'static) -> Self {
        self.transform = Some(Rc::new(transform));
        self
    }

    #[must_use]
    pub fn reaction(mut self, reaction: Reaction) -> Self {
        self.reactions.push(reaction);
        self
    }
}

/// The full set of declared fields, in declaration order (used by
/// `validate_all` and `validation_summary` for deterministic iteration).
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: IndexMap<String, FieldSchema>,
}

/// Construction-time schema problems. These are outside the spec's runtime
/// error taxonomy (§7 governs per-operation failure only) — a malformed
/// schema is a programmer error caught once, at startup.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("reaction on field '{owner}' depends on undeclared field '{dep}'")]
    UndeclaredDependency { owner: String, dep: String },
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Fields in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSchema)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[derive(Default)]
pub struct SchemaBuilder {
    fields: IndexMap<String, FieldSchema>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.fields.insert(name.into(), schema);
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        for (owner, field) in &self.fields {
            for reaction in &field.reactions {
                for dep in reaction.deps() {
                    if !self.fields.contains_key(dep) {
                        return Err(SchemaError::UndeclaredDependency {
                            owner: owner.clone(),
                            dep: dep.clone(),
                        });
                    }
                }
            }
        }
        Ok(Schema { fields: self.fields })
    }
}
