#![forbid(unsafe_code)]

//! reactive-model
//!
//! A declarative, schema-driven reactive engine for form-like domain
//! objects: an async validation pipeline, a debounced and cycle-safe
//! reaction dependency graph, an event bus, and a typed error classifier,
//! all coordinated behind a single [`model::ModelCoordinator`] facade.
//!
//! # Key components
//!
//! - [`schema`] — declarative field/value/validator/reaction types (the data model)
//! - [`events::EventBus`] — registration-ordered synchronous pub/sub (component A)
//! - [`error::ErrorClassifier`] — typed, closed error taxonomy dispatch (component B)
//! - [`validation`] — async validation pipeline, fail-fast or aggregate (component C)
//! - [`reaction::ReactionGraph`] — debounced, cycle-safe reaction fan-out (component D)
//! - [`model::ModelCoordinator`] — the public facade tying the above together (component E)
//! - [`rules`] — the built-in rule library (`required`, `number`, `min`, `email`, ...)
//! - [`config::ModelOptions`] — construction-time options, loadable from TOML/JSON
//!
//! # Execution model
//! Every schema closure (`!Send`), every validator future, and every
//! reaction dispatch runs inside a single `tokio::task::LocalSet` on one
//! `current_thread` runtime. Nothing in this crate is `Send`; that is a
//! deliberate match to the single-execution-context guarantee the model
//! depends on for its ordering properties, not an oversight.

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod reaction;
pub mod rules;
pub mod schema;
#[cfg(feature = "cli")]
pub mod telemetry;
pub mod validation;

pub use config::ModelOptions;
pub use error::{ErrorClassifier, ErrorKind, ErrorRecord};
pub use events::{EventBus, EventPayload};
pub use model::{ModelCoordinator, ValidationSummary};
pub use reaction::ReactionGraph;
pub use schema::{FieldSchema, Reaction, Schema, SchemaError, Validator, Value, ValueKind};
