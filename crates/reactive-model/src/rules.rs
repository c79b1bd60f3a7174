//! The rule library (spec §6's external collaborator): plain constructor
//! functions returning [`Validator`] values — `required`, `number`, `min(n)`,
//! `email`, plus two rules recovered from `original_source/` that the
//! distillation dropped, `same_as(field)` and `pattern(regex)`.
//!
//! Tagging convention (`tag` = rule name, lowercase, no spaces) mirrors
//! `validation_pipeline.rs`'s validator-id style.

use regex::Regex;

use crate::schema::{DataSnapshot, Validator, Value};

/// Value is present: a non-empty string/enum, any number or boolean, or a
/// non-empty object/array.
pub fn required() -> Validator {
    Validator::new("required", "This field is required", |value| match value {
        Value::String(s) | Value::Enum(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(_) | Value::Boolean(_) | Value::Date(_) => true,
    })
}

/// Value is a finite number.
pub fn number() -> Validator {
    Validator::new("number", "Must be a number", |value| matches!(value, Value::Number(n) if n.is_finite()))
}

/// Numeric value is at least `min`. Non-numeric values fail (pair with
/// [`number`] to get a single message for the non-numeric case).
pub fn min(min: f64) -> Validator {
    Validator::new("min", format!("Must be at least {min}"), move |value| matches!(value, Value::Number(n) if *n >= min))
}

/// Numeric value is at most `max`.
pub fn max(max: f64) -> Validator {
    Validator::new("max", format!("Must be at most {max}"), move |value| matches!(value, Value::Number(n) if *n <= max))
}

/// A conservative, dependency-free email shape check (`local@domain.tld`) —
/// not RFC 5322, intentionally: full address-grammar validation belongs in a
/// dedicated mail-parsing crate, not a form-field validator.
pub fn email() -> Validator {
    Validator::new("email", "Must be a valid email address", |value| {
        let Value::String(s) = value else { return false };
        let Some((local, domain)) = s.split_once('@') else {
            return false;
        };
        !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
    })
}

/// Value matches `pattern` (recovered from `original_source/`'s rule set —
/// not named in spec.md itself, but not excluded by its Non-goals either).
///
/// # Panics
///
/// Panics if `pattern` fails to compile as a regular expression — this rule
/// is built once at schema-construction time from a string literal, the same
/// trust boundary as the rest of [`crate::schema`]'s builder methods.
pub fn pattern(pattern: &str) -> Validator {
    let re = Regex::new(pattern).unwrap_or_else(|e| panic!("invalid pattern rule regex {pattern:?}: {e}"));
    Validator::new("pattern", "Does not match the required format", move |value| {
        value.as_str().is_some_and(|s| re.is_match(s))
    })
}

/// Value equals the current committed value of `other_field` (recovered
/// from `original_source/`; uses the validator `condition` hook's full-data
/// view since it's a cross-field comparison, not a per-value predicate).
pub fn same_as(other_field: &str) -> Validator {
    let dep_name = other_field.to_string();
    // `condition` sees the whole snapshot, so it both gates *and* captures the
    // comparison value into a shared cell the predicate then reads.
    let other = std::rc::Rc::new(std::cell::RefCell::new(None::<Value>));
    let other_for_condition = std::rc::Rc::clone(&other);
    Validator::new("same_as", format!("Must match {other_field}"), move |value| {
        other.borrow().as_ref().is_none_or(|expected| expected == value)
    })
    .when(move |data: &DataSnapshot| {
        *other_for_condition.borrow_mut() = data.get(&dep_name).cloned();
        true
    })
}
