//! Declarative per-attribute validation for values constructed from a JSON
//! mapping (the Instantiator's step configs, whose shape isn't known until
//! the `class` key has been resolved). `FieldSpec` plays the role the source
//! gives to its attribute-descriptor `Field`, minus the runtime reflection:
//! validators here are plain function pointers rather than "the name of a
//! method to resolve on self", which Rust's static dispatch doesn't need.

use std::collections::HashSet;

use serde_json::{Map, Value};

/// One declared attribute of a config-constructed value.
#[derive(Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub optional: bool,
    /// Produces the value substituted in when the field is missing and
    /// `optional` is set.
    pub default: Option<fn() -> Value>,
    /// Additional validation beyond the implicit presence check. Returning
    /// `Err` fails construction with the given reason.
    pub validator: Option<fn(&Value) -> Result<(), String>>,
}

impl FieldSpec {
    pub const fn required(name: &'static str) -> Self {
        Self { name, optional: false, default: None, validator: None }
    }

    pub const fn optional(name: &'static str, default: fn() -> Value) -> Self {
        Self { name, optional: true, default: Some(default), validator: None }
    }

    pub const fn validated(mut self, validator: fn(&Value) -> Result<(), String>) -> Self {
        self.validator = Some(validator);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("missing required field `{0}`")]
    Missing(String),
    #[error("unknown field `{0}`")]
    Unknown(String),
    #[error("field `{field}` failed validation: {reason}")]
    Invalid { field: String, reason: String },
}

/// Validates `input` against `specs`: every declared, non-optional field
/// must be present; optional fields missing from `input` are filled from
/// their default; every key in `input` must be declared; each present
/// value runs its validator, if any. Returns the normalized map (defaults
/// included) ready to be handed to the target constructor.
pub fn validate_fields(specs: &[FieldSpec], input: &Map<String, Value>) -> Result<Map<String, Value>, FieldError> {
    let declared: HashSet<&str> = specs.iter().map(|s| s.name).collect();
    for key in input.keys() {
        if !declared.contains(key.as_str()) {
            return Err(FieldError::Unknown(key.clone()));
        }
    }

    let mut out = Map::new();
    for spec in specs {
        match input.get(spec.name) {
            Some(value) => {
                if let Some(validator) = spec.validator {
                    validator(value).map_err(|reason| FieldError::Invalid { field: spec.name.to_string(), reason })?;
                }
                out.insert(spec.name.to_string(), value.clone());
            }
            None if spec.optional => {
                if let Some(default) = spec.default {
                    out.insert(spec.name.to_string(), default());
                }
            }
            None => return Err(FieldError::Missing(spec.name.to_string())),
        }
    }
    Ok(out)
}

/// Reflection over the declared fields of a type, mirroring the source's
/// `find_fields` class method. Since Rust fields are a static table rather
/// than attribute descriptors, this is just an identity passthrough kept as
/// its own function so call sites read the same as the source.
pub fn find_fields(specs: &[FieldSpec]) -> &[FieldSpec] {
    specs
}
