//! Schema validation of JSON request bodies.
//!
//! The schema of a type is derived once with `schemars`, compiled once with
//! `jsonschema` and cached for the life of the process. Every violation is
//! reported, so a client fixing a form sees all of its mistakes at once.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use jsonschema::Validator;
use jsonschema::error::ValidationErrorKind;
use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, FieldError};

static VALIDATORS: LazyLock<RwLock<HashMap<TypeId, Arc<Validator>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

fn validator_for<T: JsonSchema + 'static>() -> Result<Arc<Validator>, Error> {
    let id = TypeId::of::<T>();
    if let Some(validator) = VALIDATORS.read().get(&id) {
        return Ok(Arc::clone(validator));
    }

    let schema = schemars::schema_for!(T).to_value();
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| Error::handler(format!("schema for `{}` does not compile: {e}", T::schema_name())))?;
    let validator = Arc::new(validator);

    VALIDATORS.write().entry(id).or_insert_with(|| Arc::clone(&validator));
    Ok(validator)
}

/// Validates `value` against the schema of `T`, then deserializes it.
pub(crate) fn validate<T>(value: Value) -> Result<T, Error>
where
    T: DeserializeOwned + JsonSchema + 'static,
{
    let validator = validator_for::<T>()?;

    let fields: Vec<FieldError> = validator
        .iter_errors(&value)
        .map(|e| {
            let mut path = pointer_segments(e.instance_path.as_str());
            if let ValidationErrorKind::Required { property } = &e.kind {
                if let Some(name) = property.as_str() {
                    path.push(name.to_owned());
                }
            }
            let kind = e
                .schema_path
                .as_str()
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_owned();
            FieldError::new(field_name(&path), e.to_string(), kind)
        })
        .collect();

    if !fields.is_empty() {
        return Err(Error::Validation(fields));
    }

    // The schema accepted the document; serde can still disagree on details
    // such as integer width.
    serde_json::from_value(value).map_err(|e| {
        Error::Validation(vec![FieldError::new("body", e.to_string(), "deserialize")])
    })
}

fn pointer_segments(pointer: &str) -> Vec<String> {
    pointer
        .split('/')
        .skip(1)
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect()
}

fn field_name(path: &[String]) -> String {
    if path.is_empty() {
        "body".to_owned()
    } else {
        path.join(".")
    }
}
