//! Object clean-up before push and after pull

use serde_json::{Map, Value};

use crate::error::Result;
use crate::models::{LocalCollection, LocalObject};

/// Strip fields that must never leave the device: search terms, raw page
/// text and favicon image data. Applying it twice changes nothing.
#[must_use]
pub fn preprocess_object_for_push(collection: LocalCollection, object: Value) -> Value {
    let Value::Object(mut fields) = object else {
        return object;
    };
    fields.retain(|field, _| !collection.is_device_local_field(field));
    Value::Object(fields)
}

/// Drop null fields from a pulled object and check it has the shape of its
/// collection. Returns the object in canonical local form.
pub fn preprocess_pulled_object(collection: LocalCollection, object: Value) -> Result<Value> {
    let object = match object {
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .filter(|(_, value)| !value.is_null())
                .collect::<Map<_, _>>(),
        ),
        other => other,
    };
    LocalObject::parse(collection, object)?.to_value()
}
