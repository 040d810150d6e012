//! The model side of the mapping.
//!
//! A model is any serde type that serializes to a JSON object whose keys are
//! the property names declared for its table. Partial models (some
//! properties only) are plain [`Properties`] maps.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::{MapError, Result};

/// Property name to model-side value.
pub type Properties = serde_json::Map<String, JsonValue>;

/// A type mapped onto a registered table.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use tablemap_core::{Model, to_properties};
///
/// #[derive(Serialize, Deserialize)]
/// struct User {
///     id: Option<i64>,
///     name: String,
/// }
///
/// impl Model for User {
///     const TABLE: &'static str = "users";
/// }
///
/// let props = to_properties(&User { id: None, name: "ann".into() }).unwrap();
/// assert_eq!(props["name"], "ann");
/// ```
pub trait Model: Serialize + DeserializeOwned {
    /// Registered table name.
    const TABLE: &'static str;
}

/// Converts a model into its property map.
///
/// # Errors
///
/// Returns [`MapError::Conversion`] if the model does not serialize to an
/// object.
pub fn to_properties<M: Serialize>(model: &M) -> Result<Properties> {
    match serde_json::to_value(model) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(other) => Err(MapError::Conversion(format!(
            "model must serialize to an object, got {other}"
        ))),
        Err(e) => Err(MapError::Conversion(e.to_string())),
    }
}

/// Builds a model from a property map.
pub fn from_properties<M: DeserializeOwned>(properties: Properties) -> Result<M> {
    serde_json::from_value(JsonValue::Object(properties))
        .map_err(|e| MapError::Conversion(e.to_string()))
}
