//! Schema node classification and the flattened schema shape tools are built from.

use serde_json::{Map, Value, json};

/// Keywords whose subschemas are unioned into the parent during flattening.
pub const COMPOSITION_KEYWORDS: [&str; 3] = ["allOf", "oneOf", "anyOf"];

/// A schema node, classified by how flattening treats it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchemaNode<'a> {
    /// `{"$ref": "#/..."}`. Sibling keywords are ignored.
    Ref(&'a str),
    /// A node carrying at least one of `allOf` / `oneOf` / `anyOf`, possibly with its own
    /// `properties` and `required` as well.
    Composite(&'a Map<String, Value>),
    /// A plain object schema with `properties` and/or `required`.
    Object(&'a Map<String, Value>),
    /// Anything else: scalars, arrays, or non-object values. Contributes nothing.
    Primitive(&'a Value),
}

impl<'a> SchemaNode<'a> {
    #[must_use]
    pub fn classify(value: &'a Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::Primitive(value);
        };
        if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
            return Self::Ref(reference);
        }
        if COMPOSITION_KEYWORDS.iter().any(|k| map.contains_key(*k)) {
            return Self::Composite(map);
        }
        if map.contains_key("properties") || map.contains_key("required") {
            return Self::Object(map);
        }
        Self::Primitive(value)
    }
}

/// A flat property map plus an ordered, duplicate-free required list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedSchema {
    pub properties: Map<String, Value>,
    pub required: Vec<String>,
}

impl ResolvedSchema {
    /// Add a property unless one with the same name is already present.
    ///
    /// Returns `true` if the property was inserted.
    pub fn insert_property(&mut self, name: &str, schema: Value) -> bool {
        if self.properties.contains_key(name) {
            return false;
        }
        self.properties.insert(name.to_string(), schema);
        true
    }

    pub fn require(&mut self, name: &str) {
        if !self.required.iter().any(|r| r == name) {
            self.required.push(name.to_string());
        }
    }

    /// Union `other` into `self`; existing property keys win.
    pub fn merge(&mut self, other: ResolvedSchema) {
        for (name, schema) in other.properties {
            self.insert_property(&name, schema);
        }
        for name in &other.required {
            self.require(name);
        }
    }

    /// Take `properties` and `required` straight from an object-like schema map.
    pub(crate) fn absorb_direct(&mut self, map: &Map<String, Value>) {
        if let Some(props) = map.get("properties").and_then(Value::as_object) {
            for (name, schema) in props {
                self.insert_property(name, schema.clone());
            }
        }
        if let Some(required) = map.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                self.require(name);
            }
        }
    }

    /// Render as a tool `inputSchema`.
    #[must_use]
    pub fn into_input_schema(self) -> Value {
        json!({
            "type": "object",
            "properties": self.properties,
            "required": self.required,
        })
    }
}
