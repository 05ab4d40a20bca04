//! Local `$ref` resolution and schema flattening.
//!
//! Only root-relative JSON pointers (`#/components/schemas/User`) are supported. A pointer that
//! does not lead anywhere resolves to the empty schema rather than failing, so a single dangling
//! reference does not sink the whole document. Reference cycles, on the other hand, are always an
//! error.

use crate::error::{OpenApiToolsError, Result};
use crate::schema::{COMPOSITION_KEYWORDS, ResolvedSchema, SchemaNode};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy)]
pub struct SchemaResolver<'a> {
    doc: &'a Value,
}

impl<'a> SchemaResolver<'a> {
    #[must_use]
    pub fn new(doc: &'a Value) -> Self {
        Self { doc }
    }

    /// Look up a root-relative pointer.
    ///
    /// Returns `None` for refs that are not of the form `#/...` and for pointers with a missing
    /// segment. Tokens honour the `~1` (`/`) and `~0` (`~`) escapes.
    #[must_use]
    pub fn lookup(&self, reference: &str) -> Option<&'a Value> {
        let pointer = reference.strip_prefix("#/")?;
        let mut current = self.doc;
        for raw in pointer.split('/') {
            let token = raw.replace("~1", "/").replace("~0", "~");
            current = match current {
                Value::Object(map) => map.get(&token)?,
                Value::Array(items) => items.get(token.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Resolve a ref to a copy of its target, or the empty schema if it leads nowhere.
    #[must_use]
    pub fn resolve(&self, reference: &str) -> Value {
        self.lookup(reference)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    /// Follow a chain of `$ref`s until a non-reference value is reached.
    ///
    /// Returns `Ok(None)` when a link in the chain leads nowhere.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::CyclicRef`] if the chain revisits a pointer.
    pub fn deref(&self, value: &'a Value) -> Result<Option<&'a Value>> {
        let mut seen: Vec<&str> = Vec::new();
        let mut current = value;
        while let Some(reference) = current.get("$ref").and_then(Value::as_str) {
            if seen.contains(&reference) {
                return Err(OpenApiToolsError::CyclicRef(reference.to_string()));
            }
            seen.push(reference);
            match self.lookup(reference) {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Flatten a schema into one property map and required list.
    ///
    /// `$ref`s are followed, `properties` / `required` are taken directly, and every subschema
    /// under `allOf`, `oneOf` and `anyOf` is flattened and unioned in. The first definition of a
    /// property wins.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::CyclicRef`] if following `$ref`s loops.
    pub fn flatten(&self, schema: &Value) -> Result<ResolvedSchema> {
        let mut stack = Vec::new();
        self.flatten_inner(schema, &mut stack)
    }

    fn flatten_inner(&self, schema: &Value, stack: &mut Vec<String>) -> Result<ResolvedSchema> {
        match SchemaNode::classify(schema) {
            SchemaNode::Ref(reference) => {
                if stack.iter().any(|r| r == reference) {
                    return Err(OpenApiToolsError::CyclicRef(reference.to_string()));
                }
                let Some(target) = self.lookup(reference) else {
                    return Ok(ResolvedSchema::default());
                };
                stack.push(reference.to_string());
                let flattened = self.flatten_inner(target, stack);
                stack.pop();
                flattened
            }
            SchemaNode::Composite(map) => {
                let mut out = ResolvedSchema::default();
                out.absorb_direct(map);
                for keyword in COMPOSITION_KEYWORDS {
                    let Some(parts) = map.get(keyword).and_then(Value::as_array) else {
                        continue;
                    };
                    for part in parts {
                        out.merge(self.flatten_inner(part, stack)?);
                    }
                }
                Ok(out)
            }
            SchemaNode::Object(map) => {
                let mut out = ResolvedSchema::default();
                out.absorb_direct(map);
                Ok(out)
            }
            SchemaNode::Primitive(_) => Ok(ResolvedSchema::default()),
        }
    }
}
