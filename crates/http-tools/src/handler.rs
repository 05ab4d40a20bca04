//! Structured handler specifications.
//!
//! A [`HandlerSpec`] captures everything needed to turn a tool call into an upstream request:
//! the HTTP method, the path template and one binding per declared argument. Binding a set of
//! arguments validates required values, coerces each value to its declared type and routes it to
//! the path, the query string or the JSON body.

use crate::runtime::{HttpToolsError, Result};
use crate::semantics::{ArgumentPlacement, placement_for_method};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Where a bound argument ends up on the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Path,
    Query,
    Body,
}

/// Declared scalar type of an argument, as far as coercion is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Integer,
    Number,
    Boolean,
    /// Arrays, objects and anything else are passed through untouched.
    Other,
}

impl ValueType {
    /// Read the `type` keyword of a property schema. A missing type is treated as a string.
    #[must_use]
    pub fn from_schema(schema: &Value) -> Self {
        match schema.get("type").and_then(Value::as_str) {
            None | Some("string") => Self::String,
            Some("integer") => Self::Integer,
            Some("number") => Self::Number,
            Some("boolean") => Self::Boolean,
            Some(_) => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamBinding {
    pub name: String,
    pub kind: ParamKind,
    pub value_type: ValueType,
    pub default: Option<Value>,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub struct HandlerSpec {
    pub tool_name: String,
    pub method: Method,
    /// Path template relative to the upstream base URL, e.g. `/users/{id}`.
    pub path: String,
    pub bindings: Vec<ParamBinding>,
}

/// The pieces of an outbound request produced by [`HandlerSpec::bind`].
#[derive(Debug, Clone, PartialEq)]
pub struct BoundRequest {
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Map<String, Value>>,
}

impl HandlerSpec {
    /// Derive a handler spec from a flat tool input schema.
    ///
    /// Every property becomes one binding, in schema order. Properties listed in `path_params`
    /// whose `{name}` placeholder occurs in `path` are substituted into the path; the rest are
    /// routed by method semantics.
    #[must_use]
    pub fn from_input_schema(
        tool_name: impl Into<String>,
        method: Method,
        path: impl Into<String>,
        input_schema: &Value,
        path_params: &[String],
    ) -> Self {
        let path = path.into();
        let required: Vec<&str> = input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let routed = match placement_for_method(&method) {
            ArgumentPlacement::Query => ParamKind::Query,
            ArgumentPlacement::JsonBody => ParamKind::Body,
        };

        let bindings = input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, schema)| {
                        let in_template = path.contains(&format!("{{{name}}}"));
                        let kind = if in_template && path_params.iter().any(|p| p == name) {
                            ParamKind::Path
                        } else {
                            routed
                        };
                        ParamBinding {
                            name: name.clone(),
                            kind,
                            value_type: ValueType::from_schema(schema),
                            default: schema.get("default").cloned(),
                            required: required.contains(&name.as_str()),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            tool_name: tool_name.into(),
            method,
            path,
            bindings,
        }
    }

    /// Validate and route a set of call arguments.
    ///
    /// # Errors
    ///
    /// Returns [`HttpToolsError::MissingParameter`] when a required argument is absent or null,
    /// or when a path placeholder would be left without a value. No coercion happens before every
    /// required argument has been checked.
    pub fn bind(&self, arguments: &Value) -> Result<BoundRequest> {
        for binding in self.bindings.iter().filter(|b| b.required) {
            match arguments.get(&binding.name) {
                None | Some(Value::Null) => {
                    return Err(HttpToolsError::MissingParameter(binding.name.clone()));
                }
                Some(_) => {}
            }
        }

        let mut path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        let mut query = Vec::new();
        let mut body = match placement_for_method(&self.method) {
            ArgumentPlacement::JsonBody => Some(Map::new()),
            ArgumentPlacement::Query => None,
        };

        for binding in &self.bindings {
            let value = binding
                .coerce(arguments.get(&binding.name))
                .filter(|v| !v.is_null());
            // A path placeholder cannot be dropped like a query or body field.
            if binding.kind == ParamKind::Path
                && value.as_ref().is_none_or(|v| value_to_string(v).is_empty())
            {
                return Err(HttpToolsError::MissingParameter(binding.name.clone()));
            }
            let Some(value) = value else {
                continue;
            };

            match binding.kind {
                ParamKind::Path => {
                    let encoded = encode_path_segment(&value_to_string(&value));
                    path = path.replace(&format!("{{{}}}", binding.name), &encoded);
                }
                ParamKind::Query => push_query_pairs(&mut query, &binding.name, &value),
                ParamKind::Body => {
                    body.get_or_insert_with(Map::new)
                        .insert(binding.name.clone(), value);
                }
            }
        }

        Ok(BoundRequest { path, query, body })
    }
}

impl ParamBinding {
    /// Coerce a raw argument to the declared type.
    ///
    /// Unparseable values fall back to the declared default; `None` means "send nothing".
    fn coerce(&self, raw: Option<&Value>) -> Option<Value> {
        let raw = match raw {
            None | Some(Value::Null) => return self.default.clone(),
            Some(v) => v,
        };

        if raw.as_str() == Some("") {
            if self.required {
                return None;
            }
            return match self.value_type {
                ValueType::String | ValueType::Other => Some(raw.clone()),
                ValueType::Boolean => Some(Value::Bool(false)),
                ValueType::Integer | ValueType::Number => self.default.clone(),
            };
        }

        let coerced = match self.value_type {
            ValueType::String | ValueType::Other => Some(raw.clone()),
            ValueType::Integer => coerce_integer(raw),
            ValueType::Number => coerce_number(raw),
            ValueType::Boolean => coerce_boolean(raw),
        };
        coerced.or_else(|| self.default.clone())
    }
}

fn coerce_integer(raw: &Value) -> Option<Value> {
    match raw {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(Value::Number(n.clone())),
        Value::Number(n) => n.as_f64().and_then(truncate_to_i64).map(Value::from),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(Value::from)
                .or_else(|_| s.parse::<u64>().map(Value::from))
                .ok()
        }
        Value::Bool(b) => Some(Value::from(i64::from(*b))),
        _ => None,
    }
}

/// Truncate toward zero, refusing values an `i64` cannot hold instead of saturating.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn truncate_to_i64(f: f64) -> Option<i64> {
    let t = f.trunc();
    (t.is_finite() && t >= i64::MIN as f64 && t < i64::MAX as f64).then_some(t as i64)
}

fn coerce_number(raw: &Value) -> Option<Value> {
    let f = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => return None,
    };
    Number::from_f64(f).map(Value::Number)
}

fn coerce_boolean(raw: &Value) -> Option<Value> {
    match raw {
        Value::Bool(b) => Some(Value::Bool(*b)),
        Value::String(s) => match s.as_str() {
            "true" | "True" => Some(Value::Bool(true)),
            "false" | "False" => Some(Value::Bool(false)),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(Value::Bool(true)),
            Some(0) => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn push_query_pairs(query: &mut Vec<(String, String)>, name: &str, value: &Value) {
    if let Value::Array(items) = value {
        for item in items.iter().filter(|v| !v.is_null()) {
            query.push((name.to_string(), value_to_string(item)));
        }
    } else {
        query.push((name.to_string(), value_to_string(value)));
    }
}

pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

fn encode_path_segment(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_posts_spec(method: Method) -> HandlerSpec {
        let schema = json!({
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "limit": {"type": "integer", "default": 10},
                "published": {"type": "boolean"},
                "title": {"type": "string"}
            },
            "required": ["id"]
        });
        HandlerSpec::from_input_schema(
            "get_users_posts",
            method,
            "/users/{id}/posts",
            &schema,
            &["id".to_string()],
        )
    }

    #[test]
    fn bindings_follow_schema_order_and_route_by_method() {
        let spec = user_posts_spec(Method::GET);
        let kinds: Vec<(&str, ParamKind)> = spec
            .bindings
            .iter()
            .map(|b| (b.name.as_str(), b.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("id", ParamKind::Path),
                ("limit", ParamKind::Query),
                ("published", ParamKind::Query),
                ("title", ParamKind::Query),
            ]
        );

        let spec = user_posts_spec(Method::POST);
        assert_eq!(spec.bindings[1].kind, ParamKind::Body);
        assert!(spec.bindings[0].required);
        assert_eq!(spec.bindings[1].default, Some(json!(10)));
    }

    #[test]
    fn placeholder_without_path_declaration_is_not_substituted() {
        let schema = json!({"properties": {"id": {"type": "string"}}});
        let spec = HandlerSpec::from_input_schema("t", Method::GET, "/items/{id}", &schema, &[]);
        assert_eq!(spec.bindings[0].kind, ParamKind::Query);
    }

    #[test]
    fn bind_rejects_missing_and_null_required_arguments() {
        let spec = user_posts_spec(Method::GET);

        let err = spec.bind(&json!({})).unwrap_err();
        assert_eq!(err.to_string(), "Missing required parameter: id");

        let err = spec.bind(&json!({"id": null})).unwrap_err();
        assert!(matches!(err, HttpToolsError::MissingParameter(ref n) if n == "id"));
    }

    #[test]
    fn bind_substitutes_path_and_builds_query() {
        let spec = user_posts_spec(Method::GET);
        let bound = spec
            .bind(&json!({"id": "a b/c", "limit": "5", "published": "true"}))
            .unwrap();
        assert_eq!(bound.path, "/users/a%20b%2Fc/posts");
        assert_eq!(
            bound.query,
            vec![
                ("limit".to_string(), "5".to_string()),
                ("published".to_string(), "true".to_string()),
            ]
        );
        assert!(bound.body.is_none());
    }

    #[test]
    fn bind_applies_defaults_and_falls_back_on_bad_values() {
        let spec = user_posts_spec(Method::GET);
        let bound = spec.bind(&json!({"id": 7})).unwrap();
        assert_eq!(bound.path, "/users/7/posts");
        assert_eq!(bound.query, vec![("limit".to_string(), "10".to_string())]);

        let bound = spec
            .bind(&json!({"id": "x", "limit": "lots", "published": "maybe"}))
            .unwrap();
        assert_eq!(bound.query, vec![("limit".to_string(), "10".to_string())]);
    }

    #[test]
    fn bind_puts_body_fields_in_json_object_and_drops_nulls() {
        let spec = user_posts_spec(Method::POST);
        let bound = spec
            .bind(&json!({"id": "u1", "title": "hello", "published": null}))
            .unwrap();
        assert_eq!(bound.path, "/users/u1/posts");
        assert!(bound.query.is_empty());
        let body = bound.body.unwrap();
        assert_eq!(body.get("title"), Some(&json!("hello")));
        assert_eq!(body.get("limit"), Some(&json!(10)));
        assert!(!body.contains_key("published"));
        assert!(!body.contains_key("id"));
    }

    #[test]
    fn required_empty_string_is_dropped() {
        let schema = json!({
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        let spec = HandlerSpec::from_input_schema("create_user", Method::POST, "/users", &schema, &[]);
        let bound = spec.bind(&json!({"name": ""})).unwrap();
        assert_eq!(bound.body, Some(Map::new()));
    }

    #[test]
    fn coercion_rules_by_type() {
        let binding = |value_type, default| ParamBinding {
            name: "x".to_string(),
            kind: ParamKind::Query,
            value_type,
            default,
            required: false,
        };

        let int = binding(ValueType::Integer, None);
        assert_eq!(int.coerce(Some(&json!("42"))), Some(json!(42)));
        assert_eq!(int.coerce(Some(&json!(3.7))), Some(json!(3)));
        assert_eq!(int.coerce(Some(&json!("4.2"))), None);

        let num = binding(ValueType::Number, Some(json!(1.5)));
        assert_eq!(num.coerce(Some(&json!("2.25"))), Some(json!(2.25)));
        assert_eq!(num.coerce(Some(&json!("abc"))), Some(json!(1.5)));
        assert_eq!(num.coerce(None), Some(json!(1.5)));

        let flag = binding(ValueType::Boolean, None);
        assert_eq!(flag.coerce(Some(&json!("False"))), Some(json!(false)));
        assert_eq!(flag.coerce(Some(&json!(1))), Some(json!(true)));
        assert_eq!(flag.coerce(Some(&json!(""))), Some(json!(false)));
        assert_eq!(flag.coerce(Some(&json!("yes"))), None);

        let text = binding(ValueType::String, None);
        assert_eq!(text.coerce(Some(&json!(""))), Some(json!("")));
    }

    #[test]
    fn integers_outside_i64_are_never_saturated() {
        let binding = ParamBinding {
            name: "n".to_string(),
            kind: ParamKind::Query,
            value_type: ValueType::Integer,
            default: Some(json!(5)),
            required: false,
        };
        assert_eq!(
            binding.coerce(Some(&json!(18_446_744_073_709_551_615_u64))),
            Some(json!(18_446_744_073_709_551_615_u64))
        );
        assert_eq!(
            binding.coerce(Some(&json!("18446744073709551615"))),
            Some(json!(18_446_744_073_709_551_615_u64))
        );
        assert_eq!(binding.coerce(Some(&json!(1e300))), Some(json!(5)));
        assert_eq!(binding.coerce(Some(&json!(-1e19))), Some(json!(5)));

        let schema = json!({"properties": {"n": {"type": "integer"}}});
        let spec = HandlerSpec::from_input_schema("t", Method::GET, "/counts", &schema, &[]);
        let bound = spec.bind(&json!({"n": 18_446_744_073_709_551_615_u64})).unwrap();
        assert_eq!(
            bound.query,
            vec![("n".to_string(), "18446744073709551615".to_string())]
        );
    }

    #[test]
    fn unfilled_path_placeholder_is_a_missing_parameter() {
        let required = user_posts_spec(Method::GET);
        let err = required.bind(&json!({"id": ""})).unwrap_err();
        assert!(matches!(err, HttpToolsError::MissingParameter(ref n) if n == "id"));

        let schema = json!({"properties": {"id": {"type": "string"}, "q": {"type": "string"}}});
        let optional =
            HandlerSpec::from_input_schema("t", Method::GET, "/items/{id}", &schema, &["id".to_string()]);
        let err = optional.bind(&json!({"q": "x"})).unwrap_err();
        assert_eq!(err.to_string(), "Missing required parameter: id");

        let bound = optional.bind(&json!({"id": "9"})).unwrap();
        assert_eq!(bound.path, "/items/9");
    }

    #[test]
    fn array_query_values_repeat_the_key() {
        let schema = json!({"properties": {"tag": {"type": "array"}}});
        let spec = HandlerSpec::from_input_schema("t", Method::GET, "/pets", &schema, &[]);
        let bound = spec.bind(&json!({"tag": ["a", "b"]})).unwrap();
        assert_eq!(
            bound.query,
            vec![
                ("tag".to_string(), "a".to_string()),
                ("tag".to_string(), "b".to_string()),
            ]
        );
    }
}
