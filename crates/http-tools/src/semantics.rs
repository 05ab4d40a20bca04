//! HTTP method semantics for generated handlers.
//!
//! The method of an operation decides where its non-path arguments travel: methods that carry a
//! request body (`POST`, `PUT`, `PATCH`) send a JSON object, every other method sends a query
//! string.

use reqwest::Method;

/// Where non-path arguments are placed on the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentPlacement {
    Query,
    JsonBody,
}

/// Method keys that may appear under an `OpenAPI` path item, in canonical order.
pub const OPERATION_METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

#[must_use]
pub fn placement_for_method(method: &Method) -> ArgumentPlacement {
    if method == Method::POST || method == Method::PUT || method == Method::PATCH {
        ArgumentPlacement::JsonBody
    } else {
        ArgumentPlacement::Query
    }
}

/// Parse a path-item key into an HTTP method.
///
/// Returns `None` for keys that are not operations (`parameters`, `summary`, `servers`, vendor
/// extensions, ...). Matching is case-insensitive.
#[must_use]
pub fn operation_method(key: &str) -> Option<Method> {
    let lower = key.to_ascii_lowercase();
    if !OPERATION_METHODS.contains(&lower.as_str()) {
        return None;
    }
    lower.to_ascii_uppercase().parse().ok()
}
