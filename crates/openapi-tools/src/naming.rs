//! Tool name synthesis.
//!
//! Names are derived from an operation alone; cross-operation uniqueness is the compiler's job.
//! Every synthesized name matches `[a-z_][a-z0-9_]*` and is never a reserved word.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Longest `operationId` that is used verbatim (lowercased) as a tool name.
pub const MAX_OPERATION_ID_LEN: usize = 25;

/// Length cap applied to fallback names built from the raw path.
pub const MAX_FALLBACK_LEN: usize = 30;

pub const RESERVED_WORDS: [&str; 28] = [
    "def", "class", "if", "for", "while", "import", "from", "return", "yield", "try", "except",
    "finally", "with", "as", "pass", "break", "continue", "global", "nonlocal", "lambda", "and",
    "or", "not", "in", "is", "true", "false", "none",
];

const IRREGULAR_PLURALS: [(&str, &str); 8] = [
    ("children", "child"),
    ("people", "person"),
    ("men", "man"),
    ("women", "woman"),
    ("feet", "foot"),
    ("teeth", "tooth"),
    ("mice", "mouse"),
    ("geese", "goose"),
];

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));
static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("valid character class regex"));
static UNDERSCORE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("valid underscore regex"));

/// Derive a tool name for one operation.
///
/// 1. A short, well-formed, non-reserved `operationId` is used lowercased.
/// 2. Otherwise the name is built from the method and the first two non-template path segments
///    (`GET /users/{id}/posts` -> `get_users_posts`, `POST /users` -> `create_user`).
/// 3. Methods without a template fall back to `<method>_<sanitized path>`.
#[must_use]
pub fn synthesize_name(path: &str, method: &str, operation: &Value) -> String {
    if let Some(op_id) = operation.get("operationId").and_then(Value::as_str)
        && op_id.chars().count() <= MAX_OPERATION_ID_LEN
        && is_valid_identifier(op_id)
    {
        return op_id.to_lowercase().replace(' ', "_");
    }

    let parts: Vec<String> = path
        .split('/')
        .filter(|seg| !seg.is_empty() && !seg.starts_with('{'))
        .map(sanitize_identifier)
        .collect();

    let method = method.to_lowercase();
    let verb = match method.as_str() {
        "get" => "get",
        "post" => "create",
        "put" => "update",
        "patch" => "modify",
        "delete" => "delete",
        _ => return fallback_name(&method, path),
    };

    match parts.as_slice() {
        [] if verb == "get" => "list_items".to_string(),
        [] => format!("{verb}_item"),
        [only] if verb == "get" => format!("get_{only}"),
        [only] => format!("{verb}_{}", singularize(only)),
        [first, second, ..] => format!("{verb}_{first}_{second}"),
    }
}

fn fallback_name(method: &str, path: &str) -> String {
    let flattened = path.replace('/', "_").replace(['{', '}'], "");
    let cleaned = sanitize_identifier(flattened.trim_matches('_'));
    let joined: String = format!("{method}_{cleaned}")
        .chars()
        .take(MAX_FALLBACK_LEN)
        .collect();
    sanitize_identifier(joined.trim_end_matches('_'))
}

/// `true` if `name` matches the identifier grammar and is not a reserved word.
#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name) && !is_reserved(name)
}

fn is_reserved(name: &str) -> bool {
    let lower = name.to_lowercase();
    RESERVED_WORDS.contains(&lower.as_str())
}

/// Turn arbitrary text into a valid lowercase identifier.
///
/// Invalid characters become `_`, runs of `_` collapse, edge underscores are trimmed, and a
/// leading digit or reserved word gets a `tool_` prefix. Empty input yields `generated_tool`.
#[must_use]
pub fn sanitize_identifier(raw: &str) -> String {
    let replaced = INVALID_CHARS.replace_all(raw, "_");
    let collapsed = UNDERSCORE_RUNS.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches('_');

    let name = if trimmed.is_empty() {
        "generated_tool".to_string()
    } else if trimmed.starts_with(|c: char| c.is_ascii_digit()) || is_reserved(trimmed) {
        format!("tool_{trimmed}")
    } else {
        trimmed.to_string()
    };
    name.to_lowercase()
}

/// Naive English singularization for resource names.
#[must_use]
pub fn singularize(word: &str) -> String {
    if let Some((_, singular)) = IRREGULAR_PLURALS.iter().find(|(plural, _)| *plural == word) {
        return (*singular).to_string();
    }
    if !word.ends_with('s') || word.len() <= 1 {
        return word.to_string();
    }

    if word.len() > 3
        && let Some(stem) = word.strip_suffix("ies")
    {
        return format!("{stem}y");
    }
    if ["ches", "shes", "xes", "zes"]
        .iter()
        .any(|suffix| word.ends_with(suffix))
    {
        return word[..word.len() - 2].to_string();
    }
    word[..word.len() - 1].to_string()
}
