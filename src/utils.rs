// Utility functions and helpers
// Shared by the evaluator, builtins and formats

use crate::value::JValue;

/// Remaining stack below which deep recursion moves to a new segment.
const STACK_RED_ZONE: usize = 128 * 1024;
/// Size of each new stack segment.
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Run `f`, on a freshly allocated stack segment if this one is nearly full.
#[inline]
pub fn with_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, f)
}

/// Longest JSON excerpt quoted in an error message.
const EXCERPT_LIMIT: usize = 11;

/// Compact JSON text of `value`, cut short with `...` when long.
pub fn excerpt(value: &JValue) -> String {
    let text = value.to_string();
    if text.chars().count() <= EXCERPT_LIMIT {
        return text;
    }
    let mut out: String = text.chars().take(EXCERPT_LIMIT - 1).collect();
    out.push_str("...");
    out
}

/// `type (excerpt)`, the way values are shown in error messages.
pub fn describe(value: &JValue) -> String {
    format!("{} ({})", value.type_name(), excerpt(value))
}

/// `tostring`: strings as-is, everything else as compact JSON.
pub fn to_text(value: &JValue) -> String {
    match value {
        JValue::String(s) => s.to_string(),
        other => other.to_string(),
    }
}

/// Flatten nested arrays up to `depth` levels.
pub fn flatten(arr: &[JValue], depth: usize) -> Vec<JValue> {
    let mut result = Vec::new();
    for item in arr {
        match item {
            JValue::Array(inner) if depth > 0 => result.extend(flatten(inner, depth - 1)),
            other => result.push(other.clone()),
        }
    }
    result
}

/// Codepoint offset of the byte position `byte` in `s`.
pub fn char_offset(s: &str, byte: usize) -> usize {
    s[..byte].chars().count()
}

/// Resolve a possibly negative index against `len`; `None` if it stays negative.
pub fn resolve_index(index: i64, len: usize) -> Option<usize> {
    if index < 0 {
        let from_end = len as i64 + index;
        (from_end >= 0).then_some(from_end as usize)
    } else {
        Some(index as usize)
    }
}

/// Clamp slice bounds to `0..=len`; negative bounds count from the end.
pub fn slice_bounds(from: Option<f64>, to: Option<f64>, len: usize) -> (usize, usize) {
    let clamp = |n: f64| -> usize {
        let n = if n < 0.0 { len as f64 + n } else { n };
        n.max(0.0).min(len as f64) as usize
    };
    let start = from.map_or(0, |f| clamp(f.floor()));
    let end = to.map_or(len, |t| clamp(t.ceil()));
    (start, end.max(start))
}
