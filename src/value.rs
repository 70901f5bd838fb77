// JValue: Arc-wrapped JSON value for O(1) cloning
// Shared by every stage of the filter pipeline

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::{self, DeserializeSeed, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::utils::with_stack;

/// A JSON value with O(1) clone semantics via Arc-wrapping.
///
/// Strings, arrays and objects are shared, never mutated once a second owner
/// exists. Updates go through `Arc::make_mut`, which copies the top level and
/// keeps untouched children shared.
#[derive(Clone, Debug)]
pub enum JValue {
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Array(Arc<Vec<JValue>>),
    Object(Arc<IndexMap<String, JValue>>),
}

/// Numbers with a magnitude below this print without a fractional part.
const INTEGER_PRINT_LIMIT: f64 = 1e17;

/// Arrays and objects nested deeper than this are rejected by the parser.
pub const MAX_PARSE_DEPTH: usize = 10_000;

/// Text that parses to the largest finite double.
const DBL_MAX_TEXT: &str = "1.7976931348623157e308";

// ── Type checks ──────────────────────────────────────────────────────────────

impl JValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, JValue::Null)
    }

    #[inline]
    pub fn is_bool(&self) -> bool {
        matches!(self, JValue::Bool(_))
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, JValue::Number(_))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, JValue::String(_))
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, JValue::Array(_))
    }

    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self, JValue::Object(_))
    }

    /// Everything except `null` and `false` is truthy.
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, JValue::Null | JValue::Bool(false))
    }

    /// Name used by the `type` builtin and in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            JValue::Null => "null",
            JValue::Bool(_) => "boolean",
            JValue::Number(_) => "number",
            JValue::String(_) => "string",
            JValue::Array(_) => "array",
            JValue::Object(_) => "object",
        }
    }

    /// Position of the value's kind in the total order.
    fn kind_rank(&self) -> u8 {
        match self {
            JValue::Null => 0,
            JValue::Bool(false) => 1,
            JValue::Bool(true) => 2,
            JValue::Number(_) => 3,
            JValue::String(_) => 4,
            JValue::Array(_) => 5,
            JValue::Object(_) => 6,
        }
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

impl JValue {
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            JValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Integral view of a number, truncating towards zero like array indexing does.
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            JValue::Number(n) if n.is_finite() => Some(n.trunc() as i64),
            JValue::Number(n) if n.is_nan() => Some(0),
            JValue::Number(n) => Some(if *n > 0.0 { i64::MAX } else { i64::MIN }),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            JValue::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_array(&self) -> Option<&Vec<JValue>> {
        match self {
            JValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object(&self) -> Option<&IndexMap<String, JValue>> {
        match self {
            JValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Get a mutable reference to the inner Vec, cloning if shared (Arc::make_mut).
    #[inline]
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<JValue>> {
        match self {
            JValue::Array(arr) => Some(Arc::make_mut(arr)),
            _ => None,
        }
    }

    /// Get a mutable reference to the inner IndexMap, cloning if shared (Arc::make_mut).
    #[inline]
    pub fn as_object_mut(&mut self) -> Option<&mut IndexMap<String, JValue>> {
        match self {
            JValue::Object(map) => Some(Arc::make_mut(map)),
            _ => None,
        }
    }

    /// Index into an object by key.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&JValue> {
        match self {
            JValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Index into an array by position.
    #[inline]
    pub fn get_index(&self, index: usize) -> Option<&JValue> {
        match self {
            JValue::Array(arr) => arr.get(index),
            _ => None,
        }
    }
}

// ── Constructors ─────────────────────────────────────────────────────────────

impl JValue {
    #[inline]
    pub fn from_i64(n: i64) -> Self {
        JValue::Number(n as f64)
    }

    #[inline]
    pub fn from_f64(n: f64) -> Self {
        JValue::Number(n)
    }

    #[inline]
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        JValue::String(s.into())
    }

    #[inline]
    pub fn array(v: Vec<JValue>) -> Self {
        JValue::Array(Arc::new(v))
    }

    #[inline]
    pub fn object(m: IndexMap<String, JValue>) -> Self {
        JValue::Object(Arc::new(m))
    }

    #[inline]
    pub fn empty_array() -> Self {
        JValue::Array(Arc::default())
    }

    #[inline]
    pub fn empty_object() -> Self {
        JValue::Object(Arc::default())
    }
}

// ── From impls ───────────────────────────────────────────────────────────────

impl From<bool> for JValue {
    #[inline]
    fn from(b: bool) -> Self {
        JValue::Bool(b)
    }
}

impl From<i64> for JValue {
    #[inline]
    fn from(n: i64) -> Self {
        JValue::Number(n as f64)
    }
}

impl From<i32> for JValue {
    #[inline]
    fn from(n: i32) -> Self {
        JValue::Number(n as f64)
    }
}

impl From<usize> for JValue {
    #[inline]
    fn from(n: usize) -> Self {
        JValue::Number(n as f64)
    }
}

impl From<f64> for JValue {
    #[inline]
    fn from(n: f64) -> Self {
        JValue::Number(n)
    }
}

impl From<&str> for JValue {
    #[inline]
    fn from(s: &str) -> Self {
        JValue::String(s.into())
    }
}

impl From<String> for JValue {
    #[inline]
    fn from(s: String) -> Self {
        JValue::String(s.into())
    }
}

impl From<Arc<str>> for JValue {
    #[inline]
    fn from(s: Arc<str>) -> Self {
        JValue::String(s)
    }
}

impl From<Vec<JValue>> for JValue {
    #[inline]
    fn from(v: Vec<JValue>) -> Self {
        JValue::Array(Arc::new(v))
    }
}

impl From<IndexMap<String, JValue>> for JValue {
    #[inline]
    fn from(m: IndexMap<String, JValue>) -> Self {
        JValue::Object(Arc::new(m))
    }
}

impl FromIterator<JValue> for JValue {
    fn from_iter<I: IntoIterator<Item = JValue>>(iter: I) -> Self {
        JValue::array(iter.into_iter().collect())
    }
}

// ── Equality and ordering ────────────────────────────────────────────────────

impl PartialEq for JValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JValue::Null, JValue::Null) => true,
            (JValue::Bool(a), JValue::Bool(b)) => a == b,
            // NaN != NaN
            (JValue::Number(a), JValue::Number(b)) => a == b,
            (JValue::String(a), JValue::String(b)) => a == b,
            (JValue::Array(a), JValue::Array(b)) => Arc::ptr_eq(a, b) || a == b,
            // IndexMap equality ignores insertion order
            (JValue::Object(a), JValue::Object(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl JValue {
    /// Total order over all values:
    /// `null < false < true < numbers < strings < arrays < objects`.
    ///
    /// Arrays compare lexicographically. Objects compare their sorted key
    /// lists first, then their values in sorted-key order. NaN sorts below
    /// every other number.
    pub fn compare(&self, other: &JValue) -> Ordering {
        match (self, other) {
            (JValue::Number(a), JValue::Number(b)) => compare_numbers(*a, *b),
            (JValue::String(a), JValue::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (JValue::Array(a), JValue::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y) {
                        Ordering::Equal => continue,
                        ord => return ord,
                    }
                }
                a.len().cmp(&b.len())
            }
            (JValue::Object(a), JValue::Object(b)) => {
                let mut ka: Vec<&String> = a.keys().collect();
                let mut kb: Vec<&String> = b.keys().collect();
                ka.sort();
                kb.sort();
                match ka.cmp(&kb) {
                    Ordering::Equal => {}
                    ord => return ord,
                }
                for key in ka {
                    match (a.get(key), b.get(key)) {
                        (Some(x), Some(y)) => match x.compare(y) {
                            Ordering::Equal => continue,
                            ord => return ord,
                        },
                        _ => continue,
                    }
                }
                Ordering::Equal
            }
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }
}

fn compare_numbers(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

impl PartialOrd for JValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

// ── Display ──────────────────────────────────────────────────────────────────

impl fmt::Display for JValue {
    /// Compact JSON text.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

// ── Serialization ────────────────────────────────────────────────────────────

fn serialize_number<S: Serializer>(n: f64, serializer: S) -> Result<S::Ok, S::Error> {
    if n.is_nan() {
        serializer.serialize_none()
    } else if n.is_infinite() {
        // Clamp to the largest finite double so the output stays valid JSON.
        serializer.serialize_f64(if n > 0.0 { f64::MAX } else { f64::MIN })
    } else if n.fract() == 0.0 && n.abs() < INTEGER_PRINT_LIMIT {
        serializer.serialize_i64(n as i64)
    } else {
        serializer.serialize_f64(n)
    }
}

impl Serialize for JValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            JValue::Null => serializer.serialize_none(),
            JValue::Bool(b) => serializer.serialize_bool(*b),
            JValue::Number(n) => serialize_number(*n, serializer),
            JValue::String(s) => serializer.serialize_str(s),
            JValue::Array(arr) => with_stack(|| {
                let mut seq = serializer.serialize_seq(Some(arr.len()))?;
                for v in arr.iter() {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }),
            JValue::Object(map) => with_stack(|| {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map.iter() {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }),
        }
    }
}

/// Serializes a value with every object's keys in sorted order, recursively.
pub struct SortedKeys<'a>(pub &'a JValue);

impl Serialize for SortedKeys<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0 {
            JValue::Array(arr) => with_stack(|| {
                let mut seq = serializer.serialize_seq(Some(arr.len()))?;
                for v in arr.iter() {
                    seq.serialize_element(&SortedKeys(v))?;
                }
                seq.end()
            }),
            JValue::Object(map) => with_stack(|| {
                let mut entries: Vec<(&String, &JValue)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut m = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    m.serialize_entry(k, &SortedKeys(v))?;
                }
                m.end()
            }),
            other => other.serialize(serializer),
        }
    }
}

// ── Deserialization (single-pass JSON→JValue) ────────────────────────────────

impl<'de> serde::Deserialize<'de> for JValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Nested { depth: 0 }.deserialize(deserializer)
    }
}

/// Seed for a value inside `depth` enclosing arrays or objects.
#[derive(Clone, Copy)]
struct Nested {
    depth: usize,
}

impl<'de> DeserializeSeed<'de> for Nested {
    type Value = JValue;

    fn deserialize<D>(self, deserializer: D) -> Result<JValue, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(JValueVisitor { depth: self.depth })
    }
}

struct JValueVisitor {
    depth: usize,
}

impl JValueVisitor {
    /// Seed for the elements of the container being visited.
    fn elements<E: de::Error>(&self) -> Result<Nested, E> {
        if self.depth >= MAX_PARSE_DEPTH {
            return Err(E::custom("Exceeds depth limit for parsing"));
        }
        Ok(Nested { depth: self.depth + 1 })
    }
}

impl<'de> Visitor<'de> for JValueVisitor {
    type Value = JValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "any valid JSON value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<JValue, E> {
        Ok(JValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<JValue, E> {
        Ok(JValue::Number(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<JValue, E> {
        Ok(JValue::Number(v as f64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<JValue, E> {
        Ok(JValue::Number(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<JValue, E> {
        Ok(JValue::string(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<JValue, E> {
        Ok(JValue::String(v.into()))
    }

    fn visit_none<E: de::Error>(self) -> Result<JValue, E> {
        Ok(JValue::Null)
    }

    fn visit_unit<E: de::Error>(self) -> Result<JValue, E> {
        Ok(JValue::Null)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<JValue, A::Error> {
        let seed = self.elements()?;
        let mut vec = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(elem) = seq.next_element_seed(seed)? {
            vec.push(elem);
        }
        Ok(JValue::array(vec))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<JValue, A::Error> {
        // Duplicate keys: last write wins, first position kept.
        let seed = self.elements()?;
        let mut m = IndexMap::with_capacity(map.size_hint().unwrap_or(0));
        while let Some(k) = map.next_key::<String>()? {
            let v = map.next_value_seed(seed)?;
            m.insert(k, v);
        }
        Ok(JValue::object(m))
    }
}

// ── JSON string I/O ──────────────────────────────────────────────────────────

/// Layout options for rendering a value as text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStyle {
    /// Two-space indented output instead of a single line.
    pub pretty: bool,
    /// Emit object keys in sorted order.
    pub sort_keys: bool,
    /// Emit a top-level string without quotes or escapes.
    pub raw: bool,
}

impl JValue {
    /// Serialize to a compact JSON string.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to a pretty-printed JSON string (two-space indent).
    pub fn to_json_string_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Render according to `style`.
    pub fn render(&self, style: RenderStyle) -> Result<String, serde_json::Error> {
        if style.raw {
            if let JValue::String(s) = self {
                return Ok(s.to_string());
            }
        }
        match (style.pretty, style.sort_keys) {
            (false, false) => serde_json::to_string(self),
            (true, false) => serde_json::to_string_pretty(self),
            (false, true) => serde_json::to_string(&SortedKeys(self)),
            (true, true) => serde_json::to_string_pretty(&SortedKeys(self)),
        }
    }

    /// Parse a JSON string into a JValue (single-pass, no intermediate serde_json::Value).
    ///
    /// Nesting is limited by `MAX_PARSE_DEPTH` rather than the native stack.
    /// Numbers beyond the double range read as the largest finite double of
    /// that sign, and unpaired surrogate escapes read as U+FFFD.
    ///
    /// With the `simd` feature, simd-json is tried first and serde_json is the
    /// fallback, so error messages always come from serde_json.
    pub fn from_json_str(s: &str) -> Result<JValue, serde_json::Error> {
        #[cfg(feature = "simd")]
        {
            let mut bytes = s.as_bytes().to_vec();
            if let Ok(value) = simd_json::serde::from_slice::<JValue>(&mut bytes) {
                return Ok(value);
            }
        }
        match parse_json(s) {
            Ok(value) => Ok(value),
            Err(e) => match lenient_json(s) {
                Cow::Owned(fixed) => parse_json(&fixed),
                Cow::Borrowed(_) => Err(e),
            },
        }
    }
}

fn parse_json(s: &str) -> Result<JValue, serde_json::Error> {
    let mut de = serde_json::Deserializer::from_str(s);
    de.disable_recursion_limit();
    let value = JValue::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(value)
}

/// Copy of a source text with some byte ranges replaced.
struct Rewrite<'s> {
    src: &'s str,
    out: String,
    copied: usize,
}

impl<'s> Rewrite<'s> {
    fn splice(&mut self, start: usize, end: usize, text: &str) {
        self.out.push_str(&self.src[self.copied..start]);
        self.out.push_str(text);
        self.copied = end;
    }

    fn finish(mut self) -> Cow<'s, str> {
        if self.copied == 0 {
            return Cow::Borrowed(self.src);
        }
        self.out.push_str(&self.src[self.copied..]);
        Cow::Owned(self.out)
    }
}

fn hex_unit(s: &str, at: usize) -> Option<u32> {
    let digits = s.get(at..at + 4)?;
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

/// Rewrites the JSON serde_json rejects but jq reads: out-of-range numbers
/// become `±DBL_MAX_TEXT`, unpaired surrogate escapes become `\ufffd`.
/// Borrowed when there is nothing to rewrite.
fn lenient_json(s: &str) -> Cow<'_, str> {
    let high = 0xD800..0xDC00;
    let low = 0xDC00..0xE000;
    let bytes = s.as_bytes();
    let mut rw = Rewrite {
        src: s,
        out: String::with_capacity(s.len()),
        copied: 0,
    };
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] != b'\\' {
                        i += 1;
                        continue;
                    }
                    if bytes.get(i + 1) != Some(&b'u') {
                        i += 2;
                        continue;
                    }
                    match hex_unit(s, i + 2) {
                        Some(unit) if high.contains(&unit) => {
                            let paired = s.get(i + 6..i + 8) == Some("\\u")
                                && hex_unit(s, i + 8).is_some_and(|u| low.contains(&u));
                            if paired {
                                i += 12;
                            } else {
                                rw.splice(i, i + 6, "\\ufffd");
                                i += 6;
                            }
                        }
                        Some(unit) if low.contains(&unit) => {
                            rw.splice(i, i + 6, "\\ufffd");
                            i += 6;
                        }
                        _ => i += 2,
                    }
                }
                i += 1;
            }
            b'-' | b'0'..=b'9' => {
                let start = i;
                i += 1;
                while i < bytes.len() && matches!(bytes[i], b'0'..=b'9' | b'.' | b'e' | b'E' | b'+' | b'-') {
                    i += 1;
                }
                if let Ok(n) = s[start..i].parse::<f64>() {
                    if n.is_infinite() {
                        let text = if n > 0.0 { DBL_MAX_TEXT.to_string() } else { format!("-{}", DBL_MAX_TEXT) };
                        rw.splice(start, i, &text);
                    }
                }
            }
            _ => i += 1,
        }
    }
    rw.finish()
}

// ── Conversion from serde_json::Value ────────────────────────────────────────

impl From<serde_json::Value> for JValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => JValue::Null,
            serde_json::Value::Bool(b) => JValue::Bool(b),
            serde_json::Value::Number(n) => JValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => JValue::String(s.into()),
            serde_json::Value::Array(arr) => {
                JValue::Array(Arc::new(arr.into_iter().map(JValue::from).collect()))
            }
            serde_json::Value::Object(map) => {
                let m: IndexMap<String, JValue> =
                    map.into_iter().map(|(k, v)| (k, JValue::from(v))).collect();
                JValue::Object(Arc::new(m))
            }
        }
    }
}

// ── jvalue! macro ────────────────────────────────────────────────────────────

/// Macro for constructing JValue literals, similar to serde_json::json!
///
/// Usage:
///   jvalue!(null)           → JValue::Null
///   jvalue!(true)           → JValue::Bool(true)
///   jvalue!(42)             → JValue::Number(42.0)
///   jvalue!("hello")        → JValue::String(Arc::from("hello"))
///   jvalue!([1, 2, 3])      → JValue::Array(Arc::new(vec![...]))
///   jvalue!({"k": v, ...})  → JValue::Object(Arc::new(IndexMap from pairs))
///   jvalue!(expr)           → JValue::from(expr)
#[macro_export]
macro_rules! jvalue {
    (null) => {
        $crate::value::JValue::Null
    };

    (true) => {
        $crate::value::JValue::Bool(true)
    };

    (false) => {
        $crate::value::JValue::Bool(false)
    };

    (@array [$($done:expr,)*]) => {
        $crate::value::JValue::Array(std::sync::Arc::new(vec![$($done,)*]))
    };
    (@array [$($done:expr,)*] - $num:tt $(, $($rest:tt)*)?) => {
        $crate::jvalue!(@array [$($done,)* $crate::jvalue!(-$num),] $($($rest)*)?)
    };
    (@array [$($done:expr,)*] $elem:tt $(, $($rest:tt)*)?) => {
        $crate::jvalue!(@array [$($done,)* $crate::jvalue!($elem),] $($($rest)*)?)
    };

    (@object $map:ident) => {};
    (@object $map:ident $key:tt : - $num:tt $(, $($rest:tt)*)?) => {
        $map.insert(($key).to_string(), $crate::jvalue!(-$num));
        $crate::jvalue!(@object $map $($($rest)*)?);
    };
    (@object $map:ident $key:tt : $val:tt $(, $($rest:tt)*)?) => {
        $map.insert(($key).to_string(), $crate::jvalue!($val));
        $crate::jvalue!(@object $map $($($rest)*)?);
    };

    ([ $($tt:tt)* ]) => {
        $crate::jvalue!(@array [] $($tt)*)
    };

    ({ $($tt:tt)* }) => {
        {
            #[allow(unused_mut)]
            let mut map = indexmap::IndexMap::new();
            $crate::jvalue!(@object map $($tt)*);
            $crate::value::JValue::Object(std::sync::Arc::new(map))
        }
    };

    ($other:expr) => {
        $crate::value::JValue::from($other)
    };
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_is_cheap() {
        let arr = JValue::array(vec![JValue::from(1i64), JValue::from(2i64)]);
        let arr2 = arr.clone();
        if let (JValue::Array(a), JValue::Array(b)) = (&arr, &arr2) {
            assert!(Arc::ptr_eq(a, b));
        } else {
            panic!("expected arrays");
        }

        let s = JValue::string("hello");
        let s2 = s.clone();
        if let (JValue::String(a), JValue::String(b)) = (&s, &s2) {
            assert!(Arc::ptr_eq(a, b));
        } else {
            panic!("expected strings");
        }
    }

    #[test]
    fn test_type_names_and_truthiness() {
        assert_eq!(JValue::Null.type_name(), "null");
        assert_eq!(JValue::Bool(true).type_name(), "boolean");
        assert_eq!(jvalue!([]).type_name(), "array");
        assert_eq!(jvalue!({}).type_name(), "object");
        assert!(!JValue::Null.is_truthy());
        assert!(!JValue::Bool(false).is_truthy());
        assert!(JValue::Number(0.0).is_truthy());
        assert!(JValue::string("").is_truthy());
    }

    #[test]
    fn test_total_order() {
        let ordered = [
            jvalue!(null),
            jvalue!(false),
            jvalue!(true),
            jvalue!(0),
            jvalue!("a"),
            jvalue!([]),
            jvalue!({}),
        ];
        for (i, a) in ordered.iter().enumerate() {
            for (j, b) in ordered.iter().enumerate() {
                assert_eq!(a.compare(b), i.cmp(&j), "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_object_order_uses_sorted_keys() {
        let a = jvalue!({"b": 1, "a": 2});
        let b = jvalue!({"a": 1, "c": 0});
        // ["a","b"] < ["a","c"]
        assert_eq!(a.compare(&b), Ordering::Less);
        let c = jvalue!({"a": 1, "b": 2});
        assert_eq!(c.compare(&a), Ordering::Less);
    }

    #[test]
    fn test_equality() {
        assert_eq!(JValue::Number(42.0), JValue::Number(42.0));
        assert_ne!(JValue::Number(f64::NAN), JValue::Number(f64::NAN));
        assert_eq!(jvalue!({"a": 1, "b": 2}), jvalue!({"b": 2, "a": 1}));
        assert_ne!(jvalue!([1, 2]), jvalue!([2, 1]));
    }

    #[test]
    fn test_number_rendering() {
        assert_eq!(jvalue!(1.0).to_string(), "1");
        assert_eq!(jvalue!(-3.0).to_string(), "-3");
        assert_eq!(jvalue!(1.5).to_string(), "1.5");
        assert_eq!(jvalue!(0.1).to_string(), "0.1");
        assert_eq!(JValue::Number(f64::NAN).to_string(), "null");
        assert_eq!(JValue::Number(1e100).to_string(), "1e+100");
    }

    #[test]
    fn test_render_styles() {
        let v = jvalue!({"z": 1, "a": [1, {"y": 2, "b": 3}]});
        let compact = v.render(RenderStyle::default()).unwrap();
        assert_eq!(compact, r#"{"z":1,"a":[1,{"y":2,"b":3}]}"#);

        let sorted = v
            .render(RenderStyle { sort_keys: true, ..Default::default() })
            .unwrap();
        assert_eq!(sorted, r#"{"a":[1,{"b":3,"y":2}],"z":1}"#);

        let pretty = jvalue!({"a": [1, 2]})
            .render(RenderStyle { pretty: true, ..Default::default() })
            .unwrap();
        assert_eq!(pretty, "{\n  \"a\": [\n    1,\n    2\n  ]\n}");

        let raw = jvalue!("a\"b")
            .render(RenderStyle { raw: true, ..Default::default() })
            .unwrap();
        assert_eq!(raw, "a\"b");
    }

    #[test]
    fn test_serde_roundtrip() {
        let v = jvalue!({"name": "Alice", "scores": [1, 2, 3], "active": true});
        let json_str = v.to_json_string().unwrap();
        let parsed = JValue::from_json_str(&json_str).unwrap();
        assert_eq!(v, parsed);
    }

    #[test]
    fn test_duplicate_keys_last_wins() {
        let v = JValue::from_json_str(r#"{"a":1,"b":2,"a":3}"#).unwrap();
        assert_eq!(v.to_string(), r#"{"a":3,"b":2}"#);
    }

    #[test]
    fn test_make_mut_copies_on_write() {
        let mut arr = jvalue!([1, 2]);
        let arr2 = arr.clone();
        arr.as_array_mut().unwrap().push(JValue::from(3i64));
        assert_eq!(arr.as_array().unwrap().len(), 3);
        assert_eq!(arr2.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_lenient_json_rewrites() {
        assert!(matches!(lenient_json(r#"{"a":[1,2.5e3]}"#), Cow::Borrowed(_)));
        assert_eq!(lenient_json("[1e400,-2E+999,3]"), "[1.7976931348623157e308,-1.7976931348623157e308,3]");
        assert_eq!(lenient_json(r#"["1e400","\ud800x"]"#), r#"["1e400","\ufffdx"]"#);
        assert_eq!(lenient_json(r#""\\ud800""#), r#""\\ud800""#);
        assert_eq!(lenient_json(r#""\ud83d\ude00""#), r#""\ud83d\ude00""#);
    }

    #[test]
    fn test_parse_depth() {
        let nested = |n: usize| format!("{}{}", "[".repeat(n), "]".repeat(n));
        // Dropping the parsed value recurses once per level.
        let deepest = nested(MAX_PARSE_DEPTH);
        let parsed = std::thread::Builder::new()
            .stack_size(64 << 20)
            .spawn(move || JValue::from_json_str(&deepest).is_ok())
            .unwrap()
            .join()
            .unwrap();
        assert!(parsed);
        let err = JValue::from_json_str(&nested(MAX_PARSE_DEPTH + 1)).unwrap_err();
        assert!(err.to_string().contains("Exceeds depth limit for parsing"), "{}", err);
    }
}
