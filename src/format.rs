// Output formats
// The `@name` filters and the escaping they apply inside interpolated strings

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

use crate::utils::{describe, to_text};
use crate::value::JValue;
use crate::vm::Exn;

/// Standard alphabet; decoding accepts input with or without padding.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Format {
    Text,
    Json,
    Html,
    Uri,
    Csv,
    Tsv,
    Sh,
    Base64,
    Base64d,
}

impl Format {
    /// Format for `@name`, without the `@`.
    pub(crate) fn from_name(name: &str) -> Option<Format> {
        Some(match name {
            "text" => Format::Text,
            "json" => Format::Json,
            "html" => Format::Html,
            "uri" => Format::Uri,
            "csv" => Format::Csv,
            "tsv" => Format::Tsv,
            "sh" => Format::Sh,
            "base64" => Format::Base64,
            "base64d" => Format::Base64d,
            _ => return None,
        })
    }

    pub(crate) fn apply(&self, value: &JValue) -> Result<String, Exn> {
        match self {
            Format::Text => Ok(to_text(value)),
            Format::Json => Ok(value.to_string()),
            Format::Html => Ok(html(&to_text(value))),
            Format::Uri => Ok(uri(&to_text(value))),
            Format::Csv => row(value, "csv", ",", csv_field),
            Format::Tsv => row(value, "tsv", "\t", tsv_field),
            Format::Sh => match value {
                JValue::Array(items) => {
                    let quoted = items.iter().map(sh_word).collect::<Result<Vec<_>, _>>()?;
                    Ok(quoted.join(" "))
                }
                other => sh_word(other),
            },
            Format::Base64 => Ok(BASE64.encode(to_text(value))),
            Format::Base64d => {
                let text = to_text(value);
                let bytes = BASE64
                    .decode(text.trim_end())
                    .map_err(|_| Exn::msg(format!("{} is not valid base64 data", describe(value))))?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
        }
    }
}

fn html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

fn uri(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn row(value: &JValue, name: &str, sep: &str, field: fn(&JValue) -> Option<String>) -> Result<String, Exn> {
    let JValue::Array(items) = value else {
        return Err(Exn::msg(format!(
            "{} cannot be {}-formatted, only an array can be",
            describe(value),
            name
        )));
    };
    let fields = items
        .iter()
        .map(|item| {
            field(item).ok_or_else(|| Exn::msg(format!("{} is not valid in a {} row", describe(item), name)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(fields.join(sep))
}

/// Scalars other than strings, as they appear in a csv or tsv row.
fn plain_field(value: &JValue) -> Option<String> {
    match value {
        JValue::Null => Some(String::new()),
        JValue::Bool(_) | JValue::Number(_) => Some(value.to_string()),
        _ => None,
    }
}

fn csv_field(value: &JValue) -> Option<String> {
    match value {
        JValue::String(s) => Some(format!("\"{}\"", s.replace('"', "\"\""))),
        other => plain_field(other),
    }
}

fn tsv_field(value: &JValue) -> Option<String> {
    match value {
        JValue::String(s) => {
            let mut out = String::with_capacity(s.len());
            for c in s.chars() {
                match c {
                    '\\' => out.push_str("\\\\"),
                    '\t' => out.push_str("\\t"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    c => out.push(c),
                }
            }
            Some(out)
        }
        other => plain_field(other),
    }
}

fn sh_word(value: &JValue) -> Result<String, Exn> {
    match value {
        JValue::String(s) => Ok(format!("'{}'", s.replace('\'', "'\\''"))),
        JValue::Array(_) | JValue::Object(_) => Err(Exn::msg(format!(
            "{} can not be escaped for shell",
            describe(value)
        ))),
        other => Ok(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvalue;

    fn apply(name: &str, value: JValue) -> String {
        Format::from_name(name).unwrap().apply(&value).unwrap()
    }

    fn apply_err(name: &str, value: JValue) -> String {
        match Format::from_name(name).unwrap().apply(&value) {
            Err(Exn::Error(JValue::String(msg))) => msg.to_string(),
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Format::from_name("csv"), Some(Format::Csv));
        assert_eq!(Format::from_name("base32"), None);
    }

    #[test]
    fn test_text_and_json() {
        assert_eq!(apply("text", jvalue!("a\"b")), "a\"b");
        assert_eq!(apply("json", jvalue!("a\"b")), "\"a\\\"b\"");
        assert_eq!(apply("text", jvalue!([1, null])), "[1,null]");
    }

    #[test]
    fn test_html_and_uri() {
        assert_eq!(apply("html", jvalue!("<a href='x'>&</a>")), "&lt;a href=&#39;x&#39;&gt;&amp;&lt;/a&gt;");
        assert_eq!(apply("uri", jvalue!("a b/ü~")), "a%20b%2F%C3%BC~");
    }

    #[test]
    fn test_csv_and_tsv() {
        assert_eq!(apply("csv", jvalue!([1, "a\"b", null, true])), "1,\"a\"\"b\",,true");
        assert_eq!(apply("tsv", jvalue!(["a\tb", "c\\d", 2])), "a\\tb\tc\\\\d\t2");
        assert_eq!(apply_err("csv", jvalue!([[1]])), "array ([1]) is not valid in a csv row");
        assert_eq!(
            apply_err("tsv", jvalue!("x")),
            "string (\"x\") cannot be tsv-formatted, only an array can be"
        );
    }

    #[test]
    fn test_sh() {
        assert_eq!(apply("sh", jvalue!("it's")), "'it'\\''s'");
        assert_eq!(apply("sh", jvalue!(["a b", 1, null])), "'a b' 1 null");
        assert_eq!(apply_err("sh", jvalue!([{}])), "object ({}) can not be escaped for shell");
    }

    #[test]
    fn test_base64() {
        assert_eq!(apply("base64", jvalue!("hello")), "aGVsbG8=");
        assert_eq!(apply("base64d", jvalue!("aGVsbG8=")), "hello");
        assert_eq!(apply("base64d", jvalue!("aGVsbG8")), "hello");
        assert_eq!(apply_err("base64d", jvalue!("!!")), "string (\"!!\") is not valid base64 data");
    }
}
