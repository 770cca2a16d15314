//! Header block codec: `---` fenced key/value lines at the top of a document.

use std::fmt::Write as _;

use crate::fields::yaml_to_record;
use crate::{Error, FieldValue, Record, Result};

/// A document split into its header record and untouched body text.
#[derive(Debug, Clone, PartialEq)]
pub struct Document<'a> {
    pub record: Record,
    pub has_header: bool,
    pub body: &'a str,
}

/// Splits `text` into header record and body. A document without a header is
/// an empty record plus the whole text as body.
pub fn parse(text: &str) -> Result<Document<'_>> {
    let Some(rest) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    else {
        return Ok(Document {
            record: Record::new(),
            has_header: false,
            body: text,
        });
    };

    let mut idx = 0usize;
    while idx < rest.len() {
        let line_end = match rest[idx..].find('\n') {
            Some(off) => idx + off + 1,
            None => rest.len(),
        };
        let line = rest[idx..line_end].trim_end_matches(['\r', '\n']);
        if line == "---" {
            let header_text = &rest[..idx];
            let body = &rest[line_end..];
            let value: serde_yaml::Value =
                serde_yaml::from_str(header_text).map_err(|err| Error::parse(err.to_string()))?;
            let record = yaml_to_record(&value)?;
            return Ok(Document {
                record,
                has_header: true,
                body,
            });
        }
        idx = line_end;
    }

    Err(Error::parse("header fence not closed"))
}

/// Writes fields named in `order` first, then the remaining fields in record order.
pub fn serialize(record: &Record, order: &[&str], body: &str) -> String {
    if record.is_empty() {
        return body.to_string();
    }

    let mut out = String::from("---\n");
    for name in order {
        if let Some(value) = record.get(name) {
            write_field(&mut out, name, value);
        }
    }
    for (name, value) in record.iter() {
        if !order.contains(&name) {
            write_field(&mut out, name, value);
        }
    }
    out.push_str("---\n");
    out.push_str(body);
    out
}

/// Re-renders `text` with a transformed header, leaving the body byte-for-byte intact.
/// Returns `None` when the transform leaves the record unchanged.
pub fn rewrite_header(
    text: &str,
    transform: &mut dyn FnMut(&mut Record) -> Result<()>,
) -> Result<Option<String>> {
    let doc = parse(text)?;
    let mut record = doc.record.clone();
    transform(&mut record)?;
    if record == doc.record {
        return Ok(None);
    }
    Ok(Some(serialize(&record, &[], doc.body)))
}

fn write_field(out: &mut String, name: &str, value: &FieldValue) {
    out.push_str(&render_scalar_str(name));
    out.push(':');
    if value.is_null() {
        out.push('\n');
        return;
    }
    out.push(' ');
    render_value(out, value, false);
    out.push('\n');
}

fn render_value(out: &mut String, value: &FieldValue, in_flow: bool) {
    match value {
        FieldValue::Null => out.push_str("null"),
        FieldValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        FieldValue::Number(n) => render_number(out, *n),
        FieldValue::String(s) if in_flow => out.push_str(&quote(s)),
        FieldValue::String(s) => out.push_str(&render_scalar_str(s)),
        FieldValue::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_value(out, item, true);
            }
            out.push(']');
        }
        FieldValue::Object(record) => {
            out.push('{');
            for (i, (k, v)) in record.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&quote(k));
                out.push_str(": ");
                render_value(out, v, true);
            }
            out.push('}');
        }
    }
}

fn render_number(out: &mut String, n: f64) {
    if n.is_nan() {
        out.push_str(".nan");
    } else if n.is_infinite() {
        out.push_str(if n > 0.0 { ".inf" } else { "-.inf" });
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        let _ = write!(out, "{}", n as i64);
    } else {
        let _ = write!(out, "{n}");
    }
}

/// Plain when the text reads back as the very same string, quoted otherwise.
fn render_scalar_str(s: &str) -> String {
    if is_plain_safe(s) {
        s.to_string()
    } else {
        quote(s)
    }
}

fn is_plain_safe(s: &str) -> bool {
    if s.is_empty() || s.trim() != s || s.contains(['\n', '\r', '\t']) {
        return false;
    }
    matches!(
        serde_yaml::from_str::<serde_yaml::Value>(s),
        Ok(serde_yaml::Value::String(ref parsed)) if parsed == s
    )
}

fn quote(s: &str) -> String {
    // JSON string escapes are a subset of YAML double-quoted escapes.
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s.replace('"', "\\\"")))
}
