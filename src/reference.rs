//! Cross-reference tokens (`[[Folder/File|Name]]`) and file-name sanitizing.

use std::sync::LazyLock;

use regex::Regex;

static FORBIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[*"\\/<>:|?#]+"#).unwrap_or_else(|e| panic!("forbidden-char regex: {e}"))
});
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").unwrap_or_else(|e| panic!("whitespace regex: {e}")));

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct SanitizeOptions {
    /// Replaces each run of forbidden characters.
    pub separator: char,
    /// Maximum file name length in characters.
    pub max_length: usize,
    /// Used when nothing is left after sanitizing.
    pub fallback: String,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            separator: '-',
            max_length: 200,
            fallback: "Untitled".into(),
        }
    }
}

/// Turns an entity name into a safe file stem.
pub fn sanitize_file_name(name: &str, opts: &SanitizeOptions) -> String {
    let sep = opts.separator.to_string();
    let replaced = FORBIDDEN.replace_all(name, sep.as_str());
    let collapsed = WHITESPACE.replace_all(&replaced, " ");

    // Runs like "- -" left over from mixed separators and spaces.
    let mut out = String::with_capacity(collapsed.len());
    for c in collapsed.chars() {
        if c == opts.separator && out.ends_with(opts.separator) {
            continue;
        }
        out.push(c);
    }

    let trim = |s: &str| {
        s.trim_matches(|c: char| c.is_whitespace() || c == opts.separator || c == '.')
            .to_string()
    };
    let mut out = trim(&out);
    if out.chars().count() > opts.max_length {
        out = trim(&out.chars().take(opts.max_length).collect::<String>());
    }
    if out.is_empty() {
        return opts.fallback.clone();
    }
    out
}

pub fn is_reference(token: &str) -> bool {
    let t = token.trim();
    t.starts_with("[[") && t.ends_with("]]") && t.len() >= 4
}

/// Formats `name` as a link into `folder`. Tokens that are already wrapped
/// pass through unchanged, so the operation is idempotent.
pub fn to_reference(name: &str, folder: &str, opts: &SanitizeOptions) -> String {
    let trimmed = name.trim();
    if is_reference(trimmed) {
        return trimmed.to_string();
    }
    let file = sanitize_file_name(name, opts);
    let folder = folder.trim().trim_matches('/');
    if folder.is_empty() {
        format!("[[{file}|{name}]]")
    } else {
        format!("[[{folder}/{file}|{name}]]")
    }
}

/// Recovers the plain entity name: the alias when present, else the last path
/// segment without its extension. Plain strings are returned trimmed.
pub fn from_reference(token: &str) -> String {
    let t = token.trim();
    if !is_reference(t) {
        return t.to_string();
    }
    let inner = &t[2..t.len() - 2];
    if let Some((_, alias)) = inner.split_once('|') {
        return alias.to_string();
    }
    let target = inner.split_once('#').map(|(l, _)| l).unwrap_or(inner);
    let last = target.rsplit('/').next().unwrap_or(target).trim();
    last.strip_suffix(".md").unwrap_or(last).to_string()
}
