use serde::ser::SerializeMap;

use crate::Error;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<FieldValue>),
    Object(Record),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(|s| Self::String(s.into())).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Non-empty string content, trimmed.
    pub fn as_non_empty_str(&self) -> Option<&str> {
        self.as_str().map(str::trim).filter(|s| !s.is_empty())
    }

    /// String items of a list; a bare string counts as a one-item list.
    pub fn string_items(&self) -> Vec<String> {
        match self {
            Self::List(items) => items
                .iter()
                .filter_map(|v| v.as_non_empty_str().map(str::to_string))
                .collect(),
            Self::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
            _ => Vec::new(),
        }
    }
}

/// Ordered header record. Keys keep the order they were read or inserted in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entries: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Replaces the value in place if the key exists, otherwise appends.
    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        let key = key.into();
        if let Some((_, slot)) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(slot, value));
        }
        self.entries.push((key, value));
        None
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        let ix = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(ix).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, FieldValue)>>(iter: T) -> Self {
        let mut out = Record::new();
        for (k, v) in iter {
            out.insert(k, v);
        }
        out
    }
}

impl IntoIterator for Record {
    type Item = (String, FieldValue);
    type IntoIter = std::vec::IntoIter<(String, FieldValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl serde::Serialize for Record {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

pub fn yaml_to_field_value(v: &serde_yaml::Value) -> FieldValue {
    match v {
        serde_yaml::Value::Null => FieldValue::Null,
        serde_yaml::Value::Bool(b) => FieldValue::Bool(*b),
        serde_yaml::Value::Number(n) => FieldValue::Number(n.as_f64().unwrap_or(0.0)),
        serde_yaml::Value::String(s) => FieldValue::String(s.clone()),
        serde_yaml::Value::Sequence(seq) => {
            FieldValue::List(seq.iter().map(yaml_to_field_value).collect())
        }
        serde_yaml::Value::Mapping(map) => {
            let mut out = Record::new();
            for (k, v) in map {
                let Ok(k) = yaml_key(k) else {
                    continue;
                };
                out.insert(k, yaml_to_field_value(v));
            }
            FieldValue::Object(out)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_field_value(&tagged.value),
    }
}

/// Converts a top-level YAML mapping into a record, keeping key order.
pub fn yaml_to_record(header: &serde_yaml::Value) -> Result<Record, Error> {
    let map = match header {
        serde_yaml::Value::Null => return Ok(Record::new()),
        serde_yaml::Value::Mapping(map) => map,
        _ => return Err(Error::parse("header is not a key/value mapping")),
    };

    let mut out = Record::new();
    for (k, v) in map {
        let key = yaml_key(k)?;
        if out.contains_key(&key) {
            return Err(Error::parse(format!("duplicate header key `{key}`")));
        }
        out.insert(key, yaml_to_field_value(v));
    }
    Ok(out)
}

/// Scalar keys, trimmed. Keys differing only in surrounding space collide.
fn yaml_key(k: &serde_yaml::Value) -> Result<String, Error> {
    let key = match k {
        serde_yaml::Value::String(s) => s.trim().to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        _ => return Err(Error::parse("header keys must be scalars")),
    };
    if key.is_empty() {
        return Err(Error::parse("header key must not be empty"));
    }
    Ok(key)
}
