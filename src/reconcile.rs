//! Schema reconciliation: migrate a header record toward the canonical
//! schema of its kind while keeping third-party data intact.

use crate::registry::{PROPERTIES, TYPE};
use crate::{EntityKind, EntitySchema, Error, FieldValue, Record, Result};

/// Keys no reconciliation ever removes, on top of any configured keys.
pub const ALWAYS_PRESERVED: &[&str] = &["tags", "aliases", "cssclasses", "publish"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    Added(String),
    Removed(String),
    /// Schema fields were out of canonical order. Counted once.
    Reordered,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub record: Record,
    pub changes: Vec<SchemaChange>,
    /// `Type` value of a record that belongs to another kind. The record is
    /// returned untouched.
    pub wrong_kind: Option<String>,
}

impl Reconciliation {
    pub fn changed(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }
}

/// The raw `Type` value, if the record declares one.
pub fn declared_type(record: &Record) -> Option<String> {
    match record.get(TYPE.name)? {
        FieldValue::Null => None,
        FieldValue::String(s) if s.trim().is_empty() => None,
        FieldValue::String(s) => Some(s.clone()),
        FieldValue::List(items) => items
            .iter()
            .find_map(|v| v.as_non_empty_str().map(str::to_string)),
        other => Some(format!("{other:?}")),
    }
}

/// Returns the `Type` value when it names a kind other than `kind`.
pub fn kind_mismatch(record: &Record, kind: EntityKind) -> Option<String> {
    let raw = declared_type(record)?;
    match EntityKind::parse(&raw) {
        Some(k) if k == kind => None,
        _ => Some(raw),
    }
}

/// Whether reconciliation may drop `key` from a record of this schema.
///
/// Only engine-owned keys are candidates: names from the property registry
/// and names the schema lists as retired. Unknown keys belong to the user or
/// another tool and are kept.
fn is_obsolete(key: &str, schema: &EntitySchema, preserve_keys: &[String]) -> bool {
    if schema.contains(key)
        || ALWAYS_PRESERVED.contains(&key)
        || preserve_keys.iter().any(|k| k == key)
    {
        return false;
    }
    PROPERTIES.iter().any(|p| p.name == key) || schema.is_retired(key)
}

/// Pure: no I/O, same inputs give the same output.
pub fn reconcile(
    existing: &Record,
    schema: &EntitySchema,
    preserve_keys: &[String],
) -> Result<Reconciliation> {
    if let Some(found) = kind_mismatch(existing, schema.kind) {
        return Ok(Reconciliation {
            record: existing.clone(),
            changes: Vec::new(),
            wrong_kind: Some(found),
        });
    }

    let mut changes = Vec::new();
    let mut record = Record::new();

    for prop in schema.persisted() {
        match existing.get(prop.name) {
            Some(value) => {
                record.insert(prop.name, value.clone());
            }
            None => {
                let Some(default) = prop.default else {
                    return Err(Error::MissingDefault {
                        field: prop.name.to_string(),
                    });
                };
                record.insert(prop.name, default.value(schema.kind));
                changes.push(SchemaChange::Added(prop.name.to_string()));
            }
        }
    }

    let present: Vec<&str> = existing.keys().filter(|k| schema.contains(k)).collect();
    let canonical: Vec<&str> = schema
        .persisted()
        .map(|p| p.name)
        .filter(|n| existing.contains_key(n))
        .collect();
    if present != canonical {
        changes.push(SchemaChange::Reordered);
    }

    for (key, value) in existing.iter() {
        if schema.contains(key) {
            continue;
        }
        if is_obsolete(key, schema, preserve_keys) {
            changes.push(SchemaChange::Removed(key.to_string()));
            continue;
        }
        record.insert(key, value.clone());
    }

    Ok(Reconciliation {
        record,
        changes,
        wrong_kind: None,
    })
}
