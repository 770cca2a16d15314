//! Typed views over stored entity records.

use std::time::SystemTime;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::reference::from_reference;
use crate::registry::{
    AREAS, CATEGORY, DO_DATE, DONE, DUE_DATE, ESTIMATE, NAME, PARENT_TASK, PRIORITY, PROJECT,
    STATUS, TAGS, TITLE,
};
use crate::{EntityKind, EntitySchema, FieldValue, Record, VaultPath};

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Entity {
    pub path: VaultPath,
    pub kind: EntityKind,
    pub created: Option<SystemTime>,
    pub modified: Option<SystemTime>,
    pub fields: EntityFields,
    /// Header keys outside the schema, in stored order.
    pub extra: Record,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum EntityFields {
    Task(TaskFields),
    Project(ProjectFields),
    Area(AreaFields),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TaskFields {
    pub title: String,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub areas: Vec<String>,
    pub project: Option<String>,
    pub done: bool,
    pub status: Option<String>,
    pub parent_task: Option<String>,
    pub do_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub estimate: Option<f64>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ProjectFields {
    pub name: String,
    pub areas: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AreaFields {
    pub name: String,
    pub project: Option<String>,
    pub tags: Vec<String>,
}

impl Entity {
    /// Projects a header record onto the typed fields of `schema.kind`.
    /// Reference fields are reduced to plain entity names.
    pub fn from_record(
        path: VaultPath,
        schema: &EntitySchema,
        record: &Record,
        created: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> Self {
        let fallback_name = path.stem();
        let name = |field: &str| text(record, field).unwrap_or_else(|| fallback_name.clone());

        let fields = match schema.kind {
            EntityKind::Task => EntityFields::Task(TaskFields {
                title: name(TITLE.name),
                category: text(record, CATEGORY.name),
                priority: scalar_text(record, PRIORITY.name),
                areas: references(record, AREAS.name),
                project: reference(record, PROJECT.name),
                done: record.get(DONE.name).and_then(FieldValue::as_bool).unwrap_or(false),
                status: text(record, STATUS.name),
                parent_task: reference(record, PARENT_TASK.name),
                do_date: date(record, DO_DATE.name),
                due_date: date(record, DUE_DATE.name),
                estimate: number(record, ESTIMATE.name),
                tags: tags(record),
            }),
            EntityKind::Project => EntityFields::Project(ProjectFields {
                name: name(NAME.name),
                areas: references(record, AREAS.name),
                tags: tags(record),
            }),
            EntityKind::Area => EntityFields::Area(AreaFields {
                name: name(NAME.name),
                project: reference(record, PROJECT.name),
                tags: tags(record),
            }),
        };

        let extra = record
            .iter()
            .filter(|(k, _)| !schema.contains(k))
            .map(|(k, v)| (k, v.clone()))
            .collect();

        Self {
            path,
            kind: schema.kind,
            created,
            modified,
            fields,
            extra,
        }
    }

    pub fn name(&self) -> &str {
        match &self.fields {
            EntityFields::Task(t) => &t.title,
            EntityFields::Project(p) => &p.name,
            EntityFields::Area(a) => &a.name,
        }
    }
}

fn text(record: &Record, field: &str) -> Option<String> {
    record
        .get(field)
        .and_then(FieldValue::as_non_empty_str)
        .map(|s| s.trim().to_string())
}

fn scalar_text(record: &Record, field: &str) -> Option<String> {
    match record.get(field)? {
        FieldValue::Number(n) if n.fract() == 0.0 => Some(format!("{}", *n as i64)),
        FieldValue::Number(n) => Some(n.to_string()),
        other => other.as_non_empty_str().map(|s| s.trim().to_string()),
    }
}

fn reference(record: &Record, field: &str) -> Option<String> {
    match record.get(field)? {
        FieldValue::List(items) => items
            .iter()
            .find_map(FieldValue::as_non_empty_str)
            .map(from_reference),
        other => other.as_non_empty_str().map(from_reference),
    }
}

fn references(record: &Record, field: &str) -> Vec<String> {
    record
        .get(field)
        .map(|v| {
            v.string_items()
                .iter()
                .filter(|s| !s.trim().is_empty())
                .map(|s| from_reference(s))
                .collect()
        })
        .unwrap_or_default()
}

fn tags(record: &Record) -> Vec<String> {
    record
        .get(TAGS.name)
        .map(|v| {
            v.string_items()
                .into_iter()
                .map(|t| t.trim().trim_start_matches('#').to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn number(record: &Record, field: &str) -> Option<f64> {
    match record.get(field)? {
        FieldValue::Number(n) => Some(*n),
        FieldValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn date(record: &Record, field: &str) -> Option<NaiveDate> {
    record.get(field)?.as_non_empty_str().and_then(parse_date)
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM[:SS]` and RFC 3339 timestamps.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.date())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_record() -> Record {
        [
            ("Title", FieldValue::text("Write report")),
            ("Type", FieldValue::text("Task")),
            ("Priority", FieldValue::Number(2.0)),
            ("Areas", FieldValue::strings(["[[Areas/Work|Work]]", "Home"])),
            ("Project", FieldValue::text("[[Projects/Q3 Review]]")),
            ("Done", FieldValue::Bool(true)),
            ("Status", FieldValue::text("Done")),
            ("Due Date", FieldValue::text("2025-03-04T10:00:00Z")),
            ("Do Date", FieldValue::text("2025-03-01")),
            ("Estimate", FieldValue::text("1.5")),
            ("tags", FieldValue::strings(["#work", ""])),
            ("reviewer", FieldValue::text("sam")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn task_projection_normalizes_references_and_dates() {
        let path = VaultPath::new("Tasks/Write report.md").unwrap();
        let entity = Entity::from_record(path, &EntitySchema::task(), &task_record(), None, None);
        let EntityFields::Task(t) = &entity.fields else {
            panic!("expected task fields");
        };
        assert_eq!(t.title, "Write report");
        assert_eq!(t.priority.as_deref(), Some("2"));
        assert_eq!(t.areas, vec!["Work", "Home"]);
        assert_eq!(t.project.as_deref(), Some("Q3 Review"));
        assert!(t.done);
        assert_eq!(t.due_date, NaiveDate::from_ymd_opt(2025, 3, 4));
        assert_eq!(t.do_date, NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(t.estimate, Some(1.5));
        assert_eq!(t.tags, vec!["work"]);
        assert_eq!(entity.extra.keys().collect::<Vec<_>>(), ["reviewer"]);
    }

    #[test]
    fn missing_name_falls_back_to_file_stem() {
        let path = VaultPath::new("Areas/Health.md").unwrap();
        let entity = Entity::from_record(path, &EntitySchema::area(), &Record::new(), None, None);
        assert_eq!(entity.name(), "Health");
        assert_eq!(entity.kind, EntityKind::Area);
    }

    #[test]
    fn parse_date_formats() {
        let d = NaiveDate::from_ymd_opt(2024, 12, 31);
        assert_eq!(parse_date("2024-12-31"), d);
        assert_eq!(parse_date("2024-12-31T23:59"), d);
        assert_eq!(parse_date("2024-12-31T08:00:00+02:00"), d);
        assert_eq!(parse_date("next week"), None);
    }
}
