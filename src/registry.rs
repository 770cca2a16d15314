//! Property registry: every header field the engine knows about, and the
//! canonical per-kind schemas built from it.

use std::fmt;

use crate::{EngineConfig, FieldValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum EntityKind {
    Task,
    Project,
    Area,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Task, EntityKind::Project, EntityKind::Area];

    /// Value of the `Type` header field for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Task => "Task",
            EntityKind::Project => "Project",
            EntityKind::Area => "Area",
        }
    }

    /// Case-insensitive, whitespace-tolerant match on a `Type` value.
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Number,
    Boolean,
    StringList,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyDefault {
    /// Present but empty.
    Null,
    Text(&'static str),
    Flag(bool),
    Number(f64),
    EmptyList,
    /// The schema's own kind name (used by `Type`).
    Kind,
}

impl PropertyDefault {
    pub fn value(self, kind: EntityKind) -> FieldValue {
        match self {
            PropertyDefault::Null => FieldValue::Null,
            PropertyDefault::Text(s) => FieldValue::text(s),
            PropertyDefault::Flag(b) => FieldValue::Bool(b),
            PropertyDefault::Number(n) => FieldValue::Number(n),
            PropertyDefault::EmptyList => FieldValue::List(Vec::new()),
            PropertyDefault::Kind => FieldValue::text(kind.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropertyDefinition {
    pub key: &'static str,
    /// Header field name as written to documents.
    pub name: &'static str,
    pub value_type: ValueType,
    pub default: Option<PropertyDefault>,
    /// Target kind when the field holds cross-references.
    pub references: Option<EntityKind>,
    /// Non-persisted properties never appear in the header.
    pub persisted: bool,
}

impl PropertyDefinition {
    pub fn is_reference(&self) -> bool {
        self.references.is_some()
    }

    pub const fn new(key: &'static str, name: &'static str, value_type: ValueType) -> Self {
        Self {
            key,
            name,
            value_type,
            default: None,
            references: None,
            persisted: true,
        }
    }

    pub const fn with_default(mut self, default: PropertyDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub const fn referencing(mut self, kind: EntityKind) -> Self {
        self.references = Some(kind);
        self
    }

    pub const fn body_only(mut self) -> Self {
        self.persisted = false;
        self
    }
}

pub const TITLE: PropertyDefinition = PropertyDefinition::new("title", "Title", ValueType::String);
pub const NAME: PropertyDefinition = PropertyDefinition::new("name", "Name", ValueType::String);
pub const TYPE: PropertyDefinition = PropertyDefinition::new("type", "Type", ValueType::String)
    .with_default(PropertyDefault::Kind);
pub const CATEGORY: PropertyDefinition =
    PropertyDefinition::new("category", "Category", ValueType::String)
        .with_default(PropertyDefault::Text("Task"));
pub const PRIORITY: PropertyDefinition =
    PropertyDefinition::new("priority", "Priority", ValueType::String)
        .with_default(PropertyDefault::Null);
pub const AREAS: PropertyDefinition =
    PropertyDefinition::new("areas", "Areas", ValueType::StringList)
        .with_default(PropertyDefault::EmptyList)
        .referencing(EntityKind::Area);
pub const PROJECT: PropertyDefinition =
    PropertyDefinition::new("project", "Project", ValueType::String)
        .with_default(PropertyDefault::Null)
        .referencing(EntityKind::Project);
pub const DONE: PropertyDefinition = PropertyDefinition::new("done", "Done", ValueType::Boolean)
    .with_default(PropertyDefault::Flag(false));
pub const STATUS: PropertyDefinition =
    PropertyDefinition::new("status", "Status", ValueType::String)
        .with_default(PropertyDefault::Text("Backlog"));
pub const PARENT_TASK: PropertyDefinition =
    PropertyDefinition::new("parent_task", "Parent task", ValueType::String)
        .with_default(PropertyDefault::Null)
        .referencing(EntityKind::Task);
pub const DO_DATE: PropertyDefinition =
    PropertyDefinition::new("do_date", "Do Date", ValueType::Date)
        .with_default(PropertyDefault::Null);
pub const DUE_DATE: PropertyDefinition =
    PropertyDefinition::new("due_date", "Due Date", ValueType::Date)
        .with_default(PropertyDefault::Null);
pub const ESTIMATE: PropertyDefinition =
    PropertyDefinition::new("estimate", "Estimate", ValueType::Number)
        .with_default(PropertyDefault::Null);
pub const TAGS: PropertyDefinition = PropertyDefinition::new("tags", "tags", ValueType::StringList)
    .with_default(PropertyDefault::EmptyList);
pub const DESCRIPTION: PropertyDefinition =
    PropertyDefinition::new("description", "Description", ValueType::String).body_only();

/// Every property the engine defines, across all kinds.
pub static PROPERTIES: &[PropertyDefinition] = &[
    TITLE,
    NAME,
    TYPE,
    CATEGORY,
    PRIORITY,
    AREAS,
    PROJECT,
    DONE,
    STATUS,
    PARENT_TASK,
    DO_DATE,
    DUE_DATE,
    ESTIMATE,
    TAGS,
    DESCRIPTION,
];

pub fn property(key: &str) -> Option<&'static PropertyDefinition> {
    PROPERTIES.iter().find(|p| p.key == key)
}

/// Ordered field list for one entity kind. Order is the canonical header order.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchema {
    pub kind: EntityKind,
    properties: Vec<PropertyDefinition>,
    /// Header keys written by earlier schema versions; reconciliation drops them.
    retired: Vec<String>,
}

impl EntitySchema {
    pub fn new(kind: EntityKind, properties: Vec<PropertyDefinition>) -> Self {
        Self {
            kind,
            properties,
            retired: Vec::new(),
        }
    }

    pub fn with_retired<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retired.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn is_retired(&self, key: &str) -> bool {
        self.retired.iter().any(|k| k == key)
    }

    pub fn task() -> Self {
        Self::new(
            EntityKind::Task,
            vec![
                TITLE,
                TYPE,
                CATEGORY,
                PRIORITY,
                AREAS,
                PROJECT,
                DONE,
                STATUS,
                PARENT_TASK,
                DO_DATE,
                DUE_DATE,
                ESTIMATE,
                TAGS,
                DESCRIPTION,
            ],
        )
    }

    pub fn project() -> Self {
        Self::new(
            EntityKind::Project,
            vec![NAME, TYPE, AREAS, TAGS, DESCRIPTION],
        )
    }

    pub fn area() -> Self {
        Self::new(EntityKind::Area, vec![NAME, TYPE, PROJECT, TAGS, DESCRIPTION])
    }

    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Task => Self::task(),
            EntityKind::Project => Self::project(),
            EntityKind::Area => Self::area(),
        }
    }

    pub fn all(&self) -> &[PropertyDefinition] {
        &self.properties
    }

    /// Properties stored in the header, in canonical order.
    pub fn persisted(&self) -> impl Iterator<Item = &PropertyDefinition> {
        self.properties.iter().filter(|p| p.persisted)
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.persisted().map(|p| p.name).collect()
    }

    pub fn get(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn by_key(&self, key: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|p| p.key == key)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.persisted().any(|p| p.name == name)
    }

    /// The field that names the entity and its file (`Title` or `Name`).
    pub fn name_field(&self) -> Option<&PropertyDefinition> {
        self.by_key(TITLE.key).or_else(|| self.by_key(NAME.key))
    }

    /// Whether the kind carries the redundant Status/Done pair.
    pub fn has_status_pair(&self) -> bool {
        self.contains(STATUS.name) && self.contains(DONE.name)
    }
}

/// Canonical schemas for all kinds, passed explicitly to every operation.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaRegistry {
    task: EntitySchema,
    project: EntitySchema,
    area: EntitySchema,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self {
            task: EntitySchema::task(),
            project: EntitySchema::project(),
            area: EntitySchema::area(),
        }
    }
}

impl SchemaRegistry {
    /// Default schemas with the configured retired keys applied to every kind.
    pub fn from_config(cfg: &EngineConfig) -> Self {
        let base = Self::default();
        if cfg.retired_keys.is_empty() {
            return base;
        }
        let keys = &cfg.retired_keys;
        Self {
            task: base.task.with_retired(keys.iter().cloned()),
            project: base.project.with_retired(keys.iter().cloned()),
            area: base.area.with_retired(keys.iter().cloned()),
        }
    }

    pub fn schema(&self, kind: EntityKind) -> &EntitySchema {
        match kind {
            EntityKind::Task => &self.task,
            EntityKind::Project => &self.project,
            EntityKind::Area => &self.area,
        }
    }

    /// Replaces the schema registered for `schema.kind`.
    pub fn with_schema(mut self, schema: EntitySchema) -> Self {
        match schema.kind {
            EntityKind::Task => self.task = schema,
            EntityKind::Project => self.project = schema,
            EntityKind::Area => self.area = schema,
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parse_is_case_insensitive() {
        assert_eq!(EntityKind::parse(" task "), Some(EntityKind::Task));
        assert_eq!(EntityKind::parse("AREA"), Some(EntityKind::Area));
        assert_eq!(EntityKind::parse("Note"), None);
    }

    #[test]
    fn task_schema_order_and_persistence() {
        let schema = EntitySchema::task();
        let names = schema.field_names();
        assert_eq!(names[0], "Title");
        assert_eq!(names[1], "Type");
        assert!(!names.contains(&"Description"));
        assert_eq!(names[names.len() - 2..], ["Estimate", "tags"]);
        assert!(schema.has_status_pair());
        assert_eq!(schema.name_field().map(|p| p.name), Some("Title"));
    }

    #[test]
    fn only_names_lack_defaults() {
        for kind in EntityKind::ALL {
            let schema = EntitySchema::for_kind(kind);
            let missing: Vec<_> = schema
                .persisted()
                .filter(|p| p.default.is_none())
                .map(|p| p.name)
                .collect();
            assert_eq!(missing.len(), 1, "{kind}: {missing:?}");
        }
        assert!(!EntitySchema::project().has_status_pair());
    }

    #[test]
    fn configured_retired_keys_reach_every_schema() {
        let cfg = EngineConfig {
            retired_keys: vec!["Sub-tasks".into()],
            ..EngineConfig::default()
        };
        let reg = SchemaRegistry::from_config(&cfg);
        for kind in EntityKind::ALL {
            assert!(reg.schema(kind).is_retired("Sub-tasks"));
        }
        assert!(!SchemaRegistry::default().schema(EntityKind::Task).is_retired("Sub-tasks"));
    }

    #[test]
    fn registry_lookup_by_key() {
        let p = property("parent_task").unwrap();
        assert_eq!(p.name, "Parent task");
        assert_eq!(p.references, Some(EntityKind::Task));
        assert!(property("nope").is_none());
    }
}
