//! Per-kind entity operations: create, migrate, load.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec;
use crate::locks::PathLocks;
use crate::reconcile::{declared_type, kind_mismatch, reconcile};
use crate::reference::{sanitize_file_name, to_reference};
use crate::registry::{DESCRIPTION, TYPE};
use crate::store::{blocking, wait_for_index};
use crate::{
    DocumentStore, EngineConfig, Entity, EntityKind, EntitySchema, Error, FieldValue,
    PropertyDefinition, Record, Result, Revision, SchemaChange, SchemaRegistry, VaultPath,
};

const TASKS_PLACEHOLDER: &str = "{{tasks}}";
const DESCRIPTION_PLACEHOLDER: &str = "{{description}}";

/// Configuration and schemas shared by every operation.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: EngineConfig,
    pub schemas: SchemaRegistry,
}

impl Context {
    pub fn new(config: EngineConfig) -> Self {
        let schemas = SchemaRegistry::from_config(&config);
        Self { config, schemas }
    }
}

/// Everything that distinguishes one entity kind's manager from another.
#[derive(Debug, Clone, PartialEq)]
pub struct KindProfile {
    pub kind: EntityKind,
    pub schema: EntitySchema,
    pub folder: PathBuf,
    pub template: Option<VaultPath>,
}

impl KindProfile {
    pub fn new(kind: EntityKind, ctx: &Context) -> Result<Self> {
        let template = ctx
            .config
            .template_for(kind)
            .filter(|t| !t.trim().is_empty())
            .map(VaultPath::new)
            .transpose()?;
        Ok(Self {
            kind,
            schema: ctx.schemas.schema(kind).clone(),
            folder: PathBuf::from(ctx.config.folder_for(kind).trim().trim_matches('/')),
            template,
        })
    }

    fn default_body(&self) -> &'static str {
        match self.kind {
            EntityKind::Task => "## Notes\n\n{{description}}\n",
            EntityKind::Project | EntityKind::Area => {
                "## Description\n\n{{description}}\n\n## Tasks\n\n{{tasks}}\n"
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub has_changes: bool,
    pub change_count: usize,
    pub changes: Vec<SchemaChange>,
    pub revision: Option<Revision>,
}

pub struct EntityManager<S> {
    store: Arc<S>,
    ctx: Arc<Context>,
    locks: Arc<PathLocks>,
    profile: Arc<KindProfile>,
}

impl<S> Clone for EntityManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ctx: self.ctx.clone(),
            locks: self.locks.clone(),
            profile: self.profile.clone(),
        }
    }
}

impl<S: DocumentStore> EntityManager<S> {
    pub fn new(
        store: Arc<S>,
        ctx: Arc<Context>,
        locks: Arc<PathLocks>,
        profile: KindProfile,
    ) -> Self {
        Self {
            store,
            ctx,
            locks,
            profile: Arc::new(profile),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.profile.kind
    }

    pub fn profile(&self) -> &KindProfile {
        &self.profile
    }

    /// Where a new entity named by `data` would be stored.
    pub fn target_path(&self, data: &Record) -> Result<VaultPath> {
        let name = self.required_name(data)?;
        let file = sanitize_file_name(name, &self.ctx.config.sanitize);
        VaultPath::new(self.profile.folder.join(format!("{file}.md")))
    }

    /// Creates a new entity document and waits until the store can read it back.
    pub async fn create_entity(&self, data: Record) -> Result<VaultPath> {
        let path = self.target_path(&data)?;
        let _guard = self.locks.lock(&path).await;

        let this = self.clone();
        let target = path.clone();
        let revision = blocking(move || this.create_blocking(&target, &data)).await?;
        wait_for_index(
            self.store.indexed(),
            &path,
            revision,
            self.ctx.config.index_timeout(),
        )
        .await?;

        info!(kind = %self.kind(), path = %path, revision, "entity created");
        Ok(path)
    }

    /// Migrates the header of `path` to the current schema. The body is not touched.
    pub async fn update_entity_properties(&self, path: &VaultPath) -> Result<UpdateOutcome> {
        let _guard = self.locks.lock(path).await;
        let this = self.clone();
        let target = path.clone();
        blocking(move || this.update_blocking(&target)).await
    }

    /// Typed view of `path`, or `None` when it is not an entity of this kind.
    pub async fn load_entity(&self, path: &VaultPath) -> Result<Option<Entity>> {
        let this = self.clone();
        let target = path.clone();
        blocking(move || this.load_blocking(&target)).await
    }

    fn required_name<'a>(&self, data: &'a Record) -> Result<&'a str> {
        let field = self
            .profile
            .schema
            .name_field()
            .map(|p| p.name)
            .unwrap_or("Name");
        data.get(field)
            .and_then(FieldValue::as_non_empty_str)
            .ok_or_else(|| Error::MissingDefault {
                field: field.to_string(),
            })
    }

    fn create_blocking(&self, path: &VaultPath, data: &Record) -> Result<Revision> {
        if self.store.exists(path) {
            return Err(Error::AlreadyExists(path.clone()));
        }
        let name = self.required_name(data)?;
        let file = sanitize_file_name(name, &self.ctx.config.sanitize);
        let (template_record, template_body) = self.template()?;

        let description = data
            .get(DESCRIPTION.name)
            .and_then(FieldValue::as_str)
            .map(str::trim)
            .unwrap_or("");
        let view = self.ctx.config.views_folder().join(format!("{file}.base"));
        let body = template_body
            .replace(
                TASKS_PLACEHOLDER,
                &format!("![[{}]]", view.to_string_lossy()),
            )
            .replace(DESCRIPTION_PLACEHOLDER, description);

        let kind = self.profile.kind;
        let schema = &self.profile.schema;
        let mut record = Record::new();
        for prop in schema.persisted() {
            let value = if prop.name == TYPE.name {
                FieldValue::text(kind.as_str())
            } else if let Some(value) = data.get(prop.name).or_else(|| template_record.get(prop.name))
            {
                self.normalize(prop, value)
            } else if let Some(default) = prop.default {
                default.value(kind)
            } else {
                return Err(Error::MissingDefault {
                    field: prop.name.to_string(),
                });
            };
            record.insert(prop.name, value);
        }
        for (key, value) in data.iter().chain(template_record.iter()) {
            if schema.get(key).is_none() && !record.contains_key(key) {
                record.insert(key, value.clone());
            }
        }

        // Registry fields that belong to other kinds would not survive the next migration.
        let plan = reconcile(&record, schema, &self.ctx.config.preserve_keys)?;
        for change in &plan.changes {
            if let SchemaChange::Removed(key) = change {
                warn!(
                    path = %path,
                    field = %key,
                    kind = %kind,
                    "field not used by this kind; dropped"
                );
            }
        }

        let text = codec::serialize(&plan.record, &[], &body);
        self.store.create(path, &text)
    }

    fn update_blocking(&self, path: &VaultPath) -> Result<UpdateOutcome> {
        let stored = self.store.read(path)?;
        let doc = codec::parse(&stored.text).map_err(|e| e.at(path))?;
        self.ensure_kind(path, &doc.record)?;

        let schema = &self.profile.schema;
        let preserve = &self.ctx.config.preserve_keys;
        let plan = reconcile(&doc.record, schema, preserve)?;
        if !plan.changed() {
            debug!(path = %path, "header already matches schema");
            return Ok(UpdateOutcome::default());
        }

        let mut applied = Vec::new();
        let commit = self.store.update_header(path, &mut |record| {
            self.ensure_kind(path, record)?;
            let fresh = reconcile(record, schema, preserve)?;
            *record = fresh.record;
            applied = fresh.changes;
            Ok(())
        })?;
        if !commit.changed {
            return Ok(UpdateOutcome::default());
        }

        info!(
            path = %path,
            changes = applied.len(),
            revision = commit.revision,
            "header reconciled"
        );
        Ok(UpdateOutcome {
            has_changes: true,
            change_count: applied.len(),
            changes: applied,
            revision: Some(commit.revision),
        })
    }

    fn load_blocking(&self, path: &VaultPath) -> Result<Option<Entity>> {
        let stored = self.store.read(path)?;
        let doc = codec::parse(&stored.text).map_err(|e| e.at(path))?;
        if self.ensure_kind(path, &doc.record).is_err() {
            return Ok(None);
        }
        Ok(Some(Entity::from_record(
            path.clone(),
            &self.profile.schema,
            &doc.record,
            stored.created,
            stored.modified,
        )))
    }

    /// Only records that declare this kind are managed. Untyped documents are
    /// not entities.
    fn ensure_kind(&self, path: &VaultPath, record: &Record) -> Result<()> {
        let kind = self.profile.kind;
        let found = match declared_type(record) {
            None => Some("untyped document".to_string()),
            Some(_) => kind_mismatch(record, kind),
        };
        match found {
            None => Ok(()),
            Some(found) => Err(Error::WrongKind {
                path: path.clone(),
                expected: kind.as_str().to_string(),
                found,
            }),
        }
    }

    fn template(&self) -> Result<(Record, String)> {
        let default = || (Record::new(), self.profile.default_body().to_string());
        let Some(template) = &self.profile.template else {
            return Ok(default());
        };
        if !self.store.exists(template) {
            warn!(template = %template, "template not found; using default body");
            return Ok(default());
        }
        let stored = self.store.read(template)?;
        let doc = codec::parse(&stored.text).map_err(|e| e.at(template))?;
        Ok((doc.record, doc.body.to_string()))
    }

    /// Reference fields are stored as links into the referenced kind's folder.
    fn normalize(&self, prop: &PropertyDefinition, value: &FieldValue) -> FieldValue {
        let Some(target) = prop.references else {
            return value.clone();
        };
        let folder = self.ctx.config.folder_for(target);
        let opts = &self.ctx.config.sanitize;
        let link = |v: &FieldValue| match v.as_non_empty_str() {
            Some(name) => FieldValue::text(to_reference(name, folder, opts)),
            None => v.clone(),
        };
        match value {
            FieldValue::List(items) => FieldValue::List(items.iter().map(link).collect()),
            other => link(other),
        }
    }
}
