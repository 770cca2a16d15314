mod codec;
mod config;
mod derive;
mod engine;
mod entity;
mod error;
mod fields;
mod locks;
mod manager;
mod reconcile;
mod reference;
mod registry;
mod service;
mod store;
mod vault;

pub use crate::codec::{
    Document, parse as parse_document, rewrite_header, serialize as serialize_document,
};
pub use crate::config::{EngineConfig, SETTINGS_PATH, TemplateConfig};
pub use crate::derive::{
    Correction, DerivedFieldSync, FALLBACK_DONE_STATUS, FALLBACK_OPEN_STATUS, SettleTracker,
    StatusDefinition, StatusPair, SyncOutcome, derive_correction,
};
pub use crate::engine::{BatchReport, Engine, FileError};
pub use crate::entity::{
    AreaFields, Entity, EntityFields, ProjectFields, TaskFields, parse_date,
};
pub use crate::error::{Error, Result};
pub use crate::fields::{FieldValue, Record};
pub use crate::locks::PathLocks;
pub use crate::manager::{Context, EntityManager, KindProfile, UpdateOutcome};
pub use crate::reconcile::{
    ALWAYS_PRESERVED, Reconciliation, SchemaChange, declared_type, kind_mismatch, reconcile,
};
pub use crate::reference::{
    SanitizeOptions, from_reference, is_reference, sanitize_file_name, to_reference,
};
pub use crate::registry::{
    EntityKind, EntitySchema, PROPERTIES, PropertyDefault, PropertyDefinition, SchemaRegistry,
    ValueType, property,
};
pub use crate::service::{SyncEvent, SyncService};
pub use crate::store::{
    Commit, DocumentStore, FsStore, HeaderTransform, MemoryStore, Revision, StoredDocument,
    wait_for_index,
};
pub use crate::vault::{Vault, VaultPath};
