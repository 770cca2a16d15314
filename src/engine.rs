use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::codec;
use crate::derive::{DerivedFieldSync, SyncOutcome};
use crate::locks::PathLocks;
use crate::manager::{Context, EntityManager, KindProfile, UpdateOutcome};
use crate::reconcile::declared_type;
use crate::store::blocking;
use crate::{DocumentStore, EngineConfig, Entity, EntityKind, Error, Record, Result, VaultPath};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FileError {
    /// `None` when the failure could not be tied to a file (a panicked worker).
    pub path: Option<VaultPath>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatchReport {
    pub files_scanned: usize,
    pub files_updated: usize,
    pub properties_updated: usize,
    /// Files in an entity folder that are not entities of that folder's kind.
    pub skipped: usize,
    pub cancelled: bool,
    pub errors: Vec<FileError>,
}

/// Entry point for every operation: owns the store, context, per-kind
/// managers, path locks and the Status/Done synchronizer.
pub struct Engine<S> {
    store: Arc<S>,
    ctx: Arc<Context>,
    locks: Arc<PathLocks>,
    managers: [EntityManager<S>; 3],
    sync: Arc<DerivedFieldSync>,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ctx: self.ctx.clone(),
            locks: self.locks.clone(),
            managers: self.managers.clone(),
            sync: self.sync.clone(),
        }
    }
}

impl<S: DocumentStore> Engine<S> {
    pub fn new(store: S, config: EngineConfig) -> Result<Self> {
        Self::with_store(Arc::new(store), config)
    }

    pub fn with_store(store: Arc<S>, config: EngineConfig) -> Result<Self> {
        let ctx = Arc::new(Context::new(config));
        let locks = Arc::new(PathLocks::new());
        let manager = |kind: EntityKind| -> Result<EntityManager<S>> {
            Ok(EntityManager::new(
                store.clone(),
                ctx.clone(),
                locks.clone(),
                KindProfile::new(kind, &ctx)?,
            ))
        };
        let managers = [
            manager(EntityKind::Task)?,
            manager(EntityKind::Project)?,
            manager(EntityKind::Area)?,
        ];
        let sync = Arc::new(DerivedFieldSync::new(
            ctx.schemas.schema(EntityKind::Task).clone(),
            ctx.config.statuses.clone(),
            ctx.config.settle_window(),
        ));
        Ok(Self {
            store,
            ctx,
            locks,
            managers,
            sync,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn manager(&self, kind: EntityKind) -> &EntityManager<S> {
        match kind {
            EntityKind::Task => &self.managers[0],
            EntityKind::Project => &self.managers[1],
            EntityKind::Area => &self.managers[2],
        }
    }

    pub async fn create_entity(&self, kind: EntityKind, data: Record) -> Result<VaultPath> {
        self.manager(kind).create_entity(data).await
    }

    pub async fn update_entity_properties(
        &self,
        kind: EntityKind,
        path: &VaultPath,
    ) -> Result<UpdateOutcome> {
        self.manager(kind).update_entity_properties(path).await
    }

    pub async fn load_entity(&self, kind: EntityKind, path: &VaultPath) -> Result<Option<Entity>> {
        self.manager(kind).load_entity(path).await
    }

    /// Loads `path` as whatever kind its `Type` declares.
    pub async fn load(&self, path: &VaultPath) -> Result<Option<Entity>> {
        let store = self.store.clone();
        let target = path.clone();
        let declared = blocking(move || {
            let stored = store.read(&target)?;
            let doc = codec::parse(&stored.text).map_err(|e| e.at(&target))?;
            Ok(declared_type(&doc.record))
        })
        .await?;
        match declared.as_deref().and_then(EntityKind::parse) {
            Some(kind) => self.load_entity(kind, path).await,
            None => Ok(None),
        }
    }

    /// Brings the Status/Done pair of an externally edited document back in
    /// line. Writes at most once per edit.
    pub async fn handle_external_change(&self, path: &VaultPath) -> Result<SyncOutcome> {
        if !path.is_markdown() {
            return Ok(SyncOutcome::NotApplicable);
        }
        let _guard = self.locks.lock(path).await;

        let store = self.store.clone();
        let sync = self.sync.clone();
        let target = path.clone();
        match blocking(move || sync.sync_file(store.as_ref(), &target)).await {
            Err(Error::NotFound(_)) => {
                self.forget(path);
                Ok(SyncOutcome::NotApplicable)
            }
            other => other,
        }
    }

    /// Records the current Status/Done pair of every task as its baseline, so
    /// the first edit seen afterwards is judged against it. Unreadable files
    /// are logged and left unprimed.
    pub async fn prime(&self) -> Result<usize> {
        let folder = self.manager(EntityKind::Task).profile().folder.clone();
        let store = self.store.clone();
        let paths = blocking(move || store.list(&folder)).await?;

        let mut primed = 0;
        for path in paths {
            let _guard = self.locks.lock(&path).await;
            let store = self.store.clone();
            let sync = self.sync.clone();
            let target = path.clone();
            match blocking(move || sync.prime_file(store.as_ref(), &target)).await {
                Ok(true) => primed += 1,
                Ok(false) => {}
                Err(err) => debug!(path = %path, error = %err, "not primed"),
            }
        }
        info!(primed, "status baselines recorded");
        Ok(primed)
    }

    /// Drops synchronizer state for a removed document.
    pub fn forget(&self, path: &VaultPath) {
        self.sync.tracker().forget(path);
    }

    /// Migrates every document in every entity folder to its kind's schema.
    /// Per-file failures are collected, never fatal.
    pub async fn reconcile_all(&self, cancel: Option<watch::Receiver<bool>>) -> Result<BatchReport> {
        let is_cancelled = || cancel.as_ref().is_some_and(|rx| *rx.borrow());
        let permits = Arc::new(Semaphore::new(self.ctx.config.max_parallel.max(1)));
        let mut report = BatchReport::default();
        let mut seen = BTreeSet::new();
        let mut workers = JoinSet::new();

        'kinds: for kind in EntityKind::ALL {
            let folder = self.manager(kind).profile().folder.clone();
            let store = self.store.clone();
            let paths = match blocking(move || store.list(&folder)).await {
                Ok(p) => p,
                Err(err) => {
                    warn!(kind = %kind, error = %err, "listing entity folder failed");
                    report.errors.push(FileError {
                        path: None,
                        message: err.to_string(),
                    });
                    continue;
                }
            };
            debug!(kind = %kind, files = paths.len(), "reconciling folder");

            for path in paths {
                if is_cancelled() {
                    report.cancelled = true;
                    break 'kinds;
                }
                if !seen.insert(path.clone()) {
                    continue;
                }
                let permit = permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Task(e.to_string()))?;
                let manager = self.manager(kind).clone();
                report.files_scanned += 1;
                workers.spawn(async move {
                    let _permit = permit;
                    let outcome = manager.update_entity_properties(&path).await;
                    (path, outcome)
                });
            }
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) if outcome.has_changes => {
                    report.files_updated += 1;
                    report.properties_updated += outcome.change_count;
                }
                Ok((_, Ok(_))) => {}
                Ok((path, Err(Error::WrongKind { found, .. }))) => {
                    debug!(path = %path, found = %found, "skipping non-entity document");
                    report.skipped += 1;
                }
                Ok((path, Err(err))) => {
                    warn!(path = %path, error = %err, "reconcile failed");
                    report.errors.push(FileError {
                        path: Some(path),
                        message: err.to_string(),
                    });
                }
                Err(err) => report.errors.push(FileError {
                    path: None,
                    message: err.to_string(),
                }),
            }
        }
        report.errors.sort_by(|a, b| a.path.cmp(&b.path));

        info!(
            scanned = report.files_scanned,
            updated = report.files_updated,
            properties = report.properties_updated,
            skipped = report.skipped,
            errors = report.errors.len(),
            cancelled = report.cancelled,
            "reconcile finished"
        );
        Ok(report)
    }
}
