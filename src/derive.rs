//! Keeps the redundant `Status` / `Done` pair consistent after external edits.
//!
//! Every corrective write is remembered as a fingerprint of the pair it
//! produced. When the store reports that write back, the fingerprint matches
//! and the event is treated as settled, so one external edit yields at most
//! one correction.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::codec;
use crate::reconcile::kind_mismatch;
use crate::registry::{DONE, STATUS};
use crate::{DocumentStore, EntitySchema, FieldValue, Record, Result, Revision, VaultPath};

/// Status used when no configured status is "not done".
pub const FALLBACK_OPEN_STATUS: &str = "Backlog";
/// Status used when no configured status is "done".
pub const FALLBACK_DONE_STATUS: &str = "Done";

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct StatusDefinition {
    pub name: String,
    #[serde(default)]
    pub is_done: bool,
    #[serde(default)]
    pub is_in_progress: bool,
}

impl StatusDefinition {
    pub fn new(name: impl Into<String>, is_done: bool, is_in_progress: bool) -> Self {
        Self {
            name: name.into(),
            is_done,
            is_in_progress,
        }
    }
}

pub fn find_status<'a>(statuses: &'a [StatusDefinition], name: &str) -> Option<&'a StatusDefinition> {
    let name = name.trim();
    statuses.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

pub fn first_done_status(statuses: &[StatusDefinition]) -> &str {
    statuses
        .iter()
        .find(|s| s.is_done)
        .map(|s| s.name.as_str())
        .unwrap_or(FALLBACK_DONE_STATUS)
}

pub fn first_open_status(statuses: &[StatusDefinition]) -> &str {
    statuses
        .iter()
        .find(|s| !s.is_done)
        .map(|s| s.name.as_str())
        .unwrap_or(FALLBACK_OPEN_STATUS)
}

/// The two redundant fields as read from a header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusPair {
    pub status: Option<String>,
    pub done: Option<bool>,
}

impl StatusPair {
    pub fn new(status: &str, done: bool) -> Self {
        Self {
            status: Some(status.to_string()),
            done: Some(done),
        }
    }

    pub fn from_record(record: &Record) -> Self {
        Self {
            status: record
                .get(STATUS.name)
                .and_then(FieldValue::as_non_empty_str)
                .map(str::to_string),
            done: record.get(DONE.name).and_then(FieldValue::as_bool),
        }
    }

    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.status.as_deref().unwrap_or("").as_bytes());
        hasher.update([0x1f]);
        hasher.update(match self.done {
            Some(true) => b"true".as_slice(),
            Some(false) => b"false".as_slice(),
            None => b"".as_slice(),
        });
        hex::encode(hasher.finalize())
    }

    pub fn with(&self, correction: &Correction) -> Self {
        let mut next = self.clone();
        match correction {
            Correction::SetDone(done) => next.done = Some(*done),
            Correction::SetStatus(status) => next.status = Some(status.clone()),
        }
        next
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correction {
    SetDone(bool),
    SetStatus(String),
}

impl Correction {
    pub fn field(&self) -> &'static str {
        match self {
            Correction::SetDone(_) => DONE.name,
            Correction::SetStatus(_) => STATUS.name,
        }
    }

    pub fn value(&self) -> FieldValue {
        match self {
            Correction::SetDone(done) => FieldValue::Bool(*done),
            Correction::SetStatus(status) => FieldValue::text(status.clone()),
        }
    }

    pub fn apply(&self, record: &mut Record) {
        record.insert(self.field(), self.value());
    }
}

/// Decides the corrective write, if any, for a pair that changed from
/// `previous` to `current`. With no previous observation `Status` is taken as
/// the field that changed.
pub fn derive_correction(
    previous: Option<&StatusPair>,
    current: &StatusPair,
    statuses: &[StatusDefinition],
) -> Option<Correction> {
    let status_changed = previous.is_none_or(|p| p.status != current.status);
    let done_changed = previous.is_some_and(|p| p.done != current.done);
    let current_def = current
        .status
        .as_deref()
        .and_then(|s| find_status(statuses, s));

    if status_changed
        && let Some(def) = current_def
        && current.done != Some(def.is_done)
    {
        return Some(Correction::SetDone(def.is_done));
    }

    if done_changed {
        let status_is_done = current_def.is_some_and(|d| d.is_done);
        match current.done {
            Some(true) if !status_is_done => {
                return Some(Correction::SetStatus(first_done_status(statuses).to_string()));
            }
            Some(false) if status_is_done => {
                return Some(Correction::SetStatus(first_open_status(statuses).to_string()));
            }
            _ => {}
        }
    }

    None
}

#[derive(Debug)]
struct Pending {
    fingerprint: String,
    expires: Instant,
}

#[derive(Debug, Default)]
struct SettleState {
    pending: HashMap<VaultPath, Pending>,
    last_seen: HashMap<VaultPath, StatusPair>,
}

/// Per-path memory of the pairs the engine wrote and last observed.
#[derive(Debug)]
pub struct SettleTracker {
    window: Duration,
    state: Mutex<SettleState>,
}

impl SettleTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(SettleState::default()),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SettleState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn last_seen(&self, path: &VaultPath) -> Option<StatusPair> {
        self.with_state(|s| s.last_seen.get(path).cloned())
    }

    pub fn observe(&self, path: &VaultPath, pair: StatusPair) {
        self.with_state(|s| {
            s.last_seen.insert(path.clone(), pair);
        });
    }

    /// True when `pair` is exactly what the engine wrote within the window.
    /// The pending entry is consumed either way.
    pub fn is_settled(&self, path: &VaultPath, pair: &StatusPair) -> bool {
        let fingerprint = pair.fingerprint();
        let now = Instant::now();
        self.with_state(|s| {
            s.pending
                .remove(path)
                .is_some_and(|p| p.expires >= now && p.fingerprint == fingerprint)
        })
    }

    pub fn record_write(&self, path: &VaultPath, written: StatusPair) {
        let expires = Instant::now() + self.window;
        self.with_state(|s| {
            s.pending.insert(
                path.clone(),
                Pending {
                    fingerprint: written.fingerprint(),
                    expires,
                },
            );
            s.last_seen.insert(path.clone(), written);
        });
    }

    pub fn forget(&self, path: &VaultPath) {
        self.with_state(|s| {
            s.pending.remove(path);
            s.last_seen.remove(path);
        });
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// One corrective write was made.
    Corrected {
        correction: Correction,
        revision: Revision,
    },
    /// The content matches the engine's own last write.
    Settled,
    /// Consistent already; nothing written.
    Unchanged,
    /// Not a document of a kind carrying the pair.
    NotApplicable,
}

/// Status/Done synchronizer for one entity schema.
#[derive(Debug)]
pub struct DerivedFieldSync {
    schema: EntitySchema,
    statuses: Vec<StatusDefinition>,
    tracker: SettleTracker,
}

impl DerivedFieldSync {
    pub fn new(schema: EntitySchema, statuses: Vec<StatusDefinition>, window: Duration) -> Self {
        Self {
            schema,
            statuses,
            tracker: SettleTracker::new(window),
        }
    }

    pub fn tracker(&self) -> &SettleTracker {
        &self.tracker
    }

    /// Records the current pair of `path` as its baseline without writing.
    /// Returns false for documents that do not carry the pair.
    pub fn prime_file<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        path: &VaultPath,
    ) -> Result<bool> {
        if !self.schema.has_status_pair() {
            return Ok(false);
        }
        let stored = store.read(path)?;
        let doc = codec::parse(&stored.text).map_err(|e| e.at(path))?;
        if !doc.has_header || kind_mismatch(&doc.record, self.schema.kind).is_some() {
            return Ok(false);
        }
        self.tracker.observe(path, StatusPair::from_record(&doc.record));
        Ok(true)
    }

    /// Runs one read-decide-write cycle. Callers serialize calls per path.
    pub fn sync_file<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        path: &VaultPath,
    ) -> Result<SyncOutcome> {
        if !self.schema.has_status_pair() {
            return Ok(SyncOutcome::NotApplicable);
        }

        let stored = store.read(path)?;
        let doc = codec::parse(&stored.text).map_err(|e| e.at(path))?;
        if !doc.has_header || kind_mismatch(&doc.record, self.schema.kind).is_some() {
            return Ok(SyncOutcome::NotApplicable);
        }

        let pair = StatusPair::from_record(&doc.record);
        if self.tracker.is_settled(path, &pair) {
            debug!(path = %path, "status pair settled");
            self.tracker.observe(path, pair);
            return Ok(SyncOutcome::Settled);
        }

        let previous = self.tracker.last_seen(path);
        let Some(correction) = derive_correction(previous.as_ref(), &pair, &self.statuses) else {
            self.tracker.observe(path, pair);
            return Ok(SyncOutcome::Unchanged);
        };

        let written = pair.with(&correction);
        let commit = store.update_header(path, &mut |record| {
            // The file may have moved on since it was read; leave newer edits alone.
            if StatusPair::from_record(record) == pair {
                correction.apply(record);
            }
            Ok(())
        })?;
        if !commit.changed {
            debug!(path = %path, "status pair changed before correction; skipping");
            self.tracker.forget(path);
            return Ok(SyncOutcome::Unchanged);
        }

        info!(
            path = %path,
            field = correction.field(),
            revision = commit.revision,
            "corrected derived field"
        );
        self.tracker.record_write(path, written);
        Ok(SyncOutcome::Corrected {
            correction,
            revision: commit.revision,
        })
    }
}
