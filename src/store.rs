//! Document storage behind a narrow trait.
//!
//! Every successful write returns a monotonically increasing [`Revision`].
//! A store publishes the highest revision its index has caught up with, and
//! callers that need read-after-write wait on that instead of sleeping.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::codec;
use crate::{Error, Record, Result, Vault, VaultPath};

pub type Revision = u64;

/// Header transform applied by [`DocumentStore::update_header`].
pub type HeaderTransform<'a> = &'a mut dyn FnMut(&mut Record) -> Result<()>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub text: String,
    pub created: Option<SystemTime>,
    pub modified: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    pub revision: Revision,
    /// False when the transform left the header as it was; nothing was written.
    pub changed: bool,
}

pub trait DocumentStore: Send + Sync + 'static {
    fn read(&self, path: &VaultPath) -> Result<StoredDocument>;

    fn exists(&self, path: &VaultPath) -> bool;

    /// Creates a new document. Fails with [`Error::AlreadyExists`] on collision.
    fn create(&self, path: &VaultPath, text: &str) -> Result<Revision>;

    /// Atomically rewrites the header of an existing document. The body is
    /// kept byte-for-byte.
    fn update_header(&self, path: &VaultPath, transform: HeaderTransform<'_>) -> Result<Commit>;

    /// Markdown documents under `folder`, sorted.
    fn list(&self, folder: &Path) -> Result<Vec<VaultPath>>;

    /// Highest revision visible to subsequent reads.
    fn indexed(&self) -> watch::Receiver<Revision>;
}

/// Waits until the store has indexed `revision`. Re-checks once after the
/// timeout before giving up.
pub async fn wait_for_index(
    mut indexed: watch::Receiver<Revision>,
    path: &VaultPath,
    revision: Revision,
    timeout: Duration,
) -> Result<()> {
    if *indexed.borrow() >= revision {
        return Ok(());
    }
    let reached = matches!(
        tokio::time::timeout(timeout, indexed.wait_for(|r| *r >= revision)).await,
        Ok(Ok(_))
    );
    if reached {
        return Ok(());
    }
    if *indexed.borrow() >= revision {
        debug!(path = %path, revision, "index caught up on re-check");
        return Ok(());
    }
    warn!(path = %path, revision, "store index timed out");
    Err(Error::StoreTimeout {
        path: path.clone(),
        revision,
    })
}

/// Runs synchronous store work off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

#[derive(Debug)]
struct RevisionClock {
    next: AtomicU64,
    indexed: watch::Sender<Revision>,
}

impl RevisionClock {
    fn new() -> Self {
        let (indexed, _) = watch::channel(0);
        Self {
            next: AtomicU64::new(1),
            indexed,
        }
    }

    fn tick(&self) -> Revision {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    fn publish(&self, revision: Revision) {
        self.indexed.send_if_modified(|current| {
            if revision > *current {
                *current = revision;
                true
            } else {
                false
            }
        });
    }

    fn latest(&self) -> Revision {
        self.next.load(Ordering::SeqCst).saturating_sub(1)
    }
}

/// Markdown files on disk under a vault root.
#[derive(Debug)]
pub struct FsStore {
    vault: Vault,
    clock: RevisionClock,
}

impl FsStore {
    pub fn new(vault: Vault) -> Self {
        Self {
            vault,
            clock: RevisionClock::new(),
        }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    fn write_atomic(&self, path: &VaultPath, text: &str) -> Result<()> {
        let abs = self.vault.to_abs(path);
        let file_name = abs
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = abs.with_file_name(format!(".{file_name}.oxitask.tmp"));
        std::fs::write(&tmp, text).map_err(|e| Error::io(&tmp, e))?;
        std::fs::rename(&tmp, &abs).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            Error::io(&abs, e)
        })
    }
}

impl DocumentStore for FsStore {
    fn read(&self, path: &VaultPath) -> Result<StoredDocument> {
        let abs = self.vault.to_abs(path);
        let text = match std::fs::read_to_string(&abs) {
            Ok(t) => t,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.clone()));
            }
            Err(err) => return Err(Error::io(&abs, err)),
        };
        let meta = std::fs::metadata(&abs).map_err(|e| Error::io(&abs, e))?;
        Ok(StoredDocument {
            text,
            created: meta.created().ok(),
            modified: meta.modified().ok(),
        })
    }

    fn exists(&self, path: &VaultPath) -> bool {
        self.vault.to_abs(path).is_file()
    }

    fn create(&self, path: &VaultPath, text: &str) -> Result<Revision> {
        let abs = self.vault.to_abs(path);
        if let Some(parent) = abs.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&abs)
        {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists(path.clone()));
            }
            Err(err) => return Err(Error::io(&abs, err)),
        };
        file.write_all(text.as_bytes())
            .map_err(|e| Error::io(&abs, e))?;

        let revision = self.clock.tick();
        self.clock.publish(revision);
        debug!(path = %path, revision, "document created");
        Ok(revision)
    }

    fn update_header(&self, path: &VaultPath, transform: HeaderTransform<'_>) -> Result<Commit> {
        let current = self.read(path)?;
        let Some(text) = codec::rewrite_header(&current.text, transform).map_err(|e| e.at(path))?
        else {
            return Ok(Commit {
                revision: self.clock.latest(),
                changed: false,
            });
        };
        self.write_atomic(path, &text)?;
        let revision = self.clock.tick();
        self.clock.publish(revision);
        debug!(path = %path, revision, "header rewritten");
        Ok(Commit {
            revision,
            changed: true,
        })
    }

    fn list(&self, folder: &Path) -> Result<Vec<VaultPath>> {
        let root = self.vault.root().join(folder);
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match self.vault.to_rel(entry.path()) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if self.vault.is_document_rel(&rel) {
                out.push(rel);
            }
        }
        out.sort();
        Ok(out)
    }

    fn indexed(&self) -> watch::Receiver<Revision> {
        self.clock.indexed.subscribe()
    }
}

#[derive(Debug, Clone)]
struct MemoryDocument {
    text: String,
    created: SystemTime,
    modified: SystemTime,
}

/// In-process store. Index lag can be switched on to exercise waiting paths.
#[derive(Debug)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<VaultPath, MemoryDocument>>,
    clock: RevisionClock,
    lagging: AtomicBool,
    writes: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(BTreeMap::new()),
            clock: RevisionClock::new(),
            lagging: AtomicBool::new(false),
            writes: AtomicU64::new(0),
        }
    }

    /// While set, commits are not published until [`MemoryStore::catch_up`].
    pub fn set_index_lag(&self, lagging: bool) {
        self.lagging.store(lagging, Ordering::SeqCst);
    }

    pub fn catch_up(&self) {
        self.clock.publish(self.clock.latest());
    }

    /// Writes made through [`DocumentStore::create`] and [`DocumentStore::update_header`].
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Replaces a document as an outside editor would.
    pub fn put(&self, path: &VaultPath, text: impl Into<String>) -> Revision {
        let now = SystemTime::now();
        self.with_docs(|docs| {
            let created = docs.get(path).map(|d| d.created).unwrap_or(now);
            docs.insert(
                path.clone(),
                MemoryDocument {
                    text: text.into(),
                    created,
                    modified: now,
                },
            );
        });
        self.commit()
    }

    pub fn text(&self, path: &VaultPath) -> Option<String> {
        self.with_docs(|docs| docs.get(path).map(|d| d.text.clone()))
    }

    fn with_docs<R>(&self, f: impl FnOnce(&mut BTreeMap<VaultPath, MemoryDocument>) -> R) -> R {
        let mut guard = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    fn commit(&self) -> Revision {
        let revision = self.clock.tick();
        if !self.lagging.load(Ordering::SeqCst) {
            self.clock.publish(revision);
        }
        revision
    }
}

impl DocumentStore for MemoryStore {
    fn read(&self, path: &VaultPath) -> Result<StoredDocument> {
        self.with_docs(|docs| {
            docs.get(path)
                .map(|d| StoredDocument {
                    text: d.text.clone(),
                    created: Some(d.created),
                    modified: Some(d.modified),
                })
                .ok_or_else(|| Error::NotFound(path.clone()))
        })
    }

    fn exists(&self, path: &VaultPath) -> bool {
        self.with_docs(|docs| docs.contains_key(path))
    }

    fn create(&self, path: &VaultPath, text: &str) -> Result<Revision> {
        let now = SystemTime::now();
        self.with_docs(|docs| {
            if docs.contains_key(path) {
                return Err(Error::AlreadyExists(path.clone()));
            }
            docs.insert(
                path.clone(),
                MemoryDocument {
                    text: text.to_string(),
                    created: now,
                    modified: now,
                },
            );
            Ok(())
        })?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(self.commit())
    }

    fn update_header(&self, path: &VaultPath, transform: HeaderTransform<'_>) -> Result<Commit> {
        let changed = self.with_docs(|docs| {
            let doc = docs
                .get_mut(path)
                .ok_or_else(|| Error::NotFound(path.clone()))?;
            let Some(text) = codec::rewrite_header(&doc.text, transform).map_err(|e| e.at(path))?
            else {
                return Ok::<_, Error>(false);
            };
            doc.text = text;
            doc.modified = SystemTime::now();
            Ok(true)
        })?;
        if !changed {
            return Ok(Commit {
                revision: self.clock.latest(),
                changed: false,
            });
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(Commit {
            revision: self.commit(),
            changed: true,
        })
    }

    fn list(&self, folder: &Path) -> Result<Vec<VaultPath>> {
        Ok(self.with_docs(|docs| {
            docs.keys()
                .filter(|p| p.starts_with(folder) && p.is_markdown())
                .cloned()
                .collect()
        }))
    }

    fn indexed(&self) -> watch::Receiver<Revision> {
        self.clock.indexed.subscribe()
    }
}
