use std::path::{Path, PathBuf};

use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

use crate::{
    EntityKind, Engine, FieldValue, FsStore, Result, Revision, SyncOutcome, Vault, VaultPath,
};

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A derived field was rewritten to match its counterpart.
    Corrected {
        path: VaultPath,
        field: String,
        value: FieldValue,
        revision: Revision,
    },
    /// The change was the echo of our own correction.
    Settled { path: VaultPath },
    Removed { path: VaultPath },
    Error {
        path: Option<VaultPath>,
        error: String,
    },
}

/// Watches the task folder and keeps Status/Done consistent as files change.
pub struct SyncService {
    engine: Engine<FsStore>,
    events: broadcast::Sender<SyncEvent>,
    shutdown_tx: watch::Sender<bool>,
    watcher: Option<notify::RecommendedWatcher>,
    watch_task: Option<tokio::task::JoinHandle<()>>,
}

impl SyncService {
    pub fn new(engine: Engine<FsStore>) -> Self {
        let (events, _) = broadcast::channel(512);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            engine,
            events,
            shutdown_tx,
            watcher: None,
            watch_task: None,
        }
    }

    pub fn engine(&self) -> &Engine<FsStore> {
        &self.engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub async fn start_watching(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }

        let (raw_tx, raw_rx) =
            mpsc::unbounded_channel::<std::result::Result<notify::Event, notify::Error>>();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = raw_tx.send(res);
        })?;
        let root = self.engine.store().vault().root().to_path_buf();
        watcher.watch(&root, RecursiveMode::Recursive)?;
        // Events queue up in `raw_rx` while the baselines are read.
        self.engine.prime().await?;

        let engine = self.engine.clone();
        let events = self.events.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let debounce = self.engine.config().watch_debounce();
        self.watch_task = Some(tokio::spawn(async move {
            watch_loop(engine, events, raw_rx, &mut shutdown_rx, debounce).await;
        }));
        self.watcher = Some(watcher);
        debug!(root = %root.display(), "watching vault");

        Ok(())
    }

    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        self.watcher.take();
        if let Some(handle) = self.watch_task.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn watch_loop(
    engine: Engine<FsStore>,
    events: broadcast::Sender<SyncEvent>,
    mut raw_rx: mpsc::UnboundedReceiver<std::result::Result<notify::Event, notify::Error>>,
    shutdown_rx: &mut watch::Receiver<bool>,
    debounce: std::time::Duration,
) {
    let task_folder = engine.manager(EntityKind::Task).profile().folder.clone();
    let mut pending: Vec<notify::Event> = Vec::new();
    let mut debounce_armed = false;
    let debounce_timer =
        tokio::time::sleep(std::time::Duration::from_secs(60 * 60 * 24 * 365 * 10));
    tokio::pin!(debounce_timer);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            maybe = raw_rx.recv() => {
                let Some(res) = maybe else { break; };
                match res {
                    Ok(ev) => {
                        pending.push(ev);
                        debounce_armed = true;
                        debounce_timer
                            .as_mut()
                            .reset(tokio::time::Instant::now() + debounce);
                    }
                    Err(err) => {
                        let _ = events.send(SyncEvent::Error { path: None, error: err.to_string() });
                    }
                }
            }

            _ = &mut debounce_timer, if debounce_armed => {
                debounce_armed = false;
                let batch = std::mem::take(&mut pending);
                let ops = events_to_ops(engine.store().vault(), &task_folder, &batch);
                for op in ops {
                    if let Some(ev) = apply_op(&engine, op).await {
                        let _ = events.send(ev);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    Sync(VaultPath),
    Forget(VaultPath),
}

async fn apply_op(engine: &Engine<FsStore>, op: Op) -> Option<SyncEvent> {
    match op {
        Op::Forget(path) => {
            engine.forget(&path);
            Some(SyncEvent::Removed { path })
        }
        Op::Sync(path) => match engine.handle_external_change(&path).await {
            Ok(SyncOutcome::Corrected {
                correction,
                revision,
            }) => Some(SyncEvent::Corrected {
                field: correction.field().to_string(),
                value: correction.value(),
                path,
                revision,
            }),
            Ok(SyncOutcome::Settled) => Some(SyncEvent::Settled { path }),
            Ok(SyncOutcome::Unchanged | SyncOutcome::NotApplicable) => None,
            Err(err) => {
                warn!(path = %path, error = %err, "status sync failed");
                Some(SyncEvent::Error {
                    path: Some(path),
                    error: err.to_string(),
                })
            }
        },
    }
}

/// Collapses a debounced batch into per-path operations, first occurrence wins.
fn events_to_ops(vault: &Vault, task_folder: &Path, batch: &[notify::Event]) -> Vec<Op> {
    let mut ops: Vec<Op> = Vec::new();
    let mut push = |op: Op| {
        if !ops.contains(&op) {
            ops.push(op);
        }
    };
    let relevant = |abs: &PathBuf| {
        vault
            .to_rel(abs)
            .ok()
            .filter(|rel| rel.starts_with(task_folder) && vault.is_document_rel(rel))
    };

    for ev in batch {
        // Reads (ours included) produce access/metadata events; they never change content.
        match &ev.kind {
            EventKind::Access(_) => continue,
            EventKind::Modify(notify::event::ModifyKind::Metadata(_)) => continue,
            _ => {}
        }

        match &ev.kind {
            EventKind::Modify(notify::event::ModifyKind::Name(_)) if ev.paths.len() == 2 => {
                if let Some(from) = relevant(&ev.paths[0]) {
                    push(Op::Forget(from));
                }
                if let Some(to) = relevant(&ev.paths[1]) {
                    push(Op::Sync(to));
                }
            }
            EventKind::Remove(_) => {
                for p in &ev.paths {
                    if let Some(rel) = relevant(p) {
                        push(Op::Forget(rel));
                    }
                }
            }
            _ => {
                for p in &ev.paths {
                    if let Some(rel) = relevant(p) {
                        push(Op::Sync(rel));
                    }
                }
            }
        }
    }

    ops
}
