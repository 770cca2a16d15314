use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::VaultPath;

/// One async mutex per document path. Operations on different paths run in
/// parallel; operations on the same path are serialized.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<VaultPath, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, path: &VaultPath) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().await;
            // Entries nobody holds or waits on.
            map.retain(|_, l| Arc::strong_count(l) > 1);
            map.entry(path.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}
