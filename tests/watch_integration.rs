use std::time::Duration;

use oxitask::{Engine, EngineConfig, FieldValue, FsStore, SyncEvent, SyncService, Vault};

#[tokio::test]
async fn watcher_corrects_done_after_status_edit() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path().join("vault");
    std::fs::create_dir_all(root.join("Tasks"))?;
    let abs = root.join("Tasks/Ship.md");
    std::fs::write(
        &abs,
        "---\nTitle: Ship\nType: Task\nDone: false\nStatus: Backlog\n---\nbody\n",
    )?;

    let config = EngineConfig {
        watch_debounce_ms: 100,
        ..EngineConfig::default()
    };
    let engine = Engine::new(FsStore::new(Vault::open(&root)?), config)?;
    let mut service = SyncService::new(engine);
    let mut rx = service.subscribe();
    service.start_watching().await?;

    // Give the watcher a moment to start.
    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::write(
        &abs,
        "---\nTitle: Ship\nType: Task\nDone: false\nStatus: Done\n---\nbody\n",
    )?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut corrected = None;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), rx.recv()).await {
            Ok(Ok(SyncEvent::Corrected { field, value, .. })) => {
                corrected = Some((field, value));
                break;
            }
            Ok(Ok(_)) => {}
            Ok(Err(_)) => break,
            Err(_) => {}
        }
    }

    service.shutdown().await;
    assert_eq!(
        corrected,
        Some(("Done".to_string(), FieldValue::Bool(true)))
    );
    let text = std::fs::read_to_string(&abs)?;
    assert!(text.contains("Done: true\n"));
    assert!(text.ends_with("---\nbody\n"));
    Ok(())
}

#[tokio::test]
async fn watcher_keeps_an_unchecked_done_from_the_start() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path().join("vault");
    std::fs::create_dir_all(root.join("Tasks"))?;
    let abs = root.join("Tasks/Ship.md");
    std::fs::write(
        &abs,
        "---\nTitle: Ship\nType: Task\nDone: true\nStatus: Done\n---\nbody\n",
    )?;

    let config = EngineConfig {
        watch_debounce_ms: 100,
        ..EngineConfig::default()
    };
    let engine = Engine::new(FsStore::new(Vault::open(&root)?), config)?;
    let mut service = SyncService::new(engine);
    let mut rx = service.subscribe();
    service.start_watching().await?;

    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::write(
        &abs,
        "---\nTitle: Ship\nType: Task\nDone: false\nStatus: Done\n---\nbody\n",
    )?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut corrected = None;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), rx.recv()).await {
            Ok(Ok(SyncEvent::Corrected { field, value, .. })) => {
                corrected = Some((field, value));
                break;
            }
            Ok(Ok(_)) => {}
            Ok(Err(_)) => break,
            Err(_) => {}
        }
    }

    service.shutdown().await;
    assert_eq!(
        corrected,
        Some(("Status".to_string(), FieldValue::text("Backlog")))
    );
    let text = std::fs::read_to_string(&abs)?;
    assert!(text.contains("Done: false\n"));
    assert!(text.contains("Status: Backlog\n"));
    Ok(())
}
