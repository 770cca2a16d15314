use std::sync::Arc;

use oxitask::{
    Engine, EngineConfig, EntityFields, EntityKind, Error, FieldValue, FsStore, MemoryStore,
    Record, Vault, VaultPath,
};

fn fs_engine() -> anyhow::Result<(tempfile::TempDir, Engine<FsStore>)> {
    let temp = tempfile::tempdir()?;
    let root = temp.path().join("vault");
    std::fs::create_dir_all(&root)?;
    let vault = Vault::open(&root)?;
    let config = EngineConfig::load(&vault)?;
    Ok((temp, Engine::new(FsStore::new(vault), config)?))
}

fn record(pairs: &[(&str, FieldValue)]) -> Record {
    pairs.iter().cloned().collect()
}

#[tokio::test]
async fn created_task_loads_back_with_plain_names() -> anyhow::Result<()> {
    let (_temp, engine) = fs_engine()?;

    let path = engine
        .create_entity(
            EntityKind::Task,
            record(&[
                ("Title", FieldValue::text("Plan sprint")),
                ("Project", FieldValue::text("Website")),
                ("Areas", FieldValue::strings(["Work", "Team"])),
                ("Due Date", FieldValue::text("2025-06-30")),
                ("Description", FieldValue::text("Pick the top five issues.")),
            ]),
        )
        .await?;
    assert_eq!(path, VaultPath::new("Tasks/Plan sprint.md")?);

    let on_disk = std::fs::read_to_string(engine.store().vault().to_abs(&path))?;
    assert!(on_disk.contains("Project: \"[[Projects/Website|Website]]\"\n"));
    assert!(on_disk.contains("Pick the top five issues."));

    let entity = engine
        .load_entity(EntityKind::Task, &path)
        .await?
        .expect("task loads");
    assert!(entity.modified.is_some());
    let EntityFields::Task(fields) = &entity.fields else {
        panic!("expected task fields");
    };
    assert_eq!(fields.title, "Plan sprint");
    assert_eq!(fields.project.as_deref(), Some("Website"));
    assert_eq!(fields.areas, vec!["Work", "Team"]);
    assert_eq!(fields.status.as_deref(), Some("Backlog"));
    assert!(!fields.done);
    assert_eq!(
        fields.due_date,
        chrono::NaiveDate::from_ymd_opt(2025, 6, 30)
    );

    // Same entity through the Type-driven loader.
    assert_eq!(engine.load(&path).await?, Some(entity));
    Ok(())
}

#[tokio::test]
async fn second_create_with_same_name_is_rejected() -> anyhow::Result<()> {
    let (_temp, engine) = fs_engine()?;
    let data = record(&[("Name", FieldValue::text("Health/Fitness"))]);

    let path = engine.create_entity(EntityKind::Area, data.clone()).await?;
    assert_eq!(path, VaultPath::new("Areas/Health-Fitness.md")?);

    let err = engine.create_entity(EntityKind::Area, data).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(p) if p == path));
    Ok(())
}

#[tokio::test]
async fn loading_through_the_wrong_manager_yields_nothing() -> anyhow::Result<()> {
    let (_temp, engine) = fs_engine()?;
    let path = engine
        .create_entity(
            EntityKind::Project,
            record(&[("Name", FieldValue::text("Launch"))]),
        )
        .await?;

    assert!(engine.load_entity(EntityKind::Task, &path).await?.is_none());
    let err = engine
        .update_entity_properties(EntityKind::Task, &path)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::WrongKind { expected, found, .. } if expected == "Task" && found == "Project"
    ));

    let text = std::fs::read_to_string(engine.store().vault().to_abs(&path))?;
    assert!(text.contains("## Tasks\n\n![[Bases/Launch.base]]\n"));
    Ok(())
}

#[tokio::test]
async fn update_migrates_header_and_keeps_body() -> anyhow::Result<()> {
    let (temp, engine) = fs_engine()?;
    let abs = temp.path().join("vault/Tasks/old.md");
    std::fs::create_dir_all(abs.parent().expect("parent"))?;
    let body = "\n# Log\n\n- [ ] first\n\ttabbed line   \n";
    std::fs::write(
        &abs,
        format!("---\nType: Task\nTitle: Old\nlegacy-id: 7\n---{body}"),
    )?;
    let path = VaultPath::new("Tasks/old.md")?;

    let outcome = engine.update_entity_properties(EntityKind::Task, &path).await?;
    assert!(outcome.has_changes);
    assert!(outcome.revision.is_some());

    let text = std::fs::read_to_string(&abs)?;
    assert!(text.ends_with(&format!("---{body}")));
    assert!(text.starts_with("---\nTitle: Old\nType: Task\nCategory: Task\n"));
    assert!(text.contains("\nlegacy-id: 7\n"));

    let again = engine.update_entity_properties(EntityKind::Task, &path).await?;
    assert!(!again.has_changes);
    assert_eq!(again.change_count, 0);
    Ok(())
}

#[tokio::test]
async fn create_times_out_when_the_index_never_catches_up() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.set_index_lag(true);
    let config = EngineConfig {
        index_timeout_ms: 30,
        ..EngineConfig::default()
    };
    let engine = Engine::with_store(store.clone(), config)?;

    let err = engine
        .create_entity(
            EntityKind::Task,
            record(&[("Title", FieldValue::text("Slow"))]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StoreTimeout { ref path, .. } if path.as_str_lossy() == "Tasks/Slow.md"));
    // The write itself happened; only the read-back wait failed.
    assert!(store.text(&VaultPath::new("Tasks/Slow.md")?).is_some());
    Ok(())
}
