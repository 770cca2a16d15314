use assert_cmd::Command;
use predicates::prelude::*;

fn oxitask() -> Command {
    let mut cmd = Command::cargo_bin("oxitask").unwrap_or_else(|e| panic!("binary: {e}"));
    cmd.env_remove("OBSIDIAN_VAULT");
    cmd
}

#[test]
fn create_reconcile_and_show_a_task() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let vault = temp.path().join("vault");
    std::fs::create_dir_all(&vault)?;

    oxitask()
        .arg("--vault")
        .arg(&vault)
        .args(["create", "task", "Write docs", "--project", "Website"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tasks/Write docs.md"));
    assert!(vault.join("Tasks/Write docs.md").is_file());

    std::fs::write(
        vault.join("Tasks/legacy.md"),
        "---\nType: Task\nTitle: Legacy\n---\n",
    )?;
    oxitask()
        .arg("--vault")
        .arg(&vault)
        .arg("reconcile")
        .assert()
        .success()
        .stdout(predicate::str::contains("files updated: 1"));

    oxitask()
        .arg("--vault")
        .arg(&vault)
        .args(["show", "Tasks/Write docs.md"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"title\": \"Write docs\"")
                .and(predicate::str::contains("\"project\": \"Website\"")),
        );
    Ok(())
}

#[test]
fn show_rejects_a_plain_note() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let vault = temp.path().join("vault");
    std::fs::create_dir_all(&vault)?;
    std::fs::write(vault.join("note.md"), "hello\n")?;

    oxitask()
        .arg("--vault")
        .arg(&vault)
        .args(["show", "note.md"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a task, project or area"));
    Ok(())
}

#[test]
fn missing_vault_is_an_error() {
    oxitask()
        .arg("reconcile")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--vault is required"));
}

#[test]
fn create_rejects_fields_the_kind_does_not_have() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let vault = temp.path().join("vault");
    std::fs::create_dir_all(&vault)?;

    oxitask()
        .arg("--vault")
        .arg(&vault)
        .args(["create", "area", "Home", "--area", "Life"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--area does not apply to area documents"));
    assert!(!vault.join("Areas/Home.md").exists());

    oxitask()
        .arg("--vault")
        .arg(&vault)
        .args(["create", "area", "Home", "--project", "House"])
        .assert()
        .success();
    oxitask()
        .arg("--vault")
        .arg(&vault)
        .arg("reconcile")
        .assert()
        .success()
        .stdout(predicate::str::contains("files updated: 0"));
    Ok(())
}
