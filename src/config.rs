use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::{EntityKind, Error, Result, SanitizeOptions, StatusDefinition, Vault};

/// Settings file, relative to the vault root.
pub const SETTINGS_PATH: &str = ".obsidian/oxitask/settings.toml";

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root folder of task documents.
    pub tasks_folder: String,
    /// Root folder of project documents.
    pub projects_folder: String,
    /// Root folder of area documents.
    pub areas_folder: String,
    /// Folder holding the per-entity generated view files.
    pub views_folder: String,
    /// Ordered status list driving the Status/Done synchronization.
    pub statuses: Vec<StatusDefinition>,
    /// Extra header keys that reconciliation must never remove.
    pub preserve_keys: Vec<String>,
    /// Header keys from older layouts that reconciliation removes.
    pub retired_keys: Vec<String>,
    pub sanitize: SanitizeOptions,
    pub templates: TemplateConfig,
    /// Debounce window for filesystem events.
    pub watch_debounce_ms: u64,
    /// How long a corrective write suppresses its own echo.
    pub settle_window_ms: u64,
    /// Upper bound on waiting for the store to index a commit.
    pub index_timeout_ms: u64,
    /// Files reconciled concurrently during a batch.
    pub max_parallel: usize,
}

/// Optional per-kind template documents (vault-relative paths).
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub task: Option<String>,
    pub project: Option<String>,
    pub area: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tasks_folder: "Tasks".into(),
            projects_folder: "Projects".into(),
            areas_folder: "Areas".into(),
            views_folder: "Bases".into(),
            statuses: vec![
                StatusDefinition::new("Backlog", false, false),
                StatusDefinition::new("In Progress", false, true),
                StatusDefinition::new("Done", true, false),
            ],
            preserve_keys: Vec::new(),
            retired_keys: Vec::new(),
            sanitize: SanitizeOptions::default(),
            templates: TemplateConfig::default(),
            watch_debounce_ms: 400,
            settle_window_ms: 2_000,
            index_timeout_ms: 5_000,
            max_parallel: 8,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let cfg: EngineConfig =
            toml::from_str(input).map_err(|err| Error::ConfigToml(err.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads the vault settings file, falling back to defaults when it is absent.
    pub fn load(vault: &Vault) -> Result<Self> {
        let path = vault.root().join(SETTINGS_PATH);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "settings not found; using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(Error::io(&path, err)),
        };
        let cfg = Self::from_toml_str(&text)?;
        info!(path = %path.display(), statuses = cfg.statuses.len(), "settings loaded");
        Ok(cfg)
    }

    pub fn folder_for(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::Task => &self.tasks_folder,
            EntityKind::Project => &self.projects_folder,
            EntityKind::Area => &self.areas_folder,
        }
    }

    pub fn template_for(&self, kind: EntityKind) -> Option<&str> {
        match kind {
            EntityKind::Task => self.templates.task.as_deref(),
            EntityKind::Project => self.templates.project.as_deref(),
            EntityKind::Area => self.templates.area.as_deref(),
        }
    }

    pub fn views_folder(&self) -> PathBuf {
        PathBuf::from(&self.views_folder)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_millis(self.index_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        for kind in EntityKind::ALL {
            if self.folder_for(kind).trim().is_empty() {
                return Err(Error::ConfigToml(format!(
                    "{} folder must not be empty",
                    kind.as_str().to_lowercase()
                )));
            }
        }
        if self.max_parallel == 0 {
            return Err(Error::ConfigToml("max_parallel must be at least 1".into()));
        }
        if self.sanitize.max_length == 0 {
            return Err(Error::ConfigToml(
                "sanitize.max_length must be at least 1".into(),
            ));
        }
        for status in &self.statuses {
            if status.name.trim().is_empty() {
                return Err(Error::ConfigToml("status name must not be empty".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = EngineConfig::from_toml_str(
            r#"
tasks_folder = "Work/Tasks"

[[statuses]]
name = "Todo"

[[statuses]]
name = "Shipped"
is_done = true
"#,
        )
        .unwrap();
        assert_eq!(cfg.folder_for(EntityKind::Task), "Work/Tasks");
        assert_eq!(cfg.folder_for(EntityKind::Project), "Projects");
        assert_eq!(cfg.statuses.len(), 2);
        assert!(cfg.statuses[1].is_done);
        assert_eq!(cfg.max_parallel, 8);
    }

    #[test]
    fn empty_folder_is_rejected() {
        let err = EngineConfig::from_toml_str("areas_folder = \"  \"").unwrap_err();
        assert!(matches!(err, Error::ConfigToml(_)));
    }

    #[test]
    fn missing_settings_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::open(dir.path()).unwrap();
        assert_eq!(EngineConfig::load(&vault).unwrap(), EngineConfig::default());
    }
}
