use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

const IGNORED_DIRS: &[&str] = &[".obsidian", ".git", ".trash", "node_modules"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VaultPath(PathBuf);

impl VaultPath {
    pub fn new(rel: impl AsRef<Path>) -> Result<Self> {
        Self::try_from(rel.as_ref())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn as_str_lossy(&self) -> String {
        self.0.to_string_lossy().to_string()
    }

    pub fn join(&self, child: impl AsRef<Path>) -> Result<Self> {
        Self::try_from(self.0.join(child).as_path())
    }

    /// File name without extension, used as the fallback entity name.
    pub fn stem(&self) -> String {
        self.0
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_string()
    }

    pub fn is_markdown(&self) -> bool {
        self.0
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("md"))
    }

    pub fn starts_with(&self, folder: &Path) -> bool {
        self.0.starts_with(folder)
    }
}

impl fmt::Display for VaultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl serde::Serialize for VaultPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str_lossy())
    }
}

impl TryFrom<&Path> for VaultPath {
    type Error = Error;

    fn try_from(value: &Path) -> Result<Self> {
        if value.as_os_str().is_empty() {
            return Err(Error::InvalidVaultPath("empty path".into()));
        }
        if value.is_absolute() {
            return Err(Error::InvalidVaultPath(
                "absolute paths are not allowed".into(),
            ));
        }

        let mut cleaned = PathBuf::new();
        for c in value.components() {
            match c {
                Component::Prefix(_) | Component::RootDir => {
                    return Err(Error::InvalidVaultPath(
                        "absolute paths are not allowed".into(),
                    ));
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(Error::InvalidVaultPath(
                        "path traversal is not allowed".into(),
                    ));
                }
                Component::Normal(part) => cleaned.push(part),
            }
        }

        if cleaned.as_os_str().is_empty() {
            return Err(Error::InvalidVaultPath("empty path".into()));
        }

        Ok(Self(cleaned))
    }
}

impl TryFrom<&str> for VaultPath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::try_from(Path::new(value))
    }
}

#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
}

impl Vault {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            return Err(Error::VaultNotFound(root));
        }
        let root = std::fs::canonicalize(&root).map_err(|e| Error::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn to_abs(&self, rel: &VaultPath) -> PathBuf {
        self.root.join(rel.as_path())
    }

    pub fn to_rel(&self, abs: &Path) -> Result<VaultPath> {
        let abs = if abs.is_absolute() {
            abs.to_path_buf()
        } else {
            self.root.join(abs)
        };

        let abs = std::fs::canonicalize(&abs).unwrap_or(abs);
        if !abs.starts_with(&self.root) {
            return Err(Error::PathOutsideVault(abs));
        }
        let rel = abs
            .strip_prefix(&self.root)
            .map_err(|_| Error::PathOutsideVault(abs.clone()))?;
        VaultPath::try_from(rel)
    }

    pub fn is_ignored_rel(&self, rel: &Path) -> bool {
        rel.components().any(|c| {
            let Component::Normal(part) = c else {
                return false;
            };
            let s = part.to_string_lossy();
            IGNORED_DIRS.iter().any(|d| *d == s)
        })
    }

    /// Markdown documents that can carry an entity record.
    pub fn is_document_rel(&self, rel: &VaultPath) -> bool {
        if self.is_ignored_rel(rel.as_path()) || !rel.is_markdown() {
            return false;
        }
        let file_name = rel
            .as_path()
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        !file_name.starts_with('.')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_path_rejects_traversal_and_absolute() {
        assert!(VaultPath::new("../x.md").is_err());
        assert!(VaultPath::new("/x.md").is_err());
        assert!(VaultPath::new("").is_err());
        let p = VaultPath::new("./Tasks/a.md").unwrap();
        assert_eq!(p.as_str_lossy(), "Tasks/a.md");
        assert_eq!(p.stem(), "a");
        assert!(p.is_markdown());
    }

    #[test]
    fn hidden_and_ignored_files_are_not_documents() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::open(dir.path()).unwrap();
        assert!(vault.is_document_rel(&VaultPath::new("Tasks/a.md").unwrap()));
        assert!(!vault.is_document_rel(&VaultPath::new("Tasks/.a.md").unwrap()));
        assert!(!vault.is_document_rel(&VaultPath::new(".obsidian/a.md").unwrap()));
        assert!(!vault.is_document_rel(&VaultPath::new("Tasks/a.png").unwrap()));
    }
}
