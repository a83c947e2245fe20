use crate::config::ProjectSettings;
use crate::error::{DependapyError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

pub const MANIFEST_FILE: &str = "pyproject.toml";

const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".venv",
    "venv",
    ".tox",
    ".nox",
    "node_modules",
    "__pycache__",
    "site-packages",
];

/// Finds every pyproject.toml below a repository root.
pub struct ProjectScanner {
    repo_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ProjectInfo {
    pub root: PathBuf,
    /// Manifest paths in walk order: files before subdirectories, each sorted
    /// by name.
    pub manifests: Vec<PathBuf>,
}

impl ProjectScanner {
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Self {
        Self {
            repo_path: repo_path.as_ref().to_path_buf(),
        }
    }

    pub fn scan(&self) -> Result<ProjectInfo> {
        let root = Self::resolve_root(&self.repo_path)?;
        let excluded = Self::excluded_dirs(&root);

        let manifests = WalkDir::new(&root)
            .follow_links(false)
            .sort_by(|a, b| {
                a.file_type()
                    .is_dir()
                    .cmp(&b.file_type().is_dir())
                    .then_with(|| a.file_name().cmp(b.file_name()))
            })
            .into_iter()
            .filter_entry(|entry| !Self::is_skipped(entry, &root, &excluded))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable path: {e}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == MANIFEST_FILE)
            .map(|entry| entry.into_path())
            .collect::<Vec<_>>();

        debug!("Found {} manifest(s) under {}", manifests.len(), root.display());

        Ok(ProjectInfo { root, manifests })
    }

    /// The canonical walk root. Every manifest path returned lies below it.
    fn resolve_root(path: &Path) -> Result<PathBuf> {
        let root = path.canonicalize().map_err(|e| {
            DependapyError::ProjectValidation(format!(
                "Repository path '{}' is not accessible: {e}",
                path.display()
            ))
        })?;
        if !root.is_dir() {
            return Err(DependapyError::ProjectValidation(format!(
                "Repository path '{}' is not a directory",
                root.display()
            )));
        }
        Ok(root)
    }

    fn is_skipped(entry: &DirEntry, root: &Path, excluded: &[PathBuf]) -> bool {
        if !entry.file_type().is_dir() || entry.depth() == 0 {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        if SKIPPED_DIRS.contains(&name.as_ref()) {
            return true;
        }
        entry
            .path()
            .strip_prefix(root)
            .map(|relative| excluded.iter().any(|ex| relative == ex))
            .unwrap_or(false)
    }

    /// `exclude` entries of the root manifest's `[tool.dependapy]` table.
    fn excluded_dirs(root: &Path) -> Vec<PathBuf> {
        let Ok(text) = fs::read_to_string(root.join(MANIFEST_FILE)) else {
            return Vec::new();
        };
        match ProjectSettings::from_manifest_text(&text) {
            Ok(settings) => settings
                .exclude
                .iter()
                .map(|dir| PathBuf::from(dir.trim_matches('/')))
                .collect(),
            Err(e) => {
                warn!("Ignoring [tool.dependapy] exclude in root manifest: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "[project]\nname = \"x\"\n").unwrap();
    }

    #[test]
    fn finds_nested_manifests_in_sorted_order() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "pyproject.toml");
        touch(dir.path(), "services/b/pyproject.toml");
        touch(dir.path(), "services/a/pyproject.toml");

        let info = ProjectScanner::new(dir.path()).scan().unwrap();
        let relative: Vec<_> = info
            .manifests
            .iter()
            .map(|p| p.strip_prefix(&info.root).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            relative,
            vec![
                PathBuf::from("pyproject.toml"),
                PathBuf::from("services/a/pyproject.toml"),
                PathBuf::from("services/b/pyproject.toml"),
            ]
        );
    }

    #[test]
    fn skips_virtualenvs_and_excluded_dirs() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("pyproject.toml"),
            "[project]\nname = \"root\"\n\n[tool.dependapy]\nexclude = [\"third_party/\"]\n",
        )
        .unwrap();
        touch(dir.path(), ".venv/lib/site/pyproject.toml");
        touch(dir.path(), "node_modules/x/pyproject.toml");
        touch(dir.path(), "third_party/vendored/pyproject.toml");
        touch(dir.path(), "lib/pyproject.toml");
        touch(dir.path(), ".git/modules/x/pyproject.toml");

        let info = ProjectScanner::new(dir.path()).scan().unwrap();
        assert_eq!(info.manifests.len(), 2);
        assert!(info.manifests.iter().all(|p| !p.to_string_lossy().contains("third_party")));
    }

    #[test]
    fn invalid_root_is_a_validation_error() {
        let dir = tempdir().unwrap();
        let err = ProjectScanner::new(dir.path().join("nope")).scan().unwrap_err();
        assert!(err.is_fatal());

        let file = dir.path().join("pyproject.toml");
        fs::write(&file, "[project]\n").unwrap();
        let err = ProjectScanner::new(&file).scan().unwrap_err();
        assert!(matches!(err, DependapyError::ProjectValidation(_)));
    }

    #[test]
    fn manifests_stay_below_the_canonical_root() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "a/pyproject.toml");
        let dotted = dir.path().join("a/..");

        let info = ProjectScanner::new(&dotted).scan().unwrap();
        assert_eq!(info.root, dir.path().canonicalize().unwrap());
        assert!(info.manifests.iter().all(|p| p.starts_with(&info.root)));
    }
}
