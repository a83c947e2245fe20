use crate::error::{DependapyError, Result};
use crate::publish::SourceControl;
use crate::reconcile::UpdatePlan;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Commits every updated manifest on one local branch and exports the commit
/// as a patch file. No network access.
pub struct OfflinePatcher<'a> {
    git: &'a dyn SourceControl,
}

impl<'a> OfflinePatcher<'a> {
    pub fn new(git: &'a dyn SourceControl) -> Self {
        Self { git }
    }

    pub fn branch_name(prefix: &str) -> String {
        format!("{prefix}/offline-updates")
    }

    /// Returns the patch path, or `None` when no manifest changed.
    pub fn export(
        &self,
        updates: &[(UpdatePlan, String)],
        prefix: &str,
        output: &Path,
    ) -> Result<Option<PathBuf>> {
        let updates: Vec<_> = updates.iter().filter(|(plan, _)| !plan.is_empty()).collect();
        if updates.is_empty() {
            return Ok(None);
        }

        if !self.git.is_clean()? {
            return Err(DependapyError::ProjectValidation(
                "Working tree has uncommitted changes; commit or stash them first".to_string(),
            ));
        }

        let original = self.git.current_ref()?;
        let result = self.commit_and_export(&updates, prefix, &original, output);

        if let Err(restore) = self.git.checkout(&original) {
            if result.is_ok() {
                return Err(restore);
            }
            warn!("Could not return to {original}: {restore}");
        }
        result
    }

    fn commit_and_export(
        &self,
        updates: &[&(UpdatePlan, String)],
        prefix: &str,
        original: &str,
        output: &Path,
    ) -> Result<Option<PathBuf>> {
        let branch = Self::branch_name(prefix);
        self.git.reset_branch(&branch, original)?;

        for (plan, rendered) in updates {
            fs::write(&plan.manifest_path, rendered)?;
            self.git.stage(&plan.manifest_path)?;
        }
        if !self.git.has_staged_changes()? {
            return Ok(None);
        }

        self.git.commit(&Self::commit_message(updates))?;
        let patch = self.git.format_patch()?;
        fs::write(output, patch)?;

        info!("Patch for branch {branch} written to {}", output.display());
        Ok(Some(output.to_path_buf()))
    }

    fn commit_message(updates: &[&(UpdatePlan, String)]) -> String {
        match updates {
            [(plan, _)] => format!(
                "chore(deps): update dependencies in {}",
                plan.relative_path.display()
            ),
            _ => {
                let mut message = format!(
                    "chore(deps): update dependencies in {} manifests\n\n",
                    updates.len()
                );
                for (plan, _) in updates {
                    message.push_str(&format!("- {}\n", plan.relative_path.display()));
                }
                message
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::GitAgent;
    use crate::publish::fakes::FakeGit;
    use crate::reconcile::LineReplacement;
    use tempfile::tempdir;

    const MANIFEST: &str = "[project]\nname = \"x\"\ndependencies = [\"rich==12.0\"]\n";

    fn update(path: &Path) -> (UpdatePlan, String) {
        let plan = UpdatePlan {
            manifest_path: path.to_path_buf(),
            relative_path: PathBuf::from("pyproject.toml"),
            replacements: vec![LineReplacement {
                line: 3,
                before: "dependencies = [\"rich==12.0\"]".into(),
                after: "dependencies = [\"rich==13.7.1\"]".into(),
            }],
            ..UpdatePlan::default()
        };
        let rendered = plan.render(MANIFEST);
        (plan, rendered)
    }

    #[test]
    fn writes_patch_and_restores_checkout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pyproject.toml");
        fs::write(&path, MANIFEST).unwrap();
        let output = dir.path().join("out.patch");
        let git = FakeGit::new(path.clone());

        let written = OfflinePatcher::new(&git)
            .export(&[update(&path)], "dependapy", &output)
            .unwrap();

        assert_eq!(written, Some(output.clone()));
        assert!(fs::read_to_string(&output).unwrap().contains("rich==13.7.1"));
        assert_eq!(fs::read_to_string(&path).unwrap(), MANIFEST);
        assert_eq!(git.count("reset dependapy/offline-updates"), 1);
        assert_eq!(git.count("push"), 0);
        assert_eq!(git.log.borrow().last().unwrap(), "checkout main");
    }

    #[test]
    fn nothing_to_export_touches_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pyproject.toml");
        fs::write(&path, MANIFEST).unwrap();
        let output = dir.path().join("out.patch");
        let git = FakeGit::new(path.clone());

        let empty = (UpdatePlan::default(), String::new());
        let written = OfflinePatcher::new(&git)
            .export(&[empty], "dependapy", &output)
            .unwrap();

        assert_eq!(written, None);
        assert!(!output.exists());
        assert!(git.log.borrow().is_empty());
    }

    #[test]
    fn export_is_repeatable_with_the_patch_left_in_the_tree() {
        let dir = tempdir().unwrap();
        let work = crate::publish::git::testing::repo_with_origin(
            dir.path(),
            &[("pyproject.toml", MANIFEST)],
        );
        let path = work.join("pyproject.toml");
        let output = work.join("dependapy-changes.patch");
        let agent = GitAgent::new(&work).unwrap();
        let patcher = OfflinePatcher::new(&agent);

        for _ in 0..2 {
            let written = patcher
                .export(&[update(&path)], "dependapy", &output)
                .unwrap();
            assert_eq!(written, Some(output.clone()));
        }

        let patch = fs::read_to_string(&output).unwrap();
        assert!(patch.contains("+dependencies = [\"rich==13.7.1\"]"));
        assert_eq!(fs::read_to_string(&path).unwrap(), MANIFEST);
        assert_eq!(agent.current_ref().unwrap(), "main");
    }
}
