use crate::error::{DependapyError, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::debug;

const BOT_NAME: &str = "dependapy-bot";
const BOT_EMAIL: &str = "dependapy-bot@users.noreply.github.com";
const REMOTE: &str = "origin";

/// The git operations publishing needs.
pub trait SourceControl {
    /// No edits to tracked files. Untracked files are ignored.
    fn is_clean(&self) -> Result<bool>;
    /// Branch name when on a branch, otherwise the commit id.
    fn current_ref(&self) -> Result<String>;
    /// Force-checkout `reference`, discarding edits to tracked files.
    fn checkout(&self, reference: &str) -> Result<()>;
    /// Fetch `branch` from the remote. `Ok(false)` when the remote lacks it.
    fn fetch_branch(&self, branch: &str) -> Result<bool>;
    /// Point `branch` at `start` and check it out.
    fn reset_branch(&self, branch: &str, start: &str) -> Result<()>;
    fn stage(&self, path: &Path) -> Result<()>;
    fn has_staged_changes(&self) -> Result<bool>;
    fn commit(&self, message: &str) -> Result<()>;
    fn push(&self, branch: &str, force: bool) -> Result<()>;
    fn remote_url(&self) -> Result<String>;
    /// The last commit as a mailbox-format patch.
    fn format_patch(&self) -> Result<String>;
}

/// `SourceControl` backed by the `git` executable. The path may be any
/// directory inside a work tree.
pub struct GitAgent {
    repo_path: PathBuf,
}

impl GitAgent {
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Result<Self> {
        let repo_path = Self::validate_git_path(repo_path.as_ref())?;
        Ok(Self { repo_path })
    }

    /// Whether the path sits inside a git work tree.
    pub fn is_work_tree(&self) -> Result<bool> {
        let output = self.run_git(&["rev-parse", "--is-inside-work-tree"])?;
        Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    fn run_git(&self, args: &[&str]) -> Result<Output> {
        debug!("git {}", args.join(" "));
        Command::new("git")
            .current_dir(&self.repo_path)
            .args(args)
            .output()
            .map_err(|e| {
                DependapyError::GitOperation(format!(
                    "Failed to execute git command '{}': {e}",
                    args.join(" ")
                ))
            })
    }

    fn run_checked(&self, args: &[&str], command: &str) -> Result<String> {
        let output = self.run_git(args)?;
        Self::ensure_success(&output, command)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn ensure_success(output: &Output, command: &str) -> Result<()> {
        if output.status.success() {
            return Ok(());
        }

        Err(DependapyError::GitOperation(format!(
            "{} failed: {}",
            command,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }

    fn validate_git_path(path: &Path) -> Result<PathBuf> {
        let dangerous = [';', '|', '&', '$', '`', '\n', '\r'];
        let path_str = path.to_string_lossy();
        if let Some(ch) = dangerous.iter().find(|c| path_str.contains(**c)) {
            return Err(DependapyError::GitOperation(format!(
                "Path contains dangerous character: '{ch}'"
            )));
        }

        if !path.is_absolute() {
            return Err(DependapyError::GitOperation(
                "Only absolute paths are allowed for Git operations".to_string(),
            ));
        }

        match path.canonicalize() {
            Ok(canonical) if canonical.is_dir() => Ok(canonical),
            Ok(canonical) => Err(DependapyError::GitOperation(format!(
                "'{}' is not a directory",
                canonical.display()
            ))),
            Err(e) => Err(DependapyError::GitOperation(format!(
                "Invalid Git path '{}': {e}",
                path.display()
            ))),
        }
    }

    fn validate_ref(reference: &str) -> Result<()> {
        let invalid = reference.is_empty()
            || reference.starts_with('-')
            || reference.contains("..")
            || reference
                .chars()
                .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c));
        if invalid {
            return Err(DependapyError::GitOperation(format!(
                "Refusing unsafe ref name '{reference}'"
            )));
        }
        Ok(())
    }

    /// Only manifests below the agent's directory may be staged.
    fn stageable_path(&self, path: &Path) -> Result<PathBuf> {
        let canonical = path.canonicalize().map_err(|e| {
            DependapyError::GitOperation(format!("Cannot stage '{}': {e}", path.display()))
        })?;
        if !canonical.starts_with(&self.repo_path) {
            return Err(DependapyError::GitOperation(format!(
                "Refusing to stage '{}' outside {}",
                path.display(),
                self.repo_path.display()
            )));
        }
        Ok(canonical)
    }
}

impl SourceControl for GitAgent {
    fn is_clean(&self) -> Result<bool> {
        let status = self.run_checked(
            &["status", "--porcelain", "--untracked-files=no"],
            "git status",
        )?;
        Ok(status.trim().is_empty())
    }

    fn current_ref(&self) -> Result<String> {
        let branch = self.run_checked(&["rev-parse", "--abbrev-ref", "HEAD"], "git rev-parse")?;
        let branch = branch.trim();
        if branch != "HEAD" {
            return Ok(branch.to_string());
        }
        let commit = self.run_checked(&["rev-parse", "HEAD"], "git rev-parse")?;
        Ok(commit.trim().to_string())
    }

    fn checkout(&self, reference: &str) -> Result<()> {
        Self::validate_ref(reference)?;
        self.run_checked(&["checkout", "--force", reference], "git checkout")?;
        Ok(())
    }

    fn fetch_branch(&self, branch: &str) -> Result<bool> {
        Self::validate_ref(branch)?;
        let head = format!("refs/heads/{branch}");
        // Exit code 2: no matching ref on the remote.
        let output = self.run_git(&["ls-remote", "--exit-code", "--heads", REMOTE, &head])?;
        match output.status.code() {
            Some(0) => {}
            Some(2) => return Ok(false),
            _ => return Self::ensure_success(&output, "git ls-remote").map(|_| false),
        }

        let refspec = format!("+{head}:refs/remotes/{REMOTE}/{branch}");
        self.run_checked(&["fetch", REMOTE, &refspec], "git fetch")?;
        Ok(true)
    }

    fn reset_branch(&self, branch: &str, start: &str) -> Result<()> {
        Self::validate_ref(branch)?;
        Self::validate_ref(start)?;
        self.run_checked(&["checkout", "--force", "-B", branch, start], "git checkout -B")?;
        Ok(())
    }

    fn stage(&self, path: &Path) -> Result<()> {
        let path = self.stageable_path(path)?;
        let path = path.to_string_lossy();
        self.run_checked(&["add", "--", &path], "git add")?;
        Ok(())
    }

    fn has_staged_changes(&self) -> Result<bool> {
        let output = self.run_git(&["diff", "--cached", "--quiet"])?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Self::ensure_success(&output, "git diff --cached").map(|_| false),
        }
    }

    fn commit(&self, message: &str) -> Result<()> {
        let name = format!("user.name={BOT_NAME}");
        let email = format!("user.email={BOT_EMAIL}");
        self.run_checked(
            &["-c", &name, "-c", &email, "commit", "--no-verify", "-m", message],
            "git commit",
        )?;
        Ok(())
    }

    fn push(&self, branch: &str, force: bool) -> Result<()> {
        Self::validate_ref(branch)?;
        let refspec = format!("{branch}:refs/heads/{branch}");
        let mut args = vec!["push", REMOTE, refspec.as_str()];
        if force {
            args.push("--force");
        }
        self.run_checked(&args, "git push")?;
        Ok(())
    }

    fn remote_url(&self) -> Result<String> {
        let url = self.run_checked(
            &["config", "--get", &format!("remote.{REMOTE}.url")],
            "git config",
        )?;
        Ok(url.trim().to_string())
    }

    fn format_patch(&self) -> Result<String> {
        self.run_checked(&["format-patch", "HEAD^", "--stdout"], "git format-patch")
    }
}

/// Turn arbitrary text into a fragment that is safe inside a ref name.
pub fn sanitize_ref_component(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '-',
        })
        .collect();

    let mut collapsed = String::with_capacity(mapped.len());
    for c in mapped.chars() {
        if c == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed.trim_matches('-').to_string()
}
