pub mod git;
pub mod github;
pub mod patch;

pub use git::{GitAgent, SourceControl};
pub use github::GitHubClient;
pub use patch::OfflinePatcher;

use crate::config::ProjectSettings;
use crate::error::{DependapyError, Result};
use crate::reconcile::UpdatePlan;
use git::sanitize_ref_component;
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

const MAX_BRANCH_LEN: usize = 100;
const DIGEST_HEX_LEN: usize = 8;

/// `owner/name` of the hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Parse `owner/name` out of an SSH or HTTPS remote URL.
pub fn parse_remote_url(url: &str) -> Result<RepoSlug> {
    let url = url.trim();
    let path = if let Some(rest) = url.strip_prefix("git@") {
        rest.split_once(':').map(|(_, path)| path)
    } else if let Some((_, rest)) = url.split_once("://") {
        rest.split_once('/').map(|(_, path)| path)
    } else {
        None
    };

    let path = path
        .map(|p| p.trim_end_matches('/'))
        .map(|p| p.strip_suffix(".git").unwrap_or(p));

    match path.and_then(|p| p.rsplit_once('/')) {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() => Ok(RepoSlug {
            owner: owner.rsplit('/').next().unwrap_or(owner).to_string(),
            name: name.to_string(),
        }),
        _ => Err(DependapyError::ProjectValidation(format!(
            "Could not determine repository owner and name from remote '{url}'"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequestState {
    Absent,
    Open,
    Merged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestHandle {
    pub branch: String,
    pub number: Option<u64>,
    pub state: PullRequestState,
}

impl PullRequestHandle {
    pub fn new(branch: &str, number: Option<u64>, state: PullRequestState) -> Self {
        Self {
            branch: branch.to_string(),
            number,
            state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// The pull request calls publishing needs from the hosting service.
pub trait HostingApi {
    fn default_branch(&self, repo: &RepoSlug) -> Result<String>;
    fn find_pull_request(&self, repo: &RepoSlug, branch: &str) -> Result<PullRequestHandle>;
    fn create_pull_request(&self, repo: &RepoSlug, request: &NewPullRequest) -> Result<u64>;
    fn update_pull_request(&self, repo: &RepoSlug, number: u64, title: &str, body: &str)
    -> Result<()>;
}

/// Where a manifest's update branch stands before publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    NoBranch,
    BranchNoPr,
    PrOpen,
}

impl PublishState {
    pub fn of(handle: &PullRequestHandle, remote_branch_exists: bool) -> Self {
        match handle.state {
            PullRequestState::Open => PublishState::PrOpen,
            _ if remote_branch_exists => PublishState::BranchNoPr,
            _ => PublishState::NoBranch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// A new pull request was opened.
    Opened(u64),
    /// New commits were pushed onto an open pull request.
    Amended(u64),
    /// The open pull request already carries these changes.
    Unchanged(u64),
    /// Nothing to publish.
    Skipped,
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishOutcome::Opened(n) => write!(f, "opened pull request #{n}"),
            PublishOutcome::Amended(n) => write!(f, "updated pull request #{n}"),
            PublishOutcome::Unchanged(n) => write!(f, "pull request #{n} is already up to date"),
            PublishOutcome::Skipped => f.write_str("nothing to publish"),
        }
    }
}

/// Update branch for a manifest: `<prefix>/update-root` for the root
/// manifest, `<prefix>/update-<dir>` otherwise. When sanitising or
/// truncating changed the directory text, a digest of the directory is
/// appended so distinct manifests never share a branch.
pub fn branch_for_manifest(prefix: &str, relative_path: &Path) -> String {
    let dir = relative_path
        .parent()
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default();
    let slug = sanitize_ref_component(&dir);
    if slug.is_empty() {
        return format!("{prefix}/update-root");
    }

    let mut branch = format!("{prefix}/update-{slug}");
    if slug == dir && branch.len() <= MAX_BRANCH_LEN {
        return branch;
    }

    let mut cut = MAX_BRANCH_LEN - DIGEST_HEX_LEN - 1;
    if branch.len() > cut {
        while !branch.is_char_boundary(cut) {
            cut -= 1;
        }
        branch.truncate(cut);
    }
    while branch.ends_with(['-', '/']) {
        branch.pop();
    }
    branch.push('-');
    branch.push_str(&dir_digest(&dir));
    branch
}

fn dir_digest(dir: &str) -> String {
    let digest = Sha256::digest(dir.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..DIGEST_HEX_LEN].to_string()
}

pub fn commit_message(plan: &UpdatePlan) -> String {
    format!(
        "chore(deps): update dependencies in {}",
        plan.relative_path.display()
    )
}

pub fn pull_request_body(plan: &UpdatePlan) -> String {
    let mut body = String::from("This pull request was created automatically by dependapy.\n\n");
    body.push_str(&format!(
        "Changes to `{}`:\n\n",
        plan.relative_path.display()
    ));
    for line in plan.summary_lines() {
        body.push_str(&format!("- `{line}`\n"));
    }
    body.push_str(
        "\nDependencies are moved to their latest releases and `requires-python` \
         is kept compatible with the newest supported Python versions.\n",
    );
    body
}

/// Commits rendered manifests to update branches and keeps one pull request
/// per branch.
pub struct ChangePublisher<'a> {
    git: &'a dyn SourceControl,
    hosting: &'a dyn HostingApi,
    repo: RepoSlug,
    base_override: Option<String>,
    default_branch: RefCell<Option<String>>,
}

impl<'a> ChangePublisher<'a> {
    pub fn new(
        git: &'a dyn SourceControl,
        hosting: &'a dyn HostingApi,
        repo: RepoSlug,
        base_override: Option<String>,
    ) -> Self {
        Self {
            git,
            hosting,
            repo,
            base_override,
            default_branch: RefCell::new(None),
        }
    }

    pub fn ensure_clean(&self) -> Result<()> {
        if self.git.is_clean()? {
            Ok(())
        } else {
            Err(DependapyError::ProjectValidation(
                "Working tree has uncommitted changes; commit or stash them first".to_string(),
            ))
        }
    }

    /// Publish one manifest's plan. Always returns to the ref that was
    /// checked out on entry.
    pub fn publish(
        &self,
        plan: &UpdatePlan,
        rendered: &str,
        settings: &ProjectSettings,
    ) -> Result<PublishOutcome> {
        if plan.is_empty() {
            return Ok(PublishOutcome::Skipped);
        }
        self.ensure_clean()?;

        let branch = branch_for_manifest(settings.branch_prefix(), &plan.relative_path);
        let original = self.git.current_ref()?;

        let result = self.publish_on_branch(plan, rendered, settings, &branch, &original);

        if let Err(restore) = self.git.checkout(&original) {
            if result.is_ok() {
                return Err(restore);
            }
            warn!("Could not return to {original}: {restore}");
        }
        result
    }

    fn publish_on_branch(
        &self,
        plan: &UpdatePlan,
        rendered: &str,
        settings: &ProjectSettings,
        branch: &str,
        original: &str,
    ) -> Result<PublishOutcome> {
        let handle = self.hosting.find_pull_request(&self.repo, branch)?;
        let remote_exists = self.git.fetch_branch(branch)?;
        let state = PublishState::of(&handle, remote_exists);
        debug!("{branch}: {state:?} ({:?})", handle.state);

        let title = commit_message(plan);
        let body = pull_request_body(plan);

        match (state, handle.number) {
            (PublishState::PrOpen, Some(number)) => {
                let start = if remote_exists {
                    format!("origin/{branch}")
                } else {
                    original.to_string()
                };
                self.git.reset_branch(branch, &start)?;
                if !self.write_and_stage(plan, rendered)? {
                    info!("Pull request #{number} already carries these changes");
                    return Ok(PublishOutcome::Unchanged(number));
                }
                self.git.commit(&title)?;
                self.git.push(branch, !remote_exists)?;
                self.hosting
                    .update_pull_request(&self.repo, number, &title, &body)?;
                Ok(PublishOutcome::Amended(number))
            }
            _ => {
                self.git.reset_branch(branch, original)?;
                if !self.write_and_stage(plan, rendered)? {
                    return Ok(PublishOutcome::Skipped);
                }
                self.git.commit(&title)?;
                self.git.push(branch, true)?;
                debug!("{branch}: {:?}", PublishState::BranchNoPr);

                let request = NewPullRequest {
                    title,
                    body,
                    head: branch.to_string(),
                    base: self.base_branch(settings)?,
                };
                let number = self.hosting.create_pull_request(&self.repo, &request)?;
                debug!("{branch}: {:?}", PublishState::PrOpen);
                Ok(PublishOutcome::Opened(number))
            }
        }
    }

    /// Write the manifest; `Ok(false)` when git sees nothing new to commit.
    fn write_and_stage(&self, plan: &UpdatePlan, rendered: &str) -> Result<bool> {
        fs::write(&plan.manifest_path, rendered)?;
        self.git.stage(&plan.manifest_path)?;
        self.git.has_staged_changes()
    }

    fn base_branch(&self, settings: &ProjectSettings) -> Result<String> {
        if let Some(base) = self.base_override.as_ref().or(settings.base_branch.as_ref()) {
            return Ok(base.clone());
        }
        if let Some(cached) = self.default_branch.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let branch = self.hosting.default_branch(&self.repo)?;
        *self.default_branch.borrow_mut() = Some(branch.clone());
        Ok(branch)
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    /// In-memory git: one tracked manifest, branches hold its content.
    pub struct FakeGit {
        pub manifest: PathBuf,
        pub base_content: String,
        pub dirty: bool,
        pub remote: RefCell<HashMap<String, String>>,
        pub head: RefCell<String>,
        pub staged: RefCell<Option<String>>,
        pub log: RefCell<Vec<String>>,
    }

    impl FakeGit {
        pub fn new(manifest: PathBuf) -> Self {
            let base_content = fs::read_to_string(&manifest).unwrap_or_default();
            Self {
                manifest,
                head: RefCell::new(base_content.clone()),
                base_content,
                dirty: false,
                remote: RefCell::new(HashMap::new()),
                staged: RefCell::new(None),
                log: RefCell::new(Vec::new()),
            }
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.log
                .borrow()
                .iter()
                .filter(|entry| entry.starts_with(prefix))
                .count()
        }
    }

    impl SourceControl for FakeGit {
        fn is_clean(&self) -> Result<bool> {
            Ok(!self.dirty)
        }

        fn current_ref(&self) -> Result<String> {
            Ok("main".to_string())
        }

        fn checkout(&self, reference: &str) -> Result<()> {
            self.log.borrow_mut().push(format!("checkout {reference}"));
            fs::write(&self.manifest, &self.base_content)?;
            *self.head.borrow_mut() = self.base_content.clone();
            Ok(())
        }

        fn fetch_branch(&self, branch: &str) -> Result<bool> {
            Ok(self.remote.borrow().contains_key(branch))
        }

        fn reset_branch(&self, branch: &str, start: &str) -> Result<()> {
            self.log.borrow_mut().push(format!("reset {branch} {start}"));
            let content = match start.strip_prefix("origin/") {
                Some(remote) => self.remote.borrow().get(remote).cloned().unwrap_or_default(),
                None => self.base_content.clone(),
            };
            fs::write(&self.manifest, &content)?;
            *self.head.borrow_mut() = content;
            Ok(())
        }

        fn stage(&self, path: &Path) -> Result<()> {
            *self.staged.borrow_mut() = Some(fs::read_to_string(path)?);
            Ok(())
        }

        fn has_staged_changes(&self) -> Result<bool> {
            Ok(self
                .staged
                .borrow()
                .as_ref()
                .is_some_and(|staged| *staged != *self.head.borrow()))
        }

        fn commit(&self, message: &str) -> Result<()> {
            self.log.borrow_mut().push(format!("commit {message}"));
            if let Some(staged) = self.staged.borrow_mut().take() {
                *self.head.borrow_mut() = staged;
            }
            Ok(())
        }

        fn push(&self, branch: &str, force: bool) -> Result<()> {
            self.log.borrow_mut().push(format!("push {branch} force={force}"));
            self.remote
                .borrow_mut()
                .insert(branch.to_string(), self.head.borrow().clone());
            Ok(())
        }

        fn remote_url(&self) -> Result<String> {
            Ok("git@github.com:acme/widgets.git".to_string())
        }

        fn format_patch(&self) -> Result<String> {
            Ok(format!("From fake\n\n{}", self.head.borrow()))
        }
    }

    /// In-memory hosting service keyed by head branch.
    #[derive(Default)]
    pub struct FakeHosting {
        pub pulls: RefCell<HashMap<String, (u64, PullRequestState)>>,
        pub created: RefCell<Vec<NewPullRequest>>,
        pub updated: RefCell<Vec<(u64, String)>>,
        pub reject_token: bool,
    }

    impl HostingApi for FakeHosting {
        fn default_branch(&self, _repo: &RepoSlug) -> Result<String> {
            Ok("main".to_string())
        }

        fn find_pull_request(&self, _repo: &RepoSlug, branch: &str) -> Result<PullRequestHandle> {
            if self.reject_token {
                return Err(DependapyError::Authentication("HTTP 401".into()));
            }
            Ok(match self.pulls.borrow().get(branch) {
                Some((number, state)) => PullRequestHandle::new(branch, Some(*number), *state),
                None => PullRequestHandle::new(branch, None, PullRequestState::Absent),
            })
        }

        fn create_pull_request(&self, _repo: &RepoSlug, request: &NewPullRequest) -> Result<u64> {
            let number = self.created.borrow().len() as u64 + 1;
            self.created.borrow_mut().push(request.clone());
            self.pulls
                .borrow_mut()
                .insert(request.head.clone(), (number, PullRequestState::Open));
            Ok(number)
        }

        fn update_pull_request(
            &self,
            _repo: &RepoSlug,
            number: u64,
            _title: &str,
            body: &str,
        ) -> Result<()> {
            self.updated.borrow_mut().push((number, body.to_string()));
            Ok(())
        }
    }
}
