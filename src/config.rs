use crate::cli::Cli;
use crate::error::{DependapyError, Result};
use crate::manifest::requirement::normalize_name;
use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_BRANCH_PREFIX: &str = "dependapy";

/// What the run does with a non-empty update plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Print the report only.
    Report,
    /// Rewrite manifests in the working tree, no git.
    WriteLocal,
    /// Commit to a per-manifest branch and open or amend a pull request.
    PullRequest,
    /// Commit all changes on one branch and export them as a patch file.
    OfflinePatch { output: PathBuf },
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub index_url: String,
    pub python_releases_url: String,
    pub api_url: String,
}

/// Everything a run needs, resolved once from the command line and
/// environment and handed to each component explicitly.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub repo_path: PathBuf,
    pub mode: RunMode,
    pub token: Option<String>,
    pub base_branch: Option<String>,
    pub endpoints: Endpoints,
    pub show_progress: bool,
}

impl RunConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        let mode = if cli.no_pr {
            RunMode::Report
        } else if cli.write {
            RunMode::WriteLocal
        } else if cli.offline_pr {
            RunMode::OfflinePatch {
                output: cli.patch_output.clone(),
            }
        } else {
            RunMode::PullRequest
        };

        Self {
            repo_path: cli.repo_path.clone(),
            mode,
            token: cli
                .token
                .clone()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            base_branch: cli.base_branch.clone(),
            endpoints: Endpoints {
                index_url: cli.index_url.clone(),
                python_releases_url: cli.python_releases_url.clone(),
                api_url: cli.api_url.clone(),
            },
            show_progress: cli.verbose == 0 && !cli.quiet,
        }
    }

    /// The hosting token, required before any pull request work starts.
    pub fn require_token(&self) -> Result<&str> {
        self.token.as_deref().ok_or_else(|| {
            DependapyError::Authentication(
                "no GitHub token; pass --token or set GITHUB_TOKEN (or use --no-pr)".to_string(),
            )
        })
    }
}

/// The `[tool.dependapy]` table of a pyproject.toml.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProjectSettings {
    /// Packages never to update.
    pub ignore: Vec<String>,
    /// Directories (relative to the scan root) to leave out of the scan.
    pub exclude: Vec<String>,
    pub branch_prefix: Option<String>,
    pub base_branch: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PyProjectTools {
    #[serde(default)]
    tool: Option<ToolTable>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolTable {
    #[serde(default)]
    dependapy: Option<ProjectSettings>,
}

impl ProjectSettings {
    pub fn from_manifest_text(text: &str) -> Result<Self> {
        let parsed: PyProjectTools = toml::from_str(text)?;
        Ok(parsed
            .tool
            .and_then(|tool| tool.dependapy)
            .unwrap_or_default())
    }

    pub fn is_ignored(&self, normalized_name: &str) -> bool {
        self.ignore
            .iter()
            .any(|name| normalize_name(name) == normalized_name)
    }

    pub fn branch_prefix(&self) -> &str {
        self.branch_prefix
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_BRANCH_PREFIX)
    }
}
