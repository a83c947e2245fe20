use crate::publish::github::DEFAULT_API_URL;
use crate::python::pypi::DEFAULT_INDEX_URL;
use crate::python::releases::DEFAULT_PYTHON_RELEASES_URL;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "dependapy",
    about = "Keep pyproject.toml dependencies and requires-python up to date",
    version,
    author
)]
pub struct Cli {
    /// Path to the repository to scan (defaults to current directory)
    #[arg(short = 'p', long = "repo-path", visible_alias = "path", default_value = ".")]
    pub repo_path: PathBuf,

    /// GitHub token used for pull request creation
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Only report proposed changes; no file writes, no git, no pull requests
    #[arg(
        long = "no-pr",
        visible_alias = "dry-run",
        conflicts_with_all = ["write", "offline_pr"]
    )]
    pub no_pr: bool,

    /// Apply updates to the manifests in the working tree without git
    #[arg(long, conflicts_with = "offline_pr")]
    pub write: bool,

    /// Write a git patch file instead of using the GitHub API
    #[arg(long = "offline-pr")]
    pub offline_pr: bool,

    /// Where to save the patch in --offline-pr mode
    #[arg(long = "patch-output", default_value = "dependapy-changes.patch")]
    pub patch_output: PathBuf,

    /// Branch pull requests target (defaults to the repository's default branch)
    #[arg(long = "base-branch")]
    pub base_branch: Option<String>,

    /// Package index base URL
    #[arg(long = "index-url", env = "DEPENDAPY_INDEX_URL", default_value = DEFAULT_INDEX_URL)]
    pub index_url: String,

    /// Python release-cycle feed base URL
    #[arg(
        long = "python-releases-url",
        env = "DEPENDAPY_PYTHON_RELEASES_URL",
        default_value = DEFAULT_PYTHON_RELEASES_URL
    )]
    pub python_releases_url: String,

    /// GitHub REST API base URL
    #[arg(long = "api-url", env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}
