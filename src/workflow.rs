use crate::config::{DEFAULT_BRANCH_PREFIX, RunConfig, RunMode};
use crate::error::{DependapyError, Result};
use crate::manifest::scanner::MANIFEST_FILE;
use crate::manifest::{ManifestDocument, ProjectInfo, ProjectScanner};
use crate::publish::{
    ChangePublisher, GitAgent, GitHubClient, OfflinePatcher, PublishOutcome, SourceControl,
    parse_remote_url,
};
use crate::reconcile::{UpdatePlan, reconcile};
use crate::repository::{RepositoryFactory, VersionOracle};
use colored::Colorize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What happened to one manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestOutcome {
    UpToDate,
    Updated(String),
    Skipped(String),
    Failed(String),
}

impl fmt::Display for ManifestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestOutcome::UpToDate => f.write_str("up to date"),
            ManifestOutcome::Updated(detail) => write!(f, "updated ({detail})"),
            ManifestOutcome::Skipped(reason) => write!(f, "skipped ({reason})"),
            ManifestOutcome::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<(PathBuf, ManifestOutcome)>,
    pub patch: Option<PathBuf>,
}

impl RunSummary {
    fn count(&self, pred: impl Fn(&ManifestOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, ManifestOutcome::Updated(_)))
    }

    pub fn up_to_date(&self) -> usize {
        self.count(|o| matches!(o, ManifestOutcome::UpToDate))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ManifestOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ManifestOutcome::Failed(_)))
    }
}

/// Where non-empty plans go.
enum PlanSink<'a> {
    Report,
    WriteLocal,
    PullRequest(ChangePublisher<'a>),
    OfflinePatch {
        patcher: OfflinePatcher<'a>,
        output: PathBuf,
        prefix: String,
        pending: Vec<(UpdatePlan, String)>,
    },
}

impl PlanSink<'_> {
    fn accept(
        &mut self,
        doc: &mut ManifestDocument,
        plan: UpdatePlan,
        rendered: String,
    ) -> Result<ManifestOutcome> {
        let changes = plan.summary_lines().len();
        match self {
            PlanSink::Report => Ok(ManifestOutcome::Updated(format!(
                "{changes} change(s) proposed"
            ))),
            PlanSink::WriteLocal => {
                doc.apply_text(rendered);
                doc.write()?;
                Ok(ManifestOutcome::Updated(format!("{changes} change(s) written")))
            }
            PlanSink::PullRequest(publisher) => {
                match publisher.publish(&plan, &rendered, &doc.settings)? {
                    PublishOutcome::Skipped => {
                        Ok(ManifestOutcome::Skipped("nothing to commit".to_string()))
                    }
                    PublishOutcome::Unchanged(_) => Ok(ManifestOutcome::UpToDate),
                    outcome => Ok(ManifestOutcome::Updated(outcome.to_string())),
                }
            }
            PlanSink::OfflinePatch {
                prefix, pending, ..
            } => {
                if plan.relative_path == Path::new(MANIFEST_FILE) {
                    *prefix = doc.settings.branch_prefix().to_string();
                }
                pending.push((plan, rendered));
                Ok(ManifestOutcome::Updated(format!("{changes} change(s) queued for patch")))
            }
        }
    }

    fn finish(self) -> Result<Option<PathBuf>> {
        match self {
            PlanSink::OfflinePatch {
                patcher,
                output,
                prefix,
                pending,
            } => patcher.export(&pending, &prefix, &output),
            _ => Ok(None),
        }
    }
}

/// Run one full check over the repository described by `config`.
pub fn execute(config: &RunConfig) -> Result<RunSummary> {
    println!("{}", "Checking Python dependencies...".cyan().bold());

    println!("\n{}", "1. Scanning repository...".yellow());
    let info = ProjectScanner::new(&config.repo_path).scan()?;
    println!(
        "{}",
        format!(
            "✓ Found {} manifest(s) under {}",
            info.manifests.len(),
            info.root.display()
        )
        .green()
    );

    let token = match config.mode {
        RunMode::PullRequest => Some(config.require_token()?.to_string()),
        _ => None,
    };

    println!("\n{}", "2. Fetching supported Python versions...".yellow());
    let oracle = VersionOracle::new(
        RepositoryFactory::create_pypi(&config.endpoints.index_url)?,
        RepositoryFactory::create_python_releases(&config.endpoints.python_releases_url)?,
    );
    let python_minors = oracle.supported_python_minors();
    println!("   Newest supported: {}", python_minors.join(", ").bright_cyan());

    println!("\n{}", "3. Checking manifests...".yellow());
    match &config.mode {
        RunMode::Report => run_manifests(&info, &oracle, &python_minors, PlanSink::Report, config),
        RunMode::WriteLocal => {
            run_manifests(&info, &oracle, &python_minors, PlanSink::WriteLocal, config)
        }
        RunMode::PullRequest => {
            let git = open_git(&info)?;
            let repo = parse_remote_url(&git.remote_url()?)?;
            let token = token.unwrap_or_default();
            let hosting = GitHubClient::new(&config.endpoints.api_url, &token)?;
            info!("Publishing to {repo}");

            let publisher = ChangePublisher::new(&git, &hosting, repo, config.base_branch.clone());
            publisher.ensure_clean()?;
            run_manifests(
                &info,
                &oracle,
                &python_minors,
                PlanSink::PullRequest(publisher),
                config,
            )
        }
        RunMode::OfflinePatch { output } => {
            let git = open_git(&info)?;
            let sink = PlanSink::OfflinePatch {
                patcher: OfflinePatcher::new(&git),
                output: output.clone(),
                prefix: DEFAULT_BRANCH_PREFIX.to_string(),
                pending: Vec::new(),
            };
            run_manifests(&info, &oracle, &python_minors, sink, config)
        }
    }
}

fn open_git(info: &ProjectInfo) -> Result<GitAgent> {
    let git = GitAgent::new(&info.root)?;
    if !git.is_work_tree()? {
        return Err(DependapyError::ProjectValidation(format!(
            "{} is not inside a git work tree",
            info.root.display()
        )));
    }
    Ok(git)
}

fn run_manifests(
    info: &ProjectInfo,
    oracle: &VersionOracle,
    python_minors: &[String],
    mut sink: PlanSink<'_>,
    config: &RunConfig,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    for path in &info.manifests {
        let relative = path
            .strip_prefix(&info.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.clone());

        let outcome = match ManifestDocument::load(&info.root, path) {
            Ok(Some(mut doc)) => {
                let name = doc.project_name.clone().unwrap_or_default();
                println!(
                    "\n{} {}",
                    relative.display().to_string().white().bold(),
                    name.dimmed()
                );
                let outcome = check_manifest(&mut doc, oracle, python_minors, &mut sink, config);
                match outcome {
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("{}: {e}", relative.display());
                        ManifestOutcome::Failed(e.to_string())
                    }
                    Ok(outcome) => outcome,
                }
            }
            Ok(None) => ManifestOutcome::Skipped("no [project] table".to_string()),
            Err(e) => {
                warn!("{e}");
                ManifestOutcome::Skipped(e.to_string())
            }
        };

        print_outcome(&outcome);
        summary.outcomes.push((relative, outcome));
    }

    summary.patch = sink.finish()?;
    print_summary(&summary);
    Ok(summary)
}

fn check_manifest(
    doc: &mut ManifestDocument,
    oracle: &VersionOracle,
    python_minors: &[String],
    sink: &mut PlanSink<'_>,
    config: &RunConfig,
) -> Result<ManifestOutcome> {
    let (latest, failures) = oracle.resolve(doc, python_minors, config.show_progress);
    if !failures.is_empty() {
        println!(
            "   {}",
            format!("{} lookup(s) failed; those dependencies were left as is", failures.len())
                .dimmed()
        );
    }

    let plan = reconcile(doc, &latest);
    if plan.is_empty() {
        return Ok(ManifestOutcome::UpToDate);
    }

    print_plan(&plan);
    let rendered = plan.render(&doc.raw);
    sink.accept(doc, plan, rendered)
}

fn print_plan(plan: &UpdatePlan) {
    for update in &plan.package_updates {
        println!(
            "   • {} {} → {} {}",
            update.name.white().bold(),
            update.from.red(),
            update.to.green().bold(),
            format!("[{}]", update.group).dimmed()
        );
    }
    if let Some(python) = &plan.python_update {
        println!(
            "   • {} {} → {}",
            "requires-python".white().bold(),
            python.from.red(),
            python.to.green().bold()
        );
    }
}

fn print_outcome(outcome: &ManifestOutcome) {
    let line = format!("   {outcome}");
    match outcome {
        ManifestOutcome::UpToDate => println!("{}", line.green()),
        ManifestOutcome::Updated(_) => println!("{}", line.cyan()),
        ManifestOutcome::Skipped(_) => println!("{}", line.yellow()),
        ManifestOutcome::Failed(_) => println!("{}", line.red()),
    }
}

fn print_summary(summary: &RunSummary) {
    if let Some(patch) = &summary.patch {
        println!(
            "\n{}",
            format!("✓ Patch written to {}", patch.display()).green()
        );
    }
    println!(
        "\n{} {} updated, {} up to date, {} skipped, {} failed",
        "Summary:".cyan().bold(),
        summary.updated(),
        summary.up_to_date(),
        summary.skipped(),
        summary.failed()
    );
}
