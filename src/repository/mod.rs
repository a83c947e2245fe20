use crate::error::{DependapyError, Result};
use crate::manifest::ManifestDocument;
use crate::python::version::{Version, VersionComparator};
use crate::reconcile::LatestVersions;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod factory;
pub use factory::RepositoryFactory;

/// Interpreter minors assumed supported when the release feed is unreachable.
pub const FALLBACK_PYTHON_MINORS: [&str; 3] = ["3.12", "3.11", "3.10"];

/// How many of the newest supported interpreter minors a manifest must admit.
pub const SUPPORTED_PYTHON_MINORS: usize = 3;

/// A package index such as PyPI.
pub trait PackageIndex: Send + Sync {
    /// All published, non-yanked versions of a package.
    ///
    /// Fails with [`DependapyError::PackageNotFound`] if the index does not
    /// know the package.
    fn fetch_available_versions(&self, package: &str) -> Result<Vec<String>>;

    fn fetch_latest_version(&self, package: &str, stable_only: bool) -> Result<Option<String>> {
        let versions = self.fetch_available_versions(package)?;
        Ok(VersionComparator::get_latest(&versions, stable_only))
    }
}

/// A feed of interpreter release cycles.
pub trait InterpreterReleases: Send + Sync {
    /// The `count` newest supported `3.x` minors, newest first.
    fn supported_minor_versions(&self, count: usize) -> Result<Vec<String>>;
}

/// Answers "what is the newest release" for packages and the interpreter.
pub struct VersionOracle {
    index: Arc<dyn PackageIndex>,
    releases: Arc<dyn InterpreterReleases>,
}

impl VersionOracle {
    pub fn new(index: Arc<dyn PackageIndex>, releases: Arc<dyn InterpreterReleases>) -> Self {
        Self { index, releases }
    }

    /// Newest public release of `package`. Pre-releases are only candidates
    /// when the declared version is itself a pre-release.
    pub fn latest_version(&self, package: &str, declared: Option<&str>) -> Result<Option<String>> {
        let pinned_prerelease = declared
            .map(|v| Version::parse(v).is_prerelease())
            .unwrap_or(false);
        self.index.fetch_latest_version(package, !pinned_prerelease)
    }

    /// The newest supported interpreter minors, falling back to a fixed list
    /// when the feed cannot be read.
    pub fn supported_python_minors(&self) -> Vec<String> {
        match self
            .releases
            .supported_minor_versions(SUPPORTED_PYTHON_MINORS)
        {
            Ok(minors) if !minors.is_empty() => {
                info!("Latest Python versions: {}", minors.join(", "));
                minors
            }
            Ok(_) => {
                warn!("No supported Python versions reported, using fallback");
                Self::fallback_minors()
            }
            Err(e) => {
                warn!("Failed to get latest Python versions: {e}");
                Self::fallback_minors()
            }
        }
    }

    fn fallback_minors() -> Vec<String> {
        FALLBACK_PYTHON_MINORS
            .iter()
            .map(|v| v.to_string())
            .collect()
    }

    /// Look up every pinned dependency of a manifest. Lookup failures skip
    /// the dependency and are returned alongside the resolved versions.
    pub fn resolve(
        &self,
        doc: &ManifestDocument,
        python_minors: &[String],
        show_progress: bool,
    ) -> (LatestVersions, Vec<DependapyError>) {
        let candidates: Vec<_> = doc
            .dependencies
            .iter()
            .filter(|dep| dep.requirement.specifier.is_some() && dep.requirement.url.is_none())
            .filter(|dep| !doc.settings.is_ignored(&dep.normalized_name))
            .collect();

        let pb = ProgressBar::new(candidates.len() as u64);
        if !show_progress {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        if let Ok(style) = ProgressStyle::default_bar().template("  [{bar:40}] {pos}/{len} {msg}") {
            pb.set_style(style.progress_chars("=>-"));
        }

        let mut latest = LatestVersions {
            python_minors: python_minors.to_vec(),
            ..LatestVersions::default()
        };
        let mut failures = Vec::new();
        // One lookup per (package, pre-release pin); a failed package is not retried.
        let mut queried = HashSet::new();
        let mut failed = HashSet::new();

        for dep in candidates {
            pb.set_message(format!("Checking {}", dep.name));

            let prerelease = dep.pins_prerelease();
            if failed.contains(&dep.normalized_name)
                || !queried.insert((dep.normalized_name.clone(), prerelease))
            {
                pb.inc(1);
                continue;
            }

            let declared = dep.declared_version();
            match self.latest_version(&dep.normalized_name, declared.as_deref()) {
                Ok(Some(version)) => {
                    debug!("{}: latest {}", dep.name, version);
                    let versions = if prerelease {
                        &mut latest.prereleases
                    } else {
                        &mut latest.packages
                    };
                    versions.insert(dep.normalized_name.clone(), version);
                }
                Ok(None) => debug!("{}: no eligible release", dep.name),
                Err(e) => {
                    warn!("Skipping {}: {}", dep.name, e);
                    failed.insert(dep.normalized_name.clone());
                    failures.push(e);
                }
            }
            pb.inc(1);
        }

        pb.finish_and_clear();

        (latest, failures)
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory index; packages absent from the map are unknown.
    #[derive(Default)]
    pub struct FakeIndex {
        pub versions: HashMap<String, Vec<String>>,
        pub lookups: Mutex<Vec<String>>,
    }

    impl FakeIndex {
        pub fn with(entries: &[(&str, &[&str])]) -> Self {
            let versions = entries
                .iter()
                .map(|(name, vs)| (name.to_string(), vs.iter().map(|v| v.to_string()).collect()))
                .collect();
            Self {
                versions,
                lookups: Mutex::new(Vec::new()),
            }
        }
    }

    impl PackageIndex for FakeIndex {
        fn fetch_available_versions(&self, package: &str) -> Result<Vec<String>> {
            self.lookups.lock().unwrap().push(package.to_string());
            self.versions
                .get(package)
                .cloned()
                .ok_or_else(|| DependapyError::PackageNotFound(package.to_string()))
        }
    }

    pub struct FakeReleases(pub Result<Vec<String>>);

    impl InterpreterReleases for FakeReleases {
        fn supported_minor_versions(&self, count: usize) -> Result<Vec<String>> {
            match &self.0 {
                Ok(minors) => Ok(minors.iter().take(count).cloned().collect()),
                Err(e) => Err(DependapyError::IndexLookup {
                    package: "python".into(),
                    message: e.to_string(),
                }),
            }
        }
    }

    pub fn minors(list: &[&str]) -> FakeReleases {
        FakeReleases(Ok(list.iter().map(|v| v.to_string()).collect()))
    }
}
