//! Decide which manifest lines change, given the latest known versions.

pub mod plan;
pub mod python;

pub use plan::{LineReplacement, PackageUpdate, PythonUpdate, UpdatePlan};

use crate::manifest::document::Location;
use crate::manifest::{Dependency, ManifestDocument};
use crate::python::specifier::Operator;
use crate::python::version::Version;
use crate::utils::toml::split_lines;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Latest versions resolved for one manifest.
#[derive(Debug, Clone, Default)]
pub struct LatestVersions {
    /// Newest stable release, keyed by normalized package name.
    pub packages: HashMap<String, String>,
    /// Newest release including pre-releases, for dependencies pinned to one.
    pub prereleases: HashMap<String, String>,
    /// Newest supported interpreter minors.
    pub python_minors: Vec<String>,
}

impl LatestVersions {
    pub fn for_dependency(&self, dep: &Dependency) -> Option<&String> {
        let versions = if dep.pins_prerelease() {
            &self.prereleases
        } else {
            &self.packages
        };
        versions.get(&dep.normalized_name)
    }
}

/// A literal-level edit: replace bytes `start..end` of `line` with `text`.
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

/// Compute the update plan for a manifest.
pub fn reconcile(doc: &ManifestDocument, latest: &LatestVersions) -> UpdatePlan {
    let mut edits: BTreeMap<usize, Vec<Edit>> = BTreeMap::new();
    let mut package_updates = Vec::new();

    for dep in &doc.dependencies {
        if doc.settings.is_ignored(&dep.normalized_name) {
            continue;
        }
        let Some(location) = dep.location else {
            continue;
        };
        let Some(latest_version) = latest.for_dependency(dep) else {
            continue;
        };
        if let Some((literal, update)) = bump_requirement(dep, latest_version) {
            debug!("{}: {}", doc.relative_path.display(), update);
            push_edit(&mut edits, location, literal);
            package_updates.push(update);
        }
    }

    let mut python_update = None;
    if let Some(constraint) = &doc.requires_python {
        match python::widen_constraint(&constraint.value, &latest.python_minors) {
            Ok(Some(widened)) => match constraint.location {
                Some(location) => {
                    push_edit(&mut edits, location, widened.clone());
                    python_update = Some(PythonUpdate {
                        from: constraint.value.clone(),
                        to: widened,
                    });
                }
                None => warn!(
                    "{}: requires-python needs widening but its line was not found",
                    doc.relative_path.display()
                ),
            },
            Ok(None) => {}
            Err(e) => warn!(
                "{}: leaving requires-python untouched: {e}",
                doc.relative_path.display()
            ),
        }
    }

    UpdatePlan {
        manifest_path: doc.path.clone(),
        relative_path: doc.relative_path.clone(),
        replacements: line_replacements(&doc.raw, edits),
        package_updates,
        python_update,
    }
}

/// The rewritten requirement literal when the latest release is strictly
/// newer than the declared operand. Only single `==`, `>=`, `<=` and `~=`
/// clauses qualify; the operator and everything around the operand stay.
fn bump_requirement(dep: &Dependency, latest: &str) -> Option<(String, PackageUpdate)> {
    if dep.requirement.url.is_some() {
        return None;
    }
    let specifier = dep.single_specifier()?;
    if specifier.wildcard
        || !matches!(
            specifier.operator,
            Operator::Equal | Operator::GreaterEq | Operator::LessEq | Operator::Compatible
        )
    {
        return None;
    }

    let declared = specifier.version();
    let latest = Version::parse(latest);
    if !latest.is_valid() {
        return None;
    }

    // `~=` keeps its segment count so it stays a compatible-release clause.
    let replacement = if specifier.operator == Operator::Compatible {
        latest.truncated(declared.release_len())?
    } else {
        latest.original.clone()
    };
    if Version::parse(&replacement) <= *declared {
        return None;
    }

    let span = dep.requirement.version_span.clone()?;
    let literal = format!(
        "{}{}{}",
        &dep.raw[..span.start],
        replacement,
        &dep.raw[span.end..]
    );

    Some((
        literal,
        PackageUpdate {
            name: dep.name.clone(),
            group: dep.group.to_string(),
            from: format!("{}{}", specifier.operator, specifier.version),
            to: format!("{}{}", specifier.operator, replacement),
        },
    ))
}

fn push_edit(edits: &mut BTreeMap<usize, Vec<Edit>>, location: Location, text: String) {
    edits.entry(location.line).or_default().push(Edit {
        start: location.start,
        end: location.end,
        text,
    });
}

/// Merge literal edits into one replacement per line.
fn line_replacements(raw: &str, mut edits: BTreeMap<usize, Vec<Edit>>) -> Vec<LineReplacement> {
    let mut replacements = Vec::with_capacity(edits.len());

    for (index, (content, _)) in split_lines(raw).enumerate() {
        let Some(mut line_edits) = edits.remove(&(index + 1)) else {
            continue;
        };
        // Right to left so earlier offsets stay valid.
        line_edits.sort_by(|a, b| b.start.cmp(&a.start));

        let mut after = content.to_string();
        for edit in line_edits {
            if edit.end <= after.len() && edit.start <= edit.end {
                after.replace_range(edit.start..edit.end, &edit.text);
            }
        }
        if after != content {
            replacements.push(LineReplacement {
                line: index + 1,
                before: content.to_string(),
                after,
            });
        }
    }

    replacements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::python::version::VersionComparator;
    use std::path::PathBuf;

    fn doc(raw: &str) -> ManifestDocument {
        ManifestDocument::parse(PathBuf::from("pyproject.toml"), raw)
            .unwrap()
            .unwrap()
    }

    fn latest(packages: &[(&str, &str)]) -> LatestVersions {
        LatestVersions {
            packages: packages
                .iter()
                .map(|(name, version)| (name.to_string(), version.to_string()))
                .collect(),
            python_minors: vec!["3.13".into(), "3.12".into(), "3.11".into()],
            ..LatestVersions::default()
        }
    }

    const MANIFEST: &str = r#"[project]
name = "demo"
requires-python = ">=3.9"
dependencies = [
    "requests==2.0.0",  # http
    "click>=7.0", "rich~=12.0",
    "attrs<=21.1",
    "django>=3.2,<5",
    "numpy==1.*",
    "pydantic>1.0",
]
"#;

    #[test]
    fn comment_with_triple_quotes_does_not_hide_requirements() {
        let raw = "[project]\nname = \"x\"\n# docstrings use \"\"\" quotes\ndependencies = [\"requests==2.0.0\"]\n";
        let plan = reconcile(&doc(raw), &latest(&[("requests", "2.32.4")]));
        assert_eq!(plan.replacements.len(), 1);
        assert_eq!(plan.replacements[0].line, 4);
        assert_eq!(
            plan.render(raw),
            raw.replace("requests==2.0.0", "requests==2.32.4")
        );
    }

    #[test]
    fn pinned_requirement_replaces_exactly_one_line() {
        let raw = "[project]\nname = \"x\"\ndependencies = [\n    \"requests==2.0.0\",\n]\n";
        let doc = doc(raw);
        let plan = reconcile(&doc, &latest(&[("requests", "2.32.4")]));

        assert_eq!(
            plan.replacements,
            vec![LineReplacement {
                line: 4,
                before: "    \"requests==2.0.0\",".into(),
                after: "    \"requests==2.32.4\",".into(),
            }]
        );
        assert_eq!(
            plan.render(raw),
            "[project]\nname = \"x\"\ndependencies = [\n    \"requests==2.32.4\",\n]\n"
        );
    }

    #[test]
    fn rewrites_supported_operators_only() {
        let doc = doc(MANIFEST);
        let plan = reconcile(
            &doc,
            &latest(&[
                ("requests", "2.32.4"),
                ("click", "8.1.7"),
                ("rich", "13.7.1"),
                ("attrs", "23.2.0"),
                ("django", "5.0.6"),
                ("numpy", "2.0.0"),
                ("pydantic", "2.7.0"),
            ]),
        );

        let rendered = plan.render(&doc.raw);
        assert!(rendered.contains("\"requests==2.32.4\",  # http"));
        assert!(rendered.contains("\"click>=8.1.7\", \"rich~=13.7\","));
        assert!(rendered.contains("\"attrs<=23.2.0\""));
        assert!(rendered.contains("\"django>=3.2,<5\""));
        assert!(rendered.contains("\"numpy==1.*\""));
        assert!(rendered.contains("\"pydantic>1.0\""));
        // click and rich share a line
        assert_eq!(plan.replacements.len(), 3);
        assert_eq!(plan.package_updates.len(), 4);
        assert!(plan.python_update.is_none());
    }

    #[test]
    fn never_downgrades() {
        let doc = doc(MANIFEST);
        let plan = reconcile(
            &doc,
            &latest(&[
                ("requests", "1.9.0"),
                ("click", "8.0"),
                ("rich", "12.0.5"),
                ("attrs", "21.1"),
            ]),
        );

        let names: Vec<_> = plan.package_updates.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["click"]);
        for update in &plan.package_updates {
            let from = update.from.trim_start_matches(|c| "=<>~".contains(c));
            let to = update.to.trim_start_matches(|c| "=<>~".contains(c));
            assert!(VersionComparator::is_newer(to, from));
        }
    }

    #[test]
    fn rerun_on_rendered_output_is_empty() {
        let versions = latest(&[
            ("requests", "2.32.4"),
            ("click", "8.1.7"),
            ("rich", "13.7.1"),
            ("attrs", "23.2.0"),
        ]);
        let raw = MANIFEST.replace(">=3.9", ">=3.9,<3.12");
        let first = doc(&raw);

        let plan = reconcile(&first, &versions);
        assert!(!plan.is_empty());
        assert!(plan.python_update.is_some());

        let second = doc(&plan.render(&raw));
        assert!(reconcile(&second, &versions).is_empty());
    }

    #[test]
    fn up_to_date_manifest_gives_empty_plan() {
        let doc = doc(MANIFEST);
        let plan = reconcile(
            &doc,
            &latest(&[("requests", "2.0.0"), ("click", "7.0"), ("rich", "12.0")]),
        );
        assert!(plan.is_empty());
        assert!(plan.summary_lines().is_empty());
    }

    #[test]
    fn ignored_packages_are_left_alone() {
        let raw = "[project]\nname = \"x\"\ndependencies = [\"requests==2.0.0\"]\n\n[tool.dependapy]\nignore = [\"Requests\"]\n";
        let plan = reconcile(&doc(raw), &latest(&[("requests", "2.32.4")]));
        assert!(plan.is_empty());
    }

    #[test]
    fn widens_python_constraint_in_place() {
        let raw = "[project]\nname = \"x\"\nrequires-python = \">=3.8, <3.11\"  # keep\n";
        let doc = doc(raw);
        let plan = reconcile(&doc, &latest(&[]));
        assert_eq!(
            plan.render(raw),
            "[project]\nname = \"x\"\nrequires-python = \">=3.8, <3.14\"  # keep\n"
        );
        assert_eq!(
            plan.python_update,
            Some(PythonUpdate {
                from: ">=3.8, <3.11".into(),
                to: ">=3.8, <3.14".into(),
            })
        );
    }

    #[test]
    fn unparseable_python_constraint_is_left_untouched() {
        let raw = "[project]\nname = \"x\"\nrequires-python = \"py3\"\n";
        assert!(reconcile(&doc(raw), &latest(&[])).is_empty());
    }
}
