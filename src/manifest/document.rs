use crate::config::ProjectSettings;
use crate::error::{DependapyError, Result};
use crate::manifest::requirement::{Requirement, normalize_name};
use crate::python::specifier::Specifier;
use crate::python::version::Version;
use crate::utils::toml::{StringLiteral, TomlUtils};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use toml_edit::DocumentMut;
use tracing::{debug, warn};

/// Tables whose string literals may hold requirements.
const REQUIREMENT_TABLES: [&str; 4] = [
    "",
    "project",
    "project.optional-dependencies",
    "dependency-groups",
];

/// Where a string literal sits in the raw manifest text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// 1-based line number.
    pub line: usize,
    /// Byte range of the literal's contents within the line.
    pub start: usize,
    pub end: usize,
}

impl From<&StringLiteral> for Location {
    fn from(literal: &StringLiteral) -> Self {
        Self {
            line: literal.line,
            start: literal.start,
            end: literal.end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyGroup {
    Main,
    Optional(String),
    Group(String),
}

impl fmt::Display for DependencyGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyGroup::Main => f.write_str("dependencies"),
            DependencyGroup::Optional(extra) => write!(f, "optional-dependencies.{extra}"),
            DependencyGroup::Group(name) => write!(f, "dependency-groups.{name}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dependency {
    pub name: String,
    pub normalized_name: String,
    /// The requirement string exactly as written in the manifest.
    pub raw: String,
    pub requirement: Requirement,
    pub group: DependencyGroup,
    pub location: Option<Location>,
}

impl Dependency {
    /// The version operand of a single-clause specifier.
    pub fn declared_version(&self) -> Option<String> {
        self.requirement
            .version_span
            .clone()
            .map(|span| self.raw[span].to_string())
    }

    /// Pre-releases are update candidates only for a dependency pinned to one.
    pub fn pins_prerelease(&self) -> bool {
        self.declared_version()
            .is_some_and(|version| Version::parse(&version).is_prerelease())
    }

    /// The parsed single clause, if the specifier has exactly one.
    pub fn single_specifier(&self) -> Option<Specifier> {
        self.requirement.version_span.as_ref()?;
        self.requirement.specifier.as_deref()?.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonConstraint {
    pub value: String,
    pub location: Option<Location>,
}

/// One parsed pyproject.toml.
#[derive(Debug, Clone)]
pub struct ManifestDocument {
    pub path: PathBuf,
    /// Path relative to the scan root, used for branch names and reports.
    pub relative_path: PathBuf,
    pub raw: String,
    pub project_name: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub requires_python: Option<PythonConstraint>,
    pub settings: ProjectSettings,
}

impl ManifestDocument {
    /// Read and parse a manifest. `Ok(None)` when it has no `[project]` table.
    pub fn load(root: &Path, path: &Path) -> Result<Option<Self>> {
        let raw = fs::read_to_string(path).map_err(|e| DependapyError::ManifestParse {
            path: path.to_path_buf(),
            message: format!("Failed to read manifest: {e}"),
        })?;

        let doc = Self::parse(path.to_path_buf(), &raw)?;
        Ok(doc.map(|mut doc| {
            doc.relative_path = path
                .strip_prefix(root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.to_path_buf());
            doc
        }))
    }

    pub fn parse(path: PathBuf, raw: &str) -> Result<Option<Self>> {
        let parse_error = |message: String| DependapyError::ManifestParse {
            path: path.clone(),
            message,
        };

        let doc = raw
            .parse::<DocumentMut>()
            .map_err(|e| parse_error(format!("Failed to parse TOML: {e}")))?;

        let Some(project) = doc.get("project").and_then(|item| item.as_table_like()) else {
            return Ok(None);
        };

        let settings = ProjectSettings::from_manifest_text(raw)
            .map_err(|e| parse_error(format!("Invalid [tool.dependapy] table: {e}")))?;

        let mut entries: Vec<(DependencyGroup, String)> = Vec::new();
        if let Some(item) = project.get("dependencies") {
            entries.extend(
                TomlUtils::string_array(item)
                    .into_iter()
                    .map(|raw| (DependencyGroup::Main, raw)),
            );
        }
        if let Some(optional) = project
            .get("optional-dependencies")
            .and_then(|item| item.as_table_like())
        {
            for (extra, requirements) in TomlUtils::string_arrays(optional) {
                entries.extend(
                    requirements
                        .into_iter()
                        .map(|raw| (DependencyGroup::Optional(extra.clone()), raw)),
                );
            }
        }
        if let Some(groups) = doc
            .get("dependency-groups")
            .and_then(|item| item.as_table_like())
        {
            for (group, requirements) in TomlUtils::string_arrays(groups) {
                entries.extend(
                    requirements
                        .into_iter()
                        .map(|raw| (DependencyGroup::Group(group.clone()), raw)),
                );
            }
        }

        let mut literals: Vec<Option<StringLiteral>> = TomlUtils::scan_string_literals(raw)
            .into_iter()
            .filter(|literal| REQUIREMENT_TABLES.contains(&literal.table.as_str()))
            .map(Some)
            .collect();

        let mut dependencies = Vec::with_capacity(entries.len());
        for (group, raw_requirement) in entries {
            let requirement = match raw_requirement.parse::<Requirement>() {
                Ok(requirement) => requirement,
                Err(e) => {
                    warn!("{}: skipping {}", path.display(), e);
                    continue;
                }
            };

            let location = Self::claim_literal(&mut literals, &raw_requirement);
            if location.is_none() {
                debug!(
                    "{}: could not locate '{}' in source text",
                    path.display(),
                    raw_requirement
                );
            }

            dependencies.push(Dependency {
                name: requirement.name.clone(),
                normalized_name: normalize_name(&requirement.name),
                raw: raw_requirement,
                requirement,
                group,
                location,
            });
        }

        let requires_python = project
            .get("requires-python")
            .and_then(|item| item.as_str())
            .map(|value| PythonConstraint {
                value: value.to_string(),
                location: Self::locate_requires_python(raw, value),
            });

        let project_name = project
            .get("name")
            .and_then(|item| item.as_str())
            .map(str::to_string);

        let relative_path = path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| path.clone());

        Ok(Some(Self {
            path,
            relative_path,
            raw: raw.to_string(),
            project_name,
            dependencies,
            requires_python,
            settings,
        }))
    }

    fn claim_literal(literals: &mut [Option<StringLiteral>], value: &str) -> Option<Location> {
        let slot = literals
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|literal| literal.value == value))?;
        slot.take().map(|literal| Location::from(&literal))
    }

    fn locate_requires_python(raw: &str, value: &str) -> Option<Location> {
        TomlUtils::scan_string_literals(raw)
            .iter()
            .filter(|literal| literal.table == "project" && literal.value == value)
            .find(|literal| {
                raw.lines()
                    .nth(literal.line - 1)
                    .map(|line| line.trim_start().starts_with("requires-python"))
                    .unwrap_or(false)
            })
            .map(Location::from)
    }

    /// Replace the document text with its updated rendering.
    pub fn apply_text(&mut self, rendered: String) {
        self.raw = rendered;
    }

    pub fn write(&self) -> Result<()> {
        fs::write(&self.path, &self.raw)?;
        Ok(())
    }
}
