use crate::utils::toml::split_lines;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Replace the full content of one line, terminator excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineReplacement {
    /// 1-based line number.
    pub line: usize,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageUpdate {
    pub name: String,
    /// Where the requirement was declared, e.g. `dependencies`.
    pub group: String,
    pub from: String,
    pub to: String,
}

impl fmt::Display for PackageUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.name, self.from, self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonUpdate {
    pub from: String,
    pub to: String,
}

/// Line-level edits proposed for one manifest.
#[derive(Debug, Clone, Default)]
pub struct UpdatePlan {
    pub manifest_path: PathBuf,
    pub relative_path: PathBuf,
    pub replacements: Vec<LineReplacement>,
    pub package_updates: Vec<PackageUpdate>,
    pub python_update: Option<PythonUpdate>,
}

impl UpdatePlan {
    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }

    /// Apply the replacements to `raw`. Lines whose current content no longer
    /// matches `before` are left alone. Line endings are preserved.
    pub fn render(&self, raw: &str) -> String {
        let by_line: BTreeMap<usize, &LineReplacement> =
            self.replacements.iter().map(|r| (r.line, r)).collect();

        let mut out = String::with_capacity(raw.len() + 64);
        for (index, (content, terminator)) in split_lines(raw).enumerate() {
            match by_line.get(&(index + 1)) {
                Some(replacement) if replacement.before == content => {
                    out.push_str(&replacement.after)
                }
                _ => out.push_str(content),
            }
            out.push_str(terminator);
        }
        out
    }

    /// Human-readable change list, one entry per update.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .package_updates
            .iter()
            .map(|update| update.to_string())
            .collect();
        if let Some(python) = &self.python_update {
            lines.push(format!("requires-python: {} -> {}", python.from, python.to));
        }
        lines
    }
}
