//! Widening of `requires-python` so it admits the newest supported minors.

use crate::python::specifier::{Operator, Specifier, SpecifierError, SpecifierSet};
use crate::python::version::Version;

/// Rewrite `constraint` so it admits every minor in `minors`.
///
/// Returns `Ok(None)` when the constraint already admits all of them (or no
/// minors are known). Clauses that already hold for every minor are kept as
/// written; failing clauses are loosened, and `!=` exclusions dropped.
pub fn widen_constraint(
    constraint: &str,
    minors: &[String],
) -> Result<Option<String>, SpecifierError> {
    let set: SpecifierSet = constraint.parse()?;

    let mut versions: Vec<Version> = minors
        .iter()
        .map(|minor| Version::parse(minor))
        .filter(Version::is_valid)
        .collect();
    if versions.is_empty() || versions.iter().all(|v| set.admits(v)) {
        return Ok(None);
    }
    versions.sort();

    let (oldest, newest) = match (versions.first(), versions.last()) {
        (Some(oldest), Some(newest)) => (oldest, newest),
        _ => return Ok(None),
    };
    let floor = format!(">={}", oldest.original);

    let mut clauses: Vec<String> = Vec::new();
    for (text, clause) in clause_texts(constraint).zip(&set.clauses) {
        let rewritten = if versions.iter().all(|v| clause.admits(v)) {
            Some(text.to_string())
        } else {
            loosen(clause, &floor, newest)
        };
        if let Some(rewritten) = rewritten {
            if !clauses.contains(&rewritten) {
                clauses.push(rewritten);
            }
        }
    }
    if clauses.is_empty() {
        clauses.push(floor);
    }

    let separator = if constraint.contains(", ") { ", " } else { "," };
    Ok(Some(clauses.join(separator)))
}

fn clause_texts(constraint: &str) -> impl Iterator<Item = &str> {
    constraint
        .split(',')
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
}

fn loosen(clause: &Specifier, floor: &str, newest: &Version) -> Option<String> {
    match clause.operator {
        Operator::NotEqual => None,
        Operator::Less => newest
            .major_minor()
            .map(|(major, minor)| format!("<{}.{}", major, minor + 1)),
        Operator::LessEq => Some(format!("<={}", newest.original)),
        Operator::GreaterEq
        | Operator::Greater
        | Operator::Equal
        | Operator::Compatible
        | Operator::ArbitraryEqual => Some(floor.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minors() -> Vec<String> {
        vec!["3.13".into(), "3.12".into(), "3.11".into()]
    }

    fn widen(constraint: &str) -> Option<String> {
        widen_constraint(constraint, &minors()).unwrap()
    }

    #[test]
    fn admitting_constraint_is_untouched() {
        assert_eq!(widen(">=3.8"), None);
        assert_eq!(widen(">=3.9,<4"), None);
        assert_eq!(widen("~=3.8"), None);
    }

    #[test]
    fn tight_upper_bound_is_raised() {
        assert_eq!(widen(">=3.8,<3.12").as_deref(), Some(">=3.8,<3.14"));
        assert_eq!(widen(">=3.8, <=3.11").as_deref(), Some(">=3.8, <=3.13"));
    }

    #[test]
    fn too_high_floor_is_lowered() {
        assert_eq!(widen(">=3.12").as_deref(), Some(">=3.11"));
        assert_eq!(widen(">3.11").as_deref(), Some(">=3.11"));
    }

    #[test]
    fn pins_become_floors_and_exclusions_drop() {
        assert_eq!(widen("==3.10.*").as_deref(), Some(">=3.11"));
        assert_eq!(widen(">=3.9,!=3.12").as_deref(), Some(">=3.9"));
        assert_eq!(widen("!=3.12").as_deref(), Some(">=3.11"));
    }

    #[test]
    fn widened_constraint_is_a_fixed_point() {
        for constraint in [">=3.8,<3.12", "==3.10.*", ">=3.12", ">=3.9,!=3.12"] {
            let widened = widen(constraint).unwrap();
            assert_eq!(widen(&widened), None, "{constraint} -> {widened}");
        }
    }

    #[test]
    fn unparseable_constraint_is_an_error() {
        assert!(widen_constraint("three point eight", &minors()).is_err());
        assert_eq!(widen_constraint(">=3.8", &[]).unwrap(), None);
    }
}
