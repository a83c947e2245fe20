use crate::python::version::{Release, Version};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterEq,
    LessEq,
    Greater,
    Less,
    Compatible,
    ArbitraryEqual,
}

impl Operator {
    // Longest tokens first so `===` is not read as `==`.
    const TOKENS: [(&'static str, Operator); 8] = [
        ("===", Operator::ArbitraryEqual),
        ("~=", Operator::Compatible),
        ("==", Operator::Equal),
        ("!=", Operator::NotEqual),
        (">=", Operator::GreaterEq),
        ("<=", Operator::LessEq),
        (">", Operator::Greater),
        ("<", Operator::Less),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::GreaterEq => ">=",
            Operator::LessEq => "<=",
            Operator::Greater => ">",
            Operator::Less => "<",
            Operator::Compatible => "~=",
            Operator::ArbitraryEqual => "===",
        }
    }

    /// Split a clause into its operator and the remaining text.
    pub fn split_prefix(clause: &str) -> Option<(Operator, &str)> {
        let clause = clause.trim_start();
        Self::TOKENS
            .iter()
            .find(|(token, _)| clause.starts_with(token))
            .map(|(token, op)| (*op, &clause[token.len()..]))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single version clause such as `>=3.10` or `==3.11.*`.
#[derive(Debug, Clone)]
pub struct Specifier {
    pub operator: Operator,
    pub version: String,
    pub wildcard: bool,
    parsed: Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecifierError(pub String);

impl fmt::Display for SpecifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid version specifier '{}'", self.0)
    }
}

impl std::error::Error for SpecifierError {}

impl FromStr for Specifier {
    type Err = SpecifierError;

    fn from_str(clause: &str) -> Result<Self, Self::Err> {
        let invalid = || SpecifierError(clause.trim().to_string());
        let (operator, rest) = Operator::split_prefix(clause).ok_or_else(invalid)?;
        let raw = rest.trim();
        if raw.is_empty() {
            return Err(invalid());
        }

        let (version_text, wildcard) = match raw.strip_suffix(".*") {
            Some(prefix) => (prefix, true),
            None => (raw, false),
        };

        if wildcard && !matches!(operator, Operator::Equal | Operator::NotEqual) {
            return Err(invalid());
        }

        let parsed = Version::parse(version_text);
        if operator != Operator::ArbitraryEqual && !parsed.is_valid() {
            return Err(invalid());
        }
        if operator == Operator::Compatible && parsed.release_len() < 2 {
            return Err(invalid());
        }

        Ok(Self {
            operator,
            version: raw.to_string(),
            wildcard,
            parsed,
        })
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.operator, self.version)
    }
}

impl Specifier {
    /// The version operand without any `.*` suffix.
    pub fn version(&self) -> &Version {
        &self.parsed
    }

    pub fn admits(&self, candidate: &Version) -> bool {
        match self.operator {
            Operator::ArbitraryEqual => candidate.original.eq_ignore_ascii_case(&self.version),
            Operator::Equal if self.wildcard => self.prefix_matches(candidate),
            Operator::NotEqual if self.wildcard => !self.prefix_matches(candidate),
            Operator::Equal => candidate == &self.parsed,
            Operator::NotEqual => candidate != &self.parsed,
            Operator::GreaterEq => candidate >= &self.parsed,
            Operator::LessEq => candidate <= &self.parsed,
            Operator::Greater => candidate > &self.parsed,
            Operator::Less => candidate < &self.parsed && !self.is_prerelease_of_bound(candidate),
            Operator::Compatible => candidate >= &self.parsed && self.compatible_prefix(candidate),
        }
    }

    fn prefix_matches(&self, candidate: &Version) -> bool {
        match (candidate.release(), self.parsed.release()) {
            (Some(c), Some(s)) => {
                c.epoch == s.epoch && Self::segments_start_with(&c.segments, &s.segments)
            }
            _ => false,
        }
    }

    fn compatible_prefix(&self, candidate: &Version) -> bool {
        match (candidate.release(), self.parsed.release()) {
            (Some(c), Some(s)) => {
                let prefix = &s.segments[..s.segments.len() - 1];
                c.epoch == s.epoch && Self::segments_start_with(&c.segments, prefix)
            }
            _ => false,
        }
    }

    // `<3.12` must not admit `3.12.0a1`.
    fn is_prerelease_of_bound(&self, candidate: &Version) -> bool {
        if self.parsed.is_prerelease() || !candidate.is_prerelease() {
            return false;
        }
        match (candidate.release(), self.parsed.release()) {
            (Some(c), Some(s)) => {
                c.epoch == s.epoch
                    && Release::cmp_segments(&c.segments, &s.segments) == Ordering::Equal
            }
            _ => false,
        }
    }

    fn segments_start_with(segments: &[u64], prefix: &[u64]) -> bool {
        prefix
            .iter()
            .enumerate()
            .all(|(i, expected)| segments.get(i).copied().unwrap_or(0) == *expected)
    }
}

/// Comma-separated clauses, all of which must hold.
#[derive(Debug, Clone)]
pub struct SpecifierSet {
    pub clauses: Vec<Specifier>,
}

impl FromStr for SpecifierSet {
    type Err = SpecifierError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let clauses = text
            .split(',')
            .map(str::trim)
            .filter(|clause| !clause.is_empty())
            .map(str::parse::<Specifier>)
            .collect::<Result<Vec<_>, _>>()?;

        if clauses.is_empty() {
            return Err(SpecifierError(text.to_string()));
        }

        Ok(Self { clauses })
    }
}

impl SpecifierSet {
    pub fn admits(&self, candidate: &Version) -> bool {
        self.clauses.iter().all(|clause| clause.admits(candidate))
    }
}
