//! PEP 508 requirement strings, reduced to what update planning needs.

use crate::python::specifier::Operator;
use regex::Regex;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::LazyLock;

static HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[(?P<extras>[^\]]*)\])?",
    )
    .expect("requirement pattern is valid")
});

static NAME_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_.]+").expect("separator pattern is valid"));

/// PEP 503 normalized form of a distribution name.
pub fn normalize_name(name: &str) -> String {
    NAME_SEPARATORS
        .replace_all(name.trim(), "-")
        .to_ascii_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    #[allow(dead_code)]
    pub extras: Vec<String>,
    /// Version specifier text without surrounding parentheses, e.g. `>=2.0,<3`.
    pub specifier: Option<String>,
    #[allow(dead_code)]
    pub marker: Option<String>,
    pub url: Option<String>,
    /// Byte range of the version operand inside the raw requirement, only for
    /// single-clause specifiers.
    pub version_span: Option<Range<usize>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementError(pub String);

impl fmt::Display for RequirementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid requirement '{}'", self.0)
    }
}

impl std::error::Error for RequirementError {}

impl FromStr for Requirement {
    type Err = RequirementError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || RequirementError(raw.to_string());
        let head = HEAD.captures(raw).ok_or_else(invalid)?;
        let name = head["name"].to_string();
        let extras = head
            .name("extras")
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let rest_start = head.get(0).map(|m| m.end()).unwrap_or(0);
        let rest = &raw[rest_start..];

        if let Some(after_at) = rest.trim_start().strip_prefix('@') {
            let (url, marker) = match after_at.find(" ;") {
                Some(i) => (&after_at[..i], Some(after_at[i + 2..].trim())),
                None => (after_at, None),
            };
            return Ok(Self {
                name,
                extras,
                specifier: None,
                marker: marker.map(str::to_string),
                url: Some(url.trim().to_string()),
                version_span: None,
            });
        }

        let (body, marker) = match rest.find(';') {
            Some(i) => (&rest[..i], Some(rest[i + 1..].trim().to_string())),
            None => (rest, None),
        };

        let mut offset = rest_start + (body.len() - body.trim_start().len());
        let mut spec = body.trim();
        if let Some(inner) = spec.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
            offset += 1 + (inner.len() - inner.trim_start().len());
            spec = inner.trim();
        }

        if !spec.is_empty() && Operator::split_prefix(spec).is_none() {
            return Err(invalid());
        }

        let version_span = if spec.is_empty() || spec.contains(',') {
            None
        } else {
            Operator::split_prefix(spec).map(|(_, operand)| {
                let leading = operand.len() - operand.trim_start().len();
                let start = offset + (spec.len() - operand.len()) + leading;
                start..start + operand.trim().len()
            })
        };

        Ok(Self {
            name,
            extras,
            specifier: (!spec.is_empty()).then(|| spec.to_string()),
            marker: marker.filter(|m| !m.is_empty()),
            url: None,
            version_span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_names() {
        assert_eq!(normalize_name("Flask_SQLAlchemy"), "flask-sqlalchemy");
        assert_eq!(normalize_name("zope.interface"), "zope-interface");
        assert_eq!(normalize_name("a--_b"), "a-b");
    }

    #[test]
    fn parses_pinned_requirement() {
        let raw = "requests==2.0.0";
        let req: Requirement = raw.parse().unwrap();
        assert_eq!(req.name, "requests");
        assert_eq!(req.specifier.as_deref(), Some("==2.0.0"));
        assert_eq!(&raw[req.version_span.clone().unwrap()], "2.0.0");
    }

    #[test]
    fn parses_extras_spacing_and_markers() {
        let raw = "httpx[http2, socks] >= 0.24 ; python_version >= '3.9'";
        let req: Requirement = raw.parse().unwrap();
        assert_eq!(req.name, "httpx");
        assert_eq!(req.extras, vec!["http2", "socks"]);
        assert_eq!(req.specifier.as_deref(), Some(">= 0.24"));
        assert_eq!(req.marker.as_deref(), Some("python_version >= '3.9'"));
        assert_eq!(&raw[req.version_span.clone().unwrap()], "0.24");
    }

    #[test]
    fn parses_parenthesised_specifier() {
        let raw = "attrs ( ~=23.1 )";
        let req: Requirement = raw.parse().unwrap();
        assert_eq!(req.specifier.as_deref(), Some("~=23.1"));
        assert_eq!(&raw[req.version_span.clone().unwrap()], "23.1");
    }

    #[test]
    fn multi_clause_specifier_has_no_version_span() {
        let req: Requirement = "django>=4.2,<5".parse().unwrap();
        assert_eq!(req.specifier.as_deref(), Some(">=4.2,<5"));
        assert!(req.version_span.is_none());
    }

    #[test]
    fn bare_and_url_requirements() {
        let req: Requirement = "rich".parse().unwrap();
        assert!(req.specifier.is_none());

        let req: Requirement = "pkg @ https://example.com/pkg-1.0.tar.gz ; os_name == 'nt'"
            .parse()
            .unwrap();
        assert_eq!(req.url.as_deref(), Some("https://example.com/pkg-1.0.tar.gz"));
        assert_eq!(req.marker.as_deref(), Some("os_name == 'nt'"));
        assert!(req.specifier.is_none());
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<Requirement>().is_err());
        assert!("requests 2.0".parse::<Requirement>().is_err());
    }
}
