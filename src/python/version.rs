use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;

static PEP440: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)^
        v?
        (?:(?P<epoch>[0-9]+)!)?
        (?P<release>[0-9]+(?:\.[0-9]+)*)
        (?P<pre>[-_.]?(?P<pre_l>alpha|beta|preview|pre|rc|a|b|c)[-_.]?(?P<pre_n>[0-9]+)?)?
        (?P<post>-(?P<post_n1>[0-9]+)|[-_.]?(?P<post_l>post|rev|r)[-_.]?(?P<post_n2>[0-9]+)?)?
        (?P<dev>[-_.]?dev[-_.]?(?P<dev_n>[0-9]+)?)?
        (?:\+(?P<local>[a-z0-9]+(?:[-_.][a-z0-9]+)*))?
        $",
    )
    .expect("PEP 440 pattern is valid")
});

/// Version representation following PEP 440, with a fallback for strings
/// that do not parse.
#[derive(Debug, Clone)]
pub struct Version {
    pub original: String,
    pub parsed: VersionType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionType {
    Pep440(Release),
    Unknown(String),
}

/// The parsed components of a PEP 440 version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub epoch: u64,
    pub segments: Vec<u64>,
    pub pre: Option<(PreKind, u64)>,
    pub post: Option<u64>,
    pub dev: Option<u64>,
    pub local: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreKind {
    Alpha,
    Beta,
    Rc,
}

/// Position of a release relative to its final version.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    DevOnly,
    Pre(PreKind, u64),
    Final,
}

impl Version {
    pub fn parse(version: &str) -> Self {
        let trimmed = version.trim();
        let parsed = match Self::parse_pep440(&trimmed.to_ascii_lowercase()) {
            Some(release) => VersionType::Pep440(release),
            None => VersionType::Unknown(trimmed.to_string()),
        };

        Version {
            original: trimmed.to_string(),
            parsed,
        }
    }

    fn parse_pep440(version: &str) -> Option<Release> {
        let caps = PEP440.captures(version)?;
        let number = |name: &str| -> Option<u64> {
            caps.name(name).and_then(|m| m.as_str().parse::<u64>().ok())
        };

        let segments = caps
            .name("release")?
            .as_str()
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<u64>>>()?;

        let pre = caps.name("pre_l").map(|label| {
            let kind = match label.as_str() {
                "a" | "alpha" => PreKind::Alpha,
                "b" | "beta" => PreKind::Beta,
                _ => PreKind::Rc,
            };
            (kind, number("pre_n").unwrap_or(0))
        });

        let post = if caps.name("post").is_some() {
            Some(number("post_n1").or_else(|| number("post_n2")).unwrap_or(0))
        } else {
            None
        };

        let dev = caps
            .name("dev")
            .map(|_| number("dev_n").unwrap_or(0));

        Some(Release {
            epoch: number("epoch").unwrap_or(0),
            segments,
            pre,
            post,
            dev,
            local: caps.name("local").map(|m| m.as_str().to_string()),
        })
    }

    pub fn release(&self) -> Option<&Release> {
        match &self.parsed {
            VersionType::Pep440(release) => Some(release),
            VersionType::Unknown(_) => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.release().is_some()
    }

    /// Public final or post releases. Pre-releases, dev releases and
    /// unparseable strings are not stable.
    pub fn is_stable(&self) -> bool {
        match &self.parsed {
            VersionType::Pep440(r) => r.pre.is_none() && r.dev.is_none(),
            VersionType::Unknown(_) => false,
        }
    }

    pub fn is_prerelease(&self) -> bool {
        self.is_valid() && !self.is_stable()
    }

    /// Number of dotted release segments (`2.32` has two).
    pub fn release_len(&self) -> usize {
        self.release().map(|r| r.segments.len()).unwrap_or(0)
    }

    /// Render only the first `len` release segments, keeping the epoch.
    pub fn truncated(&self, len: usize) -> Option<String> {
        let release = self.release()?;
        let len = len.max(1);
        let mut parts: Vec<String> = release
            .segments
            .iter()
            .take(len)
            .map(|s| s.to_string())
            .collect();
        while parts.len() < len {
            parts.push("0".to_string());
        }

        let body = parts.join(".");
        if release.epoch > 0 {
            Some(format!("{}!{}", release.epoch, body))
        } else {
            Some(body)
        }
    }

    /// `(major, minor)` of the release, padding a missing minor with zero.
    pub fn major_minor(&self) -> Option<(u64, u64)> {
        let release = self.release()?;
        let major = *release.segments.first()?;
        let minor = release.segments.get(1).copied().unwrap_or(0);
        Some((major, minor))
    }
}

impl Release {
    fn phase(&self) -> Phase {
        match (self.pre, self.post, self.dev) {
            (None, None, Some(_)) => Phase::DevOnly,
            (Some((kind, n)), _, _) => Phase::Pre(kind, n),
            _ => Phase::Final,
        }
    }

    /// Compare release segments with implicit zero padding (`1.0 == 1.0.0`).
    pub fn cmp_segments(a: &[u64], b: &[u64]) -> Ordering {
        let len = a.len().max(b.len());
        for i in 0..len {
            let av = a.get(i).copied().unwrap_or(0);
            let bv = b.get(i).copied().unwrap_or(0);
            match av.cmp(&bv) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    fn cmp_public(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| Self::cmp_segments(&self.segments, &other.segments))
            .then_with(|| self.phase().cmp(&other.phase()))
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| {
                let a = (self.dev.is_none(), self.dev.unwrap_or(0));
                let b = (other.dev.is_none(), other.dev.unwrap_or(0));
                a.cmp(&b)
            })
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.parsed, &other.parsed) {
            (VersionType::Pep440(a), VersionType::Pep440(b)) => a
                .cmp_public(b)
                .then_with(|| a.local.cmp(&b.local)),
            (VersionType::Unknown(_), VersionType::Pep440(_)) => Ordering::Less,
            (VersionType::Pep440(_), VersionType::Unknown(_)) => Ordering::Greater,
            (VersionType::Unknown(a), VersionType::Unknown(b)) => a.cmp(b),
        }
    }
}

pub struct VersionComparator;

impl VersionComparator {
    /// Get the latest version from a list
    pub fn get_latest(versions: &[String], stable_only: bool) -> Option<String> {
        let mut parsed_versions: Vec<Version> = versions
            .iter()
            .map(|v| Version::parse(v))
            .filter(|v| v.is_valid())
            .collect();

        if stable_only {
            parsed_versions.retain(|v| v.is_stable());
        }

        parsed_versions.sort();
        parsed_versions.last().map(|v| v.original.clone())
    }

    /// Check if version `a` is newer than version `b`
    pub fn is_newer(a: &str, b: &str) -> bool {
        let va = Version::parse(a);
        let vb = Version::parse(b);
        va.is_valid() && vb.is_valid() && va > vb
    }
}
