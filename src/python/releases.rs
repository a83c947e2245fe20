use crate::error::{DependapyError, Result};
use crate::python::pypi::{build_client, validate_service_url};
use crate::python::version::Version;
use crate::repository::InterpreterReleases;
use jiff::Zoned;
use jiff::civil::Date;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_PYTHON_RELEASES_URL: &str = "https://endoflife.date";

/// Reads Python release cycles from the endoflife.date API.
pub struct EndOfLifeClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseCycle {
    pub cycle: String,
    #[serde(default)]
    pub eol: Option<EndOfLife>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EndOfLife {
    Date(String),
    Flag(bool),
}

impl ReleaseCycle {
    fn is_supported_on(&self, today: Date) -> bool {
        match &self.eol {
            None | Some(EndOfLife::Flag(false)) => true,
            Some(EndOfLife::Flag(true)) => false,
            Some(EndOfLife::Date(date)) => match date.parse::<Date>() {
                Ok(eol) => eol > today,
                Err(_) => {
                    debug!("Unreadable eol date '{}' for {}", date, self.cycle);
                    false
                }
            },
        }
    }
}

impl EndOfLifeClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: validate_service_url(base_url)?,
        })
    }

    fn fetch_cycles(&self) -> Result<Vec<ReleaseCycle>> {
        let url = format!("{}/api/python.json", self.base_url);
        debug!("Fetching: {}", url);

        let lookup_error = |message: String| DependapyError::IndexLookup {
            package: "python".to_string(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| lookup_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(lookup_error(format!("HTTP {}", response.status())));
        }

        let body = response.text().map_err(|e| lookup_error(e.to_string()))?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl InterpreterReleases for EndOfLifeClient {
    fn supported_minor_versions(&self, count: usize) -> Result<Vec<String>> {
        let cycles = self.fetch_cycles()?;
        Ok(newest_supported_minors(&cycles, Zoned::now().date(), count))
    }
}

/// The `count` newest `3.x` cycles still supported on `today`, newest first.
pub fn newest_supported_minors(cycles: &[ReleaseCycle], today: Date, count: usize) -> Vec<String> {
    let mut supported: Vec<Version> = cycles
        .iter()
        .filter(|c| c.cycle.starts_with("3."))
        .filter(|c| c.is_supported_on(today))
        .map(|c| Version::parse(&c.cycle))
        .filter(|v| v.is_valid())
        .collect();

    supported.sort();
    supported.dedup();
    supported
        .into_iter()
        .rev()
        .take(count)
        .map(|v| v.original)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::civil::date;

    const FEED: &str = r#"[
        {"cycle": "3.14", "eol": "2030-10-31"},
        {"cycle": "3.13", "eol": "2029-10-31"},
        {"cycle": "3.12", "eol": "2028-10-31"},
        {"cycle": "3.11", "eol": "2027-10-31"},
        {"cycle": "3.9", "eol": "2025-10-31"},
        {"cycle": "2.7", "eol": "2020-01-01"}
    ]"#;

    #[test]
    fn picks_newest_supported_minors_in_version_order() {
        let cycles: Vec<ReleaseCycle> = serde_json::from_str(FEED).unwrap();
        let minors = newest_supported_minors(&cycles, date(2026, 1, 15), 3);
        assert_eq!(minors, vec!["3.14", "3.13", "3.12"]);
    }

    #[test]
    fn drops_cycles_past_end_of_life() {
        let cycles: Vec<ReleaseCycle> = serde_json::from_str(FEED).unwrap();
        let minors = newest_supported_minors(&cycles, date(2029, 11, 1), 3);
        assert_eq!(minors, vec!["3.14"]);
    }

    #[test]
    fn boolean_eol_flags_are_honoured() {
        let cycles: Vec<ReleaseCycle> = serde_json::from_str(
            r#"[{"cycle": "3.15", "eol": false}, {"cycle": "3.10", "eol": true}, {"cycle": "3.9"}]"#,
        )
        .unwrap();
        let minors = newest_supported_minors(&cycles, date(2026, 1, 1), 3);
        assert_eq!(minors, vec!["3.15", "3.9"]);
    }
}
