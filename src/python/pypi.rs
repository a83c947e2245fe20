use crate::error::{DependapyError, Result};
use crate::manifest::requirement::normalize_name;
use crate::repository::PackageIndex;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_INDEX_URL: &str = "https://pypi.org";

const USER_AGENT: &str = concat!("dependapy/", env!("CARGO_PKG_VERSION"));

/// PyPI JSON API client. Results are cached per normalized package name for
/// the lifetime of the client, failures included.
pub struct PyPiClient {
    client: Client,
    base_url: String,
    cache: Mutex<HashMap<String, CachedLookup>>,
}

#[derive(Clone)]
enum CachedLookup {
    Versions(Vec<String>),
    NotFound,
    Failed(String),
}

impl PyPiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = validate_service_url(base_url)?;
        Ok(Self {
            client: build_client()?,
            base_url,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn lookup(&self, package: &str) -> CachedLookup {
        let url = format!("{}/pypi/{}/json", self.base_url, package);
        debug!("Fetching: {}", url);

        let response = match self.client.get(&url).send() {
            Ok(resp) => resp,
            Err(e) => {
                debug!("Request failed: {}", e);
                return CachedLookup::Failed(e.to_string());
            }
        };

        if response.status() == StatusCode::NOT_FOUND {
            return CachedLookup::NotFound;
        }

        if !response.status().is_success() {
            debug!("HTTP {}: {}", response.status(), url);
            return CachedLookup::Failed(format!("HTTP {}", response.status()));
        }

        let body = match response.text() {
            Ok(body) => body,
            Err(e) => return CachedLookup::Failed(e.to_string()),
        };

        match parse_project_versions(&body) {
            Ok(versions) => CachedLookup::Versions(versions),
            Err(e) => CachedLookup::Failed(format!("Failed to parse PyPI response: {e}")),
        }
    }
}

impl PackageIndex for PyPiClient {
    fn fetch_available_versions(&self, package: &str) -> Result<Vec<String>> {
        let key = normalize_name(package);

        let cached = self
            .cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(&key).cloned());

        let lookup = match cached {
            Some(hit) => hit,
            None => {
                let fresh = self.lookup(&key);
                if let Ok(mut cache) = self.cache.lock() {
                    cache.insert(key.clone(), fresh.clone());
                }
                fresh
            }
        };

        match lookup {
            CachedLookup::Versions(versions) => Ok(versions),
            CachedLookup::NotFound => Err(DependapyError::PackageNotFound(package.to_string())),
            CachedLookup::Failed(message) => Err(DependapyError::IndexLookup {
                package: package.to_string(),
                message,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    info: ProjectInfo,
    #[serde(default)]
    releases: HashMap<String, Vec<ReleaseFile>>,
}

#[derive(Debug, Deserialize)]
struct ProjectInfo {
    version: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseFile {
    #[serde(default)]
    yanked: bool,
}

/// Installable versions from a PyPI project document: releases with at
/// least one file that is not yanked. Falls back to `info.version` when the
/// document carries no release listing.
pub fn parse_project_versions(body: &str) -> std::result::Result<Vec<String>, serde_json::Error> {
    let project: ProjectResponse = serde_json::from_str(body)?;

    if project.releases.is_empty() {
        return Ok(vec![project.info.version]);
    }

    let mut versions: Vec<String> = project
        .releases
        .into_iter()
        .filter(|(_, files)| files.iter().any(|file| !file.yanked))
        .map(|(version, _)| version)
        .collect();
    versions.sort();
    Ok(versions)
}

pub(crate) fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| DependapyError::Io(std::io::Error::other(e)))
}

/// Accept only http(s) base URLs; returns the URL without a trailing slash.
pub(crate) fn validate_service_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url)
        .map_err(|_| DependapyError::ProjectValidation(format!("Invalid service URL: {url}")))?;

    match parsed.scheme() {
        "https" | "http" => {}
        scheme => {
            return Err(DependapyError::ProjectValidation(format!(
                "Unsupported service URL scheme: {scheme}"
            )));
        }
    }

    if parsed.host_str().is_none() {
        return Err(DependapyError::ProjectValidation(format!(
            "Service URL has no host: {url}"
        )));
    }

    Ok(url.trim_end_matches('/').to_string())
}
