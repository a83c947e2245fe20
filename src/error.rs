use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DependapyError {
    #[error("Project validation failed: {0}")]
    ProjectValidation(String),

    #[error("Failed to parse manifest {}: {message}", path.display())]
    ManifestParse { path: PathBuf, message: String },

    #[error("Package '{0}' not found on the package index")]
    PackageNotFound(String),

    #[error("Index lookup failed for '{package}': {message}")]
    IndexLookup { package: String, message: String },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Publishing failed: {0}")]
    Publish(String),

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DependapyError {
    /// Errors that abort the whole run instead of just the current manifest.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DependapyError::Authentication(_) | DependapyError::ProjectValidation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DependapyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_auth_and_validation_are_fatal() {
        assert!(DependapyError::Authentication("bad token".into()).is_fatal());
        assert!(DependapyError::ProjectValidation("no dir".into()).is_fatal());
        assert!(!DependapyError::Publish("push rejected".into()).is_fatal());
        assert!(!DependapyError::PackageNotFound("nope".into()).is_fatal());
        assert!(
            !DependapyError::ManifestParse {
                path: PathBuf::from("pyproject.toml"),
                message: "bad".into(),
            }
            .is_fatal()
        );
    }
}
