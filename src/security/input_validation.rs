use crate::errors::{AppError, Result};
use url::Url;
use std::path::Path;

/// Checks caller input before a task is created for it.
#[derive(Debug, Default, Clone, Copy)]
pub struct InputValidator;

impl InputValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_url(&self, url: &str) -> Result<()> {
        let url = url.trim();
        if url.is_empty() {
            return Err(AppError::Validation("URL cannot be empty".to_string()));
        }

        let parsed_url = Url::parse(url)
            .map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

        if !matches!(parsed_url.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "Unsupported scheme: {}. Only http and https are accepted",
                parsed_url.scheme()
            )));
        }

        if parsed_url.host_str().map_or(true, str::is_empty) {
            return Err(AppError::Validation("URL must have a host".to_string()));
        }

        Ok(())
    }

    /// The target directory may not exist yet (the task creates it), but if
    /// it does it must be a directory.
    pub fn validate_download_path(&self, path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Err(AppError::Validation("Download path cannot be empty".to_string()));
        }

        if path.to_string_lossy().contains('\0') {
            return Err(AppError::Validation("Null bytes not allowed in download path".to_string()));
        }

        if path.exists() && !path.is_dir() {
            return Err(AppError::Validation(format!(
                "Download path is not a directory: {}",
                path.display()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_urls_only() {
        let validator = InputValidator::new();
        assert!(validator.validate_url("https://example.com/watch?v=1").is_ok());
        assert!(validator.validate_url("http://example/video").is_ok());
        assert!(validator.validate_url("").is_err());
        assert!(validator.validate_url("ftp://example.com/file").is_err());
        assert!(validator.validate_url("not a url").is_err());
    }

    #[test]
    fn download_path_must_be_a_directory_when_present() {
        let validator = InputValidator::new();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();

        assert!(validator.validate_download_path(dir.path()).is_ok());
        assert!(validator.validate_download_path(&dir.path().join("not-yet")).is_ok());
        assert!(validator.validate_download_path(&file).is_err());
        assert!(validator.validate_download_path(Path::new("")).is_err());
    }
}
