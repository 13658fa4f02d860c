use crate::config::{parse_duration, Config, CONFIG_SCHEMA_VERSION};
use crate::embedding::CLIP_MODEL_NAME;
use crate::error::{PixseekError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, reporting every problem at once
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_search(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_download(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PixseekError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != CONFIG_SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        let db_file = &config.storage.db_file;
        if db_file.is_empty() || db_file.contains(['/', '\\']) {
            errors.push(ValidationError::new(
                "storage.db_file",
                format!("Database file must be a plain file name, got '{}'", db_file),
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        let indexing = &config.indexing;
        if indexing.batch_size == 0 {
            errors.push(ValidationError::new(
                "indexing.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if indexing.commit_interval == 0 {
            errors.push(ValidationError::new(
                "indexing.commit_interval",
                "Commit interval must be greater than 0",
            ));
        }

        if indexing.count_update_every == 0 {
            errors.push(ValidationError::new(
                "indexing.count_update_every",
                "Count update interval must be greater than 0",
            ));
        }

        for name in &indexing.exclude_dirs {
            if name.is_empty() || name.contains(['/', '\\']) {
                errors.push(ValidationError::new(
                    "indexing.exclude_dirs",
                    format!("Excluded directories are names, not paths: '{}'", name),
                ));
            }
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.search.top_k == 0 {
            errors.push(ValidationError::new(
                "search.top_k",
                "top_k must be greater than 0",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let model = &config.embedding.model;
        if !model.eq_ignore_ascii_case(CLIP_MODEL_NAME) {
            errors.push(ValidationError::new(
                "embedding.model",
                format!("Model must be '{}', got '{}'", CLIP_MODEL_NAME, model),
            ));
        }

        if config.embedding.cache_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "embedding.cache_dir",
                "Model cache directory cannot be empty",
            ));
        }
    }

    fn validate_download(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.download.max_size_bytes == 0 {
            errors.push(ValidationError::new(
                "download.max_size_bytes",
                "Maximum download size must be greater than 0",
            ));
        }

        let timeout = &config.download.timeout;
        if !parse_duration(timeout).is_some_and(|d| !d.is_zero()) {
            errors.push(ValidationError::new(
                "download.timeout",
                format!("Invalid duration format: {}", timeout),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = Config::default();
        config.indexing.batch_size = 0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_unknown_model() {
        let mut config = Config::default();
        config.embedding.model = "all-MiniLM-L6-v2".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = Config::default();
        config.search.top_k = 0;
        config.download.timeout = "whenever".to_string();
        config.indexing.exclude_dirs = vec!["a/b".to_string()];

        match ConfigValidator::validate(&config) {
            Err(PixseekError::ConfigValidation { errors }) => {
                let paths: Vec<_> = errors.iter().map(|e| e.path.as_str()).collect();
                assert_eq!(
                    paths,
                    vec!["indexing.exclude_dirs", "search.top_k", "download.timeout"]
                );
            }
            other => panic!("expected validation errors, got {:?}", other),
        }
    }
}
