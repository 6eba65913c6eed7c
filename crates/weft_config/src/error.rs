//! Error types for configuration loading and validation.

/// Errors that can occur when loading or validating a `weft.toml` configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An I/O error occurred while reading the configuration file.
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// The TOML content could not be parsed, or contained unknown keys.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A referenced module name does not exist in the configuration.
    #[error("unknown module '{0}'")]
    UnknownModule(String),

    /// A required field is missing from the configuration.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// Module dependencies form a cycle.
    #[error("module dependency cycle involving '{0}'")]
    DependencyCycle(String),

    /// A configuration value failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_unknown_module() {
        let err = ConfigError::UnknownModule("nonexistent".to_string());
        assert_eq!(format!("{err}"), "unknown module 'nonexistent'");
    }

    #[test]
    fn display_missing_field() {
        let err = ConfigError::MissingField("project.name".to_string());
        assert_eq!(format!("{err}"), "missing required field: project.name");
    }

    #[test]
    fn display_cycle() {
        let err = ConfigError::DependencyCycle("server".to_string());
        assert_eq!(
            format!("{err}"),
            "module dependency cycle involving 'server'"
        );
    }

    #[test]
    fn display_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::IoError(io_err);
        assert!(format!("{err}").starts_with("failed to read configuration:"));
    }
}
