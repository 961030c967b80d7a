use std::time::Duration;

/// Errors that can occur across the UpgradeSage pipeline.
///
/// Each variant maps to one failure class of an analysis run. Library crates
/// return this type directly; the binary renders it through `miette`.
///
/// # Examples
///
/// ```
/// use sage_core::SageError;
///
/// let err = SageError::Config("missing API key".into());
/// assert!(err.to_string().contains("missing API key"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum SageError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    #[diagnostic(code(sage::io))]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration, or a malformed analysis request.
    #[error("configuration error: {0}")]
    #[diagnostic(
        code(sage::config),
        help("run `upgradesage doctor` to inspect the effective configuration")
    )]
    Config(String),

    /// The local object store could not be created.
    #[error("git setup failed: {0}")]
    #[diagnostic(
        code(sage::git_infra),
        help("check that git is installed and the temp directory is writable")
    )]
    GitInfra(String),

    /// A git subprocess exceeded its deadline.
    #[error("git {operation} timed out after {}s", .limit.as_secs())]
    #[diagnostic(
        code(sage::git_timeout),
        help("retry the analysis; large repositories can be slow to fetch")
    )]
    GitTimeout {
        /// The git subcommand that was running.
        operation: String,
        /// The deadline that was exceeded.
        limit: Duration,
    },

    /// A git operation failed after every fallback was exhausted.
    #[error("git error: {0}")]
    #[diagnostic(code(sage::git))]
    Git(String),

    /// LLM transport or response-structure failure.
    #[error("LLM error: {0}")]
    #[diagnostic(code(sage::llm))]
    Llm(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    #[diagnostic(code(sage::serialization))]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    #[diagnostic(code(sage::toml))]
    Toml(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SageError = io_err.into();
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn config_error_displays_message() {
        let err = SageError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn timeout_shows_operation_and_limit() {
        let err = SageError::GitTimeout {
            operation: "fetch".into(),
            limit: Duration::from_secs(300),
        };
        assert_eq!(err.to_string(), "git fetch timed out after 300s");
    }
}
