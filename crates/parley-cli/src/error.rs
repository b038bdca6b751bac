use std::fmt;

use parley::ParleyError;

/// Failure reported as `Error: ...` before the client exits
#[derive(Debug)]
pub struct CliError(pub String);

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CliError {}

impl From<&str> for CliError {
    fn from(s: &str) -> Self {
        CliError(s.to_owned())
    }
}

impl From<ParleyError> for CliError {
    fn from(e: ParleyError) -> Self {
        match e {
            ParleyError::Config(_) => {
                CliError(format!("{e} (run `parley-cli config show` to inspect settings)"))
            }
            other => CliError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError(format!("Failed to encode JSON output: {e}"))
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError(format!("Terminal I/O failed: {e}"))
    }
}

pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_point_at_config_show() {
        let err = CliError::from(ParleyError::Config("OPENAI_API_KEY is not set".to_string()));
        assert!(err.to_string().starts_with("Configuration error: OPENAI_API_KEY is not set"));
        assert!(err.to_string().contains("parley-cli config show"));
    }

    #[test]
    fn test_other_errors_pass_through() {
        let err = CliError::from(ParleyError::Network("timed out".to_string()));
        assert_eq!(err.to_string(), "Network error: timed out");

        let err = CliError::from("Question must not be empty");
        assert_eq!(err.to_string(), "Question must not be empty");
    }

    #[test]
    fn test_io_errors_name_the_terminal() {
        let err = CliError::from(std::io::Error::other("broken pipe"));
        assert_eq!(err.to_string(), "Terminal I/O failed: broken pipe");
    }
}
