use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for droid-runner operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for droid-runner.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors, detected before any device interaction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing required configuration field.
    #[error("Missing required configuration field: {0}")]
    MissingConfig(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidConfig { field: String, value: String },

    /// The target catalog holds no platform or add-on to build an AVD from.
    #[error("No Android target available to create a virtual device from")]
    NoTarget,

    /// A required external command failed or produced unexpected output.
    #[error("Execution of `{command}` failed{}{}", exit_suffix(.exit_code), output_suffix(.output))]
    Execution {
        command: String,
        exit_code: Option<i32>,
        output: Vec<String>,
    },

    /// A bounded wait ran out of budget.
    #[error("{operation} timed out after {elapsed:?}{}", output_suffix(.output))]
    Timeout {
        operation: String,
        elapsed: Duration,
        output: Vec<String>,
    },

    /// The emulator state machine was asked for a transition it does not allow.
    #[error("Invalid emulator state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// No registered device matched the lookup.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A lifecycle call arrived in an order the session cannot honour.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// File not found.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML deserialization error.
    #[error("TOML parsing error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid output pattern.
    #[error("Pattern error: {0}")]
    Regex(#[from] regex::Error),

    /// APK archive error.
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Cargo metadata error.
    #[cfg(feature = "cargo-metadata")]
    #[error("Cargo metadata error: {0}")]
    CargoMetadata(#[from] cargo_metadata::Error),
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {code}"),
        None => String::new(),
    }
}

fn output_suffix(output: &[String]) -> String {
    if output.is_empty() {
        return String::new();
    }
    format!("\n--- captured output ---\n{}\n--- end output ---", output.join("\n"))
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create an execution error for `command` with no captured output.
    pub fn execution(command: impl Into<String>, exit_code: Option<i32>) -> Self {
        Error::Execution {
            command: command.into(),
            exit_code,
            output: Vec::new(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            elapsed,
            output: Vec::new(),
        }
    }

    /// Create a lifecycle ordering error.
    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Error::Lifecycle(msg.into())
    }

    /// Attach captured process output to an execution or timeout error.
    ///
    /// Other variants are returned unchanged.
    pub fn with_output(mut self, lines: Vec<String>) -> Self {
        match &mut self {
            Error::Execution { output, .. } | Error::Timeout { output, .. } => *output = lines,
            _ => {}
        }
        self
    }

    /// Whether this error is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::MissingConfig(_) | Error::InvalidConfig { .. } | Error::NoTarget
        )
    }

    /// Whether this error is a bounded-wait timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Whether this error is a failed external command.
    pub fn is_execution(&self) -> bool {
        matches!(self, Error::Execution { .. })
    }

    /// Captured output attached to this error, if any.
    pub fn output(&self) -> &[String] {
        match self {
            Error::Execution { output, .. } | Error::Timeout { output, .. } => output,
            _ => &[],
        }
    }
}
