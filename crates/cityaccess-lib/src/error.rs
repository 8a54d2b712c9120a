use std::path::PathBuf;

use thiserror::Error;

/// Convenient result alias for the accessibility library.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level library error type.
#[derive(Debug, Error)]
pub enum Error {
    /// A table required by the current stage is not present in the store.
    #[error("table {table} not found in store; run the earlier pipeline stages first")]
    MissingTable { table: String },

    /// A column required by the current stage is not present on a table.
    #[error("column {column} not found on table {table}{}", format_available(.available))]
    MissingColumn {
        table: String,
        column: String,
        available: Vec<String>,
    },

    /// Raised when a table or column name is not a plain SQL identifier.
    #[error("invalid identifier {name:?}; expected letters, digits and underscores")]
    InvalidIdentifier { name: String },

    /// Raised when a configuration value is out of range.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Raised when a configuration file cannot be parsed.
    #[error("failed to parse configuration file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Raised when an import file lacks a required header.
    #[error("import file {path} is missing required column {column}")]
    ImportColumnMissing { path: PathBuf, column: String },

    /// Raised when an import cell cannot be parsed as a number.
    #[error("import file {path}, line {line}: column {column} is not numeric ({value:?})")]
    ImportValue {
        path: PathBuf,
        line: u64,
        column: String,
        value: String,
    },

    /// Raised when an import cell holds a negative amount.
    #[error("import file {path}, line {line}: column {column} must not be negative ({value})")]
    ImportNegative {
        path: PathBuf,
        line: u64,
        column: String,
        value: f64,
    },

    /// The routing service answered with a non-success status.
    #[error("routing service returned HTTP {status} for {url}")]
    RoutingStatus { status: u16, url: String },

    /// The routing service answered, but the body lacked the expected fields.
    #[error("malformed routing response: {message}")]
    MalformedResponse { message: String },

    /// Wrapper for SQLite errors.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// Wrapper for IO errors.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Wrapper for HTTP client errors.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Wrapper for CSV reader/writer errors.
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Whether a failed routing request may succeed if attempted again.
    ///
    /// Timeouts, refused connections, 5xx/429 statuses and malformed bodies
    /// are treated as transient. Client errors (4xx) are not: repeating the
    /// same coordinates will produce the same answer.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::MalformedResponse { .. } => true,
            Error::RoutingStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

fn format_available(available: &[String]) -> String {
    if available.is_empty() {
        String::new()
    } else {
        format!(" (available: {})", available.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_column_lists_available_columns() {
        let error = Error::MissingColumn {
            table: "orig".to_string(),
            column: "pop_total".to_string(),
            available: vec!["orig_id".to_string(), "pop_over_65".to_string()],
        };
        assert_eq!(
            error.to_string(),
            "column pop_total not found on table orig (available: orig_id, pop_over_65)"
        );
    }

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        let server = Error::RoutingStatus {
            status: 503,
            url: "http://localhost/table".to_string(),
        };
        let client = Error::RoutingStatus {
            status: 400,
            url: "http://localhost/table".to_string(),
        };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
        assert!(Error::MalformedResponse {
            message: "missing durations".to_string()
        }
        .is_retryable());
    }
}
