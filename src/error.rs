//! Error types for the balance engine and its providers.

/// Failures raised by a Repository or TimeSeriesProvider.
///
/// These propagate to the caller unmodified; the engine never guesses a
/// replacement figure when a provider fails.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored result could not be (de)serialized: {0}")]
    Json(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data violates an expectation of the schema.
    #[error("malformed {what}: {detail}")]
    Malformed { what: String, detail: String },

    /// A transfer for this (date, source, dest) triple is already recorded.
    #[error("transfer {source_code} -> {dest_code} already recorded for {date}")]
    DuplicateTransfer {
        date: chrono::NaiveDate,
        source_code: String,
        dest_code: String,
    },

    #[error("unknown storage facility '{0}'")]
    UnknownFacility(String),
}

/// Errors surfaced by the balance engine.
#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// An atomic mutation failed; all volume changes were rolled back and
    /// previously captured state restored before this error was raised.
    #[error("{operation} failed and was rolled back: {source}")]
    Transaction {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = BalanceError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_display_names_operation() {
        let err = BalanceError::Transaction {
            operation: "pump transfer",
            source: ProviderError::UnknownFacility("TSF1".to_string()),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("pump transfer failed"));
        assert!(msg.contains("TSF1"));
    }

    #[test]
    fn provider_errors_are_transparent() {
        let err = BalanceError::from(ProviderError::Malformed {
            what: "snapshot".to_string(),
            detail: "negative volume".to_string(),
        });
        assert_eq!(format!("{}", err), "malformed snapshot: negative volume");
    }
}
