//! Error types for the segmentation pipeline

use thiserror::Error;

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur during preprocessing, training or inference
#[derive(Error, Debug)]
pub enum Error {
    /// Cluster count could not be resolved before training
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Inference was attempted before training
    #[error("Model not trained: {operation} requires a trained model")]
    NotTrained {
        /// Operation that was attempted
        operation: String,
    },

    /// Transform was attempted on a column with no fitted statistics
    #[error("State error on column '{column}': {message}")]
    State {
        /// Column involved
        column: String,
        /// Error message
        message: String,
    },

    /// A category unseen at fit time was encountered during inference-only encoding
    #[error("Unknown category '{value}' in column '{column}'")]
    UnknownCategory {
        /// Column involved
        column: String,
        /// The unseen category value
        value: String,
    },

    /// Fewer observations than candidate cluster counts
    #[error("Insufficient data: {rows} rows, at least {required} required")]
    InsufficientData {
        /// Rows available
        rows: usize,
        /// Rows required
        required: usize,
    },

    /// Malformed or inconsistent input data
    #[error("Invalid data: {message}")]
    InvalidData {
        /// Error message
        message: String,
    },

    /// Numerical computation or model-fitting failure
    #[error("Computation error: {message}")]
    Computation {
        /// Error message
        message: String,
    },

    /// Chart rendering failure
    #[error("Render error: {message}")]
    Render {
        /// Error message
        message: String,
    },

    /// I/O failure while reading or writing artifacts
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parse or write failure
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Artifact serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new NotTrained error
    pub fn not_trained(operation: impl Into<String>) -> Self {
        Self::NotTrained {
            operation: operation.into(),
        }
    }

    /// Create a new State error
    pub fn state(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::State {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a new UnknownCategory error
    pub fn unknown_category(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::UnknownCategory {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Create a new InvalidData error
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a new Computation error
    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation {
            message: message.into(),
        }
    }

    /// Create a new Render error
    pub fn render(message: impl Into<String>) -> Self {
        Self::Render {
            message: message.into(),
        }
    }
}
