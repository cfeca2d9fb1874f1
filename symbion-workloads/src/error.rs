//! Error types for workload reconciliation
//!
//! Every failure inside a batch (`update`, `deregister`) is recorded and the
//! batch keeps going; callers get all of them back at once in an
//! [`AggregateError`].

use std::fmt;

use crate::runtime::RuntimeError;

/// A single failure recorded while reconciling workloads
#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    /// Raw specification (or the derived pod) could not go through YAML
    #[error("cannot convert workload '{workload}' to pod: {source}")]
    Conversion {
        workload: String,
        #[source]
        source: serde_yaml::Error,
    },
    /// Manifest or directory I/O failed
    #[error("{context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: std::io::Error,
    },
    /// The workload runtime rejected an operation
    #[error("{context}: {source}")]
    Runtime {
        context: String,
        #[source]
        source: RuntimeError,
    },
    /// Name cannot be used as a file name under the data directory
    #[error("invalid workload name '{workload}'")]
    InvalidName { workload: String },
    /// Construction outside a Tokio runtime
    #[error("cannot schedule workload monitor: {0}")]
    Scheduling(#[from] tokio::runtime::TryCurrentError),
}

impl WorkloadError {
    pub fn conversion(workload: &str, source: serde_yaml::Error) -> Self {
        Self::Conversion {
            workload: workload.to_string(),
            source,
        }
    }

    pub fn persistence(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Persistence {
            context: context.into(),
            source,
        }
    }

    pub fn invalid_name(workload: &str) -> Self {
        Self::InvalidName {
            workload: workload.to_string(),
        }
    }

    pub fn runtime(context: impl Into<String>, source: RuntimeError) -> Self {
        Self::Runtime {
            context: context.into(),
            source,
        }
    }
}

/// Ordered collection of independent failures from one batch operation
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<WorkloadError>,
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: WorkloadError) {
        self.errors.push(error);
    }

    pub fn extend(&mut self, other: AggregateError) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkloadError> {
        self.errors.iter()
    }

    pub fn into_errors(self) -> Vec<WorkloadError> {
        self.errors
    }

    /// `Ok(())` when nothing was recorded
    pub fn into_result(self) -> Result<(), AggregateError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<WorkloadError> for AggregateError {
    fn from(error: WorkloadError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            1 => writeln!(f, "1 error occurred:")?,
            n => writeln!(f, "{} errors occurred:", n)?,
        }
        for error in &self.errors {
            writeln!(f, "\t* {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
