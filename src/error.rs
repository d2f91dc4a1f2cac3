use std::path::PathBuf;
use thiserror::Error;

use crate::store::Namespace;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of a single resolution call. None of these are retried: each one
/// points at a descriptor file or a caller argument that has to be fixed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{namespace} descriptor '{name}' not found at {}", path.display())]
    DescriptorNotFound {
        namespace: Namespace,
        name: String,
        path: PathBuf,
    },

    #[error("no credentials for role '{role}' in environment '{environment}'")]
    MissingCredential { role: String, environment: String },

    #[error("malformed {descriptor}: {reason}")]
    MalformedDescriptor { descriptor: String, reason: String },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn malformed(descriptor: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedDescriptor {
            descriptor: descriptor.into(),
            reason: reason.into(),
        }
    }
}
