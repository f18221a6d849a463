//! Error kinds observable at the edges of registration and resolution.

use std::fmt;
use std::sync::Arc;

use crate::key::Key;

/// A type-erased error returned by a producer body.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// How a resolution failure should be classified for reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    /// No failure.
    None,
    /// The originating error or missing producer.
    RootCause,
    /// A consumer of a root-cause failure.
    Transitive,
}

/// A single entry in a producer chain, used to render failure trails.
#[derive(Clone, Debug)]
pub struct Frame {
    /// The key that failed at this point in the chain.
    pub key: Key,
    /// Where the producer responsible for `key` was registered, if known.
    pub location: Option<&'static str>,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(f, "{} ({})", self.key, loc),
            None => write!(f, "{}", self.key),
        }
    }
}

/// Errors raised while registering producers or decorators.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RegistrationError {
    /// Two producers were registered for the same exact `(type, name)` key.
    #[error("already provided: {key} is already produced by a constructor registered at {}", existing.as_deref().unwrap_or("<unknown>"))]
    AlreadyProvided {
        /// The colliding key.
        key: Key,
        /// Where the existing producer was registered, if known.
        existing: Option<String>,
    },

    /// Registering this producer would close a directed cycle.
    #[error("cycle detected: {}", format_cycle(.path))]
    CycleDetected {
        /// The cycle, in forward order, ending with the re-entry node.
        path: Vec<Frame>,
    },

    /// A parameter or result aggregate field violated a directive rule.
    #[error("bad signature: field `{field}` of `{aggregate}`: {reason}")]
    BadSignature {
        /// The aggregate type name.
        aggregate: &'static str,
        /// The offending field name.
        field: &'static str,
        /// Why the combination of directives is invalid.
        reason: &'static str,
    },

    /// A decorator was registered twice for the same `(key, scope)` pair.
    #[error("decorator already registered for {key} in this scope")]
    DuplicateDecorator {
        /// The colliding key.
        key: Key,
    },
}

fn format_cycle(path: &[Frame]) -> String {
    path.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(" -> ")
}

/// Errors raised while resolving a consumer's parameters.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ResolutionError {
    /// No producer is visible from the requesting scope for this key.
    #[error("missing dependency: no producer for {key} is visible from this scope")]
    Missing {
        /// The key with no producer.
        key: Key,
    },

    /// A producer returned an error.
    #[error("constructor failed for {key} ({location}): {source}")]
    ConstructorFailed {
        /// The key the failing producer was responsible for.
        key: Key,
        /// Where the producer was registered.
        location: &'static str,
        /// The error the producer body returned.
        #[source]
        source: Arc<BoxError>,
    },

    /// A consumer depended, transitively, on a failing or missing key.
    #[error("transitive failure resolving {key}: {}", format_cycle(.trail))]
    Transitive {
        /// The key that could not be produced because one of its own
        /// dependencies failed.
        key: Key,
        /// The chain of frames from `key` down to the root cause.
        trail: Vec<Frame>,
        /// The underlying root-cause error.
        #[source]
        root: Arc<DigError>,
    },

    /// A producer panicked and panic recovery was enabled.
    #[error("constructor panicked for {key} ({location}): {message}")]
    Panicked {
        /// The key the panicking producer was responsible for.
        key: Key,
        /// Where the producer was registered.
        location: &'static str,
        /// The captured panic payload, stringified.
        message: String,
    },
}

/// The union of every error this crate can surface.
#[derive(Clone, Debug, thiserror::Error)]
pub enum DigError {
    /// A registration-time failure.
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    /// A resolution-time failure.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

impl DigError {
    /// The classification of this error for diagnostics purposes.
    pub fn classification(&self) -> Classification {
        match self {
            DigError::Registration(_) => Classification::RootCause,
            DigError::Resolution(ResolutionError::Missing { .. }) => Classification::RootCause,
            DigError::Resolution(ResolutionError::ConstructorFailed { .. }) => {
                Classification::RootCause
            }
            DigError::Resolution(ResolutionError::Panicked { .. }) => Classification::RootCause,
            DigError::Resolution(ResolutionError::Transitive { .. }) => Classification::Transitive,
        }
    }

    /// The single key this failure is attributed to, if any. A registration
    /// error names no one key; every resolution error does.
    pub fn key(&self) -> Option<&Key> {
        match self {
            DigError::Registration(_) => None,
            DigError::Resolution(ResolutionError::Missing { key }) => Some(key),
            DigError::Resolution(ResolutionError::ConstructorFailed { key, .. }) => Some(key),
            DigError::Resolution(ResolutionError::Transitive { key, .. }) => Some(key),
            DigError::Resolution(ResolutionError::Panicked { key, .. }) => Some(key),
        }
    }
}
