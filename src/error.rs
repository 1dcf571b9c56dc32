//! Crate-level error taxonomy.
//!
//! Every fallible operation returns an [`Error`] carrying a stable
//! [`ErrorKind`] plus a human-readable message. Coordinator-level failures
//! are mapped into the taxonomy at the boundary (`NoEnt` becomes
//! [`ErrorKind::NotFound`], compare-and-set losses surface as
//! [`ErrorKind::RevMismatch`] unless a caller translates them).

use thiserror::Error;

use crate::coordinator::CoordError;

/// Stable classification of registry failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Target path already exists on register.
    Conflict,
    /// Required path absent on read or delete.
    NotFound,
    /// Claimer mismatch, duplicate lock, or action on a done instance.
    Unauthorized,
    /// Claim on an already-claimed instance, including CAS losses on `start`.
    InsClaimed,
    /// Transition attempted from the wrong lifecycle state.
    InvalidState,
    /// Malformed persisted bytes (object arity, undecodable file).
    InvalidFile,
    /// Input validation failure on a name or argument.
    InvalidArgument,
    /// Environment variable key validation failure.
    InvalidKey,
    /// Port field not parseable as an integer in range.
    InvalidPort,
    /// Traffic share outside the 0..=100 range.
    InvalidShare,
    /// Proc name fails the alphanumeric-only rule.
    BadProcName,
    /// Tag name collides with an existing revision ref.
    TagShadowing,
    /// Stored schema differs from the compiled constant.
    SchemaMismatch,
    /// Coordinator compare-and-set lost against a concurrent writer.
    RevMismatch,
    /// Any other coordinator-level failure (connection closed, bad path).
    Coordinator,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InsClaimed => "instance-claimed",
            ErrorKind::InvalidState => "invalid-state",
            ErrorKind::InvalidFile => "invalid-file",
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::InvalidKey => "invalid-key",
            ErrorKind::InvalidPort => "invalid-port",
            ErrorKind::InvalidShare => "invalid-share",
            ErrorKind::BadProcName => "bad-proc-name",
            ErrorKind::TagShadowing => "tag-shadowing",
            ErrorKind::SchemaMismatch => "schema-mismatch",
            ErrorKind::RevMismatch => "rev-mismatch",
            ErrorKind::Coordinator => "coordinator",
        }
    }
}

/// Registry error: an [`ErrorKind`] plus context.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == ErrorKind::Conflict
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == ErrorKind::Unauthorized
    }

    pub fn is_ins_claimed(&self) -> bool {
        self.kind == ErrorKind::InsClaimed
    }

    pub fn is_invalid_state(&self) -> bool {
        self.kind == ErrorKind::InvalidState
    }

    pub fn is_invalid_file(&self) -> bool {
        self.kind == ErrorKind::InvalidFile
    }

    pub fn is_invalid_argument(&self) -> bool {
        self.kind == ErrorKind::InvalidArgument
    }

    pub fn is_invalid_key(&self) -> bool {
        self.kind == ErrorKind::InvalidKey
    }

    pub fn is_invalid_port(&self) -> bool {
        self.kind == ErrorKind::InvalidPort
    }

    pub fn is_invalid_share(&self) -> bool {
        self.kind == ErrorKind::InvalidShare
    }

    pub fn is_bad_proc_name(&self) -> bool {
        self.kind == ErrorKind::BadProcName
    }

    pub fn is_tag_shadowing(&self) -> bool {
        self.kind == ErrorKind::TagShadowing
    }

    pub fn is_schema_mismatch(&self) -> bool {
        self.kind == ErrorKind::SchemaMismatch
    }

    pub fn is_rev_mismatch(&self) -> bool {
        self.kind == ErrorKind::RevMismatch
    }
}

impl From<CoordError> for Error {
    fn from(err: CoordError) -> Self {
        let kind = match &err {
            CoordError::NoEnt { .. } => ErrorKind::NotFound,
            CoordError::RevMismatch { .. } => ErrorKind::RevMismatch,
            CoordError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            CoordError::Codec { .. } => ErrorKind::InvalidFile,
            CoordError::BadPath { .. } | CoordError::Closed | CoordError::UnsupportedUri { .. } => {
                ErrorKind::Coordinator
            }
        };
        Error::new(kind, err.to_string())
    }
}

/// Shorthand used throughout the crate to build a kinded error with context.
macro_rules! errorf {
    ($kind:expr, $($arg:tt)*) => {
        $crate::error::Error::new($kind, format!($($arg)*))
    };
}

pub(crate) use errorf;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_match_kind() {
        let cases: Vec<(Error, fn(&Error) -> bool)> = vec![
            (Error::new(ErrorKind::Conflict, "c"), Error::is_conflict),
            (Error::new(ErrorKind::NotFound, "n"), Error::is_not_found),
            (
                Error::new(ErrorKind::Unauthorized, "u"),
                Error::is_unauthorized,
            ),
            (Error::new(ErrorKind::InsClaimed, "i"), Error::is_ins_claimed),
            (
                Error::new(ErrorKind::InvalidState, "s"),
                Error::is_invalid_state,
            ),
            (
                Error::new(ErrorKind::TagShadowing, "t"),
                Error::is_tag_shadowing,
            ),
        ];
        for (err, pred) in cases {
            assert!(pred(&err), "{err} should satisfy its own predicate");
            assert!(!err.is_invalid_port());
        }
    }

    #[test]
    fn coordinator_noent_maps_to_not_found() {
        let err: Error = CoordError::NoEnt {
            path: "/apps/x".into(),
        }
        .into();
        assert!(err.is_not_found());
    }

    #[test]
    fn coordinator_rev_mismatch_propagates_raw() {
        let err: Error = CoordError::RevMismatch {
            path: "/instances/1/status".into(),
        }
        .into();
        assert!(err.is_rev_mismatch());
        assert!(!err.is_ins_claimed());
    }
}
