//! Error types for key service operations.
//!
//! Every error carries an [`ErrorClass`] that drives retry decisions.
//! Remote failures are classified from the service error code; local
//! failures (drift, bad definitions, missing credentials) are always user
//! errors, and anything the classifier does not recognize is fatal.

use thiserror::Error;

/// Well-known error codes returned by the key service.
pub mod codes {
    /// Internal failure inside the key service.
    pub const KMS_INTERNAL: &str = "KMSInternalException";
    /// Generic internal failure.
    pub const INTERNAL_FAILURE: &str = "InternalFailure";
    /// Service temporarily unavailable.
    pub const SERVICE_UNAVAILABLE: &str = "ServiceUnavailable";
    /// A dependency of the service timed out.
    pub const DEPENDENCY_TIMEOUT: &str = "DependencyTimeoutException";
    /// Caller exceeded the request rate.
    pub const REQUEST_LIMIT_EXCEEDED: &str = "RequestLimitExceeded";
    /// Caller is being throttled.
    pub const THROTTLING: &str = "ThrottlingException";
    /// Request parameters failed validation.
    pub const VALIDATION: &str = "ValidationException";
    /// Referenced entity does not exist.
    pub const NOT_FOUND: &str = "NotFoundException";
    /// Entity already exists.
    pub const ALREADY_EXISTS: &str = "AlreadyExistsException";
    /// Key ARN or identifier is malformed.
    pub const INVALID_ARN: &str = "InvalidArnException";
    /// Alias name is malformed or reserved.
    pub const INVALID_ALIAS_NAME: &str = "InvalidAliasNameException";
    /// Grant token is malformed.
    pub const INVALID_GRANT_TOKEN: &str = "InvalidGrantTokenException";
    /// Policy document is not valid.
    pub const MALFORMED_POLICY: &str = "MalformedPolicyDocumentException";
    /// Key is disabled.
    pub const DISABLED: &str = "DisabledException";
    /// Key is in a state that does not allow the operation.
    pub const INVALID_STATE: &str = "KMSInvalidStateException";
    /// Account quota exceeded.
    pub const LIMIT_EXCEEDED: &str = "LimitExceededException";
    /// Operation not supported for this key.
    pub const UNSUPPORTED_OPERATION: &str = "UnsupportedOperationException";
}

/// Classification of a failure for retry logic.
///
/// The class decides what the retry executor does with an error:
/// transient and rate-limited errors are retried, everything else is
/// surfaced to the caller unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Worth retrying unchanged (internal service error, transport failure)
    Transient,
    /// Caller is being throttled; retry without consuming the normal budget
    RateLimited,
    /// Invalid input or declared state; never retried
    UserError,
    /// Unrecognized or operational failure; never retried
    Fatal,
}

impl ErrorClass {
    /// Whether the retry executor may try again after this class of error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }

    /// Short label used in log lines and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::RateLimited => "rate-limited",
            Self::UserError => "user error",
            Self::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors that can occur while provisioning keys.
#[derive(Debug, Error)]
pub enum Error {
    /// Error response from the key service
    #[error("{code}: {message}")]
    Remote {
        /// Service error code (e.g. `ValidationException`)
        code: String,
        /// Message returned by the service
        message: String,
    },

    /// Connection-level failure before a response was received
    #[error("transport error: {message}")]
    Transport {
        /// Description of the transport failure
        message: String,
    },

    /// A definition tries to change a field that is immutable once the key exists
    #[error("illegal change to '{field}': {message}")]
    Drift {
        /// Name of the offending field
        field: String,
        /// Explanation shown to the user
        message: String,
    },

    /// A definition field is invalid on its own
    #[error("invalid value for '{field}': {message}")]
    InvalidDefinition {
        /// Name of the offending field
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// No accessor credential identifier was given or found in the environment
    #[error("please set 'access_key_id', $EC2_ACCESS_KEY or $AWS_ACCESS_KEY_ID")]
    MissingAccessKeyId,

    /// The secret for an accessor identifier could not be resolved
    #[error(
        "please set $EC2_SECRET_KEY or $AWS_SECRET_ACCESS_KEY, or add the key for '{access_key_id}' to '~/.ec2-keys' or '~/.aws/credentials'"
    )]
    MissingCredentials {
        /// The accessor identifier that could not be resolved
        access_key_id: String,
    },

    /// Region is not served by the key service
    #[error("invalid key service region '{0}'")]
    UnknownRegion(String),

    /// A key looked up by identifier or alias does not exist
    #[error("unable to find key '{0}'")]
    KeyNotFound(String),

    /// The retry budget ran out
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Name of the operation that was retried
        operation: String,
        /// Number of attempts made
        attempts: u32,
        /// The last error observed
        #[source]
        source: Box<Error>,
    },

    /// Readiness polling ran out of attempts
    #[error("timed out waiting for {what} to become available after {attempts} attempts")]
    WaitTimeout {
        /// What was being waited on
        what: String,
        /// Number of polls made
        attempts: u32,
    },

    /// The remote reported a terminal state that will never become ready
    #[error("{what} cannot become available: {detail}")]
    NotReady {
        /// What was being waited on
        what: String,
        /// Remote state description
        detail: String,
    },

    /// The state store failed to read or write
    #[error("state store error: {0}")]
    Persistence(String),

    /// Context added by the convergence engine
    #[error("{step}: {source}")]
    Step {
        /// Which convergence step failed
        step: &'static str,
        /// The underlying error
        #[source]
        source: Box<Error>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a remote error from a service code and message.
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
        }
    }

    /// Wrap this error with the name of the step that produced it.
    pub fn in_step(self, step: &'static str) -> Self {
        Error::Step {
            step,
            source: Box::new(self),
        }
    }

    /// Service error code, if this error came from the remote service.
    ///
    /// Looks through step context so callers can match on the original code.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Remote { code, .. } => Some(code),
            Error::Step { source, .. } => source.code(),
            _ => None,
        }
    }

    /// Get the error class for retry logic.
    pub fn class(&self) -> ErrorClass {
        classify(self)
    }

    /// Whether this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }

    /// Whether this error was caused by invalid input or declared state.
    pub fn is_user_error(&self) -> bool {
        self.class() == ErrorClass::UserError
    }

    /// The innermost error, skipping step context.
    pub fn root(&self) -> &Error {
        match self {
            Error::Step { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Classify an error raised by a remote call or by the engine itself.
pub fn classify(error: &Error) -> ErrorClass {
    match error {
        Error::Remote { code, .. } => classify_code(code),
        Error::Transport { .. } => ErrorClass::Transient,
        Error::Drift { .. }
        | Error::InvalidDefinition { .. }
        | Error::MissingAccessKeyId
        | Error::MissingCredentials { .. }
        | Error::UnknownRegion(_)
        | Error::KeyNotFound(_) => ErrorClass::UserError,
        Error::Step { source, .. } => classify(source),
        Error::RetriesExhausted { .. }
        | Error::WaitTimeout { .. }
        | Error::NotReady { .. }
        | Error::Persistence(_)
        | Error::Io(_)
        | Error::Json(_) => ErrorClass::Fatal,
    }
}

/// Classify a service error code.
pub fn classify_code(code: &str) -> ErrorClass {
    match code {
        codes::KMS_INTERNAL
        | codes::INTERNAL_FAILURE
        | "InternalError"
        | codes::SERVICE_UNAVAILABLE
        | "ServiceUnavailableException"
        | codes::DEPENDENCY_TIMEOUT => ErrorClass::Transient,

        codes::REQUEST_LIMIT_EXCEEDED | codes::THROTTLING | "Throttling" => {
            ErrorClass::RateLimited
        }

        codes::VALIDATION
        | codes::NOT_FOUND
        | codes::ALREADY_EXISTS
        | codes::INVALID_ARN
        | codes::INVALID_ALIAS_NAME
        | codes::INVALID_GRANT_TOKEN
        | "InvalidGrantIdException"
        | codes::MALFORMED_POLICY
        | codes::DISABLED
        | codes::INVALID_STATE
        | codes::LIMIT_EXCEEDED
        | codes::UNSUPPORTED_OPERATION => ErrorClass::UserError,

        _ => ErrorClass::Fatal,
    }
}

/// Result type for key service operations.
pub type Result<T> = std::result::Result<T, Error>;
