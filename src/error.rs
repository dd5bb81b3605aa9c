use serde::Serialize;
use thiserror::Error;

pub const INVALID_QUERY: &str = "cortex.invalidArgument.query";
pub const INVALID_UNKNOWN_OPERATOR: &str = "cortex.invalidArgument.unknownOperator";
pub const INVALID_UNKNOWN_COMMAND: &str = "cortex.invalidArgument.unknownCommand";
pub const INVALID_CAST: &str = "cortex.invalidArgument.castError";
pub const NOT_FOUND_USER_VARIABLE: &str = "cortex.notFound.userVariable";
pub const NOT_FOUND_COMMAND: &str = "cortex.notFound.command";
pub const NOT_FOUND_OPERATION: &str = "cortex.notFound.operation";
pub const ABORTED: &str = "cortex.aborted";
pub const PURE_VIRTUAL: &str = "cortex.error.pureVirtual";
pub const TIMEOUT: &str = "cortex.timeout";
pub const INTERNAL: &str = "cortex.error.unspecified";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum FaultKind {
    InvalidArgument,
    NotFound,
    Aborted,
    NotImplemented,
    Timeout,
    Internal,
}

/// Engine error: a stable `code`, a human `reason` and the dotted `path` of
/// the offending node in the source literal.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {reason}")]
pub struct Fault {
    pub kind: FaultKind,
    pub code: String,
    pub reason: String,
    pub path: Option<String>,
}

pub type FaultResult<T> = Result<T, Fault>;

impl Fault {
    pub fn new<C: Into<String>, R: Into<String>>(kind: FaultKind, code: C, reason: R) -> Self {
        Self {
            kind,
            code: code.into(),
            reason: reason.into(),
            path: None,
        }
    }

    pub fn invalid_argument<R: Into<String>>(reason: R) -> Self {
        Self::new(FaultKind::InvalidArgument, INVALID_QUERY, reason)
    }

    pub fn cast_error<R: Into<String>>(reason: R) -> Self {
        Self::new(FaultKind::InvalidArgument, INVALID_CAST, reason)
    }

    pub fn unknown_operator(name: &str) -> Self {
        Self::new(
            FaultKind::InvalidArgument,
            INVALID_UNKNOWN_OPERATOR,
            format!("Unknown operator: {}", name),
        )
    }

    pub fn unknown_command(operator: &str, command: &str) -> Self {
        Self::new(
            FaultKind::InvalidArgument,
            INVALID_UNKNOWN_COMMAND,
            format!("{} has no command named {}", operator, command),
        )
    }

    pub fn user_variable_not_found(name: &str) -> Self {
        Self::new(
            FaultKind::NotFound,
            NOT_FOUND_USER_VARIABLE,
            format!("User variable not found: {}", name),
        )
    }

    pub fn not_found<C: Into<String>, R: Into<String>>(code: C, reason: R) -> Self {
        Self::new(FaultKind::NotFound, code, reason)
    }

    pub fn aborted<R: Into<String>>(reason: R) -> Self {
        Self::new(FaultKind::Aborted, ABORTED, reason)
    }

    pub fn pure_virtual(method: &str) -> Self {
        Self::new(
            FaultKind::NotImplemented,
            PURE_VIRTUAL,
            format!("Pure virtual method called: {}", method),
        )
    }

    pub fn timeout<R: Into<String>>(reason: R) -> Self {
        Self::new(FaultKind::Timeout, TIMEOUT, reason)
    }

    pub fn internal<R: Into<String>>(reason: R) -> Self {
        Self::new(FaultKind::Internal, INTERNAL, reason)
    }

    pub fn with_path<P: Into<String>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the path only when the fault does not carry one yet, so the
    /// innermost node wins.
    pub fn or_path(mut self, path: &str) -> Self {
        if self.path.is_none() {
            self.path = Some(path.to_string());
        }
        self
    }

    pub fn is_aborted(&self) -> bool {
        self.kind == FaultKind::Aborted
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "object": "fault",
            "name": self.kind.to_string(),
            "code": self.code,
            "reason": self.reason,
            "path": self.path,
        })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Fault: {0}")]
    Fault(#[from] Fault),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
