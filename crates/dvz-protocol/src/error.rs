// The rendering protocol's error taxonomy: nine error kinds and a single
// propagation policy, collapsed into one enum with one user-installable
// callback slot instead of the scattered error-path style (a hand-rolled
// error enum plus ad-hoc `unwrap()`s) this is descended from.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("no adapter satisfies the requested queues/extensions")]
    DeviceInit,
    #[error("a required device extension is unavailable")]
    FeatureMissing,
    #[error("allocation exhausted and growth did not recover")]
    OutOfMemory,
    #[error("id is not present in the resource manager, or is the wrong kind")]
    StaleReference,
    #[error("object used or configured in the wrong lifecycle state")]
    WrongState,
    #[error("request failed schema validation")]
    ValidationFailed,
    #[error("GLSL to SPIR-V compilation failed")]
    ShaderCompile,
    #[error("swapchain is irrecoverably lost")]
    SwapchainLost,
    #[error("a host<->device copy's fence signaled an error")]
    TransferFailed,
}

impl ErrorKind {
    /// DeviceInit, FeatureMissing, and ShaderCompile on a required shader
    /// are fatal; everything else is recoverable at the request or batch
    /// level.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::DeviceInit | ErrorKind::FeatureMissing | ErrorKind::ShaderCompile)
    }
}

/// A single error value carrying its kind, a human-readable message, and
/// an optional request tag for tracing.
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub tag: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "[{}] {}: {}", tag, self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for Error {}

/// A single user-installable error callback, collapsing an error callback,
/// a log line, and an abort path into one path. If unset, errors are
/// routed to the log.
pub type ErrorCallback = Box<dyn Fn(&Error) + Send + Sync>;

/// Prints `file:line` plus the error message and aborts. Used for
/// DeviceInit/FeatureMissing/required-shader ShaderCompile and for
/// internal assertion failures.
#[macro_export]
macro_rules! fatal {
    ($err:expr) => {{
        let e: $crate::error::Error = $err;
        eprintln!("{}:{}: fatal: {}", file!(), line!(), e);
        std::process::abort();
    }};
}
