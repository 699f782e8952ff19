//! Error types for the storyboard pipeline.

/// Specific error conditions surfaced by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum StoryboardErrorKind {
    /// The SRT input (or another user-supplied artifact) is malformed
    #[display("Invalid input: {}", _0)]
    InputInvalid(String),
    /// Transient API failure (429/5xx/timeout), retried by the LLM client
    #[display("Transient API failure: {}", _0)]
    TransientApi(String),
    /// Non-retryable API failure (4xx other than 429)
    #[display("Unrecoverable API failure (status {}): {}", status, message)]
    UnrecoverableApi {
        /// HTTP status returned by the endpoint
        status: u16,
        /// Response body excerpt
        message: String,
    },
    /// A coverage validator exhausted its repair budget
    #[display("Coverage irreparable: {}", _0)]
    CoverageIrreparable(String),
    /// LLM output could not be interpreted as the stage's required structure
    #[display("Parse error: {}", _0)]
    Parse(String),
    /// A stage failed after its local repairs were exhausted
    #[display("Stage '{}' failed: {}", stage, message)]
    StageFailed {
        /// Name of the failing stage
        stage: &'static str,
        /// What gave up
        message: String,
    },
    /// Workbook storage error
    #[display("Workbook error: {}", _0)]
    Workbook(String),
    /// Filesystem error
    #[display("I/O error: {}", _0)]
    Io(String),
    /// Configuration error
    #[display("Configuration error: {}", _0)]
    Config(String),
}

impl StoryboardErrorKind {
    /// Whether the LLM client may retry the failed request.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoryboardErrorKind::TransientApi(_))
    }
}

/// Pipeline error with source location tracking.
#[derive(Debug, Clone, derive_more::Display)]
#[display("Storyboard Error: {} at line {} in {}", kind, line, file)]
pub struct StoryboardError {
    /// The specific error condition
    pub kind: StoryboardErrorKind,
    /// Line number where the error occurred
    pub line: u32,
    /// Source file where the error occurred
    pub file: &'static str,
}

impl StoryboardError {
    /// Create a new error from a kind at the caller's location.
    #[track_caller]
    pub fn new(kind: StoryboardErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> &StoryboardErrorKind {
        &self.kind
    }

    /// Whether the underlying condition is retryable.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl std::error::Error for StoryboardError {}

impl From<StoryboardErrorKind> for StoryboardError {
    fn from(kind: StoryboardErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<std::io::Error> for StoryboardError {
    fn from(err: std::io::Error) -> Self {
        Self::new(StoryboardErrorKind::Io(err.to_string()))
    }
}

impl From<serde_json::Error> for StoryboardError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(StoryboardErrorKind::Parse(err.to_string()))
    }
}

/// Result type for pipeline operations.
pub type StoryboardResult<T> = Result<T, StoryboardError>;
