use serde::Serialize;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::ops::Deref;

const DEFAULT_CODE: &str = "internal_error";
const DEFAULT_MESSAGE: &str = "Operation failed";
const RELEASE_REDACTED_CAUSE: &str = "details hidden, see logs";

/// Coarse failure classes surfaced to the caller of a reception.
///
/// Every error code raised by the pipeline belongs to exactly one kind; the
/// kind is derived from the code prefix so that new codes cannot drift out of
/// the taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Integrity,
    Classification,
    Extraction,
    Registration,
    CatalogDivergence,
    Internal,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Integrity => "integrity",
            Self::Classification => "classification",
            Self::Extraction => "extraction",
            Self::Registration => "registration",
            Self::CatalogDivergence => "catalog_divergence",
            Self::Internal => "internal",
        }
    }

    pub fn from_code(code: &str) -> Self {
        if code == "catalog_divergence" {
            return Self::CatalogDivergence;
        }
        match code.split('_').next().unwrap_or_default() {
            "transport" => Self::Transport,
            "integrity" => Self::Integrity,
            "classify" => Self::Classification,
            "extract" | "archive" | "policy" => Self::Extraction,
            "registration" => Self::Registration,
            _ => Self::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "reason")]
pub enum IntegrityFailure {
    SizeMismatch { expected: u64, actual: u64 },
    HashMismatch { expected: String, actual: String },
    MissingFile,
}

impl IntegrityFailure {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SizeMismatch { .. } => "integrity_size_mismatch",
            Self::HashMismatch { .. } => "integrity_hash_mismatch",
            Self::MissingFile => "integrity_missing_file",
        }
    }

    pub fn reason(&self) -> String {
        match self {
            Self::SizeMismatch { expected, actual } => {
                format!("size mismatch: expected {expected} bytes, received {actual}")
            }
            Self::HashMismatch { .. } => "content hash mismatch".to_string(),
            Self::MissingFile => "downloaded file is missing".to_string(),
        }
    }
}

impl Display for IntegrityFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason().as_str())
    }
}

impl StdError for IntegrityFailure {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContextItem {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ErrorContextItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct AppError(Box<AppErrorPayload>);

/// Serialisable view of an [`AppError`] handed to outer layers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeError {
    pub code: String,
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ErrorContextItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self(Box::new(AppErrorPayload {
            code: code.into(),
            message: message.into(),
            context: Vec::new(),
            causes: Vec::new(),
        }))
    }

    pub fn kind(&self) -> FailureKind {
        FailureKind::from_code(self.0.code.as_str())
    }

    pub fn with_code(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.0.code = code.into();
        self.0.message = message.into();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.context.push(ErrorContextItem {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.0
            .context
            .iter()
            .find(|item| item.key == key)
            .map(|item| item.value.as_str())
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        let cause = cause.into();
        if !cause.trim().is_empty() {
            self.0.causes.push(cause);
        }
        self
    }

    pub fn with_source<E>(mut self, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.put_context_if_absent("sourceType", std::any::type_name::<E>().to_string());
        let chain = collect_std_error_chain(&error);
        if !chain.is_empty() {
            self.put_context_if_absent("sourceChainDepth", chain.len().to_string());
        }
        chain
            .into_iter()
            .fold(self, |error, cause| error.with_cause(cause))
    }

    pub fn from_anyhow(error: anyhow::Error) -> Self {
        if let Some(app_error) = error.downcast_ref::<Self>() {
            return app_error.clone();
        }

        Self(Box::new(AppErrorPayload {
            code: DEFAULT_CODE.to_string(),
            message: DEFAULT_MESSAGE.to_string(),
            context: Vec::new(),
            causes: collect_error_chain(&error),
        }))
    }

    /// One-line human readable text for terminal notifications.
    pub fn user_message(&self) -> String {
        match self.0.causes.first() {
            Some(cause) if cfg!(debug_assertions) => format!("{} ({cause})", self.0.message),
            _ => self.0.message.clone(),
        }
    }

    fn put_context_if_absent(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if self.0.context.iter().any(|item| item.key == key) {
            return;
        }
        self.0.context.push(ErrorContextItem {
            key,
            value: value.into(),
        });
    }
}

impl Deref for AppError {
    type Target = AppErrorPayload;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

fn collect_error_chain(error: &anyhow::Error) -> Vec<String> {
    let mut causes = Vec::new();
    for cause in error.chain() {
        let text = cause.to_string();
        if text.trim().is_empty() {
            continue;
        }

        if causes.last().is_some_and(|last| last == &text) {
            continue;
        }
        causes.push(text);
    }
    causes
}

fn collect_std_error_chain(error: &(dyn StdError + 'static)) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(cause) = current {
        let text = cause.to_string();
        if !text.trim().is_empty() && causes.last().is_none_or(|last| last != &text) {
            causes.push(text);
        }
        current = cause.source();
    }
    causes
}

fn visible_causes_for_mode(causes: Vec<String>) -> Vec<String> {
    if cfg!(debug_assertions) {
        return causes;
    }

    match causes.into_iter().next() {
        Some(first) => vec![sanitize_cause_for_release(&first)],
        None => Vec::new(),
    }
}

fn sanitize_cause_for_release(cause: &str) -> String {
    let normalized = cause.replace('\n', " ").trim().to_string();
    if normalized.is_empty() {
        return RELEASE_REDACTED_CAUSE.to_string();
    }

    let lower = normalized.to_ascii_lowercase();
    if lower.contains("token") || lower.contains("password") || lower.contains("secret") {
        return RELEASE_REDACTED_CAUSE.to_string();
    }

    // paths leak the receiving node's layout
    if normalized.contains('/') || normalized.contains('\\') || normalized.len() > 220 {
        return RELEASE_REDACTED_CAUSE.to_string();
    }

    normalized
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl StdError for AppError {}

impl Display for InvokeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl StdError for InvokeError {}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::from_anyhow(value)
    }
}

impl From<IntegrityFailure> for AppError {
    fn from(value: IntegrityFailure) -> Self {
        let error = Self::new(value.code(), value.reason());
        match value {
            IntegrityFailure::SizeMismatch { expected, actual } => error
                .with_context("expectedBytes", expected.to_string())
                .with_context("actualBytes", actual.to_string()),
            IntegrityFailure::HashMismatch { expected, actual } => error
                .with_context("expectedHash", expected)
                .with_context("actualHash", actual),
            IntegrityFailure::MissingFile => error,
        }
    }
}

impl From<AppError> for InvokeError {
    fn from(value: AppError) -> Self {
        let kind = value.kind();
        let AppErrorPayload {
            code,
            message,
            context,
            causes,
        } = *value.0;

        Self {
            code,
            kind,
            message,
            context,
            causes: visible_causes_for_mode(causes),
        }
    }
}

pub trait ResultExt<T> {
    fn with_code(self, code: impl Into<String>, message: impl Into<String>) -> AppResult<T>;
    fn with_ctx(self, key: impl Into<String>, value: impl Into<String>) -> AppResult<T>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn with_code(self, code: impl Into<String>, message: impl Into<String>) -> AppResult<T> {
        let code = code.into();
        let message = message.into();
        self.map_err(|error| AppError::from_anyhow(error.into()).with_code(code, message))
    }

    fn with_ctx(self, key: impl Into<String>, value: impl Into<String>) -> AppResult<T> {
        let key = key.into();
        let value = value.into();
        self.map_err(|error| AppError::from_anyhow(error.into()).with_context(key, value))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[path = "../tests/protocol/errors_tests.rs"]
mod tests;
