//! Classification of completion failures and the recovery each class gets.
//!
//! | status                        | class                 | recovery                 |
//! |-------------------------------|-----------------------|--------------------------|
//! | 400 + context length message  | `ContextTooLong`      | reset context, notice    |
//! | 401                           | `InvalidCredentials`  | fatal                    |
//! | 429                           | `RateLimited`         | notice (no retry)        |
//! | 500                           | `UpstreamServerError` | notice (no retry)        |
//! | anything else                 | `Unclassified`        | notice                   |
//!
//! Rate-limit and server errors are reported, not retried.

use std::fmt;

use crate::provider::ProviderError;

pub const CONTEXT_RESET_NOTICE: &str =
    "Cleared the message history as reached maximum token length. Please retry.";
pub const FALLBACK_NOTICE: &str = "\u{26a0}\u{fe0f} AI unavailable. Please try again later.";

/// Phrases the upstream uses when the conversation no longer fits the model.
const CONTEXT_LENGTH_PATTERNS: &[&str] = &[
    "reduce the length",
    "context_length_exceeded",
    "maximum context length",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ContextTooLong,
    InvalidCredentials,
    RateLimited,
    UpstreamServerError,
    Unclassified,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::ContextTooLong => "context_too_long",
            ErrorClass::InvalidCredentials => "invalid_credentials",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::UpstreamServerError => "upstream_server_error",
            ErrorClass::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completion failure tagged with its class. Keeps the original status and text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub class: ErrorClass,
    pub status: Option<u16>,
    pub message: String,
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({}): {}", self.class, status, self.message),
            None => write!(f, "{}: {}", self.class, self.message),
        }
    }
}

impl std::error::Error for ClassifiedError {}

/// What the pipeline does about a classified failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Reseed the channel's context, then post `notice`.
    ResetAndNotify { notice: String },
    /// Post `notice`; context is left as is.
    Notify { notice: String },
    /// Nothing useful can happen until an operator intervenes.
    Fatal,
}

pub fn classify(err: &ProviderError) -> ClassifiedError {
    let status = err.status();
    let message = err.message();

    let class = match status {
        Some(400) if mentions_context_length(&message) => ErrorClass::ContextTooLong,
        Some(401) => ErrorClass::InvalidCredentials,
        Some(429) => ErrorClass::RateLimited,
        Some(500) => ErrorClass::UpstreamServerError,
        _ => ErrorClass::Unclassified,
    };

    ClassifiedError {
        class,
        status,
        message,
    }
}

fn mentions_context_length(message: &str) -> bool {
    let lower = message.to_lowercase();
    CONTEXT_LENGTH_PATTERNS.iter().any(|p| lower.contains(p))
}

impl ClassifiedError {
    pub fn recovery(&self) -> Recovery {
        match self.class {
            ErrorClass::ContextTooLong => Recovery::ResetAndNotify {
                notice: CONTEXT_RESET_NOTICE.to_string(),
            },
            ErrorClass::InvalidCredentials => Recovery::Fatal,
            ErrorClass::RateLimited
            | ErrorClass::UpstreamServerError
            | ErrorClass::Unclassified => Recovery::Notify {
                notice: self.notice_text(),
            },
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class == ErrorClass::InvalidCredentials
    }

    fn notice_text(&self) -> String {
        let trimmed = self.message.trim();
        if trimmed.is_empty() {
            FALLBACK_NOTICE.to_string()
        } else {
            trimmed.to_string()
        }
    }
}
