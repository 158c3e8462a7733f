//! Error Classifier
//!
//! Best-effort mapping from a failure to an [`ErrorCategory`]. Checks run
//! in a fixed order and the first match wins, so a connection failure whose
//! message also says "timeout" is reported as `network`.

use super::result::ErrorCategory;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::io;

static NETWORK_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)connection|network|http|socket").expect("valid regex"));

static TIMEOUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)time[d_ ]?out|elapsed").expect("valid regex"));

static PERMISSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)permission|access|forbidden|unauthori[sz]ed").expect("valid regex")
});

static NOT_FOUND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)not found|\b404\b").expect("valid regex"));

static VALIDATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)invalid|validation|schema|format").expect("valid regex"));

static SYNTAX_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)syntax|parse|type_?(error|mismatch)").expect("valid regex"));

static API: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bapi\b").expect("valid regex"));

/// Classify a failure from its type name and message text.
#[must_use]
pub fn classify(type_name: &str, message: &str) -> ErrorCategory {
    if NETWORK_TYPE.is_match(type_name) {
        return ErrorCategory::Network;
    }
    if TIMEOUT.is_match(type_name) || TIMEOUT.is_match(message) {
        return ErrorCategory::Timeout;
    }
    if PERMISSION.is_match(message) {
        return ErrorCategory::Permission;
    }
    if NOT_FOUND.is_match(message) {
        return ErrorCategory::NotFound;
    }
    if VALIDATION.is_match(message) {
        return ErrorCategory::Validation;
    }
    if SYNTAX_TYPE.is_match(type_name) {
        return ErrorCategory::Syntax;
    }
    if API.is_match(message) {
        return ErrorCategory::Api;
    }
    ErrorCategory::Unknown
}

/// Classify a concrete error, using well-known types in its source chain as
/// the type hint.
#[must_use]
pub fn classify_error(err: &(dyn Error + 'static)) -> ErrorCategory {
    classify(type_hint(err), &err.to_string())
}

fn type_hint(err: &(dyn Error + 'static)) -> &'static str {
    let mut current = Some(err);
    while let Some(cause) = current {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return io_kind_hint(io_err.kind());
        }
        if cause.is::<tokio::time::error::Elapsed>() {
            return "TimeoutError";
        }
        if let Some(json_err) = cause.downcast_ref::<serde_json::Error>() {
            if json_err.is_syntax() || json_err.is_data() || json_err.is_eof() {
                return "SyntaxError";
            }
        }
        if cause.is::<std::num::ParseIntError>() || cause.is::<std::num::ParseFloatError>() {
            return "ParseError";
        }
        current = cause.source();
    }
    ""
}

fn io_kind_hint(kind: io::ErrorKind) -> &'static str {
    use io::ErrorKind;
    match kind {
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::AddrInUse
        | ErrorKind::AddrNotAvailable
        | ErrorKind::BrokenPipe => "ConnectionError",
        ErrorKind::TimedOut => "TimeoutError",
        // Message text carries the rest (permission denied, not found, ...)
        _ => "IoError",
    }
}
