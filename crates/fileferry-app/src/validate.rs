//! Shape checks applied before any credential is requested.

use fileferry_core::{Protocol, TransferRequest};
use thiserror::Error;

/// A transfer request that cannot be run as submitted.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid transfer request")]
pub struct RequestError {
    /// Offending field.
    pub field: &'static str,
    /// Machine-readable reason.
    pub reason: &'static str,
    /// Offending value when it is safe to echo.
    pub value: Option<String>,
}

impl RequestError {
    const fn missing(field: &'static str) -> Self {
        Self {
            field,
            reason: "missing",
            value: None,
        }
    }

    /// One-line description for outcomes.
    #[must_use]
    pub fn detail(&self) -> String {
        match &self.value {
            Some(value) => format!("{self}: {} {} ({value})", self.field, self.reason),
            None => format!("{self}: {} {}", self.field, self.reason),
        }
    }
}

/// Check `request` and resolve its destination protocol.
///
/// # Errors
///
/// Returns a [`RequestError`] naming the first field that is missing or
/// unsupported.
pub fn validate_request(request: &TransferRequest) -> Result<Protocol, RequestError> {
    let required = [
        ("requester", request.requester.as_str()),
        ("approval_ref", request.approval_ref.as_str()),
        ("source.bucket", request.source.bucket.as_str()),
        ("source.key", request.source.key.as_str()),
        ("destination.host", request.destination.host.as_str()),
        ("destination.path", request.destination.path.as_str()),
    ];
    if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(RequestError::missing(field));
    }
    if request.source.key.ends_with('/') {
        return Err(RequestError {
            field: "source.key",
            reason: "names_a_prefix",
            value: Some(request.source.key.clone()),
        });
    }
    if request.destination.port == 0 {
        return Err(RequestError {
            field: "destination.port",
            reason: "out_of_range",
            value: Some("0".into()),
        });
    }
    Protocol::parse(&request.destination.protocol).ok_or_else(|| RequestError {
        field: "destination.protocol",
        reason: "unsupported",
        value: Some(request.destination.protocol.clone()),
    })
}
