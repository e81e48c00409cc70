//! Domain errors callers branch on, and the user-facing message table for
//! authentication failures.

use thiserror::Error;

use cloudvault_core::record::RecordError;

use crate::fetch::RetrievalError;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("upload of {name} failed: {message}")]
    Upload { name: String, message: String },

    #[error("analysis of {file_id} failed: {message}")]
    Analysis { file_id: String, message: String },

    #[error("could not delete {file_id}: {message}")]
    Delete { file_id: String, message: String },

    #[error("print dispatch failed: {0}")]
    Print(String),

    #[error("device {0} is offline")]
    DeviceOffline(String),

    #[error("printer {printer} is not attached to device {device_id}")]
    UnknownPrinter { device_id: String, printer: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    InvalidRecord(#[from] RecordError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// A collaborator call failed for reasons the caller cannot act on.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl VaultError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        VaultError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::Upload { .. } => "upload_failed",
            VaultError::Analysis { .. } => "analysis_failed",
            VaultError::Delete { .. } => "delete_failed",
            VaultError::Print(_) => "print_failed",
            VaultError::DeviceOffline(_) => "device_offline",
            VaultError::UnknownPrinter { .. } => "unknown_printer",
            VaultError::NotFound { .. } => "not_found",
            VaultError::InvalidInput(_) | VaultError::InvalidRecord(_) => "bad_request",
            VaultError::Retrieval(_) => "retrieval_failed",
            VaultError::Store(_) => "store_error",
        }
    }
}

/// User-facing text for an authentication error code.
///
/// Codes may carry the provider's `auth/` namespace. Unknown codes get the
/// generic message.
pub fn auth_error_message(code: &str) -> &'static str {
    match code.trim_start_matches("auth/") {
        "invalid-credential" | "user-not-found" | "wrong-password" => {
            "Incorrect email or password."
        }
        "email-already-in-use" => "This email is already in use.",
        "weak-password" => "The password must be at least 6 characters long.",
        _ => "Authentication failed.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_codes_share_a_message() {
        let expected = "Incorrect email or password.";
        assert_eq!(auth_error_message("auth/invalid-credential"), expected);
        assert_eq!(auth_error_message("auth/user-not-found"), expected);
        assert_eq!(auth_error_message("wrong-password"), expected);
    }

    #[test]
    fn test_unknown_code_is_generic() {
        assert_eq!(auth_error_message("auth/network-request-failed"), "Authentication failed.");
        assert_eq!(auth_error_message(""), "Authentication failed.");
    }

    #[test]
    fn test_codes() {
        assert_eq!(VaultError::not_found("file", "f1").code(), "not_found");
        assert_eq!(
            VaultError::from(RecordError::Empty("name")).code(),
            "bad_request"
        );
    }
}
