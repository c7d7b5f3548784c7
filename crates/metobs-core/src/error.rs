//! Centralized error types for the MetObs service.
//!
//! This module provides a typed error hierarchy that:
//! - Separates transport failures from domain service failures
//! - Provides client-safe messages suitable for API responses
//! - Preserves full error context for logging

use thiserror::Error;

/// Top-level application error type.
///
/// Use `user_message()` to get a message that is safe to hand to API clients.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Service-level errors mapped from domain crates, with their client message.
    #[error("Service error: {message}")]
    Service {
        message: String,
        user_message: &'static str,
    },
}

impl AppError {
    pub fn service(message: impl Into<String>, user_message: &'static str) -> Self {
        AppError::Service {
            message: message.into(),
            user_message,
        }
    }

    /// Returns a client-safe message without internal details.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Network(e) => e.user_message(),
            AppError::Service { user_message, .. } => *user_message,
        }
    }
}

/// Network-related errors (HTTP, connectivity).
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed(_) => "Upstream data source is unreachable.",
            NetworkError::Timeout => "Upstream data source timed out.",
            NetworkError::ServerError { status, .. } if *status >= 500 => {
                "Upstream data source is experiencing issues."
            }
            NetworkError::ServerError { .. } => "Upstream data source rejected the request.",
            NetworkError::InvalidResponse(_) => "Upstream data source returned unexpected data.",
        }
    }
}

/// Extension trait for converting reqwest errors to our error types.
pub trait ReqwestErrorExt {
    fn into_network_error(self) -> NetworkError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_network_error(self) -> NetworkError {
        if self.is_timeout() {
            NetworkError::Timeout
        } else if self.is_connect() {
            NetworkError::ConnectionFailed(self.to_string())
        } else if let Some(status) = self.status() {
            NetworkError::ServerError {
                status: status.as_u16(),
                message: self.to_string(),
            }
        } else if self.is_decode() || self.is_body() {
            NetworkError::InvalidResponse(self.to_string())
        } else {
            NetworkError::ConnectionFailed(self.to_string())
        }
    }
}
