//! Error types for Bulletin
//!
//! TigerStyle: Explicit error types with context, using thiserror.
//!
//! The variants group into the kinds the controllers branch on:
//! - **not found**: an expected outcome that selects an alternate branch
//! - **exists**: an idempotent creation race, treated as success where documented
//! - **unrecoverable**: the store is inconsistent; aborts a convergence pass
//! - everything else is transient or unknown and propagates to the caller

use thiserror::Error;

/// Result type alias for Bulletin operations
pub type Result<T> = std::result::Result<T, Error>;

/// Bulletin error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("Resource not found: {resource}")]
    ResourceNotFound { resource: String },

    #[error("Resource already exists: {resource}")]
    ResourceExists { resource: String },

    #[error("Resource conflict: {resource}, reason: {reason}")]
    ResourceConflict { resource: String, reason: String },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Actual LRP {process_guid}/{index} cannot transition from {from} to {to}")]
    InvalidTransition {
        process_guid: String,
        index: i32,
        from: String,
        to: String,
    },

    #[error("Invalid record: {field}, reason: {reason}")]
    InvalidRecord { field: String, reason: String },

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("Store operation failed: {operation}, reason: {reason}")]
    StorageFailed { operation: String, reason: String },

    #[error("Unrecoverable store error: {reason}")]
    Unrecoverable { reason: String },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    #[error("RPC to {target} failed: {reason}")]
    RpcFailed { target: String, reason: String },

    // =========================================================================
    // Event Errors
    // =========================================================================
    #[error("Event hub is closed")]
    HubClosed,

    #[error("Event source is closed")]
    SourceClosed,

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a resource not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource: resource.into(),
        }
    }

    /// Create a resource exists error
    pub fn exists(resource: impl Into<String>) -> Self {
        Self::ResourceExists {
            resource: resource.into(),
        }
    }

    /// Create an invalid transition error
    pub fn invalid_transition(
        process_guid: impl Into<String>,
        index: i32,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            process_guid: process_guid.into(),
            index,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create a store failure error
    pub fn storage_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StorageFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an unrecoverable store error
    pub fn unrecoverable(reason: impl Into<String>) -> Self {
        Self::Unrecoverable {
            reason: reason.into(),
        }
    }

    /// Create an RPC failed error
    pub fn rpc_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RpcFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The resource was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }

    /// The resource already exists
    pub fn is_exists(&self) -> bool {
        matches!(self, Self::ResourceExists { .. })
    }

    /// The store reported itself inconsistent
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unrecoverable { .. })
    }

    /// Check if this error is retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ResourceConflict { .. } | Self::StorageFailed { .. } | Self::RpcFailed { .. }
        )
    }
}
