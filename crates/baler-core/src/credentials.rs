//! Credential delegation for request-scoped storage access.
//!
//! A request may carry assume-role parameters; the envelope then asks a
//! [`CredentialBroker`] for a storage backend operating under the delegated
//! role. The broker implementation that talks to the real token service
//! lives outside this workspace; [`StaticBroker`] is the local stand-in
//! that hands back the ambient backend unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::storage::StorageBackend;

/// Session name used when assuming a delegated role.
pub const SESSION_NAME: &str = "s3fc";

/// Lifetime of a delegated session, in seconds.
pub const SESSION_DURATION_SECS: i64 = 900;

/// Assume-role parameters carried by a request.
#[derive(Debug, Clone, Deserialize)]
pub struct AssumeRole {
    /// ARN of the role to assume.
    pub role_arn: String,
    /// External id presented alongside the role, when required.
    #[serde(default)]
    pub external_id: Option<String>,
}

/// Resolves a storage backend for a delegated role.
#[async_trait]
pub trait CredentialBroker: Send + Sync + 'static {
    /// Returns a backend whose requests run under `role`.
    async fn delegate(
        &self,
        ambient: Arc<dyn StorageBackend>,
        role: &AssumeRole,
    ) -> Result<Arc<dyn StorageBackend>>;
}

/// Broker that performs no delegation and returns the ambient backend.
#[derive(Debug, Default)]
pub struct StaticBroker;

#[async_trait]
impl CredentialBroker for StaticBroker {
    async fn delegate(
        &self,
        ambient: Arc<dyn StorageBackend>,
        role: &AssumeRole,
    ) -> Result<Arc<dyn StorageBackend>> {
        tracing::debug!(
            role_arn = %role.role_arn,
            session_name = SESSION_NAME,
            duration_seconds = SESSION_DURATION_SECS,
            "static broker ignoring assume-role request"
        );
        Ok(ambient)
    }
}
