//! Time-boxed delegated queue credentials.
//!
//! Callers never get standing access to their queues; every resolve hands
//! out short-lived credentials scoped to the queue(s) and direction asked
//! for. Inbound consumers may receive, delete, and inspect; outbound
//! producers may send and inspect.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::QueueDirection;
use crate::error::Result;

const SESSION_LIFETIME_SECS: i64 = 3600;

/// Actions a credential grant covers, derived from queue direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialScope {
    Receive,
    Send,
}

impl CredentialScope {
    pub fn for_direction(direction: QueueDirection) -> Self {
        match direction {
            QueueDirection::Inbound => CredentialScope::Receive,
            QueueDirection::Outbound => CredentialScope::Send,
        }
    }

    pub fn actions(&self) -> &'static [&'static str] {
        match self {
            CredentialScope::Receive => {
                &["queue:ReceiveMessage", "queue:DeleteMessage", "queue:GetQueueAttributes"]
            }
            CredentialScope::Send => &["queue:SendMessage", "queue:GetQueueAttributes"],
        }
    }
}

/// A short-lived credential grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires: DateTime<Utc>,
}

/// Issues delegated credentials for a session scoped to specific queues.
#[async_trait]
pub trait CredentialsIssuer: Send + Sync {
    async fn issue(
        &self,
        session_name: &str,
        queue_arns: &[String],
        scope: CredentialScope,
    ) -> Result<ScopedCredentials>;
}

/// Session name embedding the tenant and direction, so the outbound relay
/// can recover the tenant from the sender identity.
pub fn session_name(tenant_id: &str, direction: QueueDirection) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{tenant_id}-{direction}-{}", &suffix[..8])
}

/// In-process issuer producing opaque tokens. Stands in for a real identity
/// broker in embedded mode and tests.
#[derive(Default)]
pub struct TokenIssuer;

impl TokenIssuer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CredentialsIssuer for TokenIssuer {
    async fn issue(
        &self,
        session_name: &str,
        queue_arns: &[String],
        scope: CredentialScope,
    ) -> Result<ScopedCredentials> {
        tracing::debug!(
            session_name = %session_name,
            queues = queue_arns.len(),
            scope = ?scope,
            "Issuing scoped credentials"
        );
        Ok(ScopedCredentials {
            access_key_id: format!("BRIDGE{}", Uuid::new_v4().simple()),
            secret_access_key: Uuid::new_v4().simple().to_string(),
            session_token: format!("{session_name}.{}", Uuid::new_v4().simple()),
            expires: Utc::now() + Duration::seconds(SESSION_LIFETIME_SECS),
        })
    }
}
