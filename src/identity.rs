//! Seller identity — the session context handed to every onboarding entry point.
//!
//! Credentials live with the external identity provider. The core only ever
//! sees the stable seller identifier it hands back, passed explicitly as a
//! `SessionContext` rather than read from ambient auth state.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::OnboardingError;

/// Stable seller identifier assigned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SellerId(String);

impl SellerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SellerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An authenticated seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerSession {
    pub seller_id: SellerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl SellerSession {
    pub fn new(seller_id: impl Into<String>) -> Self {
        Self {
            seller_id: SellerId::new(seller_id),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Per-call session context. Absent session means nobody is logged in.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    session: Option<SellerSession>,
}

impl SessionContext {
    pub fn signed_in(session: SellerSession) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&SellerSession> {
        self.session.as_ref()
    }

    /// The seller id, or `Unauthenticated` when no session is active.
    pub fn require(&self) -> Result<&SellerId, OnboardingError> {
        self.session
            .as_ref()
            .map(|s| &s.seller_id)
            .ok_or(OnboardingError::Unauthenticated)
    }
}

impl From<Option<SellerSession>> for SessionContext {
    fn from(session: Option<SellerSession>) -> Self {
        Self { session }
    }
}

/// The identity provider, as far as the onboarding core needs it.
#[async_trait]
pub trait IdentityGateway: Send + Sync {
    /// The currently authenticated seller, if any.
    async fn current_user(&self) -> Option<SellerSession>;

    /// Resolve the current user into a context for an onboarding call.
    async fn context(&self) -> SessionContext {
        self.current_user().await.into()
    }
}

/// In-process gateway holding at most one signed-in seller.
///
/// Embedders that complete login elsewhere call `sign_in` with the id the
/// provider returned.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    current: RwLock<Option<SellerSession>>,
}

impl StaticIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sign_in(&self, session: SellerSession) {
        tracing::info!(seller_id = %session.seller_id, "Seller signed in");
        *self.current.write().await = Some(session);
    }

    pub async fn sign_out(&self) {
        if let Some(prev) = self.current.write().await.take() {
            tracing::info!(seller_id = %prev.seller_id, "Seller signed out");
        }
    }
}

#[async_trait]
impl IdentityGateway for StaticIdentity {
    async fn current_user(&self) -> Option<SellerSession> {
        self.current.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_context_is_unauthenticated() {
        let ctx = SessionContext::anonymous();
        assert!(matches!(ctx.require(), Err(OnboardingError::Unauthenticated)));
        assert!(ctx.session().is_none());
    }

    #[test]
    fn signed_in_context_yields_seller_id() {
        let ctx = SessionContext::signed_in(SellerSession::new("seller-42"));
        assert_eq!(ctx.require().unwrap().as_str(), "seller-42");
    }

    #[test]
    fn seller_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&SellerId::new("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }

    #[tokio::test]
    async fn static_identity_sign_in_and_out() {
        let gateway = StaticIdentity::new();
        assert!(gateway.context().await.require().is_err());

        gateway
            .sign_in(SellerSession::new("s1").with_email("s1@shop.test"))
            .await;
        let ctx = gateway.context().await;
        assert_eq!(ctx.require().unwrap().as_str(), "s1");
        assert_eq!(ctx.session().unwrap().email.as_deref(), Some("s1@shop.test"));

        gateway.sign_out().await;
        assert!(gateway.current_user().await.is_none());
    }
}
