//! Onboarding events broadcast to the UI and routing layer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::model::Category;
use crate::identity::SellerId;

/// Real-time onboarding notifications, serialized for WebSocket clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OnboardingEvent {
    UploadStarted {
        seller_id: SellerId,
        category: Category,
        upload_id: Uuid,
    },
    Progress {
        seller_id: SellerId,
        category: Category,
        percent: u8,
    },
    Uploaded {
        seller_id: SellerId,
        category: Category,
        file_url: String,
        completion_percent: u8,
    },
    UploadFailed {
        seller_id: SellerId,
        category: Category,
        reason: String,
    },
    UploadCancelled {
        seller_id: SellerId,
        category: Category,
    },
    PersistenceFailed {
        seller_id: SellerId,
        category: Category,
        reason: String,
    },
    /// The seller's documents went to review; routing should move on.
    Submitted {
        seller_id: SellerId,
        submitted_at: DateTime<Utc>,
    },
}

impl OnboardingEvent {
    pub fn seller_id(&self) -> &SellerId {
        match self {
            Self::UploadStarted { seller_id, .. }
            | Self::Progress { seller_id, .. }
            | Self::Uploaded { seller_id, .. }
            | Self::UploadFailed { seller_id, .. }
            | Self::UploadCancelled { seller_id, .. }
            | Self::PersistenceFailed { seller_id, .. }
            | Self::Submitted { seller_id, .. } => seller_id,
        }
    }
}
