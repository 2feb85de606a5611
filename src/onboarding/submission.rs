//! Verification submission — moves a seller with every document on file into
//! review.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::events::OnboardingEvent;
use super::model::{Category, OverallStatus, SellerOnboardingRecord, fields};
use super::records::{SellerRecords, to_json};
use crate::error::{OnboardingError, StoreError};
use crate::identity::{SellerId, SessionContext};
use crate::store::MergeUpdate;

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub seller_id: SellerId,
    pub submitted_at: DateTime<Utc>,
    pub overall_status: OverallStatus,
    /// False when the seller had already submitted and nothing was written.
    pub newly_submitted: bool,
}

impl SubmissionReceipt {
    fn existing(record: &SellerOnboardingRecord, submitted_at: DateTime<Utc>) -> Self {
        Self {
            seller_id: record.seller_id.clone(),
            submitted_at,
            overall_status: record.overall_status,
            newly_submitted: false,
        }
    }
}

/// Checks completeness against the store and records the submission.
#[derive(Clone)]
pub struct SubmissionController {
    records: SellerRecords,
    events: broadcast::Sender<OnboardingEvent>,
}

impl SubmissionController {
    pub fn new(records: SellerRecords, events: broadcast::Sender<OnboardingEvent>) -> Self {
        Self { records, events }
    }

    /// Submit the seller's documents for review.
    ///
    /// Completeness is read from the store, never from local flow state.
    /// `documentsSubmittedAt` is written at most once; a repeat call returns
    /// the existing receipt.
    pub async fn submit(
        &self,
        session: &SessionContext,
    ) -> Result<SubmissionReceipt, OnboardingError> {
        let seller_id = session.require()?;

        let Some(record) = self.records.load(seller_id).await? else {
            return Err(OnboardingError::IncompleteSubmission {
                missing: Category::ALL.to_vec(),
            });
        };

        let missing = record.missing_categories();
        if !missing.is_empty() {
            info!(seller_id = %seller_id, missing = ?missing, "Submission refused, documents missing");
            return Err(OnboardingError::IncompleteSubmission { missing });
        }

        if let Some(submitted_at) = record.documents_submitted_at {
            info!(seller_id = %seller_id, "Documents already submitted");
            let receipt = SubmissionReceipt::existing(&record, submitted_at);
            self.emit_submitted(&receipt);
            return Ok(receipt);
        }

        let now = Utc::now();
        let update = MergeUpdate::new()
            .set(fields::DOCUMENTS_UPLOADED, true)
            .set(fields::DOCUMENTS_SUBMITTED_AT, to_json(&now)?)
            .set(fields::OVERALL_STATUS, OverallStatus::Pending.as_str())
            .require_absent(fields::DOCUMENTS_SUBMITTED_AT);

        let receipt = match self.records.merge(seller_id, &update).await {
            Ok(()) => SubmissionReceipt {
                seller_id: seller_id.clone(),
                submitted_at: now,
                overall_status: OverallStatus::Pending,
                newly_submitted: true,
            },
            Err(StoreError::PreconditionFailed { .. }) => {
                // Another submission won the race; report what it wrote.
                self.reload_receipt(seller_id).await?
            }
            Err(e) => {
                warn!(seller_id = %seller_id, error = %e, "Submission write failed");
                return Err(e.into());
            }
        };

        info!(
            seller_id = %seller_id,
            submitted_at = %receipt.submitted_at,
            newly_submitted = receipt.newly_submitted,
            "Documents submitted for verification"
        );
        self.emit_submitted(&receipt);
        Ok(receipt)
    }

    async fn reload_receipt(
        &self,
        seller_id: &SellerId,
    ) -> Result<SubmissionReceipt, OnboardingError> {
        let record = self.records.load(seller_id).await?.ok_or_else(|| {
            StoreError::NotFound {
                collection: self.records.collection().to_string(),
                id: seller_id.to_string(),
            }
        })?;
        let submitted_at = record.documents_submitted_at.ok_or_else(|| {
            StoreError::Serialization(format!(
                "seller {seller_id}: submission recorded without a timestamp"
            ))
        })?;
        Ok(SubmissionReceipt::existing(&record, submitted_at))
    }

    fn emit_submitted(&self, receipt: &SubmissionReceipt) {
        let _ = self.events.send(OnboardingEvent::Submitted {
            seller_id: receipt.seller_id.clone(),
            submitted_at: receipt.submitted_at,
        });
    }
}
