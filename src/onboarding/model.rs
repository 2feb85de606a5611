//! Seller onboarding record and KYC document data models.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::SellerId;

/// One of the three fixed KYC document types, in step order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Identity,
    Business,
    Bank,
}

impl Category {
    /// All categories in step order.
    pub const ALL: [Category; 3] = [Category::Identity, Category::Business, Category::Bank];

    /// Number of onboarding steps.
    pub const COUNT: usize = Self::ALL.len();

    /// Step index of this category.
    pub fn index(self) -> usize {
        match self {
            Self::Identity => 0,
            Self::Business => 1,
            Self::Bank => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Business => "business",
            Self::Bank => "bank",
        }
    }

    /// Display metadata for this category's step.
    pub fn step(self) -> StepDescriptor {
        let (title, description) = match self {
            Self::Identity => (
                "Identity Proof",
                "Upload your Aadhaar Card, PAN Card, or Passport",
            ),
            Self::Business => (
                "Business Proof",
                "Upload GST Certificate or Business Registration",
            ),
            Self::Bank => (
                "Bank Details",
                "Upload Cancelled Cheque or Bank Statement",
            ),
        };
        StepDescriptor {
            category: self,
            title,
            description,
            formats: ACCEPTED_FORMATS,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "identity" => Ok(Self::Identity),
            "business" => Ok(Self::Business),
            "bank" => Ok(Self::Bank),
            other => Err(format!("unknown document category: {other}")),
        }
    }
}

const ACCEPTED_FORMATS: &str = "PDF, JPG, PNG (Max 5MB)";

/// What the UI shows for one onboarding step.
#[derive(Debug, Clone, Serialize)]
pub struct StepDescriptor {
    pub category: Category,
    pub title: &'static str,
    pub description: &'static str,
    pub formats: &'static str,
}

/// Review status of a single document category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    #[default]
    NotSubmitted,
    Uploaded,
    Approved,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotSubmitted => "not-submitted",
            Self::Uploaded => "uploaded",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// Overall seller account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    #[default]
    Draft,
    Pending,
    Approved,
    Rejected,
}

impl OverallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted KYC document. Only ever created from a completed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub file_url: String,
}

impl DocumentRecord {
    pub fn new(file_url: impl Into<String>) -> Self {
        Self {
            file_url: file_url.into(),
        }
    }
}

/// Store field paths. Every write to a seller record targets one of these.
pub mod fields {
    use super::Category;

    pub const DOCUMENTS_UPLOADED: &str = "documentsUploaded";
    pub const DOCUMENTS_SUBMITTED_AT: &str = "documentsSubmittedAt";
    pub const OVERALL_STATUS: &str = "overallStatus";

    /// `documents.<category>`
    pub fn document(category: Category) -> String {
        format!("documents.{category}")
    }

    /// `verificationStatus.<category>`
    pub fn verification(category: Category) -> String {
        format!("verificationStatus.{category}")
    }
}

/// Registration details supplied when a seller account is created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerProfile {
    pub business_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// The seller's onboarding document in the `sellers` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerOnboardingRecord {
    pub seller_id: SellerId,
    #[serde(default)]
    pub business_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub documents: BTreeMap<Category, Option<DocumentRecord>>,
    #[serde(default)]
    pub verification_status: BTreeMap<Category, VerificationStatus>,
    #[serde(default)]
    pub documents_uploaded: bool,
    #[serde(default)]
    pub overall_status: OverallStatus,
    #[serde(default)]
    pub documents_submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl SellerOnboardingRecord {
    /// A freshly registered seller: draft, every category not submitted.
    pub fn new_draft(seller_id: SellerId, profile: SellerProfile) -> Self {
        Self {
            seller_id,
            business_name: profile.business_name,
            email: profile.email,
            phone: profile.phone,
            documents: Category::ALL.iter().map(|c| (*c, None)).collect(),
            verification_status: Category::ALL
                .iter()
                .map(|c| (*c, VerificationStatus::NotSubmitted))
                .collect(),
            documents_uploaded: false,
            overall_status: OverallStatus::Draft,
            documents_submitted_at: None,
            created_at: Some(Utc::now()),
        }
    }

    pub fn document(&self, category: Category) -> Option<&DocumentRecord> {
        self.documents.get(&category).and_then(Option::as_ref)
    }

    pub fn verification(&self, category: Category) -> VerificationStatus {
        self.verification_status
            .get(&category)
            .copied()
            .unwrap_or_default()
    }

    /// Categories that have a persisted document, in step order.
    pub fn uploaded_categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| self.document(*c).is_some())
            .collect()
    }

    /// Categories still lacking a persisted document, in step order.
    pub fn missing_categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| self.document(*c).is_none())
            .collect()
    }

    /// Where a seller should land after logging in.
    pub fn destination(&self) -> Destination {
        match (self.overall_status, self.documents_uploaded) {
            (OverallStatus::Approved, true) | (OverallStatus::Pending, true) => {
                Destination::Dashboard
            }
            (_, false) => Destination::Documents,
            (OverallStatus::Rejected, true) => Destination::Rejected,
            // Uploaded but never submitted for review: finish the flow.
            (OverallStatus::Draft, true) => Destination::Documents,
        }
    }
}

/// Post-login routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Approved, or submitted and awaiting review.
    Dashboard,
    /// KYC documents still to be uploaded or submitted.
    Documents,
    /// Account rejected; the seller must contact support.
    Rejected,
    /// No seller record for this identity; register first.
    NotRegistered,
}
