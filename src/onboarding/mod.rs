//! Seller onboarding — the three-step KYC document flow.
//!
//! A seller uploads one document per category (identity, business, bank),
//! each streamed through the blob channel and merged into the seller's store
//! record. Once all three are on file the seller submits them for review.

pub mod events;
pub mod flow;
pub mod manager;
pub mod model;
pub mod records;
pub mod routes;
pub mod state;
pub mod submission;
pub mod upload;
pub mod validation;

pub use events::OnboardingEvent;
pub use manager::OnboardingService;
pub use model::{
    Category, Destination, DocumentRecord, OverallStatus, SellerOnboardingRecord, SellerProfile,
    StepDescriptor, VerificationStatus,
};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use state::{OnboardingStepState, StepSnapshot};
pub use submission::SubmissionReceipt;
pub use upload::UploadTask;
pub use validation::{FileUpload, MediaType};
