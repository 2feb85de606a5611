//! OnboardingService — the entry point the UI and routing layer talk to.
//!
//! Wires the per-seller flows, the upload coordinator, and the submission
//! controller over one document store and one blob channel. Every operation
//! takes the caller's `SessionContext`; nothing reads an ambient "current
//! user".

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use super::events::OnboardingEvent;
use super::flow::FlowRegistry;
use super::model::{
    Category, Destination, DocumentRecord, SellerOnboardingRecord, SellerProfile, StepDescriptor,
};
use super::records::SellerRecords;
use super::state::StepSnapshot;
use super::submission::{SubmissionController, SubmissionReceipt};
use super::upload::{UploadCoordinator, UploadTask};
use super::validation::FileUpload;
use crate::blob::BlobChannel;
use crate::config::OnboardingConfig;
use crate::error::OnboardingError;
use crate::identity::SessionContext;
use crate::store::DocumentStore;

/// Seller onboarding: step navigation, document uploads, and submission.
#[derive(Clone)]
pub struct OnboardingService {
    config: Arc<OnboardingConfig>,
    records: SellerRecords,
    flows: Arc<FlowRegistry>,
    uploads: UploadCoordinator,
    submissions: SubmissionController,
    events: broadcast::Sender<OnboardingEvent>,
}

impl OnboardingService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blob: Arc<dyn BlobChannel>,
        config: OnboardingConfig,
    ) -> Self {
        let config = Arc::new(config);
        let records = SellerRecords::new(store, config.sellers_collection.clone());
        let flows = Arc::new(FlowRegistry::new(records.clone()));
        let (events, _) = broadcast::channel(config.event_buffer);
        let uploads = UploadCoordinator::new(
            Arc::clone(&config),
            blob,
            records.clone(),
            Arc::clone(&flows),
            events.clone(),
        );
        let submissions = SubmissionController::new(records.clone(), events.clone());

        Self {
            config,
            records,
            flows,
            uploads,
            submissions,
            events,
        }
    }

    pub fn config(&self) -> &OnboardingConfig {
        &self.config
    }

    /// Onboarding steps in order.
    pub fn steps(&self) -> Vec<StepDescriptor> {
        Category::ALL.into_iter().map(Category::step).collect()
    }

    /// Receive onboarding events for every seller.
    pub fn subscribe(&self) -> broadcast::Receiver<OnboardingEvent> {
        self.events.subscribe()
    }

    /// Create the seller's record in draft status.
    pub async fn register_seller(
        &self,
        session: &SessionContext,
        profile: SellerProfile,
    ) -> Result<SellerOnboardingRecord, OnboardingError> {
        let seller_id = session.require()?;
        let mut record = SellerOnboardingRecord::new_draft(seller_id.clone(), profile);
        if record.email.is_none() {
            record.email = session.session().and_then(|s| s.email.clone());
        }
        self.records.create(&record).await?;
        info!(seller_id = %seller_id, business = %record.business_name, "Seller registered");
        Ok(record)
    }

    /// The seller's stored record, if registered.
    pub async fn record(
        &self,
        session: &SessionContext,
    ) -> Result<Option<SellerOnboardingRecord>, OnboardingError> {
        let seller_id = session.require()?;
        Ok(self.records.load(seller_id).await?)
    }

    /// Where the seller should land after login.
    pub async fn destination(&self, session: &SessionContext) -> Result<Destination, OnboardingError> {
        Ok(self
            .record(session)
            .await?
            .map_or(Destination::NotRegistered, |r| r.destination()))
    }

    pub async fn current_step(&self, session: &SessionContext) -> Result<usize, OnboardingError> {
        let seller_id = session.require()?;
        Ok(self.flows.get(seller_id).await?.current_step().await)
    }

    pub async fn completion_percent(&self, session: &SessionContext) -> Result<u8, OnboardingError> {
        let seller_id = session.require()?;
        Ok(self.flows.get(seller_id).await?.completion_percent().await)
    }

    /// Read-only projection of step, uploads, and progress for rendering.
    pub async fn snapshot(&self, session: &SessionContext) -> Result<StepSnapshot, OnboardingError> {
        let seller_id = session.require()?;
        Ok(self.flows.get(seller_id).await?.snapshot().await)
    }

    /// Advance a step if the current one is uploaded. A blocked move is not an
    /// error; the snapshot shows the unchanged step.
    pub async fn next(&self, session: &SessionContext) -> Result<StepSnapshot, OnboardingError> {
        let seller_id = session.require()?;
        let flow = self.flows.get(seller_id).await?;
        flow.next().await;
        Ok(flow.snapshot().await)
    }

    pub async fn previous(&self, session: &SessionContext) -> Result<StepSnapshot, OnboardingError> {
        let seller_id = session.require()?;
        let flow = self.flows.get(seller_id).await?;
        flow.previous().await;
        Ok(flow.snapshot().await)
    }

    /// Upload a document and wait until it is stored.
    pub async fn upload(
        &self,
        session: &SessionContext,
        category: Category,
        file: FileUpload,
    ) -> Result<DocumentRecord, OnboardingError> {
        self.uploads.upload(session, category, file).await
    }

    /// Start an upload and return once the transfer is running.
    pub async fn begin_upload(
        &self,
        session: &SessionContext,
        category: Category,
        file: FileUpload,
    ) -> Result<UploadTask, OnboardingError> {
        self.uploads.begin_upload(session, category, file).await
    }

    pub async fn cancel_upload(
        &self,
        session: &SessionContext,
        category: Category,
    ) -> Result<bool, OnboardingError> {
        self.uploads.cancel_upload(session, category).await
    }

    /// Retry only the store write after a `Persistence` error.
    pub async fn retry_persistence(
        &self,
        session: &SessionContext,
        category: Category,
    ) -> Result<DocumentRecord, OnboardingError> {
        self.uploads.retry_persistence(session, category).await
    }

    pub async fn submit_for_verification(
        &self,
        session: &SessionContext,
    ) -> Result<SubmissionReceipt, OnboardingError> {
        self.submissions.submit(session).await
    }

    /// Drop a seller's local flow state, e.g. on sign-out.
    pub async fn sign_out(&self, session: &SessionContext) -> Result<bool, OnboardingError> {
        let seller_id = session.require()?;
        Ok(self.flows.forget(seller_id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::LocalBlobChannel;
    use crate::error::StoreError;
    use crate::identity::SellerSession;
    use crate::store::LibSqlDocumentStore;

    async fn service(dir: &tempfile::TempDir) -> OnboardingService {
        let store = Arc::new(LibSqlDocumentStore::new_memory().await.unwrap());
        let blob = Arc::new(LocalBlobChannel::new(dir.path(), "http://files.test"));
        OnboardingService::new(store, blob, OnboardingConfig::default())
    }

    fn session() -> SessionContext {
        SessionContext::signed_in(SellerSession::new("s1").with_email("s1@example.com"))
    }

    fn png() -> FileUpload {
        FileUpload::new("cheque.png", "image/png", vec![7u8; 2048])
    }

    #[tokio::test]
    async fn register_then_route_to_documents() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        assert_eq!(
            service.destination(&session()).await.unwrap(),
            Destination::NotRegistered
        );

        let record = service
            .register_seller(
                &session(),
                SellerProfile {
                    business_name: "Acme".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(record.email.as_deref(), Some("s1@example.com"));
        assert_eq!(
            service.destination(&session()).await.unwrap(),
            Destination::Documents
        );

        let err = service
            .register_seller(&session(), SellerProfile::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OnboardingError::StoreUnavailable(StoreError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn full_flow_reaches_dashboard() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        let s = session();
        service
            .register_seller(&s, SellerProfile::default())
            .await
            .unwrap();

        for (i, category) in Category::ALL.into_iter().enumerate() {
            assert_eq!(service.current_step(&s).await.unwrap(), i);
            service.upload(&s, category, png()).await.unwrap();
            service.next(&s).await.unwrap();
        }
        assert_eq!(service.completion_percent(&s).await.unwrap(), 100);
        assert!(service.snapshot(&s).await.unwrap().ready_to_submit);

        let receipt = service.submit_for_verification(&s).await.unwrap();
        assert!(receipt.newly_submitted);
        assert_eq!(
            service.destination(&s).await.unwrap(),
            Destination::Dashboard
        );
    }

    #[tokio::test]
    async fn next_is_a_no_op_until_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        let snap = service.next(&session()).await.unwrap();
        assert_eq!(snap.current_step, 0);
        let snap = service.previous(&session()).await.unwrap();
        assert_eq!(snap.current_step, 0);
    }

    #[tokio::test]
    async fn every_entry_point_requires_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        let anon = SessionContext::anonymous();
        assert!(matches!(
            service.current_step(&anon).await,
            Err(OnboardingError::Unauthenticated)
        ));
        assert!(matches!(
            service.destination(&anon).await,
            Err(OnboardingError::Unauthenticated)
        ));
        assert!(matches!(
            service.submit_for_verification(&anon).await,
            Err(OnboardingError::Unauthenticated)
        ));
        assert!(matches!(
            service.cancel_upload(&anon, Category::Bank).await,
            Err(OnboardingError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn sign_out_drops_local_step() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        let s = session();
        service
            .register_seller(&s, SellerProfile::default())
            .await
            .unwrap();
        service.upload(&s, Category::Identity, png()).await.unwrap();
        service.next(&s).await.unwrap();
        assert_eq!(service.current_step(&s).await.unwrap(), 1);

        assert!(service.sign_out(&s).await.unwrap());
        // Resumed from the store: uploads survive, the step does not.
        let snap = service.snapshot(&s).await.unwrap();
        assert_eq!(snap.current_step, 0);
        assert_eq!(snap.uploaded, vec![Category::Identity]);
    }

    #[test]
    fn steps_are_listed_in_order() {
        let titles: Vec<_> = Category::ALL.into_iter().map(|c| c.step().title).collect();
        assert_eq!(titles, ["Identity Proof", "Business Proof", "Bank Details"]);
    }
}
