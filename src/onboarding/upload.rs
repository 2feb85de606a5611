//! Upload coordinator — drives one transfer per document category and
//! persists the outcome.
//!
//! 1. Validate the file and the session (no I/O on failure).
//! 2. Start the transfer on the blob channel under a unique path.
//! 3. Relay progress to the seller's flow until a terminal event.
//! 4. On completion resolve the retrieval URL, then under the category's
//!    commit lock cache the record locally and merge it into the seller's
//!    store record. A transfer cancelled or superseded before it gets the
//!    lock writes nothing.
//! 5. Mark the category uploaded only after the store write succeeds.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::events::OnboardingEvent;
use super::flow::{FlowRegistry, SellerFlow};
use super::model::{Category, DocumentRecord, VerificationStatus, fields};
use super::records::{SellerRecords, to_json};
use super::validation::{FileUpload, sanitize_file_name, validate_file};
use crate::blob::{BlobChannel, UploadEvent, UploadHandle, percent};
use crate::config::OnboardingConfig;
use crate::error::OnboardingError;
use crate::identity::{SellerId, SessionContext};
use crate::store::MergeUpdate;

/// A running upload. Await `outcome` for the result; dropping the task lets
/// the transfer finish in the background.
#[derive(Debug)]
pub struct UploadTask {
    category: Category,
    upload_id: Uuid,
    path: String,
    join: JoinHandle<Result<DocumentRecord, OnboardingError>>,
}

impl UploadTask {
    pub fn category(&self) -> Category {
        self.category
    }

    pub fn upload_id(&self) -> Uuid {
        self.upload_id
    }

    /// Blob path the document is being written to.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn outcome(self) -> Result<DocumentRecord, OnboardingError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(OnboardingError::UploadFailed {
                category: self.category,
                reason: format!("upload task ended unexpectedly: {e}"),
            }),
        }
    }
}

/// Coordinates blob transfers and their persistence into seller records.
#[derive(Clone)]
pub struct UploadCoordinator {
    config: Arc<OnboardingConfig>,
    blob: Arc<dyn BlobChannel>,
    records: SellerRecords,
    flows: Arc<FlowRegistry>,
    events: broadcast::Sender<OnboardingEvent>,
}

impl UploadCoordinator {
    pub fn new(
        config: Arc<OnboardingConfig>,
        blob: Arc<dyn BlobChannel>,
        records: SellerRecords,
        flows: Arc<FlowRegistry>,
        events: broadcast::Sender<OnboardingEvent>,
    ) -> Self {
        Self {
            config,
            blob,
            records,
            flows,
            events,
        }
    }

    /// Upload and wait for the outcome.
    pub async fn upload(
        &self,
        session: &SessionContext,
        category: Category,
        file: FileUpload,
    ) -> Result<DocumentRecord, OnboardingError> {
        self.begin_upload(session, category, file).await?.outcome().await
    }

    /// Start an upload and return as soon as the transfer is running.
    ///
    /// An upload already in flight for the same category is cancelled first.
    pub async fn begin_upload(
        &self,
        session: &SessionContext,
        category: Category,
        file: FileUpload,
    ) -> Result<UploadTask, OnboardingError> {
        let media_type = validate_file(&file, self.config.max_file_size)?;
        let seller_id = session.require()?.clone();
        let flow = self.flows.track(&seller_id).await?;

        let upload_id = Uuid::new_v4();
        let path = self.destination_path(&seller_id, category, &file.file_name, upload_id);
        let size = file.size();
        let slot = flow.begin_transfer(category).await;

        let handle = match self.blob.start_upload(&path, file.bytes).await {
            Ok(handle) => handle,
            Err(e) => {
                flow.fail_transfer(category, slot.generation).await;
                warn!(seller_id = %seller_id, category = %category, error = %e, "Upload could not start");
                let reason = e.to_string();
                self.emit(OnboardingEvent::UploadFailed {
                    seller_id,
                    category,
                    reason: reason.clone(),
                });
                return Err(OnboardingError::UploadFailed { category, reason });
            }
        };

        info!(
            seller_id = %seller_id,
            category = %category,
            upload_id = %upload_id,
            media_type = %media_type,
            size,
            path = %path,
            preempted = slot.preempted,
            "Upload started"
        );
        self.emit(OnboardingEvent::UploadStarted {
            seller_id,
            category,
            upload_id,
        });

        let this = self.clone();
        let join = tokio::spawn(async move {
            this.drive(flow, category, slot.generation, handle, slot.cancelled)
                .await
        });

        Ok(UploadTask {
            category,
            upload_id,
            path,
            join,
        })
    }

    /// Abort the in-flight upload for `category`. Returns false if none.
    pub async fn cancel_upload(
        &self,
        session: &SessionContext,
        category: Category,
    ) -> Result<bool, OnboardingError> {
        let seller_id = session.require()?;
        let flow = self.flows.get(seller_id).await?;
        let cancelled = flow.cancel_transfer(category).await;
        if cancelled {
            info!(seller_id = %seller_id, category = %category, "Upload cancelled");
            self.emit(OnboardingEvent::UploadCancelled {
                seller_id: seller_id.clone(),
                category,
            });
        }
        Ok(cancelled)
    }

    /// Retry the store write for a document whose binary already uploaded.
    pub async fn retry_persistence(
        &self,
        session: &SessionContext,
        category: Category,
    ) -> Result<DocumentRecord, OnboardingError> {
        let seller_id = session.require()?;
        let flow = self.flows.get(seller_id).await?;
        let _permit = flow.commit_permit(category).await;
        let record = flow
            .unpersisted(category)
            .await
            .ok_or(OnboardingError::NothingToPersist { category })?;
        info!(seller_id = %seller_id, category = %category, "Retrying document persistence");
        self.persist(&flow, category, record, None).await
    }

    /// `<prefix>/<seller>/<category>_<unix millis>_<upload id>_<file name>`
    fn destination_path(
        &self,
        seller_id: &SellerId,
        category: Category,
        file_name: &str,
        upload_id: Uuid,
    ) -> String {
        let short_id = &upload_id.simple().to_string()[..8];
        format!(
            "{}/{}/{}_{}_{}_{}",
            self.config.blob_prefix,
            sanitize_file_name(seller_id.as_str()),
            category,
            Utc::now().timestamp_millis(),
            short_id,
            sanitize_file_name(file_name)
        )
    }

    async fn drive(
        self,
        flow: Arc<SellerFlow>,
        category: Category,
        generation: u64,
        mut handle: UploadHandle,
        mut cancelled: oneshot::Receiver<()>,
    ) -> Result<DocumentRecord, OnboardingError> {
        let seller_id = flow.seller_id().clone();
        let stall = self.config.upload_stall_timeout;

        loop {
            let next = tokio::select! {
                _ = &mut cancelled => {
                    handle.abort();
                    return Err(OnboardingError::UploadCancelled { category });
                }
                next = tokio::time::timeout(stall, handle.next_event()) => next,
            };

            let failure = match next {
                Ok(Some(UploadEvent::Progress {
                    bytes_transferred,
                    total_bytes,
                })) => {
                    let pct = percent(bytes_transferred, total_bytes);
                    if let Some(published) = flow.publish_progress(category, generation, pct).await {
                        self.emit(OnboardingEvent::Progress {
                            seller_id: seller_id.clone(),
                            category,
                            percent: published,
                        });
                    }
                    continue;
                }
                Ok(Some(UploadEvent::Completed)) => break,
                Ok(Some(UploadEvent::Failed { cause })) => cause,
                Ok(None) => "transfer ended without completing".to_string(),
                Err(_) => {
                    handle.abort();
                    format!("no progress for {stall:?}")
                }
            };
            return Err(self.transfer_failed(&flow, category, generation, failure).await);
        }

        let file_url = match self.blob.resolve_url(handle.path()).await {
            Ok(url) => url,
            Err(e) => {
                let reason = format!("could not resolve download URL: {e}");
                return Err(self.transfer_failed(&flow, category, generation, reason).await);
            }
        };

        let Some(_permit) = flow.begin_commit(category, generation).await else {
            // Cancelled or superseded after the bytes landed.
            return Err(OnboardingError::UploadCancelled { category });
        };

        let record = DocumentRecord::new(file_url);
        flow.cache_document(category, record.clone()).await;
        self.persist(&flow, category, record, Some(generation)).await
    }

    async fn transfer_failed(
        &self,
        flow: &SellerFlow,
        category: Category,
        generation: u64,
        reason: String,
    ) -> OnboardingError {
        flow.fail_transfer(category, generation).await;
        warn!(seller_id = %flow.seller_id(), category = %category, reason = %reason, "Upload failed");
        self.emit(OnboardingEvent::UploadFailed {
            seller_id: flow.seller_id().clone(),
            category,
            reason: reason.clone(),
        });
        OnboardingError::UploadFailed { category, reason }
    }

    async fn persist(
        &self,
        flow: &SellerFlow,
        category: Category,
        record: DocumentRecord,
        generation: Option<u64>,
    ) -> Result<DocumentRecord, OnboardingError> {
        let seller_id = flow.seller_id();
        let result = match to_json(&record) {
            Ok(doc) => {
                let update = MergeUpdate::new()
                    .set(fields::document(category), doc)
                    .set(
                        fields::verification(category),
                        VerificationStatus::Uploaded.as_str(),
                    );
                self.records.merge(seller_id, &update).await
            }
            Err(e) => Err(e),
        };

        if let Err(source) = result {
            if let Some(generation) = generation {
                flow.fail_transfer(category, generation).await;
            }
            warn!(seller_id = %seller_id, category = %category, error = %source, "Document uploaded but not saved");
            self.emit(OnboardingEvent::PersistenceFailed {
                seller_id: seller_id.clone(),
                category,
                reason: source.to_string(),
            });
            return Err(OnboardingError::Persistence {
                category,
                record,
                source,
            });
        }

        let completion = flow.complete_transfer(category, generation).await;
        info!(
            seller_id = %seller_id,
            category = %category,
            completion,
            "Document uploaded and saved"
        );
        self.emit(OnboardingEvent::Uploaded {
            seller_id: seller_id.clone(),
            category,
            file_url: record.file_url.clone(),
            completion_percent: completion,
        });
        Ok(record)
    }

    fn emit(&self, event: OnboardingEvent) {
        // Ok if nobody is listening.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::{Mutex, mpsc};

    use crate::error::BlobError;
    use crate::onboarding::model::{SellerOnboardingRecord, SellerProfile};
    use crate::store::LibSqlDocumentStore;

    /// What a scripted transfer does after its progress events.
    #[derive(Clone)]
    enum Ending {
        Complete,
        Fail(&'static str),
        Hang,
    }

    /// Blob channel that replays a script instead of storing anything.
    struct ScriptedBlob {
        ending: Mutex<Ending>,
        starts: AtomicUsize,
        paths: Mutex<Vec<String>>,
    }

    impl ScriptedBlob {
        fn new(ending: Ending) -> Arc<Self> {
            Arc::new(Self {
                ending: Mutex::new(ending),
                starts: AtomicUsize::new(0),
                paths: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BlobChannel for ScriptedBlob {
        async fn start_upload(&self, path: &str, bytes: Vec<u8>) -> Result<UploadHandle, BlobError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.paths.lock().await.push(path.to_string());
            let ending = self.ending.lock().await.clone();
            let (tx, rx) = mpsc::channel(8);
            let total = bytes.len() as u64;
            let task = tokio::spawn(async move {
                for sent in [total / 4, total / 2] {
                    let _ = tx
                        .send(UploadEvent::Progress {
                            bytes_transferred: sent,
                            total_bytes: total,
                        })
                        .await;
                }
                match ending {
                    Ending::Complete => {
                        let _ = tx.send(UploadEvent::Completed).await;
                    }
                    Ending::Fail(cause) => {
                        let _ = tx
                            .send(UploadEvent::Failed {
                                cause: cause.to_string(),
                            })
                            .await;
                    }
                    Ending::Hang => std::future::pending::<()>().await,
                }
            });
            Ok(UploadHandle::new(path, rx).with_task(task.abort_handle()))
        }

        async fn resolve_url(&self, path: &str) -> Result<String, BlobError> {
            Ok(format!("https://cdn.test/{path}"))
        }
    }

    struct Harness {
        coordinator: UploadCoordinator,
        flows: Arc<FlowRegistry>,
        records: SellerRecords,
        blob: Arc<ScriptedBlob>,
        events: broadcast::Receiver<OnboardingEvent>,
    }

    async fn harness(ending: Ending, config: OnboardingConfig) -> Harness {
        let store = Arc::new(LibSqlDocumentStore::new_memory().await.unwrap());
        let records = SellerRecords::new(store, "sellers");
        records
            .create(&SellerOnboardingRecord::new_draft(
                SellerId::new("s1"),
                SellerProfile::default(),
            ))
            .await
            .unwrap();
        let flows = Arc::new(FlowRegistry::new(records.clone()));
        let blob = ScriptedBlob::new(ending);
        let (tx, rx) = broadcast::channel(64);
        let coordinator = UploadCoordinator::new(
            Arc::new(config),
            blob.clone(),
            records.clone(),
            Arc::clone(&flows),
            tx,
        );
        Harness {
            coordinator,
            flows,
            records,
            blob,
            events: rx,
        }
    }

    fn session() -> SessionContext {
        SessionContext::signed_in(crate::identity::SellerSession::new("s1"))
    }

    fn pdf(size: usize) -> FileUpload {
        FileUpload::new("pan card.pdf", "application/pdf", vec![1u8; size])
    }

    #[tokio::test]
    async fn successful_upload_persists_and_marks_uploaded() {
        let mut h = harness(Ending::Complete, OnboardingConfig::default()).await;

        let record = h
            .coordinator
            .upload(&session(), Category::Identity, pdf(400))
            .await
            .unwrap();
        assert!(record.file_url.starts_with("https://cdn.test/seller-documents/s1/identity_"));
        assert!(record.file_url.ends_with("_pan_card.pdf"));

        let stored = h.records.load(&SellerId::new("s1")).await.unwrap().unwrap();
        assert_eq!(stored.document(Category::Identity), Some(&record));
        assert_eq!(stored.verification(Category::Identity), VerificationStatus::Uploaded);

        let flow = h.flows.get(&SellerId::new("s1")).await.unwrap();
        let snap = flow.snapshot().await;
        assert_eq!(snap.uploaded, vec![Category::Identity]);
        assert_eq!(snap.progress[&Category::Identity], 0);
        assert_eq!(snap.completion_percent, 33);

        let mut progress = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            match event {
                OnboardingEvent::Progress { percent, .. } => progress.push(percent),
                OnboardingEvent::Uploaded {
                    completion_percent, ..
                } => assert_eq!(completion_percent, 33),
                _ => {}
            }
        }
        assert_eq!(progress, vec![25, 50]);
    }

    #[tokio::test]
    async fn oversize_file_never_reaches_blob_channel() {
        let h = harness(Ending::Complete, OnboardingConfig::default()).await;
        let err = h
            .coordinator
            .upload(&session(), Category::Bank, pdf(5 * 1024 * 1024 + 1))
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::Validation { .. }));
        assert_eq!(h.blob.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn anonymous_upload_is_rejected_before_transfer() {
        let h = harness(Ending::Complete, OnboardingConfig::default()).await;
        let err = h
            .coordinator
            .upload(&SessionContext::anonymous(), Category::Bank, pdf(10))
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::Unauthenticated));
        assert_eq!(h.blob.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_transfer_leaves_store_untouched() {
        let h = harness(Ending::Fail("network reset"), OnboardingConfig::default()).await;
        let err = h
            .coordinator
            .upload(&session(), Category::Identity, pdf(100))
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::UploadFailed { ref reason, .. } if reason == "network reset"));

        let flow = h.flows.get(&SellerId::new("s1")).await.unwrap();
        let snap = flow.snapshot().await;
        assert_eq!(snap.progress[&Category::Identity], 0);
        assert!(snap.uploaded.is_empty());

        let stored = h.records.load(&SellerId::new("s1")).await.unwrap().unwrap();
        assert!(stored.document(Category::Identity).is_none());
        assert_eq!(
            stored.verification(Category::Identity),
            VerificationStatus::NotSubmitted
        );
    }

    #[tokio::test]
    async fn stalled_transfer_times_out() {
        let config = OnboardingConfig {
            upload_stall_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let h = harness(Ending::Hang, config).await;
        let err = h
            .coordinator
            .upload(&session(), Category::Business, pdf(100))
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::UploadFailed { ref reason, .. } if reason.starts_with("no progress")));
        let flow = h.flows.get(&SellerId::new("s1")).await.unwrap();
        // Retired: nothing left to cancel.
        assert!(!flow.cancel_transfer(Category::Business).await);
    }

    #[tokio::test]
    async fn cancel_aborts_in_flight_transfer() {
        let h = harness(Ending::Hang, OnboardingConfig::default()).await;
        let task = h
            .coordinator
            .begin_upload(&session(), Category::Bank, pdf(100))
            .await
            .unwrap();
        assert_eq!(task.category(), Category::Bank);

        assert!(h.coordinator.cancel_upload(&session(), Category::Bank).await.unwrap());
        let err = task.outcome().await.unwrap_err();
        assert!(matches!(err, OnboardingError::UploadCancelled { category: Category::Bank }));

        let flow = h.flows.get(&SellerId::new("s1")).await.unwrap();
        assert_eq!(flow.snapshot().await.progress[&Category::Bank], 0);
        let stored = h.records.load(&SellerId::new("s1")).await.unwrap().unwrap();
        assert!(stored.document(Category::Bank).is_none());
    }

    #[tokio::test]
    async fn new_upload_supersedes_in_flight_one() {
        let h = harness(Ending::Hang, OnboardingConfig::default()).await;
        let first = h
            .coordinator
            .begin_upload(&session(), Category::Identity, pdf(100))
            .await
            .unwrap();

        *h.blob.ending.lock().await = Ending::Complete;
        let second = h
            .coordinator
            .begin_upload(&session(), Category::Identity, pdf(100))
            .await
            .unwrap();
        assert_ne!(first.path(), second.path());

        assert!(matches!(
            first.outcome().await,
            Err(OnboardingError::UploadCancelled { .. })
        ));
        let record = second.outcome().await.unwrap();
        let stored = h.records.load(&SellerId::new("s1")).await.unwrap().unwrap();
        assert_eq!(stored.document(Category::Identity), Some(&record));
    }

    #[tokio::test]
    async fn reupload_overwrites_with_new_url() {
        let h = harness(Ending::Complete, OnboardingConfig::default()).await;
        let first = h
            .coordinator
            .upload(&session(), Category::Bank, pdf(10))
            .await
            .unwrap();
        let second = h
            .coordinator
            .upload(&session(), Category::Bank, pdf(10))
            .await
            .unwrap();
        assert_ne!(first.file_url, second.file_url);

        let stored = h.records.load(&SellerId::new("s1")).await.unwrap().unwrap();
        assert_eq!(stored.document(Category::Bank), Some(&second));
        assert_eq!(h.blob.paths.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn unregistered_seller_gets_persistence_error_then_retry() {
        let h = harness(Ending::Complete, OnboardingConfig::default()).await;
        let stranger = SessionContext::signed_in(crate::identity::SellerSession::new("s2"));

        let err = h
            .coordinator
            .upload(&stranger, Category::Identity, pdf(10))
            .await
            .unwrap_err();
        let OnboardingError::Persistence { record, .. } = err else {
            panic!("expected persistence error, got {err:?}");
        };

        let flow = h.flows.get(&SellerId::new("s2")).await.unwrap();
        assert!(flow.snapshot().await.uploaded.is_empty());

        // Once the record exists, only the store write is retried.
        h.records
            .create(&SellerOnboardingRecord::new_draft(
                SellerId::new("s2"),
                SellerProfile::default(),
            ))
            .await
            .unwrap();
        let saved = h
            .coordinator
            .retry_persistence(&stranger, Category::Identity)
            .await
            .unwrap();
        assert_eq!(saved, record);
        assert_eq!(h.blob.starts.load(Ordering::SeqCst), 1);
        assert_eq!(flow.snapshot().await.uploaded, vec![Category::Identity]);

        let err = h
            .coordinator
            .retry_persistence(&stranger, Category::Identity)
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::NothingToPersist { .. }));
    }
}
