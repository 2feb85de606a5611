//! Per-seller flow: step state, local document cache, and in-flight transfers.
//!
//! At most one transfer per category is tracked. Each transfer gets a
//! generation number; only the current generation may publish progress, so a
//! preempted transfer can never interleave its events with its successor's.
//!
//! Store writes for a category are serialized by a per-category commit lock.
//! A transfer that holds the lock and is still current is marked committing;
//! from then on it can no longer be cancelled, only superseded by a later
//! commit.
//!
//! Lock order is `commits` before `transfers` before `state`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, oneshot};
use tracing::{debug, info};

use super::model::{Category, DocumentRecord};
use super::records::SellerRecords;
use super::state::{OnboardingStepState, StepSnapshot};
use crate::error::StoreError;
use crate::identity::SellerId;

struct InFlight {
    generation: u64,
    cancel: oneshot::Sender<()>,
    committing: bool,
}

/// Local `DocumentRecord` cache entry.
#[derive(Debug, Clone)]
struct CachedDocument {
    record: DocumentRecord,
    persisted: bool,
}

/// A newly registered transfer.
#[derive(Debug)]
pub struct TransferSlot {
    pub generation: u64,
    pub cancelled: oneshot::Receiver<()>,
    /// Whether an older transfer for the same category was cancelled.
    pub preempted: bool,
}

/// Client-local onboarding state for one seller.
pub struct SellerFlow {
    seller_id: SellerId,
    state: RwLock<OnboardingStepState>,
    documents: RwLock<HashMap<Category, CachedDocument>>,
    transfers: Mutex<HashMap<Category, InFlight>>,
    commits: [Arc<Mutex<()>>; Category::COUNT],
    next_generation: AtomicU64,
}

/// Exclusive right to write one category's document to the store.
pub struct CommitPermit {
    _guard: OwnedMutexGuard<()>,
}

impl SellerFlow {
    pub fn new(seller_id: SellerId, state: OnboardingStepState) -> Self {
        Self {
            seller_id,
            state: RwLock::new(state),
            documents: RwLock::new(HashMap::new()),
            transfers: Mutex::new(HashMap::new()),
            commits: std::array::from_fn(|_| Arc::new(Mutex::new(()))),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn seller_id(&self) -> &SellerId {
        &self.seller_id
    }

    pub async fn snapshot(&self) -> StepSnapshot {
        self.state.read().await.snapshot()
    }

    pub async fn current_step(&self) -> usize {
        self.state.read().await.current_step()
    }

    pub async fn completion_percent(&self) -> u8 {
        self.state.read().await.completion_percent()
    }

    pub async fn next(&self) -> bool {
        self.state.write().await.next()
    }

    pub async fn previous(&self) -> bool {
        self.state.write().await.previous()
    }

    // ── Transfers ───────────────────────────────────────────────────

    /// Register a new transfer for `category`, cancelling any older one.
    pub async fn begin_transfer(&self, category: Category) -> TransferSlot {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let mut transfers = self.transfers.lock().await;
        let previous = transfers.insert(
            category,
            InFlight {
                generation,
                cancel: tx,
                committing: false,
            },
        );
        let preempted = match previous {
            Some(old) => {
                info!(
                    seller_id = %self.seller_id,
                    category = %category,
                    old_generation = old.generation,
                    old_committing = old.committing,
                    "Cancelling in-flight upload superseded by a new one"
                );
                let _ = old.cancel.send(());
                true
            }
            None => false,
        };
        self.state.write().await.reset_progress(category);

        TransferSlot {
            generation,
            cancelled: rx,
            preempted,
        }
    }

    /// Publish progress for the current transfer. Returns the published
    /// percent, or `None` if `generation` is no longer current.
    pub async fn publish_progress(
        &self,
        category: Category,
        generation: u64,
        percent: u8,
    ) -> Option<u8> {
        let transfers = self.transfers.lock().await;
        if transfers.get(&category)?.generation != generation {
            return None;
        }
        let published = self.state.write().await.publish_progress(category, percent);
        debug!(seller_id = %self.seller_id, category = %category, percent = published, "Upload progress");
        Some(published)
    }

    /// Retire a transfer that ended without a persisted document.
    /// Resets progress if it was still current.
    pub async fn fail_transfer(&self, category: Category, generation: u64) -> bool {
        let mut transfers = self.transfers.lock().await;
        if transfers.get(&category).map(|t| t.generation) != Some(generation) {
            return false;
        }
        transfers.remove(&category);
        self.state.write().await.reset_progress(category);
        true
    }

    /// Abort the in-flight transfer for `category`, if any. A transfer whose
    /// document is already being written to the store is left to finish.
    pub async fn cancel_transfer(&self, category: Category) -> bool {
        let mut transfers = self.transfers.lock().await;
        match transfers.get(&category) {
            None => return false,
            Some(in_flight) if in_flight.committing => {
                debug!(
                    seller_id = %self.seller_id,
                    category = %category,
                    "Upload already saving; not cancelled"
                );
                return false;
            }
            Some(_) => {}
        }
        let Some(in_flight) = transfers.remove(&category) else {
            return false;
        };
        let _ = in_flight.cancel.send(());
        self.state.write().await.reset_progress(category);
        true
    }

    // ── Commits ─────────────────────────────────────────────────────

    /// Wait for the category's commit lock.
    pub async fn commit_permit(&self, category: Category) -> CommitPermit {
        let lock = Arc::clone(&self.commits[category.index()]);
        CommitPermit {
            _guard: lock.lock_owned().await,
        }
    }

    /// Take the commit lock for a finished transfer and mark it committing.
    /// Returns `None` if the transfer was cancelled or superseded while it
    /// waited, in which case nothing may be written.
    pub async fn begin_commit(&self, category: Category, generation: u64) -> Option<CommitPermit> {
        let permit = self.commit_permit(category).await;
        let mut transfers = self.transfers.lock().await;
        let in_flight = transfers
            .get_mut(&category)
            .filter(|t| t.generation == generation)?;
        in_flight.committing = true;
        Some(permit)
    }

    /// Record a persisted document: retire its transfer (when given and still
    /// current), reset progress, and mark the category uploaded in one step.
    /// Returns the new completion percent.
    pub async fn complete_transfer(&self, category: Category, generation: Option<u64>) -> u8 {
        let mut transfers = self.transfers.lock().await;
        let mut state = self.state.write().await;
        if let Some(generation) = generation {
            if transfers.get(&category).map(|t| t.generation) == Some(generation) {
                transfers.remove(&category);
                state.reset_progress(category);
            }
        }
        if let Some(cached) = self.documents.write().await.get_mut(&category) {
            cached.persisted = true;
        }
        state.mark_uploaded(category)
    }

    // ── Local document cache ────────────────────────────────────────

    pub async fn cache_document(&self, category: Category, record: DocumentRecord) {
        self.documents.write().await.insert(
            category,
            CachedDocument {
                record,
                persisted: false,
            },
        );
    }

    /// A document uploaded but not yet saved to the store.
    pub async fn unpersisted(&self, category: Category) -> Option<DocumentRecord> {
        self.documents
            .read()
            .await
            .get(&category)
            .filter(|c| !c.persisted)
            .map(|c| c.record.clone())
    }
}

/// Lazily resumed flows, one per seller.
pub struct FlowRegistry {
    records: SellerRecords,
    flows: RwLock<HashMap<SellerId, Arc<SellerFlow>>>,
}

impl FlowRegistry {
    pub fn new(records: SellerRecords) -> Self {
        Self {
            records,
            flows: RwLock::new(HashMap::new()),
        }
    }

    /// The seller's flow, resumed from the store on first access.
    ///
    /// Only sellers with a store record are kept; anyone else gets a fresh
    /// flow that is dropped after use.
    pub async fn get(&self, seller_id: &SellerId) -> Result<Arc<SellerFlow>, StoreError> {
        self.lookup(seller_id, false).await
    }

    /// Like `get`, but always keeps the flow. Used before starting a transfer
    /// so the transfer and any unsaved document stay reachable.
    pub async fn track(&self, seller_id: &SellerId) -> Result<Arc<SellerFlow>, StoreError> {
        self.lookup(seller_id, true).await
    }

    async fn lookup(&self, seller_id: &SellerId, keep: bool) -> Result<Arc<SellerFlow>, StoreError> {
        if let Some(flow) = self.flows.read().await.get(seller_id) {
            return Ok(Arc::clone(flow));
        }

        let record = self.records.load(seller_id).await?;
        let registered = record.is_some();
        let uploaded = record.map(|r| r.uploaded_categories()).unwrap_or_default();

        if !registered && !keep {
            debug!(seller_id = %seller_id, "No seller record; flow not kept");
            return Ok(Arc::new(SellerFlow::new(
                seller_id.clone(),
                OnboardingStepState::resume(uploaded),
            )));
        }

        let mut flows = self.flows.write().await;
        let flow = flows.entry(seller_id.clone()).or_insert_with(|| {
            info!(
                seller_id = %seller_id,
                registered,
                uploaded = uploaded.len(),
                "Onboarding flow resumed"
            );
            Arc::new(SellerFlow::new(
                seller_id.clone(),
                OnboardingStepState::resume(uploaded),
            ))
        });
        Ok(Arc::clone(flow))
    }

    /// Drop a seller's local state, cancelling any transfers.
    pub async fn forget(&self, seller_id: &SellerId) -> bool {
        let Some(flow) = self.flows.write().await.remove(seller_id) else {
            return false;
        };
        for category in Category::ALL {
            flow.cancel_transfer(category).await;
        }
        true
    }
}
