//! Onboarding state machine — tracks which KYC step the seller is on.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::model::Category;

/// Client-local onboarding progress for one seller.
///
/// `Next` is guarded: it only advances past a step whose document has been
/// persisted. `Previous` is unconditional.
#[derive(Debug, Clone, Default)]
pub struct OnboardingStepState {
    current_step: usize,
    uploaded: BTreeSet<Category>,
    progress: BTreeMap<Category, u8>,
}

/// Read-only projection for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepSnapshot {
    pub current_step: usize,
    pub current_category: Category,
    pub uploaded: Vec<Category>,
    pub progress: BTreeMap<Category, u8>,
    pub completion_percent: u8,
    pub ready_to_submit: bool,
}

impl OnboardingStepState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at step 0 with the given categories already persisted.
    pub fn resume(uploaded: impl IntoIterator<Item = Category>) -> Self {
        Self {
            uploaded: uploaded.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn current_category(&self) -> Category {
        Category::ALL[self.current_step]
    }

    pub fn is_uploaded(&self, category: Category) -> bool {
        self.uploaded.contains(&category)
    }

    /// Advance one step. Returns false (and stays put) at the last step or
    /// when the current step's document is not persisted yet.
    pub fn next(&mut self) -> bool {
        if self.current_step + 1 >= Category::COUNT {
            return false;
        }
        if !self.is_uploaded(self.current_category()) {
            return false;
        }
        self.current_step += 1;
        true
    }

    /// Go back one step. Returns false only at the first step.
    pub fn previous(&mut self) -> bool {
        if self.current_step == 0 {
            return false;
        }
        self.current_step -= 1;
        true
    }

    /// Record a persisted document. Returns the recomputed completion percent.
    pub fn mark_uploaded(&mut self, category: Category) -> u8 {
        self.uploaded.insert(category);
        self.completion_percent()
    }

    /// Publish transfer progress. Never moves a category's progress backwards;
    /// use `reset_progress` between transfers.
    pub fn publish_progress(&mut self, category: Category, percent: u8) -> u8 {
        let entry = self.progress.entry(category).or_insert(0);
        *entry = (*entry).max(percent.min(100));
        *entry
    }

    pub fn reset_progress(&mut self, category: Category) {
        self.progress.insert(category, 0);
    }

    pub fn progress(&self, category: Category) -> u8 {
        self.progress.get(&category).copied().unwrap_or(0)
    }

    /// `round(100 * uploaded / N)`.
    pub fn completion_percent(&self) -> u8 {
        let n = Category::COUNT;
        ((100 * self.uploaded.len() + n / 2) / n) as u8
    }

    /// Every category persisted: eligible for submission.
    pub fn is_complete(&self) -> bool {
        self.uploaded.len() == Category::COUNT
    }

    pub fn snapshot(&self) -> StepSnapshot {
        StepSnapshot {
            current_step: self.current_step,
            current_category: self.current_category(),
            uploaded: self.uploaded.iter().copied().collect(),
            progress: Category::ALL
                .into_iter()
                .map(|c| (c, self.progress(c)))
                .collect(),
            completion_percent: self.completion_percent(),
            ready_to_submit: self.is_complete(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_first_step_with_nothing_uploaded() {
        let state = OnboardingStepState::new();
        assert_eq!(state.current_step(), 0);
        assert_eq!(state.current_category(), Category::Identity);
        assert_eq!(state.completion_percent(), 0);
        assert!(!state.is_complete());
    }

    #[test]
    fn next_is_guarded_by_current_upload() {
        let mut state = OnboardingStepState::new();
        assert!(!state.next());
        assert_eq!(state.current_step(), 0);

        // Uploading a later category does not unlock the current step.
        state.mark_uploaded(Category::Bank);
        assert!(!state.next());
        assert_eq!(state.current_step(), 0);

        state.mark_uploaded(Category::Identity);
        assert!(state.next());
        assert_eq!(state.current_category(), Category::Business);
    }

    #[test]
    fn next_stops_at_last_step() {
        let mut state = OnboardingStepState::resume(Category::ALL);
        assert!(state.next());
        assert!(state.next());
        assert_eq!(state.current_step(), 2);
        assert!(!state.next());
        assert_eq!(state.current_step(), 2);
    }

    #[test]
    fn previous_is_unconditional_above_zero() {
        let mut state = OnboardingStepState::resume([Category::Identity, Category::Business]);
        state.next();
        state.next();
        assert_eq!(state.current_step(), 2);
        assert!(state.previous());
        assert!(state.previous());
        assert!(!state.previous());
        assert_eq!(state.current_step(), 0);
    }

    #[test]
    fn mark_uploaded_keeps_step_and_returns_completion() {
        let mut state = OnboardingStepState::new();
        assert_eq!(state.mark_uploaded(Category::Business), 33);
        assert_eq!(state.current_step(), 0);
        assert_eq!(state.mark_uploaded(Category::Identity), 67);
        // Marking twice is idempotent.
        assert_eq!(state.mark_uploaded(Category::Identity), 67);
        assert_eq!(state.mark_uploaded(Category::Bank), 100);
        assert!(state.is_complete());
    }

    #[test]
    fn completion_is_always_an_integer_in_range() {
        let expected = [0u8, 33, 67, 100];
        let mut state = OnboardingStepState::new();
        assert_eq!(state.completion_percent(), expected[0]);
        for (i, c) in Category::ALL.into_iter().rev().enumerate() {
            assert_eq!(state.mark_uploaded(c), expected[i + 1]);
        }
    }

    #[test]
    fn progress_is_monotonic_until_reset() {
        let mut state = OnboardingStepState::new();
        assert_eq!(state.publish_progress(Category::Identity, 40), 40);
        assert_eq!(state.publish_progress(Category::Identity, 20), 40);
        assert_eq!(state.publish_progress(Category::Identity, 250), 100);
        assert_eq!(state.progress(Category::Business), 0);

        state.reset_progress(Category::Identity);
        assert_eq!(state.progress(Category::Identity), 0);
        assert_eq!(state.publish_progress(Category::Identity, 10), 10);
    }

    #[test]
    fn snapshot_reflects_state() {
        let mut state = OnboardingStepState::resume([Category::Identity]);
        state.publish_progress(Category::Business, 55);
        state.next();

        let snap = state.snapshot();
        assert_eq!(snap.current_step, 1);
        assert_eq!(snap.current_category, Category::Business);
        assert_eq!(snap.uploaded, vec![Category::Identity]);
        assert_eq!(snap.progress[&Category::Business], 55);
        assert_eq!(snap.progress[&Category::Bank], 0);
        assert_eq!(snap.completion_percent, 33);
        assert!(!snap.ready_to_submit);
    }
}
