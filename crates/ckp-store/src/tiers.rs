//! Tiered retrieval for context restoration.
//!
//! Tier 1 is what must survive a context reset: guidelines, implementation
//! plans and high-importance decisions. Tier 2 is useful working context:
//! learnings, file edits and medium-importance decisions. Low-importance
//! decisions belong to neither tier.

use anyhow::Result;
use ckp_config::RestorationSettings;
use ckp_core::{EntryType, Importance};
use serde::Serialize;
use tracing::debug;

use crate::store::{ContextStore, StoredRecord};

/// Fixed token cost charged per restored record for its framing.
const RECORD_OVERHEAD_TOKENS: usize = 8;

/// Approximate token count of `content`.
pub fn estimate_tokens(content: &str) -> usize {
    // ~4 chars per token on average; approximate via word count * 4/3
    content.split_whitespace().count() * 4 / 3
}

fn record_tokens(record: &StoredRecord) -> usize {
    estimate_tokens(&record.record.content) + RECORD_OVERHEAD_TOKENS
}

fn list_tokens(records: &[StoredRecord]) -> usize {
    records.iter().map(record_tokens).sum()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Tier1 {
    pub guidelines: Vec<StoredRecord>,
    pub implementation_plans: Vec<StoredRecord>,
    pub high_importance_decisions: Vec<StoredRecord>,
    pub total_count: usize,
}

impl Tier1 {
    fn recount(&mut self) {
        self.total_count = self.guidelines.len()
            + self.implementation_plans.len()
            + self.high_importance_decisions.len();
    }

    pub fn estimated_tokens(&self) -> usize {
        list_tokens(&self.guidelines)
            + list_tokens(&self.implementation_plans)
            + list_tokens(&self.high_importance_decisions)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Tier2 {
    pub learnings: Vec<StoredRecord>,
    /// `file_edit` and `file_write` records.
    pub file_edits: Vec<StoredRecord>,
    pub medium_decisions: Vec<StoredRecord>,
    pub total_count: usize,
}

impl Tier2 {
    fn recount(&mut self) {
        self.total_count = self.learnings.len() + self.file_edits.len() + self.medium_decisions.len();
    }

    pub fn estimated_tokens(&self) -> usize {
        list_tokens(&self.learnings) + list_tokens(&self.file_edits) + list_tokens(&self.medium_decisions)
    }
}

/// Per-category caps for restoration queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestorationLimits {
    pub decision_limit: usize,
    pub learnings_limit: usize,
    pub file_edits_limit: usize,
    pub medium_decisions_limit: usize,
}

impl From<&RestorationSettings> for RestorationLimits {
    fn from(settings: &RestorationSettings) -> Self {
        let widen = |n: u32| usize::try_from(n).unwrap_or(usize::MAX);
        Self {
            decision_limit: widen(settings.decision_limit),
            learnings_limit: widen(settings.learnings_limit),
            file_edits_limit: widen(settings.file_edits_limit),
            medium_decisions_limit: widen(settings.medium_decisions_limit),
        }
    }
}

impl Default for RestorationLimits {
    fn default() -> Self {
        Self::from(&RestorationSettings::default())
    }
}

/// A restored context bundle. Every list is newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Restoration {
    pub tier1: Tier1,
    pub tier2: Tier2,
    pub total_count: usize,
}

impl Restoration {
    pub fn estimated_tokens(&self) -> usize {
        self.tier1.estimated_tokens() + self.tier2.estimated_tokens()
    }

    /// Drop records until the bundle fits `token_budget`, returning how many
    /// were dropped.
    ///
    /// Tier 2 goes first (medium decisions, then file edits, then learnings),
    /// then tier 1 high-importance decisions, always oldest first. Guidelines
    /// and implementation plans are kept even if they alone exceed the
    /// budget.
    pub fn trim_to_budget(&mut self, token_budget: usize) -> usize {
        let mut estimate = self.estimated_tokens();
        let mut dropped = 0;

        let Self { tier1, tier2, .. } = self;
        let droppable: [&mut Vec<StoredRecord>; 4] = [
            &mut tier2.medium_decisions,
            &mut tier2.file_edits,
            &mut tier2.learnings,
            &mut tier1.high_importance_decisions,
        ];
        for list in droppable {
            while estimate > token_budget {
                let Some(oldest) = list.pop() else { break };
                estimate -= record_tokens(&oldest);
                dropped += 1;
            }
        }

        self.tier1.recount();
        self.tier2.recount();
        self.total_count = self.tier1.total_count + self.tier2.total_count;
        if dropped > 0 {
            debug!(dropped, estimate, token_budget, "Trimmed restoration bundle");
        }
        dropped
    }
}

impl ContextStore {
    pub fn query_tier1(&self, session_id: &str, decision_limit: usize) -> Result<Tier1> {
        let mut tier = Tier1 {
            guidelines: self.query_filtered(session_id, &[EntryType::Guideline], None, None)?,
            implementation_plans: self.query_filtered(
                session_id,
                &[EntryType::ImplementationPlan],
                None,
                None,
            )?,
            high_importance_decisions: self.query_filtered(
                session_id,
                &[EntryType::Decision],
                Some(Importance::High),
                Some(decision_limit),
            )?,
            total_count: 0,
        };
        tier.recount();
        Ok(tier)
    }

    pub fn query_tier2(
        &self,
        session_id: &str,
        learnings_limit: usize,
        file_edits_limit: usize,
        medium_decisions_limit: usize,
    ) -> Result<Tier2> {
        let mut tier = Tier2 {
            learnings: self.query_filtered(
                session_id,
                &[EntryType::Learning],
                None,
                Some(learnings_limit),
            )?,
            file_edits: self.query_filtered(
                session_id,
                &[EntryType::FileEdit, EntryType::FileWrite],
                None,
                Some(file_edits_limit),
            )?,
            medium_decisions: self.query_filtered(
                session_id,
                &[EntryType::Decision],
                Some(Importance::Medium),
                Some(medium_decisions_limit),
            )?,
            total_count: 0,
        };
        tier.recount();
        Ok(tier)
    }

    /// Both tiers for `session_id`, untrimmed.
    pub fn query_for_restoration(
        &self,
        session_id: &str,
        limits: RestorationLimits,
    ) -> Result<Restoration> {
        let tier1 = self.query_tier1(session_id, limits.decision_limit)?;
        let tier2 = self.query_tier2(
            session_id,
            limits.learnings_limit,
            limits.file_edits_limit,
            limits.medium_decisions_limit,
        )?;
        let total_count = tier1.total_count + tier2.total_count;
        debug!(
            session_id,
            tier1 = tier1.total_count,
            tier2 = tier2.total_count,
            "Queried restoration tiers"
        );
        Ok(Restoration {
            tier1,
            tier2,
            total_count,
        })
    }
}
