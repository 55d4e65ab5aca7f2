//! Skill swaps: "I can teach X, I want to learn Y".
//!
//! `Pending -> Approved` is the only transition.

use crate::blob::BlobStore;
use crate::exchange::{required, Exchange, ExchangeError, Feed, SWAPS};
use crate::models::{Actor, NewSwap, Swap, SwapStatus};
use crate::store::{decode, encode, DocumentStore, Patch, Query, Update};
use tracing::{info, warn};

impl<S: DocumentStore, B: BlobStore> Exchange<S, B> {
    pub fn propose(&self, proposer: &Actor, new: NewSwap) -> Result<Swap, ExchangeError> {
        let offers = required(&new.offers, "offered skill")?;
        let wants = required(&new.wants, "wanted skill")?;

        let swap = Swap {
            id: String::new(),
            offers: offers.to_string(),
            wants: wants.to_string(),
            proposer: proposer.name().to_string(),
            status: SwapStatus::Pending,
            approved_by: None,
            created_at: None,
        };
        let doc = self.store().create(SWAPS, encode(&swap)?)?;
        let swap: Swap = decode(&doc)?;
        info!(swap_id = %swap.id, offers, wants, "swap proposed");
        Ok(swap)
    }

    pub fn swap(&self, swap_id: &str) -> Result<Swap, ExchangeError> {
        self.load(SWAPS, swap_id, "swap")
    }

    /// Newest first.
    pub fn swaps(&self) -> Result<Vec<Swap>, ExchangeError> {
        self.list(&Query::newest_first(SWAPS))
    }

    pub fn accept_swap(&self, approver: &Actor, swap_id: &str) -> Result<Swap, ExchangeError> {
        let swap = self.swap(swap_id)?;
        if swap.status != SwapStatus::Pending {
            return Err(ExchangeError::InvalidTransition(format!(
                "swap {swap_id} is already {}",
                swap.status.as_str()
            )));
        }

        let update = Update::new()
            .require("status", SwapStatus::Pending.as_str())
            .patch(Patch::set("status", SwapStatus::Approved.as_str()))
            .patch(Patch::set("approvedBy", approver.name()));
        let doc = self
            .store()
            .update(SWAPS, swap_id, update)
            .map_err(|e| ExchangeError::from_store(e, "swap", swap_id))?;

        info!(swap_id, approver = %approver, "swap approved");
        Ok(decode(&doc)?)
    }

    pub fn delete_swap(&self, swap_id: &str) -> Result<(), ExchangeError> {
        self.store()
            .delete(SWAPS, swap_id)
            .map_err(|e| ExchangeError::from_store(e, "swap", swap_id))?;
        warn!(swap_id, "swap deleted");
        Ok(())
    }
}

impl<S: DocumentStore + Clone, B: BlobStore> Exchange<S, B> {
    pub fn watch_swaps(&self) -> Feed<S, Swap> {
        self.feed(Query::newest_first(SWAPS))
    }
}
