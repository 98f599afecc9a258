//! C3: the scheduler contract and the process-wide scheduler
//! registry: looking up a scheduler by name and enumerating every
//! registered implementation.

pub mod impls;

use crate::model::{CardId, Recommendation, ReviewEvent};
use crate::{Error, LibraryError, SchedulerErrorKind};
use async_trait::async_trait;

/// A scheduler owns its own persistent state keyed by card id; it receives
/// events and returns recommendations. Hook failures must never abort
/// synchronization or review — callers catch
/// the `Err` and log it rather than propagate.
#[async_trait]
pub trait Scheduler: Send + Sync {
    fn scheduler_id(&self) -> &'static str;

    /// Called when a card first enters active state.
    async fn on_card_created(&self, card_id: CardId) -> Result<Option<Recommendation>, Error>;

    /// Called when content changes; policy decides how much prior learning
    /// carries over.
    async fn on_card_replaced(
        &self,
        old_id: CardId,
        new_id: CardId,
    ) -> Result<Option<Recommendation>, Error>;

    /// The only event that changes mastery state.
    async fn on_review(&self, event: &ReviewEvent) -> Result<Vec<Recommendation>, Error>;

    /// Invoked on status -> inactive or deleted.
    async fn on_card_status_changed(&self, card_id: CardId, status: &str) -> Result<(), Error>;

    /// Advisory hook for policies that use relation graphs.
    async fn on_relations_changed(
        &self,
        card_ids: &[CardId],
    ) -> Result<Vec<Recommendation>, Error> {
        let _ = card_ids;
        Ok(Vec::new())
    }
}

pub fn get_scheduler_from_string(
    name: &str,
    schedulers: &[Box<dyn Scheduler>],
) -> Result<usize, Error> {
    let matching: Vec<usize> = schedulers
        .iter()
        .enumerate()
        .filter(|(_, s)| s.scheduler_id() == name)
        .map(|(i, _)| i)
        .collect();
    if matching.is_empty() {
        return Err(Error::Library(LibraryError::Scheduler(
            SchedulerErrorKind::NotFound(name.to_string()),
        )));
    }
    Ok(matching[0])
}
