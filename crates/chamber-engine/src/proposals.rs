//! Proposal registry: submission, status changes, withdrawal and timeline.

use chamber_core::{
    Chamber, EventKind, Proposal, ProposalEvent, ProposalStatus, QuantitativeItem,
};
use tracing::info;

use crate::context::{short_id, EngineContext};
use crate::error::{EngineError, Result};

/// Request to submit a proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProposal {
    pub author_id: String,
    pub chamber: Chamber,
    pub title: String,
    /// Item texts of a rated proposal, in ballot order. Empty for a regular one.
    pub items: Vec<String>,
    /// Predecessor when this is a re-submission.
    pub parent_proposal_id: Option<String>,
}

impl NewProposal {
    pub fn new(author_id: impl Into<String>, chamber: Chamber, title: impl Into<String>) -> Self {
        Self {
            author_id: author_id.into(),
            chamber,
            title: title.into(),
            items: Vec::new(),
            parent_proposal_id: None,
        }
    }

    /// Make this a rated proposal over `items`.
    pub fn with_items<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.items = items.into_iter().map(Into::into).collect();
        self
    }

    pub fn resubmission_of(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_proposal_id = Some(parent_id.into());
        self
    }
}

/// Registers proposals and keeps their timelines.
#[derive(Clone)]
pub struct ProposalRegistry {
    ctx: EngineContext,
}

impl ProposalRegistry {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Submit a proposal under review.
    ///
    /// The display number comes from the chamber's atomic counter, so
    /// concurrent submissions never share a number.
    pub async fn submit(&self, request: NewProposal) -> Result<Proposal> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(EngineError::InvalidProposal("title is empty".to_string()));
        }
        let is_quantitative = !request.items.is_empty();
        if is_quantitative && request.items.len() < 2 {
            return Err(EngineError::InvalidProposal(
                "a rated proposal needs at least two items".to_string(),
            ));
        }
        if let Some(parent_id) = &request.parent_proposal_id {
            if self.ctx.storage.get_proposal(parent_id).await?.is_none() {
                return Err(EngineError::not_found("Proposal", parent_id));
            }
        }

        let number = self
            .ctx
            .storage
            .increment_chamber_counter(request.chamber)
            .await?;
        let now = self.ctx.now();
        let proposal = Proposal {
            id: short_id(),
            number: format!("{}-{}", request.chamber.number_prefix(), number),
            chamber: request.chamber,
            author_id: request.author_id,
            title: title.to_string(),
            status: ProposalStatus::UnderReview,
            is_quantitative,
            parent_proposal_id: request.parent_proposal_id,
            created_at: now,
        };
        let items: Vec<QuantitativeItem> = request
            .items
            .into_iter()
            .zip(1u32..)
            .map(|(text, item_index)| QuantitativeItem {
                proposal_id: proposal.id.clone(),
                item_index,
                text,
            })
            .collect();

        self.ctx.storage.create_proposal(&proposal, &items).await?;
        self.ctx
            .storage
            .append_event(
                &proposal.id,
                &ProposalEvent::new(
                    EventKind::Submitted,
                    proposal.chamber,
                    now,
                    format!("Submitted as {}", proposal.number),
                ),
            )
            .await?;

        info!(
            proposal_id = %proposal.id,
            number = %proposal.number,
            "Proposal submitted"
        );
        Ok(proposal)
    }

    pub async fn get(&self, proposal_id: &str) -> Result<Proposal> {
        self.ctx
            .storage
            .get_proposal(proposal_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Proposal", proposal_id))
    }

    /// Move a proposal to `status` and record the change on its timeline.
    pub async fn set_status(
        &self,
        proposal_id: &str,
        status: ProposalStatus,
        description: &str,
    ) -> Result<Proposal> {
        let mut proposal = self.get(proposal_id).await?;
        if !self
            .ctx
            .storage
            .set_proposal_status(proposal_id, status)
            .await?
        {
            return Err(EngineError::not_found("Proposal", proposal_id));
        }
        self.ctx
            .storage
            .append_event(
                proposal_id,
                &ProposalEvent::new(
                    EventKind::StatusChanged,
                    proposal.chamber,
                    self.ctx.now(),
                    format!("{} -> {}: {}", proposal.status, status, description),
                ),
            )
            .await?;

        proposal.status = status;
        Ok(proposal)
    }

    /// Delete a proposal on behalf of its author.
    ///
    /// Not allowed while a vote is open. Events, items, the voting session and
    /// all ballots are deleted with it.
    pub async fn withdraw(&self, proposal_id: &str, user_id: &str) -> Result<()> {
        let proposal = self.get(proposal_id).await?;
        if proposal.author_id != user_id {
            return Err(EngineError::NotAuthor {
                proposal_id: proposal_id.to_string(),
                user_id: user_id.to_string(),
            });
        }
        if self
            .ctx
            .storage
            .get_voting_session(proposal_id)
            .await?
            .is_some_and(|session| session.open)
        {
            return Err(EngineError::already_open("VotingSession", proposal_id));
        }

        if !self.ctx.storage.delete_proposal(proposal_id).await? {
            return Err(EngineError::not_found("Proposal", proposal_id));
        }
        info!(proposal_id = %proposal_id, number = %proposal.number, "Proposal withdrawn");
        Ok(())
    }

    /// The proposal's events in the order they happened.
    pub async fn timeline(&self, proposal_id: &str) -> Result<Vec<ProposalEvent>> {
        self.get(proposal_id).await?;
        Ok(self.ctx.storage.list_events(proposal_id).await?)
    }

    /// Items of a rated proposal, ordered by index.
    pub async fn items(&self, proposal_id: &str) -> Result<Vec<QuantitativeItem>> {
        Ok(self.ctx.storage.list_items(proposal_id).await?)
    }
}
