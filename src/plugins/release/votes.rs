//! Approval votes per release post.

use std::path::Path;

use thiserror::Error;
use tracing::warn;

use crate::config::{JsonStore, StoreError};

/// Namespace of the votes (message id string → voter ids).
pub const NAMESPACE: &str = "rm6785:vote";

/// Voter id used by the linter.
pub const BOT_VOTER: i64 = 0;

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("user has already voted")]
    AlreadyVoted,

    #[error("user never voted")]
    NeverVoted,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub struct Votes {
    store: JsonStore,
}

impl Votes {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            store: JsonStore::open(dir, NAMESPACE)?,
        })
    }

    fn voters(&self, message_id: i32) -> Vec<i64> {
        self.store.get_or_default(&message_id.to_string())
    }

    fn set_voters(&mut self, message_id: i32, voters: &[i64]) -> Result<(), StoreError> {
        self.store.set(&message_id.to_string(), voters)?;
        self.store.save()
    }

    pub fn vote(&mut self, user_id: i64, message_id: i32) -> Result<(), VoteError> {
        let mut voters = self.voters(message_id);
        if voters.contains(&user_id) {
            warn!(
                "cannot increment vote count, [user: {}] has already voted for [message: {}]",
                user_id, message_id
            );
            return Err(VoteError::AlreadyVoted);
        }

        voters.push(user_id);
        self.set_voters(message_id, &voters)?;
        Ok(())
    }

    pub fn remove_vote(&mut self, user_id: i64, message_id: i32) -> Result<(), VoteError> {
        let mut voters = self.voters(message_id);
        let Some(index) = voters.iter().position(|v| *v == user_id) else {
            warn!(
                "cannot decrement vote count, [user: {}] has never voted for [message: {}]",
                user_id, message_id
            );
            return Err(VoteError::NeverVoted);
        };

        voters.remove(index);
        self.set_voters(message_id, &voters)?;
        Ok(())
    }

    #[must_use]
    pub fn count(&self, message_id: i32) -> usize {
        self.voters(message_id).len()
    }
}
