//! Who is voting.

use std::sync::{PoisonError, RwLock};

use safewalk_report_models::VoterId;

/// Supplies the identity votes are recorded under.
pub trait IdentityProvider: Send + Sync {
    /// The signed-in voter, or `None` when nobody is signed in.
    fn current_identity(&self) -> Option<VoterId>;
}

/// In-memory session holding the current voter.
#[derive(Debug, Default)]
pub struct SessionIdentity {
    voter: RwLock<Option<VoterId>>,
}

impl SessionIdentity {
    /// A session with nobody signed in.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A session already signed in as `voter`.
    #[must_use]
    pub fn signed_in(voter: impl Into<String>) -> Self {
        Self {
            voter: RwLock::new(Some(VoterId::new(voter))),
        }
    }

    /// Signs in as `voter`, replacing any previous identity.
    pub fn sign_in(&self, voter: VoterId) {
        log::debug!("Signed in as {voter}");
        *self.voter.write().unwrap_or_else(PoisonError::into_inner) = Some(voter);
    }

    /// Clears the current identity.
    pub fn sign_out(&self) {
        *self.voter.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_identity(&self) -> Option<VoterId> {
        self.voter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
