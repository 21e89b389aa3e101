//! Recovery reconstruction coordinator
//!
//! Collects RECOVERY_RESPONSE payloads per secret and hands them to the
//! engine once a quorum is present. A session is attempted at most once;
//! whatever the outcome, the owner must start a new session to retry.

use std::collections::{BTreeMap, BTreeSet};

use derec_core::{HelperId, SecretId, Timestamp};
use derec_engine::ShareMap;

/// Where the secret being recovered came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySource {
    /// A secret this owner protected (or recovered) earlier
    Known,
    /// A secret found through share discovery
    Discovered { helper_count: usize },
}

/// One recovery attempt in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverySession {
    pub secret_id: SecretId,
    pub name: String,
    pub version: u32,
    pub threshold: usize,
    pub source: RecoverySource,
    pub started_at: Timestamp,
}

/// Result of offering a response to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// Stored; `count` distinct helpers have answered so far
    Stored { count: usize },
    /// No open session for that secret
    NoSession,
    /// The session already made its reconstruction attempt
    AlreadyAttempted,
}

#[derive(Debug, Default)]
pub struct RecoveryCoordinator {
    session: Option<RecoverySession>,
    pending: BTreeMap<SecretId, BTreeMap<HelperId, Vec<u8>>>,
    attempted: BTreeSet<SecretId>,
}

impl RecoveryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session, discarding anything collected for the same secret
    pub fn begin(&mut self, session: RecoverySession) {
        self.pending.remove(&session.secret_id);
        self.attempted.remove(&session.secret_id);
        self.session = Some(session);
    }

    pub fn session(&self) -> Option<&RecoverySession> {
        self.session.as_ref()
    }

    /// Store a helper's response for the open session
    ///
    /// A repeated response from the same helper replaces the earlier one.
    pub fn record(&mut self, secret_id: &SecretId, helper: HelperId, response: Vec<u8>) -> Recorded {
        match &self.session {
            Some(session) if &session.secret_id == secret_id => {}
            _ => return Recorded::NoSession,
        }
        if self.attempted.contains(secret_id) {
            return Recorded::AlreadyAttempted;
        }
        let shares = self.pending.entry(secret_id.clone()).or_default();
        shares.insert(helper, response);
        Recorded::Stored { count: shares.len() }
    }

    /// Responses collected for `secret_id`
    pub fn pending_count(&self, secret_id: &SecretId) -> usize {
        self.pending.get(secret_id).map_or(0, |s| s.len())
    }

    /// Hand out the quorum if the open session has one and has not tried yet
    ///
    /// Marks the session attempted; later calls return `None` until a new
    /// session begins.
    pub fn take_ready(&mut self) -> Option<(RecoverySession, ShareMap)> {
        let session = self.session.as_ref()?;
        if self.attempted.contains(&session.secret_id) {
            return None;
        }
        let shares = self.pending.get(&session.secret_id)?;
        if shares.len() < session.threshold {
            return None;
        }

        let responses: ShareMap = shares
            .iter()
            .map(|(helper, data)| (helper.channel_id(), data.clone()))
            .collect();
        self.attempted.insert(session.secret_id.clone());
        Some((session.clone(), responses))
    }

    /// Close the open session and drop everything kept for it
    pub fn finish(&mut self) -> Option<RecoverySession> {
        let session = self.session.take()?;
        self.pending.remove(&session.secret_id);
        self.attempted.remove(&session.secret_id);
        Some(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u8) -> HelperId {
        HelperId::new(n).unwrap()
    }

    fn session(id: &SecretId, threshold: usize) -> RecoverySession {
        RecoverySession {
            secret_id: id.clone(),
            name: "pw".to_string(),
            version: 1,
            threshold,
            source: RecoverySource::Known,
            started_at: 0,
        }
    }

    #[test]
    fn test_responses_without_session_are_not_stored() {
        let mut coordinator = RecoveryCoordinator::new();
        let id = SecretId::new(vec![1]);
        assert_eq!(coordinator.record(&id, h(1), vec![0]), Recorded::NoSession);
        assert_eq!(coordinator.pending_count(&id), 0);
    }

    #[test]
    fn test_quorum_released_exactly_once() {
        let mut coordinator = RecoveryCoordinator::new();
        let id = SecretId::new(vec![7]);
        coordinator.begin(session(&id, 2));

        coordinator.record(&id, h(1), vec![1]);
        assert!(coordinator.take_ready().is_none());

        // Same helper again does not count twice
        assert_eq!(coordinator.record(&id, h(1), vec![1]), Recorded::Stored { count: 1 });
        assert!(coordinator.take_ready().is_none());

        coordinator.record(&id, h(3), vec![3]);
        let (_, responses) = coordinator.take_ready().unwrap();
        assert_eq!(responses.len(), 2);
        assert!(responses.contains_key(&h(3).channel_id()));

        assert!(coordinator.take_ready().is_none());
        assert_eq!(coordinator.record(&id, h(2), vec![2]), Recorded::AlreadyAttempted);
    }

    #[test]
    fn test_finish_clears_pending() {
        let mut coordinator = RecoveryCoordinator::new();
        let id = SecretId::new(vec![9]);
        coordinator.begin(session(&id, 2));
        coordinator.record(&id, h(2), vec![2]);

        let closed = coordinator.finish().unwrap();
        assert_eq!(closed.secret_id, id);
        assert_eq!(coordinator.pending_count(&id), 0);
        assert!(coordinator.session().is_none());
    }

    #[test]
    fn test_finish_forgets_attempted_sessions() {
        let mut coordinator = RecoveryCoordinator::new();
        for n in 1..=5u8 {
            let id = SecretId::new(vec![n]);
            coordinator.begin(session(&id, 1));
            coordinator.record(&id, h(1), vec![n]);
            assert!(coordinator.take_ready().is_some());
            coordinator.finish();
            assert_eq!(coordinator.record(&id, h(2), vec![n]), Recorded::NoSession);
        }
        assert!(coordinator.attempted.is_empty());
        assert!(coordinator.pending.is_empty());
    }

    #[test]
    fn test_new_session_allows_another_attempt() {
        let mut coordinator = RecoveryCoordinator::new();
        let id = SecretId::new(vec![4]);
        coordinator.begin(session(&id, 1));
        coordinator.record(&id, h(1), vec![1]);
        assert!(coordinator.take_ready().is_some());
        coordinator.finish();

        coordinator.begin(session(&id, 1));
        coordinator.record(&id, h(2), vec![2]);
        assert!(coordinator.take_ready().is_some());
    }
}
