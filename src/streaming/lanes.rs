//! Per-session exclusivity
//!
//! At most one broadcast or handoff run is in flight per session. A
//! [`SessionLane`] is the proof that the holder owns the session's lane; it
//! is released when dropped.

use crate::error::{HubError, HubResult};
use crate::observability::metrics;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// What to do with a message that arrives while the session is busy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Wait behind the in-flight response, in arrival order
    #[default]
    Queue,
    /// Fail immediately with `SessionBusy`
    Reject,
}

/// Exclusive right to stream to one session
#[derive(Debug)]
pub struct SessionLane {
    session_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl SessionLane {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Hands out one lane per session at a time
pub struct SessionLanes {
    policy: BusyPolicy,
    lanes: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLanes {
    pub fn new(policy: BusyPolicy) -> Self {
        Self {
            policy,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, session_id: &str) -> HubResult<SessionLane> {
        let lane = self.lane(session_id);

        let guard = match self.policy {
            BusyPolicy::Queue => lane.lock_owned().await,
            BusyPolicy::Reject => lane.try_lock_owned().map_err(|_| {
                debug!(session_id, "Rejecting message for busy session");
                metrics().busy_rejected();
                HubError::session_busy(session_id)
            })?,
        };

        Ok(SessionLane {
            session_id: session_id.to_string(),
            _guard: guard,
        })
    }

    /// True while a lane for the session is held
    pub fn is_busy(&self, session_id: &str) -> bool {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map(|lane| lane.try_lock().is_err())
            .unwrap_or(false)
    }

    fn lane(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(lanes.entry(session_id.to_string()).or_default())
    }
}

impl Default for SessionLanes {
    fn default() -> Self {
        Self::new(BusyPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reject_policy_fails_while_held() {
        let lanes = SessionLanes::new(BusyPolicy::Reject);

        let held = lanes.acquire("s1").await.unwrap();
        assert!(lanes.is_busy("s1"));
        assert!(matches!(
            lanes.acquire("s1").await,
            Err(HubError::SessionBusy { .. })
        ));

        // Other sessions are unaffected
        assert!(lanes.acquire("s2").await.is_ok());

        drop(held);
        assert!(!lanes.is_busy("s1"));
        assert!(lanes.acquire("s1").await.is_ok());
    }

    #[tokio::test]
    async fn test_queue_policy_waits_for_release() {
        let lanes = Arc::new(SessionLanes::new(BusyPolicy::Queue));
        let held = lanes.acquire("s1").await.unwrap();

        let waiter = {
            let lanes = Arc::clone(&lanes);
            tokio::spawn(async move { lanes.acquire("s1").await.map(|lane| lane.session_id().to_string()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap().unwrap(), "s1");
    }

    #[test]
    fn test_busy_policy_serde() {
        let policy: BusyPolicy = serde_json::from_str("\"reject\"").unwrap();
        assert_eq!(policy, BusyPolicy::Reject);
        assert_eq!(BusyPolicy::default(), BusyPolicy::Queue);
    }
}
