//! Session registry
//!
//! Each session id owns one agent per configured role. The first message for
//! an unseen id initializes every agent exactly once, no matter how many
//! messages arrive concurrently; later reads go straight to the populated
//! cell without touching the initialization path.

use crate::agent::{Agent, AgentError, AgentIdentity, AgentProfile, AgentRole};
use crate::error::{HubError, HubResult};
use crate::observability::metrics;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Builds the agent instance for one role of one session
pub trait AgentFactory: Send + Sync {
    fn create(
        &self,
        session_id: &str,
        role: AgentRole,
        profile: &AgentProfile,
    ) -> Result<Arc<dyn Agent>, AgentError>;
}

/// An agent bound to a session under a role
#[derive(Clone)]
pub struct AgentBinding {
    pub session_id: String,
    pub role: AgentRole,
    pub agent: Arc<dyn Agent>,
}

impl std::fmt::Debug for AgentBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBinding")
            .field("session_id", &self.session_id)
            .field("role", &self.role)
            .field("identity", &self.agent.identity())
            .finish()
    }
}

/// The fully initialized agents of one session
pub struct SessionAgents {
    session_id: String,
    agents: BTreeMap<AgentRole, Arc<dyn Agent>>,
}

impl std::fmt::Debug for SessionAgents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAgents")
            .field("session_id", &self.session_id)
            .field("roles", &self.agents.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SessionAgents {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn binding(&self, role: AgentRole) -> HubResult<AgentBinding> {
        self.agents
            .get(&role)
            .map(|agent| AgentBinding {
                session_id: self.session_id.clone(),
                role,
                agent: Arc::clone(agent),
            })
            .ok_or_else(|| HubError::agent_not_found(&self.session_id, role))
    }

    pub fn roles(&self) -> impl Iterator<Item = AgentRole> + '_ {
        self.agents.keys().copied()
    }

    /// Role of the bound agent answering to `identity`
    pub fn role_of(&self, identity: &AgentIdentity) -> Option<AgentRole> {
        self.agents
            .iter()
            .find(|(_, agent)| agent.identity() == *identity)
            .map(|(role, _)| *role)
    }

    pub fn identity_of(&self, role: AgentRole) -> Option<AgentIdentity> {
        self.agents.get(&role).map(|agent| agent.identity())
    }
}

/// Agents built during an initialization that has not finished yet.
///
/// Dropped while still holding agents (the initializing future was
/// cancelled), it releases them on the current runtime.
struct PendingAgents {
    session_id: String,
    agents: Vec<(AgentRole, Arc<dyn Agent>)>,
}

impl PendingAgents {
    fn new(session_id: &str, capacity: usize) -> Self {
        Self {
            session_id: session_id.to_string(),
            agents: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, role: AgentRole, agent: Arc<dyn Agent>) {
        self.agents.push((role, agent));
    }

    async fn release_all(&mut self) {
        for (_, agent) in self.agents.drain(..) {
            agent.release().await;
        }
    }

    fn bind(mut self) -> BTreeMap<AgentRole, Arc<dyn Agent>> {
        std::mem::take(&mut self.agents).into_iter().collect()
    }
}

impl Drop for PendingAgents {
    fn drop(&mut self) {
        if self.agents.is_empty() {
            return;
        }

        let agents = std::mem::take(&mut self.agents);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(
                    session_id = %self.session_id,
                    agents = agents.len(),
                    "Initialization cancelled, releasing built agents"
                );
                handle.spawn(async move {
                    for (_, agent) in agents {
                        agent.release().await;
                    }
                });
            }
            Err(_) => {
                warn!(
                    session_id = %self.session_id,
                    agents = agents.len(),
                    "Initialization cancelled outside a runtime, agents not released"
                );
            }
        }
    }
}

#[derive(Default)]
struct SessionSlot {
    agents: OnceCell<Arc<SessionAgents>>,
}

/// Owns every session's agent bindings
pub struct SessionRegistry {
    factory: Arc<dyn AgentFactory>,
    profiles: BTreeMap<AgentRole, AgentProfile>,
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
    initializations: AtomicUsize,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn AgentFactory>, profiles: BTreeMap<AgentRole, AgentProfile>) -> Self {
        Self {
            factory,
            profiles,
            sessions: RwLock::new(HashMap::new()),
            initializations: AtomicUsize::new(0),
        }
    }

    /// Initialize the session's agents if needed and return them.
    ///
    /// Concurrent callers for the same unseen id share one initialization.
    /// A failed initialization leaves the session uninitialized so the next
    /// call tries again.
    pub async fn ensure_initialized(&self, session_id: &str) -> HubResult<Arc<SessionAgents>> {
        let slot = self.slot(session_id);
        if let Some(agents) = slot.agents.get() {
            return Ok(Arc::clone(agents));
        }

        slot.agents
            .get_or_try_init(|| self.initialize_session(session_id))
            .await
            .map(Arc::clone)
    }

    /// Binding for `role`, only if the session is already initialized
    pub fn get(&self, session_id: &str, role: AgentRole) -> HubResult<AgentBinding> {
        self.initialized(session_id)
            .ok_or_else(|| HubError::agent_not_found(session_id, role))?
            .binding(role)
    }

    pub fn is_initialized(&self, session_id: &str) -> bool {
        self.initialized(session_id).is_some()
    }

    /// Number of session ids seen so far
    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of initialization sequences that completed successfully
    pub fn initialization_count(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }

    fn initialized(&self, session_id: &str) -> Option<Arc<SessionAgents>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(session_id)
            .and_then(|slot| slot.agents.get().cloned())
    }

    fn slot(&self, session_id: &str) -> Arc<SessionSlot> {
        if let Some(slot) = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
        {
            return Arc::clone(slot);
        }

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sessions.entry(session_id.to_string()).or_default())
    }

    async fn initialize_session(&self, session_id: &str) -> HubResult<Arc<SessionAgents>> {
        debug!(session_id, roles = self.profiles.len(), "Initializing session agents");

        let mut built = PendingAgents::new(session_id, self.profiles.len());
        for (&role, profile) in &self.profiles {
            let result = match self.factory.create(session_id, role, profile) {
                Ok(agent) => {
                    built.push(role, Arc::clone(&agent));
                    agent.initialize(profile).await
                }
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                warn!(session_id, %role, error = %e, "Session initialization failed");
                built.release_all().await;
                metrics().session_initialization_failed();
                return Err(HubError::initialization(session_id, role, e.to_string()));
            }
        }

        self.initializations.fetch_add(1, Ordering::SeqCst);
        metrics().session_initialized();
        let agents = built.bind();
        info!(session_id, agents = agents.len(), "Session initialized");

        Ok(Arc::new(SessionAgents {
            session_id: session_id.to_string(),
            agents,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{MockAgentFactory, ScriptedAgent};

    fn profiles() -> BTreeMap<AgentRole, AgentProfile> {
        AgentRole::ALL
            .into_iter()
            .map(|role| (role, AgentProfile::new(role.as_str(), "", "")))
            .collect()
    }

    #[tokio::test]
    async fn test_get_before_initialization_is_not_found() {
        let registry = SessionRegistry::new(Arc::new(MockAgentFactory::new()), profiles());
        let result = registry.get("s1", AgentRole::Primary);
        assert!(matches!(result, Err(HubError::AgentNotFound { .. })));
        assert!(!registry.is_initialized("s1"));
    }

    #[tokio::test]
    async fn test_initializes_every_configured_role() {
        let registry = SessionRegistry::new(Arc::new(MockAgentFactory::new()), profiles());

        let agents = registry.ensure_initialized("s1").await.unwrap();
        assert_eq!(agents.roles().count(), 3);
        assert_eq!(agents.session_id(), "s1");

        let binding = registry.get("s1", AgentRole::Secondary).unwrap();
        assert_eq!(binding.role, AgentRole::Secondary);
        assert_eq!(binding.agent.identity().as_str(), "secondary");
        assert_eq!(
            agents.role_of(&AgentIdentity::new("auxiliary")),
            Some(AgentRole::Auxiliary)
        );
    }

    #[tokio::test]
    async fn test_second_call_reuses_bindings() {
        let factory = Arc::new(MockAgentFactory::new());
        let registry = SessionRegistry::new(factory.clone(), profiles());

        let first = registry.ensure_initialized("s1").await.unwrap();
        let second = registry.ensure_initialized("s1").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.initialization_count(), 1);
        assert_eq!(factory.created_count(), 3);
    }

    #[tokio::test]
    async fn test_sessions_do_not_share_agents() {
        let registry = SessionRegistry::new(Arc::new(MockAgentFactory::new()), profiles());

        registry.ensure_initialized("a").await.unwrap();
        registry.ensure_initialized("b").await.unwrap();

        let a = registry.get("a", AgentRole::Primary).unwrap();
        let b = registry.get("b", AgentRole::Primary).unwrap();
        assert!(!Arc::ptr_eq(&a.agent, &b.agent));
        assert_eq!(registry.session_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_initialization_releases_and_allows_retry() {
        let factory = Arc::new(MockAgentFactory::new());
        factory.fail_initialization_once(AgentRole::Secondary);
        let registry = SessionRegistry::new(factory.clone(), profiles());

        let error = registry.ensure_initialized("s1").await.unwrap_err();
        assert!(matches!(
            error,
            HubError::Initialization {
                role: AgentRole::Secondary,
                ..
            }
        ));
        assert!(!registry.is_initialized("s1"));
        assert_eq!(factory.released_count(), 2);

        registry.ensure_initialized("s1").await.unwrap();
        assert!(registry.is_initialized("s1"));
        assert_eq!(registry.initialization_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_initialization_releases_built_agents() {
        let factory = Arc::new(MockAgentFactory::new().with_agent(
            AgentRole::Secondary,
            ScriptedAgent::new("quiz").with_init_delay(std::time::Duration::from_secs(10)),
        ));
        let registry = Arc::new(SessionRegistry::new(factory.clone(), profiles()));

        let init = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.ensure_initialized("s1").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(factory.created_count(), 2);

        init.abort();
        assert!(init.await.unwrap_err().is_cancelled());
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;

        assert_eq!(factory.released_count(), 2);
        assert!(!registry.is_initialized("s1"));
        assert_eq!(registry.initialization_count(), 0);
    }

    #[test]
    fn test_session_agents_debug_lists_roles() {
        let mut agents: BTreeMap<AgentRole, Arc<dyn Agent>> = BTreeMap::new();
        agents.insert(AgentRole::Primary, Arc::new(ScriptedAgent::new("tutor")));
        let session = SessionAgents {
            session_id: "s1".to_string(),
            agents,
        };

        let rendered = format!("{session:?}");
        assert!(rendered.contains("s1"));
        assert!(rendered.contains("Primary"));
    }

    #[tokio::test]
    async fn test_factory_error_surfaces_as_initialization_error() {
        let factory = Arc::new(MockAgentFactory::new());
        factory.fail_creation(AgentRole::Primary);
        let registry = SessionRegistry::new(factory.clone(), profiles());

        let error = registry.ensure_initialized("s1").await.unwrap_err();
        assert!(matches!(
            error,
            HubError::Initialization {
                role: AgentRole::Primary,
                ..
            }
        ));
        assert_eq!(factory.released_count(), 0);
    }

    #[tokio::test]
    async fn test_only_configured_roles_are_bound() {
        let mut only_aux = BTreeMap::new();
        only_aux.insert(AgentRole::Auxiliary, AgentProfile::new("helper", "", ""));
        let factory = Arc::new(MockAgentFactory::new().with_agent(
            AgentRole::Auxiliary,
            ScriptedAgent::new("helper").with_tokens(["hi"]),
        ));
        let registry = SessionRegistry::new(factory, only_aux);

        let agents = registry.ensure_initialized("s1").await.unwrap();
        assert!(agents.binding(AgentRole::Auxiliary).is_ok());
        assert!(matches!(
            agents.binding(AgentRole::Primary),
            Err(HubError::AgentNotFound { .. })
        ));
    }
}
