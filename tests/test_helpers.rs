//! Test helpers and utilities for integration tests

use chathub::config::HubConfig;
use chathub::hub::ChatHub;
use chathub::streaming::{BusyPolicy, HubEvent, HubMessage};
use chathub::testing::MockAgentFactory;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Hub configuration with pacing disabled
#[allow(dead_code)]
pub fn test_config() -> HubConfig {
    let mut config = HubConfig::default();
    config.server.port = 0;
    config.handoff.word_pacing_ms = 0;
    config.streaming.busy_policy = BusyPolicy::Queue;
    config
}

/// Build a hub over `factory`, keeping a handle on the factory
#[allow(dead_code)]
pub fn hub_with(factory: MockAgentFactory, config: &HubConfig) -> (Arc<ChatHub>, Arc<MockAgentFactory>) {
    let factory = Arc::new(factory);
    let hub = ChatHub::new(config, factory.clone()).expect("test config is valid");
    (Arc::new(hub), factory)
}

/// Connect a client and join it to `session_id`
#[allow(dead_code)]
pub fn subscribe(hub: &ChatHub, session_id: &str) -> UnboundedReceiver<HubMessage> {
    let (connection, rx) = hub.connect();
    hub.join_session(connection, session_id)
        .expect("connection is registered");
    rx
}

/// Everything already delivered to a receiver
#[allow(dead_code)]
pub fn drain(rx: &mut UnboundedReceiver<HubMessage>) -> Vec<HubEvent> {
    let mut events = Vec::new();
    while let Ok(message) = rx.try_recv() {
        events.push(message.event);
    }
    events
}

/// Count events of one kind
#[allow(dead_code)]
pub fn count(events: &[HubEvent], name: &str) -> usize {
    events.iter().filter(|event| event.name() == name).count()
}
