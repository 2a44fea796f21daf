//! Streaming broadcaster behaviour
//!
//! Event ordering, failure termination, abandonment when every subscriber
//! leaves, and pacing under paused time.

mod test_helpers;

use chathub::agent::{AgentError, AgentRole, TokenStream};
use chathub::dispatch::DispatchOutcome;
use chathub::streaming::{BroadcastOutcome, Broadcaster, HubEvent, SessionLanes};
use chathub::testing::{MockAgentFactory, RecordingSink, ScriptedAgent};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{drain, hub_with, subscribe, test_config};

fn tokens(items: Vec<Result<&str, AgentError>>) -> TokenStream {
    stream::iter(
        items
            .into_iter()
            .map(|item| item.map(str::to_string))
            .collect::<Vec<_>>(),
    )
    .boxed()
}

#[tokio::test]
async fn test_mid_stream_failure_ends_with_error_then_completed() {
    let sink = Arc::new(RecordingSink::new());
    let broadcaster = Broadcaster::new(sink.clone());
    let lanes = SessionLanes::default();
    let lane = lanes.acquire("s1").await.unwrap();

    let outcome = broadcaster
        .stream(
            &lane,
            tokens(vec![Ok("Hel"), Err(AgentError::stream("connection reset"))]),
        )
        .await;

    assert!(matches!(outcome, BroadcastOutcome::Failed { .. }));
    let events = sink.events_for("s1");
    assert_eq!(events.len(), 4);
    assert_eq!(events[0], HubEvent::StreamingStarted);
    assert_eq!(events[1], HubEvent::chunk("Hel"));
    assert!(matches!(&events[2], HubEvent::Error { message } if message.contains("connection reset")));
    assert_eq!(events[3], HubEvent::StreamingCompleted);
}

#[tokio::test]
async fn test_stream_is_abandoned_when_subscribers_leave() {
    let sink = Arc::new(RecordingSink::new());
    sink.set_subscribers("s1", 2);
    sink.leave_after_chunks("s1", 1);
    let broadcaster = Broadcaster::new(sink.clone());
    let lane = SessionLanes::default().acquire("s1").await.unwrap();

    let outcome = broadcaster
        .stream(&lane, tokens(vec![Ok("a"), Ok("b"), Ok("c")]))
        .await;

    assert_eq!(outcome, BroadcastOutcome::Abandoned);
    assert_eq!(
        sink.events_for("s1"),
        vec![
            HubEvent::StreamingStarted,
            HubEvent::chunk("a"),
            HubEvent::StreamingCompleted,
        ]
    );
}

#[tokio::test]
async fn test_unwatched_stream_runs_to_completion() {
    let sink = Arc::new(RecordingSink::new());
    let broadcaster = Broadcaster::new(sink.clone());
    let lane = SessionLanes::default().acquire("s1").await.unwrap();

    let outcome = broadcaster
        .stream(&lane, tokens(vec![Ok("a"), Ok("b")]))
        .await;

    assert_eq!(
        outcome,
        BroadcastOutcome::Completed {
            text: "ab".to_string()
        }
    );
}

#[tokio::test]
async fn test_empty_tokens_are_skipped() {
    let sink = Arc::new(RecordingSink::new());
    let broadcaster = Broadcaster::new(sink.clone());
    let lane = SessionLanes::default().acquire("s1").await.unwrap();

    broadcaster
        .stream(&lane, tokens(vec![Ok(""), Ok("x"), Ok("")]))
        .await;

    assert_eq!(
        sink.events_for("s1"),
        vec![
            HubEvent::StreamingStarted,
            HubEvent::chunk("x"),
            HubEvent::final_response("x"),
            HubEvent::StreamingCompleted,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_word_replay_is_paced() {
    let sink = Arc::new(RecordingSink::new());
    let broadcaster = Broadcaster::new(sink.clone());
    let lane = SessionLanes::default().acquire("s1").await.unwrap();

    let started = tokio::time::Instant::now();
    broadcaster
        .replay_words(&lane, "one two three", Duration::from_millis(50), false)
        .await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(150));
    assert_eq!(sink.events_for("s1").len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_chunk_delay_applies_per_chunk() {
    let sink = Arc::new(RecordingSink::new());
    let broadcaster = Broadcaster::new(sink.clone()).with_chunk_delay(Duration::from_millis(10));
    let lane = SessionLanes::default().acquire("s1").await.unwrap();

    let started = tokio::time::Instant::now();
    broadcaster
        .stream(&lane, tokens(vec![Ok("a"), Ok("b"), Ok("c")]))
        .await;

    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn test_every_subscriber_sees_identical_sequence() {
    let factory = MockAgentFactory::new().with_agent(
        AgentRole::Primary,
        ScriptedAgent::new("TutorAgent").with_tokens(["c1", "c2", "c3"]),
    );
    let (hub, _factory) = hub_with(factory, &test_config());
    let mut first = subscribe(&hub, "s1");
    let mut second = subscribe(&hub, "s1");
    let mut outsider = subscribe(&hub, "s2");

    hub.process_message("go", "s1", Some("direct-primary"))
        .await
        .unwrap();

    let expected = vec![
        HubEvent::StreamingStarted,
        HubEvent::chunk("c1"),
        HubEvent::chunk("c2"),
        HubEvent::chunk("c3"),
        HubEvent::final_response("c1c2c3"),
        HubEvent::StreamingCompleted,
    ];
    assert_eq!(drain(&mut first), expected);
    assert_eq!(drain(&mut second), expected);
    assert!(drain(&mut outsider).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_mid_stream_abandons_broadcast() {
    let factory = MockAgentFactory::new().with_agent(
        AgentRole::Primary,
        ScriptedAgent::new("TutorAgent")
            .with_tokens(["a", "b", "c", "d"])
            .with_token_delay(Duration::from_millis(20)),
    );
    let (hub, _factory) = hub_with(factory, &test_config());
    let (connection, mut rx) = hub.connect();
    hub.join_session(connection, "s1").unwrap();

    let task = {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move { hub.process_message("go", "s1", Some("direct-primary")).await })
    };

    assert_eq!(rx.recv().await.unwrap().event, HubEvent::StreamingStarted);
    assert_eq!(rx.recv().await.unwrap().event, HubEvent::chunk("a"));
    hub.disconnect(connection);

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome, DispatchOutcome::Streamed(BroadcastOutcome::Abandoned));
}
