//! State machine driven against scripted control plane connections

mod common;

use std::time::Duration;

use common::{fixture, gateway, healthy, Script};
use tokio_util::sync::CancellationToken;
use wardgate_agent::{AgentConfig, Event, RuntimeConfig, State, StateMachine, SyncError};
use wardgate_proto::AgentState;

fn config(threshold: u32) -> AgentConfig {
    AgentConfig {
        retry_warning_threshold: threshold,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_login_reaches_connected_and_applies_gateways() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let f = fixture(
        config(10),
        Some("token"),
        vec![Script::Stream(vec![healthy(vec![gateway("gw-1")])])],
    );
    let (machine, handle) = StateMachine::new(f.ctx.clone());
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(machine.run(shutdown.clone()));

    handle.login().await.unwrap();
    let status = common::wait_for_status(handle.status_fanout(), |s| {
        s.connection_state == AgentState::Connected && !s.gateways.is_empty()
    })
    .await;

    assert_eq!(status.gateways[0].name, "gw-1");
    assert!(status.connected_since.is_some());
    assert_eq!(f.network.last_peers(), vec!["control-plane", "gw-1"]);
    assert!(f.runtime.enrollment().is_some());

    shutdown.cancel();
    task.await.unwrap();
    // Leaving Connected releases the tunnel
    assert_eq!(f.network.teardowns(), 1);
}

#[tokio::test]
async fn test_unavailable_warns_once_then_recovers() {
    let mut scripts: Vec<Script> = (0..6)
        .map(|_| Script::DialError(SyncError::Unavailable("refused".to_string())))
        .collect();
    scripts.push(Script::Stream(vec![healthy(vec![gateway("gw-1")])]));

    let f = fixture(config(3), Some("token"), scripts);
    let (machine, handle) = StateMachine::new(f.ctx.clone());
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(machine.run(shutdown.clone()));

    handle.login().await.unwrap();
    common::wait_for_status(handle.status_fanout(), |s| !s.gateways.is_empty()).await;

    assert_eq!(f.dialer.dials(), 7);
    let warnings = f.notifier.warnings();
    assert_eq!(warnings.len(), 1, "warnings: {:?}", warnings);
    assert!(warnings[0].contains("3 attempts"));
    assert!(f
        .notifier
        .notes()
        .contains(&common::Note::Info("Connection to the control plane restored".to_string())));

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_lost_connection_reconnects_without_warning() {
    let scripts = vec![
        Script::Stream(vec![
            healthy(vec![gateway("gw-1")]),
            Err(SyncError::LostConnection("reset by peer".to_string())),
        ]),
        Script::Stream(vec![healthy(vec![gateway("gw-1"), gateway("gw-2")])]),
    ];

    let f = fixture(config(1), Some("token"), scripts);
    let (machine, handle) = StateMachine::new(f.ctx.clone());
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(machine.run(shutdown.clone()));

    handle.login().await.unwrap();
    common::wait_for_status(handle.status_fanout(), |s| s.gateways.len() == 2).await;

    assert_eq!(f.dialer.dials(), 2);
    assert!(f.notifier.warnings().is_empty());
    // The session from the first login is reused
    assert!(f.runtime.session().is_some());

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_unauthenticated_forgets_token_and_disconnects() {
    let scripts = vec![Script::LoginError(SyncError::Unauthenticated(
        "token expired".to_string(),
    ))];

    let f = fixture(config(10), Some("token"), scripts);
    let (machine, handle) = StateMachine::new(f.ctx.clone());
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(machine.run(shutdown.clone()));

    handle.login().await.unwrap();
    common::eventually(|| !f.notifier.errors().is_empty()).await;
    common::wait_for_status(handle.status_fanout(), |s| {
        s.connection_state == AgentState::Disconnected
    })
    .await;

    assert!(f.runtime.token().is_none());
    assert!(f.runtime.session().is_none());
    assert!(f.notifier.errors()[0].contains("log in again"));

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_deadline_idles_in_connected() {
    let scripts = vec![Script::Stream(vec![
        healthy(vec![gateway("gw-1")]),
        Err(SyncError::DeadlineExceeded),
    ])];

    let f = fixture(config(10), Some("token"), scripts);
    let (mut machine, _handle) = StateMachine::new(f.ctx.clone());

    machine.handle_event(Event::Login).await.unwrap();
    common::eventually(|| f.runtime.token().is_some()).await;
    machine.handle_event(Event::Authenticated).await.unwrap();
    common::eventually(|| f.runtime.enrollment().is_some()).await;
    machine.handle_event(Event::Bootstrapped).await.unwrap();
    assert_eq!(machine.state(), State::Connected);

    common::eventually(|| f.network.teardowns() == 1).await;
    common::eventually(|| f.ctx.status.current().connected_since.is_none()).await;
    assert!(f.ctx.status.current().gateways.is_empty());
    assert_eq!(f.dialer.dials(), 1);
    assert!(f.notifier.errors().is_empty());
    // Still Connected, waiting for the user
    assert_eq!(machine.state(), State::Connected);
    assert!(machine
        .handle_event(Event::WaitForExternalEvent)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_auto_connect_only_once() {
    let f = fixture(
        AgentConfig {
            auto_connect: true,
            ..Default::default()
        },
        None,
        Vec::new(),
    );
    let (machine, handle) = StateMachine::new(f.ctx.clone());
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(machine.run(shutdown.clone()));

    // No token: the automatic login fails and lands back in Disconnected
    common::eventually(|| f.notifier.errors().len() == 1).await;
    common::wait_for_status(handle.status_fanout(), |s| {
        s.connection_state == AgentState::Disconnected
    })
    .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(f.notifier.errors().len(), 1);
    assert_eq!(f.dialer.dials(), 0);

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_undeclared_event_is_rejected() {
    let f = fixture(config(10), None, Vec::new());
    let (mut machine, _handle) = StateMachine::new(f.ctx.clone());

    assert!(machine.handle_event(Event::Bootstrapped).await.is_err());
    assert_eq!(machine.state(), State::Disconnected);
}
