//! End-to-end tests for the connection manager against in-process servers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use ems::server::handlers::{
    AboutHandler, HelpHandler, ListActiveHandler, ListSubscribedHandler, SubscribeHandler,
    UnsubscribeHandler, WhoHandler,
};
use ems::server::{ChannelRegistry, CommandTable, Server, ServerConfig, ServerHandle};
use ems::{ConnectionEvent, ConnectionManager, Error};

const WAIT: Duration = Duration::from_secs(5);

async fn start_server() -> ServerHandle {
    Server::start(ServerConfig::new("127.0.0.1", 0)).await.unwrap()
}

/// A server that understands subscriptions but lacks `omit`.
async fn start_server_without(omit: &str) -> ServerHandle {
    let mut commands = CommandTable::new();
    commands.register(WhoHandler);
    commands.register(HelpHandler);
    commands.register(SubscribeHandler);
    commands.register(UnsubscribeHandler);
    commands.register(ListSubscribedHandler);
    if omit != "ABOUT" {
        commands.register(AboutHandler);
    }
    if omit != "LIST_ACTIVE" {
        commands.register(ListActiveHandler);
    }
    Server::bind_with_commands(
        ServerConfig::new("127.0.0.1", 0),
        Arc::new(ChannelRegistry::new()),
        commands,
    )
    .await
    .unwrap()
    .spawn()
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

fn manager() -> ConnectionManager {
    ConnectionManager::with_timeout(WAIT)
}

async fn next_event(events: &mut UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

/// Skip events until one matches.
async fn wait_for<F>(events: &mut UnboundedReceiver<ConnectionEvent>, mut pred: F) -> ConnectionEvent
where
    F: FnMut(&ConnectionEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

async fn assert_quiet(events: &mut UnboundedReceiver<ConnectionEvent>) {
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(events.try_recv().is_err());
}

async fn connect(manager: &ConnectionManager, addr: SocketAddr) {
    manager.connect("127.0.0.1", addr.port()).await.unwrap();
}

#[tokio::test]
async fn test_connect_reports_channel_list_then_connected() {
    let server = start_server().await;
    let manager = manager();
    let mut events = manager.events();

    connect(&manager, server.local_addr()).await;

    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::ChannelList {
            active: vec![],
            subscribed: vec![],
        }
    );
    match next_event(&mut events).await {
        ConnectionEvent::Connected {
            host,
            port,
            server_version,
            client_id,
        } => {
            assert_eq!(host, "127.0.0.1");
            assert_eq!(port, server.local_addr().port());
            assert!(server_version.starts_with("EMS server"));
            assert_eq!(client_id, "client-1");
        }
        other => panic!("expected Connected, got {:?}", other),
    }
    assert!(manager.is_connected().await);

    manager.disconnect().await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_subscribe_normalizes_names() {
    let server = start_server().await;
    let manager = manager();
    connect(&manager, server.local_addr()).await;
    let mut events = manager.events();

    manager.subscribe(&["Sports", "news"]).await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::ChannelSubscribed("SPORTS".to_string())
    );
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::ChannelSubscribed("NEWS".to_string())
    );
    let both = vec!["NEWS".to_string(), "SPORTS".to_string()];
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::ChannelList {
            active: both.clone(),
            subscribed: both,
        }
    );

    manager.unsubscribe(&["sports"]).await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::ChannelUnsubscribed("SPORTS".to_string())
    );
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::ChannelList {
            active: vec!["NEWS".to_string()],
            subscribed: vec!["NEWS".to_string()],
        }
    );

    manager.disconnect().await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_message_between_managers() {
    let server = start_server().await;
    let addr = server.local_addr();

    let listener = manager();
    connect(&listener, addr).await;
    listener.subscribe(&["NEWS"]).await.unwrap();
    let mut heard = listener.events();

    let sender = manager();
    connect(&sender, addr).await;
    let mut sent = sender.events();

    sender.send_message("Extra! Extra!", &["news"]).await.unwrap();

    assert_eq!(
        next_event(&mut heard).await,
        ConnectionEvent::ChannelMessage {
            channel: "NEWS".to_string(),
            message: "Extra! Extra!".to_string(),
        }
    );
    assert_quiet(&mut sent).await;

    sender.disconnect().await;
    listener.disconnect().await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_fires_once() {
    let server = start_server().await;
    let manager = manager();
    connect(&manager, server.local_addr()).await;
    let mut events = manager.events();

    manager.disconnect().await;
    manager.disconnect().await;

    assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
    assert_quiet(&mut events).await;
    assert!(!manager.is_connected().await);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_ends_previous_session() {
    let first = start_server().await;
    let second = start_server().await;
    let manager = manager();
    connect(&manager, first.local_addr()).await;
    let mut events = manager.events();

    connect(&manager, second.local_addr()).await;

    assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
    let connected = wait_for(&mut events, |e| matches!(e, ConnectionEvent::Connected { .. })).await;
    assert!(matches!(
        connected,
        ConnectionEvent::Connected { port, .. } if port == second.local_addr().port()
    ));

    manager.disconnect().await;
    first.stop().await.unwrap();
    second.stop().await.unwrap();
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let server = start_server().await;
    let port = server.local_addr().port();
    server.stop().await.unwrap();

    let manager = manager();
    let mut events = manager.events();

    let result = manager.connect("127.0.0.1", port).await;
    assert!(matches!(result, Err(Error::Client(_))));

    match next_event(&mut events).await {
        ConnectionEvent::ConnectionError(text) => assert!(text.starts_with("Unable to connect")),
        other => panic!("expected ConnectionError, got {:?}", other),
    }
    assert_quiet(&mut events).await;
    assert!(!manager.is_connected().await);
}

#[tokio::test]
async fn test_local_server_lifecycle() {
    let manager = manager();
    let mut events = manager.events();

    let addr = manager.start_local_server("127.0.0.1", 0).await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::LocalServerStarted {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
        }
    );
    assert!(manager.is_local_server_running().await);
    assert_eq!(
        manager.local_server_address().await,
        Some(("127.0.0.1".to_string(), addr.port()))
    );

    manager.stop_local_server().await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::LocalServerStopped);
    assert!(!manager.is_local_server_running().await);
}

#[tokio::test]
async fn test_stopping_local_server_disconnects() {
    let manager = manager();
    let addr = manager.start_local_server("127.0.0.1", 0).await.unwrap();
    connect(&manager, addr).await;
    let mut events = manager.events();

    manager.stop_local_server().await;

    assert_eq!(next_event(&mut events).await, ConnectionEvent::LocalServerStopped);
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
    assert_quiet(&mut events).await;
    assert!(!manager.is_connected().await);
}

#[tokio::test]
async fn test_disconnect_stops_local_server() {
    let manager = manager();
    let addr = manager.start_local_server("127.0.0.1", 0).await.unwrap();
    connect(&manager, addr).await;
    let mut events = manager.events();

    manager.disconnect().await;

    assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
    assert_eq!(next_event(&mut events).await, ConnectionEvent::LocalServerStopped);
    assert!(!manager.is_local_server_running().await);
}

#[tokio::test]
async fn test_remote_server_stop_disconnects() {
    let server = start_server().await;
    let manager = manager();
    connect(&manager, server.local_addr()).await;
    let mut events = manager.events();

    server.stop().await.unwrap();

    assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
    assert_quiet(&mut events).await;
    assert!(manager.subscribe(&["NEWS"]).await.is_err());
}

#[tokio::test]
async fn test_failed_initial_refresh_reports_error_instead_of_connected() {
    let server = start_server_without("LIST_ACTIVE").await;
    let manager = manager();
    let mut events = manager.events();

    let result = manager.connect("127.0.0.1", server.local_addr().port()).await;
    assert!(matches!(result, Err(Error::Query { ref verb, .. }) if verb == "LIST_ACTIVE"));

    match next_event(&mut events).await {
        ConnectionEvent::ConnectionError(text) => {
            assert!(text.starts_with("Failed to retrieve channel list"))
        }
        other => panic!("expected ConnectionError, got {:?}", other),
    }
    assert_quiet(&mut events).await;
    assert!(!manager.is_connected().await);
    wait_until(|| server.state().clients.is_empty()).await;

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_server_query_reports_error_instead_of_connected() {
    let server = start_server_without("ABOUT").await;
    let manager = manager();
    let mut events = manager.events();

    let result = manager.connect("127.0.0.1", server.local_addr().port()).await;
    assert!(matches!(result, Err(Error::Query { ref verb, .. }) if verb == "ABOUT"));

    match next_event(&mut events).await {
        ConnectionEvent::ConnectionError(text) => assert!(text.starts_with("Unable to query server")),
        other => panic!("expected ConnectionError, got {:?}", other),
    }
    assert_quiet(&mut events).await;
    assert!(!manager.is_connected().await);
    wait_until(|| server.state().clients.is_empty()).await;

    server.stop().await.unwrap();
}
