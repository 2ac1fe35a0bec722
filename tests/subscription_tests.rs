//! Behavior tests for the reconnecting subscription client: end-to-end
//! delivery against a live server, backoff, and teardown semantics.

use actix_web::{web, App, HttpServer};
use campus_notify::auth::{self, SessionKey};
use campus_notify::client::{backoff_delay, Subscription, SubscriptionConfig};
use campus_notify::handlers::subscribe;
use campus_notify::{ConnectionRegistry, UserRole};
use std::time::{Duration, Instant};

const SECRET: &str = "subscription-test-secret";

async fn spawn_server(registry: ConnectionRegistry) -> (actix_web::dev::ServerHandle, u16) {
    spawn_server_on(registry, 0).await
}

async fn spawn_server_on(
    registry: ConnectionRegistry,
    port: u16,
) -> (actix_web::dev::ServerHandle, u16) {
    let key = SessionKey(SECRET.to_string());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(key.clone()))
            .configure(subscribe::register_routes)
    })
    .workers(1)
    .bind(("127.0.0.1", port))
    .expect("bind test server");

    let port = server.addrs()[0].port();
    let server = server.run();
    let handle = server.handle();
    actix_web::rt::spawn(server);
    (handle, port)
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

#[actix_web::test]
async fn test_client_receives_events_end_to_end() {
    let registry = ConnectionRegistry::new();
    let (server, port) = spawn_server(registry.clone()).await;

    let token = auth::issue_token("u1", UserRole::Student, SECRET, chrono::Duration::hours(1))
        .expect("token");
    let config = SubscriptionConfig::new(format!("http://127.0.0.1:{port}"), UserRole::Student, token);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let subscription = Subscription::spawn(config, move |event, payload| {
        let _ = tx.send((event.to_string(), payload));
    });

    {
        let registry = registry.clone();
        wait_until(move || {
            let registry = registry.clone();
            async move { registry.is_user_connected("u1").await }
        })
        .await;
    }
    assert!(subscription.is_connected());

    registry
        .send_to_user(
            "u1",
            "notification",
            &serde_json::json!({"id": "1", "title": "New offer"}),
        )
        .await;

    let (event, payload) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within deadline")
        .expect("callback channel open");
    assert_eq!(event, "notification");
    assert_eq!(payload["id"], "1");
    assert_eq!(payload["title"], "New offer");

    subscription.shutdown().await;
    server.stop(true).await;
}

#[actix_web::test]
async fn test_shutdown_closes_server_side_entry() {
    let registry = ConnectionRegistry::new();
    let (server, port) = spawn_server(registry.clone()).await;

    let token = auth::issue_token("u2", UserRole::Company, SECRET, chrono::Duration::hours(1))
        .expect("token");
    let config = SubscriptionConfig::new(format!("http://127.0.0.1:{port}"), UserRole::Company, token);
    let subscription = Subscription::spawn(config, |_event, _payload| {});

    {
        let registry = registry.clone();
        wait_until(move || {
            let registry = registry.clone();
            async move { registry.is_user_connected("u2").await }
        })
        .await;
    }

    subscription.shutdown().await;

    {
        let registry = registry.clone();
        wait_until(move || {
            let registry = registry.clone();
            async move { !registry.is_user_connected("u2").await }
        })
        .await;
    }
    server.stop(true).await;
}

#[actix_web::test]
async fn test_client_reconnects_after_server_drop() {
    let registry = ConnectionRegistry::new();
    let (server, port) = spawn_server(registry.clone()).await;

    let token = auth::issue_token("u3", UserRole::Student, SECRET, chrono::Duration::hours(1))
        .expect("token");
    let config = SubscriptionConfig::new(format!("http://127.0.0.1:{port}"), UserRole::Student, token);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let subscription = Subscription::spawn(config, move |event, payload| {
        let _ = tx.send((event.to_string(), payload));
    });

    wait_until(|| {
        let up = subscription.is_connected();
        async move { up }
    })
    .await;

    // hard-stop the server so the stream drops mid-flight
    server.stop(false).await;
    wait_until(|| {
        let down = !subscription.is_connected();
        async move { down }
    })
    .await;

    // bring the service back on the same port; the open before the drop
    // reset the retry counter, so the pending delay is the bottom of the
    // backoff sequence and the client is back well before the 30s cap
    let restarted = Instant::now();
    let (server, _) = spawn_server_on(registry.clone(), port).await;
    wait_until(|| {
        let up = subscription.is_connected();
        async move { up }
    })
    .await;
    assert!(restarted.elapsed() < Duration::from_secs(5));

    registry
        .send_to_user("u3", "notification", &serde_json::json!({"id": "2"}))
        .await;
    let (event, payload) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within deadline")
        .expect("callback channel open");
    assert_eq!(event, "notification");
    assert_eq!(payload["id"], "2");

    subscription.shutdown().await;
    server.stop(true).await;
}

#[actix_web::test]
async fn test_dropping_handle_stops_the_task() {
    let registry = ConnectionRegistry::new();
    let (server, port) = spawn_server(registry.clone()).await;

    let token = auth::issue_token("u4", UserRole::Admin, SECRET, chrono::Duration::hours(1))
        .expect("token");
    let config = SubscriptionConfig::new(format!("http://127.0.0.1:{port}"), UserRole::Admin, token);
    let subscription = Subscription::spawn(config, |_event, _payload| {});

    {
        let registry = registry.clone();
        wait_until(move || {
            let registry = registry.clone();
            async move { registry.is_user_connected("u4").await }
        })
        .await;
    }

    // dropping the handle closes the shutdown channel; the task stops and
    // releases its stream, which the server observes as a disconnect
    drop(subscription);

    {
        let registry = registry.clone();
        wait_until(move || {
            let registry = registry.clone();
            async move { !registry.is_user_connected("u4").await }
        })
        .await;
    }
    server.stop(true).await;
}

#[actix_web::test]
async fn test_teardown_cancels_pending_reconnect() {
    // nothing listens here; every attempt fails and the client sits in
    // its backoff sleep between attempts
    let config = SubscriptionConfig::new("http://127.0.0.1:1", UserRole::Student, "token");
    let subscription = Subscription::spawn(config, |_event, _payload| {
        panic!("no events expected");
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!subscription.is_connected());

    // shutdown must interrupt the pending backoff timer promptly
    tokio::time::timeout(Duration::from_secs(5), subscription.shutdown())
        .await
        .expect("shutdown completed");
}

#[test]
fn test_backoff_sequence_matches_contract() {
    let initial = Duration::from_millis(1000);
    let max = Duration::from_millis(30_000);
    let observed: Vec<u64> = (0..7)
        .map(|retry| backoff_delay(retry, initial, max).as_millis() as u64)
        .collect();
    assert_eq!(observed, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
}
