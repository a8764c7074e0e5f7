//! Integration tests for the Axum HTTP surface, run against
//! an in-memory SQLite database with the real embedded migrations.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;

use streamtv_core::channel::ChannelManager;
use streamtv_core::config::Config;
use streamtv_core::db::{run_migrations, DbPool};
use streamtv_core::server::{routes::create_router, AppState};

fn test_pool() -> DbPool {
    let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
    let pool: DbPool = Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("failed to build test pool");

    let mut conn = pool.get().expect("failed to get connection");
    run_migrations(&mut conn).expect("failed to run migrations");
    pool
}

fn seed_channel(pool: &DbPool, number: &str, name: &str) {
    let mut conn = pool.get().expect("connection");
    diesel::sql_query(
        "INSERT INTO channels (number, name, enabled, playout_mode) VALUES (?, ?, 1, 'CONTINUOUS')",
    )
    .bind::<diesel::sql_types::Text, _>(number)
    .bind::<diesel::sql_types::Text, _>(name)
    .execute(&mut conn)
    .expect("seed channel");
}

fn test_app_state(pool: DbPool) -> AppState {
    let config = Arc::new(Config::default());
    let manager = ChannelManager::new(pool.clone(), config.clone());
    AppState::new(pool, config, manager)
}

async fn start_test_server(pool: DbPool) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let state = test_app_state(pool);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind to port");
    let addr = listener.local_addr().expect("failed to get local address");

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server error");
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, handle)
}

#[tokio::test]
async fn health_endpoint_returns_200() {
    let (addr, _handle) = start_test_server(test_pool()).await;

    let response = reqwest::get(format!("http://{addr}/health"))
        .await
        .expect("request failed");

    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let (addr, _handle) = start_test_server(test_pool()).await;

    let response = reqwest::get(format!("http://{addr}/nonexistent"))
        .await
        .expect("request failed");

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn discover_json_reports_configured_hdhr_fields() {
    let (addr, _handle) = start_test_server(test_pool()).await;

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/discover.json"))
        .await
        .expect("request failed")
        .json()
        .await
        .expect("invalid json");

    assert_eq!(body["DeviceAuth"], "streamtv");
    assert!(body["LineupURL"].as_str().unwrap().ends_with("/lineup.json"));
}

#[tokio::test]
async fn lineup_m3u_and_xmltv_agree_on_enabled_channel_count() {
    let pool = test_pool();
    seed_channel(&pool, "2000", "2000's Movies");
    seed_channel(&pool, "5", "5-News");
    let (addr, _handle) = start_test_server(pool).await;

    let lineup: Vec<serde_json::Value> = reqwest::get(format!("http://{addr}/lineup.json"))
        .await
        .expect("lineup request failed")
        .json()
        .await
        .expect("invalid json");
    assert_eq!(lineup.len(), 2);
    assert_eq!(lineup[0]["GuideNumber"], "2000");
    assert_eq!(lineup[0]["GuideName"], "Movies");

    let m3u = reqwest::get(format!("http://{addr}/iptv/channels.m3u"))
        .await
        .expect("m3u request failed")
        .text()
        .await
        .expect("invalid body");
    assert_eq!(m3u.matches("#EXTINF").count(), 2);

    let xmltv = reqwest::get(format!("http://{addr}/iptv/xmltv.xml"))
        .await
        .expect("xmltv request failed")
        .text()
        .await
        .expect("invalid body");
    assert_eq!(xmltv.matches("<channel ").count(), 2);
}

#[tokio::test]
async fn server_handles_concurrent_requests() {
    let (addr, _handle) = start_test_server(test_pool()).await;

    let requests = (0..10).map(|_| reqwest::get(format!("http://{addr}/health")));
    let responses = futures::future::join_all(requests).await;

    for response in responses {
        assert_eq!(response.expect("request failed").status(), 200);
    }
}
