#![allow(clippy::unwrap_used)]
// Online-IP reporting against a mock auditing endpoint.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use panelsync_core::{IpRecorderConfig, NodeConfig, UserIp};

use common::{Harness, ScriptedPanel, quiet_config, ss_node, user};

fn recorder_config(url: &str, timeout: Duration) -> NodeConfig {
    NodeConfig {
        ip_recorder: Some(IpRecorderConfig {
            url: Url::parse(url).unwrap(),
            token: SecretString::from("audit".to_string()),
            periodic: Duration::from_secs(3600),
            timeout,
        }),
        ..quiet_config()
    }
}

/// Start a node with users 1 and 2, each seen from one address.
async fn started_with_ips(config: NodeConfig) -> Harness {
    let panel = ScriptedPanel::new(ss_node("aes-128-gcm"), vec![user("a@x", 1), user("b@x", 2)]);
    let h = Harness::new(config, panel);
    h.controller.start().await.unwrap();

    let tag = h.tag();
    h.limiter.check_device(&tag, &format!("{tag}|a@x|1"), 1, "10.0.0.1");
    h.limiter.check_device(&tag, &format!("{tag}|b@x|2"), 2, "10.0.0.2");
    h
}

async fn setup() -> (MockServer, Harness) {
    let server = MockServer::start().await;
    let h = started_with_ips(recorder_config(&server.uri(), Duration::from_secs(2))).await;
    (server, h)
}

#[tokio::test]
async fn test_sync_replaces_local_state() {
    let (server, h) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/SyncOnlineIp"))
        .and(query_param("token", "audit"))
        .and(body_json(json!([
            { "uid": 1, "ips": ["10.0.0.1"] },
            { "uid": 2, "ips": ["10.0.0.2"] }
        ])))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "uid": 2, "ips": ["10.0.0.2"] }])),
        )
        .expect(1)
        .mount(&server)
        .await;

    h.controller.online_ip_report().await.unwrap();

    assert_eq!(
        h.limiter.online_ips(&h.tag()),
        vec![UserIp { uid: 2, ips: vec!["10.0.0.2".into()] }]
    );
}

#[tokio::test]
async fn test_server_error_clears_local_state() {
    let (server, h) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/SyncOnlineIp"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    assert!(h.controller.online_ip_report().await.is_err());
    assert!(h.limiter.online_ips(&h.tag()).is_empty());
}

#[tokio::test]
async fn test_malformed_answer_clears_local_state() {
    let (server, h) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/SyncOnlineIp"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    assert!(h.controller.online_ip_report().await.is_err());
    assert!(h.limiter.online_ips(&h.tag()).is_empty());
}

#[tokio::test]
async fn test_recorder_keeps_ips_across_user_ticks() {
    let (_server, h) = setup().await;

    h.controller.user_info_monitor().await.unwrap();

    assert_eq!(h.limiter.online_ips(&h.tag()).len(), 2);
}

#[tokio::test]
async fn test_unreachable_recorder_clears_local_state() {
    let h = started_with_ips(recorder_config("http://127.0.0.1:9", Duration::from_secs(2))).await;

    assert!(h.controller.online_ip_report().await.is_err());
    assert!(h.limiter.online_ips(&h.tag()).is_empty());
}

#[tokio::test]
async fn test_slow_recorder_times_out_and_clears_local_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/SyncOnlineIp"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    let h = started_with_ips(recorder_config(&server.uri(), Duration::from_millis(300))).await;

    let started = std::time::Instant::now();
    assert!(h.controller.online_ip_report().await.is_err());
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(h.limiter.online_ips(&h.tag()).is_empty());
}

#[tokio::test]
async fn test_first_sync_follows_update_periodic() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/SyncOnlineIp"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "uid": 2, "ips": ["10.0.0.2"] }])),
        )
        .mount(&server)
        .await;
    // Recorder interval stays at an hour; only the node interval is short.
    let config = NodeConfig {
        update_periodic: Duration::from_millis(200),
        ..recorder_config(&server.uri(), Duration::from_secs(2))
    };
    let h = started_with_ips(config).await;
    let tag = h.tag();

    let mut synced = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if h.limiter.online_ips(&tag).len() == 1 {
            synced = true;
            break;
        }
    }
    assert!(synced, "online IPs not synced within the node interval");
    assert_eq!(
        h.limiter.online_ips(&tag),
        vec![UserIp { uid: 2, ips: vec!["10.0.0.2".into()] }]
    );

    h.controller.close().await.unwrap();
}
