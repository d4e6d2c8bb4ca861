//! WebSocket integration tests

use approvals::catalog::default_catalog;
use approvals::directory::{DirectorySeed, InMemoryDirectory, Person};
use approvals::AppState;
use futures::{SinkExt, StreamExt};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn person(id: &str, roles: &[&str]) -> Person {
    Person {
        id: id.to_string(),
        name: id.to_string(),
        email: format!("{}@example.com", id),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        active: true,
    }
}

async fn setup_server() -> SocketAddr {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let directory = InMemoryDirectory::from_seed(DirectorySeed {
        persons: vec![
            person("hm1", &["hiring_manager"]),
            person("hrbp1", &["hr_business_partner"]),
            person("admin", &["hr_admin"]),
        ],
        entities: Vec::new(),
    });
    let state = AppState::new(pool, Arc::new(directory));
    state
        .engine
        .install_catalog(default_catalog().unwrap())
        .await
        .expect("Failed to install catalog");

    let app = approvals::app(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

    addr
}

async fn connect_ws(addr: SocketAddr) -> WsStream {
    let url = format!("ws://{}/ws", addr);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws_stream
}

async fn send_msg(ws: &mut WsStream, msg: serde_json::Value) {
    ws.send(Message::Text(msg.to_string())).await.unwrap();
}

async fn recv_json(ws: &mut WsStream) -> serde_json::Value {
    let next = tokio::time::timeout(tokio::time::Duration::from_secs(5), ws.next())
        .await
        .expect("Timed out waiting for message");
    match next {
        Some(Ok(Message::Text(text))) => serde_json::from_str(&text).unwrap(),
        other => panic!("Expected text message, got {:?}", other),
    }
}

async fn request(ws: &mut WsStream, msg: serde_json::Value) -> serde_json::Value {
    send_msg(ws, msg).await;
    recv_json(ws).await
}

fn initiate(entity_id: &str, salary: f64) -> serde_json::Value {
    serde_json::json!({
        "type": "initiate",
        "entity_type": "offer",
        "entity_id": entity_id,
        "context": {"salary": salary},
        "acting_person_id": "recruiter"
    })
}

#[tokio::test]
async fn test_websocket_list_templates() {
    let addr = setup_server().await;
    let mut ws = connect_ws(addr).await;

    let json = request(&mut ws, serde_json::json!({"type": "list_templates"})).await;
    assert_eq!(json["type"], "templates");
    let templates = json["templates"].as_array().unwrap();
    assert_eq!(templates.len(), 4);
    assert!(templates.iter().any(|t| t["id"] == "senior_offer"));
}

#[tokio::test]
async fn test_websocket_initiate_and_approve() {
    let addr = setup_server().await;
    let mut ws = connect_ws(addr).await;

    let json = request(&mut ws, initiate("offer-1", 75_000.0)).await;
    assert_eq!(json["type"], "instance_initiated");
    assert_eq!(json["instance"]["instance"]["template_id"], "standard_offer");
    assert_eq!(json["instance"]["steps"].as_array().unwrap().len(), 2);

    let json = request(
        &mut ws,
        serde_json::json!({"type": "list_pending", "acting_person_id": "hm1"}),
    )
    .await;
    assert_eq!(json["type"], "pending_approvals");
    let approvals = json["approvals"].as_array().unwrap();
    assert_eq!(approvals.len(), 1);
    let step_id = approvals[0]["step"]["id"].clone();

    let approve = serde_json::json!({
        "type": "process_approval",
        "step_id": step_id,
        "decision": "approved",
        "comments": "Looks good",
        "acting_person_id": "hm1"
    });
    let json = request(&mut ws, approve.clone()).await;
    assert_eq!(json["type"], "instance");
    assert_eq!(json["instance"]["instance"]["current_step"], 2);
    assert_eq!(json["instance"]["steps"][1]["assignees"][0], "hrbp1");

    // Same decision again is stale
    let json = request(&mut ws, approve).await;
    assert_eq!(json["type"], "error");
    assert_eq!(json["code"], "stale_approval");
    assert_eq!(
        json["message"],
        "This item was already processed, please refresh"
    );
}

#[tokio::test]
async fn test_websocket_error_codes() {
    let addr = setup_server().await;
    let mut ws = connect_ws(addr).await;

    let json = request(&mut ws, serde_json::json!({"type": "no_such_command"})).await;
    assert_eq!(json["type"], "error");
    assert_eq!(json["code"], "bad_request");

    let json = request(
        &mut ws,
        serde_json::json!({"type": "get_instance", "instance_id": uuid::Uuid::new_v4()}),
    )
    .await;
    assert_eq!(json["code"], "not_found");

    let json = request(&mut ws, initiate("offer-1", -1.0)).await;
    assert_eq!(json["code"], "no_applicable_workflow");

    request(&mut ws, initiate("offer-2", 50_000.0)).await;
    let json = request(&mut ws, initiate("offer-2", 50_000.0)).await;
    assert_eq!(json["code"], "duplicate_instance");
}

#[tokio::test]
async fn test_websocket_subscriber_receives_events() {
    let addr = setup_server().await;
    let mut watcher = connect_ws(addr).await;
    let mut actor = connect_ws(addr).await;

    let json = request(
        &mut watcher,
        serde_json::json!({"type": "subscribe", "person_id": "hm1"}),
    )
    .await;
    assert_eq!(json["type"], "subscribed");
    assert_eq!(json["person_id"], "hm1");

    let json = request(&mut actor, initiate("offer-1", 50_000.0)).await;
    assert_eq!(json["type"], "instance_initiated");

    let event = recv_json(&mut watcher).await;
    assert_eq!(event["type"], "event");
    assert_eq!(event["event"]["event"], "step_activated");
    assert_eq!(event["event"]["entity_id"], "offer-1");
    assert_eq!(event["event"]["assignees"][0], "hm1");
}

#[tokio::test]
async fn test_websocket_delegation_commands() {
    let addr = setup_server().await;
    let mut ws = connect_ws(addr).await;

    let create = serde_json::json!({
        "type": "create_delegation",
        "delegator": "hm1",
        "delegate": "hrbp1",
        "scope": {"kind": "blanket"},
        "acting_person_id": "someone_else"
    });
    let json = request(&mut ws, create).await;
    assert_eq!(json["code"], "not_authorized");

    let create = serde_json::json!({
        "type": "create_delegation",
        "delegator": "hm1",
        "delegate": "hrbp1",
        "scope": {"kind": "blanket"},
        "acting_person_id": "someone_else",
        "acting_role": "hr_admin"
    });
    let json = request(&mut ws, create).await;
    assert_eq!(json["code"], "not_authorized");

    let create = serde_json::json!({
        "type": "create_delegation",
        "delegator": "hm1",
        "delegate": "hrbp1",
        "scope": {"kind": "department", "value": "engineering"},
        "reason": "Parental leave",
        "acting_person_id": "hm1"
    });
    let json = request(&mut ws, create).await;
    assert_eq!(json["type"], "delegation_created");
    let delegation_id = json["delegation"]["id"].clone();

    let json = request(
        &mut ws,
        serde_json::json!({"type": "list_delegations", "delegator": "hm1"}),
    )
    .await;
    assert_eq!(json["delegations"].as_array().unwrap().len(), 1);
    assert_eq!(json["delegations"][0]["scope"]["kind"], "department");

    let json = request(
        &mut ws,
        serde_json::json!({
            "type": "revoke_delegation",
            "delegation_id": delegation_id,
            "acting_person_id": "admin",
            "acting_role": "hr_admin"
        }),
    )
    .await;
    assert_eq!(json["type"], "delegation_revoked");
}

#[tokio::test]
async fn test_websocket_reporting_commands() {
    let addr = setup_server().await;
    let mut ws = connect_ws(addr).await;
    request(&mut ws, initiate("offer-1", 50_000.0)).await;

    let json = request(&mut ws, serde_json::json!({"type": "get_analytics"})).await;
    assert_eq!(json["type"], "analytics");
    let analytics = json["analytics"].as_array().unwrap();
    assert_eq!(analytics.len(), 2);
    let offers = analytics
        .iter()
        .find(|a| a["entity_type"] == "offer")
        .unwrap();
    assert_eq!(offers["in_flight"], 1);
    assert!(offers["avg_duration_hours"].is_null());

    let json = request(&mut ws, serde_json::json!({"type": "get_sla_overview"})).await;
    assert_eq!(json["type"], "sla_overview");
    assert_eq!(json["overview"]["on_track"], 1);

    let json = request(&mut ws, serde_json::json!({"type": "check_escalations"})).await;
    assert_eq!(json["type"], "escalations");
    assert!(json["escalations"].as_array().unwrap().is_empty());
}
