use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use parking_lot::Mutex;
use proximity_chat::{
    AppState,
    config::Config,
    delivery::{Courier, DeliveryError},
    offline::MemoryBroker,
    presence::Endpoint,
    routes,
};
use serde_json::{Value, json};
use tower::ServiceExt;

#[derive(Default)]
struct TestCourier {
    delivered: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl Courier for TestCourier {
    async fn receive_message(
        &self,
        endpoint: &Endpoint,
        sender: &str,
        body: &str,
    ) -> Result<bool, DeliveryError> {
        self.delivered
            .lock()
            .push((endpoint.to_string(), sender.to_string(), body.to_string()));
        Ok(true)
    }
}

struct TestApp {
    router: Router,
    broker: MemoryBroker,
    courier: Arc<TestCourier>,
}

async fn app() -> TestApp {
    let broker = MemoryBroker::new();
    let courier = Arc::new(TestCourier::default());
    let state = AppState::build(Config::default(), Arc::new(broker.clone()), courier.clone())
        .await
        .unwrap();
    TestApp {
        router: routes::router(state),
        broker,
        courier,
    }
}

async fn call(app: &TestApp, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn register(app: &TestApp, username: &str, latitude: f64, longitude: f64) -> Value {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/users/register",
        Some(json!({
            "username": username,
            "location": {"latitude": latitude, "longitude": longitude},
            "endpoint": format!("http://{username}.local:9000"),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn register_and_find_nearby() {
    let app = app().await;
    assert_eq!(register(&app, "alice", 0.0, 0.0).await, json!({"code": 0, "content": true}));
    register(&app, "bob", 0.0, 0.001).await;
    register(&app, "carol", 0.0, 0.01).await;

    let (status, body) = call(&app, Method::GET, "/api/users/nearby?username=alice", None).await;
    assert_eq!(status, StatusCode::OK);
    let users = body["content"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["username"], "bob");
    assert_eq!(users[0]["endpoint"], "http://bob.local:9000");
    let distance = users[0]["distance"].as_f64().unwrap();
    assert!((distance - 111.32).abs() < 1e-6);

    // 扩大半径后能看到更远的用户
    let (_, body) = call(
        &app,
        Method::GET,
        "/api/users/nearby?username=alice&radius=2000",
        None,
    )
    .await;
    assert_eq!(body["content"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn invalid_registration_is_rejected() {
    let app = app().await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/users/register",
        Some(json!({
            "username": "a.b",
            "location": {"latitude": 0.0, "longitude": 0.0},
            "endpoint": "http://x",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1000);
    assert!(body.get("content").is_none());
}

#[tokio::test]
async fn unknown_users_are_reported_in_band() {
    let app = app().await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/users/heartbeat",
        Some(json!({"username": "ghost"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], false);

    let (_, body) = call(
        &app,
        Method::PUT,
        "/api/users/location",
        Some(json!({"username": "ghost", "location": {"latitude": 1.0, "longitude": 1.0}})),
    )
    .await;
    assert_eq!(body["content"], false);

    let (_, body) = call(&app, Method::GET, "/api/users/nearby?username=ghost", None).await;
    assert_eq!(body["content"], json!([]));

    let (_, body) = call(
        &app,
        Method::POST,
        "/api/messages/send",
        Some(json!({"sender": "ghost", "recipient": "nobody", "message": "hi"})),
    )
    .await;
    assert_eq!(body["content"], json!({"ok": false, "status": "RECIPIENT_UNKNOWN"}));
}

#[tokio::test]
async fn nearby_message_is_delivered_directly() {
    let app = app().await;
    register(&app, "alice", 0.0, 0.0).await;
    register(&app, "bob", 0.0, 0.0005).await;

    let (_, body) = call(
        &app,
        Method::POST,
        "/api/messages/send",
        Some(json!({"sender": "alice", "recipient": "bob", "message": "hello"})),
    )
    .await;
    assert_eq!(body["content"], json!({"ok": true, "status": "DELIVERED_DIRECT"}));
    assert_eq!(
        app.courier.delivered.lock().clone(),
        vec![(
            "http://bob.local:9000".to_string(),
            "alice".to_string(),
            "hello".to_string()
        )]
    );
    assert_eq!(app.broker.queue_len("offline_messages.bob"), 0);
}

#[tokio::test]
async fn far_message_waits_until_recipient_is_near() {
    let app = app().await;
    register(&app, "alice", 0.0, 0.0).await;
    register(&app, "bob", 0.0, 0.01).await;

    let (_, body) = call(
        &app,
        Method::POST,
        "/api/messages/send",
        Some(json!({"sender": "alice", "recipient": "bob", "message": "see you"})),
    )
    .await;
    assert_eq!(body["content"], json!({"ok": true, "status": "QUEUED"}));
    assert!(app.courier.delivered.lock().is_empty());

    let fetch = json!({"username": "bob"});
    let (_, body) = call(&app, Method::POST, "/api/messages/offline", Some(fetch.clone())).await;
    assert_eq!(body["content"], json!([]));
    assert_eq!(app.broker.queue_len("offline_messages.bob"), 1);

    let (_, body) = call(
        &app,
        Method::PUT,
        "/api/users/location",
        Some(json!({"username": "bob", "location": {"latitude": 0.0, "longitude": 0.0001}})),
    )
    .await;
    assert_eq!(body["content"], true);

    let (_, body) = call(&app, Method::POST, "/api/messages/offline", Some(fetch.clone())).await;
    let messages = body["content"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["sender"], "alice");
    assert_eq!(messages[0]["recipient"], "bob");
    assert_eq!(messages[0]["message"], "see you");
    assert!(messages[0]["timestamp"].is_string());

    // 已确认的消息不会再次返回
    let (_, body) = call(&app, Method::POST, "/api/messages/offline", Some(fetch)).await;
    assert_eq!(body["content"], json!([]));
}

#[tokio::test]
async fn health_reports_broker_and_users() {
    let app = app().await;
    register(&app, "alice", 0.0, 0.0).await;
    let (status, body) = call(&app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], json!({"broker": "ready", "users": 1}));
}

#[tokio::test(start_paused = true)]
async fn broker_outage_surfaces_as_store_unavailable() {
    let app = app().await;
    register(&app, "bob", 0.0, 0.0).await;
    app.broker.set_available(false);
    app.broker.drop_connections();

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/messages/offline",
        Some(json!({"username": "bob"})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], 5003);

    let (_, body) = call(
        &app,
        Method::POST,
        "/api/messages/send",
        Some(json!({"sender": "alice", "recipient": "bob", "message": "x"})),
    )
    .await;
    assert_eq!(body["content"], json!({"ok": false, "status": "FAILED"}));
}
