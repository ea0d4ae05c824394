use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use order_dispatch::api::rest::router;
use order_dispatch::config::{DispatchConfig, RouteRecalcConfig};
use order_dispatch::distance::HaversineEstimator;
use order_dispatch::state::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_state() -> Arc<AppState> {
    let dispatch = DispatchConfig {
        offer_timeout: Duration::from_secs(5),
        retry_interval: Duration::from_millis(200),
        max_search_time: Duration::from_secs(10),
        ..DispatchConfig::default()
    };
    Arc::new(AppState::new(
        dispatch,
        RouteRecalcConfig::default(),
        Arc::new(HaversineEstimator),
        64,
    ))
}

fn setup() -> axum::Router {
    router(test_state())
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn order_body() -> Value {
    json!({
        "merchant_id": "5f0c7a8e-1d2b-4c3a-9e8f-7a6b5c4d3e2f",
        "pickup": { "lat": 19.4326, "lng": -99.1332 },
        "pickup_address": "Zocalo 1",
        "delivery": { "lat": 19.4270, "lng": -99.1677 },
        "delivery_address": "Reforma 222",
        "total_cents": 15900
    })
}

async fn register_driver(app: &axum::Router, name: &str, lat: f64, lng: f64) -> String {
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/drivers",
            json!({ "name": name, "location": { "lat": lat, "lng": lng } }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await["id"].as_str().unwrap().to_string()
}

async fn wait_for_offer(app: &axum::Router, driver_id: &str) -> Value {
    for _ in 0..100 {
        let res = app
            .clone()
            .oneshot(get_request(&format!("/drivers/{driver_id}/assignments")))
            .await
            .unwrap();
        let inbox = body_json(res).await;
        if let Some(offer) = inbox.as_array().unwrap().first() {
            return offer.clone();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("driver {driver_id} never received an offer");
}

async fn wait_for_status(app: &axum::Router, order_id: &str, status: &str) -> Value {
    let mut last = Value::Null;
    for _ in 0..100 {
        let res = app
            .clone()
            .oneshot(get_request(&format!("/orders/{order_id}")))
            .await
            .unwrap();
        last = body_json(res).await;
        if last["status"] == status {
            return last;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("order {order_id} stuck in {}", last["status"]);
}

#[tokio::test]
async fn health_returns_ok() {
    let app = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["drivers"], 0);
    assert_eq!(body["orders"], 0);
    assert_eq!(body["assignments"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let app = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("active_searches"));
}

#[tokio::test]
async fn register_driver_empty_name_returns_400() {
    let app = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/drivers",
            json!({ "name": "  ", "location": { "lat": 19.43, "lng": -99.13 } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn driver_can_go_offline() {
    let app = setup();
    let id = register_driver(&app, "Eve", 19.43, -99.13).await;

    let res = app
        .oneshot(json_request(
            "PATCH",
            &format!("/drivers/{id}/availability"),
            json!({ "online": false }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["online"], false);
}

#[tokio::test]
async fn idle_driver_location_update_has_no_route() {
    let app = setup();
    let id = register_driver(&app, "Frank", 19.43, -99.13).await;

    let res = app
        .oneshot(json_request(
            "PATCH",
            &format!("/drivers/{id}/location"),
            json!({ "location": { "lat": 19.44, "lng": -99.14 } }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["location"]["lat"], 19.44);
    assert!(body["active_order_id"].is_null());
    assert!(body["route"].is_null());
}

#[tokio::test]
async fn location_update_for_unknown_driver_returns_404() {
    let app = setup();
    let res = app
        .oneshot(json_request(
            "PATCH",
            "/drivers/00000000-0000-0000-0000-000000000000/location",
            json!({ "location": { "lat": 19.44, "lng": -99.14 } }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_nonexistent_order_returns_404() {
    let app = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/orders/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_order_rejects_bad_coordinates() {
    let app = setup();
    let mut body = order_body();
    body["pickup"]["lat"] = json!(123.0);

    let response = app
        .oneshot(json_request("POST", "/orders", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_order_returns_pending_with_code() {
    let app = setup();
    let response = app
        .oneshot(json_request("POST", "/orders", order_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    assert_eq!(body["status"], "pending");
    assert!(body["driver_id"].is_null());
    let code = body["delivery_code"].as_u64().unwrap();
    assert!((1000..10000).contains(&code));
}

#[tokio::test]
async fn accept_without_offer_returns_404() {
    let app = setup();
    let res = app
        .clone()
        .oneshot(json_request("POST", "/orders", order_body()))
        .await
        .unwrap();
    let order_id = body_json(res).await["id"].as_str().unwrap().to_string();

    let res = app
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/accept"),
            json!({ "driver_id": "00000000-0000-0000-0000-000000000001" }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_twice_is_a_conflict() {
    let app = setup();
    let res = app
        .clone()
        .oneshot(json_request("POST", "/orders", order_body()))
        .await
        .unwrap();
    let order_id = body_json(res).await["id"].as_str().unwrap().to_string();

    let res = app
        .clone()
        .oneshot(json_request("POST", &format!("/orders/{order_id}/cancel"), json!({})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "cancelled");

    let res = app
        .oneshot(json_request("POST", &format!("/orders/{order_id}/cancel"), json!({})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn full_delivery_flow() {
    let app = setup();
    let driver_id = register_driver(&app, "Dispatch Dan", 19.4350, -99.1340).await;

    let res = app
        .clone()
        .oneshot(json_request("POST", "/orders", order_body()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let order = body_json(res).await;
    let order_id = order["id"].as_str().unwrap().to_string();
    let code = order["delivery_code"].as_u64().unwrap();

    let offer = wait_for_offer(&app, &driver_id).await;
    assert_eq!(offer["order_id"], order_id);
    assert_eq!(offer["status"], "pending");
    assert_eq!(offer["attempt_number"], 1);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/accept"),
            json!({ "driver_id": driver_id }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "accepted");

    let accepted = wait_for_status(&app, &order_id, "accepted").await;
    assert_eq!(accepted["driver_id"], driver_id);

    for step in ["pickup", "in-transit"] {
        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/orders/{order_id}/{step}"),
                json!({ "driver_id": driver_id }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let wrong = if code == 1000 { 1001 } else { 1000 };
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/complete"),
            json!({ "driver_id": driver_id, "code": wrong }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/complete"),
            json!({ "driver_id": driver_id, "code": code }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "delivered");

    let res = app
        .oneshot(get_request(&format!("/orders/{order_id}/assignments")))
        .await
        .unwrap();
    let history = body_json(res).await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["status"], "accepted");
}
