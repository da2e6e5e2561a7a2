//! End-to-end requests through the router.

mod common;

use axum::http::{Method, Request, StatusCode};
use common::{coupon_input, invoice_callback, response_json, TestApp};
use invitation_checkout::models::DiscountType;
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

#[tokio::test]
async fn health_reports_database() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/health", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["checks"]["database"], "healthy");
}

#[tokio::test]
async fn status_names_the_service() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/api/v1/status", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["service"], "invitation-checkout");
}

#[tokio::test]
async fn request_id_is_echoed() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .uri("/api/v1/status")
        .header("x-request-id", "guest-42")
        .body(axum::body::Body::empty())
        .unwrap();

    let response = app.router().oneshot(request).await.unwrap();

    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "guest-42"
    );
}

#[tokio::test]
async fn checkout_with_coupon_over_http() {
    let app = TestApp::new().await;
    let package = app.seed_package(100_000).await;
    let mut input = coupon_input("SAVE20", DiscountType::Percentage, 20);
    input.maximum_discount = Some(10_000);
    app.seed_coupon(input).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/orders",
            Some(json!({
                "user_id": Uuid::new_v4(),
                "package_id": package.id,
                "coupon_code": "SAVE20",
            })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["discount_amount"], 10_000);
    assert_eq!(body["data"]["final_price"], 90_000);
    assert_eq!(body["data"]["expired"], false);
}

#[tokio::test]
async fn rejected_coupon_returns_reason_code() {
    let app = TestApp::new().await;
    let package = app.seed_package(100_000).await;
    let mut input = coupon_input("BIGSPEND", DiscountType::Fixed, 5_000);
    input.minimum_amount = 500_000;
    app.seed_coupon(input).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/orders",
            Some(json!({
                "user_id": Uuid::new_v4(),
                "package_id": package.id,
                "coupon_code": "BIGSPEND",
            })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(response).await;
    assert_eq!(body["code"], "below_minimum_amount");
}

#[tokio::test]
async fn preview_over_http() {
    let app = TestApp::new().await;
    let package = app.seed_package(50_000).await;
    app.seed_coupon(coupon_input("FLAT5K", DiscountType::Fixed, 5_000))
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/coupons/preview",
            Some(json!({
                "code": "flat5k",
                "user_id": Uuid::new_v4(),
                "package_id": package.id,
                "amount": 50_000,
            })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["valid"], true);
    assert_eq!(body["data"]["discount"], 5_000);
    assert_eq!(body["data"]["final_amount"], 45_000);
}

#[tokio::test]
async fn order_lookup_and_void() {
    let app = TestApp::new().await;
    let package = app.seed_package(75_000).await;
    let order = app.start_order(Uuid::new_v4(), package.id, None).await;

    let response = app
        .request(Method::GET, &format!("/api/v1/orders/{}", order.id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"]["id"], order.id.to_string());

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/void", order.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "void");
    assert_eq!(body["data"]["is_void"], true);
}

#[tokio::test]
async fn unknown_order_is_404() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn void_of_paid_order_conflicts() {
    let app = TestApp::new().await;
    let package = app.seed_package(75_000).await;
    let order = app.start_order(Uuid::new_v4(), package.id, None).await;
    let payment = app.seed_payment(&order).await;
    app.deliver(&invoice_callback(&payment, "PAID"))
        .await
        .expect("settled");

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/void", order.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn create_and_fetch_payment() {
    let app = TestApp::new().await;
    let package = app.seed_package(100_000).await;
    let order = app.start_order(Uuid::new_v4(), package.id, None).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments",
            Some(json!({
                "order_id": order.id,
                "payment_method": "invoice",
                "amount": 100_000,
                "customer": {"name": "Rina Wulandari", "email": "rina@example.com"},
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = response_json(response).await;
    assert_eq!(created["data"]["payment_status"], "pending");
    let payment_id = created["data"]["payment_id"].as_str().unwrap().to_string();

    let response = app
        .request(Method::GET, &format!("/api/v1/payments/{}", payment_id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["order_id"], order.id.to_string());
    assert_eq!(body["data"]["amount"], 100_000);
    assert_eq!(body["data"]["payment_method"], "invoice");
}

#[tokio::test]
async fn payment_with_wrong_amount_is_400() {
    let app = TestApp::new().await;
    let package = app.seed_package(100_000).await;
    let order = app.start_order(Uuid::new_v4(), package.id, None).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments",
            Some(json!({
                "order_id": order.id,
                "payment_method": "invoice",
                "amount": 99_999,
                "customer": {"name": "Rina Wulandari"},
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ==================== webhook ====================

#[tokio::test]
async fn signed_webhook_settles_order() {
    let app = TestApp::new().await;
    let package = app.seed_package(100_000).await;
    let order = app.start_order(Uuid::new_v4(), package.id, None).await;
    let payment = app.seed_payment(&order).await;
    let body = invoice_callback(&payment, "PAID");

    let response = app.post_webhook(&body, Some(&app.sign(&body))).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["data"]["outcome"], "settled");
    assert_eq!(json["data"]["payment_status"], "settlement");
    assert_eq!(json["data"]["order_state"], "paid");
}

#[tokio::test]
async fn unsigned_webhook_is_401() {
    let app = TestApp::new().await;
    let package = app.seed_package(100_000).await;
    let order = app.start_order(Uuid::new_v4(), package.id, None).await;
    let payment = app.seed_payment(&order).await;

    let response = app
        .post_webhook(&invoice_callback(&payment, "PAID"), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_webhook(&invoice_callback(&payment, "PAID"), Some("deadbeef"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(!app.order(order.id).await.is_paid);
}

#[tokio::test]
async fn webhook_for_unknown_payment_is_404() {
    let app = TestApp::new().await;
    let body = json!({"id": "inv-x", "external_id": "no-such-correlation", "status": "PAID"});

    let response = app.post_webhook(&body, Some(&app.sign(&body))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_object_webhook_is_400() {
    let app = TestApp::new().await;
    let body = json!(["PAID"]);

    let response = app.post_webhook(&body, Some(&app.sign(&body))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
