use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use tower::ServiceExt;

use crate::common::{
    TEST_ADMIN_TOKEN, create_retailer, serve_product_page, setup_test_app,
    setup_test_app_no_auth,
};

async fn json_body(response: Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn authed_get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("authorization", format!("Bearer {TEST_ADMIN_TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

fn authed_post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("authorization", format!("Bearer {TEST_ADMIN_TOKEN}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn scrape_request(body: serde_json::Value) -> Request<Body> {
    authed_post("/v1/scrape", body)
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "ok");
}

#[tokio::test]
async fn metrics_endpoint_is_public() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/v1/events").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_token_returns_401() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::get("/v1/events")
                .header("authorization", "Bearer wrong-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn no_admin_token_returns_403() {
    let app = setup_test_app_no_auth().await;

    let response = app
        .router
        .oneshot(
            Request::get("/v1/events")
                .header("authorization", "Bearer any-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = json_body(response).await;
    assert_eq!(json["error"], "forbidden");
}

#[tokio::test]
async fn scrape_unknown_retailer_returns_404() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(scrape_request(serde_json::json!({
            "productUrl": "https://shop.test/p/1",
            "retailerId": 4242
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = json_body(response).await;
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn scrape_rejects_non_http_url() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(scrape_request(serde_json::json!({
            "productUrl": "ftp://shop.test/p/1",
            "retailerId": 1
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn scrape_unconfigured_retailer_returns_400() {
    let app = setup_test_app().await;
    let base_url = serve_product_page().await;
    let retailer_id = create_retailer(&app.db, &base_url).await;
    sqlx::query("UPDATE retailers SET price_selector = NULL WHERE id = $1")
        .bind(retailer_id)
        .execute(app.db.pool())
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(scrape_request(serde_json::json!({
            "productUrl": format!("{base_url}/p/espresso"),
            "retailerId": retailer_id
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scrape_stores_product_and_records_events() {
    let app = setup_test_app().await;
    let base_url = serve_product_page().await;
    let retailer_id = create_retailer(&app.db, &base_url).await;
    let product_url = format!("{base_url}/p/espresso");

    let response = app
        .router
        .clone()
        .oneshot(scrape_request(serde_json::json!({
            "productUrl": product_url,
            "retailerId": retailer_id
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let product = json_body(response).await;
    assert_eq!(product["name"], "Espresso Machine");
    assert_eq!(product["price"], "249.99");
    assert_eq!(product["productUrl"], product_url);
    assert_eq!(
        product["imageUrl"],
        format!("{base_url}/img/espresso.jpg")
    );
    let product_id = product["id"].as_i64().unwrap();

    // Scraped event reaches the bus history.
    let response = app
        .router
        .clone()
        .oneshot(authed_get("/v1/events?limit=10"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    let scraped: Vec<_> = json["events"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["eventType"] == "product_scraped")
        .collect();
    assert_eq!(scraped.len(), 1);
    assert_eq!(scraped[0]["data"]["is_new"], true);
    assert_eq!(scraped[0]["source"], "scrape_service");

    // One price observation so far.
    let response = app
        .router
        .oneshot(authed_get(&format!("/v1/products/{product_id}/history")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["entries"][0]["price"], "249.99");
}

#[tokio::test]
async fn history_of_unknown_product_returns_404() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(authed_get("/v1/products/999/history"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn events_empty_on_fresh_server() {
    let app = setup_test_app().await;

    let response = app.router.oneshot(authed_get("/v1/events")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["total"], 0);
    assert_eq!(json["events"], serde_json::json!([]));
}

#[tokio::test]
async fn create_retailer_publishes_event() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(authed_post(
            "/v1/retailers",
            serde_json::json!({
                "name": "Corner Shop",
                "baseUrl": "https://corner.test",
                "nameSelector": "h1",
                "priceSelector": ".price"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let retailer = json_body(response).await;
    assert_eq!(retailer["name"], "Corner Shop");
    assert_eq!(retailer["active"], true);
    assert_eq!(retailer["priceSelector"], ".price");
    assert!(retailer["discoveryUrl"].is_null());

    let response = app
        .router
        .oneshot(authed_get("/v1/events"))
        .await
        .unwrap();
    let json = json_body(response).await;
    let created: Vec<_> = json["events"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["eventType"] == "retailer_created")
        .collect();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["data"]["retailer_id"], retailer["id"]);
}

#[tokio::test]
async fn create_retailer_rejects_duplicates_and_bad_urls() {
    let app = setup_test_app().await;
    let body = serde_json::json!({ "name": "Corner Shop", "baseUrl": "https://corner.test" });

    let first = app
        .router
        .clone()
        .oneshot(authed_post("/v1/retailers", body.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let duplicate = app
        .router
        .clone()
        .oneshot(authed_post("/v1/retailers", body))
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(duplicate).await["error"], "conflict");

    let bad_url = app
        .router
        .oneshot(authed_post(
            "/v1/retailers",
            serde_json::json!({ "name": "Other", "baseUrl": "not a url" }),
        ))
        .await
        .unwrap();
    assert_eq!(bad_url.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_and_get_retailers() {
    let app = setup_test_app().await;
    let retailer_id = create_retailer(&app.db, "https://shop.test").await;

    let response = app
        .router
        .clone()
        .oneshot(authed_get("/v1/retailers"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["retailers"][0]["id"], retailer_id);

    let response = app
        .router
        .clone()
        .oneshot(authed_get(&format!("/v1/retailers/{retailer_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["name"], "Test Shop");

    let response = app
        .router
        .oneshot(authed_get("/v1/retailers/4242"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_and_get_products() {
    let app = setup_test_app().await;
    let base_url = serve_product_page().await;
    let retailer_id = create_retailer(&app.db, &base_url).await;
    let scraped = app
        .router
        .clone()
        .oneshot(scrape_request(serde_json::json!({
            "productUrl": format!("{base_url}/p/espresso"),
            "retailerId": retailer_id
        })))
        .await
        .unwrap();
    let product_id = json_body(scraped).await["id"].as_i64().unwrap();

    let response = app
        .router
        .clone()
        .oneshot(authed_get(&format!("/v1/products?retailerId={retailer_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["products"][0]["id"], product_id);

    let response = app
        .router
        .clone()
        .oneshot(authed_get("/v1/products?limit=5"))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["total"], 1);

    let response = app
        .router
        .clone()
        .oneshot(authed_get(&format!("/v1/products/{product_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let product = json_body(response).await;
    assert_eq!(product["name"], "Espresso Machine");
    assert_eq!(product["price"], "249.99");

    let response = app
        .router
        .clone()
        .oneshot(authed_get("/v1/products/999"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .router
        .oneshot(authed_get("/v1/products?retailerId=4242"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
