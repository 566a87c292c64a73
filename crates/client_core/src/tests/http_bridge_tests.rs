use super::*;
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{HeaderMap, StatusCode as HttpStatus},
    response::{IntoResponse, Response as AxumResponse},
    routing::{get, patch, post},
    Json, Router,
};
use shared::{
    domain::{DeveloperId, LogLevel, ProfileId, VendorProductId},
    error::FieldError,
    protocol::{Paywall, PromoOffer},
};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct BackendState {
    seen_auth: Arc<Mutex<Vec<Option<String>>>>,
    purchase_identity: Arc<Mutex<Vec<(Option<String>, Option<String>)>>>,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn sample_product(id: &str) -> Product {
    Product {
        vendor_product_id: VendorProductId::new(id),
        localized_title: "Premium".to_string(),
        localized_description: "All features".to_string(),
        localized_price: "$9.99".to_string(),
        price_amount: Some("9.99".to_string()),
        currency_code: Some("USD".to_string()),
        subscription_period: Some("P1M".to_string()),
    }
}

async fn handle_activate(Json(request): Json<ActivationRequest>) -> AxumResponse {
    if request.sdk_key != "key1" {
        return (
            HttpStatus::UNAUTHORIZED,
            Json(ApiError::new(ErrorCode::Unauthorized, "unknown sdk key")),
        )
            .into_response();
    }
    Json(ActivationResult {
        profile_id: ProfileId::new("profile-http"),
        customer_user_id: request.customer_user_id,
    })
    .into_response()
}

async fn handle_paywalls(
    State(state): State<BackendState>,
    headers: HeaderMap,
) -> Json<PaywallsResponse> {
    state
        .seen_auth
        .lock()
        .await
        .push(header(&headers, "authorization"));
    Json(PaywallsResponse {
        paywalls: vec![Paywall {
            developer_id: DeveloperId::new("pw1"),
            name: "Main".to_string(),
            variation_id: Some("var-1".to_string()),
            revision: 3,
            products: vec![sample_product("p1")],
        }],
    })
}

async fn handle_identify(Json(request): Json<IdentifyRequest>) -> Json<IdentityResult> {
    Json(IdentityResult {
        profile_id: ProfileId::new(format!("profile-{}", request.customer_user_id)),
        customer_user_id: request.customer_user_id,
    })
}

async fn handle_purchase(
    State(state): State<BackendState>,
    headers: HeaderMap,
    Json(request): Json<PurchaseRequest>,
) -> AxumResponse {
    state.purchase_identity.lock().await.push((
        header(&headers, PROFILE_ID_HEADER),
        header(&headers, CUSTOMER_USER_ID_HEADER),
    ));
    if request.vendor_product_id.as_str() != "p1" {
        return (
            HttpStatus::UNPROCESSABLE_ENTITY,
            Json(ApiError::new(ErrorCode::UnknownProduct, "no such product")),
        )
            .into_response();
    }
    Json(PurchaseResult {
        vendor_product_id: request.vendor_product_id,
        transaction_id: "tx-http".to_string(),
        purchaser_info: PurchaserInfo::default(),
    })
    .into_response()
}

async fn handle_profile(Json(attributes): Json<ProfileAttributes>) -> AxumResponse {
    if attributes.email.as_deref() == Some("bad") {
        let mut error = ApiError::new(ErrorCode::Validation, "invalid attributes");
        error.fields = vec![FieldError::new("email", "not an address")];
        return (HttpStatus::UNPROCESSABLE_ENTITY, Json(error)).into_response();
    }
    Json(ProfileResult {
        profile_id: ProfileId::new("profile-http"),
        updated_fields: vec!["first_name".to_string()],
    })
    .into_response()
}

async fn handle_promo() -> AxumResponse {
    (HttpStatus::SERVICE_UNAVAILABLE, "maintenance").into_response()
}

async fn handle_logout() -> HttpStatus {
    HttpStatus::NO_CONTENT
}

async fn handle_events(ws: WebSocketUpgrade) -> AxumResponse {
    ws.on_upgrade(|mut socket| async move {
        let event = SessionEvent::PromoReceived(PromoOffer {
            promo_type: "winback".to_string(),
            variation_id: "promo-var".to_string(),
            expires_at: None,
            paywall: None,
        });
        let text = serde_json::to_string(&event).expect("encode event");
        let _ = socket
            .send(axum::extract::ws::Message::Text(text))
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;
    })
}

async fn spawn_backend() -> (String, BackendState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = BackendState::default();
    let app = Router::new()
        .route("/sdk/activate", post(handle_activate))
        .route("/sdk/identify", post(handle_identify))
        .route("/sdk/logout", post(handle_logout))
        .route("/sdk/paywalls", get(handle_paywalls))
        .route("/sdk/purchases", post(handle_purchase))
        .route("/sdk/profile", patch(handle_profile))
        .route("/sdk/promo", get(handle_promo))
        .route("/sdk/events", get(handle_events))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

fn activation(sdk_key: &str) -> ActivationRequest {
    ActivationRequest {
        sdk_key: sdk_key.to_string(),
        customer_user_id: None,
        log_level: LogLevel::Verbose,
    }
}

#[test]
fn rejects_non_http_backend_url() {
    let err = HttpBridge::new("ftp://example.com").err().expect("invalid scheme");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[test]
fn base_url_gains_trailing_slash_for_relative_endpoints() {
    let bridge = HttpBridge::new("https://api.example.com/v2").expect("bridge");
    assert_eq!(bridge.base_url().as_str(), "https://api.example.com/v2/");
    assert_eq!(
        bridge.endpoint("sdk/paywalls").expect("endpoint").as_str(),
        "https://api.example.com/v2/sdk/paywalls"
    );
}

#[tokio::test]
async fn activation_stores_key_for_subsequent_requests() {
    let (url, state) = spawn_backend().await;
    let bridge = HttpBridge::new(&url).expect("bridge").without_event_stream();

    let activated = bridge.activate(activation("key1")).await.expect("activate");
    assert_eq!(activated.profile_id, ProfileId::new("profile-http"));

    let response = bridge.get_paywalls().await.expect("paywalls");
    assert_eq!(response.paywalls[0].developer_id.as_str(), "pw1");
    assert_eq!(response.paywalls[0].products[0].localized_price, "$9.99");
    assert_eq!(
        state.seen_auth.lock().await.clone(),
        vec![Some("Api-Key key1".to_string())]
    );

    bridge.logout().await.expect("logout");
}

#[tokio::test]
async fn json_error_bodies_keep_backend_detail() {
    let (url, _state) = spawn_backend().await;
    let bridge = HttpBridge::new(&url).expect("bridge").without_event_stream();

    let err = bridge.activate(activation("wrong")).await.expect_err("bad key");
    assert_eq!(err.code, ErrorCode::Unauthorized);
    assert_eq!(err.message, "unknown sdk key");

    let err = bridge
        .make_purchase(&sample_product("gone"))
        .await
        .expect_err("unknown product");
    assert_eq!(err.code, ErrorCode::UnknownProduct);

    let err = bridge
        .update_profile(&ProfileAttributes {
            email: Some("bad".to_string()),
            ..ProfileAttributes::default()
        })
        .await
        .expect_err("invalid email");
    assert_eq!(err.field_names(), vec!["email"]);
}

#[tokio::test]
async fn non_json_error_maps_status_code() {
    let (url, _state) = spawn_backend().await;
    let bridge = HttpBridge::new(&url).expect("bridge").without_event_stream();

    let err = bridge.get_promo().await.expect_err("unavailable");

    assert_eq!(err.code, ErrorCode::Internal);
    assert!(err.message.contains("503"));
}

#[tokio::test]
async fn unreachable_backend_is_transport_error() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let bridge = HttpBridge::new(&format!("http://{addr}"))
        .expect("bridge")
        .without_event_stream();

    let err = bridge.get_paywalls().await.expect_err("refused");

    assert_eq!(err.code, ErrorCode::Transport);
}

#[tokio::test]
async fn event_stream_forwards_pushed_events_after_activation() {
    let (url, _state) = spawn_backend().await;
    let bridge = HttpBridge::new(&url).expect("bridge");
    let mut events = bridge.subscribe_events();

    bridge.activate(activation("key1")).await.expect("activate");

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event in time")
        .expect("event");
    match event {
        SessionEvent::PromoReceived(offer) => assert_eq!(offer.promo_type, "winback"),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn requests_carry_bound_identity_until_logout() {
    let (url, state) = spawn_backend().await;
    let bridge = HttpBridge::new(&url).expect("bridge").without_event_stream();
    let p1 = sample_product("p1");

    bridge.activate(activation("key1")).await.expect("activate");
    bridge.make_purchase(&p1).await.expect("anonymous purchase");

    let bound = bridge
        .identify(&CustomerUserId::new("bob"))
        .await
        .expect("identify");
    assert_eq!(bound.profile_id, ProfileId::new("profile-bob"));
    bridge.make_purchase(&p1).await.expect("bob purchase");

    bridge.logout().await.expect("logout");
    bridge.make_purchase(&p1).await.expect("logged out purchase");

    assert_eq!(
        state.purchase_identity.lock().await.clone(),
        vec![
            (Some("profile-http".to_string()), None),
            (Some("profile-bob".to_string()), Some("bob".to_string())),
            (None, None),
        ]
    );
}

#[tokio::test]
async fn activation_with_user_binds_it_for_later_requests() {
    let (url, state) = spawn_backend().await;
    let bridge = HttpBridge::new(&url).expect("bridge").without_event_stream();

    bridge
        .activate(ActivationRequest {
            customer_user_id: Some(CustomerUserId::new("alice")),
            ..activation("key1")
        })
        .await
        .expect("activate");
    bridge
        .make_purchase(&sample_product("p1"))
        .await
        .expect("purchase");

    assert_eq!(
        state.purchase_identity.lock().await.clone(),
        vec![(Some("profile-http".to_string()), Some("alice".to_string()))]
    );
}
