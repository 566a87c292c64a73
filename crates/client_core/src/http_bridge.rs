//! [`SdkBridge`] over the backend's JSON HTTP API, with push events read
//! from a WebSocket opened after activation.
//!
//! Once activated, every request carries the sdk key and the identity the
//! backend last confirmed (`X-Profile-Id`, plus `X-Customer-User-Id` when a
//! customer user is bound).

use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header::AUTHORIZATION, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{CustomerUserId, ProfileId},
    error::{ApiError, BackendError, ErrorCode},
    protocol::{
        ActivationRequest, ActivationResult, IdentifyRequest, IdentityResult, PaywallsResponse,
        Product, ProfileAttributes, ProfileResult, PromoResult, PurchaseRequest, PurchaseResult,
        PurchaserInfo, RestoreResult, SessionEvent,
    },
};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::bridge::{BridgeResult, SdkBridge};

const EVENT_CHANNEL_CAPACITY: usize = 256;
pub const PROFILE_ID_HEADER: &str = "x-profile-id";
pub const CUSTOMER_USER_ID_HEADER: &str = "x-customer-user-id";

#[derive(Debug, Clone)]
struct BoundIdentity {
    profile_id: ProfileId,
    customer_user_id: Option<CustomerUserId>,
}

pub struct HttpBridge {
    http: Client,
    base_url: Url,
    sdk_key: RwLock<Option<String>>,
    identity: RwLock<Option<BoundIdentity>>,
    stream_events: bool,
    events: broadcast::Sender<SessionEvent>,
    event_stream: Mutex<Option<JoinHandle<()>>>,
}

impl HttpBridge {
    pub fn new(base_url: &str) -> BridgeResult<Self> {
        let mut base_url = Url::parse(base_url).map_err(|err| {
            BackendError::new(
                ErrorCode::Validation,
                format!("invalid backend url '{base_url}': {err}"),
            )
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(BackendError::new(
                ErrorCode::Validation,
                "backend url must start with http:// or https://",
            ));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            http: Client::new(),
            base_url,
            sdk_key: RwLock::new(None),
            identity: RwLock::new(None),
            stream_events: true,
            events,
            event_stream: Mutex::new(None),
        })
    }

    /// Skips opening the push-event WebSocket after activation.
    pub fn without_event_stream(mut self) -> Self {
        self.stream_events = false;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> BridgeResult<Url> {
        self.base_url.join(path).map_err(|err| {
            BackendError::new(ErrorCode::Internal, format!("invalid endpoint {path}: {err}"))
        })
    }

    fn bind_identity(&self, identity: Option<BoundIdentity>) {
        debug!("http bridge: identity now {identity:?}");
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = identity;
    }

    fn authorize(&self, mut request: RequestBuilder) -> RequestBuilder {
        let key = self
            .sdk_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(key) = key {
            request = request.header(AUTHORIZATION, format!("Api-Key {key}"));
        }

        let identity = self
            .identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(identity) = identity {
            request = request.header(PROFILE_ID_HEADER, identity.profile_id.as_str());
            if let Some(user_id) = identity.customer_user_id {
                request = request.header(CUSTOMER_USER_ID_HEADER, user_id.as_str());
            }
        }
        request
    }

    async fn execute(&self, request: RequestBuilder) -> BridgeResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.map_err(transport_error)?;
        match serde_json::from_slice::<ApiError>(&body) {
            Ok(api_error) => Err(api_error.into()),
            Err(_) => Err(BackendError::new(
                code_for_status(status),
                format!("backend returned {status}"),
            )),
        }
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> BridgeResult<T> {
        self.execute(request)
            .await?
            .json::<T>()
            .await
            .map_err(|err| {
                BackendError::new(ErrorCode::Internal, format!("malformed backend response: {err}"))
            })
    }

    fn spawn_event_stream(&self, sdk_key: &str) -> BridgeResult<()> {
        let mut ws_url = self.endpoint("sdk/events")?;
        let scheme = if ws_url.scheme() == "https" { "wss" } else { "ws" };
        ws_url.set_scheme(scheme).map_err(|_| {
            BackendError::new(ErrorCode::Internal, "failed to derive websocket url")
        })?;
        ws_url.query_pairs_mut().append_pair("sdk_key", sdk_key);

        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let (ws_stream, _) = match connect_async(ws_url.as_str()).await {
                Ok(connected) => connected,
                Err(err) => {
                    warn!("http bridge: failed to connect event stream {ws_url}: {err}");
                    return;
                }
            };
            info!("http bridge: event stream connected");
            let (_, mut reader) = ws_stream.split();
            while let Some(message) = reader.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<SessionEvent>(&text) {
                        Ok(event) => {
                            let _ = events.send(event);
                        }
                        Err(err) => warn!("http bridge: dropping malformed event: {err}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!("http bridge: event stream error: {err}");
                        break;
                    }
                }
            }
            debug!("http bridge: event stream finished");
        });

        if let Some(previous) = self
            .event_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task)
        {
            previous.abort();
        }
        Ok(())
    }
}

impl Drop for HttpBridge {
    fn drop(&mut self) {
        if let Some(task) = self
            .event_stream
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

fn transport_error(err: reqwest::Error) -> BackendError {
    BackendError::new(ErrorCode::Transport, err.to_string())
}

fn code_for_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorCode::Unauthorized,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorCode::Validation,
        StatusCode::TOO_MANY_REQUESTS => ErrorCode::RateLimited,
        _ => ErrorCode::Internal,
    }
}

#[async_trait]
impl SdkBridge for HttpBridge {
    async fn activate(&self, request: ActivationRequest) -> BridgeResult<ActivationResult> {
        let url = self.endpoint("sdk/activate")?;
        let sdk_key = request.sdk_key.clone();
        let activation: ActivationResult = self.json(self.http.post(url).json(&request)).await?;

        *self.sdk_key.write().unwrap_or_else(PoisonError::into_inner) = Some(sdk_key.clone());
        self.bind_identity(Some(BoundIdentity {
            profile_id: activation.profile_id.clone(),
            customer_user_id: activation
                .customer_user_id
                .clone()
                .or(request.customer_user_id),
        }));
        if self.stream_events {
            self.spawn_event_stream(&sdk_key)?;
        }
        Ok(activation)
    }

    async fn identify(&self, user_id: &CustomerUserId) -> BridgeResult<IdentityResult> {
        let url = self.endpoint("sdk/identify")?;
        let body = IdentifyRequest {
            customer_user_id: user_id.clone(),
        };
        let identity: IdentityResult = self.json(self.http.post(url).json(&body)).await?;
        self.bind_identity(Some(BoundIdentity {
            profile_id: identity.profile_id.clone(),
            customer_user_id: Some(identity.customer_user_id.clone()),
        }));
        Ok(identity)
    }

    async fn logout(&self) -> BridgeResult<()> {
        let url = self.endpoint("sdk/logout")?;
        self.execute(self.http.post(url)).await?;
        self.bind_identity(None);
        Ok(())
    }

    async fn update_profile(&self, attributes: &ProfileAttributes) -> BridgeResult<ProfileResult> {
        let url = self.endpoint("sdk/profile")?;
        self.json(self.http.patch(url).json(attributes)).await
    }

    async fn get_purchaser_info(&self) -> BridgeResult<PurchaserInfo> {
        let url = self.endpoint("sdk/purchaser-info")?;
        self.json(self.http.get(url)).await
    }

    async fn get_paywalls(&self) -> BridgeResult<PaywallsResponse> {
        let url = self.endpoint("sdk/paywalls")?;
        self.json(self.http.get(url)).await
    }

    async fn make_purchase(&self, product: &Product) -> BridgeResult<PurchaseResult> {
        let url = self.endpoint("sdk/purchases")?;
        let body = PurchaseRequest {
            vendor_product_id: product.vendor_product_id.clone(),
        };
        self.json(self.http.post(url).json(&body)).await
    }

    async fn restore_purchases(&self) -> BridgeResult<RestoreResult> {
        let url = self.endpoint("sdk/purchases/restore")?;
        self.json(self.http.post(url)).await
    }

    async fn get_promo(&self) -> BridgeResult<PromoResult> {
        let url = self.endpoint("sdk/promo")?;
        self.json(self.http.get(url)).await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/http_bridge_tests.rs"]
mod tests;
