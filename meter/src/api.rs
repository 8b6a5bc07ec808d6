use crate::auth::{AuthError, Authenticator};
use crate::collector::TrafficCollector;
use crate::error::{MeterError, Result};
use crate::quota::QuotaEnforcer;
use crate::store::{CounterStore, NodeUsage, UsageTotals};
use axum::{
    Router,
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub quota: QuotaEnforcer,
    pub counters: Arc<dyn CounterStore>,
    pub collector: Arc<TrafficCollector>,
}

pub struct ApiServer {
    addr: String,
    state: AppState,
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthRequest {
    /// Client address as seen by the node; logged only
    #[serde(default)]
    addr: String,
    auth: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResetTrafficResponse {
    message: String,
    removed: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    message: String,
}

/// Builds the router; split out from [`ApiServer::run`] so tests can drive it
/// without a socket.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/auth", post(authenticate))
        .route("/api/traffic/aggregated", get(aggregated_traffic))
        .route("/api/traffic/by-node", get(traffic_by_node))
        .route("/api/traffic/collect", post(collect_now))
        .route("/api/users/{username}/reset-traffic", post(reset_traffic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl ApiServer {
    pub fn new(addr: impl Into<String>, state: AppState) -> Self {
        Self {
            addr: addr.into(),
            state,
        }
    }

    #[instrument(skip(self, shutdown), fields(addr = %self.addr))]
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let app = router(self.state);

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("Starting API server on {}", self.addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[instrument(skip(state, request), fields(addr = %request.addr))]
async fn authenticate(
    State(state): State<AppState>,
    Json(request): Json<AuthRequest>,
) -> impl IntoResponse {
    match state.authenticator.authenticate(&request.auth).await {
        Ok(id) => {
            info!("Authentication succeeded for user {}", id);
            (
                StatusCode::OK,
                Json(AuthResponse {
                    ok: true,
                    id: Some(id),
                    message: None,
                }),
            )
        }
        Err(e) => {
            let status = match &e {
                AuthError::InvalidFormat => StatusCode::BAD_REQUEST,
                AuthError::UserNotFound(_) | AuthError::InvalidPassword(_) => {
                    StatusCode::UNAUTHORIZED
                }
                AuthError::Disabled(_) | AuthError::TrafficExceeded { .. } => {
                    StatusCode::FORBIDDEN
                }
                AuthError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                error!("Authentication failed: {}", e);
            } else {
                warn!("Authentication rejected: {}", e);
            }
            (
                status,
                Json(AuthResponse {
                    ok: false,
                    id: None,
                    message: Some(e.to_string()),
                }),
            )
        }
    }
}

#[instrument(skip(state))]
async fn aggregated_traffic(
    State(state): State<AppState>,
) -> std::result::Result<Json<BTreeMap<String, UsageTotals>>, (StatusCode, Json<ErrorResponse>)> {
    state
        .counters
        .usage_by_user()
        .await
        .map(Json)
        .map_err(internal_error)
}

#[instrument(skip(state))]
async fn traffic_by_node(
    State(state): State<AppState>,
) -> std::result::Result<Json<Vec<NodeUsage>>, (StatusCode, Json<ErrorResponse>)> {
    state
        .counters
        .usage_by_node()
        .await
        .map(Json)
        .map_err(internal_error)
}

#[instrument(skip(state))]
async fn reset_traffic(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> impl IntoResponse {
    info!("API: Reset traffic request for {}", username);

    match state.quota.reset_traffic(&username).await {
        Ok(removed) => (
            StatusCode::OK,
            Json(ResetTrafficResponse {
                message: format!("Traffic reset for user {}", username),
                removed,
            }),
        )
            .into_response(),
        Err(MeterError::UserNotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                message: format!("User {} not found", username),
            }),
        )
            .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

#[instrument(skip(state))]
async fn collect_now(State(state): State<AppState>) -> impl IntoResponse {
    info!("API: Manual traffic collection request");

    match state.collector.collect_once().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

fn internal_error(e: MeterError) -> (StatusCode, Json<ErrorResponse>) {
    error!("API request failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            message: e.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hash_password;
    use crate::error::FetchError;
    use crate::fetcher::TrafficSource;
    use crate::store::{
        CounterRecord, MemoryStore, NewNode, NewUser, Node, NodeRegistry, UserDirectory,
    };
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use common::{TrafficCounters, TrafficSnapshot};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct FixedSource(TrafficSnapshot);

    #[async_trait]
    impl TrafficSource for FixedSource {
        async fn fetch(&self, _node: &Node) -> std::result::Result<TrafficSnapshot, FetchError> {
            Ok(self.0.clone())
        }
    }

    async fn setup() -> (Arc<MemoryStore>, Router) {
        let store = Arc::new(MemoryStore::new());
        store
            .create_user(NewUser {
                username: "alice".to_string(),
                password_hash: hash_password("secret"),
                traffic_limit: 1000,
                auto_disable_on_limit: true,
            })
            .await
            .unwrap();

        let snapshot = TrafficSnapshot::from([("bob".to_string(), TrafficCounters::new(70, 30))]);
        let quota = QuotaEnforcer::new(store.clone(), store.clone());
        let collector = Arc::new(TrafficCollector::new(
            store.clone(),
            store.clone(),
            Arc::new(FixedSource(snapshot)),
            quota.clone(),
        ));
        let state = AppState {
            authenticator: Arc::new(Authenticator::new(store.clone(), quota.clone())),
            quota,
            counters: store.clone(),
            collector,
        };
        (store, router(state))
    }

    async fn seed_counter(store: &MemoryStore, node_id: i64, username: &str, tx: u64, rx: u64) {
        store
            .upsert_counter(&CounterRecord {
                node_id,
                username: username.to_string(),
                lifetime_tx: tx,
                lifetime_rx: rx,
                last_observed_tx: tx,
                last_observed_rx: rx,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    async fn send(
        app: Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_version() {
        let (_store, app) = setup().await;
        let (status, body) = send(app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn auth_status_codes() {
        let (store, app) = setup().await;

        let cases = [
            ("alice:secret", StatusCode::OK),
            ("alice", StatusCode::BAD_REQUEST),
            ("nobody:secret", StatusCode::UNAUTHORIZED),
            ("alice:wrong", StatusCode::UNAUTHORIZED),
        ];
        for (auth, expected) in cases {
            let (status, body) = send(
                app.clone(),
                "POST",
                "/auth",
                Some(json!({"addr": "10.0.0.1:5000", "auth": auth})),
            )
            .await;
            assert_eq!(status, expected, "auth {auth}");
            assert_eq!(body["ok"], expected == StatusCode::OK);
        }

        seed_counter(&store, 1, "alice", 800, 200).await;
        let (status, body) = send(
            app.clone(),
            "POST",
            "/auth",
            Some(json!({"addr": "10.0.0.1:5000", "auth": "alice:secret"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn successful_auth_returns_id() {
        let (_store, app) = setup().await;
        let (status, body) = send(
            app,
            "POST",
            "/auth",
            Some(json!({"addr": "10.0.0.1:5000", "auth": "alice:secret"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "id": "alice"}));
    }

    #[tokio::test]
    async fn aggregated_sums_across_nodes() {
        let (store, app) = setup().await;
        seed_counter(&store, 1, "alice", 100, 10).await;
        seed_counter(&store, 2, "alice", 50, 5).await;
        seed_counter(&store, 1, "bob", 7, 3).await;

        let (status, body) = send(app, "GET", "/api/traffic/aggregated", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"alice": {"tx": 150, "rx": 15}, "bob": {"tx": 7, "rx": 3}})
        );
    }

    #[tokio::test]
    async fn by_node_lists_known_nodes() {
        let (store, app) = setup().await;
        let node = store
            .create_node(NewNode {
                name: "tokyo".to_string(),
                address: "127.0.0.1:1".to_string(),
                secret: "s".to_string(),
            })
            .await
            .unwrap();
        seed_counter(&store, node.id, "alice", 100, 10).await;

        let (status, body) = send(app, "GET", "/api/traffic/by-node", None).await;
        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["node_name"], "tokyo");
        assert_eq!(rows[0]["tx"], 100);
    }

    #[tokio::test]
    async fn reset_traffic_re_enables_user() {
        let (store, app) = setup().await;
        seed_counter(&store, 1, "alice", 800, 200).await;
        store.disable_user("alice").await.unwrap();

        let (status, body) =
            send(app.clone(), "POST", "/api/users/alice/reset-traffic", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], 1);
        assert!(store.find_user("alice").await.unwrap().unwrap().enabled);

        let (status, _) = send(app, "POST", "/api/users/ghost/reset-traffic", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn collect_runs_a_tick() {
        let (store, app) = setup().await;
        store
            .create_node(NewNode {
                name: "n1".to_string(),
                address: "127.0.0.1:1".to_string(),
                secret: "s".to_string(),
            })
            .await
            .unwrap();

        let (status, body) = send(app, "POST", "/api/traffic/collect", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodes_polled"], 1);
        assert_eq!(body["records_created"], 1);
        assert_eq!(store.usage_for_user("bob").await.unwrap().total(), 100);
    }
}
