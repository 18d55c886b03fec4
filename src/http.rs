use crate::aggregator::{AggregateError, Aggregator};
use crate::collectors::ExecutionContext;
use crate::info::DeviceInfo;
use crate::metrics::Metrics;
use crate::state::State as DaemonState;
use crate::stress::{StressEngine, StressMonitor, StressStatus};
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;
use tracing::{error, warn};

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub state: Arc<RwLock<DaemonState>>,
    pub aggregator: Aggregator,
    pub stress: Arc<Mutex<StressEngine>>,
    pub stress_monitor: StressMonitor,
    pub stress_limit: usize,
    pub ctx: Option<ExecutionContext>,
}

impl HttpAppState {
    pub async fn refresh_snapshot(&self) -> DeviceInfo {
        let info = self.aggregator.snapshot(self.ctx.as_ref()).await;
        self.metrics.update_from_snapshot(&info);
        self.state.write().await.update_snapshot(info.clone());
        info
    }
}

fn lock_engine(engine: &Mutex<StressEngine>) -> MutexGuard<'_, StressEngine> {
    // A panic inside start/stop leaves the engine consistent: sessions are
    // only installed after every worker spawned.
    engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    pub cores: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiError {
            error: message.into(),
        }),
    )
        .into_response()
}

pub fn build_router(app_state: HttpAppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .route("/api/snapshot/refresh", post(refresh_handler))
        .route("/api/battery", get(battery_handler))
        .route("/api/cpu/frequencies", get(frequencies_handler))
        .route("/api/display", get(display_handler))
        .route("/api/sensors", get(sensors_handler))
        .route("/api/gpu", get(gpu_handler))
        .route("/api/stress", get(stress_status_handler))
        .route("/api/stress/start", post(stress_start_handler))
        .route("/api/stress/stop", post(stress_stop_handler))
        .with_state(app_state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

async fn snapshot_handler(State(state): State<HttpAppState>) -> Json<DeviceInfo> {
    let cached = state.state.read().await.snapshot.clone();
    match cached {
        Some(info) => Json(info),
        None => Json(state.refresh_snapshot().await),
    }
}

async fn refresh_handler(State(state): State<HttpAppState>) -> Json<DeviceInfo> {
    Json(state.refresh_snapshot().await)
}

async fn battery_handler(State(state): State<HttpAppState>) -> Response {
    match state.aggregator.initial_battery_info() {
        Some(info) => Json(info).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "данные о батарее ещё не получены"),
    }
}

async fn frequencies_handler(State(state): State<HttpAppState>) -> Json<Vec<String>> {
    Json(state.aggregator.live_cpu_frequencies())
}

fn context_rejection(err: AggregateError) -> Response {
    api_error(StatusCode::PRECONDITION_FAILED, err.to_string())
}

async fn display_handler(State(state): State<HttpAppState>) -> Response {
    match state.aggregator.display_info(state.ctx.as_ref()) {
        Ok(info) => Json(info).into_response(),
        Err(err) => context_rejection(err),
    }
}

async fn sensors_handler(State(state): State<HttpAppState>) -> Response {
    match state.aggregator.sensor_info(state.ctx.as_ref()) {
        Ok(sensors) => Json(sensors).into_response(),
        Err(err) => context_rejection(err),
    }
}

/// Unbounded probe; the client disconnecting drops it.
async fn gpu_handler(State(state): State<HttpAppState>) -> Response {
    match state.aggregator.gpu_info(state.ctx.as_ref()).await {
        Ok(info) => Json(info).into_response(),
        Err(err) => context_rejection(err),
    }
}

async fn stress_status_handler(State(state): State<HttpAppState>) -> Json<StressStatus> {
    Json(state.stress_monitor.status())
}

async fn stress_start_handler(
    State(state): State<HttpAppState>,
    body: Bytes,
) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        StartRequest::default()
    } else {
        match serde_json::from_slice::<StartRequest>(&body) {
            Ok(request) => request,
            Err(err) => {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    format!("некорректное тело запроса: {err}"),
                )
            }
        }
    };
    let requested = request.cores.unwrap_or(state.stress_limit);
    let Some(cores) = NonZeroUsize::new(requested) else {
        return api_error(StatusCode::BAD_REQUEST, "cores должно быть >= 1");
    };
    if cores.get() > state.stress_limit {
        return api_error(
            StatusCode::BAD_REQUEST,
            format!("cores должно быть <= {}", state.stress_limit),
        );
    }

    let engine = state.stress.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let mut engine = lock_engine(&engine);
        engine.start(cores).map(|()| engine.status())
    })
    .await;

    match joined {
        Ok(Ok(status)) => {
            state.metrics.inc_stress_session();
            state.metrics.set_stress_workers(status.active_workers);
            Json(status).into_response()
        }
        Ok(Err(err)) => {
            warn!(error = %err, cores = cores.get(), "стресс-тест не запущен");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        Err(err) => {
            error!(error = %err, "задача запуска стресс-теста завершилась аварийно");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "внутренняя ошибка")
        }
    }
}

async fn stress_stop_handler(State(state): State<HttpAppState>) -> Response {
    let engine = state.stress.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let mut engine = lock_engine(&engine);
        engine.stop();
        engine.status()
    })
    .await;

    match joined {
        Ok(status) => {
            state.metrics.set_stress_workers(status.active_workers);
            Json(status).into_response()
        }
        Err(err) => {
            error!(error = %err, "задача остановки стресс-теста завершилась аварийно");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "внутренняя ошибка")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::battery::{BatteryPayload, BatteryState};
    use crate::collectors::testing::DeadSource;
    use crate::collectors::SessionKind;
    use axum::body::to_bytes;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state(battery: BatteryState, stress_limit: usize) -> HttpAppState {
        let metrics = Metrics::new().expect("инициализация метрик");
        let aggregator = Aggregator::new(Arc::new(DeadSource), battery, Duration::from_secs(1))
            .with_metrics(metrics.clone());
        let engine = StressEngine::new();
        HttpAppState {
            metrics,
            state: Arc::new(RwLock::new(DaemonState::new(0))),
            aggregator,
            stress_monitor: engine.monitor(),
            stress: Arc::new(Mutex::new(engine)),
            stress_limit,
            ctx: None,
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, json: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = build_router(test_state(BatteryState::new(), 1));
        let response = app.oneshot(get_req("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn metrics_contains_uptime() {
        let app = build_router(test_state(BatteryState::new(), 1));
        let response = app.oneshot(get_req("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("devinfo_uptime_seconds"));
    }

    #[tokio::test]
    async fn snapshot_is_collected_once_then_served_from_cache() {
        let state = test_state(BatteryState::new(), 1);
        let app = build_router(state.clone());

        let response = app.clone().oneshot(get_req("/api/snapshot")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("\"cpu\""));
        assert!(text.contains("\"battery\":null"));
        assert_eq!(state.state.read().await.snapshot_count, 1);

        let response = app.clone().oneshot(get_req("/api/snapshot")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.state.read().await.snapshot_count, 1);

        let response = app
            .oneshot(post_json("/api/snapshot/refresh", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.state.read().await.snapshot_count, 2);
    }

    #[tokio::test]
    async fn battery_is_404_until_first_delivery() {
        let battery = BatteryState::new();
        let app = build_router(test_state(battery.clone(), 1));

        let response = app.clone().oneshot(get_req("/api/battery")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        battery.deliver(BatteryPayload {
            level: Some(95),
            scale: Some(100),
            ..BatteryPayload::default()
        });
        let response = app.oneshot(get_req("/api/battery")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"level\":95"));
    }

    #[tokio::test]
    async fn context_routes_need_a_session() {
        let app = build_router(test_state(BatteryState::new(), 1));
        for uri in ["/api/display", "/api/sensors", "/api/gpu"] {
            let response = app.clone().oneshot(get_req(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED, "{uri}");
        }
    }

    #[tokio::test]
    async fn context_routes_degrade_with_a_session() {
        let mut state = test_state(BatteryState::new(), 1);
        state.ctx = Some(ExecutionContext::new(SessionKind::X11, ":0"));
        let app = build_router(state);

        let response = app.clone().oneshot(get_req("/api/sensors")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "[]");

        let response = app.oneshot(get_req("/api/cpu/frequencies")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "[]");
    }

    #[tokio::test]
    async fn stress_start_rejects_out_of_range_cores() {
        let app = build_router(test_state(BatteryState::new(), 2));

        let response = app
            .clone()
            .oneshot(post_json("/api/stress/start", r#"{"cores":0}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(post_json("/api/stress/start", r#"{"cores":3}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stress_start_rejects_malformed_body() {
        let state = test_state(BatteryState::new(), 3);
        let app = build_router(state.clone());

        for body in [r#"{"cores":"two"}"#, "{not json", r#"{"cores":-1}"#] {
            let response = app
                .clone()
                .oneshot(post_json("/api/stress/start", body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        }
        assert!(!state.stress_monitor.status().running);
    }

    #[tokio::test]
    async fn stress_status_answers_while_engine_is_locked() {
        let state = test_state(BatteryState::new(), 1);
        let app = build_router(state.clone());

        let _held = lock_engine(&state.stress);
        let response = tokio::time::timeout(
            Duration::from_secs(1),
            app.oneshot(get_req("/api/stress")),
        )
        .await
        .expect("статус отвечает при занятом движке")
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"running\":false"));
    }

    #[tokio::test]
    async fn stress_start_status_stop() {
        let state = test_state(BatteryState::new(), 2);
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(post_json("/api/stress/start", r#"{"cores":1}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"running\":true"));

        let response = app.clone().oneshot(get_req("/api/stress")).await.unwrap();
        let text = body_text(response).await;
        assert!(text.contains("\"cores\":1"));

        let response = app
            .oneshot(post_json("/api/stress/stop", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("\"running\":false"));
        assert!(text.contains("\"active_workers\":0"));
        assert!(!state.stress_monitor.status().running);
    }

    #[tokio::test]
    async fn stress_start_without_body_uses_limit() {
        let state = test_state(BatteryState::new(), 2);
        let app = build_router(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/stress/start")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.stress_monitor.status().cores, 2);
        lock_engine(&state.stress).stop();
    }
}
