use crate::kvs::{IndexKvs, LexClient};
use crate::meta::MetadataStore;
use crate::obs::Metrics;
use crate::s3;
use crate::storage::{MemoryObjectStore, ObjectBackend};
use crate::util::config::Config;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub meta: MetadataStore,
    pub kvs: IndexKvs,
    pub objects: Arc<dyn ObjectBackend>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub async fn new(config: Config, metrics: Arc<Metrics>) -> Result<Self, String> {
        let client = LexClient::new(config.redis_url.as_deref()).await?;
        let kvs = IndexKvs::new(client);
        let meta = MetadataStore::new(kvs.clone());
        let objects: Arc<dyn ObjectBackend> = Arc::new(MemoryObjectStore::new());
        Ok(Self {
            config,
            meta,
            kvs,
            objects,
            metrics,
        })
    }
}

pub struct Servers {
    handles: Vec<JoinHandle<()>>,
}

impl Servers {
    pub async fn run_all(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

pub fn build_servers(state: AppState) -> Result<Servers, String> {
    let mut handles = Vec::new();

    let s3_app = s3::router(state.clone());
    handles.push(spawn_server(&state.config.s3_listen, s3_app)?);

    let metrics_app = metrics_router(state.clone());
    handles.push(spawn_server(&state.config.metrics_listen, metrics_app)?);

    Ok(Servers { handles })
}

fn spawn_server(addr: &str, app: Router) -> Result<JoinHandle<()>, String> {
    let socket: SocketAddr = addr
        .parse()
        .map_err(|_| format!("invalid listen addr {addr}"))?;
    let handle = tokio::spawn(async move {
        let listener = match TcpListener::bind(socket).await {
            Ok(val) => val,
            Err(err) => {
                tracing::error!(error = %err, %socket, "listener failed to bind");
                return;
            }
        };
        let _ = axum::serve(listener, app).await;
    });
    Ok(handle)
}

fn metrics_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(ready_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    let _ = encoder.encode(&state.metrics.gather(), &mut buffer);
    String::from_utf8_lossy(&buffer).to_string()
}

const READY_PROBE_INDEX: crate::kvs::IndexId = 0x0000_0000_0000_0000_0000_0000_0000_00ff;

async fn ready_handler(State(state): State<AppState>) -> (StatusCode, &'static str) {
    let probe = state
        .kvs
        .read(READY_PROBE_INDEX, &[b"ready-probe".to_vec()])
        .await;
    if !probe.is_stable() {
        return (StatusCode::SERVICE_UNAVAILABLE, "index store not ready");
    }
    (StatusCode::OK, "ok")
}
