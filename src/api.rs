use std::sync::Arc;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get_service, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::{
    config::{CanvasCfg, ServiceCfg},
    error::{ProcessError, UploadError},
    imaging::{self, CanvasRenderer, PreviewMaker},
    retention,
    store::{self, UploadStore},
};

#[derive(Clone)]
pub struct AppState {
    cfg: Arc<ServiceCfg>,
    store: Arc<UploadStore>,
}

impl AppState {
    pub fn new(cfg: ServiceCfg, store: UploadStore) -> Self {
        Self { cfg: Arc::new(cfg), store: Arc::new(store) }
    }

    /// Validate `cfg` and open its upload directory.
    pub async fn from_cfg(cfg: ServiceCfg) -> Result<Self> {
        cfg.validate()?;
        let store = UploadStore::open(&cfg.upload_dir)
            .await
            .context(format!("Failed to create upload dir: {}", cfg.upload_dir.display()))?;
        Ok(Self::new(cfg, store))
    }
}

pub fn router(state: AppState) -> Router {
    let limit = state.cfg.max_upload_bytes;
    Router::new()
        .route("/", get_service(ServeFile::new(&state.cfg.index_file)))
        .route("/upload", post(upload))
        .route("/process", post(process))
        .nest_service("/static", ServeDir::new(&state.cfg.static_dir))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(cfg: ServiceCfg) -> Result<()> {
    let bind = cfg.bind.clone();
    let state = AppState::from_cfg(cfg).await?;
    info!(dir = %state.store.dir().display(), "upload directory ready");

    let _sweeper = match state.cfg.retention.clone() {
        Some(r) => {
            info!(max_age_secs = r.max_age_secs, every_secs = r.sweep_every_secs, "upload retention enabled");
            Some(retention::spawn_sweeper(state.store.clone(), r))
        }
        None => {
            info!("upload retention disabled, stored files are never removed by this service");
            None
        }
    };

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .context(format!("Failed to bind {bind}"))?;
    info!("passport-photo listening on http://{bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let term = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => { s.recv().await; }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }
    info!("shutdown signal received");
}

#[derive(Serialize)]
struct UploadResp {
    success: bool,
    filename: String,
    image: String,
}

async fn upload(
    State(st): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResp>, ApiErr> {
    // a body that is not multipart at all carries no file either
    let Ok(multipart) = multipart else { return Err(UploadError::NoFile.into()) };
    Ok(Json(handle_upload(&st, multipart).await?))
}

async fn handle_upload(st: &AppState, mut multipart: Multipart) -> Result<UploadResp, UploadError> {
    let mut file = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") { continue; }
        let name = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await?;
        file = Some((name, data));
        break;
    }

    let (name, data) = file.ok_or(UploadError::NoFile)?;
    if name.is_empty() {
        return Err(UploadError::NoFile);
    }
    let ext = store::allowed_extension(&name, &st.cfg.allowed_extensions)
        .ok_or(UploadError::BadType)?
        .to_string();

    let maker = PreviewMaker::from(&st.cfg.preview);
    let src = data.clone();
    let preview = tokio::task::spawn_blocking(move || maker.preview_upload(&src))
        .await
        .map_err(|e| UploadError::Task(e.to_string()))??;

    let stored = st.store.save(&ext, &data).await?;
    info!(
        filename = %stored.filename, original = %name, bytes = data.len(),
        preview_w = preview.width, preview_h = preview.height,
        "stored upload"
    );

    Ok(UploadResp {
        success: true,
        filename: stored.filename,
        image: imaging::to_data_url(&preview.jpeg),
    })
}

#[derive(Debug, Deserialize)]
struct ProcessReq {
    #[serde(rename = "imageData")]
    image_data: String,
    width: Option<u32>,
    height: Option<u32>,
}

/// The body is parsed by hand so a malformed request is reported like any
/// other processing failure.
async fn process(State(st): State<AppState>, body: Bytes) -> Result<impl IntoResponse, ApiErr> {
    let jpeg = handle_process(&st, &body).await.map_err(|e| {
        error!(code = e.code(), error = %e, "error processing image");
        ApiErr::from(e)
    })?;

    let disposition = format!("attachment; filename=\"{}\"", st.cfg.output.download_name);
    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        jpeg,
    ))
}

async fn handle_process(st: &AppState, body: &[u8]) -> Result<Vec<u8>, ProcessError> {
    let req: ProcessReq = serde_json::from_slice(body)?;
    let canvas = CanvasCfg {
        width: req.width.unwrap_or(st.cfg.canvas.width),
        height: req.height.unwrap_or(st.cfg.canvas.height),
    };
    let renderer = CanvasRenderer::from(&st.cfg.output);
    renderer.check_canvas(canvas)?;

    let jpeg = tokio::task::spawn_blocking(move || renderer.render_data_url(&req.image_data, canvas))
        .await
        .map_err(|e| ProcessError::Task(e.to_string()))??;
    info!(width = canvas.width, height = canvas.height, bytes = jpeg.len(), "rendered canvas");
    Ok(jpeg)
}

#[derive(Debug)]
struct ApiErr {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<UploadError> for ApiErr {
    fn from(e: UploadError) -> Self {
        Self { status: e.status(), code: e.code(), message: e.to_string() }
    }
}

impl From<ProcessError> for ApiErr {
    fn from(e: ProcessError) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, code: e.code(), message: e.to_string() }
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> axum::response::Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            code: &'static str,
        }
        (
            self.status,
            Json(ErrorResponse { error: self.message, code: self.code }),
        )
            .into_response()
    }
}
