use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router, middleware,
    extract::{Query, State},
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::Config;
use crate::error::AppError;
use crate::login;
use crate::mailer::Mailer;
use crate::records::{DisReportResult, DisRptResult, EpoxyResult, ProcessResult};
use crate::search::{
    DIS_REPORT_RANGE, DIS_RPT_RANGE, EPOXY_RANGE, GRIND_RANGE, POLISH_RANGE, SEARCH_RANGE,
    filter_dis_report, filter_dis_rpt, filter_ecol, filter_epoxy, filter_process, filter_search,
    prune_empty_columns,
};
use crate::sheets::SheetsClient;

/// Shared application state handed to every handler.
pub struct AppState {
    pub config: Config,
    pub sheets: SheetsClient,
    pub mailer: Mailer,
}

/// Query parameters shared by the block-keyed data endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockQuery {
    pub block_no: Option<String>,
    pub part_no: Option<String>,
    pub thickness: Option<String>,
}

/// Query parameters for the colour search.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColourQuery {
    pub factory_color: Option<String>,
    pub sub_color: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

fn require_block(query: &BlockQuery) -> Result<String, AppError> {
    match &query.block_no {
        Some(block) if !block.trim().is_empty() => Ok(block.clone()),
        _ => Err(AppError::missing_block_no()),
    }
}

fn upstream(context: &str, message: &str) -> impl Fn(crate::sheets::SheetsError) -> AppError {
    let context = context.to_string();
    let message = message.to_string();
    move |e| {
        error!(error = %e, "{context} failed");
        AppError::Internal(message.clone())
    }
}

/// Start the portal server.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Config::load();
    let sheets = SheetsClient::new(&config);
    let mailer = Mailer::new(&config).map_err(|e| e as Box<dyn std::error::Error>)?;

    let address = format!("0.0.0.0:{}", config.port);
    let state = Arc::new(AppState {
        config,
        sheets,
        mailer,
    });

    let app = router(state);

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Build the full router: account endpoints, authenticated data endpoints and
/// the static portal shell.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let data_routes = Router::new()
        .route("/api/search", get(search_handler))
        .route("/api/dis-report", get(dis_report_handler))
        .route("/api/dis-rpt", get(dis_rpt_handler))
        .route("/api/grind", get(grind_handler))
        .route("/api/polish", get(polish_handler))
        .route("/api/epoxy", get(epoxy_handler))
        .route("/api/ecol", get(ecol_handler))
        .route_layer(middleware::from_fn(login::require_auth));

    Router::new()
        .merge(data_routes)
        .route("/api/register", post(login::handle_register))
        .route("/api/verify-otp", post(login::handle_verify_otp))
        .route("/api/login", post(login::handle_login))
        .route("/api/logout", post(login::handle_logout))
        .route("/api/user", get(login::current_user))
        .route("/api/forgot-password", post(login::handle_forgot_password))
        .route("/api/forgot-username", post(login::handle_forgot_username))
        .route("/api/reset-password", post(login::handle_reset_password))
        .fallback_service(ServeDir::new(&state.config.static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Main block search over `Data1`, with empty columns pruned from the
/// response so the portal table only renders populated stages.
async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BlockQuery>,
) -> Result<Json<Vec<Value>>, AppError> {
    let block_no = require_block(&query)?;
    let rows = state
        .sheets
        .fetch_rows(SEARCH_RANGE)
        .await
        .map_err(upstream("Search", "Failed to fetch search results"))?;

    let results = filter_search(
        &rows,
        &block_no,
        query.part_no.as_deref(),
        query.thickness.as_deref(),
    );
    Ok(Json(prune_empty_columns(results)))
}

/// Dispatch report over the raw-valued columns of `Data2`.
async fn dis_report_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BlockQuery>,
) -> Result<Json<Vec<DisReportResult>>, AppError> {
    let block_no = require_block(&query)?;
    let rows = state
        .sheets
        .fetch_rows_unformatted(DIS_REPORT_RANGE)
        .await
        .map_err(upstream("Dis Report", "Failed to fetch Dis Report results"))?;

    Ok(Json(filter_dis_report(
        &rows,
        &block_no,
        query.thickness.as_deref(),
    )))
}

/// Dispatch summary over `Data3`.
async fn dis_rpt_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BlockQuery>,
) -> Result<Json<Vec<DisRptResult>>, AppError> {
    let block_no = require_block(&query)?;
    let rows = state
        .sheets
        .fetch_rows(DIS_RPT_RANGE)
        .await
        .map_err(upstream("Dis Rpt", "Failed to fetch Dis Rpt results"))?;

    Ok(Json(filter_dis_rpt(
        &rows,
        &block_no,
        query.part_no.as_deref(),
        query.thickness.as_deref(),
    )))
}

async fn grind_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BlockQuery>,
) -> Result<Json<Vec<ProcessResult>>, AppError> {
    let block_no = require_block(&query)?;
    let rows = state
        .sheets
        .fetch_rows(GRIND_RANGE)
        .await
        .map_err(upstream("Grind search", "Failed to fetch Grind search results"))?;

    Ok(Json(filter_process(
        &rows,
        &block_no,
        query.part_no.as_deref(),
        query.thickness.as_deref(),
    )))
}

async fn polish_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BlockQuery>,
) -> Result<Json<Vec<ProcessResult>>, AppError> {
    let block_no = require_block(&query)?;
    let rows = state
        .sheets
        .fetch_rows(POLISH_RANGE)
        .await
        .map_err(upstream("Polish search", "Failed to fetch Polish search results"))?;

    Ok(Json(filter_process(
        &rows,
        &block_no,
        query.part_no.as_deref(),
        query.thickness.as_deref(),
    )))
}

async fn epoxy_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BlockQuery>,
) -> Result<Json<Vec<EpoxyResult>>, AppError> {
    let block_no = require_block(&query)?;
    let rows = state
        .sheets
        .fetch_rows(EPOXY_RANGE)
        .await
        .map_err(upstream("Epoxy search", "Failed to fetch Epoxy search results"))?;

    Ok(Json(filter_epoxy(
        &rows,
        &block_no,
        query.part_no.as_deref(),
        query.thickness.as_deref(),
    )))
}

/// Colour search over the epoxy tab; all filters optional, substring matched.
async fn ecol_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ColourQuery>,
) -> Result<Json<Vec<EpoxyResult>>, AppError> {
    let rows = state
        .sheets
        .fetch_rows(EPOXY_RANGE)
        .await
        .map_err(upstream("ECol search", "Failed to fetch ECol search results"))?;

    Ok(Json(filter_ecol(
        &rows,
        query.factory_color.as_deref(),
        query.sub_color.as_deref(),
        query.kind.as_deref(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_number_is_required_and_must_not_be_blank() {
        let query = BlockQuery {
            block_no: None,
            part_no: None,
            thickness: None,
        };
        assert!(require_block(&query).is_err());

        let query = BlockQuery {
            block_no: Some("   ".into()),
            part_no: None,
            thickness: None,
        };
        assert!(require_block(&query).is_err());

        let query = BlockQuery {
            block_no: Some("B-101".into()),
            part_no: None,
            thickness: None,
        };
        assert_eq!(require_block(&query).unwrap(), "B-101");
    }

    #[test]
    fn block_query_parses_camel_case_parameters() {
        let query: BlockQuery = query_from_pairs("blockNo=B-1&partNo=P2&thickness=2");
        assert_eq!(query.block_no.as_deref(), Some("B-1"));
        assert_eq!(query.part_no.as_deref(), Some("P2"));
        assert_eq!(query.thickness.as_deref(), Some("2"));
    }

    #[test]
    fn colour_query_accepts_type_parameter() {
        let query: ColourQuery = query_from_pairs("factoryColor=Galaxy&type=A");
        assert_eq!(query.factory_color.as_deref(), Some("Galaxy"));
        assert_eq!(query.kind.as_deref(), Some("A"));
        assert!(query.sub_color.is_none());
    }

    // Splits already-decoded key=value pairs and deserializes them through a
    // JSON map with the same field names, exercising the rename attributes.
    fn query_from_pairs<T: serde::de::DeserializeOwned>(qs: &str) -> T {
        let map: std::collections::HashMap<String, String> = qs
            .split('&')
            .filter_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                Some((k.to_string(), v.to_string()))
            })
            .collect();
        serde_json::from_value(serde_json::to_value(map).unwrap()).unwrap()
    }
}
