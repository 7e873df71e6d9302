use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Router, middleware,
    routing::{get, post},
};

use arbor_core::Arbor;
use arbor_core::models::ResumeReport;

mod dto;
mod error;
mod handlers;
mod security;
mod viewer;


#[derive(Clone)]
pub(crate) struct WebState {
    pub(crate) app: Arbor,
}

impl WebState {
    fn new(app: Arbor) -> Self {
        Self { app }
    }
}

/// Start the page-tree API server and block until shutdown.
///
/// # Errors
/// Returns an error when the startup sweep fails, the runtime cannot be created,
/// the socket cannot be bound, or the server exits with a runtime failure.
pub fn serve_web(app: Arbor, host: &str, port: u16) -> Result<()> {
    let state = WebState::new(app);
    let recovery = run_startup_recovery(&state.app)
        .context("startup sweep failed; refusing to serve the page tree")?;
    let bind_addr = format!("{host}:{port}");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build web runtime")?;

    tracing::info!(
        target: "arbor::web",
        reclaimed = recovery.reclaimed,
        scanned = recovery.scanned,
        completed = recovery.completed,
        discarded = recovery.discarded,
        failed = recovery.failed,
        "startup sweep complete"
    );

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind web server at {bind_addr}"))?;
        tracing::info!(
            target: "arbor::web",
            addr = %listener.local_addr()?,
            "page tree api listening"
        );

        let sweeper = spawn_periodic_sweep(state.app.clone());
        let served = axum::serve(listener, app_router(state))
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .context("web server failed");
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        served
    })
}

/// Drive every pending ledger entry forward before accepting requests.
///
/// Entries that stay failed are reported, not fatal: they keep their subtree
/// locked until an operator retries them.
pub(crate) fn run_startup_recovery(app: &Arbor) -> Result<ResumeReport> {
    app.initialize().context("failed to initialize page store")?;
    let report = app.resume_pending_operations()?;
    if report.failed > 0 {
        tracing::warn!(
            target: "arbor::web",
            failed = report.failed,
            "failed operations are waiting for an operator retry"
        );
    }
    Ok(report)
}

/// Re-drives pending and retrying ledger entries every configured interval
/// for as long as the server runs. `None` when the interval is 0.
pub(crate) fn spawn_periodic_sweep(app: Arbor) -> Option<tokio::task::JoinHandle<()>> {
    let secs = app.config().operations.sweep_interval_secs;
    if secs == 0 {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The startup sweep already ran.
        interval.tick().await;
        loop {
            interval.tick().await;
            run_periodic_sweep(&app).await;
        }
    }))
}

/// One sweep off the async workers. Errors are logged; the next tick tries
/// again.
pub(crate) async fn run_periodic_sweep(app: &Arbor) -> Option<ResumeReport> {
    let worker = app.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let report = worker.resume_pending_operations()?;
        let running = worker.reap_background_workers()?;
        Ok::<_, arbor_core::ArborError>((report, running))
    })
    .await;
    match joined {
        Ok(Ok((report, running))) => {
            if report.scanned > 0 {
                tracing::debug!(
                    target: "arbor::web",
                    scanned = report.scanned,
                    completed = report.completed,
                    retrying = report.retrying,
                    busy = report.busy,
                    failed = report.failed,
                    background_workers = running,
                    "periodic sweep finished"
                );
            }
            Some(report)
        }
        Ok(Err(err)) => {
            tracing::warn!(target: "arbor::web", error = %err, "periodic sweep failed");
            None
        }
        Err(err) => {
            tracing::warn!(target: "arbor::web", error = %err, "periodic sweep task failed");
            None
        }
    }
}

pub(crate) fn app_router(state: WebState) -> Router {
    Router::new()
        .route("/api/page-listing/root", get(handlers::root))
        .route("/api/page-listing/children", get(handlers::children))
        .route("/api/page-listing/item", get(handlers::item))
        .route("/api/page-listing/info", get(handlers::info))
        .route("/api/pages/create", post(handlers::create_page))
        .route("/api/pages/update", post(handlers::update_page))
        .route("/api/pages/revisions", get(handlers::revisions))
        .route("/api/pages/rename", post(handlers::rename_page))
        .route("/api/pages/delete", post(handlers::delete_page))
        .route(
            "/api/pages/delete-completely",
            post(handlers::delete_page_completely),
        )
        .route("/api/pages/duplicate", post(handlers::duplicate_page))
        .route("/api/pages/revert", post(handlers::revert_page))
        .route("/api/operations", get(handlers::list_operations))
        .route("/api/operations/resume", post(handlers::resume_operations))
        .route("/api/operations/retry", post(handlers::retry_operation))
        .layer(middleware::from_fn(security::security_headers_middleware))
        .with_state(state)
}
