use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use arbor_core::models::{
    ChildrenTarget, CreatePageOptions, PageInfoOptions, PageInfoSelector, User,
};
use arbor_core::{Arbor, ArborError};

use crate::WebState;
use crate::dto::{
    ChildrenQuery, ChildrenResponse, CreatePageRequest, DeleteRequest, DuplicateRequest,
    InfoQuery, InfoResponse, ItemQuery, ItemResponse, OperationsResponse, PageResponse,
    RenameRequest, RetryRequest, RevertRequest, RevisionsQuery, RevisionsResponse,
    UpdatePageRequest,
};
use crate::error::arbor_error_response;
use crate::viewer::Viewer;

/// Runs a store call off the async workers; the core is synchronous and may
/// block on SQLite or a remote uploader.
async fn blocking<T, F>(state: &WebState, call: F) -> arbor_core::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Arbor) -> arbor_core::Result<T> + Send + 'static,
{
    let app = state.app.clone();
    tokio::task::spawn_blocking(move || call(&app))
        .await
        .map_err(|err| ArborError::Internal(format!("request task failed: {err}")))?
}

fn respond<T: Serialize>(
    result: arbor_core::Result<T>,
    status: StatusCode,
    operation: &str,
    path: Option<String>,
) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(err) => arbor_error_response(err, operation, path),
    }
}

fn require_admin(viewer: &User) -> arbor_core::Result<()> {
    if viewer.is_admin {
        Ok(())
    } else {
        Err(ArborError::PermissionDenied(
            "operation ledger actions require an administrator".to_string(),
        ))
    }
}

pub async fn root(State(state): State<WebState>, Viewer(viewer): Viewer) -> Response {
    let result = blocking(&state, move |app| app.root_page(&viewer))
        .await
        .map(|page| PageResponse { page });
    respond(result, StatusCode::OK, "page_listing.root", Some("/".to_string()))
}

pub async fn children(
    State(state): State<WebState>,
    Viewer(viewer): Viewer,
    Query(query): Query<ChildrenQuery>,
) -> Response {
    let label = query.path.clone().or_else(|| query.id.clone());
    let target = match ChildrenTarget::from_parts(query.id, query.path) {
        Ok(target) => target,
        Err(err) => return arbor_error_response(err, "page_listing.children", label),
    };
    let result = blocking(&state, move |app| app.children(&target, &viewer))
        .await
        .map(|children| ChildrenResponse { children });
    respond(result, StatusCode::OK, "page_listing.children", label)
}

pub async fn item(
    State(state): State<WebState>,
    Viewer(viewer): Viewer,
    Query(query): Query<ItemQuery>,
) -> Response {
    let id = query.id.clone();
    let result = blocking(&state, move |app| app.item(&query.id, &viewer))
        .await
        .map(|item| ItemResponse { item });
    respond(result, StatusCode::OK, "page_listing.item", Some(id))
}

pub async fn info(
    State(state): State<WebState>,
    Viewer(viewer): Viewer,
    Query(query): Query<InfoQuery>,
) -> Response {
    let selector = match (query.page_ids, query.path) {
        (Some(ids), None) => PageInfoSelector::Ids(
            ids.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(ToString::to_string)
                .collect(),
        ),
        (None, Some(path)) => PageInfoSelector::Path(path),
        _ => {
            return arbor_error_response(
                ArborError::Validation("exactly one of page_ids or path is required".to_string()),
                "page_listing.info",
                None,
            );
        }
    };
    let options = PageInfoOptions {
        attach_bookmark_count: query.attach_bookmark_count,
        attach_short_body: query.attach_short_body,
    };
    let result = blocking(&state, move |app| app.page_info(&selector, &viewer, options))
        .await
        .map(|info| InfoResponse { info });
    respond(result, StatusCode::OK, "page_listing.info", None)
}

pub async fn create_page(
    State(state): State<WebState>,
    Viewer(viewer): Viewer,
    Json(request): Json<CreatePageRequest>,
) -> Response {
    let path = request.path.clone();
    let mut options = CreatePageOptions {
        granted_group: request.granted_group,
        wip: request.wip,
        ..CreatePageOptions::default()
    };
    if let Some(grant) = request.grant {
        options.grant = grant;
    }
    let result = blocking(&state, move |app| {
        app.create_page(&request.path, &request.body, &viewer, &options)
    })
    .await
    .map(|page| PageResponse { page });
    respond(result, StatusCode::CREATED, "pages.create", Some(path))
}

pub async fn update_page(
    State(state): State<WebState>,
    Viewer(viewer): Viewer,
    Json(request): Json<UpdatePageRequest>,
) -> Response {
    let page_id = request.page_id.clone();
    let result = blocking(&state, move |app| {
        app.update_page(
            &request.page_id,
            request.revision_id.as_deref(),
            &request.body,
            &viewer,
        )
    })
    .await
    .map(|page| PageResponse { page });
    respond(result, StatusCode::OK, "pages.update", Some(page_id))
}

pub async fn revisions(
    State(state): State<WebState>,
    Viewer(viewer): Viewer,
    Query(query): Query<RevisionsQuery>,
) -> Response {
    let page_id = query.page_id.clone();
    let result = blocking(&state, move |app| {
        app.list_revisions(&query.page_id, query.limit, &viewer)
    })
    .await
    .map(|revisions| RevisionsResponse { revisions });
    respond(result, StatusCode::OK, "pages.revisions", Some(page_id))
}

pub async fn rename_page(
    State(state): State<WebState>,
    Viewer(viewer): Viewer,
    Json(request): Json<RenameRequest>,
) -> Response {
    let page_id = request.page_id.clone();
    let result = blocking(&state, move |app| {
        app.rename_page(&request.page_id, &request.options, &viewer)
    })
    .await;
    respond(result, StatusCode::ACCEPTED, "pages.rename", Some(page_id))
}

pub async fn delete_page(
    State(state): State<WebState>,
    Viewer(viewer): Viewer,
    Json(request): Json<DeleteRequest>,
) -> Response {
    let page_id = request.page_id.clone();
    let result = blocking(&state, move |app| {
        app.delete_page(&request.page_id, request.options, &viewer)
    })
    .await;
    respond(result, StatusCode::ACCEPTED, "pages.delete", Some(page_id))
}

pub async fn delete_page_completely(
    State(state): State<WebState>,
    Viewer(viewer): Viewer,
    Json(request): Json<DeleteRequest>,
) -> Response {
    let page_id = request.page_id.clone();
    let result = blocking(&state, move |app| {
        app.delete_page_completely(&request.page_id, request.options, &viewer)
    })
    .await;
    respond(
        result,
        StatusCode::ACCEPTED,
        "pages.delete_completely",
        Some(page_id),
    )
}

pub async fn duplicate_page(
    State(state): State<WebState>,
    Viewer(viewer): Viewer,
    Json(request): Json<DuplicateRequest>,
) -> Response {
    let page_id = request.page_id.clone();
    let result = blocking(&state, move |app| {
        app.duplicate_page(&request.page_id, &request.options, &viewer)
    })
    .await;
    respond(result, StatusCode::ACCEPTED, "pages.duplicate", Some(page_id))
}

pub async fn revert_page(
    State(state): State<WebState>,
    Viewer(viewer): Viewer,
    Json(request): Json<RevertRequest>,
) -> Response {
    let page_id = request.page_id.clone();
    let result = blocking(&state, move |app| {
        app.revert_page(&request.page_id, request.options, &viewer)
    })
    .await;
    respond(result, StatusCode::ACCEPTED, "pages.revert", Some(page_id))
}

pub async fn list_operations(State(state): State<WebState>, Viewer(viewer): Viewer) -> Response {
    let result = blocking(&state, move |app| {
        require_admin(&viewer)?;
        app.list_operations()
    })
    .await
    .map(|operations| OperationsResponse { operations });
    respond(result, StatusCode::OK, "operations.list", None)
}

pub async fn resume_operations(State(state): State<WebState>, Viewer(viewer): Viewer) -> Response {
    let result = blocking(&state, move |app| {
        require_admin(&viewer)?;
        app.resume_pending_operations()
    })
    .await;
    respond(result, StatusCode::OK, "operations.resume", None)
}

pub async fn retry_operation(
    State(state): State<WebState>,
    Viewer(viewer): Viewer,
    Json(request): Json<RetryRequest>,
) -> Response {
    let operation_id = request.operation_id.clone();
    let result = blocking(&state, move |app| {
        require_admin(&viewer)?;
        app.retry_operation(&request.operation_id)
    })
    .await;
    respond(result, StatusCode::OK, "operations.retry", Some(operation_id))
}
