//! Client query endpoints.
//!
//! Clients raise queries; admins list, filter, inspect and close them.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{Query, QueryDraft, QueryFilter, QueryHeading, QuerySummary, UserRole};
use crate::AppState;

use super::auth::AuthContext;
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::{ApiJson, ApiQuery};
use super::validation::{
    parse_heading_filter, parse_status_filter, validate_description, validate_heading,
    validate_mobile,
};

/// Request to raise a query. The email comes from the client's account.
#[derive(Debug, Deserialize)]
pub struct CreateQueryRequest {
    pub client_mobile: String,
    pub query_heading: String,
    pub query_description: String,
}

/// Request to close a query, optionally rewording it first
#[derive(Debug, Deserialize)]
pub struct CloseQueryRequest {
    pub query_heading: String,
    pub query_description: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListQueriesParams {
    pub status: Option<String>,
    pub heading: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListQueriesResponse {
    pub queries: Vec<Query>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeadingsResponse {
    /// Categories a client can pick from
    pub categories: Vec<String>,
    /// Headings present on stored queries, for filter options
    pub in_use: Vec<String>,
}

/// Submit a new query
///
/// POST /api/queries
pub async fn create_query(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiJson(req): ApiJson<CreateQueryRequest>,
) -> Result<(StatusCode, Json<Query>), ApiError> {
    ctx.require(UserRole::Client)?;

    let mut errors = ValidationErrorBuilder::new();
    errors.check("client_mobile", validate_mobile(req.client_mobile.trim()));
    let heading = errors.check("query_heading", validate_heading(&req.query_heading));
    errors.check("query_description", validate_description(&req.query_description));
    errors.finish()?;
    let heading = heading.ok_or_else(|| {
        ApiError::validation_field("query_heading", "Query heading is required")
    })?;

    let draft = QueryDraft {
        client_email: ctx.user.client_email.clone(),
        client_mobile: req.client_mobile,
        query_heading: heading.as_str().to_string(),
        query_description: req.query_description,
    };

    let query_id = Query::create(&state.db, &draft, state.config.queries.id_floor).await?;

    let query = Query::find(&state.db, query_id.as_str())
        .await?
        .ok_or_else(|| ApiError::internal("Query was saved but could not be read back"))?;

    Ok((StatusCode::CREATED, Json(query)))
}

/// List queries, newest first
///
/// GET /api/queries?status=Open&heading=Bug%20Report
pub async fn list_queries(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    ApiQuery(params): ApiQuery<ListQueriesParams>,
) -> Result<Json<ListQueriesResponse>, ApiError> {
    ctx.require(UserRole::Admin)?;

    let status = parse_status_filter(params.status.as_deref())
        .map_err(|e| ApiError::validation_field("status", e))?;
    let filter = QueryFilter {
        status,
        heading: parse_heading_filter(params.heading.as_deref()),
    };

    let queries = Query::list(&state.db, &filter).await?;
    let total = queries.len();

    Ok(Json(ListQueriesResponse { queries, total }))
}

/// Get a single query
///
/// GET /api/queries/:id
pub async fn get_query(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<Query>, ApiError> {
    ctx.require(UserRole::Admin)?;

    let query = Query::find(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Query {} not found", id)))?;

    Ok(Json(query))
}

/// Save heading/description and close an open query
///
/// POST /api/queries/:id/close
pub async fn close_query(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<CloseQueryRequest>,
) -> Result<Json<Query>, ApiError> {
    ctx.require(UserRole::Admin)?;

    let mut errors = ValidationErrorBuilder::new();
    let heading = errors.check("query_heading", validate_heading(&req.query_heading));
    errors.check("query_description", validate_description(&req.query_description));
    errors.finish()?;
    let heading = heading.ok_or_else(|| {
        ApiError::validation_field("query_heading", "Query heading is required")
    })?;

    let closed = Query::close(&state.db, &id, heading.as_str(), &req.query_description).await?;

    let query = Query::find(&state.db, &id).await?;
    match (closed, query) {
        (true, Some(query)) => {
            tracing::info!(query_id = %id, admin = %ctx.user.username, "Query closed by admin");
            Ok(Json(query))
        }
        (false, Some(_)) => Err(ApiError::conflict(format!("Query {} is already closed", id))),
        (_, None) => Err(ApiError::not_found(format!("Query {} not found", id))),
    }
}

/// Open/closed counts
///
/// GET /api/queries/summary
pub async fn query_summary(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<Json<QuerySummary>, ApiError> {
    ctx.require(UserRole::Admin)?;
    Ok(Json(Query::summary(&state.db).await?))
}

/// Heading categories and headings in use
///
/// GET /api/headings
pub async fn list_headings(
    State(state): State<Arc<AppState>>,
    _ctx: AuthContext,
) -> Result<Json<HeadingsResponse>, ApiError> {
    let in_use = Query::distinct_headings(&state.db).await?;

    Ok(Json(HeadingsResponse {
        categories: QueryHeading::labels()
            .into_iter()
            .map(String::from)
            .collect(),
        in_use,
    }))
}
