//! Tenant-scoped usage read endpoint.

use crate::api::error::{api_internal, ApiError};
use crate::api::types::{UsageBucketView, UsageResponse};
use crate::app::AppState;
use crate::auth::authenticate;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use courier_engine::usage::current_period;

#[utoipa::path(
    get,
    path = "/v1/usage",
    tag = "usage",
    responses(
        (status = 200, description = "Current-period usage per channel", body = UsageResponse)
    )
)]
pub(crate) async fn get_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UsageResponse>, ApiError> {
    let (ctx, project) = authenticate(&state, &headers).await?;
    let period = current_period();
    let buckets = state
        .store
        .usage_breakdown(ctx.project_id, &period)
        .await
        .map_err(|err| api_internal("failed to read usage", &err))?;
    let total = buckets.iter().map(|bucket| bucket.count).sum();
    Ok(Json(UsageResponse {
        period,
        total,
        monthly_limit: project.monthly_limit,
        buckets: buckets.into_iter().map(UsageBucketView::from).collect(),
    }))
}
