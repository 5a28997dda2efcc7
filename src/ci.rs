//! CI ingest endpoints (§4.E): build notifications from the CI system,
//! distinct from the provider webhook. These are the two writes that feed
//! the Build Correlation Engine.

use std::sync::Arc;

use axum::extract::{Form, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::AppState;
use crate::correlation;
use crate::db::bus::BusEnqueueFailed;
use crate::db::{builds, jobs};
use crate::errors::{CoreError, HandlerError};

/// `fan_out_for_build` fails for many reasons (a bad read, a down
/// connection) but only one of them is a bus-publish failure specifically:
/// downcast for the marker `enqueue` tags its own failure with and reserve
/// the 503 for that case; everything else is a generic 500.
fn classify_fan_out_error(err: anyhow::Error) -> HandlerError {
    if err.downcast_ref::<BusEnqueueFailed>().is_some() {
        HandlerError::Core(CoreError::BusUnavailable(err))
    } else {
        HandlerError::App(err.into())
    }
}

#[derive(Debug, Deserialize)]
pub struct BuildShaForm {
    job_name: String,
    build_number: i32,
    project_owner: String,
    project_name: String,
    sha: String,
}

pub async fn build_sha(
    State(state): State<Arc<AppState>>,
    Form(form): Form<BuildShaForm>,
) -> Result<impl IntoResponse, HandlerError> {
    let client = state.db.get().await?;

    let job = jobs::find_by_name(&client, &form.job_name)
        .await?
        .ok_or_else(|| CoreError::UnknownJob(form.job_name.clone()))?;

    let project = crate::db::projects::find_by_owner_name(
        &client,
        &form.project_owner,
        &form.project_name,
    )
    .await?
    .ok_or_else(|| CoreError::UnknownProject {
        owner: form.project_owner.clone(),
        name: form.project_name.clone(),
    })?;

    let build = builds::get_or_create(&client, job.id, form.build_number).await?;
    builds::set_build_sha(&client, build.id, project.id, &form.sha).await?;

    correlation::fan_out_for_build(&client, build.id)
        .await
        .map_err(classify_fan_out_error)?;

    Ok("processed")
}

#[derive(Debug, Deserialize)]
pub struct BuildStatusPayload {
    name: String,
    build: BuildStatusBody,
}

#[derive(Debug, Deserialize)]
pub struct BuildStatusBody {
    number: i32,
    #[allow(dead_code)]
    phase: String,
    status: Option<String>,
}

pub async fn build_status(
    State(state): State<Arc<AppState>>,
    axum::Json(payload): axum::Json<BuildStatusPayload>,
) -> Result<impl IntoResponse, HandlerError> {
    let client = state.db.get().await?;

    let job = jobs::find_by_name(&client, &payload.name)
        .await?
        .ok_or_else(|| CoreError::UnknownJob(payload.name.clone()))?;

    let Some(status) = payload.build.status else {
        // A phase transition with no terminal status yet; nothing to record.
        return Ok("processed");
    };

    let build = builds::get_or_create(&client, job.id, payload.build.number).await?;
    let success = status == "SUCCESS";
    builds::set_result(&client, build.id, Some(success), Some(&status)).await?;

    correlation::fan_out_for_build(&client, build.id)
        .await
        .map_err(classify_fan_out_error)?;

    Ok("processed")
}
