//! Read API (§4.I): JSON-returning `axum` handlers under `/api/...`. No
//! template rendering — that's the dashboard frontend's job, out of scope
//! here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::AppState;
use crate::checks::{self, CheckStatus, Verdict};
use crate::correlation::{self, CorrelationMemo};
use crate::db::{builds, projects, pull_requests};
use crate::errors::{CoreError, HandlerError};
use crate::models::PullRequest;

#[derive(Debug, Serialize)]
pub struct PullRequestSummary {
    #[serde(flatten)]
    pull_request: PullRequest,
    owner: String,
    repo: String,
    verdict: Verdict,
    checks: Vec<CheckStatus>,
}

/// `GET /api/pulls` — every open pull request with its aggregated verdict
/// and per-check detail.
pub async fn list_pulls(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, HandlerError> {
    let client = state.db.get().await?;
    let (open_prs, projects_by_id, jobs_by_project) =
        correlation::load_evaluation_context(&client).await?;

    let mut memo = CorrelationMemo::new();
    let mut summaries = Vec::with_capacity(open_prs.len());
    for pr in open_prs {
        let project = projects_by_id
            .get(&pr.project_id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownProject {
                owner: String::new(),
                name: String::new(),
            })?;
        let no_jobs = Vec::new();
        let jobs_for_project = jobs_by_project.get(&pr.project_id).unwrap_or(&no_jobs);
        let checks = checks::evaluate(
            &client,
            &mut memo,
            &projects_by_id,
            jobs_for_project,
            &pr,
            &state.config.server_url,
        )
        .await?;
        let verdict = checks::verdict(&checks);

        summaries.push(PullRequestSummary {
            owner: project.owner,
            repo: project.name,
            pull_request: pr,
            verdict,
            checks,
        });
    }

    Ok(Json(summaries))
}

#[derive(Debug, Serialize)]
pub struct PullRequestDetail {
    #[serde(flatten)]
    pull_request: PullRequest,
    verdict: Verdict,
    checks: Vec<CheckStatus>,
    job_builds: Vec<JobBuildHistory>,
}

#[derive(Debug, Serialize)]
pub struct JobBuildHistory {
    job_name: String,
    builds: Vec<BuildSummary>,
}

#[derive(Debug, Serialize)]
pub struct BuildSummary {
    build_number: i32,
    success: Option<bool>,
    status: Option<String>,
    shas: Vec<(String, String)>,
}

const BUILD_HISTORY_LIMIT: usize = 10;

/// `GET /api/pulls/{owner}/{repo}/{number}` — one PR with per-job build
/// history (the latest builds of each related job, with their SHA tuples
/// and success).
pub async fn pull_detail(
    State(state): State<Arc<AppState>>,
    Path((owner, repo, number)): Path<(String, String, i32)>,
) -> Result<impl IntoResponse, HandlerError> {
    let client = state.db.get().await?;

    let project = projects::find_by_owner_name(&client, &owner, &repo)
        .await?
        .ok_or_else(|| CoreError::UnknownProject {
            owner: owner.clone(),
            name: repo.clone(),
        })?;

    let pr = pull_requests::find(&client, project.id, number)
        .await?
        .ok_or_else(|| CoreError::UnknownProject {
            owner: owner.clone(),
            name: repo.clone(),
        })?;

    let (jobs_for_project, projects_by_id) =
        correlation::load_project_scope(&client, project.id).await?;

    let mut memo = CorrelationMemo::new();
    let checks = checks::evaluate(
        &client,
        &mut memo,
        &projects_by_id,
        &jobs_for_project,
        &pr,
        &state.config.server_url,
    )
    .await?;
    let verdict = checks::verdict(&checks);

    let mut job_builds = Vec::with_capacity(jobs_for_project.len());
    for job in &jobs_for_project {
        let mut shas_by_build =
            builds::build_shas_for_job_project(&client, job.id, project.id).await?;
        shas_by_build.sort_by(|a, b| b.1.cmp(&a.1));
        shas_by_build.truncate(BUILD_HISTORY_LIMIT);

        let mut summaries = Vec::with_capacity(shas_by_build.len());
        for (build_id, build_number, _sha) in shas_by_build {
            let Some(build) = builds::find(&client, job.id, build_number).await? else {
                continue;
            };
            let shas = builds::shas_for_build(&client, build_id)
                .await?
                .into_iter()
                .map(|bs| {
                    let owner_name = projects_by_id
                        .get(&bs.project_id)
                        .map(|p| p.full_name())
                        .unwrap_or_default();
                    (owner_name, bs.sha)
                })
                .collect();
            summaries.push(BuildSummary {
                build_number,
                success: build.success,
                status: build.status,
                shas,
            });
        }

        job_builds.push(JobBuildHistory {
            job_name: job.name.clone(),
            builds: summaries,
        });
    }

    Ok(Json(PullRequestDetail {
        pull_request: pr,
        verdict,
        checks,
        job_builds,
    }))
}

/// `GET /api/jobs/{owner}/{repo}/{number}` — job-status page keyed by
/// `(project_owner, project_name, pr_number)`: the raw per-job
/// `(build_number, success)` mapping with no check aggregation on top.
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path((owner, repo, number)): Path<(String, String, i32)>,
) -> Result<impl IntoResponse, HandlerError> {
    let client = state.db.get().await?;

    let project = projects::find_by_owner_name(&client, &owner, &repo)
        .await?
        .ok_or_else(|| CoreError::UnknownProject {
            owner: owner.clone(),
            name: repo.clone(),
        })?;
    let pr = pull_requests::find(&client, project.id, number)
        .await?
        .ok_or_else(|| CoreError::UnknownProject {
            owner: owner.clone(),
            name: repo.clone(),
        })?;

    let (jobs_for_project, projects_by_id) =
        correlation::load_project_scope(&client, project.id).await?;

    let mut memo = CorrelationMemo::new();
    let mut results = Vec::with_capacity(jobs_for_project.len());
    for job in &jobs_for_project {
        let (build_number, success) = memo.result_for(&client, job, &projects_by_id, &pr).await?;
        results.push(serde_json::json!({
            "job_name": job.name,
            "build_number": build_number,
            "success": success,
        }));
    }

    Ok(Json(results))
}

pub async fn liveness() -> &'static str {
    "cinch-merge-gate is up"
}
