//! The worker (§4.F): a single cooperative polling loop draining the event
//! bus, one message at a time. Spawned the same way the teacher's scheduler
//! and runner tasks are — wrapped in an outer supervisor loop that
//! re-launches the inner task after a panic rather than taking the process
//! down with it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::task;
use tokio::time;

use crate::AppState;
use crate::checks;
use crate::correlation::{self, CorrelationMemo};
use crate::db::{bus, projects, pull_requests};
use crate::events::BusEvent;

const DRAIN_CADENCE: Duration = Duration::from_secs(5);
const CLAIM_BATCH_SIZE: i64 = 16;
const RELAUNCH_BACKOFF: Duration = Duration::from_secs(5);

/// Spawns the drain loop in a supervised background task. Disabled entirely
/// when `is_worker_disabled()`, so integration tests can drive state
/// transitions deterministically instead of racing this loop.
pub fn spawn(state: Arc<AppState>) {
    if crate::config::is_worker_disabled() {
        tracing::warn!("worker loop disabled (TRIAGEBOT_TEST_DISABLE_JOBS set)");
        return;
    }

    task::spawn(async move {
        loop {
            let state = state.clone();
            let res = task::spawn(async move { drain_loop(state).await });

            match res.await {
                Err(err) if err.is_panic() => {
                    tracing::error!("worker drain loop died (error={err})");
                    time::sleep(RELAUNCH_BACKOFF).await;
                }
                Ok(Err(err)) => {
                    tracing::error!("worker drain loop exited with error: {err:#}");
                    time::sleep(RELAUNCH_BACKOFF).await;
                }
                _ => unreachable!("drain_loop never returns Ok"),
            }
        }
    });
}

async fn drain_loop(state: Arc<AppState>) -> anyhow::Result<()> {
    let mut interval = time::interval(DRAIN_CADENCE);
    loop {
        interval.tick().await;
        if let Err(err) = drain_once(&state).await {
            tracing::error!("draining bus events: {err:#}");
        }
    }
}

async fn drain_once(state: &AppState) -> anyhow::Result<()> {
    let client = state.db.get().await.context("connecting for drain")?;
    let claimed = bus::claim_batch(&client, CLAIM_BATCH_SIZE).await?;

    for event in claimed {
        let payload: BusEvent = match event.decode() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!("undecodable bus event {}: {err:#}", event.id);
                bus::ack(&client, event.id).await?;
                continue;
            }
        };

        match handle(state, &client, &payload).await {
            Ok(()) => bus::ack(&client, event.id).await?,
            Err(err) => {
                tracing::error!("handling bus event {}: {err:#}", event.id);
                bus::release(&client, event.id).await?;
            }
        }
    }
    Ok(())
}

async fn handle(
    state: &AppState,
    client: &crate::db::DbClient,
    event: &BusEvent,
) -> anyhow::Result<()> {
    match event {
        BusEvent::MasterMoved { owner, name } => handle_master_moved(state, client, owner, name).await,
        BusEvent::PullRequestMoved {
            project_id,
            pull_request_id,
        } => handle_pull_request_moved(state, client, *project_id, *pull_request_id).await,
        BusEvent::PullRequestStatusUpdated {
            project_id,
            pull_request_id,
        } => handle_status_updated(state, client, *project_id, *pull_request_id).await,
    }
}

async fn handle_master_moved(
    state: &AppState,
    client: &crate::db::DbClient,
    owner: &str,
    name: &str,
) -> anyhow::Result<()> {
    let Some(project) = projects::find_by_owner_name(client, owner, name).await? else {
        return Ok(());
    };

    let clone_url = project.clone_url(&state.config.provider_clone_base_url);
    state
        .git
        .ensure(owner, name, &clone_url)
        .await
        .context("ensuring mirror")?;
    state.git.fetch(owner, name).await.context("fetching mirror")?;

    let open_prs = pull_requests::list_open_for_project(client, project.id).await?;
    for pr in &open_prs {
        refresh_relative_state(state, client, &project, pr.id, pr.number).await?;
        let event = BusEvent::PullRequestStatusUpdated {
            project_id: project.id,
            pull_request_id: pr.id,
        };
        bus::enqueue(client, event.kind(), &event).await?;
    }
    Ok(())
}

async fn handle_pull_request_moved(
    state: &AppState,
    client: &crate::db::DbClient,
    project_id: i32,
    pull_request_id: i32,
) -> anyhow::Result<()> {
    let Some(project) = projects::find_by_id(client, project_id).await? else {
        return Ok(());
    };
    let Some(pr) = find_open_pr(client, project_id, pull_request_id).await? else {
        return Ok(());
    };

    let clone_url = project.clone_url(&state.config.provider_clone_base_url);
    state
        .git
        .ensure(&project.owner, &project.name, &clone_url)
        .await
        .context("ensuring mirror")?;
    state.git.fetch(&project.owner, &project.name).await.context("fetching mirror")?;
    refresh_relative_state(state, client, &project, pr.id, pr.number).await?;

    let event = BusEvent::PullRequestStatusUpdated {
        project_id,
        pull_request_id,
    };
    bus::enqueue(client, event.kind(), &event).await?;
    Ok(())
}

async fn handle_status_updated(
    state: &AppState,
    client: &crate::db::DbClient,
    project_id: i32,
    pull_request_id: i32,
) -> anyhow::Result<()> {
    let Some(project) = projects::find_by_id(client, project_id).await? else {
        return Ok(());
    };
    if !project.publish_status {
        return Ok(());
    }
    let Some(pr) = find_open_pr(client, project_id, pull_request_id).await? else {
        return Ok(());
    };

    let (jobs_for_project, projects_by_id) = correlation::load_project_scope(client, project_id).await?;

    let mut memo = CorrelationMemo::new();
    let statuses = checks::evaluate(
        client,
        &mut memo,
        &projects_by_id,
        &jobs_for_project,
        &pr,
        &state.config.server_url,
    )
    .await?;
    let verdict = checks::verdict(&statuses);

    let target_url = format!(
        "{}/pulls/{}/{}/{}",
        state.config.server_url, project.owner, project.name, pr.number
    );

    state
        .provider
        .post_status(
            &project.owner,
            &project.name,
            pr.expected_sha(),
            verdict.provider_state(),
            &target_url,
            verdict.description(),
            "cinch",
        )
        .await
        .context("posting commit status")?;
    Ok(())
}

async fn find_open_pr(
    client: &crate::db::DbClient,
    project_id: i32,
    pull_request_id: i32,
) -> anyhow::Result<Option<crate::models::PullRequest>> {
    let prs = pull_requests::list_open_for_project(client, project_id).await?;
    Ok(prs.into_iter().find(|pr| pr.id == pull_request_id))
}

async fn refresh_relative_state(
    state: &AppState,
    client: &crate::db::DbClient,
    project: &crate::models::Project,
    pull_request_id: i32,
    pr_number: i32,
) -> anyhow::Result<()> {
    let (behind, ahead) = state.git.compare(&project.owner, &project.name, pr_number).await?;
    let is_mergeable = state.git.mergeable(&project.owner, &project.name, pr_number).await?;
    let merge_head = state.git.merge_head(&project.owner, &project.name, pr_number).await?;

    pull_requests::set_relative_state(
        client,
        pull_request_id,
        ahead,
        behind,
        is_mergeable,
        merge_head.as_deref(),
    )
    .await?;
    Ok(())
}
