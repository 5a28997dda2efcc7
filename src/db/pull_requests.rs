//! Pull request rows: keyed by `(project_id, number)`, carrying both the
//! provider-reported identity fields (head, title, author, open/closed) and
//! the worker-maintained relative-state fields (ahead/behind/mergeable).

use crate::db::DbClient;
use crate::models::PullRequest;
use anyhow::{Context as _, Result};

fn from_row(row: &tokio_postgres::Row) -> PullRequest {
    PullRequest {
        id: row.get("id"),
        project_id: row.get("project_id"),
        number: row.get("number"),
        head: row.get("head"),
        merge_head: row.get("merge_head"),
        author: row.get("author"),
        title: row.get("title"),
        is_open: row.get("is_open"),
        ahead: row.get("ahead"),
        behind: row.get("behind"),
        is_mergeable: row.get("is_mergeable"),
    }
}

const SELECT_COLUMNS: &str =
    "id, project_id, number, head, merge_head, author, title, is_open, ahead, behind, is_mergeable";

pub async fn find(client: &DbClient, project_id: i32, number: i32) -> Result<Option<PullRequest>> {
    let row = client
        .query_opt(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM pull_requests WHERE project_id = $1 AND number = $2"
            ),
            &[&project_id, &number],
        )
        .await
        .context("selecting pull request")?;
    Ok(row.as_ref().map(from_row))
}

pub async fn list_open(client: &DbClient) -> Result<Vec<PullRequest>> {
    let rows = client
        .query(
            &format!("SELECT {SELECT_COLUMNS} FROM pull_requests WHERE is_open"),
            &[],
        )
        .await
        .context("listing open pull requests")?;
    Ok(rows.iter().map(from_row).collect())
}

pub async fn list_open_for_project(client: &DbClient, project_id: i32) -> Result<Vec<PullRequest>> {
    let rows = client
        .query(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM pull_requests WHERE project_id = $1 AND is_open"
            ),
            &[&project_id],
        )
        .await
        .context("listing open pull requests for project")?;
    Ok(rows.iter().map(from_row).collect())
}

/// Creates the pull request row if absent, or updates the provider-reported
/// identity fields and resets `merge_head` to null (the provider will
/// resynthesise it). Mirrors the ingest semantics in §4.E: a `pull_request`
/// webhook always upserts head/title/open-state and clears merge_head.
pub async fn upsert_from_webhook(
    client: &DbClient,
    project_id: i32,
    number: i32,
    head: &str,
    title: &str,
    author: &str,
    is_open: bool,
) -> Result<PullRequest> {
    let row = client
        .query_one(
            &format!(
                "INSERT INTO pull_requests (project_id, number, head, title, author, is_open, merge_head)
                 VALUES ($1, $2, $3, $4, $5, $6, NULL)
                 ON CONFLICT (project_id, number) DO UPDATE SET
                     head = EXCLUDED.head,
                     title = EXCLUDED.title,
                     author = EXCLUDED.author,
                     is_open = EXCLUDED.is_open,
                     merge_head = NULL
                 RETURNING {SELECT_COLUMNS}"
            ),
            &[&project_id, &number, &head, &title, &author, &is_open],
        )
        .await
        .context("upserting pull request")?;
    Ok(from_row(&row))
}

/// Resets the relative-state fields of every open pull request of a project
/// to null-stale. Called when the project's base tip moves (§3 invariant).
pub async fn reset_relative_state_for_project(client: &DbClient, project_id: i32) -> Result<u64> {
    client
        .execute(
            "UPDATE pull_requests
             SET ahead = NULL, behind = NULL, is_mergeable = NULL
             WHERE project_id = $1 AND is_open",
            &[&project_id],
        )
        .await
        .context("resetting relative state for project")
}

/// Writes the worker-computed relative state for one pull request.
pub async fn set_relative_state(
    client: &DbClient,
    pull_request_id: i32,
    ahead: Option<i32>,
    behind: Option<i32>,
    is_mergeable: Option<bool>,
    merge_head: Option<&str>,
) -> Result<()> {
    client
        .execute(
            "UPDATE pull_requests
             SET ahead = $2, behind = $3, is_mergeable = $4, merge_head = $5
             WHERE id = $1",
            &[&pull_request_id, &ahead, &behind, &is_mergeable, &merge_head],
        )
        .await
        .context("setting pull request relative state")?;
    Ok(())
}
