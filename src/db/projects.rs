//! Project rows: `(owner, name)`-keyed, with the base-branch tip SHA that
//! drives every expected-tuple computation in the correlation engine.

use std::collections::HashMap;

use crate::db::DbClient;
use crate::models::Project;
use anyhow::{Context as _, Result};

fn from_row(row: &tokio_postgres::Row) -> Project {
    Project {
        id: row.get("id"),
        owner: row.get("owner"),
        name: row.get("name"),
        base_tip: row.get("base_tip"),
        publish_status: row.get("publish_status"),
    }
}

pub async fn find_by_owner_name(
    client: &DbClient,
    owner: &str,
    name: &str,
) -> Result<Option<Project>> {
    let row = client
        .query_opt(
            "SELECT id, owner, name, base_tip, publish_status FROM projects
             WHERE owner = $1 AND name = $2",
            &[&owner, &name],
        )
        .await
        .context("selecting project")?;
    Ok(row.as_ref().map(from_row))
}

pub async fn find_by_id(client: &DbClient, id: i32) -> Result<Option<Project>> {
    let row = client
        .query_opt(
            "SELECT id, owner, name, base_tip, publish_status FROM projects WHERE id = $1",
            &[&id],
        )
        .await
        .context("selecting project by id")?;
    Ok(row.as_ref().map(from_row))
}

/// Batch lookup by id, used by the correlation engine to resolve only the
/// projects actually referenced by a job set instead of the whole table.
pub async fn find_many(client: &DbClient, ids: &[i32]) -> Result<HashMap<i32, Project>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = client
        .query(
            "SELECT id, owner, name, base_tip, publish_status FROM projects WHERE id = ANY($1)",
            &[&ids],
        )
        .await
        .context("selecting projects by id")?;
    Ok(rows.iter().map(from_row).map(|p| (p.id, p)).collect())
}

pub async fn list_all(client: &DbClient) -> Result<Vec<Project>> {
    let rows = client
        .query(
            "SELECT id, owner, name, base_tip, publish_status FROM projects ORDER BY owner, name",
            &[],
        )
        .await
        .context("listing projects")?;
    Ok(rows.iter().map(from_row).collect())
}

/// Sets the base-branch tip for a project, creating the project row if this
/// is the first time it's been observed. Returns the updated project.
pub async fn set_base_tip(
    client: &DbClient,
    owner: &str,
    name: &str,
    base_tip: &str,
) -> Result<Project> {
    let row = client
        .query_one(
            "INSERT INTO projects (owner, name, base_tip)
             VALUES ($1, $2, $3)
             ON CONFLICT (owner, name) DO UPDATE SET base_tip = EXCLUDED.base_tip
             RETURNING id, owner, name, base_tip, publish_status",
            &[&owner, &name, &base_tip],
        )
        .await
        .context("upserting project base_tip")?;
    Ok(from_row(&row))
}
