//! Build rows record one CI run of a job: its `build_number`, an optional
//! success/status outcome, and the per-project SHAs it actually built
//! (`build_shas`) — the join key the correlation engine matches against
//! expected-sha tuples.

use crate::db::DbClient;
use crate::models::{Build, BuildSha};
use anyhow::{Context as _, Result};

fn from_row(row: &tokio_postgres::Row) -> Build {
    Build {
        id: row.get("id"),
        job_id: row.get("job_id"),
        build_number: row.get("build_number"),
        success: row.get("success"),
        status: row.get("status"),
    }
}

pub async fn find(client: &DbClient, job_id: i32, build_number: i32) -> Result<Option<Build>> {
    let row = client
        .query_opt(
            "SELECT id, job_id, build_number, success, status FROM builds
             WHERE job_id = $1 AND build_number = $2",
            &[&job_id, &build_number],
        )
        .await
        .context("selecting build")?;
    Ok(row.as_ref().map(from_row))
}

/// Creates the build row if it doesn't exist yet. CI systems report a job's
/// builds out of order with respect to SHA reporting and result reporting,
/// so every ingest path needs to be able to materialize the row on demand.
pub async fn get_or_create(client: &DbClient, job_id: i32, build_number: i32) -> Result<Build> {
    let row = client
        .query_one(
            "INSERT INTO builds (job_id, build_number)
             VALUES ($1, $2)
             ON CONFLICT (job_id, build_number) DO UPDATE SET job_id = EXCLUDED.job_id
             RETURNING id, job_id, build_number, success, status",
            &[&job_id, &build_number],
        )
        .await
        .context("upserting build")?;
    Ok(from_row(&row))
}

pub async fn set_result(
    client: &DbClient,
    build_id: i32,
    success: Option<bool>,
    status: Option<&str>,
) -> Result<()> {
    client
        .execute(
            "UPDATE builds SET success = $2, status = $3 WHERE id = $1",
            &[&build_id, &success, &status],
        )
        .await
        .context("setting build result")?;
    Ok(())
}

/// Records the SHA a build used for one of its constituent projects,
/// overwriting any previously reported value (CI systems sometimes resend).
pub async fn set_build_sha(
    client: &DbClient,
    build_id: i32,
    project_id: i32,
    sha: &str,
) -> Result<()> {
    client
        .execute(
            "INSERT INTO build_shas (build_id, project_id, sha)
             VALUES ($1, $2, $3)
             ON CONFLICT (build_id, project_id) DO UPDATE SET sha = EXCLUDED.sha",
            &[&build_id, &project_id, &sha],
        )
        .await
        .context("upserting build_sha")?;
    Ok(())
}

pub async fn shas_for_build(client: &DbClient, build_id: i32) -> Result<Vec<BuildSha>> {
    let rows = client
        .query(
            "SELECT build_id, project_id, sha FROM build_shas WHERE build_id = $1",
            &[&build_id],
        )
        .await
        .context("selecting build_shas")?;
    Ok(rows
        .iter()
        .map(|row| BuildSha {
            build_id: row.get("build_id"),
            project_id: row.get("project_id"),
            sha: row.get("sha"),
        })
        .collect())
}

/// The core query behind the correlation engine's O(jobs) strategy: for one
/// job and one project in that job, every `(build_id, build_number, sha)`
/// triple on record. The engine joins these per-project result sets itself
/// rather than asking Postgres to join across all of a job's projects at
/// once, since the project count per job is small and fixed, while
/// expressing "N columns of project SHAs" generically in SQL is not.
pub async fn build_shas_for_job_project(
    client: &DbClient,
    job_id: i32,
    project_id: i32,
) -> Result<Vec<(i32, i32, String)>> {
    let rows = client
        .query(
            "SELECT b.id, b.build_number, bs.sha
             FROM builds b
             JOIN build_shas bs ON bs.build_id = b.id
             WHERE b.job_id = $1 AND bs.project_id = $2",
            &[&job_id, &project_id],
        )
        .await
        .context("selecting build shas for job project")?;
    Ok(rows
        .iter()
        .map(|row| (row.get("id"), row.get("build_number"), row.get("sha")))
        .collect())
}
