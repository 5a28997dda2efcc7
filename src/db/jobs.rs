//! Jobs are named CI pipelines, each keyed to an ordered list of projects it
//! builds (`job_projects`). The correlation engine only ever needs the
//! project list and parameter names, not job history, so that's all this
//! module surfaces.

use std::collections::HashMap;

use crate::db::DbClient;
use crate::models::{Job, JobProject};
use anyhow::{Context as _, Result};

pub async fn find_by_name(client: &DbClient, name: &str) -> Result<Option<Job>> {
    let Some(row) = client
        .query_opt("SELECT id, name FROM jobs WHERE name = $1", &[&name])
        .await
        .context("selecting job by name")?
    else {
        return Ok(None);
    };
    let projects = projects_for_job(client, row.get("id")).await?;
    Ok(Some(Job {
        id: row.get("id"),
        name: row.get("name"),
        projects,
    }))
}

pub async fn find_by_id(client: &DbClient, id: i32) -> Result<Option<Job>> {
    let Some(row) = client
        .query_opt("SELECT id, name FROM jobs WHERE id = $1", &[&id])
        .await
        .context("selecting job by id")?
    else {
        return Ok(None);
    };
    let projects = projects_for_job(client, id).await?;
    Ok(Some(Job {
        id: row.get("id"),
        name: row.get("name"),
        projects,
    }))
}

pub async fn list_all(client: &DbClient) -> Result<Vec<Job>> {
    let rows = client
        .query("SELECT id, name FROM jobs ORDER BY name", &[])
        .await
        .context("listing jobs")?;
    let job_ids: Vec<i32> = rows.iter().map(|row| row.get("id")).collect();
    let mut projects_by_job = projects_for_jobs(client, &job_ids).await?;
    Ok(rows
        .iter()
        .map(|row| {
            let id = row.get("id");
            Job {
                id,
                name: row.get("name"),
                projects: projects_by_job.remove(&id).unwrap_or_default(),
            }
        })
        .collect())
}

/// All jobs that build a given project, used by the correlation engine's
/// fan-out: when a project's state changes, every job watching it needs
/// re-evaluating. One query for the job rows plus one query for all of
/// their project lists together, not one per job.
pub async fn list_for_project(client: &DbClient, project_id: i32) -> Result<Vec<Job>> {
    let rows = client
        .query(
            "SELECT DISTINCT j.id, j.name
             FROM jobs j
             JOIN job_projects jp ON jp.job_id = j.id
             WHERE jp.project_id = $1
             ORDER BY j.name",
            &[&project_id],
        )
        .await
        .context("listing jobs for project")?;
    let job_ids: Vec<i32> = rows.iter().map(|row| row.get("id")).collect();
    let mut projects_by_job = projects_for_jobs(client, &job_ids).await?;
    Ok(rows
        .iter()
        .map(|row| {
            let id = row.get("id");
            Job {
                id,
                name: row.get("name"),
                projects: projects_by_job.remove(&id).unwrap_or_default(),
            }
        })
        .collect())
}

async fn projects_for_job(client: &DbClient, job_id: i32) -> Result<Vec<JobProject>> {
    Ok(projects_for_jobs(client, &[job_id])
        .await?
        .remove(&job_id)
        .unwrap_or_default())
}

/// Batch-loads ordered project lists for many jobs in one query instead of
/// one query per job.
async fn projects_for_jobs(
    client: &DbClient,
    job_ids: &[i32],
) -> Result<HashMap<i32, Vec<JobProject>>> {
    if job_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = client
        .query(
            "SELECT job_id, project_id, parameter_name FROM job_projects
             WHERE job_id = ANY($1) ORDER BY job_id, position",
            &[&job_ids],
        )
        .await
        .context("selecting jobs' projects")?;
    let mut by_job: HashMap<i32, Vec<JobProject>> = HashMap::new();
    for row in &rows {
        by_job
            .entry(row.get("job_id"))
            .or_default()
            .push(JobProject {
                project_id: row.get("project_id"),
                parameter_name: row.get("parameter_name"),
            });
    }
    Ok(by_job)
}

/// Registers a job (idempotently by name) and overwrites its project list
/// with the given ordered set. There is no admin UI for this; operators seed
/// jobs directly against the store when wiring up a new CI pipeline.
pub async fn upsert(
    client: &mut DbClient,
    name: &str,
    projects: &[(i32, Option<String>)],
) -> Result<Job> {
    let tx = client
        .transaction()
        .await
        .context("starting job upsert transaction")?;

    let row = tx
        .query_one(
            "INSERT INTO jobs (name) VALUES ($1)
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id, name",
            &[&name],
        )
        .await
        .context("upserting job")?;
    let job_id: i32 = row.get("id");

    tx.execute("DELETE FROM job_projects WHERE job_id = $1", &[&job_id])
        .await
        .context("clearing job's existing projects")?;

    for (position, (project_id, parameter_name)) in projects.iter().enumerate() {
        tx.execute(
            "INSERT INTO job_projects (job_id, project_id, parameter_name, position)
             VALUES ($1, $2, $3, $4)",
            &[&job_id, project_id, parameter_name, &(position as i32)],
        )
        .await
        .context("inserting job_projects row")?;
    }

    tx.commit().await.context("committing job upsert")?;

    Ok(Job {
        id: job_id,
        name: row.get("name"),
        projects: projects
            .iter()
            .map(|(project_id, parameter_name)| JobProject {
                project_id: *project_id,
                parameter_name: parameter_name.clone(),
            })
            .collect(),
    })
}
