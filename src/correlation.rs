//! The Build Correlation Engine (§4.G) — the hard part. For every open pull
//! request and every job that watches its project, answers "is there a
//! build whose SHA tuple matches what we'd expect to see if this PR merged
//! right now, and did it pass?" in O(jobs) queries rather than O(jobs ×
//! builds × pull requests).

use std::collections::HashMap;

use anyhow::{Context as _, Result};

use crate::db::DbClient;
use crate::db::{jobs, projects, pull_requests};
use crate::models::{Job, Project, PullRequest};

/// `(build_number, success)` for the best-matching build of a job against a
/// pull request, or `(None, None)` if nothing matches.
pub type JobResult = (Option<i32>, Option<bool>);

/// A request-scoped cache of per-job build indexes: computed at most once
/// per HTTP request no matter how many pull requests or checks consult it.
/// Never share this across requests — it has no invalidation of its own.
#[derive(Default)]
pub struct CorrelationMemo {
    indexes: HashMap<i32, JobIndex>,
}

impl CorrelationMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// The result for pull request `r` against job `j`, per the
    /// expected-tuple rules: merge_head preferred over head when both
    /// match, highest build_number wins among ties on the same tuple.
    pub async fn result_for(
        &mut self,
        client: &DbClient,
        job: &Job,
        projects_by_id: &HashMap<i32, Project>,
        r: &PullRequest,
    ) -> Result<JobResult> {
        if !self.indexes.contains_key(&job.id) {
            let index = JobIndex::build(client, job).await?;
            self.indexes.insert(job.id, index);
        }
        let index = &self.indexes[&job.id];
        Ok(index.lookup(job, projects_by_id, r))
    }
}

/// The per-job build tuple → (build_number, success) map, built with one
/// query joining Build against one aliased BuildSha projection per project
/// in the job.
struct JobIndex {
    project_order: Vec<i32>,
    by_tuple: HashMap<Vec<String>, (i32, Option<bool>)>,
}

impl JobIndex {
    async fn build(client: &DbClient, job: &Job) -> Result<JobIndex> {
        let project_order: Vec<i32> = job.projects.iter().map(|jp| jp.project_id).collect();

        if project_order.is_empty() {
            return Ok(JobIndex {
                project_order,
                by_tuple: HashMap::new(),
            });
        }

        let mut select_cols = vec!["b.build_number".to_owned(), "b.success".to_owned()];
        let mut joins = Vec::new();
        for (i, project_id) in project_order.iter().enumerate() {
            let alias = format!("bs{i}");
            select_cols.push(format!("{alias}.sha"));
            joins.push(format!(
                "JOIN build_shas {alias} ON {alias}.build_id = b.id AND {alias}.project_id = {project_id}"
            ));
        }

        let query = format!(
            "SELECT {} FROM builds b {} WHERE b.job_id = $1",
            select_cols.join(", "),
            joins.join(" ")
        );

        let rows = client
            .query(&query, &[&job.id])
            .await
            .context("querying job's build tuple index")?;

        let mut by_tuple: HashMap<Vec<String>, (i32, Option<bool>)> = HashMap::new();
        for row in &rows {
            let build_number: i32 = row.get(0);
            let success: Option<bool> = row.get(1);
            let tuple: Vec<String> = (0..project_order.len())
                .map(|i| row.get::<_, String>(i + 2))
                .collect();

            by_tuple
                .entry(tuple)
                .and_modify(|(existing_number, existing_success)| {
                    if build_number > *existing_number {
                        *existing_number = build_number;
                        *existing_success = success;
                    }
                })
                .or_insert((build_number, success));
        }

        Ok(JobIndex {
            project_order,
            by_tuple,
        })
    }

    fn lookup(
        &self,
        _job: &Job,
        projects_by_id: &HashMap<i32, Project>,
        r: &PullRequest,
    ) -> JobResult {
        let mut base_tuple = Vec::with_capacity(self.project_order.len());
        for project_id in &self.project_order {
            if *project_id == r.project_id {
                // placeholder; tuple_with() overwrites this slot.
                base_tuple.push(String::new());
                continue;
            }
            match projects_by_id.get(project_id).and_then(|p| p.base_tip.clone()) {
                Some(tip) => base_tuple.push(tip),
                None => return (None, None),
            }
        }

        let tuple_with = |sha: &str| -> Vec<String> {
            self.project_order
                .iter()
                .zip(base_tuple.iter())
                .map(|(project_id, base_slot)| {
                    if *project_id == r.project_id {
                        sha.to_owned()
                    } else {
                        base_slot.clone()
                    }
                })
                .collect()
        };

        // merge_head takes precedence over head when both match.
        if let Some(merge_head) = &r.merge_head {
            if let Some((number, success)) = self.by_tuple.get(&tuple_with(merge_head)) {
                return (Some(*number), *success);
            }
        }
        if let Some((number, success)) = self.by_tuple.get(&tuple_with(&r.head)) {
            return (Some(*number), *success);
        }
        (None, None)
    }
}

/// Fan-out on ingest (§4.G): after a BuildSha or Build row is written,
/// enqueue `PullRequestStatusUpdated` for every open pull request whose
/// `head` or `merge_head` appears in that build's recorded SHA set.
pub async fn fan_out_for_build(client: &DbClient, build_id: i32) -> Result<()> {
    use crate::db::{builds, bus};
    use crate::events::BusEvent;

    let shas = builds::shas_for_build(client, build_id).await?;
    if shas.is_empty() {
        return Ok(());
    }
    let sha_set: std::collections::HashSet<&str> = shas.iter().map(|s| s.sha.as_str()).collect();

    let open_prs = pull_requests::list_open(client).await?;
    for pr in open_prs {
        let matches = sha_set.contains(pr.head.as_str())
            || pr
                .merge_head
                .as_deref()
                .is_some_and(|mh| sha_set.contains(mh));
        if matches {
            let event = BusEvent::PullRequestStatusUpdated {
                project_id: pr.project_id,
                pull_request_id: pr.id,
            };
            bus::enqueue(client, event.kind(), &event).await?;
        }
    }
    Ok(())
}

/// Loads every open pull request together with the jobs and projects it
/// needs evaluated, for use by the Check Aggregator and Read API.
///
/// Query cost is O(distinct projects with an open pull request) for the job
/// lookup, not O(open pull requests): two PRs against the same project share
/// one `jobs::list_for_project` call instead of issuing it twice. Callers
/// that only need one project's worth of this (a single-PR recheck) should
/// use [`load_project_scope`] instead of discarding the rest of this result.
pub async fn load_evaluation_context(
    client: &DbClient,
) -> Result<(Vec<PullRequest>, HashMap<i32, Project>, HashMap<i32, Vec<Job>>)> {
    let open_prs = pull_requests::list_open(client).await?;

    let mut project_ids: Vec<i32> = open_prs.iter().map(|pr| pr.project_id).collect();
    project_ids.sort_unstable();
    project_ids.dedup();

    let mut jobs_by_project: HashMap<i32, Vec<Job>> = HashMap::with_capacity(project_ids.len());
    let mut referenced_project_ids = project_ids.clone();
    for project_id in project_ids {
        let jobs_for_project = jobs::list_for_project(client, project_id).await?;
        referenced_project_ids.extend(
            jobs_for_project
                .iter()
                .flat_map(|job| job.projects.iter().map(|jp| jp.project_id)),
        );
        jobs_by_project.insert(project_id, jobs_for_project);
    }
    referenced_project_ids.sort_unstable();
    referenced_project_ids.dedup();

    let projects_by_id = projects::find_many(client, &referenced_project_ids).await?;

    Ok((open_prs, projects_by_id, jobs_by_project))
}

/// The same shape as [`load_evaluation_context`] but scoped to one project,
/// for callers (a single status recheck, a pull detail page) that need only
/// that project's jobs and don't want to load every open pull request in the
/// system to get them.
pub async fn load_project_scope(
    client: &DbClient,
    project_id: i32,
) -> Result<(Vec<Job>, HashMap<i32, Project>)> {
    let jobs_for_project = jobs::list_for_project(client, project_id).await?;

    let mut project_ids: Vec<i32> = jobs_for_project
        .iter()
        .flat_map(|job| job.projects.iter().map(|jp| jp.project_id))
        .collect();
    project_ids.push(project_id);
    project_ids.sort_unstable();
    project_ids.dedup();

    let projects_by_id = projects::find_many(client, &project_ids).await?;
    Ok((jobs_for_project, projects_by_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(id: i32, base_tip: &str) -> Project {
        Project {
            id,
            owner: "o".into(),
            name: format!("p{id}"),
            base_tip: Some(base_tip.into()),
            publish_status: true,
        }
    }

    fn pr(id: i32, project_id: i32, head: &str, merge_head: Option<&str>) -> PullRequest {
        PullRequest {
            id,
            project_id,
            number: 1,
            head: head.into(),
            merge_head: merge_head.map(String::from),
            author: "a".into(),
            title: "t".into(),
            is_open: true,
            ahead: None,
            behind: None,
            is_mergeable: None,
        }
    }

    #[test]
    fn lookup_prefers_merge_head_over_head() {
        let job = Job {
            id: 1,
            name: "app_int".into(),
            projects: vec![
                crate::models::JobProject { project_id: 1, parameter_name: None },
                crate::models::JobProject { project_id: 2, parameter_name: None },
            ],
        };
        let mut by_tuple = HashMap::new();
        by_tuple.insert(vec!["h".to_owned(), "l0".to_owned()], (7, Some(true)));
        by_tuple.insert(vec!["mh".to_owned(), "l0".to_owned()], (8, Some(true)));
        let index = JobIndex {
            project_order: vec![1, 2],
            by_tuple,
        };

        let mut projects_by_id = HashMap::new();
        projects_by_id.insert(1, project(1, "a0"));
        projects_by_id.insert(2, project(2, "l0"));

        let r = pr(1, 1, "h", Some("mh"));
        let (number, success) = index.lookup(&job, &projects_by_id, &r);
        assert_eq!(number, Some(8));
        assert_eq!(success, Some(true));
    }

    #[test]
    fn lookup_falls_back_to_head_when_merge_head_absent() {
        let job = Job {
            id: 1,
            name: "lib_unit".into(),
            projects: vec![crate::models::JobProject { project_id: 1, parameter_name: None }],
        };
        let mut by_tuple = HashMap::new();
        by_tuple.insert(vec!["h".to_owned()], (1, Some(true)));
        let index = JobIndex {
            project_order: vec![1],
            by_tuple,
        };
        let mut projects_by_id = HashMap::new();
        projects_by_id.insert(1, project(1, "m"));

        let r = pr(1, 1, "h", None);
        let (number, success) = index.lookup(&job, &projects_by_id, &r);
        assert_eq!(number, Some(1));
        assert_eq!(success, Some(true));
    }

    #[test]
    fn lookup_returns_null_when_base_tip_unknown() {
        let job = Job {
            id: 1,
            name: "app_int".into(),
            projects: vec![
                crate::models::JobProject { project_id: 1, parameter_name: None },
                crate::models::JobProject { project_id: 2, parameter_name: None },
            ],
        };
        let index = JobIndex {
            project_order: vec![1, 2],
            by_tuple: HashMap::new(),
        };
        let mut projects_by_id = HashMap::new();
        projects_by_id.insert(1, project(1, "a0"));
        // project 2's base_tip is unknown (e.g. never observed a push)
        let mut p2 = project(2, "");
        p2.base_tip = None;
        projects_by_id.insert(2, p2);

        let r = pr(1, 1, "h", None);
        let (number, success) = index.lookup(&job, &projects_by_id, &r);
        assert_eq!(number, None);
        assert_eq!(success, None);
    }
}
