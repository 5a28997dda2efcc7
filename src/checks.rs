//! Check Aggregator (§4.H): a static registry of check functions, each
//! producing a tri-state [`CheckStatus`] for one pull request. No
//! trait-object/reflection registry — a fixed array of function pointers,
//! evaluated in order every time a verdict is needed.

use serde::Serialize;

use crate::correlation::CorrelationMemo;
use crate::db::DbClient;
use crate::models::{Job, Project, PullRequest};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct CheckStatus {
    pub label: String,
    pub status: Option<bool>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Success,
    Failure,
    Pending,
}

/// Registered built-in checks, in evaluation order. `jenkins` is not listed
/// here since it fans out to one `CheckStatus` per job rather than one per
/// pull request — see [`evaluate`].
type CheckFn = fn(&PullRequest) -> CheckStatus;

const REGISTRY: &[CheckFn] = &[strictly_ahead, mergeable];

fn strictly_ahead(r: &PullRequest) -> CheckStatus {
    let status = match (r.ahead, r.behind) {
        (Some(_), Some(behind)) if behind > 0 => Some(false),
        (Some(ahead), Some(0)) if ahead > 0 => Some(true),
        _ => None,
    };
    CheckStatus {
        label: "strictly-ahead".to_owned(),
        status,
        url: None,
    }
}

fn mergeable(r: &PullRequest) -> CheckStatus {
    CheckStatus {
        label: "mergeable".to_owned(),
        status: r.is_mergeable,
        url: None,
    }
}

/// Runs every registered check plus the per-job `jenkins` checks for one
/// pull request, using `memo` to avoid recomputing the correlation index
/// more than once per job within this request.
pub async fn evaluate(
    client: &DbClient,
    memo: &mut CorrelationMemo,
    projects_by_id: &HashMap<i32, Project>,
    jobs_for_project: &[Job],
    r: &PullRequest,
    dashboard_url: &str,
) -> anyhow::Result<Vec<CheckStatus>> {
    let mut statuses: Vec<CheckStatus> = REGISTRY.iter().map(|check| check(r)).collect();

    for job in jobs_for_project {
        let (build_number, success) = memo.result_for(client, job, projects_by_id, r).await?;
        statuses.push(CheckStatus {
            label: format!("jenkins:{}", job.name),
            status: success,
            url: build_number.map(|n| format!("{dashboard_url}/jobs/{}/{}", job.name, n)),
        });
    }

    Ok(statuses)
}

pub fn verdict(statuses: &[CheckStatus]) -> Verdict {
    if statuses.iter().any(|s| s.status == Some(false)) {
        Verdict::Failure
    } else if statuses.iter().all(|s| s.status == Some(true)) {
        Verdict::Success
    } else {
        Verdict::Pending
    }
}

impl Verdict {
    pub fn provider_state(&self) -> &'static str {
        match self {
            Verdict::Success => "success",
            Verdict::Failure => "failure",
            Verdict::Pending => "pending",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Verdict::Success => "Ready for release",
            Verdict::Failure => "One or more checks failed",
            Verdict::Pending => "Waiting on checks",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_pr() -> PullRequest {
        PullRequest {
            id: 1,
            project_id: 1,
            number: 1,
            head: "h".into(),
            merge_head: None,
            author: "a".into(),
            title: "t".into(),
            is_open: true,
            ahead: None,
            behind: None,
            is_mergeable: None,
        }
    }

    #[test]
    fn strictly_ahead_true_when_ahead_and_not_behind() {
        let mut r = base_pr();
        r.ahead = Some(3);
        r.behind = Some(0);
        assert_eq!(strictly_ahead(&r).status, Some(true));
    }

    #[test]
    fn strictly_ahead_false_when_behind() {
        let mut r = base_pr();
        r.ahead = Some(1);
        r.behind = Some(2);
        assert_eq!(strictly_ahead(&r).status, Some(false));
    }

    #[test]
    fn strictly_ahead_null_when_equal_tips() {
        let mut r = base_pr();
        r.ahead = Some(0);
        r.behind = Some(0);
        assert_eq!(strictly_ahead(&r).status, None);
    }

    #[test]
    fn strictly_ahead_null_when_stale() {
        let r = base_pr();
        assert_eq!(strictly_ahead(&r).status, None);
    }

    #[test]
    fn verdict_success_when_all_true() {
        let statuses = vec![
            CheckStatus { label: "a".into(), status: Some(true), url: None },
            CheckStatus { label: "b".into(), status: Some(true), url: None },
        ];
        assert_eq!(verdict(&statuses), Verdict::Success);
    }

    #[test]
    fn verdict_failure_when_any_false() {
        let statuses = vec![
            CheckStatus { label: "a".into(), status: Some(true), url: None },
            CheckStatus { label: "b".into(), status: Some(false), url: None },
        ];
        assert_eq!(verdict(&statuses), Verdict::Failure);
    }

    #[test]
    fn verdict_pending_when_some_null() {
        let statuses = vec![
            CheckStatus { label: "a".into(), status: Some(true), url: None },
            CheckStatus { label: "b".into(), status: None, url: None },
        ];
        assert_eq!(verdict(&statuses), Verdict::Pending);
    }
}
