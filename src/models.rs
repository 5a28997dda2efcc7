//! Core entities shared by the store, the correlation engine and the HTTP layers.
//!
//! These mirror the relational schema in `db::migrations` directly: a `Project`
//! row, a `PullRequest` row, and so on. Kept free of any database or HTTP
//! dependency so the correlation engine and checks can be unit tested without
//! touching Postgres.

use serde::{Deserialize, Serialize};

/// A 40-character hex git commit SHA.
pub type Sha = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i32,
    pub owner: String,
    pub name: String,
    pub base_tip: Option<Sha>,
    pub publish_status: bool,
}

impl Project {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// The URL the Git Comparator clones/fetches this project's mirror from,
    /// built from the configured clone base (not the REST API base, which
    /// commonly lives on a different host).
    pub fn clone_url(&self, provider_clone_base_url: &str) -> String {
        format!("{provider_clone_base_url}/{}/{}.git", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: i32,
    pub project_id: i32,
    pub number: i32,
    pub head: Sha,
    pub merge_head: Option<Sha>,
    pub author: String,
    pub title: String,
    pub is_open: bool,
    pub ahead: Option<i32>,
    pub behind: Option<i32>,
    pub is_mergeable: Option<bool>,
}

impl PullRequest {
    /// The SHA the correlation engine should substitute into this PR's project
    /// slot: the provider-synthesised merge commit if one exists, else the raw
    /// PR head.
    pub fn expected_sha(&self) -> &str {
        self.merge_head.as_deref().unwrap_or(&self.head)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: i32,
    pub name: String,
    /// Projects this job depends on, in a fixed order. The order defines the
    /// slot ordering of every SHA tuple computed against this job.
    pub projects: Vec<JobProject>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProject {
    pub project_id: i32,
    pub parameter_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: i32,
    pub job_id: i32,
    pub build_number: i32,
    pub success: Option<bool>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSha {
    pub build_id: i32,
    pub project_id: i32,
    pub sha: Sha,
}
