//! Payloads carried on the event bus (§4.D). Each variant's name matches
//! the `kind` column written by [`crate::db::bus::enqueue`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum BusEvent {
    /// A project's base branch moved; every open pull request of that
    /// project needs its relative state recomputed.
    MasterMoved { owner: String, name: String },

    /// A pull request's identity fields changed (new head pushed, opened,
    /// closed); its relative state needs recomputing.
    PullRequestMoved {
        project_id: i32,
        pull_request_id: i32,
    },

    /// A build's SHA set or result changed in a way that could affect this
    /// pull request's correlation verdict; the worker should recompute and
    /// republish its check status.
    PullRequestStatusUpdated {
        project_id: i32,
        pull_request_id: i32,
    },
}

impl BusEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            BusEvent::MasterMoved { .. } => "MasterMoved",
            BusEvent::PullRequestMoved { .. } => "PullRequestMoved",
            BusEvent::PullRequestStatusUpdated { .. } => "PullRequestStatusUpdated",
        }
    }
}
