//! Provider Client (§4.C): posts commit statuses back to the source-control
//! provider. Shaped after the github client's bearer-auth `reqwest::Client`
//! wrapper, trimmed to the one outbound call this system needs — there is
//! no inbound GraphQL/REST reading here, only the `/statuses/{sha}` write.

use anyhow::Context as _;
use reqwest::Client;
use secrecy::{ExposeSecret as _, SecretString};
use serde::Serialize;

#[derive(Clone)]
pub struct ProviderClient {
    client: Client,
    token: SecretString,
    api_url: String,
}

#[derive(Debug, Serialize)]
struct StatusPayload<'a> {
    state: &'a str,
    target_url: &'a str,
    description: &'a str,
    context: &'a str,
}

impl ProviderClient {
    pub fn new(token: SecretString, api_url: String) -> Self {
        ProviderClient {
            client: Client::new(),
            token,
            api_url,
        }
    }

    /// Posts a commit status for `owner/name@sha`. `state` is one of
    /// `"success" | "failure" | "pending"`, matching the Check Aggregator's
    /// verdict vocabulary.
    pub async fn post_status(
        &self,
        owner: &str,
        name: &str,
        sha: &str,
        state: &str,
        target_url: &str,
        description: &str,
        context: &str,
    ) -> anyhow::Result<()> {
        let url = format!("{}/repos/{owner}/{name}/statuses/{sha}", self.api_url);
        let payload = StatusPayload {
            state,
            target_url,
            description,
            context,
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.token.expose_secret())
            .header("user-agent", "cinch-merge-gate")
            .json(&payload)
            .send()
            .await
            .context("sending commit status")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("provider rejected status update ({status}): {body}");
        }
        Ok(())
    }
}
