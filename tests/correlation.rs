use crate::common::run_test;
use cinch_merge_gate::correlation::CorrelationMemo;
use cinch_merge_gate::db::{builds, jobs, projects, pull_requests};
use std::collections::HashMap;

/// S1 — single-project unit job: a build with the PR's exact head SHA
/// that succeeded is reported as a match.
#[tokio::test]
async fn single_project_unit_job_matches_on_head() {
    run_test(|ctx| async move {
        let client = ctx.client();

        let lib = projects::set_base_tip(client, "acme", "lib", "m").await.unwrap();
        let job = jobs::upsert(
            &mut ctx.connect().await,
            "lib_unit",
            &[(lib.id, None)],
        )
        .await
        .unwrap();
        let pr = pull_requests::upsert_from_webhook(
            client, lib.id, 1, "h", "add widget", "alice", true,
        )
        .await
        .unwrap();

        let build = builds::get_or_create(client, job.id, 1).await.unwrap();
        builds::set_build_sha(client, build.id, lib.id, "h").await.unwrap();
        builds::set_result(client, build.id, Some(true), Some("SUCCESS")).await.unwrap();

        let mut projects_by_id = HashMap::new();
        projects_by_id.insert(lib.id, lib.clone());

        let mut memo = CorrelationMemo::new();
        let (build_number, success) = memo
            .result_for(client, &job, &projects_by_id, &pr)
            .await
            .unwrap();

        assert_eq!(build_number, Some(1));
        assert_eq!(success, Some(true));
    })
    .await;
}

/// S2 — multi-project job, merge_head preferred over head when both match,
/// and the higher build_number wins among matching tuples.
#[tokio::test]
async fn multi_project_job_prefers_merge_head_and_highest_build_number() {
    run_test(|ctx| async move {
        let client = ctx.client();

        let app = projects::set_base_tip(client, "acme", "app", "a0").await.unwrap();
        let lib = projects::set_base_tip(client, "acme", "lib", "l0").await.unwrap();
        let job = jobs::upsert(
            &mut ctx.connect().await,
            "app_int",
            &[(app.id, None), (lib.id, None)],
        )
        .await
        .unwrap();

        let mut pr = pull_requests::upsert_from_webhook(
            client, app.id, 1, "h", "integrate", "bob", true,
        )
        .await
        .unwrap();
        pull_requests::set_relative_state(client, pr.id, None, None, None, Some("mh"))
            .await
            .unwrap();
        pr.merge_head = Some("mh".to_owned());

        let build7 = builds::get_or_create(client, job.id, 7).await.unwrap();
        builds::set_build_sha(client, build7.id, app.id, "h").await.unwrap();
        builds::set_build_sha(client, build7.id, lib.id, "l0").await.unwrap();
        builds::set_result(client, build7.id, Some(true), Some("SUCCESS")).await.unwrap();

        let build8 = builds::get_or_create(client, job.id, 8).await.unwrap();
        builds::set_build_sha(client, build8.id, app.id, "mh").await.unwrap();
        builds::set_build_sha(client, build8.id, lib.id, "l0").await.unwrap();
        builds::set_result(client, build8.id, Some(true), Some("SUCCESS")).await.unwrap();

        let mut projects_by_id = HashMap::new();
        projects_by_id.insert(app.id, app.clone());
        projects_by_id.insert(lib.id, lib.clone());

        let mut memo = CorrelationMemo::new();
        let (build_number, success) = memo
            .result_for(client, &job, &projects_by_id, &pr)
            .await
            .unwrap();

        assert_eq!(build_number, Some(8));
        assert_eq!(success, Some(true));
    })
    .await;
}

/// S6 — fan-out: recording a BuildSha for an open PR's head enqueues
/// exactly one PullRequestStatusUpdated event for that PR.
#[tokio::test]
async fn recording_build_sha_fans_out_exactly_once() {
    run_test(|ctx| async move {
        let client = ctx.client();

        let p = projects::set_base_tip(client, "acme", "p", "m").await.unwrap();
        let job = jobs::upsert(&mut ctx.connect().await, "p_ci", &[(p.id, None)])
            .await
            .unwrap();
        let _pr = pull_requests::upsert_from_webhook(
            client, p.id, 1, "h", "t", "a", true,
        )
        .await
        .unwrap();

        let build = builds::get_or_create(client, job.id, 2).await.unwrap();
        builds::set_build_sha(client, build.id, p.id, "h").await.unwrap();

        cinch_merge_gate::correlation::fan_out_for_build(client, build.id)
            .await
            .unwrap();

        let claimed = cinch_merge_gate::db::bus::claim_batch(client, 10).await.unwrap();
        let status_updates: Vec<_> = claimed
            .iter()
            .filter(|e| e.kind == "PullRequestStatusUpdated")
            .collect();
        assert_eq!(status_updates.len(), 1);
    })
    .await;
}
