//! End-to-end retention scenarios over the in-memory adapters.

mod helpers;

use chrono::Duration;

use custodian::application::ConfigEvent;
use custodian::domain::models::{
    ConfigObject, ResolvedFrom, RunStatus, Workload, WorkloadKind, PIPELINE_NAME_LABEL,
    PROCESSED_ANNOTATION, TTL_ANNOTATION,
};
use custodian::domain::ports::WorkloadStore;
use custodian::services::policy_store::PolicyQuery;

use helpers::{fixture, names, pipeline_run, t0, task_run};

#[tokio::test]
async fn ttl_deletes_an_expired_pipeline_run() {
    let fx = fixture();
    fx.namespaces.add("dev").await;
    fx.controller
        .apply_config_event(ConfigEvent::Applied(
            ConfigObject::global().with_payload("ttlSecondsAfterFinished: 3600"),
        ))
        .await;

    // Completed at T0 with a stamped hour of TTL, observed at T0 + 1h + 1s.
    let pr = pipeline_run(
        "dev",
        "pr-1",
        "build",
        t0() - Duration::minutes(1),
        RunStatus::Succeeded,
    );
    fx.store
        .insert(pr.with_annotation(TTL_ANNOTATION, "3600"))
        .await;
    fx.clock.set(t0() + Duration::hours(1) + Duration::seconds(1));

    fx.sweep.clone().run_once().await;

    assert!(fx
        .store
        .get(WorkloadKind::PipelineRun, "dev", "pr-1")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn success_bucket_over_quota_keeps_the_newest_two() {
    let fx = fixture();
    fx.namespaces.add("dev").await;
    fx.controller
        .apply_config_event(ConfigEvent::Applied(
            ConfigObject::global().with_payload("successfulHistoryLimit: 2"),
        ))
        .await;

    for (name, offset) in [("pr-t1", 0), ("pr-t2", 60), ("pr-t3", 120), ("pr-t4", 180)] {
        fx.store
            .insert(pipeline_run(
                "dev",
                name,
                "build",
                t0() + Duration::seconds(offset),
                RunStatus::Succeeded,
            ))
            .await;
    }
    fx.clock.set(t0() + Duration::hours(1));

    fx.sweep.clone().run_once().await;

    assert_eq!(
        names(&fx.store, WorkloadKind::PipelineRun, "dev").await,
        vec!["pr-t3", "pr-t4"]
    );
}

#[tokio::test]
async fn failure_bucket_retention_differs_from_success() {
    let fx = fixture();
    fx.namespaces.add("dev").await;
    fx.controller
        .apply_config_event(ConfigEvent::Applied(
            ConfigObject::global()
                .with_payload("successfulHistoryLimit: 1\nfailedHistoryLimit: 3"),
        ))
        .await;

    let mut offset = 0;
    for idx in 0..2 {
        fx.store
            .insert(pipeline_run(
                "dev",
                &format!("ok-{idx}"),
                "build",
                t0() + Duration::seconds(offset),
                RunStatus::Succeeded,
            ))
            .await;
        offset += 60;
    }
    for idx in 0..5 {
        fx.store
            .insert(pipeline_run(
                "dev",
                &format!("bad-{idx}"),
                "build",
                t0() + Duration::seconds(offset),
                RunStatus::Failed,
            ))
            .await;
        offset += 60;
    }
    fx.clock.set(t0() + Duration::hours(1));

    fx.sweep.clone().run_once().await;

    let remaining = fx.store.list(WorkloadKind::PipelineRun, "dev").await.unwrap();
    let successes: Vec<_> = remaining.iter().filter(|w| w.is_successful()).collect();
    let failures: Vec<_> = remaining.iter().filter(|w| w.is_failed()).collect();
    assert_eq!(successes.len(), 1);
    assert_eq!(failures.len(), 3);
    assert_eq!(successes[0].name, "ok-1");
    let failure_names: Vec<_> = failures.iter().map(|w| w.name.as_str()).collect();
    assert_eq!(failure_names, vec!["bad-2", "bad-3", "bad-4"]);
}

#[tokio::test]
async fn name_precedence_over_selector_resolves_to_1800() {
    let fx = fixture();
    fx.controller
        .apply_config_event(ConfigEvent::Applied(
            ConfigObject::global().with_payload("enforcedConfigLevel: namespace"),
        ))
        .await;
    fx.controller
        .apply_config_event(ConfigEvent::Applied(ConfigObject::namespaced("dev").with_payload(
            "pipelineRuns:\n\
             \x20 - name: build-pipeline\n\
             \x20   ttlSecondsAfterFinished: 1800\n\
             \x20 - selector:\n\
             \x20     - matchLabels:\n\
             \x20         app: myapp\n\
             \x20   ttlSecondsAfterFinished: 3600\n",
        )))
        .await;

    let pr = pipeline_run("dev", "pr-1", "build-pipeline", t0(), RunStatus::Succeeded)
        .with_label("app", "myapp");
    let query = PolicyQuery::for_workload(&pr);
    assert_eq!(
        fx.policies.ttl(&query),
        (Some(1800), ResolvedFrom::ResourceName)
    );
}

#[tokio::test]
async fn sweep_invalidates_stale_processed_annotations() {
    let fx = fixture();
    fx.namespaces.add("dev").await;

    // Workload stamped an hour before the upcoming policy revision R.
    let stale = (t0() - Duration::hours(1)).to_rfc3339();
    fx.store
        .insert(
            pipeline_run("dev", "pr-1", "build", t0(), RunStatus::Succeeded)
                .with_annotation(PROCESSED_ANNOTATION, &stale),
        )
        .await;

    // Global object mutated at R = t0; the event triggers the sweep.
    fx.clock.set(t0() + Duration::minutes(5));
    fx.controller
        .apply_config_event(ConfigEvent::Applied(
            ConfigObject::global().with_payload("successfulHistoryLimit: 5"),
        ))
        .await;

    let w = fx
        .store
        .get(WorkloadKind::PipelineRun, "dev", "pr-1")
        .await
        .unwrap();
    let restamped = w.processed_at().unwrap();
    assert!(restamped >= fx.policies.revision().unwrap());
    assert!(restamped.to_rfc3339() != stale);
}

#[tokio::test]
async fn workloads_without_completion_time_are_never_deleted() {
    let fx = fixture();
    fx.namespaces.add("dev").await;
    fx.controller
        .apply_config_event(ConfigEvent::Applied(
            ConfigObject::global().with_payload("ttlSecondsAfterFinished: 0"),
        ))
        .await;

    // Terminal status but no completion time: completed for bookkeeping,
    // untouchable for TTL deletion.
    let mut pr = Workload::new(WorkloadKind::PipelineRun, "dev", "pr-1", t0())
        .with_uid("pr-1")
        .with_label(PIPELINE_NAME_LABEL, "build")
        .with_annotation(TTL_ANNOTATION, "0");
    pr.started_at = Some(t0());
    pr.status = RunStatus::Failed;
    fx.store.insert(pr).await;
    fx.clock.set(t0() + Duration::hours(24));

    fx.sweep.clone().run_once().await;

    assert!(fx
        .store
        .get(WorkloadKind::PipelineRun, "dev", "pr-1")
        .await
        .is_ok());
}

#[tokio::test]
async fn parented_task_runs_survive_reactor_observation() {
    let fx = fixture();
    fx.namespaces.add("dev").await;
    fx.controller
        .apply_config_event(ConfigEvent::Applied(
            ConfigObject::global().with_payload("ttlSecondsAfterFinished: 0"),
        ))
        .await;

    let parented = task_run("dev", "tr-owned", "lint", t0(), RunStatus::Succeeded)
        .with_owner("PipelineRun", "pr-1");
    let standalone = task_run("dev", "tr-solo", "lint", t0(), RunStatus::Succeeded);
    fx.store.insert(parented).await;
    fx.store.insert(standalone).await;
    fx.clock.set(t0() + Duration::hours(1));

    let workers = fx.controller.start(2);
    fx.controller.resync().await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    fx.controller.shutdown();
    for worker in workers {
        worker.await.unwrap();
    }

    // The standalone TaskRun expired; the parented one is its parent's
    // business.
    assert_eq!(
        names(&fx.store, WorkloadKind::TaskRun, "dev").await,
        vec!["tr-owned"]
    );
}

#[tokio::test]
async fn policy_change_mid_life_does_not_rewrite_stamped_ttl() {
    let fx = fixture();
    fx.namespaces.add("dev").await;
    fx.controller
        .apply_config_event(ConfigEvent::Applied(
            ConfigObject::global().with_payload("ttlSecondsAfterFinished: 60"),
        ))
        .await;

    fx.store
        .insert(pipeline_run("dev", "pr-1", "build", t0(), RunStatus::Succeeded))
        .await;
    fx.clock.set(t0() + Duration::seconds(30));
    fx.sweep.clone().run_once().await;

    let stamped = fx
        .store
        .get(WorkloadKind::PipelineRun, "dev", "pr-1")
        .await
        .unwrap();
    assert_eq!(stamped.annotations[TTL_ANNOTATION], "60");

    // Policy now says a week; the stamp still says a minute.
    fx.controller
        .apply_config_event(ConfigEvent::Applied(
            ConfigObject::global().with_payload("ttlSecondsAfterFinished: 604800"),
        ))
        .await;
    let after = fx
        .store
        .get(WorkloadKind::PipelineRun, "dev", "pr-1")
        .await
        .unwrap();
    assert_eq!(after.annotations[TTL_ANNOTATION], "60");

    // And the minute governs expiry.
    fx.clock.set(t0() + Duration::minutes(2));
    fx.sweep.clone().run_once().await;
    assert!(fx
        .store
        .get(WorkloadKind::PipelineRun, "dev", "pr-1")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn selector_buckets_span_pipelines_within_a_namespace() {
    let fx = fixture();
    fx.namespaces.add("dev").await;
    fx.controller
        .apply_config_event(ConfigEvent::Applied(
            ConfigObject::global().with_payload("enforcedConfigLevel: namespace"),
        ))
        .await;
    fx.controller
        .apply_config_event(ConfigEvent::Applied(ConfigObject::namespaced("dev").with_payload(
            "pipelineRuns:\n\
             \x20 - selector:\n\
             \x20     - matchLabels:\n\
             \x20         team: ci\n\
             \x20   successfulHistoryLimit: 1\n",
        )))
        .await;

    for (name, pipeline, offset) in [
        ("pr-build", "build", 0),
        ("pr-deploy", "deploy", 60),
        ("pr-other", "other", 120),
    ] {
        let mut w = pipeline_run(
            "dev",
            name,
            pipeline,
            t0() + Duration::seconds(offset),
            RunStatus::Succeeded,
        );
        if name != "pr-other" {
            w = w.with_label("team", "ci");
        }
        fx.store.insert(w).await;
    }
    fx.clock.set(t0() + Duration::hours(1));

    fx.sweep.clone().run_once().await;

    // The two team=ci runs form one bucket: oldest pruned. pr-other has no
    // matching selector and no history policy, so it stays.
    assert_eq!(
        names(&fx.store, WorkloadKind::PipelineRun, "dev").await,
        vec!["pr-deploy", "pr-other"]
    );
}
