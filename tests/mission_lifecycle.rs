//! End to end over the in-memory channel: submission through the
//! coordinator, execution by the pool and status tracking.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use mission_control::auth::TokenManager;
use mission_control::channel::{MessageChannel, Queue};
use mission_control::config::WorkerConfig;
use mission_control::registry::ApplyOutcome;
use mission_control::types::{MissionStatus, StatusUpdate};
use mission_control::worker::{ExecutionOutcome, WorkerPool};
use mission_control::{CoordinatorService, Error};

use common::{FixedOutcomeExecutor, InProcessRenewer};

async fn wait_for_status(service: &CoordinatorService, id: &str, status: MissionStatus) {
    for _ in 0..1_000 {
        if service.mission(id).unwrap().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("mission {id} never reached {status}");
}

fn worker_tokens(service: &CoordinatorService) -> TokenManager {
    let issued = service.issue_token("soldier-1").unwrap();
    let manager = TokenManager::new(
        "soldier-1",
        Arc::new(InProcessRenewer::new(service.clone())),
    );
    manager.start(issued.token.clone(), issued.expires_in()).unwrap();
    manager
}

// ─── Full flow ───────────────────────────────────────────────────────────

mod full_flow {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_submitted_mission_completes() {
        let (service, channel) = common::coordinator();
        let cancel = CancellationToken::new();
        let consumer = service.spawn_status_consumer(cancel.clone()).await.unwrap();

        let mission = service.submit("scan-sector-7").await.unwrap();
        let queued = service.mission(&mission.id).unwrap();
        assert_eq!(queued.status, MissionStatus::Queued);
        assert_eq!(queued.payload, "scan-sector-7");

        let tokens = worker_tokens(&service);
        let pool = Arc::new(WorkerPool::new(
            channel.clone(),
            tokens.clone(),
            Arc::new(FixedOutcomeExecutor::new(
                Duration::from_secs(7),
                ExecutionOutcome::Success,
            )),
            &WorkerConfig::default(),
        ));
        let running = tokio::spawn({
            let pool = pool.clone();
            async move { pool.start().await }
        });

        wait_for_status(&service, &mission.id, MissionStatus::Completed).await;
        let completed = service.mission(&mission.id).unwrap();
        assert!(completed.updated_at > completed.created_at);
        assert_eq!(completed.created_at, queued.created_at);

        pool.shutdown();
        running.await.unwrap().unwrap();
        cancel.cancel();
        consumer.await.unwrap();
        tokens.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missions_outlive_token_expiry() {
        let (service, channel) = common::coordinator();
        let cancel = CancellationToken::new();
        let consumer = service.spawn_status_consumer(cancel.clone()).await.unwrap();
        let tokens = worker_tokens(&service);

        let mut ids = Vec::new();
        for i in 0..6 {
            ids.push(service.submit(&format!("patrol-{i}")).await.unwrap().id);
        }
        channel.close(Queue::Orders);

        // Each mission runs longer than one token lifetime; with two slots
        // the last ones report well after the initial token expired.
        WorkerPool::new(
            channel.clone(),
            tokens.clone(),
            Arc::new(FixedOutcomeExecutor::new(
                Duration::from_secs(40),
                ExecutionOutcome::Failure,
            )),
            &WorkerConfig {
                concurrency: 2,
                ..WorkerConfig::default()
            },
        )
        .start()
        .await
        .unwrap();

        for id in &ids {
            wait_for_status(&service, id, MissionStatus::Failed).await;
        }
        assert_eq!(service.registry().counts().failed, 6);

        cancel.cancel();
        consumer.await.unwrap();
        tokens.stop();
    }
}

// ─── Status consumer ─────────────────────────────────────────────────────

mod status_consumer {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_unauthorized_and_malformed_updates_are_dropped() {
        let (service, channel) = common::coordinator();
        let cancel = CancellationToken::new();
        let consumer = service.spawn_status_consumer(cancel.clone()).await.unwrap();

        let target = service.submit("target").await.unwrap();
        let sentinel = service.submit("sentinel").await.unwrap();
        let valid = service.issue_token("soldier-1").unwrap().token;

        channel
            .publish_status(&StatusUpdate::new(
                &target.id,
                MissionStatus::Completed,
                "forged",
            ))
            .await
            .unwrap();
        channel
            .publish(Queue::Status, b"{\"mission_id\":".to_vec())
            .await
            .unwrap();
        channel
            .publish_status(&StatusUpdate::new(
                &sentinel.id,
                MissionStatus::Completed,
                valid,
            ))
            .await
            .unwrap();

        channel.close(Queue::Status);
        consumer.await.unwrap();

        assert_eq!(
            service.mission(&sentinel.id).unwrap().status,
            MissionStatus::Completed
        );
        assert_eq!(
            service.mission(&target.id).unwrap().status,
            MissionStatus::Queued
        );
    }

    #[tokio::test]
    async fn test_reordered_updates_never_regress() {
        let (service, _) = common::coordinator();
        let mission = service.submit("p").await.unwrap();
        let token = service.issue_token("soldier-1").unwrap().token;

        let completed = StatusUpdate::new(&mission.id, MissionStatus::Completed, token.clone());
        let late = StatusUpdate::new(&mission.id, MissionStatus::InProgress, token);

        assert!(service.apply_status_update(&completed).unwrap().is_applied());
        assert_eq!(
            service.apply_status_update(&late).unwrap(),
            ApplyOutcome::Rejected {
                current: MissionStatus::Completed,
                proposed: MissionStatus::InProgress,
            }
        );
        assert_eq!(
            service.apply_status_update(&completed).unwrap(),
            ApplyOutcome::Duplicate
        );
        assert_eq!(
            service.mission(&mission.id).unwrap().status,
            MissionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_update_for_unknown_mission_is_ignored() {
        let (service, _) = common::coordinator();
        let token = service.issue_token("soldier-1").unwrap().token;
        let update = StatusUpdate::new("ghost", MissionStatus::Completed, token);

        assert_eq!(
            service.apply_status_update(&update).unwrap(),
            ApplyOutcome::Unknown
        );
        assert!(matches!(service.mission("ghost"), Err(Error::NotFound(_))));
    }
}
