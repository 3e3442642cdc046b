//! Job controller tests: terminal statuses, audit outcome and record upserts

use deckhand::filesys::dir::Dir;
use deckhand::jobs::controller::ControllerOptions;
use deckhand::jobs::JobError;
use deckhand::models::operation::OperationStatus;
use deckhand::models::records::{DeploymentKind, DeploymentRecord};
use deckhand::models::status::{AppHealth, EntityKey, EntityStatus};
use deckhand::remote::sink::Collector;
use deckhand::store::Store;
use deckhand_wire::{BuildJobRequest, DeployJobRequest, DeployPayload, ObjectKind, PortMapping};
use chrono::Utc;
use uuid::Uuid;

use crate::support::{Behavior, Harness};

use EntityStatus::*;

fn build_request() -> BuildJobRequest {
    BuildJobRequest {
        app_id: 1,
        image_name: "api".to_string(),
        version: "1.0".to_string(),
        repos_url: "https://git.example.com/web/api.git".to_string(),
        branch: "main".to_string(),
        dockerfile: None,
    }
}

fn image_key() -> EntityKey {
    EntityKey::Image {
        name: "api".to_string(),
        version: "1.0".to_string(),
    }
}

fn manifest(yaml: &str) -> DeployPayload {
    DeployPayload::Manifest {
        object: ObjectKind::Deployment,
        yaml: yaml.to_string(),
    }
}

fn deploy_request(
    app_id: i64,
    name: &str,
    server_ids: &[i64],
    payload: DeployPayload,
) -> DeployJobRequest {
    DeployJobRequest {
        app_id,
        app_name: if app_id == 1 { "web" } else { "shop" }.to_string(),
        deployment_name: name.to_string(),
        server_ids: server_ids.to_vec(),
        replaces: None,
        payload,
    }
}

fn deployment_key(app_id: i64, name: &str) -> EntityKey {
    EntityKey::Deployment {
        app_id,
        name: name.to_string(),
    }
}

async fn audit_statuses(harness: &Harness) -> Vec<OperationStatus> {
    harness.audit.flush().await.unwrap();
    harness
        .store
        .operations(None, None)
        .await
        .unwrap()
        .iter()
        .map(|entry| entry.operation_status)
        .collect()
}

async fn app_health(harness: &Harness, app_id: i64) -> AppHealth {
    harness.store.application(app_id).await.unwrap().unwrap().health
}

// =============================== BUILD ================================== //

#[tokio::test]
async fn test_build_success() {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;
    let sink = Collector::new();

    let outcome = harness
        .controller
        .run_build(Uuid::new_v4(), 42, build_request(), &sink)
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildSuccess);
    assert_eq!(outcome.key, image_key());
    assert_eq!(
        harness.store.status_history(&image_key()).await,
        vec![Building, BuildSuccess]
    );
    assert_eq!(audit_statuses(&harness).await, vec![OperationStatus::Success]);
    assert_eq!(app_health(&harness, 1).await, AppHealth::Normal);

    let image = harness.store.image("api", "1.0").await.unwrap().unwrap();
    assert_eq!(image.url, "registry.example.com/api:1.0");
    assert_eq!(image.status, BuildSuccess);
    assert_eq!(image.log, vec!["ok from 10.0.0.1"]);
    assert_eq!(sink.lines(), vec!["ok from 10.0.0.1"]);

    let commands = harness.connector.commands("10.0.0.1");
    assert_eq!(commands.len(), 1);
    assert!(commands[0].contains("docker build -t 'registry.example.com/api:1.0'"));
    assert_eq!(harness.connector.closes("10.0.0.1"), 1);
}

#[tokio::test]
async fn test_build_failure_is_terminal_and_unconfirmed() {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;
    harness
        .connector
        .set("10.0.0.1", Behavior::FailOn("docker build".to_string()));

    let err = harness
        .controller
        .run_build(Uuid::new_v4(), 42, build_request(), &Collector::new())
        .await
        .unwrap_err();

    match err {
        JobError::Failed { key, failed_hosts } => {
            assert_eq!(key, image_key());
            assert_eq!(failed_hosts, vec!["10.0.0.1"]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(
        harness.store.status_history(&image_key()).await,
        vec![Building, BuildFailure]
    );
    assert_eq!(audit_statuses(&harness).await, vec![OperationStatus::Unconfirmed]);
    assert_eq!(app_health(&harness, 1).await, AppHealth::Abnormal);

    // The failed build is still recorded with its transcript
    let image = harness.store.image("api", "1.0").await.unwrap().unwrap();
    assert_eq!(image.status, BuildFailure);
    assert_eq!(image.log, vec!["error on 10.0.0.1"]);
}

#[tokio::test]
async fn test_unreachable_build_server_fails_the_job() {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;
    harness.connector.set("10.0.0.1", Behavior::Unreachable);

    let err = harness
        .controller
        .run_build(Uuid::new_v4(), 42, build_request(), &Collector::new())
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Failed { .. }));
    assert_eq!(
        harness.store.status_history(&image_key()).await,
        vec![Building, BuildFailure]
    );
    assert_eq!(harness.connector.closes("10.0.0.1"), 0);
}

#[tokio::test]
async fn test_panic_still_writes_terminal_status() {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;
    harness.connector.set("10.0.0.1", Behavior::Panic);

    let err = harness
        .controller
        .run_build(Uuid::new_v4(), 42, build_request(), &Collector::new())
        .await
        .unwrap_err();

    match err {
        JobError::Internal(message) => assert!(message.contains("remote agent crashed")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(
        harness.store.status_history(&image_key()).await,
        vec![Building, BuildFailure]
    );
    assert_eq!(audit_statuses(&harness).await, vec![OperationStatus::Unconfirmed]);
    assert_eq!(app_health(&harness, 1).await, AppHealth::Abnormal);
}

#[tokio::test]
async fn test_missing_build_server_aborts() {
    let harness = Harness::new(&[]).await;

    let err = harness
        .controller
        .run_build(Uuid::new_v4(), 42, build_request(), &Collector::new())
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Internal(_)));
    assert_eq!(
        harness.store.status_history(&image_key()).await,
        vec![Building, BuildFailure]
    );
    assert_eq!(audit_statuses(&harness).await, vec![OperationStatus::Unconfirmed]);
}

#[tokio::test]
async fn test_invalid_build_request_writes_nothing() {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;
    let mut request = build_request();
    request.version = String::new();

    let err = harness
        .controller
        .run_build(Uuid::new_v4(), 42, request, &Collector::new())
        .await
        .unwrap_err();

    match err {
        JobError::Rejected(message) => assert!(message.contains("version")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(harness.store.snapshot().await.statuses.is_empty());
    assert!(audit_statuses(&harness).await.is_empty());
    assert!(harness.connector.calls().is_empty());
}

// =============================== DEPLOY ================================== //

#[tokio::test]
async fn test_redeploy_overwrites_record() {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;
    let sink = Collector::new();

    for yaml in ["replicas: 1", "replicas: 3"] {
        harness
            .controller
            .run_deploy(
                Uuid::new_v4(),
                7,
                deploy_request(1, "web.api", &[1], manifest(yaml)),
                &sink,
            )
            .await
            .unwrap();
    }

    let snapshot = harness.store.snapshot().await;
    assert_eq!(snapshot.deployments.len(), 1);
    let record = &snapshot.deployments[0];
    assert_eq!(record.payload.as_deref(), Some("replicas: 3"));
    assert_eq!(record.kind, DeploymentKind::Kubernetes);
    assert_eq!(record.status, DeploySuccess);
    assert_eq!(record.log["10.0.0.1"]["out"][0], "ok from 10.0.0.1");

    assert_eq!(
        harness.store.status_history(&deployment_key(1, "web.api")).await,
        vec![Deploying, DeploySuccess, Deploying, DeploySuccess]
    );
    assert_eq!(
        audit_statuses(&harness).await,
        vec![OperationStatus::Success, OperationStatus::Success]
    );
    assert_eq!(sink.lines()[0], "[10.0.0.1] ok from 10.0.0.1");
}

#[tokio::test]
async fn test_name_taken_by_another_app_is_rejected() {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;
    harness
        .controller
        .run_deploy(
            Uuid::new_v4(),
            7,
            deploy_request(1, "web.api", &[1], manifest("a: 1")),
            &Collector::new(),
        )
        .await
        .unwrap();
    let calls_before = harness.connector.calls().len();

    let err = harness
        .controller
        .run_deploy(
            Uuid::new_v4(),
            8,
            deploy_request(2, "web.api", &[1], manifest("b: 2")),
            &Collector::new(),
        )
        .await
        .unwrap_err();

    match err {
        JobError::Rejected(message) => assert!(message.contains("already used")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(harness
        .store
        .status_history(&deployment_key(2, "web.api"))
        .await
        .is_empty());
    assert_eq!(audit_statuses(&harness).await.len(), 1);
    assert_eq!(harness.connector.calls().len(), calls_before);
}

#[tokio::test]
async fn test_partial_failure_keeps_every_transcript() {
    let harness = Harness::new(&[(1, "10.0.0.1"), (2, "10.0.0.2"), (3, "10.0.0.3")]).await;
    harness
        .connector
        .set("10.0.0.2", Behavior::FailOn("kubectl apply".to_string()));

    let err = harness
        .controller
        .run_deploy(
            Uuid::new_v4(),
            7,
            deploy_request(1, "web.api", &[1, 2, 3], manifest("kind: Deployment")),
            &Collector::new(),
        )
        .await
        .unwrap_err();

    match err {
        JobError::Failed { failed_hosts, .. } => assert_eq!(failed_hosts, vec!["10.0.0.2"]),
        other => panic!("unexpected error: {:?}", other),
    }

    let record = harness.store.deployment(1, "web.api").await.unwrap().unwrap();
    assert_eq!(record.status, DeployFailure);
    for host in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        assert!(record.log.get(host).is_some(), "{}", host);
    }
    assert_eq!(record.log["10.0.0.2"]["err"][0], "error on 10.0.0.2");
    assert_eq!(audit_statuses(&harness).await, vec![OperationStatus::Unconfirmed]);
}

#[tokio::test]
async fn test_service_manifest_drives_service_status() {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;
    let payload = DeployPayload::Manifest {
        object: ObjectKind::Service,
        yaml: "kind: Service".to_string(),
    };

    let outcome = harness
        .controller
        .run_deploy(
            Uuid::new_v4(),
            7,
            deploy_request(1, "web-svc", &[1], payload),
            &Collector::new(),
        )
        .await
        .unwrap();

    let key = EntityKey::Service {
        app_id: 1,
        name: "web-svc".to_string(),
    };
    assert_eq!(outcome.key, key);
    assert_eq!(harness.store.status_history(&key).await, vec![Deploying, DeploySuccess]);
}

#[tokio::test]
async fn test_container_deploy_runs_docker() {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;
    let payload = DeployPayload::Container {
        image: "registry.example.com/api:1.0".to_string(),
        ports: vec![PortMapping {
            host: 8080,
            container: 80,
            protocol: None,
        }],
        env: Default::default(),
    };

    harness
        .controller
        .run_deploy(
            Uuid::new_v4(),
            7,
            deploy_request(1, "web-api", &[1], payload),
            &Collector::new(),
        )
        .await
        .unwrap();

    let commands = harness.connector.commands("10.0.0.1");
    assert_eq!(commands.len(), 3);
    assert!(commands[0].starts_with("docker pull"));
    assert!(commands[2].contains("-p 8080:80"));

    let record = harness.store.deployment(1, "web-api").await.unwrap().unwrap();
    assert_eq!(record.kind, DeploymentKind::Docker);
    assert!(record.payload.unwrap().contains("\"type\":\"container\""));
}

#[tokio::test]
async fn test_replace_removes_old_deployment() {
    let harness = Harness::new(&[(1, "10.0.0.1"), (2, "10.0.0.2")]).await;
    harness
        .controller
        .run_deploy(
            Uuid::new_v4(),
            7,
            deploy_request(1, "web-old", &[1], manifest("v: 1")),
            &Collector::new(),
        )
        .await
        .unwrap();

    let mut request = deploy_request(1, "web-new", &[1, 2], manifest("v: 2"));
    request.replaces = Some("web-old".to_string());
    harness
        .controller
        .run_deploy(Uuid::new_v4(), 7, request, &Collector::new())
        .await
        .unwrap();

    let commands = harness.connector.commands("10.0.0.1");
    assert_eq!(commands.len(), 3);
    assert_eq!(commands[1], "kubectl delete deployment 'web-old' --ignore-not-found");
    assert!(commands[2].contains("kubectl apply"));

    assert!(harness.store.deployment(1, "web-old").await.unwrap().is_none());
    let record = harness.store.deployment(1, "web-new").await.unwrap().unwrap();
    assert_eq!(record.log["10.0.0.1"]["out"].as_array().unwrap().len(), 2);
    assert_eq!(record.log["10.0.0.2"]["out"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_removal_keeps_old_record() {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;
    harness
        .controller
        .run_deploy(
            Uuid::new_v4(),
            7,
            deploy_request(1, "web-old", &[1], manifest("v: 1")),
            &Collector::new(),
        )
        .await
        .unwrap();
    harness
        .connector
        .set("10.0.0.1", Behavior::FailOn("kubectl delete".to_string()));

    let mut request = deploy_request(1, "web-new", &[1], manifest("v: 2"));
    request.replaces = Some("web-old".to_string());
    let err = harness
        .controller
        .run_deploy(Uuid::new_v4(), 7, request, &Collector::new())
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Failed { .. }));
    assert!(harness.store.deployment(1, "web-old").await.unwrap().is_some());
    assert_eq!(
        harness.store.status_history(&deployment_key(1, "web-new")).await,
        vec![Deploying, DeployFailure]
    );
}

#[tokio::test]
async fn test_manifest_is_archived() {
    let temp = tempfile::tempdir().unwrap();
    let harness = Harness::with_options(
        &[(1, "10.0.0.1")],
        ControllerOptions {
            manifest_dir: Some(Dir::new(temp.path().join("manifests"))),
            ..Default::default()
        },
    )
    .await;

    harness
        .controller
        .run_deploy(
            Uuid::new_v4(),
            7,
            deploy_request(1, "web.api", &[1], manifest("kind: Deployment")),
            &Collector::new(),
        )
        .await
        .unwrap();

    let archived =
        std::fs::read_to_string(temp.path().join("manifests/web_web.api.yaml")).unwrap();
    assert_eq!(archived, "kind: Deployment");
}

#[tokio::test]
async fn test_app_name_cannot_leave_the_archive() {
    let temp = tempfile::tempdir().unwrap();
    let harness = Harness::with_options(
        &[(1, "10.0.0.1")],
        ControllerOptions {
            manifest_dir: Some(Dir::new(temp.path().join("manifests"))),
            ..Default::default()
        },
    )
    .await;

    for app_name in [
        format!("{}/outside/evil", temp.path().display()),
        "../outside".to_string(),
    ] {
        let mut request = deploy_request(1, "web", &[1], manifest("kind: Deployment"));
        request.app_name = app_name.clone();

        let err = harness
            .controller
            .run_deploy(Uuid::new_v4(), 7, request, &Collector::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Rejected(_)), "{}: {:?}", app_name, err);
    }

    assert!(!temp.path().join("outside").exists());
    assert!(!temp.path().join("outside_web.yaml").exists());
    assert!(harness.connector.calls().is_empty());
}

#[tokio::test]
async fn test_unresolvable_replaced_server_still_applies() {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;
    let now = Utc::now();
    harness
        .store
        .upsert_deployment(DeploymentRecord {
            name: "web-old".to_string(),
            app_id: 1,
            kind: DeploymentKind::Kubernetes,
            status: DeploySuccess,
            server_ids: vec![9],
            payload: Some("v: 1".to_string()),
            log: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    let mut request = deploy_request(1, "web-new", &[1], manifest("v: 2"));
    request.replaces = Some("web-old".to_string());
    let sink = Collector::new();
    let err = harness
        .controller
        .run_deploy(Uuid::new_v4(), 7, request, &sink)
        .await
        .unwrap_err();

    match err {
        JobError::Failed { failed_hosts, .. } => assert_eq!(failed_hosts, vec!["server 9"]),
        other => panic!("unexpected error: {:?}", other),
    }

    let commands = harness.connector.commands("10.0.0.1");
    assert_eq!(commands.len(), 1);
    assert!(commands[0].contains("kubectl apply"));

    assert!(harness.store.deployment(1, "web-old").await.unwrap().is_some());
    let record = harness.store.deployment(1, "web-new").await.unwrap().unwrap();
    assert_eq!(record.status, DeployFailure);
    assert_eq!(record.log["10.0.0.1"]["out"][0], "ok from 10.0.0.1");
    assert!(record.log["server 9"]["err"][0]
        .as_str()
        .unwrap()
        .contains("Cannot remove web-old"));
    assert!(sink.lines()[0].starts_with("[server 9] Cannot remove web-old"));
    assert_eq!(
        harness.store.status_history(&deployment_key(1, "web-new")).await,
        vec![Deploying, DeployFailure]
    );
}

#[tokio::test]
async fn test_deploy_panic_still_writes_terminal_status() {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;
    harness.connector.set("10.0.0.1", Behavior::Panic);

    let err = harness
        .controller
        .run_deploy(
            Uuid::new_v4(),
            7,
            deploy_request(1, "web.api", &[1], manifest("kind: Deployment")),
            &Collector::new(),
        )
        .await
        .unwrap_err();

    match err {
        JobError::Internal(message) => assert!(message.contains("remote agent crashed")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(
        harness.store.status_history(&deployment_key(1, "web.api")).await,
        vec![Deploying, DeployFailure]
    );
    assert_eq!(audit_statuses(&harness).await, vec![OperationStatus::Unconfirmed]);
    assert_eq!(app_health(&harness, 1).await, AppHealth::Abnormal);
}

#[tokio::test]
async fn test_failed_archive_still_writes_terminal_status() {
    let temp = tempfile::tempdir().unwrap();
    let not_a_dir = temp.path().join("manifests");
    std::fs::write(&not_a_dir, "").unwrap();
    let harness = Harness::with_options(
        &[(1, "10.0.0.1")],
        ControllerOptions {
            manifest_dir: Some(Dir::new(&not_a_dir)),
            ..Default::default()
        },
    )
    .await;

    let err = harness
        .controller
        .run_deploy(
            Uuid::new_v4(),
            7,
            deploy_request(1, "web.api", &[1], manifest("kind: Deployment")),
            &Collector::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Internal(_)));
    assert_eq!(
        harness.store.status_history(&deployment_key(1, "web.api")).await,
        vec![Deploying, DeployFailure]
    );
    assert_eq!(audit_statuses(&harness).await, vec![OperationStatus::Unconfirmed]);
    assert_eq!(app_health(&harness, 1).await, AppHealth::Abnormal);
}

// ============================ TERMINAL STATUS ============================== //

#[tokio::test]
async fn test_every_job_ends_in_a_terminal_status() {
    let behaviors = [
        Behavior::Ok,
        Behavior::FailOn(String::new()),
        Behavior::Unreachable,
        Behavior::Panic,
    ];

    for behavior in behaviors {
        let succeeds = matches!(behavior, Behavior::Ok);

        let harness = Harness::new(&[(1, "10.0.0.1")]).await;
        harness.connector.set("10.0.0.1", behavior.clone());
        let result = harness
            .controller
            .run_build(Uuid::new_v4(), 42, build_request(), &Collector::new())
            .await;
        assert_eq!(result.is_ok(), succeeds, "build {:?}", behavior);
        let terminal = if succeeds { BuildSuccess } else { BuildFailure };
        assert_eq!(
            harness.store.status_history(&image_key()).await,
            vec![Building, terminal],
            "build {:?}",
            behavior
        );
        assert_terminal_audit(&harness, succeeds).await;

        let harness = Harness::new(&[(1, "10.0.0.1")]).await;
        harness.connector.set("10.0.0.1", behavior.clone());
        let result = harness
            .controller
            .run_deploy(
                Uuid::new_v4(),
                7,
                deploy_request(1, "web.api", &[1], manifest("kind: Deployment")),
                &Collector::new(),
            )
            .await;
        assert_eq!(result.is_ok(), succeeds, "deploy {:?}", behavior);
        let terminal = if succeeds { DeploySuccess } else { DeployFailure };
        assert_eq!(
            harness.store.status_history(&deployment_key(1, "web.api")).await,
            vec![Deploying, terminal],
            "deploy {:?}",
            behavior
        );
        assert_terminal_audit(&harness, succeeds).await;
    }
}

async fn assert_terminal_audit(harness: &Harness, succeeded: bool) {
    let (status, health) = if succeeded {
        (OperationStatus::Success, AppHealth::Normal)
    } else {
        (OperationStatus::Unconfirmed, AppHealth::Abnormal)
    };
    assert_eq!(audit_statuses(harness).await, vec![status]);
    assert_eq!(app_health(harness, 1).await, health);
}
