//! Lifecycle behaviour against the in-memory control plane

use argocd_provider::controlplane::{ApiOperation, Outcome, CONTROLLER_FINALIZER};
use argocd_provider::crd::JwtToken;
use argocd_provider::domain::{RoleModel, SyncWindowModel};
use argocd_provider::{
    Error, InMemoryProjectApi, Lifecycle, LifecycleConfig, LockMode, ManagedResource,
    MetadataModel, Project, ProjectModel, ProjectSpecModel, ProviderSession, RemoteError,
    SessionConfig,
};
use assert_matches::assert_matches;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Fixtures
// =============================================================================

fn session_with(server_version: Option<&str>, max_deletion_wait: Duration) -> Arc<ProviderSession> {
    ProviderSession::new(SessionConfig {
        server_version: server_version.map(str::to_string),
        lifecycle: LifecycleConfig { max_deletion_wait },
    })
    .unwrap()
}

fn setup(api: InMemoryProjectApi) -> (Arc<ProviderSession>, Arc<InMemoryProjectApi>, Lifecycle<Project>) {
    let session = session_with(Some("v2.13.2"), Duration::from_secs(5));
    let api = Arc::new(api);
    let lifecycle = session.lifecycle::<Project>(api.clone());
    (session, api, lifecycle)
}

fn role(name: &str) -> RoleModel {
    RoleModel {
        name: name.to_string(),
        policies: vec![format!("p, proj:team-a:{}, applications, get, team-a/*, allow", name)],
        ..Default::default()
    }
}

fn team_a() -> ProjectModel {
    ProjectModel {
        metadata: MetadataModel {
            name: "team-a".into(),
            namespace: Some("argocd".into()),
            labels: Some(BTreeMap::from([("team".to_string(), "a".to_string())])),
            ..Default::default()
        },
        spec: ProjectSpecModel {
            description: Some("Team A".into()),
            source_repos: vec!["https://git.example.com/team-a.git".into()],
            role: vec![role("admin"), role("viewer")],
            sync_window: vec![SyncWindowModel {
                kind: Some("allow".into()),
                schedule: Some("10 1 * * *".into()),
                duration: Some("1h".into()),
                applications: vec!["*".into()],
                ..Default::default()
            }],
            ..Default::default()
        },
    }
}

// =============================================================================
// Create / Read
// =============================================================================

#[tokio::test]
async fn test_create_hides_controller_metadata() {
    let (_session, api, lifecycle) = setup(InMemoryProjectApi::new().with_argocd_controller());
    let cancel = CancellationToken::new();
    let model = team_a();

    let state = lifecycle.create(&model, &cancel).await.unwrap();

    assert_eq!(state.metadata.labels, model.metadata.labels);
    assert_eq!(state.metadata.annotations, None);
    assert_eq!(state.metadata.finalizers, None);
    assert!(state.metadata.uid.is_some());
    assert_eq!(state.spec, model.spec);

    // still physically present on the server
    let live = api.peek("team-a").await.unwrap();
    assert_eq!(live.metadata.finalizers, Some(vec![CONTROLLER_FINALIZER.to_string()]));

    let read = lifecycle.read(&state, &cancel).await.unwrap().unwrap();
    assert_eq!(read, state);
}

#[tokio::test]
async fn test_create_existing_is_user_error() {
    let (_session, _api, lifecycle) = setup(InMemoryProjectApi::new());
    let cancel = CancellationToken::new();

    lifecycle.create(&team_a(), &cancel).await.unwrap();
    let err = lifecycle.create(&team_a(), &cancel).await.unwrap_err();

    assert_matches!(&err, Error::AlreadyExists { name, .. } if name == "team-a");
    assert!(err.is_user_error());
}

#[tokio::test]
async fn test_read_missing_resource_is_absent() {
    let (session, _api, lifecycle) = setup(InMemoryProjectApi::new());
    let cancel = CancellationToken::new();

    assert_eq!(lifecycle.read(&team_a(), &cancel).await.unwrap(), None);
    assert_eq!(
        session.metrics().operation_count("project", "read", Outcome::Absent),
        1
    );
}

#[tokio::test]
async fn test_remote_failure_carries_context() {
    let (_session, api, lifecycle) = setup(InMemoryProjectApi::new());
    let cancel = CancellationToken::new();
    api.fail_next(ApiOperation::Get, RemoteError::other("connection refused"))
        .await;

    let err = lifecycle.read(&team_a(), &cancel).await.unwrap_err();

    assert_matches!(
        &err,
        Error::RemoteApi { operation, kind, name, message }
            if operation == "read" && kind == "project" && name == "team-a" && message == "connection refused"
    );
    assert_eq!(err.diagnostic().summary, "failed to read project team-a");
}

// =============================================================================
// Soft Deletion
// =============================================================================

#[tokio::test]
async fn test_create_waits_out_previous_deletion() {
    let session = session_with(None, Duration::from_secs(5));
    let api = Arc::new(InMemoryProjectApi::new());
    let lifecycle = session.lifecycle::<Project>(api.clone());
    let cancel = CancellationToken::new();

    lifecycle.create(&team_a(), &cancel).await.unwrap();
    assert!(api.mark_deleting("team-a", Duration::from_secs(1)).await);

    let started = std::time::Instant::now();
    let state = lifecycle.create(&team_a(), &cancel).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(900));
    assert_eq!(state.metadata.generation, Some(1));
}

#[tokio::test]
async fn test_deletion_wait_is_bounded() {
    let session = session_with(None, Duration::from_millis(50));
    let api = Arc::new(InMemoryProjectApi::new());
    let lifecycle = session.lifecycle::<Project>(api.clone());
    let cancel = CancellationToken::new();

    lifecycle.create(&team_a(), &cancel).await.unwrap();
    api.mark_deleting("team-a", Duration::from_secs(30)).await;

    let started = std::time::Instant::now();
    let result = lifecycle.create(&team_a(), &cancel).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_matches!(result, Err(Error::AlreadyExists { .. }));
}

#[tokio::test]
async fn test_soft_deleted_without_grace_is_not_waited_for() {
    let (_session, api, lifecycle) = setup(InMemoryProjectApi::new());
    let cancel = CancellationToken::new();

    lifecycle.create(&team_a(), &cancel).await.unwrap();
    api.modify_metadata("team-a", |meta| {
        meta.deletion_timestamp = Some(Time(chrono::Utc::now()));
        meta.deletion_grace_period_seconds = None;
    })
    .await;

    let started = std::time::Instant::now();
    let result = lifecycle.create(&team_a(), &cancel).await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_matches!(result, Err(Error::AlreadyExists { .. }));
    assert_eq!(api.calls(ApiOperation::Create), 2);
}

#[tokio::test]
async fn test_create_surfaces_failed_existence_check() {
    let (_session, api, lifecycle) = setup(InMemoryProjectApi::new());
    let cancel = CancellationToken::new();
    api.fail_next(ApiOperation::Get, RemoteError::other("permission denied"))
        .await;

    let err = lifecycle.create(&team_a(), &cancel).await.unwrap_err();

    assert_matches!(
        err,
        Error::RemoteApi { operation, message, .. }
            if operation == "get" && message == "permission denied"
    );
    assert_eq!(api.calls(ApiOperation::Create), 0);
    assert!(api.peek("team-a").await.is_none());
}

// =============================================================================
// Update
// =============================================================================

#[tokio::test]
async fn test_update_keeps_controller_metadata_and_tokens() {
    let (_session, api, lifecycle) = setup(InMemoryProjectApi::new().with_argocd_controller());
    let cancel = CancellationToken::new();

    let state = lifecycle.create(&team_a(), &cancel).await.unwrap();

    // tokens issued for the viewer role after create
    let token = JwtToken {
        iat: 1_700_000_000,
        exp: None,
        id: Some("ci".into()),
    };
    let mut live = api.peek("team-a").await.unwrap();
    live.spec.roles[1].jwt_tokens = Some(vec![token.clone()]);
    api.insert(live).await;

    // roles reordered and one added
    let mut desired = state.clone();
    desired.spec.description = Some("Team A, updated".into());
    desired.spec.role = vec![role("viewer"), role("admin"), role("deployer")];
    desired.metadata.finalizers = Some(vec!["team-a.example.com/cleanup".into()]);

    let updated = lifecycle.update(&desired, &cancel).await.unwrap();

    assert_eq!(updated.spec.description.as_deref(), Some("Team A, updated"));
    assert_eq!(
        updated.metadata.finalizers,
        Some(vec!["team-a.example.com/cleanup".to_string()])
    );
    assert_eq!(updated.metadata.annotations, None);

    let live = api.peek("team-a").await.unwrap();
    assert_eq!(
        live.metadata.finalizers,
        Some(vec![
            CONTROLLER_FINALIZER.to_string(),
            "team-a.example.com/cleanup".to_string()
        ])
    );
    let annotations = live.metadata.annotations.unwrap();
    assert!(annotations.contains_key("notified.notifications.argoproj.io"));
    assert_eq!(
        live.metadata.labels.unwrap().get("app.kubernetes.io/part-of").map(String::as_str),
        Some("argocd")
    );

    let roles: Vec<_> = live.spec.roles.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(roles, ["viewer", "admin", "deployer"]);
    assert_eq!(live.spec.roles[0].jwt_tokens, Some(vec![token]));
    assert_eq!(live.spec.roles[1].jwt_tokens, None);
    assert_eq!(live.spec.roles[2].jwt_tokens, None);
}

#[tokio::test]
async fn test_update_keeps_undeclared_labels_and_annotations() {
    let (_session, api, lifecycle) = setup(InMemoryProjectApi::new());
    let cancel = CancellationToken::new();

    let mut model = team_a();
    model.metadata.labels = None;
    let state = lifecycle.create(&model, &cancel).await.unwrap();

    // another tool labels the project after create
    assert!(
        api.modify_metadata("team-a", |meta| {
            meta.labels = Some(BTreeMap::from([("owner".to_string(), "ops".to_string())]));
            meta.annotations = Some(BTreeMap::from([(
                "team.example.com/contact".to_string(),
                "x".to_string(),
            )]));
        })
        .await
    );

    let mut desired = state;
    desired.spec.description = Some("Team A, renamed".into());
    lifecycle.update(&desired, &cancel).await.unwrap();

    let live = api.peek("team-a").await.unwrap();
    assert_eq!(live.spec.description.as_deref(), Some("Team A, renamed"));
    assert_eq!(
        live.metadata.labels.unwrap().get("owner").map(String::as_str),
        Some("ops")
    );
    assert_eq!(
        live.metadata
            .annotations
            .unwrap()
            .get("team.example.com/contact")
            .map(String::as_str),
        Some("x")
    );
}

#[tokio::test]
async fn test_update_rejects_invalid_declaration_before_remote_calls() {
    let (_session, api, lifecycle) = setup(InMemoryProjectApi::new());
    let cancel = CancellationToken::new();

    let mut model = team_a();
    model.spec.role.push(role("admin"));

    assert_matches!(
        lifecycle.update(&model, &cancel).await,
        Err(Error::Configuration(_))
    );
    assert_eq!(api.total_calls(), 0);
    assert!(lifecycle.locks().is_empty());
}

#[tokio::test]
async fn test_update_missing_resource_fails() {
    let (_session, api, lifecycle) = setup(InMemoryProjectApi::new());
    let cancel = CancellationToken::new();

    let err = lifecycle.update(&team_a(), &cancel).await.unwrap_err();

    assert_matches!(err, Error::RemoteApi { operation, .. } if operation == "get");
    assert_eq!(api.calls(ApiOperation::Update), 0);
}

#[tokio::test]
async fn test_update_conflict_is_surfaced() {
    let (_session, api, lifecycle) = setup(InMemoryProjectApi::new());
    let cancel = CancellationToken::new();

    lifecycle.create(&team_a(), &cancel).await.unwrap();
    api.fail_next(
        ApiOperation::Update,
        RemoteError::other("Operation cannot be fulfilled: the object has been modified"),
    )
    .await;

    let err = lifecycle.update(&team_a(), &cancel).await.unwrap_err();

    assert_matches!(err, Error::Conflict { .. });
    assert_eq!(api.calls(ApiOperation::Update), 1);
}

#[tokio::test]
async fn test_inconsistent_live_roles_abort_update() {
    let (_session, api, lifecycle) = setup(InMemoryProjectApi::new());
    let cancel = CancellationToken::new();

    let mut live = Project::expand(&team_a()).unwrap();
    live.spec.roles[1].name = "admin".into();
    api.insert(live).await;

    let err = lifecycle.update(&team_a(), &cancel).await.unwrap_err();

    assert_matches!(err, Error::RoleRetrieval { role, .. } if role == "admin");
    assert_eq!(api.calls(ApiOperation::Update), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_are_serialized() {
    let (session, api, lifecycle) =
        setup(InMemoryProjectApi::new().with_latency(Duration::from_millis(5)));
    let lifecycle = Arc::new(lifecycle);
    let cancel = CancellationToken::new();

    lifecycle.create(&team_a(), &cancel).await.unwrap();

    let updates = (0..16).map(|i| {
        let lifecycle = lifecycle.clone();
        let cancel = cancel.clone();
        let mut model = team_a();
        model.spec.description = Some(format!("revision {}", i));
        tokio::spawn(async move { lifecycle.update(&model, &cancel).await })
    });

    for result in futures::future::join_all(updates).await {
        result.unwrap().unwrap();
    }

    let live = api.peek("team-a").await.unwrap();
    assert_eq!(live.metadata.generation, Some(17));
    assert_eq!(
        session.metrics().operation_count("project", "update", Outcome::Ok),
        16
    );
    assert_eq!(
        session.metrics().operation_count("project", "update", Outcome::Error),
        0
    );
}

// =============================================================================
// Feature Gating
// =============================================================================

#[tokio::test]
async fn test_unsupported_feature_makes_no_remote_calls() {
    let session = session_with(Some("2.4.7"), Duration::from_secs(5));
    let api = Arc::new(InMemoryProjectApi::new());
    let lifecycle = session.lifecycle::<Project>(api.clone());
    let cancel = CancellationToken::new();

    let mut model = team_a();
    model.spec.source_namespaces = vec!["team-a-apps".into()];

    let err = lifecycle.create(&model, &cancel).await.unwrap_err();
    assert_matches!(&err, Error::FeatureUnsupported { min_version, .. } if min_version == "2.5.0");
    assert!(err.is_user_error());

    assert_matches!(
        lifecycle.update(&model, &cancel).await,
        Err(Error::FeatureUnsupported { .. })
    );

    assert_eq!(api.total_calls(), 0);
    assert!(lifecycle.locks().is_empty());
}

// =============================================================================
// Delete / Import
// =============================================================================

#[tokio::test]
async fn test_delete_twice_succeeds() {
    let (session, api, lifecycle) = setup(InMemoryProjectApi::new());
    let cancel = CancellationToken::new();

    lifecycle.create(&team_a(), &cancel).await.unwrap();
    lifecycle.delete(&team_a(), &cancel).await.unwrap();
    lifecycle.delete(&team_a(), &cancel).await.unwrap();

    assert!(api.peek("team-a").await.is_none());
    assert_eq!(lifecycle.read(&team_a(), &cancel).await.unwrap(), None);

    let metrics = session.metrics();
    assert_eq!(metrics.operation_count("project", "delete", Outcome::Ok), 1);
    assert_eq!(metrics.operation_count("project", "delete", Outcome::Absent), 1);
}

#[tokio::test]
async fn test_lock_entries_reported_per_kind() {
    let (session, _api, lifecycle) = setup(InMemoryProjectApi::new());
    let cancel = CancellationToken::new();

    lifecycle.read(&team_a(), &cancel).await.unwrap();
    let mut other = team_a();
    other.metadata.name = "team-b".into();
    lifecycle.read(&other, &cancel).await.unwrap();

    assert_eq!(session.metrics().lock_entries("project"), 2);
    assert_eq!(session.metrics().lock_entries("repository"), 0);

    let text = session.metrics().render().unwrap();
    assert!(text.contains("argocd_provider_lock_entries{kind=\"project\"} 2"));
}

#[tokio::test]
async fn test_import_then_read() {
    let (_session, _api, lifecycle) = setup(InMemoryProjectApi::new());
    let cancel = CancellationToken::new();

    assert_matches!(lifecycle.import("   "), Err(Error::InvalidImportId(_)));

    lifecycle.create(&team_a(), &cancel).await.unwrap();

    let skeleton = lifecycle.import(" team-a ").unwrap();
    assert_eq!(skeleton.metadata.name, "team-a");

    let state = lifecycle.read(&skeleton, &cancel).await.unwrap().unwrap();
    assert_eq!(state.spec, team_a().spec);
    assert_eq!(state.metadata.labels, team_a().metadata.labels);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancelled_wait_for_lock() {
    let (_session, api, lifecycle) = setup(InMemoryProjectApi::new());
    let lifecycle = Arc::new(lifecycle);
    let cancel = CancellationToken::new();

    let held = lifecycle.locks().write("team-a").await;

    let task = {
        let lifecycle = lifecycle.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { lifecycle.read(&team_a(), &cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    assert_matches!(task.await.unwrap(), Err(Error::Cancelled { operation, .. }) if operation == "read");
    assert_eq!(api.total_calls(), 0);
    drop(held);
}

#[tokio::test]
async fn test_cancelled_remote_call_releases_lock() {
    let (_session, _api, lifecycle) =
        setup(InMemoryProjectApi::new().with_latency(Duration::from_millis(500)));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = lifecycle.delete(&team_a(), &cancel).await.unwrap_err();

    assert_matches!(err, Error::Cancelled { .. });
    assert!(lifecycle.locks().try_acquire("team-a", LockMode::Write).is_some());
}
