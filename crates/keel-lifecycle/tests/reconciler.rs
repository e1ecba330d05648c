//! Reconciler entry point, controller loop and store integration tests

mod common;

use camino::Utf8PathBuf;
use common::*;
use keel_core::types::{ComponentState, ConditionType, ManagedResource, ResourceState};
use keel_core::KeelConfig;
use keel_lifecycle::{
    Component, ComponentManifest, ComponentRegistry, Controller, FileResourceStore,
    MemoryStatusStore, NoopPlatform, Platform, Reconciler, ResourceStore, StopReason,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

fn registry(components: &[FakeComponent]) -> Arc<ComponentRegistry> {
    let components = components
        .iter()
        .cloned()
        .map(FakeComponent::into_arc)
        .collect::<Vec<Arc<dyn Component>>>();
    Arc::new(ComponentRegistry::new(components).unwrap())
}

/// A shared reconciler over an in-memory store seeded with `resources`
fn shared_reconciler(
    components: &[FakeComponent],
    resources: Vec<ManagedResource>,
) -> (Arc<MemoryStatusStore>, Arc<Reconciler>) {
    let store = Arc::new(MemoryStatusStore::new());
    for resource in resources {
        store.insert(resource);
    }
    let reconciler = Reconciler::new(
        registry(components),
        Arc::clone(&store) as Arc<dyn ResourceStore>,
        Arc::new(FakePlatform::new()) as Arc<dyn Platform>,
        test_settings(),
    );
    (store, Arc::new(reconciler))
}

fn no_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

#[tokio::test]
async fn test_missing_resource_is_done() {
    let (store, reconciler) = shared_reconciler(&[FakeComponent::new("ingress")], Vec::new());
    assert!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.is_done());
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn test_first_pass_only_initialises_state() {
    let ingress = FakeComponent::new("ingress");
    let mut h = Harness::new(&[ingress.clone()], ResourceBuilder::new().build());

    assert_requeue(&h.pass().await);
    let resource = h.resource();
    assert_resource_state(&resource, ResourceState::Ready);
    assert!(resource.status.components.is_empty());

    assert_requeue(&h.pass().await);
    let resource = h.resource();
    assert_component_state(&resource, "ingress", ComponentState::Disabled);
    assert_component_generations(&resource, "ingress", 0, 0);
    assert!(resource.status.conditions.is_empty());
    assert_eq!(ingress.calls(Hook::PreInstall), 0);
}

#[tokio::test]
async fn test_concurrent_passes_for_one_resource_are_serialised() {
    let (store, reconciler) = shared_reconciler(
        &[FakeComponent::new("ingress")],
        vec![ResourceBuilder::new().build()],
    );

    let (a, b) = tokio::join!(
        reconciler.reconcile(TEST_NAMESPACE, TEST_NAME),
        reconciler.reconcile(TEST_NAMESPACE, TEST_NAME)
    );
    assert_requeue(&a);
    assert_requeue(&b);

    // The second pass saw the first one's write
    let writes = store.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].state, Some(ResourceState::Ready));
    assert_eq!(writes[1].components.len(), 1);
}

#[tokio::test]
async fn test_recreated_resource_starts_over() {
    let ingress = FakeComponent::new("ingress");
    let mut h = Harness::new(&[ingress.clone()], ResourceBuilder::new().build());
    h.settle().await;
    let old_id = h.resource().id();

    // Same namespace and name, new owner uid and an empty status
    let mut recreated = ResourceBuilder::new().build();
    recreated.metadata.uid = "uid-2".to_string();
    h.store.insert(recreated);

    assert!(h.settle().await.is_done());
    let resource = h.resource();
    assert_ne!(resource.id(), old_id);
    assert_last_condition(&resource, ConditionType::InstallComplete);

    // Already present on the cluster, so picked up as Ready without a reinstall
    assert_eq!(ingress.calls(Hook::Install), 1);
    assert_component_state(&resource, "ingress", ComponentState::Ready);
}

#[tokio::test]
async fn test_recreated_resource_drops_old_trackers() {
    let ingress = FakeComponent::new("ingress");
    let mut h = Harness::new(&[ingress], ResourceBuilder::new().build());
    let old_id = h.resource().id();
    for _ in 0..MAX_TEST_PASSES {
        if h.reconciler.trackers().install.contains(&old_id) {
            break;
        }
        h.pass().await;
    }
    assert!(h.reconciler.trackers().install.contains(&old_id));

    let mut recreated = ResourceBuilder::new().build();
    recreated.metadata.uid = "uid-2".to_string();
    h.store.insert(recreated);
    h.pass().await;

    assert!(!h.reconciler.trackers().install.contains(&old_id));
    assert!(h.settle().await.is_done());
}

#[tokio::test]
async fn test_settings_come_from_config() {
    let config = KeelConfig::from_yaml(
        r#"
requeue:
  min_delay_ms: 0
  max_delay_ms: 0
uninstall:
  shared_namespaces: [keel-shared]
  uninstall_disabled_components: true
"#,
        None,
    )
    .unwrap();

    let reconciler = Reconciler::from_config(
        registry(&[FakeComponent::new("ingress")]),
        Arc::new(MemoryStatusStore::new()),
        Arc::new(NoopPlatform),
        &config,
    );
    let settings = reconciler.settings();
    assert!(settings.uninstall_disabled_components);
    assert_eq!(settings.shared_namespaces, vec![SHARED_NAMESPACE.to_string()]);
    assert_eq!(settings.requeue.delay(), Duration::ZERO);
}

#[tokio::test]
async fn test_controller_runs_until_settled() {
    let (store, reconciler) = shared_reconciler(
        &[FakeComponent::new("ingress"), FakeComponent::new("rancher").depends_on("ingress")],
        vec![ResourceBuilder::new().build()],
    );
    let controller = Controller::new(reconciler, Duration::from_secs(3600)).until_settled(true);
    let (_tx, rx) = no_shutdown();

    let summary = controller.run(TEST_NAMESPACE, TEST_NAME, rx).await;
    assert_eq!(summary.reason, StopReason::Settled);
    assert_eq!(summary.passes, 5);
    assert!(summary.last.is_done());

    let resource = store.get(TEST_NAMESPACE, TEST_NAME).unwrap();
    assert_last_condition(&resource, ConditionType::InstallComplete);
}

#[tokio::test]
async fn test_controller_stops_at_max_passes() {
    let ingress = FakeComponent::new("ingress");
    ingress.set_not_ready_for(1000);
    let (_store, reconciler) =
        shared_reconciler(&[ingress], vec![ResourceBuilder::new().build()]);
    let controller = Controller::new(reconciler, Duration::from_secs(3600))
        .until_settled(true)
        .with_max_passes(6);
    let (_tx, rx) = no_shutdown();

    let summary = controller.run(TEST_NAMESPACE, TEST_NAME, rx).await;
    assert_eq!(summary.reason, StopReason::MaxPasses);
    assert_eq!(summary.passes, 6);
    assert_requeue(&summary.last);
}

#[tokio::test]
async fn test_controller_reports_parked_component() {
    let ingress = FakeComponent::new("ingress");
    ingress.fail_next(Hook::Install, Failure::Fatal);
    let (_store, reconciler) =
        shared_reconciler(&[ingress], vec![ResourceBuilder::new().build()]);
    let controller = Controller::new(reconciler, Duration::from_secs(3600)).until_settled(true);
    let (_tx, rx) = no_shutdown();

    let summary = controller.run(TEST_NAMESPACE, TEST_NAME, rx).await;
    assert_eq!(summary.reason, StopReason::Parked);
    assert_eq!(summary.passes, 4);
}

#[tokio::test]
async fn test_controller_stops_on_shutdown() {
    let (store, reconciler) = shared_reconciler(
        &[FakeComponent::new("ingress")],
        vec![ResourceBuilder::new().build()],
    );
    // Keeps polling after settling until told to stop
    let controller = Controller::new(reconciler, Duration::from_secs(3600));
    let (tx, rx) = no_shutdown();

    let handle = tokio::spawn(async move { controller.run(TEST_NAMESPACE, TEST_NAME, rx).await });

    for _ in 0..500 {
        let settled = store
            .get(TEST_NAMESPACE, TEST_NAME)
            .map(|r| r.status.is_last_condition(ConditionType::InstallComplete))
            .unwrap_or(false);
        if settled {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tx.send(true).unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("controller stopped")
        .unwrap();
    assert_eq!(summary.reason, StopReason::Shutdown);
    assert!(summary.passes >= 4);
}

#[tokio::test]
async fn test_controller_skips_work_when_already_shut_down() {
    let (store, reconciler) = shared_reconciler(
        &[FakeComponent::new("ingress")],
        vec![ResourceBuilder::new().build()],
    );
    let controller = Controller::new(reconciler, Duration::from_secs(3600));
    let (_tx, rx) = watch::channel(true);

    let summary = controller.run(TEST_NAMESPACE, TEST_NAME, rx).await;
    assert_eq!(summary.reason, StopReason::Shutdown);
    assert_eq!(summary.passes, 0);
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn test_run_all_drives_resources_independently() {
    let (store, reconciler) = shared_reconciler(
        &[FakeComponent::new("ingress")],
        vec![
            ResourceBuilder::new().with_name("beta").build(),
            ResourceBuilder::new().with_name("alpha").build(),
        ],
    );
    let controller = Controller::new(reconciler, Duration::from_secs(3600)).until_settled(true);
    let (_tx, rx) = no_shutdown();

    let summaries = controller
        .run_all(
            vec![
                (TEST_NAMESPACE.to_string(), "beta".to_string()),
                (TEST_NAMESPACE.to_string(), "alpha".to_string()),
            ],
            rx,
        )
        .await;

    let names: Vec<&str> = summaries.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    for summary in &summaries {
        assert_eq!(summary.reason, StopReason::Settled);
    }
    for name in ["alpha", "beta"] {
        let resource = store.get(TEST_NAMESPACE, name).unwrap();
        assert_last_condition(&resource, ConditionType::InstallComplete);
    }
}

#[tokio::test]
async fn test_file_store_full_lifecycle() {
    let temp = TempDir::new().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().join("resources")).unwrap();
    let files = FileResourceStore::new(dir);
    files.apply(&ResourceBuilder::new().build()).unwrap();

    let journal = Journal::new();
    let ingress = FakeComponent::new("ingress").with_journal(&journal);
    let reconciler = Arc::new(Reconciler::new(
        registry(&[ingress.clone()]),
        Arc::new(files.clone()),
        Arc::new(FakePlatform::new()),
        test_settings(),
    ));
    let controller = Controller::new(reconciler, Duration::from_secs(3600)).until_settled(true);

    let (_tx, rx) = no_shutdown();
    let summary = controller.run(TEST_NAMESPACE, TEST_NAME, rx.clone()).await;
    assert_eq!(summary.reason, StopReason::Settled);
    let resource = files.read(TEST_NAMESPACE, TEST_NAME).unwrap().unwrap();
    assert_last_condition(&resource, ConditionType::InstallComplete);
    assert_component_state(&resource, "ingress", ComponentState::Ready);

    assert!(files.request_deletion(TEST_NAMESPACE, TEST_NAME).unwrap());
    let summary = controller.run(TEST_NAMESPACE, TEST_NAME, rx).await;
    assert_eq!(summary.reason, StopReason::Settled);
    assert!(files
        .read(TEST_NAMESPACE, TEST_NAME)
        .unwrap()
        .unwrap()
        .metadata
        .finalized);
    assert_eq!(journal.calls_to(Hook::Uninstall), vec!["ingress"]);
}

#[tokio::test]
async fn test_script_components_end_to_end() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().display();
    let manifest = ComponentManifest::from_yaml(&format!(
        r#"
components:
  - name: ingress
    namespace: ingress-system
    enabled_by_default: true
    probes:
      installed: "test -f {dir}/ingress"
    hooks:
      install: "echo $KEEL_TARGET_VERSION > {dir}/ingress"
      uninstall: "rm -f {dir}/ingress"
  - name: rancher
    namespace: cattle-system
    dependencies: [ingress]
    enabled_by_default: true
    probes:
      installed: "test -f {dir}/rancher"
    hooks:
      install: "touch {dir}/rancher"
      uninstall: "rm -f {dir}/rancher"
"#
    ))
    .unwrap();

    let store = Arc::new(MemoryStatusStore::new());
    store.insert(ResourceBuilder::new().build());
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(manifest.registry().unwrap()),
        Arc::clone(&store) as Arc<dyn ResourceStore>,
        Arc::new(manifest.platform()),
        test_settings(),
    ));
    let controller = Controller::new(reconciler, Duration::from_secs(3600)).until_settled(true);

    let (_tx, rx) = no_shutdown();
    let summary = controller.run(TEST_NAMESPACE, TEST_NAME, rx.clone()).await;
    assert_eq!(summary.reason, StopReason::Settled);

    let marker = std::fs::read_to_string(temp.path().join("ingress")).unwrap();
    assert_eq!(marker.trim(), INSTALL_VERSION);
    assert!(temp.path().join("rancher").exists());
    let resource = store.get(TEST_NAMESPACE, TEST_NAME).unwrap();
    assert_component_state(&resource, "rancher", ComponentState::Ready);

    store.request_deletion(TEST_NAMESPACE, TEST_NAME);
    let summary = controller.run(TEST_NAMESPACE, TEST_NAME, rx).await;
    assert_eq!(summary.reason, StopReason::Settled);
    assert!(!temp.path().join("ingress").exists());
    assert!(!temp.path().join("rancher").exists());
    assert!(store.get(TEST_NAMESPACE, TEST_NAME).unwrap().metadata.finalized);
}
