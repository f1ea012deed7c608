//! # Orchestrator Tests
//!
//! LIST and WATCH mode on top of the in-memory API:
//! - LIST writes exactly the selected resources and exits
//! - WATCH reports readiness only after every loop listed
//! - the first fatal loop error stops the remaining loops
//! - leaving the selection ends in the same folder state as a delete

mod common;

use clap::Parser;
use common::{
    configmap, eventually, fast_settings, files_under, reconciler, secret, selector, FakeApi,
    Script,
};
use k8s_file_sidecar::config::{Cli, SidecarConfig};
use k8s_file_sidecar::controller::error_policy::classify_status;
use k8s_file_sidecar::controller::events::NoopEventPublisher;
use k8s_file_sidecar::controller::resource::ResourceKind;
use k8s_file_sidecar::controller::source::{ResourceApi, ResourceEvent};
use k8s_file_sidecar::runtime::initialization::build_loops_with;
use k8s_file_sidecar::runtime::list_mode::run_list_mode;
use k8s_file_sidecar::runtime::signals::{Flag, ReadyToken};
use k8s_file_sidecar::runtime::watch_mode::WatchHandle;
use k8s_file_sidecar::runtime::SidecarError;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const APP: (&str, &str) = ("app", "myconfig");

fn config(folder: &std::path::Path, extra: &[&str]) -> SidecarConfig {
    let folder = folder.to_string_lossy().to_string();
    let mut args = vec![
        "k8s-file-sidecar",
        "--method",
        "LIST",
        "--label",
        "app",
        "--label-value",
        "myconfig",
        "--folder",
        folder.as_str(),
    ];
    args.extend_from_slice(extra);
    SidecarConfig::try_from(Cli::try_parse_from(args).unwrap()).unwrap()
}

#[tokio::test]
async fn test_list_mode_writes_only_selected_secrets() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), &["--resource", "secret"]);

    let script = Script::new();
    script.push_snapshot(
        vec![
            secret("ns1", "s1", &[APP], &[("password", b"one")], "1"),
            secret("ns1", "s2", &[APP], &[("password", b"two")], "2"),
            secret("ns2", "s3", &[APP], &[("tls.crt", b"cert"), ("tls.key", b"key")], "3"),
            secret("ns1", "other", &[("app", "something-else")], &[("password", b"x")], "4"),
            secret("ns2", "unlabelled", &[], &[("password", b"y")], "5"),
        ],
        "5",
    );

    let loops = build_loops_with(&config, Arc::new(NoopEventPublisher), |kind, namespace| {
        Box::new(FakeApi::new(kind, namespace.as_deref(), &script)) as Box<dyn ResourceApi>
    });
    assert_eq!(loops.len(), 1);

    let materialized = run_list_mode(loops).await.unwrap();

    assert_eq!(materialized, 3);
    assert_eq!(script.list_calls(), 1);
    assert!(script.watch_versions().is_empty());
    let files = files_under(dir.path());
    assert_eq!(files.len(), 4);
    assert_eq!(files["ns1/secret/s1/password"], "one");
    assert_eq!(files["ns1/secret/s2/password"], "two");
    assert_eq!(files["ns2/secret/s3/tls.crt"], "cert");
    assert_eq!(files["ns2/secret/s3/tls.key"], "key");
}

#[tokio::test]
async fn test_list_mode_fails_on_api_error() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), &[]);

    let script = Script::new();
    script.push_snapshot(vec![], "1");
    script.push_list(Err(classify_status(403, "secrets is forbidden")));

    let loops = build_loops_with(&config, Arc::new(NoopEventPublisher), |kind, namespace| {
        Box::new(FakeApi::new(kind, namespace.as_deref(), &script)) as Box<dyn ResourceApi>
    });
    // configmap first, then secret
    assert_eq!(loops.len(), 2);

    let err = run_list_mode(loops).await.unwrap_err();
    assert!(matches!(err, SidecarError::List { ref target, .. } if target == "Secret/*"));
}

#[tokio::test]
async fn test_one_loop_per_namespace_and_kind() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), &["--namespace", "ns1,ns2"]);

    let mut targets = Vec::new();
    let loops = build_loops_with(&config, Arc::new(NoopEventPublisher), |kind, namespace| {
        targets.push((kind, namespace.clone()));
        Box::new(FakeApi::new(kind, namespace.as_deref(), &Script::new())) as Box<dyn ResourceApi>
    });

    assert_eq!(loops.len(), 4);
    assert_eq!(
        targets,
        vec![
            (ResourceKind::ConfigMap, Some("ns1".to_string())),
            (ResourceKind::ConfigMap, Some("ns2".to_string())),
            (ResourceKind::Secret, Some("ns1".to_string())),
            (ResourceKind::Secret, Some("ns2".to_string())),
        ]
    );
    assert_eq!(loops[3].target(), "Secret/ns2");
}

#[tokio::test]
async fn test_watch_ready_after_every_loop_listed_then_stops() {
    let dir = TempDir::new().unwrap();
    let configmaps = Script::new();
    let secrets = Script::new();
    configmaps.push_snapshot(
        vec![configmap("ns1", "cfg1", &[APP], &[("a.txt", "hello")], "3")],
        "3",
    );
    // Secrets only list on the second attempt
    secrets.push_list(Err(classify_status(500, "etcd leader changed")));
    secrets.push_snapshot(
        vec![secret("ns1", "s1", &[APP], &[("token", b"t0k3n")], "4")],
        "4",
    );

    let loops = vec![
        reconciler(
            FakeApi::new(ResourceKind::ConfigMap, None, &configmaps),
            selector("app", Some("myconfig")),
            dir.path(),
            Arc::new(NoopEventPublisher),
            &fast_settings(),
        ),
        reconciler(
            FakeApi::new(ResourceKind::Secret, None, &secrets),
            selector("app", Some("myconfig")),
            dir.path(),
            Arc::new(NoopEventPublisher),
            &fast_settings(),
        ),
    ];

    let ready = Flag::new();
    let stop = Flag::new();
    let handle = WatchHandle::start(loops, ready.clone(), stop.clone());

    assert!(tokio::time::timeout(Duration::from_secs(5), handle.wait_ready())
        .await
        .unwrap());
    assert!(ready.is_set());
    assert_eq!(secrets.list_calls(), 2);
    assert_eq!(files_under(dir.path()).len(), 2);

    tokio::time::timeout(Duration::from_secs(5), handle.run_until(async {}))
        .await
        .unwrap()
        .unwrap();
    assert!(stop.is_set());
}

#[tokio::test]
async fn test_fatal_loop_error_stops_other_loops() {
    let dir = TempDir::new().unwrap();
    let healthy = Script::new();
    let forbidden = Script::new();
    healthy.push_snapshot(vec![], "1");
    forbidden.push_list(Err(classify_status(403, "secrets is forbidden")));

    let loops = vec![
        reconciler(
            FakeApi::new(ResourceKind::ConfigMap, Some("ns1"), &healthy),
            selector("app", None),
            dir.path(),
            Arc::new(NoopEventPublisher),
            &fast_settings(),
        ),
        reconciler(
            FakeApi::new(ResourceKind::Secret, Some("ns1"), &forbidden),
            selector("app", None),
            dir.path(),
            Arc::new(NoopEventPublisher),
            &fast_settings(),
        ),
    ];

    let ready = Flag::new();
    let stop = Flag::new();
    let handle = WatchHandle::start(loops, ready.clone(), stop.clone());

    assert!(!tokio::time::timeout(Duration::from_secs(5), handle.wait_ready())
        .await
        .unwrap());
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        handle.run_until(std::future::pending::<()>()),
    )
    .await
    .unwrap();

    match result {
        Err(SidecarError::Loop { target, source }) => {
            assert_eq!(target, "Secret/ns1");
            assert!(source.api_error().is_fatal());
        }
        other => panic!("expected loop failure, got {other:?}"),
    }
    assert!(stop.is_set());
    assert!(!ready.is_set());
}

#[tokio::test]
async fn test_selection_exit_matches_delete() {
    async fn run(exit: ResourceEvent) -> std::collections::BTreeMap<String, String> {
        let dir = TempDir::new().unwrap();
        let script = Script::new();
        script.push_snapshot(
            vec![
                configmap("ns1", "keep", &[APP], &[("k", "v")], "1"),
                configmap("ns1", "cfg1", &[APP], &[("a.txt", "hello")], "2"),
            ],
            "2",
        );
        let events = script.push_channel_watch();

        let sidecar = reconciler(
            FakeApi::new(ResourceKind::ConfigMap, None, &script),
            selector("app", Some("myconfig")),
            dir.path(),
            Arc::new(NoopEventPublisher),
            &fast_settings(),
        );
        let stop = Flag::new();
        let handle = tokio::spawn(sidecar.run(stop.clone(), ReadyToken::detached()));

        events.send(Ok(exit)).unwrap();
        drop(events);
        eventually("exit event processed", || script.watch_versions().len() == 2).await;
        stop.set();
        handle.await.unwrap().unwrap();
        files_under(dir.path())
    }

    let relabelled = run(ResourceEvent::Modified(configmap(
        "ns1",
        "cfg1",
        &[("app", "other")],
        &[("a.txt", "hello")],
        "3",
    )))
    .await;
    let deleted = run(ResourceEvent::Deleted(configmap(
        "ns1",
        "cfg1",
        &[APP],
        &[("a.txt", "hello")],
        "3",
    )))
    .await;

    assert_eq!(relabelled, deleted);
    assert_eq!(relabelled.len(), 1);
    assert_eq!(relabelled["ns1/configmap/keep/k"], "v");
}

#[tokio::test]
async fn test_shutdown_during_initial_listing_stops_cleanly() {
    let dir = TempDir::new().unwrap();
    // Nothing scripted: every list call fails transiently, forever
    let unreachable = Script::new();
    let sidecar = reconciler(
        FakeApi::new(ResourceKind::ConfigMap, None, &unreachable),
        selector("app", None),
        dir.path(),
        Arc::new(NoopEventPublisher),
        &fast_settings(),
    );

    let ready = Flag::new();
    let stop = Flag::new();
    let handle = WatchHandle::start(vec![sidecar], ready.clone(), stop.clone());
    let (signal_tx, signal_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = signal_tx.send(());
    });

    tokio::time::timeout(
        Duration::from_secs(5),
        handle.run(async {
            let _ = signal_rx.await;
        }),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(stop.is_set());
    assert!(!ready.is_set());
    assert!(unreachable.list_calls() >= 1);
}
