use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dayroll_core::datastore::LocalStateStore;
use dayroll_core::error::SyncError;
use dayroll_core::state::AppState;
use dayroll_core::sync::{
    Identity, LastWriteWins, MemoryRemote, PullOutcome, PullReason, RemoteDocument, RemoteReplica,
    SCHEMA_VERSION, Session, SyncCoordinator, SyncHandle, SyncStatus, SyncTimings, migrate_local,
    pull_and_merge, push_snapshot,
};
use tempfile::{TempDir, tempdir};
use tokio_util::sync::CancellationToken;

fn session() -> Session {
    Session::new("user-1", "token")
}

fn device() -> (TempDir, Arc<LocalStateStore>) {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(LocalStateStore::open(temp.path()).expect("open store"));
    (temp, store)
}

fn titles(store: &LocalStateStore) -> Vec<String> {
    store
        .snapshot()
        .today
        .iter()
        .map(|t| t.core.title.clone())
        .collect()
}

#[tokio::test]
async fn pull_replaces_local_state_with_a_newer_remote() {
    let remote = MemoryRemote::new();
    let (_a_dir, laptop) = device();
    let (_b_dir, phone) = device();

    phone
        .mutate(|s| s.add_today("from phone", Utc::now()))
        .expect("add");
    push_snapshot(&phone, &remote, &session()).await.expect("push");

    laptop
        .mutate(|s| s.add_today("stale laptop edit", Utc::now()))
        .expect("add");
    let outcome = pull_and_merge(
        &laptop,
        &remote,
        &LastWriteWins,
        &session(),
        None,
        PullReason::Initial,
    )
    .await
    .expect("pull");

    assert!(matches!(outcome, PullOutcome::Applied(_)));
    assert_eq!(titles(&laptop), ["from phone"]);
}

#[tokio::test]
async fn own_echo_is_not_reapplied() {
    let remote = MemoryRemote::new();
    let (_dir, store) = device();
    store.mutate(|s| s.add_today("mine", Utc::now())).expect("add");
    let stamp = push_snapshot(&store, &remote, &session()).await.expect("push");

    let outcome = pull_and_merge(
        &store,
        &remote,
        &LastWriteWins,
        &session(),
        Some(stamp),
        PullReason::RemoteChange,
    )
    .await
    .expect("pull");
    assert_eq!(outcome, PullOutcome::AlreadyCurrent);
}

#[tokio::test]
async fn identity_mismatch_leaves_local_state_untouched() {
    let remote = MemoryRemote::new();
    let (_dir, store) = device();
    store.mutate(|s| s.add_today("keep me", Utc::now())).expect("add");
    let before = store.snapshot();

    remote.put_document(
        &Identity::from("user-1"),
        RemoteDocument {
            identity: Identity::from("user-2"),
            data: AppState::default(),
            schema_version: SCHEMA_VERSION,
            updated_at: remote.next_stamp(),
        },
    );

    let err = pull_and_merge(
        &store,
        &remote,
        &LastWriteWins,
        &session(),
        None,
        PullReason::Initial,
    )
    .await
    .expect_err("mismatch");
    assert!(matches!(err, SyncError::IdentityMismatch { .. }));
    assert_eq!(*store.snapshot(), *before);
}

#[tokio::test]
async fn first_sign_in_migrates_local_data_exactly_once() {
    let remote = MemoryRemote::new();
    let (_dir, store) = device();
    store
        .mutate(|s| s.add_backlog("pre-existing", Utc::now()))
        .expect("add");

    let outcome = pull_and_merge(
        &store,
        &remote,
        &LastWriteWins,
        &session(),
        None,
        PullReason::Initial,
    )
    .await
    .expect("pull");
    assert!(matches!(outcome, PullOutcome::Migrated(_)));

    let document = remote.document(&Identity::from("user-1")).expect("document");
    assert_eq!(document.data.backlog.len(), 1);

    let again = migrate_local(&store, &remote, &session()).await.expect("migrate");
    assert_eq!(again, PullOutcome::MigrationSkipped);
    assert_eq!(remote.upsert_count(), 1);
}

#[tokio::test]
async fn remote_document_vanishing_keeps_local_state() {
    let remote = MemoryRemote::new();
    let (_dir, store) = device();
    store.mutate(|s| s.add_today("local", Utc::now())).expect("add");

    let outcome = pull_and_merge(
        &store,
        &remote,
        &LastWriteWins,
        &session(),
        None,
        PullReason::RemoteChange,
    )
    .await
    .expect("pull");
    assert_eq!(outcome, PullOutcome::NoRemote);
    assert_eq!(titles(&store), ["local"]);
    assert_eq!(remote.upsert_count(), 0);
}

async fn wait_for_status<F>(handle: &SyncHandle, pred: F) -> SyncStatus
where
    F: Fn(&SyncStatus) -> bool,
{
    let mut rx = handle.subscribe_status();
    let status = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| pred(s)))
        .await
        .expect("status in time")
        .expect("coordinator alive");
    status.clone()
}

fn coordinator(store: &Arc<LocalStateStore>, remote: &Arc<MemoryRemote>) -> SyncHandle {
    let remote: Arc<dyn RemoteReplica> = Arc::clone(remote) as Arc<dyn RemoteReplica>;
    SyncCoordinator::new(
        Arc::clone(store),
        remote,
        Arc::new(LastWriteWins),
        SyncTimings::default(),
    )
    .spawn(Some(session()), CancellationToken::new())
}

#[tokio::test(start_paused = true)]
async fn a_burst_of_edits_is_pushed_once() {
    let remote = Arc::new(MemoryRemote::new());
    let (_dir, store) = device();
    let handle = coordinator(&store, &remote);

    wait_for_status(&handle, |s| s.last_synced.is_some()).await;
    assert_eq!(remote.upsert_count(), 1, "initial migration");

    for i in 0..5 {
        store
            .mutate(|s| s.add_today(&format!("task {i}"), Utc::now()))
            .expect("add");
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    assert_eq!(remote.upsert_count(), 1, "still inside the debounce window");

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(remote.upsert_count(), 2);
    let document = remote.document(&Identity::from("user-1")).expect("document");
    assert_eq!(document.data.today.len(), 5);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn a_second_device_converges_after_a_push() {
    let remote = Arc::new(MemoryRemote::new());
    let (_a_dir, laptop) = device();
    let (_b_dir, phone) = device();

    let laptop_sync = coordinator(&laptop, &remote);
    wait_for_status(&laptop_sync, |s| s.last_synced.is_some()).await;
    let phone_sync = coordinator(&phone, &remote);
    wait_for_status(&phone_sync, |s| s.last_synced.is_some()).await;

    laptop
        .mutate(|s| s.add_today("written on laptop", Utc::now()))
        .expect("add");

    for _ in 0..20 {
        if titles(&phone) == ["written on laptop"] {
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    assert_eq!(titles(&phone), ["written on laptop"]);

    let status = phone_sync.status();
    assert!(status.last_error.is_none());
    assert!(!status.is_degraded());

    laptop_sync.shutdown().await;
    phone_sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn offline_push_failure_is_reported_and_retried_on_reconnect() {
    let remote = Arc::new(MemoryRemote::new());
    let (_dir, store) = device();
    let handle = coordinator(&store, &remote);
    wait_for_status(&handle, |s| s.last_synced.is_some()).await;

    remote.set_reachable(false);
    store.mutate(|s| s.add_today("offline edit", Utc::now())).expect("add");
    let status = wait_for_status(&handle, |s| s.last_error.is_some()).await;
    assert!(status.is_degraded());
    assert_eq!(titles(&store), ["offline edit"]);

    remote.set_reachable(true);
    handle.set_online(false).await;
    handle.set_online(true).await;
    wait_for_status(&handle, |s| s.last_error.is_none()).await;

    let document = remote.document(&Identity::from("user-1")).expect("document");
    assert_eq!(document.data.today.len(), 1);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn change_notice_for_another_identity_is_ignored() {
    let remote = Arc::new(MemoryRemote::new());
    let (_dir, store) = device();
    store.mutate(|s| s.add_today("mine", Utc::now())).expect("add");
    let handle = coordinator(&store, &remote);
    wait_for_status(&handle, |s| s.last_synced.is_some()).await;
    // let the echo of the migration settle
    tokio::time::sleep(Duration::from_secs(5)).await;
    let fetches = remote.fetch_count();

    handle.remote_changed(Identity::from("user-2")).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(remote.fetch_count(), fetches);
    assert_eq!(titles(&store), ["mine"]);

    handle.remote_changed(Identity::from("user-1")).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(remote.fetch_count(), fetches + 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn push_carries_edits_made_by_another_process() {
    let remote = MemoryRemote::new();
    let (dir, watcher) = device();
    let cli = LocalStateStore::open(dir.path()).expect("open second store");
    cli.mutate(|s| s.add_today("from the command line", Utc::now()))
        .expect("add");

    push_snapshot(&watcher, &remote, &session()).await.expect("push");
    let document = remote.document(&Identity::from("user-1")).expect("document");
    assert_eq!(document.data.today.len(), 1);
    assert_eq!(titles(&watcher), ["from the command line"]);
}
