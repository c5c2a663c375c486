use std::sync::Arc;

use anyhow::{Context, anyhow};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::clock::DayBoundaryClock;
use crate::config::Config;
use crate::datastore::LocalStateStore;
use crate::render::Renderer;
use crate::rollover::DayTicker;
use crate::sync::{
    HttpRemote, LastWriteWins, PullOutcome, PullReason, RemoteReplica, Session, SyncCoordinator,
    clear_session, load_session, pull_and_merge, push_snapshot, save_session,
};

fn runtime() -> anyhow::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn http_remote(cfg: &Config) -> anyhow::Result<HttpRemote> {
    let sync = cfg.sync();
    let (url, key) = sync
        .endpoint()
        .ok_or_else(|| anyhow!("sync.url and sync.apikey must be configured"))?;
    HttpRemote::new(url, key)
}

fn require_session(store: &LocalStateStore) -> anyhow::Result<Session> {
    load_session(&store.data_dir)?.ok_or_else(|| anyhow!("not signed in; run `dayroll login`"))
}

#[instrument(skip(store, token))]
pub(super) fn cmd_login(store: &LocalStateStore, identity: &str, token: &str) -> anyhow::Result<()> {
    if identity.trim().is_empty() || token.trim().is_empty() {
        return Err(anyhow!("identity and token are both required"));
    }
    save_session(&store.data_dir, &Session::new(identity.trim(), token.trim()))?;
    println!("Signed in as {}. Run `dayroll sync` to pull your data.", identity.trim());
    Ok(())
}

#[instrument(skip(store, cfg))]
pub(super) fn cmd_logout(store: &LocalStateStore, cfg: &Config, purge: bool) -> anyhow::Result<()> {
    if purge {
        let session = require_session(store)?;
        let remote = http_remote(cfg)?;
        runtime()?.block_on(remote.delete(&session))?;
        info!(identity = %session.identity, "remote document deleted");
    }

    if clear_session(&store.data_dir)? {
        println!("Signed out. Local data is kept.");
    } else {
        println!("Not signed in.");
    }
    Ok(())
}

/// One reconciliation round: a newer remote document replaces local state,
/// otherwise local state is pushed.
#[instrument(skip(store, cfg))]
pub(super) fn cmd_sync(store: &LocalStateStore, cfg: &Config) -> anyhow::Result<()> {
    let mut session = require_session(store)?;
    let remote = http_remote(cfg)?;

    let stamp = runtime()?.block_on(async {
        let outcome = pull_and_merge(
            store,
            &remote,
            &LastWriteWins,
            &session,
            session.last_seen,
            PullReason::Initial,
        )
        .await?;

        match outcome {
            PullOutcome::Applied(at) => {
                println!("Pulled newer data from the remote.");
                Ok(Some(at))
            }
            PullOutcome::Migrated(at) => {
                println!("Uploaded local data to the remote.");
                Ok(Some(at))
            }
            PullOutcome::MigrationSkipped => {
                warn!("remote document appeared during migration");
                println!("Another device uploaded first; run sync again to pull it.");
                Ok(None)
            }
            PullOutcome::AlreadyCurrent | PullOutcome::NoRemote => {
                let at = push_snapshot(store, &remote, &session).await?;
                println!("Pushed local data.");
                Ok::<_, crate::error::SyncError>(Some(at))
            }
        }
    })?;

    if let Some(at) = stamp {
        session.last_seen = Some(session.last_seen.map_or(at, |seen| seen.max(at)));
        save_session(&store.data_dir, &session)?;
    }
    Ok(())
}

/// Run the day ticker and, when signed in, the sync coordinator until
/// interrupted.
#[instrument(skip(store, cfg, renderer, clock))]
pub(super) fn cmd_watch(
    store: &Arc<LocalStateStore>,
    cfg: &Config,
    renderer: &Renderer,
    clock: &DayBoundaryClock,
) -> anyhow::Result<()> {
    let sync_cfg = cfg.sync();
    let session = load_session(&store.data_dir)?;
    let remote: Option<Arc<dyn RemoteReplica>> = match (&session, sync_cfg.endpoint()) {
        (Some(_), Some((url, key))) => Some(Arc::new(HttpRemote::new(url, key)?)),
        (Some(_), None) => {
            warn!("signed in but sync.url/sync.apikey are not set; sync disabled");
            None
        }
        (None, _) => {
            info!("not signed in; running without sync");
            None
        }
    };

    let rt = runtime()?;
    rt.block_on(async {
        let cancel = CancellationToken::new();
        let ticker = DayTicker::new(Arc::clone(store), *clock, cfg.tick().period, cancel.clone());
        let ticker = tokio::spawn(ticker.run());

        let sync = remote.zip(session).map(|(remote, session)| {
            let identity = session.identity.clone();
            let poll = remote.subscribe(&session).is_none();
            let handle = SyncCoordinator::new(
                Arc::clone(store),
                remote,
                Arc::new(LastWriteWins),
                sync_cfg.timings(),
            )
            .spawn(Some(session), cancel.clone());
            (handle, identity, poll)
        });

        let mut poll_timer = tokio::time::interval(sync_cfg.poll_interval);
        println!("Watching. Press Ctrl-C to stop.");

        if let Some((handle, ..)) = &sync {
            handle.sync_now().await;
        }

        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(err) = signal {
                        error!(error = %err, "failed to listen for ctrl-c");
                    }
                    break;
                }
                _ = poll_timer.tick(), if sync.as_ref().is_some_and(|(_, _, poll)| *poll) => {
                    if let Some((handle, identity, _)) = &sync {
                        handle.remote_changed(identity.clone()).await;
                    }
                }
            }
        }

        cancel.cancel();
        if let Err(err) = ticker.await {
            error!(error = %err, "day ticker task failed");
        }

        if let Some((handle, ..)) = sync {
            let status = handle.status();
            handle.shutdown().await;
            if let Some(mut session) = load_session(&store.data_dir)? {
                session.last_seen = status.last_seen;
                save_session(&store.data_dir, &session)?;
            }
            renderer.print_sync_status(&status)?;
        }
        Ok::<_, anyhow::Error>(())
    })?;

    println!("Stopped.");
    Ok(())
}
