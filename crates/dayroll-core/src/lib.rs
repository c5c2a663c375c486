pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod error;
pub mod recurrence;
pub mod render;
pub mod rollover;
pub mod state;
pub mod sync;
pub mod task;
pub mod transfer;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args);
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting dayroll"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.rcfile.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store = Arc::new(
    datastore::LocalStateStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open local store at \
         {}",
        data_dir.display()
      )
    })?
  );

  let tz =
    datetime::resolve_timezone(&cfg);
  let clock =
    clock::DayBoundaryClock::new(tz);
  let renderer =
    render::Renderer::new(&cfg, tz)?;
  let command =
    cli.command.unwrap_or(
      cli::Command::List {
        view: cli::ListView::Today,
        sort: None
      }
    );
  let now = Utc::now();

  // every invocation catches up on a
  // missed day boundary first
  if !matches!(
    command,
    cli::Command::Rollover
  ) && let Some(report) =
    store.rollover(now, &clock)?
  {
    info!(
      moved = report.moved_to_backlog,
      archived = report.archived,
      "day rolled over"
    );
    renderer
      .print_rollover(Some(&report))?;
  }

  commands::dispatch(
    &store, &cfg, &renderer, &clock,
    command, now
  )?;

  info!("done");
  Ok(())
}
