pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod render;
pub mod storage;
pub mod store;
pub mod task;
pub mod theme;
pub mod view;

use std::ffi::OsString;
use std::io;

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
    cli::preprocess_args(&raw_args)?;
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
    "starting tasklane"
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

  let storage =
    storage::FileStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open storage at {}",
        data_dir.display()
      )
    })?;

  let ambient =
    theme::TerminalAmbient::detect(
      &cfg
    );
  let mut session = commands::Session {
    tasks:   store::TaskStore::load(
      &storage
    ),
    prefs:   theme::PreferenceStore::load(
      &storage, &ambient
    ),
    ambient: &ambient,
    cfg:     &cfg,
    tz:      datetime::resolve_timezone(
      &cfg
    ),
    now:     Utc::now()
  };

  let mut out = io::stdout().lock();
  commands::dispatch(
    &mut session,
    &mut out,
    cli.command
  )?;

  info!("done");
  Ok(())
}
