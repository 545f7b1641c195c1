pub mod calendar;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod filter;
pub mod post;
pub mod provider;
pub mod render;

use std::ffi::OsString;

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
    "starting pilot CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.pilotrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(cli::RcOverride::into_pair)
    )
  );

  let tz = datetime::resolve_timezone(
    cfg
      .get("calendar.timezone")
      .as_deref()
  );
  let now = match cli.now.as_deref() {
    | Some(raw) => {
      datetime::parse_date_expr(
        raw,
        Utc::now(),
        tz
      )
      .with_context(|| {
        format!(
          "invalid --now value: {raw}"
        )
      })?
    }
    | None => Utc::now()
  };
  debug!(timezone = %tz, %now, "resolved clock");

  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  let posts = if commands::command_uses_posts(
    &inv.command
  ) {
    let provider =
      provider::from_config(
        &cfg,
        cli.posts.as_deref(),
        tz
      )?;
    fetch_blocking(provider.as_ref())
      .with_context(|| {
        format!(
          "failed to fetch posts from \
           {} provider",
          provider.name()
        )
      })?
  } else {
    Vec::new()
  };

  let mut renderer =
    render::Renderer::new(&cfg, tz)?;

  commands::dispatch(
    &posts,
    &cfg,
    &mut renderer,
    inv,
    commands::Session {
      now,
      tz
    }
  )?;

  info!("done");
  Ok(())
}

/// Drives one provider fetch to
/// completion on a single-threaded
/// runtime.
fn fetch_blocking(
  provider: &dyn provider::PostProvider
) -> anyhow::Result<Vec<post::Post>> {
  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_time()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  info!(provider = provider.name(), "fetching posts");
  let posts = runtime
    .block_on(provider.fetch_posts())?;
  debug!(
    count = posts.len(),
    "posts ready"
  );
  Ok(posts)
}
