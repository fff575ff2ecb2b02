//! Welcome to the code-documentation of backdrop!
//!
//! Backdrop keeps a background image composited onto every output of a desktop, no matter how
//! often outputs get plugged in, moved, rotated or switch their mode. The interesting parts are
//! the [`topology`] model, the [`compositor`] (transform computation and redraw scheduling) and
//! the [`engine`] which glues them together.

use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::Context;
use clap::crate_name;
use cli::{Command, LogLevel};
use config::{Config, CONFIG_FILENAME};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use xdg::BaseDirectories;

pub mod backend;
pub mod cli;
pub mod compositor;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod topology;

static XDG: OnceLock<BaseDirectories> = OnceLock::new();

// The following paths must be relative to `XDG`!
const LOG_FILENAME: &str = "log.log";

/// An enum error which contains all possible error sources while running backdrop.
///
/// # Convention
/// Just click on the `Error` value of each error-enum-value to get more information about them.
///
/// ## Example
/// If you want to understand what [`Error::Backend`] catches, then just click
/// on its `Error` type and you should get to [`backend::Error`] where a more detailed
/// description waits for you!
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("An error occured in the backend: {0}")]
    Backend(#[from] backend::Error),

    #[error("Couldn't load the background: {0}")]
    ImageSource(#[from] compositor::image_source::Error),

    #[error(transparent)]
    Apply(#[from] backend::ApplyError),

    #[error(transparent)]
    Transform(#[from] compositor::transform::Error),

    #[error("An error occured in the daemon: {0}")]
    Daemon(#[from] daemon::Error),
}

pub fn init_logging(level: &LogLevel, path: &Path) -> anyhow::Result<()> {
    let log_file = File::create(path)
        .with_context(|| format!("Couldn't create and open log path '{}'", path.display()))?;

    let subscriber_builder = tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_max_level(LevelFilter::from(level))
        .without_time()
        .with_ansi(true)
        .with_target(false)
        .with_file(true);

    if std::env::var_os("RUST_LOG").is_some() {
        subscriber_builder
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    } else {
        subscriber_builder.init();
    }

    tracing::debug!("Logger initialised");
    Ok(())
}

pub fn get_xdg() -> anyhow::Result<&'static BaseDirectories> {
    if let Some(xdg) = XDG.get() {
        return Ok(xdg);
    }

    let xdg = BaseDirectories::with_prefix(crate_name!()).context("Couldn't access XDG")?;
    Ok(XDG.get_or_init(|| xdg))
}

pub fn get_default_log_path() -> anyhow::Result<PathBuf> {
    get_xdg()?
        .place_state_file(LOG_FILENAME)
        .context("Couldn't access log file path")
}

pub fn get_default_config_path() -> anyhow::Result<PathBuf> {
    Ok(get_xdg()?.get_config_home().join(CONFIG_FILENAME))
}

pub fn start(command: Command, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config_path = match config_path {
        Some(path) => path,
        None => get_default_config_path()?,
    };
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Couldn't load config file '{}'", config_path.display()))?;

    match command {
        Command::Daemon => daemon::start(config, config_path),
        Command::Outputs => daemon::print_outputs(&config),
    }
}
