//! The long-running background process of a X11 session.
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
    thread::JoinHandle,
};

use anyhow::Context;
use tokio::{
    runtime::Handle,
    signal::unix::{signal, SignalKind},
};
use tracing::{debug, error, info, warn};

use crate::{
    backend::{
        wayland,
        wloutput::WlOutputTool,
        x11::{self, DisplayEvent, X11Backend},
        OutputInfo,
    },
    config::Config,
    engine::Engine,
    get_xdg,
    topology::MonitorCatalog,
};

const LOCK_FILE: &str = "daemon.lock";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error("Couldn't acquire the daemon lock: {0}")]
    AcquireLock(rustix::io::Errno),

    #[error("The daemon is already running.")]
    AlreadyRunning,
}

pub type X11Engine = Engine<X11Backend, WlOutputTool>;

#[tracing::instrument(skip(config))]
pub fn start(config: Config, config_path: PathBuf) -> anyhow::Result<()> {
    let Some(_lock_guard) = acquire_lock()? else {
        return Err(Error::AlreadyRunning.into());
    };
    debug!("Starting daemon");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config, config_path))
}

/// If no error occured: Returns the lock-file (if available), otherwise `None` if the lock file
/// couldn't be acquired.
/// Otherwise the error will be returned.
#[tracing::instrument]
pub fn acquire_lock() -> anyhow::Result<Option<File>> {
    let lock_file_path = get_xdg()?
        .place_runtime_file(LOCK_FILE)
        .context("Locate daemon lock file")?;

    let lock_file = File::create(lock_file_path).context("Create daemon lock file")?;
    if let Err(err) = rustix::fs::flock(
        &lock_file,
        rustix::fs::FlockOperation::NonBlockingLockExclusive,
    ) {
        let daemon_already_exists = err == rustix::io::Errno::WOULDBLOCK;

        if daemon_already_exists {
            info!("Daemon is already running");
            return Ok(None);
        } else {
            error!("Couldn't acquire lock: {}", err);
            return Err(Error::AcquireLock(err).into());
        }
    }

    Ok(Some(lock_file))
}

async fn run(config: Config, config_path: PathBuf) -> anyhow::Result<()> {
    let screen = config.screen;
    let backend = X11Backend::connect((screen.fallback_width, screen.fallback_height))
        .context("Couldn't set up the background window")?;
    let outputs = backend.list_outputs().context("Couldn't list the outputs")?;
    let (width, height) = backend.surface_size();

    let engine: Arc<X11Engine> = Arc::new(Engine::new(
        &config,
        Arc::new(backend),
        WlOutputTool::from_config(&config.apply),
        Handle::current(),
    ));
    engine.on_screen_region_changed(width, height)?;
    engine.sync_outputs(&outputs);

    if let Err(err) = engine
        .on_image_source_changed(&config.background.uri)
        .await
    {
        error!("Couldn't show the background: {}", err);
    }

    let _listener = spawn_listener(Arc::clone(&engine))?;
    let mut hangup = signal(SignalKind::hangup())?;
    info!("Daemon is running");

    loop {
        tokio::select! {
            _ = hangup.recv() => reload(&engine, &config_path).await,
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}

/// Only the background can change at runtime, everything else needs a restart.
async fn reload(engine: &X11Engine, config_path: &Path) {
    info!("Reloading '{}'", config_path.display());

    let config = match Config::load_or_default(config_path) {
        Ok(config) => config,
        Err(err) => {
            warn!("Keeping the current background: {}", err);
            return;
        }
    };

    if let Err(err) = engine
        .on_image_source_changed(&config.background.uri)
        .await
    {
        error!("Couldn't show the new background: {}", err);
    }
}

fn spawn_listener(engine: Arc<X11Engine>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("randr-listener".into())
        .spawn(move || {
            let result = x11::listen(|event| match event {
                DisplayEvent::OutputChanged(output) => {
                    engine.on_output_changed(&output);
                }
                DisplayEvent::ScreenResized { width, height } => {
                    if let Err(err) = engine.on_screen_region_changed(width, height) {
                        warn!("Couldn't resize the background: {}", err);
                    }
                }
            });

            if let Err(err) = result {
                error!("Stopped following the outputs: {}", err);
            }
        })
}

/// Prints the logical monitor view as json.
pub fn print_outputs(config: &Config) -> anyhow::Result<()> {
    let catalog = MonitorCatalog::new();
    for output in list_outputs(config)? {
        catalog.record_output(&output);
    }

    let json = serde_json::to_string_pretty(&catalog.describe())?;
    println!("{}", json);
    Ok(())
}

fn list_outputs(config: &Config) -> anyhow::Result<Vec<OutputInfo>> {
    match x11::query_outputs() {
        Ok(outputs) => return Ok(outputs),
        Err(err) => debug!("No outputs through X11: {}", err),
    }

    match wayland::discover_outputs() {
        Ok(outputs) => return Ok(outputs),
        Err(err) => debug!("No outputs through wayland: {}", err),
    }

    WlOutputTool::from_config(&config.apply)
        .list_outputs()
        .context("Couldn't find any output")
}
