//! Glues the topology model, the image slot and the scheduler together and takes the
//! notifications of the outer world.
use std::{path::PathBuf, sync::Arc};

use derive_where::derive_where;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::{
    backend::{self, ApplyError, DrawBackend, OutputConfig, OutputInfo, TopologyApplier},
    compositor::{
        image_source::{self, ImageSlot},
        scheduler::CompositingScheduler,
    },
    config::{self, Config},
    topology::{LogicalMonitor, Mode, MonitorCatalog, OutputId, TopologyStore},
};

/// One background compositor. Owns everything it needs, so several of them can live side by
/// side (which the tests do).
#[derive_where(Debug)]
pub struct Engine<B: DrawBackend, A: TopologyApplier> {
    monitors: MonitorCatalog,
    topology: Arc<TopologyStore>,
    image: Arc<ImageSlot<B::Picture>>,
    scheduler: Arc<CompositingScheduler<B>>,
    #[derive_where(skip)]
    backend: Arc<B>,
    #[derive_where(skip)]
    applier: A,
    screen: config::Screen,
    default_background: PathBuf,
    surface_size: Mutex<SurfaceSize>,
    runtime: Handle,
}

#[derive(Debug, Default)]
struct SurfaceSize {
    current: Option<(u32, u32)>,
    /// Handed to the backend, but not confirmed yet.
    pending: Option<(u32, u32)>,
}

impl<B: DrawBackend, A: TopologyApplier> Engine<B, A> {
    pub fn new(config: &Config, backend: Arc<B>, applier: A, runtime: Handle) -> Self {
        let topology = Arc::new(TopologyStore::new());
        let image = Arc::new(ImageSlot::new());
        let scheduler = Arc::new(CompositingScheduler::new(
            Arc::clone(&topology),
            Arc::clone(&image),
            Arc::clone(&backend),
            config.debounce.into(),
            runtime.clone(),
        ));

        Self {
            monitors: MonitorCatalog::new(),
            topology,
            image,
            scheduler,
            backend,
            applier,
            screen: config.screen,
            default_background: config.background.default_path.clone(),
            surface_size: Mutex::new(SurfaceSize::default()),
            runtime,
        }
    }

    pub fn topology(&self) -> &TopologyStore {
        &self.topology
    }

    pub fn scheduler(&self) -> &Arc<CompositingScheduler<B>> {
        &self.scheduler
    }

    /// Takes the outputs found at startup. They are only marked as dirty, call
    /// [`Engine::refresh_all`] to draw them.
    pub fn sync_outputs(&self, outputs: &[OutputInfo]) {
        for output in outputs {
            let id = self.monitors.record_output(output);

            if output.connected && !output.geometry.is_empty() {
                if self.topology.upsert(id, output.geometry) {
                    self.scheduler.mark_dirty(id);
                }
            } else if self.topology.remove(id) {
                self.scheduler.forget(id);
            }
        }
    }

    /// An output appeared, moved, changed its mode or went away.
    pub fn on_output_changed(&self, output: &OutputInfo) -> OutputId {
        let id = self.monitors.record_output(output);

        if output.connected && !output.geometry.is_empty() {
            if self.topology.upsert(id, output.geometry) {
                debug!("Output {} ('{}') changed", id, output.durable_id);
                self.scheduler.schedule_debounced(id);
            }
        } else if self.topology.remove(id) {
            info!("Output {} ('{}') went away", id, output.durable_id);
            self.scheduler.forget(id);
        }

        id
    }

    pub fn on_mode_list(&self, durable_id: &str, modes: Vec<Mode>) -> OutputId {
        self.monitors.record_modes(durable_id, modes)
    }

    /// Loads and binds the new background, then redraws every output with it.
    ///
    /// If neither the new image nor the default background can be loaded, the old image stays.
    pub async fn on_image_source_changed(&self, uri: &str) -> Result<(), image_source::Error> {
        let requested = image_source::resolve_path(uri, &self.default_background);
        let default = self.default_background.clone();
        let backend = Arc::clone(&self.backend);

        let source = self
            .runtime
            .spawn_blocking(move || image_source::load(&*backend, &requested, &default))
            .await??;
        info!(
            "New background '{}' ({}x{})",
            source.path.display(),
            source.pixel_width,
            source.pixel_height
        );

        let previous = self.image.replace(source);
        self.scheduler.mark_all_dirty();
        self.scheduler.drain().await;

        // only now the outputs show the new image
        drop(previous);
        Ok(())
    }

    /// The virtual screen got resized. Returns `true` if the background surface was resized.
    pub fn on_screen_region_changed(
        &self,
        width: u32,
        height: u32,
    ) -> Result<bool, backend::Error> {
        if !self.screen.accepts(width, height) {
            debug!("Ignore screen resize to {}x{}", width, height);
            return Ok(false);
        }

        let size = Some((width, height));
        {
            let mut surface_size = self.surface_size.lock();
            if surface_size.current == size || surface_size.pending == size {
                return Ok(false);
            }
            surface_size.pending = size;
        }

        debug!("Resize background surface to {}x{}", width, height);
        let result = self.backend.resize_surface(width, height);

        let mut surface_size = self.surface_size.lock();
        if surface_size.pending == size {
            surface_size.pending = None;
        }
        result?;
        surface_size.current = size;

        Ok(true)
    }

    /// Applies the configurations one after another and stops at the first one which gets
    /// rejected. The topology of the rejected output (and all following ones) stays as it is.
    pub fn apply_topology(&self, outputs: &[OutputConfig]) -> Result<(), ApplyError> {
        for output in outputs {
            debug!("Apply {:?}", output);
            if let Err(err) = self.applier.apply(output) {
                warn!("{}", err);
                return Err(err);
            }

            let id = self.monitors.record_applied(output);
            if output.enabled {
                if self.topology.upsert(id, output.geometry()) {
                    self.scheduler.schedule_debounced(id);
                }
            } else if self.topology.remove(id) {
                self.scheduler.forget(id);
            }
        }

        Ok(())
    }

    pub fn describe_outputs(&self) -> Vec<LogicalMonitor> {
        self.monitors.describe()
    }

    /// Draws every known output right away.
    pub async fn refresh_all(&self) {
        self.scheduler.mark_all_dirty();
        self.scheduler.drain().await;
    }
}
