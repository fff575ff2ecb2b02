//! Decides when an output gets redrawn.
//!
//! Every output is in one of three [`DrawState`]s:
//!
//! ```text
//!            trigger               pass starts
//!   Clean ───────────► Dirty ─────────────────► Drawing
//!     ▲                  ▲                         │
//!     │                  └──── backend failed ─────┤
//!     └────────────────────── drawn ───────────────┘
//! ```
//!
//! A trigger which hits a `Drawing` output is remembered and the output is drawn once more
//! right after the current pass, so there's at most one pass in flight and one waiting per
//! output. Forgetting an output which is being drawn only marks it as removed: the pass in
//! flight drops it when it's done, unless the output came back in the meantime.
//!
//! Topology changes don't draw right away: the window manager and the X server need some time
//! to settle after a mode switch, so two follow-up passes are scheduled instead (see
//! [`Debounce`]).
use std::{collections::HashMap, sync::Arc, time::Duration};

use derive_where::derive_where;
use parking_lot::Mutex;
use tokio::{runtime::Handle, task::JoinSet};
use tracing::{debug, error, warn};

use crate::{
    backend::DrawBackend,
    topology::{OutputId, TopologyStore},
};

use super::{image_source::ImageSlot, transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawState {
    /// Shows the current image with the current geometry.
    Clean,
    Dirty,
    Drawing,
}

/// What a call to [`CompositingScheduler::pass`] ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Drawn,
    /// The backend refused to draw, the output stays dirty.
    Failed,
    /// There's no image to draw yet or it can't be fitted onto the output.
    NotReady,
    /// Another pass is drawing the output, it'll draw once more when it's done.
    Coalesced,
    /// Nothing to do: the output is clean or unknown.
    Skipped,
}

/// The delays of the two follow-up passes after a topology change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debounce {
    /// From the topology change to the first pass.
    pub short: Duration,
    /// From the first pass to the second one.
    pub long: Duration,
}

impl Default for Debounce {
    fn default() -> Self {
        Self {
            short: Duration::from_secs(1),
            long: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    state: DrawState,
    redo: bool,
    debounce_pending: bool,
    /// Forgotten while `Drawing`.
    removed: bool,
}

impl Slot {
    fn dirty() -> Self {
        Self {
            state: DrawState::Dirty,
            redo: false,
            debounce_pending: false,
            removed: false,
        }
    }

    fn mark_dirty(&mut self) {
        self.removed = false;
        match self.state {
            DrawState::Clean => self.state = DrawState::Dirty,
            DrawState::Dirty => {}
            DrawState::Drawing => self.redo = true,
        }
    }
}

#[derive_where(Debug)]
pub struct CompositingScheduler<B: DrawBackend> {
    topology: Arc<TopologyStore>,
    image: Arc<ImageSlot<B::Picture>>,
    #[derive_where(skip)]
    backend: Arc<B>,
    debounce: Debounce,
    runtime: Handle,
    slots: Mutex<HashMap<OutputId, Slot>>,
}

impl<B: DrawBackend> CompositingScheduler<B> {
    pub fn new(
        topology: Arc<TopologyStore>,
        image: Arc<ImageSlot<B::Picture>>,
        backend: Arc<B>,
        debounce: Debounce,
        runtime: Handle,
    ) -> Self {
        Self {
            topology,
            image,
            backend,
            debounce,
            runtime,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self, id: OutputId) -> Option<DrawState> {
        self.slots
            .lock()
            .get(&id)
            .filter(|slot| !slot.removed)
            .map(|slot| slot.state)
    }

    pub fn mark_dirty(&self, id: OutputId) {
        self.slots
            .lock()
            .entry(id)
            .or_insert_with(Slot::dirty)
            .mark_dirty();
    }

    /// Marks every output of the topology as dirty.
    pub fn mark_all_dirty(&self) {
        let ids = self.topology.ids();

        let mut slots = self.slots.lock();
        for id in ids {
            slots.entry(id).or_insert_with(Slot::dirty).mark_dirty();
        }
    }

    /// Drops the state of a removed output. A pass which is still in flight finishes, but
    /// doesn't come back.
    pub fn forget(&self, id: OutputId) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(&id) else {
            return;
        };

        if slot.state == DrawState::Drawing {
            debug!("Forget output {} once its pass is done", id);
            slot.removed = true;
            slot.redo = false;
            slot.debounce_pending = false;
        } else {
            debug!("Forget output {}", id);
            slots.remove(&id);
        }
    }

    /// Marks the output as dirty and schedules the two follow-up passes, unless they are
    /// already scheduled. In that case the pending passes simply draw the newer geometry.
    pub fn schedule_debounced(self: &Arc<Self>, id: OutputId) {
        {
            let mut slots = self.slots.lock();
            let slot = slots.entry(id).or_insert_with(Slot::dirty);
            slot.mark_dirty();

            if slot.debounce_pending {
                debug!("Output {} already has follow-up passes scheduled", id);
                return;
            }
            slot.debounce_pending = true;
        }

        let scheduler = Arc::clone(self);
        let Debounce { short, long } = self.debounce;
        self.runtime.spawn(async move {
            tokio::time::sleep(short).await;
            scheduler.redraw(id).await;

            tokio::time::sleep(long).await;
            scheduler.redraw(id).await;

            if let Some(slot) = scheduler.slots.lock().get_mut(&id) {
                slot.debounce_pending = false;
            }
        });
    }

    /// Draws the output even if it's clean.
    pub async fn redraw(self: &Arc<Self>, id: OutputId) -> PassOutcome {
        if self.state(id).is_none() {
            return PassOutcome::Skipped;
        }

        self.mark_dirty(id);
        self.pass(id).await
    }

    /// Runs a pass for every dirty output and waits for all of them.
    pub async fn drain(self: &Arc<Self>) {
        let dirty: Vec<OutputId> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.state == DrawState::Dirty)
            .map(|(&id, _)| id)
            .collect();

        let mut passes = JoinSet::new();
        for id in dirty {
            let scheduler = Arc::clone(self);
            passes.spawn_on(async move { scheduler.pass(id).await }, &self.runtime);
        }

        while let Some(result) = passes.join_next().await {
            if let Err(err) = result {
                error!("A draw pass died: {}", err);
            }
        }
    }

    /// Draws the output if it's dirty.
    pub async fn pass(self: &Arc<Self>, id: OutputId) -> PassOutcome {
        loop {
            {
                let mut slots = self.slots.lock();
                let Some(slot) = slots.get_mut(&id).filter(|slot| !slot.removed) else {
                    return PassOutcome::Skipped;
                };

                match slot.state {
                    DrawState::Clean => return PassOutcome::Skipped,
                    DrawState::Drawing => {
                        slot.redo = true;
                        return PassOutcome::Coalesced;
                    }
                    DrawState::Dirty => slot.state = DrawState::Drawing,
                }
            }

            let outcome = self.draw(id).await;

            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(&id) else {
                return outcome;
            };
            if slot.removed {
                slots.remove(&id);
                return outcome;
            }

            let again = outcome == PassOutcome::Drawn && slot.redo;
            slot.redo = false;
            slot.state = match outcome {
                PassOutcome::Drawn if !again => DrawState::Clean,
                _ => DrawState::Dirty,
            };

            if !again {
                return outcome;
            }
            debug!("Output {} changed while drawing, drawing again", id);
        }
    }

    async fn draw(&self, id: OutputId) -> PassOutcome {
        let Some(geometry) = self.topology.get(id) else {
            return PassOutcome::Skipped;
        };
        let Some(image) = self.image.current() else {
            debug!("No background bound yet, can't draw output {}", id);
            return PassOutcome::NotReady;
        };

        let transform = match transform::compute(
            geometry.width,
            geometry.height,
            image.pixel_width,
            image.pixel_height,
        ) {
            Ok(transform) => transform,
            Err(err) => {
                warn!("Skip drawing output {}: {}", id, err);
                return PassOutcome::NotReady;
            }
        };
        debug!(
            "Draw output {} at {:?}: clip={:?}, scale={:?}",
            id, geometry, transform.clip_rect, transform.scale
        );

        let backend = Arc::clone(&self.backend);
        let result = self
            .runtime
            .spawn_blocking(move || backend.draw(&image.picture, &transform, geometry))
            .await;

        match result {
            Ok(Ok(())) => PassOutcome::Drawn,
            Ok(Err(err)) => {
                warn!("Couldn't draw output {}: {}", id, err);
                PassOutcome::Failed
            }
            Err(err) => {
                error!("The draw call of output {} died: {}", id, err);
                PassOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        path::PathBuf,
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use image::DynamicImage;

    use super::*;
    use crate::{
        backend,
        compositor::{image_source::ImageSource, transform::ClipTransform},
        topology::Geometry,
    };

    /// Remembers every draw call, can be told to fail or to hold draws back.
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        pub(crate) draws: Mutex<Vec<(Geometry, ClipTransform)>>,
        pub(crate) resizes: Mutex<Vec<(u32, u32)>>,
        pub(crate) fail: AtomicBool,
        pub(crate) in_flight: AtomicUsize,
        pub(crate) max_in_flight: AtomicUsize,
        pub(crate) draw_delay: Mutex<Option<std::time::Duration>>,
        pub(crate) resizing: AtomicBool,
        pub(crate) resize_delay: Mutex<Option<std::time::Duration>>,
    }

    impl RecordingBackend {
        pub(crate) fn draw_count(&self) -> usize {
            self.draws.lock().len()
        }
    }

    impl DrawBackend for RecordingBackend {
        type Picture = (u32, u32);

        fn bind(&self, image: &DynamicImage) -> Result<Self::Picture, backend::Error> {
            Ok((image.width(), image.height()))
        }

        fn draw(
            &self,
            _picture: &Self::Picture,
            transform: &ClipTransform,
            destination: Geometry,
        ) -> Result<(), backend::Error> {
            let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

            let delay = *self.draw_delay.lock();
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail.load(Ordering::SeqCst) {
                return Err(backend::Error::Rejected("BadPicture".into()));
            }

            self.draws.lock().push((destination, *transform));
            Ok(())
        }

        fn resize_surface(&self, width: u32, height: u32) -> Result<(), backend::Error> {
            self.resizing.store(true, Ordering::SeqCst);
            let delay = *self.resize_delay.lock();
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            self.resizing.store(false, Ordering::SeqCst);

            self.resizes.lock().push((width, height));
            Ok(())
        }
    }

    fn scheduler(
        backend: &Arc<RecordingBackend>,
        with_image: bool,
    ) -> (Arc<TopologyStore>, Arc<CompositingScheduler<RecordingBackend>>) {
        let topology = Arc::new(TopologyStore::new());
        let image = Arc::new(ImageSlot::new());
        if with_image {
            image.replace(ImageSource {
                pixel_width: 1920,
                pixel_height: 1080,
                path: PathBuf::from("/wall.png"),
                picture: (1920, 1080),
            });
        }

        let scheduler = Arc::new(CompositingScheduler::new(
            Arc::clone(&topology),
            image,
            Arc::clone(backend),
            Debounce::default(),
            Handle::current(),
        ));

        (topology, scheduler)
    }

    #[tokio::test]
    async fn test_pass_draws_dirty_output_once() {
        let backend = Arc::new(RecordingBackend::default());
        let (topology, scheduler) = scheduler(&backend, true);
        topology.upsert(1, Geometry::new(0, 0, 1920, 1080));

        scheduler.mark_dirty(1);
        assert_eq!(scheduler.pass(1).await, PassOutcome::Drawn);
        assert_eq!(scheduler.state(1), Some(DrawState::Clean));

        assert_eq!(scheduler.pass(1).await, PassOutcome::Skipped);
        assert_eq!(backend.draw_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_draw_stays_dirty() {
        let backend = Arc::new(RecordingBackend::default());
        backend.fail.store(true, Ordering::SeqCst);
        let (topology, scheduler) = scheduler(&backend, true);
        topology.upsert(1, Geometry::new(0, 0, 1920, 1080));
        topology.upsert(2, Geometry::new(1920, 0, 1920, 1080));

        scheduler.mark_all_dirty();
        assert_eq!(scheduler.pass(1).await, PassOutcome::Failed);
        assert_eq!(scheduler.state(1), Some(DrawState::Dirty));

        // the failure of output 1 doesn't affect output 2
        backend.fail.store(false, Ordering::SeqCst);
        assert_eq!(scheduler.pass(2).await, PassOutcome::Drawn);
        assert_eq!(scheduler.state(1), Some(DrawState::Dirty));
        assert_eq!(scheduler.state(2), Some(DrawState::Clean));
    }

    #[tokio::test]
    async fn test_no_image_is_not_ready() {
        let backend = Arc::new(RecordingBackend::default());
        let (topology, scheduler) = scheduler(&backend, false);
        topology.upsert(1, Geometry::new(0, 0, 1920, 1080));

        scheduler.mark_dirty(1);
        assert_eq!(scheduler.pass(1).await, PassOutcome::NotReady);
        assert_eq!(scheduler.state(1), Some(DrawState::Dirty));
        assert_eq!(backend.draw_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_draws_every_dirty_output() {
        let backend = Arc::new(RecordingBackend::default());
        let (topology, scheduler) = scheduler(&backend, true);
        topology.upsert(1, Geometry::new(0, 0, 1920, 1080));
        topology.upsert(2, Geometry::new(1920, 0, 1280, 1024));
        topology.upsert(3, Geometry::new(3200, 0, 1080, 1920));

        scheduler.mark_all_dirty();
        scheduler.drain().await;

        assert_eq!(backend.draw_count(), 3);
        for id in 1..=3 {
            assert_eq!(scheduler.state(id), Some(DrawState::Clean));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_trigger_while_drawing_is_coalesced() {
        let backend = Arc::new(RecordingBackend::default());
        *backend.draw_delay.lock() = Some(std::time::Duration::from_millis(100));
        let (topology, scheduler) = scheduler(&backend, true);
        topology.upsert(1, Geometry::new(0, 0, 1920, 1080));
        scheduler.mark_dirty(1);

        let first = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.pass(1).await })
        };
        while scheduler.state(1) != Some(DrawState::Drawing) {
            tokio::task::yield_now().await;
        }

        // a burst of triggers while the first pass is in flight
        for _ in 0..5 {
            scheduler.mark_dirty(1);
            assert_eq!(scheduler.pass(1).await, PassOutcome::Coalesced);
        }

        assert_eq!(first.await.unwrap(), PassOutcome::Drawn);
        assert_eq!(backend.draw_count(), 2);
        assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(1), Some(DrawState::Clean));
    }

    fn spawn_pass(
        scheduler: &Arc<CompositingScheduler<RecordingBackend>>,
        id: OutputId,
    ) -> tokio::task::JoinHandle<PassOutcome> {
        let scheduler = Arc::clone(scheduler);
        tokio::spawn(async move { scheduler.pass(id).await })
    }

    async fn wait_for_draw_call(backend: &RecordingBackend) {
        while backend.in_flight.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_replug_while_drawing_waits_for_the_pass() {
        let backend = Arc::new(RecordingBackend::default());
        *backend.draw_delay.lock() = Some(std::time::Duration::from_millis(200));
        let (topology, scheduler) = scheduler(&backend, true);
        topology.upsert(1, Geometry::new(0, 0, 1920, 1080));
        scheduler.mark_dirty(1);

        let first = spawn_pass(&scheduler, 1);
        wait_for_draw_call(&backend).await;

        topology.remove(1);
        scheduler.forget(1);
        assert_eq!(scheduler.state(1), None);
        assert_eq!(scheduler.pass(1).await, PassOutcome::Skipped);

        // back before the first pass is done
        topology.upsert(1, Geometry::new(0, 0, 2560, 1440));
        scheduler.mark_dirty(1);
        assert_eq!(scheduler.state(1), Some(DrawState::Drawing));
        assert_eq!(scheduler.pass(1).await, PassOutcome::Coalesced);

        assert_eq!(first.await.unwrap(), PassOutcome::Drawn);
        assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(backend.draw_count(), 2);
        assert_eq!(backend.draws.lock()[1].0.width, 2560);
        assert_eq!(scheduler.state(1), Some(DrawState::Clean));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_forgotten_while_drawing_is_dropped_after_the_pass() {
        let backend = Arc::new(RecordingBackend::default());
        *backend.draw_delay.lock() = Some(std::time::Duration::from_millis(100));
        let (topology, scheduler) = scheduler(&backend, true);
        topology.upsert(1, Geometry::new(0, 0, 1920, 1080));
        scheduler.mark_dirty(1);

        let first = spawn_pass(&scheduler, 1);
        wait_for_draw_call(&backend).await;
        topology.remove(1);
        scheduler.forget(1);

        assert_eq!(first.await.unwrap(), PassOutcome::Drawn);
        assert_eq!(scheduler.state(1), None);
        assert!(scheduler.slots.lock().is_empty());
        assert_eq!(backend.draw_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_changes_yields_two_passes() {
        let backend = Arc::new(RecordingBackend::default());
        let (topology, scheduler) = scheduler(&backend, true);

        for width in 1000..1010 {
            topology.upsert(1, Geometry::new(0, 0, width, 768));
            scheduler.schedule_debounced(1);
        }
        assert_eq!(backend.draw_count(), 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(backend.draw_count(), 1);
        // the newest geometry wins
        assert_eq!(backend.draws.lock()[0].0.width, 1009);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.draw_count(), 2);
        assert_eq!(scheduler.state(1), Some(DrawState::Clean));
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_output_is_not_drawn() {
        let backend = Arc::new(RecordingBackend::default());
        let (topology, scheduler) = scheduler(&backend, true);
        topology.upsert(1, Geometry::new(0, 0, 1920, 1080));
        scheduler.schedule_debounced(1);

        topology.remove(1);
        scheduler.forget(1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.draw_count(), 0);
        assert_eq!(scheduler.state(1), None);
    }
}
