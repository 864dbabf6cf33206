//! Fixed-rate render loop state.
//!
//! [`RenderScheduler`] is the `Disabled`/`Enabled` state machine that runs one
//! tick at a time: apply camera input, build the view once, refresh the
//! edited instance, submit one draw per geometry buffer. It never sleeps.
//! After each tick it computes when the next one is due and leaves the
//! waiting to the event loop (see [`crate::flow`]).
//!
//! # Pacing
//!
//! A tick that finishes under the frame budget delays the next one by the
//! remainder; a tick over budget schedules the next one immediately. Dropped
//! frames are never caught up.

use instant::{Duration, Instant};

use crate::{
    backend::{FrameUniforms, RenderBackend},
    camera::{Camera, CameraInput, Projection},
    data_structures::scene::Scene,
    error::Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Disabled,
    Enabled,
}

/// Frame budget arithmetic for a target rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FramePacer {
    budget: Duration,
}

impl FramePacer {
    /// A target of zero is treated as one frame per second.
    pub fn new(target_fps: u32) -> Self {
        Self {
            budget: Duration::from_secs_f64(1.0 / f64::from(target_fps.max(1))),
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// How long to wait before the next tick after one that took `elapsed`.
    pub fn delay_after(&self, elapsed: Duration) -> Duration {
        self.budget.saturating_sub(elapsed)
    }

    /// When the tick following one that ran from `started` to `finished`
    /// should fire.
    pub fn next_tick_at(&self, started: Instant, finished: Instant) -> Instant {
        finished + self.delay_after(finished.saturating_duration_since(started))
    }
}

/// What a tick did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickReport {
    /// Draws submitted, zero when the frame was skipped.
    pub draws: usize,
    pub skipped: bool,
    pub elapsed: Duration,
    pub delay: Duration,
}

#[derive(Debug)]
pub struct RenderScheduler {
    state: SchedulerState,
    pacer: FramePacer,
    next_tick: Option<Instant>,
    ticks: u64,
    skipped: u64,
}

impl RenderScheduler {
    pub fn new(target_fps: u32) -> Self {
        Self {
            state: SchedulerState::Disabled,
            pacer: FramePacer::new(target_fps),
            next_tick: None,
            ticks: 0,
            skipped: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state == SchedulerState::Enabled
    }

    pub fn pacer(&self) -> &FramePacer {
        &self.pacer
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Starts ticking, first tick due at `now`. Enabling an enabled scheduler
    /// keeps its current schedule.
    pub fn enable(&mut self, now: Instant) {
        if self.is_enabled() {
            return;
        }
        log::info!("render scheduler enabled at {:?} per frame", self.pacer.budget());
        self.state = SchedulerState::Enabled;
        self.next_tick = Some(now);
    }

    /// Stops ticking. The pending tick is cancelled; one already running
    /// finishes but schedules nothing.
    pub fn disable(&mut self) {
        if self.is_enabled() {
            log::info!("render scheduler disabled after {} ticks", self.ticks);
        }
        self.state = SchedulerState::Disabled;
        self.next_tick = None;
    }

    /// When the next tick is due, `None` while disabled.
    pub fn next_tick(&self) -> Option<Instant> {
        self.next_tick
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_tick.is_some_and(|at| now >= at)
    }

    /// Runs one tick if enabled. Instances removed since the last tick are
    /// disposed first, so nothing is freed while this tick's draws exist.
    ///
    /// Backend errors skip the frame and are logged; the loop keeps going.
    pub fn tick(
        &mut self,
        scene: &mut Scene,
        camera: &mut Camera,
        input: &CameraInput,
        projection: &Projection,
        backend: &mut dyn RenderBackend,
    ) -> Option<TickReport> {
        if !self.is_enabled() {
            return None;
        }
        let started = Instant::now();

        let disposed = scene.flush_removals(backend);
        if disposed > 0 {
            log::debug!("disposed {disposed} removed instances");
        }

        camera.apply(input);
        let uniforms = FrameUniforms {
            view: camera.view_matrix(),
            projection: projection.calc_matrix(),
        };
        scene.apply_live_edit();

        let (draws, skipped) = match submit(scene, &uniforms, backend) {
            Ok(draws) => (draws, false),
            Err(e) => {
                log::error!("skipping frame: {e}");
                backend.abort_frame();
                self.skipped += 1;
                (0, true)
            }
        };
        self.ticks += 1;

        let finished = Instant::now();
        let delay = self.schedule(started, finished);
        Some(TickReport {
            draws,
            skipped,
            elapsed: finished.saturating_duration_since(started),
            delay,
        })
    }

    fn schedule(&mut self, started: Instant, finished: Instant) -> Duration {
        let next = self.pacer.next_tick_at(started, finished);
        if self.is_enabled() {
            self.next_tick = Some(next);
        }
        next.saturating_duration_since(finished)
    }
}

fn submit(scene: &Scene, uniforms: &FrameUniforms, backend: &mut dyn RenderBackend) -> Result<usize> {
    let draws = scene.draw_calls();
    let count = draws.len();
    backend.begin_frame(uniforms)?;
    for call in draws {
        backend.draw(call)?;
    }
    backend.end_frame()?;
    Ok(count)
}
