//! Real-time publishing of the current mouth value.
//!
//! A [`LivePublisher`] steps through an [`Envelope`] against the wall clock
//! and writes the value for "now" into a shared [`LiveState`] that pollers
//! read at their own pace. Stepping is an estimate: there is no feedback from
//! the device actually playing the audio, so the index is derived from the
//! time elapsed since the run started.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle, time::Instant};

use crate::{Envelope, FrameSampler, LiveConfig, Result, VisemeError};

/// Process-wide slot holding the current mouth value.
///
/// The value lives in an atomic as raw `f32` bits, so readers never see a
/// partially written value and never block. Writes are tagged with the
/// generation of the run that produced them; writes from a superseded run
/// are discarded. The optional mirror file always receives the slot's value
/// at the time of the write, so it converges on the newest run.
#[derive(Clone)]
pub struct LiveState {
    slot: Arc<Slot>,
}

struct Slot {
    bits: AtomicU32,
    generation: Mutex<u64>,
    mirror: Option<PathBuf>,
    mirror_lock: tokio::sync::Mutex<()>,
}

impl LiveState {
    /// Creates an in-memory slot holding 0.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a slot that also mirrors every write into a text file, so
    /// other processes can poll it. The file is reset to `"0"` immediately.
    pub fn with_mirror(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        std::fs::write(&path, "0")?;
        Ok(Self::build(Some(path)))
    }

    fn build(mirror: Option<PathBuf>) -> Self {
        Self {
            slot: Arc::new(Slot {
                bits: AtomicU32::new(0.0_f32.to_bits()),
                generation: Mutex::new(0),
                mirror,
                mirror_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Latest published value.
    pub fn current(&self) -> f32 {
        f32::from_bits(self.slot.bits.load(Ordering::Acquire))
    }

    /// Starts a new generation and resets the slot to 0. Writers from earlier
    /// generations lose write access from this point on. The mirror file
    /// catches up on the next [`LiveState::sync_mirror`].
    pub fn begin_run(&self) -> Result<LiveWriter> {
        let mut generation = self.lock_generation()?;
        *generation += 1;
        self.store(0.0);

        Ok(LiveWriter {
            state: self.clone(),
            generation: *generation,
        })
    }

    /// Writes the current value to the mirror file, if there is one.
    ///
    /// Runs outside the generation lock. Mirror writes are serialised and
    /// each one reads the slot after taking its turn, so the last write
    /// always carries the latest value.
    pub async fn sync_mirror(&self) -> Result<()> {
        let Some(path) = &self.slot.mirror else {
            return Ok(());
        };
        let _turn = self.slot.mirror_lock.lock().await;
        tokio::fs::write(path, self.current().to_string()).await?;
        Ok(())
    }

    fn store(&self, value: f32) {
        self.slot.bits.store(value.to_bits(), Ordering::Release);
    }

    fn lock_generation(&self) -> Result<MutexGuard<'_, u64>> {
        self.slot
            .generation
            .lock()
            .map_err(|_| VisemeError::msg("live state has been poisoned"))
    }
}

impl Default for LiveState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveState")
            .field("current", &self.current())
            .field("mirror", &self.slot.mirror)
            .finish()
    }
}

/// Write access to a [`LiveState`] for a single publisher run.
#[derive(Debug)]
pub struct LiveWriter {
    state: LiveState,
    generation: u64,
}

impl LiveWriter {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Publishes `value` and mirrors it. Returns `Ok(false)` without writing
    /// when a newer run has taken over the slot.
    pub async fn publish(&self, value: f32) -> Result<bool> {
        if !self.store_if_current(value)? {
            return Ok(false);
        }
        self.state.sync_mirror().await?;
        Ok(true)
    }

    fn store_if_current(&self, value: f32) -> Result<bool> {
        let generation = self.state.lock_generation()?;
        if *generation != self.generation {
            return Ok(false);
        }
        self.state.store(value);
        Ok(true)
    }
}

/// Closes the mouth when a run ends, however it ends.
///
/// A run that finishes calls [`CloseOnDrop::close`]. A run that is aborted
/// only gets the in-memory reset here, with the mirror file synced from a
/// detached task.
struct CloseOnDrop {
    writer: LiveWriter,
    closed: bool,
}

impl CloseOnDrop {
    async fn close(&mut self) {
        self.closed = true;
        match self.writer.publish(0.0).await {
            Ok(true) => {}
            Ok(false) => tracing::trace!(
                generation = self.writer.generation,
                "run superseded, leaving live state to successor"
            ),
            Err(err) => tracing::warn!(error = %err, "failed to reset live state"),
        }
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        match self.writer.store_if_current(0.0) {
            Ok(true) => {
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let state = self.writer.state.clone();
                    runtime.spawn(async move {
                        if let Err(err) = state.sync_mirror().await {
                            tracing::warn!(error = %err, "failed to reset live state file");
                        }
                    });
                }
            }
            Ok(false) => {}
            Err(err) => tracing::warn!(error = %err, "failed to reset live state"),
        }
    }
}

/// Outcome of a single publisher run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishReport {
    pub generation: u64,
    /// Steps executed out of the run's budget.
    pub steps: usize,
    pub values_written: usize,
    /// Largest value written during the run.
    pub peak: f32,
    /// The run was stopped by a newer run or an explicit cancel.
    pub cancelled: bool,
    /// The run stopped early because a write failed.
    pub failed: bool,
}

#[derive(Debug, Clone, Copy)]
struct Cadence {
    step_interval: Duration,
    samples_per_step: usize,
}

struct ActiveRun {
    generation: u64,
    cancel: watch::Sender<bool>,
}

/// Owns the publisher run currently driving a [`LiveState`].
///
/// Starting a run cancels the previous one first, so at most one run writes
/// to the slot at any time.
pub struct LivePublisher {
    state: LiveState,
    cadence: Cadence,
    active: Mutex<Option<ActiveRun>>,
}

impl LivePublisher {
    pub fn new(state: LiveState, config: &LiveConfig) -> Self {
        Self {
            state,
            cadence: Cadence {
                step_interval: config.step_interval(),
                samples_per_step: config.samples_per_step.max(1),
            },
            active: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &LiveState {
        &self.state
    }

    /// Number of steps a run over `envelope` is allowed to take.
    pub fn step_budget(&self, envelope: &Envelope) -> usize {
        envelope.len() / self.cadence.samples_per_step
    }

    /// Spawns a run over `envelope` on the current Tokio runtime, replacing
    /// any run in flight. The returned handle may be dropped; the run keeps
    /// going in the background.
    pub fn start(&self, envelope: Envelope) -> Result<JoinHandle<PublishReport>> {
        let mut active = self.lock_active()?;
        if let Some(previous) = active.take() {
            tracing::debug!(generation = previous.generation, "cancelling live run");
            let _ = previous.cancel.send(true);
        }

        let writer = self.state.begin_run()?;
        let generation = writer.generation();
        let budget = self.step_budget(&envelope);
        let (cancel, cancelled) = watch::channel(false);

        tracing::info!(generation, steps = budget, "starting live run");
        let handle = tokio::spawn(step_through(
            writer,
            envelope,
            budget,
            self.cadence.step_interval,
            cancelled,
        ));
        *active = Some(ActiveRun { generation, cancel });
        Ok(handle)
    }

    /// Stops the run in flight, if any. Its final write closes the mouth.
    pub fn cancel(&self) -> Result<()> {
        if let Some(previous) = self.lock_active()?.take() {
            let _ = previous.cancel.send(true);
        }
        Ok(())
    }

    fn lock_active(&self) -> Result<MutexGuard<'_, Option<ActiveRun>>> {
        self.active
            .lock()
            .map_err(|_| VisemeError::msg("live publisher has been poisoned"))
    }
}

impl std::fmt::Debug for LivePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivePublisher")
            .field("state", &self.state)
            .field("cadence", &self.cadence)
            .finish()
    }
}

async fn step_through(
    writer: LiveWriter,
    envelope: Envelope,
    budget: usize,
    step_interval: Duration,
    mut cancelled: watch::Receiver<bool>,
) -> PublishReport {
    let mut report = PublishReport {
        generation: writer.generation(),
        ..Default::default()
    };
    let mut guard = CloseOnDrop {
        writer,
        closed: false,
    };
    if let Err(err) = guard.writer.state.sync_mirror().await {
        tracing::warn!(error = %err, "failed to reset live state file");
    }
    let started = Instant::now();

    for _ in 0..budget {
        if *cancelled.borrow() {
            report.cancelled = true;
            break;
        }

        let elapsed = started.elapsed().as_secs_f64();
        if let Some(value) = FrameSampler::value_at(&envelope, elapsed) {
            match guard.writer.publish(value).await {
                Ok(true) => {
                    report.values_written += 1;
                    report.peak = report.peak.max(value);
                }
                Ok(false) => {
                    report.cancelled = true;
                    break;
                }
                Err(err) => {
                    tracing::warn!(
                        generation = report.generation,
                        error = %err,
                        "live run stopped early"
                    );
                    report.failed = true;
                    break;
                }
            }
        }
        report.steps += 1;

        // The sender only ever flips to `true` or is dropped; both mean stop.
        let stop = tokio::select! {
            _ = tokio::time::sleep(step_interval) => false,
            _ = cancelled.changed() => true,
        };
        if stop {
            report.cancelled = true;
            break;
        }
    }

    guard.close().await;
    tracing::debug!(
        generation = report.generation,
        steps = report.steps,
        cancelled = report.cancelled,
        failed = report.failed,
        "live run finished"
    );
    report
}
