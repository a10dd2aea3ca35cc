// Analysis scheduler
//
// Executes the configured module list once per tick on a dedicated tokio
// task. Each pass: evaluate the gates (user input, require-fill, timed-run
// window), run the modules in declaration order, emit events, then re-arm
// with the computed sleep interval. Stopping cancels the re-arm; an
// in-flight pass always completes. All construction-time wiring problems
// surface as errors from `new`; nothing on the tick path can fail.

use crate::analysis::config::{build_module, ModuleSpec};
use crate::analysis::module::{run_module, AnalysisModule, TickContext};
use crate::buffer::{BufferRegistry, DataBuffer, UserInputSignal};
use crate::error::{Result, SensaError};
use crate::time_reference::{TimeReference, TimedEvent};
use crate::types::{AnalysisEvent, SchedulerState, SchedulerStats, SkipReason};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Minimum inter-tick delay once the pipeline is warmed up. The first two
/// passes run back-to-back so displays populate immediately.
const MIN_SLEEP: f64 = 0.01;

/// Minimum buffer fill before ticks may execute. The threshold can be
/// overridden at tick time by the latest value of a second buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequireFill {
    pub buffer: String,
    pub threshold: usize,
    #[serde(default)]
    pub dynamic_threshold: Option<String>,
}

/// Experiment-time window in which ticks may execute, half-open
/// [start_delay, stop_delay).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimedRun {
    pub start_delay: f64,
    pub stop_delay: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Fixed inter-tick sleep in seconds.
    pub sleep: f64,
    /// Buffer whose latest value overrides `sleep` at tick time.
    #[serde(default)]
    pub dynamic_sleep: Option<String>,
    /// Only tick when a user-input trigger arrived since the last pass.
    #[serde(default)]
    pub on_user_input: bool,
    #[serde(default)]
    pub require_fill: Option<RequireFill>,
    #[serde(default)]
    pub timed_run: Option<TimedRun>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sleep: 0.0,
            dynamic_sleep: None,
            on_user_input: false,
            require_fill: None,
            timed_run: None,
        }
    }
}

struct ScheduledModule {
    spec: ModuleSpec,
    module: Box<dyn AnalysisModule>,
}

/// Mutable tick state, owned by whichever task currently executes a pass.
struct PipelineState {
    modules: Vec<ScheduledModule>,
    cycle: u64,
}

struct ResolvedGates {
    dynamic_sleep: Option<Arc<DataBuffer>>,
    require_fill: Option<(Arc<DataBuffer>, usize, Option<Arc<DataBuffer>>)>,
    timed_run: Option<TimedRun>,
}

pub struct AnalysisScheduler {
    sleep: f64,
    on_user_input: bool,
    gates: Arc<ResolvedGates>,
    pipeline: Arc<tokio::sync::Mutex<PipelineState>>,
    time_reference: Arc<TimeReference>,
    user_input: Arc<UserInputSignal>,
    events: broadcast::Sender<AnalysisEvent>,
    stats: Arc<RwLock<SchedulerStats>>,
    state: Arc<RwLock<SchedulerState>>,
    running: Arc<AtomicBool>,
    cancel: Mutex<CancellationToken>,
    // Serializes start/stop so event registration cannot violate the
    // time reference's alternation invariant.
    transition: Mutex<()>,
}

impl AnalysisScheduler {
    pub fn new(
        specs: Vec<ModuleSpec>,
        config: SchedulerConfig,
        registry: &BufferRegistry,
        time_reference: Arc<TimeReference>,
        user_input: Arc<UserInputSignal>,
    ) -> Result<Self> {
        if !config.sleep.is_finite() || config.sleep < 0.0 {
            return Err(SensaError::InvalidConfig(format!(
                "sleep must be a non-negative number of seconds, got {}",
                config.sleep
            )));
        }

        let dynamic_sleep = config
            .dynamic_sleep
            .as_deref()
            .map(|name| registry.get(name))
            .transpose()?;
        let require_fill = config
            .require_fill
            .as_ref()
            .map(|rf| {
                let buffer = registry.get(&rf.buffer)?;
                let dynamic = rf
                    .dynamic_threshold
                    .as_deref()
                    .map(|name| registry.get(name))
                    .transpose()?;
                Ok::<_, SensaError>((buffer, rf.threshold, dynamic))
            })
            .transpose()?;

        let modules = specs
            .into_iter()
            .map(|spec| {
                let module = build_module(&spec, registry)?;
                Ok(ScheduledModule { spec, module })
            })
            .collect::<Result<Vec<_>>>()?;

        let (events, _) = broadcast::channel(256);

        Ok(Self {
            sleep: config.sleep,
            on_user_input: config.on_user_input,
            gates: Arc::new(ResolvedGates {
                dynamic_sleep,
                require_fill,
                timed_run: config.timed_run,
            }),
            pipeline: Arc::new(tokio::sync::Mutex::new(PipelineState { modules, cycle: 0 })),
            time_reference,
            user_input,
            events,
            stats: Arc::new(RwLock::new(SchedulerStats::default())),
            state: Arc::new(RwLock::new(SchedulerState::Idle)),
            running: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(CancellationToken::new()),
            transition: Mutex::new(()),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SchedulerState {
        self.state.read().clone()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn time_reference(&self) -> &Arc<TimeReference> {
        &self.time_reference
    }

    pub fn user_input(&self) -> &Arc<UserInputSignal> {
        &self.user_input
    }

    /// Registers a START event and arms the tick loop.
    pub fn start(&self) -> Result<()> {
        let _guard = self.transition.lock();
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SensaError::AlreadyRunning);
        }

        self.time_reference.register_event(TimedEvent::Start);
        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        let started_at = epoch_seconds(self.time_reference.system_time_by_index(0));
        self.set_state(SchedulerState::Running { started_at });
        log::info!("analysis scheduler started");

        let worker = Worker {
            sleep: self.sleep,
            on_user_input: self.on_user_input,
            gates: self.gates.clone(),
            pipeline: self.pipeline.clone(),
            time_reference: self.time_reference.clone(),
            user_input: self.user_input.clone(),
            events: self.events.clone(),
            stats: self.stats.clone(),
            running: self.running.clone(),
        };
        tokio::spawn(worker.run(cancel));
        Ok(())
    }

    /// Registers a PAUSE event and stops re-arming the loop. An in-flight
    /// tick completes; no new tick starts.
    pub fn stop(&self) {
        let _guard = self.transition.lock();
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.lock().cancel();
        self.time_reference.register_event(TimedEvent::Pause);
        self.set_state(SchedulerState::Stopped);
        log::info!("analysis scheduler stopped");
    }

    /// Runs exactly one pass outside the loop, e.g. to refresh derived
    /// values after a user edit while the experiment is stopped. The
    /// user-input and timed-run gates do not apply; require-fill does.
    /// Resets the cycle counter, as a fresh pre-run pass.
    pub async fn tick_once(&self) {
        let mut pipeline = self.pipeline.lock().await;
        pipeline.cycle = 0;
        let worker = Worker {
            sleep: self.sleep,
            on_user_input: false,
            gates: self.gates.clone(),
            pipeline: self.pipeline.clone(),
            time_reference: self.time_reference.clone(),
            user_input: self.user_input.clone(),
            events: self.events.clone(),
            stats: self.stats.clone(),
            running: self.running.clone(),
        };
        worker.execute_pass(&mut pipeline, false);
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.write() = state.clone();
        let _ = self.events.send(AnalysisEvent::StateChanged { state });
    }
}

/// Everything the tick loop needs, detached from the scheduler so the
/// spawned task owns plain Arc clones.
struct Worker {
    sleep: f64,
    on_user_input: bool,
    gates: Arc<ResolvedGates>,
    pipeline: Arc<tokio::sync::Mutex<PipelineState>>,
    time_reference: Arc<TimeReference>,
    user_input: Arc<UserInputSignal>,
    events: broadcast::Sender<AnalysisEvent>,
    stats: Arc<RwLock<SchedulerStats>>,
    running: Arc<AtomicBool>,
}

impl Worker {
    async fn run(self, cancel: CancellationToken) {
        loop {
            let delay = {
                let pipeline = self.pipeline.lock().await;
                self.next_delay(pipeline.cycle)
            };

            if delay > 0.0 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs_f64(delay)) => {}
                }
            } else if cancel.is_cancelled() {
                break;
            }

            let mut pipeline = self.pipeline.lock().await;

            if self.on_user_input && !self.user_input.take() {
                // Gated until the next user input; report the skip once,
                // then sleep on the signal instead of polling.
                let _ = self.events.send(AnalysisEvent::Skipped {
                    cycle: pipeline.cycle,
                    reason: SkipReason::UserInput,
                });
                self.stats.write().ticks_skipped += 1;
                drop(pipeline);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = self.user_input.wait() => {}
                }
                self.user_input.take();
                pipeline = self.pipeline.lock().await;
            } else {
                // Consume stray triggers so they do not satisfy a later
                // pass twice. A trigger landing during an executing pass
                // stays pending and is coalesced into the next one.
                if !self.on_user_input {
                    self.user_input.take();
                }
            }

            // Stopped during the sleep: do not start another pass that
            // could overwrite the data the user paused on.
            if !self.running.load(Ordering::SeqCst) && pipeline.cycle > 0 {
                break;
            }

            self.execute_pass(&mut pipeline, true);
        }
        log::debug!("analysis tick loop ended");
    }

    fn next_delay(&self, cycle: u64) -> f64 {
        if cycle <= 1 {
            return 0.0;
        }
        let sleep = self
            .gates
            .dynamic_sleep
            .as_ref()
            .and_then(|buffer| buffer.last())
            .filter(|v| v.is_finite())
            .unwrap_or(self.sleep);
        sleep.max(MIN_SLEEP)
    }

    /// Evaluates the data gates; `gate_timed_run` is false for single
    /// manual passes.
    fn gate(&self, experiment_time: f64, gate_timed_run: bool) -> Option<SkipReason> {
        if let Some((buffer, threshold, dynamic)) = &self.gates.require_fill {
            let need = dynamic
                .as_ref()
                .and_then(|b| b.last())
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| v as usize)
                .unwrap_or(*threshold);
            let have = buffer.len();
            if have < need {
                return Some(SkipReason::RequireFill { have, need });
            }
        }

        if gate_timed_run {
            if let Some(window) = &self.gates.timed_run {
                if experiment_time < window.start_delay || experiment_time >= window.stop_delay {
                    return Some(SkipReason::TimedRun { experiment_time });
                }
            }
        }

        None
    }

    /// One full pass: gates, context, modules in declaration order,
    /// events. Synchronous; the pipeline lock is held throughout, which is
    /// what serializes ticks.
    fn execute_pass(&self, pipeline: &mut PipelineState, gate_timed_run: bool) {
        let experiment_time = self.time_reference.experiment_time();

        if let Some(reason) = self.gate(experiment_time, gate_timed_run) {
            log::debug!("tick {} gated: {:?}", pipeline.cycle, reason);
            let _ = self.events.send(AnalysisEvent::Skipped { cycle: pipeline.cycle, reason });
            self.stats.write().ticks_skipped += 1;
            return;
        }

        let cycle = pipeline.cycle;
        let linear_time = self.time_reference.linear_time();
        let reference_index = self
            .time_reference
            .reference_index_from_experiment_time(experiment_time);
        let ctx = TickContext {
            cycle,
            experiment_time,
            linear_time,
            experiment_offset_epoch: epoch_seconds(
                self.time_reference.system_time_by_index(reference_index),
            ),
            linear_offset_epoch: epoch_seconds(self.time_reference.system_time_by_index(0)),
        };

        let _ = self.events.send(AnalysisEvent::WillUpdate { cycle });
        let started = Instant::now();

        for scheduled in &mut pipeline.modules {
            if !scheduled.spec.runs_in_cycle(cycle) {
                continue;
            }
            run_module(scheduled.module.as_mut(), &ctx);
        }

        pipeline.cycle += 1;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        {
            let mut stats = self.stats.write();
            stats.ticks_executed += 1;
            stats.last_tick_ms = duration_ms;
        }
        let _ = self.events.send(AnalysisEvent::DidUpdate { cycle, duration_ms });
    }
}

fn epoch_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp_micros() as f64 * 1e-6
}
