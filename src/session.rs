// Experiment session
//
// The owning context for one experiment: its buffers, its time reference
// and its scheduler. The builder is the single fail-fast construction
// boundary; once `build` returns Ok, nothing on the running path errors.

use crate::analysis::config::ModuleSpec;
use crate::buffer::{BufferRegistry, DataBuffer, UserInputSignal};
use crate::clock::{SystemClock, TimeSource};
use crate::error::Result;
use crate::scheduler::{AnalysisScheduler, SchedulerConfig};
use crate::time_reference::TimeReference;
use crate::types::{AnalysisEvent, SchedulerState, SchedulerStats};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Declaration of one session buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSpec {
    pub name: String,
    /// Maximum element count; 0 means unbounded.
    #[serde(default)]
    pub size: usize,
    #[serde(default)]
    pub base_contents: Vec<f64>,
    /// Static buffers accept one write generation and ignore clears.
    #[serde(default)]
    pub static_buffer: bool,
    /// Writes from a user control raise the session's input signal.
    #[serde(default)]
    pub user_input: bool,
}

impl BufferSpec {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            base_contents: Vec::new(),
            static_buffer: false,
            user_input: false,
        }
    }
}

pub struct SessionBuilder {
    clock: Arc<dyn TimeSource>,
    buffers: BufferRegistry,
    modules: Vec<ModuleSpec>,
    config: SchedulerConfig,
    user_input: Arc<UserInputSignal>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Builder with an injected clock, the hook tests use to drive time.
    pub fn with_clock(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            buffers: BufferRegistry::new(),
            modules: Vec::new(),
            config: SchedulerConfig::default(),
            user_input: Arc::new(UserInputSignal::new()),
        }
    }

    /// Registers a plain unbounded-or-sized buffer and returns its handle.
    pub fn buffer(&mut self, name: impl Into<String>, size: usize) -> Result<Arc<DataBuffer>> {
        self.buffer_spec(BufferSpec::new(name, size))
    }

    pub fn buffer_spec(&mut self, spec: BufferSpec) -> Result<Arc<DataBuffer>> {
        let buffer = self.buffers.insert(DataBuffer::with_base(
            spec.name,
            spec.size,
            spec.base_contents,
            spec.static_buffer,
        ))?;
        if spec.user_input {
            buffer.bind_user_input(self.user_input.clone());
        }
        Ok(buffer)
    }

    pub fn module(&mut self, spec: ModuleSpec) -> &mut Self {
        self.modules.push(spec);
        self
    }

    pub fn scheduler(&mut self, config: SchedulerConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Resolves all wiring and constructs the session. Any dangling buffer
    /// name or invalid module configuration errors here.
    pub fn build(self) -> Result<ExperimentSession> {
        let time_reference = Arc::new(TimeReference::new(self.clock));
        let scheduler = AnalysisScheduler::new(
            self.modules,
            self.config,
            &self.buffers,
            time_reference.clone(),
            self.user_input.clone(),
        )?;
        let id = Uuid::new_v4();
        log::info!("experiment session {} built", id);
        Ok(ExperimentSession {
            id,
            buffers: self.buffers,
            time_reference,
            scheduler,
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ExperimentSession {
    id: Uuid,
    buffers: BufferRegistry,
    time_reference: Arc<TimeReference>,
    scheduler: AnalysisScheduler,
}

impl ExperimentSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn buffer(&self, name: &str) -> Result<Arc<DataBuffer>> {
        self.buffers.get(name)
    }

    pub fn buffers(&self) -> &BufferRegistry {
        &self.buffers
    }

    pub fn time_reference(&self) -> &Arc<TimeReference> {
        &self.time_reference
    }

    pub fn scheduler(&self) -> &AnalysisScheduler {
        &self.scheduler
    }

    pub fn events(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.scheduler.subscribe()
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Starts (or resumes) the experiment.
    pub fn start(&self) -> Result<()> {
        self.scheduler.start()
    }

    /// Pauses the experiment; collected data stays in place.
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Stops the experiment, empties the time log and restores every
    /// non-static buffer to its base contents.
    pub fn reset(&self) {
        self.scheduler.stop();
        self.time_reference.reset();
        self.buffers.clear_dynamic();
        log::info!("experiment session {} reset", self.id);
    }

    /// One manual analysis pass while stopped, refreshing derived values
    /// after a user edit.
    pub async fn trigger_single_run(&self) {
        self.scheduler.tick_once().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::config::{InputSpec, ModuleKind, OutputSpec};
    use crate::error::SensaError;

    #[test]
    fn build_fails_on_dangling_buffer_name() {
        let mut builder = SessionBuilder::new();
        builder.buffer("present", 0).unwrap();
        builder.module(ModuleSpec::new(
            ModuleKind::Count,
            vec![InputSpec::buffer("absent")],
            vec![OutputSpec::clear("present")],
        ));
        assert!(matches!(
            builder.build(),
            Err(SensaError::UnknownBuffer(name)) if name == "absent"
        ));
    }

    #[tokio::test]
    async fn single_run_works_while_stopped() {
        let mut builder = SessionBuilder::new();
        builder.buffer("in", 0).unwrap();
        builder.buffer("out", 0).unwrap();
        builder.module(ModuleSpec::new(
            ModuleKind::Integration,
            vec![InputSpec::buffer("in")],
            vec![OutputSpec::clear("out")],
        ));
        let session = builder.build().unwrap();

        session.buffer("in").unwrap().append_slice(&[1.0, 2.0]);
        session.trigger_single_run().await;
        assert_eq!(session.buffer("out").unwrap().to_vec(), vec![1.0, 3.0]);
        assert!(!session.scheduler().is_running());
    }

    #[tokio::test]
    async fn reset_restores_buffers_and_time_log() {
        let mut builder = SessionBuilder::new();
        builder.buffer("data", 0).unwrap();
        builder
            .buffer_spec(BufferSpec {
                name: "table".into(),
                size: 0,
                base_contents: vec![1.0],
                static_buffer: true,
                user_input: false,
            })
            .unwrap();
        let session = builder.build().unwrap();

        session.start().unwrap();
        session.buffer("data").unwrap().append(9.0);
        session.reset();

        assert!(session.buffer("data").unwrap().is_empty());
        assert_eq!(session.buffer("table").unwrap().to_vec(), vec![1.0]);
        assert_eq!(session.time_reference().event_count(), 0);
    }
}
