pub mod analysis;
pub mod buffer;
pub mod clock;
pub mod error;
pub mod scheduler;
pub mod session;
pub mod time_reference;
pub mod types;

pub use analysis::{InputSpec, ModuleKind, ModuleSpec, OutputMode, OutputSpec};
pub use buffer::{BufferRegistry, DataBuffer, UserInputSignal};
pub use clock::{ManualClock, SystemClock, TimeSource};
pub use error::{Result, SensaError};
pub use scheduler::{AnalysisScheduler, RequireFill, SchedulerConfig, TimedRun};
pub use session::{BufferSpec, ExperimentSession, SessionBuilder};
pub use time_reference::{TimeMapping, TimeReference, TimedEvent};
pub use types::{AnalysisEvent, SchedulerState, SchedulerStats, SkipReason};
