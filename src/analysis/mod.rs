// Analysis module family: typed configuration, IO bindings and the
// concrete signal-processing stages executed by the scheduler.

pub mod arith;
pub mod calculus;
pub mod config;
pub mod filter;
pub mod fourier;
pub mod generate;
pub mod io;
pub mod module;
pub mod reduce;
pub mod smooth;

pub use config::{InputSpec, ModuleKind, ModuleSpec, OutputSpec};
pub use io::{InputBinding, InputSource, OutputBinding, OutputMode};
pub use module::{AnalysisModule, TickContext};
