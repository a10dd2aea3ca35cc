// Typed module configuration
//
// Every module variant carries its own configuration fields; wiring is a
// list of named input/output specs resolved against the session's buffer
// registry. Resolution is the fail-fast boundary: an unknown buffer name
// or invalid wiring aborts construction, never a tick.

use crate::analysis::arith::{ArithmeticModule, ArithmeticOp};
use crate::analysis::calculus::{
    AppendModule, CrosscorrelationModule, DifferentiationModule, IntegrationModule,
};
use crate::analysis::filter::{BinningModule, RangefilterModule, SortModule, ThresholdModule};
use crate::analysis::fourier::{AutocorrelationModule, FftModule};
use crate::analysis::generate::{ConstGeneratorModule, RampGeneratorModule, TimerModule};
use crate::analysis::io::{InputBinding, InputSource, OutputBinding, OutputMode};
use crate::analysis::module::AnalysisModule;
use crate::analysis::reduce::{
    AverageModule, CountModule, ExtremumKind, ExtremumModule, FirstModule,
};
use crate::analysis::smooth::GaussSmoothModule;
use crate::buffer::BufferRegistry;
use crate::error::Result;
use serde::{Deserialize, Serialize};

fn default_keep() -> bool {
    true
}

fn default_sigma() -> f64 {
    3.0
}

/// One declared module input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputSpec {
    Buffer {
        name: String,
        #[serde(default)]
        role: Option<String>,
        /// When false the buffer is consumed after the module runs.
        #[serde(default = "default_keep")]
        keep: bool,
    },
    Value {
        value: f64,
        #[serde(default)]
        role: Option<String>,
    },
    Empty {
        #[serde(default)]
        role: Option<String>,
    },
}

impl InputSpec {
    pub fn buffer(name: impl Into<String>) -> Self {
        InputSpec::Buffer { name: name.into(), role: None, keep: true }
    }

    pub fn consumed_buffer(name: impl Into<String>) -> Self {
        InputSpec::Buffer { name: name.into(), role: None, keep: false }
    }

    pub fn value(value: f64) -> Self {
        InputSpec::Value { value, role: None }
    }

    pub fn as_role(self, new_role: impl Into<String>) -> Self {
        let new_role = Some(new_role.into());
        match self {
            InputSpec::Buffer { name, keep, .. } => InputSpec::Buffer { name, role: new_role, keep },
            InputSpec::Value { value, .. } => InputSpec::Value { value, role: new_role },
            InputSpec::Empty { .. } => InputSpec::Empty { role: new_role },
        }
    }
}

/// One declared module output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub mode: OutputMode,
}

impl OutputSpec {
    pub fn clear(name: impl Into<String>) -> Self {
        Self { name: name.into(), role: None, mode: OutputMode::Clear }
    }

    pub fn append(name: impl Into<String>) -> Self {
        Self { name: name.into(), role: None, mode: OutputMode::Append }
    }

    pub fn as_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// Module variants with their per-variant configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModuleKind {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Min {
        #[serde(default)]
        multiple: bool,
    },
    Max {
        #[serde(default)]
        multiple: bool,
    },
    Average,
    Count,
    First,
    Threshold {
        #[serde(default)]
        falling: bool,
    },
    Rangefilter,
    Sort {
        #[serde(default)]
        descending: bool,
    },
    Binning,
    Const,
    Ramp,
    Timer {
        #[serde(default)]
        linear_time: bool,
    },
    Differentiation,
    Integration,
    Append,
    Crosscorrelation,
    Autocorrelation,
    Fft,
    GaussSmooth {
        #[serde(default = "default_sigma")]
        sigma: f64,
    },
}

/// A module declaration: kind plus wiring plus optional cycle windows.
/// With non-empty `cycles`, the module only runs in passes whose cycle
/// number falls into one of the (first, last) ranges; -1 leaves an end
/// open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub kind: ModuleKind,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
    #[serde(default)]
    pub cycles: Vec<(i64, i64)>,
}

impl ModuleSpec {
    pub fn new(kind: ModuleKind, inputs: Vec<InputSpec>, outputs: Vec<OutputSpec>) -> Self {
        Self { kind, inputs, outputs, cycles: Vec::new() }
    }

    pub fn with_cycles(mut self, cycles: Vec<(i64, i64)>) -> Self {
        self.cycles = cycles;
        self
    }

    pub fn runs_in_cycle(&self, cycle: u64) -> bool {
        if self.cycles.is_empty() {
            return true;
        }
        let cycle = cycle as i64;
        self.cycles
            .iter()
            .any(|&(first, last)| (first < 0 || cycle >= first) && (last < 0 || cycle <= last))
    }
}

fn resolve_inputs(specs: &[InputSpec], registry: &BufferRegistry) -> Result<Vec<InputBinding>> {
    specs
        .iter()
        .map(|spec| {
            Ok(match spec {
                InputSpec::Buffer { name, role, keep } => InputBinding::new(
                    role.clone(),
                    InputSource::Buffer { buffer: registry.get(name)?, keep: *keep },
                ),
                InputSpec::Value { value, role } => {
                    InputBinding::new(role.clone(), InputSource::Value(*value))
                }
                InputSpec::Empty { role } => InputBinding::new(role.clone(), InputSource::Empty),
            })
        })
        .collect()
}

fn resolve_outputs(specs: &[OutputSpec], registry: &BufferRegistry) -> Result<Vec<OutputBinding>> {
    specs
        .iter()
        .map(|spec| {
            Ok(OutputBinding::new(
                spec.role.clone(),
                registry.get(&spec.name)?,
                spec.mode,
            ))
        })
        .collect()
}

/// Resolves a spec against the registry and constructs the module.
pub(crate) fn build_module(
    spec: &ModuleSpec,
    registry: &BufferRegistry,
) -> Result<Box<dyn AnalysisModule>> {
    let inputs = resolve_inputs(&spec.inputs, registry)?;
    let outputs = resolve_outputs(&spec.outputs, registry)?;

    let module: Box<dyn AnalysisModule> = match &spec.kind {
        ModuleKind::Add => Box::new(ArithmeticModule::new(ArithmeticOp::Add, inputs, outputs)?),
        ModuleKind::Subtract => {
            Box::new(ArithmeticModule::new(ArithmeticOp::Subtract, inputs, outputs)?)
        }
        ModuleKind::Multiply => {
            Box::new(ArithmeticModule::new(ArithmeticOp::Multiply, inputs, outputs)?)
        }
        ModuleKind::Divide => {
            Box::new(ArithmeticModule::new(ArithmeticOp::Divide, inputs, outputs)?)
        }
        ModuleKind::Power => Box::new(ArithmeticModule::new(ArithmeticOp::Power, inputs, outputs)?),
        ModuleKind::Min { multiple } => {
            Box::new(ExtremumModule::new(ExtremumKind::Min, *multiple, inputs, outputs)?)
        }
        ModuleKind::Max { multiple } => {
            Box::new(ExtremumModule::new(ExtremumKind::Max, *multiple, inputs, outputs)?)
        }
        ModuleKind::Average => Box::new(AverageModule::new(inputs, outputs)?),
        ModuleKind::Count => Box::new(CountModule::new(inputs, outputs)?),
        ModuleKind::First => Box::new(FirstModule::new(inputs, outputs)?),
        ModuleKind::Threshold { falling } => {
            Box::new(ThresholdModule::new(*falling, inputs, outputs)?)
        }
        ModuleKind::Rangefilter => Box::new(RangefilterModule::new(inputs, outputs)?),
        ModuleKind::Sort { descending } => Box::new(SortModule::new(*descending, inputs, outputs)?),
        ModuleKind::Binning => Box::new(BinningModule::new(inputs, outputs)?),
        ModuleKind::Const => Box::new(ConstGeneratorModule::new(inputs, outputs)?),
        ModuleKind::Ramp => Box::new(RampGeneratorModule::new(inputs, outputs)?),
        ModuleKind::Timer { linear_time } => {
            Box::new(TimerModule::new(*linear_time, inputs, outputs)?)
        }
        ModuleKind::Differentiation => Box::new(DifferentiationModule::new(inputs, outputs)?),
        ModuleKind::Integration => Box::new(IntegrationModule::new(inputs, outputs)?),
        ModuleKind::Append => Box::new(AppendModule::new(inputs, outputs)?),
        ModuleKind::Crosscorrelation => Box::new(CrosscorrelationModule::new(inputs, outputs)?),
        ModuleKind::Autocorrelation => Box::new(AutocorrelationModule::new(inputs, outputs)?),
        ModuleKind::Fft => Box::new(FftModule::new(inputs, outputs)?),
        ModuleKind::GaussSmooth { sigma } => {
            Box::new(GaussSmoothModule::new(*sigma, inputs, outputs)?)
        }
    };
    Ok(module)
}
