// Sequence transforms: differences, running sums, concatenation and
// cross-correlation

use crate::analysis::io::{InputBinding, OutputBinding};
use crate::analysis::module::{map_first_input, AnalysisModule, TickContext};
use crate::error::{Result, SensaError};

/// First differences of the input; output is one element shorter.
pub struct DifferentiationModule {
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
}

impl DifferentiationModule {
    pub fn new(inputs: Vec<InputBinding>, outputs: Vec<OutputBinding>) -> Result<Self> {
        require_buffer_input("differentiation", &inputs)?;
        Ok(Self { inputs, outputs })
    }
}

impl AnalysisModule for DifferentiationModule {
    fn label(&self) -> &'static str {
        "differentiation"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        map_first_input(&self.inputs, &self.outputs, |values| {
            values.windows(2).map(|w| w[1] - w[0]).collect()
        });
    }
}

/// Inclusive running sum of the input.
pub struct IntegrationModule {
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
}

impl IntegrationModule {
    pub fn new(inputs: Vec<InputBinding>, outputs: Vec<OutputBinding>) -> Result<Self> {
        require_buffer_input("integration", &inputs)?;
        Ok(Self { inputs, outputs })
    }
}

impl AnalysisModule for IntegrationModule {
    fn label(&self) -> &'static str {
        "integration"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        map_first_input(&self.inputs, &self.outputs, |values| {
            let mut sum = 0.0;
            values
                .into_iter()
                .map(|v| {
                    sum += v;
                    sum
                })
                .collect()
        });
    }
}

/// Concatenates all inputs in declaration order.
pub struct AppendModule {
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
}

impl AppendModule {
    pub fn new(inputs: Vec<InputBinding>, outputs: Vec<OutputBinding>) -> Result<Self> {
        if inputs.is_empty() {
            return Err(SensaError::MissingInput { module: "append", role: "in" });
        }
        if outputs.is_empty() {
            return Err(SensaError::MissingOutput { module: "append", role: "out" });
        }
        Ok(Self { inputs, outputs })
    }
}

impl AnalysisModule for AppendModule {
    fn label(&self) -> &'static str {
        "append"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        let mut result = Vec::new();
        for input in &self.inputs {
            result.extend(input.values());
        }
        for output in &self.outputs {
            output.append_slice(&result);
        }
    }
}

/// Cross-correlation of two inputs. The longer input is slid against the
/// shorter; the output has as many lags as the length difference and is
/// normalized by that count. Equal-length inputs produce an empty result.
pub struct CrosscorrelationModule {
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
}

impl CrosscorrelationModule {
    pub fn new(inputs: Vec<InputBinding>, outputs: Vec<OutputBinding>) -> Result<Self> {
        let buffers = inputs.iter().filter(|i| i.is_buffer()).count();
        if buffers != 2 || inputs.len() != 2 {
            return Err(SensaError::InvalidModule {
                module: "crosscorrelation",
                reason: "needs exactly two buffer inputs".into(),
            });
        }
        if outputs.is_empty() {
            return Err(SensaError::MissingOutput { module: "crosscorrelation", role: "out" });
        }
        Ok(Self { inputs, outputs })
    }
}

impl AnalysisModule for CrosscorrelationModule {
    fn label(&self) -> &'static str {
        "crosscorrelation"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        let first = self.inputs[0].values();
        let second = self.inputs[1].values();
        let (a, b) = if first.len() > second.len() { (first, second) } else { (second, first) };

        let lags = a.len() - b.len();
        let mut result = Vec::with_capacity(lags);
        for n in 0..lags {
            let mut sum = 0.0;
            for (p, &bv) in b.iter().enumerate() {
                sum += a[n + p] * bv;
            }
            result.push(sum / lags as f64);
        }

        for output in &self.outputs {
            output.append_slice(&result);
        }
    }
}

fn require_buffer_input(module: &'static str, inputs: &[InputBinding]) -> Result<()> {
    match inputs.first() {
        Some(input) if input.is_buffer() => Ok(()),
        Some(_) => Err(SensaError::InputNotBuffer { module, role: "in" }),
        None => Err(SensaError::MissingInput { module, role: "in" }),
    }
}
