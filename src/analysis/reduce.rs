// Reducing modules: extrema, average, count, first

use crate::analysis::io::{InputBinding, OutputBinding};
use crate::analysis::module::{AnalysisModule, TickContext};
use crate::error::{Result, SensaError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtremumKind {
    Min,
    Max,
}

impl ExtremumKind {
    fn label(self) -> &'static str {
        match self {
            ExtremumKind::Min => "min",
            ExtremumKind::Max => "max",
        }
    }

    fn better(self, candidate: f64, current: f64) -> bool {
        match self {
            ExtremumKind::Min => candidate < current,
            ExtremumKind::Max => candidate > current,
        }
    }

    fn worst(self) -> f64 {
        match self {
            ExtremumKind::Min => f64::INFINITY,
            ExtremumKind::Max => f64::NEG_INFINITY,
        }
    }

    /// In multiple mode a segment closes when the signal returns to the
    /// other side of the threshold.
    fn closes_segment(self, value: f64, threshold: f64) -> bool {
        match self {
            ExtremumKind::Min => value > threshold,
            ExtremumKind::Max => value < threshold,
        }
    }
}

/// Finds the minimum or maximum of `y`, optionally per threshold-bounded
/// segment (`multiple`), with the matching `x` position as a second output.
/// Positions fall back to the sample index when no (or a too short) `x`
/// input is bound.
pub struct ExtremumModule {
    kind: ExtremumKind,
    multiple: bool,
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
    x_idx: Option<usize>,
    y_idx: usize,
    threshold_idx: Option<usize>,
    value_out: Option<usize>,
    position_out: Option<usize>,
}

impl ExtremumModule {
    pub fn new(
        kind: ExtremumKind,
        multiple: bool,
        inputs: Vec<InputBinding>,
        outputs: Vec<OutputBinding>,
    ) -> Result<Self> {
        let y_idx = inputs
            .iter()
            .position(|i| i.has_role("y") && i.is_buffer())
            .ok_or(SensaError::MissingInput { module: kind.label(), role: "y" })?;
        let x_idx = inputs.iter().position(|i| i.has_role("x") && i.is_buffer());
        let threshold_idx = inputs.iter().position(|i| i.has_role("threshold"));

        let value_out = outputs
            .iter()
            .position(|o| o.has_role(kind.label()) || o.role().is_none());
        let position_out = outputs.iter().position(|o| o.has_role("position"));
        if value_out.is_none() && position_out.is_none() {
            return Err(SensaError::MissingOutput { module: kind.label(), role: kind.label() });
        }

        Ok(Self {
            kind,
            multiple,
            inputs,
            outputs,
            x_idx,
            y_idx,
            threshold_idx,
            value_out,
            position_out,
        })
    }

    fn position(&self, x: &[f64], index: usize) -> f64 {
        x.get(index).copied().unwrap_or(index as f64)
    }
}

impl AnalysisModule for ExtremumModule {
    fn label(&self) -> &'static str {
        self.kind.label()
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        let y = self.inputs[self.y_idx].values();
        if y.is_empty() {
            return;
        }
        let x = match self.x_idx {
            Some(idx) => self.inputs[idx].values(),
            None => Vec::new(),
        };

        if self.multiple {
            let threshold = self
                .threshold_idx
                .and_then(|idx| self.inputs[idx].single_value())
                .unwrap_or(0.0);

            let mut extrema = Vec::new();
            let mut positions = Vec::new();
            let mut current = self.kind.worst();
            let mut current_x = f64::NAN;

            for (i, &v) in y.iter().enumerate() {
                if self.kind.closes_segment(v, threshold) {
                    if current_x.is_finite() {
                        extrema.push(current);
                        positions.push(current_x);
                        current = self.kind.worst();
                        current_x = f64::NAN;
                    }
                } else if self.kind.better(v, current) {
                    current = v;
                    current_x = self.position(&x, i);
                }
            }

            if let Some(out) = self.value_out {
                self.outputs[out].append_slice(&extrema);
            }
            if let Some(out) = self.position_out {
                self.outputs[out].append_slice(&positions);
            }
        } else {
            let mut best = self.kind.worst();
            let mut best_idx = 0usize;
            for (i, &v) in y.iter().enumerate() {
                if self.kind.better(v, best) {
                    best = v;
                    best_idx = i;
                }
            }

            if let Some(out) = self.value_out {
                self.outputs[out].append(best);
            }
            if let Some(out) = self.position_out {
                let position = self.position(&x, best_idx);
                self.outputs[out].append(position);
            }
        }
    }
}

/// Mean and sample standard deviation over the finite values of the input.
/// No output is written when the input has no finite values; the standard
/// deviation is NaN below two finite values.
pub struct AverageModule {
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
    average_out: Option<usize>,
    std_out: Option<usize>,
}

impl AverageModule {
    pub fn new(inputs: Vec<InputBinding>, outputs: Vec<OutputBinding>) -> Result<Self> {
        let first = inputs.first().ok_or(SensaError::MissingInput {
            module: "average",
            role: "in",
        })?;
        if !first.is_buffer() {
            return Err(SensaError::InputNotBuffer { module: "average", role: "in" });
        }
        let std_out = outputs.iter().position(|o| o.has_role("std"));
        let average_out = outputs
            .iter()
            .enumerate()
            .position(|(i, o)| o.has_role("average") || (o.role().is_none() && Some(i) != std_out));
        Ok(Self { inputs, outputs, average_out, std_out })
    }
}

impl AnalysisModule for AverageModule {
    fn label(&self) -> &'static str {
        "average"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        let values = self.inputs[0].values();
        let finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return;
        }

        let mean = finite.iter().sum::<f64>() / finite.len() as f64;
        if let Some(out) = self.average_out {
            self.outputs[out].append(mean);
        }

        if let Some(out) = self.std_out {
            let std = if finite.len() < 2 {
                f64::NAN
            } else {
                let sum_sq: f64 = finite.iter().map(|v| (v - mean) * (v - mean)).sum();
                (sum_sq / (finite.len() - 1) as f64).sqrt()
            };
            self.outputs[out].append(std);
        }
    }
}

/// Element count of the first input as a single value.
pub struct CountModule {
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
}

impl CountModule {
    pub fn new(inputs: Vec<InputBinding>, outputs: Vec<OutputBinding>) -> Result<Self> {
        if inputs.is_empty() {
            return Err(SensaError::MissingInput { module: "count", role: "in" });
        }
        if outputs.is_empty() {
            return Err(SensaError::MissingOutput { module: "count", role: "out" });
        }
        Ok(Self { inputs, outputs })
    }
}

impl AnalysisModule for CountModule {
    fn label(&self) -> &'static str {
        "count"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        let count = self.inputs[0].values().len() as f64;
        for output in &self.outputs {
            output.append(count);
        }
    }
}

/// First element of each input, written to the output at the same index.
/// Empty inputs write nothing.
pub struct FirstModule {
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
}

impl FirstModule {
    pub fn new(inputs: Vec<InputBinding>, outputs: Vec<OutputBinding>) -> Result<Self> {
        if inputs.is_empty() {
            return Err(SensaError::MissingInput { module: "first", role: "in" });
        }
        if outputs.len() < inputs.len() {
            return Err(SensaError::InvalidModule {
                module: "first",
                reason: "needs one output per input".into(),
            });
        }
        Ok(Self { inputs, outputs })
    }
}

impl AnalysisModule for FirstModule {
    fn label(&self) -> &'static str {
        "first"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        for (input, output) in self.inputs.iter().zip(&self.outputs) {
            if let Some(first) = input.values().first() {
                output.append(*first);
            }
        }
    }
}
