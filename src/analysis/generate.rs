// Generator modules: constant vectors, ramps, tick timestamps

use crate::analysis::io::{InputBinding, OutputBinding};
use crate::analysis::module::{AnalysisModule, TickContext};
use crate::error::{Result, SensaError};

/// Emits `length` copies of `value`. The length defaults to the output
/// buffer's capacity so a generator can simply fill its target.
pub struct ConstGeneratorModule {
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
    value_idx: Option<usize>,
    length_idx: Option<usize>,
}

impl ConstGeneratorModule {
    pub fn new(inputs: Vec<InputBinding>, outputs: Vec<OutputBinding>) -> Result<Self> {
        if outputs.is_empty() {
            return Err(SensaError::MissingOutput { module: "const", role: "out" });
        }
        let value_idx = inputs.iter().position(|i| i.has_role("value"));
        let length_idx = inputs.iter().position(|i| i.has_role("length"));
        Ok(Self { inputs, outputs, value_idx, length_idx })
    }
}

impl AnalysisModule for ConstGeneratorModule {
    fn label(&self) -> &'static str {
        "const"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        let value = self
            .value_idx
            .and_then(|idx| self.inputs[idx].single_value())
            .unwrap_or(0.0);
        let mut length = self
            .length_idx
            .and_then(|idx| self.inputs[idx].single_value_as_int())
            .unwrap_or(0)
            .max(0) as usize;
        if length == 0 {
            length = self.outputs[0].capacity();
        }

        let result = vec![value; length];
        for output in &self.outputs {
            output.append_slice(&result);
        }
    }
}

/// Emits a linear ramp from `start` to `stop` inclusive with `length`
/// points; the length defaults like the constant generator's.
pub struct RampGeneratorModule {
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
    start_idx: usize,
    stop_idx: usize,
    length_idx: Option<usize>,
}

impl RampGeneratorModule {
    pub fn new(inputs: Vec<InputBinding>, outputs: Vec<OutputBinding>) -> Result<Self> {
        if outputs.is_empty() {
            return Err(SensaError::MissingOutput { module: "ramp", role: "out" });
        }
        let start_idx = inputs
            .iter()
            .position(|i| i.has_role("start"))
            .ok_or(SensaError::MissingInput { module: "ramp", role: "start" })?;
        let stop_idx = inputs
            .iter()
            .position(|i| i.has_role("stop"))
            .ok_or(SensaError::MissingInput { module: "ramp", role: "stop" })?;
        let length_idx = inputs.iter().position(|i| i.has_role("length"));
        Ok(Self { inputs, outputs, start_idx, stop_idx, length_idx })
    }
}

impl AnalysisModule for RampGeneratorModule {
    fn label(&self) -> &'static str {
        "ramp"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        let start = self.inputs[self.start_idx].single_value().unwrap_or(0.0);
        let stop = self.inputs[self.stop_idx].single_value().unwrap_or(0.0);
        let mut length = self
            .length_idx
            .and_then(|idx| self.inputs[idx].single_value_as_int())
            .unwrap_or(0)
            .max(0) as usize;
        if length == 0 {
            length = self.outputs[0].capacity();
        }

        let result: Vec<f64> = match length {
            0 => Vec::new(),
            1 => vec![start],
            n => {
                let step = (stop - start) / (n - 1) as f64;
                (0..n).map(|i| start + step * i as f64).collect()
            }
        };
        for output in &self.outputs {
            output.append_slice(&result);
        }
    }
}

/// Appends the tick's experiment (or linear) time, with the matching unix
/// epoch offset on an optional second output. The times come from the
/// tick context, so every module in a pass sees the same instant.
pub struct TimerModule {
    linear_time: bool,
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
    out_idx: Option<usize>,
    offset_idx: Option<usize>,
}

impl TimerModule {
    pub fn new(
        linear_time: bool,
        inputs: Vec<InputBinding>,
        outputs: Vec<OutputBinding>,
    ) -> Result<Self> {
        if outputs.is_empty() {
            return Err(SensaError::MissingOutput { module: "timer", role: "out" });
        }
        let offset_idx = outputs.iter().position(|o| o.has_role("offset1970"));
        let out_idx = outputs
            .iter()
            .enumerate()
            .position(|(i, _)| Some(i) != offset_idx);
        Ok(Self { linear_time, inputs, outputs, out_idx, offset_idx })
    }
}

impl AnalysisModule for TimerModule {
    fn label(&self) -> &'static str {
        "timer"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, ctx: &TickContext) {
        if let Some(idx) = self.out_idx {
            let t = if self.linear_time { ctx.linear_time } else { ctx.experiment_time };
            self.outputs[idx].append(t);
        }
        if let Some(idx) = self.offset_idx {
            let offset = if self.linear_time {
                ctx.linear_offset_epoch
            } else {
                ctx.experiment_offset_epoch
            };
            self.outputs[idx].append(offset);
        }
    }
}
