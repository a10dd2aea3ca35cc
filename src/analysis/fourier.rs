// Frequency-domain modules: DFT and autocorrelation

use crate::analysis::io::{InputBinding, OutputBinding};
use crate::analysis::module::{AnalysisModule, TickContext};
use crate::error::{Result, SensaError};
use rustfft::{num_complex::Complex, FftPlanner};

/// Smallest transform size >= `count` of the form 2^n or f * 2^n with
/// f in {3, 5, 15} and n >= 3, the sizes the DFT handles efficiently.
pub(crate) fn next_fast_size(count: usize) -> usize {
    if count <= 1 {
        return count.max(1);
    }
    let c = count as f64;
    let mut options = Vec::with_capacity(4);

    let n = c.log2().ceil();
    options.push(2f64.powf(n) as usize);

    for f in [3.0, 5.0, 15.0] {
        let nn = (c / f).log2().ceil();
        if nn >= 3.0 {
            options.push((f * 2f64.powf(nn)) as usize);
        }
    }

    options
        .into_iter()
        .filter(|&o| o >= count)
        .min()
        .unwrap_or(count)
}

/// Complex forward DFT. The input is zero-padded to the next fast size;
/// without an imaginary input the second half of the (conjugate-symmetric)
/// spectrum is dropped.
pub struct FftModule {
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
    re_in: usize,
    im_in: Option<usize>,
    re_out: Option<usize>,
    im_out: Option<usize>,
    planner: FftPlanner<f64>,
}

impl FftModule {
    pub fn new(inputs: Vec<InputBinding>, outputs: Vec<OutputBinding>) -> Result<Self> {
        let im_in = inputs.iter().position(|i| i.has_role("im") && i.is_buffer());
        let re_in = inputs
            .iter()
            .enumerate()
            .position(|(i, input)| Some(i) != im_in && input.is_buffer())
            .ok_or(SensaError::MissingInput { module: "fft", role: "re" })?;

        let im_out = outputs.iter().position(|o| o.has_role("im"));
        let re_out = outputs
            .iter()
            .enumerate()
            .position(|(i, _)| Some(i) != im_out);
        if re_out.is_none() && im_out.is_none() {
            return Err(SensaError::MissingOutput { module: "fft", role: "re" });
        }

        Ok(Self {
            inputs,
            outputs,
            re_in,
            im_in,
            re_out,
            im_out,
            planner: FftPlanner::new(),
        })
    }
}

impl AnalysisModule for FftModule {
    fn label(&self) -> &'static str {
        "fft"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        let re = self.inputs[self.re_in].values();
        let im = self.im_in.map(|idx| self.inputs[idx].values());

        let count = match &im {
            Some(im) => re.len().min(im.len()),
            None => re.len(),
        };

        let (re_result, im_result) = if count == 0 {
            (Vec::new(), Vec::new())
        } else {
            let padded = next_fast_size(count);
            let mut buffer: Vec<Complex<f64>> = (0..padded)
                .map(|i| Complex {
                    re: re.get(i).copied().unwrap_or(0.0),
                    im: im.as_ref().and_then(|im| im.get(i).copied()).unwrap_or(0.0),
                })
                .collect();

            let fft = self.planner.plan_fft_forward(padded);
            fft.process(&mut buffer);

            // Real input: the upper half mirrors the lower, keep half.
            let keep = if im.is_some() { padded } else { padded / 2 };
            let re_result: Vec<f64> = buffer[..keep].iter().map(|c| c.re).collect();
            let im_result: Vec<f64> = buffer[..keep].iter().map(|c| c.im).collect();
            (re_result, im_result)
        };

        if let Some(idx) = self.re_out {
            self.outputs[idx].append_slice(&re_result);
        }
        if let Some(idx) = self.im_out {
            self.outputs[idx].append_slice(&im_result);
        }
    }
}

/// Autocorrelation of `y`, normalized by the overlap count per lag, with
/// the lag axis derived from `x` (relative to its first sample) or sample
/// indices. Optional minX/maxX single values crop the lag axis.
pub struct AutocorrelationModule {
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
    x_in: Option<usize>,
    y_in: usize,
    min_x_in: Option<usize>,
    max_x_in: Option<usize>,
    x_out: Option<usize>,
    y_out: Option<usize>,
}

impl AutocorrelationModule {
    pub fn new(inputs: Vec<InputBinding>, outputs: Vec<OutputBinding>) -> Result<Self> {
        let y_in = inputs
            .iter()
            .position(|i| i.has_role("y") && i.is_buffer())
            .ok_or(SensaError::MissingInput { module: "autocorrelation", role: "y" })?;
        let x_in = inputs.iter().position(|i| i.has_role("x") && i.is_buffer());
        let min_x_in = inputs.iter().position(|i| i.has_role("minX"));
        let max_x_in = inputs.iter().position(|i| i.has_role("maxX"));

        let x_out = outputs.iter().position(|o| o.has_role("x"));
        let y_out = outputs
            .iter()
            .enumerate()
            .position(|(i, o)| o.has_role("y") || (o.role().is_none() && Some(i) != x_out));

        Ok(Self { inputs, outputs, x_in, y_in, min_x_in, max_x_in, x_out, y_out })
    }
}

impl AnalysisModule for AutocorrelationModule {
    fn label(&self) -> &'static str {
        "autocorrelation"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        let min_x = self
            .min_x_in
            .and_then(|idx| self.inputs[idx].single_value())
            .unwrap_or(f64::NEG_INFINITY);
        let max_x = self
            .max_x_in
            .and_then(|idx| self.inputs[idx].single_value())
            .unwrap_or(f64::INFINITY);
        let needs_filtering = min_x.is_finite() || max_x.is_finite();

        let y = self.inputs[self.y_in].values();
        let mut count = y.len();
        if let Some(idx) = self.x_in {
            count = count.min(self.inputs[idx].buffer().map(|b| b.len()).unwrap_or(0));
        }

        let mut x_values = Vec::new();
        let mut y_values = Vec::new();

        if count > 0 {
            // Lag axis: x relative to its first sample, or plain indices.
            let x: Vec<f64> = match self.x_in {
                Some(idx) => {
                    let raw = self.inputs[idx].values();
                    let first = raw.first().copied().unwrap_or(0.0);
                    raw.iter().take(count).map(|&v| v - first).collect()
                }
                None => (0..count).map(|i| i as f64).collect(),
            };

            for n in 0..count {
                let mut sum = 0.0;
                for p in 0..count - n {
                    sum += y[n + p] * y[p];
                }
                let normalized = sum / (count - n) as f64;
                if needs_filtering && (x[n] < min_x || x[n] > max_x) {
                    continue;
                }
                x_values.push(x[n]);
                y_values.push(normalized);
            }
        }

        if let Some(idx) = self.y_out {
            self.outputs[idx].append_slice(&y_values);
        }
        if let Some(idx) = self.x_out {
            self.outputs[idx].append_slice(&x_values);
        }
    }
}
