// Gaussian smoothing

use crate::analysis::io::{InputBinding, OutputBinding};
use crate::analysis::module::{map_first_input, AnalysisModule, TickContext};
use crate::error::{Result, SensaError};

/// Convolves the input with a Gaussian kernel of width +-3 sigma. At the
/// edges the kernel is truncated and the result renormalized by the sum of
/// the coefficients actually used.
pub struct GaussSmoothModule {
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
    half_width: usize,
    kernel: Vec<f64>,
}

impl GaussSmoothModule {
    pub fn new(
        sigma: f64,
        inputs: Vec<InputBinding>,
        outputs: Vec<OutputBinding>,
    ) -> Result<Self> {
        if !(sigma > 0.0) {
            return Err(SensaError::InvalidModule {
                module: "gausssmooth",
                reason: format!("sigma must be positive, got {sigma}"),
            });
        }
        match inputs.first() {
            Some(input) if input.is_buffer() => {}
            Some(_) => return Err(SensaError::InputNotBuffer { module: "gausssmooth", role: "in" }),
            None => return Err(SensaError::MissingInput { module: "gausssmooth", role: "in" }),
        }

        let half_width = (sigma * 3.0).round() as usize;
        let c = sigma * sigma;
        let mut kernel: Vec<f64> = (-(half_width as i64)..=half_width as i64)
            .map(|i| (-((i * i) as f64) / (2.0 * c)).exp())
            .collect();
        let sum: f64 = kernel.iter().sum();
        for v in &mut kernel {
            *v /= sum;
        }

        Ok(Self { inputs, outputs, half_width, kernel })
    }
}

impl AnalysisModule for GaussSmoothModule {
    fn label(&self) -> &'static str {
        "gausssmooth"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        let half_width = self.half_width as i64;
        let kernel = &self.kernel;
        map_first_input(&self.inputs, &self.outputs, |values| {
            let n = values.len() as i64;
            (0..n)
                .map(|i| {
                    let mut acc = 0.0;
                    let mut weight = 0.0;
                    for j in -half_width..=half_width {
                        let idx = i + j;
                        if idx >= 0 && idx < n {
                            let k = kernel[(j + half_width) as usize];
                            acc += k * values[idx as usize];
                            weight += k;
                        }
                    }
                    acc / weight
                })
                .collect()
        });
    }
}
