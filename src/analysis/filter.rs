// Selecting and reordering modules: threshold crossing, range filtering,
// sorting, histogram binning

use crate::analysis::io::{InputBinding, OutputBinding};
use crate::analysis::module::{AnalysisModule, TickContext};
use crate::error::{Result, SensaError};

/// Reports the position of the first threshold crossing in `y`. A crossing
/// requires a sample on the opposite side first, so a signal that starts
/// beyond the threshold does not trigger immediately. With no crossing the
/// outputs stay empty for this tick.
pub struct ThresholdModule {
    falling: bool,
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
    x_idx: Option<usize>,
    y_idx: usize,
    threshold_idx: Option<usize>,
}

impl ThresholdModule {
    pub fn new(
        falling: bool,
        inputs: Vec<InputBinding>,
        outputs: Vec<OutputBinding>,
    ) -> Result<Self> {
        let y_idx = inputs
            .iter()
            .position(|i| i.has_role("y") && i.is_buffer())
            .ok_or(SensaError::MissingInput { module: "threshold", role: "y" })?;
        let x_idx = inputs.iter().position(|i| i.has_role("x") && i.is_buffer());
        let threshold_idx = inputs.iter().position(|i| i.has_role("threshold"));
        Ok(Self { falling, inputs, outputs, x_idx, y_idx, threshold_idx })
    }
}

impl AnalysisModule for ThresholdModule {
    fn label(&self) -> &'static str {
        "threshold"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        let threshold = self
            .threshold_idx
            .and_then(|idx| self.inputs[idx].single_value())
            .unwrap_or(0.0);
        let y = self.inputs[self.y_idx].values();
        let x = match self.x_idx {
            Some(idx) => self.inputs[idx].values(),
            None => Vec::new(),
        };

        let mut crossing = None;
        let mut on_opposite_side = false;
        for (i, &v) in y.iter().enumerate() {
            let beyond = if self.falling { v < threshold } else { v > threshold };
            if beyond {
                if on_opposite_side {
                    crossing = Some(x.get(i).copied().unwrap_or(i as f64));
                    break;
                }
            } else {
                on_opposite_side = true;
            }
        }

        if let Some(value) = crossing {
            for output in &self.outputs {
                output.append(value);
            }
        }
    }
}

#[derive(Clone, Copy)]
struct Bounds {
    min: f64,
    max: f64,
}

impl Bounds {
    fn unbounded() -> Self {
        Self { min: f64::NEG_INFINITY, max: f64::INFINITY }
    }

    fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Drops rows in which any channel value falls outside that channel's
/// min/max bounds. Channels are the unnamed buffer inputs, in order;
/// "min"/"max" inputs bound the channel declared before them. Surviving
/// columns are padded to equal length with NaN.
pub struct RangefilterModule {
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
    /// (input index, bounds) per channel, resolved at construction except
    /// for the bound values themselves, which may be buffer-driven.
    channels: Vec<(usize, Option<usize>, Option<usize>)>,
}

impl RangefilterModule {
    pub fn new(inputs: Vec<InputBinding>, outputs: Vec<OutputBinding>) -> Result<Self> {
        let mut channels: Vec<(usize, Option<usize>, Option<usize>)> = Vec::new();
        for (idx, input) in inputs.iter().enumerate() {
            if input.has_role("min") {
                match channels.last_mut() {
                    Some(channel) => channel.1 = Some(idx),
                    None => {
                        return Err(SensaError::InvalidModule {
                            module: "rangefilter",
                            reason: "min bound precedes any data input".into(),
                        })
                    }
                }
            } else if input.has_role("max") {
                match channels.last_mut() {
                    Some(channel) => channel.2 = Some(idx),
                    None => {
                        return Err(SensaError::InvalidModule {
                            module: "rangefilter",
                            reason: "max bound precedes any data input".into(),
                        })
                    }
                }
            } else if input.is_buffer() {
                channels.push((idx, None, None));
            }
        }
        if channels.is_empty() {
            return Err(SensaError::MissingInput { module: "rangefilter", role: "in" });
        }
        if outputs.len() < channels.len() {
            return Err(SensaError::InvalidModule {
                module: "rangefilter",
                reason: "needs one output per data input".into(),
            });
        }
        Ok(Self { inputs, outputs, channels })
    }
}

impl AnalysisModule for RangefilterModule {
    fn label(&self) -> &'static str {
        "rangefilter"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        let columns: Vec<Vec<f64>> = self
            .channels
            .iter()
            .map(|&(idx, _, _)| self.inputs[idx].values())
            .collect();
        let bounds: Vec<Bounds> = self
            .channels
            .iter()
            .map(|&(_, min_idx, max_idx)| {
                let mut bounds = Bounds::unbounded();
                if let Some(v) = min_idx.and_then(|i| self.inputs[i].single_value()) {
                    bounds.min = v;
                }
                if let Some(v) = max_idx.and_then(|i| self.inputs[i].single_value()) {
                    bounds.max = v;
                }
                bounds
            })
            .collect();

        let rows = columns.iter().map(|c| c.len()).max().unwrap_or(0);
        let mut out: Vec<Vec<f64>> = vec![Vec::new(); columns.len()];

        for row in 0..rows {
            let dropped = columns.iter().zip(&bounds).any(|(column, bounds)| {
                column
                    .get(row)
                    .map(|&v| v.is_finite() && !bounds.contains(v))
                    .unwrap_or(false)
            });
            if dropped {
                continue;
            }
            for (column, result) in columns.iter().zip(&mut out) {
                if let Some(&v) = column.get(row) {
                    result.push(v);
                }
            }
        }

        let longest = out.iter().map(|c| c.len()).max().unwrap_or(0);
        for column in &mut out {
            column.resize(longest, f64::NAN);
        }

        for (result, output) in out.iter().zip(&self.outputs) {
            output.append_slice(result);
        }
    }
}

/// Sorts the first input and reorders every further input by the same
/// permutation. Missing values in shorter siblings become NaN.
pub struct SortModule {
    descending: bool,
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
}

impl SortModule {
    pub fn new(
        descending: bool,
        inputs: Vec<InputBinding>,
        outputs: Vec<OutputBinding>,
    ) -> Result<Self> {
        if inputs.is_empty() || !inputs.iter().all(|i| i.is_buffer()) {
            return Err(SensaError::InvalidModule {
                module: "sort",
                reason: "all inputs must be buffers".into(),
            });
        }
        if outputs.is_empty() {
            return Err(SensaError::MissingOutput { module: "sort", role: "out" });
        }
        Ok(Self { descending, inputs, outputs })
    }
}

impl AnalysisModule for SortModule {
    fn label(&self) -> &'static str {
        "sort"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        let main = self.inputs[0].values();
        let mut order: Vec<usize> = (0..main.len()).collect();
        if self.descending {
            order.sort_by(|&a, &b| main[b].partial_cmp(&main[a]).unwrap_or(std::cmp::Ordering::Equal));
        } else {
            order.sort_by(|&a, &b| main[a].partial_cmp(&main[b]).unwrap_or(std::cmp::Ordering::Equal));
        }

        for (input, output) in self.inputs.iter().zip(&self.outputs) {
            let values = input.values();
            let result: Vec<f64> = order
                .iter()
                .map(|&i| values.get(i).copied().unwrap_or(f64::NAN))
                .collect();
            output.append_slice(&result);
        }
    }
}

/// Histogram of the input with bin origin `x0` and width `dx`. The bin
/// list grows in both directions to cover every finite input value.
pub struct BinningModule {
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
    in_idx: usize,
    x0_idx: Option<usize>,
    dx_idx: Option<usize>,
    starts_out: usize,
    counts_out: usize,
}

impl BinningModule {
    pub fn new(inputs: Vec<InputBinding>, outputs: Vec<OutputBinding>) -> Result<Self> {
        let x0_idx = inputs.iter().position(|i| i.has_role("x0"));
        let dx_idx = inputs.iter().position(|i| i.has_role("dx"));
        let in_idx = inputs
            .iter()
            .enumerate()
            .position(|(i, input)| {
                Some(i) != x0_idx && Some(i) != dx_idx && input.is_buffer()
            })
            .ok_or(SensaError::MissingInput { module: "binning", role: "in" })?;

        let counts_out = outputs
            .iter()
            .position(|o| o.has_role("binCounts"))
            .or(if outputs.len() > 1 { Some(1) } else { None })
            .ok_or(SensaError::MissingOutput { module: "binning", role: "binCounts" })?;
        let starts_out = outputs
            .iter()
            .enumerate()
            .position(|(i, _)| i != counts_out)
            .ok_or(SensaError::MissingOutput { module: "binning", role: "binStarts" })?;

        Ok(Self { inputs, outputs, in_idx, x0_idx, dx_idx, starts_out, counts_out })
    }
}

impl AnalysisModule for BinningModule {
    fn label(&self) -> &'static str {
        "binning"
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        let x0 = self.x0_idx.and_then(|i| self.inputs[i].single_value()).unwrap_or(0.0);
        let mut dx = self.dx_idx.and_then(|i| self.inputs[i].single_value()).unwrap_or(1.0);
        if dx == 0.0 {
            dx = 1.0;
        }

        let mut bin_starts: Vec<f64> = Vec::new();
        let mut bin_counts: Vec<f64> = Vec::new();

        for v in self.inputs[self.in_idx].values() {
            if !v.is_finite() {
                continue;
            }
            let bin_index = ((v - x0) / dx) as i64;
            if bin_starts.is_empty() {
                bin_starts.push(x0 + bin_index as f64 * dx);
                bin_counts.push(1.0);
                continue;
            }
            let mut first_bin = ((bin_starts[0] - x0) / dx).round() as i64;
            while bin_index > first_bin + bin_starts.len() as i64 - 1 {
                bin_starts.push(x0 + (first_bin + bin_starts.len() as i64) as f64 * dx);
                bin_counts.push(0.0);
            }
            while bin_index < first_bin {
                bin_starts.insert(0, x0 + (first_bin - 1) as f64 * dx);
                bin_counts.insert(0, 0.0);
                first_bin = ((bin_starts[0] - x0) / dx).round() as i64;
            }
            bin_counts[(bin_index - first_bin) as usize] += 1.0;
        }

        self.outputs[self.starts_out].append_slice(&bin_starts);
        self.outputs[self.counts_out].append_slice(&bin_counts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::io::{InputSource, OutputMode};
    use crate::analysis::module::run_module;
    use crate::buffer::DataBuffer;
    use std::sync::Arc;

    fn buffer_with(name: &str, values: &[f64]) -> Arc<DataBuffer> {
        let buffer = Arc::new(DataBuffer::new(name, 0));
        buffer.append_slice(values);
        buffer
    }

    fn role_input(role: &str, buffer: &Arc<DataBuffer>) -> InputBinding {
        InputBinding::new(
            Some(role.into()),
            InputSource::Buffer { buffer: buffer.clone(), keep: true },
        )
    }

    fn plain_input(buffer: &Arc<DataBuffer>) -> InputBinding {
        InputBinding::new(None, InputSource::Buffer { buffer: buffer.clone(), keep: true })
    }

    #[test]
    fn threshold_requires_a_crossing() {
        // Signal starts above the threshold: no trigger until it has been
        // below once and crosses again.
        let y = buffer_with("y", &[2.0, 2.5, 0.1, 0.2, 1.8]);
        let x = buffer_with("x", &[10.0, 11.0, 12.0, 13.0, 14.0]);
        let out = buffer_with("out", &[]);
        let mut module = ThresholdModule::new(
            false,
            vec![
                role_input("y", &y),
                role_input("x", &x),
                InputBinding::new(Some("threshold".into()), InputSource::Value(1.0)),
            ],
            vec![OutputBinding::new(None, out.clone(), OutputMode::Clear)],
        )
        .unwrap();
        run_module(&mut module, &TickContext::default());
        assert_eq!(out.to_vec(), vec![14.0]);
    }

    #[test]
    fn threshold_without_crossing_leaves_output_empty() {
        let y = buffer_with("y", &[5.0, 6.0]);
        let out = buffer_with("out", &[1.0]);
        let mut module = ThresholdModule::new(
            false,
            vec![role_input("y", &y), InputBinding::new(Some("threshold".into()), InputSource::Value(1.0))],
            vec![OutputBinding::new(None, out.clone(), OutputMode::Clear)],
        )
        .unwrap();
        // The harness clears the stale value even though nothing is found.
        run_module(&mut module, &TickContext::default());
        assert!(out.is_empty());
    }

    #[test]
    fn rangefilter_drops_rows_across_channels() {
        let a = buffer_with("a", &[1.0, 5.0, 2.0]);
        let b = buffer_with("b", &[10.0, 20.0, 30.0]);
        let out_a = buffer_with("oa", &[]);
        let out_b = buffer_with("ob", &[]);
        let mut module = RangefilterModule::new(
            vec![
                plain_input(&a),
                InputBinding::new(Some("max".into()), InputSource::Value(3.0)),
                plain_input(&b),
            ],
            vec![
                OutputBinding::new(None, out_a.clone(), OutputMode::Clear),
                OutputBinding::new(None, out_b.clone(), OutputMode::Clear),
            ],
        )
        .unwrap();
        run_module(&mut module, &TickContext::default());
        // Row 1 (a == 5.0) exceeds the bound for channel a, so both
        // channels lose it.
        assert_eq!(out_a.to_vec(), vec![1.0, 2.0]);
        assert_eq!(out_b.to_vec(), vec![10.0, 30.0]);
    }

    #[test]
    fn sort_reorders_siblings() {
        let keys = buffer_with("k", &[3.0, 1.0, 2.0]);
        let vals = buffer_with("v", &[30.0, 10.0, 20.0]);
        let out_k = buffer_with("ok", &[]);
        let out_v = buffer_with("ov", &[]);
        let mut module = SortModule::new(
            false,
            vec![plain_input(&keys), plain_input(&vals)],
            vec![
                OutputBinding::new(None, out_k.clone(), OutputMode::Clear),
                OutputBinding::new(None, out_v.clone(), OutputMode::Clear),
            ],
        )
        .unwrap();
        run_module(&mut module, &TickContext::default());
        assert_eq!(out_k.to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(out_v.to_vec(), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn binning_grows_in_both_directions() {
        let data = buffer_with("d", &[2.5, 0.5, 4.5, 2.7, f64::NAN]);
        let starts = buffer_with("s", &[]);
        let counts = buffer_with("c", &[]);
        let mut module = BinningModule::new(
            vec![
                plain_input(&data),
                InputBinding::new(Some("x0".into()), InputSource::Value(0.0)),
                InputBinding::new(Some("dx".into()), InputSource::Value(1.0)),
            ],
            vec![
                OutputBinding::new(Some("binStarts".into()), starts.clone(), OutputMode::Clear),
                OutputBinding::new(Some("binCounts".into()), counts.clone(), OutputMode::Clear),
            ],
        )
        .unwrap();
        run_module(&mut module, &TickContext::default());
        assert_eq!(starts.to_vec(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(counts.to_vec(), vec![1.0, 0.0, 2.0, 0.0, 1.0]);
    }
}
