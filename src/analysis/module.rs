// Analysis module trait and execution harness
//
// A module owns no data; it reads snapshots of its bound inputs and
// appends results to its bound outputs. The harness handles the shared
// lifecycle around every update: clear-mode outputs are wiped before the
// module writes, and consumed (keep == false) buffer inputs are cleared
// afterwards. Modules themselves must not fail at tick time; bad input
// shapes degrade to documented defaults.

use crate::analysis::io::{InputBinding, OutputBinding};

/// Per-tick values handed to every module, computed once per pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickContext {
    pub cycle: u64,
    /// Experiment time at the start of the pass.
    pub experiment_time: f64,
    /// Wall-clock elapsed time since the first start, pauses included.
    pub linear_time: f64,
    /// Unix epoch offset of the reference event for `experiment_time`.
    pub experiment_offset_epoch: f64,
    /// Unix epoch offset of the first recorded event.
    pub linear_offset_epoch: f64,
}

pub trait AnalysisModule: Send {
    /// Short human-readable kind label, used in logs.
    fn label(&self) -> &'static str;

    fn inputs(&self) -> &[InputBinding];

    fn outputs(&self) -> &[OutputBinding];

    fn update(&mut self, ctx: &TickContext);
}

/// Runs one module through the shared lifecycle.
pub(crate) fn run_module(module: &mut dyn AnalysisModule, ctx: &TickContext) {
    for output in module.outputs() {
        output.prepare();
    }
    module.update(ctx);
    for input in module.inputs() {
        input.consume();
    }
}

/// A resolved operand: scalars broadcast, vectors align elementwise.
#[derive(Debug, Clone)]
pub(crate) enum ValueSource {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl ValueSource {
    fn from_values(mut values: Vec<f64>) -> Self {
        if values.len() == 1 {
            ValueSource::Scalar(values.remove(0))
        } else {
            ValueSource::Vector(values)
        }
    }
}

/// Combines all inputs elementwise with `op`, the shared behavior of the
/// arithmetic modules: single-element inputs act as scalars, shorter
/// vectors are padded with their last value, and any empty vector input
/// makes the whole result empty.
pub(crate) fn combine(inputs: &[InputBinding], op: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    let mut sources = Vec::with_capacity(inputs.len());
    let mut max_count = 0usize;

    for input in inputs {
        let values = input.values();
        if input.is_buffer() && values.is_empty() {
            return Vec::new();
        }
        max_count = max_count.max(values.len().max(1));
        sources.push(ValueSource::from_values(values));
    }

    if sources.is_empty() || max_count == 0 {
        return Vec::new();
    }

    let mut iter = sources.into_iter();
    let first = match iter.next() {
        Some(source) => source,
        None => return Vec::new(),
    };
    let mut acc = materialize(first, max_count);
    for source in iter {
        let rhs = materialize(source, max_count);
        for (a, b) in acc.iter_mut().zip(rhs) {
            *a = op(*a, b);
        }
    }
    acc
}

fn materialize(source: ValueSource, count: usize) -> Vec<f64> {
    match source {
        ValueSource::Scalar(v) => vec![v; count],
        ValueSource::Vector(mut values) => {
            let pad = values.last().copied().unwrap_or(f64::NAN);
            values.resize(count, pad);
            values
        }
    }
}

/// Maps the first input through `f` and appends the result to every
/// output, the shape of the single-input value-mapping modules.
pub(crate) fn map_first_input(
    inputs: &[InputBinding],
    outputs: &[OutputBinding],
    f: impl FnOnce(Vec<f64>) -> Vec<f64>,
) {
    let Some(input) = inputs.first() else {
        return;
    };
    let result = f(input.values());
    for output in outputs {
        output.append_slice(&result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::io::InputSource;
    use crate::buffer::DataBuffer;
    use std::sync::Arc;

    fn buffer_input(values: &[f64]) -> InputBinding {
        let buffer = Arc::new(DataBuffer::new("in", 0));
        buffer.append_slice(values);
        InputBinding::new(None, InputSource::Buffer { buffer, keep: true })
    }

    #[test]
    fn combine_broadcasts_scalars() {
        let inputs = vec![buffer_input(&[1.0, 2.0, 3.0]), InputBinding::new(None, InputSource::Value(10.0))];
        assert_eq!(combine(&inputs, |a, b| a + b), vec![11.0, 12.0, 13.0]);
    }

    #[test]
    fn combine_pads_short_vectors_with_last_value() {
        let inputs = vec![buffer_input(&[1.0, 2.0, 3.0, 4.0]), buffer_input(&[10.0, 20.0])];
        assert_eq!(combine(&inputs, |a, b| a + b), vec![11.0, 22.0, 23.0, 24.0]);
    }

    #[test]
    fn combine_with_empty_vector_is_empty() {
        let inputs = vec![buffer_input(&[]), InputBinding::new(None, InputSource::Value(1.0))];
        assert!(combine(&inputs, |a, b| a + b).is_empty());
    }

    #[test]
    fn combine_single_element_buffer_is_scalar() {
        let inputs = vec![buffer_input(&[2.0]), buffer_input(&[1.0, 2.0, 3.0])];
        assert_eq!(combine(&inputs, |a, b| a * b), vec![2.0, 4.0, 6.0]);
    }
}
