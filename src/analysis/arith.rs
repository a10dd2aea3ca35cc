// Elementwise arithmetic over any number of inputs

use crate::analysis::io::{InputBinding, OutputBinding};
use crate::analysis::module::{combine, AnalysisModule, TickContext};
use crate::error::{Result, SensaError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
}

impl ArithmeticOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ArithmeticOp::Add => a + b,
            ArithmeticOp::Subtract => a - b,
            ArithmeticOp::Multiply => a * b,
            ArithmeticOp::Divide => a / b,
            ArithmeticOp::Power => a.powf(b),
        }
    }

    /// Role pulled to the front so non-commutative operations read
    /// naturally regardless of declaration order.
    fn priority_role(self) -> Option<&'static str> {
        match self {
            ArithmeticOp::Subtract => Some("minuend"),
            ArithmeticOp::Power => Some("base"),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "add",
            ArithmeticOp::Subtract => "subtract",
            ArithmeticOp::Multiply => "multiply",
            ArithmeticOp::Divide => "divide",
            ArithmeticOp::Power => "power",
        }
    }
}

pub struct ArithmeticModule {
    op: ArithmeticOp,
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
}

impl ArithmeticModule {
    pub fn new(
        op: ArithmeticOp,
        mut inputs: Vec<InputBinding>,
        outputs: Vec<OutputBinding>,
    ) -> Result<Self> {
        if inputs.is_empty() {
            return Err(SensaError::InvalidModule {
                module: op.label(),
                reason: "needs at least one input".into(),
            });
        }
        if outputs.is_empty() {
            return Err(SensaError::InvalidModule {
                module: op.label(),
                reason: "needs at least one output".into(),
            });
        }
        if let Some(role) = op.priority_role() {
            if let Some(pos) = inputs.iter().position(|i| i.has_role(role)) {
                let prioritized = inputs.remove(pos);
                inputs.insert(0, prioritized);
            }
        }
        Ok(Self { op, inputs, outputs })
    }
}

impl AnalysisModule for ArithmeticModule {
    fn label(&self) -> &'static str {
        self.op.label()
    }

    fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    fn update(&mut self, _ctx: &TickContext) {
        let op = self.op;
        let result = combine(&self.inputs, |a, b| op.apply(a, b));
        for output in &self.outputs {
            output.append_slice(&result);
        }
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

    fn input(buffer: &Arc<DataBuffer>) -> InputBinding {
        InputBinding::new(None, InputSource::Buffer { buffer: buffer.clone(), keep: true })
    }

    #[test]
    fn subtract_prioritizes_minuend() {
        let minuend = buffer_with("m", &[10.0, 10.0]);
        let subtrahend = buffer_with("s", &[1.0, 2.0]);
        let out = buffer_with("out", &[]);

        // Declared subtrahend-first; the minuend role must still lead.
        let mut module = ArithmeticModule::new(
            ArithmeticOp::Subtract,
            vec![
                input(&subtrahend),
                InputBinding::new(
                    Some("minuend".into()),
                    InputSource::Buffer { buffer: minuend, keep: true },
                ),
            ],
            vec![OutputBinding::new(None, out.clone(), OutputMode::Clear)],
        )
        .unwrap();

        run_module(&mut module, &TickContext::default());
        assert_eq!(out.to_vec(), vec![9.0, 8.0]);
    }

    #[test]
    fn divide_by_scalar() {
        let data = buffer_with("d", &[2.0, 4.0, 8.0]);
        let out = buffer_with("out", &[]);
        let mut module = ArithmeticModule::new(
            ArithmeticOp::Divide,
            vec![input(&data), InputBinding::new(None, InputSource::Value(2.0))],
            vec![OutputBinding::new(None, out.clone(), OutputMode::Clear)],
        )
        .unwrap();

        run_module(&mut module, &TickContext::default());
        assert_eq!(out.to_vec(), vec![1.0, 2.0, 4.0]);
    }

    #[test]
    fn construction_requires_io() {
        assert!(ArithmeticModule::new(ArithmeticOp::Add, vec![], vec![]).is_err());
    }
}
