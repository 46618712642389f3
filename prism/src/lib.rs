/*!
# prism

A tiny dataflow language for per-pixel image kernels.

A [`Kernel`] is an append-only arena of [`Expression`]s over one pixel of
a planar-interleaved `f32` image, plus one output root per channel.
Fusion works by rewriting the output roots: each pipeline stage reads the
current roots, appends the expressions of its own math, and installs new
roots. No intermediate buffer ever materializes; the whole chain stays
one graph, evaluated at every output pixel.

Handles may only reference expressions appended earlier, so the arena is
always in evaluation order and both backends are single forward passes:

- [`eval`] walks the arena on the CPU, one scratch slot per expression;
- [`wgsl`] prints the arena as a WGSL compute shader, one `let` per
  expression, for dispatch on a GPU queue.

```
use prism::Kernel;

// rgb' = clamp(rgb + 0.1, 0, 1), alpha forwarded.
let mut kernel = Kernel::new(4);
let offset = kernel.literal(0.1);
let zero = kernel.literal(0.0);
let one = kernel.literal(1.0);
for c in 0..3 {
    let lifted = kernel.add(kernel.output(c), offset);
    let bounded = kernel.clamp(lifted, zero, one);
    kernel.set_output(c, bounded);
}
kernel.validate()?;

let mut pixel = [0.95f32, 0.5, 0.25, 1.0];
prism::eval::Evaluator::new(&kernel).evaluate(&mut pixel);
assert_eq!(pixel[0], 1.0);
assert_eq!(pixel[3], 1.0);
# Ok::<(), prism::ValidationError>(())
```
*/

#![warn(missing_docs, trivial_casts, unused_qualifications)]

pub mod eval;
pub mod wgsl;

use std::collections::HashMap;

use thiserror::Error;

/// Index of an [`Expression`] inside its [`Kernel`].
///
/// Handles are only meaningful for the kernel that issued them.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    /// Position of the expression in the arena.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Element-wise binary operators.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BinaryOp {
    /// `left + right`
    Add,
    /// `left - right`
    Sub,
    /// `left * right`
    Mul,
    /// `left / right`
    Div,
    /// `min(left, right)`
    Min,
    /// `max(left, right)`
    Max,
}

/// One node of the per-pixel dataflow graph.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Expression {
    /// The source pixel's channel `c` at the invocation coordinates.
    Channel(u8),
    /// A compile-time constant, e.g. a clamped operation parameter.
    Literal(f32),
    /// A binary operation over two earlier expressions.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand; must precede this expression in the arena.
        left: Handle,
        /// Right operand; must precede this expression in the arena.
        right: Handle,
    },
}

/// Errors found by [`Kernel::validate`].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    /// The kernel's channel count is outside `1..=4`.
    #[error("kernel has unsupported channel count {0}")]
    BadChannelCount(u8),
    /// A `Channel` expression names a channel the kernel doesn't have.
    #[error("expression {index} reads channel {channel} of a {channel_count}-channel kernel")]
    ChannelOutOfRange {
        /// Arena index of the offending expression.
        index: usize,
        /// Channel it tried to read.
        channel: u8,
        /// Channels the kernel actually has.
        channel_count: u8,
    },
    /// A binary operand points at this expression or a later one.
    #[error("expression {index} references a non-earlier expression {operand}")]
    ForwardReference {
        /// Arena index of the offending expression.
        index: usize,
        /// Arena index of the out-of-order operand.
        operand: usize,
    },
    /// An output root is out of the arena's bounds.
    #[error("output root for channel {channel} is out of bounds")]
    BadOutput {
        /// The channel whose root is broken.
        channel: u8,
    },
    /// A literal is not a finite number.
    #[error("expression {index} is a non-finite literal")]
    NonFiniteLiteral {
        /// Arena index of the offending literal.
        index: usize,
    },
}

/// A per-pixel kernel: expression arena plus per-channel output roots.
///
/// A fresh kernel is the identity: every output root is the matching
/// `Channel` read. Stages extend it through the builder methods and move
/// the roots forward.
#[derive(Clone, Debug)]
pub struct Kernel {
    channel_count: u8,
    expressions: Vec<Expression>,
    outputs: Vec<Handle>,
    literals: HashMap<u32, Handle>,
}

impl Kernel {
    /// Creates the identity kernel over `channel_count` channels.
    ///
    /// # Panics
    ///
    /// Panics if `channel_count` is 0 or greater than 4.
    #[must_use]
    pub fn new(channel_count: u8) -> Self {
        assert!(
            (1..=4).contains(&channel_count),
            "unsupported channel count {channel_count}"
        );
        let mut kernel = Self {
            channel_count,
            expressions: Vec::new(),
            outputs: Vec::new(),
            literals: HashMap::new(),
        };
        for c in 0..channel_count {
            let handle = kernel.append(Expression::Channel(c));
            kernel.outputs.push(handle);
        }
        kernel
    }

    /// Number of channels the kernel reads and writes.
    #[must_use]
    pub const fn channel_count(&self) -> u8 {
        self.channel_count
    }

    /// The expression arena, in evaluation order.
    #[must_use]
    pub fn expressions(&self) -> &[Expression] {
        &self.expressions
    }

    /// The current output root of channel `c`.
    #[must_use]
    pub fn output(&self, c: u8) -> Handle {
        self.outputs[c as usize]
    }

    /// All output roots, channel-indexed.
    #[must_use]
    pub fn outputs(&self) -> &[Handle] {
        &self.outputs
    }

    /// Installs a new output root for channel `c`.
    pub fn set_output(&mut self, c: u8, handle: Handle) {
        self.outputs[c as usize] = handle;
    }

    /// Appends a raw expression.
    pub fn append(&mut self, expression: Expression) -> Handle {
        let handle = Handle(self.expressions.len() as u32);
        self.expressions.push(expression);
        handle
    }

    /// A constant. Identical bit patterns share one arena slot.
    pub fn literal(&mut self, value: f32) -> Handle {
        let bits = value.to_bits();
        if let Some(&handle) = self.literals.get(&bits) {
            return handle;
        }
        let handle = self.append(Expression::Literal(value));
        self.literals.insert(bits, handle);
        handle
    }

    fn binary(&mut self, op: BinaryOp, left: Handle, right: Handle) -> Handle {
        self.append(Expression::Binary { op, left, right })
    }

    /// `left + right`
    pub fn add(&mut self, left: Handle, right: Handle) -> Handle {
        self.binary(BinaryOp::Add, left, right)
    }

    /// `left - right`
    pub fn sub(&mut self, left: Handle, right: Handle) -> Handle {
        self.binary(BinaryOp::Sub, left, right)
    }

    /// `left * right`
    pub fn mul(&mut self, left: Handle, right: Handle) -> Handle {
        self.binary(BinaryOp::Mul, left, right)
    }

    /// `left / right`
    pub fn div(&mut self, left: Handle, right: Handle) -> Handle {
        self.binary(BinaryOp::Div, left, right)
    }

    /// `min(left, right)`
    pub fn min(&mut self, left: Handle, right: Handle) -> Handle {
        self.binary(BinaryOp::Min, left, right)
    }

    /// `max(left, right)`
    pub fn max(&mut self, left: Handle, right: Handle) -> Handle {
        self.binary(BinaryOp::Max, left, right)
    }

    /// `clamp(value, lo, hi)` as `min(max(value, lo), hi)`.
    pub fn clamp(&mut self, value: Handle, lo: Handle, hi: Handle) -> Handle {
        let raised = self.max(value, lo);
        self.min(raised, hi)
    }

    /// `value * scale + offset` with constant scale and offset.
    pub fn mul_add_const(&mut self, value: Handle, scale: f32, offset: f32) -> Handle {
        let scale = self.literal(scale);
        let offset = self.literal(offset);
        let scaled = self.mul(value, scale);
        self.add(scaled, offset)
    }

    /// Checks arena ordering, channel bounds and output roots.
    ///
    /// Kernels produced exclusively through the builder methods are valid
    /// by construction; backends still validate before compiling so a
    /// hand-assembled kernel cannot smuggle a forward reference into a
    /// shader.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=4).contains(&self.channel_count) {
            return Err(ValidationError::BadChannelCount(self.channel_count));
        }
        for (index, expression) in self.expressions.iter().enumerate() {
            match *expression {
                Expression::Channel(channel) => {
                    if channel >= self.channel_count {
                        return Err(ValidationError::ChannelOutOfRange {
                            index,
                            channel,
                            channel_count: self.channel_count,
                        });
                    }
                }
                Expression::Literal(value) => {
                    if !value.is_finite() {
                        return Err(ValidationError::NonFiniteLiteral { index });
                    }
                }
                Expression::Binary { left, right, .. } => {
                    for operand in [left, right] {
                        if operand.index() >= index {
                            return Err(ValidationError::ForwardReference {
                                index,
                                operand: operand.index(),
                            });
                        }
                    }
                }
            }
        }
        for c in 0..self.channel_count {
            if self.outputs[c as usize].index() >= self.expressions.len() {
                return Err(ValidationError::BadOutput { channel: c });
            }
        }
        Ok(())
    }

    /// Whether every output root still is its own channel read.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.outputs.iter().enumerate().all(|(c, &handle)| {
            matches!(
                self.expressions[handle.index()],
                Expression::Channel(channel) if channel as usize == c
            )
        })
    }
}

/// Compact listing of the arena, one expression per line, for trace
/// logs and debugging.
impl std::fmt::Display for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "kernel({} channels)", self.channel_count)?;
        for (index, expression) in self.expressions.iter().enumerate() {
            write!(f, "  e{index} = ")?;
            match *expression {
                Expression::Channel(c) => writeln!(f, "channel {c}")?,
                Expression::Literal(value) => writeln!(f, "{value:?}")?,
                Expression::Binary { op, left, right } => {
                    let (l, r) = (left.index(), right.index());
                    match op {
                        BinaryOp::Add => writeln!(f, "e{l} + e{r}")?,
                        BinaryOp::Sub => writeln!(f, "e{l} - e{r}")?,
                        BinaryOp::Mul => writeln!(f, "e{l} * e{r}")?,
                        BinaryOp::Div => writeln!(f, "e{l} / e{r}")?,
                        BinaryOp::Min => writeln!(f, "min(e{l}, e{r})")?,
                        BinaryOp::Max => writeln!(f, "max(e{l}, e{r})")?,
                    }
                }
            }
        }
        write!(f, "  out =")?;
        for root in &self.outputs {
            write!(f, " e{}", root.index())?;
        }
        Ok(())
    }
}
