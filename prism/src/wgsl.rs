/*! WGSL compute backend.

Prints a [`Kernel`](crate::Kernel) as a single compute shader that reads
and writes one storage buffer in place. Every invocation owns exactly one
pixel, so the in-place update is race-free, and one `let` binding per
arena entry keeps the emitted source in evaluation order, the same order
the CPU evaluator uses.

Identifiers are all synthetic (`e0`, `e1`, …), so the writer needs no
reserved-word escaping.
*/

use std::fmt::Write as _;

use crate::{BinaryOp, Expression, Kernel, ValidationError};

/// Workgroup edge length; dispatch tiles the image in 16×16 blocks.
pub const WORKGROUP_SIZE: u32 = 16;

/// Entry point name of the emitted shader.
pub const ENTRY_POINT: &str = "main";

/// Emits the compute shader for `kernel`.
///
/// The shader binds `@group(0) @binding(0)` as the interleaved `f32`
/// pixel storage and `@group(0) @binding(1)` as a uniform carrying the
/// image extent. Fails only if the kernel does not validate.
pub fn write_kernel(kernel: &Kernel) -> Result<String, ValidationError> {
    kernel.validate()?;

    let channels = u32::from(kernel.channel_count());
    let mut out = String::with_capacity(512 + kernel.expressions().len() * 32);

    out.push_str(
        "struct KernelParams {\n\
         \x20   width: u32,\n\
         \x20   height: u32,\n\
         \x20   _pad0: u32,\n\
         \x20   _pad1: u32,\n\
         }\n\n\
         @group(0) @binding(0) var<storage, read_write> pixels: array<f32>;\n\
         @group(0) @binding(1) var<uniform> params: KernelParams;\n\n",
    );
    let _ = writeln!(
        out,
        "@compute @workgroup_size({WORKGROUP_SIZE}, {WORKGROUP_SIZE}, 1)"
    );
    out.push_str("fn main(@builtin(global_invocation_id) id: vec3<u32>) {\n");
    out.push_str("    if id.x >= params.width || id.y >= params.height {\n        return;\n    }\n");
    let _ = writeln!(
        out,
        "    let base = (id.y * params.width + id.x) * {channels}u;"
    );

    for (index, expression) in kernel.expressions().iter().enumerate() {
        let _ = write!(out, "    let e{index}: f32 = ");
        match *expression {
            Expression::Channel(c) => {
                let _ = write!(out, "pixels[base + {c}u]");
            }
            Expression::Literal(value) => {
                // `{:?}` prints the shortest representation that parses
                // back to the same f32, which WGSL's decimal literal
                // rules reproduce exactly.
                let _ = write!(out, "{value:?}");
            }
            Expression::Binary { op, left, right } => {
                let l = left.index();
                let r = right.index();
                match op {
                    BinaryOp::Add => {
                        let _ = write!(out, "e{l} + e{r}");
                    }
                    BinaryOp::Sub => {
                        let _ = write!(out, "e{l} - e{r}");
                    }
                    BinaryOp::Mul => {
                        let _ = write!(out, "e{l} * e{r}");
                    }
                    BinaryOp::Div => {
                        let _ = write!(out, "e{l} / e{r}");
                    }
                    BinaryOp::Min => {
                        let _ = write!(out, "min(e{l}, e{r})");
                    }
                    BinaryOp::Max => {
                        let _ = write!(out, "max(e{l}, e{r})");
                    }
                }
            }
        }
        out.push_str(";\n");
    }

    for (c, root) in kernel.outputs().iter().enumerate() {
        let _ = writeln!(out, "    pixels[base + {c}u] = e{};", root.index());
    }
    out.push_str("}\n");

    log::trace!(
        "emitted WGSL kernel: {} expressions, {} channels",
        kernel.expressions().len(),
        channels
    );
    Ok(out)
}

/// Number of workgroups needed to cover `extent` pixels along one axis.
#[must_use]
pub const fn dispatch_extent(extent: u32) -> u32 {
    extent.div_ceil(WORKGROUP_SIZE)
}
