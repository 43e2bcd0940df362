//! SIMD row kernel for the model (flux-only) pass.
//!
//! Uses `wide::f32x8` across 8 consecutive pixels of one row. The
//! exponential is evaluated lane-by-lane with scalar `f32::exp()`, skipping
//! lanes past the cutoff, so truncation decisions (and therefore results)
//! are bit-identical to the scalar path. Radius pruning is applied per
//! 8-pixel chunk using the chunk's nearest lane, which can only skip chunks
//! whose every lane is past the cutoff anyway.

use wide::f32x8;

use sf_core::limits::MAX_EXP_ARG;

use crate::gaussian::GaussianBlock;
use crate::pixel;

const LANES: usize = 8;

/// Masked lane-by-lane `exp(-0.5*y)`: lanes with `y > MAX_EXP_ARG` produce
/// exactly `0.0` without calling `exp()`.
#[inline(always)]
fn exp_neg_half_masked(y: [f32; LANES]) -> f32x8 {
    f32x8::from(y.map(|v| if v > MAX_EXP_ARG { 0.0 } else { (-0.5 * v).exp() }))
}

/// Fill `out` with model counts for one pixel row starting at `(x0, y)`.
///
/// Dispatches to SIMD when the platform supports it; the scalar path is the
/// per-pixel evaluator and both produce identical results.
pub fn row_model_simd(block: &GaussianBlock, x0: f32, y: f32, prune: bool, out: &mut [f32]) {
    if !use_simd() {
        row_model_scalar(block, x0, y, prune, out);
        return;
    }

    let n = out.len();
    let chunks = n / LANES;
    let remainder = n % LANES;

    let radii = block.radii();
    let lane_offsets: [f32; LANES] = std::array::from_fn(|k| k as f32);
    let lanes = f32x8::from(lane_offsets);

    for c in 0..chunks {
        let xbase = x0 + (c * LANES) as f32;
        let xs = f32x8::splat(xbase) + lanes;
        let mut acc = f32x8::ZERO;

        for (g, &bin) in block.records().iter().zip(block.radius_bins()) {
            let dy = y - g.ycen;
            if prune {
                // Nearest lane of the chunk; if even it cannot reach the
                // record, no lane can.
                let dx_near = if g.xcen < xbase {
                    xbase - g.xcen
                } else if g.xcen > xbase + (LANES - 1) as f32 {
                    g.xcen - (xbase + (LANES - 1) as f32)
                } else {
                    0.0
                };
                if dx_near * dx_near + dy * dy > radii.radius_sq(bin) {
                    continue;
                }
            }

            let dx = xs - f32x8::splat(g.xcen);
            let dyv = f32x8::splat(dy);
            let vx = f32x8::splat(g.fxx) * dx + f32x8::splat(g.fxy) * dyv;
            let vy = f32x8::splat(g.fyy) * dyv + f32x8::splat(g.fxy) * dx;
            let yarg = dx * vx + dyv * vy;
            let gp = exp_neg_half_masked(yarg.into());
            acc += f32x8::splat(g.amp) * gp;
        }

        let arr: [f32; LANES] = acc.into();
        out[c * LANES..(c + 1) * LANES].copy_from_slice(&arr);
    }

    let start = chunks * LANES;
    for j in start..start + remainder {
        out[j] = pixel::pixel_model(block, x0 + j as f32, y, prune);
    }
}

/// Scalar reference implementation (same interface as the SIMD version).
pub fn row_model_scalar(block: &GaussianBlock, x0: f32, y: f32, prune: bool, out: &mut [f32]) {
    for (j, slot) in out.iter_mut().enumerate() {
        *slot = pixel::pixel_model(block, x0 + j as f32, y, prune);
    }
}

/// Check if SIMD should be used on the current platform.
#[inline(always)]
fn use_simd() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        is_x86_feature_detected!("avx2")
    }
    #[cfg(target_arch = "aarch64")]
    {
        // NEON is always available on aarch64
        true
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}
