//! Per-pixel evaluation of a block's image Gaussians.
//!
//! For each record the exponential argument is the quadratic form
//! `Y = dx·vx + dy·vy` with `vx = fxx·dx + fxy·dy`, `vy = fyy·dy + fxy·dx`.
//! Records with `Y > MAX_EXP_ARG` contribute exactly zero and skip the
//! exponential; the comparison is strict, so the boundary value is included.
//! Gradient accumulation folds the local chain-rule terms with the record's
//! propagation factors into the owning source's seven slots.

use sf_core::limits::{MAX_EXP_ARG, NPARAMS};
use sf_core::types::Param;

use crate::accum::AccumulatorBank;
use crate::gaussian::GaussianBlock;

/// Model counts at one pixel: the sum over every in-range record.
///
/// `prune` additionally skips records whose truncation radius cannot reach
/// the pixel; this reproduces the cutoff decision exactly.
pub fn pixel_model(block: &GaussianBlock, x: f32, y: f32, prune: bool) -> f32 {
    let radii = block.radii();
    let mut model = 0.0f32;
    for (g, &bin) in block.records().iter().zip(block.radius_bins()) {
        let dx = x - g.xcen;
        let dy = y - g.ycen;
        if prune && dx * dx + dy * dy > radii.radius_sq(bin) {
            continue;
        }
        let vx = g.fxx * dx + g.fxy * dy;
        let vy = g.fyy * dy + g.fxy * dx;
        let yarg = dx * vx + dy * vy;
        if yarg > MAX_EXP_ARG {
            continue;
        }
        model += g.amp * (-0.5 * yarg).exp();
    }
    model
}

/// Evaluate one pixel and accumulate `scale · d(model)/dθ` for every active
/// source into `bank`, returning the pixel's model counts.
///
/// `scale = 1` gives the flux gradient; the proposal path passes the
/// per-pixel residual weight `-2·(data−model)·ierr²` instead. Updates are
/// additive only, into the caller-provided bank; the block-total slot is the
/// caller's responsibility.
pub fn pixel_model_and_gradient(
    block: &GaussianBlock,
    x: f32,
    y: f32,
    scale: f32,
    prune: bool,
    bank: &mut AccumulatorBank,
) -> f32 {
    let radii = block.radii();
    let records = block.records();
    let bins = block.radius_bins();
    let mut model = 0.0f32;
    for (isrc, &(start, end)) in block.spans().iter().enumerate() {
        let base = isrc * NPARAMS;
        for k in start as usize..end as usize {
            let g = &records[k];
            let dx = x - g.xcen;
            let dy = y - g.ycen;
            if prune && dx * dx + dy * dy > radii.radius_sq(bins[k]) {
                continue;
            }
            let vx = g.fxx * dx + g.fxy * dy;
            let vy = g.fyy * dy + g.fxy * dx;
            let yarg = dx * vx + dy * vy;
            if yarg > MAX_EXP_ARG {
                continue;
            }
            let gp = (-0.5 * yarg).exp();
            let c = g.amp * gp;
            model += c;

            // Local chain-rule terms, then the record's propagation factors.
            let s_gp = scale * gp;
            let s_c = scale * c;
            let dc_dx = s_c * vx;
            let dc_dy = s_c * vy;
            let dc_dfxx = -0.5 * s_c * dx * dx;
            let dc_dfyy = -0.5 * s_c * dy * dy;
            let dc_dfxy = -s_c * dx * dy;

            bank.add(base + Param::Flux as usize, s_gp * g.da_dflux);
            bank.add(base + Param::Ra as usize, dc_dx * g.dx_dalpha + dc_dy * g.dy_dalpha);
            bank.add(base + Param::Dec as usize, dc_dx * g.dx_ddelta + dc_dy * g.dy_ddelta);
            bank.add(
                base + Param::Q as usize,
                s_gp * g.da_dq + dc_dfxx * g.dfxx_dq + dc_dfyy * g.dfyy_dq + dc_dfxy * g.dfxy_dq,
            );
            bank.add(
                base + Param::Pa as usize,
                s_gp * g.da_dpa
                    + dc_dfxx * g.dfxx_dpa
                    + dc_dfyy * g.dfyy_dpa
                    + dc_dfxy * g.dfxy_dpa,
            );
            bank.add(base + Param::Sersic as usize, s_gp * g.da_dsersic);
            bank.add(base + Param::Rh as usize, s_gp * g.da_drh);
        }
    }
    model
}
