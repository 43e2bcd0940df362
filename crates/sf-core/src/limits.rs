//! Hard resource ceilings for the evaluation kernel.
//!
//! These are compile-time limits, not runtime capacities: every fixed-size
//! structure in the kernel is sized from them, and a caller that exceeds one
//! gets an [`Error::Capacity`](crate::Error::Capacity) before any evaluation
//! starts. The ceilings are dictated by the per-block shared-memory budget of
//! the reference GPU; exceeding them silently would corrupt unrelated memory
//! there, so they are enforced, never clipped.

/// Maximum number of imaging bands that may participate in a joint fit.
pub const MAX_BANDS: usize = 30;

/// Maximum number of simultaneously active sources in one evaluation call.
pub const MAX_SOURCES: usize = 30;

/// Number of on-sky parameters per source per band that yield derivatives.
///
/// Changing this also requires changing the packed image-Gaussian record
/// layout and the derivative propagation in the builder: the 21-float record
/// is derived from this count plus the fixed Gaussian geometry fields.
pub const NPARAMS: usize = 7;

/// Largest exponential argument `Y` (as in `exp(-0.5*Y)`) still evaluated.
///
/// Components with `Y > MAX_EXP_ARG` contribute exactly zero and skip the
/// transcendental. The comparison is strict, so the boundary value itself is
/// included. This is a deliberate numerical truncation, not an error.
pub const MAX_EXP_ARG: f32 = 36.0;

/// Default number of parallel accumulator banks per processing block.
///
/// More banks consume more of the block budget but reduce write contention
/// between concurrent workers. The count never changes results beyond
/// accumulation-order rounding.
pub const NUM_ACCUMS: usize = 1;

/// Capacity of the truncation-radius table.
pub const MAX_RADII: usize = 10;

/// Scalar fields in one packed image-Gaussian record.
pub const IMAGE_GAUSSIAN_FLOATS: usize = 21;

/// Slots in one accumulator bank: one gradient slot per (source, parameter)
/// pair plus one block-total slot.
pub const ACCUM_SLOTS: usize = NPARAMS * MAX_SOURCES + 1;

/// Per-block fast-memory budget, counted in 32-bit float slots (48 KB of
/// shared memory on the reference GPU).
///
/// The two big consumers are the image-Gaussian records
/// (`n_gaussians * IMAGE_GAUSSIAN_FLOATS`) and the accumulator banks
/// (`n_banks * ACCUM_SLOTS`); their sum must fit this budget.
pub const BLOCK_BUDGET_FLOATS: usize = 12_000;

/// Most PSF-mixture components a single source could ever carry: the block
/// budget with the default bank set and nothing else in it.
pub const MAX_PSF_PER_SOURCE: usize =
    (BLOCK_BUDGET_FLOATS - NUM_ACCUMS * ACCUM_SLOTS) / IMAGE_GAUSSIAN_FLOATS;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_counts() {
        assert_eq!(ACCUM_SLOTS, 211);
        assert!(NUM_ACCUMS >= 1);
        assert!(NUM_ACCUMS * ACCUM_SLOTS + IMAGE_GAUSSIAN_FLOATS <= BLOCK_BUDGET_FLOATS);
    }

    #[test]
    fn per_source_capacity_is_positive() {
        assert!(MAX_PSF_PER_SOURCE > 0);
        assert!(MAX_PSF_PER_SOURCE * IMAGE_GAUSSIAN_FLOATS <= BLOCK_BUDGET_FLOATS);
    }
}
