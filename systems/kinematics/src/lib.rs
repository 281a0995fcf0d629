#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Horizontal position update kernel.
//!
//! Every frame the scrolling items move left by `speed * factor` where the
//! factor folds elapsed seconds and the playback rate together. The update is
//! a pure streaming operation over columnar data, so it comes in two flavours
//! that agree to within floating-point rounding: a scalar reference loop and a
//! four-lane implementation over [`wide::f64x4`]. [`Kernel::new`] picks one
//! implementation up front and keeps it as a function pointer.

use danmaku_core::KernelMode;
use wide::f64x4;

/// Signature shared by every kernel implementation.
///
/// Arguments are the x column, the speed column, the per-row movable mask,
/// the movement factor, and the per-row changed flags to set.
pub type AdvanceFn = fn(&mut [f64], &[f64], &[bool], f64, &mut [bool]);

const LANES: usize = 4;

/// Position update strategy resolved once at construction.
#[derive(Clone, Copy, Debug)]
pub struct Kernel {
    requested: KernelMode,
    resolved: KernelMode,
    advance: AdvanceFn,
}

impl Kernel {
    /// Resolves the requested mode against the host CPU.
    ///
    /// `Auto` selects the wide implementation only when the host reports a
    /// native vector unit for it. Explicit requests are honoured as given.
    #[must_use]
    pub fn new(mode: KernelMode) -> Self {
        let resolved = match mode {
            KernelMode::Auto if wide_supported() => KernelMode::Wide,
            KernelMode::Auto => KernelMode::Scalar,
            explicit => explicit,
        };
        let advance: AdvanceFn = match resolved {
            KernelMode::Wide => advance_wide,
            KernelMode::Scalar | KernelMode::Auto => advance_scalar,
        };
        Self {
            requested: mode,
            resolved,
            advance,
        }
    }

    /// Kernel that always runs the scalar loop.
    #[must_use]
    pub fn scalar() -> Self {
        Self::new(KernelMode::Scalar)
    }

    /// Kernel that always runs the four-lane implementation.
    #[must_use]
    pub fn wide() -> Self {
        Self::new(KernelMode::Wide)
    }

    /// Mode that was asked for.
    #[must_use]
    pub const fn requested(&self) -> KernelMode {
        self.requested
    }

    /// Implementation actually in use, never `Auto`.
    #[must_use]
    pub const fn mode(&self) -> KernelMode {
        self.resolved
    }

    /// Moves every movable row left by `speed * factor` and marks it changed.
    pub fn advance(
        &self,
        x: &mut [f64],
        speed: &[f64],
        movable: &[bool],
        factor: f64,
        changed: &mut [bool],
    ) {
        (self.advance)(x, speed, movable, factor, changed);
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelMode::Auto)
    }
}

/// Reports whether the host exposes a vector unit the wide kernel maps onto.
#[must_use]
pub fn wide_supported() -> bool {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        std::arch::is_x86_feature_detected!("avx2")
    }
    #[cfg(target_arch = "aarch64")]
    {
        std::arch::is_aarch64_feature_detected!("neon")
    }
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}

fn common_len(x: &[f64], speed: &[f64], movable: &[bool], changed: &[bool]) -> usize {
    debug_assert_eq!(x.len(), speed.len());
    debug_assert_eq!(x.len(), movable.len());
    debug_assert_eq!(x.len(), changed.len());
    x.len()
        .min(speed.len())
        .min(movable.len())
        .min(changed.len())
}

/// Scalar reference implementation.
pub fn advance_scalar(
    x: &mut [f64],
    speed: &[f64],
    movable: &[bool],
    factor: f64,
    changed: &mut [bool],
) {
    let count = common_len(x, speed, movable, changed);
    for index in 0..count {
        if movable[index] {
            x[index] -= speed[index] * factor;
            changed[index] = true;
        }
    }
}

/// Four-lane implementation with a scalar tail.
///
/// Immovable lanes see a zero speed, so their position is rewritten unchanged.
pub fn advance_wide(
    x: &mut [f64],
    speed: &[f64],
    movable: &[bool],
    factor: f64,
    changed: &mut [bool],
) {
    let count = common_len(x, speed, movable, changed);
    let body = count - count % LANES;
    let factor_lanes = f64x4::splat(factor);

    let mut start = 0;
    while start < body {
        let end = start + LANES;
        let mut masked = [0.0; LANES];
        for (lane, value) in masked.iter_mut().enumerate() {
            if movable[start + lane] {
                *value = speed[start + lane];
                changed[start + lane] = true;
            }
        }
        let mut current = [0.0; LANES];
        current.copy_from_slice(&x[start..end]);

        let moved = f64x4::new(current) - f64x4::new(masked) * factor_lanes;
        x[start..end].copy_from_slice(&moved.to_array());
        start = end;
    }

    advance_scalar(
        &mut x[body..count],
        &speed[body..count],
        &movable[body..count],
        factor,
        &mut changed[body..count],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_modes_are_honoured() {
        assert_eq!(Kernel::scalar().mode(), KernelMode::Scalar);
        assert_eq!(Kernel::wide().mode(), KernelMode::Wide);
        assert_ne!(Kernel::default().mode(), KernelMode::Auto);
        assert_eq!(Kernel::default().requested(), KernelMode::Auto);
    }

    #[test]
    fn frozen_rows_do_not_move_or_change() {
        let mut x = [100.0, 200.0, 300.0, 400.0, 500.0];
        let speed = [150.0; 5];
        let movable = [true, false, true, false, true];
        let mut changed = [false; 5];
        Kernel::wide().advance(&mut x, &speed, &movable, 0.5, &mut changed);
        assert_eq!(x, [25.0, 200.0, 225.0, 400.0, 425.0]);
        assert_eq!(changed, movable);
    }

    #[test]
    fn zero_factor_still_marks_movable_rows() {
        let mut x = [10.0, 20.0];
        let mut changed = [false; 2];
        advance_scalar(&mut x, &[120.0, 130.0], &[true, true], 0.0, &mut changed);
        assert_eq!(x, [10.0, 20.0]);
        assert_eq!(changed, [true, true]);
    }
}
