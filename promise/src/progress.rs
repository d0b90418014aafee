//! Fixed-point progress values and the weighted aggregator used by
//! combinators.
//!
//! Progress is kept as a `u32` with 16 fractional bits so that summing the
//! contributions of many inputs never drifts the way repeated `f32`
//! additions do. A pending promise is capped one step below [`Fixed::ONE`];
//! only resolution reports a full `1.0`.

const FRACTION_BITS: u32 = 16;

/// Progress in `[0, 1]` with 16 fractional bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Fixed(u32);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);
    pub const ONE: Fixed = Fixed(1 << FRACTION_BITS);
    /// Largest value a pending promise may report.
    pub const PENDING_MAX: Fixed = Fixed((1 << FRACTION_BITS) - 1);

    /// Converts a validated `[0, 1]` float, rounding down.
    pub fn from_f32(value: f32) -> Self {
        let clamped = value.clamp(0.0, 1.0);
        Fixed((clamped * Self::ONE.0 as f32) as u32).min(Self::ONE)
    }

    pub fn from_raw(raw: u32) -> Self {
        Fixed(raw.min(Self::ONE.0))
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn to_f32(self) -> f32 {
        self.0 as f32 / Self::ONE.0 as f32
    }

    /// Caps the value for a promise that has not resolved yet.
    pub fn pending(self) -> Self {
        self.min(Self::PENDING_MAX)
    }

    /// `(steps + self) / total`: progress of step `steps` inside an
    /// evenly weighted chain of `total` steps.
    pub fn within_chain(self, steps: usize, total: usize) -> Self {
        if total == 0 {
            return Self::ONE;
        }
        let numerator = steps as u64 * Self::ONE.0 as u64 + self.0 as u64;
        Fixed::from_raw((numerator / total as u64) as u32)
    }
}

/// Weighted sum of the progress of `N` inputs, each with weight `1/N`.
///
/// The total weight (`N * ONE`) is computed once at construction and every
/// update adjusts an integer numerator, so the aggregate is exact.
pub(crate) struct ProgressAccumulator {
    per_input: Vec<Fixed>,
    numerator: u64,
    inputs: u64,
}

impl ProgressAccumulator {
    pub fn new(inputs: usize) -> Self {
        Self {
            per_input: vec![Fixed::ZERO; inputs],
            numerator: 0,
            inputs: inputs.max(1) as u64,
        }
    }

    /// Raises input `index` to `value`. Returns the new aggregate if it
    /// increased; lower values are ignored so the aggregate stays monotone.
    pub fn update(&mut self, index: usize, value: Fixed) -> Option<Fixed> {
        let slot = self.per_input.get_mut(index)?;
        if value <= *slot {
            return None;
        }
        self.numerator += (value.raw() - slot.raw()) as u64;
        *slot = value;
        Some(self.aggregate())
    }

    /// Marks input `index` as fully done.
    pub fn complete(&mut self, index: usize) -> Option<Fixed> {
        self.update(index, Fixed::ONE)
    }

    pub fn aggregate(&self) -> Fixed {
        Fixed::from_raw((self.numerator / self.inputs) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_conversion_clamps() {
        assert_eq!(Fixed::from_f32(0.0), Fixed::ZERO);
        assert_eq!(Fixed::from_f32(1.0), Fixed::ONE);
        assert_eq!(Fixed::from_f32(2.0), Fixed::ONE);
        assert_eq!(Fixed::from_f32(-1.0), Fixed::ZERO);
        assert!((Fixed::from_f32(0.5).to_f32() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn pending_cap_is_below_one() {
        assert!(Fixed::ONE.pending() < Fixed::ONE);
        assert!(Fixed::ONE.pending().to_f32() < 1.0);
        assert_eq!(Fixed::from_f32(0.25).pending(), Fixed::from_f32(0.25));
    }

    #[test]
    fn thirds_sum_exactly() {
        let mut acc = ProgressAccumulator::new(3);
        acc.complete(0);
        acc.complete(1);
        let last = acc.complete(2).unwrap();
        assert_eq!(last, Fixed::ONE);
    }

    #[test]
    fn accumulator_is_monotone() {
        let mut acc = ProgressAccumulator::new(2);
        let a = acc.update(0, Fixed::from_f32(0.5)).unwrap();
        assert!(acc.update(0, Fixed::from_f32(0.25)).is_none());
        let b = acc.update(1, Fixed::from_f32(0.5)).unwrap();
        assert!(b > a);
        assert!((b.to_f32() - 0.5).abs() < 1e-3);
    }

    #[test]
    fn out_of_range_index_is_ignored() {
        let mut acc = ProgressAccumulator::new(1);
        assert!(acc.update(5, Fixed::ONE).is_none());
        assert_eq!(acc.aggregate(), Fixed::ZERO);
    }

    #[test]
    fn chain_progress() {
        let half = Fixed::from_f32(0.5);
        assert!((half.within_chain(1, 4).to_f32() - 0.375).abs() < 1e-3);
        assert_eq!(Fixed::ZERO.within_chain(4, 4), Fixed::ONE);
        assert_eq!(Fixed::ZERO.within_chain(0, 0), Fixed::ONE);
    }
}
