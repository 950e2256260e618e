//! Unboxed slots for numeric queues.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::Slot;

/// A number that round-trips through a `u64` bit pattern.
pub trait Primitive: Copy + Send + Sync + fmt::Debug + 'static {
    /// Raw bits.
    fn to_bits(self) -> u64;
    /// Value from raw bits produced by [`to_bits`](Self::to_bits).
    fn from_bits(bits: u64) -> Self;
}

impl Primitive for i32 {
    fn to_bits(self) -> u64 {
        u64::from(self as u32)
    }
    fn from_bits(bits: u64) -> Self {
        bits as u32 as Self
    }
}

impl Primitive for i64 {
    fn to_bits(self) -> u64 {
        self as u64
    }
    fn from_bits(bits: u64) -> Self {
        bits as Self
    }
}

impl Primitive for u32 {
    fn to_bits(self) -> u64 {
        u64::from(self)
    }
    fn from_bits(bits: u64) -> Self {
        bits as Self
    }
}

impl Primitive for u64 {
    fn to_bits(self) -> u64 {
        self
    }
    fn from_bits(bits: u64) -> Self {
        bits
    }
}

impl Primitive for f32 {
    fn to_bits(self) -> u64 {
        u64::from(Self::to_bits(self))
    }
    fn from_bits(bits: u64) -> Self {
        Self::from_bits(bits as u32)
    }
}

impl Primitive for f64 {
    fn to_bits(self) -> u64 {
        Self::to_bits(self)
    }
    fn from_bits(bits: u64) -> Self {
        Self::from_bits(bits)
    }
}

/// Slot holding a primitive as raw bits plus an occupancy flag.
pub struct PrimitiveSlot<P> {
    bits: AtomicU64,
    full: AtomicBool,
    _marker: PhantomData<fn() -> P>,
}

impl<P: Primitive> Slot<P> for PrimitiveSlot<P> {
    fn empty() -> Self {
        Self {
            bits: AtomicU64::new(0),
            full: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    fn put(&self, value: P) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
        self.full.store(true, Ordering::Release);
    }

    fn get(&self) -> Option<P> {
        if self.full.load(Ordering::Acquire) {
            Some(P::from_bits(self.bits.load(Ordering::Relaxed)))
        } else {
            None
        }
    }

    fn take(&self) -> Option<P> {
        if self.full.swap(false, Ordering::AcqRel) {
            Some(P::from_bits(self.bits.load(Ordering::Relaxed)))
        } else {
            None
        }
    }
}

impl<P: Primitive> fmt::Debug for PrimitiveSlot<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrimitiveSlot").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_patterns_round_trip() {
        assert_eq!(<i32 as Primitive>::from_bits(Primitive::to_bits(-7_i32)), -7);
        assert_eq!(<i64 as Primitive>::from_bits(Primitive::to_bits(i64::MIN)), i64::MIN);
        assert_eq!(<u32 as Primitive>::from_bits(Primitive::to_bits(u32::MAX)), u32::MAX);
        let nan = <f64 as Primitive>::from_bits(Primitive::to_bits(f64::NAN));
        assert!(nan.is_nan());
        assert_eq!(<f32 as Primitive>::from_bits(Primitive::to_bits(-0.5_f32)), -0.5);
    }

    #[test]
    fn negative_i32_does_not_sign_extend() {
        assert_eq!(Primitive::to_bits(-1_i32), u64::from(u32::MAX));
    }

    #[test]
    fn slot_occupancy() {
        let slot = PrimitiveSlot::<f64>::empty();
        assert_eq!(slot.get(), None);
        slot.put(2.5);
        assert_eq!(slot.get(), Some(2.5));
        assert_eq!(slot.take(), Some(2.5));
        assert_eq!(slot.take(), None);
    }
}
