//! The shared region: a fixed metadata record and a replaceable
//! positions buffer, both addressable from the driver and the executor.
//!
//! Every access goes through an atomic. Metadata fields use `SeqCst`; the
//! positions buffer uses `Relaxed` element access because its contents are
//! published through the metadata flags and the message channel, both of
//! which establish happens-before on their own.
//!
//! Field ownership is by convention, not by lock: the executor writes
//! `EntityCount`, `Timestep`, sets `ResizeFlag` and clears it after
//! rebinding; the driver writes `Capacity` and `PauseFlag`. The driver never
//! clears `ResizeFlag`: an acknowledgement can arrive after the executor has
//! already raised the next fence.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Scalars stored per entity (x, y, z).
pub const COORDS_PER_ENTITY: usize = 3;

/// Largest entity count a [`PositionBuffer`] can be sized for without its
/// allocation exceeding `isize::MAX` bytes.
pub const MAX_ENTITIES: usize =
    isize::MAX as usize / (COORDS_PER_ENTITY * std::mem::size_of::<AtomicU64>());

/// One field of the [`MetadataRecord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetaField {
    /// Live entity count as of the last publish.
    EntityCount,
    /// Engine timestep as of the last publish.
    Timestep,
    /// Entities the current positions buffer can hold.
    Capacity,
    /// 1 while the driver wants the executor parked between steps.
    PauseFlag,
    /// 1 while a resize handshake fences the positions buffer.
    ResizeFlag,
}

impl MetaField {
    /// All fields, in storage order.
    pub const ALL: [MetaField; 5] = [
        MetaField::EntityCount,
        MetaField::Timestep,
        MetaField::Capacity,
        MetaField::PauseFlag,
        MetaField::ResizeFlag,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Wire name of the field.
    pub fn name(self) -> &'static str {
        match self {
            Self::EntityCount => "entityCount",
            Self::Timestep => "timestep",
            Self::Capacity => "capacity",
            Self::PauseFlag => "pauseFlag",
            Self::ResizeFlag => "resizeFlag",
        }
    }
}

impl fmt::Display for MetaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-size scalar counters and flags shared by both contexts.
///
/// Lives for the whole simulation instance. Padded to 128 bytes so the
/// executor's per-step stores do not share a cache line with unrelated
/// driver data.
///
/// Invariant: `entity_count <= capacity` whenever `resize_flag == 0`.
#[repr(align(128))]
pub struct MetadataRecord {
    fields: [AtomicU64; 5],
}

// Compile-time assertion: MetadataRecord must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<MetadataRecord>();
};

impl MetadataRecord {
    /// Create a record for a positions buffer holding `capacity` entities.
    /// All other fields start at 0.
    pub fn new(capacity: u64) -> Self {
        let record = Self {
            fields: std::array::from_fn(|_| AtomicU64::new(0)),
        };
        record.store(MetaField::Capacity, capacity);
        record
    }

    /// Sequentially consistent load.
    pub fn load(&self, field: MetaField) -> u64 {
        self.fields[field.index()].load(Ordering::SeqCst)
    }

    /// Sequentially consistent store.
    pub fn store(&self, field: MetaField, value: u64) {
        self.fields[field.index()].store(value, Ordering::SeqCst);
    }

    /// Sequentially consistent compare-and-swap. Returns the previous value
    /// in both arms, like [`AtomicU64::compare_exchange`].
    pub fn compare_exchange(&self, field: MetaField, current: u64, new: u64) -> Result<u64, u64> {
        self.fields[field.index()].compare_exchange(
            current,
            new,
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
    }

    /// Current entity count.
    pub fn entity_count(&self) -> u64 {
        self.load(MetaField::EntityCount)
    }

    /// Current timestep.
    pub fn timestep(&self) -> u64 {
        self.load(MetaField::Timestep)
    }

    /// Current capacity in entities.
    pub fn capacity(&self) -> u64 {
        self.load(MetaField::Capacity)
    }

    /// Whether the pause flag is raised.
    pub fn is_paused(&self) -> bool {
        self.load(MetaField::PauseFlag) != 0
    }

    /// Whether a resize currently fences the positions buffer.
    pub fn resize_in_progress(&self) -> bool {
        self.load(MetaField::ResizeFlag) != 0
    }

    /// Copy every field. Fields are read one by one, so the copy is not a
    /// consistent cut if the executor is publishing concurrently.
    pub fn snapshot(&self) -> MetadataSnapshot {
        MetadataSnapshot {
            entity_count: self.entity_count(),
            timestep: self.timestep(),
            capacity: self.capacity(),
            paused: self.is_paused(),
            resizing: self.resize_in_progress(),
        }
    }
}

impl fmt::Debug for MetadataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.snapshot(), f)
    }
}

/// Plain copy of a [`MetadataRecord`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetadataSnapshot {
    /// `EntityCount` field.
    pub entity_count: u64,
    /// `Timestep` field.
    pub timestep: u64,
    /// `Capacity` field.
    pub capacity: u64,
    /// `PauseFlag` field, as a bool.
    pub paused: bool,
    /// `ResizeFlag` field, as a bool.
    pub resizing: bool,
}

/// Driver-facing positions, three `f64` per entity.
///
/// Stored as `f64` bit patterns in `AtomicU64` cells so both threads can
/// touch the same allocation safely. The buffer never changes size: growth
/// builds a new buffer with [`grow_from`](Self::grow_from) and the new
/// `Arc` replaces the old one.
pub struct PositionBuffer {
    data: Box<[AtomicU64]>,
    capacity: usize,
}

// Compile-time assertion: PositionBuffer must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<PositionBuffer>();
};

impl PositionBuffer {
    /// Allocate a zeroed buffer for `entities` entities.
    ///
    /// Panics if the allocation fails; use
    /// [`try_with_capacity`](Self::try_with_capacity) for sizes that come
    /// from the engine.
    pub fn with_capacity(entities: usize) -> Self {
        let data = (0..entities.saturating_mul(COORDS_PER_ENTITY))
            .map(|_| AtomicU64::new(0f64.to_bits()))
            .collect();
        Self {
            data,
            capacity: entities,
        }
    }

    /// Allocate a zeroed buffer, or `None` if `entities` exceeds
    /// [`MAX_ENTITIES`] or the allocator refuses.
    pub fn try_with_capacity(entities: usize) -> Option<Self> {
        if entities > MAX_ENTITIES {
            return None;
        }
        let len = entities.checked_mul(COORDS_PER_ENTITY)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).ok()?;
        data.extend((0..len).map(|_| AtomicU64::new(0f64.to_bits())));
        Some(Self {
            data: data.into_boxed_slice(),
            capacity: entities,
        })
    }

    /// Fallible [`grow_from`](Self::grow_from).
    pub fn try_grow_from(old: &PositionBuffer, entities: usize) -> Option<Self> {
        let new = Self::try_with_capacity(entities)?;
        new.copy_prefix(old);
        Some(new)
    }

    /// Allocate a buffer for `entities` entities and copy the overlapping
    /// prefix of `old` into it.
    pub fn grow_from(old: &PositionBuffer, entities: usize) -> Self {
        let new = Self::with_capacity(entities);
        new.copy_prefix(old);
        new
    }

    fn copy_prefix(&self, old: &PositionBuffer) {
        let overlap = old.len().min(self.len());
        for (dst, src) in self.data[..overlap].iter().zip(&old.data[..overlap]) {
            dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    /// Capacity in entities.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Length in scalars (`capacity * 3`).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no scalars.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read one scalar.
    pub fn get(&self, index: usize) -> Option<f64> {
        self.data
            .get(index)
            .map(|cell| f64::from_bits(cell.load(Ordering::Relaxed)))
    }

    /// Write one scalar. Returns `false` if `index` is out of range.
    pub fn set(&self, index: usize, value: f64) -> bool {
        match self.data.get(index) {
            Some(cell) => {
                cell.store(value.to_bits(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Widen `src` from `f32` and write it from index 0.
    ///
    /// Returns the number of scalars written, which is `src.len()` unless
    /// the buffer is shorter.
    pub fn write_widened(&self, src: &[f32]) -> usize {
        let n = src.len().min(self.data.len());
        for (cell, &v) in self.data[..n].iter().zip(src) {
            cell.store(f64::from(v).to_bits(), Ordering::Relaxed);
        }
        n
    }

    /// The three coordinates of entity `i`.
    pub fn entity(&self, i: usize) -> Option<[f64; 3]> {
        let base = i.checked_mul(COORDS_PER_ENTITY)?;
        Some([self.get(base)?, self.get(base + 1)?, self.get(base + 2)?])
    }

    /// Copy the first `entities` entities out as a flat vector.
    pub fn to_vec(&self, entities: usize) -> Vec<f64> {
        let n = entities
            .saturating_mul(COORDS_PER_ENTITY)
            .min(self.data.len());
        self.data[..n]
            .iter()
            .map(|cell| f64::from_bits(cell.load(Ordering::Relaxed)))
            .collect()
    }
}

impl fmt::Debug for PositionBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PositionBuffer")
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_only_sets_capacity() {
        let md = MetadataRecord::new(100_000);
        assert_eq!(
            md.snapshot(),
            MetadataSnapshot {
                entity_count: 0,
                timestep: 0,
                capacity: 100_000,
                paused: false,
                resizing: false,
            }
        );
    }

    #[test]
    fn fields_are_independent() {
        let md = MetadataRecord::new(10);
        for (i, field) in MetaField::ALL.iter().enumerate() {
            md.store(*field, i as u64 + 100);
        }
        for (i, field) in MetaField::ALL.iter().enumerate() {
            assert_eq!(md.load(*field), i as u64 + 100, "field {field}");
        }
    }

    #[test]
    fn compare_exchange_serializes_resize_start() {
        let md = MetadataRecord::new(10);
        assert_eq!(md.compare_exchange(MetaField::ResizeFlag, 0, 1), Ok(0));
        assert_eq!(md.compare_exchange(MetaField::ResizeFlag, 0, 1), Err(1));
        assert!(md.resize_in_progress());
    }

    #[test]
    fn record_is_cache_line_aligned() {
        assert!(std::mem::align_of::<MetadataRecord>() >= 128);
    }

    #[test]
    fn buffer_starts_zeroed() {
        let buf = PositionBuffer::with_capacity(4);
        assert_eq!(buf.capacity(), 4);
        assert_eq!(buf.len(), 12);
        assert!(buf.to_vec(4).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn write_widened_converts_precision() {
        let buf = PositionBuffer::with_capacity(2);
        let written = buf.write_widened(&[1.5f32, -2.25, 0.1, 3.0, 4.0, 5.0]);
        assert_eq!(written, 6);
        assert_eq!(buf.entity(0), Some([1.5, -2.25, f64::from(0.1f32)]));
        assert_eq!(buf.entity(1), Some([3.0, 4.0, 5.0]));
        assert_eq!(buf.entity(2), None);
    }

    #[test]
    fn write_widened_truncates_to_buffer() {
        let buf = PositionBuffer::with_capacity(1);
        assert_eq!(buf.write_widened(&[1.0; 9]), 3);
    }

    #[test]
    fn set_out_of_range_is_rejected() {
        let buf = PositionBuffer::with_capacity(1);
        assert!(buf.set(2, 7.0));
        assert!(!buf.set(3, 7.0));
        assert_eq!(buf.get(2), Some(7.0));
        assert_eq!(buf.get(3), None);
    }

    #[test]
    fn grow_preserves_prefix_and_zeroes_tail() {
        let old = PositionBuffer::with_capacity(2);
        old.write_widened(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let new = PositionBuffer::grow_from(&old, 4);
        assert_eq!(new.capacity(), 4);
        assert_eq!(new.to_vec(2), old.to_vec(2));
        assert_eq!(new.entity(3), Some([0.0, 0.0, 0.0]));
    }

    #[test]
    fn oversized_buffer_is_refused() {
        assert!(PositionBuffer::try_with_capacity(MAX_ENTITIES + 1).is_none());
        assert!(PositionBuffer::try_with_capacity(usize::MAX).is_none());
        let old = PositionBuffer::with_capacity(1);
        assert!(PositionBuffer::try_grow_from(&old, usize::MAX / 2).is_none());
    }

    #[test]
    fn try_grow_matches_grow() {
        let old = PositionBuffer::with_capacity(2);
        old.write_widened(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let new = PositionBuffer::try_grow_from(&old, 3).expect("small buffer allocates");
        assert_eq!(new.capacity(), 3);
        assert_eq!(new.to_vec(3), PositionBuffer::grow_from(&old, 3).to_vec(3));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn grow_copies_overlap(
                values in prop::collection::vec(-1.0e6f32..1.0e6, 0..96),
                new_capacity in 0usize..64,
            ) {
                let old_capacity = values.len() / COORDS_PER_ENTITY + 1;
                let old = PositionBuffer::with_capacity(old_capacity);
                old.write_widened(&values);
                let new = PositionBuffer::grow_from(&old, new_capacity);

                let overlap = old.len().min(new.len());
                for i in 0..overlap {
                    prop_assert_eq!(new.get(i), old.get(i));
                }
                for i in overlap..new.len() {
                    prop_assert_eq!(new.get(i), Some(0.0));
                }
            }
        }
    }
}
