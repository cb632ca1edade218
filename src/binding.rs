use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::warn;

use crate::image::{ProcessImage, SlotId};
use crate::scalar::{ScalarType, Variant};
use crate::ua::{DataValue, NodeId, StatusCode};

/// Locks here guard plain data; a panicked holder leaves nothing
/// half-applied that the next holder cannot see, so poisoning is stripped.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One exposed variable: the address-space node, the image slot behind it,
/// the declared scalar type, and the shadow cell all reads are served from.
///
/// The declared type is fixed for the binding's lifetime. The shadow cell
/// is the only source reads consult; the image slot is the only sink writes
/// land in. [`Binding::apply_write`] and [`Binding::refresh_from`] keep the
/// two coherent.
pub struct Binding {
    pub node_id: NodeId,
    pub slot: SlotId,
    pub ty: ScalarType,
    shadow: Mutex<Variant>,
}

impl Binding {
    #[must_use]
    pub fn new(node_id: NodeId, slot: SlotId, ty: ScalarType) -> Self {
        Self {
            node_id,
            slot,
            ty,
            shadow: Mutex::new(ty.zero()),
        }
    }

    /// The most recently published (or written) value.
    #[must_use]
    pub fn shadow(&self) -> Variant {
        *lock_unpoisoned(&self.shadow)
    }

    /// Serve a read from the shadow cell. Never touches the live image and
    /// never takes the scan lock.
    #[must_use]
    pub fn read(&self) -> DataValue {
        DataValue::good(self.shadow())
    }

    /// Apply a client write: exact type match, then image pointee and
    /// shadow both updated under a single scan-lock tenure so a concurrent
    /// publish cannot observe a half-applied write.
    pub fn apply_write(&self, image: &Mutex<ProcessImage>, value: &DataValue) -> StatusCode {
        let Some(value) = value.value else {
            return StatusCode::BAD_TYPE_MISMATCH;
        };
        if value.scalar_type() != self.ty {
            return StatusCode::BAD_TYPE_MISMATCH;
        }

        let mut image = lock_unpoisoned(image);
        if let Err(err) = image.set(self.slot, value.to_raw()) {
            warn!("write to {} lost its slot: {err}", self.slot);
            return StatusCode::BAD_INTERNAL_ERROR;
        }
        *lock_unpoisoned(&self.shadow) = value;
        StatusCode::GOOD
    }

    /// Copy the slot's current value into the shadow. The caller holds the
    /// scan lock and passes the guarded image down.
    pub(crate) fn refresh_from(&self, image: &ProcessImage) -> Option<Variant> {
        let value = Variant::from_raw(self.ty, image.get(self.slot)?)?;
        *lock_unpoisoned(&self.shadow) = value;
        Some(value)
    }
}

/// Bindings of one server lifetime, ordered by numeric node id.
///
/// The numeric id doubles as the node context handed to the stack, so a
/// callback resolves its binding with one lookup here; contexts from an
/// earlier lifetime simply miss.
#[derive(Default)]
pub struct BindingSet {
    map: BTreeMap<u32, Arc<Binding>>,
}

impl BindingSet {
    /// Register a binding. Returns `false` (without replacing) when the
    /// node id is already taken.
    pub fn insert(&mut self, binding: Arc<Binding>) -> bool {
        let numeric = binding.node_id.numeric;
        if self.map.contains_key(&numeric) {
            return false;
        }
        self.map.insert(numeric, binding);
        true
    }

    #[must_use]
    pub fn get(&self, context: u64) -> Option<&Arc<Binding>> {
        let numeric = u32::try_from(context).ok()?;
        self.map.get(&numeric)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Snapshot of all bindings in node-id order, for the publisher.
    #[must_use]
    pub fn arcs(&self) -> Vec<Arc<Binding>> {
        self.map.values().cloned().collect()
    }

    /// Drop all bindings, returning how many are still referenced outside
    /// the set. Anything nonzero after a stop is a leak to report.
    pub fn release(&mut self) -> usize {
        let leaked = self
            .map
            .values()
            .filter(|binding| Arc::strong_count(binding) > 1)
            .count();
        self.map.clear();
        leaked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;

    fn image_with(token: &str) -> (Mutex<ProcessImage>, SlotId) {
        let slot = SlotId::from(Location::parse(token).unwrap());
        let mut image = ProcessImage::new();
        image.allocate(slot).unwrap();
        (Mutex::new(image), slot)
    }

    #[test]
    fn reads_come_from_the_shadow_not_the_image() {
        let (image, slot) = image_with("%IW5");
        let binding = Binding::new(NodeId::new(2, 4_000_000), slot, ScalarType::UInt16);

        lock_unpoisoned(&image)
            .set(slot, crate::scalar::RawValue::Word(0xBEEF))
            .unwrap();
        // Not yet published: the shadow still holds the initial zero.
        assert_eq!(binding.read(), DataValue::good(Variant::UInt16(0)));

        binding.refresh_from(&lock_unpoisoned(&image)).unwrap();
        assert_eq!(binding.read(), DataValue::good(Variant::UInt16(0xBEEF)));
    }

    #[test]
    fn writes_update_image_and_shadow_together() {
        let (image, slot) = image_with("%QX0.1");
        let binding = Binding::new(NodeId::new(2, 4_000_000), slot, ScalarType::Boolean);

        let status = binding.apply_write(&image, &DataValue::good(Variant::Boolean(true)));
        assert_eq!(status, StatusCode::GOOD);
        assert_eq!(binding.shadow(), Variant::Boolean(true));
        assert_eq!(
            lock_unpoisoned(&image).get(slot),
            Some(crate::scalar::RawValue::Bit(true))
        );
    }

    #[test]
    fn type_mismatch_leaves_both_sides_untouched() {
        let (image, slot) = image_with("%IW5");
        let binding = Binding::new(NodeId::new(2, 4_000_001), slot, ScalarType::UInt16);

        for bad in [
            DataValue::good(Variant::UInt32(1)),
            DataValue::good(Variant::Int16(1)),
            DataValue::empty(StatusCode::GOOD),
        ] {
            assert_eq!(
                binding.apply_write(&image, &bad),
                StatusCode::BAD_TYPE_MISMATCH
            );
        }
        assert_eq!(binding.shadow(), Variant::UInt16(0));
        assert_eq!(
            lock_unpoisoned(&image).get(slot),
            Some(crate::scalar::RawValue::Word(0))
        );
    }

    #[test]
    fn binding_set_rejects_duplicate_node_ids() {
        let (_, slot) = image_with("%IW5");
        let mut set = BindingSet::default();
        assert!(set.insert(Arc::new(Binding::new(
            NodeId::new(2, 4_000_000),
            slot,
            ScalarType::UInt16
        ))));
        assert!(!set.insert(Arc::new(Binding::new(
            NodeId::new(2, 4_000_000),
            slot,
            ScalarType::UInt16
        ))));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn release_reports_outside_references() {
        let (_, slot) = image_with("%IW5");
        let mut set = BindingSet::default();
        let binding = Arc::new(Binding::new(NodeId::new(2, 4_000_000), slot, ScalarType::UInt16));
        set.insert(binding.clone());
        set.insert(Arc::new(Binding::new(
            NodeId::new(2, 4_000_001),
            slot,
            ScalarType::UInt16,
        )));
        assert_eq!(set.release(), 1);
        assert!(set.is_empty());
        drop(binding);
    }
}
