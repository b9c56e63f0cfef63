use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use color_eyre::Result;
use crate::renderer::error::RenderError;

/// Opaque integer identifier for one kind of renderer object.
pub trait Handle: Copy + Ord + std::fmt::Debug {
    const KIND: &'static str;

    fn from_raw(raw: u64) -> Self;
    fn raw(self) -> u64;
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $crate::renderer::handle::Handle for $name {
            const KIND: &'static str = $kind;

            fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

define_handle!(BufferHandle, "buffer");
define_handle!(ImageHandle, "image");
define_handle!(DescriptorSetLayoutHandle, "descriptor set layout");
define_handle!(DescriptorSetHandle, "descriptor set");
define_handle!(PipelineHandle, "pipeline");
define_handle!(MeshHandle, "mesh");
define_handle!(ModelHandle, "model");
define_handle!(LightHandle, "light");
define_handle!(CommandBufferHandle, "command buffer");

/// Issues identifiers for a single handle kind.
///
/// Identifiers start at 1 and only grow, so a released identifier is never
/// handed out again. Only live identifiers are tracked.
pub struct IdAllocator<H: Handle> {
    next: u64,
    live: BTreeSet<u64>,
    _kind: PhantomData<H>,
}

impl<H: Handle> IdAllocator<H> {
    pub fn new() -> Self {
        Self {
            // Start from 1 to avoid confusion with null handles
            next: 1,
            live: BTreeSet::new(),
            _kind: PhantomData,
        }
    }

    pub fn allocate(&mut self) -> H {
        let id = self.next;
        self.next += 1;
        self.live.insert(id);
        H::from_raw(id)
    }

    pub fn release(&mut self, handle: H) -> Result<()> {
        if !self.retire(handle) {
            return Err(unknown(handle));
        }
        Ok(())
    }

    /// Returns false if `handle` was not live
    fn retire(&mut self, handle: H) -> bool {
        self.live.remove(&handle.raw())
    }

    pub fn is_live(&self, handle: H) -> bool {
        self.live.contains(&handle.raw())
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn issued_count(&self) -> u64 {
        self.next - 1
    }
}

impl<H: Handle> Default for IdAllocator<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Map from handle to owned object, paired with the allocator that issues
/// its keys. Iteration follows issue order.
pub struct HandleTable<H: Handle, T> {
    ids: IdAllocator<H>,
    entries: BTreeMap<H, T>,
}

impl<H: Handle, T> HandleTable<H, T> {
    pub fn new() -> Self {
        Self {
            ids: IdAllocator::new(),
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, value: T) -> H {
        let handle = self.ids.allocate();
        self.entries.insert(handle, value);
        handle
    }

    pub fn get(&self, handle: H) -> Result<&T> {
        self.entries.get(&handle).ok_or_else(|| unknown(handle))
    }

    pub fn get_mut(&mut self, handle: H) -> Result<&mut T> {
        self.entries.get_mut(&handle).ok_or_else(|| unknown(handle))
    }

    pub fn remove(&mut self, handle: H) -> Result<T> {
        let value = self.entries.remove(&handle).ok_or_else(|| unknown(handle))?;
        self.ids.release(handle)?;
        Ok(value)
    }

    pub fn contains(&self, handle: H) -> bool {
        self.entries.contains_key(&handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> {
        self.entries.iter().map(|(handle, value)| (*handle, value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (H, &mut T)> {
        self.entries.iter_mut().map(|(handle, value)| (*handle, value))
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn handles(&self) -> Vec<H> {
        self.entries.keys().copied().collect()
    }

    /// Removes every entry in issue order, retiring their handles.
    pub fn drain(&mut self) -> Vec<(H, T)> {
        let entries = std::mem::take(&mut self.entries);
        entries
            .into_iter()
            .inspect(|(handle, _)| {
                if !self.ids.retire(*handle) {
                    log::warn!("Drained {} {} was not live", H::KIND, handle.raw());
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H: Handle, T> Default for HandleTable<H, T> {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown<H: Handle>(handle: H) -> color_eyre::eyre::Report {
    color_eyre::eyre::Report::new(RenderError::UnknownHandle {
        kind: H::KIND,
        id: handle.raw(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic_and_start_at_one() {
        let mut ids = IdAllocator::<BufferHandle>::new();
        let a = ids.allocate();
        let b = ids.allocate();
        let c = ids.allocate();
        assert_eq!((a.raw(), b.raw(), c.raw()), (1, 2, 3));
        assert_eq!(ids.live_count(), 3);
    }

    #[test]
    fn test_released_ids_are_never_reissued() {
        let mut ids = IdAllocator::<MeshHandle>::new();
        let a = ids.allocate();
        ids.release(a).unwrap();
        let b = ids.allocate();
        assert_ne!(a, b);
        assert!(!ids.is_live(a));
        assert!(ids.is_live(b));
        assert_eq!(ids.issued_count(), 2);
    }

    #[test]
    fn test_double_release_is_rejected() {
        let mut ids = IdAllocator::<ImageHandle>::new();
        let a = ids.allocate();
        ids.release(a).unwrap();
        let err = ids.release(a).unwrap_err();
        assert!(matches!(
            RenderError::of(&err),
            Some(RenderError::UnknownHandle { kind: "image", id: 1 })
        ));
    }

    #[test]
    fn test_null_and_future_ids_are_not_live() {
        let mut ids = IdAllocator::<ModelHandle>::new();
        let _ = ids.allocate();
        assert!(!ids.is_live(ModelHandle::from_raw(0)));
        assert!(!ids.is_live(ModelHandle::from_raw(2)));
    }

    #[test]
    fn test_table_lookup_and_removal() {
        let mut table = HandleTable::<LightHandle, &str>::new();
        let first = table.insert("first");
        let second = table.insert("second");
        assert_eq!(*table.get(second).unwrap(), "second");

        assert_eq!(table.remove(first).unwrap(), "first");
        assert!(table.get(first).is_err());
        assert!(table.remove(first).is_err());

        let third = table.insert("third");
        assert!(third > second);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_table_iterates_in_issue_order() {
        let mut table = HandleTable::<ModelHandle, u32>::new();
        for value in [30, 10, 20] {
            table.insert(value);
        }
        let values = table.values().copied().collect::<Vec<_>>();
        assert_eq!(values, vec![30, 10, 20]);

        let drained = table.drain();
        assert_eq!(drained.len(), 3);
        assert!(table.is_empty());
    }

    #[test]
    fn test_drain_retires_every_handle() {
        let mut table = HandleTable::<MeshHandle, u32>::new();
        let handles = (0..4).map(|value| table.insert(value)).collect::<Vec<_>>();
        table.drain();

        for handle in handles {
            assert!(table.remove(handle).is_err());
            assert!(!table.ids.is_live(handle));
        }
        assert_eq!(table.ids.live_count(), 0);
        assert_eq!(table.insert(9).raw(), 5);
    }

    #[test]
    fn test_only_live_ids_are_tracked() {
        let mut ids = IdAllocator::<ImageHandle>::new();
        for _ in 0..1000 {
            let id = ids.allocate();
            ids.release(id).unwrap();
        }
        let kept = ids.allocate();
        assert_eq!(ids.live.len(), 1);
        assert!(ids.is_live(kept));
        assert!(!ids.is_live(ImageHandle::from_raw(500)));
        assert_eq!(ids.issued_count(), 1001);
    }
}
