use smallvec::SmallVec;
use color_eyre::Result;
use crate::renderer::error::RenderError;

/// One value per frame-in-flight slot, indexed by slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerFrame<T> {
    slots: SmallVec<[T; 3]>,
}

impl<T> PerFrame<T> {
    /// Builds `frames` values in slot order, stopping at the first failure
    pub fn try_new<F>(frames: usize, mut make: F) -> Result<Self>
    where
        F: FnMut(usize) -> Result<T>,
    {
        if frames == 0 {
            return Err(RenderError::invalid("at least one frame slot is required"));
        }
        let slots = (0..frames).map(&mut make).collect::<Result<SmallVec<_>>>()?;
        Ok(Self { slots })
    }

    /// Like `try_new`, but when a slot fails every value already built is
    /// handed back to `undo`, newest first
    pub fn try_new_or_undo<C, F, U>(
        frames: usize,
        ctx: &mut C,
        mut make: F,
        mut undo: U,
    ) -> Result<Self>
    where
        F: FnMut(&mut C, usize) -> Result<T>,
        U: FnMut(&mut C, T),
    {
        if frames == 0 {
            return Err(RenderError::invalid("at least one frame slot is required"));
        }
        let mut slots = SmallVec::with_capacity(frames);
        for slot in 0..frames {
            match make(ctx, slot) {
                Ok(value) => slots.push(value),
                Err(e) => {
                    while let Some(value) = slots.pop() {
                        undo(ctx, value);
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self { slots })
    }

    pub fn get(&self, slot: usize) -> Result<&T> {
        self.slots.get(slot).ok_or_else(|| out_of_range(slot, self.slots.len()))
    }

    pub fn get_mut(&mut self, slot: usize) -> Result<&mut T> {
        let len = self.slots.len();
        self.slots.get_mut(slot).ok_or_else(|| out_of_range(slot, len))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<T> IntoIterator for PerFrame<T> {
    type Item = T;
    type IntoIter = smallvec::IntoIter<[T; 3]>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.into_iter()
    }
}

fn out_of_range(slot: usize, len: usize) -> color_eyre::eyre::Report {
    RenderError::invalid(format!("frame slot {} is out of range for {} slots", slot, len))
}

#[cfg(test)]
mod tests {
    use color_eyre::eyre::eyre;
    use super::*;

    #[test]
    fn test_values_follow_slot_order() {
        let per_frame = PerFrame::try_new(3, |slot| Ok(slot * 10)).unwrap();
        assert_eq!(per_frame.len(), 3);
        assert_eq!(*per_frame.get(2).unwrap(), 20);
        assert_eq!(per_frame.iter().copied().collect::<Vec<_>>(), vec![0, 10, 20]);
    }

    #[test]
    fn test_out_of_range_slot() {
        let mut per_frame = PerFrame::try_new(2, |slot| Ok(slot)).unwrap();
        assert!(per_frame.get(2).is_err());
        assert!(per_frame.get_mut(5).is_err());
    }

    #[test]
    fn test_zero_slots_rejected() {
        assert!(PerFrame::<u32>::try_new(0, |_| Ok(0)).is_err());
    }

    #[test]
    fn test_construction_stops_at_first_failure() {
        let mut calls = 0;
        let result = PerFrame::<usize>::try_new(4, |slot| {
            calls += 1;
            if slot == 1 { Err(eyre!("boom")) } else { Ok(slot) }
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_failed_construction_undoes_built_slots() {
        let mut live = Vec::new();
        let result = PerFrame::<u32>::try_new_or_undo(
            3,
            &mut live,
            |live, slot| {
                if slot == 2 {
                    return Err(eyre!("out of memory"));
                }
                let id = slot as u32 + 100;
                live.push(id);
                Ok(id)
            },
            |live, id| live.retain(|other| *other != id),
        );
        assert!(result.is_err());
        assert!(live.is_empty());
    }

    #[test]
    fn test_undo_runs_newest_first_and_not_on_success() {
        let mut undone = Vec::new();
        let result = PerFrame::<usize>::try_new_or_undo(
            4,
            &mut undone,
            |_, slot| if slot == 3 { Err(eyre!("boom")) } else { Ok(slot) },
            |undone, slot| undone.push(slot),
        );
        assert!(result.is_err());
        assert_eq!(undone, vec![2, 1, 0]);

        let mut undone = Vec::new();
        let per_frame = PerFrame::<usize>::try_new_or_undo(
            2,
            &mut undone,
            |_, slot| Ok(slot),
            |undone, slot| undone.push(slot),
        )
        .unwrap();
        assert_eq!(per_frame.len(), 2);
        assert!(undone.is_empty());
    }
}
