use log::{debug, trace};

use crate::{ObjRef, Object, RawValue};

#[derive(Debug)]
struct Slot {
    generation: u32,
    object: Option<Object>,
    marked: bool,
}

/// Statistics of a single collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GarbageCollectionStats {
    pub live: usize,
    pub freed: usize,
}

/// Object heap.
///
/// Every allocation is recorded in the arena, which pins it until the arena
/// is restored to an index saved before the allocation. Collection only
/// happens through [`Heap::collect`], so objects held in Rust locals are
/// safe as long as they stay in the arena.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    arena: Vec<ObjRef>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, object: Object) -> ObjRef {
        let obj = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                debug_assert!(slot.object.is_none());
                slot.object = Some(object);
                ObjRef {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    object: Some(object),
                    marked: false,
                });
                ObjRef {
                    index,
                    generation: 0,
                }
            }
        };
        self.arena.push(obj);
        obj
    }

    #[inline]
    pub fn get(&self, obj: ObjRef) -> Option<&Object> {
        let slot = self.slots.get(obj.index as usize)?;
        if slot.generation != obj.generation {
            return None;
        }
        slot.object.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, obj: ObjRef) -> Option<&mut Object> {
        let slot = self.slots.get_mut(obj.index as usize)?;
        if slot.generation != obj.generation {
            return None;
        }
        slot.object.as_mut()
    }

    pub fn is_live(&self, obj: ObjRef) -> bool {
        self.get(obj).is_some()
    }

    pub fn live_objects(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    // ── Arena ──────────────────────────────────────────────────────

    pub fn arena_save(&self) -> usize {
        self.arena.len()
    }

    pub fn arena_restore(&mut self, index: usize) {
        trace!("arena restore {} -> {}", self.arena.len(), index);
        self.arena.truncate(index);
    }

    /// Pins an object that was allocated before the current arena index.
    pub fn protect(&mut self, obj: ObjRef) {
        self.arena.push(obj);
    }

    pub(crate) fn arena_roots(&self) -> &[ObjRef] {
        &self.arena
    }

    // ── Collection ─────────────────────────────────────────────────

    /// Mark and sweep from the given roots. The arena is always a root.
    pub fn collect(&mut self, roots: &[RawValue]) -> GarbageCollectionStats {
        let mut worklist: Vec<ObjRef> = self.arena.clone();
        worklist.extend(roots.iter().filter_map(|v| v.as_object()));

        while let Some(obj) = worklist.pop() {
            let Some(slot) = self.slots.get_mut(obj.index as usize) else {
                continue;
            };
            if slot.generation != obj.generation || slot.marked || slot.object.is_none() {
                continue;
            }
            slot.marked = true;
            let Some(object) = &slot.object else {
                continue;
            };
            object.visit_edges(&mut |v| {
                if let Some(child) = v.as_object() {
                    worklist.push(child);
                }
            });
        }

        let mut stats = GarbageCollectionStats::default();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.object.is_none() {
                continue;
            }
            if slot.marked {
                slot.marked = false;
                stats.live += 1;
            } else {
                slot.object = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                stats.freed += 1;
            }
        }
        debug!("gc: {} live, {} freed", stats.live, stats.freed);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(heap: &mut Heap, s: &str) -> ObjRef {
        heap.allocate(Object::String(s.to_owned()))
    }

    #[test]
    fn arena_pins_allocations() {
        let mut heap = Heap::new();
        let a = string(&mut heap, "a");
        let stats = heap.collect(&[]);
        assert_eq!(stats.freed, 0);
        assert!(heap.is_live(a));
    }

    #[test]
    fn restore_unpins_and_collect_frees() {
        let mut heap = Heap::new();
        let keep = string(&mut heap, "keep");
        let idx = heap.arena_save();
        let drop_me = string(&mut heap, "drop");
        heap.arena_restore(idx);
        let stats = heap.collect(&[]);
        assert_eq!(stats.freed, 1);
        assert!(heap.is_live(keep));
        assert!(!heap.is_live(drop_me));
    }

    #[test]
    fn reused_slot_does_not_resurrect_stale_refs() {
        let mut heap = Heap::new();
        let idx = heap.arena_save();
        let old = string(&mut heap, "old");
        heap.arena_restore(idx);
        heap.collect(&[]);
        let new = string(&mut heap, "new");
        assert_eq!(old.index(), new.index());
        assert!(heap.get(old).is_none());
        assert!(matches!(heap.get(new), Some(Object::String(s)) if s == "new"));
    }

    #[test]
    fn roots_keep_children_alive() {
        let mut heap = Heap::new();
        let idx = heap.arena_save();
        let child = string(&mut heap, "child");
        let parent = heap.allocate(Object::Array(vec![child.into()]));
        let orphan = string(&mut heap, "orphan");
        heap.arena_restore(idx);
        let stats = heap.collect(&[parent.into()]);
        assert_eq!(stats.freed, 1);
        assert!(heap.is_live(parent));
        assert!(heap.is_live(child));
        assert!(!heap.is_live(orphan));
    }
}
