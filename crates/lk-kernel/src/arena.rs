//! Generational slot storage for kernel objects.
//!
//! Handles carry the generation of the slot they were issued for, so a
//! handle to a destroyed object never aliases whatever reuses its slot.

const MAX_GENERATION: u32 = 0x7fff;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Index {
    slot: u32,
    generation: u32,
}

impl Index {
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Packs the index into a word that is non-zero and positive as an
    /// `i32`: `(slot + 1) | generation << 16`.
    pub fn to_raw(&self) -> u32 {
        (self.slot + 1) | (self.generation << 16)
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        let slot = raw & 0xffff;
        if slot == 0 || raw >> 16 > MAX_GENERATION {
            return None;
        }
        Some(Self {
            slot: slot - 1,
            generation: raw >> 16,
        })
    }
}

#[derive(Debug)]
enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

#[derive(Debug)]
pub struct Arena<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
    limit: usize,
}

impl<T> Arena<T> {
    /// An arena holding at most `limit` live values (and at most 65535,
    /// the width of a packed slot).
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
            limit: limit.min(0xffff),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores `value`, handing it back if the arena is full.
    pub fn insert(&mut self, value: T) -> Result<Index, T> {
        match self.claim_slot() {
            Some(index) => {
                self.fill(index, value);
                Ok(index)
            }
            None => Err(value),
        }
    }

    /// Stores the value `make` builds from its own index, or returns `None`
    /// without calling `make` if the arena is full.
    pub fn insert_with(&mut self, make: impl FnOnce(Index) -> T) -> Option<Index> {
        let index = self.claim_slot()?;
        self.fill(index, make(index));
        Some(index)
    }

    fn claim_slot(&mut self) -> Option<Index> {
        if self.len >= self.limit {
            return None;
        }
        let index = match self.free.pop() {
            Some(slot) => match self.entries[slot as usize] {
                Entry::Vacant { generation } => Index { slot, generation },
                Entry::Occupied { .. } => unreachable!("free list points at a live slot"),
            },
            None => {
                let slot = self.entries.len() as u32;
                self.entries.push(Entry::Vacant { generation: 0 });
                Index {
                    slot,
                    generation: 0,
                }
            }
        };
        Some(index)
    }

    fn fill(&mut self, index: Index, value: T) {
        self.entries[index.slot as usize] = Entry::Occupied {
            generation: index.generation,
            value,
        };
        self.len += 1;
    }

    pub fn remove(&mut self, index: Index) -> Option<T> {
        let entry = self.entries.get_mut(index.slot as usize)?;
        match entry {
            Entry::Occupied { generation, .. } if *generation == index.generation => {
                let next = Entry::Vacant {
                    generation: (index.generation + 1) & MAX_GENERATION,
                };
                let old = std::mem::replace(entry, next);
                self.free.push(index.slot);
                self.len -= 1;
                match old {
                    Entry::Occupied { value, .. } => Some(value),
                    Entry::Vacant { .. } => None,
                }
            }
            _ => None,
        }
    }

    pub fn contains(&self, index: Index) -> bool {
        self.get(index).is_some()
    }

    pub fn get(&self, index: Index) -> Option<&T> {
        match self.entries.get(index.slot as usize)? {
            Entry::Occupied { generation, value } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, index: Index) -> Option<&mut T> {
        match self.entries.get_mut(index.slot as usize)? {
            Entry::Occupied { generation, value } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Mutable access to two distinct entries at once.
    pub fn get2_mut(&mut self, a: Index, b: Index) -> (Option<&mut T>, Option<&mut T>) {
        assert_ne!(a.slot, b.slot, "get2_mut: same slot requested twice");
        let (lo, hi, swapped) = if a.slot < b.slot {
            (a, b, false)
        } else {
            (b, a, true)
        };
        let (head, tail) = self.entries.split_at_mut(hi.slot as usize);
        let first = match head.get_mut(lo.slot as usize) {
            Some(Entry::Occupied { generation, value }) if *generation == lo.generation => {
                Some(value)
            }
            _ => None,
        };
        let second = match tail.first_mut() {
            Some(Entry::Occupied { generation, value }) if *generation == hi.generation => {
                Some(value)
            }
            _ => None,
        };
        if swapped {
            (second, first)
        } else {
            (first, second)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Index, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| match entry {
                Entry::Occupied { generation, value } => Some((
                    Index {
                        slot: slot as u32,
                        generation: *generation,
                    },
                    value,
                )),
                Entry::Vacant { .. } => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_index_does_not_alias_reused_slot() {
        let mut arena = Arena::with_limit(4);
        let a = arena.insert("a").unwrap();
        assert_eq!(arena.remove(a), Some("a"));
        let b = arena.insert("b").unwrap();
        assert_eq!(a.slot(), b.slot());
        assert_ne!(a, b);
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.remove(a), None);
    }

    #[test]
    fn limit_hands_value_back() {
        let mut arena = Arena::with_limit(1);
        arena.insert(1).unwrap();
        assert_eq!(arena.insert(2), Err(2));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn raw_form_is_nonzero_and_reversible() {
        let mut arena = Arena::with_limit(8);
        let a = arena.insert(()).unwrap();
        arena.remove(a);
        let b = arena.insert(()).unwrap();
        assert!(b.to_raw() as i32 > 0);
        assert_eq!(Index::from_raw(b.to_raw()), Some(b));
        assert_eq!(Index::from_raw(0), None);
    }

    #[test]
    fn get2_mut_returns_both_in_request_order() {
        let mut arena = Arena::with_limit(8);
        let a = arena.insert(1).unwrap();
        let b = arena.insert(2).unwrap();
        let (x, y) = arena.get2_mut(b, a);
        *x.unwrap() += 10;
        *y.unwrap() += 20;
        assert_eq!(arena.get(a), Some(&21));
        assert_eq!(arena.get(b), Some(&12));
    }
}
