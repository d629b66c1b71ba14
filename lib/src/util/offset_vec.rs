use std::fmt;
use std::iter::Enumerate;
use std::slice::Iter;
use std::vec::IntoIter as VecIntoIter;

/// How many offset units something occupies
pub trait Width {
    fn width(&self) -> usize;
}

/// Vector addressed by offset, where each element advances the offset by its width
///
/// Class files count several things this way:
///
///   - constant pool indices (`long` and `double` entries take two slots)
///   - local variable slots and operand stack entries (again `long` and `double` take two)
///   - bytecode offsets (instructions are between 1 and 5 bytes, switches aside)
///
#[derive(Clone)]
pub struct OffsetVec<T> {
    /// Entries, each with its starting offset
    entries: Vec<(Offset, T)>,

    /// Where the next pushed entry will start
    end: Offset,
}

/// Position in an [`OffsetVec`], measured in width units
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Offset(pub usize);

impl<T: Width> OffsetVec<T> {
    pub fn new() -> OffsetVec<T> {
        OffsetVec::new_starting_at(Offset(0))
    }

    /// Empty vector whose first entry will be at `start` (the constant pool starts at 1)
    pub fn new_starting_at(start: Offset) -> OffsetVec<T> {
        OffsetVec {
            entries: vec![],
            end: start,
        }
    }

    /// Number of entries (not their total width)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offset one past the last entry
    pub fn offset_len(&self) -> Offset {
        self.end
    }

    /// Append an entry, returning the offset it was placed at
    pub fn push(&mut self, entry: T) -> Offset {
        let offset = self.end;
        self.end.0 += entry.width();
        self.entries.push((offset, entry));
        offset
    }

    /// Remove the last entry
    pub fn pop(&mut self) -> Option<(Offset, T)> {
        let (offset, entry) = self.entries.pop()?;
        self.end = offset;
        Some((offset, entry))
    }

    /// Remove every entry (the start offset is kept)
    pub fn clear(&mut self) {
        if let Some((start, _)) = self.entries.first() {
            self.end = *start;
        }
        self.entries.clear();
    }

    /// Entry starting exactly at `offset`
    ///
    /// Offsets in the middle of a wide entry find nothing.
    pub fn get_offset(&self, offset: Offset) -> Option<&T> {
        self.entries
            .binary_search_by_key(&offset, |(start, _)| *start)
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    /// Last entry, with its offset
    pub fn last(&self) -> Option<(Offset, &T)> {
        self.entries.last().map(|(offset, entry)| (*offset, entry))
    }

    pub fn iter(&self) -> OffsetVecIter<'_, T> {
        self.into_iter()
    }
}

impl<T: PartialEq> PartialEq for OffsetVec<T> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<T: Eq> Eq for OffsetVec<T> {}

impl<T: Width> Default for OffsetVec<T> {
    fn default() -> Self {
        OffsetVec::new()
    }
}

/// Owning iterator yielding `(offset, index, entry)`
pub struct OffsetVecIntoIter<T>(Enumerate<VecIntoIter<(Offset, T)>>);

impl<T> Iterator for OffsetVecIntoIter<T> {
    type Item = (Offset, usize, T);

    fn next(&mut self) -> Option<Self::Item> {
        let (idx, (offset, entry)) = self.0.next()?;
        Some((offset, idx, entry))
    }
}

impl<T> IntoIterator for OffsetVec<T> {
    type Item = (Offset, usize, T);
    type IntoIter = OffsetVecIntoIter<T>;

    fn into_iter(self) -> OffsetVecIntoIter<T> {
        OffsetVecIntoIter(self.entries.into_iter().enumerate())
    }
}

/// Borrowing iterator yielding `(offset, index, entry)`
pub struct OffsetVecIter<'a, T>(Enumerate<Iter<'a, (Offset, T)>>);

impl<'a, T> Iterator for OffsetVecIter<'a, T> {
    type Item = (Offset, usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let (idx, (offset, entry)) = self.0.next()?;
        Some((*offset, idx, entry))
    }
}

impl<'a, T> IntoIterator for &'a OffsetVec<T> {
    type Item = (Offset, usize, &'a T);
    type IntoIter = OffsetVecIter<'a, T>;

    fn into_iter(self) -> OffsetVecIter<'a, T> {
        OffsetVecIter(self.entries.iter().enumerate())
    }
}

impl<T: Width> FromIterator<T> for OffsetVec<T> {
    fn from_iter<I: IntoIterator<Item = T>>(entries: I) -> Self {
        let mut offset_vec = OffsetVec::new();
        offset_vec.extend(entries);
        offset_vec
    }
}

impl<T: Width, const N: usize> From<[T; N]> for OffsetVec<T> {
    fn from(entries: [T; N]) -> Self {
        entries.into_iter().collect()
    }
}

impl<T: Width> Extend<T> for OffsetVec<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, entries: I) {
        for entry in entries {
            self.push(entry);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for OffsetVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.entries
                    .iter()
                    .map(|(offset, entry)| format!("#{} = {:?}", offset.0, entry)),
            )
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Stand-in for a local variable slot
    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    enum Local {
        Int,
        Long,
    }

    impl Width for Local {
        fn width(&self) -> usize {
            match self {
                Local::Int => 1,
                Local::Long => 2,
            }
        }
    }

    #[test]
    fn wide_entries_skip_offsets() {
        let locals = OffsetVec::from([Local::Long, Local::Int, Local::Long, Local::Int]);
        let offsets: Vec<usize> = locals.iter().map(|(offset, _, _)| offset.0).collect();
        assert_eq!(offsets, vec![0, 2, 3, 5]);
        assert_eq!(locals.offset_len(), Offset(6));
        assert_eq!(locals.len(), 4);

        assert_eq!(locals.get_offset(Offset(3)), Some(&Local::Long));
        assert_eq!(locals.get_offset(Offset(1)), None, "middle of a long");
        assert_eq!(locals.get_offset(Offset(6)), None);
    }

    #[test]
    fn pop_rewinds_the_end() {
        let mut pool: OffsetVec<Local> = OffsetVec::new_starting_at(Offset(1));
        assert_eq!(pool.push(Local::Int), Offset(1));
        assert_eq!(pool.push(Local::Long), Offset(2));
        assert_eq!(pool.offset_len(), Offset(4));

        assert_eq!(pool.pop(), Some((Offset(2), Local::Long)));
        assert_eq!(pool.offset_len(), Offset(2));
        assert_eq!(pool.last(), Some((Offset(1), &Local::Int)));
        assert_eq!(pool.push(Local::Int), Offset(2));
    }
}
