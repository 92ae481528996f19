use std::fmt;

/// How many consecutive offsets an element occupies
pub trait Width {
    fn width(&self) -> usize;
}

/// Elements addressed by the running sum of the widths before them, rather than by position
///
/// In a constant pool the first entry is at offset 1 and every `long` or `double` also claims the
/// offset after it, which is never a valid entry on its own.
#[derive(Clone, PartialEq, Eq)]
pub struct OffsetVec<T> {
    /// Elements in order, each tagged with where it starts
    entries: Vec<(Offset, T)>,

    /// Where the next element would start
    end: Offset,

    start: Offset,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Offset(pub usize);

/// Outcome of looking up an offset
#[derive(Debug, PartialEq, Eq)]
pub enum OffsetResult<'a, T> {
    /// An element starts at the offset (its position is included)
    Ok(usize, &'a T),

    /// The offset is covered by the element at this position, but isn't where it starts
    InvalidOffset(usize),

    TooSmall,
    TooLarge,
}

impl<T: Width> OffsetVec<T> {
    pub fn new_starting_at(start: Offset) -> OffsetVec<T> {
        OffsetVec {
            entries: vec![],
            end: start,
            start,
        }
    }

    /// Offset the next pushed element will get
    pub fn offset_len(&self) -> Offset {
        self.end
    }

    pub fn push(&mut self, element: T) -> Offset {
        let offset = self.end;
        self.end.0 += element.width();
        self.entries.push((offset, element));
        offset
    }

    pub fn get_offset(&self, offset: Offset) -> OffsetResult<T> {
        if offset < self.start {
            return OffsetResult::TooSmall;
        }
        if offset >= self.end {
            return OffsetResult::TooLarge;
        }
        match self.entries.binary_search_by_key(&offset, |(start, _)| *start) {
            Ok(position) => OffsetResult::Ok(position, &self.entries[position].1),
            Err(after) => OffsetResult::InvalidOffset(after - 1),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Offset, &T)> {
        self.entries.iter().map(|(offset, element)| (*offset, element))
    }
}

impl<T: fmt::Debug> fmt::Debug for OffsetVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(offset, element)| (offset.0, element)))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    enum Slot {
        Narrow(u8),
        Wide(u8),
    }

    impl Width for Slot {
        fn width(&self) -> usize {
            match self {
                Slot::Narrow(_) => 1,
                Slot::Wide(_) => 2,
            }
        }
    }

    #[test]
    fn pool_style_offsets() {
        let mut slots = OffsetVec::new_starting_at(Offset(1));
        assert_eq!(slots.push(Slot::Narrow(1)), Offset(1));
        assert_eq!(slots.push(Slot::Wide(2)), Offset(2));
        assert_eq!(slots.push(Slot::Narrow(3)), Offset(4));
        assert_eq!(slots.offset_len(), Offset(5));

        assert_eq!(slots.get_offset(Offset(0)), OffsetResult::TooSmall);
        assert_eq!(
            slots.get_offset(Offset(2)),
            OffsetResult::Ok(1, &Slot::Wide(2))
        );
        assert_eq!(slots.get_offset(Offset(3)), OffsetResult::InvalidOffset(1));
        assert_eq!(
            slots.get_offset(Offset(4)),
            OffsetResult::Ok(2, &Slot::Narrow(3))
        );
        assert_eq!(slots.get_offset(Offset(5)), OffsetResult::TooLarge);
    }

    #[test]
    fn second_half_of_trailing_wide_entry() {
        let mut slots = OffsetVec::new_starting_at(Offset(0));
        slots.push(Slot::Narrow(1));
        slots.push(Slot::Wide(2));
        assert_eq!(slots.get_offset(Offset(2)), OffsetResult::InvalidOffset(1));
        assert_eq!(slots.get_offset(Offset(3)), OffsetResult::TooLarge);
        assert_eq!(
            slots.iter().map(|(offset, _)| offset).collect::<Vec<_>>(),
            vec![Offset(0), Offset(1)]
        );
    }
}
