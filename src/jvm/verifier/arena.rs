//! Per-method storage for abstract stack and register states
//!
//! States are never modified once they are attached to an instruction. Instead, every change
//! allocates a new state in the arena (sharing whatever it can with the old state), so the
//! question "did the merge change anything?" is just a matter of whether a new state was made.
//! Everything is freed in one go when the arena is dropped at the end of the method.

use super::types::AbstractType;
use crate::util::BitSet;
use std::fmt;
use typed_arena::Arena;

pub struct MethodArena<'a> {
    stack_nodes: Arena<StackNode<'a>>,
    types: Arena<AbstractType>,
    masks: Arena<SubroutineMask<'a>>,
    bit_sets: Arena<BitSet>,
}

impl<'a> MethodArena<'a> {
    pub fn new() -> MethodArena<'a> {
        MethodArena {
            stack_nodes: Arena::new(),
            types: Arena::new(),
            masks: Arena::new(),
            bit_sets: Arena::new(),
        }
    }

    /// Push an item on top of an existing stack
    pub fn push(&'a self, stack: StackState<'a>, item: AbstractType) -> StackState<'a> {
        let node = self.stack_nodes.alloc(StackNode {
            item,
            next: stack.top,
        });
        StackState {
            top: Some(node),
            size: stack.size + item.size(),
        }
    }

    /// Build a stack from items listed bottom to top
    pub fn stack_from(
        &'a self,
        items: impl IntoIterator<Item = AbstractType>,
    ) -> StackState<'a> {
        items
            .into_iter()
            .fold(StackState::EMPTY, |stack, item| self.push(stack, item))
    }

    /// Copy a slice of register types into the arena
    pub fn registers(&'a self, registers: impl IntoIterator<Item = AbstractType>) -> &'a [AbstractType] {
        self.types.alloc_extend(registers)
    }

    pub fn masks(
        &'a self,
        masks: impl IntoIterator<Item = SubroutineMask<'a>>,
    ) -> &'a [SubroutineMask<'a>] {
        self.masks.alloc_extend(masks)
    }

    pub fn bit_set(&'a self, bit_set: BitSet) -> &'a BitSet {
        self.bit_sets.alloc(bit_set)
    }

    /// Mark registers as modified in every active subroutine
    ///
    /// Returns the same masks if every bit was already set.
    pub fn mark_modified(
        &'a self,
        masks: &'a [SubroutineMask<'a>],
        registers: impl Iterator<Item = usize> + Clone,
    ) -> &'a [SubroutineMask<'a>] {
        let unchanged = masks
            .iter()
            .all(|mask| registers.clone().all(|reg| mask.modifies.contains(reg)));
        if unchanged {
            return masks;
        }
        self.masks(masks.iter().map(|mask| {
            let mut modifies = mask.modifies.clone();
            for reg in registers.clone() {
                modifies.insert(reg);
            }
            SubroutineMask {
                entry: mask.entry,
                modifies: self.bit_set(modifies),
            }
        }))
    }
}

impl<'a> Default for MethodArena<'a> {
    fn default() -> Self {
        MethodArena::new()
    }
}

pub struct StackNode<'a> {
    pub item: AbstractType,
    pub next: Option<&'a StackNode<'a>>,
}

/// Abstract operand stack
///
/// Wide values (`long` and `double`) are a single item, but count for two in the size.
#[derive(Copy, Clone)]
pub struct StackState<'a> {
    pub top: Option<&'a StackNode<'a>>,

    /// Size of the stack in slots
    pub size: usize,
}

impl<'a> StackState<'a> {
    pub const EMPTY: StackState<'a> = StackState { top: None, size: 0 };

    /// Iterate from the top of the stack down
    pub fn iter(&self) -> StackIter<'a> {
        StackIter(self.top)
    }

    /// Number of items (not slots) on the stack
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_none()
    }

    /// Pop the top item off the stack
    pub fn pop(&self) -> Option<(AbstractType, StackState<'a>)> {
        self.top.map(|node| {
            let rest = StackState {
                top: node.next,
                size: self.size - node.item.size(),
            };
            (node.item, rest)
        })
    }

    /// Items listed from the bottom of the stack to the top
    pub fn to_vec(&self) -> Vec<AbstractType> {
        let mut items: Vec<AbstractType> = self.iter().collect();
        items.reverse();
        items
    }

    /// Are both stacks the same nodes?
    pub fn same_as(&self, other: &StackState<'a>) -> bool {
        match (self.top, other.top) {
            (None, None) => true,
            (Some(a), Some(b)) => std::ptr::eq(a, b),
            _ => false,
        }
    }
}

impl<'a> fmt::Debug for StackState<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec()).finish()
    }
}

pub struct StackIter<'a>(Option<&'a StackNode<'a>>);

impl<'a> Iterator for StackIter<'a> {
    type Item = AbstractType;

    fn next(&mut self) -> Option<AbstractType> {
        self.0.map(|node| {
            self.0 = node.next;
            node.item
        })
    }
}

/// Abstract local variables
///
/// Registers past the end of the slice are implicitly bogus.
#[derive(Copy, Clone, Debug)]
pub struct RegisterState<'a> {
    pub registers: &'a [AbstractType],

    /// One mask for every subroutine (`jsr`) currently being executed, innermost last
    pub masks: &'a [SubroutineMask<'a>],
}

impl<'a> RegisterState<'a> {
    /// Type of a register (bogus if past the end)
    pub fn get(&self, register: usize) -> AbstractType {
        self.registers
            .get(register)
            .copied()
            .unwrap_or(AbstractType::Bogus)
    }

    /// Number of tracked registers
    pub fn count(&self) -> usize {
        self.registers.len()
    }
}

/// Registers modified by a subroutine
#[derive(Copy, Clone)]
pub struct SubroutineMask<'a> {
    /// Instruction number of the start of the subroutine
    pub entry: usize,

    pub modifies: &'a BitSet,
}

impl<'a> fmt::Debug for SubroutineMask<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}: {:?}>", self.entry, self.modifies)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stacks_share_tails() {
        let arena = MethodArena::new();
        let base = arena.stack_from([AbstractType::Integer, AbstractType::Long]);
        assert_eq!(base.size, 3);
        assert_eq!(base.len(), 2);

        let pushed = arena.push(base, AbstractType::Null);
        assert_eq!(pushed.size, 4);
        assert_eq!(
            pushed.to_vec(),
            vec![AbstractType::Integer, AbstractType::Long, AbstractType::Null]
        );

        let (top, rest) = pushed.pop().unwrap();
        assert_eq!(top, AbstractType::Null);
        assert!(rest.same_as(&base));
        assert!(StackState::EMPTY.pop().is_none());
    }

    #[test]
    fn marking_modified_registers() {
        let arena = MethodArena::new();
        let masks = arena.masks([
            SubroutineMask {
                entry: 4,
                modifies: arena.bit_set(BitSet::with_capacity(8)),
            },
            SubroutineMask {
                entry: 9,
                modifies: arena.bit_set(BitSet::with_capacity(8)),
            },
        ]);

        let marked = arena.mark_modified(masks, [3usize].into_iter());
        assert!(marked.iter().all(|mask| mask.modifies.contains(3)));
        assert!(!masks[0].modifies.contains(3));

        let again = arena.mark_modified(marked, [3usize].into_iter());
        assert!(std::ptr::eq(again, marked));
    }
}
