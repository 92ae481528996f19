use super::arena::{RegisterState, StackState};
use super::opcodes::Opcode;
use super::types::AbstractType;
use crate::jvm::class_file::{ConstantIndex, ConstantTag};
use bitflags::bitflags;

bitflags! {
    /// Facts about the paths reaching an instruction
    ///
    /// Every instruction tracks two sets: one of facts true along _all_ paths reaching it, and one
    /// of facts true along _some_ path reaching it.
    pub struct PathFlags: u8 {
        /// Instruction can be reached
        const REACHED = 0x01;

        /// Inside a constructor which still has to call `super` (or another `this` constructor)
        const NEED_CONSTRUCTOR = 0x02;

        /// The `super` constructor has been called
        const CONSTRUCTED = 0x04;

        /// Only reachable via an exception thrown by an `<init>` on uninitialized `this`, so
        /// the method can't return normally from here
        const NO_RETURN = 0x08;
    }
}

/// Decoded instruction, along with the abstract state on entry to it
#[derive(Debug)]
pub struct Instruction<'a> {
    /// Opcode (normalized, so `iload_0` shows up as `iload`)
    pub opcode: Opcode,

    /// Offset of the instruction in the code
    pub offset: usize,

    /// Length in bytes
    pub length: usize,

    pub operand: Operand,

    /// Call to a protected method in a superclass from another package, so the receiver must
    /// be the current class (or a subclass)
    pub protected: bool,

    /// Entry state changed since the instruction was last processed
    pub changed: bool,

    /// Jumped to from somewhere other than the previous instruction, so it needs a stack map
    pub is_target: bool,

    /// Stack on entry (`None` if no state has reached this instruction yet)
    pub stack: Option<StackState<'a>>,

    /// Locals on entry (`None` if no state has reached this instruction yet)
    pub registers: Option<RegisterState<'a>>,

    pub and_flags: PathFlags,
    pub or_flags: PathFlags,
}

impl<'a> Instruction<'a> {
    pub fn new(opcode: Opcode, offset: usize, length: usize) -> Instruction<'a> {
        Instruction {
            opcode,
            offset,
            length,
            operand: Operand::None,
            protected: false,
            changed: false,
            is_target: false,
            stack: None,
            registers: None,
            and_flags: PathFlags::all(),
            or_flags: PathFlags::empty(),
        }
    }

    /// Has any state been merged into this instruction?
    pub fn is_reached(&self) -> bool {
        self.or_flags.contains(PathFlags::REACHED)
    }
}

/// Operand of an instruction, with branch offsets turned into instruction numbers and constant
/// pool references resolved
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,

    /// Local variable index (loads, stores, `iinc`)
    Local(usize),

    /// Branch target
    Target(usize),

    /// Subroutine call, along with the `ret` that returns from it (once that is known)
    Jsr { target: usize, ret: Option<usize> },

    /// Subroutine return, along with where it returns to (computed the first time it is needed)
    Ret {
        local: usize,
        successors: Option<Vec<usize>>,
    },

    /// Switch targets, with the default target first
    Switch(Vec<usize>),

    /// Constant loaded by `ldc`, `ldc_w`, or `ldc2_w`
    Constant(ConstantIndex, ConstantTag),

    Field(Box<FieldOperand>),

    Method(Box<MethodOperand>),

    /// Class or array type (`checkcast`, `instanceof`, `newarray`, `anewarray`)
    Type(AbstractType),

    /// Object created by `new`: its uninitialized type and its type once constructed
    New {
        uninitialized: AbstractType,
        class: AbstractType,
    },

    MultiNewArray {
        array: AbstractType,
        dimensions: usize,
    },
}

impl Operand {
    /// Branch target of `goto`, `if*`, `jsr`, and friends
    pub fn target(&self) -> Option<usize> {
        match self {
            Operand::Target(target) | Operand::Jsr { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Local variable accessed
    pub fn local(&self) -> Option<usize> {
        match self {
            Operand::Local(local) | Operand::Ret { local, .. } => Some(*local),
            _ => None,
        }
    }
}

/// Field reference, resolved from the constant pool
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOperand {
    pub class: AbstractType,
    pub name: String,
    pub descriptor: String,

    /// Type of the field value (sub-word integers already widened)
    pub field_type: AbstractType,
}

/// Method reference, resolved from the constant pool
#[derive(Debug, Clone, PartialEq)]
pub struct MethodOperand {
    pub class: AbstractType,
    pub name: String,
    pub descriptor: String,
    pub parameters: Vec<AbstractType>,

    /// `None` for `void` methods
    pub return_type: Option<AbstractType>,
}

/// Entry of the exception table, with offsets turned into instruction numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    /// First covered instruction
    pub start: usize,

    /// First instruction past the covered range
    pub end: usize,

    /// Start of the handler code
    pub handler: usize,

    /// Type on the stack on entry to the handler
    pub catch_type: AbstractType,
}

impl Handler {
    pub fn covers(&self, inumber: usize) -> bool {
        self.start <= inumber && inumber < self.end
    }
}
