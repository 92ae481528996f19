//! Rewriting method code into a shape that stack maps can describe
//!
//! The verifier hands over a summary of its analysis (which instructions were reached, which
//! subroutines they run in, where control goes next) and gets back new code. After a successful
//! rewrite, the code has no dead instructions and no `jsr`/`ret`, so it can be verified again
//! and given stack maps.

mod inliner;

pub use inliner::*;

use crate::jvm::class_file::{Code, ConstantPool};
use crate::jvm::VerifierErrorKind;

/// Something that can rewrite the code of a method
pub trait CodeRewriter {
    /// Produce new code for the method
    ///
    /// Nested attributes of the code which mention offsets must be updated to match.
    fn rewrite(
        &self,
        analysis: &MethodAnalysis,
        code: &Code,
        constants: &ConstantPool,
    ) -> Result<Code, VerifierErrorKind>;
}

/// Where control can go after an instruction (other than falling through or throwing)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    None,

    /// Conditional or unconditional branch to an instruction number
    Branch(usize),

    /// Subroutine call
    Jsr {
        target: usize,

        /// Whether some `ret` returns from this call
        returns: bool,
    },

    /// Return from a subroutine
    Ret,

    /// `tableswitch` or `lookupswitch`, with the default target first
    Switch(Vec<usize>),
}

/// What the verifier learnt about one instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedInstruction {
    /// Opcode (normalized, so `iload_0` shows up as `iload`)
    pub opcode: u16,
    pub offset: usize,
    pub length: usize,
    pub reached: bool,

    /// Entry instruction numbers of the subroutines this instruction runs in, outermost first
    pub subroutines: Vec<usize>,

    pub transfer: Transfer,

    /// `astore` that moves a return address off the stack
    pub stores_return_address: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodAnalysis {
    pub instructions: Vec<AnalyzedInstruction>,
    pub code_length: usize,
}

impl MethodAnalysis {
    /// Instruction number starting at an offset (or the number of instructions, for the offset
    /// just past the end of the code)
    pub fn instruction_at(&self, offset: usize) -> Option<usize> {
        if offset == self.code_length {
            return Some(self.instructions.len());
        }
        self.instructions
            .binary_search_by_key(&offset, |instruction| instruction.offset)
            .ok()
    }
}
