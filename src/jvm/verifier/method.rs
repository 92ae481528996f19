use super::arena::MethodArena;
use super::instruction::{Handler, Instruction, Operand};
use super::opcodes;
use super::types::{AbstractType, ClassId, ClassNames};
use crate::jvm::class_file::{Code, ConstantPool};
use crate::jvm::class_graph::ClassData;
use crate::jvm::rewrite::{AnalyzedInstruction, MethodAnalysis, Transfer};
use crate::jvm::{
    BinaryName, MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor, UnqualifiedName,
    VerifierErrorKind,
};

/// Class whose methods are being verified
pub struct ClassContext<'g> {
    pub class_id: ClassId,
    pub class_data: &'g ClassData<'g>,

    /// Superclasses (not including the class itself), nearest first
    pub superclasses: Vec<ClassId>,
}

impl<'g> ClassContext<'g> {
    pub fn new(names: &ClassNames<'g>, name: &str) -> Result<ClassContext<'g>, VerifierErrorKind> {
        let class_id = names.intern(name);
        let class_data = names.resolve(class_id)?;
        let superclasses = class_data
            .superclasses()
            .skip(1)
            .map(|class| names.intern(class.name.as_str()))
            .collect();
        Ok(ClassContext {
            class_id,
            class_data,
            superclasses,
        })
    }

    pub fn class_type(&self) -> AbstractType {
        AbstractType::class(self.class_id)
    }

    /// Direct superclass (`None` only for `java/lang/Object`)
    pub fn superclass_type(&self) -> Option<AbstractType> {
        self.superclasses.first().map(|id| AbstractType::class(*id))
    }

    pub fn is_superclass(&self, class: ClassId) -> bool {
        self.superclasses.contains(&class)
    }
}

/// Signature and flags of the method being verified
#[derive(Debug, Clone)]
pub struct MethodContext {
    pub name: String,
    pub descriptor: String,
    pub access_flags: MethodAccessFlags,

    /// Declared parameters (not including `this`)
    pub parameters: Vec<AbstractType>,

    /// `None` for `void` methods
    pub return_type: Option<AbstractType>,
}

impl MethodContext {
    pub fn new(
        names: &ClassNames<'_>,
        name: &str,
        descriptor: &str,
        access_flags: MethodAccessFlags,
    ) -> Result<MethodContext, VerifierErrorKind> {
        let parsed = MethodDescriptor::<BinaryName>::parse(descriptor)
            .map_err(|_| VerifierErrorKind::BadDescriptor(descriptor.to_owned()))?;
        let parameters = parsed
            .parameters
            .iter()
            .map(|parameter| names.field_type(parameter))
            .collect::<Result<Vec<_>, _>>()?;
        let return_type = parsed
            .return_type
            .as_ref()
            .map(|typ| names.field_type(typ))
            .transpose()?;
        Ok(MethodContext {
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            access_flags,
            parameters,
            return_type,
        })
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_initializer(&self) -> bool {
        self.name == UnqualifiedName::INIT.as_str()
    }

    /// Local variable slots taken up by the arguments (including `this`)
    pub fn args_size(&self) -> usize {
        let this_size = if self.is_static() { 0 } else { 1 };
        this_size + self.parameters.iter().map(|p| p.size()).sum::<usize>()
    }
}

/// Verifier for the code of one method
///
/// Everything allocated while verifying lives in the arena, which gets dropped once the method
/// is done (or needs to be rewritten and verified again).
pub struct MethodVerifier<'a, 'c, 'g> {
    pub(super) arena: &'a MethodArena<'a>,
    pub(super) names: &'c ClassNames<'g>,
    pub(super) constants: &'c ConstantPool,
    pub(super) class: &'c ClassContext<'g>,
    pub(super) method: &'c MethodContext,
    pub(super) code: &'c Code,

    pub(super) instructions: Vec<Instruction<'a>>,

    /// Instruction number starting at each byte offset of the code
    pub(super) code_data: Vec<Option<usize>>,

    pub(super) handlers: Vec<Handler>,

    /// Set for the second run of the analysis, after `jsr`s whose `ret` was never found have been
    /// marked as changed again
    pub(super) redo_jsr: bool,
}

impl<'a, 'c, 'g> MethodVerifier<'a, 'c, 'g> {
    pub fn new(
        arena: &'a MethodArena<'a>,
        names: &'c ClassNames<'g>,
        constants: &'c ConstantPool,
        class: &'c ClassContext<'g>,
        method: &'c MethodContext,
        code: &'c Code,
    ) -> MethodVerifier<'a, 'c, 'g> {
        MethodVerifier {
            arena,
            names,
            constants,
            class,
            method,
            code,
            instructions: vec![],
            code_data: vec![],
            handlers: vec![],
            redo_jsr: false,
        }
    }

    /// Decode the code and run the data-flow analysis until nothing changes
    pub fn verify(&mut self) -> Result<(), VerifierErrorKind> {
        self.decode()?;
        self.init_exception_table()?;
        self.initialize_dataflow()?;
        self.run_dataflow()?;

        // A `jsr` whose subroutine never returned gets processed once more, this time without
        // pushing a subroutine mask
        for instruction in &mut self.instructions {
            if instruction.is_reached()
                && matches!(instruction.operand, Operand::Jsr { ret: None, .. })
            {
                instruction.changed = true;
                self.redo_jsr = true;
            }
        }
        if self.redo_jsr {
            log::trace!("Re-running analysis for subroutines which never return");
            self.run_dataflow()?;
        }
        Ok(())
    }

    pub fn instructions(&self) -> &[Instruction<'a>] {
        &self.instructions
    }

    /// Does the code contain dead instructions or subroutine calls?
    pub fn needs_rewrite(&self) -> bool {
        self.instructions.iter().any(|instruction| {
            !instruction.is_reached() || opcodes::is_jsr(instruction.opcode)
        })
    }

    /// Summary of the analysis, for rewriting the code
    pub fn analysis(&self) -> MethodAnalysis {
        let instructions = self
            .instructions
            .iter()
            .map(|instruction| {
                let transfer = match &instruction.operand {
                    Operand::Jsr { target, ret } => Transfer::Jsr {
                        target: *target,
                        returns: ret.is_some(),
                    },
                    Operand::Ret { .. } => Transfer::Ret,
                    Operand::Switch(targets) => Transfer::Switch(targets.clone()),
                    Operand::Target(target) => Transfer::Branch(*target),
                    _ => Transfer::None,
                };
                let subroutines = instruction
                    .registers
                    .map(|registers| registers.masks.iter().map(|mask| mask.entry).collect())
                    .unwrap_or_default();
                let stores_return_address = instruction.opcode == opcodes::ASTORE
                    && matches!(
                        instruction.stack.and_then(|stack| stack.pop()),
                        Some((AbstractType::ReturnAddress(_), _))
                    );
                AnalyzedInstruction {
                    opcode: instruction.opcode,
                    offset: instruction.offset,
                    length: instruction.length,
                    reached: instruction.is_reached(),
                    subroutines,
                    transfer,
                    stores_return_address,
                }
            })
            .collect();
        MethodAnalysis {
            instructions,
            code_length: self.code.code_array.len(),
        }
    }
}
