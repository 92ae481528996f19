//! Turning the raw code array into instructions with resolved operands

use super::instruction::{FieldOperand, Handler, Instruction, MethodOperand, Operand};
use super::method::MethodVerifier;
use super::opcodes::{self, Opcode};
use super::types::{AbstractType, ClassId};
use crate::jvm::class_file::{ConstantIndex, ConstantLookupError, ConstantTag};
use crate::jvm::{
    BaseType, BinaryName, FieldType, MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor,
    RefType, UnqualifiedName, VerifierErrorKind,
};
use byteorder::{BigEndian, ByteOrder};

/// Methods have to fit in 16-bit offsets, with room for the end offset of exception ranges
const MAX_CODE_LENGTH: usize = 65535;

pub(super) fn lookup_error(err: ConstantLookupError) -> VerifierErrorKind {
    match err {
        ConstantLookupError::OutOfRange => VerifierErrorKind::IllegalConstantIndex,
        ConstantLookupError::WrongKind => VerifierErrorKind::IllegalConstantType,
    }
}

impl<'a, 'c, 'g> MethodVerifier<'a, 'c, 'g> {
    /// Find instruction boundaries, then decode every operand
    pub(super) fn decode(&mut self) -> Result<(), VerifierErrorKind> {
        let code: &'c [u8] = &self.code.code_array;
        if code.len() >= MAX_CODE_LENGTH {
            return Err(VerifierErrorKind::CodeTooLong);
        }

        let mut code_data = vec![None; code.len()];
        let mut instructions = vec![];
        let mut offset = 0;
        while offset < code.len() {
            let length = opcodes::instruction_length(code, offset)
                .ok_or(VerifierErrorKind::IllegalInstruction(offset))?;
            if offset + length > code.len() {
                return Err(VerifierErrorKind::TruncatedInstruction(offset));
            }
            code_data[offset] = Some(instructions.len());
            instructions.push(Instruction::new(code[offset] as Opcode, offset, length));
            offset += length;
        }
        if instructions.is_empty() {
            return Err(VerifierErrorKind::EmptyCode);
        }

        self.instructions = instructions;
        self.code_data = code_data;
        for inumber in 0..self.instructions.len() {
            self.decode_operand(inumber)?;
        }
        log::trace!("Decoded {} instructions", self.instructions.len());
        Ok(())
    }

    /// Instruction number starting at an offset, if any instruction does
    fn instruction_at(&self, offset: usize) -> Option<usize> {
        self.code_data.get(offset).copied().flatten()
    }

    fn branch_target(&self, offset: usize, jump: i64) -> Result<usize, VerifierErrorKind> {
        let target = offset as i64 + jump;
        if target < 0 {
            return Err(VerifierErrorKind::IllegalBranchTarget);
        }
        self.instruction_at(target as usize)
            .ok_or(VerifierErrorKind::IllegalBranchTarget)
    }

    fn check_constant(&self, index: u16, mask: u32) -> Result<ConstantTag, VerifierErrorKind> {
        self.constants
            .check_tag(ConstantIndex(index), mask)
            .map_err(lookup_error)
    }

    /// Type named by a `CONSTANT_Class` entry (already checked to be one)
    fn class_constant(&self, index: ConstantIndex) -> Result<AbstractType, VerifierErrorKind> {
        let name = self.constants.class_name(index).map_err(lookup_error)?;
        self.names.class_constant(name).map_err(|err| match err {
            VerifierErrorKind::TooManyDimensions => err,
            _ => VerifierErrorKind::IllegalType,
        })
    }

    fn decode_operand(&mut self, inumber: usize) -> Result<(), VerifierErrorKind> {
        let code: &'c [u8] = &self.code.code_array;
        let offset = self.instructions[inumber].offset;
        let mut opcode = self.instructions[inumber].opcode;
        let mut protected = false;
        let u16_operand = || BigEndian::read_u16(&code[offset + 1..]);

        let operand = match opcode {
            opcodes::IFEQ..=opcodes::IF_ACMPNE
            | opcodes::GOTO
            | opcodes::JSR
            | opcodes::IFNULL
            | opcodes::IFNONNULL => {
                let jump = BigEndian::read_i16(&code[offset + 1..]) as i64;
                let target = self.branch_target(offset, jump)?;
                if opcode == opcodes::JSR {
                    Operand::Jsr { target, ret: None }
                } else {
                    Operand::Target(target)
                }
            }
            opcodes::GOTO_W | opcodes::JSR_W => {
                let jump = BigEndian::read_i32(&code[offset + 1..]) as i64;
                let target = self.branch_target(offset, jump)?;
                if opcode == opcodes::JSR_W {
                    Operand::Jsr { target, ret: None }
                } else {
                    Operand::Target(target)
                }
            }
            opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH => {
                Operand::Switch(self.switch_targets(opcode, offset)?)
            }

            opcodes::LDC => {
                let index = code[offset + 1] as u16;
                let mask = ConstantTag::Integer.bit()
                    | ConstantTag::Float.bit()
                    | ConstantTag::String.bit();
                Operand::Constant(ConstantIndex(index), self.check_constant(index, mask)?)
            }
            opcodes::LDC_W => {
                let index = u16_operand();
                let mask = ConstantTag::Integer.bit()
                    | ConstantTag::Float.bit()
                    | ConstantTag::String.bit();
                Operand::Constant(ConstantIndex(index), self.check_constant(index, mask)?)
            }
            opcodes::LDC2_W => {
                let index = u16_operand();
                let mask = ConstantTag::Long.bit() | ConstantTag::Double.bit();
                Operand::Constant(ConstantIndex(index), self.check_constant(index, mask)?)
            }

            opcodes::GETSTATIC..=opcodes::PUTFIELD => {
                let index = u16_operand();
                self.check_constant(index, ConstantTag::FieldRef.bit())?;
                let member = self
                    .constants
                    .member_ref(ConstantIndex(index))
                    .map_err(lookup_error)?;
                let class = self.names.class_constant(member.class_name)?;
                let field_type = FieldType::<BinaryName>::parse(member.descriptor)
                    .map_err(|_| VerifierErrorKind::BadDescriptor(member.descriptor.to_owned()))?;
                Operand::Field(Box::new(FieldOperand {
                    class,
                    name: member.name.to_owned(),
                    descriptor: member.descriptor.to_owned(),
                    field_type: self.names.field_type(&field_type)?,
                }))
            }

            opcodes::INVOKEVIRTUAL
            | opcodes::INVOKESPECIAL
            | opcodes::INVOKESTATIC
            | opcodes::INVOKEINTERFACE => {
                let index = u16_operand();
                let mask = if opcode == opcodes::INVOKEINTERFACE {
                    ConstantTag::InterfaceMethodRef.bit()
                } else {
                    ConstantTag::MethodRef.bit()
                };
                self.check_constant(index, mask)?;
                let member = self
                    .constants
                    .member_ref(ConstantIndex(index))
                    .map_err(lookup_error)?;
                let class = self.names.class_constant(member.class_name)?;
                let descriptor = MethodDescriptor::<BinaryName>::parse(member.descriptor)
                    .map_err(|_| VerifierErrorKind::BadDescriptor(member.descriptor.to_owned()))?;

                if member.name == UnqualifiedName::INIT.as_str() {
                    if opcode != opcodes::INVOKESPECIAL {
                        return Err(VerifierErrorKind::InitializerNotInvokespecial);
                    }
                    opcode = opcodes::INVOKEINIT;
                } else if member.name.starts_with('<') {
                    return Err(VerifierErrorKind::IllegalInternalCall);
                } else if opcode == opcodes::INVOKESPECIAL && !self.is_own_or_superclass(class) {
                    return Err(VerifierErrorKind::IllegalNonvirtualCall);
                }

                if opcode == opcodes::INVOKEINTERFACE {
                    let args_size = descriptor.parameter_length(true);
                    if code[offset + 3] as usize != args_size {
                        return Err(VerifierErrorKind::InconsistentInterfaceArgsSize);
                    }
                    if code[offset + 4] != 0 {
                        return Err(VerifierErrorKind::NonZeroInterfaceOperand);
                    }
                }

                if opcode == opcodes::INVOKEVIRTUAL || opcode == opcodes::INVOKESPECIAL {
                    protected = self.is_protected_call(class, member.name, member.descriptor)?;
                }

                let parameters = descriptor
                    .parameters
                    .iter()
                    .map(|parameter| self.names.field_type(parameter))
                    .collect::<Result<Vec<_>, _>>()?;
                let return_type = descriptor
                    .return_type
                    .as_ref()
                    .map(|typ| self.names.field_type(typ))
                    .transpose()?;
                Operand::Method(Box::new(MethodOperand {
                    class,
                    name: member.name.to_owned(),
                    descriptor: member.descriptor.to_owned(),
                    parameters,
                    return_type,
                }))
            }

            opcodes::INSTANCEOF
            | opcodes::CHECKCAST
            | opcodes::NEW
            | opcodes::ANEWARRAY
            | opcodes::MULTIANEWARRAY => {
                let index = u16_operand();
                self.check_constant(index, ConstantTag::Class.bit())?;
                let target = self.class_constant(ConstantIndex(index))?;
                match opcode {
                    opcodes::ANEWARRAY => Operand::Type(target.array_of()?),
                    opcodes::NEW => {
                        if !target.is_plain_object() {
                            return Err(VerifierErrorKind::IllegalMultiNewArray);
                        }
                        Operand::New {
                            uninitialized: AbstractType::NewObject(inumber),
                            class: target,
                        }
                    }
                    opcodes::MULTIANEWARRAY => {
                        let dimensions = code[offset + 3] as usize;
                        if dimensions == 0 || dimensions > target.dimensions() {
                            return Err(VerifierErrorKind::IllegalDimensions);
                        }
                        Operand::MultiNewArray {
                            array: target,
                            dimensions,
                        }
                    }
                    _ => Operand::Type(target),
                }
            }

            opcodes::NEWARRAY => {
                let base = BaseType::from_newarray_code(code[offset + 1])
                    .ok_or(VerifierErrorKind::BadNewArrayType)?;
                Operand::Type(AbstractType::primitive_array(base, 1))
            }

            opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
                let shortcut = opcode - opcodes::ILOAD_0;
                opcode = opcodes::ILOAD + shortcut / 4;
                self.local_operand(opcode, (shortcut % 4) as usize)?
            }
            opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
                let shortcut = opcode - opcodes::ISTORE_0;
                opcode = opcodes::ISTORE + shortcut / 4;
                self.local_operand(opcode, (shortcut % 4) as usize)?
            }
            opcodes::WIDE => {
                opcode = code[offset + 1] as Opcode;
                let local = BigEndian::read_u16(&code[offset + 2..]) as usize;
                self.local_operand(opcode, local)?
            }
            opcodes::ILOAD..=opcodes::ALOAD
            | opcodes::ISTORE..=opcodes::ASTORE
            | opcodes::IINC
            | opcodes::RET => self.local_operand(opcode, code[offset + 1] as usize)?,

            _ if opcode >= opcodes::BREAKPOINT => return Err(VerifierErrorKind::QuickInstruction),
            _ => Operand::None,
        };

        let instruction = &mut self.instructions[inumber];
        instruction.opcode = opcode;
        instruction.operand = operand;
        instruction.protected = protected;
        Ok(())
    }

    /// Targets of a switch, default first
    fn switch_targets(&self, opcode: Opcode, offset: usize) -> Result<Vec<usize>, VerifierErrorKind> {
        let code: &[u8] = &self.code.code_array;
        let aligned = opcodes::switch_operands_start(offset);
        let word = |at: usize| {
            opcodes::read_i32(code, at).ok_or(VerifierErrorKind::TruncatedInstruction(offset))
        };

        let target_offsets = if opcode == opcodes::TABLESWITCH {
            let low = word(aligned + 4)? as i64;
            let high = word(aligned + 8)? as i64;
            let keys = (high - low + 1) as usize;
            (0..keys)
                .map(|k| word(aligned + 12 + 4 * k))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            let npairs = word(aligned + 4)? as usize;
            let keys = (0..npairs)
                .map(|k| word(aligned + 8 + 8 * k))
                .collect::<Result<Vec<_>, _>>()?;
            if keys.windows(2).any(|pair| pair[0] >= pair[1]) {
                return Err(VerifierErrorKind::UnsortedLookupSwitch);
            }
            (0..npairs)
                .map(|k| word(aligned + 12 + 8 * k))
                .collect::<Result<Vec<_>, _>>()?
        };

        let default = self
            .branch_target(offset, word(aligned)? as i64)
            .map_err(|_| VerifierErrorKind::IllegalSwitchDefault)?;
        let mut targets = vec![default];
        for jump in target_offsets {
            let target = self
                .branch_target(offset, jump as i64)
                .map_err(|_| VerifierErrorKind::IllegalTableSwitchBranch)?;
            targets.push(target);
        }
        Ok(targets)
    }

    fn local_operand(&self, opcode: Opcode, local: usize) -> Result<Operand, VerifierErrorKind> {
        let max_locals = self.code.max_locals as usize;
        let last_slot = if opcodes::is_wide_local(opcode) {
            local + 1
        } else {
            local
        };
        if last_slot >= max_locals {
            return Err(VerifierErrorKind::IllegalLocalIndex);
        }
        Ok(if opcode == opcodes::RET {
            Operand::Ret {
                local,
                successors: None,
            }
        } else {
            Operand::Local(local)
        })
    }

    /// Is the type the current class or one of its superclasses?
    fn is_own_or_superclass(&self, class: AbstractType) -> bool {
        match class {
            AbstractType::Reference(RefType::Object(id)) => {
                id == self.class.class_id || self.class.is_superclass(id)
            }
            _ => false,
        }
    }

    /// Is this a call to a protected method inherited from a superclass in another package?
    ///
    /// Such calls need the receiver to be an instance of the current class.
    fn is_protected_call(
        &self,
        class: AbstractType,
        name: &str,
        descriptor: &str,
    ) -> Result<bool, VerifierErrorKind> {
        let class_id: ClassId = match class {
            AbstractType::Reference(RefType::Object(id)) if self.class.is_superclass(id) => id,
            _ => return Ok(false),
        };
        let called = self.names.resolve(class_id)?;
        Ok(match called.find_method(name, descriptor) {
            Some(method) => {
                method.access_flags.contains(MethodAccessFlags::PROTECTED)
                    && (method.access_flags.contains(MethodAccessFlags::PRIVATE)
                        || !called.same_package(self.class.class_data))
            }
            None => false,
        })
    }

    /// Resolve the exception table to instruction numbers
    pub(super) fn init_exception_table(&mut self) -> Result<(), VerifierErrorKind> {
        let code_length = self.code.code_array.len();
        let mut handlers = Vec::with_capacity(self.code.exception_table.len());

        for entry in &self.code.exception_table {
            let start_pc = entry.start_pc as usize;
            let end_pc = entry.end_pc as usize;
            let handler_pc = entry.handler_pc as usize;

            let start = self.instruction_at(start_pc);
            let end = if end_pc == code_length {
                Some(self.instructions.len())
            } else {
                self.instruction_at(end_pc)
            };
            let (start, end) = match (start, end) {
                (Some(start), Some(end)) if start_pc < end_pc => (start, end),
                _ => return Err(VerifierErrorKind::IllegalExceptionRange),
            };

            let handler = match self.instruction_at(handler_pc) {
                Some(handler) if handler_pc > 0 => handler,
                _ => return Err(VerifierErrorKind::IllegalExceptionHandler),
            };

            let catch_type = if entry.catch_type.0 == 0 {
                AbstractType::THROWABLE
            } else {
                self.check_constant(entry.catch_type.0, ConstantTag::Class.bit())?;
                let name = self
                    .constants
                    .class_name(entry.catch_type)
                    .map_err(lookup_error)?;
                AbstractType::class(self.names.intern(name))
            };

            handlers.push(Handler {
                start,
                end,
                handler,
                catch_type,
            });
        }

        self.handlers = handlers;
        Ok(())
    }
}
