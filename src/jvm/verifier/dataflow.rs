//! Abstract interpretation of the instructions, repeated until no entry state changes
//!
//! Processing one instruction goes through the same steps every time: check the registers it
//! reads, check the path flags, pop its operands (checking their types), update the registers,
//! update the flags, push its results, then merge the resulting state into every successor
//! (including exception handlers covering the instruction).

use super::arena::{RegisterState, StackState, SubroutineMask};
use super::instruction::{Operand, PathFlags};
use super::method::MethodVerifier;
use super::opcodes::{self, ArrayKind, Expect, Opcode, Push, Shuffle, StackEffect};
use super::types::{AbstractType, ClassId};
use crate::jvm::class_file::ConstantTag;
use crate::jvm::{BaseType, RefType, VerifierErrorKind};
use crate::util::BitSet;

/// Every occurrence of `from` in the state becomes `to`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Replacement {
    from: AbstractType,
    to: AbstractType,
}

/// Outcome of popping the operands of an instruction
struct Popped<'a> {
    /// Stack left once the operands are gone
    stack: StackState<'a>,

    /// Operands, bottom of the stack first
    values: Vec<AbstractType>,

    /// Groups moved by a stack shuffle, top group first (items in each group bottom first)
    groups: Vec<Vec<AbstractType>>,

    replace: Option<Replacement>,
}

/// How an instruction reads a local variable
enum RegisterUse {
    Exactly(AbstractType),
    Reference,
    ReturnAddress,
    Pair(AbstractType),
}

fn expected_description(expect: Expect) -> &'static str {
    match expect {
        Expect::Int => "integer",
        Expect::Float => "float",
        Expect::Long => "long",
        Expect::Double => "double",
        Expect::Object => "object",
        Expect::Reference => "object/array",
        Expect::Uninitialized => "uninitialized object",
        Expect::Array(ArrayKind::Int) => "array of ints",
        Expect::Array(ArrayKind::Long) => "array of longs",
        Expect::Array(ArrayKind::Float) => "array of floats",
        Expect::Array(ArrayKind::Double) => "array of doubles",
        Expect::Array(ArrayKind::Char) => "array of chars",
        Expect::Array(ArrayKind::Short) => "array of shorts",
        Expect::Array(ArrayKind::ByteOrBoolean) => "array of bytes or booleans",
        Expect::Array(ArrayKind::Reference) => "array of objects or arrays",
        Expect::Array(ArrayKind::Any) => "array",
    }
}

fn array_matches(kind: ArrayKind, value: AbstractType) -> bool {
    let primitive = |base: BaseType| value == AbstractType::primitive_array(base, 1);
    match kind {
        ArrayKind::Int => primitive(BaseType::Int),
        ArrayKind::Long => primitive(BaseType::Long),
        ArrayKind::Float => primitive(BaseType::Float),
        ArrayKind::Double => primitive(BaseType::Double),
        ArrayKind::Char => primitive(BaseType::Char),
        ArrayKind::Short => primitive(BaseType::Short),
        ArrayKind::ByteOrBoolean => primitive(BaseType::Byte) || primitive(BaseType::Boolean),
        ArrayKind::Reference => match value {
            AbstractType::Reference(RefType::ObjectArray(_)) => true,
            AbstractType::Reference(RefType::PrimitiveArray(arr)) => arr.additional_dimensions > 0,
            _ => false,
        },
        ArrayKind::Any => value.is_array(),
    }
}

/// What an instruction expects on the stack for a value of this type
fn expect_for(typ: AbstractType) -> Expect {
    match typ {
        AbstractType::Integer => Expect::Int,
        AbstractType::Float => Expect::Float,
        AbstractType::Long => Expect::Long,
        AbstractType::Double => Expect::Double,
        _ => Expect::Reference,
    }
}

/// Pop enough items to cover some number of slots
fn pop_group<'a>(
    stack: StackState<'a>,
    slots: usize,
) -> Result<(Vec<AbstractType>, StackState<'a>), VerifierErrorKind> {
    let mut items = vec![];
    let mut remaining = slots;
    let mut stack = stack;
    while remaining > 0 {
        let (item, rest) = stack.pop().ok_or(VerifierErrorKind::EmptyStack)?;
        if item.size() > remaining {
            return Err(VerifierErrorKind::SplitLongOrDouble);
        }
        remaining -= item.size();
        items.push(item);
        stack = rest;
    }
    items.reverse();
    Ok((items, stack))
}

impl<'a, 'c, 'g> MethodVerifier<'a, 'c, 'g> {
    /// Set up the state on entry to the method
    pub(super) fn initialize_dataflow(&mut self) -> Result<(), VerifierErrorKind> {
        let mut registers = vec![];
        let mut or_flags = PathFlags::REACHED;
        if !self.method.is_static() {
            if self.method.is_initializer() && self.class.class_id != ClassId::OBJECT {
                registers.push(AbstractType::InitObject);
                or_flags |= PathFlags::NEED_CONSTRUCTOR;
            } else {
                registers.push(self.class.class_type());
            }
        }
        for parameter in &self.method.parameters {
            registers.push(*parameter);
            if let Some(half) = parameter.second_half() {
                registers.push(half);
            }
        }
        if registers.len() > self.code.max_locals as usize {
            return Err(VerifierErrorKind::IllegalLocalIndex);
        }

        let registers = self.arena.registers(registers);
        let entry = &mut self.instructions[0];
        entry.stack = Some(StackState::EMPTY);
        entry.registers = Some(RegisterState {
            registers,
            masks: &[],
        });
        entry.and_flags = PathFlags::empty();
        entry.or_flags = or_flags;
        entry.changed = true;
        Ok(())
    }

    /// Process changed instructions until nothing changes anymore
    pub(super) fn run_dataflow(&mut self) -> Result<(), VerifierErrorKind> {
        let mut sweeps = 0;
        loop {
            let mut work_to_do = false;
            for inumber in 0..self.instructions.len() {
                if !self.instructions[inumber].changed {
                    continue;
                }
                self.instructions[inumber].changed = false;
                work_to_do = true;
                self.process_instruction(inumber)?;
            }
            if !work_to_do {
                break;
            }
            sweeps += 1;
        }
        log::trace!("Fixpoint reached after {} sweeps", sweeps);
        Ok(())
    }

    fn process_instruction(&mut self, inumber: usize) -> Result<(), VerifierErrorKind> {
        let instruction = &self.instructions[inumber];
        let stack = instruction.stack.unwrap_or(StackState::EMPTY);
        let registers = instruction.registers.unwrap_or(RegisterState {
            registers: &[],
            masks: &[],
        });
        log::trace!(
            "{:>5}: opcode {:#04x} stack {:?} registers {:?} masks {:?}",
            instruction.offset,
            instruction.opcode,
            stack,
            registers.registers,
            registers.masks
        );

        self.check_register_values(inumber, registers)?;
        self.check_flags(inumber)?;
        let popped = self.pop_stack(inumber, stack)?;
        let new_registers = self.update_registers(inumber, registers, &popped)?;
        let (and_flags, or_flags) = self.update_flags(inumber, &popped);
        let new_stack = self.push_stack(inumber, &popped, registers)?;
        self.merge_into_successors(
            inumber,
            registers,
            new_registers,
            new_stack,
            and_flags,
            or_flags,
            popped.replace,
        )
    }

    /// Make sure the local variables read by the instruction hold the right types
    fn check_register_values(
        &self,
        inumber: usize,
        registers: RegisterState<'a>,
    ) -> Result<(), VerifierErrorKind> {
        let instruction = &self.instructions[inumber];
        let (local, register_use) = match (instruction.opcode, &instruction.operand) {
            (opcodes::ILOAD | opcodes::IINC, Operand::Local(local)) => {
                (*local, RegisterUse::Exactly(AbstractType::Integer))
            }
            (opcodes::FLOAD, Operand::Local(local)) => {
                (*local, RegisterUse::Exactly(AbstractType::Float))
            }
            (opcodes::ALOAD, Operand::Local(local)) => (*local, RegisterUse::Reference),
            (opcodes::RET, Operand::Ret { local, .. }) => (*local, RegisterUse::ReturnAddress),
            (opcodes::LLOAD, Operand::Local(local)) => {
                (*local, RegisterUse::Pair(AbstractType::Long))
            }
            (opcodes::DLOAD, Operand::Local(local)) => {
                (*local, RegisterUse::Pair(AbstractType::Double))
            }
            _ => return Ok(()),
        };

        if let RegisterUse::Pair(typ) = register_use {
            if local + 1 >= registers.count() {
                return Err(VerifierErrorKind::UninitializedRegisterPair(local));
            }
            return if registers.get(local) == typ
                && typ.second_half() == Some(registers.get(local + 1))
            {
                Ok(())
            } else {
                Err(VerifierErrorKind::WrongRegisterPairType(local))
            };
        }

        if local >= registers.count() {
            return Err(VerifierErrorKind::UninitializedRegister(local));
        }
        let value = registers.get(local);
        let matches = match register_use {
            RegisterUse::Exactly(typ) => value == typ,
            RegisterUse::Reference => value.is_reference() || value.is_uninitialized(),
            RegisterUse::ReturnAddress => matches!(value, AbstractType::ReturnAddress(_)),
            RegisterUse::Pair(_) => false,
        };
        if matches {
            Ok(())
        } else if matches!(value, AbstractType::ReturnAddress(_)) {
            Err(VerifierErrorKind::ReturnAddressLoad(local))
        } else {
            Err(VerifierErrorKind::WrongRegisterType(local))
        }
    }

    /// Returns are only allowed once the constructor obligations are met
    fn check_flags(&self, inumber: usize) -> Result<(), VerifierErrorKind> {
        let instruction = &self.instructions[inumber];
        match instruction.opcode {
            opcodes::RETURN => {
                if instruction.or_flags.contains(PathFlags::NEED_CONSTRUCTOR)
                    && !instruction.and_flags.contains(PathFlags::CONSTRUCTED)
                {
                    return Err(VerifierErrorKind::ConstructorNotCalled);
                }
            }
            opcodes::IRETURN..=opcodes::ARETURN => {
                if instruction.or_flags.contains(PathFlags::NO_RETURN) {
                    return Err(VerifierErrorKind::CannotReturnNormally);
                }
            }
            _ => (),
        }
        Ok(())
    }

    /// Operands expected by instructions whose effect depends on a constant
    fn constant_pops(&self, inumber: usize) -> Vec<Expect> {
        let instruction = &self.instructions[inumber];
        match &instruction.operand {
            Operand::Field(field) => match instruction.opcode {
                opcodes::PUTSTATIC => vec![expect_for(field.field_type)],
                opcodes::GETFIELD => vec![Expect::Reference],
                opcodes::PUTFIELD => vec![Expect::Reference, expect_for(field.field_type)],
                _ => vec![],
            },
            Operand::Method(method) => {
                let receiver = match instruction.opcode {
                    opcodes::INVOKESTATIC => None,
                    opcodes::INVOKEINIT => Some(Expect::Uninitialized),
                    _ => Some(Expect::Reference),
                };
                receiver
                    .into_iter()
                    .chain(method.parameters.iter().map(|param| expect_for(*param)))
                    .collect()
            }
            Operand::MultiNewArray { dimensions, .. } => vec![Expect::Int; *dimensions],
            _ => vec![],
        }
    }

    /// Is this a `putfield` of a field declared by the class being verified?
    fn is_own_field(&self, inumber: usize) -> bool {
        match &self.instructions[inumber].operand {
            Operand::Field(field) => {
                field.class == self.class.class_type()
                    && self
                        .class
                        .class_data
                        .find_field(&field.name, &field.descriptor)
                        .is_some()
            }
            _ => false,
        }
    }

    /// Check a popped value against what the instruction expects
    ///
    /// Returns the value the instruction should treat the operand as.
    fn check_popped(
        &self,
        inumber: usize,
        expect: Expect,
        value: AbstractType,
    ) -> Result<AbstractType, VerifierErrorKind> {
        let opcode = self.instructions[inumber].opcode;
        let matches = match expect {
            Expect::Int => value == AbstractType::Integer,
            Expect::Float => value == AbstractType::Float,
            Expect::Long => value == AbstractType::Long,
            Expect::Double => value == AbstractType::Double,
            Expect::Object => value.is_plain_object() || value == AbstractType::Null,
            Expect::Uninitialized => value.is_uninitialized(),
            Expect::Array(kind) => value == AbstractType::Null || array_matches(kind, value),
            Expect::Reference => {
                if value.is_reference() {
                    true
                } else if matches!(value, AbstractType::ReturnAddress(_)) && opcode == opcodes::ASTORE
                {
                    true
                } else if value.is_uninitialized()
                    && matches!(
                        opcode,
                        opcodes::ASTORE
                            | opcodes::ALOAD
                            | opcodes::IFNULL
                            | opcodes::IFNONNULL
                            | opcodes::IF_ACMPEQ
                            | opcodes::IF_ACMPNE
                    )
                {
                    true
                } else if value == AbstractType::InitObject
                    && opcode == opcodes::PUTFIELD
                    && self.is_own_field(inumber)
                {
                    return Ok(self.class.class_type());
                } else {
                    false
                }
            }
        };
        if matches {
            Ok(value)
        } else {
            Err(VerifierErrorKind::ExpectedOnStack(expected_description(expect)))
        }
    }

    fn pop_shuffle(
        &self,
        stack: StackState<'a>,
        shuffle: Shuffle,
    ) -> Result<Popped<'a>, VerifierErrorKind> {
        let mut stack = stack;
        let mut groups = Vec::with_capacity(shuffle.pops.len());
        for slots in shuffle.pops {
            let (group, rest) = pop_group(stack, *slots)?;
            groups.push(group);
            stack = rest;
        }
        Ok(Popped {
            stack,
            values: vec![],
            groups,
            replace: None,
        })
    }

    /// Pop and check the operands of the instruction
    fn pop_stack(
        &self,
        inumber: usize,
        stack: StackState<'a>,
    ) -> Result<Popped<'a>, VerifierErrorKind> {
        let instruction = &self.instructions[inumber];
        let opcode = instruction.opcode;
        let expects: Vec<Expect> = match opcodes::stack_effect(opcode) {
            StackEffect::Shuffle(shuffle) => return self.pop_shuffle(stack, shuffle),
            StackEffect::Fixed { pops, .. } => pops.to_vec(),
            StackEffect::FromConstant => self.constant_pops(inumber),
        };

        let mut values = vec![AbstractType::Bogus; expects.len()];
        let mut remaining = stack;
        for (idx, expect) in expects.iter().enumerate().rev() {
            let (value, rest) = remaining.pop().ok_or(VerifierErrorKind::EmptyStack)?;
            values[idx] = self.check_popped(inumber, *expect, value)?;
            remaining = rest;
        }

        let names = self.names;
        let mut replace = None;
        match (opcode, &instruction.operand) {
            (opcodes::AASTORE, _) => {
                let (array, value) = (values[0], values[2]);
                if array != AbstractType::Null {
                    let element = array.element_type();
                    let lenient = element.is_plain_object() && value.is_plain_object();
                    if !lenient && !names.is_assignable(value, element)? {
                        return Err(VerifierErrorKind::IncompatibleArrayStore);
                    }
                }
            }

            (opcodes::GETFIELD | opcodes::PUTFIELD | opcodes::PUTSTATIC, Operand::Field(field)) => {
                if opcode != opcodes::PUTSTATIC && !names.is_assignable(values[0], field.class)? {
                    return Err(VerifierErrorKind::IncompatibleFieldType);
                }
                if opcode != opcodes::GETFIELD {
                    let value = values[values.len() - 1];
                    if !names.is_assignable(value, field.field_type)? {
                        return Err(VerifierErrorKind::BadPutField);
                    }
                }
            }

            (opcodes::ATHROW, _) => {
                if !names.is_assignable(values[0], AbstractType::THROWABLE)? {
                    return Err(VerifierErrorKind::ThrowNonThrowable);
                }
            }

            (opcodes::INVOKEINIT, Operand::Method(method)) => {
                let receiver = values[0];
                let initialized = match receiver {
                    AbstractType::NewObject(new_inumber) => {
                        let class = match &self.instructions[new_inumber].operand {
                            Operand::New { class, .. } => *class,
                            _ => AbstractType::Bogus,
                        };
                        if class != method.class {
                            return Err(VerifierErrorKind::WrongInitializer);
                        }
                        class
                    }
                    _ => {
                        if Some(method.class) != self.class.superclass_type()
                            && method.class != self.class.class_type()
                        {
                            return Err(VerifierErrorKind::WrongInitializer);
                        }
                        self.class.class_type()
                    }
                };
                replace = Some(Replacement {
                    from: receiver,
                    to: initialized,
                });
                self.check_arguments(&method.parameters, &values[1..])?;
            }

            (
                opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKEINTERFACE,
                Operand::Method(method),
            ) => {
                let receiver = values[0];
                if !names.is_assignable(receiver, method.class)? {
                    return Err(VerifierErrorKind::IncompatibleReceiver);
                }
                let current = self.class.class_type();
                if opcode == opcodes::INVOKESPECIAL && !names.is_assignable(receiver, current)? {
                    return Err(VerifierErrorKind::IncompatibleSpecialReceiver);
                }
                if instruction.protected && !names.is_assignable(receiver, current)? {
                    let array_clone = method.class == AbstractType::OBJECT
                        && receiver.is_array()
                        && method.name == "clone";
                    if !array_clone {
                        return Err(VerifierErrorKind::BadProtectedAccess);
                    }
                }
                self.check_arguments(&method.parameters, &values[1..])?;
            }

            (opcodes::INVOKESTATIC, Operand::Method(method)) => {
                self.check_arguments(&method.parameters, &values)?;
            }

            (opcodes::RETURN, _) => {
                if self.method.return_type.is_some() {
                    return Err(VerifierErrorKind::WrongReturnType);
                }
            }

            (opcodes::IRETURN..=opcodes::ARETURN, _) => match self.method.return_type {
                Some(return_type) if names.is_assignable(values[0], return_type)? => (),
                _ => return Err(VerifierErrorKind::WrongReturnType),
            },

            (opcodes::NEW, Operand::New { uninitialized, .. }) => {
                if remaining.iter().any(|item| item == *uninitialized) {
                    return Err(VerifierErrorKind::UninitializedAtNew);
                }
                replace = Some(Replacement {
                    from: *uninitialized,
                    to: AbstractType::Bogus,
                });
            }

            _ => (),
        }

        Ok(Popped {
            stack: remaining,
            values,
            groups: vec![],
            replace,
        })
    }

    /// Reference arguments must be assignable to the declared parameter types
    fn check_arguments(
        &self,
        parameters: &[AbstractType],
        arguments: &[AbstractType],
    ) -> Result<(), VerifierErrorKind> {
        for (parameter, argument) in parameters.iter().zip(arguments) {
            if matches!(parameter, AbstractType::Reference(_))
                && !self.names.is_assignable(*argument, *parameter)?
            {
                return Err(VerifierErrorKind::IncompatibleArgument);
            }
        }
        Ok(())
    }

    /// Registers after the instruction has run
    fn update_registers(
        &self,
        inumber: usize,
        registers: RegisterState<'a>,
        popped: &Popped<'a>,
    ) -> Result<RegisterState<'a>, VerifierErrorKind> {
        let instruction = &self.instructions[inumber];
        let opcode = instruction.opcode;
        let mut new_registers = registers.registers;
        let mut masks = registers.masks;

        // First local accessed, and how many slots
        let mut accessed: Option<(usize, usize)> = None;

        match (opcode, &instruction.operand) {
            (
                opcodes::ISTORE | opcodes::FSTORE | opcodes::ASTORE | opcodes::LSTORE
                | opcodes::DSTORE,
                Operand::Local(local),
            ) => {
                let local = *local;
                let value = popped.values[0];
                let slots = if opcodes::is_wide_local(opcode) { 2 } else { 1 };
                accessed = Some((local, slots));

                let unchanged = local + slots <= registers.count()
                    && registers.get(local) == value
                    && (slots == 1 || value.second_half() == Some(registers.get(local + 1)));
                if !unchanged {
                    let mut updated = registers.registers.to_vec();
                    if updated.len() < local + slots {
                        updated.resize(local + slots, AbstractType::Bogus);
                    }
                    updated[local] = value;
                    if slots == 2 {
                        updated[local + 1] = value.second_half().unwrap_or(AbstractType::Bogus);
                    }
                    new_registers = self.arena.registers(updated);
                }
            }
            (opcodes::ILOAD | opcodes::FLOAD | opcodes::ALOAD | opcodes::IINC, Operand::Local(local)) => {
                accessed = Some((*local, 1));
            }
            (opcodes::LLOAD | opcodes::DLOAD, Operand::Local(local)) => {
                accessed = Some((*local, 2));
            }
            (opcodes::RET, Operand::Ret { local, .. }) => {
                accessed = Some((*local, 1));
            }
            (opcodes::JSR | opcodes::JSR_W, Operand::Jsr { target, ret }) => {
                if masks.iter().any(|mask| mask.entry == *target) {
                    return Err(VerifierErrorKind::RecursiveJsr);
                }
                if !(self.redo_jsr && ret.is_none()) {
                    let modifies = self
                        .arena
                        .bit_set(BitSet::with_capacity(self.code.max_locals as usize));
                    masks = self.arena.masks(masks.iter().copied().chain([SubroutineMask {
                        entry: *target,
                        modifies,
                    }]));
                }
            }
            (opcodes::INVOKEINIT | opcodes::NEW, _) => {
                if let Some(Replacement { from, to }) = popped.replace {
                    let replaced: Vec<usize> = (0..registers.count())
                        .filter(|reg| registers.registers[*reg] == from)
                        .collect();
                    if !replaced.is_empty() {
                        new_registers = self.arena.registers(
                            registers
                                .registers
                                .iter()
                                .map(|reg| if *reg == from { to } else { *reg }),
                        );
                        masks = self.arena.mark_modified(masks, replaced.iter().copied());
                    }
                }
            }
            _ => (),
        }

        if let Some((local, slots)) = accessed {
            masks = self.arena.mark_modified(masks, local..local + slots);
        }

        Ok(RegisterState {
            registers: new_registers,
            masks,
        })
    }

    fn update_flags(&self, inumber: usize, popped: &Popped<'a>) -> (PathFlags, PathFlags) {
        let instruction = &self.instructions[inumber];
        let mut and_flags = instruction.and_flags;
        if instruction.opcode == opcodes::INVOKEINIT
            && matches!(
                popped.replace,
                Some(Replacement {
                    from: AbstractType::InitObject,
                    ..
                })
            )
        {
            and_flags |= PathFlags::CONSTRUCTED;
        }
        (and_flags, instruction.or_flags)
    }

    /// Reference pushed by an instruction with a fixed stack effect
    fn pushed_reference(
        &self,
        inumber: usize,
        popped: &Popped<'a>,
        registers: RegisterState<'a>,
    ) -> AbstractType {
        let instruction = &self.instructions[inumber];
        match (instruction.opcode, &instruction.operand) {
            (opcodes::ACONST_NULL, _) => AbstractType::Null,
            (opcodes::NEW, Operand::New { uninitialized, .. }) => *uninitialized,
            (opcodes::CHECKCAST | opcodes::NEWARRAY | opcodes::ANEWARRAY, Operand::Type(typ)) => {
                *typ
            }
            (opcodes::AALOAD, _) => popped
                .values
                .first()
                .map_or(AbstractType::Bogus, |array| array.element_type()),
            (opcodes::ALOAD, Operand::Local(local)) => registers.get(*local),
            _ => AbstractType::Bogus,
        }
    }

    /// Push the results of the instruction
    fn push_stack(
        &self,
        inumber: usize,
        popped: &Popped<'a>,
        registers: RegisterState<'a>,
    ) -> Result<StackState<'a>, VerifierErrorKind> {
        let instruction = &self.instructions[inumber];
        let opcode: Opcode = instruction.opcode;
        let mut stack = popped.stack;

        match opcodes::stack_effect(opcode) {
            StackEffect::Shuffle(shuffle) => {
                for group in shuffle.pushes {
                    for item in &popped.groups[*group] {
                        stack = self.arena.push(stack, *item);
                    }
                }
            }
            StackEffect::Fixed { pushes, .. } => {
                for push in pushes {
                    let item = match push {
                        Push::Int => AbstractType::Integer,
                        Push::Float => AbstractType::Float,
                        Push::Long => AbstractType::Long,
                        Push::Double => AbstractType::Double,
                        Push::ReturnAddress => match instruction.operand {
                            Operand::Jsr { target, .. } => AbstractType::ReturnAddress(target),
                            _ => AbstractType::Bogus,
                        },
                        Push::Reference => self.pushed_reference(inumber, popped, registers),
                    };
                    stack = self.arena.push(stack, item);
                }
            }
            StackEffect::FromConstant => {
                let pushed = match &instruction.operand {
                    Operand::Constant(_, tag) => Some(match tag {
                        ConstantTag::Integer => AbstractType::Integer,
                        ConstantTag::Float => AbstractType::Float,
                        ConstantTag::Long => AbstractType::Long,
                        ConstantTag::Double => AbstractType::Double,
                        _ => AbstractType::STRING,
                    }),
                    Operand::Field(field)
                        if opcode == opcodes::GETFIELD || opcode == opcodes::GETSTATIC =>
                    {
                        Some(field.field_type)
                    }
                    Operand::Method(method) => method.return_type,
                    Operand::MultiNewArray { array, .. } => Some(*array),
                    _ => None,
                };
                if let Some(item) = pushed {
                    stack = self.arena.push(stack, item);
                }
            }
        }

        // Running `<init>` initializes every copy of the object
        if opcode == opcodes::INVOKEINIT {
            if let Some(Replacement { from, to }) = popped.replace {
                if stack.iter().any(|item| item == from) {
                    let items = stack.to_vec();
                    stack = self
                        .arena
                        .stack_from(items.into_iter().map(|item| if item == from { to } else { item }));
                }
            }
        }

        if stack.size > self.code.max_stack as usize {
            return Err(VerifierErrorKind::StackOverflow);
        }
        Ok(stack)
    }

    /// Instructions following a `ret`, computed the first time they are needed
    fn ret_successors(
        &mut self,
        inumber: usize,
        registers: RegisterState<'a>,
    ) -> Vec<usize> {
        let local = match &self.instructions[inumber].operand {
            Operand::Ret {
                successors: Some(successors),
                ..
            } => return successors.clone(),
            Operand::Ret { local, .. } => *local,
            _ => return vec![],
        };
        let entry = match registers.get(local) {
            AbstractType::ReturnAddress(entry) => entry,
            _ => return vec![],
        };

        let successors: Vec<usize> = self
            .instructions
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, instruction)| {
                opcodes::is_jsr(instruction.opcode) && instruction.operand.target() == Some(entry)
            })
            .map(|(jsr, _)| jsr + 1)
            .collect();
        for successor in &successors {
            if let Some(instruction) = self.instructions.get_mut(*successor) {
                instruction.is_target = true;
            }
        }
        if let Operand::Ret {
            successors: cached, ..
        } = &mut self.instructions[inumber].operand
        {
            *cached = Some(successors.clone());
        }
        successors
    }

    #[allow(clippy::too_many_arguments)]
    fn merge_into_successors(
        &mut self,
        inumber: usize,
        old_registers: RegisterState<'a>,
        registers: RegisterState<'a>,
        stack: StackState<'a>,
        and_flags: PathFlags,
        or_flags: PathFlags,
        replace: Option<Replacement>,
    ) -> Result<(), VerifierErrorKind> {
        let opcode = self.instructions[inumber].opcode;
        let successors: Vec<usize> = match opcode {
            _ if opcodes::is_return(opcode) || opcode == opcodes::ATHROW => vec![],
            opcodes::RET => self.ret_successors(inumber, registers),
            _ => match self.instructions[inumber].operand.clone() {
                Operand::Target(target) if opcodes::is_conditional_branch(opcode) => {
                    self.instructions[target].is_target = true;
                    vec![inumber + 1, target]
                }
                Operand::Target(target) => {
                    self.instructions[target].is_target = true;
                    vec![target]
                }
                Operand::Jsr { target, ret } => {
                    if let Some(ret) = ret {
                        self.instructions[ret].changed = true;
                    }
                    self.instructions[target].is_target = true;
                    vec![target]
                }
                Operand::Switch(targets) => {
                    for target in &targets {
                        self.instructions[*target].is_target = true;
                    }
                    targets
                }
                _ => vec![inumber + 1],
            },
        };

        let covering: Vec<_> = self
            .handlers
            .iter()
            .filter(|handler| handler.covers(inumber))
            .copied()
            .collect();
        for handler in covering {
            self.instructions[handler.handler].is_target = true;
            let handler_stack = self.arena.stack_from([handler.catch_type]);
            let entry_and = self.instructions[inumber].and_flags;
            let entry_or = self.instructions[inumber].or_flags;

            if opcode != opcodes::INVOKEINIT {
                self.merge_into_one_successor(
                    inumber,
                    handler.handler,
                    old_registers,
                    handler_stack,
                    and_flags & entry_and,
                    or_flags | entry_or,
                    true,
                )?;
            } else {
                // The exception may be thrown before or after the object got initialized
                let mut or_after = or_flags;
                if matches!(
                    replace,
                    Some(Replacement {
                        from: AbstractType::InitObject,
                        ..
                    })
                ) {
                    or_after |= PathFlags::NO_RETURN;
                }
                self.merge_into_one_successor(
                    inumber,
                    handler.handler,
                    old_registers,
                    handler_stack,
                    entry_and,
                    entry_or,
                    true,
                )?;
                self.merge_into_one_successor(
                    inumber,
                    handler.handler,
                    registers,
                    handler_stack,
                    and_flags,
                    or_after,
                    true,
                )?;
            }
        }

        for target in successors {
            if target >= self.instructions.len() {
                return Err(VerifierErrorKind::FallOffEnd);
            }
            self.merge_into_one_successor(
                inumber, target, registers, stack, and_flags, or_flags, false,
            )?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn merge_into_one_successor(
        &mut self,
        from: usize,
        to: usize,
        registers: RegisterState<'a>,
        stack: StackState<'a>,
        and_flags: PathFlags,
        or_flags: PathFlags,
        is_exception: bool,
    ) -> Result<(), VerifierErrorKind> {
        let from_opcode = self.instructions[from].opcode;
        let mut registers = registers;
        let mut stack = stack;

        // Uninitialized objects can't survive entering or leaving a subroutine
        if from_opcode == opcodes::RET || opcodes::is_jsr(from_opcode) {
            let bogus_if_new = |item: AbstractType| match item {
                AbstractType::NewObject(_) => AbstractType::Bogus,
                other => other,
            };
            let is_new = |item: &AbstractType| matches!(item, AbstractType::NewObject(_));
            if stack.iter().any(|item| is_new(&item)) {
                stack = self.arena.stack_from(stack.to_vec().into_iter().map(bogus_if_new));
            }
            if registers.registers.iter().any(is_new) {
                registers = RegisterState {
                    registers: self
                        .arena
                        .registers(registers.registers.iter().copied().map(bogus_if_new)),
                    masks: registers.masks,
                };
            }
        }

        if from_opcode != opcodes::RET || is_exception {
            self.merge_stack(to, stack)?;
            self.merge_registers(to, registers)?;
            self.merge_flags(to, and_flags, or_flags);
            return Ok(());
        }

        // Returning from a subroutine: the `jsr` is the instruction just before `to`
        let jsr = to - 1;
        if let Operand::Jsr { ret, .. } = &mut self.instructions[jsr].operand {
            if *ret != Some(from) {
                if ret.is_some() {
                    return Err(VerifierErrorKind::MultipleReturns);
                }
                *ret = Some(from);
            }
        }
        let jsr_registers = match self.instructions[jsr].registers {
            Some(jsr_registers) => jsr_registers,

            // The `jsr` itself hasn't been reached yet, so there is nothing to return to
            None => return Ok(()),
        };

        let called = match self.instructions[from].operand.local().map(|l| registers.get(l)) {
            Some(AbstractType::ReturnAddress(entry)) => entry,
            _ => return Err(VerifierErrorKind::IllegalReturnFromSubroutine),
        };
        let mask_index = registers
            .masks
            .iter()
            .rposition(|mask| mask.entry == called)
            .ok_or(VerifierErrorKind::IllegalReturnFromSubroutine)?;
        let return_mask = registers.masks[mask_index].modifies;

        // Registers touched by the subroutine come from the `ret`, the rest from the `jsr`
        let count = jsr_registers.count().max(registers.count());
        let returned = RegisterState {
            registers: self.arena.registers((0..count).map(|reg| {
                if return_mask.contains(reg) {
                    registers.get(reg)
                } else {
                    jsr_registers.get(reg)
                }
            })),
            masks: &registers.masks[..mask_index],
        };

        self.merge_stack(to, stack)?;
        self.merge_registers(to, returned)?;
        self.merge_flags(to, and_flags, or_flags);
        Ok(())
    }

    fn merge_stack(&mut self, to: usize, new_stack: StackState<'a>) -> Result<(), VerifierErrorKind> {
        let old_stack = match self.instructions[to].stack {
            None => {
                self.instructions[to].stack = Some(new_stack);
                self.instructions[to].changed = true;
                return Ok(());
            }
            Some(old_stack) => old_stack,
        };
        if old_stack.size != new_stack.size {
            return Err(VerifierErrorKind::InconsistentStackHeight(
                new_stack.size,
                old_stack.size,
            ));
        }
        if old_stack.same_as(&new_stack) {
            return Ok(());
        }

        let old_items = old_stack.to_vec();
        let new_items = new_stack.to_vec();
        let mut needs_merge = old_items.len() != new_items.len();
        for (old, new) in old_items.iter().zip(&new_items) {
            if needs_merge {
                break;
            }
            needs_merge = !self.names.is_assignable(*new, *old)?;
        }
        if !needs_merge {
            return Ok(());
        }

        if old_items.len() != new_items.len() {
            return Err(VerifierErrorKind::MismatchedStackTypes);
        }
        let mut merged = Vec::with_capacity(old_items.len());
        for (old, new) in old_items.into_iter().zip(new_items) {
            let item = self.names.merge(old, new, false)?;
            if item == AbstractType::Bogus {
                return Err(VerifierErrorKind::MismatchedStackTypes);
            }
            merged.push(item);
        }
        self.instructions[to].stack = Some(self.arena.stack_from(merged));
        self.instructions[to].changed = true;
        Ok(())
    }

    fn merge_registers(
        &mut self,
        to: usize,
        new_state: RegisterState<'a>,
    ) -> Result<(), VerifierErrorKind> {
        let old_state = match self.instructions[to].registers {
            None => {
                self.instructions[to].registers = Some(new_state);
                self.instructions[to].changed = true;
                return Ok(());
            }
            Some(old_state) => old_state,
        };

        let mut changed = false;
        let mut registers = old_state.registers;
        if registers.len() > new_state.count() {
            registers = &registers[..new_state.count()];
            changed = true;
        }

        let mut first_change = None;
        for (reg, old) in registers.iter().enumerate() {
            if !self.names.is_assignable(new_state.registers[reg], *old)? {
                first_change = Some(reg);
                break;
            }
        }
        if let Some(first_change) = first_change {
            let mut merged = registers[..first_change].to_vec();
            for (reg, old) in registers.iter().enumerate().skip(first_change) {
                merged.push(self.names.merge(new_state.registers[reg], *old, false)?);
            }
            while merged.last() == Some(&AbstractType::Bogus) {
                merged.pop();
            }
            registers = self.arena.registers(merged);
            changed = true;
        }

        // Keep the longest common sequence of subroutines, with the union of their modifications
        let mut masks = old_state.masks;
        if !old_state.masks.is_empty() {
            let mut matched: Vec<(usize, BitSet)> = vec![];
            let mut new_bits = false;
            let mut search_from = 0;
            for mask in old_state.masks {
                let found = new_state.masks[search_from..]
                    .iter()
                    .position(|other| other.entry == mask.entry);
                if let Some(position) = found {
                    let other = &new_state.masks[search_from + position];
                    if !other.modifies.is_subset(mask.modifies) {
                        new_bits = true;
                    }
                    let mut modifies = mask.modifies.clone();
                    modifies.union_with(other.modifies);
                    matched.push((mask.entry, modifies));
                    search_from += position + 1;
                }
            }
            if matched.len() < old_state.masks.len() || new_bits {
                let arena = self.arena;
                masks = arena.masks(matched.into_iter().map(|(entry, modifies)| SubroutineMask {
                    entry,
                    modifies: arena.bit_set(modifies),
                }));
                changed = true;
            }
        }

        if changed {
            self.instructions[to].registers = Some(RegisterState { registers, masks });
            self.instructions[to].changed = true;
        }
        Ok(())
    }

    fn merge_flags(&mut self, to: usize, and_flags: PathFlags, or_flags: PathFlags) {
        let target = &mut self.instructions[to];
        let merged_and = target.and_flags & and_flags;
        let merged_or = target.or_flags | or_flags;
        if merged_and != target.and_flags || merged_or != target.or_flags {
            target.and_flags = merged_and;
            target.or_flags = merged_or;
            target.changed = true;
        }
    }
}
