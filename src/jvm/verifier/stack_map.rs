use super::method::MethodVerifier;
use super::types::AbstractType;
use crate::jvm::binary_format::malformed;
use crate::jvm::class_file::ConstantIndex;
use crate::jvm::{Deserialize, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Type of one local variable or stack entry in a stack map frame
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerificationType<Cls> {
    /// Unusable value (also used for return addresses and lone halves of wide values)
    Top,

    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object or array type
    Object(Cls),

    /// Object created by the `new` instruction at this offset, before `<init>` is called on it
    Uninitialized(u16),
}

impl<Cls> VerificationType<Cls> {
    /// Change the representation of classes, stopping at the first failure
    pub fn try_map<Cls2, E>(
        &self,
        map_class: impl FnOnce(&Cls) -> Result<Cls2, E>,
    ) -> Result<VerificationType<Cls2>, E> {
        Ok(match self {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(cls) => VerificationType::Object(map_class(cls)?),
            VerificationType::Uninitialized(offset) => VerificationType::Uninitialized(*offset),
        })
    }
}

impl Serialize for VerificationType<ConstantIndex> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationType::Top => 0u8.serialize(writer)?,
            VerificationType::Integer => 1u8.serialize(writer)?,
            VerificationType::Float => 2u8.serialize(writer)?,
            VerificationType::Double => 3u8.serialize(writer)?,
            VerificationType::Long => 4u8.serialize(writer)?,
            VerificationType::Null => 5u8.serialize(writer)?,
            VerificationType::UninitializedThis => 6u8.serialize(writer)?,
            VerificationType::Object(cls) => {
                7u8.serialize(writer)?;
                cls.serialize(writer)?;
            }
            VerificationType::Uninitialized(off) => {
                8u8.serialize(writer)?;
                off.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for VerificationType<ConstantIndex> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(match u8::deserialize(reader)? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(ConstantIndex::deserialize(reader)?),
            8 => VerificationType::Uninitialized(u16::deserialize(reader)?),
            other => return Err(malformed(format!("Unknown verification type tag {}", other))),
        })
    }
}

/// Full snapshot of the locals and stack at a branch target
///
/// Unlike the frames of `StackMapTable`, these are never expressed relative to the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapFrame<Cls> {
    pub offset: u16,
    pub locals: Vec<VerificationType<Cls>>,

    /// Stack entries, bottom of the stack first
    pub stack: Vec<VerificationType<Cls>>,
}

impl<Cls> StackMapFrame<Cls> {
    pub fn try_map<Cls2, E>(
        &self,
        mut map_class: impl FnMut(&Cls) -> Result<Cls2, E>,
    ) -> Result<StackMapFrame<Cls2>, E> {
        let mut map_all = |types: &[VerificationType<Cls>]| {
            types
                .iter()
                .map(|typ| typ.try_map(&mut map_class))
                .collect::<Result<Vec<_>, E>>()
        };
        Ok(StackMapFrame {
            offset: self.offset,
            locals: map_all(&self.locals)?,
            stack: map_all(&self.stack)?,
        })
    }
}

impl Serialize for StackMapFrame<ConstantIndex> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.offset.serialize(writer)?;
        self.locals.serialize(writer)?;
        self.stack.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for StackMapFrame<ConstantIndex> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(StackMapFrame {
            offset: u16::deserialize(reader)?,
            locals: Vec::deserialize(reader)?,
            stack: Vec::deserialize(reader)?,
        })
    }
}

impl<'a, 'c, 'g> MethodVerifier<'a, 'c, 'g> {
    /// One frame for every instruction reached by something other than falling through
    ///
    /// Classes are named the way a `CONSTANT_Class` entry would name them.
    pub fn stack_map_frames(&self) -> Vec<StackMapFrame<String>> {
        self.instructions
            .iter()
            .filter(|instruction| instruction.is_target)
            .map(|instruction| {
                let registers = instruction.registers.map_or(&[][..], |regs| regs.registers);
                let stack = instruction.stack.map(|stack| stack.to_vec()).unwrap_or_default();
                StackMapFrame {
                    offset: instruction.offset as u16,
                    locals: self.frame_locals(registers),
                    stack: stack
                        .into_iter()
                        .map(|typ| self.verification_type(typ))
                        .collect(),
                }
            })
            .collect()
    }

    /// Wide values take up one entry (not two) in the frame locals
    fn frame_locals(&self, registers: &[AbstractType]) -> Vec<VerificationType<String>> {
        let mut locals = Vec::with_capacity(registers.len());
        let mut reg = 0;
        while reg < registers.len() {
            let typ = registers[reg];
            if typ.is_wide() {
                if registers.get(reg + 1).copied() == typ.second_half() {
                    locals.push(self.verification_type(typ));
                    reg += 1;
                } else {
                    locals.push(VerificationType::Top);
                }
            } else {
                locals.push(self.verification_type(typ));
            }
            reg += 1;
        }
        locals
    }

    fn verification_type(&self, typ: AbstractType) -> VerificationType<String> {
        match typ {
            AbstractType::Integer => VerificationType::Integer,
            AbstractType::Float => VerificationType::Float,
            AbstractType::Long => VerificationType::Long,
            AbstractType::Double => VerificationType::Double,
            AbstractType::Null => VerificationType::Null,
            AbstractType::InitObject => VerificationType::UninitializedThis,
            AbstractType::Reference(ref_type) => {
                VerificationType::Object(self.names.render_class_constant(&ref_type))
            }
            AbstractType::NewObject(inumber) => {
                VerificationType::Uninitialized(self.instructions[inumber].offset as u16)
            }
            AbstractType::Bogus
            | AbstractType::LongHalf
            | AbstractType::DoubleHalf
            | AbstractType::ReturnAddress(_) => VerificationType::Top,
        }
    }
}
