use crate::jvm::binary_format::{malformed, read_bytes};
use crate::jvm::{Deserialize, Error, Serialize};
use crate::util::{Offset, OffsetResult, OffsetVec, Width};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::Result;

/// Index into the constant pool
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct ConstantIndex(pub u16);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for ConstantIndex {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        u16::deserialize(reader).map(ConstantIndex)
    }
}

/// Constants as in the constant pool
///
/// Indices inside the constants are unchecked: class files read from disk can contain anything,
/// so lookups go through [`ConstantPool`] which reports bad indices and kinds.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Class or an interface
    Class(ConstantIndex),

    /// Field
    FieldRef {
        class: ConstantIndex,
        name_and_type: ConstantIndex,
    },

    /// Method (this combines `Methodref` and `InterfaceMethodref`)
    MethodRef {
        class: ConstantIndex,
        name_and_type: ConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(ConstantIndex),

    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: ConstantIndex,
        descriptor: ConstantIndex,
    },

    /// Constant "modified UTF-8" encoded raw string value
    Utf8(String),

    MethodHandle {
        kind: u8,
        member: ConstantIndex,
    },
    MethodType(ConstantIndex),
    InvokeDynamic {
        bootstrap_method: u16,
        name_and_type: ConstantIndex,
    },
}

/// Tag of a constant, used to check what kind of entry an instruction is pointing at
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ConstantTag {
    Utf8 = 1,
    Integer = 3,
    Float = 4,
    Long = 5,
    Double = 6,
    Class = 7,
    String = 8,
    FieldRef = 9,
    MethodRef = 10,
    InterfaceMethodRef = 11,
    NameAndType = 12,
    MethodHandle = 15,
    MethodType = 16,
    InvokeDynamic = 18,
}

impl ConstantTag {
    /// Single-bit mask, so that sets of acceptable tags are cheap to express
    pub const fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl Constant {
    pub fn tag(&self) -> ConstantTag {
        match self {
            Constant::Class(_) => ConstantTag::Class,
            Constant::FieldRef { .. } => ConstantTag::FieldRef,
            Constant::MethodRef {
                is_interface: false,
                ..
            } => ConstantTag::MethodRef,
            Constant::MethodRef {
                is_interface: true, ..
            } => ConstantTag::InterfaceMethodRef,
            Constant::String(_) => ConstantTag::String,
            Constant::Integer(_) => ConstantTag::Integer,
            Constant::Float(_) => ConstantTag::Float,
            Constant::Long(_) => ConstantTag::Long,
            Constant::Double(_) => ConstantTag::Double,
            Constant::NameAndType { .. } => ConstantTag::NameAndType,
            Constant::Utf8(_) => ConstantTag::Utf8,
            Constant::MethodHandle { .. } => ConstantTag::MethodHandle,
            Constant::MethodType(_) => ConstantTag::MethodType,
            Constant::InvokeDynamic { .. } => ConstantTag::InvokeDynamic,
        }
    }
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        (self.tag() as u8).serialize(writer)?;
        match self {
            Constant::Utf8(string) => {
                let buffer = encode_modified_utf8(string);
                let len = u16::try_from(buffer.len())
                    .map_err(|_| malformed("UTF-8 constant is too long"))?;
                len.serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => integer.serialize(writer)?,
            Constant::Float(float) => float.serialize(writer)?,
            Constant::Long(long) => long.serialize(writer)?,
            Constant::Double(double) => double.serialize(writer)?,
            Constant::Class(name) | Constant::String(name) | Constant::MethodType(name) => {
                name.serialize(writer)?
            }
            Constant::FieldRef {
                class,
                name_and_type,
            }
            | Constant::MethodRef {
                class,
                name_and_type,
                ..
            } => {
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle { kind, member } => {
                kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for Constant {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        let tag = u8::deserialize(reader)?;
        let constant = match tag {
            1 => {
                let len = u16::deserialize(reader)?;
                let bytes = read_bytes(reader, len as usize)?;
                Constant::Utf8(decode_modified_utf8(&bytes)?)
            }
            3 => Constant::Integer(i32::deserialize(reader)?),
            4 => Constant::Float(f32::deserialize(reader)?),
            5 => Constant::Long(i64::deserialize(reader)?),
            6 => Constant::Double(f64::deserialize(reader)?),
            7 => Constant::Class(ConstantIndex::deserialize(reader)?),
            8 => Constant::String(ConstantIndex::deserialize(reader)?),
            9 => Constant::FieldRef {
                class: ConstantIndex::deserialize(reader)?,
                name_and_type: ConstantIndex::deserialize(reader)?,
            },
            10 | 11 => Constant::MethodRef {
                class: ConstantIndex::deserialize(reader)?,
                name_and_type: ConstantIndex::deserialize(reader)?,
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: ConstantIndex::deserialize(reader)?,
                descriptor: ConstantIndex::deserialize(reader)?,
            },
            15 => Constant::MethodHandle {
                kind: u8::deserialize(reader)?,
                member: ConstantIndex::deserialize(reader)?,
            },
            16 => Constant::MethodType(ConstantIndex::deserialize(reader)?),
            18 => Constant::InvokeDynamic {
                bootstrap_method: u16::deserialize(reader)?,
                name_and_type: ConstantIndex::deserialize(reader)?,
            },
            other => return Err(malformed(format!("Unknown constant tag {}", other))),
        };
        Ok(constant)
    }
}

/// Why a constant pool lookup failed
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ConstantLookupError {
    /// Index is zero or past the end of the pool
    OutOfRange,

    /// Index is valid, but doesn't hold the expected kind of entry
    WrongKind,
}

/// Member reference (field or method) with all indirections followed
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MemberRef<'a> {
    pub class_name: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// Constant pool of a class file
///
/// Entries are indexed from 1, and `long`/`double` entries take two indices.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPool {
    constants: OffsetVec<Constant>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool::new()
    }
}

impl ConstantPool {
    pub fn new() -> ConstantPool {
        ConstantPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
        }
    }

    /// Value for the `constant_pool_count` field (one more than the largest index)
    pub fn count(&self) -> usize {
        self.constants.offset_len().0
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    pub fn push(&mut self, constant: Constant) -> std::result::Result<ConstantIndex, Error> {
        let offset = self.constants.offset_len().0;
        if offset + constant.width() > u16::MAX as usize {
            return Err(Error::ConstantPoolOverflow { constant, offset });
        }
        self.constants.push(constant);
        Ok(ConstantIndex(offset as u16))
    }

    pub fn get(&self, index: ConstantIndex) -> std::result::Result<&Constant, ConstantLookupError> {
        match self.constants.get_offset(Offset(index.0 as usize)) {
            OffsetResult::Ok(_, constant) => Ok(constant),
            OffsetResult::InvalidOffset(_) => Err(ConstantLookupError::WrongKind),
            OffsetResult::TooSmall | OffsetResult::TooLarge => Err(ConstantLookupError::OutOfRange),
        }
    }

    /// Tag of the entry at an index, checking it is one of the tags in the mask
    pub fn check_tag(
        &self,
        index: ConstantIndex,
        mask: u32,
    ) -> std::result::Result<ConstantTag, ConstantLookupError> {
        let tag = self.get(index)?.tag();
        if tag.bit() & mask == 0 {
            Err(ConstantLookupError::WrongKind)
        } else {
            Ok(tag)
        }
    }

    pub fn utf8(&self, index: ConstantIndex) -> std::result::Result<&str, ConstantLookupError> {
        match self.get(index)? {
            Constant::Utf8(string) => Ok(string),
            _ => Err(ConstantLookupError::WrongKind),
        }
    }

    /// Name stored in a `CONSTANT_Class` entry
    pub fn class_name(
        &self,
        index: ConstantIndex,
    ) -> std::result::Result<&str, ConstantLookupError> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            _ => Err(ConstantLookupError::WrongKind),
        }
    }

    /// Name and descriptor stored in a `CONSTANT_NameAndType` entry
    pub fn name_and_type(
        &self,
        index: ConstantIndex,
    ) -> std::result::Result<(&str, &str), ConstantLookupError> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(ConstantLookupError::WrongKind),
        }
    }

    /// Class, name, and descriptor of a field or method reference
    pub fn member_ref(
        &self,
        index: ConstantIndex,
    ) -> std::result::Result<MemberRef<'_>, ConstantLookupError> {
        match self.get(index)? {
            Constant::FieldRef {
                class,
                name_and_type,
            }
            | Constant::MethodRef {
                class,
                name_and_type,
                ..
            } => {
                let class_name = self.class_name(*class)?;
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(MemberRef {
                    class_name,
                    name,
                    descriptor,
                })
            }
            _ => Err(ConstantLookupError::WrongKind),
        }
    }

    /// Find an existing `CONSTANT_Class` entry for a class name
    pub fn find_class(&self, name: &str) -> Option<ConstantIndex> {
        self.constants
            .iter()
            .find_map(|(offset, constant)| match constant {
                Constant::Class(name_index) if self.utf8(*name_index) == Ok(name) => {
                    Some(ConstantIndex(offset.0 as u16))
                }
                _ => None,
            })
    }

    /// Get or insert a UTF-8 constant
    pub fn get_utf8(&mut self, string: &str) -> std::result::Result<ConstantIndex, Error> {
        let existing = self
            .constants
            .iter()
            .find_map(|(offset, constant)| match constant {
                Constant::Utf8(s) if s == string => Some(ConstantIndex(offset.0 as u16)),
                _ => None,
            });
        match existing {
            Some(index) => Ok(index),
            None => self.push(Constant::Utf8(string.to_owned())),
        }
    }

    /// Get or insert a `CONSTANT_Class` entry
    pub fn get_class(&mut self, name: &str) -> std::result::Result<ConstantIndex, Error> {
        match self.find_class(name) {
            Some(index) => Ok(index),
            None => {
                let name_index = self.get_utf8(name)?;
                self.push(Constant::Class(name_index))
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConstantIndex, &Constant)> {
        self.constants
            .iter()
            .map(|(offset, constant)| (ConstantIndex(offset.0 as u16), constant))
    }
}

impl Serialize for ConstantPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        (self.count() as u16).serialize(writer)?;
        for (_, constant) in self.iter() {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

impl Deserialize for ConstantPool {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        let count = u16::deserialize(reader)? as usize;
        let mut pool = ConstantPool::new();
        while pool.count() < count {
            let constant = Constant::deserialize(reader)?;
            if pool.count() + constant.width() > count {
                return Err(malformed("Wide constant overruns the constant pool"));
            }
            pool.constants.push(constant);
        }
        Ok(pool)
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. The differences from standard UTF-8 are that the
/// null character uses the two byte form, and that supplementary characters are written as
/// surrogate pairs (each in the three byte form).
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    let mut units = [0u16; 2];
    for c in string.chars() {
        for unit in c.encode_utf16(&mut units).iter() {
            let code = *unit as u32;
            if code != 0 && code < 0x80 {
                buffer.push(code as u8);
            } else if code < 0x800 {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            } else {
                buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    while let Some(first) = iter.next() {
        let mut continuation = || match iter.next() {
            Some(b) if b & 0b1100_0000 == 0b1000_0000 => Ok((b & 0x3F) as u16),
            _ => Err(malformed("Bad continuation byte in UTF-8 constant")),
        };
        let unit = if first & 0b1000_0000 == 0 {
            first as u16
        } else if first & 0b1110_0000 == 0b1100_0000 {
            ((first & 0x1F) as u16) << 6 | continuation()?
        } else if first & 0b1111_0000 == 0b1110_0000 {
            let middle = continuation()?;
            ((first & 0x0F) as u16) << 12 | middle << 6 | continuation()?
        } else {
            return Err(malformed("Bad leading byte in UTF-8 constant"));
        };
        units.push(unit);
    }
    String::from_utf16(&units).map_err(|_| malformed("Unpaired surrogate in UTF-8 constant"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn modified_utf8() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
        assert_eq!(encode_modified_utf8("foo"), vec![102, 111, 111]);
        assert_eq!(
            encode_modified_utf8("\u{10000}"),
            vec![0xED, 0xA0, 0x80, 0xED, 0xB0, 0x80]
        );
        for sample in ["java/lang/Object", "a\x00b", "ĄǍ", "ऄअ", "\u{10FFFF}x"] {
            assert_eq!(
                decode_modified_utf8(&encode_modified_utf8(sample)).unwrap(),
                sample
            );
        }
        assert!(decode_modified_utf8(&[0xC0]).is_err());
    }

    #[test]
    fn wide_constants_take_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.push(Constant::Long(7)).unwrap();
        let utf8 = pool.push(Constant::Utf8(String::from("Foo"))).unwrap();
        let class = pool.push(Constant::Class(utf8)).unwrap();
        assert_eq!((long, utf8, class), (ConstantIndex(1), ConstantIndex(3), ConstantIndex(4)));
        assert_eq!(pool.count(), 5);

        assert_eq!(pool.get(ConstantIndex(0)), Err(ConstantLookupError::OutOfRange));
        assert_eq!(pool.get(ConstantIndex(2)), Err(ConstantLookupError::WrongKind));
        assert_eq!(pool.get(ConstantIndex(5)), Err(ConstantLookupError::OutOfRange));
        assert_eq!(pool.class_name(class), Ok("Foo"));
        assert_eq!(pool.class_name(utf8), Err(ConstantLookupError::WrongKind));
        assert_eq!(
            pool.check_tag(long, ConstantTag::Long.bit() | ConstantTag::Double.bit()),
            Ok(ConstantTag::Long)
        );
    }

    #[test]
    fn get_class_reuses_entries() {
        let mut pool = ConstantPool::new();
        let first = pool.get_class("java/lang/Object").unwrap();
        let again = pool.get_class("java/lang/Object").unwrap();
        let other = pool.get_class("[I").unwrap();
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(pool.find_class("[I"), Some(other));

        let mut bytes = vec![];
        pool.serialize(&mut bytes).unwrap();
        let read = ConstantPool::deserialize(&mut bytes.as_slice()).unwrap();
        assert_eq!(read, pool);
    }
}
