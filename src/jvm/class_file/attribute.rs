use crate::jvm::binary_format::{malformed, read_bytes};
use crate::jvm::class_file::{ConstantIndex, ConstantPool};
use crate::jvm::verifier::StackMapFrame;
use crate::jvm::{Deserialize, Error, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Attributes (used in classes, fields, methods, and even on some attributes)
///
/// Attributes are kept in their raw form until somebody asks for a specific one (see
/// [`Attribute::decode`]), so that unknown attributes survive a read/write cycle untouched.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name_index: ConstantIndex,
    pub info: Vec<u8>,
}

impl Serialize for Attribute {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name_index.serialize(writer)?;

        // Attribute info length is 4 bytes
        (self.info.len() as u32).serialize(writer)?;
        writer.write_all(&self.info)?;

        Ok(())
    }
}

impl Deserialize for Attribute {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let name_index = ConstantIndex::deserialize(reader)?;
        let len = u32::deserialize(reader)?;
        let info = read_bytes(reader, len as usize)?;
        Ok(Attribute { name_index, info })
    }
}

/// Attributes are all stored in the same way (see `Attribute`), but internally
/// they represent very different things. This trait is implemented by things
/// which can be turned into attributes.
pub trait AttributeLike: Serialize + Deserialize {
    /// Name of the attribute
    const NAME: &'static str;
}

impl Attribute {
    /// Whether this attribute has the given name
    pub fn is<A: AttributeLike>(&self, constants: &ConstantPool) -> bool {
        constants.utf8(self.name_index) == Ok(A::NAME)
    }

    /// Decode the attribute contents, if it has the given name
    pub fn decode<A: AttributeLike>(&self, constants: &ConstantPool) -> Result<Option<A>, Error> {
        if !self.is::<A>(constants) {
            return Ok(None);
        }
        let mut info = self.info.as_slice();
        let attribute = A::deserialize(&mut info)?;
        if !info.is_empty() {
            let msg = format!("{} attribute has {} trailing bytes", A::NAME, info.len());
            return Err(Error::MalformedClass(msg));
        }
        Ok(Some(attribute))
    }

    /// Encode an attribute, adding its name to the constant pool if needed
    pub fn encode<A: AttributeLike>(
        attribute: &A,
        constants: &mut ConstantPool,
    ) -> Result<Attribute, Error> {
        let name_index = constants.get_utf8(A::NAME)?;
        let mut info = vec![];
        attribute.serialize(&mut info)?;
        Ok(Attribute { name_index, info })
    }

    /// Find and decode the first attribute with the given name
    pub fn find<A: AttributeLike>(
        attributes: &[Attribute],
        constants: &ConstantPool,
    ) -> Result<Option<A>, Error> {
        for attribute in attributes {
            if let Some(decoded) = attribute.decode::<A>(constants)? {
                return Ok(Some(decoded));
            }
        }
        Ok(None)
    }

    /// Replace every attribute with the same name (or add one if there weren't any)
    pub fn replace<A: AttributeLike>(
        attributes: &mut Vec<Attribute>,
        attribute: &A,
        constants: &mut ConstantPool,
    ) -> Result<(), Error> {
        let encoded = Attribute::encode(attribute, constants)?;
        attributes.retain(|attr| attr.name_index != encoded.name_index);
        attributes.push(encoded);
        Ok(())
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.3
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_array: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl Serialize for Code {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.max_stack.serialize(writer)?;
        self.max_locals.serialize(writer)?;
        (self.code_array.len() as u32).serialize(writer)?;
        writer.write_all(&self.code_array)?;
        self.exception_table.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Code {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let max_stack = u16::deserialize(reader)?;
        let max_locals = u16::deserialize(reader)?;
        let code_len = u32::deserialize(reader)?;
        if code_len > 0x10_0000 {
            return Err(malformed(format!("Code length {} is unreasonable", code_len)));
        }
        let code_array = read_bytes(reader, code_len as usize)?;
        Ok(Code {
            max_stack,
            max_locals,
            code_array,
            exception_table: Vec::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        })
    }
}

impl AttributeLike for Code {
    const NAME: &'static str = "Code";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of exception handler range (inclusive)
    pub start_pc: u16,

    /// End of exception handler range (exclusive)
    pub end_pc: u16,

    /// Start of the exception handler
    pub handler_pc: u16,

    /// Class caught (or zero, for any `Throwable`)
    pub catch_type: ConstantIndex,
}

impl Serialize for ExceptionHandler {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.end_pc.serialize(writer)?;
        self.handler_pc.serialize(writer)?;
        self.catch_type.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for ExceptionHandler {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(ExceptionHandler {
            start_pc: u16::deserialize(reader)?,
            end_pc: u16::deserialize(reader)?,
            handler_pc: u16::deserialize(reader)?,
            catch_type: ConstantIndex::deserialize(reader)?,
        })
    }
}

/// Checked exceptions a method declares
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.5
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exceptions(pub Vec<ConstantIndex>);

impl Serialize for Exceptions {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for Exceptions {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Vec::deserialize(reader).map(Exceptions)
    }
}

impl AttributeLike for Exceptions {
    const NAME: &'static str = "Exceptions";
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.12
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumberTable(pub Vec<LineNumber>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line_number: u16,
}

impl Serialize for LineNumber {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.line_number.serialize(writer)
    }
}

impl Deserialize for LineNumber {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(LineNumber {
            start_pc: u16::deserialize(reader)?,
            line_number: u16::deserialize(reader)?,
        })
    }
}

impl Serialize for LineNumberTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for LineNumberTable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Vec::deserialize(reader).map(LineNumberTable)
    }
}

impl AttributeLike for LineNumberTable {
    const NAME: &'static str = "LineNumberTable";
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.13
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableTable(pub Vec<LocalVariable>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: ConstantIndex,
    pub descriptor_index: ConstantIndex,
    pub index: u16,
}

impl Serialize for LocalVariable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.length.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.index.serialize(writer)
    }
}

impl Deserialize for LocalVariable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(LocalVariable {
            start_pc: u16::deserialize(reader)?,
            length: u16::deserialize(reader)?,
            name_index: ConstantIndex::deserialize(reader)?,
            descriptor_index: ConstantIndex::deserialize(reader)?,
            index: u16::deserialize(reader)?,
        })
    }
}

impl Serialize for LocalVariableTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for LocalVariableTable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Vec::deserialize(reader).map(LocalVariableTable)
    }
}

impl AttributeLike for LocalVariableTable {
    const NAME: &'static str = "LocalVariableTable";
}

/// CLDC stack maps: one full frame per branch target, with no compression relative to the
/// previous frame (unlike the `StackMapTable` attribute of Java 6+)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMap(pub Vec<StackMapFrame<ConstantIndex>>);

impl Serialize for StackMap {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for StackMap {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Vec::deserialize(reader).map(StackMap)
    }
}

impl AttributeLike for StackMap {
    const NAME: &'static str = "StackMap";
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn code_attribute_survives_round_trip() {
        let mut constants = ConstantPool::new();
        let code = Code {
            max_stack: 1,
            max_locals: 2,
            code_array: vec![0x03, 0xac],
            exception_table: vec![ExceptionHandler {
                start_pc: 0,
                end_pc: 1,
                handler_pc: 1,
                catch_type: ConstantIndex(0),
            }],
            attributes: vec![],
        };
        let attribute = Attribute::encode(&code, &mut constants).unwrap();
        assert!(attribute.is::<Code>(&constants));
        assert!(!attribute.is::<StackMap>(&constants));
        assert_eq!(attribute.decode::<Code>(&constants).unwrap(), Some(code));
        assert_eq!(attribute.decode::<LineNumberTable>(&constants).unwrap(), None);
    }

    #[test]
    fn replace_drops_old_copies() {
        let mut constants = ConstantPool::new();
        let mut attributes = vec![];
        let first = LineNumberTable(vec![LineNumber {
            start_pc: 0,
            line_number: 1,
        }]);
        let second = LineNumberTable(vec![]);
        Attribute::replace(&mut attributes, &first, &mut constants).unwrap();
        Attribute::replace(&mut attributes, &second, &mut constants).unwrap();
        assert_eq!(attributes.len(), 1);
        assert_eq!(
            Attribute::find::<LineNumberTable>(&attributes, &constants).unwrap(),
            Some(second)
        );
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut constants = ConstantPool::new();
        let mut attribute = Attribute::encode(&Exceptions(vec![]), &mut constants).unwrap();
        attribute.info.push(0);
        assert!(matches!(
            attribute.decode::<Exceptions>(&constants),
            Err(Error::MalformedClass(_))
        ));
    }
}
