use crate::jvm::class_file::{Attribute, ConstantIndex, ConstantPool};
use crate::jvm::{Deserialize, Error, FieldAccessFlags, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Field declared by a class or interface
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.5
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub access_flags: FieldAccessFlags,
    pub name_index: ConstantIndex,
    pub descriptor_index: ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl Field {
    /// Name and descriptor of the field
    pub fn signature<'c>(&self, constants: &'c ConstantPool) -> Result<(&'c str, &'c str), Error> {
        let name = constants.utf8(self.name_index);
        let descriptor = constants.utf8(self.descriptor_index);
        match (name, descriptor) {
            (Ok(name), Ok(descriptor)) => Ok((name, descriptor)),
            _ => Err(Error::MalformedClass(String::from("Bad field name or descriptor index"))),
        }
    }
}

impl Serialize for Field {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Field {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Field {
            access_flags: FieldAccessFlags::deserialize(reader)?,
            name_index: ConstantIndex::deserialize(reader)?,
            descriptor_index: ConstantIndex::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        })
    }
}
