use crate::jvm::class_file::{Attribute, Code, ConstantIndex, ConstantPool, Exceptions};
use crate::jvm::{Deserialize, Error, MethodAccessFlags, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Method declared by a class or interface
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.6
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name_index: ConstantIndex,
    pub descriptor_index: ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl Method {
    pub fn name<'c>(&self, constants: &'c ConstantPool) -> Result<&'c str, Error> {
        constants
            .utf8(self.name_index)
            .map_err(|_| Error::MalformedClass(String::from("Bad method name index")))
    }

    pub fn descriptor<'c>(&self, constants: &'c ConstantPool) -> Result<&'c str, Error> {
        constants
            .utf8(self.descriptor_index)
            .map_err(|_| Error::MalformedClass(String::from("Bad method descriptor index")))
    }

    /// Decoded `Code` attribute (absent for abstract and native methods)
    pub fn code(&self, constants: &ConstantPool) -> Result<Option<Code>, Error> {
        Attribute::find(&self.attributes, constants)
    }

    /// Replace the `Code` attribute
    pub fn set_code(&mut self, code: &Code, constants: &mut ConstantPool) -> Result<(), Error> {
        Attribute::replace(&mut self.attributes, code, constants)
    }

    /// Classes listed in the `Exceptions` attribute
    pub fn exceptions(&self, constants: &ConstantPool) -> Result<Vec<ConstantIndex>, Error> {
        Ok(Attribute::find::<Exceptions>(&self.attributes, constants)?
            .map(|exceptions| exceptions.0)
            .unwrap_or_default())
    }
}

impl Serialize for Method {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Method {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Method {
            access_flags: MethodAccessFlags::deserialize(reader)?,
            name_index: ConstantIndex::deserialize(reader)?,
            descriptor_index: ConstantIndex::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        })
    }
}
