use crate::jvm::binary_format::malformed;
use crate::jvm::class_file::{Attribute, ConstantIndex, ConstantPool, Field, Method};
use crate::jvm::{ClassAccessFlags, Deserialize, Error, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::fs;
use std::path::Path;

/// Version of the class file, which is used to verify that the JVM has the
/// necessary features to interpret the class
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Version {
    pub minor_version: u16,
    pub major_version: u16,
}

impl Version {
    /// Class file version emitted by `javac -target 1.3`, the usual CLDC target
    pub const JAVA3: Version = Version {
        minor_version: 0,
        major_version: 47,
    };
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.minor_version.serialize(writer)?;
        self.major_version.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Version {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Version {
            minor_version: u16::deserialize(reader)?,
            major_version: u16::deserialize(reader)?,
        })
    }
}

/// Representation of the [`class` file format of the JVM][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ConstantIndex,

    /// Zero only for `java/lang/Object`
    pub super_class: ConstantIndex,
    pub interfaces: Vec<ConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

    /// Parse a class file from its bytes
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, Error> {
        let mut reader = bytes;
        let class = ClassFile::deserialize(&mut reader).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::MalformedClass(String::from("Truncated class file"))
            } else {
                Error::MalformedClass(err.to_string())
            }
        })?;
        if !reader.is_empty() {
            let msg = format!("{} extra bytes after the class file", reader.len());
            return Err(Error::MalformedClass(msg));
        }
        Ok(class)
    }

    /// Read a class file from disk
    pub fn read_from_path<P: AsRef<Path>>(path: P) -> Result<ClassFile, Error> {
        let bytes = fs::read(path).map_err(Error::IoError)?;
        ClassFile::parse(&bytes)
    }

    /// Save the class file to disk
    pub fn save_to_path<P: AsRef<Path>>(
        &self,
        path: P,
        create_missing_directories: bool,
    ) -> std::io::Result<()> {
        let path = path.as_ref();
        if create_missing_directories {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut bytes = vec![];
        self.serialize(&mut bytes)?;
        fs::write(path, bytes)
    }

    /// Binary name of this class
    pub fn this_class_name(&self) -> Result<&str, Error> {
        self.constants
            .class_name(self.this_class)
            .map_err(|_| Error::MalformedClass(String::from("Bad this_class index")))
    }

    /// Binary name of the superclass (if there is one)
    pub fn super_class_name(&self) -> Result<Option<&str>, Error> {
        if self.super_class == ConstantIndex(0) {
            return Ok(None);
        }
        self.constants
            .class_name(self.super_class)
            .map(Some)
            .map_err(|_| Error::MalformedClass(String::from("Bad super_class index")))
    }

    /// Binary names of the directly implemented interfaces
    pub fn interface_names(&self) -> Result<Vec<&str>, Error> {
        self.interfaces
            .iter()
            .map(|index| {
                self.constants
                    .class_name(*index)
                    .map_err(|_| Error::MalformedClass(String::from("Bad interface index")))
            })
            .collect()
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&ClassFile::MAGIC)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class.serialize(writer)?;
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for ClassFile {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let mut magic = [0; 4];
        reader.read_exact(&mut magic)?;
        if magic != ClassFile::MAGIC {
            return Err(malformed("Missing 0xCAFEBABE header"));
        }
        Ok(ClassFile {
            version: Version::deserialize(reader)?,
            constants: ConstantPool::deserialize(reader)?,
            access_flags: ClassAccessFlags::deserialize(reader)?,
            this_class: ConstantIndex::deserialize(reader)?,
            super_class: ConstantIndex::deserialize(reader)?,
            interfaces: Vec::deserialize(reader)?,
            fields: Vec::deserialize(reader)?,
            methods: Vec::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn empty_class() -> ClassFile {
        let mut constants = ConstantPool::new();
        let this_class = constants.get_class("me/Empty").unwrap();
        let super_class = constants.get_class("java/lang/Object").unwrap();
        ClassFile {
            version: Version::JAVA3,
            constants,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        }
    }

    #[test]
    fn parse_what_was_written() {
        let class = empty_class();
        let mut bytes = vec![];
        class.serialize(&mut bytes).unwrap();
        assert_eq!(&bytes[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);

        let parsed = ClassFile::parse(&bytes).unwrap();
        assert_eq!(parsed, class);
        assert_eq!(parsed.this_class_name().unwrap(), "me/Empty");
        assert_eq!(parsed.super_class_name().unwrap(), Some("java/lang/Object"));
    }

    #[test]
    fn reject_garbage() {
        assert!(matches!(
            ClassFile::parse(&[0xCA, 0xFE, 0xBA, 0xBF]),
            Err(Error::MalformedClass(_))
        ));

        let mut bytes = vec![];
        empty_class().serialize(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(ClassFile::parse(&bytes), Err(Error::MalformedClass(_))));
    }
}
