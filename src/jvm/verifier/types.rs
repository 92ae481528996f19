use crate::jvm::class_graph::{ClassData, ClassGraph};
use crate::jvm::{
    ArrayType, BaseType, BinaryName, FieldType, Name, ParseDescriptor, RefType, VerifierErrorKind,
};
use elsa::map::FrozenMap;
use elsa::FrozenVec;
use std::fmt;

/// Arrays can't have more dimensions than this
pub const MAX_ARRAY_DIMENSIONS: usize = 255;

/// Interned class name, valid only inside the [`ClassNames`] table that produced it
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ClassId(pub u32);

impl ClassId {
    pub const OBJECT: ClassId = ClassId(0);
    pub const STRING: ClassId = ClassId(1);
    pub const THROWABLE: ClassId = ClassId(2);
}

/// Abstract value tracked for every stack entry and local variable
///
/// Sub-word primitives (`byte`, `char`, `short`, `boolean`) are only ever distinguished as array
/// elements: as soon as a value is loaded out of such an array, it becomes an `Integer`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum AbstractType {
    /// Unusable value (unset local, or the merge of incompatible values)
    Bogus,

    Integer,
    Float,
    Long,

    /// Second slot of a `long` local variable
    LongHalf,

    Double,

    /// Second slot of a `double` local variable
    DoubleHalf,

    /// Type of `aconst_null`, assignable to every reference type
    Null,

    /// Class or array reference
    Reference(RefType<ClassId>),

    /// Return address pushed by a `jsr` to the subroutine starting at this instruction number
    ReturnAddress(usize),

    /// Object created by the `new` at this instruction number, before its `<init>` has run
    NewObject(usize),

    /// `this` inside a constructor, before the superclass (or other) constructor has run
    InitObject,
}

impl AbstractType {
    pub const OBJECT: AbstractType = AbstractType::Reference(RefType::Object(ClassId::OBJECT));
    pub const STRING: AbstractType = AbstractType::Reference(RefType::Object(ClassId::STRING));
    pub const THROWABLE: AbstractType =
        AbstractType::Reference(RefType::Object(ClassId::THROWABLE));

    /// Plain class type
    pub const fn class(class: ClassId) -> AbstractType {
        AbstractType::Reference(RefType::Object(class))
    }

    /// `java/lang/Object` with some number of array dimensions (0 is just `java/lang/Object`)
    pub const fn object_array(dimensions: usize) -> AbstractType {
        if dimensions == 0 {
            AbstractType::OBJECT
        } else {
            AbstractType::Reference(RefType::ObjectArray(ArrayType {
                additional_dimensions: dimensions - 1,
                element_type: ClassId::OBJECT,
            }))
        }
    }

    /// Primitive array with the given number of dimensions (which must be at least 1)
    pub const fn primitive_array(element_type: BaseType, dimensions: usize) -> AbstractType {
        AbstractType::Reference(RefType::PrimitiveArray(ArrayType {
            additional_dimensions: dimensions - 1,
            element_type,
        }))
    }

    /// Does the value take two slots on the stack or in the locals?
    pub const fn is_wide(self) -> bool {
        matches!(self, AbstractType::Long | AbstractType::Double)
    }

    /// Number of slots this value uses
    pub const fn size(self) -> usize {
        if self.is_wide() {
            2
        } else {
            1
        }
    }

    /// Marker stored in the second local variable slot of a wide value
    pub const fn second_half(self) -> Option<AbstractType> {
        match self {
            AbstractType::Long => Some(AbstractType::LongHalf),
            AbstractType::Double => Some(AbstractType::DoubleHalf),
            _ => None,
        }
    }

    /// Array dimensions (0 for anything which is not an array)
    pub fn dimensions(self) -> usize {
        match self {
            AbstractType::Reference(ref_type) => ref_type.dimensions(),
            _ => 0,
        }
    }

    /// Class type, not an array
    pub const fn is_plain_object(self) -> bool {
        matches!(self, AbstractType::Reference(RefType::Object(_)))
    }

    /// Array of anything
    pub const fn is_array(self) -> bool {
        matches!(
            self,
            AbstractType::Reference(RefType::ObjectArray(_) | RefType::PrimitiveArray(_))
        )
    }

    /// Class, array, or `null`
    pub const fn is_reference(self) -> bool {
        matches!(self, AbstractType::Reference(_) | AbstractType::Null)
    }

    /// Not-yet-constructed object
    pub const fn is_uninitialized(self) -> bool {
        matches!(self, AbstractType::NewObject(_) | AbstractType::InitObject)
    }

    /// Type of the elements of an array type
    ///
    /// The element type of `null` is `null` and anything that isn't an array has a bogus
    /// element type.
    pub fn element_type(self) -> AbstractType {
        match self {
            AbstractType::Null => AbstractType::Null,
            AbstractType::Reference(RefType::ObjectArray(arr)) => {
                if arr.additional_dimensions == 0 {
                    AbstractType::class(arr.element_type)
                } else {
                    AbstractType::Reference(RefType::ObjectArray(ArrayType {
                        additional_dimensions: arr.additional_dimensions - 1,
                        element_type: arr.element_type,
                    }))
                }
            }
            AbstractType::Reference(RefType::PrimitiveArray(arr)) => {
                if arr.additional_dimensions == 0 {
                    AbstractType::from_base_type(arr.element_type)
                } else {
                    AbstractType::primitive_array(arr.element_type, arr.additional_dimensions)
                }
            }
            _ => AbstractType::Bogus,
        }
    }

    /// Type of an array whose elements have this type
    pub fn array_of(self) -> Result<AbstractType, VerifierErrorKind> {
        let array = match self {
            AbstractType::Reference(ref_type) => {
                AbstractType::Reference(match FieldType::array(FieldType::Ref(ref_type)) {
                    FieldType::Ref(ref_type) => ref_type,
                    FieldType::Base(_) => return Err(VerifierErrorKind::IllegalType),
                })
            }
            _ => return Err(VerifierErrorKind::IllegalType),
        };
        if array.dimensions() > MAX_ARRAY_DIMENSIONS {
            return Err(VerifierErrorKind::TooManyDimensions);
        }
        Ok(array)
    }

    /// Type of a primitive value once it is on the stack or in a local
    pub const fn from_base_type(base_type: BaseType) -> AbstractType {
        match base_type {
            BaseType::Int
            | BaseType::Byte
            | BaseType::Char
            | BaseType::Short
            | BaseType::Boolean => AbstractType::Integer,
            BaseType::Float => AbstractType::Float,
            BaseType::Long => AbstractType::Long,
            BaseType::Double => AbstractType::Double,
        }
    }
}

/// Class-scoped table of interned class names
///
/// Every class mentioned while verifying a class gets a [`ClassId`] here, so that abstract types
/// stay small and cheap to compare. Resolving an id to the class it names goes through the
/// class graph and is cached.
pub struct ClassNames<'g> {
    class_graph: &'g ClassGraph<'g>,
    names: FrozenVec<String>,
    ids: FrozenMap<String, Box<ClassId>>,
    resolved: FrozenMap<ClassId, Box<&'g ClassData<'g>>>,
}

impl<'g> ClassNames<'g> {
    pub fn new(class_graph: &'g ClassGraph<'g>) -> ClassNames<'g> {
        let names = ClassNames {
            class_graph,
            names: FrozenVec::new(),
            ids: FrozenMap::new(),
            resolved: FrozenMap::new(),
        };
        for well_known in [BinaryName::OBJECT, BinaryName::STRING, BinaryName::THROWABLE] {
            names.intern(well_known.as_str());
        }
        names
    }

    pub fn class_graph(&self) -> &'g ClassGraph<'g> {
        self.class_graph
    }

    /// Get or create the id for a binary class name
    pub fn intern(&self, name: &str) -> ClassId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = ClassId(self.names.len() as u32);
        self.names.push(name.to_owned());
        self.ids.insert(name.to_owned(), Box::new(id));
        id
    }

    /// Binary name behind an id
    pub fn name(&self, id: ClassId) -> &str {
        self.names.get(id.0 as usize).unwrap_or("<unknown>")
    }

    /// Find the class behind an id in the class graph
    pub fn resolve(&self, id: ClassId) -> Result<&'g ClassData<'g>, VerifierErrorKind> {
        if let Some(class) = self.resolved.get(&id) {
            return Ok(*class);
        }
        let name = self.name(id);
        let class = self
            .class_graph
            .lookup_class_str(name)
            .ok_or_else(|| VerifierErrorKind::MissingClass(name.to_owned()))?;
        self.resolved.insert(id, Box::new(class));
        Ok(class)
    }

    /// Abstract type for a name stored in a `CONSTANT_Class` entry (which may be an array
    /// descriptor)
    pub fn class_constant(&self, name: &str) -> Result<AbstractType, VerifierErrorKind> {
        if name.starts_with('[') {
            let field_type = FieldType::<BinaryName>::parse(name)
                .map_err(|_| VerifierErrorKind::BadDescriptor(name.to_owned()))?;
            self.field_type(&field_type)
        } else {
            Ok(AbstractType::class(self.intern(name)))
        }
    }

    /// Abstract type of a value of the given field type
    pub fn field_type(
        &self,
        field_type: &FieldType<BinaryName>,
    ) -> Result<AbstractType, VerifierErrorKind> {
        match field_type {
            FieldType::Base(base_type) => Ok(AbstractType::from_base_type(*base_type)),
            FieldType::Ref(ref_type) => {
                if ref_type.dimensions() > MAX_ARRAY_DIMENSIONS {
                    return Err(VerifierErrorKind::TooManyDimensions);
                }
                Ok(AbstractType::Reference(
                    ref_type.map(|name| self.intern(name.as_str())),
                ))
            }
        }
    }

    /// Name of a reference type, as it would be stored in a `CONSTANT_Class` entry
    pub fn render_class_constant(&self, ref_type: &RefType<ClassId>) -> String {
        let named = ref_type.map(|id| {
            BinaryName::from_string(self.name(*id).to_owned()).unwrap_or(BinaryName::OBJECT)
        });
        named.render_class_constant()
    }

    /// Helper for printing abstract types in a readable way
    pub fn display(&self, typ: AbstractType) -> DisplayType<'_, 'g> {
        DisplayType { names: self, typ }
    }
}

pub struct DisplayType<'n, 'g> {
    names: &'n ClassNames<'g>,
    typ: AbstractType,
}

impl<'n, 'g> fmt::Display for DisplayType<'n, 'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.typ {
            AbstractType::Bogus => f.write_str("bogus"),
            AbstractType::Integer => f.write_str("int"),
            AbstractType::Float => f.write_str("float"),
            AbstractType::Long => f.write_str("long"),
            AbstractType::LongHalf => f.write_str("long_2"),
            AbstractType::Double => f.write_str("double"),
            AbstractType::DoubleHalf => f.write_str("double_2"),
            AbstractType::Null => f.write_str("null"),
            AbstractType::Reference(ref_type) => {
                f.write_str(&self.names.render_class_constant(&ref_type))
            }
            AbstractType::ReturnAddress(entry) => write!(f, "return address ({})", entry),
            AbstractType::NewObject(inumber) => write!(f, "new object ({})", inumber),
            AbstractType::InitObject => f.write_str("uninitialized this"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::ClassGraphArenas;

    #[test]
    fn well_known_ids() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        let names = ClassNames::new(&class_graph);

        assert_eq!(names.intern("java/lang/Object"), ClassId::OBJECT);
        assert_eq!(names.intern("java/lang/String"), ClassId::STRING);
        assert_eq!(names.intern("java/lang/Throwable"), ClassId::THROWABLE);
        let point = names.intern("me/alec/Point");
        assert_eq!(point, ClassId(3));
        assert_eq!(names.intern("me/alec/Point"), point);
        assert_eq!(names.name(point), "me/alec/Point");
    }

    #[test]
    fn resolving_missing_class() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        class_graph.insert_java_library_types();
        let names = ClassNames::new(&class_graph);

        assert!(names.resolve(ClassId::STRING).is_ok());
        let missing = names.intern("me/alec/Missing");
        assert_eq!(
            names.resolve(missing),
            Err(VerifierErrorKind::MissingClass(String::from("me/alec/Missing")))
        );
    }

    #[test]
    fn array_elements() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        let names = ClassNames::new(&class_graph);

        let bytes = names.class_constant("[[B").unwrap();
        assert_eq!(bytes.dimensions(), 2);
        assert_eq!(bytes.element_type(), AbstractType::primitive_array(BaseType::Byte, 1));
        assert_eq!(bytes.element_type().element_type(), AbstractType::Integer);

        let strings = names.class_constant("[Ljava/lang/String;").unwrap();
        assert_eq!(strings.element_type(), AbstractType::STRING);
        assert_eq!(AbstractType::STRING.array_of(), Ok(strings));

        assert_eq!(AbstractType::Null.element_type(), AbstractType::Null);
        assert_eq!(AbstractType::Integer.element_type(), AbstractType::Bogus);
        assert_eq!(AbstractType::object_array(0), AbstractType::OBJECT);
        assert_eq!(names.display(strings).to_string(), "[Ljava/lang/String;");
    }

    #[test]
    fn dimension_limit() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        let names = ClassNames::new(&class_graph);

        let deepest = names
            .class_constant(&format!("{}I", "[".repeat(MAX_ARRAY_DIMENSIONS)))
            .unwrap();
        assert_eq!(deepest.dimensions(), MAX_ARRAY_DIMENSIONS);
        assert_eq!(deepest.array_of(), Err(VerifierErrorKind::TooManyDimensions));
    }
}
