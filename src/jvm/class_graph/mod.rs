use super::class_file::ClassFile;
use super::{
    BinaryName, ClassAccessFlags, Error, FieldAccessFlags, MethodAccessFlags, Name,
    UnqualifiedName,
};
use elsa::map::FrozenMap;
use elsa::FrozenVec;
use std::fmt;
use std::fmt::Debug;
use typed_arena::Arena;

mod java_classes;

pub use java_classes::*;

pub struct ClassGraphArenas<'g> {
    class_arena: Arena<ClassData<'g>>,
    method_arena: Arena<MethodData>,
    field_arena: Arena<FieldData>,
}

impl<'g> ClassGraphArenas<'g> {
    pub fn new() -> Self {
        ClassGraphArenas {
            class_arena: Arena::new(),
            method_arena: Arena::new(),
            field_arena: Arena::new(),
        }
    }
}

impl<'g> Default for ClassGraphArenas<'g> {
    fn default() -> Self {
        ClassGraphArenas::new()
    }
}

/// Tracks the relationships between classes/interfaces and the members on those classes
///
/// The verifier never loads classes itself: every class it needs to reason about (superclass
/// chains for merging types, interface flags, protected members) must be in the graph before
/// verification starts. Classes are only ever added, never removed, so references handed out
/// stay valid for the lifetime of the graph.
pub struct ClassGraph<'g> {
    arenas: &'g ClassGraphArenas<'g>,
    classes: FrozenMap<&'g BinaryName, &'g ClassData<'g>>,
}

impl<'g> ClassGraph<'g> {
    /// New empty graph
    pub fn new(arenas: &'g ClassGraphArenas<'g>) -> Self {
        ClassGraph {
            arenas,
            classes: FrozenMap::new(),
        }
    }

    pub fn lookup_class(&'g self, name: &BinaryName) -> Option<&'g ClassData<'g>> {
        self.classes.get(name)
    }

    /// Look up a class from the name stored in a class file
    pub fn lookup_class_str(&'g self, name: &str) -> Option<&'g ClassData<'g>> {
        let name = BinaryName::from_string(name.to_owned()).ok()?;
        self.lookup_class(&name)
    }

    /// Number of classes in the graph
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.len() == 0
    }

    /// Add a new class to the class graph
    pub fn add_class(&self, data: ClassData<'g>) -> &'g ClassData<'g> {
        let data = &*self.arenas.class_arena.alloc(data);
        self.classes.insert(&data.name, data);
        data
    }

    /// Add a field to a class in the graph
    pub fn add_field(&self, class: &ClassData<'g>, field: FieldData) -> &'g FieldData {
        let data = &*self.arenas.field_arena.alloc(field);
        class.fields.push(data);
        data
    }

    /// Add a method to a class in the graph
    pub fn add_method(&self, class: &ClassData<'g>, method: MethodData) -> &'g MethodData {
        let data = &*self.arenas.method_arena.alloc(method);
        class.methods.push(data);
        data
    }

    /// Add a class (with its fields and methods) from a parsed class file
    ///
    /// The superclass and all interfaces must already be in the graph. Adding a class which is
    /// already known keeps the first definition.
    pub fn add_class_file(&'g self, class: &ClassFile) -> Result<&'g ClassData<'g>, Error> {
        let name = class.this_class_name()?;
        let binary_name = BinaryName::from_string(name.to_owned()).map_err(Error::MalformedClass)?;
        if let Some(existing) = self.lookup_class(&binary_name) {
            log::debug!("{} is already in the class graph, keeping the first copy", name);
            return Ok(existing);
        }

        let superclass = match class.super_class_name()? {
            None => None,
            Some(super_name) => Some(
                self.lookup_class_str(super_name)
                    .ok_or_else(|| Error::MissingClass(super_name.to_owned()))?,
            ),
        };
        if superclass.is_none() && binary_name != BinaryName::OBJECT {
            let msg = format!("{} has no superclass", name);
            return Err(Error::MalformedClass(msg));
        }

        let interfaces = FrozenVec::new();
        for interface_name in class.interface_names()? {
            let interface = self
                .lookup_class_str(interface_name)
                .ok_or_else(|| Error::MissingClass(interface_name.to_owned()))?;
            interfaces.push(interface);
        }

        let data = self.add_class(ClassData {
            name: binary_name,
            superclass,
            interfaces,
            access_flags: class.access_flags,
            methods: FrozenVec::new(),
            fields: FrozenVec::new(),
        });

        for field in &class.fields {
            let (field_name, descriptor) = field.signature(&class.constants)?;
            self.add_field(
                data,
                FieldData {
                    name: UnqualifiedName::from_string(field_name.to_owned())
                        .map_err(Error::MalformedClass)?,
                    descriptor: descriptor.to_owned(),
                    access_flags: field.access_flags,
                },
            );
        }
        for method in &class.methods {
            let method_name = method.name(&class.constants)?;
            let descriptor = method.descriptor(&class.constants)?;
            self.add_method(
                data,
                MethodData {
                    name: UnqualifiedName::from_string(method_name.to_owned())
                        .map_err(Error::MalformedClass)?,
                    descriptor: descriptor.to_owned(),
                    access_flags: method.access_flags,
                },
            );
        }

        Ok(data)
    }

    /// Add a batch of class files, in whatever order makes their supertypes available first
    ///
    /// Classes whose supertypes never show up (or which are malformed) are reported back; the
    /// rest are added.
    pub fn add_class_files(&'g self, classes: &[ClassFile]) -> Vec<Error> {
        let mut pending: Vec<&ClassFile> = classes.iter().collect();
        let mut errors = vec![];

        loop {
            let before = pending.len();
            let mut still_pending = vec![];
            for class in pending {
                match self.add_class_file(class) {
                    Ok(_) => (),
                    Err(Error::MissingClass(_)) => still_pending.push(class),
                    Err(err) => errors.push(err),
                }
            }
            pending = still_pending;
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }

        // Whatever is left has a supertype which is not anywhere in the graph
        for class in pending {
            if let Err(err) = self.add_class_file(class) {
                errors.push(err);
            }
        }
        errors
    }

    /// Add standard types to the class graph
    pub fn insert_java_library_types(&self) -> JavaClasses<'g> {
        JavaClasses::add_to_graph(self)
    }
}

pub struct ClassData<'g> {
    /// Name of the class
    pub name: BinaryName,

    /// Superclass is only ever missing for `java/lang/Object` itself
    pub superclass: Option<&'g ClassData<'g>>,

    /// Interfaces implemented (or super-interfaces)
    pub interfaces: FrozenVec<&'g ClassData<'g>>,

    pub access_flags: ClassAccessFlags,

    /// Methods declared directly on this class
    pub methods: FrozenVec<&'g MethodData>,

    /// Fields declared directly on this class
    pub fields: FrozenVec<&'g FieldData>,
}

impl<'g> ClassData<'g> {
    pub fn new(
        name: BinaryName,
        superclass: &'g ClassData<'g>,
        access_flags: ClassAccessFlags,
    ) -> ClassData<'g> {
        ClassData {
            name,
            superclass: Some(superclass),
            interfaces: FrozenVec::new(),
            access_flags,
            methods: FrozenVec::new(),
            fields: FrozenVec::new(),
        }
    }

    /// Is this an interface?
    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    /// Iterate through this class and then its superclasses, ending at `java/lang/Object`
    pub fn superclasses(&self) -> impl Iterator<Item = &ClassData<'g>> {
        std::iter::successors(Some(self), |class| class.superclass.map(|sup| sup as &ClassData<'g>))
    }

    /// Is this class the given class or one of its subclasses?
    pub fn is_subclass_of(&self, other: &ClassData<'g>) -> bool {
        self.superclasses().any(|class| class.name == other.name)
    }

    /// Number of superclass edges to `java/lang/Object`
    pub fn depth(&self) -> usize {
        self.superclasses().count() - 1
    }

    /// Field declared directly in this class
    pub fn find_field(&self, name: &str, descriptor: &str) -> Option<&FieldData> {
        self.fields
            .iter()
            .find(|field| field.name.as_str() == name && field.descriptor == descriptor)
    }

    /// Method declared directly in this class
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&MethodData> {
        self.methods
            .iter()
            .find(|method| method.name.as_str() == name && method.descriptor == descriptor)
    }

    /// Are both classes in the same runtime package?
    pub fn same_package(&self, other: &ClassData<'_>) -> bool {
        self.name.package() == other.name.package()
    }
}

impl<'g> PartialEq for ClassData<'g> {
    fn eq(&self, other: &ClassData<'g>) -> bool {
        self.name == other.name
    }
}

impl<'g> Eq for ClassData<'g> {}

impl<'g> Debug for ClassData<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name.as_str())
    }
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct MethodData {
    pub name: UnqualifiedName,

    /// Method descriptor, exactly as it appears in class files
    pub descriptor: String,

    pub access_flags: MethodAccessFlags,
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct FieldData {
    pub name: UnqualifiedName,

    /// Field descriptor, exactly as it appears in class files
    pub descriptor: String,

    pub access_flags: FieldAccessFlags,
}
