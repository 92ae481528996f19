//! Helpers for building small class files in memory and running them through the verifier
#![allow(dead_code)]

use preverifier::jvm::class_file::{
    Attribute, ClassFile, Code, Constant, ConstantIndex, ConstantPool, ExceptionHandler,
    Exceptions, Method, Version,
};
use preverifier::jvm::class_graph::{ClassGraph, ClassGraphArenas};
use preverifier::jvm::verifier::{VerifiedClass, VerifierSession, VerifierSettings};
use preverifier::jvm::{ClassAccessFlags, Error, MethodAccessFlags, VerifierErrorKind};

/// Class file under construction
pub struct TestClass {
    pub class: ClassFile,
}

impl TestClass {
    pub fn new(name: &str, superclass: &str) -> TestClass {
        let mut constants = ConstantPool::new();
        let this_class = constants.get_class(name).unwrap();
        let super_class = constants.get_class(superclass).unwrap();
        TestClass {
            class: ClassFile {
                version: Version::JAVA3,
                constants,
                access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
                this_class,
                super_class,
                interfaces: vec![],
                fields: vec![],
                methods: vec![],
                attributes: vec![],
            },
        }
    }

    pub fn class_ref(&mut self, name: &str) -> u16 {
        self.class.constants.get_class(name).unwrap().0
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(class, name, descriptor, false)
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(class, name, descriptor, true)
    }

    fn member_ref(&mut self, class: &str, name: &str, descriptor: &str, is_interface: bool) -> u16 {
        let constants = &mut self.class.constants;
        let class = constants.get_class(class).unwrap();
        let name = constants.get_utf8(name).unwrap();
        let descriptor = constants.get_utf8(descriptor).unwrap();
        let name_and_type = constants
            .push(Constant::NameAndType { name, descriptor })
            .unwrap();
        constants
            .push(Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            })
            .unwrap()
            .0
    }

    /// Add a method, returning its index
    pub fn method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        code: Code,
    ) -> usize {
        let constants = &mut self.class.constants;
        let mut method = Method {
            access_flags,
            name_index: constants.get_utf8(name).unwrap(),
            descriptor_index: constants.get_utf8(descriptor).unwrap(),
            attributes: vec![],
        };
        method.set_code(&code, constants).unwrap();
        self.class.methods.push(method);
        self.class.methods.len() - 1
    }

    pub fn static_method(&mut self, name: &str, descriptor: &str, code: Code) -> usize {
        self.method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            name,
            descriptor,
            code,
        )
    }

    /// Declare checked exceptions by raw constant pool index
    pub fn declare_exceptions(&mut self, method: usize, exceptions: &[u16]) {
        let exceptions = Exceptions(exceptions.iter().map(|index| ConstantIndex(*index)).collect());
        Attribute::replace(
            &mut self.class.methods[method].attributes,
            &exceptions,
            &mut self.class.constants,
        )
        .unwrap();
    }
}

pub fn code(max_stack: u16, max_locals: u16, code_array: Vec<u8>) -> Code {
    Code {
        max_stack,
        max_locals,
        code_array,
        exception_table: vec![],
        attributes: vec![],
    }
}

pub fn handler(start_pc: u16, end_pc: u16, handler_pc: u16, catch_type: u16) -> ExceptionHandler {
    ExceptionHandler {
        start_pc,
        end_pc,
        handler_pc,
        catch_type: ConstantIndex(catch_type),
    }
}

/// Verify a class against the core library classes
pub fn verify(class: &ClassFile) -> Result<VerifiedClass, Error> {
    let class_graph_arenas = ClassGraphArenas::new();
    let class_graph = ClassGraph::new(&class_graph_arenas);
    class_graph.insert_java_library_types();
    let errors = class_graph.add_class_files(std::slice::from_ref(class));
    assert!(errors.is_empty(), "class could not be loaded: {:?}", errors);

    let session = VerifierSession::new(&class_graph, VerifierSettings::default());
    let verified = session.verify_class(class);
    verified
}

/// Verify a class, expecting it to be rejected
pub fn rejection(class: &ClassFile) -> VerifierErrorKind {
    match verify(class) {
        Err(Error::VerifierError { kind, .. }) => kind,
        Err(other) => panic!("expected a verifier error, got {}", other),
        Ok(_) => panic!("expected the class to be rejected"),
    }
}
