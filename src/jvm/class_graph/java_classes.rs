use super::{
    BinaryName, ClassAccessFlags, ClassData, ClassGraph, MethodAccessFlags, MethodData, Name,
    UnqualifiedName,
};
use elsa::FrozenVec;

/// Classes inside `java.*`
pub struct JavaClasses<'g> {
    pub lang: LangClasses<'g>,
    pub io: IoClasses<'g>,
}

/// Classes inside `java.lang.*`
pub struct LangClasses<'g> {
    pub object: &'g ClassData<'g>,
    pub cloneable: &'g ClassData<'g>,
    pub runnable: &'g ClassData<'g>,
    pub string: &'g ClassData<'g>,
    pub string_buffer: &'g ClassData<'g>,
    pub class: &'g ClassData<'g>,
    pub number: &'g ClassData<'g>,
    pub integer: &'g ClassData<'g>,
    pub system: &'g ClassData<'g>,
    pub thread: &'g ClassData<'g>,
    pub throwable: &'g ClassData<'g>,
    pub error: &'g ClassData<'g>,
    pub exception: &'g ClassData<'g>,
    pub runtime_exception: &'g ClassData<'g>,
    pub arithmetic_exception: &'g ClassData<'g>,
    pub class_cast_exception: &'g ClassData<'g>,
    pub illegal_argument_exception: &'g ClassData<'g>,
    pub illegal_state_exception: &'g ClassData<'g>,
    pub index_out_of_bounds_exception: &'g ClassData<'g>,
    pub array_index_out_of_bounds_exception: &'g ClassData<'g>,
    pub null_pointer_exception: &'g ClassData<'g>,
}

/// Classes inside `java.io.*`
pub struct IoClasses<'g> {
    pub serializable: &'g ClassData<'g>,
}

impl<'g> JavaClasses<'g> {
    pub fn add_to_graph(class_graph: &ClassGraph<'g>) -> JavaClasses<'g> {
        let lang = LangClasses::add_to_graph(class_graph);
        let io = IoClasses::add_to_graph(class_graph, lang.object);

        JavaClasses { lang, io }
    }
}

impl<'g> LangClasses<'g> {
    pub fn add_to_graph(class_graph: &ClassGraph<'g>) -> LangClasses<'g> {
        let object = class_graph.add_class(ClassData {
            name: BinaryName::OBJECT,
            superclass: None,
            interfaces: FrozenVec::new(),
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            methods: FrozenVec::new(),
            fields: FrozenVec::new(),
        });
        add_methods(
            class_graph,
            object,
            &[
                ("<init>", "()V", MethodAccessFlags::PUBLIC),
                ("equals", "(Ljava/lang/Object;)Z", MethodAccessFlags::PUBLIC),
                ("getClass", "()Ljava/lang/Class;", MethodAccessFlags::PUBLIC | MethodAccessFlags::FINAL | MethodAccessFlags::NATIVE),
                ("hashCode", "()I", MethodAccessFlags::PUBLIC | MethodAccessFlags::NATIVE),
                ("toString", "()Ljava/lang/String;", MethodAccessFlags::PUBLIC),
                ("notify", "()V", MethodAccessFlags::PUBLIC | MethodAccessFlags::FINAL | MethodAccessFlags::NATIVE),
                ("notifyAll", "()V", MethodAccessFlags::PUBLIC | MethodAccessFlags::FINAL | MethodAccessFlags::NATIVE),
                ("wait", "()V", MethodAccessFlags::PUBLIC | MethodAccessFlags::FINAL),
                ("wait", "(J)V", MethodAccessFlags::PUBLIC | MethodAccessFlags::FINAL | MethodAccessFlags::NATIVE),
                ("clone", "()Ljava/lang/Object;", MethodAccessFlags::PROTECTED | MethodAccessFlags::NATIVE),
                ("finalize", "()V", MethodAccessFlags::PROTECTED),
            ],
        );

        let interface_flags =
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
        let cloneable = class_graph.add_class(ClassData::new(BinaryName::CLONEABLE, object, interface_flags));
        let runnable = class_graph.add_class(ClassData::new(BinaryName::RUNNABLE, object, interface_flags));
        add_methods(class_graph, runnable, &[("run", "()V", MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT)]);

        let final_flags = ClassAccessFlags::SUPER | ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL;
        let string = class_graph.add_class(ClassData::new(BinaryName::STRING, object, final_flags));
        add_methods(
            class_graph,
            string,
            &[
                ("<init>", "()V", MethodAccessFlags::PUBLIC),
                ("length", "()I", MethodAccessFlags::PUBLIC),
                ("charAt", "(I)C", MethodAccessFlags::PUBLIC | MethodAccessFlags::NATIVE),
                ("valueOf", "(I)Ljava/lang/String;", MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC),
            ],
        );
        let string_buffer = class_graph.add_class(ClassData::new(BinaryName::STRINGBUFFER, object, final_flags));
        add_methods(
            class_graph,
            string_buffer,
            &[
                ("<init>", "()V", MethodAccessFlags::PUBLIC),
                ("append", "(Ljava/lang/String;)Ljava/lang/StringBuffer;", MethodAccessFlags::PUBLIC | MethodAccessFlags::SYNCHRONIZED),
                ("append", "(I)Ljava/lang/StringBuffer;", MethodAccessFlags::PUBLIC | MethodAccessFlags::SYNCHRONIZED),
                ("toString", "()Ljava/lang/String;", MethodAccessFlags::PUBLIC),
            ],
        );
        let class = class_graph.add_class(ClassData::new(BinaryName::CLASS, object, final_flags));

        let number = class_graph.add_class(ClassData::new(
            BinaryName::NUMBER,
            object,
            ClassAccessFlags::SUPER | ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT,
        ));
        let integer = class_graph.add_class(ClassData::new(BinaryName::INTEGER, number, final_flags));
        add_methods(
            class_graph,
            integer,
            &[
                ("<init>", "(I)V", MethodAccessFlags::PUBLIC),
                ("intValue", "()I", MethodAccessFlags::PUBLIC),
                ("parseInt", "(Ljava/lang/String;)I", MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC),
            ],
        );

        let system = class_graph.add_class(ClassData::new(BinaryName::SYSTEM, object, final_flags));
        add_methods(
            class_graph,
            system,
            &[
                ("currentTimeMillis", "()J", MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC | MethodAccessFlags::NATIVE),
                ("arraycopy", "(Ljava/lang/Object;ILjava/lang/Object;II)V", MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC | MethodAccessFlags::NATIVE),
            ],
        );

        let thread = class_graph.add_class(ClassData::new(BinaryName::THREAD, object, ClassAccessFlags::SUPER | ClassAccessFlags::PUBLIC));
        thread.interfaces.push(runnable);
        add_methods(
            class_graph,
            thread,
            &[
                ("<init>", "()V", MethodAccessFlags::PUBLIC),
                ("<init>", "(Ljava/lang/Runnable;)V", MethodAccessFlags::PUBLIC),
                ("run", "()V", MethodAccessFlags::PUBLIC),
                ("start", "()V", MethodAccessFlags::PUBLIC | MethodAccessFlags::SYNCHRONIZED | MethodAccessFlags::NATIVE),
            ],
        );

        let open_flags = ClassAccessFlags::SUPER | ClassAccessFlags::PUBLIC;
        let throwable = class_graph.add_class(ClassData::new(BinaryName::THROWABLE, object, open_flags));
        add_methods(
            class_graph,
            throwable,
            &[
                ("<init>", "()V", MethodAccessFlags::PUBLIC),
                ("<init>", "(Ljava/lang/String;)V", MethodAccessFlags::PUBLIC),
                ("getMessage", "()Ljava/lang/String;", MethodAccessFlags::PUBLIC),
                ("printStackTrace", "()V", MethodAccessFlags::PUBLIC),
            ],
        );
        let error = add_throwable(class_graph, BinaryName::ERROR, throwable);
        let exception = add_throwable(class_graph, BinaryName::EXCEPTION, throwable);
        let runtime_exception = add_throwable(class_graph, BinaryName::RUNTIMEEXCEPTION, exception);
        let arithmetic_exception = add_throwable(class_graph, BinaryName::ARITHMETICEXCEPTION, runtime_exception);
        let class_cast_exception = add_throwable(class_graph, BinaryName::CLASSCASTEXCEPTION, runtime_exception);
        let illegal_argument_exception = add_throwable(class_graph, BinaryName::ILLEGALARGUMENTEXCEPTION, runtime_exception);
        let illegal_state_exception = add_throwable(class_graph, BinaryName::ILLEGALSTATEEXCEPTION, runtime_exception);
        let index_out_of_bounds_exception = add_throwable(class_graph, BinaryName::INDEXOUTOFBOUNDSEXCEPTION, runtime_exception);
        let array_index_out_of_bounds_exception =
            add_throwable(class_graph, BinaryName::ARRAYINDEXOUTOFBOUNDSEXCEPTION, index_out_of_bounds_exception);
        let null_pointer_exception = add_throwable(class_graph, BinaryName::NULLPOINTEREXCEPTION, runtime_exception);

        LangClasses {
            object,
            cloneable,
            runnable,
            string,
            string_buffer,
            class,
            number,
            integer,
            system,
            thread,
            throwable,
            error,
            exception,
            runtime_exception,
            arithmetic_exception,
            class_cast_exception,
            illegal_argument_exception,
            illegal_state_exception,
            index_out_of_bounds_exception,
            array_index_out_of_bounds_exception,
            null_pointer_exception,
        }
    }
}

impl<'g> IoClasses<'g> {
    pub fn add_to_graph(class_graph: &ClassGraph<'g>, object: &'g ClassData<'g>) -> IoClasses<'g> {
        let serializable = class_graph.add_class(ClassData::new(
            BinaryName::SERIALIZABLE,
            object,
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT,
        ));
        IoClasses { serializable }
    }
}

/// Throwable subclasses only ever get the two standard constructors
fn add_throwable<'g>(
    class_graph: &ClassGraph<'g>,
    name: BinaryName,
    superclass: &'g ClassData<'g>,
) -> &'g ClassData<'g> {
    let class = class_graph.add_class(ClassData::new(
        name,
        superclass,
        ClassAccessFlags::SUPER | ClassAccessFlags::PUBLIC,
    ));
    add_methods(
        class_graph,
        class,
        &[
            ("<init>", "()V", MethodAccessFlags::PUBLIC),
            ("<init>", "(Ljava/lang/String;)V", MethodAccessFlags::PUBLIC),
        ],
    );
    class
}

fn add_methods<'g>(
    class_graph: &ClassGraph<'g>,
    class: &'g ClassData<'g>,
    methods: &[(&'static str, &'static str, MethodAccessFlags)],
) {
    for (name, descriptor, access_flags) in methods {
        let name = match *name {
            "<init>" => UnqualifiedName::INIT,
            "clone" => UnqualifiedName::CLONE,
            other => match UnqualifiedName::from_string(other.to_owned()) {
                Ok(name) => name,
                Err(_) => continue,
            },
        };
        class_graph.add_method(
            class,
            MethodData {
                name,
                descriptor: (*descriptor).to_owned(),
                access_flags: *access_flags,
            },
        );
    }
}

#[cfg(test)]
mod test {
    use super::super::ClassGraphArenas;
    use super::*;

    #[test]
    fn library_hierarchy() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        let java = class_graph.insert_java_library_types();

        let npe = class_graph
            .lookup_class(&BinaryName::NULLPOINTEREXCEPTION)
            .unwrap();
        assert!(npe.is_subclass_of(java.lang.throwable));
        assert!(!npe.is_subclass_of(java.lang.error));
        assert_eq!(npe.depth(), 4);
        assert_eq!(java.lang.object.depth(), 0);

        assert!(java.lang.cloneable.is_interface());
        assert!(java.io.serializable.is_interface());
        assert!(!java.lang.string.is_interface());

        let clone = java
            .lang
            .object
            .find_method("clone", "()Ljava/lang/Object;")
            .unwrap();
        assert!(clone.access_flags.contains(MethodAccessFlags::PROTECTED));
        assert!(java.lang.string.find_method("clone", "()Ljava/lang/Object;").is_none());
    }
}
