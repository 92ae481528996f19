mod harness;

use harness::*;
use preverifier::jvm::class_file::{Attribute, StackMap};
use preverifier::jvm::verifier::{StackMapFrame, VerificationType};
use preverifier::jvm::{MethodAccessFlags, Serialize, VerifierErrorKind};

/// `iconst_0; istore_0; goto 5; iload_0; ireturn`
fn int_local_method(descriptor: &str) -> TestClass {
    let mut class = TestClass::new("Locals", "java/lang/Object");
    class.static_method(
        "run",
        descriptor,
        code(1, 1, vec![0x03, 0x3b, 0xa7, 0x00, 0x03, 0x1a, 0xac]),
    );
    class
}

#[test]
fn int_local_is_typed_at_targets() {
    let class = int_local_method("()I");
    let verified = verify(&class.class).unwrap();
    assert_eq!(verified.methods.len(), 1);
    let method = &verified.methods[0];
    assert!(!method.rewritten);
    assert_eq!(
        method.stack_map,
        vec![StackMapFrame {
            offset: 5,
            locals: vec![VerificationType::Integer],
            stack: vec![],
        }]
    );
}

#[test]
fn int_return_from_void_method() {
    let class = int_local_method("()V");
    assert_eq!(rejection(&class.class), VerifierErrorKind::WrongReturnType);
}

#[test]
fn stack_maps_are_deterministic() {
    let mut class = int_local_method("()I");
    let first = verify(&class.class).unwrap();
    let second = verify(&class.class).unwrap();
    assert_eq!(first.methods[0].stack_map, second.methods[0].stack_map);

    first.attach_to(&mut class.class).unwrap();
    let mut bytes = vec![];
    class.class.serialize(&mut bytes).unwrap();

    // Attaching again replaces the previous stack map rather than adding a second one
    second.attach_to(&mut class.class).unwrap();
    let mut bytes_again = vec![];
    class.class.serialize(&mut bytes_again).unwrap();
    assert_eq!(bytes, bytes_again);
}

#[test]
fn add_on_empty_stack() {
    let mut class = TestClass::new("Underflow", "java/lang/Object");
    class.static_method("run", "()V", code(2, 0, vec![0x60, 0xb1]));
    assert_eq!(rejection(&class.class), VerifierErrorKind::EmptyStack);
}

#[test]
fn dead_code_is_removed() {
    // 0: goto 4, 3: nop (never reached), 4: goto 4
    let mut class = TestClass::new("Spin", "java/lang/Object");
    class.static_method(
        "run",
        "()V",
        code(0, 0, vec![0xa7, 0x00, 0x04, 0x00, 0xa7, 0x00, 0x00]),
    );
    let verified = verify(&class.class).unwrap();
    let method = &verified.methods[0];
    assert!(method.rewritten);
    assert_eq!(method.code.code_array, vec![0xa7, 0x00, 0x03, 0xa7, 0x00, 0x00]);
    assert_eq!(
        method.stack_map,
        vec![StackMapFrame {
            offset: 3,
            locals: vec![],
            stack: vec![],
        }]
    );
}

/// Two calls to one subroutine, with local 0 holding an `int` around the first call and `null`
/// around the second. The subroutine only touches locals 2 and 3.
///
/// ```text
///  0: iconst_1
///  1: istore_0
///  2: jsr 15
///  5: <first use>
///  6: pop
///  7: aconst_null
///  8: astore_0
///  9: jsr 15
/// 12: aload_0
/// 13: pop
/// 14: return
/// 15: astore_2
/// 16: iconst_0
/// 17: istore_3
/// 18: ret 2
/// ```
fn subroutine_method(first_use: u8) -> TestClass {
    let mut class = TestClass::new("Finally", "java/lang/Object");
    class.static_method(
        "run",
        "()V",
        code(
            1,
            4,
            vec![
                0x04, 0x3b, 0xa8, 0x00, 0x0d, first_use, 0x57, 0x01, 0x4b, 0xa8, 0x00, 0x06, 0x2a,
                0x57, 0xb1, 0x4d, 0x03, 0x3e, 0xa9, 0x02,
            ],
        ),
    );
    class
}

#[test]
fn subroutine_preserves_caller_locals() {
    let class = subroutine_method(0x1a); // iload_0
    let verified = verify(&class.class).unwrap();
    let method = &verified.methods[0];
    assert!(method.rewritten);
    assert_eq!(
        method.code.code_array,
        vec![
            0x04, 0x3b, // iconst_1, istore_0
            0x03, 0x3e, // first copy: iconst_0, istore_3
            0x1a, 0x57, 0x01, 0x4b, // iload_0, pop, aconst_null, astore_0
            0x03, 0x3e, // second copy: iconst_0, istore_3
            0x2a, 0x57, 0xb1, // aload_0, pop, return
        ]
    );
    assert!(method.stack_map.is_empty());
}

#[test]
fn subroutine_does_not_change_local_types() {
    let class = subroutine_method(0x2a); // aload_0, but local 0 holds an int
    assert_eq!(rejection(&class.class), VerifierErrorKind::WrongRegisterType(0));
}

#[test]
fn recursive_subroutine() {
    // 0: jsr 3, 3: astore_0, 4: jsr 3, 7: return
    let mut class = TestClass::new("Recursive", "java/lang/Object");
    class.static_method(
        "run",
        "()V",
        code(1, 1, vec![0xa8, 0x00, 0x03, 0x4b, 0xa8, 0xff, 0xff, 0xb1]),
    );
    assert_eq!(rejection(&class.class), VerifierErrorKind::RecursiveJsr);
}

#[test]
fn constructor_must_call_super_on_every_path() {
    // 0: iconst_0, 1: ifeq 8, 4: aload_0, 5: invokespecial Object.<init>, 8: return
    let mut class = TestClass::new("Partial", "java/lang/Object");
    let init = class.method_ref("java/lang/Object", "<init>", "()V");
    let [hi, lo] = init.to_be_bytes();
    class.method(
        MethodAccessFlags::PUBLIC,
        "<init>",
        "()V",
        code(1, 1, vec![0x03, 0x99, 0x00, 0x07, 0x2a, 0xb7, hi, lo, 0xb1]),
    );
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::ConstructorNotCalled
    );
}

#[test]
fn constructor_calling_super_on_both_paths() {
    // 0: iconst_0, 1: ifeq 11, 4: aload_0, 5: invokespecial, 8: goto 15,
    // 11: aload_0, 12: invokespecial, 15: return
    let mut class = TestClass::new("Complete", "java/lang/Object");
    let init = class.method_ref("java/lang/Object", "<init>", "()V");
    let [hi, lo] = init.to_be_bytes();
    class.method(
        MethodAccessFlags::PUBLIC,
        "<init>",
        "()V",
        code(
            1,
            1,
            vec![
                0x03, 0x99, 0x00, 0x0a, 0x2a, 0xb7, hi, lo, 0xa7, 0x00, 0x07, 0x2a, 0xb7, hi, lo,
                0xb1,
            ],
        ),
    );

    let verified = verify(&class.class).unwrap();
    let frames = &verified.methods[0].stack_map;
    assert_eq!(
        frames,
        &vec![
            StackMapFrame {
                offset: 11,
                locals: vec![VerificationType::UninitializedThis],
                stack: vec![],
            },
            StackMapFrame {
                offset: 15,
                locals: vec![VerificationType::Object(String::from("Complete"))],
                stack: vec![],
            },
        ]
    );

    // Class names in the attached stack map point at `CONSTANT_Class` entries
    verified.attach_to(&mut class.class).unwrap();
    let constants = &class.class.constants;
    let code = class.class.methods[0].code(constants).unwrap().unwrap();
    let stack_map: StackMap = Attribute::find(&code.attributes, constants).unwrap().unwrap();
    let this_class = constants.find_class("Complete").unwrap();
    assert_eq!(
        stack_map.0[1].locals,
        vec![VerificationType::Object(this_class)]
    );
}

#[test]
fn handler_gets_the_exception() {
    // 0: aconst_null, 1: athrow, 2: astore_0 (handler), 3: return
    let mut class = TestClass::new("Catch", "java/lang/Object");
    let mut method_code = code(1, 1, vec![0x01, 0xbf, 0x4b, 0xb1]);
    method_code.exception_table.push(handler(0, 2, 2, 0));
    class.static_method("run", "()V", method_code);

    let verified = verify(&class.class).unwrap();
    assert_eq!(
        verified.methods[0].stack_map,
        vec![StackMapFrame {
            offset: 2,
            locals: vec![],
            stack: vec![VerificationType::Object(String::from(
                "java/lang/Throwable"
            ))],
        }]
    );
}

#[test]
fn handler_stack_has_exactly_one_value() {
    // 0: aconst_null, 1: athrow, 2: pop (handler), 3: pop, 4: return
    let mut class = TestClass::new("CatchTwice", "java/lang/Object");
    let mut method_code = code(1, 0, vec![0x01, 0xbf, 0x57, 0x57, 0xb1]);
    method_code.exception_table.push(handler(0, 2, 2, 0));
    class.static_method("run", "()V", method_code);
    assert_eq!(rejection(&class.class), VerifierErrorKind::EmptyStack);
}

#[test]
fn public_private_method() {
    let mut class = TestClass::new("Flags", "java/lang/Object");
    class.method(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::PRIVATE | MethodAccessFlags::STATIC,
        "run",
        "()V",
        code(0, 0, vec![0xb1]),
    );
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::InconsistentAccessBits
    );
}

#[test]
fn declared_exception_must_be_a_class() {
    let mut class = TestClass::new("Throws", "java/lang/Object");
    let method = class.static_method("run", "()V", code(0, 0, vec![0xb1]));
    let not_a_class = class.class.methods[method].name_index.0;
    class.declare_exceptions(method, &[not_a_class]);
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::IllegalConstantType
    );

    let exception = class.class_ref("java/lang/Exception");
    class.declare_exceptions(method, &[exception]);
    assert!(verify(&class.class).is_ok());
}

#[test]
fn branch_into_the_middle_of_an_instruction() {
    // 0: goto 2 (which is inside the goto itself)
    let mut class = TestClass::new("Jump", "java/lang/Object");
    class.static_method("run", "()V", code(0, 0, vec![0xa7, 0x00, 0x02, 0xb1]));
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::IllegalBranchTarget
    );
}

#[test]
fn stack_heights_differ_at_a_join() {
    // 0: iconst_0, 1: ifeq 5, 4: iconst_1, 5: return
    let mut class = TestClass::new("Heights", "java/lang/Object");
    class.static_method("run", "()V", code(1, 0, vec![0x03, 0x99, 0x00, 0x04, 0x04, 0xb1]));
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::InconsistentStackHeight(1, 0)
    );
}

#[test]
fn int_and_float_meet_on_the_stack() {
    // 0: iconst_0, 1: ifeq 8, 4: iconst_1, 5: goto 9, 8: fconst_0, 9: pop, 10: return
    let mut class = TestClass::new("Mismatch", "java/lang/Object");
    class.static_method(
        "run",
        "()V",
        code(
            1,
            0,
            vec![0x03, 0x99, 0x00, 0x07, 0x04, 0xa7, 0x00, 0x04, 0x0b, 0x57, 0xb1],
        ),
    );
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::MismatchedStackTypes
    );
}

#[test]
fn max_stack_exceeded() {
    let mut class = TestClass::new("Deep", "java/lang/Object");
    class.static_method("run", "()V", code(1, 0, vec![0x03, 0x03, 0x58, 0xb1]));
    assert_eq!(rejection(&class.class), VerifierErrorKind::StackOverflow);
}

#[test]
fn two_rets_for_one_jsr() {
    // 0: jsr 4, 3: return, 4: astore_0, 5: iconst_0, 6: ifeq 11, 9: ret 0, 11: ret 0
    let mut class = TestClass::new("TwoRets", "java/lang/Object");
    class.static_method(
        "run",
        "()V",
        code(
            1,
            1,
            vec![
                0xa8, 0x00, 0x04, 0xb1, 0x4b, 0x03, 0x99, 0x00, 0x05, 0xa9, 0x00, 0xa9, 0x00,
            ],
        ),
    );
    assert_eq!(rejection(&class.class), VerifierErrorKind::MultipleReturns);
}

#[test]
fn uninitialized_object_through_a_subroutine() {
    // 0: new Object, 3: jsr 10, 6: invokespecial Object.<init>, 9: return,
    // 10: astore_0, 11: ret 0
    let mut class = TestClass::new("Smuggle", "java/lang/Object");
    let object = class.class_ref("java/lang/Object");
    let init = class.method_ref("java/lang/Object", "<init>", "()V");
    let [new_hi, new_lo] = object.to_be_bytes();
    let [init_hi, init_lo] = init.to_be_bytes();
    class.static_method(
        "run",
        "()V",
        code(
            2,
            1,
            vec![
                0xbb, new_hi, new_lo, 0xa8, 0x00, 0x07, 0xb7, init_hi, init_lo, 0xb1, 0x4b, 0xa9,
                0x00,
            ],
        ),
    );
    let kind = rejection(&class.class);
    assert!(matches!(kind, VerifierErrorKind::ExpectedOnStack(_)));
    assert_eq!(
        kind.to_string(),
        "Expecting to find uninitialized object on stack"
    );
}

#[test]
fn throw_a_string() {
    let mut class = TestClass::new("Thrower", "java/lang/Object");
    class.static_method(
        "run",
        "(Ljava/lang/String;)V",
        code(1, 1, vec![0x2a, 0xbf]),
    );
    assert_eq!(rejection(&class.class), VerifierErrorKind::ThrowNonThrowable);
}

/// `<init>` calling `super()` inside a handler range, with the given handler code at offset 5
///
/// ```text
/// 0: aload_0
/// 1: invokespecial Object.<init>
/// 4: return
/// 5: <handler>
/// ```
fn guarded_constructor(name: &str, handler_code: &[u8]) -> TestClass {
    let mut class = TestClass::new(name, "java/lang/Object");
    let init = class.method_ref("java/lang/Object", "<init>", "()V");
    let [hi, lo] = init.to_be_bytes();
    let mut code_array = vec![0x2a, 0xb7, hi, lo, 0xb1];
    code_array.extend_from_slice(handler_code);
    let mut method_code = code(1, 1, code_array);
    method_code.exception_table.push(handler(1, 4, 5, 0));
    class.method(MethodAccessFlags::PUBLIC, "<init>", "()V", method_code);
    class
}

#[test]
fn handler_around_super_call_sees_unconstructed_this() {
    // pop, return
    let class = guarded_constructor("GuardedReturn", &[0x57, 0xb1]);
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::ConstructorNotCalled
    );
}

#[test]
fn handler_around_super_call_cannot_return_a_value() {
    // pop, iconst_0, ireturn
    let class = guarded_constructor("GuardedValue", &[0x57, 0x03, 0xac]);
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::CannotReturnNormally
    );
}

#[test]
fn handler_around_super_call_may_rethrow() {
    // athrow
    let class = guarded_constructor("GuardedRethrow", &[0xbf]);
    let verified = verify(&class.class).unwrap();
    assert_eq!(
        verified.methods[0].stack_map,
        vec![StackMapFrame {
            offset: 5,
            // `this` is uninitialized on one path and initialized on the other
            locals: vec![],
            stack: vec![VerificationType::Object(String::from(
                "java/lang/Throwable"
            ))],
        }]
    );
}
