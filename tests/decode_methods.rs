mod harness;

use harness::*;
use preverifier::jvm::VerifierErrorKind;

fn single_method(name: &str, code_array: Vec<u8>) -> TestClass {
    let mut class = TestClass::new(name, "java/lang/Object");
    class.static_method("run", "()V", code(2, 2, code_array));
    class
}

#[test]
fn truncated_operand() {
    // bipush with its byte missing
    let class = single_method("Truncated", vec![0x10]);
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::TruncatedInstruction(0)
    );
}

#[test]
fn unknown_opcode() {
    let class = single_method("Unknown", vec![0xba, 0x00, 0x00, 0x00, 0x00, 0xb1]);
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::IllegalInstruction(0)
    );
}

#[test]
fn code_at_the_length_limit() {
    let class = single_method("Huge", vec![0x00; 65535]);
    assert_eq!(rejection(&class.class), VerifierErrorKind::CodeTooLong);
}

#[test]
fn lookupswitch_keys_out_of_order() {
    // keys 5 then 3, every target pointing at the `return` at 28
    let mut code_array = vec![0xab, 0x00, 0x00, 0x00];
    for word in [28i32, 2, 5, 28, 3, 28] {
        code_array.extend_from_slice(&word.to_be_bytes());
    }
    code_array.push(0xb1);
    let class = single_method("Lookup", code_array);
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::UnsortedLookupSwitch
    );
}

#[test]
fn tableswitch_default_outside_the_code() {
    // low 0, high 0, default 100, single target the `return` at 20
    let mut code_array = vec![0x03, 0xaa, 0x00, 0x00];
    for word in [99i32, 0, 0, 19] {
        code_array.extend_from_slice(&word.to_be_bytes());
    }
    code_array.push(0xb1);
    let class = single_method("Table", code_array);
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::IllegalSwitchDefault
    );
}

#[test]
fn constant_index_out_of_range() {
    let class = single_method("Ldc", vec![0x12, 99, 0x57, 0xb1]);
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::IllegalConstantIndex
    );
}

#[test]
fn ldc_of_a_class_constant() {
    let mut class = TestClass::new("LdcClass", "java/lang/Object");
    let index = class.class.this_class.0 as u8;
    class.static_method("run", "()V", code(1, 0, vec![0x12, index, 0x57, 0xb1]));
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::IllegalConstantType
    );
}

#[test]
fn local_past_max_locals() {
    // iload 5 with two locals
    let class = single_method("Locals", vec![0x15, 0x05, 0x57, 0xb1]);
    assert_eq!(rejection(&class.class), VerifierErrorKind::IllegalLocalIndex);

    // lload 1 needs locals 1 and 2
    let class = single_method("WideLocals", vec![0x16, 0x01, 0x58, 0xb1]);
    assert_eq!(rejection(&class.class), VerifierErrorKind::IllegalLocalIndex);
}

#[test]
fn empty_exception_range() {
    let mut class = TestClass::new("EmptyRange", "java/lang/Object");
    let mut method_code = code(1, 0, vec![0x00, 0x00, 0xb1]);
    method_code.exception_table.push(handler(1, 1, 2, 0));
    class.static_method("run", "()V", method_code);
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::IllegalExceptionRange
    );
}

#[test]
fn handler_at_method_entry() {
    let mut class = TestClass::new("EntryHandler", "java/lang/Object");
    let mut method_code = code(1, 0, vec![0x00, 0x00, 0xb1]);
    method_code.exception_table.push(handler(1, 2, 0, 0));
    class.static_method("run", "()V", method_code);
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::IllegalExceptionHandler
    );
}

#[test]
fn invokeinterface_count_byte() {
    let build = |count: u8, zero: u8| {
        let mut class = TestClass::new("Interface", "java/lang/Object");
        let run = class.interface_method_ref("java/lang/Runnable", "run", "()V");
        let [hi, lo] = run.to_be_bytes();
        class.static_method(
            "run",
            "()V",
            code(1, 0, vec![0x01, 0xb9, hi, lo, count, zero, 0xb1]),
        );
        class
    };

    assert_eq!(
        rejection(&build(2, 0).class),
        VerifierErrorKind::InconsistentInterfaceArgsSize
    );
    assert_eq!(
        rejection(&build(1, 5).class),
        VerifierErrorKind::NonZeroInterfaceOperand
    );
    assert!(verify(&build(1, 0).class).is_ok());
}

#[test]
fn calls_to_special_methods() {
    let mut class = TestClass::new("Special", "java/lang/Object");
    let clinit = class.method_ref("Special", "<clinit>", "()V");
    let [hi, lo] = clinit.to_be_bytes();
    class.static_method("run", "()V", code(0, 0, vec![0xb8, hi, lo, 0xb1]));
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::IllegalInternalCall
    );

    let mut class = TestClass::new("Special", "java/lang/Object");
    let init = class.method_ref("java/lang/Object", "<init>", "()V");
    let [hi, lo] = init.to_be_bytes();
    class.static_method(
        "run",
        "()V",
        code(1, 0, vec![0x01, 0xb6, hi, lo, 0xb1]),
    );
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::InitializerNotInvokespecial
    );
}

#[test]
fn array_class_operands() {
    // new of an array class
    let mut class = TestClass::new("Arrays", "java/lang/Object");
    let ints = class.class_ref("[I");
    let [hi, lo] = ints.to_be_bytes();
    class.static_method("run", "()V", code(1, 0, vec![0xbb, hi, lo, 0x57, 0xb1]));
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::IllegalMultiNewArray
    );

    // three dimensions of a two dimensional array type
    let mut class = TestClass::new("Arrays", "java/lang/Object");
    let matrix = class.class_ref("[[I");
    let [hi, lo] = matrix.to_be_bytes();
    class.static_method(
        "run",
        "()V",
        code(3, 0, vec![0x04, 0x04, 0x04, 0xc5, hi, lo, 3, 0x57, 0xb1]),
    );
    assert_eq!(
        rejection(&class.class),
        VerifierErrorKind::IllegalDimensions
    );

    // newarray with an element code that isn't a primitive type
    let class = single_method("Arrays", vec![0x04, 0xbc, 0x03, 0x57, 0xb1]);
    assert_eq!(rejection(&class.class), VerifierErrorKind::BadNewArrayType);
}
