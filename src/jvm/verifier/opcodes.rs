//! Opcodes, instruction lengths, and what each instruction does to the operand stack
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-6.html

/// Opcode of a decoded instruction
///
/// Real opcodes all fit in a byte. The verifier also uses [`INVOKEINIT`] for `invokespecial`
/// calls to `<init>`, since those behave so differently from other calls.
pub type Opcode = u16;

pub const NOP: Opcode = 0x00;
pub const ACONST_NULL: Opcode = 0x01;
pub const ICONST_M1: Opcode = 0x02;
pub const ICONST_5: Opcode = 0x08;
pub const LCONST_0: Opcode = 0x09;
pub const LCONST_1: Opcode = 0x0a;
pub const FCONST_0: Opcode = 0x0b;
pub const FCONST_2: Opcode = 0x0d;
pub const DCONST_0: Opcode = 0x0e;
pub const DCONST_1: Opcode = 0x0f;
pub const BIPUSH: Opcode = 0x10;
pub const SIPUSH: Opcode = 0x11;
pub const LDC: Opcode = 0x12;
pub const LDC_W: Opcode = 0x13;
pub const LDC2_W: Opcode = 0x14;
pub const ILOAD: Opcode = 0x15;
pub const LLOAD: Opcode = 0x16;
pub const FLOAD: Opcode = 0x17;
pub const DLOAD: Opcode = 0x18;
pub const ALOAD: Opcode = 0x19;
pub const ILOAD_0: Opcode = 0x1a;
pub const ALOAD_3: Opcode = 0x2d;
pub const IALOAD: Opcode = 0x2e;
pub const LALOAD: Opcode = 0x2f;
pub const FALOAD: Opcode = 0x30;
pub const DALOAD: Opcode = 0x31;
pub const AALOAD: Opcode = 0x32;
pub const BALOAD: Opcode = 0x33;
pub const CALOAD: Opcode = 0x34;
pub const SALOAD: Opcode = 0x35;
pub const ISTORE: Opcode = 0x36;
pub const LSTORE: Opcode = 0x37;
pub const FSTORE: Opcode = 0x38;
pub const DSTORE: Opcode = 0x39;
pub const ASTORE: Opcode = 0x3a;
pub const ISTORE_0: Opcode = 0x3b;
pub const ASTORE_3: Opcode = 0x4e;
pub const IASTORE: Opcode = 0x4f;
pub const LASTORE: Opcode = 0x50;
pub const FASTORE: Opcode = 0x51;
pub const DASTORE: Opcode = 0x52;
pub const AASTORE: Opcode = 0x53;
pub const BASTORE: Opcode = 0x54;
pub const CASTORE: Opcode = 0x55;
pub const SASTORE: Opcode = 0x56;
pub const POP: Opcode = 0x57;
pub const POP2: Opcode = 0x58;
pub const DUP: Opcode = 0x59;
pub const DUP_X1: Opcode = 0x5a;
pub const DUP_X2: Opcode = 0x5b;
pub const DUP2: Opcode = 0x5c;
pub const DUP2_X1: Opcode = 0x5d;
pub const DUP2_X2: Opcode = 0x5e;
pub const SWAP: Opcode = 0x5f;
pub const IADD: Opcode = 0x60;
pub const LADD: Opcode = 0x61;
pub const FADD: Opcode = 0x62;
pub const DADD: Opcode = 0x63;
pub const INEG: Opcode = 0x74;
pub const LNEG: Opcode = 0x75;
pub const FNEG: Opcode = 0x76;
pub const DNEG: Opcode = 0x77;
pub const ISHL: Opcode = 0x78;
pub const LSHL: Opcode = 0x79;
pub const ISHR: Opcode = 0x7a;
pub const LSHR: Opcode = 0x7b;
pub const IUSHR: Opcode = 0x7c;
pub const LUSHR: Opcode = 0x7d;
pub const IAND: Opcode = 0x7e;
pub const LAND: Opcode = 0x7f;
pub const IOR: Opcode = 0x80;
pub const LOR: Opcode = 0x81;
pub const IXOR: Opcode = 0x82;
pub const LXOR: Opcode = 0x83;
pub const IINC: Opcode = 0x84;
pub const I2L: Opcode = 0x85;
pub const I2F: Opcode = 0x86;
pub const I2D: Opcode = 0x87;
pub const L2I: Opcode = 0x88;
pub const L2F: Opcode = 0x89;
pub const L2D: Opcode = 0x8a;
pub const F2I: Opcode = 0x8b;
pub const F2L: Opcode = 0x8c;
pub const F2D: Opcode = 0x8d;
pub const D2I: Opcode = 0x8e;
pub const D2L: Opcode = 0x8f;
pub const D2F: Opcode = 0x90;
pub const I2B: Opcode = 0x91;
pub const I2C: Opcode = 0x92;
pub const I2S: Opcode = 0x93;
pub const LCMP: Opcode = 0x94;
pub const FCMPL: Opcode = 0x95;
pub const FCMPG: Opcode = 0x96;
pub const DCMPL: Opcode = 0x97;
pub const DCMPG: Opcode = 0x98;
pub const IFEQ: Opcode = 0x99;
pub const IFLE: Opcode = 0x9e;
pub const IF_ICMPEQ: Opcode = 0x9f;
pub const IF_ICMPLE: Opcode = 0xa4;
pub const IF_ACMPEQ: Opcode = 0xa5;
pub const IF_ACMPNE: Opcode = 0xa6;
pub const GOTO: Opcode = 0xa7;
pub const JSR: Opcode = 0xa8;
pub const RET: Opcode = 0xa9;
pub const TABLESWITCH: Opcode = 0xaa;
pub const LOOKUPSWITCH: Opcode = 0xab;
pub const IRETURN: Opcode = 0xac;
pub const LRETURN: Opcode = 0xad;
pub const FRETURN: Opcode = 0xae;
pub const DRETURN: Opcode = 0xaf;
pub const ARETURN: Opcode = 0xb0;
pub const RETURN: Opcode = 0xb1;
pub const GETSTATIC: Opcode = 0xb2;
pub const PUTSTATIC: Opcode = 0xb3;
pub const GETFIELD: Opcode = 0xb4;
pub const PUTFIELD: Opcode = 0xb5;
pub const INVOKEVIRTUAL: Opcode = 0xb6;
pub const INVOKESPECIAL: Opcode = 0xb7;
pub const INVOKESTATIC: Opcode = 0xb8;
pub const INVOKEINTERFACE: Opcode = 0xb9;
pub const NEW: Opcode = 0xbb;
pub const NEWARRAY: Opcode = 0xbc;
pub const ANEWARRAY: Opcode = 0xbd;
pub const ARRAYLENGTH: Opcode = 0xbe;
pub const ATHROW: Opcode = 0xbf;
pub const CHECKCAST: Opcode = 0xc0;
pub const INSTANCEOF: Opcode = 0xc1;
pub const MONITORENTER: Opcode = 0xc2;
pub const MONITOREXIT: Opcode = 0xc3;
pub const WIDE: Opcode = 0xc4;
pub const MULTIANEWARRAY: Opcode = 0xc5;
pub const IFNULL: Opcode = 0xc6;
pub const IFNONNULL: Opcode = 0xc7;
pub const GOTO_W: Opcode = 0xc8;
pub const JSR_W: Opcode = 0xc9;
pub const BREAKPOINT: Opcode = 0xca;

/// `invokespecial` of an `<init>` method
pub const INVOKEINIT: Opcode = 0x100;

/// Length of the fixed-size instructions (0 for opcodes that are never valid)
const FIXED_LENGTHS: [u8; 202] = [
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // 0x00 nop .. dconst_1
    2, 3, 2, 3, 3, // bipush, sipush, ldc, ldc_w, ldc2_w
    2, 2, 2, 2, 2, // iload .. aload
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // iload_0 .. aload_3
    1, 1, 1, 1, 1, 1, 1, 1, // iaload .. saload
    2, 2, 2, 2, 2, // istore .. astore
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // istore_0 .. astore_3
    1, 1, 1, 1, 1, 1, 1, 1, // iastore .. sastore
    1, 1, 1, 1, 1, 1, 1, 1, 1, // pop .. swap
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // iadd .. drem
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // ineg .. lxor
    3, // iinc
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // i2l .. i2s
    1, 1, 1, 1, 1, // lcmp .. dcmpg
    3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, // ifeq .. jsr
    2, // ret
    0, 0, // tableswitch, lookupswitch
    1, 1, 1, 1, 1, 1, // ireturn .. return
    3, 3, 3, 3, // getstatic .. putfield
    3, 3, 3, 5, // invokevirtual .. invokeinterface
    0, // unused (invokedynamic)
    3, 2, 3, 1, 1, 3, 3, 1, 1, // new .. monitorexit
    0, // wide
    4, 3, 3, 5, 5, // multianewarray .. jsr_w
];

/// Offset of the first 4-byte aligned operand of a switch
pub fn switch_operands_start(offset: usize) -> usize {
    (offset + 1 + 3) & !3
}

/// Big-endian `i32` operand, if it is inside the code
pub fn read_i32(code: &[u8], at: usize) -> Option<i32> {
    let bytes = code.get(at..at + 4)?;
    Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Length of the instruction starting at `offset`
///
/// Returns `None` if the opcode is invalid or the switch table sizes are unreasonable. The
/// returned length may still run past the end of the code.
pub fn instruction_length(code: &[u8], offset: usize) -> Option<usize> {
    let opcode = *code.get(offset)? as Opcode;
    match opcode {
        TABLESWITCH => {
            let aligned = switch_operands_start(offset);
            let low = read_i32(code, aligned + 4).unwrap_or(0);
            let high = read_i32(code, aligned + 8).unwrap_or(0);
            let index = (high as i64) - (low as i64);
            if !(0..=65535).contains(&index) {
                return None;
            }
            Some(aligned + 4 * (index as usize + 4) - offset)
        }
        LOOKUPSWITCH => {
            let aligned = switch_operands_start(offset);
            let npairs = read_i32(code, aligned + 4).unwrap_or(0);
            if !(0..8192).contains(&npairs) {
                return None;
            }
            Some(aligned + 8 * (npairs as usize + 1) - offset)
        }
        WIDE => match *code.get(offset + 1)? as Opcode {
            ILOAD | LLOAD | FLOAD | DLOAD | ALOAD | ISTORE | LSTORE | FSTORE | DSTORE | ASTORE
            | RET => Some(4),
            IINC => Some(6),
            _ => None,
        },
        _ if opcode >= BREAKPOINT => Some(1),
        _ => match FIXED_LENGTHS[opcode as usize] {
            0 => None,
            length => Some(length as usize),
        },
    }
}

/// Is this one of the conditional branches?
pub const fn is_conditional_branch(opcode: Opcode) -> bool {
    matches!(opcode, IFEQ..=IF_ACMPNE | IFNULL | IFNONNULL)
}

pub const fn is_jsr(opcode: Opcode) -> bool {
    matches!(opcode, JSR | JSR_W)
}

pub const fn is_return(opcode: Opcode) -> bool {
    matches!(opcode, IRETURN..=RETURN)
}

/// Is this one of the two-slot local variable instructions?
pub const fn is_wide_local(opcode: Opcode) -> bool {
    matches!(opcode, LLOAD | DLOAD | LSTORE | DSTORE)
}

/// What is expected on the stack
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Expect {
    Int,
    Float,
    Long,
    Double,

    /// Class instance (not an array) or `null`
    Object,

    /// Class instance, array, or `null` (some instructions accept more)
    Reference,

    /// Object whose constructor hasn't yet run
    Uninitialized,

    /// Array of some kind, or `null`
    Array(ArrayKind),
}

/// Array element types distinguished by the array instructions
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ArrayKind {
    Int,
    Long,
    Float,
    Double,
    Char,
    Short,

    /// `baload`/`bastore` work on both `byte[]` and `boolean[]`
    ByteOrBoolean,

    /// Array whose elements are references (including arrays)
    Reference,

    /// Any array at all
    Any,
}

/// What gets pushed onto the stack
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Push {
    Int,
    Float,
    Long,
    Double,

    /// Reference whose type depends on the instruction
    Reference,

    /// Return address of a `jsr`
    ReturnAddress,
}

/// Stack manipulation instructions, which move values around without caring about their types
///
/// Values are popped in groups (top of the stack first), each group covering some number of
/// slots. Groups are then pushed back in the listed order.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Shuffle {
    pub pops: &'static [usize],
    pub pushes: &'static [usize],
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StackEffect {
    Fixed {
        /// Expected values, bottom of the stack first
        pops: &'static [Expect],
        pushes: &'static [Push],
    },
    Shuffle(Shuffle),

    /// Effect depends on a constant pool entry
    FromConstant,
}

const fn fixed(pops: &'static [Expect], pushes: &'static [Push]) -> StackEffect {
    StackEffect::Fixed { pops, pushes }
}

const fn shuffle(pops: &'static [usize], pushes: &'static [usize]) -> StackEffect {
    StackEffect::Shuffle(Shuffle { pops, pushes })
}

/// Effect of an instruction on the operand stack
pub fn stack_effect(opcode: Opcode) -> StackEffect {
    use ArrayKind as K;
    use Expect::{Double as D, Float as F, Int as I, Long as L, Object as O, Reference as A};

    match opcode {
        NOP | IINC | GOTO | GOTO_W | RET | RETURN => fixed(&[], &[]),
        ACONST_NULL => fixed(&[], &[Push::Reference]),
        ICONST_M1..=ICONST_5 | BIPUSH | SIPUSH => fixed(&[], &[Push::Int]),
        LCONST_0 | LCONST_1 => fixed(&[], &[Push::Long]),
        FCONST_0..=FCONST_2 => fixed(&[], &[Push::Float]),
        DCONST_0 | DCONST_1 => fixed(&[], &[Push::Double]),
        LDC | LDC_W | LDC2_W => StackEffect::FromConstant,

        ILOAD => fixed(&[], &[Push::Int]),
        LLOAD => fixed(&[], &[Push::Long]),
        FLOAD => fixed(&[], &[Push::Float]),
        DLOAD => fixed(&[], &[Push::Double]),
        ALOAD => fixed(&[], &[Push::Reference]),
        IALOAD => fixed(&[Expect::Array(K::Int), I], &[Push::Int]),
        LALOAD => fixed(&[Expect::Array(K::Long), I], &[Push::Long]),
        FALOAD => fixed(&[Expect::Array(K::Float), I], &[Push::Float]),
        DALOAD => fixed(&[Expect::Array(K::Double), I], &[Push::Double]),
        AALOAD => fixed(&[Expect::Array(K::Reference), I], &[Push::Reference]),
        BALOAD => fixed(&[Expect::Array(K::ByteOrBoolean), I], &[Push::Int]),
        CALOAD => fixed(&[Expect::Array(K::Char), I], &[Push::Int]),
        SALOAD => fixed(&[Expect::Array(K::Short), I], &[Push::Int]),

        ISTORE => fixed(&[I], &[]),
        LSTORE => fixed(&[L], &[]),
        FSTORE => fixed(&[F], &[]),
        DSTORE => fixed(&[D], &[]),
        ASTORE => fixed(&[A], &[]),
        IASTORE => fixed(&[Expect::Array(K::Int), I, I], &[]),
        LASTORE => fixed(&[Expect::Array(K::Long), I, L], &[]),
        FASTORE => fixed(&[Expect::Array(K::Float), I, F], &[]),
        DASTORE => fixed(&[Expect::Array(K::Double), I, D], &[]),
        AASTORE => fixed(&[Expect::Array(K::Reference), I, A], &[]),
        BASTORE => fixed(&[Expect::Array(K::ByteOrBoolean), I, I], &[]),
        CASTORE => fixed(&[Expect::Array(K::Char), I, I], &[]),
        SASTORE => fixed(&[Expect::Array(K::Short), I, I], &[]),

        POP => shuffle(&[1], &[]),
        POP2 => shuffle(&[2], &[]),
        DUP => shuffle(&[1], &[0, 0]),
        DUP_X1 => shuffle(&[1, 1], &[0, 1, 0]),
        DUP_X2 => shuffle(&[1, 2], &[0, 1, 0]),
        DUP2 => shuffle(&[2], &[0, 0]),
        DUP2_X1 => shuffle(&[2, 1], &[0, 1, 0]),
        DUP2_X2 => shuffle(&[2, 2], &[0, 1, 0]),
        SWAP => shuffle(&[1, 1], &[0, 1]),

        // Arithmetic comes in blocks of four: int, long, float, double
        IADD..=0x73 => match (opcode - IADD) % 4 {
            0 => fixed(&[I, I], &[Push::Int]),
            1 => fixed(&[L, L], &[Push::Long]),
            2 => fixed(&[F, F], &[Push::Float]),
            _ => fixed(&[D, D], &[Push::Double]),
        },
        INEG => fixed(&[I], &[Push::Int]),
        LNEG => fixed(&[L], &[Push::Long]),
        FNEG => fixed(&[F], &[Push::Float]),
        DNEG => fixed(&[D], &[Push::Double]),
        ISHL | ISHR | IUSHR | IAND | IOR | IXOR => fixed(&[I, I], &[Push::Int]),
        LSHL | LSHR | LUSHR => fixed(&[L, I], &[Push::Long]),
        LAND | LOR | LXOR => fixed(&[L, L], &[Push::Long]),

        I2L => fixed(&[I], &[Push::Long]),
        I2F => fixed(&[I], &[Push::Float]),
        I2D => fixed(&[I], &[Push::Double]),
        L2I => fixed(&[L], &[Push::Int]),
        L2F => fixed(&[L], &[Push::Float]),
        L2D => fixed(&[L], &[Push::Double]),
        F2I => fixed(&[F], &[Push::Int]),
        F2L => fixed(&[F], &[Push::Long]),
        F2D => fixed(&[F], &[Push::Double]),
        D2I => fixed(&[D], &[Push::Int]),
        D2L => fixed(&[D], &[Push::Long]),
        D2F => fixed(&[D], &[Push::Float]),
        I2B | I2C | I2S => fixed(&[I], &[Push::Int]),

        LCMP => fixed(&[L, L], &[Push::Int]),
        FCMPL | FCMPG => fixed(&[F, F], &[Push::Int]),
        DCMPL | DCMPG => fixed(&[D, D], &[Push::Int]),

        IFEQ..=IFLE => fixed(&[I], &[]),
        IF_ICMPEQ..=IF_ICMPLE => fixed(&[I, I], &[]),
        IF_ACMPEQ | IF_ACMPNE => fixed(&[A, A], &[]),
        IFNULL | IFNONNULL => fixed(&[A], &[]),
        JSR | JSR_W => fixed(&[], &[Push::ReturnAddress]),
        TABLESWITCH | LOOKUPSWITCH => fixed(&[I], &[]),

        IRETURN => fixed(&[I], &[]),
        LRETURN => fixed(&[L], &[]),
        FRETURN => fixed(&[F], &[]),
        DRETURN => fixed(&[D], &[]),
        ARETURN => fixed(&[A], &[]),

        GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD => StackEffect::FromConstant,
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE | INVOKEINIT => {
            StackEffect::FromConstant
        }
        MULTIANEWARRAY => StackEffect::FromConstant,

        NEW => fixed(&[], &[Push::Reference]),
        NEWARRAY | ANEWARRAY => fixed(&[I], &[Push::Reference]),
        ARRAYLENGTH => fixed(&[Expect::Array(K::Any)], &[Push::Int]),
        ATHROW => fixed(&[O], &[]),
        CHECKCAST => fixed(&[A], &[Push::Reference]),
        INSTANCEOF => fixed(&[A], &[Push::Int]),
        MONITORENTER | MONITOREXIT => fixed(&[A], &[]),

        // Only reachable for opcodes the decoder already rejected
        _ => fixed(&[], &[]),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fixed_lengths() {
        assert_eq!(instruction_length(&[NOP as u8], 0), Some(1));
        assert_eq!(instruction_length(&[SIPUSH as u8, 0, 1], 0), Some(3));
        assert_eq!(instruction_length(&[INVOKEINTERFACE as u8], 0), Some(5));
        assert_eq!(instruction_length(&[0xba], 0), None);
        assert_eq!(instruction_length(&[MULTIANEWARRAY as u8], 0), Some(4));
        assert_eq!(instruction_length(&[JSR_W as u8], 0), Some(5));
        assert_eq!(instruction_length(&[], 0), None);
    }

    #[test]
    fn wide_lengths() {
        assert_eq!(instruction_length(&[WIDE as u8, ILOAD as u8, 1, 0], 0), Some(4));
        assert_eq!(instruction_length(&[WIDE as u8, IINC as u8, 1, 0, 0, 1], 0), Some(6));
        assert_eq!(instruction_length(&[WIDE as u8, IADD as u8], 0), None);
    }

    #[test]
    fn switch_lengths() {
        // nop, then tableswitch with padding of 2 and cases 1..=2
        let mut code = vec![NOP as u8, TABLESWITCH as u8, 0, 0];
        code.extend_from_slice(&20i32.to_be_bytes());
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&2i32.to_be_bytes());
        code.extend_from_slice(&[0; 8]);
        assert_eq!(instruction_length(&code, 1), Some(3 + 12 + 8));

        let mut code = vec![LOOKUPSWITCH as u8, 0, 0, 0];
        code.extend_from_slice(&20i32.to_be_bytes());
        code.extend_from_slice(&(-1i32).to_be_bytes());
        assert_eq!(instruction_length(&code, 0), None);
    }

    #[test]
    fn control_transfers() {
        assert!(is_return(IRETURN));
        assert!(is_return(RETURN));
        assert!(!is_return(ATHROW));
        assert!(!is_return(RET));
        assert!(is_conditional_branch(IFNULL));
        assert!(!is_conditional_branch(GOTO));
        assert!(is_jsr(JSR_W));
    }

    #[test]
    fn arithmetic_blocks() {
        assert_eq!(
            stack_effect(0x6d), // ldiv
            StackEffect::Fixed {
                pops: &[Expect::Long, Expect::Long],
                pushes: &[Push::Long]
            }
        );
        assert_eq!(
            stack_effect(0x72), // frem
            StackEffect::Fixed {
                pops: &[Expect::Float, Expect::Float],
                pushes: &[Push::Float]
            }
        );
        assert!(matches!(stack_effect(DUP2_X1), StackEffect::Shuffle(_)));
        assert_eq!(stack_effect(INVOKEINIT), StackEffect::FromConstant);
    }
}
