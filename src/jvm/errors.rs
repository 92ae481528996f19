use super::class_file::Constant;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// Input is not a well-formed class file
    MalformedClass(String),

    ConstantPoolOverflow {
        constant: Constant,
        offset: usize,
    },

    /// Class referenced but not present in the class graph
    MissingClass(String),

    /// Verification of a method failed, which rejects the whole class
    VerifierError {
        class: String,
        method: String,
        descriptor: String,
        kind: VerifierErrorKind,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::MalformedClass(msg) => write!(f, "Malformed class file: {}", msg),
            Error::ConstantPoolOverflow { constant, offset } => write!(
                f,
                "Constant pool overflow at offset {} (adding {:?})",
                offset, constant
            ),
            Error::MissingClass(name) => write!(f, "Cannot find class {}", name),
            Error::VerifierError {
                class,
                method,
                descriptor,
                kind,
            } => write!(
                f,
                "VERIFIER ERROR {}.{}{}:\n{}",
                class, method, descriptor, kind
            ),
        }
    }
}

impl std::error::Error for Error {}

/// Every way a method can fail verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierErrorKind {
    // Decoding the bytecode
    IllegalInstruction(usize),
    TruncatedInstruction(usize),
    EmptyCode,
    CodeTooLong,
    IllegalBranchTarget,
    UnsortedLookupSwitch,
    IllegalSwitchDefault,
    IllegalTableSwitchBranch,
    IllegalConstantIndex,
    IllegalConstantType,
    InitializerNotInvokespecial,
    IllegalInternalCall,
    IllegalNonvirtualCall,
    InconsistentInterfaceArgsSize,
    NonZeroInterfaceOperand,
    IllegalType,
    TooManyDimensions,
    IllegalMultiNewArray,
    IllegalDimensions,
    BadNewArrayType,
    IllegalLocalIndex,
    QuickInstruction,
    IllegalExceptionRange,
    IllegalExceptionHandler,
    InconsistentAccessBits,
    BadDescriptor(String),
    MissingClass(String),

    // Running the data-flow analysis
    UninitializedRegister(usize),
    ReturnAddressLoad(usize),
    WrongRegisterType(usize),
    UninitializedRegisterPair(usize),
    WrongRegisterPairType(usize),
    ConstructorNotCalled,
    CannotReturnNormally,
    EmptyStack,
    ExpectedOnStack(&'static str),
    SplitLongOrDouble,
    IncompatibleArrayStore,
    IncompatibleFieldType,
    BadPutField,
    ThrowNonThrowable,
    WrongInitializer,
    IncompatibleReceiver,
    IncompatibleSpecialReceiver,
    BadProtectedAccess,
    IncompatibleArgument,
    WrongReturnType,
    UninitializedAtNew,
    RecursiveJsr,
    StackOverflow,
    FallOffEnd,
    MultipleReturns,
    IllegalReturnFromSubroutine,
    InconsistentStackHeight(usize, usize),
    MismatchedStackTypes,

    // Rewriting the code
    BranchOffsetOverflow,
    BadCodeAttribute(String),
    TooManyRewritePasses(usize),
}

impl fmt::Display for VerifierErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use VerifierErrorKind::*;
        match self {
            IllegalInstruction(offset) => {
                write!(f, "Illegal instruction found at offset {}", offset)
            }
            TruncatedInstruction(offset) => write!(
                f,
                "Code stops in the middle of instruction starting at offset {}",
                offset
            ),
            EmptyCode => f.write_str("Empty code"),
            CodeTooLong => f.write_str("Code of a method longer than 65535 bytes"),
            IllegalBranchTarget => f.write_str("Illegal target of jump or branch"),
            UnsortedLookupSwitch => f.write_str("Unsorted lookup switch"),
            IllegalSwitchDefault => f.write_str("Illegal default target in switch"),
            IllegalTableSwitchBranch => f.write_str("Illegal branch in tableswitch"),
            IllegalConstantIndex => f.write_str("Illegal constant pool index"),
            IllegalConstantType => f.write_str("Illegal type in constant pool"),
            InitializerNotInvokespecial => {
                f.write_str("Must call initializers using invokespecial")
            }
            IllegalInternalCall => f.write_str("Illegal call to internal method"),
            IllegalNonvirtualCall => f.write_str("Illegal use of nonvirtual function call"),
            InconsistentInterfaceArgsSize => {
                f.write_str("Inconsistent args_size for invokeinterface")
            }
            NonZeroInterfaceOperand => {
                f.write_str("Fourth operand byte of invokeinterface must be zero")
            }
            IllegalType => f.write_str("Illegal type"),
            TooManyDimensions => f.write_str("Array with too many dimensions"),
            IllegalMultiNewArray => f.write_str("Illegal creation of multi-dimensional array"),
            IllegalDimensions => f.write_str("Illegal dimension argument"),
            BadNewArrayType => f.write_str("Bad type passed to newarray"),
            IllegalLocalIndex => f.write_str("Illegal local variable number"),
            QuickInstruction => f.write_str("Quick instructions shouldn't appear yet."),
            IllegalExceptionRange => f.write_str("Illegal exception table range"),
            IllegalExceptionHandler => f.write_str("Illegal exception table handler"),
            InconsistentAccessBits => f.write_str("Inconsistent access bits."),
            BadDescriptor(descriptor) => write!(f, "Malformed descriptor {}", descriptor),
            MissingClass(name) => write!(f, "Cannot find class {}", name),
            UninitializedRegister(reg) => {
                write!(f, "Accessing value from uninitialized register {}", reg)
            }
            ReturnAddressLoad(reg) => write!(f, "Cannot load return address from register {}", reg),
            WrongRegisterType(reg) => write!(f, "Register {} contains wrong type", reg),
            UninitializedRegisterPair(reg) => write!(
                f,
                "Accessing value from uninitialized register pair {}/{}",
                reg,
                reg + 1
            ),
            WrongRegisterPairType(reg) => {
                write!(f, "Register pair {}/{} contains wrong type", reg, reg + 1)
            }
            ConstructorNotCalled => f.write_str("Constructor must call super() or this()"),
            CannotReturnNormally => f.write_str("Cannot return normally"),
            EmptyStack => f.write_str("Unable to pop operand off an empty stack"),
            ExpectedOnStack(what) => write!(f, "Expecting to find {} on stack", what),
            SplitLongOrDouble => f.write_str("Attempt to split long or double on the stack"),
            IncompatibleArrayStore => {
                f.write_str("Incompatible types for storing into array of arrays or objects")
            }
            IncompatibleFieldType => f.write_str("Incompatible type for getting or setting field"),
            BadPutField => f.write_str("Bad type in putfield/putstatic"),
            ThrowNonThrowable => f.write_str("Can only throw Throwable objects"),
            WrongInitializer => f.write_str("Call to wrong initialization method"),
            IncompatibleReceiver => f.write_str("Incompatible object argument for function call"),
            IncompatibleSpecialReceiver => {
                f.write_str("Incompatible object argument for invokespecial")
            }
            BadProtectedAccess => f.write_str("Bad access to protected data"),
            IncompatibleArgument => f.write_str("Incompatible argument to function"),
            WrongReturnType => f.write_str("Wrong return type in function"),
            UninitializedAtNew => f.write_str("Uninitialized object on stack at creating point"),
            RecursiveJsr => f.write_str("Recursive call to jsr entry"),
            StackOverflow => f.write_str("Stack size too large"),
            FallOffEnd => f.write_str("Falling off the end of the code"),
            MultipleReturns => f.write_str("Multiple returns to single jsr"),
            IllegalReturnFromSubroutine => f.write_str("Illegal return from subroutine"),
            InconsistentStackHeight(old, new) => {
                write!(f, "Inconsistent stack height {} != {}", old, new)
            }
            MismatchedStackTypes => f.write_str("Mismatched stack types"),
            BranchOffsetOverflow => {
                f.write_str("Branch offset does not fit in 16 bits after inlining subroutines")
            }
            BadCodeAttribute(msg) => write!(f, "Cannot rewrite attribute of code: {}", msg),
            TooManyRewritePasses(passes) => {
                write!(f, "Code still needs rewriting after {} passes", passes)
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn verifier_error_mentions_method() {
        let err = Error::VerifierError {
            class: String::from("Foo"),
            method: String::from("bar"),
            descriptor: String::from("()I"),
            kind: VerifierErrorKind::InconsistentStackHeight(1, 0),
        };
        assert_eq!(
            err.to_string(),
            "VERIFIER ERROR Foo.bar()I:\nInconsistent stack height 1 != 0"
        );
    }

    #[test]
    fn register_pair_messages() {
        assert_eq!(
            VerifierErrorKind::WrongRegisterPairType(3).to_string(),
            "Register pair 3/4 contains wrong type"
        );
    }
}
