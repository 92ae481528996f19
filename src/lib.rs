//! Data-flow verification of JVM bytecode, producing the CLDC `StackMap` attributes that let a
//! small runtime re-verify methods in a single linear pass.

pub mod jvm;
pub mod util;
