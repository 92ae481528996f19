//! Bytecode verification by type inference
//!
//! Every method is decoded into instructions and then interpreted over abstract types (see
//! [`types`]) until the state on entry to every instruction stops changing. The CLDC runtime
//! doesn't have the resources to do this sort of fix-point analysis, so once a method is known
//! to be well-typed, the state at every jump target is recorded into a [`StackMapFrame`] and
//! written out as a `StackMap` attribute. The runtime then only needs one linear pass over the
//! code, checking each instruction against the frames.
//!
//! Two things can't be expressed in stack maps: unreachable code (there is no state to record)
//! and subroutines (`jsr`/`ret`), where the same instruction runs with different local types
//! depending on the caller. Methods with either get rewritten (see [`crate::jvm::rewrite`]) and
//! then verified again from scratch.

mod arena;
mod dataflow;
mod decoder;
mod instruction;
mod lattice;
mod method;
pub mod opcodes;
mod stack_map;
mod types;

pub use stack_map::*;

use crate::jvm::class_file::{Attribute, ClassFile, Code, ConstantTag, Method, StackMap};
use crate::jvm::class_graph::ClassGraph;
use crate::jvm::rewrite::{CodeRewriter, SubroutineInliner};
use crate::jvm::{Error, VerifierErrorKind};
use arena::MethodArena;
use method::{ClassContext, MethodContext, MethodVerifier};
use types::ClassNames;

/// Knobs for verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierSettings {
    /// How many times the code of one method may be rewritten before giving up
    ///
    /// Every rewrite removes all subroutine calls and dead code, so well-formed code never needs
    /// more than one. The bound only stops a broken rewriter from looping forever.
    pub max_rewrite_passes: usize,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        VerifierSettings {
            max_rewrite_passes: 16,
        }
    }
}

/// Verifies classes against one class graph
///
/// Nothing is shared between the verification of two classes except the class graph, so the
/// same session can be used for any number of classes.
pub struct VerifierSession<'g> {
    class_graph: &'g ClassGraph<'g>,
    settings: VerifierSettings,
    rewriter: Box<dyn CodeRewriter>,
}

/// Outcome of one decode and data-flow pass over a method
enum Pass {
    Verified(Vec<StackMapFrame<String>>),
    Rewritten(Code),
}

impl<'g> VerifierSession<'g> {
    pub fn new(class_graph: &'g ClassGraph<'g>, settings: VerifierSettings) -> VerifierSession<'g> {
        VerifierSession {
            class_graph,
            settings,
            rewriter: Box::new(SubroutineInliner),
        }
    }

    /// Replace the default rewriter (which inlines subroutines and drops dead code)
    pub fn with_rewriter(mut self, rewriter: Box<dyn CodeRewriter>) -> VerifierSession<'g> {
        self.rewriter = rewriter;
        self
    }

    pub fn settings(&self) -> &VerifierSettings {
        &self.settings
    }

    /// Verify every method of a class
    ///
    /// The first failing method rejects the whole class. The class itself is not modified: see
    /// [`VerifiedClass::attach_to`] for that.
    pub fn verify_class(&self, class: &ClassFile) -> Result<VerifiedClass, Error> {
        let class_name = class.this_class_name()?;
        log::debug!("Verifying class {}", class_name);

        // Class identities are only interned for the duration of one class
        let names = ClassNames::new(self.class_graph);
        let class_context = ClassContext::new(&names, class_name)
            .map_err(|_| Error::MissingClass(class_name.to_owned()))?;

        let mut methods = vec![];
        for (method_index, method) in class.methods.iter().enumerate() {
            if let Some(verified) =
                self.verify_method(&names, class, &class_context, method_index, method)?
            {
                methods.push(verified);
            }
        }

        Ok(VerifiedClass {
            class_name: class_name.to_owned(),
            methods,
        })
    }

    /// Verify one method, returning `None` if it has no code
    fn verify_method(
        &self,
        names: &ClassNames<'g>,
        class: &ClassFile,
        class_context: &ClassContext<'g>,
        method_index: usize,
        method: &Method,
    ) -> Result<Option<VerifiedMethod>, Error> {
        let constants = &class.constants;
        let name = method.name(constants)?;
        let descriptor = method.descriptor(constants)?;
        let wrap = |kind: VerifierErrorKind| Error::VerifierError {
            class: names.name(class_context.class_id).to_owned(),
            method: name.to_owned(),
            descriptor: descriptor.to_owned(),
            kind,
        };

        if !method.access_flags.is_consistent() {
            return Err(wrap(VerifierErrorKind::InconsistentAccessBits));
        }
        let mut code = match method.code(constants)? {
            Some(code) => code,
            None => return Ok(None),
        };
        log::debug!("Verifying method {}{}", name, descriptor);

        let method_context = MethodContext::new(names, name, descriptor, method.access_flags)
            .map_err(wrap)?;

        let mut rewrite_passes = 0;
        let stack_map = loop {
            let pass = {
                let arena = MethodArena::new();
                let mut verifier = MethodVerifier::new(
                    &arena,
                    names,
                    constants,
                    class_context,
                    &method_context,
                    &code,
                );
                verifier.verify().map_err(wrap)?;
                if verifier.needs_rewrite() {
                    let rewritten = self
                        .rewriter
                        .rewrite(&verifier.analysis(), &code, constants)
                        .map_err(wrap)?;
                    Pass::Rewritten(rewritten)
                } else {
                    Pass::Verified(verifier.stack_map_frames())
                }
            };

            match pass {
                Pass::Verified(stack_map) => break stack_map,
                Pass::Rewritten(rewritten) => {
                    rewrite_passes += 1;
                    if rewrite_passes > self.settings.max_rewrite_passes {
                        return Err(wrap(VerifierErrorKind::TooManyRewritePasses(
                            self.settings.max_rewrite_passes,
                        )));
                    }
                    log::debug!(
                        "Rewrote {}{} (pass {}), code length {} -> {}",
                        name,
                        descriptor,
                        rewrite_passes,
                        code.code_array.len(),
                        rewritten.code_array.len()
                    );
                    code = rewritten;
                }
            }
        };

        // Declared exceptions have to at least be classes
        for exception in method.exceptions(constants)? {
            constants
                .check_tag(exception, ConstantTag::Class.bit())
                .map_err(|err| wrap(decoder::lookup_error(err)))?;
        }

        Ok(Some(VerifiedMethod {
            method_index,
            code,
            rewritten: rewrite_passes > 0,
            stack_map,
        }))
    }
}

/// Result of verifying every method with code in a class
#[derive(Debug, Clone)]
pub struct VerifiedClass {
    pub class_name: String,
    pub methods: Vec<VerifiedMethod>,
}

#[derive(Debug, Clone)]
pub struct VerifiedMethod {
    /// Index into the `methods` of the class file
    pub method_index: usize,

    /// Final code (which is different from the original code only if `rewritten` is set)
    pub code: Code,
    pub rewritten: bool,

    /// Frames, sorted by offset, naming classes as `CONSTANT_Class` entries would
    pub stack_map: Vec<StackMapFrame<String>>,
}

impl VerifiedClass {
    /// Store the (possibly rewritten) code and the stack maps back into the class
    ///
    /// Class names mentioned in the stack maps are added to the constant pool if missing.
    pub fn attach_to(self, class: &mut ClassFile) -> Result<(), Error> {
        for verified in self.methods {
            let frames = verified
                .stack_map
                .iter()
                .map(|frame| frame.try_map(|name| class.constants.get_class(name)))
                .collect::<Result<Vec<_>, Error>>()?;

            let mut code = verified.code;
            Attribute::replace(&mut code.attributes, &StackMap(frames), &mut class.constants)?;

            let method = class.methods.get_mut(verified.method_index).ok_or_else(|| {
                Error::MalformedClass(format!("No method at index {}", verified.method_index))
            })?;
            method.set_code(&code, &mut class.constants)?;
        }
        Ok(())
    }
}
