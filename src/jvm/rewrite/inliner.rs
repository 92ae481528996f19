use super::{CodeRewriter, MethodAnalysis, Transfer};
use crate::jvm::class_file::{
    Attribute, Code, ConstantPool, ExceptionHandler, LineNumber, LineNumberTable, LocalVariable,
    LocalVariableTable, StackMap,
};
use crate::jvm::verifier::opcodes;
use crate::jvm::{Error, Serialize, VerifierErrorKind};

/// Default rewriter: drops unreachable instructions and inlines every subroutine
///
/// Each `jsr` whose subroutine returns gets its own copy of the subroutine body, placed right
/// after the call site so that the `jsr` itself can disappear. The `ret` in a copy becomes a
/// `goto` to the instruction after the copy (or disappears, if it is the last instruction of the
/// copy). Subroutines called from inside subroutines get copied once per calling context.
///
/// A `jsr` into a subroutine which never returns turns into a plain `goto`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubroutineInliner;

impl CodeRewriter for SubroutineInliner {
    fn rewrite(
        &self,
        analysis: &MethodAnalysis,
        code: &Code,
        constants: &ConstantPool,
    ) -> Result<Code, VerifierErrorKind> {
        let mut layout = Layout {
            analysis,
            contexts: vec![],
            emitted: vec![],
            copies: vec![vec![]; analysis.instructions.len()],
            code_length: 0,
        };
        layout.lay_out(None)?;
        layout.assign_offsets()?;

        let code_array = layout.emit_code(&code.code_array)?;
        let exception_table = layout.exception_table(&code.exception_table)?;

        let mut attributes = vec![];
        for attribute in &code.attributes {
            // Stale once offsets move, and the verifier produces a new one anyway
            if attribute.is::<StackMap>(constants)
                || constants.utf8(attribute.name_index) == Ok(STACK_MAP_TABLE)
            {
                continue;
            }
            if let Some(table) = attribute
                .decode::<LineNumberTable>(constants)
                .map_err(bad_attribute)?
            {
                let remapped = LineNumberTable(layout.line_numbers(&table.0));
                attributes.push(reencode(attribute, &remapped)?);
            } else if let Some(table) = attribute
                .decode::<LocalVariableTable>(constants)
                .map_err(bad_attribute)?
            {
                let remapped = LocalVariableTable(layout.local_variables(&table.0));
                attributes.push(reencode(attribute, &remapped)?);
            } else {
                attributes.push(attribute.clone());
            }
        }

        Ok(Code {
            max_stack: code.max_stack,
            max_locals: code.max_locals,
            code_array,
            exception_table,
            attributes,
        })
    }
}

const STACK_MAP_TABLE: &str = "StackMapTable";

fn bad_attribute(err: Error) -> VerifierErrorKind {
    VerifierErrorKind::BadCodeAttribute(err.to_string())
}

/// Same attribute name, new contents
fn reencode<A: Serialize>(attribute: &Attribute, contents: &A) -> Result<Attribute, VerifierErrorKind> {
    let mut info = vec![];
    contents
        .serialize(&mut info)
        .map_err(|err| VerifierErrorKind::BadCodeAttribute(err.to_string()))?;
    Ok(Attribute {
        name_index: attribute.name_index,
        info,
    })
}

/// One copy of a subroutine body
#[derive(Debug)]
struct Context {
    /// Number of subroutines nested, counting this one
    depth: usize,

    /// Context of the `jsr` (`None` for the top level)
    parent: Option<usize>,

    /// Instruction number of the subroutine entry
    target: usize,

    /// Index of the emitted `jsr` that this copy is made for
    caller: usize,

    /// Index of the first emitted instruction after the copy
    next: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Emit {
    /// Copy the instruction, fixing up branch targets
    Copy,

    /// Leave the instruction out entirely
    Skip,

    /// `goto` in place of a `jsr` to a subroutine that never returns
    JsrGoto,

    /// `goto` in place of a `jsr` whose inlined copy doesn't start with the subroutine entry
    JsrGotoCopy,

    /// `goto` in place of a `ret` which isn't the last instruction of its copy
    RetGoto,
}

#[derive(Debug)]
struct Emitted {
    inumber: usize,
    context: Option<usize>,
    emit: Emit,

    /// Offset in the new code (for skipped instructions, the offset of whatever comes next)
    offset: usize,
}

struct Layout<'m> {
    analysis: &'m MethodAnalysis,
    contexts: Vec<Context>,
    emitted: Vec<Emitted>,

    /// Indices in `emitted` of every copy of an original instruction
    copies: Vec<Vec<usize>>,

    code_length: usize,
}

impl<'m> Layout<'m> {
    /// Emit the instructions of a context in order, recursing into subroutine calls
    fn lay_out(&mut self, context: Option<usize>) -> Result<(), VerifierErrorKind> {
        let analysis = self.analysis;
        let depth = context.map_or(0, |context| self.contexts[context].depth);
        let mut ret: Option<usize> = None;
        let mut first = true;

        for (inumber, instruction) in analysis.instructions.iter().enumerate() {
            if !instruction.reached
                || instruction.subroutines.len() != depth
                || !self.runs_in(&instruction.subroutines, context)
            {
                continue;
            }

            let index = self.emitted.len();
            self.emitted.push(Emitted {
                inumber,
                context,
                emit: Emit::Copy,
                offset: 0,
            });
            self.copies[inumber].push(index);

            // The `jsr` can only fall into the copy if the copy starts with the entry
            if first {
                first = false;
                if let Some(context) = context {
                    let Context { target, caller, .. } = self.contexts[context];
                    if inumber != target {
                        self.emitted[caller].emit = Emit::JsrGotoCopy;
                    }
                }
            }

            match instruction.transfer {
                Transfer::Jsr { returns: false, .. } => self.emitted[index].emit = Emit::JsrGoto,
                Transfer::Jsr {
                    target,
                    returns: true,
                } => {
                    self.emitted[index].emit = Emit::Skip;
                    let subroutine = self.contexts.len();
                    self.contexts.push(Context {
                        depth: depth + 1,
                        parent: context,
                        target,
                        caller: index,
                        next: 0,
                    });
                    self.lay_out(Some(subroutine))?;
                }
                Transfer::Ret => {
                    if context.is_none() {
                        return Err(VerifierErrorKind::IllegalReturnFromSubroutine);
                    } else if ret.is_some() {
                        return Err(VerifierErrorKind::MultipleReturns);
                    }
                    ret = Some(index);
                }
                Transfer::None if instruction.stores_return_address => {
                    self.emitted[index].emit = Emit::Skip;
                }
                _ => (),
            }
        }

        if let Some(context) = context {
            let next = self.emitted.len();
            self.contexts[context].next = next;
            if let Some(ret) = ret {
                self.emitted[ret].emit = if ret + 1 == next {
                    Emit::Skip
                } else {
                    Emit::RetGoto
                };
            }
        }
        Ok(())
    }

    /// Does an instruction running in these subroutines belong to the context?
    fn runs_in(&self, subroutines: &[usize], context: Option<usize>) -> bool {
        let mut context = context;
        for entry in subroutines.iter().rev() {
            match context {
                Some(id) if self.contexts[id].target == *entry => context = self.contexts[id].parent,
                _ => return false,
            }
        }
        context.is_none()
    }

    /// Can code in context `from` jump to code in context `to`? (only to the same copy or to
    /// one of the copies it is nested in)
    fn reaches(&self, from: Option<usize>, to: Option<usize>) -> bool {
        let to = match to {
            None => return true,
            Some(to) => to,
        };
        let mut from = from;
        while let Some(id) = from {
            if id == to {
                return true;
            } else if self.contexts[id].depth <= self.contexts[to].depth {
                return false;
            }
            from = self.contexts[id].parent;
        }
        false
    }

    fn assign_offsets(&mut self) -> Result<(), VerifierErrorKind> {
        let mut pc = 0;
        for emitted in &mut self.emitted {
            emitted.offset = pc;
            let instruction = &self.analysis.instructions[emitted.inumber];
            pc += match emitted.emit {
                Emit::Skip => 0,
                Emit::RetGoto => 3,
                _ if matches!(instruction.transfer, Transfer::Switch(_)) => {
                    let table_length = instruction.length
                        - (opcodes::switch_operands_start(instruction.offset) - instruction.offset);
                    opcodes::switch_operands_start(pc) - pc + table_length
                }
                _ => instruction.length,
            };
        }
        if pc >= 65535 {
            return Err(VerifierErrorKind::CodeTooLong);
        }
        self.code_length = pc;
        Ok(())
    }

    /// New offset of the copy of an instruction that is visible from a context
    fn target_offset(&self, inumber: usize, from: Option<usize>) -> Result<usize, VerifierErrorKind> {
        self.copies
            .get(inumber)
            .and_then(|copies| {
                copies
                    .iter()
                    .map(|index| &self.emitted[*index])
                    .find(|copy| self.reaches(from, copy.context))
            })
            .map(|copy| copy.offset)
            .ok_or(VerifierErrorKind::IllegalBranchTarget)
    }

    fn emit_code(&self, old_code: &[u8]) -> Result<Vec<u8>, VerifierErrorKind> {
        let mut code = Vec::with_capacity(self.code_length);

        for (index, emitted) in self.emitted.iter().enumerate() {
            if emitted.emit == Emit::Skip {
                continue;
            }
            let instruction = &self.analysis.instructions[emitted.inumber];
            let pc = emitted.offset;
            let old = old_code
                .get(instruction.offset..instruction.offset + instruction.length)
                .ok_or(VerifierErrorKind::TruncatedInstruction(instruction.offset))?;
            let wide_offset = instruction.length == 5;

            match (&instruction.transfer, emitted.emit) {
                (Transfer::Branch(target), _) => {
                    code.push(old[0]);
                    let target = self.target_offset(*target, emitted.context)?;
                    push_jump(&mut code, pc, target, wide_offset)?;
                }
                (Transfer::Jsr { target, .. }, Emit::JsrGoto | Emit::JsrGotoCopy) => {
                    // The copy made for this `jsr` is right after it
                    let from = if emitted.emit == Emit::JsrGotoCopy {
                        self.emitted
                            .get(index + 1)
                            .ok_or(VerifierErrorKind::IllegalBranchTarget)?
                            .context
                    } else {
                        emitted.context
                    };
                    let opcode = if wide_offset { opcodes::GOTO_W } else { opcodes::GOTO };
                    code.push(opcode as u8);
                    let target = self.target_offset(*target, from)?;
                    push_jump(&mut code, pc, target, wide_offset)?;
                }
                (Transfer::Ret, Emit::RetGoto) => {
                    let next = emitted
                        .context
                        .map(|context| self.contexts[context].next)
                        .and_then(|next| self.emitted.get(next))
                        .map_or(self.code_length, |next| next.offset);
                    code.push(opcodes::GOTO as u8);
                    push_jump(&mut code, pc, next, false)?;
                }
                (Transfer::Switch(targets), _) => {
                    self.emit_switch(&mut code, old_code, emitted, targets)?;
                }
                _ => code.extend_from_slice(old),
            }
        }

        Ok(code)
    }

    fn emit_switch(
        &self,
        code: &mut Vec<u8>,
        old_code: &[u8],
        emitted: &Emitted,
        targets: &[usize],
    ) -> Result<(), VerifierErrorKind> {
        let instruction = &self.analysis.instructions[emitted.inumber];
        let pc = emitted.offset;
        let old_start = opcodes::switch_operands_start(instruction.offset);
        let word = |at: usize| {
            opcodes::read_i32(old_code, at)
                .ok_or(VerifierErrorKind::TruncatedInstruction(instruction.offset))
        };
        let jump = |target: usize| -> Result<i32, VerifierErrorKind> {
            Ok((self.target_offset(target, emitted.context)? as i64 - pc as i64) as i32)
        };

        code.push(instruction.opcode as u8);
        while code.len() % 4 != 0 {
            code.push(0);
        }

        let (default, cases) = targets
            .split_first()
            .ok_or(VerifierErrorKind::IllegalSwitchDefault)?;
        code.extend_from_slice(&jump(*default)?.to_be_bytes());
        if instruction.opcode == opcodes::TABLESWITCH {
            code.extend_from_slice(&word(old_start + 4)?.to_be_bytes());
            code.extend_from_slice(&word(old_start + 8)?.to_be_bytes());
            for target in cases {
                code.extend_from_slice(&jump(*target)?.to_be_bytes());
            }
        } else {
            code.extend_from_slice(&word(old_start + 4)?.to_be_bytes());
            for (pair, target) in cases.iter().enumerate() {
                code.extend_from_slice(&word(old_start + 8 + 8 * pair)?.to_be_bytes());
                code.extend_from_slice(&jump(*target)?.to_be_bytes());
            }
        }
        Ok(())
    }

    /// Split each handler range into one range per copy of the handler
    fn exception_table(
        &self,
        handlers: &[ExceptionHandler],
    ) -> Result<Vec<ExceptionHandler>, VerifierErrorKind> {
        let mut table = vec![];
        for handler in handlers {
            let inumber = |pc: u16| {
                self.analysis
                    .instruction_at(pc as usize)
                    .ok_or(VerifierErrorKind::IllegalExceptionRange)
            };
            let start = inumber(handler.start_pc)?;
            let end = inumber(handler.end_pc)?;
            let handler_inumber = inumber(handler.handler_pc)?;

            for copy in self.copies.get(handler_inumber).into_iter().flatten() {
                let handler_copy = &self.emitted[*copy];
                let mut range_start: Option<usize> = None;
                let mut close = |start_pc: usize, end_pc: usize| {
                    table.push(ExceptionHandler {
                        start_pc: start_pc as u16,
                        end_pc: end_pc as u16,
                        handler_pc: handler_copy.offset as u16,
                        catch_type: handler.catch_type,
                    })
                };

                for emitted in self.emitted.iter().filter(|e| e.emit != Emit::Skip) {
                    let covered = (start..end).contains(&emitted.inumber)
                        && self.reaches(emitted.context, handler_copy.context);
                    match range_start {
                        None if covered => range_start = Some(emitted.offset),
                        Some(start_pc) if !covered => {
                            close(start_pc, emitted.offset);
                            range_start = None;
                        }
                        _ => (),
                    }
                }
                if let Some(start_pc) = range_start {
                    close(start_pc, self.code_length);
                }
            }
        }
        Ok(table)
    }

    /// New line number entries, one wherever the line changes
    fn line_numbers(&self, old: &[LineNumber]) -> Vec<LineNumber> {
        let mut sorted = old.to_vec();
        sorted.sort_by_key(|entry| entry.start_pc);
        let line_at = |offset: usize| {
            sorted
                .iter()
                .take_while(|entry| entry.start_pc as usize <= offset)
                .last()
                .map(|entry| entry.line_number)
        };

        let mut lines = vec![];
        let mut current = None;
        for emitted in self.emitted.iter().filter(|e| e.emit != Emit::Skip) {
            let offset = self.analysis.instructions[emitted.inumber].offset;
            let line = line_at(offset);
            if line.is_some() && line != current {
                lines.extend(line.map(|line_number| LineNumber {
                    start_pc: emitted.offset as u16,
                    line_number,
                }));
                current = line;
            }
        }
        lines
    }

    /// New local variable entries, split wherever the variable's range got broken up
    fn local_variables(&self, old: &[LocalVariable]) -> Vec<LocalVariable> {
        let mut variables = vec![];
        for variable in old {
            let range = variable.start_pc as usize..variable.start_pc as usize + variable.length as usize;
            let mut range_start: Option<usize> = None;
            let mut close = |start_pc: usize, end_pc: usize| {
                variables.push(LocalVariable {
                    start_pc: start_pc as u16,
                    length: (end_pc - start_pc) as u16,
                    ..*variable
                })
            };

            for emitted in self.emitted.iter().filter(|e| e.emit != Emit::Skip) {
                let offset = self.analysis.instructions[emitted.inumber].offset;
                let covered = range.contains(&offset);
                match range_start {
                    None if covered => range_start = Some(emitted.offset),
                    Some(start_pc) if !covered => {
                        close(start_pc, emitted.offset);
                        range_start = None;
                    }
                    _ => (),
                }
            }
            if let Some(start_pc) = range_start {
                close(start_pc, self.code_length);
            }
        }
        variables
    }
}

/// Append a branch offset, relative to the instruction at `pc`
fn push_jump(code: &mut Vec<u8>, pc: usize, target: usize, wide: bool) -> Result<(), VerifierErrorKind> {
    let jump = target as i64 - pc as i64;
    if wide {
        code.extend_from_slice(&(jump as i32).to_be_bytes());
    } else {
        let jump = i16::try_from(jump).map_err(|_| VerifierErrorKind::BranchOffsetOverflow)?;
        code.extend_from_slice(&jump.to_be_bytes());
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::rewrite::AnalyzedInstruction;

    fn instruction(
        opcode: u16,
        offset: usize,
        length: usize,
        subroutines: &[usize],
        transfer: Transfer,
    ) -> AnalyzedInstruction {
        AnalyzedInstruction {
            opcode,
            offset,
            length,
            reached: true,
            subroutines: subroutines.to_vec(),
            transfer,
            stores_return_address: false,
        }
    }

    fn dead(opcode: u16, offset: usize) -> AnalyzedInstruction {
        AnalyzedInstruction {
            reached: false,
            ..instruction(opcode, offset, 1, &[], Transfer::None)
        }
    }

    fn code(code_array: Vec<u8>) -> Code {
        Code {
            max_stack: 2,
            max_locals: 3,
            code_array,
            exception_table: vec![],
            attributes: vec![],
        }
    }

    /// ```text
    ///  0: jsr 8
    ///  3: return
    ///  4: nop (x4, unreachable)
    ///  8: astore_1
    ///  9: goto 14
    /// 12: ret 1
    /// 14: iinc 2 1
    /// 17: goto 12
    /// ```
    fn subroutine_with_ret_in_the_middle() -> (MethodAnalysis, Code) {
        let mut astore = instruction(opcodes::ASTORE, 8, 1, &[6], Transfer::None);
        astore.stores_return_address = true;
        let analysis = MethodAnalysis {
            instructions: vec![
                instruction(
                    opcodes::JSR,
                    0,
                    3,
                    &[],
                    Transfer::Jsr {
                        target: 6,
                        returns: true,
                    },
                ),
                instruction(opcodes::RETURN, 3, 1, &[], Transfer::None),
                dead(opcodes::NOP, 4),
                dead(opcodes::NOP, 5),
                dead(opcodes::NOP, 6),
                dead(opcodes::NOP, 7),
                astore,
                instruction(opcodes::GOTO, 9, 3, &[6], Transfer::Branch(9)),
                instruction(opcodes::RET, 12, 2, &[6], Transfer::Ret),
                instruction(opcodes::IINC, 14, 3, &[6], Transfer::None),
                instruction(opcodes::GOTO, 17, 3, &[6], Transfer::Branch(8)),
            ],
            code_length: 20,
        };
        let code = code(vec![
            0xa8, 0x00, 0x08, 0xb1, 0x00, 0x00, 0x00, 0x00, 0x4c, 0xa7, 0x00, 0x05, 0xa9, 0x01,
            0x84, 0x02, 0x01, 0xa7, 0xff, 0xfb,
        ]);
        (analysis, code)
    }

    #[test]
    fn inline_subroutine() {
        let (analysis, code) = subroutine_with_ret_in_the_middle();
        let constants = ConstantPool::new();
        let rewritten = SubroutineInliner
            .rewrite(&analysis, &code, &constants)
            .unwrap();
        assert_eq!(
            rewritten.code_array,
            vec![
                0xa7, 0x00, 0x06, // goto iinc
                0xa7, 0x00, 0x09, // ret -> goto return
                0x84, 0x02, 0x01, // iinc
                0xa7, 0xff, 0xfa, // goto ret
                0xb1, // return
            ]
        );
    }

    #[test]
    fn remap_line_numbers() {
        let (analysis, mut code) = subroutine_with_ret_in_the_middle();
        let mut constants = ConstantPool::new();
        let table = LineNumberTable(vec![
            LineNumber {
                start_pc: 0,
                line_number: 10,
            },
            LineNumber {
                start_pc: 14,
                line_number: 21,
            },
            LineNumber {
                start_pc: 8,
                line_number: 20,
            },
        ]);
        code.attributes
            .push(Attribute::encode(&table, &mut constants).unwrap());

        let rewritten = SubroutineInliner
            .rewrite(&analysis, &code, &constants)
            .unwrap();
        let remapped: LineNumberTable = Attribute::find(&rewritten.attributes, &constants)
            .unwrap()
            .unwrap();
        let entries: Vec<(u16, u16)> = remapped
            .0
            .iter()
            .map(|entry| (entry.start_pc, entry.line_number))
            .collect();
        assert_eq!(entries, vec![(0, 20), (6, 21), (12, 10)]);
    }

    #[test]
    fn drop_dead_code_and_handlers() {
        // 0: aconst_null, 1: athrow, 2: nop (unreachable), 3: pop, 4: return
        let analysis = MethodAnalysis {
            instructions: vec![
                instruction(opcodes::ACONST_NULL, 0, 1, &[], Transfer::None),
                instruction(opcodes::ATHROW, 1, 1, &[], Transfer::None),
                dead(opcodes::NOP, 2),
                instruction(opcodes::POP, 3, 1, &[], Transfer::None),
                instruction(opcodes::RETURN, 4, 1, &[], Transfer::None),
            ],
            code_length: 5,
        };
        let mut code = code(vec![0x01, 0xbf, 0x00, 0x57, 0xb1]);
        code.exception_table.push(ExceptionHandler {
            start_pc: 0,
            end_pc: 3,
            handler_pc: 3,
            catch_type: crate::jvm::class_file::ConstantIndex(0),
        });

        let rewritten = SubroutineInliner
            .rewrite(&analysis, &code, &ConstantPool::new())
            .unwrap();
        assert_eq!(rewritten.code_array, vec![0x01, 0xbf, 0x57, 0xb1]);
        assert_eq!(rewritten.exception_table.len(), 1);
        let handler = rewritten.exception_table[0];
        assert_eq!((handler.start_pc, handler.end_pc, handler.handler_pc), (0, 2, 2));
    }

    #[test]
    fn realign_switch() {
        // 0: goto 4, 3: nop (unreachable), 4: iload_0, 5: tableswitch 0..0 -> 24, 24: return
        let analysis = MethodAnalysis {
            instructions: vec![
                instruction(opcodes::GOTO, 0, 3, &[], Transfer::Branch(2)),
                dead(opcodes::NOP, 3),
                instruction(opcodes::ILOAD, 4, 1, &[], Transfer::None),
                instruction(opcodes::TABLESWITCH, 5, 19, &[], Transfer::Switch(vec![4, 4])),
                instruction(opcodes::RETURN, 24, 1, &[], Transfer::None),
            ],
            code_length: 25,
        };
        let code = code(vec![
            0xa7, 0x00, 0x04, 0x00, 0x1a, 0xaa, 0x00, 0x00, // goto, nop, iload_0, tableswitch
            0x00, 0x00, 0x00, 0x13, // default
            0x00, 0x00, 0x00, 0x00, // low
            0x00, 0x00, 0x00, 0x00, // high
            0x00, 0x00, 0x00, 0x13, // case 0
            0xb1,
        ]);

        let rewritten = SubroutineInliner
            .rewrite(&analysis, &code, &ConstantPool::new())
            .unwrap();
        assert_eq!(
            rewritten.code_array,
            vec![
                0xa7, 0x00, 0x03, 0x1a, 0xaa, 0x00, 0x00, 0x00, // goto, iload_0, tableswitch
                0x00, 0x00, 0x00, 0x14, // default
                0x00, 0x00, 0x00, 0x00, // low
                0x00, 0x00, 0x00, 0x00, // high
                0x00, 0x00, 0x00, 0x14, // case 0
                0xb1,
            ]
        );
    }

    #[test]
    fn ret_outside_subroutine() {
        let analysis = MethodAnalysis {
            instructions: vec![instruction(opcodes::RET, 0, 2, &[], Transfer::Ret)],
            code_length: 2,
        };
        assert_eq!(
            SubroutineInliner.rewrite(&analysis, &code(vec![0xa9, 0x01]), &ConstantPool::new()),
            Err(VerifierErrorKind::IllegalReturnFromSubroutine)
        );
    }
}
