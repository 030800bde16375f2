//! Module and function scaffolding: the module preamble/postamble, function
//! preambles and postambles, global-variable declarations, and the pending
//! stack-allocation buffer.

use std::fmt::Write as _;

use super::state::typed;
use super::{CodeGen, LLVMValue, Platform, StackEntry};
use crate::ast::ASTNode;
use crate::errors::CompileError;
use crate::scan::TokenKind;
use crate::symbol_table::SymbolTableStack;
use crate::types::{Number, Type};

impl CodeGen {
    /// Emit the module header: module id, target datalayout and triple, the
    /// globals placeholder, and the printf format-string globals.
    pub fn module_preamble(
        &mut self,
        module_id: &str,
        platform: &Platform,
    ) -> Result<(), CompileError> {
        writeln!(self.output, "; ModuleID = '{}'", module_id)?;
        writeln!(
            self.output,
            "target datalayout = \"{}\"",
            platform.datalayout
        )?;
        writeln!(self.output, "target triple = \"{}\"", platform.triple)?;
        writeln!(self.output)?;

        writeln!(self.output, "{}", super::state::GLOBALS_PLACEHOLDER)?;
        writeln!(self.output)?;

        writeln!(
            self.output,
            "@print_int_fstring = private unnamed_addr constant [4 x i8] c\"%d\\0A\\00\", align 1"
        )?;
        writeln!(self.output)?;
        writeln!(
            self.output,
            "@print_long_fstring = private unnamed_addr constant [5 x i8] c\"%ld\\0A\\00\", align 1"
        )?;
        writeln!(self.output)?;
        writeln!(
            self.output,
            "@print_char_fstring = private unnamed_addr constant [4 x i8] c\"%c\\0A\\00\", align 1"
        )?;
        writeln!(self.output)?;
        writeln!(
            self.output,
            "@print_true_fstring = private unnamed_addr constant [6 x i8] c\"true\\0A\\00\", align 1"
        )?;
        writeln!(self.output)?;
        writeln!(
            self.output,
            "@print_false_fstring = private unnamed_addr constant [7 x i8] c\"false\\0A\\00\", align 1"
        )?;
        writeln!(self.output)?;
        writeln!(
            self.output,
            "; Function Attrs: noinline nounwind optnone uwtable"
        )?;
        Ok(())
    }

    /// Emit the module trailer: the printf declaration, attribute groups, and
    /// module metadata flags.
    pub fn module_postamble(&mut self) -> Result<(), CompileError> {
        writeln!(self.output, "declare i32 @printf(i8*, ...) #1")?;
        writeln!(self.output)?;
        writeln!(
            self.output,
            "attributes #0 = {{ noinline nounwind optnone uwtable \"frame-pointer\"=\"all\" \
             \"min-legal-vector-width\"=\"0\" \"no-trapping-math\"=\"true\" \
             \"stack-protector-buffer-size\"=\"8\" \"target-cpu\"=\"x86-64\" \
             \"target-features\"=\"+cx8,+fxsr,+mmx,+sse,+sse2,+x87\" \"tune-cpu\"=\"generic\" }}"
        )?;
        writeln!(self.output)?;
        writeln!(
            self.output,
            "attributes #1 = {{ \"frame-pointer\"=\"all\" \"no-trapping-math\"=\"true\" \
             \"stack-protector-buffer-size\"=\"8\" \"target-cpu\"=\"x86-64\" \
             \"target-features\"=\"+cx8,+fxsr,+mmx,+sse,+sse2,+x87\" \"tune-cpu\"=\"generic\" }}"
        )?;
        writeln!(self.output)?;
        writeln!(self.output, "!llvm.module.flags = !{{!0, !1, !2, !3, !4}}")?;
        writeln!(self.output, "!llvm.ident = !{{!5}}")?;
        writeln!(self.output)?;
        writeln!(self.output, "!0 = !{{i32 1, !\"wchar_size\", i32 4}}")?;
        writeln!(self.output, "!1 = !{{i32 7, !\"PIC Level\", i32 2}}")?;
        writeln!(self.output, "!2 = !{{i32 7, !\"PIE Level\", i32 2}}")?;
        writeln!(self.output, "!3 = !{{i32 7, !\"uwtable\", i32 1}}")?;
        writeln!(self.output, "!4 = !{{i32 7, !\"frame-pointer\", i32 2}}")?;
        writeln!(
            self.output,
            "!5 = !{{!\"Ubuntu clang version 14.0.0-1ubuntu1\"}}"
        )?;
        Ok(())
    }

    /// Allocate stack space for a run of planned slots.
    ///
    /// Before the enclosing function's preamble has been written the entries
    /// are buffered; the preamble flushes them as a run of `alloca`s at the
    /// top of the function body. Returns whether the entries were emitted
    /// immediately.
    pub fn stack_allocation(&mut self, entries: Vec<StackEntry>) -> Result<bool, CompileError> {
        if !self.preamble_printed {
            self.buffer_allocations(entries);
            return Ok(false);
        }

        for entry in &entries {
            self.emit_alloca(entry)?;
        }
        Ok(true)
    }

    fn emit_alloca(&mut self, entry: &StackEntry) -> Result<(), CompileError> {
        writeln!(
            self.output,
            "\t%{} = alloca {}, align {}",
            entry.reg,
            typed(entry.number_type, entry.pointer_depth),
            entry.align_bytes
        )?;
        Ok(())
    }

    /// Plan the scratch slots an expression subtree needs: one per address-of
    /// node, sized to hold the named symbol's address. The planned registers
    /// go onto the free list in emission order for `get_address` to pop.
    pub fn determine_expression_stack_allocation(
        &mut self,
        root: &ASTNode,
        symbols: &SymbolTableStack,
    ) -> Result<Vec<StackEntry>, CompileError> {
        let mut entries = Vec::new();
        self.plan_slots(root, symbols, &mut entries)?;
        for entry in &entries {
            self.prepend_free_register(entry.clone());
        }
        Ok(entries)
    }

    fn plan_slots(
        &mut self,
        node: &ASTNode,
        symbols: &SymbolTableStack,
        entries: &mut Vec<StackEntry>,
    ) -> Result<(), CompileError> {
        if node.kind == TokenKind::Ampersand {
            let name = node.identifier_name().ok_or_else(|| {
                CompileError::Compiler("Address-of node has no identifier".to_string())
            })?;
            let number = symbols
                .find(name)
                .and_then(|entry| entry.ty.as_number())
                .ok_or_else(|| {
                    CompileError::Compiler(format!(
                        "Failed to find symbol \"{}\" while planning scratch slots",
                        name
                    ))
                })?;
            entries.push(StackEntry {
                reg: self.next_register(),
                number_type: number.number_type,
                pointer_depth: number.pointer_depth + 1,
                align_bytes: 4,
            });
            return Ok(());
        }
        for child in [&node.left, &node.mid, &node.right].into_iter().flatten() {
            self.plan_slots(child, symbols, entries)?;
        }
        Ok(())
    }

    /// Emit a function's preamble: signature, buffered allocas, and one named
    /// stack slot per parameter with the incoming SSA value stored into it.
    pub fn function_preamble(
        &mut self,
        name: &str,
        symbols: &mut SymbolTableStack,
    ) -> Result<(), CompileError> {
        let entry = symbols.find(name).ok_or_else(|| {
            CompileError::Compiler(format!(
                "function_preamble received symbol name \"{}\", which is not an identifier",
                name
            ))
        })?;
        let function = entry
            .ty
            .as_function()
            .ok_or_else(|| {
                CompileError::Compiler(format!(
                    "function_preamble received an identifier name that is not a function: \"{}\"",
                    name
                ))
            })?
            .clone();

        self.current_function = Some(name.to_string());
        self.declared_globals.insert(name.to_string());
        self.block_terminated = false;

        // Incoming parameters take %0..%n-1; the entry block consumes the
        // next index, so instruction numbering starts after it.
        self.set_register_counter(0);
        let mut parameters = Vec::new();
        for parameter in &function.parameters {
            let reg = self.next_register();
            parameters.push(format!(
                "{} %{}",
                typed(
                    parameter.number.number_type,
                    parameter.number.pointer_depth
                ),
                reg
            ));
        }
        let _entry_block = self.next_register();

        writeln!(
            self.output,
            "define dso_local {} @{}({}) #0 {{",
            return_type_repr(&function.return_type),
            name,
            parameters.join(", ")
        )?;
        self.preamble_printed = true;

        let pending = self.take_pending_allocations();
        for entry in &pending {
            self.emit_alloca(entry)?;
        }

        for (incoming, parameter) in function.parameters.iter().enumerate() {
            let number = parameter.number;
            writeln!(
                self.output,
                "\t%{} = alloca {}, align {}",
                parameter.name,
                typed(number.number_type, number.pointer_depth),
                number.number_type.byte_size()
            )?;
            writeln!(
                self.output,
                "\tstore {} %{}, {} %{}",
                typed(number.number_type, number.pointer_depth),
                incoming,
                typed(number.number_type, number.pointer_depth + 1),
                parameter.name
            )?;
            if let Some(symbol) = symbols.find_mut(&parameter.name) {
                symbol.latest_value = Some(LLVMValue::named_register(
                    &parameter.name,
                    number.number_type,
                    number.pointer_depth + 1,
                ));
            }
        }

        if name == "main" && matches!(*function.return_type, Type::Void) {
            tracing::warn!("change \"main\" function return type to int");
        }

        Ok(())
    }

    /// Emit a function's postamble and reset per-function state.
    ///
    /// The final block gets an implicit return when it is still open. That
    /// covers bodies that never return at all, and the empty merge block an
    /// `if`/`else` leaves behind when its branches return themselves; every
    /// block must end in a terminator.
    pub fn function_postamble(
        &mut self,
        symbols: &mut SymbolTableStack,
    ) -> Result<(), CompileError> {
        let name = self.current_function.clone().ok_or_else(|| {
            CompileError::Compiler(
                "Tried to emit a function postamble outside of a function".to_string(),
            )
        })?;

        if !self.block_terminated {
            let return_type = symbols
                .find(&name)
                .and_then(|e| e.ty.as_function())
                .map(|f| (*f.return_type).clone())
                .ok_or_else(|| {
                    CompileError::Compiler(format!(
                        "Failed to find function \"{}\" for its postamble",
                        name
                    ))
                })?;
            match return_type {
                Type::Void => writeln!(self.output, "\tret void")?,
                Type::Number(number) => writeln!(
                    self.output,
                    "\tret {} 0",
                    typed(number.number_type, number.pointer_depth)
                )?,
                Type::Function(_) => {
                    return Err(CompileError::Compiler(
                        "Functions cannot return functions".to_string(),
                    ));
                }
            }
        }

        writeln!(self.output, "}}")?;
        writeln!(self.output)?;
        self.reset_function_state();
        Ok(())
    }

    /// Declare a global variable in the globals sink, zero-initialized, or
    /// null for pointer types.
    pub fn declare_global_variable(
        &mut self,
        symbol_name: &str,
        number: Number,
    ) -> Result<(), CompileError> {
        if !self.declared_globals.insert(symbol_name.to_string()) {
            return Err(CompileError::Compiler(format!(
                "Duplicate global declaration \"{}\" reached emission",
                symbol_name
            )));
        }
        write!(
            self.globals,
            "@{} = global {} ",
            symbol_name,
            typed(number.number_type, number.pointer_depth)
        )?;
        if number.pointer_depth == 0 {
            writeln!(self.globals, "{}", number.value)?;
        } else {
            writeln!(self.globals, "null")?;
        }
        Ok(())
    }
}

fn return_type_repr(return_type: &Type) -> String {
    match return_type {
        Type::Void => "void".to_string(),
        Type::Number(n) => typed(n.number_type, n.pointer_depth),
        Type::Function(_) => "void".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ASTNode, NodeValue};
    use crate::errors::Position;
    use crate::scan::TokenKind;
    use crate::types::{FunctionParameter, FunctionType, NumberType};

    fn platform() -> Platform {
        Platform {
            datalayout: "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-f80:128-n8:16:32:64-S128"
                .to_string(),
            triple: "x86_64-unknown-linux-gnu".to_string(),
        }
    }

    #[test]
    fn test_module_preamble_shape() {
        let mut generator = CodeGen::new();
        generator.module_preamble("program.prp", &platform()).unwrap();
        let ir = generator.output();
        assert!(ir.starts_with("; ModuleID = 'program.prp'"));
        assert!(ir.contains("target datalayout = \"e-m:e-"));
        assert!(ir.contains("target triple = \"x86_64-unknown-linux-gnu\""));
        assert!(ir.contains(";<purple_globals_placeholder>"));
        assert!(ir.contains("@print_int_fstring"));
        assert!(ir.contains("@print_false_fstring"));
    }

    #[test]
    fn test_module_postamble_metadata() {
        let mut generator = CodeGen::new();
        generator.module_postamble().unwrap();
        let ir = generator.output();
        assert!(ir.contains("declare i32 @printf(i8*, ...) #1"));
        assert!(ir.contains("attributes #0"));
        assert!(ir.contains("!0 = !{i32 1, !\"wchar_size\", i32 4}"));
        assert!(ir.contains("!4 = !{i32 7, !\"frame-pointer\", i32 2}"));
    }

    #[test]
    fn test_stack_allocation_buffers_until_preamble() {
        let mut generator = CodeGen::new();
        let entry = StackEntry {
            reg: 1,
            number_type: NumberType::Int32,
            pointer_depth: 0,
            align_bytes: 4,
        };
        let emitted = generator.stack_allocation(vec![entry.clone()]).unwrap();
        assert!(!emitted);
        assert_eq!(generator.pending_allocation_count(), 1);
        assert!(generator.output().is_empty());

        generator.preamble_printed = true;
        let emitted = generator.stack_allocation(vec![entry]).unwrap();
        assert!(emitted);
        assert!(generator.output().contains("%1 = alloca i32, align 4"));
    }

    #[test]
    fn test_slot_planning_covers_address_of() {
        let mut generator = CodeGen::new();
        let mut symbols = SymbolTableStack::new_nonempty();
        symbols
            .global_mut()
            .add("x", Type::Number(Number::int32(0)))
            .unwrap();
        symbols
            .global_mut()
            .add("p", Type::Number(Number::new(NumberType::Int32, 1, 0)))
            .unwrap();

        // &x then &p, in evaluation order
        let first = ASTNode::leaf(
            TokenKind::Ampersand,
            NodeValue::Identifier("x".to_string()),
            Position::default(),
        );
        let second = ASTNode::leaf(
            TokenKind::Ampersand,
            NodeValue::Identifier("p".to_string()),
            Position::default(),
        );
        let chain = ASTNode::glue(Some(first), Some(second), Position::default());

        let entries = generator
            .determine_expression_stack_allocation(&chain, &symbols)
            .unwrap();
        assert_eq!(entries.len(), 2);
        // &x holds an i32* (depth 1), &p an i32** (depth 2)
        assert_eq!(entries[0].pointer_depth, 1);
        assert_eq!(entries[1].pointer_depth, 2);
        // Slots pop in emission order
        assert_eq!(generator.pop_free_register().unwrap().reg, entries[0].reg);
        assert_eq!(generator.pop_free_register().unwrap().reg, entries[1].reg);
    }

    #[test]
    fn test_slot_planning_rejects_unknown_symbols() {
        let mut generator = CodeGen::new();
        let symbols = SymbolTableStack::new_nonempty();
        let node = ASTNode::leaf(
            TokenKind::Ampersand,
            NodeValue::Identifier("ghost".to_string()),
            Position::default(),
        );
        let err = generator
            .determine_expression_stack_allocation(&node, &symbols)
            .unwrap_err();
        assert_eq!(err.return_code(), 6);
    }

    #[test]
    fn test_function_preamble_and_postamble() {
        let mut generator = CodeGen::new();
        let mut symbols = SymbolTableStack::new_nonempty();
        symbols
            .global_mut()
            .add(
                "sum",
                Type::Function(FunctionType {
                    return_type: Box::new(Type::Number(Number::int32(0))),
                    parameters: vec![
                        FunctionParameter {
                            number: Number::int32(0),
                            name: "a".to_string(),
                        },
                        FunctionParameter {
                            number: Number::int32(0),
                            name: "b".to_string(),
                        },
                    ],
                }),
            )
            .unwrap();
        symbols.push();
        symbols
            .peek_mut()
            .add("a", Type::Number(Number::int32(0)))
            .unwrap();
        symbols
            .peek_mut()
            .add("b", Type::Number(Number::int32(0)))
            .unwrap();

        generator.function_preamble("sum", &mut symbols).unwrap();
        let ir = generator.output().to_string();
        assert!(ir.contains("define dso_local i32 @sum(i32 %0, i32 %1) #0 {"));
        assert!(ir.contains("%a = alloca i32, align 4"));
        assert!(ir.contains("store i32 %0, i32* %a"));
        assert!(ir.contains("store i32 %1, i32* %b"));
        assert!(symbols.find("a").unwrap().latest_value.is_some());

        // Instruction numbering resumes after params and the entry block
        assert_eq!(generator.next_register(), 3);

        generator.function_postamble(&mut symbols).unwrap();
        let ir = generator.output();
        // Implicit zero return for a non-void function that never returned
        assert!(ir.contains("\tret i32 0"));
        assert!(ir.trim_end().ends_with('}'));
    }

    #[test]
    fn test_empty_void_function_gets_ret_void() {
        let mut generator = CodeGen::new();
        let mut symbols = SymbolTableStack::new_nonempty();
        symbols
            .global_mut()
            .add(
                "noop",
                Type::Function(FunctionType {
                    return_type: Box::new(Type::Void),
                    parameters: Vec::new(),
                }),
            )
            .unwrap();

        generator.function_preamble("noop", &mut symbols).unwrap();
        generator.function_postamble(&mut symbols).unwrap();
        let ir = generator.output();
        assert!(ir.contains("define dso_local void @noop() #0 {"));
        assert!(ir.contains("\tret void"));
    }

    #[test]
    fn test_global_declarations() {
        let mut generator = CodeGen::new();
        generator
            .declare_global_variable("x", Number::int32(0))
            .unwrap();
        generator
            .declare_global_variable("p", Number::new(NumberType::Int32, 1, 0))
            .unwrap();
        assert!(generator.globals().contains("@x = global i32 0"));
        assert!(generator.globals().contains("@p = global i32* null"));
        // Globals never land in the main sink
        assert!(!generator.output().contains("@x"));
    }
}
