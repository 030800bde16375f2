//! AST-to-IR translation: the post-order walker plus the statement-level
//! emissions (`print`, assignment, `return`, function calls).

use std::fmt::Write as _;

use super::state::typed;
use super::{CodeGen, LLVMValue};
use crate::ast::ASTNode;
use crate::errors::CompileError;
use crate::scan::TokenKind;
use crate::symbol_table::SymbolTableStack;
use crate::types::{Number, NumberType, Type};

impl CodeGen {
    /// Emit a function declaration node: preamble, body, postamble.
    pub fn emit_function(
        &mut self,
        node: &ASTNode,
        symbols: &mut SymbolTableStack,
    ) -> Result<(), CompileError> {
        if node.kind != TokenKind::FunctionDeclaration {
            return Err(CompileError::Compiler(format!(
                "emit_function received a non-function node \"{}\"",
                node.kind
            )));
        }
        let name = node
            .identifier_name()
            .ok_or_else(|| {
                CompileError::Compiler("Function declaration node has no name".to_string())
            })?
            .to_string();

        self.function_preamble(&name, symbols)?;
        if let Some(body) = node.left.as_deref() {
            // Scratch slots for the body's address-of expressions land right
            // after the parameter slots
            let scratch = self.determine_expression_stack_allocation(body, symbols)?;
            self.stack_allocation(scratch)?;
            self.ast_to_llvm(body, symbols)?;
        }
        self.function_postamble(symbols)
    }

    /// Generate IR from an AST subtree, post-order. Returns the value the
    /// subtree produced, if any.
    pub fn ast_to_llvm(
        &mut self,
        node: &ASTNode,
        symbols: &mut SymbolTableStack,
    ) -> Result<LLVMValue, CompileError> {
        match node.kind {
            TokenKind::Glue => {
                self.emit_subtree(node.left.as_deref(), symbols)?;
                self.emit_subtree(node.mid.as_deref(), symbols)?;
                self.emit_subtree(node.right.as_deref(), symbols)?;
                Ok(LLVMValue::None)
            }
            kind if kind.is_binary_arithmetic() => {
                let left = self.emit_subtree(node.left.as_deref(), symbols)?;
                let right = self.emit_subtree(node.right.as_deref(), symbols)?;
                self.binary_arithmetic(kind, left, right)
            }
            kind if kind.is_comparator() || kind.is_logical_operator() => {
                let left = self.emit_subtree(node.left.as_deref(), symbols)?;
                let right = self.emit_subtree(node.right.as_deref(), symbols)?;
                self.compare(kind, left, right)
            }
            TokenKind::IntegerLiteral
            | TokenKind::LongLiteral
            | TokenKind::True
            | TokenKind::False => {
                let number = node.number().ok_or_else(|| {
                    CompileError::Compiler("Literal node has no number payload".to_string())
                })?;
                Ok(LLVMValue::constant(number.value, number.number_type))
            }
            TokenKind::Identifier => self.load_identifier(node, symbols),
            TokenKind::Ampersand => {
                let name = node.identifier_name().ok_or_else(|| {
                    CompileError::Compiler("Address-of node has no identifier".to_string())
                })?;
                let number = find_number(symbols, name)?;
                self.get_address(name, number)
            }
            TokenKind::Dereference => {
                let value = self.emit_subtree(node.left.as_deref(), symbols)?;
                self.dereference(value)
            }
            TokenKind::Assign => self.assignment(node, symbols),
            TokenKind::Print => self.print_statement(node, symbols),
            TokenKind::Return => self.return_statement(node, symbols),
            TokenKind::FunctionCall => self.call_function(node, symbols),
            TokenKind::If => self.if_ast_to_llvm(node, symbols),
            TokenKind::While => self.while_ast_to_llvm(node, symbols),
            other => Err(CompileError::Compiler(format!(
                "Unknown operator \"{}\"",
                other
            ))),
        }
    }

    /// Load an identifier's current value. Function parameters load from
    /// their named stack slot, everything else from its global.
    fn load_identifier(
        &mut self,
        node: &ASTNode,
        symbols: &mut SymbolTableStack,
    ) -> Result<LLVMValue, CompileError> {
        let name = node.identifier_name().ok_or_else(|| {
            CompileError::Compiler("Identifier node has no name payload".to_string())
        })?;
        let entry = symbols.find(name).ok_or_else(|| {
            CompileError::Compiler(format!(
                "Failed to find symbol \"{}\" in the symbol table stack",
                name
            ))
        })?;
        let number = entry.ty.as_number().ok_or_else(|| {
            CompileError::Compiler(format!("\"{}\" is a function, not a variable", name))
        })?;

        if entry.latest_value.is_some() {
            let name = name.to_string();
            self.load_parameter(&name, number)
        } else {
            let name = name.to_string();
            self.load_global_variable(&name, number)
        }
    }

    /// Emit an assignment. The node stores the rvalue subtree on the left and
    /// the lvalue subtree on the right.
    fn assignment(
        &mut self,
        node: &ASTNode,
        symbols: &mut SymbolTableStack,
    ) -> Result<LLVMValue, CompileError> {
        let rvalue = self.emit_subtree(node.left.as_deref(), symbols)?;
        let lvalue = node.right.as_deref().ok_or_else(|| {
            CompileError::Compiler("Assignment node has no target".to_string())
        })?;

        match lvalue.kind {
            TokenKind::Identifier => {
                let name = lvalue
                    .identifier_name()
                    .ok_or_else(|| {
                        CompileError::Compiler("Assignment target has no name".to_string())
                    })?
                    .to_string();
                let entry = symbols.find(&name).ok_or_else(|| {
                    CompileError::Compiler(format!(
                        "Failed to find symbol \"{}\" in the symbol table stack",
                        name
                    ))
                })?;
                let number = entry.ty.as_number().ok_or_else(|| {
                    CompileError::Compiler(format!("Cannot assign to function \"{}\"", name))
                })?;
                if entry.latest_value.is_some() {
                    self.store_parameter(&name, number, rvalue)
                } else {
                    self.store_global_variable(&name, number, rvalue)
                }
            }
            TokenKind::Dereference => {
                let destination = self.emit_subtree(lvalue.left.as_deref(), symbols)?;
                self.store_dereference(destination, rvalue)
            }
            other => Err(CompileError::Compiler(format!(
                "Invalid assignment target \"{}\"",
                other
            ))),
        }
    }

    /// Emit a print statement. Booleans dispatch through the three-label
    /// true/false sequence, everything else through printf format strings
    /// chosen by width.
    fn print_statement(
        &mut self,
        node: &ASTNode,
        symbols: &mut SymbolTableStack,
    ) -> Result<LLVMValue, CompileError> {
        let value = self.emit_subtree(node.left.as_deref(), symbols)?;
        let value = self.ensure_fully_loaded(value)?;
        let number_type = value.number_type().ok_or_else(|| {
            CompileError::Compiler("print received a valueless expression".to_string())
        })?;

        if number_type == NumberType::Int1 {
            self.print_bool(value)?;
        } else {
            self.print_int(value)?;
        }
        Ok(LLVMValue::None)
    }

    fn print_int(&mut self, value: LLVMValue) -> Result<(), CompileError> {
        let number_type = value.number_type().ok_or_else(|| {
            CompileError::Compiler("print received a valueless expression".to_string())
        })?;
        let (length, fstring) = match number_type {
            NumberType::Int8 => (4, "print_char_fstring"),
            NumberType::Int16 | NumberType::Int32 => (4, "print_int_fstring"),
            NumberType::Int64 => (5, "print_long_fstring"),
            NumberType::Int1 => {
                return Err(CompileError::Compiler(
                    "print_int received a boolean value".to_string(),
                ));
            }
        };

        let out = self.next_register();
        writeln!(
            self.output,
            "\t%{} = call i32 (i8*, ...) @printf(i8* getelementptr inbounds ([{} x i8], [{} x i8]* @{} , i32 0, i32 0), {} {})",
            out,
            length,
            length,
            fstring,
            number_type.llvm_repr(),
            value.operand()?
        )?;
        Ok(())
    }

    fn print_bool(&mut self, value: LLVMValue) -> Result<(), CompileError> {
        let true_label = self.get_next_label();
        let false_label = self.get_next_label();
        let end_label = self.get_next_label();

        self.conditional_jump(&value, &true_label, &false_label)?;

        self.label(&true_label)?;
        let out = self.next_register();
        writeln!(
            self.output,
            "\t%{} = call i32 (i8*, ...) @printf(i8* getelementptr inbounds ([6 x i8], [6 x i8]* @print_true_fstring , i32 0, i32 0))",
            out
        )?;
        self.jump(&end_label)?;

        self.label(&false_label)?;
        let out = self.next_register();
        writeln!(
            self.output,
            "\t%{} = call i32 (i8*, ...) @printf(i8* getelementptr inbounds ([7 x i8], [7 x i8]* @print_false_fstring , i32 0, i32 0))",
            out
        )?;
        self.jump(&end_label)?;

        self.label(&end_label)?;
        Ok(())
    }

    /// Emit a return statement, width-matching the value to the enclosing
    /// function's declared return type.
    fn return_statement(
        &mut self,
        node: &ASTNode,
        symbols: &mut SymbolTableStack,
    ) -> Result<LLVMValue, CompileError> {
        let function_name = node.identifier_name().ok_or_else(|| {
            CompileError::Compiler("Return statement is not tied to a function".to_string())
        })?;
        let entry = symbols.find(function_name).ok_or_else(|| {
            CompileError::Compiler(format!(
                "return received symbol name \"{}\", which is not an identifier",
                function_name
            ))
        })?;
        let function = entry.ty.as_function().ok_or_else(|| {
            CompileError::Compiler(format!(
                "return received an identifier name that is not a function: \"{}\"",
                function_name
            ))
        })?;
        let return_type = (*function.return_type).clone();

        match (&node.left, &return_type) {
            (None, Type::Void) => {
                writeln!(self.output, "\tret void")?;
            }
            (None, _) => {
                return Err(CompileError::Compiler(format!(
                    "Function \"{}\" must return a value",
                    function_name
                )));
            }
            (Some(_), Type::Void) => {
                return Err(CompileError::Compiler(format!(
                    "Tried to return a value from void function \"{}\"",
                    function_name
                )));
            }
            (Some(expression), Type::Number(number)) => {
                let number = *number;
                let value = self.ast_to_llvm(expression, symbols)?;
                let value = self.ensure_loaded(value, number.pointer_depth)?;
                let value = if value.number_type() != Some(number.number_type) {
                    self.int_resize(value, number.number_type)?
                } else {
                    value
                };
                writeln!(
                    self.output,
                    "\tret {} {}",
                    typed(number.number_type, number.pointer_depth),
                    value.operand()?
                )?;
            }
            (Some(_), Type::Function(_)) => {
                return Err(CompileError::Compiler(
                    "Functions cannot return functions".to_string(),
                ));
            }
        }

        self.block_terminated = true;
        Ok(LLVMValue::None)
    }

    /// Emit a function call, coercing each argument to the declared
    /// parameter's width and pointer depth.
    fn call_function(
        &mut self,
        node: &ASTNode,
        symbols: &mut SymbolTableStack,
    ) -> Result<LLVMValue, CompileError> {
        let name = node
            .identifier_name()
            .ok_or_else(|| {
                CompileError::Compiler("Function call node has no name".to_string())
            })?
            .to_string();
        let entry = symbols.find(&name).ok_or_else(|| {
            CompileError::Compiler(format!(
                "call received symbol name \"{}\", which is not an identifier",
                name
            ))
        })?;
        let function = entry
            .ty
            .as_function()
            .ok_or_else(|| {
                CompileError::Compiler(format!(
                    "call received an identifier name that is not a function: \"{}\"",
                    name
                ))
            })?
            .clone();

        let mut argument_nodes = Vec::new();
        collect_arguments(node.left.as_deref(), &mut argument_nodes);

        if argument_nodes.len() != function.parameters.len() {
            return Err(CompileError::Compiler(format!(
                "Incorrect number of arguments to function call allowed to propagate to \
                 compilation phase, got {} but expected {}",
                argument_nodes.len(),
                function.parameters.len()
            )));
        }

        let mut passed = Vec::new();
        for i in 0..argument_nodes.len() {
            let parameter = &function.parameters[i];
            let value = self.ast_to_llvm(argument_nodes[i], symbols)?;
            let value = self.ensure_loaded(value, parameter.number.pointer_depth)?;
            if value.pointer_depth() != parameter.number.pointer_depth {
                return Err(CompileError::Compiler(format!(
                    "Pointer mismatch for argument {} of call to \"{}\"",
                    i, name
                )));
            }
            let value = if value.number_type() != Some(parameter.number.number_type) {
                self.int_resize(value, parameter.number.number_type)?
            } else {
                value
            };
            passed.push(format!(
                "{} {}",
                typed(parameter.number.number_type, parameter.number.pointer_depth),
                value.operand()?
            ));
        }
        let passed = passed.join(", ");

        match *function.return_type {
            Type::Void => {
                writeln!(self.output, "\tcall void @{}({})", name, passed)?;
                Ok(LLVMValue::None)
            }
            Type::Number(number) => {
                let out = self.next_register();
                writeln!(
                    self.output,
                    "\t%{} = call {} @{}({})",
                    out,
                    typed(number.number_type, number.pointer_depth),
                    name,
                    passed
                )?;
                Ok(LLVMValue::register_pointer(
                    out,
                    number.number_type,
                    number.pointer_depth,
                ))
            }
            Type::Function(_) => Err(CompileError::Compiler(
                "Functions cannot return functions".to_string(),
            )),
        }
    }
}

/// Flatten a left-leaning glue chain of call arguments into order.
fn collect_arguments<'a>(node: Option<&'a ASTNode>, out: &mut Vec<&'a ASTNode>) {
    let Some(node) = node else {
        return;
    };
    if node.kind == TokenKind::Glue {
        collect_arguments(node.left.as_deref(), out);
        collect_arguments(node.right.as_deref(), out);
    } else {
        out.push(node);
    }
}

fn find_number(symbols: &SymbolTableStack, name: &str) -> Result<Number, CompileError> {
    let entry = symbols.find(name).ok_or_else(|| {
        CompileError::Compiler(format!(
            "Failed to find symbol \"{}\" in the symbol table stack",
            name
        ))
    })?;
    entry.ty.as_number().ok_or_else(|| {
        CompileError::Compiler(format!(
            "\"{}\" is a function, its address cannot be taken",
            name
        ))
    })
}
