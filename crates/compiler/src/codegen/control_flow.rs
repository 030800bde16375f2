//! Control-flow lowering: labels, jumps, comparison-jump scheduling, and the
//! `if`/`while` statement shapes.

use std::fmt::Write as _;

use super::{CodeGen, LLVMValue};
use crate::ast::ASTNode;
use crate::errors::CompileError;
use crate::scan::TokenKind;
use crate::symbol_table::SymbolTableStack;

use super::state::LABEL_PREFIX;

impl CodeGen {
    /// Emit a label line. Starts a new basic block.
    pub fn label(&mut self, label: &LLVMValue) -> Result<(), CompileError> {
        let LLVMValue::Label(index) = label else {
            return Err(CompileError::Compiler(
                "Tried to generate a label statement, but received a non-label value".to_string(),
            ));
        };
        writeln!(self.output, "\t{}{}:", LABEL_PREFIX, index)?;
        self.block_terminated = false;
        Ok(())
    }

    /// Emit an unconditional jump. Skipped when the current block already
    /// ended with a terminator (a `ret` inside the branch).
    pub fn jump(&mut self, label: &LLVMValue) -> Result<(), CompileError> {
        let LLVMValue::Label(index) = label else {
            return Err(CompileError::Compiler(
                "Tried to generate a jump statement, but received a non-label value".to_string(),
            ));
        };
        if self.block_terminated {
            return Ok(());
        }
        writeln!(self.output, "\tbr label %{}{}", LABEL_PREFIX, index)?;
        self.block_terminated = true;
        Ok(())
    }

    /// Emit a conditional branch on an i1 condition value.
    pub fn conditional_jump(
        &mut self,
        condition: &LLVMValue,
        true_label: &LLVMValue,
        false_label: &LLVMValue,
    ) -> Result<(), CompileError> {
        let (LLVMValue::Label(true_index), LLVMValue::Label(false_index)) =
            (true_label, false_label)
        else {
            return Err(CompileError::Compiler(
                "Conditional jump received a non-label value".to_string(),
            ));
        };
        let number_type = condition.number_type().ok_or_else(|| {
            CompileError::Compiler("Conditional jump received a valueless condition".to_string())
        })?;

        writeln!(
            self.output,
            "\tbr {} {}, label %{}{}, label %{}{}",
            number_type.llvm_repr(),
            condition.operand()?,
            LABEL_PREFIX,
            true_index,
            LABEL_PREFIX,
            false_index
        )?;
        self.block_terminated = true;
        Ok(())
    }

    /// Emit a comparison followed by a conditional branch: fall through into a
    /// freshly minted true-label, or jump to `false_label`.
    pub fn compare_jump(
        &mut self,
        comparison: TokenKind,
        left: LLVMValue,
        right: LLVMValue,
        false_label: &LLVMValue,
    ) -> Result<LLVMValue, CompileError> {
        let result = self.compare(comparison, left, right)?;

        let true_label = self.get_next_label();
        self.conditional_jump(&result, &true_label, false_label)?;
        self.label(&true_label)?;

        Ok(result)
    }

    /// Evaluate a condition subtree (root must be a comparison or logical
    /// operator) and branch to `false_label` when it does not hold.
    pub(super) fn condition_jump(
        &mut self,
        condition: &ASTNode,
        false_label: &LLVMValue,
        symbols: &mut SymbolTableStack,
    ) -> Result<(), CompileError> {
        if !condition.kind.is_comparator() && !condition.kind.is_logical_operator() {
            return Err(CompileError::Compiler(format!(
                "Condition clauses must use a logical or comparison operator, got \"{}\"",
                condition.kind
            )));
        }

        let left = self.emit_subtree(condition.left.as_deref(), symbols)?;
        let right = self.emit_subtree(condition.right.as_deref(), symbols)?;
        self.compare_jump(condition.kind, left, right, false_label)?;
        Ok(())
    }

    /// Lower an `if` statement: condition, true branch, optional else branch.
    pub(super) fn if_ast_to_llvm(
        &mut self,
        node: &ASTNode,
        symbols: &mut SymbolTableStack,
    ) -> Result<LLVMValue, CompileError> {
        let condition = node.left.as_deref().ok_or_else(|| {
            CompileError::Compiler("If statement is missing its condition".to_string())
        })?;

        let false_label = self.get_next_label();
        let end_label = if node.right.is_some() {
            self.get_next_label()
        } else {
            false_label.clone()
        };

        self.condition_jump(condition, &false_label, symbols)?;

        if let Some(true_branch) = node.mid.as_deref() {
            self.ast_to_llvm(true_branch, symbols)?;
        }
        self.jump(&end_label)?;

        if let Some(false_branch) = node.right.as_deref() {
            self.label(&false_label)?;
            self.ast_to_llvm(false_branch, symbols)?;
            self.jump(&end_label)?;
        }

        self.label(&end_label)?;
        Ok(LLVMValue::None)
    }

    /// Lower a `while` statement with an optional else branch. The else block
    /// runs once, after the condition fails.
    pub(super) fn while_ast_to_llvm(
        &mut self,
        node: &ASTNode,
        symbols: &mut SymbolTableStack,
    ) -> Result<LLVMValue, CompileError> {
        let condition = node.left.as_deref().ok_or_else(|| {
            CompileError::Compiler("While statement is missing its condition".to_string())
        })?;

        let condition_label = self.get_next_label();
        let exit_label = self.get_next_label();

        self.jump(&condition_label)?;
        self.label(&condition_label)?;
        self.condition_jump(condition, &exit_label, symbols)?;

        if let Some(body) = node.mid.as_deref() {
            self.ast_to_llvm(body, symbols)?;
        }
        self.jump(&condition_label)?;

        self.label(&exit_label)?;
        if let Some(else_body) = node.right.as_deref() {
            self.ast_to_llvm(else_body, symbols)?;
        }
        Ok(LLVMValue::None)
    }

    pub(super) fn emit_subtree(
        &mut self,
        node: Option<&ASTNode>,
        symbols: &mut SymbolTableStack,
    ) -> Result<LLVMValue, CompileError> {
        match node {
            Some(node) => self.ast_to_llvm(node, symbols),
            None => Ok(LLVMValue::None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NumberType;

    #[test]
    fn test_label_and_jump_rendering() {
        let mut generator = CodeGen::new();
        let label = generator.get_next_label();
        generator.jump(&label).unwrap();
        generator.label(&label).unwrap();
        assert!(generator.output().contains("br label %L0"));
        assert!(generator.output().contains("\tL0:"));
    }

    #[test]
    fn test_jump_is_skipped_in_terminated_block() {
        let mut generator = CodeGen::new();
        let label = generator.get_next_label();
        generator.jump(&label).unwrap();
        // Second jump in the same (already terminated) block is suppressed
        generator.jump(&label).unwrap();
        assert_eq!(generator.output().matches("br label").count(), 1);
    }

    #[test]
    fn test_conditional_jump_with_constant_condition() {
        let mut generator = CodeGen::new();
        let true_label = generator.get_next_label();
        let false_label = generator.get_next_label();
        generator
            .conditional_jump(
                &LLVMValue::constant(1, NumberType::Int1),
                &true_label,
                &false_label,
            )
            .unwrap();
        assert!(generator
            .output()
            .contains("br i1 1, label %L0, label %L1"));
    }

    #[test]
    fn test_compare_jump_mints_true_label() {
        let mut generator = CodeGen::new();
        let false_label = generator.get_next_label();
        generator
            .compare_jump(
                TokenKind::Lt,
                LLVMValue::register(1, NumberType::Int32),
                LLVMValue::register(2, NumberType::Int32),
                &false_label,
            )
            .unwrap();
        let ir = generator.output();
        assert!(ir.contains("icmp slt i32 %1, %2"));
        // Fallthrough label L1 minted after the supplied false label L0
        assert!(ir.contains("label %L1, label %L0"));
        assert!(ir.contains("\tL1:"));
    }

    #[test]
    fn test_label_requires_label_value() {
        let mut generator = CodeGen::new();
        let err = generator
            .label(&LLVMValue::constant(0, NumberType::Int1))
            .unwrap_err();
        assert_eq!(err.return_code(), 6);
    }
}
