//! Expression-level IR emission: loads, stores, arithmetic, comparison,
//! width resizing, and pointer operations.

use std::fmt::Write as _;

use super::state::typed;
use super::{CodeGen, LLVMValue};
use crate::errors::CompileError;
use crate::scan::TokenKind;
use crate::types::{Number, NumberType};

impl CodeGen {
    /// Ensure a value is loaded down to `load_depth`, emitting one `load` per
    /// level of indirection above it. Constants are already loaded.
    pub fn ensure_loaded(
        &mut self,
        value: LLVMValue,
        load_depth: u32,
    ) -> Result<LLVMValue, CompileError> {
        let LLVMValue::VirtualRegister {
            reg,
            number_type,
            pointer_depth,
            ..
        } = &value
        else {
            return Ok(value);
        };

        if *pointer_depth <= load_depth {
            return Ok(value);
        }

        let number_type = *number_type;
        let mut source = reg.clone();
        let mut depth = *pointer_depth;
        let mut loaded = value.clone();
        while depth > load_depth {
            let next = self.next_register();
            writeln!(
                self.output,
                "\t%{} = load {}, {} %{}, align {}",
                next,
                typed(number_type, depth - 1),
                typed(number_type, depth),
                source_text(&source),
                number_type.byte_size()
            )?;
            loaded = LLVMValue::register_pointer(next, number_type, depth - 1);
            source = super::state::Register::Numbered(next);
            depth -= 1;
        }

        Ok(loaded)
    }

    /// Ensure a value is fully loaded (pointer depth zero).
    pub fn ensure_fully_loaded(&mut self, value: LLVMValue) -> Result<LLVMValue, CompileError> {
        self.ensure_loaded(value, 0)
    }

    /// Extend or truncate an integer value to a new width.
    ///
    /// Constants are resized at compile time, clamped to the new width's
    /// maximum value.
    pub fn int_resize(
        &mut self,
        value: LLVMValue,
        new_type: NumberType,
    ) -> Result<LLVMValue, CompileError> {
        match value {
            LLVMValue::Constant {
                value: constant, ..
            } => Ok(LLVMValue::constant(
                constant.min(new_type.max_value()),
                new_type,
            )),
            LLVMValue::VirtualRegister {
                ref reg,
                number_type,
                ..
            } => {
                let method = if number_type.bit_width() < new_type.bit_width() {
                    "zext"
                } else if number_type.bit_width() > new_type.bit_width() {
                    "trunc"
                } else {
                    return Ok(value);
                };

                let out = self.next_register();
                writeln!(
                    self.output,
                    "\t%{} = {} {} {} to {}",
                    out,
                    method,
                    number_type.llvm_repr(),
                    reg,
                    new_type.llvm_repr()
                )?;
                Ok(LLVMValue::register(out, new_type))
            }
            other => Err(CompileError::Compiler(format!(
                "Cannot resize non-value {:?}",
                other
            ))),
        }
    }

    /// Promote the narrower of two operands so both share a width.
    fn promote_widths(
        &mut self,
        left: LLVMValue,
        right: LLVMValue,
    ) -> Result<(LLVMValue, LLVMValue), CompileError> {
        let lt = expect_number_type(&left)?;
        let rt = expect_number_type(&right)?;
        if lt == rt {
            return Ok((left, right));
        }
        if lt.bit_width() < rt.bit_width() {
            let left = self.int_resize(left, rt)?;
            Ok((left, right))
        } else {
            let right = self.int_resize(right, lt)?;
            Ok((left, right))
        }
    }

    /// Generate IR for a binary arithmetic expression.
    ///
    /// Constant operands are reduced at compile time; the result width is the
    /// wider of the two inputs.
    pub fn binary_arithmetic(
        &mut self,
        operation: TokenKind,
        left: LLVMValue,
        right: LLVMValue,
    ) -> Result<LLVMValue, CompileError> {
        if let (
            LLVMValue::Constant {
                value: lv,
                number_type: lt,
            },
            LLVMValue::Constant {
                value: rv,
                number_type: rt,
            },
        ) = (&left, &right)
        {
            let folded = fold_arithmetic(operation, *lv, *rv)?;
            return Ok(LLVMValue::constant(folded, lt.wider(*rt)));
        }

        let left = self.ensure_fully_loaded(left)?;
        let right = self.ensure_fully_loaded(right)?;
        let (left, right) = self.promote_widths(left, right)?;
        let number_type = expect_number_type(&left)?;

        let instruction = match operation {
            TokenKind::Plus => "add nsw",
            TokenKind::Minus => "sub nsw",
            TokenKind::Star => "mul nsw",
            TokenKind::Slash => "udiv",
            TokenKind::Exponent => {
                return Err(CompileError::Compiler(
                    "Exponent not yet supported, as libc pow only takes floating-point types"
                        .to_string(),
                ));
            }
            other => {
                return Err(CompileError::Compiler(format!(
                    "binary_arithmetic received non-binary-arithmetic operator \"{}\"",
                    other
                )));
            }
        };

        let out = self.next_register();
        writeln!(
            self.output,
            "\t%{} = {} {} {}, {}",
            out,
            instruction,
            number_type.llvm_repr(),
            left.operand()?,
            right.operand()?
        )?;
        Ok(LLVMValue::register(out, number_type))
    }

    /// Generate IR comparing two values: `icmp` with a signed predicate for
    /// relational operators, the bitwise instruction on i1 for logical ones.
    /// Constant operands fold to an i1 constant.
    pub fn compare(
        &mut self,
        comparison: TokenKind,
        left: LLVMValue,
        right: LLVMValue,
    ) -> Result<LLVMValue, CompileError> {
        let left = self.ensure_fully_loaded(left)?;
        let right = self.ensure_fully_loaded(right)?;
        let (left, right) = self.promote_widths(left, right)?;

        if let (
            LLVMValue::Constant { value: lv, .. },
            LLVMValue::Constant { value: rv, .. },
        ) = (&left, &right)
        {
            let folded = fold_comparison(comparison, *lv, *rv)?;
            return Ok(LLVMValue::constant(folded, NumberType::Int1));
        }

        let number_type = expect_number_type(&left)?;
        let out = self.next_register();

        if comparison.is_comparator() {
            let predicate = match comparison {
                TokenKind::Eq => "eq",
                TokenKind::Neq => "ne",
                TokenKind::Lt => "slt",
                TokenKind::Le => "sle",
                TokenKind::Gt => "sgt",
                TokenKind::Ge => "sge",
                _ => unreachable!(),
            };
            writeln!(
                self.output,
                "\t%{} = icmp {} {} {}, {}",
                out,
                predicate,
                number_type.llvm_repr(),
                left.operand()?,
                right.operand()?
            )?;
        } else {
            let instruction = match comparison {
                TokenKind::And => "and",
                TokenKind::Or => "or",
                TokenKind::Xor => "xor",
                TokenKind::Nand | TokenKind::Nor | TokenKind::Xnor => {
                    return Err(CompileError::Compiler(
                        "N- logical operators not yet supported".to_string(),
                    ));
                }
                other => {
                    return Err(CompileError::Compiler(format!(
                        "compare received non-comparison operator \"{}\"",
                        other
                    )));
                }
            };
            writeln!(
                self.output,
                "\t%{} = {} {} {}, {}",
                out,
                instruction,
                number_type.llvm_repr(),
                left.operand()?,
                right.operand()?
            )?;
        }

        Ok(LLVMValue::register(out, NumberType::Int1))
    }

    /// Load a global variable's value into a new virtual register.
    ///
    /// The resulting value carries a tag remembering which global it was
    /// loaded from.
    pub fn load_global_variable(
        &mut self,
        symbol_name: &str,
        number: Number,
    ) -> Result<LLVMValue, CompileError> {
        let out = self.next_register();
        writeln!(
            self.output,
            "\t%{} = load {}, {} @{}",
            out,
            typed(number.number_type, number.pointer_depth),
            typed(number.number_type, number.pointer_depth + 1),
            symbol_name
        )?;

        Ok(LLVMValue::VirtualRegister {
            reg: super::state::Register::Numbered(out),
            number_type: number.number_type,
            pointer_depth: number.pointer_depth,
            just_loaded: Some(symbol_name.to_string()),
        })
    }

    /// Load a function parameter's value from its named stack slot.
    pub fn load_parameter(
        &mut self,
        parameter_name: &str,
        number: Number,
    ) -> Result<LLVMValue, CompileError> {
        let out = self.next_register();
        writeln!(
            self.output,
            "\t%{} = load {}, {} %{}",
            out,
            typed(number.number_type, number.pointer_depth),
            typed(number.number_type, number.pointer_depth + 1),
            parameter_name
        )?;
        Ok(LLVMValue::register_pointer(
            out,
            number.number_type,
            number.pointer_depth,
        ))
    }

    /// Ensure a value can be stored into a destination of the given declared
    /// type: load to the declared depth and match widths.
    fn prepare_store_value(
        &mut self,
        value: LLVMValue,
        number: Number,
    ) -> Result<LLVMValue, CompileError> {
        let value = self.ensure_loaded(value, number.pointer_depth)?;
        if value.pointer_depth() != number.pointer_depth {
            return Err(CompileError::Compiler(
                "Pointer mismatch when trying to save variable".to_string(),
            ));
        }
        let value_type = expect_number_type(&value)?;
        if value_type.bit_width() != number.number_type.bit_width() {
            return self.int_resize(value, number.number_type);
        }
        Ok(value)
    }

    /// Store a value into a global variable.
    pub fn store_global_variable(
        &mut self,
        symbol_name: &str,
        number: Number,
        value: LLVMValue,
    ) -> Result<LLVMValue, CompileError> {
        if !value.is_constant() && !value.is_register() {
            return Err(CompileError::Compiler(
                "Non-value passed to store_global_variable".to_string(),
            ));
        }

        let value = self.prepare_store_value(value, number)?;
        writeln!(
            self.output,
            "\tstore {} {}, {} @{}",
            typed(number.number_type, number.pointer_depth),
            value.operand()?,
            typed(number.number_type, number.pointer_depth + 1),
            symbol_name
        )?;
        Ok(value)
    }

    /// Store a value into a function parameter's named stack slot.
    pub fn store_parameter(
        &mut self,
        parameter_name: &str,
        number: Number,
        value: LLVMValue,
    ) -> Result<LLVMValue, CompileError> {
        let value = self.prepare_store_value(value, number)?;
        writeln!(
            self.output,
            "\tstore {} {}, {} %{}",
            typed(number.number_type, number.pointer_depth),
            value.operand()?,
            typed(number.number_type, number.pointer_depth + 1),
            parameter_name
        )?;
        Ok(value)
    }

    /// Take the address of a global symbol: pop the scratch slot planned for
    /// this expression, store the global's address into it, and yield the
    /// slot.
    pub fn get_address(
        &mut self,
        symbol_name: &str,
        number: Number,
    ) -> Result<LLVMValue, CompileError> {
        let slot = self.pop_free_register()?;
        if slot.number_type != number.number_type
            || slot.pointer_depth != number.pointer_depth + 1
        {
            return Err(CompileError::Compiler(format!(
                "Scratch slot %{} does not match the type of \"{}\"",
                slot.reg, symbol_name
            )));
        }

        writeln!(
            self.output,
            "\tstore {} @{}, {} %{}",
            typed(number.number_type, number.pointer_depth + 1),
            symbol_name,
            typed(number.number_type, number.pointer_depth + 2),
            slot.reg
        )?;

        Ok(LLVMValue::register_pointer(
            slot.reg,
            number.number_type,
            number.pointer_depth + 2,
        ))
    }

    /// Dereference: one load, reducing pointer depth by one.
    pub fn dereference(&mut self, value: LLVMValue) -> Result<LLVMValue, CompileError> {
        let LLVMValue::VirtualRegister {
            reg,
            number_type,
            pointer_depth,
            ..
        } = &value
        else {
            return Err(CompileError::Compiler(format!(
                "Tried to dereference non-register value {:?}",
                value
            )));
        };
        if *pointer_depth == 0 {
            return Err(CompileError::Compiler(
                "Tried to dereference a non-pointer value".to_string(),
            ));
        }

        let out = self.next_register();
        writeln!(
            self.output,
            "\t%{} = load {}, {} {}",
            out,
            typed(*number_type, pointer_depth - 1),
            typed(*number_type, *pointer_depth),
            reg
        )?;
        Ok(LLVMValue::register_pointer(
            out,
            *number_type,
            pointer_depth - 1,
        ))
    }

    /// Store a value through a pointer destination. The destination's depth
    /// must exceed the stored value's by exactly one.
    pub fn store_dereference(
        &mut self,
        destination: LLVMValue,
        value: LLVMValue,
    ) -> Result<LLVMValue, CompileError> {
        let destination_depth = destination.pointer_depth();
        if destination_depth == 0 {
            return Err(CompileError::Compiler(
                "Tried to store through a non-pointer destination".to_string(),
            ));
        }

        let value = self.ensure_loaded(value, destination_depth - 1)?;
        let value_type = expect_number_type(&value)?;
        let destination_type = expect_number_type(&destination)?;
        let value = if value_type.bit_width() != destination_type.bit_width() {
            self.int_resize(value, destination_type)?
        } else {
            value
        };

        writeln!(
            self.output,
            "\tstore {} {}, {} {}",
            typed(destination_type, destination_depth - 1),
            value.operand()?,
            typed(destination_type, destination_depth),
            destination.operand()?
        )?;
        Ok(value)
    }
}

fn expect_number_type(value: &LLVMValue) -> Result<NumberType, CompileError> {
    value.number_type().ok_or_else(|| {
        CompileError::Compiler(format!("Value {:?} has no number type", value))
    })
}

fn source_text(reg: &super::state::Register) -> String {
    match reg {
        super::state::Register::Numbered(n) => n.to_string(),
        super::state::Register::Named(name) => name.clone(),
    }
}

/// Compile-time reduction of a binary arithmetic operation.
fn fold_arithmetic(operation: TokenKind, left: i64, right: i64) -> Result<i64, CompileError> {
    match operation {
        TokenKind::Plus => Ok(left.wrapping_add(right)),
        TokenKind::Minus => Ok(left.wrapping_sub(right)),
        TokenKind::Star => Ok(left.wrapping_mul(right)),
        TokenKind::Slash => {
            if right == 0 {
                Err(CompileError::Compiler(
                    "Division by zero in constant expression".to_string(),
                ))
            } else {
                Ok(left / right)
            }
        }
        TokenKind::Exponent => {
            let exponent = u32::try_from(right).map_err(|_| {
                CompileError::Compiler("Negative exponent in constant expression".to_string())
            })?;
            left.checked_pow(exponent).ok_or_else(|| {
                CompileError::Compiler("Exponent overflow in constant expression".to_string())
            })
        }
        other => Err(CompileError::Compiler(format!(
            "Can't perform compile-time reduction of constant integer values on operation '{}'",
            other
        ))),
    }
}

/// Compile-time reduction of a comparison or logical operation to 0/1.
fn fold_comparison(comparison: TokenKind, left: i64, right: i64) -> Result<i64, CompileError> {
    let result = match comparison {
        TokenKind::Eq => left == right,
        TokenKind::Neq => left != right,
        TokenKind::Lt => left < right,
        TokenKind::Le => left <= right,
        TokenKind::Gt => left > right,
        TokenKind::Ge => left >= right,
        TokenKind::And => (left != 0) && (right != 0),
        TokenKind::Or => (left != 0) || (right != 0),
        TokenKind::Xor => (left ^ right) != 0,
        TokenKind::Nand => !((left != 0) && (right != 0)),
        TokenKind::Nor => !((left != 0) || (right != 0)),
        TokenKind::Xnor => (left ^ right) == 0,
        other => {
            return Err(CompileError::Compiler(format!(
                "Can't perform compile-time reduction of constant integer values on operation '{}'",
                other
            )));
        }
    };
    Ok(i64::from(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::StackEntry;
    use crate::types::NumberType;

    #[test]
    fn test_constant_folding_arithmetic() {
        let mut generator = CodeGen::new();
        let result = generator
            .binary_arithmetic(
                TokenKind::Plus,
                LLVMValue::constant(1, NumberType::Int32),
                LLVMValue::constant(2, NumberType::Int32),
            )
            .unwrap();
        assert_eq!(result, LLVMValue::constant(3, NumberType::Int32));
        // No instructions emitted for a folded expression
        assert!(generator.output().is_empty());
    }

    #[test]
    fn test_constant_folding_takes_wider_width() {
        let mut generator = CodeGen::new();
        let result = generator
            .binary_arithmetic(
                TokenKind::Star,
                LLVMValue::constant(4, NumberType::Int8),
                LLVMValue::constant(8, NumberType::Int64),
            )
            .unwrap();
        assert_eq!(result, LLVMValue::constant(32, NumberType::Int64));
    }

    #[test]
    fn test_constant_folding_exponent() {
        let mut generator = CodeGen::new();
        let result = generator
            .binary_arithmetic(
                TokenKind::Exponent,
                LLVMValue::constant(2, NumberType::Int32),
                LLVMValue::constant(10, NumberType::Int32),
            )
            .unwrap();
        assert_eq!(result, LLVMValue::constant(1024, NumberType::Int32));
    }

    #[test]
    fn test_constant_division_by_zero_is_rejected() {
        let mut generator = CodeGen::new();
        let err = generator
            .binary_arithmetic(
                TokenKind::Slash,
                LLVMValue::constant(1, NumberType::Int32),
                LLVMValue::constant(0, NumberType::Int32),
            )
            .unwrap_err();
        assert_eq!(err.return_code(), 6);
    }

    #[test]
    fn test_runtime_exponent_is_a_compiler_error() {
        let mut generator = CodeGen::new();
        let err = generator
            .binary_arithmetic(
                TokenKind::Exponent,
                LLVMValue::register(1, NumberType::Int32),
                LLVMValue::constant(2, NumberType::Int32),
            )
            .unwrap_err();
        assert_eq!(err.return_code(), 6);
    }

    #[test]
    fn test_arithmetic_promotes_widths() {
        let mut generator = CodeGen::new();
        let result = generator
            .binary_arithmetic(
                TokenKind::Plus,
                LLVMValue::register(1, NumberType::Int16),
                LLVMValue::register(2, NumberType::Int32),
            )
            .unwrap();
        assert!(generator.output().contains("zext i16 %1 to i32"));
        assert!(generator.output().contains("add nsw i32"));
        assert_eq!(result.number_type(), Some(NumberType::Int32));
    }

    #[test]
    fn test_comparison_folding_yields_i1() {
        let mut generator = CodeGen::new();
        let result = generator
            .compare(
                TokenKind::Eq,
                LLVMValue::constant(1, NumberType::Int32),
                LLVMValue::constant(1, NumberType::Int32),
            )
            .unwrap();
        assert_eq!(result, LLVMValue::constant(1, NumberType::Int1));
    }

    #[test]
    fn test_comparison_emits_signed_predicates() {
        let mut generator = CodeGen::new();
        for (kind, predicate) in [
            (TokenKind::Eq, "icmp eq"),
            (TokenKind::Neq, "icmp ne"),
            (TokenKind::Lt, "icmp slt"),
            (TokenKind::Le, "icmp sle"),
            (TokenKind::Gt, "icmp sgt"),
            (TokenKind::Ge, "icmp sge"),
        ] {
            let result = generator
                .compare(
                    kind,
                    LLVMValue::register(1, NumberType::Int32),
                    LLVMValue::register(2, NumberType::Int32),
                )
                .unwrap();
            assert!(generator.output().contains(predicate), "{}", predicate);
            assert_eq!(result.number_type(), Some(NumberType::Int1));
        }
    }

    #[test]
    fn test_nand_runtime_is_a_compiler_error() {
        let mut generator = CodeGen::new();
        let err = generator
            .compare(
                TokenKind::Nand,
                LLVMValue::register(1, NumberType::Int1),
                LLVMValue::register(2, NumberType::Int1),
            )
            .unwrap_err();
        assert_eq!(err.return_code(), 6);
    }

    #[test]
    fn test_nand_nor_xnor_fold() {
        let mut generator = CodeGen::new();
        let one = || LLVMValue::constant(1, NumberType::Int1);
        let zero = || LLVMValue::constant(0, NumberType::Int1);
        assert_eq!(
            generator.compare(TokenKind::Nand, one(), one()).unwrap(),
            LLVMValue::constant(0, NumberType::Int1)
        );
        assert_eq!(
            generator.compare(TokenKind::Nor, zero(), zero()).unwrap(),
            LLVMValue::constant(1, NumberType::Int1)
        );
        assert_eq!(
            generator.compare(TokenKind::Xnor, one(), zero()).unwrap(),
            LLVMValue::constant(0, NumberType::Int1)
        );
    }

    #[test]
    fn test_int_resize_constant_clamps() {
        let mut generator = CodeGen::new();
        let resized = generator
            .int_resize(
                LLVMValue::constant(500, NumberType::Int32),
                NumberType::Int8,
            )
            .unwrap();
        assert_eq!(resized, LLVMValue::constant(255, NumberType::Int8));
    }

    #[test]
    fn test_int_resize_register_truncates() {
        let mut generator = CodeGen::new();
        generator
            .int_resize(
                LLVMValue::register(1, NumberType::Int64),
                NumberType::Int32,
            )
            .unwrap();
        assert!(generator.output().contains("trunc i64 %1 to i32"));
    }

    #[test]
    fn test_ensure_loaded_emits_one_load_per_level() {
        let mut generator = CodeGen::new();
        let value = LLVMValue::register_pointer(1, NumberType::Int32, 2);
        let loaded = generator.ensure_fully_loaded(value).unwrap();
        assert_eq!(loaded.pointer_depth(), 0);
        let loads = generator.output().matches(" = load ").count();
        assert_eq!(loads, 2);
        assert!(generator.output().contains("load i32*, i32** %1"));
        assert!(generator.output().contains("load i32, i32*"));
    }

    #[test]
    fn test_get_address_pops_planned_slot() {
        let mut generator = CodeGen::new();
        generator.prepend_free_register(StackEntry {
            reg: 1,
            number_type: NumberType::Int32,
            pointer_depth: 1,
            align_bytes: 4,
        });
        let value = generator.get_address("x", Number::int32(0)).unwrap();
        assert_eq!(value.pointer_depth(), 2);
        assert!(generator.output().contains("store i32* @x, i32** %1"));
        // Slot list is now exhausted
        assert!(generator.pop_free_register().is_err());
    }

    #[test]
    fn test_get_address_rejects_mismatched_slot() {
        let mut generator = CodeGen::new();
        generator.prepend_free_register(StackEntry {
            reg: 1,
            number_type: NumberType::Int64,
            pointer_depth: 1,
            align_bytes: 4,
        });
        let err = generator.get_address("x", Number::int32(0)).unwrap_err();
        assert_eq!(err.return_code(), 6);
    }

    #[test]
    fn test_load_global_variable_depth_discipline() {
        let mut generator = CodeGen::new();
        let value = generator
            .load_global_variable("x", Number::int32(0))
            .unwrap();
        assert!(generator.output().contains("load i32, i32* @x"));
        assert_eq!(value.pointer_depth(), 0);

        let pointer = generator
            .load_global_variable("p", Number::new(NumberType::Int32, 1, 0))
            .unwrap();
        assert!(generator.output().contains("load i32*, i32** @p"));
        assert_eq!(pointer.pointer_depth(), 1);
    }

    #[test]
    fn test_store_global_resizes_width() {
        let mut generator = CodeGen::new();
        let source = generator.next_register();
        assert_eq!(source, 1);
        generator
            .store_global_variable(
                "c",
                Number::new(NumberType::Int8, 0, 0),
                LLVMValue::register(1, NumberType::Int32),
            )
            .unwrap();
        assert!(generator.output().contains("trunc i32 %1 to i8"));
        assert!(generator.output().contains("store i8 %2, i8* @c"));
    }

    #[test]
    fn test_store_dereference_depth_check() {
        let mut generator = CodeGen::new();
        let destination = LLVMValue::register_pointer(1, NumberType::Int32, 1);
        generator
            .store_dereference(destination, LLVMValue::constant(7, NumberType::Int32))
            .unwrap();
        assert!(generator.output().contains("store i32 7, i32* %1"));

        let err = generator
            .store_dereference(
                LLVMValue::constant(0, NumberType::Int32),
                LLVMValue::constant(7, NumberType::Int32),
            )
            .unwrap_err();
        assert_eq!(err.return_code(), 6);
    }
}
