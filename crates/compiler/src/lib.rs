//! Purple Compiler Library
//!
//! Provides compilation from Purple source to textual LLVM IR and, through a
//! clang-compatible driver, to native executables.
//!
//! The pipeline is single-pass: the reader feeds the scanner, the parser
//! consumes tokens while consulting the symbol table stack and drives IR
//! emission function by function, and the driver finally splices the globals
//! sink over the placeholder line and hands the result to clang.

pub mod ast;
pub mod codegen;
pub mod config;
pub mod errors;
pub mod parser;
pub mod scan;
pub mod symbol_table;
pub mod types;

pub use ast::{ASTNode, NodeValue};
pub use codegen::{CodeGen, GLOBALS_PLACEHOLDER, LLVMValue, Platform, StackEntry};
pub use config::CompilerConfig;
pub use errors::{CompileError, Position};
pub use parser::Parser;
pub use scan::{Scanner, Token, TokenKind, TokenValue};
pub use symbol_table::{SymbolTable, SymbolTableEntry, SymbolTableStack};
pub use types::{FunctionParameter, FunctionType, Number, NumberType, Type};

use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

/// The globals placeholder line, with trailing whitespace permitted.
fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| {
        Regex::new(&format!("^{}\\s*$", regex::escape(GLOBALS_PLACEHOLDER)))
            .expect("placeholder regex is valid")
    })
}

/// Replace the placeholder line in `ir` with the globals sink contents.
///
/// Idempotent once the marker is gone: text without the placeholder passes
/// through unchanged.
pub fn splice_globals(ir: &str, globals: &str) -> String {
    let re = placeholder_regex();
    let mut out = String::with_capacity(ir.len() + globals.len());
    for line in ir.lines() {
        if re.is_match(line) {
            out.push_str(globals);
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Splice the globals sink into the IR file at `path`, streaming through a
/// temporary file in the same directory.
pub fn link_globals(path: &Path, globals: &str) -> Result<(), CompileError> {
    tracing::debug!("opening files for globals linking");
    let main_ir = fs::read_to_string(path).map_err(|e| {
        CompileError::File(format!(
            "Failed to open main LLVM file {}: {}",
            path.display(),
            e
        ))
    })?;

    tracing::debug!("scanning main LLVM file for globals placeholder");
    let spliced = splice_globals(&main_ir, globals);

    let directory = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut temp = tempfile::NamedTempFile::new_in(directory.unwrap_or(Path::new(".")))
        .map_err(|e| CompileError::File(format!("Failed to open temporary file: {}", e)))?;
    temp.write_all(spliced.as_bytes())
        .map_err(|e| CompileError::File(format!("Failed to write temporary file: {}", e)))?;
    temp.persist(path).map_err(|e| {
        CompileError::File(format!(
            "Failed to replace main LLVM file {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(())
}

/// Compile Purple source text to a complete LLVM IR module, with the globals
/// already spliced in.
pub fn compile_to_ir_with_platform(
    source: &str,
    filename: &str,
    platform: &Platform,
) -> Result<String, CompileError> {
    let mut parser = Parser::new(source, filename);
    parser.codegen_mut().module_preamble(filename, platform)?;
    parser.parse_program()?;
    parser.codegen_mut().module_postamble()?;
    let (main_ir, globals) = parser.into_sinks();
    Ok(splice_globals(&main_ir, &globals))
}

/// Compile source text to IR, probing the platform with the configured clang.
pub fn compile_to_ir(
    source: &str,
    filename: &str,
    config: &CompilerConfig,
) -> Result<String, CompileError> {
    let platform = Platform::detect(&config.clang_executable)?;
    compile_to_ir_with_platform(source, filename, &platform)
}

/// Compile a Purple source file: emit IR with a globals placeholder, splice
/// the globals in place, then hand the file to clang.
pub fn compile_file(
    input: &Path,
    output: &Path,
    config: &CompilerConfig,
) -> Result<(), CompileError> {
    tracing::debug!("beginning translation");

    let source = fs::read_to_string(input).map_err(|e| {
        CompileError::File(format!("Unable to open {}: {}", input.display(), e))
    })?;
    let filename = input.display().to_string();
    let platform = Platform::detect(&config.clang_executable)?;

    let mut parser = Parser::new(&source, &filename);
    parser.codegen_mut().module_preamble(&filename, &platform)?;
    parser.parse_program()?;
    parser.codegen_mut().module_postamble()?;
    let (main_ir, globals) = parser.into_sinks();

    fs::write(output, &main_ir).map_err(|e| {
        CompileError::File(format!(
            "Could not open {} for writing LLVM: {}",
            output.display(),
            e
        ))
    })?;
    link_globals(output, &globals)?;
    tracing::debug!(path = %output.display(), "LLVM written");

    clang_compile(&config.clang_executable, output);
    Ok(())
}

/// Run `clang <file>` over the emitted IR. Failures are logged, not fatal:
/// the IR file itself is the compiler's product.
fn clang_compile(clang: &str, path: &Path) {
    tracing::debug!("compiling LLVM with clang");
    match Command::new(clang).arg(path).output() {
        Ok(output) => {
            if !output.stdout.is_empty() {
                tracing::debug!("{}", String::from_utf8_lossy(&output.stdout));
            }
            if !output.status.success() {
                tracing::error!(
                    "clang exited with return code {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr)
                );
            }
        }
        Err(e) => {
            tracing::error!("clang failed to start: {}", e);
        }
    }
}
