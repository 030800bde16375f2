//! Target platform detection via a clang probe program.
//!
//! A trivial C program is lowered to IR in a scratch directory once per
//! process; the target datalayout is scraped out of the result and the triple
//! comes from `clang -print-target-triple`.

use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;

use crate::errors::CompileError;

/// Program used to determine platform information.
const GENERATOR_PROGRAM_CONTENTS: &str = "#include <stdio.h>\nint main(void){printf(\"\");}";
const GENERATOR_PROGRAM_FILENAME: &str = ".prp_platform_information_generator.c";
const GENERATOR_PROGRAM_FILENAME_LL: &str = ".prp_platform_information_generator.ll";

static PLATFORM: OnceLock<Result<Platform, CompileError>> = OnceLock::new();
static DATALAYOUT_RE: OnceLock<Regex> = OnceLock::new();

/// Target description consumed by the module preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub datalayout: String,
    pub triple: String,
}

impl Platform {
    /// Detect the target platform using the given clang executable. The
    /// result is cached for the rest of the process.
    pub fn detect(clang: &str) -> Result<Platform, CompileError> {
        PLATFORM
            .get_or_init(|| {
                Ok(Platform {
                    datalayout: probe_datalayout(clang)?,
                    triple: probe_triple(clang)?,
                })
            })
            .clone()
    }
}

/// The scratch directory for probe files: `TEMP`, `TMP`, and `TMPDIR` are
/// consulted in that order, with `/tmp/` as the fallback.
pub fn get_temp_dir() -> PathBuf {
    for variable in ["TEMP", "TMP", "TMPDIR"] {
        if let Ok(dir) = std::env::var(variable) {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
    }
    PathBuf::from("/tmp/")
}

/// Pull the quoted datalayout string out of emitted IR text.
pub(crate) fn extract_datalayout(text: &str) -> Option<String> {
    let re = DATALAYOUT_RE.get_or_init(|| {
        Regex::new(r#"target datalayout = "(.*)""#).expect("datalayout regex is valid")
    });
    text.lines()
        .find_map(|line| re.captures(line).map(|c| c[1].to_string()))
}

fn probe_datalayout(clang: &str) -> Result<String, CompileError> {
    tracing::debug!("creating generator program file");

    let temp_dir = get_temp_dir();
    let source_path = temp_dir.join(GENERATOR_PROGRAM_FILENAME);
    let ir_path = temp_dir.join(GENERATOR_PROGRAM_FILENAME_LL);

    std::fs::write(&source_path, GENERATOR_PROGRAM_CONTENTS).map_err(|e| {
        CompileError::File(format!(
            "Failed to open generator program {}: {}",
            source_path.display(),
            e
        ))
    })?;

    tracing::debug!("compiling generator program to LLVM using clang");
    let output = Command::new(clang)
        .arg("-S")
        .arg("-emit-llvm")
        .arg("-w")
        .arg(&source_path)
        .arg("-o")
        .arg(&ir_path)
        .output()
        .map_err(|e| CompileError::File(format!("Failed to run {}: {}", clang, e)))?;
    if !output.status.success() {
        return Err(CompileError::Generic(format!(
            "clang exited with return code {:?} while compiling generator program",
            output.status.code()
        )));
    }

    tracing::debug!("retrieving target datalayout");
    let ir = std::fs::read_to_string(&ir_path).map_err(|e| {
        CompileError::File(format!(
            "Failed to open generator program LLVM file {}: {}",
            ir_path.display(),
            e
        ))
    })?;

    extract_datalayout(&ir).ok_or_else(|| {
        CompileError::Compiler("Failed to determine target datalayout".to_string())
    })
}

fn probe_triple(clang: &str) -> Result<String, CompileError> {
    tracing::debug!("retrieving target triple");

    let output = Command::new(clang)
        .arg("-print-target-triple")
        .output()
        .map_err(|e| {
            CompileError::Generic(format!(
                "{} failed while printing target triple: {}",
                clang, e
            ))
        })?;
    if !output.status.success() {
        return Err(CompileError::Generic(format!(
            "clang exited with return code {:?} while printing target triple",
            output.status.code()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_datalayout() {
        let ir = "; ModuleID = 'probe.c'\n\
                  source_filename = \"probe.c\"\n\
                  target datalayout = \"e-m:e-i64:64-f80:128-n8:16:32:64-S128\"\n\
                  target triple = \"x86_64-pc-linux-gnu\"\n";
        assert_eq!(
            extract_datalayout(ir).unwrap(),
            "e-m:e-i64:64-f80:128-n8:16:32:64-S128"
        );
    }

    #[test]
    fn test_extract_datalayout_missing() {
        assert_eq!(extract_datalayout("define i32 @main() {\n}"), None);
    }

    #[test]
    fn test_temp_dir_has_fallback() {
        // Whatever the environment holds, the probe always gets a directory.
        let dir = get_temp_dir();
        assert!(!dir.as_os_str().is_empty());
    }
}
