//! Compiler configuration.

/// Configuration for a compiler run.
///
/// The clang executable is used twice: once by the platform probe to obtain
/// the target datalayout and triple, and once to assemble the emitted IR into
/// an executable.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Name or path of the clang-compatible driver to invoke.
    pub clang_executable: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            clang_executable: "clang".to_string(),
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clang_executable(mut self, clang_executable: impl Into<String>) -> Self {
        self.clang_executable = clang_executable.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_clang() {
        assert_eq!(CompilerConfig::default().clang_executable, "clang");
    }

    #[test]
    fn test_override_clang() {
        let config = CompilerConfig::new().with_clang_executable("clang-14");
        assert_eq!(config.clang_executable, "clang-14");
    }
}
