//! Fatal error categories and source positions.
//!
//! Every failure in the compiler is fatal and carries one of the categories
//! below; the driver maps the category onto a process exit code. Syntax and
//! identifier errors additionally carry the source position they were raised
//! at, rendered as `file:line:column`.

/// Position of a token or diagnostic in the input source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// 1-indexed line number
    pub line: u32,
    /// 1-indexed column of the first character
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Position { line, column }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Fatal compiler errors, one variant per exit-code category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Uncategorized failure
    Generic(String),
    /// Malformed source input
    Syntax {
        filename: String,
        position: Position,
        message: String,
    },
    /// Allocation or capacity failure
    Memory(String),
    /// Input/output file failure
    File(String),
    /// Undeclared or redeclared identifier
    Identifier {
        filename: String,
        position: Position,
        message: String,
    },
    /// Internal invariant violation
    Compiler(String),
}

impl CompileError {
    pub fn syntax(filename: &str, position: Position, message: impl Into<String>) -> Self {
        CompileError::Syntax {
            filename: filename.to_string(),
            position,
            message: message.into(),
        }
    }

    pub fn identifier(filename: &str, position: Position, message: impl Into<String>) -> Self {
        CompileError::Identifier {
            filename: filename.to_string(),
            position,
            message: message.into(),
        }
    }

    /// Process exit code for this error category. 0 is reserved for success.
    pub fn return_code(&self) -> i32 {
        match self {
            CompileError::Generic(_) => 1,
            CompileError::Syntax { .. } => 2,
            CompileError::Memory(_) => 3,
            CompileError::File(_) => 4,
            CompileError::Identifier { .. } => 5,
            CompileError::Compiler(_) => 6,
        }
    }

    fn category(&self) -> &'static str {
        match self {
            CompileError::Generic(_) => "ERROR",
            CompileError::Syntax { .. } => "SYNTAX ERROR",
            CompileError::Memory(_) => "MEMORY ERROR",
            CompileError::File(_) => "FILE ERROR",
            CompileError::Identifier { .. } => "IDENTIFIER ERROR",
            CompileError::Compiler(_) => "COMPILER ERROR",
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Syntax {
                filename,
                position,
                message,
            }
            | CompileError::Identifier {
                filename,
                position,
                message,
            } => {
                write!(
                    f,
                    "[{}] - {} ({}:{})",
                    self.category(),
                    message,
                    filename,
                    position
                )
            }
            CompileError::Generic(message)
            | CompileError::Memory(message)
            | CompileError::File(message)
            | CompileError::Compiler(message) => {
                write!(f, "[{}] - {}", self.category(), message)
            }
        }
    }
}

impl std::error::Error for CompileError {}

impl From<std::fmt::Error> for CompileError {
    fn from(e: std::fmt::Error) -> Self {
        CompileError::Compiler(format!("IR generation error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_codes_are_categorical() {
        let pos = Position::new(1, 1);
        assert_eq!(CompileError::Generic("x".into()).return_code(), 1);
        assert_eq!(CompileError::syntax("f", pos, "x").return_code(), 2);
        assert_eq!(CompileError::Memory("x".into()).return_code(), 3);
        assert_eq!(CompileError::File("x".into()).return_code(), 4);
        assert_eq!(CompileError::identifier("f", pos, "x").return_code(), 5);
        assert_eq!(CompileError::Compiler("x".into()).return_code(), 6);
    }

    #[test]
    fn test_syntax_error_renders_position() {
        let err = CompileError::syntax("prog.prp", Position::new(3, 14), "Unrecognized token \"@\"");
        let rendered = err.to_string();
        assert!(rendered.contains("[SYNTAX ERROR]"));
        assert!(rendered.contains("prog.prp:3:14"));
    }

    #[test]
    fn test_identifier_error_renders_position() {
        let err = CompileError::identifier("a.prp", Position::new(7, 2), "undeclared");
        assert!(err.to_string().contains("a.prp:7:2"));
    }
}
