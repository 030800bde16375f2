//! Recursive-descent parser with operator-precedence climbing.
//!
//! The parser owns the scanner, the single current token, the symbol table
//! stack, and the IR emitter. Parsing is single-pass: global variable
//! declarations emit straight into the globals sink, and each function
//! declaration is parsed into an AST and emitted before the next one is
//! scanned.

use crate::ast::{ASTNode, NodeValue};
use crate::codegen::CodeGen;
use crate::errors::{CompileError, Position};
use crate::scan::{Scanner, Token, TokenKind};
use crate::symbol_table::SymbolTableStack;
use crate::types::{FunctionParameter, FunctionType, Number, NumberType, Type};

/// Operator precedence. A higher value binds first; everything is
/// left-associative except assignment.
fn operator_precedence(kind: TokenKind) -> Option<u8> {
    match kind {
        TokenKind::Exponent => Some(15),
        TokenKind::Star | TokenKind::Slash => Some(13),
        TokenKind::Plus | TokenKind::Minus => Some(12),
        TokenKind::Lt | TokenKind::Gt | TokenKind::Le | TokenKind::Ge => Some(10),
        TokenKind::Eq | TokenKind::Neq => Some(9),
        TokenKind::And | TokenKind::Nand => Some(6),
        TokenKind::Xor | TokenKind::Xnor => Some(5),
        TokenKind::Or | TokenKind::Nor => Some(4),
        TokenKind::Assign => Some(2),
        _ => None,
    }
}

fn is_condition_operator(kind: TokenKind) -> bool {
    kind.is_comparator() || kind.is_logical_operator()
}

pub struct Parser {
    scanner: Scanner,
    token: Token,
    symbols: SymbolTableStack,
    codegen: CodeGen,
    current_function: Option<String>,
}

impl Parser {
    pub fn new(source: &str, filename: &str) -> Self {
        Parser {
            scanner: Scanner::new(source, filename),
            token: Token::eof(),
            symbols: SymbolTableStack::new_nonempty(),
            codegen: CodeGen::new(),
            current_function: None,
        }
    }

    pub fn codegen_mut(&mut self) -> &mut CodeGen {
        &mut self.codegen
    }

    /// Consume the parser, yielding the main and globals IR sinks.
    pub fn into_sinks(self) -> (String, String) {
        self.codegen.into_sinks()
    }

    fn next_token(&mut self) -> Result<(), CompileError> {
        self.token = self.scanner.scan()?;
        Ok(())
    }

    fn syntax_error(&self, message: impl Into<String>) -> CompileError {
        CompileError::syntax(self.scanner.filename(), self.token.position, message)
    }

    fn syntax_error_at(&self, position: Position, message: impl Into<String>) -> CompileError {
        CompileError::syntax(self.scanner.filename(), position, message)
    }

    fn identifier_error_at(
        &self,
        position: Position,
        message: impl Into<String>,
    ) -> CompileError {
        CompileError::identifier(self.scanner.filename(), position, message)
    }

    /// Ensure the current token is of the given kind, then scan the next one.
    fn match_token(&mut self, kind: TokenKind) -> Result<Token, CompileError> {
        if self.token.kind != kind {
            return Err(self.syntax_error(format!(
                "Expected token \"{}\" but got \"{}\"",
                kind, self.token.kind
            )));
        }
        let token = self.token.clone();
        self.next_token()?;
        Ok(token)
    }

    fn match_identifier(&mut self) -> Result<(String, Position), CompileError> {
        if self.token.kind != TokenKind::Identifier {
            return Err(self.syntax_error(format!(
                "Expected identifier but got \"{}\"",
                self.token.kind
            )));
        }
        let name = self
            .token
            .identifier_name()
            .expect("identifier token has a name")
            .to_string();
        let position = self.token.position;
        self.next_token()?;
        Ok((name, position))
    }

    /// Match a type keyword and its trailing pointer stars. `None` is a bare
    /// `void`.
    fn match_type(&mut self) -> Result<Option<Number>, CompileError> {
        let kind = self.token.kind;
        if !kind.is_type_keyword() {
            return Err(self.syntax_error(format!("Expected type but got \"{}\"", kind)));
        }
        self.next_token()?;

        let mut pointer_depth = 0;
        while self.token.kind == TokenKind::Star {
            pointer_depth += 1;
            self.next_token()?;
        }

        if kind == TokenKind::Void {
            if pointer_depth == 0 {
                return Ok(None);
            }
            return Err(self.syntax_error("Pointers to void are not supported"));
        }

        Ok(Some(Number::new(
            NumberType::from_token(kind)?,
            pointer_depth,
            0,
        )))
    }

    /// Parse a whole program: a sequence of function and global variable
    /// declarations.
    pub fn parse_program(&mut self) -> Result<(), CompileError> {
        self.next_token()?;
        while self.token.kind != TokenKind::Eof {
            self.global_declaration()?;
        }
        Ok(())
    }

    fn global_declaration(&mut self) -> Result<(), CompileError> {
        let type_position = self.token.position;
        let declared = self.match_type()?;
        let (name, name_position) = self.match_identifier()?;

        if self.token.kind == TokenKind::LeftParen {
            return self.function_declaration(declared, name, name_position);
        }

        let Some(number) = declared else {
            return Err(self.syntax_error_at(type_position, "Variables cannot be declared void"));
        };
        self.declare_variable(&name, number, name_position)?;
        self.match_token(TokenKind::Semicolon)?;
        Ok(())
    }

    /// Add a variable to the current scope and declare its global storage.
    ///
    /// Storage is module-wide even for scoped declarations, so the name must
    /// be unused in every visible scope and in every scope that has already
    /// emitted a global.
    fn declare_variable(
        &mut self,
        name: &str,
        number: Number,
        position: Position,
    ) -> Result<(), CompileError> {
        if self.symbols.find(name).is_some() || self.codegen.global_is_declared(name) {
            return Err(self.identifier_error_at(
                position,
                format!("Identifier \"{}\" has already been declared", name),
            ));
        }
        self.symbols
            .peek_mut()
            .add(name, Type::Number(number))
            .map_err(|message| self.identifier_error_at(position, message))?;
        self.codegen.declare_global_variable(name, number)
    }

    /// Parse a variable declaration inside a function body.
    fn variable_declaration(&mut self) -> Result<(), CompileError> {
        tracing::debug!("parsing variable declaration statement");
        let type_position = self.token.position;
        let Some(number) = self.match_type()? else {
            return Err(self.syntax_error_at(type_position, "Variables cannot be declared void"));
        };
        let (name, position) = self.match_identifier()?;
        self.declare_variable(&name, number, position)
    }

    /// Parse a function declaration and emit it. The function is registered
    /// in the global scope before its body parses, so it can call itself.
    fn function_declaration(
        &mut self,
        return_spec: Option<Number>,
        name: String,
        position: Position,
    ) -> Result<(), CompileError> {
        tracing::debug!(function = %name, "parsing function declaration");
        if self.codegen.global_is_declared(&name) {
            return Err(self.identifier_error_at(
                position,
                format!("Identifier \"{}\" has already been declared", name),
            ));
        }
        self.current_function = Some(name.clone());
        self.match_token(TokenKind::LeftParen)?;

        let mut parameters = Vec::new();
        if self.token.kind != TokenKind::RightParen {
            loop {
                let Some(number) = self.match_type()? else {
                    // `(void)` declares an empty parameter list
                    break;
                };
                let (parameter_name, _) = self.match_identifier()?;
                parameters.push(FunctionParameter {
                    number,
                    name: parameter_name,
                });
                if self.token.kind == TokenKind::Comma {
                    self.next_token()?;
                } else {
                    break;
                }
            }
        }
        self.match_token(TokenKind::RightParen)?;

        let return_type = match return_spec {
            None => Type::Void,
            Some(number) => Type::Number(number),
        };
        self.symbols
            .global_mut()
            .add(
                &name,
                Type::Function(FunctionType {
                    return_type: Box::new(return_type),
                    parameters: parameters.clone(),
                }),
            )
            .map_err(|message| self.identifier_error_at(position, message))?;

        // Parameters and body-level declarations share the function scope,
        // which must outlive parsing: emission resolves names through it.
        self.symbols.push();
        for parameter in &parameters {
            self.symbols
                .peek_mut()
                .add(&parameter.name, Type::Number(parameter.number))
                .map_err(|message| self.identifier_error_at(position, message))?;
        }

        let body = self.parse_statements()?;
        let node = ASTNode::new(
            TokenKind::FunctionDeclaration,
            body,
            None,
            None,
            NodeValue::Identifier(name),
            position,
        );
        node.log_level_order();
        self.codegen.emit_function(&node, &mut self.symbols)?;

        self.symbols.pop();
        self.current_function = None;
        Ok(())
    }

    /// Parse a brace-delimited group of statements into a glue chain.
    fn parse_statements(&mut self) -> Result<Option<ASTNode>, CompileError> {
        tracing::debug!("parsing statements");
        self.match_token(TokenKind::LeftBrace)?;

        let mut left: Option<ASTNode> = None;
        loop {
            let mut root = None;
            let mut match_semicolon = true;

            if self.token.kind.is_type_keyword() {
                self.variable_declaration()?;
            } else {
                match self.token.kind {
                    TokenKind::Print => {
                        root = Some(self.print_statement()?);
                    }
                    TokenKind::If => {
                        root = Some(self.if_statement()?);
                        match_semicolon = false;
                    }
                    TokenKind::While => {
                        root = Some(self.while_statement()?);
                        match_semicolon = false;
                    }
                    TokenKind::For => {
                        root = Some(self.for_statement()?);
                        match_semicolon = false;
                    }
                    TokenKind::Return => {
                        root = Some(self.return_statement()?);
                    }
                    TokenKind::RightBrace => {
                        self.next_token()?;
                        return Ok(left);
                    }
                    _ => {
                        root = Some(self.parse_binary_expression(0)?);
                    }
                }
            }

            if match_semicolon {
                self.match_token(TokenKind::Semicolon)?;
            }

            if let Some(root) = root {
                let position = root.position;
                left = Some(match left {
                    None => root,
                    Some(chain) => ASTNode::glue(Some(chain), Some(root), position),
                });
            }
        }
    }

    fn print_statement(&mut self) -> Result<ASTNode, CompileError> {
        tracing::debug!("parsing print statement");
        let position = self.token.position;
        self.match_token(TokenKind::Print)?;
        let expression = self.parse_binary_expression(0)?;
        Ok(ASTNode::unary(
            TokenKind::Print,
            Some(expression),
            NodeValue::None,
            position,
        ))
    }

    /// Parse a condition expression whose root must be a comparison or
    /// logical operator.
    fn condition_expression(&mut self) -> Result<ASTNode, CompileError> {
        let position = self.token.position;
        let condition = self.parse_binary_expression(0)?;
        if !is_condition_operator(condition.kind) {
            return Err(self.syntax_error_at(
                position,
                "Condition clauses must use a logical or comparison operator",
            ));
        }
        Ok(condition)
    }

    fn if_statement(&mut self) -> Result<ASTNode, CompileError> {
        tracing::debug!("parsing if statement");
        let position = self.token.position;
        self.match_token(TokenKind::If)?;
        self.match_token(TokenKind::LeftParen)?;
        let condition = self.condition_expression()?;
        self.match_token(TokenKind::RightParen)?;

        let true_branch = self.parse_statements()?;
        let false_branch = if self.token.kind == TokenKind::Else {
            self.match_token(TokenKind::Else)?;
            self.parse_statements()?
        } else {
            None
        };

        Ok(ASTNode::new(
            TokenKind::If,
            Some(condition),
            true_branch,
            false_branch,
            NodeValue::None,
            position,
        ))
    }

    fn while_statement(&mut self) -> Result<ASTNode, CompileError> {
        tracing::debug!("parsing while statement");
        let position = self.token.position;
        self.match_token(TokenKind::While)?;
        self.match_token(TokenKind::LeftParen)?;
        let condition = self.condition_expression()?;
        self.match_token(TokenKind::RightParen)?;

        let body = self.parse_statements()?;
        let else_body = if self.token.kind == TokenKind::Else {
            tracing::debug!("encountered while-else statement");
            self.match_token(TokenKind::Else)?;
            self.parse_statements()?
        } else {
            None
        };

        Ok(ASTNode::new(
            TokenKind::While,
            Some(condition),
            body,
            else_body,
            NodeValue::None,
            position,
        ))
    }

    /// Parse an assignment expression, as required by the `for` header.
    fn assignment_expression(&mut self) -> Result<ASTNode, CompileError> {
        let position = self.token.position;
        let expression = self.parse_binary_expression(0)?;
        if expression.kind != TokenKind::Assign {
            return Err(self.syntax_error_at(position, "Expected an assignment"));
        }
        Ok(expression)
    }

    /// Parse a `for` statement and desugar it into a `while` loop: the step
    /// runs every iteration, the else block once on normal completion.
    fn for_statement(&mut self) -> Result<ASTNode, CompileError> {
        tracing::debug!("parsing for statement");
        let position = self.token.position;
        self.match_token(TokenKind::For)?;
        self.match_token(TokenKind::LeftParen)?;

        let initializer = self.assignment_expression()?;
        self.match_token(TokenKind::Semicolon)?;
        let condition = self.condition_expression()?;
        self.match_token(TokenKind::Semicolon)?;
        let step = self.assignment_expression()?;
        self.match_token(TokenKind::RightParen)?;

        let body = self.parse_statements()?;
        let else_body = if self.token.kind == TokenKind::Else {
            tracing::debug!("encountered for-else statement");
            self.match_token(TokenKind::Else)?;
            self.parse_statements()?
        } else {
            None
        };

        let loop_body = match body {
            Some(body) => ASTNode::glue(Some(body), Some(step), position),
            None => step,
        };
        let while_node = ASTNode::new(
            TokenKind::While,
            Some(condition),
            Some(loop_body),
            else_body,
            NodeValue::None,
            position,
        );
        Ok(ASTNode::glue(Some(initializer), Some(while_node), position))
    }

    fn return_statement(&mut self) -> Result<ASTNode, CompileError> {
        let position = self.token.position;
        let function_name = self.current_function.clone().ok_or_else(|| {
            CompileError::Compiler("Encountered return outside of a function".to_string())
        })?;
        self.match_token(TokenKind::Return)?;

        let expression = if self.token.kind != TokenKind::Semicolon {
            Some(self.parse_binary_expression(0)?)
        } else {
            None
        };

        Ok(ASTNode::unary(
            TokenKind::Return,
            expression,
            NodeValue::Identifier(function_name),
            position,
        ))
    }

    /// Precedence-climbing expression parser.
    ///
    /// An assignment node stores its rvalue subtree on the left and its
    /// lvalue target on the right.
    fn parse_binary_expression(
        &mut self,
        previous_precedence: u8,
    ) -> Result<ASTNode, CompileError> {
        let mut left = self.prefix_expression()?;

        loop {
            let kind = self.token.kind;
            if matches!(
                kind,
                TokenKind::Semicolon
                    | TokenKind::RightParen
                    | TokenKind::RightBrace
                    | TokenKind::Comma
                    | TokenKind::Eof
            ) {
                break;
            }
            let Some(precedence) = operator_precedence(kind) else {
                return Err(
                    self.syntax_error(format!("Expected operator but got \"{}\"", kind))
                );
            };
            let right_associative = kind == TokenKind::Assign;
            if precedence < previous_precedence
                || (precedence == previous_precedence && !right_associative)
            {
                break;
            }

            let position = self.token.position;
            self.next_token()?;
            let right = self.parse_binary_expression(precedence)?;

            left = if kind == TokenKind::Assign {
                if !matches!(
                    left.kind,
                    TokenKind::Identifier | TokenKind::Dereference
                ) {
                    return Err(self.syntax_error_at(position, "Invalid assignment target"));
                }
                ASTNode::new(
                    TokenKind::Assign,
                    Some(right),
                    None,
                    Some(left),
                    NodeValue::None,
                    position,
                )
            } else {
                ASTNode::new(
                    kind,
                    Some(left),
                    None,
                    Some(right),
                    NodeValue::None,
                    position,
                )
            };
        }

        Ok(left)
    }

    /// Prefix operators: address-of and dereference.
    fn prefix_expression(&mut self) -> Result<ASTNode, CompileError> {
        match self.token.kind {
            TokenKind::Ampersand => {
                let position = self.token.position;
                self.next_token()?;
                let (name, name_position) = self.match_identifier()?;
                let entry = self.symbols.find(&name).ok_or_else(|| {
                    self.identifier_error_at(
                        name_position,
                        format!("Identifier name \"{}\" has not been declared", name),
                    )
                })?;
                if entry.ty.is_function() {
                    return Err(self.syntax_error_at(
                        name_position,
                        format!("Cannot take the address of function \"{}\"", name),
                    ));
                }
                Ok(ASTNode::leaf(
                    TokenKind::Ampersand,
                    NodeValue::Identifier(name),
                    position,
                ))
            }
            TokenKind::Star => {
                let position = self.token.position;
                self.next_token()?;
                let child = self.prefix_expression()?;
                Ok(ASTNode::unary(
                    TokenKind::Dereference,
                    Some(child),
                    NodeValue::None,
                    position,
                ))
            }
            _ => self.primary_expression(),
        }
    }

    /// Terminal expressions: literals, identifiers, calls, parentheses.
    fn primary_expression(&mut self) -> Result<ASTNode, CompileError> {
        let position = self.token.position;
        match self.token.kind {
            TokenKind::IntegerLiteral => {
                let value = self.token.int_value();
                self.next_token()?;
                Ok(ASTNode::leaf(
                    TokenKind::IntegerLiteral,
                    NodeValue::Number(Number::int32(value)),
                    position,
                ))
            }
            TokenKind::LongLiteral => {
                let value = self.token.int_value();
                self.next_token()?;
                Ok(ASTNode::leaf(
                    TokenKind::LongLiteral,
                    NodeValue::Number(Number::int64(value)),
                    position,
                ))
            }
            TokenKind::True | TokenKind::False => {
                let kind = self.token.kind;
                let value = self.token.int_value();
                self.next_token()?;
                Ok(ASTNode::leaf(
                    kind,
                    NodeValue::Number(Number::bool_value(value != 0)),
                    position,
                ))
            }
            TokenKind::Identifier => {
                let name = self
                    .token
                    .identifier_name()
                    .expect("identifier token has a name")
                    .to_string();
                let is_function = match self.symbols.find(&name) {
                    Some(entry) => entry.ty.is_function(),
                    None => {
                        return Err(self.identifier_error_at(
                            position,
                            format!("Identifier name \"{}\" has not been declared", name),
                        ));
                    }
                };
                self.next_token()?;

                if is_function {
                    if self.token.kind != TokenKind::LeftParen {
                        return Err(self.syntax_error(format!(
                            "Expected \"(\" after function name \"{}\"",
                            name
                        )));
                    }
                    return self.function_call_expression(name, position);
                }

                Ok(ASTNode::leaf(
                    TokenKind::Identifier,
                    NodeValue::Identifier(name),
                    position,
                ))
            }
            TokenKind::LeftParen => {
                self.next_token()?;
                let expression = self.parse_binary_expression(0)?;
                self.match_token(TokenKind::RightParen)?;
                Ok(expression)
            }
            other => Err(self.syntax_error(format!("Unexpected token \"{}\"", other))),
        }
    }

    /// Parse a call's argument list and type-check its arity.
    fn function_call_expression(
        &mut self,
        name: String,
        position: Position,
    ) -> Result<ASTNode, CompileError> {
        let expected = self
            .symbols
            .find(&name)
            .and_then(|entry| entry.ty.as_function())
            .map(|function| function.parameters.len())
            .expect("caller checked the function entry");

        self.match_token(TokenKind::LeftParen)?;
        let mut arguments = Vec::new();
        if self.token.kind != TokenKind::RightParen {
            loop {
                arguments.push(self.parse_binary_expression(0)?);
                if self.token.kind == TokenKind::Comma {
                    self.next_token()?;
                } else {
                    break;
                }
            }
        }
        self.match_token(TokenKind::RightParen)?;

        if arguments.len() != expected {
            return Err(self.syntax_error_at(
                position,
                format!(
                    "Incorrect number of arguments to function \"{}\": got {}, expected {}",
                    name,
                    arguments.len(),
                    expected
                ),
            ));
        }

        let mut chain: Option<ASTNode> = None;
        for argument in arguments {
            chain = Some(match chain {
                None => argument,
                Some(existing) => ASTNode::glue(Some(existing), Some(argument), position),
            });
        }

        Ok(ASTNode::new(
            TokenKind::FunctionCall,
            chain,
            None,
            None,
            NodeValue::Identifier(name),
            position,
        ))
    }
}
