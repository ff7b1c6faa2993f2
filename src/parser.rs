//! Parsing starts where the lexer dropped off: a Pratt parser that turns the
//! token stream into an [`ast::Program`], collecting every error it runs into
//! instead of stopping at the first one.
use crate::lexer::{LexerError, Span, Token};

use ast::{
    BlockStatement, Expression, FunctionLiteral, InfixOperator, PrefixOperator, Program,
    Statement,
};

pub mod ast;

/// How deeply expressions may nest before parsing gives up
pub const MAX_NESTING: usize = 128;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("{error}")]
    Lexer { error: LexerError, span: Span },
    #[error("expected {expected}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        span: Span,
    },
    #[error("no prefix parse function for {found}")]
    NoPrefixParse { found: String, span: Span },
    #[error("expression nested deeper than {limit} levels")]
    TooDeep { limit: usize, span: Span },
}

impl ParseError {
    /// Byte range in the source this error points at
    pub fn span(&self) -> Span {
        match self {
            ParseError::Lexer { span, .. }
            | ParseError::UnexpectedToken { span, .. }
            | ParseError::NoPrefixParse { span, .. }
            | ParseError::TooDeep { span, .. } => span.clone(),
        }
    }
}

/// Result of parsing a source: the program plus every error encountered.
///
/// Statements that failed to parse are left out of the program.
#[derive(Debug)]
pub struct Parse {
    program: Program,
    errors: Vec<ParseError>,
}

impl Parse {
    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    pub fn into_result(self) -> Result<Program, Vec<ParseError>> {
        if self.errors.is_empty() {
            Ok(self.program)
        } else {
            Err(self.errors)
        }
    }
}

pub fn parse(source: &str) -> Parse {
    Parser::new(source).parse_program()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Equals,
    LessGreater,
    Sum,
    Product,
    Prefix,
    Call,
    Index,
}

fn precedence_of(token: Option<&Token>) -> Precedence {
    match token {
        Some(Token::Eq | Token::NotEq) => Precedence::Equals,
        Some(Token::Lt | Token::Gt) => Precedence::LessGreater,
        Some(Token::Plus | Token::Minus) => Precedence::Sum,
        Some(Token::Asterisk | Token::Slash) => Precedence::Product,
        Some(Token::LParen) => Precedence::Call,
        Some(Token::LBracket) => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

fn infix_operator(token: &Token) -> Option<InfixOperator> {
    Some(match token {
        Token::Plus => InfixOperator::Add,
        Token::Minus => InfixOperator::Subtract,
        Token::Asterisk => InfixOperator::Multiply,
        Token::Slash => InfixOperator::Divide,
        Token::Lt => InfixOperator::LessThan,
        Token::Gt => InfixOperator::GreaterThan,
        Token::Eq => InfixOperator::Equal,
        Token::NotEq => InfixOperator::NotEqual,
        _ => return None,
    })
}

struct Parser {
    tokens: Vec<(Token, Span)>,
    position: usize,
    errors: Vec<ParseError>,
    end: usize,
    depth: usize,
}

impl Parser {
    fn new(source: &str) -> Self {
        let mut tokens = vec![];
        let mut errors = vec![];
        for (token, span) in Token::lexer(source).spanned() {
            match token {
                Ok(token) => tokens.push((token, span)),
                Err(error) => errors.push(ParseError::Lexer { error, span }),
            }
        }

        Self {
            tokens,
            position: 0,
            errors,
            end: source.len(),
            depth: 0,
        }
    }

    fn cur(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|(token, _)| token)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position + 1).map(|(token, _)| token)
    }

    fn span_at(&self, position: usize) -> Span {
        self.tokens
            .get(position)
            .map(|(_, span)| span.clone())
            .unwrap_or(self.end..self.end)
    }

    fn describe_at(&self, position: usize) -> String {
        self.tokens
            .get(position)
            .map(|(token, _)| token.describe())
            .unwrap_or_else(|| "end of input".to_string())
    }

    fn next_token(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn peek_is(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn unexpected_peek(&self, expected: &'static str) -> ParseError {
        ParseError::UnexpectedToken {
            expected,
            found: self.describe_at(self.position + 1),
            span: self.span_at(self.position + 1),
        }
    }

    /// Advances onto the next token only if it is the expected one.
    fn expect_peek(&mut self, token: Token, expected: &'static str) -> Result<(), ParseError> {
        if self.peek_is(&token) {
            self.next_token();
            Ok(())
        } else {
            Err(self.unexpected_peek(expected))
        }
    }

    fn expect_peek_identifier(&mut self) -> Result<Box<str>, ParseError> {
        match self.peek().cloned() {
            Some(Token::Identifier(name)) => {
                self.next_token();
                Ok(name)
            }
            _ => Err(self.unexpected_peek("an identifier")),
        }
    }

    // skip the rest of a broken statement
    fn synchronize(&mut self) {
        while !matches!(self.cur(), Some(Token::Semicolon) | None) {
            self.next_token();
        }
    }

    fn parse_program(mut self) -> Parse {
        let mut program = Program::default();

        while self.cur().is_some() {
            match self.parse_statement() {
                Ok(statement) => program.statements.push(statement),
                Err(error) => {
                    self.errors.push(error);
                    self.synchronize();
                }
            }
            self.next_token();
        }

        Parse {
            program,
            errors: self.errors,
        }
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        match self.cur() {
            Some(Token::Let) => self.parse_let_statement(),
            Some(Token::Return) => self.parse_return_statement(),
            _ => self.parse_expression_statement(),
        }
    }

    fn skip_optional_semicolon(&mut self) {
        if self.peek_is(&Token::Semicolon) {
            self.next_token();
        }
    }

    fn parse_let_statement(&mut self) -> Result<Statement, ParseError> {
        let name = self.expect_peek_identifier()?;
        self.expect_peek(Token::Assign, "`=`")?;
        self.next_token();

        let mut value = self.parse_expression(Precedence::Lowest)?;
        if let Expression::Function(function) = &mut value {
            function.name = Some(name.clone());
        }

        self.skip_optional_semicolon();
        Ok(Statement::Let { name, value })
    }

    fn parse_return_statement(&mut self) -> Result<Statement, ParseError> {
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest)?;
        self.skip_optional_semicolon();
        Ok(Statement::Return(value))
    }

    fn parse_expression_statement(&mut self) -> Result<Statement, ParseError> {
        let expression = self.parse_expression(Precedence::Lowest)?;
        self.skip_optional_semicolon();
        Ok(Statement::Expression(expression))
    }

    fn parse_expression(&mut self, precedence: Precedence) -> Result<Expression, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::TooDeep {
                limit: MAX_NESTING,
                span: self.span_at(self.position),
            });
        }

        self.depth += 1;
        let expression = self.parse_expression_at(precedence);
        self.depth -= 1;
        expression
    }

    fn parse_expression_at(&mut self, precedence: Precedence) -> Result<Expression, ParseError> {
        let mut left = self.parse_prefix()?;

        while !self.peek_is(&Token::Semicolon) && precedence < precedence_of(self.peek()) {
            self.next_token();
            left = self.parse_infix(left)?;
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expression, ParseError> {
        match self.cur().cloned() {
            Some(Token::Identifier(name)) => Ok(Expression::Identifier(name)),
            Some(Token::Integer(value)) => Ok(Expression::Integer(value)),
            Some(Token::String(value)) => Ok(Expression::String(value)),
            Some(Token::Boolean(value)) => Ok(Expression::Boolean(value)),
            Some(Token::Bang) => self.parse_prefix_expression(PrefixOperator::Not),
            Some(Token::Minus) => self.parse_prefix_expression(PrefixOperator::Negate),
            Some(Token::LParen) => {
                self.next_token();
                let expression = self.parse_expression(Precedence::Lowest)?;
                self.expect_peek(Token::RParen, "`)`")?;
                Ok(expression)
            }
            Some(Token::If) => self.parse_if_expression(),
            Some(Token::Function) => self.parse_function_literal(),
            Some(Token::LBracket) => Ok(Expression::Array(
                self.parse_expression_list(Token::RBracket, "`]`")?,
            )),
            Some(Token::LBrace) => self.parse_hash_literal(),
            _ => Err(ParseError::NoPrefixParse {
                found: self.describe_at(self.position),
                span: self.span_at(self.position),
            }),
        }
    }

    fn parse_prefix_expression(
        &mut self,
        operator: PrefixOperator,
    ) -> Result<Expression, ParseError> {
        self.next_token();
        let right = self.parse_expression(Precedence::Prefix)?;
        Ok(Expression::Prefix {
            operator,
            right: Box::new(right),
        })
    }

    fn parse_infix(&mut self, left: Expression) -> Result<Expression, ParseError> {
        match self.cur() {
            Some(Token::LParen) => {
                let arguments = self.parse_expression_list(Token::RParen, "`)`")?;
                Ok(Expression::Call {
                    function: Box::new(left),
                    arguments,
                })
            }
            Some(Token::LBracket) => {
                self.next_token();
                let index = self.parse_expression(Precedence::Lowest)?;
                self.expect_peek(Token::RBracket, "`]`")?;
                Ok(Expression::Index {
                    left: Box::new(left),
                    index: Box::new(index),
                })
            }
            Some(token) => match infix_operator(token) {
                Some(operator) => {
                    let precedence = precedence_of(self.cur());
                    self.next_token();
                    let right = self.parse_expression(precedence)?;
                    Ok(Expression::Infix {
                        left: Box::new(left),
                        operator,
                        right: Box::new(right),
                    })
                }
                None => Ok(left),
            },
            None => Ok(left),
        }
    }

    fn parse_if_expression(&mut self) -> Result<Expression, ParseError> {
        self.expect_peek(Token::LParen, "`(`")?;
        self.next_token();
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(Token::RParen, "`)`")?;
        self.expect_peek(Token::LBrace, "`{`")?;
        let consequence = self.parse_block_statement()?;

        let alternative = if self.peek_is(&Token::Else) {
            self.next_token();
            self.expect_peek(Token::LBrace, "`{`")?;
            Some(self.parse_block_statement()?)
        } else {
            None
        };

        Ok(Expression::If {
            condition: Box::new(condition),
            consequence,
            alternative,
        })
    }

    fn parse_block_statement(&mut self) -> Result<BlockStatement, ParseError> {
        let mut block = BlockStatement::default();
        self.next_token();

        loop {
            match self.cur() {
                Some(Token::RBrace) => return Ok(block),
                None => {
                    return Err(ParseError::UnexpectedToken {
                        expected: "`}`",
                        found: self.describe_at(self.position),
                        span: self.span_at(self.position),
                    })
                }
                Some(_) => {
                    block.statements.push(self.parse_statement()?);
                    self.next_token();
                }
            }
        }
    }

    fn parse_function_literal(&mut self) -> Result<Expression, ParseError> {
        self.expect_peek(Token::LParen, "`(`")?;
        let parameters = self.parse_function_parameters()?;
        self.expect_peek(Token::LBrace, "`{`")?;
        let body = self.parse_block_statement()?;

        Ok(Expression::Function(FunctionLiteral {
            parameters,
            body,
            name: None,
        }))
    }

    fn parse_function_parameters(&mut self) -> Result<Vec<Box<str>>, ParseError> {
        let mut parameters = vec![];

        if self.peek_is(&Token::RParen) {
            self.next_token();
            return Ok(parameters);
        }

        parameters.push(self.expect_peek_identifier()?);
        while self.peek_is(&Token::Comma) {
            self.next_token();
            parameters.push(self.expect_peek_identifier()?);
        }

        self.expect_peek(Token::RParen, "`)`")?;
        Ok(parameters)
    }

    fn parse_expression_list(
        &mut self,
        end: Token,
        expected: &'static str,
    ) -> Result<Vec<Expression>, ParseError> {
        let mut list = vec![];

        if self.peek_is(&end) {
            self.next_token();
            return Ok(list);
        }

        self.next_token();
        list.push(self.parse_expression(Precedence::Lowest)?);
        while self.peek_is(&Token::Comma) {
            self.next_token();
            self.next_token();
            list.push(self.parse_expression(Precedence::Lowest)?);
        }

        self.expect_peek(end, expected)?;
        Ok(list)
    }

    fn parse_hash_literal(&mut self) -> Result<Expression, ParseError> {
        let mut pairs = vec![];

        while !self.peek_is(&Token::RBrace) {
            self.next_token();
            let key = self.parse_expression(Precedence::Lowest)?;
            self.expect_peek(Token::Colon, "`:`")?;
            self.next_token();
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));

            if !self.peek_is(&Token::RBrace) {
                self.expect_peek(Token::Comma, "`,` or `}`")?;
            }
        }

        self.expect_peek(Token::RBrace, "`}`")?;
        Ok(Expression::Hash(pairs))
    }
}
