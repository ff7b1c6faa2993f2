pub use logos::Span;
use logos::{Lexer, Logos};

fn read_integer(lexer: &mut Lexer<Token>) -> Result<i64, LexerError> {
    lexer
        .slice()
        .parse()
        .map_err(|_| LexerError::IntegerTooBig(Box::from(lexer.slice())))
}

fn read_string(lexer: &mut Lexer<Token>) -> Box<str> {
    // Strings have no escapes, so only the quotes need dropping
    let slice = lexer.slice();
    Box::from(&slice[1..slice.len() - 1])
}

fn unterminated_string(_lexer: &mut Lexer<Token>) -> Result<Box<str>, LexerError> {
    Err(LexerError::UnterminatedString)
}

#[derive(thiserror::Error, Debug, PartialEq, Clone, Default)]
pub enum LexerError {
    #[default]
    #[error("illegal character")]
    Invalid,
    #[error("integer literal too big: {0}")]
    IntegerTooBig(Box<str>),
    #[error("unterminated string literal")]
    UnterminatedString,
}

/// Tokens of the Monkey language.
///
/// Whitespace is skipped by the lexer, so every token produced is significant.
#[derive(Debug, Clone, PartialEq, Logos)]
#[logos(error = LexerError)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("!")]
    Bang,
    #[token("*")]
    Asterisk,
    #[token("/")]
    Slash,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("==")]
    Eq,
    #[token("!=")]
    NotEq,

    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    #[token("fn")]
    Function,
    #[token("let")]
    Let,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("return")]
    Return,
    #[token("true", |_| true)]
    #[token("false", |_| false)]
    Boolean(bool),

    #[regex("[a-zA-Z_]+", |l| Box::from(l.slice()))]
    Identifier(Box<str>),
    #[regex("[0-9]+", read_integer)]
    Integer(i64),
    #[regex(r#""[^"]*""#, read_string)]
    #[regex(r#""[^"]*"#, unterminated_string)]
    String(Box<str>),
}

impl Token {
    pub fn lexer(source: &str) -> Lexer<Self> {
        <Self as Logos>::lexer(source)
    }

    /// A short human-readable description, used in parser diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Token::Assign => "`=`".into(),
            Token::Plus => "`+`".into(),
            Token::Minus => "`-`".into(),
            Token::Bang => "`!`".into(),
            Token::Asterisk => "`*`".into(),
            Token::Slash => "`/`".into(),
            Token::Lt => "`<`".into(),
            Token::Gt => "`>`".into(),
            Token::Eq => "`==`".into(),
            Token::NotEq => "`!=`".into(),
            Token::Comma => "`,`".into(),
            Token::Semicolon => "`;`".into(),
            Token::Colon => "`:`".into(),
            Token::LParen => "`(`".into(),
            Token::RParen => "`)`".into(),
            Token::LBrace => "`{`".into(),
            Token::RBrace => "`}`".into(),
            Token::LBracket => "`[`".into(),
            Token::RBracket => "`]`".into(),
            Token::Function => "`fn`".into(),
            Token::Let => "`let`".into(),
            Token::If => "`if`".into(),
            Token::Else => "`else`".into(),
            Token::Return => "`return`".into(),
            Token::Boolean(b) => format!("`{b}`"),
            Token::Identifier(id) => format!("identifier `{id}`"),
            Token::Integer(i) => format!("integer `{i}`"),
            Token::String(s) => format!("string \"{s}\""),
        }
    }
}
