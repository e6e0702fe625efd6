use super::{ParseError, Spanned};
use chumsky::prelude::*;
use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token<'code> {
    BracketRoundOpen,
    BracketRoundClose,
    BracketCurlyOpen,
    BracketCurlyClose,
    BracketSquareOpen,
    BracketSquareClose,
    Comment(&'code str),
    Number(f64),
    // Raw contents between the quotes, escapes are resolved by the parser.
    Text(&'code str),
    // Raw contents between the backticks.
    Template(&'code str),
    Identifier(&'code str),
    // Punctuation
    Semicolon,
    Comma,
    Colon,
    Dot,
    Ellipsis,
    QuestionDot,
    Question,
    Arrow,
    // Operators
    StrictEqual,
    StrictNotEqual,
    Equal,
    NotEqual,
    LessOrEqual,
    Less,
    GreaterOrEqual,
    Greater,
    And,
    Or,
    Nullish,
    Not,
    Increment,
    Decrement,
    PlusAssign,
    MinusAssign,
    AsteriskAssign,
    SlashAssign,
    PercentAssign,
    NullishAssign,
    Assign,
    Power,
    Plus,
    Minus,
    Asterisk,
    Slash,
    Percent,
    // Keywords
    Let,
    Const,
    Var,
    Function,
    Async,
    Await,
    Return,
    If,
    Else,
    While,
    For,
    Break,
    Continue,
    Throw,
    Try,
    Catch,
    Finally,
    New,
    Typeof,
    In,
    This,
    True,
    False,
    Null,
    Undefined,
    Import,
    Export,
    Default,
}

impl<'code> Token<'code> {
    pub fn into_cow_str(self) -> Cow<'code, str> {
        match self {
            Self::BracketRoundOpen => "(".into(),
            Self::BracketRoundClose => ")".into(),
            Self::BracketCurlyOpen => "{".into(),
            Self::BracketCurlyClose => "}".into(),
            Self::BracketSquareOpen => "[".into(),
            Self::BracketSquareClose => "]".into(),
            Self::Comment(comment) => comment.into(),
            Self::Number(number) => number.to_string().into(),
            Self::Text(text) => format!("'{text}'").into(),
            Self::Template(text) => format!("`{text}`").into(),
            Self::Identifier(identifier) => identifier.into(),
            Self::Semicolon => ";".into(),
            Self::Comma => ",".into(),
            Self::Colon => ":".into(),
            Self::Dot => ".".into(),
            Self::Ellipsis => "...".into(),
            Self::QuestionDot => "?.".into(),
            Self::Question => "?".into(),
            Self::Arrow => "=>".into(),
            Self::StrictEqual => "===".into(),
            Self::StrictNotEqual => "!==".into(),
            Self::Equal => "==".into(),
            Self::NotEqual => "!=".into(),
            Self::LessOrEqual => "<=".into(),
            Self::Less => "<".into(),
            Self::GreaterOrEqual => ">=".into(),
            Self::Greater => ">".into(),
            Self::And => "&&".into(),
            Self::Or => "||".into(),
            Self::Nullish => "??".into(),
            Self::Not => "!".into(),
            Self::Increment => "++".into(),
            Self::Decrement => "--".into(),
            Self::PlusAssign => "+=".into(),
            Self::MinusAssign => "-=".into(),
            Self::AsteriskAssign => "*=".into(),
            Self::SlashAssign => "/=".into(),
            Self::PercentAssign => "%=".into(),
            Self::NullishAssign => "??=".into(),
            Self::Assign => "=".into(),
            Self::Power => "**".into(),
            Self::Plus => "+".into(),
            Self::Minus => "-".into(),
            Self::Asterisk => "*".into(),
            Self::Slash => "/".into(),
            Self::Percent => "%".into(),
            keyword => keyword
                .keyword_text()
                .map(Cow::Borrowed)
                .unwrap_or_else(|| format!("{keyword:?}").into()),
        }
    }

    pub fn keyword_text(&self) -> Option<&'static str> {
        Some(match self {
            Self::Let => "let",
            Self::Const => "const",
            Self::Var => "var",
            Self::Function => "function",
            Self::Async => "async",
            Self::Await => "await",
            Self::Return => "return",
            Self::If => "if",
            Self::Else => "else",
            Self::While => "while",
            Self::For => "for",
            Self::Break => "break",
            Self::Continue => "continue",
            Self::Throw => "throw",
            Self::Try => "try",
            Self::Catch => "catch",
            Self::Finally => "finally",
            Self::New => "new",
            Self::Typeof => "typeof",
            Self::In => "in",
            Self::This => "this",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::Undefined => "undefined",
            Self::Import => "import",
            Self::Export => "export",
            Self::Default => "default",
            _ => return None,
        })
    }

    /// Identifiers and keywords may both appear after `.` and as object keys.
    pub fn property_name(&self) -> Option<&'code str> {
        match self {
            Self::Identifier(identifier) => Some(identifier),
            keyword => keyword.keyword_text(),
        }
    }

    /// Literals, names and the keywords that open a statement.
    pub fn is_operand(&self) -> bool {
        matches!(
            self,
            Self::Number(_)
                | Self::Text(_)
                | Self::Template(_)
                | Self::Identifier(_)
                | Self::This
                | Self::True
                | Self::False
                | Self::Null
                | Self::Undefined
                | Self::Let
                | Self::Const
                | Self::Var
                | Self::Function
                | Self::Async
                | Self::Return
                | Self::If
                | Self::Else
                | Self::While
                | Self::For
                | Self::Break
                | Self::Continue
                | Self::Throw
                | Self::Try
                | Self::Catch
                | Self::Finally
                | Self::Import
                | Self::Export
                | Self::Default
        )
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.into_cow_str())
    }
}

fn keyword_or_identifier(identifier: &str) -> Token<'_> {
    match identifier {
        "let" => Token::Let,
        "const" => Token::Const,
        "var" => Token::Var,
        "function" => Token::Function,
        "async" => Token::Async,
        "await" => Token::Await,
        "return" => Token::Return,
        "if" => Token::If,
        "else" => Token::Else,
        "while" => Token::While,
        "for" => Token::For,
        "break" => Token::Break,
        "continue" => Token::Continue,
        "throw" => Token::Throw,
        "try" => Token::Try,
        "catch" => Token::Catch,
        "finally" => Token::Finally,
        "new" => Token::New,
        "typeof" => Token::Typeof,
        "in" => Token::In,
        "this" => Token::This,
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        "undefined" => Token::Undefined,
        "import" => Token::Import,
        "export" => Token::Export,
        "default" => Token::Default,
        identifier => Token::Identifier(identifier),
    }
}

pub fn lexer<'code>()
-> impl Parser<'code, &'code str, Vec<Spanned<Token<'code>>>, extra::Err<ParseError<'code, char>>> {
    let bracket = choice((
        just('(').to(Token::BracketRoundOpen),
        just(')').to(Token::BracketRoundClose),
        just('{').to(Token::BracketCurlyOpen),
        just('}').to(Token::BracketCurlyClose),
        just('[').to(Token::BracketSquareOpen),
        just(']').to(Token::BracketSquareClose),
    ));

    let line_comment = just("//")
        .ignore_then(none_of('\n').repeated())
        .to_slice()
        .map(Token::Comment);

    let block_comment = just("/*")
        .ignore_then(any().and_is(just("*/").not()).repeated())
        .then_ignore(just("*/"))
        .to_slice()
        .map(Token::Comment);

    let comment = line_comment.or(block_comment);

    let number = text::int(10)
        .then(just('.').then(text::digits(10)).or_not())
        .then(
            one_of("eE")
                .then(one_of("+-").or_not())
                .then(text::digits(10))
                .or_not(),
        )
        .to_slice()
        .from_str()
        .unwrapped()
        .map(Token::Number);

    let escape = just('\\').then(any()).ignored();

    let double_quoted = just('"')
        .ignore_then(
            escape
                .clone()
                .or(none_of("\\\"\n").ignored())
                .repeated()
                .to_slice(),
        )
        .then_ignore(just('"'))
        .map(Token::Text);

    let single_quoted = just('\'')
        .ignore_then(
            escape
                .clone()
                .or(none_of("\\'\n").ignored())
                .repeated()
                .to_slice(),
        )
        .then_ignore(just('\''))
        .map(Token::Text);

    let template = just('`')
        .ignore_then(escape.or(none_of("\\`").ignored()).repeated().to_slice())
        .then_ignore(just('`'))
        .map(Token::Template);

    // Longest operators first.
    let operator = choice((
        choice((
            just("===").to(Token::StrictEqual),
            just("!==").to(Token::StrictNotEqual),
            just("...").to(Token::Ellipsis),
            just("??=").to(Token::NullishAssign),
            just("**").to(Token::Power),
            just("=>").to(Token::Arrow),
            just("==").to(Token::Equal),
            just("!=").to(Token::NotEqual),
            just("<=").to(Token::LessOrEqual),
            just(">=").to(Token::GreaterOrEqual),
            just("&&").to(Token::And),
            just("||").to(Token::Or),
            just("??").to(Token::Nullish),
            just("?.").to(Token::QuestionDot),
        )),
        choice((
            just("++").to(Token::Increment),
            just("--").to(Token::Decrement),
            just("+=").to(Token::PlusAssign),
            just("-=").to(Token::MinusAssign),
            just("*=").to(Token::AsteriskAssign),
            just("/=").to(Token::SlashAssign),
            just("%=").to(Token::PercentAssign),
        )),
        choice((
            just(';').to(Token::Semicolon),
            just(',').to(Token::Comma),
            just(':').to(Token::Colon),
            just('.').to(Token::Dot),
            just('?').to(Token::Question),
            just('=').to(Token::Assign),
            just('<').to(Token::Less),
            just('>').to(Token::Greater),
            just('!').to(Token::Not),
            just('+').to(Token::Plus),
            just('-').to(Token::Minus),
            just('*').to(Token::Asterisk),
            just('/').to(Token::Slash),
            just('%').to(Token::Percent),
        )),
    ));

    let identifier = any()
        .filter(|character: &char| {
            character.is_ascii_alphabetic() || *character == '_' || *character == '$'
        })
        .then(
            any()
                .filter(|character: &char| {
                    character.is_ascii_alphanumeric() || *character == '_' || *character == '$'
                })
                .repeated(),
        )
        .to_slice()
        .map(keyword_or_identifier);

    let token = choice((
        comment,
        bracket,
        number,
        double_quoted,
        single_quoted,
        template,
        operator,
        identifier,
    ));

    token
        .map_with(|token, extra| Spanned {
            node: token,
            span: extra.span(),
        })
        .padded()
        .recover_with(skip_then_retry_until(any().ignored(), end()))
        .repeated()
        .collect()
        .padded()
}
