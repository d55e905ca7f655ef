//! Token and punctuator/keyword vocabulary for the ES5.1 lexer.

use crate::source_loc::SourceSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Punctuator {
    #[strum(serialize = "{")]
    LBrace,
    #[strum(serialize = "}")]
    RBrace,
    #[strum(serialize = "(")]
    LParen,
    #[strum(serialize = ")")]
    RParen,
    #[strum(serialize = "[")]
    LBracket,
    #[strum(serialize = "]")]
    RBracket,
    #[strum(serialize = ".")]
    Dot,
    #[strum(serialize = ";")]
    Semicolon,
    #[strum(serialize = ",")]
    Comma,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = "<=")]
    LtEq,
    #[strum(serialize = ">=")]
    GtEq,
    #[strum(serialize = "==")]
    EqEq,
    #[strum(serialize = "!=")]
    NotEq,
    #[strum(serialize = "===")]
    EqEqEq,
    #[strum(serialize = "!==")]
    NotEqEq,
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "-")]
    Minus,
    #[strum(serialize = "*")]
    Star,
    #[strum(serialize = "%")]
    Percent,
    #[strum(serialize = "++")]
    PlusPlus,
    #[strum(serialize = "--")]
    MinusMinus,
    #[strum(serialize = "<<")]
    Shl,
    #[strum(serialize = ">>")]
    Shr,
    #[strum(serialize = ">>>")]
    UShr,
    #[strum(serialize = "&")]
    Amp,
    #[strum(serialize = "|")]
    Pipe,
    #[strum(serialize = "^")]
    Caret,
    #[strum(serialize = "!")]
    Bang,
    #[strum(serialize = "~")]
    Tilde,
    #[strum(serialize = "&&")]
    AmpAmp,
    #[strum(serialize = "||")]
    PipePipe,
    #[strum(serialize = "?")]
    Question,
    #[strum(serialize = ":")]
    Colon,
    #[strum(serialize = "=")]
    Eq,
    #[strum(serialize = "+=")]
    PlusEq,
    #[strum(serialize = "-=")]
    MinusEq,
    #[strum(serialize = "*=")]
    StarEq,
    #[strum(serialize = "%=")]
    PercentEq,
    #[strum(serialize = "<<=")]
    ShlEq,
    #[strum(serialize = ">>=")]
    ShrEq,
    #[strum(serialize = ">>>=")]
    UShrEq,
    #[strum(serialize = "&=")]
    AmpEq,
    #[strum(serialize = "|=")]
    PipeEq,
    #[strum(serialize = "^=")]
    CaretEq,
    #[strum(serialize = "/")]
    Slash,
    #[strum(serialize = "/=")]
    SlashEq,
}

impl Punctuator {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Dot => ".",
            Self::Semicolon => ";",
            Self::Comma => ",",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::LtEq => "<=",
            Self::GtEq => ">=",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::EqEqEq => "===",
            Self::NotEqEq => "!==",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Percent => "%",
            Self::PlusPlus => "++",
            Self::MinusMinus => "--",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::UShr => ">>>",
            Self::Amp => "&",
            Self::Pipe => "|",
            Self::Caret => "^",
            Self::Bang => "!",
            Self::Tilde => "~",
            Self::AmpAmp => "&&",
            Self::PipePipe => "||",
            Self::Question => "?",
            Self::Colon => ":",
            Self::Eq => "=",
            Self::PlusEq => "+=",
            Self::MinusEq => "-=",
            Self::StarEq => "*=",
            Self::PercentEq => "%=",
            Self::ShlEq => "<<=",
            Self::ShrEq => ">>=",
            Self::UShrEq => ">>>=",
            Self::AmpEq => "&=",
            Self::PipeEq => "|=",
            Self::CaretEq => "^=",
            Self::Slash => "/",
            Self::SlashEq => "/=",
        }
    }

    /// True for `=`, `+=`, `-=`, ... -- the compound-assignment family that
    /// the parser's assignment-expression level handles uniformly.
    #[must_use]
    pub const fn is_assignment(self) -> bool {
        matches!(
            self,
            Self::Eq
                | Self::PlusEq
                | Self::MinusEq
                | Self::StarEq
                | Self::PercentEq
                | Self::ShlEq
                | Self::ShrEq
                | Self::UShrEq
                | Self::AmpEq
                | Self::PipeEq
                | Self::CaretEq
                | Self::SlashEq
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub enum Keyword {
    Break,
    Case,
    Catch,
    Continue,
    Debugger,
    Default,
    Delete,
    Do,
    Else,
    Finally,
    For,
    Function,
    If,
    In,
    Instanceof,
    New,
    Return,
    Switch,
    This,
    Throw,
    Try,
    Typeof,
    Var,
    Void,
    While,
    With,
    Null,
    True,
    False,
}

impl Keyword {
    #[must_use]
    pub fn from_identifier(text: &str) -> Option<Self> {
        use std::str::FromStr;
        Self::from_str(text).ok()
    }
}

/// Reserved for future ECMAScript editions; unconditionally an error to use
/// as an identifier.
pub const FUTURE_RESERVED_WORDS: &[&str] =
    &["class", "const", "enum", "export", "extends", "import", "super"];

/// Reserved only inside strict-mode code.
pub const FUTURE_STRICT_RESERVED_WORDS: &[&str] = &[
    "implements", "interface", "let", "package", "private", "protected", "public", "static", "yield",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Punctuator(Punctuator),
    Keyword(Keyword),
    Identifier,
    NumericLiteral,
    StringLiteral,
    RegexLiteral,
    FutureReserved,
    FutureStrictReserved,
    Illegal,
    EndOfInput,
}

/// A single lexical token.
///
/// `value` holds the raw lexeme: for identifiers and keywords, the spelling
/// (post `\u` escape decoding); for numbers, the digit text; for strings, the
/// decoded contents (escapes already resolved); for regexes, `/body/flags`
/// verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub span: SourceSpan,
    /// At least one LF/CR/LS/PS (or a line-terminator-containing block
    /// comment) separated this token from the previous one. Drives ASI and
    /// the `return`/`throw`/`break`/`continue`/postfix `++`/`--`
    /// restrictions.
    pub preceded_by_line_terminator: bool,
    /// The lexeme contained a `\u` escape or line continuation. Suppresses
    /// `"use strict"` directive recognition and strict-mode reserved-word
    /// shadowing for escaped identifiers.
    pub contains_escape_sequence: bool,
    /// Numeric literal used a legacy octal form, or string literal contained
    /// an octal escape; rejected by the parser in strict-mode code.
    pub is_legacy_octal: bool,
}

impl Token {
    #[must_use]
    pub fn illegal(span: SourceSpan) -> Self {
        Self {
            kind: TokenKind::Illegal,
            value: String::new(),
            span,
            preceded_by_line_terminator: false,
            contains_escape_sequence: false,
            is_legacy_octal: false,
        }
    }

    #[must_use]
    pub fn end_of_input(span: SourceSpan) -> Self {
        Self {
            kind: TokenKind::EndOfInput,
            value: String::new(),
            span,
            preceded_by_line_terminator: false,
            contains_escape_sequence: false,
            is_legacy_octal: false,
        }
    }

    #[must_use]
    pub fn is_punctuator(&self, p: Punctuator) -> bool {
        self.kind == TokenKind::Punctuator(p)
    }

    #[must_use]
    pub fn is_keyword(&self, k: Keyword) -> bool {
        self.kind == TokenKind::Keyword(k)
    }

    #[must_use]
    pub fn is_identifier_named(&self, name: &str) -> bool {
        self.kind == TokenKind::Identifier && self.value == name
    }
}
