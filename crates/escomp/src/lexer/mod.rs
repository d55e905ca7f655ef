//! Tokenizes ES5.1 source text.
//!
//! The lexer is a straightforward longest-match scanner over
//! [`UnicodeStream`](crate::unicode_stream::UnicodeStream) code points. It
//! does not know about expression grammar: disambiguating `/` as division
//! versus the start of a regex literal is the parser's job, exercised
//! through [`Lexer::next_as_regex`].

pub mod token;

use token::{
    FUTURE_RESERVED_WORDS, FUTURE_STRICT_RESERVED_WORDS, Keyword, Punctuator, Token, TokenKind,
};
use unicode_xid::UnicodeXID;

use crate::source_loc::SourceSpan;
use crate::unicode_stream::{END_OF_INPUT, UnicodeStream};

const LF: u32 = 0x000A;
const CR: u32 = 0x000D;
const LS: u32 = 0x2028;
const PS: u32 = 0x2029;
const TAB: u32 = 0x0009;
const VT: u32 = 0x000B;
const FF: u32 = 0x000C;
const NBSP: u32 = 0x00A0;
const BOM: u32 = 0xFEFF;

fn is_line_terminator(c: u32) -> bool {
    matches!(c, LF | CR | LS | PS)
}

fn is_whitespace(c: u32) -> bool {
    matches!(c, 0x0020 | TAB | VT | FF | NBSP | BOM)
}

fn char_of(c: u32) -> Option<char> {
    char::from_u32(c)
}

fn is_identifier_start(c: u32) -> bool {
    c == u32::from(b'$') || c == u32::from(b'_') || char_of(c).is_some_and(UnicodeXID::is_xid_start)
}

fn is_identifier_continue(c: u32) -> bool {
    c == u32::from(b'$') || c == u32::from(b'_') || char_of(c).is_some_and(UnicodeXID::is_xid_continue)
}

fn is_decimal_digit(c: u32) -> bool {
    (u32::from(b'0')..=u32::from(b'9')).contains(&c)
}

fn is_hex_digit(c: u32) -> bool {
    is_decimal_digit(c) || (u32::from(b'a')..=u32::from(b'f')).contains(&(c | 0x20))
}

fn is_octal_digit(c: u32) -> bool {
    (u32::from(b'0')..=u32::from(b'7')).contains(&c)
}

/// Tokenizer over a single source file.
pub struct Lexer {
    stream: UnicodeStream,
    /// Arbitrary-depth push-back stack for speculative parses.
    pushed: Vec<Token>,
}

impl Lexer {
    #[must_use]
    pub fn new(source: &str) -> Self {
        Self {
            stream: UnicodeStream::from_str(source),
            pushed: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            stream: UnicodeStream::new(bytes),
            pushed: Vec::new(),
        }
    }

    /// Returns the next token, consuming it.
    pub fn next_token(&mut self) -> Token {
        if let Some(t) = self.pushed.pop() {
            return t;
        }
        self.scan_token()
    }

    /// One-token lookahead without consuming.
    pub fn peek(&mut self) -> Token {
        let t = self.next_token();
        self.pushed.push(t.clone());
        t
    }

    /// Pushes a token back so the next `next_token` call returns it again.
    /// Supports arbitrary depth for speculative parses.
    pub fn push_back(&mut self, token: Token) {
        self.pushed.push(token);
    }

    /// Re-lexes starting from `token`'s span as a `RegularExpressionLiteral`.
    ///
    /// Must only be called when `token` is a `/` or `/=` punctuator and the
    /// grammatical context expects a primary expression (the parser is
    /// responsible for that judgment; the lexer just rewinds and rescans).
    pub fn next_as_regex(&mut self, token: &Token) -> Token {
        debug_assert!(token.is_punctuator(Punctuator::Slash) || token.is_punctuator(Punctuator::SlashEq));
        self.stream.seek(token.span.begin as usize);
        self.scan_regex(token.preceded_by_line_terminator)
    }

    fn scan_token(&mut self) -> Token {
        let lt = self.skip_whitespace_and_comments();
        let begin = self.stream.position();
        let c = self.stream.next();
        if c == END_OF_INPUT {
            return self.finish(TokenKind::EndOfInput, String::new(), begin, lt, false, false);
        }
        if is_identifier_start(c) || c == u32::from(b'\\') {
            self.stream.push();
            return self.scan_identifier_or_keyword(begin, lt);
        }
        if is_decimal_digit(c) {
            self.stream.push();
            return self.scan_number(begin, lt);
        }
        if c == u32::from(b'.') {
            let next = self.stream.next();
            self.stream.push();
            if is_decimal_digit(next) {
                self.stream.push();
                return self.scan_number(begin, lt);
            }
        }
        if c == u32::from(b'\'') || c == u32::from(b'"') {
            return self.scan_string(c, begin, lt);
        }
        self.stream.push();
        self.scan_punctuator(begin, lt)
    }

    fn finish(
        &self,
        kind: TokenKind,
        value: String,
        begin: usize,
        lt: bool,
        escape: bool,
        octal: bool,
    ) -> Token {
        Token {
            kind,
            value,
            span: SourceSpan::new(begin as u32, self.stream.position() as u32),
            preceded_by_line_terminator: lt,
            contains_escape_sequence: escape,
            is_legacy_octal: octal,
        }
    }

    /// Consumes whitespace and comments, returning whether at least one line
    /// terminator (including inside a block comment) was skipped.
    fn skip_whitespace_and_comments(&mut self) -> bool {
        let mut saw_lt = false;
        loop {
            let c = self.stream.next();
            if c == END_OF_INPUT {
                self.stream.push();
                return saw_lt;
            }
            if is_line_terminator(c) {
                saw_lt = true;
                continue;
            }
            if is_whitespace(c) {
                continue;
            }
            if c == u32::from(b'/') {
                let follow = self.stream.next();
                if follow == u32::from(b'/') {
                    while !is_line_terminator(self.stream.next()) {
                        if self.stream.is_at_end() {
                            break;
                        }
                    }
                    self.stream.push();
                    continue;
                } else if follow == u32::from(b'*') {
                    loop {
                        let inner = self.stream.next();
                        if inner == END_OF_INPUT {
                            break;
                        }
                        if is_line_terminator(inner) {
                            saw_lt = true;
                            continue;
                        }
                        if inner == u32::from(b'*') {
                            let maybe_slash = self.stream.next();
                            if maybe_slash == u32::from(b'/') {
                                break;
                            }
                            self.stream.push();
                        }
                    }
                    continue;
                }
                self.stream.push();
                self.stream.push();
                return saw_lt;
            }
            self.stream.push();
            return saw_lt;
        }
    }

    fn scan_identifier_or_keyword(&mut self, begin: usize, lt: bool) -> Token {
        let mut text = String::new();
        let mut contains_escape = false;
        loop {
            let c = self.stream.next();
            if c == u32::from(b'\\') {
                let u = self.stream.next();
                if u != u32::from(b'u') {
                    self.stream.push();
                    self.stream.push();
                    break;
                }
                let mut code = 0u32;
                let mut ok = true;
                for _ in 0..4 {
                    let d = self.stream.next();
                    match hex_value(d) {
                        Some(v) => code = code * 16 + v,
                        None => {
                            ok = false;
                            break;
                        }
                    }
                }
                if !ok {
                    return Token::illegal(SourceSpan::new(begin as u32, self.stream.position() as u32));
                }
                contains_escape = true;
                let is_start = text.is_empty();
                let valid = if is_start { is_identifier_start(code) } else { is_identifier_continue(code) };
                if !valid {
                    return Token::illegal(SourceSpan::new(begin as u32, self.stream.position() as u32));
                }
                if let Some(ch) = char_of(code) {
                    text.push(ch);
                }
                continue;
            }
            let is_start = text.is_empty();
            let valid = if is_start { is_identifier_start(c) } else { is_identifier_continue(c) };
            if !valid {
                self.stream.push();
                break;
            }
            if let Some(ch) = char_of(c) {
                text.push(ch);
            }
        }

        let kind = if contains_escape {
            TokenKind::Identifier
        } else if let Some(kw) = Keyword::from_identifier(&text) {
            TokenKind::Keyword(kw)
        } else if FUTURE_RESERVED_WORDS.contains(&text.as_str()) {
            TokenKind::FutureReserved
        } else if FUTURE_STRICT_RESERVED_WORDS.contains(&text.as_str()) {
            TokenKind::FutureStrictReserved
        } else {
            TokenKind::Identifier
        };
        self.finish(kind, text, begin, lt, contains_escape, false)
    }

    fn scan_number(&mut self, begin: usize, lt: bool) -> Token {
        let mut text = String::new();
        let mut is_octal = false;

        let first = self.stream.next();
        text.push(char_of(first).unwrap_or('0'));

        if first == u32::from(b'0') {
            let second = self.stream.next();
            if second == u32::from(b'x') || second == u32::from(b'X') {
                text.push(char_of(second).unwrap());
                let mut any = false;
                loop {
                    let c = self.stream.next();
                    if is_hex_digit(c) {
                        text.push(char_of(c).unwrap());
                        any = true;
                    } else {
                        self.stream.push();
                        break;
                    }
                }
                if !any {
                    return Token::illegal(SourceSpan::new(begin as u32, self.stream.position() as u32));
                }
                return self.finish(TokenKind::NumericLiteral, text, begin, lt, false, false);
            }
            self.stream.push();
            // Possible legacy octal: 0 followed only by octal digits, no
            // '.', no exponent, no 8/9.
            let mut lookahead = Vec::new();
            loop {
                let c = self.stream.next();
                if is_decimal_digit(c) {
                    lookahead.push(c);
                } else {
                    self.stream.push();
                    break;
                }
            }
            if !lookahead.is_empty() && lookahead.iter().all(|&c| is_octal_digit(c)) {
                for c in &lookahead {
                    text.push(char_of(*c).unwrap());
                }
                is_octal = true;
                return self.finish(TokenKind::NumericLiteral, text, begin, lt, false, is_octal);
            }
            for c in &lookahead {
                text.push(char_of(*c).unwrap());
            }
            // Fall through to decimal scanning (leading-zero decimal, or a
            // digit sequence containing 8/9 -- not octal).
        }

        loop {
            let c = self.stream.next();
            if is_decimal_digit(c) {
                text.push(char_of(c).unwrap());
            } else {
                self.stream.push();
                break;
            }
        }
        let dot = self.stream.next();
        if dot == u32::from(b'.') {
            text.push('.');
            loop {
                let c = self.stream.next();
                if is_decimal_digit(c) {
                    text.push(char_of(c).unwrap());
                } else {
                    self.stream.push();
                    break;
                }
            }
        } else {
            self.stream.push();
        }
        let e = self.stream.next();
        if e == u32::from(b'e') || e == u32::from(b'E') {
            let mut exp = String::new();
            exp.push(char_of(e).unwrap());
            let sign = self.stream.next();
            if sign == u32::from(b'+') || sign == u32::from(b'-') {
                exp.push(char_of(sign).unwrap());
            } else {
                self.stream.push();
            }
            let mut any = false;
            loop {
                let c = self.stream.next();
                if is_decimal_digit(c) {
                    exp.push(char_of(c).unwrap());
                    any = true;
                } else {
                    self.stream.push();
                    break;
                }
            }
            if any {
                text.push_str(&exp);
            } else {
                // Not actually an exponent; push everything back.
                for _ in 0..exp.len() {
                    self.stream.push();
                }
            }
        } else {
            self.stream.push();
        }
        self.finish(TokenKind::NumericLiteral, text, begin, lt, false, is_octal)
    }

    fn scan_string(&mut self, quote: u32, begin: usize, lt: bool) -> Token {
        let mut text = String::new();
        let mut contains_escape = false;
        let mut is_octal = false;
        loop {
            let c = self.stream.next();
            if c == END_OF_INPUT || is_line_terminator(c) {
                return Token::illegal(SourceSpan::new(begin as u32, self.stream.position() as u32));
            }
            if c == quote {
                break;
            }
            if c == u32::from(b'\\') {
                let esc = self.stream.next();
                if is_line_terminator(esc) {
                    // Line continuation: consumed, contributes nothing.
                    contains_escape = true;
                    continue;
                }
                contains_escape = true;
                match char_of(esc) {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('b') => text.push('\u{8}'),
                    Some('f') => text.push('\u{C}'),
                    Some('v') => text.push('\u{B}'),
                    Some('x') => {
                        let mut code = 0u32;
                        for _ in 0..2 {
                            let d = self.stream.next();
                            match hex_value(d) {
                                Some(v) => code = code * 16 + v,
                                None => {
                                    return Token::illegal(SourceSpan::new(
                                        begin as u32,
                                        self.stream.position() as u32,
                                    ));
                                }
                            }
                        }
                        if let Some(ch) = char_of(code) {
                            text.push(ch);
                        }
                    }
                    Some('u') => {
                        let mut code = 0u32;
                        for _ in 0..4 {
                            let d = self.stream.next();
                            match hex_value(d) {
                                Some(v) => code = code * 16 + v,
                                None => {
                                    return Token::illegal(SourceSpan::new(
                                        begin as u32,
                                        self.stream.position() as u32,
                                    ));
                                }
                            }
                        }
                        if let Some(ch) = char_of(code) {
                            text.push(ch);
                        }
                    }
                    Some(d) if d.is_ascii_digit() && d != '8' && d != '9' => {
                        is_octal = true;
                        let mut value = d.to_digit(8).unwrap();
                        for _ in 0..2 {
                            let next = self.stream.next();
                            if is_octal_digit(next) {
                                value = value * 8 + (next - u32::from(b'0'));
                            } else {
                                self.stream.push();
                                break;
                            }
                        }
                        if let Some(ch) = char::from_u32(value) {
                            text.push(ch);
                        }
                    }
                    Some(other) => text.push(other),
                    None => {}
                }
                continue;
            }
            if let Some(ch) = char_of(c) {
                text.push(ch);
            }
        }
        self.finish(TokenKind::StringLiteral, text, begin, lt, contains_escape, is_octal)
    }

    fn scan_regex(&mut self, lt: bool) -> Token {
        let begin = self.stream.position();
        let slash = self.stream.next();
        debug_assert_eq!(slash, u32::from(b'/'));
        let mut text = String::from("/");
        let mut in_class = false;
        loop {
            let c = self.stream.next();
            if c == END_OF_INPUT || is_line_terminator(c) {
                return Token::illegal(SourceSpan::new(begin as u32, self.stream.position() as u32));
            }
            if c == u32::from(b'\\') {
                text.push('\\');
                let next = self.stream.next();
                if next == END_OF_INPUT || is_line_terminator(next) {
                    return Token::illegal(SourceSpan::new(begin as u32, self.stream.position() as u32));
                }
                if let Some(ch) = char_of(next) {
                    text.push(ch);
                }
                continue;
            }
            if c == u32::from(b'[') {
                in_class = true;
            } else if c == u32::from(b']') {
                in_class = false;
            } else if c == u32::from(b'/') && !in_class {
                text.push('/');
                break;
            }
            if let Some(ch) = char_of(c) {
                text.push(ch);
            }
        }
        loop {
            let c = self.stream.next();
            if is_identifier_continue(c) {
                if let Some(ch) = char_of(c) {
                    text.push(ch);
                }
            } else {
                self.stream.push();
                break;
            }
        }
        self.finish(TokenKind::RegexLiteral, text, begin, lt, false, false)
    }

    fn scan_punctuator(&mut self, begin: usize, lt: bool) -> Token {
        use Punctuator as P;
        let c = self.stream.next();
        let c1 = self.stream.next();
        let c2 = self.stream.next();
        let c3 = self.stream.next();

        macro_rules! two {
            ($ch:expr) => {
                c1 == u32::from($ch as u8)
            };
        }

        let (punct, len) = match char_of(c) {
            Some('{') => (P::LBrace, 1),
            Some('}') => (P::RBrace, 1),
            Some('(') => (P::LParen, 1),
            Some(')') => (P::RParen, 1),
            Some('[') => (P::LBracket, 1),
            Some(']') => (P::RBracket, 1),
            Some('.') => (P::Dot, 1),
            Some(';') => (P::Semicolon, 1),
            Some(',') => (P::Comma, 1),
            Some('~') => (P::Tilde, 1),
            Some('?') => (P::Question, 1),
            Some(':') => (P::Colon, 1),
            Some('<') => {
                if two!('<') && c2 == u32::from(b'=') {
                    (P::ShlEq, 3)
                } else if two!('<') {
                    (P::Shl, 2)
                } else if two!('=') {
                    (P::LtEq, 2)
                } else {
                    (P::Lt, 1)
                }
            }
            Some('>') => {
                if two!('>') && c2 == u32::from(b'>') && c3 == u32::from(b'=') {
                    (P::UShrEq, 4)
                } else if two!('>') && c2 == u32::from(b'>') {
                    (P::UShr, 3)
                } else if two!('>') && c2 == u32::from(b'=') {
                    (P::ShrEq, 3)
                } else if two!('>') {
                    (P::Shr, 2)
                } else if two!('=') {
                    (P::GtEq, 2)
                } else {
                    (P::Gt, 1)
                }
            }
            Some('=') => {
                if two!('=') && c2 == u32::from(b'=') {
                    (P::EqEqEq, 3)
                } else if two!('=') {
                    (P::EqEq, 2)
                } else {
                    (P::Eq, 1)
                }
            }
            Some('!') => {
                if two!('=') && c2 == u32::from(b'=') {
                    (P::NotEqEq, 3)
                } else if two!('=') {
                    (P::NotEq, 2)
                } else {
                    (P::Bang, 1)
                }
            }
            Some('+') => {
                if two!('+') {
                    (P::PlusPlus, 2)
                } else if two!('=') {
                    (P::PlusEq, 2)
                } else {
                    (P::Plus, 1)
                }
            }
            Some('-') => {
                if two!('-') {
                    (P::MinusMinus, 2)
                } else if two!('=') {
                    (P::MinusEq, 2)
                } else {
                    (P::Minus, 1)
                }
            }
            Some('*') => {
                if two!('=') {
                    (P::StarEq, 2)
                } else {
                    (P::Star, 1)
                }
            }
            Some('%') => {
                if two!('=') {
                    (P::PercentEq, 2)
                } else {
                    (P::Percent, 1)
                }
            }
            Some('&') => {
                if two!('&') {
                    (P::AmpAmp, 2)
                } else if two!('=') {
                    (P::AmpEq, 2)
                } else {
                    (P::Amp, 1)
                }
            }
            Some('|') => {
                if two!('|') {
                    (P::PipePipe, 2)
                } else if two!('=') {
                    (P::PipeEq, 2)
                } else {
                    (P::Pipe, 1)
                }
            }
            Some('^') => {
                if two!('=') {
                    (P::CaretEq, 2)
                } else {
                    (P::Caret, 1)
                }
            }
            Some('/') => {
                if two!('=') {
                    (P::SlashEq, 2)
                } else {
                    (P::Slash, 1)
                }
            }
            _ => {
                self.stream.seek(begin);
                self.stream.skip(1);
                return Token::illegal(SourceSpan::new(begin as u32, self.stream.position() as u32));
            }
        };
        // Rewind to just past the punctuator's actual length.
        self.stream.seek(begin + len);
        self.finish(TokenKind::Punctuator(punct), punct.as_str().to_owned(), begin, lt, false, false)
    }
}

fn hex_value(c: u32) -> Option<u32> {
    match c {
        0x30..=0x39 => Some(c - 0x30),
        0x41..=0x46 => Some(c - 0x41 + 10),
        0x61..=0x66 => Some(c - 0x61 + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let t = lexer.next_token();
            let done = t.kind == TokenKind::EndOfInput;
            out.push(t);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn lexes_keywords_and_identifiers() {
        let toks = tokens("var x = foo;");
        assert!(toks[0].is_keyword(Keyword::Var));
        assert_eq!(toks[1].kind, TokenKind::Identifier);
        assert!(toks[2].is_punctuator(Punctuator::Eq));
        assert_eq!(toks[3].value, "foo");
    }

    #[test]
    fn line_terminator_flag_tracks_newlines() {
        let toks = tokens("a\nb");
        assert!(!toks[0].preceded_by_line_terminator);
        assert!(toks[1].preceded_by_line_terminator);
    }

    #[test]
    fn block_comment_with_newline_sets_lt_flag() {
        let toks = tokens("a /* \n */ b");
        assert!(toks[1].preceded_by_line_terminator);
    }

    #[test]
    fn hex_and_octal_numbers() {
        let toks = tokens("0x1F 017 018");
        assert_eq!(toks[0].value, "0x1F");
        assert!(!toks[0].is_legacy_octal);
        assert_eq!(toks[1].value, "017");
        assert!(toks[1].is_legacy_octal);
        assert_eq!(toks[2].value, "018");
        assert!(!toks[2].is_legacy_octal);
    }

    #[test]
    fn string_escapes_set_flag() {
        let toks = tokens(r#"'a\nb'"#);
        assert_eq!(toks[0].value, "a\nb");
        assert!(toks[0].contains_escape_sequence);
    }

    #[test]
    fn escaped_identifier_never_a_keyword() {
        let toks = tokens("\\u0069f");
        assert_eq!(toks[0].kind, TokenKind::Identifier);
        assert_eq!(toks[0].value, "if");
        assert!(toks[0].contains_escape_sequence);
    }

    #[test]
    fn regex_relex_after_slash() {
        let mut lexer = Lexer::new("/ab\\/c/gi");
        let slash = lexer.next_token();
        assert!(slash.is_punctuator(Punctuator::Slash));
        let regex = lexer.next_as_regex(&slash);
        assert_eq!(regex.kind, TokenKind::RegexLiteral);
        assert_eq!(regex.value, "/ab\\/c/gi");
    }

    #[test]
    fn maximal_munch_for_punctuators() {
        let toks = tokens(">>>=");
        assert!(toks[0].is_punctuator(Punctuator::UShrEq));
    }
}
