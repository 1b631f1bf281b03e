use core::fmt;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{char, multispace0, one_of},
    combinator::{map, opt, recognize},
    sequence::pair,
    Err, IResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Identifiers and numbers: letters, digits, `.` and `_` in one run.
    AlphaNum,
    Control,
    QuotedString,
    Eof,
    Error,
}

/// A lexeme of EDTD source. Quoted strings keep their quotes and escapes;
/// error tokens carry the lexical error message as their text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn eof() -> Self {
        Self::new(TokenKind::Eof, "")
    }

    pub fn is(&self, kind: TokenKind, text: &str) -> bool {
        self.kind == kind && self.text == text
    }

    pub fn is_control(&self, text: &str) -> bool {
        self.is(TokenKind::Control, text)
    }

    /// Surfaces a deferred lexical error.
    pub fn as_error(&self) -> Result<(), &str> {
        match self.kind {
            TokenKind::Error => Err(&self.text),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Eof => f.write_str("end of input"),
            _ => write!(f, "'{}'", self.text),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("unterminated quoted string")]
    UnterminatedString,
    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '.' || c == '_'
}

fn line_comment(input: &str) -> IResult<&str, &str, ()> {
    recognize(pair(tag("//"), take_till(|c: char| c == '\n')))(input)
}

fn skip_trivia(mut input: &str) -> &str {
    loop {
        if let Ok((rest, _)) = multispace0::<_, ()>(input) {
            input = rest;
        }
        match line_comment(input) {
            Ok((rest, _)) => input = rest,
            Err(_) => return input,
        }
    }
}

fn alpha_num(input: &str) -> IResult<&str, &str, ()> {
    recognize(pair(opt(char('-')), take_while1(is_word_char)))(input)
}

fn control(input: &str) -> IResult<&str, &str, ()> {
    alt((
        tag(":="),
        tag(">="),
        tag("<="),
        recognize(one_of("{}[]:;,%<>*?+")),
    ))(input)
}

/// Matches a double-quoted string up to the first unescaped `"`. Fails hard
/// (`Err::Failure`) if the string never closes.
fn quoted_string(input: &str) -> IResult<&str, &str, ()> {
    let (body, _) = char::<_, ()>('"')(input)?;

    let mut escaped = false;
    for (i, c) in body.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => {
                let end = 1 + i + c.len_utf8();
                return Ok((&input[end..], &input[..end]));
            }
            _ => {}
        }
    }
    Err(Err::Failure(()))
}

/// Pull-based tokenizer over EDTD source text.
///
/// Lexical errors are returned as `TokenKind::Error` tokens, and the lexer
/// keeps returning that same token afterwards.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    input: &'a str,
    failed: Option<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            failed: None,
        }
    }

    pub fn next_token(&mut self) -> Token {
        if let Some(token) = &self.failed {
            return token.clone();
        }

        self.input = skip_trivia(self.input);
        if self.input.is_empty() {
            return Token::eof();
        }

        let result = alt((
            map(quoted_string, |s| (TokenKind::QuotedString, s)),
            map(alpha_num, |s| (TokenKind::AlphaNum, s)),
            map(control, |s| (TokenKind::Control, s)),
        ))(self.input);

        match result {
            Ok((rest, (kind, text))) => {
                self.input = rest;
                Token::new(kind, text)
            }
            Err(Err::Failure(())) => self.fail(LexError::UnterminatedString),
            Err(_) => {
                let found = self.input.chars().next().unwrap_or('\0');
                self.fail(LexError::UnexpectedCharacter(found))
            }
        }
    }

    fn fail(&mut self, error: LexError) -> Token {
        let token = Token::new(TokenKind::Error, error.to_string());
        self.failed = Some(token.clone());
        token
    }
}
