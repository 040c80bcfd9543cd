use crate::lexer::cursor::Cursor;
use crate::symbol::{Span, SrcOffset};

pub mod cursor;

/// A 'light' token that only carries its kind and location.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Token { kind, span }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    /// Mnemonics, registers and label names
    Ident,
    /// Anything that starts like a number: `12`, `-3`, `#5`, `$FF`, `0x1F`, `0b101`
    Lit,
    /// Ends a label definition
    Colon,
    Comma,
    Comment,
    /// Spaces and tabs, never newlines
    Whitespace,
    Newline,
    Unknown,
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TokenKind::Ident => "identifier",
            TokenKind::Lit => "numeric literal",
            TokenKind::Colon => "colon",
            TokenKind::Comma => "comma",
            TokenKind::Comment => "comment",
            TokenKind::Whitespace => "whitespace",
            TokenKind::Newline => "newline",
            TokenKind::Unknown => "unknown",
            TokenKind::Eof => "end of file",
        };
        f.write_str(name)
    }
}

/// Iterate over every token in the input, including whitespace and comments.
pub fn tokenize(input: &str) -> impl Iterator<Item = Token> + '_ {
    let mut cursor = Cursor::new(input);
    std::iter::from_fn(move || {
        let token = cursor.advance_token();
        if token.kind != TokenKind::Eof {
            Some(token)
        } else {
            None
        }
    })
}

/// Test if a character is considered to be whitespace. Newlines are significant.
pub(crate) fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r')
}

/// Test if a character can start an identifier.
pub(crate) fn is_id_start(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '_' | '.')
}

/// Test if a character can continue an identifier or literal.
pub(crate) fn is_id(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '.')
}

impl Cursor<'_> {
    pub fn advance_token(&mut self) -> Token {
        let first_char = match self.bump() {
            Some(c) => c,
            None => {
                return Token::new(
                    TokenKind::Eof,
                    Span::new(SrcOffset(self.token_start()), 0),
                )
            }
        };
        let token_kind = match first_char {
            ';' => {
                self.take_while(|c| c != '\n');
                TokenKind::Comment
            }
            '\n' => TokenKind::Newline,
            c if is_whitespace(c) => {
                self.take_while(is_whitespace);
                TokenKind::Whitespace
            }
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            // Immediate marker and negative sign may prefix any literal
            '#' | '-' => {
                if self.first() == '-' {
                    self.bump();
                }
                if self.first() == '$' {
                    self.bump();
                }
                self.take_while(is_id);
                TokenKind::Lit
            }
            '$' | '0'..='9' => {
                self.take_while(is_id);
                TokenKind::Lit
            }
            c if is_id_start(c) => {
                self.take_while(is_id);
                TokenKind::Ident
            }
            _ => TokenKind::Unknown,
        };
        let res = Token::new(
            token_kind,
            Span::new(SrcOffset(self.token_start()), self.pos_in_token()),
        );
        self.reset_pos();
        res
    }
}
