use crate::error::{LexError, LexResult};
use crate::token::{lookup_keyword, Span, Token, TokenKind};

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    pub errors: Vec<LexError>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer { source: source.chars().collect(), pos: 0, line: 1, column: 1, errors: Vec::new() }
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn make_token(&self, kind: TokenKind, start: usize, start_col: usize) -> Token {
        let lexeme: String = self.source[start..self.pos].iter().collect();
        Token::new(kind, Span::new(self.line, start_col, start, self.pos), lexeme)
    }

    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            if self.pos >= self.source.len() {
                tokens.push(Token::new(
                    TokenKind::Eof,
                    Span::new(self.line, self.column, self.pos, self.pos),
                    "",
                ));
                break;
            }
            match self.next_token() {
                Ok(tok) => tokens.push(tok),
                Err(e) => self.errors.push(e),
            }
        }
        tokens
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while self.peek() != Some('\n') && self.peek().is_some() {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> LexResult<Token> {
        let start = self.pos;
        let start_col = self.column;
        let ch = self.advance().expect("checked non-empty by caller");

        let kind = match ch {
            '=' => if self.match_char('=') { TokenKind::Eq } else { TokenKind::Assign },
            '!' => if self.match_char('=') { TokenKind::NotEq } else { TokenKind::Bang },
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Asterisk,
            '/' => TokenKind::Slash,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '"' => return self.lex_string(start, start_col),
            c if c.is_ascii_digit() => return self.lex_number(c, start, start_col),
            c if c.is_alphabetic() || c == '_' => return Ok(self.lex_identifier(c, start, start_col)),
            other => {
                return Err(LexError::UnexpectedCharacter {
                    ch: other,
                    span: Span::new(self.line, start_col, start, self.pos),
                })
            }
        };

        Ok(self.make_token(kind, start, start_col))
    }

    fn lex_string(&mut self, start: usize, start_col: usize) -> LexResult<Token> {
        let mut content = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(LexError::UnterminatedString {
                        span: Span::new(self.line, start_col, start, self.pos),
                    })
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some('n') => content.push('\n'),
                        Some('t') => content.push('\t'),
                        Some('\\') => content.push('\\'),
                        Some('"') => content.push('"'),
                        Some(c) => content.push(c),
                        None => {
                            return Err(LexError::UnterminatedString {
                                span: Span::new(self.line, start_col, start, self.pos),
                            })
                        }
                    }
                }
                Some(c) => {
                    content.push(c);
                    self.advance();
                }
            }
        }
        let span = Span::new(self.line, start_col, start, self.pos);
        let lexeme: String = self.source[start..self.pos].iter().collect();
        Ok(Token::new(TokenKind::Str(content), span, lexeme))
    }

    fn lex_number(&mut self, first: char, start: usize, start_col: usize) -> LexResult<Token> {
        let mut raw = String::new();
        raw.push(first);
        while self.peek().map_or(false, |c| c.is_ascii_digit()) {
            raw.push(self.advance().unwrap());
        }
        let val: i64 = raw.parse().map_err(|_| LexError::InvalidNumber {
            raw: raw.clone(),
            span: Span::new(self.line, start_col, start, self.pos),
        })?;
        Ok(self.make_token(TokenKind::Int(val), start, start_col))
    }

    fn lex_identifier(&mut self, first: char, start: usize, start_col: usize) -> Token {
        let mut name = String::new();
        name.push(first);
        while self.peek().map_or(false, |c| c.is_alphanumeric() || c == '_') {
            name.push(self.advance().unwrap());
        }
        let kind = lookup_keyword(&name).unwrap_or_else(|| TokenKind::Ident(name.clone()));
        self.make_token(kind, start, start_col)
    }
}
