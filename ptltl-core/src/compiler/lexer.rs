use crate::error::MonitorError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    True,
    False,
    Enum,
    IntType,
    BoolType,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Semicolon,
    Colon,
    Comma,
    Arrow,
    Not,
    And,
    Or,
    O,
    H,
    S,
    Y,
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Neq,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
    pub col: usize,
}

/// Hand-rolled scanner for the ptLTL spec grammar. `#` begins a line
/// comment; everything else is whitespace-delimited tokens.
pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c == b' ' || c == b'\t' || c == b'\r' || c == b'\n' => {
                    self.advance();
                }
                Some(b'#') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Spanned, MonitorError> {
        self.skip_trivia();
        let (line, col) = (self.line, self.col);
        let Some(c) = self.peek() else {
            return Ok(Spanned {
                token: Token::Eof,
                line,
                col,
            });
        };

        let token = match c {
            b'(' => {
                self.advance();
                Token::LParen
            }
            b')' => {
                self.advance();
                Token::RParen
            }
            b'{' => {
                self.advance();
                Token::LBrace
            }
            b'}' => {
                self.advance();
                Token::RBrace
            }
            b';' => {
                self.advance();
                Token::Semicolon
            }
            b':' => {
                self.advance();
                Token::Colon
            }
            b',' => {
                self.advance();
                Token::Comma
            }
            b'!' => {
                self.advance();
                Token::Not
            }
            b'&' => {
                self.advance();
                Token::And
            }
            b'|' => {
                self.advance();
                Token::Or
            }
            b'-' if self.peek_at(1) == Some(b'>') => {
                self.advance();
                self.advance();
                Token::Arrow
            }
            b'=' if self.peek_at(1) == Some(b'=') => {
                self.advance();
                self.advance();
                Token::Eq
            }
            b'!' if self.peek_at(1) == Some(b'=') => {
                self.advance();
                self.advance();
                Token::Neq
            }
            b'>' if self.peek_at(1) == Some(b'=') => {
                self.advance();
                self.advance();
                Token::Gte
            }
            b'<' if self.peek_at(1) == Some(b'=') => {
                self.advance();
                self.advance();
                Token::Lte
            }
            b'>' => {
                self.advance();
                Token::Gt
            }
            b'<' => {
                self.advance();
                Token::Lt
            }
            c if c.is_ascii_digit() => self.lex_int(),
            c if c.is_ascii_alphabetic() || c == b'_' => self.lex_ident_or_keyword(),
            other => {
                return Err(MonitorError::SpecParse {
                    line,
                    col,
                    message: format!("unexpected character `{}`", other as char),
                });
            }
        };

        Ok(Spanned { token, line, col })
    }

    fn lex_int(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        Token::Int(text.parse().unwrap_or(0))
    }

    fn lex_ident_or_keyword(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.advance();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        match text {
            "true" => Token::True,
            "false" => Token::False,
            "enum" => Token::Enum,
            "int" => Token::IntType,
            "bool" => Token::BoolType,
            // O/H/S/Y are reserved keywords only as standalone single-letter
            // tokens; a longer identifier starting with one of them (e.g.
            // `Out`, `Session`) lexes as a plain Ident above because the
            // alphanumeric scan already consumed the whole word.
            "O" => Token::O,
            "H" => Token::H,
            "S" => Token::S,
            "Y" => Token::Y,
            _ => Token::Ident(text.to_string()),
        }
    }

    /// Tokenizes the entire input, including a trailing `Eof`.
    pub fn tokenize(src: &str) -> Result<Vec<Spanned>, MonitorError> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token()?;
            let is_eof = tok.token == Token::Eof;
            out.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(out)
    }
}
