use std::fmt;

use crate::Error;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Token {
    /// Bare identifier or keyword. Keywords are matched case-insensitively by the parser.
    Word(String),
    /// `"quoted"` or `` `quoted` `` identifier, never a keyword.
    Quoted(String),
    Str(String),
    Number(String),
    /// A `?` placeholder with its zero-based position among all placeholders.
    Placeholder(usize),
    Comma,
    Dot,
    LParen,
    RParen,
    Star,
    Eq,
    Semicolon,
    /// Any other operator (`<`, `>=`, `<>`, `||`, ...). The dialect has no use for them.
    Op(String),
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => f.write_str(w),
            Token::Quoted(q) => write!(f, "\"{q}\""),
            Token::Str(s) => write!(f, "'{s}'"),
            Token::Number(n) => f.write_str(n),
            Token::Placeholder(_) => f.write_str("?"),
            Token::Comma => f.write_str(","),
            Token::Dot => f.write_str("."),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Star => f.write_str("*"),
            Token::Eq => f.write_str("="),
            Token::Semicolon => f.write_str(";"),
            Token::Op(op) => f.write_str(op),
            Token::Eof => f.write_str("end of statement"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub(super) fn tokenize(sql: &str) -> crate::Result<Vec<Spanned>> {
    let mut lexer = Lexer {
        src: sql,
        chars: sql.char_indices().peekable(),
        placeholders: 0,
    };

    let mut tokens = Vec::new();

    loop {
        let spanned = lexer.next_token()?;
        let done = spanned.token == Token::Eof;
        tokens.push(spanned);

        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    src: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    placeholders: usize,
}

impl Lexer<'_> {
    fn next_token(&mut self) -> crate::Result<Spanned> {
        self.skip_whitespace_and_comments();

        let Some((offset, c)) = self.chars.next() else {
            return Ok(Spanned {
                token: Token::Eof,
                offset: self.src.len(),
            });
        };

        let token = match c {
            ',' => Token::Comma,
            '.' => Token::Dot,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '*' => Token::Star,
            '=' => Token::Eq,
            ';' => Token::Semicolon,
            '?' => {
                let index = self.placeholders;
                self.placeholders += 1;
                Token::Placeholder(index)
            }
            '\'' => Token::Str(self.string_literal(offset)?),
            '"' | '`' => Token::Quoted(self.quoted_identifier(c, offset)?),
            '-' if self.peek_char().is_some_and(|n| n.is_ascii_digit()) => {
                let mut number = String::from("-");
                number.push_str(&self.number());
                Token::Number(number)
            }
            c if c.is_ascii_digit() => {
                let mut number = String::from(c);
                number.push_str(&self.number());
                Token::Number(number)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::from(c);
                while let Some(&(_, n)) = self.chars.peek() {
                    if n.is_alphanumeric() || n == '_' || n == '$' {
                        word.push(n);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                Token::Word(word)
            }
            '<' | '>' | '!' | '|' | '+' | '-' | '/' | '%' => {
                let mut op = String::from(c);
                if let Some(n) = self.peek_char().filter(|n| matches!(n, '=' | '>' | '|')) {
                    op.push(n);
                    self.chars.next();
                }
                Token::Op(op)
            }
            other => return Err(Error::parse(format!("character `{other}`"), offset)),
        };

        Ok(Spanned { token, offset })
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.peek_char().is_some_and(char::is_whitespace) {
                self.chars.next();
            }

            let rest = match self.chars.peek() {
                Some(&(offset, _)) => &self.src[offset..],
                None => return,
            };

            if rest.starts_with("--") {
                while self.peek_char().is_some_and(|c| c != '\n') {
                    self.chars.next();
                }
            } else {
                return;
            }
        }
    }

    fn number(&mut self) -> String {
        let mut out = String::new();
        let mut seen_dot = false;

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() || (c == '.' && !seen_dot) {
                seen_dot |= c == '.';
                out.push(c);
                self.chars.next();
            } else {
                break;
            }
        }

        out
    }

    fn string_literal(&mut self, start: usize) -> crate::Result<String> {
        let mut out = String::new();

        while let Some((_, c)) = self.chars.next() {
            if c == '\'' {
                // '' is an escaped quote
                if self.peek_char() == Some('\'') {
                    self.chars.next();
                    out.push('\'');
                } else {
                    return Ok(out);
                }
            } else {
                out.push(c);
            }
        }

        Err(Error::parse("unterminated string literal", start))
    }

    fn quoted_identifier(&mut self, quote: char, start: usize) -> crate::Result<String> {
        let mut out = String::new();

        for (_, c) in self.chars.by_ref() {
            if c == quote {
                return Ok(out);
            }
            out.push(c);
        }

        Err(Error::parse("unterminated quoted identifier", start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(sql: &str) -> Vec<Token> {
        tokenize(sql).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn placeholders_are_numbered_left_to_right() {
        let toks = tokens("WHERE a = ? AND b IN (?, ?) -- trailing ?\nLIMIT ?");
        let indices: Vec<_> = toks
            .iter()
            .filter_map(|t| match t {
                Token::Placeholder(i) => Some(*i),
                _ => None,
            })
            .collect();

        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn literals_and_quoting() {
        assert_eq!(
            tokens(r#"'it''s' "Name" `key` -4.5 <>"#),
            vec![
                Token::Str("it's".into()),
                Token::Quoted("Name".into()),
                Token::Quoted("key".into()),
                Token::Number("-4.5".into()),
                Token::Op("<>".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_is_rejected() {
        let err = tokenize("SELECT 'oops").unwrap_err();
        assert!(matches!(err, Error::Parse { position: 7, .. }));
    }
}
