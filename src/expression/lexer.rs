//! Tokenizer for KaRL source text.

use std::fmt;

use crate::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Integer(i64),
    Double(f64),
    Text(String),
    /// Variable or function name, possibly containing `{…}` segments.
    Identifier(String),
    /// `#name`
    SystemCall(String),
    ParenOpen,
    ParenClose,
    BracketOpen,
    BracketClose,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Increment,
    Decrement,
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
    Implies,
    /// `;>`
    Sequence,
    /// `;`
    Both,
    End,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v:?}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Identifier(name) => f.write_str(name),
            Self::SystemCall(name) => write!(f, "#{name}"),
            Self::ParenOpen => f.write_str("("),
            Self::ParenClose => f.write_str(")"),
            Self::BracketOpen => f.write_str("["),
            Self::BracketClose => f.write_str("]"),
            Self::Comma => f.write_str(","),
            Self::Plus => f.write_str("+"),
            Self::Minus => f.write_str("-"),
            Self::Star => f.write_str("*"),
            Self::Slash => f.write_str("/"),
            Self::Percent => f.write_str("%"),
            Self::Bang => f.write_str("!"),
            Self::Increment => f.write_str("++"),
            Self::Decrement => f.write_str("--"),
            Self::Assign => f.write_str("="),
            Self::AddAssign => f.write_str("+="),
            Self::SubAssign => f.write_str("-="),
            Self::MulAssign => f.write_str("*="),
            Self::DivAssign => f.write_str("/="),
            Self::Equal => f.write_str("=="),
            Self::NotEqual => f.write_str("!="),
            Self::Less => f.write_str("<"),
            Self::LessOrEqual => f.write_str("<="),
            Self::Greater => f.write_str(">"),
            Self::GreaterOrEqual => f.write_str(">="),
            Self::And => f.write_str("&&"),
            Self::Or => f.write_str("||"),
            Self::Implies => f.write_str("=>"),
            Self::Sequence => f.write_str(";>"),
            Self::Both => f.write_str(";"),
            Self::End => f.write_str("end of input"),
        }
    }
}

/// A token and the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    /// The token.
    pub token: Token,
    /// Byte offset in the source text.
    pub position: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, CompileError> {
    Lexer {
        source,
        bytes: source.as_bytes(),
        pos: 0,
    }
    .run()
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'.' || b == b'{'
}

fn is_name_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Lexer<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn run(mut self) -> Result<Vec<Spanned>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let position = self.pos;
            let Some(b) = self.peek() else {
                tokens.push(Spanned {
                    token: Token::End,
                    position,
                });
                return Ok(tokens);
            };
            let token = match b {
                b'0'..=b'9' => self.number()?,
                b'"' | b'\'' => self.text(b)?,
                b'#' => self.system_call()?,
                b if is_name_start(b) => Token::Identifier(self.name()?),
                _ => self.operator()?,
            };
            tokens.push(Spanned { token, position });
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else if b == b'/' && self.peek_at(1) == Some(b'/') {
                while let Some(c) = self.peek() {
                    if c == b'\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn number(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        let mut is_double = false;
        self.digits();
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_double = true;
            self.pos += 1;
            self.digits();
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some(b'+' | b'-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                is_double = true;
                self.pos += 1 + sign;
                self.digits();
            }
        }
        let text = &self.source[start..self.pos];
        if is_double {
            text.parse::<f64>()
                .map(Token::Double)
                .map_err(|_| CompileError::new(format!("malformed number '{text}'"), start))
        } else {
            text.parse::<i64>()
                .map(Token::Integer)
                .map_err(|_| CompileError::new(format!("integer literal '{text}' out of range"), start))
        }
    }

    fn digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
    }

    fn text(&mut self, quote: u8) -> Result<Token, CompileError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.source[self.pos..].char_indices();
        while let Some((offset, c)) = chars.next() {
            match c {
                '\\' => {
                    let Some((_, escaped)) = chars.next() else {
                        break;
                    };
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                c if c == char::from(quote) => {
                    self.pos += offset + 1;
                    return Ok(Token::Text(out));
                }
                other => out.push(other),
            }
        }
        Err(CompileError::new("unterminated string literal", start))
    }

    fn system_call(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        self.pos += 1;
        let name_start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
            self.pos += 1;
        }
        if self.pos == name_start {
            return Err(CompileError::new("expected a system call name after '#'", start));
        }
        Ok(Token::SystemCall(self.source[name_start..self.pos].to_string()))
    }

    fn name(&mut self) -> Result<String, CompileError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'{' {
                self.braced(start)?;
            } else if is_name_continue(b) {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(self.source[start..self.pos].to_string())
    }

    fn braced(&mut self, name_start: usize) -> Result<(), CompileError> {
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(CompileError::new("unbalanced '{' in variable name", name_start))
    }

    fn operator(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        let b = self.bytes[self.pos];
        let next = self.peek_at(1);
        let (token, width) = match (b, next) {
            (b'(', _) => (Token::ParenOpen, 1),
            (b')', _) => (Token::ParenClose, 1),
            (b'[', _) => (Token::BracketOpen, 1),
            (b']', _) => (Token::BracketClose, 1),
            (b',', _) => (Token::Comma, 1),
            (b'+', Some(b'+')) => (Token::Increment, 2),
            (b'+', Some(b'=')) => (Token::AddAssign, 2),
            (b'+', _) => (Token::Plus, 1),
            (b'-', Some(b'-')) => (Token::Decrement, 2),
            (b'-', Some(b'=')) => (Token::SubAssign, 2),
            (b'-', _) => (Token::Minus, 1),
            (b'*', Some(b'=')) => (Token::MulAssign, 2),
            (b'*', _) => (Token::Star, 1),
            (b'/', Some(b'=')) => (Token::DivAssign, 2),
            (b'/', _) => (Token::Slash, 1),
            (b'%', _) => (Token::Percent, 1),
            (b'!', Some(b'=')) => (Token::NotEqual, 2),
            (b'!', _) => (Token::Bang, 1),
            (b'=', Some(b'=')) => (Token::Equal, 2),
            (b'=', Some(b'>')) => (Token::Implies, 2),
            (b'=', _) => (Token::Assign, 1),
            (b'<', Some(b'=')) => (Token::LessOrEqual, 2),
            (b'<', _) => (Token::Less, 1),
            (b'>', Some(b'=')) => (Token::GreaterOrEqual, 2),
            (b'>', _) => (Token::Greater, 1),
            (b'&', Some(b'&')) => (Token::And, 2),
            (b'|', Some(b'|')) => (Token::Or, 2),
            (b';', Some(b'>')) => (Token::Sequence, 2),
            (b';', _) => (Token::Both, 1),
            _ => {
                let c = self.source[start..].chars().next().unwrap_or('?');
                return Err(CompileError::new(format!("unexpected character '{c}'"), start));
            }
        };
        self.pos += width;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|spanned| spanned.token)
            .collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("42 1.5 2e3 1e-7"),
            vec![
                Token::Integer(42),
                Token::Double(1.5),
                Token::Double(2000.0),
                Token::Double(1e-7),
                Token::End
            ]
        );
    }

    #[test]
    fn test_operators_prefer_longest_match() {
        assert_eq!(
            tokens("x+=1;>y=>z;w"),
            vec![
                Token::Identifier("x".into()),
                Token::AddAssign,
                Token::Integer(1),
                Token::Sequence,
                Token::Identifier("y".into()),
                Token::Implies,
                Token::Identifier("z".into()),
                Token::Both,
                Token::Identifier("w".into()),
                Token::End
            ]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            tokens(r#""a\"b" 'c\n'"#),
            vec![Token::Text("a\"b".into()), Token::Text("c\n".into()), Token::End]
        );
    }

    #[test]
    fn test_identifiers_with_braces_and_locals() {
        assert_eq!(
            tokens("agent{.id}.ready .0"),
            vec![
                Token::Identifier("agent{.id}.ready".into()),
                Token::Identifier(".0".into()),
                Token::End
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            tokens("x // trailing\n+ 1"),
            vec![Token::Identifier("x".into()), Token::Plus, Token::Integer(1), Token::End]
        );
    }

    #[test]
    fn test_positions() {
        let spanned = tokenize("a  ==  b").unwrap();
        let positions: Vec<usize> = spanned.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![0, 3, 7, 8]);
    }

    #[test]
    fn test_errors_carry_position() {
        assert_eq!(tokenize("x = \"open").unwrap_err().position, 4);
        assert_eq!(tokenize("x $ 1").unwrap_err().position, 2);
        assert_eq!(tokenize("a{b").unwrap_err().position, 0);
        assert_eq!(tokenize("99999999999999999999").unwrap_err().position, 0);
    }
}
