//! Precedence-climbing parser producing [`Node`] trees.
//!
//! Precedence, lowest first: `;` `;>`, `=>`, assignment, `||`, `&&`,
//! comparison, additive, multiplicative, prefix, postfix/primary.

use std::sync::Arc;

use crate::error::CompileError;
use crate::record::{Record, Value};

use super::lexer::{tokenize, Spanned, Token};
use super::node::{AssignOp, BinaryOp, Node, UnaryOp, VariableNode};
use super::system_call::SystemCall;

/// Deepest nesting of parentheses, calls, indexes, prefix operators and
/// right-associative chains accepted by the parser.
const MAX_NESTING: usize = 64;

/// Parses KaRL text into an unbound tree. Empty text yields a constant
/// UNCREATED leaf.
pub(crate) fn parse(source: &str) -> Result<Node, CompileError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    if parser.at(&Token::End) {
        return Ok(Node::Leaf(Record::default()));
    }
    let root = parser.sequence()?;
    parser.expect(&Token::End)?;
    Ok(root)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Spanned {
        // The token stream always ends with `End`.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn at(&self, token: &Token) -> bool {
        &self.peek().token == token
    }

    fn advance(&mut self) -> Spanned {
        let current = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        current
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.at(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), CompileError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected '{token}'")))
        }
    }

    fn unexpected(&self, context: &str) -> CompileError {
        let found = self.peek();
        CompileError::new(format!("{context}, found '{}'", found.token), found.position)
    }

    /// Runs `rule` one nesting level deeper, failing past [`MAX_NESTING`].
    fn nested<T>(&mut self, rule: impl FnOnce(&mut Self) -> Result<T, CompileError>) -> Result<T, CompileError> {
        if self.depth >= MAX_NESTING {
            return Err(CompileError::new("expression nested too deeply", self.peek().position));
        }
        self.depth += 1;
        let result = rule(self);
        self.depth -= 1;
        result
    }

    fn sequence(&mut self) -> Result<Node, CompileError> {
        let mut left = self.implies()?;
        loop {
            let op = match self.peek().token {
                Token::Sequence => BinaryOp::Sequence,
                Token::Both => BinaryOp::Both,
                _ => return Ok(left),
            };
            self.advance();
            if matches!(self.peek().token, Token::End | Token::ParenClose) {
                return Ok(left);
            }
            let right = self.implies()?;
            left = binary(op, left, right);
        }
    }

    fn implies(&mut self) -> Result<Node, CompileError> {
        let left = self.assignment()?;
        if self.eat(&Token::Implies) {
            let right = self.nested(Self::implies)?;
            return Ok(binary(BinaryOp::Implies, left, right));
        }
        Ok(left)
    }

    fn assignment(&mut self) -> Result<Node, CompileError> {
        let target = self.or()?;
        let op = match self.peek().token {
            Token::Assign => AssignOp::Assign,
            Token::AddAssign => AssignOp::Add,
            Token::SubAssign => AssignOp::Subtract,
            Token::MulAssign => AssignOp::Multiply,
            Token::DivAssign => AssignOp::Divide,
            _ => return Ok(target),
        };
        if !target.is_lvalue() {
            return Err(self.unexpected("left side of an assignment must be a variable"));
        }
        self.advance();
        let value = self.nested(Self::assignment)?;
        Ok(Node::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn or(&mut self) -> Result<Node, CompileError> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Node, CompileError> {
        let mut left = self.comparison()?;
        while self.eat(&Token::And) {
            let right = self.comparison()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Node, CompileError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek().token {
                Token::Equal => BinaryOp::Equal,
                Token::NotEqual => BinaryOp::NotEqual,
                Token::Less => BinaryOp::Less,
                Token::LessOrEqual => BinaryOp::LessOrEqual,
                Token::Greater => BinaryOp::Greater,
                Token::GreaterOrEqual => BinaryOp::GreaterOrEqual,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.additive()?;
            left = binary(op, left, right);
        }
    }

    fn additive(&mut self) -> Result<Node, CompileError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek().token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Subtract,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Node, CompileError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek().token {
                Token::Star => BinaryOp::Multiply,
                Token::Slash => BinaryOp::Divide,
                Token::Percent => BinaryOp::Modulus,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<Node, CompileError> {
        let op = match self.peek().token {
            Token::Minus => UnaryOp::Negate,
            Token::Bang => UnaryOp::Not,
            Token::Increment => UnaryOp::Increment,
            Token::Decrement => UnaryOp::Decrement,
            _ => return self.postfix(),
        };
        let op_token = self.advance();
        let operand = self.nested(Self::unary)?;
        if matches!(op, UnaryOp::Increment | UnaryOp::Decrement) && !operand.is_lvalue() {
            return Err(CompileError::new(
                format!("'{}' needs a variable operand", op.symbol()),
                op_token.position,
            ));
        }
        Ok(Node::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Node, CompileError> {
        let mut node = self.primary()?;
        while self.at(&Token::BracketOpen) {
            let Node::Variable(variable) = node else {
                return Err(self.unexpected("only variables can be indexed"));
            };
            self.advance();
            let index = self.nested(Self::sequence)?;
            self.expect(&Token::BracketClose)?;
            node = Node::Index {
                variable,
                index: Box::new(index),
            };
        }
        Ok(node)
    }

    fn primary(&mut self) -> Result<Node, CompileError> {
        let Spanned { token, position } = self.advance();
        match token {
            Token::Integer(v) => Ok(Node::Leaf(Record::integer(v))),
            Token::Double(v) => Ok(Node::Leaf(Record::double(v))),
            Token::Text(s) => Ok(Node::Leaf(Record::string(s))),
            Token::Identifier(name) => {
                if self.at(&Token::ParenOpen) {
                    let args = self.arguments()?;
                    Ok(Node::FunctionCall { name, args })
                } else {
                    Ok(Node::Variable(VariableNode::new(name)))
                }
            }
            Token::SystemCall(name) => {
                let call = SystemCall::from_name(&name)
                    .ok_or_else(|| CompileError::new(format!("unknown system call '#{name}'"), position))?;
                let args = self.arguments()?;
                Ok(Node::SystemCall { call, args })
            }
            Token::ParenOpen => {
                let inner = self.nested(Self::sequence)?;
                self.expect(&Token::ParenClose)?;
                Ok(inner)
            }
            Token::BracketOpen => self.array_literal(),
            other => Err(CompileError::new(format!("unexpected '{other}'"), position)),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Node>, CompileError> {
        self.expect(&Token::ParenOpen)?;
        let mut args = Vec::new();
        if self.eat(&Token::ParenClose) {
            return Ok(args);
        }
        loop {
            args.push(self.nested(Self::implies)?);
            if self.eat(&Token::ParenClose) {
                return Ok(args);
            }
            self.expect(&Token::Comma)?;
        }
    }

    /// `[1, -2, 3.5]`: numeric constants only. Any double makes the whole
    /// array a double array.
    fn array_literal(&mut self) -> Result<Node, CompileError> {
        let mut integers: Vec<i64> = Vec::new();
        let mut doubles: Vec<f64> = Vec::new();
        let mut is_double = false;

        if !self.eat(&Token::BracketClose) {
            loop {
                let negative = self.eat(&Token::Minus);
                let Spanned { token, position } = self.advance();
                match token {
                    Token::Integer(v) => {
                        let v = if negative { v.wrapping_neg() } else { v };
                        integers.push(v);
                        #[allow(clippy::cast_precision_loss)]
                        doubles.push(v as f64);
                    }
                    Token::Double(v) => {
                        is_double = true;
                        doubles.push(if negative { -v } else { v });
                    }
                    other => {
                        return Err(CompileError::new(
                            format!("array elements must be numbers, found '{other}'"),
                            position,
                        ))
                    }
                }
                if self.eat(&Token::BracketClose) {
                    break;
                }
                self.expect(&Token::Comma)?;
            }
        }

        let value = if is_double {
            Value::DoubleArray(Arc::new(doubles))
        } else {
            Value::IntegerArray(Arc::new(integers))
        };
        Ok(Node::Leaf(Record::new(value)))
    }
}

fn binary(op: BinaryOp, left: Node, right: Node) -> Node {
    Node::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(source: &str) -> String {
        let mut printer = crate::expression::SourcePrinter::default();
        parse(source).unwrap().accept(&mut printer);
        printer.finish()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(shape("1 + 2 * 3"), "(1 + (2 * 3))");
        assert_eq!(shape("a || b && c == 1"), "(a || (b && (c == 1)))");
        assert_eq!(shape("x = y = 2"), "(x = (y = 2))");
        assert_eq!(shape("a => b => c"), "(a => (b => c))");
        assert_eq!(shape("a ;> b ; c"), "((a ;> b) ; c)");
        assert_eq!(shape("a => x = 1 ;> y"), "((a => (x = 1)) ;> y)");
    }

    #[test]
    fn test_postfix_and_calls() {
        assert_eq!(shape("arr[i + 1] += 2"), "(arr[(i + 1)] += 2)");
        assert_eq!(shape("#fragment(s, 0, 2)"), "#fragment(s, 0, 2)");
        assert_eq!(shape("f()"), "f()");
        assert_eq!(shape("!++x"), "!++x");
    }

    #[test]
    fn test_trailing_separator_and_empty_input() {
        assert_eq!(shape("x = 1;"), "(x = 1)");
        assert_eq!(shape("(x = 1;>)"), "(x = 1)");
        assert!(matches!(parse("").unwrap(), Node::Leaf(r) if !r.is_created()));
        assert!(matches!(parse("  // only a comment").unwrap(), Node::Leaf(_)));
    }

    #[test]
    fn test_array_literals() {
        assert_eq!(shape("[1, -2]"), "[1, -2]");
        assert_eq!(shape("[1, 2.5]"), "[1.0, 2.5]");
        let Node::Leaf(empty) = parse("[]").unwrap() else {
            panic!("expected a leaf");
        };
        assert_eq!(empty.size(), 0);
        assert!(empty.is_array());
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse("1 +").unwrap_err().position, 3);
        assert_eq!(parse("(1 + 2").unwrap_err().position, 6);
        assert_eq!(parse("3 = 4").unwrap_err().position, 2);
        assert_eq!(parse("++3").unwrap_err().position, 0);
        assert_eq!(parse("#nope(1)").unwrap_err().position, 0);
        assert_eq!(parse("[1, x]").unwrap_err().position, 4);
        assert_eq!(parse("1 2").unwrap_err().position, 2);
        assert_eq!(parse("(1)[0]").unwrap_err().position, 3);
    }

    #[test]
    fn test_nesting_limit() {
        let nest = |levels: usize| format!("{}1{}", "(".repeat(levels), ")".repeat(levels));
        assert!(parse(&nest(MAX_NESTING)).is_ok());

        let err = parse(&nest(MAX_NESTING + 1)).unwrap_err();
        assert!(err.message.contains("nested too deeply"));
        assert_eq!(err.position, MAX_NESTING + 1);

        assert!(parse(&nest(100_000)).is_err());
        assert!(parse(&format!("{}x", "!".repeat(10_000))).is_err());
        assert!(parse(&format!("{}1", "a = ".repeat(10_000))).is_err());
        assert!(parse(&format!("{}1", "f(".repeat(10_000))).is_err());
    }
}
