//! Reduces a validated token sequence to an expression tree.
//!
//! Precedence is `!` over `;` over `|`, parentheses override. Regex
//! literals are compiled here, once, so evaluation never compiles.

use regex::{Regex, RegexBuilder};

use super::check::MAX_NESTING_DEPTH;
use super::token::{SpannedToken, Token};
use super::QueryError;
use crate::pattern::REGEX_SIZE_LIMIT;

/// An attribute reference such as `temperature`, `address.city` or
/// `data[level]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrPath {
    /// Full name with escapes removed
    pub name: String,
    /// Name split on unescaped `.`, `[` and `]`
    pub segments: Vec<String>,
}

impl AttrPath {
    fn from_token(raw: &str) -> Self {
        let mut name = String::with_capacity(raw.len());
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        name.push(escaped);
                        current.push(escaped);
                    }
                }
                '.' | '[' | ']' => {
                    name.push(c);
                    if !current.is_empty() {
                        segments.push(std::mem::take(&mut current));
                    }
                }
                _ => {
                    name.push(c);
                    current.push(c);
                }
            }
        }
        if !current.is_empty() {
            segments.push(current);
        }

        Self { name, segments }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Lt => "<",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Single(Literal),
    /// `A==1,2,3`
    List(Vec<Literal>),
    /// `A==1..5`, inclusive
    Range(Literal, Literal),
}

#[derive(Debug, Clone)]
pub enum QueryNode {
    Exists(AttrPath),
    NotExists(AttrPath),
    Compare {
        path: AttrPath,
        op: CompareOp,
        operand: Operand,
    },
    Pattern {
        path: AttrPath,
        regex: Regex,
        negated: bool,
    },
    And(Vec<QueryNode>),
    Or(Vec<QueryNode>),
}

/// Build the expression tree for a checked token sequence.
pub fn parse(tokens: &[SpannedToken]) -> Result<QueryNode, QueryError> {
    let mut parser = Parser {
        tokens,
        cursor: 0,
        depth: 0,
    };
    let node = parser.or()?;
    match parser.peek() {
        None => Ok(node),
        Some(t) => Err(unexpected(t)),
    }
}

struct Parser<'a> {
    tokens: &'a [SpannedToken],
    cursor: usize,
    depth: i64,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a SpannedToken> {
        self.tokens.get(self.cursor)
    }

    fn bump(&mut self) -> Option<&'a SpannedToken> {
        let t = self.tokens.get(self.cursor);
        self.cursor += 1;
        t
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek().is_some_and(|t| &t.token == token) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<QueryNode, QueryError> {
        let mut terms = vec![self.and()?];
        while self.eat(&Token::Or) {
            terms.push(self.and()?);
        }
        Ok(collapse(terms, QueryNode::Or))
    }

    fn and(&mut self) -> Result<QueryNode, QueryError> {
        let mut terms = vec![self.primary()?];
        while self.eat(&Token::And) {
            terms.push(self.primary()?);
        }
        Ok(collapse(terms, QueryNode::And))
    }

    fn primary(&mut self) -> Result<QueryNode, QueryError> {
        let Some(spanned) = self.bump() else {
            return Err(end_of_expression());
        };
        match &spanned.token {
            Token::Open => {
                self.depth += 1;
                if self.depth > MAX_NESTING_DEPTH {
                    return Err(QueryError::new(
                        "ngsi-ld query language: mismatched parenthesis",
                        format!("too deeply nested: more than {MAX_NESTING_DEPTH} levels of '('"),
                    ));
                }
                let inner = self.or()?;
                self.depth -= 1;
                if self.eat(&Token::Close) {
                    Ok(inner)
                } else {
                    Err(QueryError::new(
                        "ngsi-ld query language: mismatched parenthesis",
                        "Excess of START Tokens '('",
                    ))
                }
            }
            Token::NotExists => match self.bump() {
                Some(SpannedToken { token: Token::Variable(raw), .. }) => {
                    Ok(QueryNode::NotExists(AttrPath::from_token(raw)))
                }
                Some(other) => Err(unexpected(other)),
                None => Err(end_of_expression()),
            },
            Token::Variable(raw) => self.condition(AttrPath::from_token(raw)),
            _ => Err(unexpected(spanned)),
        }
    }

    /// Whatever follows a variable: a comparison, a match, or nothing.
    fn condition(&mut self, path: AttrPath) -> Result<QueryNode, QueryError> {
        let op = match self.peek().map(|t| &t.token) {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            Some(Token::Ge) => CompareOp::Ge,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Le) => CompareOp::Le,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Match) | Some(Token::NoMatch) => return self.pattern(path),
            _ => return Ok(QueryNode::Exists(path)),
        };
        self.cursor += 1;
        let operand = self.operand(op)?;
        Ok(QueryNode::Compare { path, op, operand })
    }

    fn pattern(&mut self, path: AttrPath) -> Result<QueryNode, QueryError> {
        let negated = matches!(self.bump().map(|t| &t.token), Some(Token::NoMatch));
        match self.bump() {
            Some(SpannedToken { token: Token::Regex(source), .. }) => {
                let regex = RegexBuilder::new(source)
                    .size_limit(REGEX_SIZE_LIMIT)
                    .build()
                    .map_err(|e| {
                        QueryError::new("ngsi-ld query language: invalid regular expression", e.to_string())
                    })?;
                Ok(QueryNode::Pattern { path, regex, negated })
            }
            Some(other) => Err(unexpected(other)),
            None => Err(end_of_expression()),
        }
    }

    fn operand(&mut self, op: CompareOp) -> Result<Operand, QueryError> {
        let first = self.literal()?;

        if self.eat(&Token::Range) {
            let upper = self.literal()?;
            if matches!(self.peek().map(|t| &t.token), Some(Token::Comma | Token::Range)) {
                return Err(QueryError::new(
                    "ngsi-ld query language: invalid value range",
                    "a range can't be combined with a value list",
                ));
            }
            require_equality(op, "ngsi-ld query language: ranges need '==' or '!='")?;
            return Ok(Operand::Range(first, upper));
        }

        if !matches!(self.peek().map(|t| &t.token), Some(Token::Comma)) {
            return Ok(Operand::Single(first));
        }

        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            items.push(self.literal()?);
        }
        if self.eat(&Token::Range) {
            return Err(QueryError::new(
                "ngsi-ld query language: invalid value range",
                "a range can't be combined with a value list",
            ));
        }
        require_equality(op, "ngsi-ld query language: value lists need '==' or '!='")?;
        Ok(Operand::List(items))
    }

    fn literal(&mut self) -> Result<Literal, QueryError> {
        let Some(spanned) = self.bump() else {
            return Err(end_of_expression());
        };
        Ok(match &spanned.token {
            Token::Str(s) => Literal::Str(s.clone()),
            Token::Integer(i) => Literal::Integer(*i),
            Token::Float(f) => Literal::Float(*f),
            Token::True => Literal::Bool(true),
            Token::False => Literal::Bool(false),
            _ => return Err(unexpected(spanned)),
        })
    }
}

fn collapse(mut terms: Vec<QueryNode>, wrap: fn(Vec<QueryNode>) -> QueryNode) -> QueryNode {
    if terms.len() == 1 {
        if let Some(only) = terms.pop() {
            return only;
        }
    }
    wrap(terms)
}

fn require_equality(op: CompareOp, title: &str) -> Result<(), QueryError> {
    match op {
        CompareOp::Eq | CompareOp::Ne => Ok(()),
        other => Err(QueryError::new(title, format!("found '{}'", other.symbol()))),
    }
}

fn unexpected(spanned: &SpannedToken) -> QueryError {
    QueryError::new(
        "ngsi-ld query language: unexpected token",
        format!("{} at position {}", spanned.kind().name(), spanned.position),
    )
}

fn end_of_expression() -> QueryError {
    QueryError::new("ngsi-ld query language: incomplete expression", "end of expression")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{check::check, lexer::lex};

    fn tree(text: &str) -> Result<QueryNode, QueryError> {
        let tokens = lex(text)?;
        check(&tokens)?;
        parse(&tokens)
    }

    #[test]
    fn test_unchecked_deep_nesting_rejected() {
        let text = format!("{}A{}", "(".repeat(5_000), ")".repeat(5_000));
        let tokens = lex(&text).unwrap();
        let err = parse(&tokens).unwrap_err();
        assert!(err.detail.contains("too deeply nested"));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let node = tree("A;B|C").unwrap();
        let QueryNode::Or(terms) = node else { panic!("expected Or") };
        assert_eq!(terms.len(), 2);
        assert!(matches!(&terms[0], QueryNode::And(inner) if inner.len() == 2));
        assert!(matches!(&terms[1], QueryNode::Exists(p) if p.name == "C"));
    }

    #[test]
    fn test_parentheses_override_precedence() {
        let node = tree("A;(B|C)").unwrap();
        let QueryNode::And(terms) = node else { panic!("expected And") };
        assert!(matches!(&terms[1], QueryNode::Or(inner) if inner.len() == 2));
    }

    #[test]
    fn test_single_term_is_not_wrapped() {
        assert!(matches!(tree("((A))").unwrap(), QueryNode::Exists(_)));
    }

    #[test]
    fn test_negated_variable() {
        assert!(matches!(tree("!P1").unwrap(), QueryNode::NotExists(p) if p.name == "P1"));
    }

    #[test]
    fn test_comparison_operands() {
        let QueryNode::Compare { op, operand, .. } = tree("A>=2.5").unwrap() else { panic!() };
        assert_eq!(op, CompareOp::Ge);
        assert_eq!(operand, Operand::Single(Literal::Float(2.5)));

        let QueryNode::Compare { operand, .. } = tree("A==1,2,3").unwrap() else { panic!() };
        assert_eq!(
            operand,
            Operand::List(vec![Literal::Integer(1), Literal::Integer(2), Literal::Integer(3)])
        );

        let QueryNode::Compare { operand, .. } = tree("A!=1..5").unwrap() else { panic!() };
        assert_eq!(operand, Operand::Range(Literal::Integer(1), Literal::Integer(5)));
    }

    #[test]
    fn test_list_and_range_need_equality() {
        assert!(tree("A>1,2").unwrap_err().title.contains("value lists"));
        assert!(tree("A<1..2").unwrap_err().title.contains("ranges"));
    }

    #[test]
    fn test_list_mixed_with_range_rejected() {
        assert!(tree("A==1,2..3").unwrap_err().title.contains("invalid value range"));
        assert!(tree("A==1..2,3").unwrap_err().title.contains("invalid value range"));
    }

    #[test]
    fn test_regex_compiled_at_parse() {
        let QueryNode::Pattern { regex, negated, .. } = tree("A~=/^ab+$/").unwrap() else { panic!() };
        assert!(!negated);
        assert!(regex.is_match("abbb"));

        let QueryNode::Pattern { negated, .. } = tree("A!~=/x/").unwrap() else { panic!() };
        assert!(negated);
    }

    #[test]
    fn test_bad_regex_is_validation_error() {
        let err = tree("A~=/[unclosed/").unwrap_err();
        assert_eq!(err.title, "ngsi-ld query language: invalid regular expression");
        assert!(!err.detail.is_empty());
    }

    #[test]
    fn test_attr_path_segments() {
        let path = AttrPath::from_token("address.city");
        assert_eq!(path.name, "address.city");
        assert_eq!(path.segments, vec!["address", "city"]);

        let path = AttrPath::from_token("data[level][x]");
        assert_eq!(path.segments, vec!["data", "level", "x"]);

        let path = AttrPath::from_token(r"a\.b.c");
        assert_eq!(path.name, "a.b.c");
        assert_eq!(path.segments, vec!["a.b", "c"]);
    }
}
