//! Dynamic group query language
//!
//! ```text
//! query     := and_expr ("OR" and_expr)*
//! and_expr  := term ("AND" term)*
//! term      := "(" query ")" | condition
//! condition := field op value
//! op        := "=" | "!=" | ">" | ">=" | "<" | "<=" | "~"
//! value     := bare word | "quoted string"
//! ```
//!
//! Keywords and field names are case-insensitive. `~` is a case-insensitive
//! substring match. Ordering operators compare numerically when both sides
//! parse as numbers and lexically otherwise (so ISO dates order correctly).

use crate::triggers::rows::ContactRow;
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Contains => "~",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Condition {
        field: String,
        op: CompareOp,
        value: String,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateError {
    Empty,
    UnterminatedString,
    UnexpectedEnd,
    UnexpectedToken(String),
    ExpectedOperator(String),
}

impl std::fmt::Display for PredicateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredicateError::Empty => write!(f, "empty query"),
            PredicateError::UnterminatedString => write!(f, "unterminated quoted value"),
            PredicateError::UnexpectedEnd => write!(f, "query ended unexpectedly"),
            PredicateError::UnexpectedToken(t) => write!(f, "unexpected '{}'", t),
            PredicateError::ExpectedOperator(t) => {
                write!(f, "expected comparison operator after '{}'", t)
            }
        }
    }
}

impl std::error::Error for PredicateError {}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Op(CompareOp),
    Word(String),
    Quoted(String),
}

impl Token {
    fn text(&self) -> String {
        match self {
            Token::Open => "(".to_string(),
            Token::Close => ")".to_string(),
            Token::Op(op) => op.as_str().to_string(),
            Token::Word(w) => w.clone(),
            Token::Quoted(q) => format!("\"{}\"", q),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

fn tokenize(query: &str) -> Result<Vec<Token>, PredicateError> {
    let mut tokens = Vec::new();
    let mut chars = query.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => value.push(c),
                        None => return Err(PredicateError::UnterminatedString),
                    }
                }
                tokens.push(Token::Quoted(value));
            }
            '=' | '~' => {
                chars.next();
                tokens.push(Token::Op(if c == '=' {
                    CompareOp::Eq
                } else {
                    CompareOp::Contains
                }));
            }
            '!' | '>' | '<' => {
                chars.next();
                let or_equal = chars.peek() == Some(&'=');
                if or_equal {
                    chars.next();
                }
                let op = match (c, or_equal) {
                    ('!', true) => CompareOp::NotEq,
                    ('!', false) => return Err(PredicateError::UnexpectedToken("!".to_string())),
                    ('>', true) => CompareOp::Gte,
                    ('>', false) => CompareOp::Gt,
                    ('<', true) => CompareOp::Lte,
                    _ => CompareOp::Lt,
                };
                tokens.push(Token::Op(op));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || "()=~!<>\"".contains(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn query(&mut self) -> Result<Predicate, PredicateError> {
        let mut terms = vec![self.and_expr()?];
        while self.peek().map_or(false, |t| t.is_keyword("or")) {
            self.pos += 1;
            terms.push(self.and_expr()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Predicate::Or(terms)
        })
    }

    fn and_expr(&mut self) -> Result<Predicate, PredicateError> {
        let mut terms = vec![self.term()?];
        while self.peek().map_or(false, |t| t.is_keyword("and")) {
            self.pos += 1;
            terms.push(self.term()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Predicate::And(terms)
        })
    }

    fn term(&mut self) -> Result<Predicate, PredicateError> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.query()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    Some(other) => Err(PredicateError::UnexpectedToken(other.text())),
                    None => Err(PredicateError::UnexpectedEnd),
                }
            }
            Some(Token::Word(field)) => {
                let op = match self.next() {
                    Some(Token::Op(op)) => op,
                    _ => return Err(PredicateError::ExpectedOperator(field)),
                };
                let value = match self.next() {
                    Some(Token::Word(v)) | Some(Token::Quoted(v)) => v,
                    Some(other) => return Err(PredicateError::UnexpectedToken(other.text())),
                    None => return Err(PredicateError::UnexpectedEnd),
                };
                Ok(Predicate::Condition {
                    field: field.to_lowercase(),
                    op,
                    value,
                })
            }
            Some(other) => Err(PredicateError::UnexpectedToken(other.text())),
            None => Err(PredicateError::UnexpectedEnd),
        }
    }
}

fn compare(actual: &str, expected: &str) -> Ordering {
    match (actual.trim().parse::<f64>(), expected.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => actual.to_lowercase().cmp(&expected.to_lowercase()),
    }
}

impl Predicate {
    pub fn parse(query: &str) -> Result<Self, PredicateError> {
        let tokens = tokenize(query)?;
        if tokens.is_empty() {
            return Err(PredicateError::Empty);
        }

        let mut parser = Parser { tokens, pos: 0 };
        let predicate = parser.query()?;
        match parser.next() {
            None => Ok(predicate),
            Some(extra) => Err(PredicateError::UnexpectedToken(extra.text())),
        }
    }

    /// Whether a contact satisfies the predicate. A missing attribute only
    /// satisfies `!=`.
    pub fn matches(&self, contact: &ContactRow) -> bool {
        match self {
            Predicate::And(terms) => terms.iter().all(|t| t.matches(contact)),
            Predicate::Or(terms) => terms.iter().any(|t| t.matches(contact)),
            Predicate::Condition { field, op, value } => match contact.attribute(field) {
                None => *op == CompareOp::NotEq,
                Some(actual) => match op {
                    CompareOp::Eq => compare(actual, value) == Ordering::Equal,
                    CompareOp::NotEq => compare(actual, value) != Ordering::Equal,
                    CompareOp::Gt => compare(actual, value) == Ordering::Greater,
                    CompareOp::Gte => compare(actual, value) != Ordering::Less,
                    CompareOp::Lt => compare(actual, value) == Ordering::Less,
                    CompareOp::Lte => compare(actual, value) != Ordering::Greater,
                    CompareOp::Contains => actual.to_lowercase().contains(&value.to_lowercase()),
                },
            },
        }
    }

    /// Lowercased attribute names referenced anywhere in the predicate
    pub fn fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Predicate::Condition { field, .. } => {
                out.insert(field.clone());
            }
            Predicate::And(terms) | Predicate::Or(terms) => {
                for term in terms {
                    term.collect_fields(out);
                }
            }
        }
    }
}
