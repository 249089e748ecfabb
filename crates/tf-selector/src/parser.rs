//! Selector text parser

use regex::Regex;
use tracing::trace;

use crate::ast::{Expr, NameMatch, Op, Relation, Selector, Term, Value};
use crate::error::{SelectorError, SelectorErrorKind, SelectorResult};

/// Compile a selector
pub(crate) fn parse(input: &str) -> SelectorResult<Selector> {
    let selector = Parser { input, pos: 0 }.selector()?;
    trace!(selector = %selector, terms = selector.terms.len(), "Compiled selector");
    Ok(selector)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    /// Skip whitespace, reporting whether there was any
    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().map_or(false, char::is_whitespace) {
            self.bump();
        }
        self.pos > start
    }

    fn error(&self, kind: SelectorErrorKind) -> SelectorError {
        SelectorError::new(kind, self.pos)
    }

    /// Error for whatever sits at the cursor
    fn unexpected(&self) -> SelectorError {
        match self.peek() {
            Some(c) => self.error(SelectorErrorKind::UnexpectedChar(c)),
            None => self.error(SelectorErrorKind::UnexpectedEnd),
        }
    }

    fn expect(&mut self, c: char, what: &'static str) -> SelectorResult<()> {
        if self.eat(c) {
            Ok(())
        } else if self.peek().is_none() {
            Err(self.error(SelectorErrorKind::UnexpectedEnd))
        } else {
            Err(self.error(SelectorErrorKind::Expected(what)))
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().map_or(false, &pred) {
            self.bump();
        }
        &self.input[start..self.pos]
    }

    fn selector(mut self) -> SelectorResult<Selector> {
        self.skip_ws();
        if self.peek().is_none() {
            return Err(self.error(SelectorErrorKind::Empty));
        }

        let mut terms = Vec::new();
        let mut relations = Vec::new();
        let mut target = None;

        loop {
            let start = self.pos;
            let (term, marked) = self.term()?;
            if marked {
                if target.is_some() {
                    return Err(SelectorError::new(SelectorErrorKind::DuplicateTarget, start));
                }
                target = Some(terms.len());
            }
            terms.push(term);

            let had_ws = self.skip_ws();
            let relation = match self.peek() {
                None => break,
                Some(c) if is_relation_char(c) => {
                    self.bump();
                    let n = self.count()?;
                    self.skip_ws();
                    match c {
                        '>' => Relation::Parent(n.unwrap_or(1)),
                        '<' => Relation::Child(n),
                        '+' => Relation::Preceding(n.unwrap_or(1)),
                        '-' => Relation::Following(n.unwrap_or(1)),
                        _ => Relation::AnyPreceding,
                    }
                }
                Some(_) if had_ws => Relation::Descendant,
                Some(c) => return Err(self.error(SelectorErrorKind::UnexpectedChar(c))),
            };
            if self.peek().is_none() {
                return Err(self.error(SelectorErrorKind::UnexpectedEnd));
            }
            relations.push(relation);
        }

        Ok(Selector::build(terms, relations, target))
    }

    /// Optional positive count after a relation token
    fn count(&mut self) -> SelectorResult<Option<usize>> {
        let start = self.pos;
        let digits = self.take_while(|c| c.is_ascii_digit());
        if digits.is_empty() {
            return Ok(None);
        }
        match digits.parse::<usize>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            _ => Err(SelectorError::new(
                SelectorErrorKind::InvalidNumber(digits.to_string()),
                start,
            )),
        }
    }

    fn term(&mut self) -> SelectorResult<(Term, bool)> {
        let marked = self.eat('@');
        let start = self.pos;

        let name = if self.eat('*') {
            Some(NameMatch::Any)
        } else {
            let ident = self.take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '$'));
            (!ident.is_empty()).then(|| NameMatch::Class(ident.to_string()))
        };

        let mut predicates = Vec::new();
        while self.eat('[') {
            self.skip_ws();
            predicates.push(self.or_expr()?);
            self.skip_ws();
            self.expect(']', "']'")?;
        }

        if name.is_none() && predicates.is_empty() {
            return Err(match self.peek() {
                Some(c) if is_relation_char(c) || c.is_whitespace() => {
                    SelectorError::new(SelectorErrorKind::EmptyTerm, start)
                }
                _ => self.unexpected(),
            });
        }

        let term = Term {
            name: name.unwrap_or(NameMatch::Any),
            predicates,
        };
        Ok((term, marked))
    }

    fn or_expr(&mut self) -> SelectorResult<Expr> {
        let mut items = vec![self.and_expr()?];
        loop {
            self.skip_ws();
            if !self.eat_str("||") {
                break;
            }
            items.push(self.and_expr()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::Or(items)
        })
    }

    fn and_expr(&mut self) -> SelectorResult<Expr> {
        let mut items = vec![self.atom()?];
        loop {
            self.skip_ws();
            if !self.eat_str("&&") {
                break;
            }
            items.push(self.atom()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::And(items)
        })
    }

    fn atom(&mut self) -> SelectorResult<Expr> {
        self.skip_ws();
        if self.eat('(') {
            let expr = self.or_expr()?;
            self.skip_ws();
            self.expect(')', "')'")?;
            return Ok(expr);
        }

        let attr = self.attribute_name()?;
        self.skip_ws();
        let Some(op) = self.operator() else {
            return Ok(Expr::Exists(attr));
        };
        self.skip_ws();
        let value_at = self.pos;
        let value = self.value()?;
        let value = check_value(op, value, value_at)?;
        Ok(Expr::Compare { attr, op, value })
    }

    fn attribute_name(&mut self) -> SelectorResult<String> {
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            None => return Err(self.error(SelectorErrorKind::UnexpectedEnd)),
            Some(_) => return Err(self.error(SelectorErrorKind::Expected("attribute name"))),
        }
        let name = self.take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.'));
        Ok(name.to_string())
    }

    fn operator(&mut self) -> Option<Op> {
        let op = Op::ALL
            .into_iter()
            .find(|op| self.rest().starts_with(op.token()))?;
        self.pos += op.token().len();
        Some(op)
    }

    fn value(&mut self) -> SelectorResult<Value> {
        match self.peek() {
            Some(quote @ ('\'' | '"')) => self.string(quote).map(Value::Str),
            Some(c) if c == '-' || c.is_ascii_digit() => self.integer(),
            Some(c) if c.is_ascii_alphabetic() => {
                let start = self.pos;
                match self.take_while(|c| c.is_ascii_alphanumeric()) {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    "null" => Ok(Value::Null),
                    _ => Err(SelectorError::new(SelectorErrorKind::Expected("value"), start)),
                }
            }
            None => Err(self.error(SelectorErrorKind::UnexpectedEnd)),
            Some(_) => Err(self.error(SelectorErrorKind::Expected("value"))),
        }
    }

    fn integer(&mut self) -> SelectorResult<Value> {
        let start = self.pos;
        self.eat('-');
        self.take_while(|c| c.is_ascii_digit());
        let text = &self.input[start..self.pos];
        text.parse::<i64>().map(Value::Int).map_err(|_| {
            SelectorError::new(SelectorErrorKind::InvalidNumber(text.to_string()), start)
        })
    }

    fn string(&mut self, quote: char) -> SelectorResult<String> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        loop {
            let escape_at = self.pos;
            match self.bump() {
                None => {
                    return Err(SelectorError::new(
                        SelectorErrorKind::UnterminatedString,
                        start,
                    ))
                }
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some(c @ ('\\' | '\'' | '"')) => c,
                        Some('u') => self.unicode_escape(escape_at)?,
                        Some(_) | None => {
                            return Err(SelectorError::new(
                                SelectorErrorKind::InvalidEscape,
                                escape_at,
                            ))
                        }
                    };
                    out.push(escaped);
                }
                Some(c) => out.push(c),
            }
        }
    }

    /// `\uXXXX`, cursor just past the `u`
    fn unicode_escape(&mut self, escape_at: usize) -> SelectorResult<char> {
        let invalid = SelectorError::new(SelectorErrorKind::InvalidEscape, escape_at);
        let hex = self.rest().get(..4).ok_or_else(|| invalid.clone())?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid);
        }
        let code = u32::from_str_radix(hex, 16).map_err(|_| invalid.clone())?;
        self.pos += 4;
        char::from_u32(code).ok_or(invalid)
    }
}

fn is_relation_char(c: char) -> bool {
    matches!(c, '>' | '<' | '+' | '-' | '~')
}

/// Reject value kinds an operator cannot compare against and compile regexes
fn check_value(op: Op, value: Value, at: usize) -> SelectorResult<Value> {
    let compatible = match op {
        Op::Eq | Op::NotEq => true,
        Op::StartsWith
        | Op::NotStartsWith
        | Op::Contains
        | Op::NotContains
        | Op::EndsWith
        | Op::NotEndsWith
        | Op::Matches
        | Op::NotMatches => matches!(value, Value::Str(_)),
        Op::Lt | Op::Le | Op::Gt | Op::Ge => matches!(value, Value::Str(_) | Value::Int(_)),
    };
    if !compatible {
        return Err(SelectorError::new(
            SelectorErrorKind::IncompatibleValue {
                op: op.token(),
                value: value.to_string(),
            },
            at,
        ));
    }

    match (op, value) {
        (Op::Matches | Op::NotMatches, Value::Str(source)) => {
            let regex = Regex::new(&format!("^(?:{})$", source)).map_err(|e| {
                SelectorError::new(SelectorErrorKind::InvalidRegex(e.to_string()), at)
            })?;
            Ok(Value::Regex { source, regex })
        }
        (_, value) => Ok(value),
    }
}
