//! Validation of untrusted aggregate query text.
//!
//! Query text may come from a language model, so it is parsed against the one
//! shape this system executes:
//!
//! ```text
//! SELECT <fn>(value | *) [AS alias] FROM observations
//!   WHERE column_name = '<column>' AND user_id = '<user>' [;]
//! ```
//!
//! The two conditions may appear in either order. `<fn>` must be an
//! [`AggregateFn`], and both literals must match the request exactly. The
//! outcome is an [`AggregateQuery`]; the text itself is never executed.

use thiserror::Error;

use crate::aggregate::{AggregateFn, AggregateQuery, AggregateRequest, OBSERVATIONS_TABLE};

/// Why a query text was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryRejection {
  #[error("query text is empty")]
  Empty,

  #[error("syntax error: {0}")]
  Syntax(String),

  #[error("unsupported aggregate function: {0}")]
  UnsupportedFunction(String),

  #[error("query computes {found} but {expected} was requested")]
  FunctionMismatch {
    expected: AggregateFn,
    found:    AggregateFn,
  },

  #[error("query reads from {0:?}, not {OBSERVATIONS_TABLE}")]
  WrongTable(String),

  #[error("query filters on column {found:?}, expected {expected:?}")]
  ForeignColumn { expected: String, found: String },

  #[error("query filters on user {found:?}, expected {expected:?}")]
  ForeignUser { expected: String, found: String },
}

/// Parse `text` and check it against `request`.
pub fn validate_query(
  text: &str,
  request: &AggregateRequest,
) -> Result<AggregateQuery, QueryRejection> {
  let tokens = tokenize(text)?;
  if tokens.is_empty() {
    return Err(QueryRejection::Empty);
  }

  let mut p = Parser { tokens, pos: 0 };

  p.keyword("SELECT")?;
  let fn_name = p.word()?;
  let function = AggregateFn::from_keyword(&fn_name)
    .ok_or_else(|| QueryRejection::UnsupportedFunction(fn_name.clone()))?;

  p.punct('(')?;
  if p.eat_punct('*') {
    if function != AggregateFn::Count {
      return Err(QueryRejection::Syntax(format!("{function}(*) is not allowed")));
    }
  } else {
    let arg = p.identifier()?;
    if !arg.eq_ignore_ascii_case("value") {
      return Err(QueryRejection::Syntax(format!(
        "aggregate argument must be `value`, found {arg:?}"
      )));
    }
  }
  p.punct(')')?;

  if p.eat_keyword("AS") {
    p.identifier()?;
  }

  p.keyword("FROM")?;
  let table = p.identifier()?;
  if !table.eq_ignore_ascii_case(OBSERVATIONS_TABLE) {
    return Err(QueryRejection::WrongTable(table));
  }

  p.keyword("WHERE")?;
  let first = p.condition()?;
  p.keyword("AND")?;
  let second = p.condition()?;
  p.eat_punct(';');
  if let Some(tok) = p.peek() {
    return Err(QueryRejection::Syntax(format!("unexpected trailing {tok}")));
  }

  let (column, user_id) = match (first, second) {
    ((Filter::Column, c), (Filter::User, u)) | ((Filter::User, u), (Filter::Column, c)) => (c, u),
    _ => {
      return Err(QueryRejection::Syntax(
        "expected one column_name and one user_id condition".into(),
      ));
    }
  };

  if column != request.column() {
    return Err(QueryRejection::ForeignColumn {
      expected: request.column().to_owned(),
      found:    column,
    });
  }
  if user_id != request.user_id() {
    return Err(QueryRejection::ForeignUser {
      expected: request.user_id().to_owned(),
      found:    user_id,
    });
  }
  if let Some(expected) = request.known_function()
    && expected != function
  {
    return Err(QueryRejection::FunctionMismatch { expected, found: function });
  }

  Ok(AggregateQuery { function, column, user_id })
}

// ─── Tokens ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
  /// Bare keyword or identifier.
  Word(String),
  /// Backtick- or bracket-quoted identifier.
  Ident(String),
  /// Double-quoted text; an identifier or a string depending on position.
  DoubleQuoted(String),
  /// Single-quoted string literal.
  Str(String),
  Punct(char),
}

impl std::fmt::Display for Token {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Token::Word(w) => write!(f, "`{w}`"),
      Token::Ident(i) | Token::DoubleQuoted(i) => write!(f, "identifier {i:?}"),
      Token::Str(s) => write!(f, "string {s:?}"),
      Token::Punct(c) => write!(f, "`{c}`"),
    }
  }
}

fn tokenize(text: &str) -> Result<Vec<Token>, QueryRejection> {
  let mut tokens = Vec::new();
  let mut chars = text.chars().peekable();

  while let Some(&c) = chars.peek() {
    match c {
      c if c.is_whitespace() => {
        chars.next();
      }
      '(' | ')' | '=' | ';' | '*' => {
        chars.next();
        tokens.push(Token::Punct(c));
      }
      '\'' | '"' => {
        chars.next();
        let body = quoted(&mut chars, c)?;
        tokens.push(if c == '\'' { Token::Str(body) } else { Token::DoubleQuoted(body) });
      }
      '`' => {
        chars.next();
        tokens.push(Token::Ident(quoted(&mut chars, '`')?));
      }
      '[' => {
        chars.next();
        tokens.push(Token::Ident(quoted(&mut chars, ']')?));
      }
      c if c.is_ascii_alphabetic() || c == '_' => {
        let mut word = String::new();
        while let Some(&c) = chars.peek() {
          if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
            chars.next();
          } else {
            break;
          }
        }
        tokens.push(Token::Word(word));
      }
      other => {
        return Err(QueryRejection::Syntax(format!("unexpected character {other:?}")));
      }
    }
  }

  Ok(tokens)
}

/// Read up to the closing `close`; a doubled closing quote is an escape.
fn quoted(
  chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
  close: char,
) -> Result<String, QueryRejection> {
  let mut out = String::new();
  loop {
    match chars.next() {
      Some(c) if c == close => {
        if chars.peek() == Some(&close) {
          out.push(close);
          chars.next();
        } else {
          return Ok(out);
        }
      }
      Some(c) => out.push(c),
      None => return Err(QueryRejection::Syntax("unterminated quote".into())),
    }
  }
}

// ─── Parser ──────────────────────────────────────────────────────────────────

enum Filter {
  Column,
  User,
}

struct Parser {
  tokens: Vec<Token>,
  pos:    usize,
}

impl Parser {
  fn peek(&self) -> Option<&Token> { self.tokens.get(self.pos) }

  fn next(&mut self) -> Result<Token, QueryRejection> {
    let tok = self
      .tokens
      .get(self.pos)
      .cloned()
      .ok_or_else(|| QueryRejection::Syntax("unexpected end of query".into()))?;
    self.pos += 1;
    Ok(tok)
  }

  fn keyword(&mut self, kw: &str) -> Result<(), QueryRejection> {
    match self.next()? {
      Token::Word(w) if w.eq_ignore_ascii_case(kw) => Ok(()),
      other => Err(QueryRejection::Syntax(format!("expected {kw}, found {other}"))),
    }
  }

  fn eat_keyword(&mut self, kw: &str) -> bool {
    if matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(kw)) {
      self.pos += 1;
      true
    } else {
      false
    }
  }

  fn punct(&mut self, p: char) -> Result<(), QueryRejection> {
    match self.next()? {
      Token::Punct(c) if c == p => Ok(()),
      other => Err(QueryRejection::Syntax(format!("expected `{p}`, found {other}"))),
    }
  }

  fn eat_punct(&mut self, p: char) -> bool {
    if self.peek() == Some(&Token::Punct(p)) {
      self.pos += 1;
      true
    } else {
      false
    }
  }

  fn word(&mut self) -> Result<String, QueryRejection> {
    match self.next()? {
      Token::Word(w) => Ok(w),
      other => Err(QueryRejection::Syntax(format!("expected a name, found {other}"))),
    }
  }

  fn identifier(&mut self) -> Result<String, QueryRejection> {
    match self.next()? {
      Token::Word(w) | Token::Ident(w) | Token::DoubleQuoted(w) => Ok(w),
      other => Err(QueryRejection::Syntax(format!("expected an identifier, found {other}"))),
    }
  }

  fn literal(&mut self) -> Result<String, QueryRejection> {
    match self.next()? {
      Token::Str(s) | Token::DoubleQuoted(s) => Ok(s),
      other => Err(QueryRejection::Syntax(format!("expected a string literal, found {other}"))),
    }
  }

  fn condition(&mut self) -> Result<(Filter, String), QueryRejection> {
    let name = self.identifier()?;
    let filter = if name.eq_ignore_ascii_case("column_name") {
      Filter::Column
    } else if name.eq_ignore_ascii_case("user_id") {
      Filter::User
    } else {
      return Err(QueryRejection::Syntax(format!("cannot filter on {name:?}")));
    };
    self.punct('=')?;
    Ok((filter, self.literal()?))
  }
}
