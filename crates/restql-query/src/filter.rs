//! Filter expression parser.
//!
//! Parses a boolean expression over the columns of one table. Column names are
//! checked against the table's allow-list and literals are coerced to the
//! column type while parsing, so an unknown column or a bad literal is a 400
//! before any SQL exists.
//!
//! # Syntax
//!
//! ```text
//! expr       = or_expr
//! or_expr    = and_expr *( "or" and_expr )
//! and_expr   = not_expr *( "and" not_expr )
//! not_expr   = "not" not_expr / primary
//! primary    = "(" expr ")" / comparison
//! comparison = column op value / column "is" [ "not" ] "null"
//! column     = name *( "." name )
//! op         = "eq" / "neq" / "ne" / "lt" / "lte" / "gt" / "gte"
//!            / "like" / "ilike" / "in" / "cs" / "ov"
//! value      = quoted / word / "(" value *( "," value ) ")"
//! ```
//!
//! AND binds tighter than OR. Keywords are case-insensitive.
//!
//! # Examples
//!
//! ```text
//! status eq "published" and views gt 100
//! not (author_id in (1,2,3)) or title ilike "*rust*"
//! deleted_at is null
//! tags cs (db,sql)
//! meta.source eq import
//! ```

use crate::catalog::{ColumnDef, TableDef};
use crate::config::{DEFAULT_MAX_CONDITIONS, DEFAULT_MAX_FILTER_DEPTH};
use crate::error::{QueryError, Result, SyntaxError, ValidationError};
use crate::lexer;
use crate::sql_builder::{SqlValue, check_json_key};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    ILike,
    In,
    IsNull,
    IsNotNull,
    /// Array contains (`@>`)
    Contains,
    /// Array overlaps (`&&`)
    Overlaps,
}

impl Operator {
    fn from_keyword(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "eq" => Some(Self::Eq),
            "neq" | "ne" => Some(Self::Neq),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "like" => Some(Self::Like),
            "ilike" => Some(Self::ILike),
            "in" => Some(Self::In),
            "cs" => Some(Self::Contains),
            "ov" => Some(Self::Overlaps),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Like => "like",
            Self::ILike => "ilike",
            Self::In => "in",
            Self::IsNull => "is null",
            Self::IsNotNull => "is not null",
            Self::Contains => "cs",
            Self::Overlaps => "ov",
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "<>",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Like => "LIKE",
            Self::ILike => "ILIKE",
            Self::In => "IN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
            Self::Contains => "@>",
            Self::Overlaps => "&&",
        }
    }

    fn takes_list(self) -> bool {
        matches!(self, Self::In | Self::Contains | Self::Overlaps)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Scalar(SqlValue),
    List(Vec<SqlValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub column: String,
    /// Keys into a json column; empty for a plain column.
    pub json_path: Vec<String>,
    pub operator: Operator,
    pub value: Operand,
}

/// Filter AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Comparison(Comparison),
    /// `Not` always has exactly one operand.
    Logical {
        op: LogicalOp,
        operands: Vec<Expression>,
    },
}

impl Expression {
    pub fn comparison(column: impl Into<String>, operator: Operator, value: Operand) -> Self {
        Self::Comparison(Comparison {
            column: column.into(),
            json_path: Vec::new(),
            operator,
            value,
        })
    }

    pub fn and(operands: Vec<Expression>) -> Self {
        Self::combine(LogicalOp::And, operands)
    }

    pub fn or(operands: Vec<Expression>) -> Self {
        Self::combine(LogicalOp::Or, operands)
    }

    pub fn negate(expr: Expression) -> Self {
        Self::Logical {
            op: LogicalOp::Not,
            operands: vec![expr],
        }
    }

    /// Join operands with `op`, flattening nested nodes of the same connective.
    fn combine(op: LogicalOp, operands: Vec<Expression>) -> Self {
        let mut flat = Vec::with_capacity(operands.len());
        for operand in operands {
            match operand {
                Self::Logical {
                    op: inner,
                    operands,
                } if inner == op => flat.extend(operands),
                other => flat.push(other),
            }
        }
        if flat.len() == 1
            && let Some(only) = flat.pop()
        {
            return only;
        }
        Self::Logical { op, operands: flat }
    }

    /// Number of comparison leaves.
    pub fn comparison_count(&self) -> usize {
        match self {
            Self::Comparison(_) => 1,
            Self::Logical { operands, .. } => operands.iter().map(Self::comparison_count).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    OpenParen,
    CloseParen,
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Word(w) => w.clone(),
            Self::Quoted(s) => format!("\"{s}\""),
            Self::OpenParen => "(".to_string(),
            Self::CloseParen => ")".to_string(),
            Self::Eof => "end of input".to_string(),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | ':' | '+' | '*' | '%')
}

struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    /// Next token and the byte offset it starts at.
    fn next_token(&mut self) -> std::result::Result<(Token, usize), SyntaxError> {
        self.skip_whitespace();
        let start = self.pos;

        let Some(ch) = self.peek_char() else {
            return Ok((Token::Eof, start));
        };

        match ch {
            '(' => {
                self.pos += 1;
                return Ok((Token::OpenParen, start));
            }
            ')' => {
                self.pos += 1;
                return Ok((Token::CloseParen, start));
            }
            '"' | '\'' => return self.quoted(ch, start).map(|s| (Token::Quoted(s), start)),
            _ => {}
        }

        while let Some(c) = self.peek_char() {
            if !is_word_char(c) {
                break;
            }
            self.pos += c.len_utf8();
        }

        if self.pos == start {
            return Err(SyntaxError::UnexpectedChar {
                ch,
                position: start,
            });
        }

        Ok((Token::Word(self.input[start..self.pos].to_string()), start))
    }

    fn quoted(&mut self, quote: char, start: usize) -> std::result::Result<String, SyntaxError> {
        self.pos += quote.len_utf8();
        let mut value = String::new();
        let mut escaped = false;
        while let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
            if escaped {
                value.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                return Ok(value);
            } else {
                value.push(c);
            }
        }
        Err(SyntaxError::UnbalancedQuotes {
            quote,
            position: start,
        })
    }

    /// Raw body of a group whose `(` was just consumed, up to the matching `)`.
    fn take_group(&mut self, open: usize) -> std::result::Result<&'a str, SyntaxError> {
        let body_start = self.pos;
        let mut depth = 1usize;
        let mut quote: Option<char> = None;
        let mut escaped = false;

        for (offset, c) in self.input[body_start..].char_indices() {
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        let end = body_start + offset;
                        self.pos = end + 1;
                        return Ok(&self.input[body_start..end]);
                    }
                }
                _ => {}
            }
        }

        Err(SyntaxError::UnbalancedParens { position: open })
    }
}

/// Table-aware filter parser.
#[derive(Debug, Clone, Copy)]
pub struct FilterParser<'a> {
    table: &'a TableDef,
    max_depth: usize,
    max_conditions: usize,
}

impl<'a> FilterParser<'a> {
    pub fn new(table: &'a TableDef) -> Self {
        Self {
            table,
            max_depth: DEFAULT_MAX_FILTER_DEPTH,
            max_conditions: DEFAULT_MAX_CONDITIONS,
        }
    }

    pub fn with_limits(mut self, max_depth: usize, max_conditions: usize) -> Self {
        self.max_depth = max_depth;
        self.max_conditions = max_conditions;
        self
    }

    pub fn parse(&self, input: &str) -> Result<Expression> {
        if input.trim().is_empty() {
            return Err(SyntaxError::EmptyInput.into());
        }

        let mut parser = Parser::new(input, *self)?;
        let expr = parser.parse_or()?;

        if parser.current != Token::Eof {
            return Err(SyntaxError::UnexpectedToken {
                found: parser.current.describe(),
                expected: "'and', 'or' or end of filter",
                position: parser.position,
            }
            .into());
        }

        Ok(expr)
    }
}

struct Parser<'a> {
    tokenizer: Tokenizer<'a>,
    current: Token,
    position: usize,
    limits: FilterParser<'a>,
    depth: usize,
    conditions: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, limits: FilterParser<'a>) -> Result<Self> {
        let mut tokenizer = Tokenizer::new(input);
        let (current, position) = tokenizer.next_token()?;
        Ok(Self {
            tokenizer,
            current,
            position,
            limits,
            depth: 0,
            conditions: 0,
        })
    }

    fn advance(&mut self) -> Result<()> {
        let (token, position) = self.tokenizer.next_token()?;
        self.current = token;
        self.position = position;
        Ok(())
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.current, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }

    fn unexpected(&self, expected: &'static str) -> QueryError {
        match &self.current {
            Token::Eof => SyntaxError::UnexpectedEnd { expected }.into(),
            other => SyntaxError::UnexpectedToken {
                found: other.describe(),
                expected,
                position: self.position,
            }
            .into(),
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            return Err(SyntaxError::NestingTooDeep {
                max: self.limits.max_depth,
            }
            .into());
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_or(&mut self) -> Result<Expression> {
        let mut operands = vec![self.parse_and()?];
        while self.is_keyword("or") {
            self.advance()?;
            operands.push(self.parse_and()?);
        }
        Ok(Expression::or(operands))
    }

    fn parse_and(&mut self) -> Result<Expression> {
        let mut operands = vec![self.parse_not()?];
        while self.is_keyword("and") {
            self.advance()?;
            operands.push(self.parse_not()?);
        }
        Ok(Expression::and(operands))
    }

    fn parse_not(&mut self) -> Result<Expression> {
        if self.is_keyword("not") {
            self.enter()?;
            self.advance()?;
            let inner = self.parse_not()?;
            self.leave();
            return Ok(Expression::negate(inner));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expression> {
        if self.current == Token::OpenParen {
            self.enter()?;
            self.advance()?;
            let expr = self.parse_or()?;
            if self.current != Token::CloseParen {
                return Err(self.unexpected("')'"));
            }
            self.advance()?;
            self.leave();
            return Ok(expr);
        }

        let path = match &self.current {
            Token::Word(w) => w.clone(),
            _ => return Err(self.unexpected("column name")),
        };
        self.advance()?;
        self.parse_comparison(&path)
    }

    fn parse_comparison(&mut self, path: &str) -> Result<Expression> {
        self.conditions += 1;
        if self.conditions > self.limits.max_conditions {
            return Err(ValidationError::QueryTooComplex {
                reason: format!(
                    "filter has more than {} conditions",
                    self.limits.max_conditions
                ),
            }
            .into());
        }

        let (column, json_path) = resolve_path(self.limits.table, path)?;

        let operator = if self.is_keyword("is") {
            self.advance()?;
            let negated = self.is_keyword("not");
            if negated {
                self.advance()?;
            }
            if !self.is_keyword("null") {
                return Err(self.unexpected("'null'"));
            }
            self.advance()?;
            if negated {
                Operator::IsNotNull
            } else {
                Operator::IsNull
            }
        } else {
            let op = match &self.current {
                Token::Word(w) => Operator::from_keyword(w),
                _ => None,
            }
            .ok_or_else(|| self.unexpected("comparison operator"))?;
            self.advance()?;
            op
        };

        check_operator(column, !json_path.is_empty(), operator)?;

        let value = match operator {
            Operator::IsNull | Operator::IsNotNull => Operand::None,
            op if op.takes_list() => Operand::List(self.parse_list(column, &json_path, op)?),
            op => {
                let raw = self.parse_scalar()?;
                Operand::Scalar(coerce_operand(column, &json_path, op, &raw)?)
            }
        };

        Ok(Expression::Comparison(Comparison {
            column: column.name.clone(),
            json_path,
            operator,
            value,
        }))
    }

    fn parse_scalar(&mut self) -> Result<String> {
        let value = match &self.current {
            Token::Word(w) if w.eq_ignore_ascii_case("null") => {
                return Err(SyntaxError::UnexpectedToken {
                    found: w.clone(),
                    expected: "a value (test for null with 'is null')",
                    position: self.position,
                }
                .into());
            }
            Token::Word(w) | Token::Quoted(w) => w.clone(),
            _ => return Err(self.unexpected("value")),
        };
        self.advance()?;
        Ok(value)
    }

    fn parse_list(
        &mut self,
        column: &ColumnDef,
        json_path: &[String],
        op: Operator,
    ) -> Result<Vec<SqlValue>> {
        if self.current != Token::OpenParen {
            return Err(self.unexpected("'(' starting a list"));
        }
        let open = self.position;
        let body = self.tokenizer.take_group(open)?;
        let items = lexer::tokenize(body, ',')?;
        if items.is_empty() {
            return Err(SyntaxError::EmptyList {
                operator: op.as_str(),
            }
            .into());
        }

        let mut values = Vec::with_capacity(items.len());
        for item in &items {
            let (raw, quoted) = match lexer::unquote(&item.text) {
                Some(unquoted) => (unquoted, true),
                None if item.text.contains(['(', ')', '"', '\'']) => {
                    return Err(SyntaxError::UnexpectedToken {
                        found: item.text.clone(),
                        expected: "a list value",
                        position: open + 1 + item.offset,
                    }
                    .into());
                }
                None => (item.text.clone(), false),
            };
            if !quoted && raw.eq_ignore_ascii_case("null") {
                return Err(SyntaxError::UnexpectedToken {
                    found: raw,
                    expected: "a list value",
                    position: open + 1 + item.offset,
                }
                .into());
            }
            values.push(coerce_operand(column, json_path, op, &raw)?);
        }

        self.advance()?;
        Ok(values)
    }
}

/// Resolve `column[.key...]` against the table.
pub(crate) fn resolve_path<'t>(
    table: &'t TableDef,
    path: &str,
) -> std::result::Result<(&'t ColumnDef, Vec<String>), ValidationError> {
    let mut segments = path.split('.');
    let name = segments.next().unwrap_or_default();
    let json_path: Vec<String> = segments.map(str::to_string).collect();
    let column = resolve_parts(table, name, &json_path)?;
    Ok((column, json_path))
}

/// Resolve an already split column name and json path. The name is taken
/// as-is, so a quoted name containing dots never turns into a path.
pub(crate) fn resolve_parts<'t>(
    table: &'t TableDef,
    name: &str,
    json_path: &[String],
) -> std::result::Result<&'t ColumnDef, ValidationError> {
    let column = table.require_column(name)?;
    if !json_path.is_empty() {
        if column.array || !column.data_type.is_json() {
            return Err(ValidationError::NotJsonColumn {
                column: column.name.clone(),
            });
        }
        for key in json_path {
            check_json_key(key)?;
        }
    }
    Ok(column)
}

fn check_operator(
    column: &ColumnDef,
    has_json_path: bool,
    op: Operator,
) -> std::result::Result<(), ValidationError> {
    let reject = |reason: &'static str| -> std::result::Result<(), ValidationError> {
        Err(ValidationError::UnsupportedOperator {
            column: column.name.clone(),
            operator: op.as_str(),
            reason,
        })
    };

    match op {
        Operator::IsNull | Operator::IsNotNull => Ok(()),
        Operator::Contains | Operator::Overlaps if has_json_path => {
            reject("json fields compare as text")
        }
        _ if has_json_path => Ok(()),
        Operator::Contains | Operator::Overlaps if !column.array => {
            reject("cs and ov require an array column")
        }
        _ if column.array && !matches!(op, Operator::Contains | Operator::Overlaps) => {
            reject("array columns support cs, ov and is null")
        }
        _ if column.data_type.is_json() && !matches!(op, Operator::Eq | Operator::Neq) => {
            reject("compare a nested field with a dotted path")
        }
        Operator::Like | Operator::ILike if !column.data_type.is_textual() => {
            reject("pattern matching requires a text column")
        }
        _ => Ok(()),
    }
}

fn coerce_operand(
    column: &ColumnDef,
    json_path: &[String],
    op: Operator,
    raw: &str,
) -> std::result::Result<SqlValue, ValidationError> {
    if matches!(op, Operator::Like | Operator::ILike) {
        return Ok(SqlValue::Text(raw.replace('*', "%")));
    }
    if !json_path.is_empty() {
        // Nested json fields compare as text.
        return Ok(SqlValue::Text(raw.to_string()));
    }
    SqlValue::coerce_literal(column, raw)
}
