//! Order parser.
//!
//! ```text
//! order    = entry *( "," entry )
//! entry    = column [ "." direction ] [ "." nulls ]
//! column   = name *( "." name )          ; a dotted path sorts by a json field
//! direction = "asc" / "desc"
//! nulls     = "nullsfirst" / "nullslast"
//! ```
//!
//! Names may be double-quoted to include dots (`"created.at".desc`). A quoted
//! name stays one column name all the way to the compiler and is never split
//! into a json path.
//! Entries keep their input order, which is the sort key precedence.

use std::collections::HashSet;
use std::fmt;

use crate::error::SyntaxError;
use crate::lexer::{self, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

impl NullsOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::First => "NULLS FIRST",
            Self::Last => "NULLS LAST",
        }
    }
}

/// One sort key. `nulls` of `None` leaves placement to the database default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSpec {
    pub column: String,
    pub json_path: Vec<String>,
    pub direction: Direction,
    pub nulls: Option<NullsOrder>,
}

impl OrderSpec {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            json_path: Vec::new(),
            direction: Direction::Asc,
            nulls: None,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            direction: Direction::Desc,
            ..Self::asc(column)
        }
    }

    pub fn nulls(mut self, nulls: NullsOrder) -> Self {
        self.nulls = Some(nulls);
        self
    }

    /// Column plus json path, dot-joined.
    pub fn target(&self) -> String {
        std::iter::once(self.column.as_str())
            .chain(self.json_path.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for OrderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.column.contains('.') {
            write!(f, "\"{}\"", self.column)?;
        } else {
            f.write_str(&self.column)?;
        }
        for key in &self.json_path {
            write!(f, ".{key}")?;
        }
        match self.direction {
            Direction::Asc => f.write_str(".asc")?,
            Direction::Desc => f.write_str(".desc")?,
        }
        match self.nulls {
            Some(NullsOrder::First) => f.write_str(".nullsfirst"),
            Some(NullsOrder::Last) => f.write_str(".nullslast"),
            None => Ok(()),
        }
    }
}

enum Modifier {
    Direction(Direction),
    Nulls(NullsOrder),
}

impl Modifier {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment.to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Direction(Direction::Asc)),
            "desc" => Some(Self::Direction(Direction::Desc)),
            "nullsfirst" => Some(Self::Nulls(NullsOrder::First)),
            "nullslast" => Some(Self::Nulls(NullsOrder::Last)),
            _ => None,
        }
    }
}

/// Parse an order string into sort keys, rejecting duplicate columns.
pub fn parse_order(input: &str) -> Result<Vec<OrderSpec>, SyntaxError> {
    let entries = lexer::tokenize(input, ',')?;
    if entries.is_empty() {
        return Err(SyntaxError::EmptyInput);
    }

    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(entries.len());
    for entry in &entries {
        let spec = parse_entry(entry)?;
        if !seen.insert((spec.column.clone(), spec.json_path.clone())) {
            return Err(SyntaxError::DuplicateOrderColumn {
                column: spec.target(),
            });
        }
        specs.push(spec);
    }
    Ok(specs)
}

fn parse_entry(entry: &Token) -> Result<OrderSpec, SyntaxError> {
    let mut segments = lexer::tokenize(&entry.text, '.')?;

    // Trailing keyword segments are modifiers; the first segment is always the column.
    let mut modifiers = Vec::new();
    while segments.len() > 1 {
        let Some(last) = segments.last() else { break };
        let Some(modifier) = Modifier::from_segment(&last.text) else {
            break;
        };
        modifiers.push((modifier, last.text.clone()));
        segments.pop();
    }
    modifiers.reverse();

    let mut direction = None;
    let mut nulls = None;
    for (modifier, text) in modifiers {
        let invalid = || SyntaxError::InvalidOrderModifier {
            token: entry.text.clone(),
            modifier: text.clone(),
        };
        match modifier {
            Modifier::Direction(d) if direction.is_none() && nulls.is_none() => {
                direction = Some(d)
            }
            Modifier::Nulls(n) if nulls.is_none() => nulls = Some(n),
            _ => return Err(invalid()),
        }
    }

    let mut names = segments.into_iter().map(|segment| name_of(&segment, entry));
    let column = names.next().ok_or_else(|| SyntaxError::MalformedOrder {
        token: entry.text.clone(),
    })??;
    let json_path = names.collect::<Result<Vec<_>, _>>()?;

    Ok(OrderSpec {
        column,
        json_path,
        direction: direction.unwrap_or_default(),
        nulls,
    })
}

fn name_of(segment: &Token, entry: &Token) -> Result<String, SyntaxError> {
    let name = match lexer::unquote(&segment.text) {
        Some(unquoted) => unquoted,
        None => segment.text.clone(),
    };
    if name.is_empty() || name.contains(['(', ')']) {
        return Err(SyntaxError::MalformedOrder {
            token: entry.text.clone(),
        });
    }
    Ok(name)
}
