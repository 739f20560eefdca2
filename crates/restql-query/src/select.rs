//! Select-expression parser.
//!
//! # Syntax
//!
//! ```text
//! select  = item *( "," item )
//! item    = column / embed / "*"
//! column  = [ alias ":" ] path [ "::" cast ]
//! embed   = [ alias ":" ] resource [ "!" constraint ] "(" select ")"
//! path    = name *( "." name )
//! ```
//!
//! A cast is stripped before the alias, so `label:created::text` is the column
//! `created` aliased as `label` and cast to `text`.

use std::fmt;

use crate::config::DEFAULT_MAX_EMBED_DEPTH;
use crate::error::SyntaxError;
use crate::lexer::{self, Token};

/// One entry of a select list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectNode {
    Column(ColumnNode),
    Embed(EmbedNode),
}

/// A column reference, possibly a dotted path into a json column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnNode {
    pub path: String,
    pub alias: Option<String>,
    pub cast: Option<String>,
}

/// A related resource pulled in through a declared relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedNode {
    pub resource: String,
    pub constraint: Option<String>,
    pub alias: Option<String>,
    pub select: Vec<SelectNode>,
}

impl ColumnNode {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            alias: None,
            cast: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_cast(mut self, cast: impl Into<String>) -> Self {
        self.cast = Some(cast.into());
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.path == "*"
    }

    /// Output key: the alias when present, otherwise the last path segment.
    pub fn output_key(&self) -> &str {
        match &self.alias {
            Some(alias) => alias,
            None => self.path.rsplit('.').next().unwrap_or(&self.path),
        }
    }
}

impl EmbedNode {
    pub fn output_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.resource)
    }
}

impl SelectNode {
    pub fn column(path: impl Into<String>) -> Self {
        Self::Column(ColumnNode::new(path))
    }

    pub fn wildcard() -> Self {
        Self::column("*")
    }
}

impl fmt::Display for ColumnNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(alias) = &self.alias {
            write!(f, "{alias}:")?;
        }
        f.write_str(&self.path)?;
        if let Some(cast) = &self.cast {
            write!(f, "::{cast}")?;
        }
        Ok(())
    }
}

impl fmt::Display for EmbedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(alias) = &self.alias {
            write!(f, "{alias}:")?;
        }
        f.write_str(&self.resource)?;
        if let Some(constraint) = &self.constraint {
            write!(f, "!{constraint}")?;
        }
        write!(f, "({})", render_select(&self.select))
    }
}

impl fmt::Display for SelectNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(c) => c.fmt(f),
            Self::Embed(e) => e.fmt(f),
        }
    }
}

/// Canonical text form of a select list. Parsing the result yields the same tree.
pub fn render_select(nodes: &[SelectNode]) -> String {
    nodes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Select parser bounded by a maximum embed nesting depth.
#[derive(Debug, Clone, Copy)]
pub struct SelectParser {
    max_depth: usize,
}

impl Default for SelectParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EMBED_DEPTH)
    }
}

impl SelectParser {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn parse(&self, input: &str) -> Result<Vec<SelectNode>, SyntaxError> {
        let tokens = lexer::tokenize(input, ',')?;
        if tokens.is_empty() {
            return Err(SyntaxError::EmptyInput);
        }
        self.parse_tokens(&tokens, 0)
    }

    fn parse_tokens(&self, tokens: &[Token], depth: usize) -> Result<Vec<SelectNode>, SyntaxError> {
        tokens
            .iter()
            .map(|token| self.parse_item(&token.text, depth))
            .collect()
    }

    fn parse_item(&self, text: &str, depth: usize) -> Result<SelectNode, SyntaxError> {
        if text.contains('(') || text.contains(')') {
            return self.parse_embed(text, depth).map(SelectNode::Embed);
        }
        parse_column(text).map(SelectNode::Column)
    }

    fn parse_embed(&self, text: &str, depth: usize) -> Result<EmbedNode, SyntaxError> {
        let malformed = || SyntaxError::MalformedEmbed {
            token: text.to_string(),
        };

        let open = text.find('(').ok_or_else(malformed)?;
        if !text.ends_with(')') {
            return Err(malformed());
        }
        let head = text[..open].trim();
        if head.is_empty() {
            return Err(malformed());
        }
        let body = &text[open + 1..text.len() - 1];

        let (alias, spec) = split_alias(head)?;
        let (resource, constraint) = match spec.split_once('!') {
            Some((resource, constraint)) => (resource, Some(constraint)),
            None => (spec, None),
        };
        if !lexer::is_identifier(resource) {
            return Err(malformed());
        }
        if constraint.is_some_and(|c| !lexer::is_identifier(c))
            || alias.is_some_and(|a| !lexer::is_identifier(a))
        {
            return Err(malformed());
        }

        if depth + 1 > self.max_depth {
            return Err(SyntaxError::NestingTooDeep {
                max: self.max_depth,
            });
        }

        let tokens = lexer::tokenize(body, ',')?;
        if tokens.is_empty() {
            return Err(SyntaxError::EmptyEmbedSelect {
                resource: resource.to_string(),
            });
        }
        let select = self.parse_tokens(&tokens, depth + 1)?;

        Ok(EmbedNode {
            resource: resource.to_string(),
            constraint: constraint.map(str::to_string),
            alias: alias.map(str::to_string),
            select,
        })
    }
}

/// Parse a select string with the default nesting bound.
pub fn parse_select(input: &str) -> Result<Vec<SelectNode>, SyntaxError> {
    SelectParser::default().parse(input)
}

fn parse_column(text: &str) -> Result<ColumnNode, SyntaxError> {
    let (rest, cast) = match text.find("::") {
        Some(idx) => {
            let path = &text[..idx];
            let cast = &text[idx + 2..];
            if path.is_empty() || cast.is_empty() || cast.contains(':') {
                return Err(SyntaxError::MalformedCast {
                    token: text.to_string(),
                });
            }
            (path, Some(cast))
        }
        None => (text, None),
    };

    let (alias, path) = split_alias(rest)?;

    if path == "*" && (alias.is_some() || cast.is_some()) {
        return Err(SyntaxError::InvalidWildcard {
            token: text.to_string(),
        });
    }

    Ok(ColumnNode {
        path: path.to_string(),
        alias: alias.map(str::to_string),
        cast: cast.map(str::to_string),
    })
}

/// Split a leading `alias:`; exactly one delimiter with both sides non-empty.
fn split_alias(text: &str) -> Result<(Option<&str>, &str), SyntaxError> {
    let malformed = || SyntaxError::MalformedAlias {
        token: text.to_string(),
    };
    match text.matches(':').count() {
        0 if text.is_empty() => Err(malformed()),
        0 => Ok((None, text)),
        1 => {
            let (alias, rest) = text.split_once(':').ok_or_else(malformed)?;
            if alias.is_empty() || rest.is_empty() {
                return Err(malformed());
            }
            Ok((Some(alias), rest))
        }
        _ => Err(malformed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(path: &str) -> SelectNode {
        SelectNode::column(path)
    }

    #[test]
    fn test_parse_columns() {
        let nodes = parse_select("id,name:alias,created::text").unwrap();
        assert_eq!(
            nodes,
            vec![
                col("id"),
                SelectNode::Column(ColumnNode::new("alias").with_alias("name")),
                SelectNode::Column(ColumnNode::new("created").with_cast("text")),
            ]
        );
    }

    #[test]
    fn test_cast_before_alias() {
        let nodes = parse_select("label:created::text").unwrap();
        assert_eq!(
            nodes,
            vec![SelectNode::Column(
                ColumnNode::new("created")
                    .with_alias("label")
                    .with_cast("text")
            )]
        );
    }

    #[test]
    fn test_parse_embed() {
        let nodes = parse_select("author(id,name)").unwrap();
        assert_eq!(
            nodes,
            vec![SelectNode::Embed(EmbedNode {
                resource: "author".into(),
                constraint: None,
                alias: None,
                select: vec![col("id"), col("name")],
            })]
        );
    }

    #[test]
    fn test_parse_embed_constraint() {
        let nodes = parse_select("author!fk_author(id)").unwrap();
        assert_eq!(
            nodes,
            vec![SelectNode::Embed(EmbedNode {
                resource: "author".into(),
                constraint: Some("fk_author".into()),
                alias: None,
                select: vec![col("id")],
            })]
        );
    }

    #[test]
    fn test_parse_embed_alias_and_constraint() {
        let nodes = parse_select("writer:users!fk_author(id,name)").unwrap();
        let SelectNode::Embed(embed) = &nodes[0] else {
            panic!("expected embed");
        };
        assert_eq!(embed.alias.as_deref(), Some("writer"));
        assert_eq!(embed.resource, "users");
        assert_eq!(embed.constraint.as_deref(), Some("fk_author"));
        assert_eq!(embed.output_key(), "writer");
    }

    #[test]
    fn test_nested_embeds() {
        let nodes = parse_select("id,comments(id,author(name))").unwrap();
        let SelectNode::Embed(comments) = &nodes[1] else {
            panic!("expected embed");
        };
        assert!(matches!(&comments.select[1], SelectNode::Embed(e) if e.resource == "author"));
    }

    #[test]
    fn test_wildcard() {
        assert_eq!(parse_select("*").unwrap(), vec![SelectNode::wildcard()]);
        assert!(matches!(
            parse_select("x:*"),
            Err(SyntaxError::InvalidWildcard { .. })
        ));
        assert!(matches!(
            parse_select("*::text"),
            Err(SyntaxError::InvalidWildcard { .. })
        ));
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(matches!(
            parse_select("author("),
            Err(SyntaxError::UnbalancedParens { .. })
        ));
        assert!(matches!(
            parse_select("a::"),
            Err(SyntaxError::MalformedCast { .. })
        ));
        assert!(matches!(
            parse_select("a:b:c"),
            Err(SyntaxError::MalformedAlias { .. })
        ));
        assert!(matches!(
            parse_select(":a"),
            Err(SyntaxError::MalformedAlias { .. })
        ));
        assert!(matches!(
            parse_select("::text"),
            Err(SyntaxError::MalformedCast { .. })
        ));
        assert!(matches!(parse_select(""), Err(SyntaxError::EmptyInput)));
        assert!(matches!(
            parse_select("id,,name"),
            Err(SyntaxError::EmptyToken { .. })
        ));
    }

    #[test]
    fn test_malformed_embeds() {
        assert!(matches!(
            parse_select("author()"),
            Err(SyntaxError::EmptyEmbedSelect { .. })
        ));
        assert!(matches!(
            parse_select("author(id)x"),
            Err(SyntaxError::MalformedEmbed { .. })
        ));
        assert!(matches!(
            parse_select("(id)"),
            Err(SyntaxError::MalformedEmbed { .. })
        ));
        assert!(matches!(
            parse_select("author!(id)"),
            Err(SyntaxError::MalformedEmbed { .. })
        ));
        assert!(matches!(
            parse_select("bad-name(id)"),
            Err(SyntaxError::MalformedEmbed { .. })
        ));
    }

    #[test]
    fn test_nesting_bound() {
        let parser = SelectParser::new(2);
        assert!(parser.parse("a(b(id))").is_ok());
        assert!(matches!(
            parser.parse("a(b(c(id)))"),
            Err(SyntaxError::NestingTooDeep { max: 2 })
        ));
    }

    #[test]
    fn test_render_round_trip() {
        let input = "id, w:users!fk_author(id,n:name::text), tags(*), data.meta";
        let parsed = parse_select(input).unwrap();
        let rendered = render_select(&parsed);
        assert_eq!(rendered, "id,w:users!fk_author(id,n:name::text),tags(*),data.meta");
        assert_eq!(parse_select(&rendered).unwrap(), parsed);
    }

    #[test]
    fn test_output_key() {
        assert_eq!(ColumnNode::new("data.meta.title").output_key(), "title");
        assert_eq!(
            ColumnNode::new("name").with_alias("n").output_key(),
            "n"
        );
    }
}
