//! Parser for builder-call item references:
//! `Dimension('listing__country')`, `TimeDimension('metric_time', 'day')`,
//! `Entity('user', entity_path=['listing'])`, `Metric('bookings', group_by=['listing'])`,
//! including chained calls like `Dimension('booking__ds').grain('month')`.
//!
//! Token-level problems (stray characters, unbalanced brackets) are
//! `QueryItemSyntax` errors. Well-formed calls with the wrong shape (unknown
//! function, missing name, unexpected argument) are `InvalidQuerySyntax` errors.

use crate::error::ItemParseError;
use crate::specs::spec::ItemKind;

/// Raw, uninterpreted content of a builder call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectBuilderItemDescription {
    pub item_kind: Option<ItemKind>,
    pub item_name: String,
    pub entity_path: Vec<String>,
    pub time_granularity_name: Option<String>,
    pub date_part_name: Option<String>,
    pub group_by: Option<Vec<String>>,
    pub descending: Option<bool>,
}

pub fn parse_builder_call(input: &str) -> Result<ObjectBuilderItemDescription, ItemParseError> {
    let tokens = tokenize(input)?;
    let calls = Cursor::new(&tokens, input).parse_chain()?;
    interpret(input, calls)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Equals,
    Dot,
}

fn syntax_error(input: &str, detail: impl std::fmt::Display) -> ItemParseError {
    ItemParseError::QueryItemSyntax(format!("unable to parse '{input}': {detail}"))
}

fn shape_error(input: &str, detail: impl std::fmt::Display) -> ItemParseError {
    ItemParseError::InvalidQuerySyntax(format!("invalid item '{input}': {detail}"))
}

fn tokenize(input: &str) -> Result<Vec<Token>, ItemParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '[' => tokens.push(Token::LBracket),
            ']' => tokens.push(Token::RBracket),
            ',' => tokens.push(Token::Comma),
            '=' => tokens.push(Token::Equals),
            '.' => tokens.push(Token::Dot),
            '\'' | '"' => {
                let mut value = String::new();
                let mut closed = false;
                for (_, next) in chars.by_ref() {
                    if next == c {
                        closed = true;
                        break;
                    }
                    value.push(next);
                }
                if !closed {
                    return Err(syntax_error(
                        input,
                        format!("unterminated string starting at offset {idx}"),
                    ));
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut ident = c.to_string();
                while let Some((_, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() || *next == '_' {
                        ident.push(*next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(syntax_error(
                    input,
                    format!("unexpected character '{other}' at offset {idx}"),
                ))
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    List(Vec<String>),
    Bool(bool),
}

#[derive(Debug)]
struct Call {
    name: String,
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
}

struct Cursor<'t> {
    tokens: &'t [Token],
    pos: usize,
    input: &'t str,
}

impl<'t> Cursor<'t> {
    fn new(tokens: &'t [Token], input: &'t str) -> Self {
        Self {
            tokens,
            pos: 0,
            input,
        }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ItemParseError> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(syntax_error(
                self.input,
                format!("expected {expected:?}, found {t:?}"),
            )),
            None => Err(syntax_error(
                self.input,
                format!("expected {expected:?}, found end of input"),
            )),
        }
    }

    fn parse_chain(&mut self) -> Result<Vec<Call>, ItemParseError> {
        let mut calls = vec![self.parse_call()?];
        while let Some(Token::Dot) = self.peek() {
            self.advance();
            calls.push(self.parse_call()?);
        }
        if let Some(extra) = self.peek() {
            return Err(syntax_error(
                self.input,
                format!("unexpected trailing {extra:?}"),
            ));
        }
        Ok(calls)
    }

    fn parse_call(&mut self) -> Result<Call, ItemParseError> {
        let name = match self.advance() {
            Some(Token::Ident(name)) => name.clone(),
            other => {
                return Err(syntax_error(
                    self.input,
                    format!("expected a function name, found {other:?}"),
                ))
            }
        };
        self.expect(&Token::LParen)?;

        let mut call = Call {
            name,
            positional: Vec::new(),
            keyword: Vec::new(),
        };
        loop {
            if let Some(Token::RParen) = self.peek() {
                self.advance();
                break;
            }
            let is_keyword = matches!(
                (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)),
                (Some(Token::Ident(_)), Some(Token::Equals))
            );
            if is_keyword {
                let key = match self.advance() {
                    Some(Token::Ident(key)) => key.clone(),
                    _ => unreachable!("keyword lookahead checked"),
                };
                self.advance();
                let value = self.parse_value()?;
                call.keyword.push((key, value));
            } else {
                if !call.keyword.is_empty() {
                    return Err(shape_error(
                        self.input,
                        "positional argument follows keyword argument",
                    ));
                }
                let value = self.parse_value()?;
                call.positional.push(value);
            }
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                other => {
                    return Err(syntax_error(
                        self.input,
                        format!("expected ',' or ')', found {other:?}"),
                    ))
                }
            }
        }
        Ok(call)
    }

    fn parse_value(&mut self) -> Result<Value, ItemParseError> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Value::Str(s.clone())),
            Some(Token::Ident(i)) if i == "True" => Ok(Value::Bool(true)),
            Some(Token::Ident(i)) if i == "False" => Ok(Value::Bool(false)),
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                loop {
                    match self.advance() {
                        Some(Token::RBracket) => break,
                        Some(Token::Str(s)) => {
                            items.push(s.clone());
                            match self.advance() {
                                Some(Token::Comma) => continue,
                                Some(Token::RBracket) => break,
                                other => {
                                    return Err(syntax_error(
                                        self.input,
                                        format!("expected ',' or ']', found {other:?}"),
                                    ))
                                }
                            }
                        }
                        other => {
                            return Err(syntax_error(
                                self.input,
                                format!("expected a string in list, found {other:?}"),
                            ))
                        }
                    }
                }
                Ok(Value::List(items))
            }
            other => Err(syntax_error(
                self.input,
                format!("expected a value, found {other:?}"),
            )),
        }
    }
}

fn expect_str(input: &str, arg: &str, value: Value) -> Result<String, ItemParseError> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(shape_error(
            input,
            format!("'{arg}' must be a string, got {other:?}"),
        )),
    }
}

fn expect_list(input: &str, arg: &str, value: Value) -> Result<Vec<String>, ItemParseError> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(shape_error(
            input,
            format!("'{arg}' must be a list of strings, got {other:?}"),
        )),
    }
}

fn expect_bool(input: &str, arg: &str, value: Value) -> Result<bool, ItemParseError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(shape_error(
            input,
            format!("'{arg}' must be True or False, got {other:?}"),
        )),
    }
}

fn interpret(
    input: &str,
    calls: Vec<Call>,
) -> Result<ObjectBuilderItemDescription, ItemParseError> {
    let mut calls = calls.into_iter();
    let Some(head) = calls.next() else {
        return Err(syntax_error(input, "empty expression"));
    };
    let kind = ItemKind::from_builder_name(&head.name).ok_or_else(|| {
        shape_error(
            input,
            format!(
                "unknown item type '{}', expected one of Dimension, TimeDimension, Entity, Metric",
                head.name
            ),
        )
    })?;
    let time_like = matches!(kind, ItemKind::Dimension | ItemKind::TimeDimension);

    let mut description = ObjectBuilderItemDescription {
        item_kind: Some(kind),
        ..Default::default()
    };

    let max_positional = match kind {
        ItemKind::Dimension | ItemKind::TimeDimension | ItemKind::Metric => 2,
        ItemKind::Entity => 1,
    };
    if head.positional.len() > max_positional {
        return Err(shape_error(
            input,
            format!(
                "{} takes at most {max_positional} positional arguments",
                kind.builder_name()
            ),
        ));
    }
    let mut positional = head.positional.into_iter();
    match positional.next() {
        Some(value) => description.item_name = expect_str(input, "name", value)?,
        None => return Err(shape_error(input, "missing item name")),
    }
    if let Some(value) = positional.next() {
        if kind == ItemKind::Metric {
            description.group_by = Some(expect_list(input, "group_by", value)?);
        } else {
            description.time_granularity_name =
                Some(expect_str(input, "time_granularity_name", value)?);
        }
    }

    for (key, value) in head.keyword {
        match key.as_str() {
            "entity_path" if kind != ItemKind::Metric => {
                description.entity_path = expect_list(input, &key, value)?;
            }
            "time_granularity_name" if time_like => {
                description.time_granularity_name = Some(expect_str(input, &key, value)?);
            }
            "date_part_name" if time_like => {
                description.date_part_name = Some(expect_str(input, &key, value)?);
            }
            "group_by" if kind == ItemKind::Metric => {
                description.group_by = Some(expect_list(input, &key, value)?);
            }
            "descending" => {
                description.descending = Some(expect_bool(input, &key, value)?);
            }
            _ => {
                return Err(shape_error(
                    input,
                    format!(
                        "unexpected argument '{key}' for {}",
                        kind.builder_name()
                    ),
                ))
            }
        }
    }

    for call in calls {
        if !call.keyword.is_empty() || call.positional.len() != 1 {
            return Err(shape_error(
                input,
                format!("'.{}()' takes exactly one positional argument", call.name),
            ));
        }
        let value = call.positional.into_iter().next().ok_or_else(|| {
            shape_error(input, format!("'.{}()' is missing its argument", call.name))
        })?;
        match call.name.as_str() {
            "grain" if time_like => {
                description.time_granularity_name = Some(expect_str(input, "grain", value)?);
            }
            "date_part" if time_like => {
                description.date_part_name = Some(expect_str(input, "date_part", value)?);
            }
            "descending" => {
                description.descending = Some(expect_bool(input, "descending", value)?);
            }
            other => {
                return Err(shape_error(
                    input,
                    format!("'.{other}()' is not supported on {}", kind.builder_name()),
                ))
            }
        }
    }

    Ok(description)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_time_dimension_with_keywords() {
        let d = parse_builder_call(
            "TimeDimension('booking__ds', 'month', date_part_name='dow', entity_path=['listing'])",
        )
        .unwrap();
        assert_eq!(d.item_kind, Some(ItemKind::TimeDimension));
        assert_eq!(d.item_name, "booking__ds");
        assert_eq!(d.time_granularity_name.as_deref(), Some("month"));
        assert_eq!(d.date_part_name.as_deref(), Some("dow"));
        assert_eq!(d.entity_path, vec!["listing".to_string()]);
    }

    #[test]
    fn parses_chained_methods_and_double_quotes() {
        let d = parse_builder_call("Dimension(\"metric_time\").grain('week').descending(True)")
            .unwrap();
        assert_eq!(d.item_kind, Some(ItemKind::Dimension));
        assert_eq!(d.time_granularity_name.as_deref(), Some("week"));
        assert_eq!(d.descending, Some(true));
    }

    #[test]
    fn metric_group_by_is_captured() {
        let d = parse_builder_call("Metric('bookings', group_by=['listing'])").unwrap();
        assert_eq!(d.group_by, Some(vec!["listing".to_string()]));
        let d = parse_builder_call("Metric('bookings')").unwrap();
        assert_eq!(d.group_by, None);
    }

    #[test]
    fn token_errors_are_query_item_syntax() {
        assert!(matches!(
            parse_builder_call("Dimension('listing__country'"),
            Err(ItemParseError::QueryItemSyntax(_))
        ));
        assert!(matches!(
            parse_builder_call("Dimension('unterminated)"),
            Err(ItemParseError::QueryItemSyntax(_))
        ));
        assert!(matches!(
            parse_builder_call("Dimension('x') + 1"),
            Err(ItemParseError::QueryItemSyntax(_))
        ));
    }

    #[test]
    fn shape_errors_are_invalid_query_syntax() {
        assert!(matches!(
            parse_builder_call("Measure('bookings')"),
            Err(ItemParseError::InvalidQuerySyntax(_))
        ));
        assert!(matches!(
            parse_builder_call("Entity('user', 'day')"),
            Err(ItemParseError::InvalidQuerySyntax(_))
        ));
        assert!(matches!(
            parse_builder_call("Entity('user', date_part_name='dow')"),
            Err(ItemParseError::InvalidQuerySyntax(_))
        ));
        assert!(matches!(
            parse_builder_call("Dimension()"),
            Err(ItemParseError::InvalidQuerySyntax(_))
        ));
    }
}
