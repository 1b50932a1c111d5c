//! Callout extraction for where-filter templates.
//!
//! A template is SQL with embedded `{{ ... }}` callouts naming group-by items,
//! e.g. `{{ Dimension('listing__is_lux') }} AND {{ TimeDimension('metric_time', 'day') }} > '2020-01-01'`.
//! Quoted text inside a callout may contain braces.

use crate::error::ItemParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Callout(&'a str),
}

fn split_template(template: &str) -> Result<Vec<Segment<'_>>, ItemParseError> {
    let mut segments = Vec::new();
    let mut rest = template;
    let mut offset = 0;
    loop {
        if let Some(idx) = rest.find("{%") {
            if rest.find("{{").map_or(true, |open| idx < open) {
                return Err(ItemParseError::QueryItemSyntax(format!(
                    "template statements are not supported (offset {}) in: {template}",
                    offset + idx
                )));
            }
        }
        let Some(open) = rest.find("{{") else {
            if !rest.is_empty() {
                segments.push(Segment::Text(rest));
            }
            return Ok(segments);
        };
        if open > 0 {
            segments.push(Segment::Text(&rest[..open]));
        }
        let body_start = open + 2;
        let close = find_close(&rest[body_start..]).ok_or_else(|| {
            ItemParseError::QueryItemSyntax(format!(
                "unterminated '{{{{' at offset {} in: {template}",
                offset + open
            ))
        })?;
        let body = rest[body_start..body_start + close].trim();
        if body.is_empty() {
            return Err(ItemParseError::QueryItemSyntax(format!(
                "empty callout at offset {} in: {template}",
                offset + open
            )));
        }
        segments.push(Segment::Callout(body));
        let consumed = body_start + close + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }
}

/// Byte offset of the closing `}}`, skipping over quoted strings.
fn find_close(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

/// Raw text of every callout, in order of appearance.
pub fn parse_item_descriptions(template: &str) -> Result<Vec<String>, ItemParseError> {
    Ok(split_template(template)?
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Callout(body) => Some(body.to_string()),
            Segment::Text(_) => None,
        })
        .collect())
}

/// Replace every callout with the string produced by `substitute`.
pub fn render_template<E, F>(template: &str, mut substitute: F) -> Result<String, E>
where
    E: From<ItemParseError>,
    F: FnMut(&str) -> Result<String, E>,
{
    let mut rendered = String::with_capacity(template.len());
    for segment in split_template(template)? {
        match segment {
            Segment::Text(text) => rendered.push_str(text),
            Segment::Callout(body) => rendered.push_str(&substitute(body)?),
        }
    }
    Ok(rendered)
}
