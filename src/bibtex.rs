//! BibTeX reading and writing for bibliography files.
//!
//! Only what a round trip through the finder needs: regular entries keep
//! their type, key and field order; `@string` macros are expanded; `@comment`
//! and `@preamble` blocks are skipped. Text outside entries is a comment, so an
//! `@` that does not open a block (an e-mail address in a header) is ignored.
//! Blocks may be delimited by braces or parentheses.

use std::collections::HashMap;

use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::take_while1;
use nom::character::complete::{char, multispace0};
use nom::combinator::{map, value as constant};

use crate::domain::BibRecord;
use crate::error::FinderError;

pub fn parse(input: &str) -> Result<Vec<BibRecord>, FinderError> {
    let mut records = Vec::new();
    let mut macros: HashMap<String, String> = HashMap::new();
    let mut remaining = input;

    while let Some(offset) = remaining.find('@') {
        let block = &remaining[offset..];
        if block_open(block).is_err() {
            remaining = &block[1..];
            continue;
        }
        let line = line_of(input, block);
        let (rest, item) = parse_block(block, &macros).map_err(|_| {
            FinderError::BibliographyParse(format!("malformed entry starting on line {line}"))
        })?;
        match item {
            Block::Entry(record) => records.push(record),
            Block::Macro(name, value) => {
                macros.insert(name.to_ascii_lowercase(), value);
            }
            Block::Skipped => {}
        }
        remaining = rest;
    }

    Ok(records)
}

pub fn serialize(records: &[BibRecord]) -> String {
    let mut out = String::new();
    for (idx, record) in records.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        out.push_str(&format!("@{}{{{},\n", record.entry_type, record.key));
        for (name, value) in record.fields() {
            out.push_str(&format!("  {name} = {{{value}}},\n"));
        }
        out.push_str("}\n");
    }
    out
}

enum Block {
    Entry(BibRecord),
    Macro(String, String),
    Skipped,
}

/// `@type{` or `@type(`: the block kind and its closing delimiter. Input is left at
/// the opening delimiter.
fn block_open(input: &str) -> IResult<&str, (&str, char)> {
    let (rest, _) = char('@')(input)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, kind) = take_while1(|c: char| c.is_ascii_alphanumeric())(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (_, close) = alt((constant('}', char('{')), constant(')', char('('))))(rest)?;
    Ok((rest, (kind, close)))
}

fn parse_block<'a>(input: &'a str, macros: &HashMap<String, String>) -> IResult<&'a str, Block> {
    let (rest, (kind, close)) = block_open(input)?;

    match kind.to_ascii_lowercase().as_str() {
        "comment" if close == '}' => {
            let (rest, _) = braced(rest)?;
            Ok((rest, Block::Skipped))
        }
        "comment" => {
            let end = rest.find('\n').unwrap_or(rest.len());
            Ok((&rest[end..], Block::Skipped))
        }
        "preamble" if close == '}' => {
            let (rest, _) = braced(rest)?;
            Ok((rest, Block::Skipped))
        }
        "preamble" => {
            let (rest, _) = take_delimited(rest, close, |rest| value(rest, macros))?;
            Ok((rest, Block::Skipped))
        }
        "string" => {
            let (rest, (name, value)) = take_delimited(rest, close, |rest| field(rest, macros))?;
            Ok((rest, Block::Macro(name, value)))
        }
        _ => {
            let (rest, record) = entry_body(rest, kind, close, macros)?;
            Ok((rest, Block::Entry(record)))
        }
    }
}

/// Opening delimiter, `inner`, optional whitespace, then `close`.
fn take_delimited<'a, T>(
    input: &'a str,
    close: char,
    inner: impl FnOnce(&'a str) -> IResult<&'a str, T>,
) -> IResult<&'a str, T> {
    let (rest, _) = alt((char('{'), char('(')))(input)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, out) = inner(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char(close)(rest)?;
    Ok((rest, out))
}

fn entry_body<'a>(
    input: &'a str,
    kind: &str,
    close: char,
    macros: &HashMap<String, String>,
) -> IResult<&'a str, BibRecord> {
    let (rest, _) = alt((char('{'), char('(')))(input)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, key) = take_while1(|c: char| c != ',' && c != close && !c.is_whitespace())(rest)?;
    let (rest, _) = multispace0(rest)?;

    let mut record = BibRecord::new(kind.to_ascii_lowercase(), key);
    let mut remaining = rest.strip_prefix(',').unwrap_or(rest);
    loop {
        let (rest, _) = multispace0(remaining)?;
        if let Some(rest) = rest.strip_prefix(close) {
            return Ok((rest, record));
        }
        let (rest, (name, value)) = field(rest, macros)?;
        record.set_field(&name.to_ascii_lowercase(), &value);
        let (rest, _) = multispace0(rest)?;
        remaining = rest.strip_prefix(',').unwrap_or(rest);
        if remaining.len() == rest.len() && !remaining.starts_with(close) {
            return Err(nom::Err::Error(nom::error::Error::new(
                remaining,
                nom::error::ErrorKind::Char,
            )));
        }
    }
}

fn field<'a>(input: &'a str, macros: &HashMap<String, String>) -> IResult<&'a str, (String, String)> {
    let (rest, _) = multispace0(input)?;
    let (rest, name) = take_while1(|c: char| c.is_ascii_alphanumeric() || "_-:.".contains(c))(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char('=')(rest)?;
    let (rest, value) = value(rest, macros)?;
    Ok((rest, (name.to_string(), value)))
}

/// A value is one or more `#`-joined parts: `{braced}`, `"quoted"`, digits, or a macro name.
fn value<'a>(input: &'a str, macros: &HashMap<String, String>) -> IResult<&'a str, String> {
    let mut out = String::new();
    let mut remaining = input;
    loop {
        let (rest, _) = multispace0(remaining)?;
        let (rest, part) = alt((
            map(braced, |content: &str| content[1..content.len() - 1].to_string()),
            quoted,
            map(
                take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
                |name: &str| {
                    macros
                        .get(&name.to_ascii_lowercase())
                        .cloned()
                        .unwrap_or_else(|| name.to_string())
                },
            ),
        ))(rest)?;
        out.push_str(&part);

        let (rest, _) = multispace0(rest)?;
        match rest.strip_prefix('#') {
            Some(next) => remaining = next,
            None => return Ok((rest, normalize_value(&out))),
        }
    }
}

/// Matches balanced `{...}` and returns it including the outer braces.
fn braced(input: &str) -> IResult<&str, &str> {
    if !input.starts_with('{') {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        )));
    }
    let mut depth = 0usize;
    let mut escaped = false;
    for (idx, ch) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&input[idx + 1..], &input[..idx + 1]));
                }
            }
            _ => {}
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::TakeUntil,
    )))
}

fn quoted(input: &str) -> IResult<&str, String> {
    let (rest, _) = char('"')(input)?;
    let mut depth = 0usize;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '"' if depth == 0 => return Ok((&rest[idx + 1..], rest[..idx].to_string())),
            _ => {}
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::TakeUntil,
    )))
}

fn normalize_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn line_of(input: &str, tail: &str) -> usize {
    let consumed = input.len() - tail.len();
    input[..consumed].matches('\n').count() + 1
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const SAMPLE: &str = r#"
% exported from a reference manager
@string{neurips = "Advances in Neural Information Processing Systems"}

@comment{jabref-meta: databaseType:bibtex;}

@inproceedings{vaswani2017attention,
  title     = {Attention Is All You Need},
  author    = {Ashish Vaswani and Noam Shazeer and
               Niki Parmar},
  booktitle = neurips,
  year      = 2017,
  pages     = "5998--6008",
}

@ARTICLE{kipf2017,
  title = {Semi-Supervised Classification with {Graph} Convolutional Networks},
  journal = "ICLR " # {2017}
}
"#;

    #[test]
    fn parses_entries_and_expands_macros() {
        let records = parse(SAMPLE).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.entry_type, "inproceedings");
        assert_eq!(first.key, "vaswani2017attention");
        assert_eq!(first.title(), "Attention Is All You Need");
        assert_eq!(
            first.authors(),
            vec!["Ashish Vaswani", "Noam Shazeer", "Niki Parmar"]
        );
        assert_eq!(
            first.field("booktitle"),
            Some("Advances in Neural Information Processing Systems")
        );
        assert_eq!(first.year(), Some(2017));
        assert_eq!(first.field("pages"), Some("5998--6008"));

        let second = &records[1];
        assert_eq!(second.entry_type, "article");
        assert_eq!(
            second.title(),
            "Semi-Supervised Classification with {Graph} Convolutional Networks"
        );
        assert_eq!(second.field("journal"), Some("ICLR 2017"));
    }

    #[test]
    fn serialize_keeps_field_order() {
        let record = BibRecord::new("article", "a1")
            .with_field("title", "Deep Learning For Graphs")
            .with_field("year", "2020")
            .with_field("url", "https://github.com/example/graphs");
        let text = serialize(&[record.clone()]);
        assert_eq!(
            text,
            "@article{a1,\n  title = {Deep Learning For Graphs},\n  year = {2020},\n  url = {https://github.com/example/graphs},\n}\n"
        );
        assert_eq!(parse(&text).unwrap(), vec![record]);
    }

    #[test]
    fn empty_input_has_no_records() {
        assert!(parse("").unwrap().is_empty());
        assert!(serialize(&[]).is_empty());
    }

    #[test]
    fn at_sign_outside_entries_is_comment_text() {
        let input = "% exported by jane@example.org\n@article{a,\n  title = {T},\n}\n\nContact: lab @ home\n";
        let records = parse(input).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "a");
        assert_eq!(records[0].title(), "T");
    }

    #[test]
    fn parenthesized_blocks() {
        let input = r#"
@string(iclr = "International Conference on Learning Representations")
@preamble("\newcommand{\noop}[1]{}")
@inproceedings(velickovic2018,
  title = {Graph Attention Networks},
  booktitle = iclr,
  year = 2018
)
@misc{after, title = {Braces Still Work}}
"#;
        let records = parse(input).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "velickovic2018");
        assert_eq!(
            records[0].field("booktitle"),
            Some("International Conference on Learning Representations")
        );
        assert_eq!(records[0].year(), Some(2018));
        assert_eq!(records[1].key, "after");
    }

    #[test]
    fn unterminated_entry_is_an_error() {
        let err = parse("@article{broken,\n  title = {Never closed\n").unwrap_err();
        assert_matches!(err, FinderError::BibliographyParse(message) if message.contains("line 1"));
    }
}
