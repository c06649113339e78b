//! Lenient HTML parsing on top of quick-xml.
//!
//! Article markup is not XHTML: void elements are left open, end tags go
//! missing and attributes come unquoted. The parser tolerates all of that
//! and builds an `Element` tree rooted at a synthetic `#document` node.
//! Script, style and comment blocks are dropped before parsing, and a `<`
//! that cannot open a tag is read as text.

use std::borrow::Cow;
use std::sync::LazyLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use regex::Regex;

use super::{ContentNode, Element};
use crate::error::{ReaderError, Result};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Starting any of these closes an open `<p>`.
const CLOSES_PARAGRAPH: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "figure", "footer",
    "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav", "ol", "p",
    "pre", "section", "table", "ul",
];

/// An open `<p>` is not searched for past these.
const PARAGRAPH_SCOPE: &[&str] = &["button", "caption", "table", "td", "th"];

/// An open `<li>` is not searched for past these.
const LIST_ITEM_SCOPE: &[&str] = &["ol", "ul", "caption", "table", "td", "th"];

static UNPARSED_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->|<!doctype[^>]*>")
        .expect("static regex")
});

static BARE_LT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^A-Za-z/!?]|$)").expect("static regex"));

pub fn parse_html(html: &str) -> Result<Element> {
    let cleaned = UNPARSED_BLOCKS.replace_all(html, "");
    let cleaned = BARE_LT.replace_all(&cleaned, "&lt;$1");
    let mut reader = Reader::from_str(&cleaned);
    {
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.allow_dangling_amp = true;
    }

    let mut stack: Vec<Element> = vec![Element::new("#document")];

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let element = start_element(&reader, &e)?;
                close_implied(&mut stack, &element.tag);
                if VOID_ELEMENTS.contains(&element.tag.as_str()) {
                    append(&mut stack, element.into());
                } else {
                    stack.push(element);
                }
            }
            Ok(Event::Empty(e)) => {
                let element = start_element(&reader, &e)?;
                close_implied(&mut stack, &element.tag);
                append(&mut stack, element.into());
            }
            Ok(Event::End(e)) => {
                let tag = decode_tag_name(&reader, e.name().as_ref())?;
                close(&mut stack, &tag);
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .decode()
                    .map_err(|err| ReaderError::Html(format!("text decode: {err}")))?;
                push_text(&mut stack, &text);
            }
            Ok(Event::CData(e)) => {
                let text = e
                    .decode()
                    .map_err(|err| ReaderError::Html(format!("cdata decode: {err}")))?;
                push_text(&mut stack, &text);
            }
            Ok(Event::GeneralRef(e)) => {
                let name = e
                    .decode()
                    .map_err(|err| ReaderError::Html(format!("entity decode: {err}")))?;
                push_text(&mut stack, &resolve_entity(&name));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ReaderError::Html(format!(
                    "at byte {}: {e}",
                    reader.error_position()
                )))
            }
        }
    }

    // Close anything left open at end of input.
    while stack.len() > 1 {
        if let Some(open) = stack.pop() {
            append(&mut stack, open.into());
        }
    }

    Ok(stack.pop().unwrap_or_else(|| Element::new("#document")))
}

fn decode_tag_name(reader: &Reader<&[u8]>, raw: &[u8]) -> Result<String> {
    let decoded = reader
        .decoder()
        .decode(raw)
        .map_err(|err| ReaderError::Html(format!("tag name decode: {err}")))?;
    let local_name = decoded.rsplit(':').next().unwrap_or(decoded.as_ref());
    Ok(local_name.to_ascii_lowercase())
}

fn start_element(reader: &Reader<&[u8]>, start: &BytesStart<'_>) -> Result<Element> {
    let mut element = Element::new(decode_tag_name(reader, start.name().as_ref())?);

    for attr in start.html_attributes().flatten() {
        let Ok(key) = reader.decoder().decode(attr.key.as_ref()) else {
            continue;
        };
        let Ok(value) = reader.decoder().decode(&attr.value) else {
            continue;
        };
        element
            .attributes
            .push((key.to_ascii_lowercase(), unescape_attribute(&value).into_owned()));
    }

    Ok(element)
}

fn append(stack: &mut [Element], node: ContentNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

fn push_text(stack: &mut [Element], text: &str) {
    if text.is_empty() {
        return;
    }
    let Some(parent) = stack.last_mut() else {
        return;
    };
    // Entities arrive as separate events; merge them into the preceding run.
    if let Some(ContentNode::Text(previous)) = parent.children.last_mut() {
        previous.push_str(text);
    } else {
        parent.children.push(ContentNode::Text(text.to_string()));
    }
}

/// Pop up to and including the nearest open `tag`. Unmatched end tags are ignored.
fn close(stack: &mut Vec<Element>, tag: &str) {
    if let Some(depth) = stack.iter().skip(1).rposition(|e| e.tag == tag) {
        pop_to(stack, depth + 1);
    }
}

/// Apply the end tags HTML lets authors omit: a new `<li>` ends the open
/// item of the same list, and a block start ends an open paragraph.
fn close_implied(stack: &mut Vec<Element>, tag: &str) {
    if tag == "li" {
        if let Some(depth) = open_in_scope(stack, "li", LIST_ITEM_SCOPE) {
            pop_to(stack, depth);
        }
    }
    if CLOSES_PARAGRAPH.contains(&tag) {
        if let Some(depth) = open_in_scope(stack, "p", PARAGRAPH_SCOPE) {
            pop_to(stack, depth);
        }
    }
}

/// Stack index of the innermost open `tag`, searching down from the top
/// and stopping at the first `boundary` element.
fn open_in_scope(stack: &[Element], tag: &str, boundary: &[&str]) -> Option<usize> {
    for (depth, open) in stack.iter().enumerate().skip(1).rev() {
        if open.tag == tag {
            return Some(depth);
        }
        if boundary.contains(&open.tag.as_str()) {
            return None;
        }
    }
    None
}

/// Close every element at `depth` and above into its parent.
fn pop_to(stack: &mut Vec<Element>, depth: usize) {
    while stack.len() > depth.max(1) {
        if let Some(open) = stack.pop() {
            append(stack, open.into());
        }
    }
}

fn resolve_entity(name: &str) -> Cow<'static, str> {
    if let Some(numeric) = name.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => numeric.parse::<u32>().ok(),
        };
        if let Some(c) = code.and_then(char::from_u32) {
            return Cow::Owned(c.to_string());
        }
        return Cow::Owned(format!("&{name};"));
    }

    let resolved = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "hellip" => "…",
        "mdash" => "—",
        "ndash" => "–",
        "lsquo" => "‘",
        "rsquo" => "’",
        "ldquo" => "“",
        "rdquo" => "”",
        "euro" => "€",
        "pound" => "£",
        "yen" => "¥",
        "cent" => "¢",
        "copy" => "©",
        _ => return Cow::Owned(format!("&{name};")),
    };
    Cow::Borrowed(resolved)
}

fn unescape_attribute(value: &str) -> Cow<'_, str> {
    if !value.contains('&') {
        return Cow::Borrowed(value);
    }
    static ENTITY: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"&(#?[A-Za-z0-9]+);").expect("static regex"));
    ENTITY.replace_all(value, |caps: &regex::Captures<'_>| {
        resolve_entity(&caps[1]).into_owned()
    })
}
