//! Speakable segment extraction.
//!
//! Headings, paragraphs and list items are read as one unit each. Any
//! other element is a container: it is never read itself, only searched
//! for speakable descendants.

use crate::content::Element;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Heading(u8),
    Paragraph,
    ListItem,
}

impl SegmentKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "p" => Some(Self::Paragraph),
            "li" => Some(Self::ListItem),
            _ => {
                let level = tag.strip_prefix('h')?.parse::<u8>().ok()?;
                (1..=6).contains(&level).then_some(Self::Heading(level))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub kind: SegmentKind,
    /// Whitespace-collapsed text content.
    pub text: String,
}

/// Pre-order walk selecting speakable elements in document order.
pub fn extract_segments(root: &Element) -> Vec<Segment> {
    let mut segments = Vec::new();
    for child in root.element_children() {
        collect(child, &mut segments);
    }
    segments
}

fn collect(element: &Element, segments: &mut Vec<Segment>) {
    match SegmentKind::from_tag(&element.tag) {
        Some(kind) => {
            let text = element
                .text_content()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            segments.push(Segment {
                index: segments.len(),
                kind,
                text,
            });
        }
        None => {
            for child in element.element_children() {
                collect(child, segments);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::html::parse_html;

    #[test]
    fn classifies_tags() {
        assert_eq!(SegmentKind::from_tag("h1"), Some(SegmentKind::Heading(1)));
        assert_eq!(SegmentKind::from_tag("h6"), Some(SegmentKind::Heading(6)));
        assert_eq!(SegmentKind::from_tag("h7"), None);
        assert_eq!(SegmentKind::from_tag("hr"), None);
        assert_eq!(SegmentKind::from_tag("p"), Some(SegmentKind::Paragraph));
        assert_eq!(SegmentKind::from_tag("li"), Some(SegmentKind::ListItem));
        assert_eq!(SegmentKind::from_tag("div"), None);
    }

    #[test]
    fn walks_in_document_order() {
        let root = parse_html(
            "<div><h2>Title</h2><section><p>One</p><figure><figcaption>x</figcaption></figure>\
             <ul><li>A</li><li>B</li></ul></section><p>Two   words</p></div>",
        )
        .unwrap();
        let segments = extract_segments(&root);
        let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, ["Title", "One", "A", "B", "Two words"]);
        assert_eq!(segments[0].kind, SegmentKind::Heading(2));
        assert_eq!(segments[2].kind, SegmentKind::ListItem);
        assert!(segments.iter().enumerate().all(|(i, s)| s.index == i));
    }

    #[test]
    fn selected_nodes_are_not_recursed_into() {
        let root = parse_html("<ul><li>Outer<p>inner</p></li></ul>").unwrap();
        let segments = extract_segments(&root);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "Outer inner");
    }

    #[test]
    fn nothing_readable_is_empty() {
        let root = parse_html("<div><span>x</span><img src=a.png></div>").unwrap();
        assert!(extract_segments(&root).is_empty());
    }
}
