//! Content tree the reader walks, and the sources that produce it.
//!
//! - `html`: lenient HTML → `ContentNode` parser
//! - `ContentSource`: capability the playback controller loads content from

pub mod html;

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::article;
use crate::config::ArticleConfig;
use crate::error::{ReaderError, Result};

/// A node of the parsed article: an element or a run of text.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentNode {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Lower-case tag name.
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<ContentNode>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn with_child(mut self, child: ContentNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text(self, text: &str) -> Self {
        self.with_child(ContentNode::Text(text.to_string()))
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attribute("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    /// Element children only, in document order.
    pub fn element_children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|child| match child {
            ContentNode::Element(e) => Some(e),
            ContentNode::Text(_) => None,
        })
    }

    /// Concatenated text of all descendants. Block-level children are set
    /// on their own line.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out.truncate(out.trim_end_matches('\n').len());
        out
    }

    /// First element (pre-order, including self) carrying `class`.
    pub fn find_by_class(&self, class: &str) -> Option<&Element> {
        if self.has_class(class) {
            return Some(self);
        }
        self.element_children().find_map(|child| child.find_by_class(class))
    }
}

impl From<Element> for ContentNode {
    fn from(element: Element) -> Self {
        ContentNode::Element(element)
    }
}

const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "figcaption", "figure",
    "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav",
    "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

fn collect_text(element: &Element, out: &mut String) {
    for child in &element.children {
        match child {
            ContentNode::Text(text) => out.push_str(text),
            ContentNode::Element(e) if e.tag == "br" => out.push('\n'),
            ContentNode::Element(e) if BLOCK_ELEMENTS.contains(&e.tag.as_str()) => {
                line_break(out);
                collect_text(e, out);
                line_break(out);
            }
            ContentNode::Element(e) => collect_text(e, out),
        }
    }
}

fn line_break(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

/// Where the controller gets the article tree from when a session starts.
pub trait ContentSource: Send {
    /// Root of the readable content, or `None` if there is nothing to read.
    fn load(&self) -> Option<Element>;
}

/// An already-built tree.
pub struct StaticSource {
    root: Option<Element>,
}

impl StaticSource {
    pub fn new(root: Element) -> Self {
        Self { root: Some(root) }
    }

    pub fn empty() -> Self {
        Self { root: None }
    }
}

impl ContentSource for StaticSource {
    fn load(&self) -> Option<Element> {
        self.root.clone()
    }
}

/// An article page on disk, re-read and re-prepared on every load.
pub struct HtmlFileSource {
    path: PathBuf,
    container_class: String,
    rules: ArticleConfig,
}

impl HtmlFileSource {
    pub fn new(path: impl Into<PathBuf>, container_class: &str, rules: ArticleConfig) -> Self {
        Self {
            path: path.into(),
            container_class: container_class.to_string(),
            rules,
        }
    }

    /// Read, prepare and parse the page, returning the article container.
    pub fn load_container(&self) -> Result<Element> {
        let page = std::fs::read_to_string(&self.path)?;
        let prepared = article::prepare(&page, &self.rules);
        debug!(
            "Prepared {}: {} links rewritten, {} images upscaled",
            self.path.display(),
            prepared.links_rewritten,
            prepared.images_upscaled
        );

        let document = html::parse_html(&prepared.html)?;
        match document.find_by_class(&self.container_class) {
            Some(container) => Ok(container.clone()),
            None if prepared.recovered_body => Ok(document),
            None => {
                debug!(
                    "No .{} container in {}, reading whole document",
                    self.container_class,
                    self.path.display()
                );
                if document.element_children().next().is_none() {
                    return Err(ReaderError::NoArticle(self.path.display().to_string()));
                }
                Ok(document)
            }
        }
    }
}

impl ContentSource for HtmlFileSource {
    fn load(&self) -> Option<Element> {
        match self.load_container() {
            Ok(root) => Some(root),
            Err(e) => {
                warn!("Failed to load article {}: {e}", self.path.display());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Element {
        Element::new("body").with_child(
            Element::new("div")
                .with_attribute("class", "story body-content wide")
                .with_child(Element::new("p").with_text("One ").with_child(
                    Element::new("b").with_text("two").into(),
                ).into())
                .into(),
        )
    }

    #[test]
    fn finds_container_by_class_token() {
        let root = sample();
        let container = root.find_by_class("body-content").unwrap();
        assert_eq!(container.tag, "div");
        assert!(root.find_by_class("body").is_none());
    }

    #[test]
    fn text_content_joins_descendants() {
        let root = sample();
        assert_eq!(root.text_content(), "One two");

        let with_break = Element::new("p")
            .with_text("line")
            .with_child(Element::new("br").into())
            .with_text("next");
        assert_eq!(with_break.text_content(), "line\nnext");
    }

    #[test]
    fn text_content_breaks_between_blocks() {
        let item = Element::new("li")
            .with_text("Outer")
            .with_child(Element::new("p").with_text("inner").into())
            .with_text("tail");
        assert_eq!(item.text_content(), "Outer\ninner\ntail");

        let inline = Element::new("p")
            .with_text("a ")
            .with_child(Element::new("em").with_text("b").into())
            .with_text(" c");
        assert_eq!(inline.text_content(), "a b c");
    }

    #[test]
    fn file_source_reads_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(
            &path,
            "<html><body><nav><p>Menu</p></nav><div class=\"body-content\"><p>Story</p></div></body></html>",
        )
        .unwrap();

        let source = HtmlFileSource::new(&path, "body-content", ArticleConfig::default());
        let root = source.load().unwrap();
        assert_eq!(root.tag, "div");
        assert_eq!(root.text_content(), "Story");
    }

    #[test]
    fn missing_file_is_nothing_to_read() {
        let source = HtmlFileSource::new("/nonexistent/page.html", "body-content", ArticleConfig::default());
        assert!(source.load().is_none());
        assert!(StaticSource::empty().load().is_none());
    }
}
