//! Article preparation before reading.
//!
//! News pages often render a truncated body while the full story sits in a
//! JSON blob inside a `data-component-props="…Body"` script. We recover that
//! body, point paywalled links at their mirrors and swap thumbnail image
//! URLs for the full-resolution variants.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::config::{ArticleConfig, LinkRule};

static EMBEDDED_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script\b[^>]*\bdata-component-props\s*=\s*"[^"]*Body"[^>]*>(.*?)</script\s*>"#)
        .expect("static regex")
});

static LINK_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)(<a\b[^>]*?\bhref\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).expect("static regex")
});

static IMAGE_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)(<img\b[^>]*?\bsrc\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).expect("static regex")
});

static THUMBNAIL_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?[0-9]+x-1\.([a-z]{3})").expect("static regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedArticle {
    pub html: String,
    /// True when `html` is the recovered story body rather than the page.
    pub recovered_body: bool,
    pub links_rewritten: usize,
    pub images_upscaled: usize,
}

pub fn prepare(page: &str, rules: &ArticleConfig) -> PreparedArticle {
    let recovered = if rules.recover_embedded_body {
        recover_body(page)
    } else {
        None
    };
    let recovered_body = recovered.is_some();
    let html = recovered.unwrap_or_else(|| page.to_string());

    let (html, links_rewritten) = rewrite_links(&html, &rules.link_rules);
    let (html, images_upscaled) = if rules.upscale_images {
        upscale_images(&html)
    } else {
        (html, 0)
    };

    PreparedArticle {
        html,
        recovered_body,
        links_rewritten,
        images_upscaled,
    }
}

/// Full story body from the embedded component props, if the page has one.
pub fn recover_body(page: &str) -> Option<String> {
    let caps = EMBEDDED_BODY.captures(page)?;
    let props: serde_json::Value = match serde_json::from_str(caps[1].trim()) {
        Ok(v) => v,
        Err(e) => {
            debug!("Embedded body props are not valid JSON: {e}");
            return None;
        }
    };
    let body = props.get("story")?.get("body")?.as_str()?;
    if body.trim().is_empty() {
        return None;
    }
    debug!("Recovered embedded story body ({} chars)", body.len());
    Some(body.to_string())
}

pub fn rewrite_links(html: &str, rules: &[LinkRule]) -> (String, usize) {
    if rules.is_empty() {
        return (html.to_string(), 0);
    }

    let mut count = 0;
    let rewritten = LINK_HREF.replace_all(html, |caps: &Captures<'_>| {
        let (quote, url) = quoted_value(caps);
        match rules.iter().find(|rule| url.starts_with(&rule.prefix)) {
            Some(rule) => {
                count += 1;
                format!("{}{quote}{}{quote}", &caps[1], apply_rule(rule, url))
            }
            None => caps[0].to_string(),
        }
    });
    (rewritten.into_owned(), count)
}

pub fn upscale_images(html: &str) -> (String, usize) {
    let mut count = 0;
    let rewritten = IMAGE_SRC.replace_all(html, |caps: &Captures<'_>| {
        let (quote, src) = quoted_value(caps);
        if !(src.ends_with("x-1.png") || src.ends_with("x-1.jpg")) {
            return caps[0].to_string();
        }
        count += 1;
        let full = THUMBNAIL_SIZE.replace_all(src, "-1x-1.$1");
        format!("{}{quote}{full}{quote}", &caps[1])
    });
    (rewritten.into_owned(), count)
}

fn quoted_value<'h>(caps: &Captures<'h>) -> (char, &'h str) {
    match (caps.get(2), caps.get(3)) {
        (Some(double), _) => ('"', double.as_str()),
        (None, Some(single)) => ('\'', single.as_str()),
        (None, None) => ('"', ""),
    }
}

fn apply_rule(rule: &LinkRule, url: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(url.as_bytes()).collect();
    rule.target
        .replace("{url_encoded}", &encoded)
        .replace("{url}", url)
}
