//! Chapters: spine documents with their content and a display title.

use std::sync::OnceLock;

use regex::Regex;

use crate::doc::ManifestItem;

/// Longest title taken from a heading, in characters.
pub const MAX_HEADING_TITLE: usize = 100;

/// A spine document loaded from the archive.
///
/// Chapters are built once, in spine order, and never modified afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chapter {
    /// 1-based position in reading order
    pub index: usize,
    /// manifest id of the document
    pub id: String,
    /// href relative to the package document
    pub href: String,
    /// full path inside the archive
    pub path: String,
    pub media_type: String,
    pub properties: Option<String>,
    /// content size in bytes
    pub size: u64,
    pub title: String,
    pub content: Vec<u8>,
}

impl Chapter {
    pub fn new(index: usize, item: &ManifestItem, content: Vec<u8>) -> Self {
        let title = extract_title(&String::from_utf8_lossy(&content), index);
        Self {
            index,
            id: item.id.clone(),
            href: item.href.clone(),
            path: item.path.clone(),
            media_type: item.media_type.clone(),
            properties: item.properties.clone(),
            size: content.len() as u64,
            title,
            content,
        }
    }

    pub fn markup(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

type TitleExtractor = fn(&str) -> Option<String>;

/// Tried in order, first hit wins.
const TITLE_EXTRACTORS: &[TitleExtractor] = &[title_element, first_heading];

/// Derives the display title of a chapter document, falling back to
/// `Chapter {index}`.
pub fn extract_title(markup: &str, index: usize) -> String {
    TITLE_EXTRACTORS
        .iter()
        .find_map(|extract| extract(markup))
        .unwrap_or_else(|| format!("Chapter {index}"))
}

fn title_element(markup: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?is)<title(?:\s[^>]*)?>(.*?)</title\s*>").unwrap());
    re.captures(markup).and_then(|c| clean_text(&c[1]))
}

fn first_heading(markup: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?is)<h[1-6](?:\s[^>]*)?>(.*?)</h[1-6]\s*>").unwrap());
    re.captures_iter(markup)
        .find_map(|c| clean_text(&c[1]))
        .map(|text| truncate(&text, MAX_HEADING_TITLE))
}

/// Strips tags, decodes entities and collapses whitespace.
fn clean_text(fragment: &str) -> Option<String> {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    let tags = TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]*>").unwrap());

    let text = tags.replace_all(fragment, " ");
    let text = html_escape::decode_html_entities(&text);
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(text).filter(|t| !t.is_empty())
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => text[..end].trim_end().to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_from_title_element() {
        let markup = r#"<html><head><title>The  Beginning</title></head>
<body><h1>Ignored</h1></body></html>"#;
        assert_eq!(extract_title(markup, 1), "The Beginning");
    }

    #[test]
    fn empty_title_falls_back_to_heading() {
        let markup = r#"<html><head><title> </title></head>
<body><h2 class="ct">Part <em>One</em> &amp; Two</h2><h1>Later</h1></body></html>"#;
        assert_eq!(extract_title(markup, 3), "Part One & Two");
    }

    #[test]
    fn heading_is_truncated() {
        let long = "x".repeat(250);
        let markup = format!("<body><h1>{long}</h1></body>");
        assert_eq!(extract_title(&markup, 1).chars().count(), MAX_HEADING_TITLE);
    }

    #[test]
    fn placeholder_title() {
        assert_eq!(extract_title("<body><p>text</p></body>", 7), "Chapter 7");
        assert_eq!(extract_title("<body><h1></h1></body>", 2), "Chapter 2");
    }

    #[test]
    fn header_element_is_not_a_heading() {
        let markup = "<body><header>Site</header><p>no headings</p></body>";
        assert_eq!(extract_title(markup, 4), "Chapter 4");
    }
}
