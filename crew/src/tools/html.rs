//! Readable-text extraction from HTML pages.
//!
//! Prose is whitespace-collapsed; `<pre>` blocks are emitted as fenced code
//! blocks with their text untouched, so indentation and blank lines inside
//! code survive extraction.

use scraper::{ElementRef, Html, Node};

const SKIPPED: &[&str] = &[
    "script", "style", "noscript", "nav", "footer", "svg", "template", "head", "form", "button",
    "iframe",
];

const BLOCKS: &[&str] = &[
    "p",
    "div",
    "section",
    "article",
    "main",
    "header",
    "ul",
    "ol",
    "table",
    "blockquote",
    "dl",
    "dt",
    "dd",
    "figure",
    "figcaption",
    "hr",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub text: String,
}

pub fn extract_page(html: &str) -> ExtractedPage {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let title = find_element(root, "title")
        .or_else(|| find_element(root, "h1"))
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let content_root = ["main", "article", "body"]
        .iter()
        .find_map(|tag| find_element(root, tag))
        .unwrap_or(root);

    let mut writer = TextWriter::default();
    writer.walk(content_root);
    ExtractedPage {
        title,
        text: writer.finish(),
    }
}

fn find_element<'a>(root: ElementRef<'a>, tag: &str) -> Option<ElementRef<'a>> {
    root.descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == tag)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn code_language(pre: ElementRef<'_>) -> Option<String> {
    let code = pre
        .children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "code");
    [Some(pre), code]
        .into_iter()
        .flatten()
        .flat_map(|el| el.value().classes())
        .find_map(|class| {
            class
                .strip_prefix("language-")
                .or_else(|| class.strip_prefix("lang-"))
                .map(str::to_string)
        })
}

#[derive(Default)]
struct TextWriter {
    out: String,
}

impl TextWriter {
    fn walk(&mut self, el: ElementRef<'_>) {
        let name = el.value().name();
        if SKIPPED.contains(&name) {
            return;
        }
        match name {
            "pre" => self.push_code_block(el),
            "code" => self.push_inline_code(el),
            "br" => self.ensure_newlines(1),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse::<usize>().unwrap_or(1);
                self.ensure_newlines(2);
                self.out.push_str(&"#".repeat(level));
                self.out.push(' ');
                self.walk_children(el);
                self.ensure_newlines(2);
            }
            "tr" => {
                self.ensure_newlines(1);
                self.push_row(el);
                self.ensure_newlines(1);
            }
            "li" => {
                self.ensure_newlines(1);
                self.out.push_str("- ");
                self.walk_children(el);
                self.ensure_newlines(1);
            }
            _ if BLOCKS.contains(&name) => {
                self.ensure_newlines(2);
                self.walk_children(el);
                self.ensure_newlines(2);
            }
            _ => self.walk_children(el),
        }
    }

    fn walk_children(&mut self, el: ElementRef<'_>) {
        for child in el.children() {
            match child.value() {
                Node::Text(text) => self.push_text(text),
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        self.walk(child);
                    }
                }
                _ => {}
            }
        }
    }

    fn push_text(&mut self, raw: &str) {
        if raw.is_empty() {
            return;
        }
        let leading = raw.starts_with(char::is_whitespace);
        let trailing = raw.ends_with(char::is_whitespace);
        let words: Vec<&str> = raw.split_whitespace().collect();
        if leading || words.is_empty() {
            self.push_space();
        }
        if words.is_empty() {
            return;
        }
        self.out.push_str(&words.join(" "));
        if trailing {
            self.push_space();
        }
    }

    fn push_space(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with([' ', '\n']) {
            self.out.push(' ');
        }
    }

    /// Cells of one table row on a single line, separated by ` | `.
    fn push_row(&mut self, row: ElementRef<'_>) {
        let cells = row
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|el| matches!(el.value().name(), "td" | "th"));
        for (i, cell) in cells.enumerate() {
            if i > 0 {
                while self.out.ends_with(' ') {
                    self.out.pop();
                }
                self.out.push_str(" | ");
            }
            self.walk_children(cell);
        }
    }

    fn push_inline_code(&mut self, el: ElementRef<'_>) {
        let code: String = el.text().collect();
        if code.is_empty() {
            return;
        }
        self.out.push('`');
        self.out.push_str(&code);
        self.out.push('`');
    }

    fn push_code_block(&mut self, pre: ElementRef<'_>) {
        let code: String = pre.text().collect();
        let code = code.trim_end_matches('\n');
        let fence = if code.contains("```") { "~~~~" } else { "```" };
        self.ensure_newlines(2);
        self.out.push_str(fence);
        if let Some(lang) = code_language(pre) {
            self.out.push_str(&lang);
        }
        self.out.push('\n');
        self.out.push_str(code);
        self.out.push('\n');
        self.out.push_str(fence);
        self.ensure_newlines(2);
    }

    fn ensure_newlines(&mut self, count: usize) {
        while self.out.ends_with(' ') {
            self.out.pop();
        }
        if self.out.is_empty() {
            return;
        }
        let existing = self.out.len() - self.out.trim_end_matches('\n').len();
        for _ in existing..count {
            self.out.push('\n');
        }
    }

    fn finish(mut self) -> String {
        while self.out.ends_with([' ', '\n']) {
            self.out.pop();
        }
        self.out
    }
}
