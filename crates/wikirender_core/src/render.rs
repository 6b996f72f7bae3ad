use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::brackets::{LINK_MARKERS, Span, balanced_spans, split_top_level};
use crate::html::{escape_attr, escape_text, expand_url_pattern};
use crate::media::{parse_media, render_media};
use crate::sections::tag_regions;
use crate::store::{Namespace, TemplateName};

pub const DEFAULT_ARTICLE_PATH: &str = "/wiki/$1";
pub const DEFAULT_FILE_PATH: &str = "/media/$1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// URL pattern for article links; `$1` is the encoded title.
    pub article_path: String,
    /// URL pattern for media sources; `$1` is the encoded file name.
    pub file_path: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            article_path: DEFAULT_ARTICLE_PATH.to_string(),
            file_path: DEFAULT_FILE_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderedPage {
    pub html: String,
    /// Category titles in first-seen order, without the namespace prefix.
    pub categories: Vec<String>,
}

static EXTERNAL_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[((?i:https?://)[^\s\[\]<>"]+)(?:[ \t]+([^\]\n]*))?\]"#)
        .expect("valid external link regex")
});

static BARE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>\[\]"{}|]+"#).expect("valid bare url regex")
});

/// Render expanded wiki text to HTML. Passes run in order: wikilinks and
/// media, bracketed external links, bare URLs, then bold/italic. A pass
/// skips `<a>`, `<nowiki>` and `<pre>` elements and the inside of tags.
pub fn render_inline(text: &str, options: &RenderOptions) -> RenderedPage {
    let mut categories = Vec::new();
    let html = render_links(text, options, &mut categories);
    let html = render_external_links(&html);
    let html = render_bare_urls(&html);
    let html = render_quotes(&html);
    RenderedPage { html, categories }
}

fn render_links(text: &str, options: &RenderOptions, categories: &mut Vec<String>) -> String {
    map_unprotected(text, &["a", "nowiki", "pre"], false, &mut |segment: &str| {
        let mut out = String::with_capacity(segment.len());
        let mut cursor = 0usize;
        for span in balanced_spans(segment, LINK_MARKERS) {
            out.push_str(&segment[cursor..span.start]);
            let inner = &segment[span.start + 2..span.end - 2];
            match render_wikilink(inner, options, categories) {
                Some(html) => out.push_str(&html),
                None => out.push_str(span.slice(segment)),
            }
            cursor = span.end;
        }
        out.push_str(&segment[cursor..]);
        out
    })
}

/// Returns `None` when the target is not a valid title and the link must stay
/// literal.
fn render_wikilink(
    inner: &str,
    options: &RenderOptions,
    categories: &mut Vec<String>,
) -> Option<String> {
    let segments = split_top_level(inner, '|');
    let raw_target = segments.first().copied().unwrap_or_default().trim();
    let forced_link = raw_target.starts_with(':');
    let target = raw_target.trim_start_matches(':').trim();

    if let Some(fragment) = target.strip_prefix('#') {
        let label = link_label(&segments, target);
        return Some(format!(
            "<a href=\"#{}\">{label}</a>",
            escape_attr(&fragment.trim().replace(' ', "_"))
        ));
    }

    let (page, fragment) = match target.split_once('#') {
        Some((page, fragment)) => (page, Some(fragment.trim())),
        None => (target, None),
    };
    let name = TemplateName::parse_with_default(&format!(":{page}"), Namespace::Main)?;

    if !forced_link {
        match name.namespace {
            Namespace::File => {
                let embed = parse_media(&name.title, &segments[1..]);
                let mut caption = |caption: &str| {
                    let mut nested = Vec::new();
                    render_links(caption, options, &mut nested)
                };
                return Some(render_media(&embed, options, &mut caption));
            }
            Namespace::Category => {
                if !categories.contains(&name.title) {
                    categories.push(name.title);
                }
                return Some(String::new());
            }
            _ => {}
        }
    }

    let full_title = name.full_title();
    let mut href = expand_url_pattern(&options.article_path, &full_title);
    if let Some(fragment) = fragment.filter(|fragment| !fragment.is_empty()) {
        href.push('#');
        href.push_str(&fragment.replace(' ', "_"));
    }
    let label = link_label(&segments, target);
    Some(format!(
        "<a href=\"{}\" title=\"{}\">{label}</a>",
        escape_attr(&href),
        escape_attr(&full_title)
    ))
}

fn link_label<'a>(segments: &[&'a str], target: &'a str) -> &'a str {
    match segments.get(1).copied().map(str::trim) {
        Some(label) if !label.is_empty() => label,
        _ => target,
    }
}

fn render_external_links(text: &str) -> String {
    let mut counter = 0usize;
    map_unprotected(text, &["a", "nowiki", "pre"], true, &mut |segment: &str| {
        EXTERNAL_LINK_RE
            .replace_all(segment, |captures: &Captures<'_>| {
                let url = &captures[1];
                let label = captures.get(2).map_or("", |label| label.as_str().trim());
                if label.is_empty() {
                    counter += 1;
                    format!(
                        "<a class=\"external autonumber\" href=\"{}\" rel=\"nofollow\">[{counter}]</a>",
                        escape_attr(url)
                    )
                } else {
                    format!(
                        "<a class=\"external text\" href=\"{}\" rel=\"nofollow\">{label}</a>",
                        escape_attr(url)
                    )
                }
            })
            .into_owned()
    })
}

fn render_bare_urls(text: &str) -> String {
    map_unprotected(text, &["a", "nowiki", "pre"], true, &mut |segment: &str| {
        let mut out = String::with_capacity(segment.len());
        let mut cursor = 0usize;
        for found in BARE_URL_RE.find_iter(segment) {
            let url = trim_url_end(found.as_str());
            if !has_host(url) {
                continue;
            }
            out.push_str(&segment[cursor..found.start()]);
            let href = if url.len() >= 4 && url[..4].eq_ignore_ascii_case("www.") {
                format!("https://{url}")
            } else {
                url.to_string()
            };
            out.push_str(&format!(
                "<a class=\"external free\" href=\"{}\" rel=\"nofollow\">{}</a>",
                escape_attr(&href),
                escape_text(url)
            ));
            cursor = found.start() + url.len();
        }
        out.push_str(&segment[cursor..]);
        out
    })
}

/// Drop trailing sentence punctuation and an unbalanced closing parenthesis.
fn trim_url_end(url: &str) -> &str {
    let mut current = url;
    loop {
        let Some(last) = current.chars().last() else {
            return current;
        };
        let unbalanced_paren =
            last == ')' && current.matches(')').count() > current.matches('(').count();
        if ".,;:!?'".contains(last) || unbalanced_paren {
            current = &current[..current.len() - last.len_utf8()];
        } else {
            return current;
        }
    }
}

fn has_host(url: &str) -> bool {
    let lowered = url.to_ascii_lowercase();
    let host = ["https://", "http://", "www."]
        .iter()
        .find_map(|prefix| lowered.strip_prefix(prefix))
        .unwrap_or_default();
    !host.trim_start_matches('/').is_empty()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    Bold,
    Italic,
}

impl Quote {
    fn open(self) -> &'static str {
        match self {
            Self::Bold => "<b>",
            Self::Italic => "<i>",
        }
    }

    fn close(self) -> &'static str {
        match self {
            Self::Bold => "</b>",
            Self::Italic => "</i>",
        }
    }

    fn other(self) -> Self {
        match self {
            Self::Bold => Self::Italic,
            Self::Italic => Self::Bold,
        }
    }
}

fn render_quotes(text: &str) -> String {
    map_unprotected(text, &["nowiki", "pre"], false, &mut |segment: &str| {
        if !segment.contains("''") {
            return segment.to_string();
        }
        segment
            .split('\n')
            .map(render_quote_line)
            .collect::<Vec<_>>()
            .join("\n")
    })
}

/// Bold and italic for one line. Tags are copied untouched and formatting
/// still open at the end of the line is closed.
fn render_quote_line(line: &str) -> String {
    let bytes = line.as_bytes();
    let mut out = String::with_capacity(line.len() + 16);
    let mut open: Vec<Quote> = Vec::new();
    let mut cursor = 0usize;
    let mut copied = 0usize;

    while cursor < bytes.len() {
        if bytes[cursor] == b'<'
            && let Some(end) = tag_end(line, cursor)
        {
            cursor = end;
            continue;
        }
        if bytes[cursor] != b'\'' {
            cursor += 1;
            continue;
        }
        let run = bytes[cursor..].iter().take_while(|byte| **byte == b'\'').count();
        if run < 2 {
            cursor += run;
            continue;
        }

        out.push_str(&line[copied..cursor]);
        let (literal, quotes): (usize, &[Quote]) = match run {
            2 => (0, &[Quote::Italic]),
            3 => (0, &[Quote::Bold]),
            4 => (1, &[Quote::Bold]),
            _ => (run - 5, &[]),
        };
        out.push_str(&"'".repeat(literal));
        if quotes.is_empty() {
            let first = open.last().copied().unwrap_or(Quote::Italic);
            toggle(&mut open, first, &mut out);
            toggle(&mut open, first.other(), &mut out);
        } else {
            for quote in quotes {
                toggle(&mut open, *quote, &mut out);
            }
        }
        cursor += run;
        copied = cursor;
    }
    out.push_str(&line[copied..]);
    while let Some(quote) = open.pop() {
        out.push_str(quote.close());
    }
    out
}

fn toggle(open: &mut Vec<Quote>, quote: Quote, out: &mut String) {
    let Some(position) = open.iter().position(|item| *item == quote) else {
        out.push_str(quote.open());
        open.push(quote);
        return;
    };
    let inner: Vec<Quote> = open.drain(position + 1..).collect();
    for item in inner.iter().rev() {
        out.push_str(item.close());
    }
    out.push_str(quote.close());
    open.pop();
    for item in inner {
        out.push_str(item.open());
        open.push(item);
    }
}

/// End of an HTML tag starting at `start`, if the `<` opens one.
fn tag_end(text: &str, start: usize) -> Option<usize> {
    let next = *text.as_bytes().get(start + 1)?;
    if !(next.is_ascii_alphabetic() || next == b'/' || next == b'!') {
        return None;
    }
    text[start..].find('>').map(|offset| start + offset + 1)
}

/// Apply `transform` to every part of `text` outside the protected elements
/// and, with `protect_tags`, outside tag markup.
fn map_unprotected(
    text: &str,
    protected_tags: &[&str],
    protect_tags: bool,
    transform: &mut dyn FnMut(&str) -> String,
) -> String {
    let mut spans: Vec<Span> = protected_tags
        .iter()
        .flat_map(|tag| tag_regions(text, tag))
        .collect();
    if protect_tags {
        spans.extend(tag_spans(text));
    }
    spans.sort_by_key(|span| span.start);

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for span in spans {
        if span.end <= cursor {
            continue;
        }
        let start = span.start.max(cursor);
        out.push_str(&transform(&text[cursor..start]));
        out.push_str(&text[start..span.end]);
        cursor = span.end;
    }
    out.push_str(&transform(&text[cursor..]));
    out
}

fn tag_spans(text: &str) -> Vec<Span> {
    let mut out = Vec::new();
    let mut cursor = 0usize;
    while let Some(offset) = text[cursor..].find('<') {
        let start = cursor + offset;
        match tag_end(text, start) {
            Some(end) => {
                out.push(Span { start, end });
                cursor = end;
            }
            None => cursor = start + 1,
        }
    }
    out
}
