use crate::brackets::Span;

const INCLUDEONLY: &str = "includeonly";
const NOINCLUDE: &str = "noinclude";
const ONLYINCLUDE: &str = "onlyinclude";

/// Select the part of a template body that applies to the current mode.
///
/// Transcluded: `<onlyinclude>` regions, when present, replace the whole body;
/// `<noinclude>` regions are removed and `<includeonly>` tags are unwrapped.
/// Standalone: `<includeonly>` regions are removed and the other two tags are
/// unwrapped.
pub fn filter_sections(body: &str, transcluded: bool) -> String {
    if transcluded {
        let source = extract_regions(body, ONLYINCLUDE).unwrap_or_else(|| body.to_string());
        let stripped = strip_regions(&source, NOINCLUDE);
        unwrap_tags(&stripped, INCLUDEONLY)
    } else {
        let stripped = strip_regions(body, INCLUDEONLY);
        let unwrapped = unwrap_tags(&stripped, NOINCLUDE);
        unwrap_tags(&unwrapped, ONLYINCLUDE)
    }
}

/// Remove `<!-- ... -->` comments. An unterminated comment runs to the end.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start + 4..].find("-->") {
            Some(end) => rest = &rest[start + 4 + end + 3..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Open,
    Close,
    SelfClosing,
}

#[derive(Debug, Clone, Copy)]
struct TagEvent {
    kind: TagKind,
    start: usize,
    end: usize,
}

/// Concatenated contents of every `<tag>` region, or `None` when the tag
/// never opens.
pub fn extract_regions(text: &str, tag: &str) -> Option<String> {
    let mut out = String::new();
    let mut found = false;
    let mut content_start: Option<usize> = None;

    for event in tag_events(text, tag) {
        match (event.kind, content_start) {
            (TagKind::Open, None) => {
                found = true;
                content_start = Some(event.end);
            }
            (TagKind::Close, Some(start)) => {
                out.push_str(&text[start..event.start]);
                content_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = content_start {
        out.push_str(&text[start..]);
    }
    found.then_some(out)
}

/// Spans of every complete `<tag>...</tag>` region, tags included, plus
/// self-closing tags. An opening tag without a closing tag is not a region.
pub fn tag_regions(text: &str, tag: &str) -> Vec<Span> {
    let mut out = Vec::new();
    let mut open: Option<usize> = None;

    for event in tag_events(text, tag) {
        match (event.kind, open) {
            (TagKind::Open, None) => open = Some(event.start),
            (TagKind::Close, Some(start)) => {
                out.push(Span {
                    start,
                    end: event.end,
                });
                open = None;
            }
            (TagKind::SelfClosing, None) => out.push(Span {
                start: event.start,
                end: event.end,
            }),
            _ => {}
        }
    }
    out
}

/// Remove every `<tag>...</tag>` region, stray closing tags and self-closing
/// tags. An unterminated region runs to the end of the text.
pub fn strip_regions(text: &str, tag: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    let mut inside = false;

    for event in tag_events(text, tag) {
        match (event.kind, inside) {
            (TagKind::Open, false) => {
                out.push_str(&text[cursor..event.start]);
                inside = true;
            }
            (TagKind::Close, true) => {
                inside = false;
                cursor = event.end;
            }
            (TagKind::Close | TagKind::SelfClosing, false) => {
                out.push_str(&text[cursor..event.start]);
                cursor = event.end;
            }
            _ => {}
        }
    }
    if !inside {
        out.push_str(&text[cursor..]);
    }
    out
}

/// Drop every opening, closing and self-closing `tag`, keeping the content.
pub fn unwrap_tags(text: &str, tag: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for event in tag_events(text, tag) {
        out.push_str(&text[cursor..event.start]);
        cursor = event.end;
    }
    out.push_str(&text[cursor..]);
    out
}

fn tag_events(text: &str, tag: &str) -> Vec<TagEvent> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut cursor = 0usize;

    while let Some(offset) = text[cursor..].find('<') {
        let start = cursor + offset;
        cursor = start + 1;

        let mut name_start = start + 1;
        let closing = bytes.get(name_start) == Some(&b'/');
        if closing {
            name_start += 1;
        }
        let name_end = name_start + tag.len();
        let Some(name) = bytes.get(name_start..name_end) else {
            continue;
        };
        if !name.eq_ignore_ascii_case(tag.as_bytes()) {
            continue;
        }
        match bytes.get(name_end) {
            Some(b'>' | b'/') => {}
            Some(byte) if byte.is_ascii_whitespace() => {}
            _ => continue,
        }
        let Some(close_offset) = text[name_end..].find('>') else {
            continue;
        };
        let end = name_end + close_offset + 1;
        let kind = if closing {
            TagKind::Close
        } else if bytes[end - 2] == b'/' {
            TagKind::SelfClosing
        } else {
            TagKind::Open
        };
        out.push(TagEvent { kind, start, end });
        cursor = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{extract_regions, filter_sections, strip_comments, strip_regions, tag_regions};

    #[test]
    fn includeonly_is_present_only_when_transcluded() {
        let body = "A<includeonly>B</includeonly>C";
        assert_eq!(filter_sections(body, true), "ABC");
        assert_eq!(filter_sections(body, false), "AC");
    }

    #[test]
    fn noinclude_is_present_only_standalone() {
        let body = "A<noinclude>docs</noinclude>C";
        assert_eq!(filter_sections(body, true), "AC");
        assert_eq!(filter_sections(body, false), "AdocsC");
    }

    #[test]
    fn onlyinclude_takes_precedence_when_transcluded() {
        let body = "head <onlyinclude>one</onlyinclude> mid <includeonly>x</includeonly><onlyinclude> two<noinclude>!</noinclude></onlyinclude> tail";
        assert_eq!(filter_sections(body, true), "one two");
        assert_eq!(
            filter_sections(body, false),
            "head one mid  two! tail"
        );
    }

    #[test]
    fn tags_match_case_insensitively_and_non_greedily() {
        let body = "a<NoInclude>1</noinclude>b<noinclude >2</NOINCLUDE>c";
        assert_eq!(filter_sections(body, true), "abc");
    }

    #[test]
    fn unterminated_region_extends_to_end() {
        assert_eq!(strip_regions("keep<noinclude>gone", "noinclude"), "keep");
        assert_eq!(
            extract_regions("x<onlyinclude>rest", "onlyinclude").as_deref(),
            Some("rest")
        );
        assert_eq!(filter_sections("a<includeonly>b", false), "a");
    }

    #[test]
    fn stray_and_self_closing_tags_are_removed() {
        assert_eq!(filter_sections("a</noinclude>b<noinclude/>c", true), "abc");
        assert_eq!(filter_sections("a<includeonly />b", true), "ab");
    }

    #[test]
    fn similar_tag_names_are_left_alone() {
        let body = "<noincluded>x</noincluded>";
        assert_eq!(filter_sections(body, true), body);
    }

    #[test]
    fn tag_regions_returns_complete_regions_only() {
        let text = "a<nowiki>{{x}}</NOWIKI>b<nowiki/>c<nowiki>open";
        let regions = tag_regions(text, "nowiki");
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].slice(text), "<nowiki>{{x}}</NOWIKI>");
        assert_eq!(regions[1].slice(text), "<nowiki/>");
    }

    #[test]
    fn comments_are_removed() {
        assert_eq!(strip_comments("a<!-- hidden -->b<!--c-->"), "ab");
        assert_eq!(strip_comments("a<!-- open"), "a");
        assert_eq!(strip_comments("no comments"), "no comments");
    }
}
