/// Byte range of a construct in its source string, markers included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Markers {
    pub open: &'static str,
    pub close: &'static str,
}

pub const LINK_MARKERS: Markers = Markers {
    open: "[[",
    close: "]]",
};

/// Find the first top-level balanced construct at or after `from`.
///
/// Nested constructs of the same type are skipped. If the first opener never
/// closes, the first inner construct that does close is returned instead, so
/// `"[[a [[b]]"` yields the span of `[[b]]`.
pub fn find_balanced(text: &str, from: usize, markers: Markers) -> Option<Span> {
    if from > text.len() || !text.is_char_boundary(from) {
        return None;
    }

    let mut stack: Vec<usize> = Vec::new();
    // Completed spans that closed while an outer opener was still pending,
    // paired with the position of that outer opener.
    let mut nested: Vec<(Span, usize)> = Vec::new();
    let mut cursor = from;

    while cursor < text.len() {
        let rest = &text[cursor..];
        if rest.starts_with(markers.open) {
            stack.push(cursor);
            cursor += markers.open.len();
            continue;
        }
        if rest.starts_with(markers.close) {
            if let Some(start) = stack.pop() {
                let span = Span {
                    start,
                    end: cursor + markers.close.len(),
                };
                match stack.last() {
                    None => return Some(span),
                    Some(&outer) => nested.push((span, outer)),
                }
            }
            cursor += markers.close.len();
            continue;
        }
        cursor += next_char_len(rest);
    }

    // Every opener still on the stack is unterminated. A nested span whose
    // enclosing opener is one of them is effectively top-level.
    nested
        .into_iter()
        .filter(|(_, outer)| stack.binary_search(outer).is_ok())
        .map(|(span, _)| span)
        .min_by_key(|span| span.start)
}

/// All top-level balanced constructs of `text`, in source order. An opener
/// that never closes stays literal text.
pub fn balanced_spans(text: &str, markers: Markers) -> Vec<Span> {
    let mut out = Vec::new();
    let mut cursor = 0usize;
    while let Some(span) = find_balanced(text, cursor, markers) {
        cursor = span.end;
        out.push(span);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BraceKind {
    /// `{{ ... }}`
    Template,
    /// `{{{ ... }}}`
    Parameter,
}

impl BraceKind {
    pub fn marker_len(self) -> usize {
        match self {
            Self::Template => 2,
            Self::Parameter => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BraceConstruct {
    pub kind: BraceKind,
    pub span: Span,
}

impl BraceConstruct {
    /// The text between the markers.
    pub fn inner<'a>(&self, text: &'a str) -> &'a str {
        let len = self.kind.marker_len();
        &text[self.span.start + len..self.span.end - len]
    }
}

struct OpenBrace {
    kind: BraceKind,
    start: usize,
    children: Vec<BraceConstruct>,
}

/// Every top-level template and parameter construct of `text`, in one pass.
///
/// A run of opening braces is split outermost-first: two braces open a
/// template, three a parameter, five a template around a parameter, and a
/// run of four is a literal brace followed by a parameter. A closing run
/// closes the innermost open constructs while it has enough braces left.
pub fn brace_constructs(text: &str) -> Vec<BraceConstruct> {
    let bytes = text.as_bytes();
    let mut top: Vec<BraceConstruct> = Vec::new();
    let mut stack: Vec<OpenBrace> = Vec::new();
    let mut cursor = 0usize;

    while cursor < text.len() {
        match bytes[cursor] {
            b'{' => {
                let run = run_length(bytes, cursor, b'{');
                let mut offset = match run % 3 {
                    1 => 1,
                    2 => {
                        stack.push(OpenBrace {
                            kind: BraceKind::Template,
                            start: cursor,
                            children: Vec::new(),
                        });
                        2
                    }
                    _ => 0,
                };
                while offset + 3 <= run {
                    stack.push(OpenBrace {
                        kind: BraceKind::Parameter,
                        start: cursor + offset,
                        children: Vec::new(),
                    });
                    offset += 3;
                }
                cursor += run;
            }
            b'}' => {
                let run = run_length(bytes, cursor, b'}');
                let mut consumed = 0usize;
                while let Some(open) = stack.last() {
                    let need = open.kind.marker_len();
                    if run - consumed < need {
                        break;
                    }
                    let Some(open) = stack.pop() else {
                        break;
                    };
                    consumed += need;
                    let construct = BraceConstruct {
                        kind: open.kind,
                        span: Span {
                            start: open.start,
                            end: cursor + consumed,
                        },
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(construct),
                        None => top.push(construct),
                    }
                }
                cursor += run;
            }
            _ => cursor += next_char_len(&text[cursor..]),
        }
    }

    // Unterminated openers are literal text; their closed children move up.
    while let Some(open) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.children.extend(open.children),
            None => top.extend(open.children),
        }
    }
    top.sort_by_key(|construct| construct.span.start);
    top
}

/// Byte offsets of `delimiter` that sit outside every nested brace construct
/// and every `[[...]]` link.
pub fn top_level_positions(text: &str, delimiter: char) -> Vec<usize> {
    let mut protected: Vec<Span> = brace_constructs(text)
        .into_iter()
        .map(|construct| construct.span)
        .chain(balanced_spans(text, LINK_MARKERS))
        .collect();
    protected.sort_by_key(|span| span.start);

    let mut out = Vec::new();
    let mut next_span = 0usize;
    let mut covered_until = 0usize;
    for (index, ch) in text.char_indices() {
        while next_span < protected.len() && protected[next_span].start <= index {
            covered_until = covered_until.max(protected[next_span].end);
            next_span += 1;
        }
        if ch == delimiter && index >= covered_until {
            out.push(index);
        }
    }
    out
}

/// Split on top-level occurrences of `delimiter`. Always returns at least one
/// segment.
pub fn split_top_level(text: &str, delimiter: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0usize;
    for position in top_level_positions(text, delimiter) {
        out.push(&text[start..position]);
        start = position + delimiter.len_utf8();
    }
    out.push(&text[start..]);
    out
}

/// Split at the first top-level `delimiter`, if any.
pub fn split_once_top_level(text: &str, delimiter: char) -> Option<(&str, &str)> {
    let position = top_level_positions(text, delimiter).into_iter().next()?;
    Some((&text[..position], &text[position + delimiter.len_utf8()..]))
}

fn run_length(bytes: &[u8], start: usize, byte: u8) -> usize {
    bytes[start..].iter().take_while(|item| **item == byte).count()
}

fn next_char_len(rest: &str) -> usize {
    rest.chars().next().map_or(1, char::len_utf8)
}
