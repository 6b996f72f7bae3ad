use crate::brackets::{BraceKind, brace_constructs, split_top_level};
use crate::invocation::Invocation;

/// Placeholders nested deeper than this inside one body are left literal.
const MAX_PLACEHOLDER_NESTING: usize = 100;

/// Split a placeholder's inner text into its name and optional default.
/// Only the first segment after the name is the default; MediaWiki ignores
/// the rest.
pub fn parameter_parts(inner: &str) -> (&str, Option<&str>) {
    let segments = split_top_level(inner, '|');
    let name = segments.first().copied().unwrap_or_default();
    (name, segments.get(1).copied())
}

/// Replace every placeholder in `body` with the caller's argument: a named
/// argument first, then a positional one, then the placeholder's default,
/// then the empty string. Placeholders inside nested invocations, names and
/// defaults are substituted too.
pub fn substitute_parameters(body: &str, invocation: &Invocation) -> String {
    substitute_nested(body, invocation, 0)
}

fn substitute_nested(text: &str, invocation: &Invocation, nesting: usize) -> String {
    if !text.contains("{{{") {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for construct in brace_constructs(text) {
        out.push_str(&text[cursor..construct.span.start]);
        cursor = construct.span.end;

        if nesting >= MAX_PLACEHOLDER_NESTING {
            out.push_str(construct.span.slice(text));
            continue;
        }
        let inner = construct.inner(text);
        match construct.kind {
            BraceKind::Template => {
                out.push_str("{{");
                out.push_str(&substitute_nested(inner, invocation, nesting + 1));
                out.push_str("}}");
            }
            BraceKind::Parameter => {
                let (raw_name, default) = parameter_parts(inner);
                let name = substitute_nested(raw_name, invocation, nesting + 1);
                match invocation.argument(name.trim()) {
                    Some(value) => out.push_str(value),
                    None => {
                        if let Some(default) = default {
                            out.push_str(&substitute_nested(default, invocation, nesting + 1));
                        }
                    }
                }
            }
        }
    }
    out.push_str(&text[cursor..]);
    out
}
