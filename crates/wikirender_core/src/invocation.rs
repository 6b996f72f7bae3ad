use crate::brackets::{split_once_top_level, split_top_level};

/// One `{{Name|arg|key=value}}` occurrence, split but not expanded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub name: String,
    pub positional_args: Vec<String>,
    /// Named arguments in source order. A later duplicate key shadows an
    /// earlier one.
    pub named_args: Vec<(String, String)>,
}

impl Invocation {
    /// Positional argument by 1-based index.
    pub fn positional(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|zero_based| self.positional_args.get(zero_based))
            .map(String::as_str)
    }

    pub fn named(&self, key: &str) -> Option<&str> {
        self.named_args
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Resolve a parameter name: named arguments first, then a numeric name
    /// against the positional list.
    pub fn argument(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.named(name) {
            return Some(value);
        }
        name.parse::<usize>()
            .ok()
            .and_then(|index| self.positional(index))
    }

    /// Apply `transform` to every positional value and to both sides of every
    /// named argument. Transformed keys are trimmed again.
    pub fn map_args<F>(self, mut transform: F) -> Self
    where
        F: FnMut(&str) -> String,
    {
        Self {
            name: self.name,
            positional_args: self
                .positional_args
                .iter()
                .map(|value| transform(value))
                .collect(),
            named_args: self
                .named_args
                .iter()
                .map(|(key, value)| (transform(key).trim().to_string(), transform(value)))
                .collect(),
        }
    }
}

/// Split the inside of a `{{...}}` span (markers already stripped).
///
/// Pipes nested in `{{ }}` or `[[ ]]` do not split. A segment with a
/// top-level `=` and a non-empty key is a named argument with both sides
/// trimmed; anything else is positional and kept verbatim.
pub fn parse_invocation(inner: &str) -> Invocation {
    let mut segments = split_top_level(inner, '|').into_iter();
    let name = segments.next().unwrap_or_default().trim().to_string();
    let mut invocation = Invocation {
        name,
        ..Invocation::default()
    };

    for segment in segments {
        match split_named_argument(segment) {
            Some((key, value)) => {
                invocation.named_args.push((key, value));
            }
            None => invocation.positional_args.push(segment.to_string()),
        }
    }
    invocation
}

fn split_named_argument(segment: &str) -> Option<(String, String)> {
    let (key, value) = split_once_top_level(segment, '=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}
