use std::collections::HashMap;
use std::fmt;

use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Namespace {
    Main,
    Category,
    File,
    User,
    Template,
    Module,
    MediaWiki,
}

impl Namespace {
    pub const ALL: [Namespace; 7] = [
        Self::Main,
        Self::Category,
        Self::File,
        Self::User,
        Self::Template,
        Self::Module,
        Self::MediaWiki,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "Main",
            Self::Category => "Category",
            Self::File => "File",
            Self::User => "User",
            Self::Template => "Template",
            Self::Module => "Module",
            Self::MediaWiki => "MediaWiki",
        }
    }

    /// Namespace for a title prefix such as `Template` in `Template:Foo`.
    /// `Image` is accepted as the legacy name of `File`.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        let trimmed = prefix.trim();
        if trimmed.eq_ignore_ascii_case("Image") {
            return Some(Self::File);
        }
        Self::ALL
            .into_iter()
            .filter(|namespace| *namespace != Self::Main)
            .find(|namespace| trimmed.eq_ignore_ascii_case(namespace.as_str()))
    }

    pub fn parse(value: &str) -> Option<Self> {
        if value.trim().eq_ignore_ascii_case("Main") {
            return Some(Self::Main);
        }
        Self::from_prefix(value)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved page or template title.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateName {
    pub namespace: Namespace,
    pub title: String,
}

impl TemplateName {
    /// Resolve an invocation name. Bare names live in the Template namespace,
    /// a leading `:` selects the main namespace. A `#fragment` is dropped.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::parse_with_default(raw, Namespace::Template)
    }

    pub fn parse_with_default(raw: &str, default: Namespace) -> Option<Self> {
        let raw = raw.split_once('#').map_or(raw, |(page, _)| page);
        let normalized = normalize_spaces(&raw.replace('_', " "));
        let (namespace, title) = if let Some(rest) = normalized.strip_prefix(':') {
            match split_namespace(rest.trim_start()) {
                Some((namespace, title)) => (namespace, title),
                None => (Namespace::Main, rest.trim_start().to_string()),
            }
        } else {
            match split_namespace(&normalized) {
                Some((namespace, title)) => (namespace, title),
                None => (default, normalized.clone()),
            }
        };

        if title.is_empty() || title.contains(INVALID_TITLE_CHARS) {
            return None;
        }
        Some(Self { namespace, title })
    }

    /// Case-folded store key, e.g. `template:infobox person`.
    pub fn key(&self) -> String {
        template_key(self.namespace, &self.title)
    }

    /// Human-readable full title, e.g. `Template:Infobox person`.
    pub fn full_title(&self) -> String {
        match self.namespace {
            Namespace::Main => self.title.clone(),
            namespace => format!("{namespace}:{}", self.title),
        }
    }
}

impl fmt::Display for TemplateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_title())
    }
}

const INVALID_TITLE_CHARS: &[char] = &['{', '}', '[', ']', '<', '>', '|'];

fn split_namespace(value: &str) -> Option<(Namespace, String)> {
    let (prefix, rest) = value.split_once(':')?;
    let namespace = Namespace::from_prefix(prefix)?;
    Some((namespace, normalize_spaces(rest)))
}

pub fn template_key(namespace: Namespace, title: &str) -> String {
    format!(
        "{}:{}",
        namespace.as_str().to_lowercase(),
        normalize_spaces(&title.replace('_', " ")).to_lowercase()
    )
}

pub fn normalize_spaces(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut previous_was_space = false;

    for ch in value.chars() {
        if ch.is_whitespace() {
            if !previous_was_space {
                output.push(' ');
                previous_was_space = true;
            }
        } else {
            output.push(ch);
            previous_was_space = false;
        }
    }

    output.trim().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Template {
    pub name: String,
    pub namespace: Namespace,
    pub body: String,
}

impl Template {
    pub fn new(name: impl Into<String>, namespace: Namespace, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace,
            body: body.into(),
        }
    }

    pub fn key(&self) -> String {
        template_key(self.namespace, &self.name)
    }
}

/// Read-only source of templates, queried with normalized keys.
///
/// Implementations must tolerate concurrent reads; the parser never writes.
pub trait TemplateStore: Send + Sync {
    fn get_template(&self, key: &str) -> Result<Option<Template>>;
}

impl<T: TemplateStore + ?Sized> TemplateStore for &T {
    fn get_template(&self, key: &str) -> Result<Option<Template>> {
        (**self).get_template(key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTemplateStore {
    templates: HashMap<String, Template>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `body` under `name`; bare names go to the Template namespace.
    /// Returns false when the name is not a valid title.
    pub fn insert(&mut self, name: &str, body: &str) -> bool {
        let Some(resolved) = TemplateName::parse(name) else {
            return false;
        };
        let template = Template::new(resolved.title, resolved.namespace, body);
        self.templates.insert(template.key(), template);
        true
    }

    pub fn with_template(mut self, name: &str, body: &str) -> Self {
        self.insert(name, body);
        self
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn get_template(&self, key: &str) -> Result<Option<Template>> {
        Ok(self.templates.get(key).cloned())
    }
}

/// Store adapter used during one parse: normalizes names and remembers every
/// answer, misses included, so repeated invocations query the store once.
pub struct TemplateLookup<'s> {
    store: &'s dyn TemplateStore,
    cache: HashMap<String, Option<Template>>,
    store_queries: usize,
}

impl<'s> TemplateLookup<'s> {
    pub fn new(store: &'s dyn TemplateStore) -> Self {
        Self {
            store,
            cache: HashMap::new(),
            store_queries: 0,
        }
    }

    pub fn lookup(&mut self, name: &TemplateName) -> Option<Template> {
        let key = name.key();
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        self.store_queries += 1;
        let found = match self.store.get_template(&key) {
            Ok(found) => found,
            Err(error) => {
                tracing::warn!("template store lookup for {key} failed: {error:#}");
                None
            }
        };
        tracing::debug!(key = %key, found = found.is_some(), "template store query");
        self.cache.insert(key, found.clone());
        found
    }

    /// Number of queries that reached the underlying store.
    pub fn store_queries(&self) -> usize {
        self.store_queries
    }
}
