use serde::{Deserialize, Serialize};

use crate::expander::{ExpansionContext, ExpansionIssue, ExpansionLimits};
use crate::render::{RenderOptions, RenderedPage, render_inline};
use crate::sections::{filter_sections, strip_comments};
use crate::store::{TemplateName, TemplateStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserConfig {
    pub limits: ExpansionLimits,
    pub render: RenderOptions,
}

/// Result of expanding text without rendering it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpansionReport {
    pub text: String,
    pub issues: Vec<ExpansionIssue>,
    pub expansions: usize,
    pub store_queries: usize,
}

/// Entry point for turning wiki text into HTML.
///
/// A `Parser` only borrows its store and keeps no per-parse state, so one
/// instance can serve parses on several threads at once. Every call gets a
/// fresh [`ExpansionContext`] and template cache.
pub struct Parser<'s> {
    store: &'s dyn TemplateStore,
    config: ParserConfig,
}

impl<'s> Parser<'s> {
    pub fn new(store: &'s dyn TemplateStore, config: ParserConfig) -> Self {
        Self { store, config }
    }

    pub fn with_defaults(store: &'s dyn TemplateStore) -> Self {
        Self::new(store, ParserConfig::default())
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Expand and render `raw` to an HTML fragment. Never fails.
    pub fn parse(&self, raw: &str) -> String {
        self.render_page(raw).html
    }

    pub fn expand(&self, raw: &str) -> String {
        self.context().expand(raw)
    }

    pub fn expand_with_report(&self, raw: &str) -> ExpansionReport {
        let mut context = self.context();
        let text = context.expand(raw);
        report(context, text)
    }

    pub fn render_page(&self, raw: &str) -> RenderedPage {
        render_inline(&self.expand(raw), &self.config.render)
    }

    /// Render a stored template as its own page: `<noinclude>` content is
    /// shown and `<includeonly>` content is dropped. `None` when `name` is
    /// invalid or not in the store.
    pub fn render_template_page(&self, name: &str) -> Option<RenderedPage> {
        let report = self.expand_template_page(name)?;
        Some(render_inline(&report.text, &self.config.render))
    }

    pub fn expand_template_page(&self, name: &str) -> Option<ExpansionReport> {
        let name = TemplateName::parse(name)?;
        let mut context = self.context();
        let template = context.lookup().lookup(&name)?;
        let body = filter_sections(&strip_comments(&template.body), false);
        let text = context.expand_as_page(&name, &body);
        Some(report(context, text))
    }

    fn context(&self) -> ExpansionContext<'s> {
        ExpansionContext::new(self.store, self.config.limits)
    }
}

fn report(mut context: ExpansionContext<'_>, text: String) -> ExpansionReport {
    let expansions = context.expansions();
    let store_queries = context.lookup().store_queries();
    ExpansionReport {
        text,
        issues: context.into_issues(),
        expansions,
        store_queries,
    }
}
