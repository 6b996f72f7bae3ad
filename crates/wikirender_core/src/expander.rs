use std::fmt;

use serde::{Deserialize, Serialize};

use crate::brackets::{BraceConstruct, BraceKind, brace_constructs, split_top_level};
use crate::functions::evaluate_function;
use crate::html::escape_text;
use crate::invocation::{Invocation, parse_invocation};
use crate::sections::{filter_sections, strip_comments, tag_regions};
use crate::store::{TemplateLookup, TemplateName, TemplateStore};
use crate::substitute::{parameter_parts, substitute_parameters};

pub const DEFAULT_MAX_DEPTH: usize = 40;
pub const DEFAULT_MAX_EXPANSIONS: usize = 20_000;
pub const DEFAULT_MAX_ARGUMENT_NESTING: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionLimits {
    /// Maximum template recursion depth.
    pub max_depth: usize,
    /// Maximum number of template expansions in one parse.
    pub max_expansions: usize,
    /// Maximum nesting of invocations inside invocation arguments.
    pub max_argument_nesting: usize,
}

impl Default for ExpansionLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_expansions: DEFAULT_MAX_EXPANSIONS,
            max_argument_nesting: DEFAULT_MAX_ARGUMENT_NESTING,
        }
    }
}

/// A recoverable expansion problem. Each one is rendered in place of the
/// invocation that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpansionIssue {
    MissingTemplate { name: String },
    TemplateLoop { name: String },
    DepthExceeded { name: String, limit: usize },
    BudgetExceeded { name: String, limit: usize },
}

impl ExpansionIssue {
    pub fn css_class(&self) -> &'static str {
        match self {
            Self::MissingTemplate { .. } => "template-missing",
            Self::TemplateLoop { .. } => "template-loop",
            Self::DepthExceeded { .. } => "template-depth",
            Self::BudgetExceeded { .. } => "template-budget",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::MissingTemplate { name }
            | Self::TemplateLoop { name }
            | Self::DepthExceeded { name, .. }
            | Self::BudgetExceeded { name, .. } => name,
        }
    }

    /// Inline HTML marker that replaces the failed invocation.
    pub fn to_marker(&self) -> String {
        format!(
            "<span class=\"template-error {}\">{}</span>",
            self.css_class(),
            escape_text(&self.to_string())
        )
    }
}

impl fmt::Display for ExpansionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTemplate { name } => write!(f, "{name}"),
            Self::TemplateLoop { name } => write!(f, "Template loop detected: {name}"),
            Self::DepthExceeded { name, limit } => {
                write!(f, "Template depth limit ({limit}) exceeded: {name}")
            }
            Self::BudgetExceeded { name, limit } => {
                write!(f, "Template expansion limit ({limit}) exceeded: {name}")
            }
        }
    }
}

/// Mutable state of one parse. Never shared between parses.
///
/// Failures are rendered inline as markers; expansion itself never fails.
pub struct ExpansionContext<'s> {
    lookup: TemplateLookup<'s>,
    limits: ExpansionLimits,
    visited_stack: Vec<String>,
    depth: usize,
    expansions: usize,
    argument_nesting: usize,
    issues: Vec<ExpansionIssue>,
}

impl<'s> ExpansionContext<'s> {
    pub fn new(store: &'s dyn TemplateStore, limits: ExpansionLimits) -> Self {
        Self {
            lookup: TemplateLookup::new(store),
            limits,
            visited_stack: Vec::new(),
            depth: 0,
            expansions: 0,
            argument_nesting: 0,
            issues: Vec::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn visited_stack(&self) -> &[String] {
        &self.visited_stack
    }

    pub fn expansions(&self) -> usize {
        self.expansions
    }

    pub fn issues(&self) -> &[ExpansionIssue] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<ExpansionIssue> {
        self.issues
    }

    pub fn lookup(&mut self) -> &mut TemplateLookup<'s> {
        &mut self.lookup
    }

    /// Expand page text: comments are dropped, then every invocation is
    /// expanded.
    pub fn expand(&mut self, raw: &str) -> String {
        self.expand_text(&strip_comments(raw))
    }

    /// Expand text as the page of `name` itself, so the page invoking itself
    /// is reported as a loop.
    pub fn expand_as_page(&mut self, name: &TemplateName, raw: &str) -> String {
        self.enter(name.key());
        let expanded = self.expand(raw);
        self.leave();
        expanded
    }

    fn enter(&mut self, key: String) {
        self.visited_stack.push(key);
        self.depth += 1;
        debug_assert_eq!(self.visited_stack.len(), self.depth);
    }

    fn leave(&mut self) {
        self.visited_stack.pop();
        self.depth = self.depth.saturating_sub(1);
        debug_assert_eq!(self.visited_stack.len(), self.depth);
    }

    /// Expand `text`, then rescan the result for invocations formed by the
    /// spliced text. A rescan only follows a pass that expanded at least one
    /// template, so every pass spends expansion budget.
    fn expand_text(&mut self, text: &str) -> String {
        let mut before = self.expansions;
        let mut current = self.expand_pass(text);
        while self.expansions > before && has_template_construct(&current) {
            before = self.expansions;
            current = self.expand_pass(&current);
        }
        current
    }

    fn expand_pass(&mut self, text: &str) -> String {
        let protected = tag_regions(text, "nowiki");
        if protected.is_empty() {
            return self.expand_segment(text);
        }

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0usize;
        for region in protected {
            out.push_str(&self.expand_segment(&text[cursor..region.start]));
            out.push_str(region.slice(text));
            cursor = region.end;
        }
        out.push_str(&self.expand_segment(&text[cursor..]));
        out
    }

    fn expand_segment(&mut self, text: &str) -> String {
        if !text.contains("{{") {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0usize;
        for construct in brace_constructs(text) {
            out.push_str(&text[cursor..construct.span.start]);
            let replacement = match construct.kind {
                BraceKind::Template => self.expand_invocation(construct.inner(text)),
                BraceKind::Parameter => self.expand_loose_parameter(&construct, text),
            };
            match replacement {
                Some(replacement) => out.push_str(&replacement),
                None => out.push_str(construct.span.slice(text)),
            }
            cursor = construct.span.end;
        }
        out.push_str(&text[cursor..]);
        out
    }

    /// A placeholder outside any template: its default when it has one,
    /// otherwise it stays as written.
    fn expand_loose_parameter(&mut self, construct: &BraceConstruct, text: &str) -> Option<String> {
        let (_, default) = parameter_parts(construct.inner(text));
        default.map(|default| self.expand_argument(default))
    }

    /// Returns `None` when the construct is not a usable invocation and must
    /// stay literal.
    fn expand_invocation(&mut self, inner: &str) -> Option<String> {
        if self.argument_nesting >= self.limits.max_argument_nesting {
            let name = inner.split('|').next().unwrap_or_default().trim().to_string();
            return Some(self.report(ExpansionIssue::DepthExceeded {
                name,
                limit: self.limits.max_argument_nesting,
            }));
        }
        if inner.trim_start().starts_with('#') {
            return Some(self.expand_function(inner));
        }

        // Resolving
        let invocation = parse_invocation(inner);
        let raw_name = self.expand_argument(&invocation.name);
        let name = TemplateName::parse(raw_name.trim())?;
        let key = name.key();

        if self.visited_stack.contains(&key) {
            tracing::warn!(template = %name, "template loop detected");
            return Some(self.report(ExpansionIssue::TemplateLoop {
                name: name.full_title(),
            }));
        }
        if self.depth >= self.limits.max_depth {
            tracing::warn!(template = %name, depth = self.depth, "template depth limit reached");
            return Some(self.report(ExpansionIssue::DepthExceeded {
                name: name.full_title(),
                limit: self.limits.max_depth,
            }));
        }
        if self.expansions >= self.limits.max_expansions {
            return Some(self.report(ExpansionIssue::BudgetExceeded {
                name: name.full_title(),
                limit: self.limits.max_expansions,
            }));
        }
        let Some(template) = self.lookup.lookup(&name) else {
            return Some(self.report(ExpansionIssue::MissingTemplate {
                name: name.full_title(),
            }));
        };
        self.expansions += 1;

        // Substituting
        let invocation: Invocation = invocation.map_args(|value| self.expand_argument(value));
        let body = filter_sections(&strip_comments(&template.body), true);
        let body = substitute_parameters(&body, &invocation);

        // Recursing
        tracing::debug!(template = %name, depth = self.depth, "expanding template");
        self.enter(key);
        let expanded = self.expand_text(&body);
        self.leave();
        Some(expanded)
    }

    fn expand_function(&mut self, inner: &str) -> String {
        let segments = split_top_level(inner, '|');
        let head = segments.first().copied().unwrap_or_default().trim_start();
        let (function, first) = head.split_once(':').unwrap_or((head, ""));
        let function = function.trim().to_string();

        let mut expand = |text: &str| self.expand_argument(text);
        match evaluate_function(&function, first, &segments[1..], &mut expand) {
            Some(result) => result,
            None => self.report(ExpansionIssue::MissingTemplate { name: function }),
        }
    }

    /// Expand argument text in the caller's context.
    fn expand_argument(&mut self, text: &str) -> String {
        if !text.contains("{{") {
            return text.to_string();
        }
        self.argument_nesting += 1;
        let expanded = self.expand_text(text);
        self.argument_nesting -= 1;
        expanded
    }

    fn report(&mut self, issue: ExpansionIssue) -> String {
        let marker = issue.to_marker();
        self.issues.push(issue);
        marker
    }
}

fn has_template_construct(text: &str) -> bool {
    text.contains("{{")
        && brace_constructs(text)
            .iter()
            .any(|construct| construct.kind == BraceKind::Template)
}

/// Expand `raw` against `store` with a fresh context.
pub fn expand(raw: &str, store: &dyn TemplateStore, limits: ExpansionLimits) -> String {
    ExpansionContext::new(store, limits).expand(raw)
}

#[cfg(test)]
mod tests {
    use super::{ExpansionContext, ExpansionIssue, ExpansionLimits, expand};
    use crate::store::{MemoryTemplateStore, TemplateName};

    fn limits(max_depth: usize) -> ExpansionLimits {
        ExpansionLimits {
            max_depth,
            ..ExpansionLimits::default()
        }
    }

    #[test]
    fn expands_simple_and_nested_templates() {
        let store = MemoryTemplateStore::new()
            .with_template("Outer", "[{{Inner|{{{1}}}}}]")
            .with_template("Inner", "<{{{1}}}>");
        assert_eq!(
            expand("a {{Outer|x}} b", &store, ExpansionLimits::default()),
            "a [<x>] b"
        );
    }

    #[test]
    fn parameter_defaults_and_named_precedence() {
        let store = MemoryTemplateStore::new()
            .with_template("T", "Hello {{{1|World}}}")
            .with_template("G", "{{{greeting}}}");
        let limits = ExpansionLimits::default();
        assert_eq!(expand("{{T}}", &store, limits), "Hello World");
        assert_eq!(expand("{{T|Earth}}", &store, limits), "Hello Earth");
        assert_eq!(expand("{{G|greeting=Hi|Hi2}}", &store, limits), "Hi");
    }

    #[test]
    fn named_argument_keys_are_expanded() {
        let store = MemoryTemplateStore::new()
            .with_template("A", "a")
            .with_template("T", "Hello {{{a|World}}}");
        let limits = ExpansionLimits::default();
        assert_eq!(expand("{{T|{{A}}=v}}", &store, limits), "Hello v");
        assert_eq!(expand("{{T| {{A}} =v|a=w}}", &store, limits), "Hello w");
    }

    #[test]
    fn fragment_in_template_name_is_ignored() {
        let store = MemoryTemplateStore::new().with_template("A", "body");
        let limits = ExpansionLimits::default();
        assert_eq!(expand("[{{A#x}}]", &store, limits), "[body]");
        assert_eq!(expand("{{ A # Usage |1}}", &store, limits), "body");
    }

    #[test]
    fn arguments_are_expanded_before_substitution() {
        let store = MemoryTemplateStore::new()
            .with_template("Wrap", "({{{1}}})")
            .with_template("Name", "Ada");
        assert_eq!(
            expand("{{Wrap|{{Name}}}}", &store, ExpansionLimits::default()),
            "(Ada)"
        );
    }

    #[test]
    fn two_cycle_produces_exactly_one_loop_marker() {
        let store = MemoryTemplateStore::new()
            .with_template("A", "a{{B}}")
            .with_template("B", "b{{A}}");
        let mut context = ExpansionContext::new(&store, ExpansionLimits::default());
        let out = context.expand("{{A}}");
        assert_eq!(out.matches("template-loop").count(), 1);
        assert!(out.starts_with("ab<span"));
        assert!(out.contains("Template loop detected: Template:A"));
        assert_eq!(
            context.issues(),
            &[ExpansionIssue::TemplateLoop {
                name: "Template:A".to_string()
            }]
        );
        assert_eq!(context.depth(), 0);
        assert!(context.visited_stack().is_empty());
    }

    #[test]
    fn self_invocation_is_a_loop() {
        let store = MemoryTemplateStore::new().with_template("Self", "x{{self}}");
        let out = expand("{{Self}}", &store, ExpansionLimits::default());
        assert!(out.starts_with("x<span class=\"template-error template-loop\">"));
    }

    #[test]
    fn deep_chain_stops_at_depth_limit() {
        let mut store = MemoryTemplateStore::new();
        for index in 0..60 {
            store.insert(&format!("T{index}"), &format!("{index} {{{{T{}}}}}", index + 1));
        }
        let mut context = ExpansionContext::new(&store, limits(10));
        let out = context.expand("{{T0}}");
        assert_eq!(out.matches("template-depth").count(), 1);
        assert!(out.contains("Template depth limit (10) exceeded: Template:T10"));
        assert!(out.starts_with("0 1 2 3 4 5 6 7 8 9 <span"));
        assert_eq!(context.expansions(), 10);
    }

    #[test]
    fn spliced_text_forming_an_invocation_is_expanded() {
        let store = MemoryTemplateStore::new()
            .with_template("Open", "{{")
            .with_template("B", "bee");
        let limits = ExpansionLimits::default();
        assert_eq!(expand("{{Open}}B}}", &store, limits), "bee");
        assert_eq!(expand("x {{Open}}B}} {{B}}", &store, limits), "x bee bee");
        assert_eq!(
            expand("<nowiki>{{B}}</nowiki>{{Open}}B}}", &store, limits),
            "<nowiki>{{B}}</nowiki>bee"
        );
    }

    #[test]
    fn rescans_spend_the_expansion_budget() {
        let store = MemoryTemplateStore::new()
            .with_template("Open", "{{")
            .with_template("B", "bee");
        let limits = ExpansionLimits {
            max_expansions: 1,
            ..ExpansionLimits::default()
        };
        let mut context = ExpansionContext::new(&store, limits);
        let out = context.expand("{{Open}}B}}");
        assert_eq!(
            out,
            "<span class=\"template-error template-budget\">Template expansion limit (1) exceeded: Template:B</span>"
        );
        assert_eq!(context.expansions(), 1);
    }

    #[test]
    fn missing_template_marker_is_distinct() {
        let store = MemoryTemplateStore::new();
        let out = expand("x {{Nope|1}} y", &store, ExpansionLimits::default());
        assert_eq!(
            out,
            "x <span class=\"template-error template-missing\">Template:Nope</span> y"
        );
    }

    #[test]
    fn malformed_constructs_stay_literal() {
        let store = MemoryTemplateStore::new().with_template("A", "ok");
        let limits = ExpansionLimits::default();
        assert_eq!(expand("{{A", &store, limits), "{{A");
        assert_eq!(expand("}} {{A}} {{", &store, limits), "}} ok {{");
        assert_eq!(expand("{{}}", &store, limits), "{{}}");
        assert_eq!(expand("{{a[b}}", &store, limits), "{{a[b}}");
    }

    #[test]
    fn loose_parameters_use_default_or_stay_literal() {
        let store = MemoryTemplateStore::new();
        let limits = ExpansionLimits::default();
        assert_eq!(expand("{{{1}}} {{{2|two}}}", &store, limits), "{{{1}}} two");
    }

    #[test]
    fn includeonly_and_noinclude_apply_when_transcluded() {
        let store = MemoryTemplateStore::new().with_template(
            "Doc",
            "shown<includeonly> inc</includeonly><noinclude> docs</noinclude>",
        );
        assert_eq!(
            expand("{{Doc}}", &store, ExpansionLimits::default()),
            "shown inc"
        );
    }

    #[test]
    fn comments_and_nowiki_are_not_expanded() {
        let store = MemoryTemplateStore::new().with_template("A", "ok");
        let limits = ExpansionLimits::default();
        assert_eq!(expand("<!-- {{A}} -->{{A}}", &store, limits), "ok");
        assert_eq!(
            expand("<nowiki>{{A}}</nowiki> {{A}}", &store, limits),
            "<nowiki>{{A}}</nowiki> ok"
        );
    }

    #[test]
    fn template_name_may_be_computed() {
        let store = MemoryTemplateStore::new()
            .with_template("Which", "Target")
            .with_template("Target", "hit");
        assert_eq!(
            expand("{{ {{Which}} }}", &store, ExpansionLimits::default()),
            "hit"
        );
    }

    #[test]
    fn conditional_functions_expand_only_selected_branch() {
        let store = MemoryTemplateStore::new()
            .with_template("Flag", "{{#if:{{{1|}}}|on|off}}")
            .with_template("Kind", "{{#switch:{{{1}}}|a=Alpha|b=Beta|#default=Other}}");
        let limits = ExpansionLimits::default();
        assert_eq!(expand("{{Flag|x}} {{Flag}}", &store, limits), "on off");
        assert_eq!(expand("{{Kind|b}} {{Kind|q}}", &store, limits), "Beta Other");
        let mut context = ExpansionContext::new(&store, limits);
        assert_eq!(context.expand("{{#if:|{{Missing}}|fine}}"), "fine");
        assert!(context.issues().is_empty());
    }

    #[test]
    fn unknown_function_renders_missing_marker() {
        let store = MemoryTemplateStore::new();
        let out = expand("{{#invoke:Mod|main}}", &store, ExpansionLimits::default());
        assert!(out.contains("template-missing"));
        assert!(out.contains("#invoke"));
    }

    #[test]
    fn repeated_invocations_query_store_once() {
        let store = MemoryTemplateStore::new().with_template("A", "a");
        let mut context = ExpansionContext::new(&store, ExpansionLimits::default());
        assert_eq!(context.expand("{{A}}{{A}}{{a}}{{Missing}}{{Missing}}"), {
            let marker = "<span class=\"template-error template-missing\">Template:Missing</span>";
            format!("aaa{marker}{marker}")
        });
        assert_eq!(context.lookup().store_queries(), 2);
    }

    #[test]
    fn expansion_budget_bounds_wide_graphs() {
        let mut store = MemoryTemplateStore::new();
        for index in 0..20 {
            store.insert(
                &format!("W{index}"),
                &format!("{{{{W{next}}}}}{{{{W{next}}}}}", next = index + 1),
            );
        }
        let limits = ExpansionLimits {
            max_expansions: 100,
            ..ExpansionLimits::default()
        };
        let mut context = ExpansionContext::new(&store, limits);
        let out = context.expand("{{W0}}");
        assert_eq!(context.expansions(), 100);
        assert!(out.contains("template-budget"));
    }

    #[test]
    fn deeply_nested_arguments_are_bounded() {
        let store = MemoryTemplateStore::new().with_template("Id", "{{{1}}}");
        let nested = format!("{}x{}", "{{Id|".repeat(500), "}}".repeat(500));
        let out = expand(&nested, &store, ExpansionLimits::default());
        assert!(out.contains("template-depth"));
    }

    #[test]
    fn page_expansion_reports_self_transclusion() {
        let store = MemoryTemplateStore::new().with_template("Box", "{{Box}}");
        let name = TemplateName::parse("Box").expect("name");
        let mut context = ExpansionContext::new(&store, ExpansionLimits::default());
        let out = context.expand_as_page(&name, "see {{Box}}");
        assert!(out.contains("template-loop"));
        assert_eq!(context.depth(), 0);
    }

    #[test]
    fn arabic_content_survives_expansion() {
        let store = MemoryTemplateStore::new().with_template("تحية", "مرحبا {{{1|بالعالم}}}");
        assert_eq!(
            expand("{{تحية}}، {{تحية|يا صديق}}", &store, ExpansionLimits::default()),
            "مرحبا بالعالم، مرحبا يا صديق"
        );
    }
}
