pub mod brackets;
pub mod config;
pub mod expander;
pub mod filesystem;
pub mod functions;
pub mod html;
pub mod invocation;
pub mod media;
pub mod parser;
pub mod render;
pub mod runtime;
pub mod sections;
pub mod storage;
pub mod store;
pub mod substitute;

pub use expander::{ExpansionIssue, ExpansionLimits};
pub use parser::{ExpansionReport, Parser, ParserConfig};
pub use render::{RenderOptions, RenderedPage, render_inline};
pub use storage::SqliteTemplateStore;
pub use store::{MemoryTemplateStore, Namespace, Template, TemplateName, TemplateStore};
