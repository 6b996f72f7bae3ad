use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use wikirender_core::config::load_config;
use wikirender_core::filesystem::{display_path, scan_stats};
use wikirender_core::runtime::{PathFlags, ProjectPaths, init_project};
use wikirender_core::store::{Namespace, TemplateName, TemplateStore};
use wikirender_core::{ParserConfig, SqliteTemplateStore};

#[derive(Debug, Parser)]
#[command(
    name = "wikirender",
    version,
    about = "Expand wiki templates and render wiki text to HTML"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the project layout and default config
    Init(InitArgs),
    /// Expand and render a wiki text file (`-` reads stdin)
    Render(RenderArgs),
    /// Manage stored templates
    Template(TemplateArgs),
    /// Inspect the template database
    Db(DbArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct RenderArgs {
    #[arg(value_name = "PATH")]
    input: String,
    #[arg(long, help = "Print expanded wiki text instead of HTML")]
    expand_only: bool,
    #[arg(long, help = "Print JSON output")]
    json: bool,
}

#[derive(Debug, Args)]
struct TemplateArgs {
    #[command(subcommand)]
    command: TemplateSubcommand,
}

#[derive(Debug, Subcommand)]
enum TemplateSubcommand {
    /// Import a templates directory into the store
    Import {
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },
    /// Write stored templates to a directory as `.wiki` files
    Export {
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },
    /// Render a stored template as its own page
    Show {
        name: String,
        #[arg(long, help = "Print the stored body unchanged")]
        raw: bool,
    },
    /// List stored templates
    List {
        #[arg(long, value_name = "NAMESPACE")]
        namespace: Option<String>,
    },
    /// Delete a stored template
    Remove { name: String },
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Render(args)) => run_render(&runtime, args),
        Some(Commands::Template(TemplateArgs { command })) => match command {
            TemplateSubcommand::Import { dir } => run_template_import(&runtime, dir),
            TemplateSubcommand::Export { dir } => run_template_export(&runtime, dir),
            TemplateSubcommand::Show { name, raw } => run_template_show(&runtime, &name, raw),
            TemplateSubcommand::List { namespace } => {
                run_template_list(&runtime, namespace.as_deref())
            }
            TemplateSubcommand::Remove { name } => run_template_remove(&runtime, &name),
        },
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Stats => run_db_stats(&runtime),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_project(&paths, args.force)?;

    println!("Initialized wikirender project layout");
    println!("project_root: {}", display_path(&paths.root.path));
    println!("templates: {}", display_path(&paths.templates_dir()));
    println!("state_dir: {}", display_path(&paths.state_dir()));
    println!("data_dir: {}", display_path(&paths.data_dir.path));
    println!("db_path: {}", display_path(&paths.db_path()));
    println!("config_path: {}", display_path(&paths.config_path.path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_render(runtime: &RuntimeOptions, args: RenderArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let input = read_input(&args.input)?;
    let config = load_parser_config(&paths)?;
    let store = SqliteTemplateStore::open(&paths.db_path())?;
    let parser = wikirender_core::Parser::new(&store, config);

    match (args.expand_only, args.json) {
        (true, true) => {
            let report = parser.expand_with_report(&input);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        (true, false) => {
            let report = parser.expand_with_report(&input);
            print!("{}", report.text);
            log_issue_count(report.issues.len());
        }
        (false, true) => {
            let page = parser.render_page(&input);
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        (false, false) => {
            let page = parser.render_page(&input);
            println!("{}", page.html);
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_template_import(runtime: &RuntimeOptions, dir: Option<PathBuf>) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let templates_dir = dir.unwrap_or_else(|| paths.templates_dir());
    if !templates_dir.exists() {
        bail!(
            "templates directory does not exist: {}\nRun `wikirender init` or pass a directory.",
            display_path(&templates_dir)
        );
    }

    let store = SqliteTemplateStore::open(&paths.db_path())?;
    let report = store.import_directory(&templates_dir)?;

    println!("template import");
    println!("templates_dir: {}", display_path(&templates_dir));
    println!("db_path: {}", display_path(&paths.db_path()));
    println!("scanned: {}", report.scanned);
    println!("inserted: {}", report.inserted);
    println!("updated: {}", report.updated);
    println!("unchanged: {}", report.unchanged);
    println!("skipped: {}", report.skipped.len());
    for path in &report.skipped {
        println!("  - {path}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_template_export(runtime: &RuntimeOptions, dir: Option<PathBuf>) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let out_dir = dir.unwrap_or_else(|| paths.templates_dir());
    let store = SqliteTemplateStore::open(&paths.db_path())?;
    let written = store.export_directory(&out_dir)?;

    println!("template export");
    println!("out_dir: {}", display_path(&out_dir));
    println!("written: {}", written.len());
    for relative in &written {
        println!("  - {relative}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_template_show(runtime: &RuntimeOptions, name: &str, raw: bool) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let resolved = parse_template_name(name)?;
    let store = SqliteTemplateStore::open(&paths.db_path())?;

    if raw {
        let Some(template) = store.get_template(&resolved.key())? else {
            bail!("template not found: {resolved}");
        };
        print!("{}", template.body);
        return Ok(());
    }

    let config = load_parser_config(&paths)?;
    let parser = wikirender_core::Parser::new(&store, config);
    let Some(page) = parser.render_template_page(name) else {
        bail!("template not found: {resolved}");
    };
    println!("{}", page.html);
    if !page.categories.is_empty() {
        println!("categories: {}", page.categories.join(", "));
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_template_list(runtime: &RuntimeOptions, namespace: Option<&str>) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let namespace = match namespace {
        Some(value) => match Namespace::parse(value) {
            Some(namespace) => Some(namespace),
            None => bail!("unknown namespace: {value}"),
        },
        None => None,
    };
    let store = SqliteTemplateStore::open(&paths.db_path())?;
    let templates = store.list_templates(namespace)?;

    println!("templates: {}", templates.len());
    for template in &templates {
        let title = match template.namespace.as_str() {
            "Main" => template.title.clone(),
            namespace => format!("{namespace}:{}", template.title),
        };
        println!(
            "  - {title} ({} bytes, {})",
            template.bytes, template.content_hash
        );
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_template_remove(runtime: &RuntimeOptions, name: &str) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let resolved = parse_template_name(name)?;
    let store = SqliteTemplateStore::open(&paths.db_path())?;
    if !store.remove_template(&resolved)? {
        bail!("template not found: {resolved}");
    }
    println!("removed: {resolved}");
    Ok(())
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    if !paths.db_path().exists() {
        bail!(
            "template database not found at {}\nRun `wikirender template import` first.",
            display_path(&paths.db_path())
        );
    }
    let store = SqliteTemplateStore::open(&paths.db_path())?;
    let stats = store.stats()?;

    println!("db stats");
    println!("db_path: {}", stats.db_path);
    println!("templates: {}", stats.templates);
    for (namespace, count) in &stats.by_namespace {
        println!("namespace.{namespace}: {count}");
    }

    let templates_dir = paths.templates_dir();
    let scan = scan_stats(&templates_dir)?;
    println!("templates_dir: {}", display_path(&templates_dir));
    println!("templates_dir.files: {}", scan.total_files);
    println!("templates_dir.skipped: {}", scan.skipped_files);
    for (namespace, count) in &scan.by_namespace {
        println!("templates_dir.namespace.{namespace}: {count}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read stdin")?;
        return Ok(buffer);
    }
    fs::read_to_string(input).with_context(|| format!("failed to read {input}"))
}

fn parse_template_name(name: &str) -> Result<TemplateName> {
    match TemplateName::parse(name) {
        Some(resolved) => Ok(resolved),
        None => bail!("invalid template name: {name}"),
    }
}

fn load_parser_config(paths: &ProjectPaths) -> Result<ParserConfig> {
    load_config(&paths.config_path.path)?.parser_config()
}

fn log_issue_count(count: usize) {
    if count > 0 {
        tracing::warn!("expansion produced {count} error marker(s)");
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ProjectPaths) {
    if runtime.diagnostics {
        eprintln!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ProjectPaths> {
    dotenvy::dotenv().ok();

    let cwd = env::current_dir().context("failed to read current directory")?;
    let flags = PathFlags {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = ProjectPaths::resolve(&cwd, &flags);
    let project_env = initial.root.path.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    Ok(ProjectPaths::resolve(&cwd, &flags))
}
