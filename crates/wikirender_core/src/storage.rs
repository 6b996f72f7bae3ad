use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, params};
use serde::Serialize;

use crate::filesystem::{compute_hash, display_path, scan_template_dir, title_to_relative_path};
use crate::store::{Namespace, Template, TemplateName, TemplateStore};

const TEMPLATE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS templates (
    key TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    namespace TEXT NOT NULL,
    body TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    updated_at_unix INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_templates_namespace ON templates(namespace);
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PutOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    pub key: String,
    pub title: String,
    pub namespace: String,
    pub bytes: usize,
    pub content_hash: String,
    pub updated_at_unix: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub db_path: String,
    pub templates: usize,
    pub by_namespace: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub scanned: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: Vec<String>,
}

/// Persisted template table. The connection sits behind a mutex, so one store
/// can be shared by concurrent parses.
pub struct SqliteTemplateStore {
    connection: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteTemplateStore {
    /// Open (and create if needed) the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        ensure_db_parent(db_path)?;
        let connection = open_connection(db_path)?;
        initialize_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn put_template(&self, name: &TemplateName, body: &str) -> Result<PutOutcome> {
        let connection = self.lock()?;
        upsert_template(&connection, name, body, unix_timestamp()?)
    }

    pub fn remove_template(&self, name: &TemplateName) -> Result<bool> {
        let connection = self.lock()?;
        let affected = connection
            .execute("DELETE FROM templates WHERE key = ?1", [name.key()])
            .with_context(|| format!("failed to delete {name}"))?;
        Ok(affected > 0)
    }

    pub fn list_templates(&self, namespace: Option<Namespace>) -> Result<Vec<TemplateSummary>> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(
                "SELECT key, title, namespace, length(CAST(body AS BLOB)), content_hash, updated_at_unix
                 FROM templates
                 WHERE ?1 IS NULL OR namespace = ?1
                 ORDER BY namespace ASC, key ASC",
            )
            .context("failed to prepare template listing query")?;

        let filter = namespace.map(Namespace::as_str);
        let rows = statement
            .query_map([filter], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .context("failed to run template listing query")?;

        let mut out = Vec::new();
        for row in rows {
            let (key, title, namespace, bytes, content_hash, updated_at_unix) =
                row.context("failed to read template listing row")?;
            out.push(TemplateSummary {
                key,
                title,
                namespace,
                bytes: usize::try_from(bytes).context("template size is negative")?,
                content_hash,
                updated_at_unix: u64::try_from(updated_at_unix)
                    .context("template timestamp is negative")?,
            });
        }
        Ok(out)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let connection = self.lock()?;
        let templates = count_query(&connection, "SELECT COUNT(*) FROM templates")
            .context("failed to count templates")?;
        let by_namespace = namespace_counts(&connection)?;
        Ok(StoreStats {
            db_path: display_path(&self.db_path),
            templates,
            by_namespace,
        })
    }

    /// Upsert every template file under `templates_dir`, skipping rows whose
    /// content hash is unchanged.
    pub fn import_directory(&self, templates_dir: &Path) -> Result<ImportReport> {
        let scan = scan_template_dir(templates_dir)?;
        let updated_at_unix = unix_timestamp()?;
        let mut report = ImportReport {
            scanned: scan.templates.len(),
            skipped: scan.skipped,
            ..ImportReport::default()
        };

        let mut connection = self.lock()?;
        let transaction = connection
            .transaction()
            .context("failed to start template import transaction")?;
        for template in &scan.templates {
            let outcome = upsert_template(&transaction, &template.name, &template.body, updated_at_unix)
                .with_context(|| format!("failed to import {}", template.relative_path))?;
            match outcome {
                PutOutcome::Inserted => report.inserted += 1,
                PutOutcome::Updated => report.updated += 1,
                PutOutcome::Unchanged => report.unchanged += 1,
            }
        }
        transaction
            .commit()
            .context("failed to commit template import transaction")?;

        tracing::info!(
            scanned = report.scanned,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped.len(),
            "imported templates from {}",
            display_path(templates_dir)
        );
        Ok(report)
    }

    /// Write every stored template under `out_dir` in the flat file layout
    /// that `import_directory` reads back.
    pub fn export_directory(&self, out_dir: &Path) -> Result<Vec<String>> {
        let mut written = Vec::new();
        for summary in self.list_templates(None)? {
            let Some(template) = self.get_template(&summary.key)? else {
                continue;
            };
            let name = TemplateName {
                namespace: template.namespace,
                title: template.name,
            };
            let relative = title_to_relative_path(&name);
            let path = out_dir.join(&relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::write(&path, &template.body)
                .with_context(|| format!("failed to write {}", path.display()))?;
            written.push(relative);
        }
        tracing::info!(
            templates = written.len(),
            "exported templates to {}",
            display_path(out_dir)
        );
        Ok(written)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| anyhow!("template store connection lock poisoned"))
    }
}

impl TemplateStore for SqliteTemplateStore {
    fn get_template(&self, key: &str) -> Result<Option<Template>> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare_cached("SELECT title, namespace, body FROM templates WHERE key = ?1 LIMIT 1")
            .context("failed to prepare template lookup")?;
        let mut rows = statement
            .query([key])
            .context("failed to run template lookup")?;
        let row = match rows.next().context("failed to read template row")? {
            Some(row) => row,
            None => return Ok(None),
        };

        let title: String = row.get(0).context("failed to decode template title")?;
        let namespace: String = row.get(1).context("failed to decode template namespace")?;
        let namespace = Namespace::parse(&namespace)
            .ok_or_else(|| anyhow!("unknown namespace {namespace} for {key}"))?;
        let body: String = row.get(2).context("failed to decode template body")?;
        Ok(Some(Template::new(title, namespace, body)))
    }
}

fn upsert_template(
    connection: &Connection,
    name: &TemplateName,
    body: &str,
    updated_at_unix: u64,
) -> Result<PutOutcome> {
    let key = name.key();
    let content_hash = compute_hash(body);
    let existing: Option<String> = {
        let mut statement = connection
            .prepare_cached("SELECT content_hash FROM templates WHERE key = ?1")
            .context("failed to prepare template hash lookup")?;
        let mut rows = statement
            .query([&key])
            .context("failed to run template hash lookup")?;
        match rows.next().context("failed to read template hash row")? {
            Some(row) => Some(row.get(0).context("failed to decode template hash")?),
            None => None,
        }
    };

    let outcome = match existing {
        Some(hash) if hash == content_hash => return Ok(PutOutcome::Unchanged),
        Some(_) => PutOutcome::Updated,
        None => PutOutcome::Inserted,
    };
    connection
        .execute(
            "INSERT INTO templates (key, title, namespace, body, content_hash, updated_at_unix)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(key) DO UPDATE SET
                title = excluded.title,
                namespace = excluded.namespace,
                body = excluded.body,
                content_hash = excluded.content_hash,
                updated_at_unix = excluded.updated_at_unix",
            params![
                key,
                name.title,
                name.namespace.as_str(),
                body,
                content_hash,
                i64::try_from(updated_at_unix).context("timestamp does not fit into i64")?,
            ],
        )
        .with_context(|| format!("failed to store {name}"))?;
    tracing::debug!(template = %name, ?outcome, "stored template");
    Ok(outcome)
}

fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set sqlite busy timeout")?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL journal mode")?;
    Ok(connection)
}

fn initialize_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(TEMPLATE_SCHEMA_SQL)
        .context("failed to initialize template schema")
}

fn ensure_db_parent(db_path: &Path) -> Result<()> {
    let parent = db_path
        .parent()
        .ok_or_else(|| anyhow!("db path has no parent: {}", db_path.display()))?;
    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create database parent directory {}",
            parent.display()
        )
    })
}

fn count_query(connection: &Connection, sql: &str) -> Result<usize> {
    let count: i64 = connection
        .query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("failed query: {sql}"))?;
    usize::try_from(count).context("count does not fit into usize")
}

fn namespace_counts(connection: &Connection) -> Result<BTreeMap<String, usize>> {
    let mut statement = connection
        .prepare(
            "SELECT namespace, COUNT(*) AS count
             FROM templates
             GROUP BY namespace
             ORDER BY namespace ASC",
        )
        .context("failed to prepare namespace aggregation query")?;

    let rows = statement
        .query_map([], |row| {
            let namespace: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((namespace, count))
        })
        .context("failed to run namespace aggregation query")?;

    let mut out = BTreeMap::new();
    for row in rows {
        let (namespace, count) = row.context("failed to read namespace aggregation row")?;
        let count = usize::try_from(count).context("namespace count does not fit into usize")?;
        out.insert(namespace, count);
    }
    Ok(out)
}

fn unix_timestamp() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before UNIX_EPOCH")
        .map(|duration| duration.as_secs())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;
    use std::thread;

    use tempfile::tempdir;

    use super::{PutOutcome, SqliteTemplateStore};
    use crate::parser::Parser;
    use crate::store::{Namespace, TemplateName, TemplateStore};

    fn write_file(path: &Path, content: &str) {
        let parent = path.parent().expect("parent");
        fs::create_dir_all(parent).expect("create parent");
        fs::write(path, content).expect("write file");
    }

    fn name(raw: &str) -> TemplateName {
        TemplateName::parse(raw).expect("valid name")
    }

    #[test]
    fn put_get_and_remove_templates() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("data").join("templates.db");
        let store = SqliteTemplateStore::open(&db_path).expect("open store");
        assert!(db_path.exists());

        assert_eq!(
            store.put_template(&name("Greeting"), "Hello").expect("put"),
            PutOutcome::Inserted
        );
        assert_eq!(
            store.put_template(&name("greeting"), "Hello").expect("put"),
            PutOutcome::Unchanged
        );
        assert_eq!(
            store.put_template(&name("Greeting"), "Hi").expect("put"),
            PutOutcome::Updated
        );

        let found = store
            .get_template("template:greeting")
            .expect("lookup")
            .expect("stored template");
        assert_eq!(found.body, "Hi");
        assert_eq!(found.namespace, Namespace::Template);
        assert!(store.get_template("template:missing").expect("lookup").is_none());

        assert!(store.remove_template(&name("Greeting")).expect("remove"));
        assert!(!store.remove_template(&name("Greeting")).expect("remove again"));
        assert!(store.get_template("template:greeting").expect("lookup").is_none());
    }

    #[test]
    fn import_directory_counts_changes_and_persists_across_opens() {
        let temp = tempdir().expect("tempdir");
        let templates_dir = temp.path().join("templates");
        let db_path = temp.path().join("templates.db");
        write_file(&templates_dir.join("Template_Hello.wiki"), "Hello {{{1|World}}}");
        write_file(&templates_dir.join("Main").join("Front.wiki"), "{{Hello}}");
        write_file(&templates_dir.join("Template_{x}.wiki"), "bad");

        let store = SqliteTemplateStore::open(&db_path).expect("open store");
        let first = store.import_directory(&templates_dir).expect("import");
        assert_eq!(first.scanned, 2);
        assert_eq!(first.inserted, 2);
        assert_eq!(first.skipped, vec!["Template_{x}.wiki".to_string()]);

        write_file(&templates_dir.join("Template_Hello.wiki"), "Hi {{{1|there}}}");
        let second = store.import_directory(&templates_dir).expect("import again");
        assert_eq!(second.updated, 1);
        assert_eq!(second.unchanged, 1);
        assert_eq!(second.inserted, 0);
        drop(store);

        let reopened = SqliteTemplateStore::open(&db_path).expect("reopen");
        let stats = reopened.stats().expect("stats");
        assert_eq!(stats.templates, 2);
        assert_eq!(
            stats.by_namespace,
            BTreeMap::from([
                ("Main".to_string(), 1usize),
                ("Template".to_string(), 1usize),
            ])
        );

        let listing = reopened
            .list_templates(Some(Namespace::Template))
            .expect("list");
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].key, "template:hello");
        assert_eq!(listing[0].bytes, "Hi {{{1|there}}}".len());
        assert_eq!(reopened.list_templates(None).expect("list all").len(), 2);

        let parser = Parser::with_defaults(&reopened);
        assert_eq!(parser.parse("{{Hello}} / {{:Front}}"), "Hi there / Hi there");
    }

    #[test]
    fn export_writes_files_that_import_back_unchanged() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteTemplateStore::open(&temp.path().join("a.db")).expect("open");
        store
            .put_template(&name("Infobox person"), "{{{name}}}")
            .expect("put");
        store
            .put_template(&name("Navbox/doc"), "docs")
            .expect("put");
        store
            .put_template(
                &TemplateName::parse(":Front").expect("main page"),
                "{{Infobox person|name=Ada}}",
            )
            .expect("put");

        let out_dir = temp.path().join("export");
        let written = store.export_directory(&out_dir).expect("export");
        assert_eq!(
            written,
            vec![
                "Main/Front.wiki".to_string(),
                "Template_Infobox_person.wiki".to_string(),
                "Template_Navbox___doc.wiki".to_string(),
            ]
        );
        assert_eq!(
            fs::read_to_string(out_dir.join("Template_Infobox_person.wiki")).expect("read"),
            "{{{name}}}"
        );

        let copy = SqliteTemplateStore::open(&temp.path().join("b.db")).expect("open copy");
        let report = copy.import_directory(&out_dir).expect("import");
        assert_eq!(report.inserted, 3);
        assert!(report.skipped.is_empty());
        assert_eq!(
            copy.get_template("template:navbox/doc")
                .expect("lookup")
                .expect("exported template")
                .body,
            "docs"
        );
    }

    #[test]
    fn sqlite_store_serves_concurrent_parses() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteTemplateStore::open(&temp.path().join("templates.db")).expect("open");
        store
            .put_template(&name("Echo"), "<{{{1}}}>")
            .expect("put");
        let parser = Parser::with_defaults(&store);

        thread::scope(|scope| {
            for index in 0..4 {
                let parser = &parser;
                scope.spawn(move || {
                    assert_eq!(parser.parse(&format!("{{{{Echo|{index}}}}}")), format!("<{index}>"));
                });
            }
        });
    }
}
