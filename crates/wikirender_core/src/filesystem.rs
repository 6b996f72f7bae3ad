use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::store::{Namespace, TemplateName};

const TEMPLATE_EXTENSIONS: &[&str] = &["wiki", "wikitext"];

#[derive(Debug, Clone)]
pub struct ScannedTemplate {
    pub relative_path: String,
    pub name: TemplateName,
    pub body: String,
    pub content_hash: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateScan {
    pub templates: Vec<ScannedTemplate>,
    /// Relative paths of template files whose path is not a valid title.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanStats {
    pub total_files: usize,
    pub skipped_files: usize,
    pub by_namespace: BTreeMap<String, usize>,
}

/// Walk `templates_dir` for `.wiki` and `.wikitext` files, sorted by
/// relative path. A missing directory yields an empty scan.
pub fn scan_template_dir(templates_dir: &Path) -> Result<TemplateScan> {
    let mut scan = TemplateScan::default();
    if !templates_dir.exists() {
        return Ok(scan);
    }

    for entry in WalkDir::new(templates_dir)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry =
            entry.with_context(|| format!("failed to walk {}", templates_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|item| item.to_str())
            .unwrap_or("");
        if !TEMPLATE_EXTENSIONS.contains(&ext) {
            continue;
        }
        let relative = relative_path(templates_dir, path)?;
        if relative.split('/').any(|segment| segment.starts_with('.')) {
            continue;
        }

        let Some(name) = template_path_to_name(&relative) else {
            tracing::warn!(path = %relative, "template path does not map to a valid title");
            scan.skipped.push(relative);
            continue;
        };
        let body =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let metadata =
            fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
        scan.templates.push(ScannedTemplate {
            relative_path: relative,
            name,
            content_hash: compute_hash(&body),
            body,
            bytes: metadata.len(),
        });
    }
    scan.templates
        .sort_by(|left, right| left.relative_path.cmp(&right.relative_path));
    Ok(scan)
}

pub fn scan_stats(templates_dir: &Path) -> Result<ScanStats> {
    let scan = scan_template_dir(templates_dir)?;
    let mut by_namespace = BTreeMap::new();
    for template in &scan.templates {
        *by_namespace
            .entry(template.name.namespace.as_str().to_string())
            .or_insert(0) += 1;
    }
    Ok(ScanStats {
        total_files: scan.templates.len() + scan.skipped.len(),
        skipped_files: scan.skipped.len(),
        by_namespace,
    })
}

/// Map a path relative to the templates directory to a title.
///
/// - `Main/Foo.wiki` -> `Foo`, `Template/Foo.wiki` -> `Template:Foo`
/// - `Template_Foo_bar.wiki` (at any depth) -> `Template:Foo bar`
/// - `Template_Foo/doc.wiki` -> `Template:Foo/doc`
/// - anything else -> Template namespace
///
/// Within a segment `___` decodes to `/`, `--` to `:` and `_` to a space.
pub fn template_path_to_name(relative: &str) -> Option<TemplateName> {
    let normalized = normalize_separators(relative);
    let segments: Vec<&str> = normalized
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != "_redirects")
        .collect();
    let (file, dirs) = segments.split_last()?;
    let mut names: Vec<&str> = dirs.to_vec();
    names.push(strip_known_extensions(file));

    if !dirs.is_empty()
        && let Some(namespace) = Namespace::parse(names[0])
    {
        let title = names[1..]
            .iter()
            .map(|segment| decode_segment(segment))
            .collect::<Vec<_>>()
            .join("/");
        return qualified_name(namespace, &title);
    }

    for (index, segment) in names.iter().enumerate() {
        if let Some((namespace, base)) = split_prefixed_segment(segment) {
            let mut parts = vec![decode_segment(base)];
            parts.extend(names[index + 1..].iter().map(|item| decode_segment(item)));
            return qualified_name(namespace, &parts.join("/"));
        }
    }

    qualified_name(Namespace::Template, &decode_segment(names.last()?))
}

fn split_prefixed_segment(segment: &str) -> Option<(Namespace, &str)> {
    Namespace::ALL
        .into_iter()
        .filter(|namespace| *namespace != Namespace::Main)
        .find_map(|namespace| {
            segment
                .strip_prefix(namespace.as_str())
                .and_then(|rest| rest.strip_prefix('_'))
                .map(|rest| (namespace, rest))
        })
}

fn qualified_name(namespace: Namespace, title: &str) -> Option<TemplateName> {
    let raw = match namespace {
        Namespace::Main => format!(":{title}"),
        namespace => format!("{}:{title}", namespace.as_str()),
    };
    let name = TemplateName::parse(&raw)?;
    (name.namespace == namespace).then_some(name)
}

/// Inverse of [`template_path_to_name`] for the flat layout:
/// `Template:Foo bar/doc` -> `Template_Foo_bar___doc.wiki`.
pub fn title_to_relative_path(name: &TemplateName) -> String {
    let encoded = title_to_filename(&name.title);
    match name.namespace {
        Namespace::Main => format!("Main/{encoded}.wiki"),
        namespace => format!("{}_{encoded}.wiki", namespace.as_str()),
    }
}

fn title_to_filename(title: &str) -> String {
    title
        .replace(' ', "_")
        .replace('/', "___")
        .replace(':', "--")
}

fn decode_segment(value: &str) -> String {
    value
        .replace("___", "/")
        .replace("--", ":")
        .replace('_', " ")
}

fn strip_known_extensions(value: &str) -> &str {
    for ext in TEMPLATE_EXTENSIONS {
        if let Some(stripped) = value
            .strip_suffix(ext)
            .and_then(|rest| rest.strip_suffix('.'))
        {
            return stripped;
        }
    }
    value
}

fn relative_path(base: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(base).with_context(|| {
        format!(
            "failed to derive relative path from {} for {}",
            base.display(),
            path.display()
        )
    })?;
    Ok(normalize_separators(&rel.to_string_lossy()))
}

pub fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Forward-slash rendering of `path` for output and logs.
pub fn display_path(path: &Path) -> String {
    normalize_separators(&path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::{
        compute_hash, scan_stats, scan_template_dir, template_path_to_name,
        title_to_relative_path,
    };
    use crate::store::{Namespace, TemplateName};
    use tempfile::tempdir;

    fn write_file(path: &Path, content: &str) {
        let parent = path.parent().expect("parent");
        fs::create_dir_all(parent).expect("create parent");
        fs::write(path, content).expect("write file");
    }

    #[test]
    fn maps_paths_to_titles() {
        let cases = [
            ("Template_Foo_bar.wiki", "Template:Foo bar"),
            ("Main/Foo.wiki", "Foo"),
            ("Main/History/1990s.wiki", "History/1990s"),
            ("Template/Navbox.wikitext", "Template:Navbox"),
            ("infobox/Template_Infobox_person.wiki", "Template:Infobox person"),
            ("navbox/Template_Navbox/doc.wiki", "Template:Navbox/doc"),
            ("Template_A___B.wiki", "Template:A/B"),
            ("Template_Ratio--Gold.wiki", "Template:Ratio:Gold"),
            ("Category_People.wiki", "Category:People"),
            ("misc/Plain_name.wiki", "Template:Plain name"),
            ("misc\\Template_Windows.wiki", "Template:Windows"),
        ];
        for (path, expected) in cases {
            assert_eq!(
                template_path_to_name(path)
                    .map(|name| name.full_title())
                    .as_deref(),
                Some(expected),
                "failed for path={path}"
            );
        }
    }

    #[test]
    fn invalid_paths_map_to_none() {
        assert!(template_path_to_name("Template_.wiki").is_none());
        assert!(template_path_to_name("Template_{bad}.wiki").is_none());
        assert!(template_path_to_name("").is_none());
    }

    #[test]
    fn relative_path_roundtrip() {
        for title in ["Template:Infobox person", "Template:A/b", "Foo bar", "Module:Ratio:x"] {
            let name = TemplateName::parse_with_default(title, Namespace::Main).expect("name");
            let relative = title_to_relative_path(&name);
            assert_eq!(
                template_path_to_name(&relative),
                Some(name),
                "failed for title={title}"
            );
        }
    }

    #[test]
    fn scan_reads_templates_and_skips_invalid_and_hidden_files() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("templates");
        write_file(&dir.join("Template_Hello.wiki"), "Hello {{{1|World}}}");
        write_file(&dir.join("Main").join("Front.wiki"), "Front page");
        write_file(&dir.join("Template_{x}.wiki"), "bad");
        write_file(&dir.join("notes.txt"), "ignored");
        write_file(&dir.join(".cache").join("Template_Old.wiki"), "ignored");

        let scan = scan_template_dir(&dir).expect("scan");
        let titles: Vec<String> = scan
            .templates
            .iter()
            .map(|template| template.name.full_title())
            .collect();
        assert_eq!(titles, vec!["Front".to_string(), "Template:Hello".to_string()]);
        assert_eq!(scan.skipped, vec!["Template_{x}.wiki".to_string()]);
        assert_eq!(scan.templates[1].content_hash, compute_hash("Hello {{{1|World}}}"));
        assert_eq!(scan.templates[1].bytes, 19);

        let stats = scan_stats(&dir).expect("stats");
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.skipped_files, 1);
        assert_eq!(stats.by_namespace.get("Template"), Some(&1));
        assert_eq!(stats.by_namespace.get("Main"), Some(&1));
    }

    #[test]
    fn scan_of_missing_dir_is_empty() {
        let temp = tempdir().expect("tempdir");
        let scan = scan_template_dir(&temp.path().join("missing")).expect("scan");
        assert!(scan.templates.is_empty());
        assert!(scan.skipped.is_empty());
    }
}
