//! collection of parsed templates ([FileCollection]) and the [ParseAdapter] that produces them
//!
//! [FileCollection] tracks
//! - the canonical source path of each template
//! - its parse tree
//!
//! Loading the same path again replaces the previous tree. The collection never looks inside a tree, it only
//! stores and hands it out.
use crate::error::{LoadError, ParseDiagnostic};
use crate::source::ModuleReference;
use hcl_edit::structure::{Block, Body, Structure};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Turns template text into a parse tree
pub trait ParseAdapter: Send + Sync {
    type Document: Send + Sync + 'static;

    fn parse(&self, path: &Path, contents: &str) -> Result<Self::Document, ParseDiagnostic>;

    /// `module` declarations found in `document`
    fn module_references(&self, _document: &Self::Document) -> Vec<ModuleReference> {
        vec![]
    }
}

/// [ParseAdapter] backed by [hcl_edit]
#[derive(Debug, Default, Clone, Copy)]
pub struct HclParser;

impl ParseAdapter for HclParser {
    type Document = Body;

    fn parse(&self, _path: &Path, contents: &str) -> Result<Body, ParseDiagnostic> {
        Ok(hcl_edit::parser::parse_body(contents)?)
    }

    fn module_references(&self, document: &Body) -> Vec<ModuleReference> {
        document
            .iter()
            .filter_map(|structure| match structure {
                Structure::Block(block) => module_reference(block),
                Structure::Attribute(_) => None,
            })
            .collect()
    }
}

fn module_reference(block: &Block) -> Option<ModuleReference> {
    if block.ident.value().as_str() != "module" {
        return None;
    }

    let alias = block.labels.first()?.as_str();
    let source = block
        .body
        .attributes()
        .find(|attribute| attribute.key.value().as_str() == "source")?;

    let hcl::Expression::String(source) = hcl::Expression::from(source.value.clone()) else {
        tracing::debug!(alias, "module source is not a string literal, skipping");
        return None;
    };

    Some(ModuleReference::new(alias, source))
}

/// Parsed templates keyed by canonical path
#[derive(Debug)]
pub struct FileCollection<D> {
    files: BTreeMap<String, Arc<D>>,
}

impl<D> Default for FileCollection<D> {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
        }
    }
}

impl<D> Clone for FileCollection<D> {
    fn clone(&self) -> Self {
        Self {
            files: self.files.clone(),
        }
    }
}

impl<D: PartialEq> PartialEq for FileCollection<D> {
    fn eq(&self, other: &Self) -> bool {
        self.files == other.files
    }
}

impl<D> FileCollection<D> {
    /// Inserts a parse tree, returning the one previously stored under `key`
    pub fn insert(&mut self, key: impl Into<String>, document: impl Into<Arc<D>>) -> Option<Arc<D>> {
        self.files.insert(key.into(), document.into())
    }

    pub fn get(&self, key: &str) -> Option<&Arc<D>> {
        self.files.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.files.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<D>)> {
        self.files.iter().map(|(key, document)| (key.as_str(), document))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Key under which a template at `path` is stored
pub fn file_key(path: &Path) -> String {
    path.display().to_string()
}

/// Reads and parses a single template
///
/// Returns the canonical path together with the parse tree.
pub async fn load_file<P: ParseAdapter>(
    parser: &P,
    path: &Path,
) -> Result<(PathBuf, P::Document), LoadError> {
    let path = tokio::fs::canonicalize(path)
        .await
        .map_err(|e| LoadError::io(path, e))?;
    tracing::info!(path=%path.display(), "loading file");

    let contents = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| LoadError::io(&path, e))?;

    match parser.parse(&path, &contents) {
        Ok(document) => Ok((path, document)),
        Err(diagnostic) => Err(LoadError::Syntax { path, diagnostic }),
    }
}

/// Template files directly inside `dir`, sorted by file name
pub async fn template_files_in(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, LoadError> {
    let mut read_dir =
        tokio::fs::read_dir(dir)
            .await
            .map_err(|_| LoadError::DirectoryNotFound {
                path: dir.to_path_buf(),
            })?;

    let mut files = vec![];
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| LoadError::io(dir, e))?
    {
        let path = entry.path();
        if path.extension().map_or(true, |ext| ext != extension) {
            continue;
        }

        // follows symlinks, module caches frequently link files
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => files.push(path),
            Ok(_) => tracing::trace!(path=%path.display(), "not a file, skipping"),
            Err(e) => return Err(LoadError::io(path, e)),
        }
    }

    files.sort();
    Ok(files)
}

impl From<Body> for FileCollection<Body> {
    fn from(value: Body) -> Self {
        let mut files = FileCollection::default();
        files.insert("main.tf", value);
        files
    }
}

/// Utility macro to create a [FileCollection] of HCL bodies
///
/// Create from a single document (stored as `main.tf`)
/// ```
/// # use tfload::template_files;
/// let files = template_files!("resource \"aws_instance\" \"web\" {}");
/// assert!(files.contains_key("main.tf"));
/// ```
///
/// Create from multiple documents
/// ```
/// # use tfload::template_files;
/// let files = template_files! {
///   "main.tf" => "resource \"aws_instance\" \"web\" {}",
///   "output.tf" => "output \"ip\" { value = 1 }"
/// };
/// assert_eq!(files.len(), 2);
/// ```
///
/// # Panic
/// Panics on invalid input
///
/// ```should_panic
/// # use tfload::template_files;
/// template_files!("not = valid = hcl");
/// ```
#[macro_export]
macro_rules! template_files {
    // single document
    { $expr:expr } => {
        $crate::template::FileCollection::from(hcl_edit::parser::parse_body($expr).expect("body must parse"))
    };
    // multi document with keys
    { $($key:expr => $expr:expr),+ } => {{
        let mut files = $crate::template::FileCollection::<hcl_edit::structure::Body>::default();
        $(
            files.insert($key, hcl_edit::parser::parse_body($expr).expect("body must parse"));
        )+

        files
    }};
}
