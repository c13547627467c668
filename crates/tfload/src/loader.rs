//! orchestrates one load run
//!
//! A [Loader] owns the [FileCollection] and the [StateModel] of a run. Templates are merged file by file
//! ([Loader::merge_file], [Loader::load_directory]) or module by module ([Loader::resolve_module]). A module and
//! every module nested in it are parsed completely before any of their files is inserted, so a module that fails
//! to load, at any depth, leaves no trace.
use crate::config::LoaderConfig;
use crate::error::LoadError;
use crate::fetch::{FetchClient, SourceFetcher};
use crate::module_cache::{FetchOnce, ModuleCache};
use crate::source::{normalize, ModuleReference};
use crate::state::{self, StateError, StateModel};
use crate::template::{file_key, load_file, template_files_in, FileCollection, HclParser, ParseAdapter};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Parsed files waiting to be committed, in load order
type Staged<D> = Vec<(PathBuf, Arc<D>)>;

/// Read-only view of everything loaded so far
#[derive(Debug, derive_new::new)]
pub struct Snapshot<D> {
    pub files: FileCollection<D>,
    pub state: Arc<StateModel>,
}

impl<D> Clone for Snapshot<D> {
    fn clone(&self) -> Self {
        Self::new(self.files.clone(), Arc::clone(&self.state))
    }
}

pub struct Loader<P: ParseAdapter = HclParser> {
    config: LoaderConfig,
    parser: P,
    fetcher: Arc<dyn FetchClient>,
    cache: ModuleCache,
    fetched: FetchOnce,
    files: RwLock<FileCollection<P::Document>>,
    state: RwLock<Arc<StateModel>>,
}

impl Loader<HclParser> {
    /// Loader for HCL templates using the default fetch client
    pub fn new(config: LoaderConfig) -> Self {
        let cache = ModuleCache::new(&config.cache_dir);
        Self::with_collaborators(config, HclParser, Arc::new(SourceFetcher::new()), cache)
    }
}

impl<P: ParseAdapter> Loader<P> {
    pub fn with_collaborators(
        config: LoaderConfig,
        parser: P,
        fetcher: Arc<dyn FetchClient>,
        cache: ModuleCache,
    ) -> Self {
        Self {
            config,
            parser,
            fetcher,
            cache,
            fetched: FetchOnce::default(),
            files: RwLock::new(FileCollection::default()),
            state: RwLock::new(Arc::default()),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Loads a single template, replacing an earlier load of the same file
    pub async fn merge_file(&self, path: &Path) -> Result<(), LoadError> {
        self.merge(path).await.map(|_| ())
    }

    /// Merges all template files directly inside `dir`
    ///
    /// Stops at the first failing file. Files merged before it are kept.
    pub async fn load_directory(&self, dir: &Path) -> Result<(), LoadError> {
        self.merge_directory(dir).await.map(|_| ())
    }

    /// Fetches a module and merges its templates, together with the modules it references
    ///
    /// Relative local sources are resolved against [LoaderConfig::working_dir].
    pub async fn resolve_module(&self, reference: &ModuleReference) -> Result<(), LoadError> {
        let reference = reference.resolved_against(&self.config.working_dir);
        let staged = self.stage_module(reference, vec![], 1).await?;
        self.commit(staged);
        Ok(())
    }

    /// Loads the templates in `root_dir`, then the given modules
    ///
    /// Relative local sources are resolved against `root_dir`.
    pub async fn load_all_templates(
        &self,
        root_dir: &Path,
        references: &[ModuleReference],
    ) -> Result<(), LoadError> {
        self.load_directory(root_dir).await?;
        self.resolve_from_root(root_dir, references).await
    }

    /// Loads the templates in `root_dir` and every module they reference
    pub async fn load_project(&self, root_dir: &Path) -> Result<(), LoadError> {
        let documents = self.merge_directory(root_dir).await?;
        let references: Vec<_> = documents
            .iter()
            .flat_map(|document| self.parser.module_references(document))
            .collect();
        tracing::debug!(directory=%root_dir.display(), modules = references.len(), "project loaded");

        self.resolve_from_root(root_dir, &references).await
    }

    /// Loads the state of [LoaderConfig::working_dir]
    ///
    /// Never leaves the loader without a state: on error an empty one is kept and the error is returned for
    /// reporting.
    pub async fn load_state(&self) -> Result<(), StateError> {
        let (state, result) = match state::load(&self.config).await {
            Ok(state) => (state, Ok(())),
            Err(e) => {
                tracing::warn!(error=%e, "unable to load state, continuing without");
                (StateModel::default(), Err(e))
            }
        };

        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(state);
        result
    }

    pub fn snapshot(&self) -> Snapshot<P::Document> {
        let files = self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let state = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Snapshot::new(files, state)
    }

    async fn merge(&self, path: &Path) -> Result<Arc<P::Document>, LoadError> {
        let (path, document) = load_file(&self.parser, path).await?;
        let document = Arc::new(document);
        self.commit(vec![(path, Arc::clone(&document))]);
        Ok(document)
    }

    async fn merge_directory(&self, dir: &Path) -> Result<Vec<Arc<P::Document>>, LoadError> {
        let mut documents = vec![];
        for path in template_files_in(dir, &self.config.extension).await? {
            documents.push(self.merge(&path).await?);
        }
        Ok(documents)
    }

    /// Parses all templates in `dir` without touching the collection
    async fn stage_directory(&self, dir: &Path) -> Result<Staged<P::Document>, LoadError> {
        let mut staged = vec![];
        for path in template_files_in(dir, &self.config.extension).await? {
            let (path, document) = load_file(&self.parser, &path).await?;
            staged.push((path, Arc::new(document)));
        }
        Ok(staged)
    }

    fn commit(&self, staged: Staged<P::Document>) {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        for (path, document) in staged {
            if files.insert(file_key(&path), document).is_some() {
                tracing::debug!(path=%path.display(), "replaced previously loaded file");
            }
        }
    }

    async fn resolve_from_root(
        &self,
        root_dir: &Path,
        references: &[ModuleReference],
    ) -> Result<(), LoadError> {
        let root = match tokio::fs::canonicalize(root_dir).await {
            Ok(root) => root,
            Err(_) => normalize(&std::path::absolute(root_dir).map_err(|e| LoadError::io(root_dir, e))?),
        };

        let chain = vec![root.display().to_string()];
        let results: Vec<_> = futures::stream::iter(references)
            .map(|reference| self.stage_module(reference.resolved_against(&root), chain.clone(), 1))
            .buffered(self.config.fetch_concurrency.max(1))
            .collect()
            .await;

        // each top-level module is committed on its own
        let mut first = None;
        for result in results {
            match result {
                Ok(staged) => self.commit(staged),
                Err(error) if first.is_none() => first = Some(error),
                Err(error) => tracing::debug!(%error, "additional module failure"),
            }
        }

        first.map_or(Ok(()), Err)
    }

    /// Stages `references` concurrently, failing with the first error in reference order
    async fn stage_modules(
        &self,
        references: Vec<ModuleReference>,
        chain: Vec<String>,
        depth: usize,
    ) -> Result<Staged<P::Document>, LoadError> {
        let results: Vec<_> = futures::stream::iter(references)
            .map(|reference| self.stage_module(reference, chain.clone(), depth))
            .buffered(self.config.fetch_concurrency.max(1))
            .collect()
            .await;

        let mut staged = vec![];
        let mut first = None;
        for result in results {
            match result {
                Ok(files) => staged.extend(files),
                Err(error) if first.is_none() => first = Some(error),
                Err(error) => tracing::debug!(%error, "additional module failure"),
            }
        }

        first.map_or(Ok(staged), Err)
    }

    /// Parses the module behind `reference` and every module nested in it, without touching the collection
    ///
    /// `chain` holds the sources of all modules `reference` is nested in.
    fn stage_module(
        &self,
        reference: ModuleReference,
        chain: Vec<String>,
        depth: usize,
    ) -> BoxFuture<'_, Result<Staged<P::Document>, LoadError>> {
        async move {
            if chain.contains(&reference.source) {
                return Err(LoadError::ModuleCycle {
                    alias: reference.alias,
                    module_source: reference.source,
                    chain,
                });
            }
            if depth > self.config.max_module_depth {
                return Err(LoadError::ModuleDepthExceeded {
                    alias: reference.alias,
                    module_source: reference.source,
                    depth: self.config.max_module_depth,
                });
            }

            tracing::info!(module=%reference, depth, "resolving module");
            let ModuleReference { alias, source } = reference;
            let root = self
                .fetched
                .get_or_fetch(&source, &self.cache, self.fetcher.as_ref())
                .await
                .map_err(|cause| LoadError::ModuleNotFound {
                    alias: alias.clone(),
                    module_source: source.clone(),
                    cause,
                })?;

            let mut staged = self.stage_directory(&root).await?;
            let nested: Vec<_> = staged
                .iter()
                .flat_map(|(_, document)| self.parser.module_references(document))
                .map(|nested| nested.resolved_against(&root))
                .collect();
            tracing::debug!(%alias, files = staged.len(), nested = nested.len(), "module parsed");

            if !nested.is_empty() {
                let mut chain = chain;
                chain.push(source);
                staged.extend(self.stage_modules(nested, chain, depth + 1).await?);
            }
            Ok(staged)
        }
        .boxed()
    }
}

impl<P: ParseAdapter> std::fmt::Debug for Loader<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Loader")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("fetched", &self.fetched)
            .field("files", &files.keys().collect::<Vec<_>>())
            .finish()
    }
}
