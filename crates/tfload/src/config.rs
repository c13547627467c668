//! loader configuration
use std::path::{Path, PathBuf};

/// Settings for one [crate::loader::Loader] run
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Base for state discovery and relative module sources passed to
    /// [crate::loader::Loader::resolve_module]
    pub working_dir: PathBuf,
    /// On-disk module cache
    pub cache_dir: PathBuf,
    /// Template file extension (without the dot)
    pub extension: String,
    /// Local state file, relative to `working_dir`
    pub local_state_file: PathBuf,
    /// Backend configuration / cached remote state, relative to `working_dir`
    pub backend_pointer_file: PathBuf,
    pub max_module_depth: usize,
    /// Module resolutions running at the same time
    pub fetch_concurrency: usize,
}

impl LoaderConfig {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        Self {
            cache_dir: default_cache_dir(&working_dir),
            working_dir,
            extension: "tf".to_string(),
            local_state_file: PathBuf::from("terraform.tfstate"),
            backend_pointer_file: PathBuf::from(".terraform").join("terraform.tfstate"),
            max_module_depth: 16,
            fetch_concurrency: 4,
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn local_state_path(&self) -> PathBuf {
        self.working_dir.join(&self.local_state_file)
    }

    pub fn backend_pointer_path(&self) -> PathBuf {
        self.working_dir.join(&self.backend_pointer_file)
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

/// `<user cache dir>/tfload/modules`, or `.tfload/modules` inside the project if there is no user cache dir
pub fn default_cache_dir(working_dir: &Path) -> PathBuf {
    match dirs::cache_dir() {
        Some(dir) => dir.join("tfload").join("modules"),
        None => working_dir.join(".tfload").join("modules"),
    }
}
