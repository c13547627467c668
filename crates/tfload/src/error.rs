//! errors raised while loading templates and modules
use crate::fetch::FetchError;
use std::path::PathBuf;
use std::sync::Arc;

/// Diagnostic produced by a [crate::template::ParseAdapter]
pub type ParseDiagnostic = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("Template file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Unable to parse template file {}", path.display())]
    Syntax {
        path: PathBuf,
        #[source]
        diagnostic: ParseDiagnostic,
    },

    #[error("Unable to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory not found: {}", path.display())]
    DirectoryNotFound { path: PathBuf },

    #[error("Module \"{alias}\" not found (source: {module_source})")]
    ModuleNotFound {
        alias: String,
        module_source: String,
        #[source]
        cause: Arc<FetchError>,
    },

    #[error("Module \"{alias}\" forms a cycle (source: {module_source}, chain: {chain:?})")]
    ModuleCycle {
        alias: String,
        module_source: String,
        chain: Vec<String>,
    },

    #[error("Module \"{alias}\" exceeds the maximum nesting depth of {depth} (source: {module_source})")]
    ModuleDepthExceeded {
        alias: String,
        module_source: String,
        depth: usize,
    },
}

impl LoadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return LoadError::NotFound { path };
        }
        LoadError::Io { path, source }
    }
}
