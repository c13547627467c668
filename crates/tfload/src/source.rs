//! module references and source address classification
//!
//! A module is referenced from a template as
//! ```hcl
//! module "network" {
//!   source = "git::https://example.com/network.git//vpc?ref=v1.2.0"
//! }
//! ```
//! which gives us a [ModuleReference] of `("network", "git::https://...")`.
//!
//! The source string stays opaque to the loader (it is the fetch-once cache key). Only the fetch client and
//! local path resolution look inside it via [ModuleSource::parse].
use std::path::{Component, Path, PathBuf};

/// `(alias, source)` pair as declared by a `module` block
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleReference {
    pub alias: String,
    pub source: String,
}

impl ModuleReference {
    pub fn new(alias: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            source: source.into(),
        }
    }

    /// Anchors a relative local source at `base`
    ///
    /// Remote sources are returned unchanged. Local ones become an absolute, lexically normalized path so that
    /// `./a/../b` and `./b` share one cache entry.
    pub fn resolved_against(&self, base: &Path) -> Self {
        if !is_local_path(&self.source) {
            return self.clone();
        }

        let path = Path::new(&self.source);
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            let base = std::path::absolute(base).unwrap_or_else(|_| base.to_path_buf());
            base.join(path)
        };

        Self {
            alias: self.alias.clone(),
            source: normalize(&joined).display().to_string(),
        }
    }
}

impl std::fmt::Display for ModuleReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "module.{} ({})", self.alias, self.source)
    }
}

/// Parsed form of a module source address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSource {
    pub kind: SourceKind,
    /// `//subdir` part of the address
    pub subdir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Local(PathBuf),
    Git {
        url: String,
        reference: Option<String>,
    },
    Archive {
        url: String,
        format: ArchiveFormat,
    },
    /// `namespace/name/provider`, optionally prefixed by a registry host
    Registry(String),
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "zip" => Some(Self::Zip),
            "tar.gz" | "tgz" => Some(Self::TarGz),
            _ => None,
        }
    }

    fn from_path(path: &str) -> Option<Self> {
        if path.ends_with(".zip") {
            Some(Self::Zip)
        } else if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }
}

impl ModuleSource {
    pub fn parse(source: &str) -> Self {
        let source = source.trim();

        if is_local_path(source) {
            return Self {
                kind: SourceKind::Local(PathBuf::from(source)),
                subdir: None,
            };
        }

        let (forced, address) = match source.split_once("::") {
            Some((getter, rest)) if !getter.contains('/') => (Some(getter), rest),
            _ => (None, source),
        };
        let (address, subdir) = split_subdir(address);

        let kind = match forced {
            Some("git") => git_kind(&address),
            Some(other) => SourceKind::Unknown(format!("{other}::{address}")),
            None => detect(&address),
        };

        Self { kind, subdir }
    }
}

/// Autodetection for addresses without a forced `getter::` prefix
fn detect(address: &str) -> SourceKind {
    if let Some(rest) = address.strip_prefix("github.com/") {
        let (path, query) = split_query(rest);
        let path = path.trim_end_matches(".git");
        return git_kind(&format!("https://github.com/{path}.git{query}"));
    }

    if address.starts_with("git@") {
        return git_kind(address);
    }

    if address.starts_with("http://") || address.starts_with("https://") {
        let (path, _) = split_query(address);
        if path.ends_with(".git") {
            return git_kind(address);
        }

        return match archive_kind(address) {
            Some(kind) => kind,
            None => SourceKind::Unknown(address.to_string()),
        };
    }

    if is_registry_address(address) {
        return SourceKind::Registry(address.to_string());
    }

    SourceKind::Unknown(address.to_string())
}

fn git_kind(address: &str) -> SourceKind {
    let (path, query) = split_query(address);
    let mut reference = None;
    let mut remaining = vec![];

    for pair in query.trim_start_matches('?').split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some(("ref", value)) => reference = Some(value.to_string()),
            // shallow clone hints are not supported by libgit2
            Some(("depth", _)) => {}
            _ => remaining.push(pair),
        }
    }

    let url = if remaining.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", remaining.join("&"))
    };

    SourceKind::Git { url, reference }
}

fn archive_kind(address: &str) -> Option<SourceKind> {
    let mut url = url::Url::parse(address).ok()?;

    let forced = url
        .query_pairs()
        .find(|(key, _)| key == "archive")
        .map(|(_, value)| value.into_owned());

    let format = match forced {
        Some(name) => {
            let format = ArchiveFormat::from_name(&name)?;
            let retained: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(key, _)| key != "archive")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            if retained.is_empty() {
                url.set_query(None);
            } else {
                url.query_pairs_mut().clear().extend_pairs(retained);
            }
            format
        }
        None => ArchiveFormat::from_path(url.path())?,
    };

    Some(SourceKind::Archive {
        url: url.to_string(),
        format,
    })
}

/// `hashicorp/consul/aws` or `app.terraform.io/org/name/provider`
fn is_registry_address(address: &str) -> bool {
    let (path, _) = split_query(address);
    let parts: Vec<_> = path.split('/').collect();

    let valid_part = |part: &&str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    };

    match parts.len() {
        3 => parts.iter().all(valid_part),
        4 => parts[0].contains('.') && parts[1..].iter().all(valid_part),
        _ => false,
    }
}

pub(crate) fn is_local_path(source: &str) -> bool {
    source.starts_with("./")
        || source.starts_with("../")
        || source.starts_with(".\\")
        || source.starts_with("..\\")
        || Path::new(source).is_absolute()
}

/// Splits `addr//subdir?query` into `(addr?query, subdir)`
///
/// The `//` of a `scheme://` prefix is not a subdirectory marker.
fn split_subdir(address: &str) -> (String, Option<String>) {
    let (path, query) = split_query(address);

    let offset = path.find("://").map(|i| i + 3).unwrap_or(0);
    let Some(index) = path[offset..].find("//") else {
        return (address.to_string(), None);
    };

    let split_at = offset + index;
    let subdir = path[split_at + 2..].trim_matches('/');
    let subdir = (!subdir.is_empty()).then(|| subdir.to_string());

    (format!("{}{query}", &path[..split_at]), subdir)
}

/// Splits off the query string, keeping the leading `?`
fn split_query(address: &str) -> (&str, &str) {
    match address.find('?') {
        Some(index) => address.split_at(index),
        None => (address, ""),
    }
}

/// Lexical normalization, `..` never climbs above the root
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}
