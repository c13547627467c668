//! http archive module sources (`.zip`, `.tar.gz`)
use super::{promote, scratch_dir, FetchError};
use crate::source::ArchiveFormat;
use std::io::Cursor;
use std::path::{Path, PathBuf};

pub(super) async fn fetch(
    client: &reqwest::Client,
    url: &str,
    format: ArchiveFormat,
    subdir: Option<String>,
    dest: PathBuf,
) -> Result<(), FetchError> {
    tracing::info!(url, ?format, "downloading module archive");
    let bytes = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    tracing::debug!(url, size = bytes.len(), "module archive downloaded");

    tokio::task::spawn_blocking(move || unpack(&bytes, format, subdir.as_deref(), &dest)).await?
}

fn unpack(
    bytes: &[u8],
    format: ArchiveFormat,
    subdir: Option<&str>,
    dest: &Path,
) -> Result<(), FetchError> {
    let scratch = scratch_dir(dest)?;
    let package = scratch.path().join("package");

    match format {
        ArchiveFormat::Zip => zip::ZipArchive::new(Cursor::new(bytes))?.extract(&package)?,
        ArchiveFormat::TarGz => {
            tar::Archive::new(flate2::read::GzDecoder::new(bytes)).unpack(&package)?
        }
    }

    promote(&package, subdir, dest)
}
