//! git module sources
use super::{promote, scratch_dir, FetchError};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, CredentialType, FetchOptions, RemoteCallbacks, Repository};
use std::path::{Path, PathBuf};

pub(super) async fn fetch(
    url: String,
    reference: Option<String>,
    subdir: Option<String>,
    dest: PathBuf,
) -> Result<(), FetchError> {
    tokio::task::spawn_blocking(move || {
        fetch_blocking(&url, reference.as_deref(), subdir.as_deref(), &dest)
    })
    .await?
}

fn fetch_blocking(
    url: &str,
    reference: Option<&str>,
    subdir: Option<&str>,
    dest: &Path,
) -> Result<(), FetchError> {
    let scratch = scratch_dir(dest)?;
    let checkout = scratch.path().join("repository");
    tracing::info!(url, reference, "cloning module repository");

    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(|_url, username_from_url, allowed_types| {
        if allowed_types.contains(CredentialType::SSH_KEY) {
            Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"))
        } else if allowed_types.contains(CredentialType::DEFAULT) {
            Cred::default()
        } else {
            Err(git2::Error::from_str("no supported credential type"))
        }
    });
    callbacks.transfer_progress(|stats| {
        tracing::trace!(
            received = stats.received_objects(),
            total = stats.total_objects(),
            "transfer progress"
        );
        true
    });

    let mut fetch_options = FetchOptions::new();
    fetch_options.remote_callbacks(callbacks);

    let mut builder = RepoBuilder::new();
    builder.fetch_options(fetch_options);
    let repo = builder.clone(url, &checkout)?;

    if let Some(reference) = reference {
        checkout_reference(&repo, reference)?;
    }
    drop(repo);

    promote(&checkout, subdir, dest)
}

/// Detaches HEAD at a tag, commit or (remote) branch
fn checkout_reference(repo: &Repository, reference: &str) -> Result<(), git2::Error> {
    let object = repo
        .revparse_single(reference)
        .or_else(|_| repo.revparse_single(&format!("origin/{reference}")))?;

    repo.checkout_tree(&object, Some(CheckoutBuilder::new().force()))?;
    repo.set_head_detached(object.peel_to_commit()?.id())?;

    tracing::debug!(reference, commit=%object.id(), "checked out module revision");
    Ok(())
}
