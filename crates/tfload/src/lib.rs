//! # tfload - terraform template, module and state loading
//!
//! Loads everything a static analysis of a terraform project needs to look at: the project's templates, the
//! templates of every module it uses and the state of previously applied infrastructure.
//!
//! ## Introduction for developers
//!
//! ### Templates
//!
//! A template file is parsed by a [template::ParseAdapter] into a parse tree. The default adapter,
//! [template::HclParser], produces a [hcl_edit::structure::Body]. Parse trees are stored in a
//! [template::FileCollection] keyed by the canonical path of the file they came from. Loading the same file twice
//! replaces the first tree. Nothing here looks inside the trees apart from finding `module` blocks.
//!
//! ### Modules
//!
//! A `module` block names a module and where to get it from:
//! ```hcl
//! module "network" {
//!   source = "git::https://example.com/network.git?ref=v1.2.0"
//! }
//! ```
//!
//! Resolving it
//! - classifies the source ([source::ModuleSource])
//! - fetches it at most once per run ([module_cache::FetchOnce]) into the on-disk [module_cache::ModuleCache]
//!   using a [fetch::FetchClient] (local directories, git and http archives)
//! - parses every template in the module root
//! - inserts all of them at once, or none if any fails
//! - resolves the modules the module itself references
//!
//! ### State
//!
//! [state::StateModel] is the legacy (`version` 3) state layout: modules, resources keyed by address and a
//! primary instance with flattened attributes. It is read from `terraform.tfstate`, or via the backend pointer in
//! `.terraform/terraform.tfstate`. Newer (`version` 4) documents are converted. Missing state is not an error.
//!
//! ### Putting it together
//!
//! [loader::Loader] owns the collection and the state of one run:
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use tfload::{config::LoaderConfig, loader::Loader};
//!
//! let loader = Loader::new(LoaderConfig::new("."));
//! loader.load_project(std::path::Path::new(".")).await?;
//! let _ = loader.load_state().await;
//!
//! let snapshot = loader.snapshot();
//! for key in snapshot.files.keys() {
//!     println!("{key}");
//! }
//! # Ok(())
//! # }
//! ```
pub mod config;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod module_cache;
pub mod source;
pub mod state;
pub mod template;
