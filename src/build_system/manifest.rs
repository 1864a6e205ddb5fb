use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use lsp_types::{FileEvent, Url};

use crate::build_system::delegate::BuildSystemDelegate;
use crate::build_system::types::{
    FileBuildSettings, FileHandlingCapability, Language, PathPrefixMapping,
};

/// Contract a package-manifest build system fulfils to plug into
/// [`BuildSystem::Manifest`](crate::build_system::BuildSystem::Manifest).
///
/// How flags are derived from the manifest is up to the implementation. It must
/// keep the same notification discipline as the compilation database backend:
/// after a relevant change it reports every watched file to the delegate, and it
/// never notifies while no delegate is set.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ManifestBuildSystem: Send + Sync {
    async fn set_delegate(&self, delegate: Option<Arc<dyn BuildSystemDelegate>>);

    async fn build_settings(&self, uri: &Url, language: &Language) -> Option<FileBuildSettings>;

    async fn register_for_change_notifications(&self, uri: &Url, language: &Language);

    async fn unregister_for_change_notifications(&self, uri: &Url);

    async fn files_did_change(&self, events: &[FileEvent]);

    async fn file_handling_capability(&self, uri: &Url) -> FileHandlingCapability;

    async fn index_store_path(&self) -> Option<PathBuf>;

    async fn index_database_path(&self) -> Option<PathBuf>;

    async fn index_prefix_mappings(&self) -> Vec<PathPrefixMapping>;
}
