use std::path::PathBuf;
use std::sync::Arc;

use lsp_types::{FileEvent, Url};
use tracing::info;

use crate::build_system::compdb::CompilationDatabaseBuildSystem;
use crate::build_system::delegate::BuildSystemDelegate;
use crate::build_system::manifest::ManifestBuildSystem;
use crate::build_system::types::{
    FileBuildSettings, FileHandlingCapability, Language, PathPrefixMapping,
};
use crate::config::BuildSystemPreference;

/// The build system active for one workspace root
pub enum BuildSystem {
    CompilationDatabase(CompilationDatabaseBuildSystem),
    Manifest(Arc<dyn ManifestBuildSystem>),
    /// No settings are available for any file
    Unhandled,
}

impl BuildSystem {
    /// Picks the variant for a workspace.
    ///
    /// In `auto` mode a manifest backend, when supplied, takes precedence over
    /// the compilation database.
    pub async fn for_workspace(
        preference: BuildSystemPreference,
        project_root: Option<PathBuf>,
        manifest: Option<Arc<dyn ManifestBuildSystem>>,
    ) -> Self {
        let build_system = match (preference, manifest) {
            (BuildSystemPreference::None, _) => BuildSystem::Unhandled,
            (BuildSystemPreference::Auto, Some(manifest)) => BuildSystem::Manifest(manifest),
            (BuildSystemPreference::Auto | BuildSystemPreference::CompilationDatabase, _) => {
                BuildSystem::CompilationDatabase(
                    CompilationDatabaseBuildSystem::new(project_root).await,
                )
            }
        };
        info!("Using {} build system", build_system.name());
        build_system
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuildSystem::CompilationDatabase(_) => "compilation database",
            BuildSystem::Manifest(_) => "manifest",
            BuildSystem::Unhandled => "no",
        }
    }

    pub async fn set_delegate(&self, delegate: Option<Arc<dyn BuildSystemDelegate>>) {
        match self {
            BuildSystem::CompilationDatabase(inner) => inner.set_delegate(delegate).await,
            BuildSystem::Manifest(inner) => inner.set_delegate(delegate).await,
            BuildSystem::Unhandled => {}
        }
    }

    pub async fn build_settings(
        &self,
        uri: &Url,
        language: &Language,
    ) -> Option<FileBuildSettings> {
        match self {
            BuildSystem::CompilationDatabase(inner) => inner.build_settings(uri, language).await,
            BuildSystem::Manifest(inner) => inner.build_settings(uri, language).await,
            BuildSystem::Unhandled => None,
        }
    }

    pub async fn register_for_change_notifications(&self, uri: &Url, language: &Language) {
        match self {
            BuildSystem::CompilationDatabase(inner) => {
                inner.register_for_change_notifications(uri, language).await
            }
            BuildSystem::Manifest(inner) => {
                inner.register_for_change_notifications(uri, language).await
            }
            BuildSystem::Unhandled => {}
        }
    }

    pub async fn unregister_for_change_notifications(&self, uri: &Url) {
        match self {
            BuildSystem::CompilationDatabase(inner) => {
                inner.unregister_for_change_notifications(uri).await
            }
            BuildSystem::Manifest(inner) => inner.unregister_for_change_notifications(uri).await,
            BuildSystem::Unhandled => {}
        }
    }

    pub async fn files_did_change(&self, events: &[FileEvent]) {
        match self {
            BuildSystem::CompilationDatabase(inner) => inner.files_did_change(events).await,
            BuildSystem::Manifest(inner) => inner.files_did_change(events).await,
            BuildSystem::Unhandled => {}
        }
    }

    pub async fn file_handling_capability(&self, uri: &Url) -> FileHandlingCapability {
        match self {
            BuildSystem::CompilationDatabase(inner) => inner.file_handling_capability(uri).await,
            BuildSystem::Manifest(inner) => inner.file_handling_capability(uri).await,
            BuildSystem::Unhandled => FileHandlingCapability::Unhandled,
        }
    }

    pub async fn index_store_path(&self) -> Option<PathBuf> {
        match self {
            BuildSystem::CompilationDatabase(inner) => inner.index_store_path().await,
            BuildSystem::Manifest(inner) => inner.index_store_path().await,
            BuildSystem::Unhandled => None,
        }
    }

    pub async fn index_database_path(&self) -> Option<PathBuf> {
        match self {
            BuildSystem::CompilationDatabase(inner) => inner.index_database_path().await,
            BuildSystem::Manifest(inner) => inner.index_database_path().await,
            BuildSystem::Unhandled => None,
        }
    }

    pub async fn index_prefix_mappings(&self) -> Vec<PathPrefixMapping> {
        match self {
            BuildSystem::CompilationDatabase(inner) => inner.index_prefix_mappings().await,
            BuildSystem::Manifest(inner) => inner.index_prefix_mappings().await,
            BuildSystem::Unhandled => Vec::new(),
        }
    }
}
