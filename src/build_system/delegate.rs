use std::collections::HashSet;

use async_trait::async_trait;
use lsp_types::Url;

/// Receives notice that the resolved settings of some files may have changed.
///
/// Notifications are conservative: a file may be listed even if its settings
/// turn out identical. Consumers re-query [`build_settings`] for each URI.
///
/// [`build_settings`]: crate::build_system::BuildSystem::build_settings
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BuildSystemDelegate: Send + Sync {
    async fn file_build_settings_changed(&self, changed_files: HashSet<Url>);
}
