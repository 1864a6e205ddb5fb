//! Build system backed by a clang compilation database.
//!
//! The database is loaded from the project root when one is configured.
//! Otherwise it is discovered lazily: the first query walks up from the queried
//! file's directory and keeps the first database it finds. A change to a file
//! named like a database triggers a reload from the project root and a
//! notification covering every watched file.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lsp_types::{FileEvent, Url};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::build_system::compilation_database::{CompilationDatabase, DATABASE_FILE_NAMES};
use crate::build_system::delegate::BuildSystemDelegate;
use crate::build_system::types::{
    FileBuildSettings, FileHandlingCapability, Language, PathPrefixMapping, uri_to_file_path,
};

/// Directory placed next to the index store holding the index database
pub const INDEX_DATABASE_DIRECTORY: &str = "IndexDatabase";

pub struct CompilationDatabaseBuildSystem {
    project_root: Option<PathBuf>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    database: Option<Arc<CompilationDatabase>>,
    /// Bumped on every database replacement
    generation: u64,
    /// Index store path derived for `generation`
    index_store_path: Option<(u64, Option<PathBuf>)>,
    watched_files: HashMap<Url, Language>,
    delegate: Option<Arc<dyn BuildSystemDelegate>>,
}

impl State {
    fn replace_database(&mut self, database: Option<Arc<CompilationDatabase>>) {
        self.database = database;
        self.generation += 1;
    }

    fn index_store_path(&mut self) -> Option<PathBuf> {
        if let Some((generation, path)) = &self.index_store_path {
            if *generation == self.generation {
                return path.clone();
            }
        }
        let path = self
            .database
            .as_ref()
            .and_then(|database| database.index_store_path());
        self.index_store_path = Some((self.generation, path.clone()));
        path
    }
}

impl CompilationDatabaseBuildSystem {
    /// Creates the backend and loads the database at `project_root`, if any.
    /// A missing database is not an error.
    pub async fn new(project_root: Option<PathBuf>) -> Self {
        let mut state = State::default();
        if let Some(root) = &project_root {
            let database = load_at_root(root.clone()).await.map(Arc::new);
            state.replace_database(database);
        }
        Self {
            project_root,
            state: Mutex::new(state),
        }
    }

    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    pub async fn set_delegate(&self, delegate: Option<Arc<dyn BuildSystemDelegate>>) {
        self.state.lock().await.delegate = delegate;
    }

    pub async fn build_settings(
        &self,
        uri: &Url,
        language: &Language,
    ) -> Option<FileBuildSettings> {
        let Some(path) = uri_to_file_path(uri) else {
            debug!("No build settings for non-file URI {}", uri);
            return None;
        };
        let database = self.database_for(&path).await?;

        let Some(command) = database.first_command(&path) else {
            debug!("No compile command for {:?} ({})", path, language);
            return None;
        };

        Some(FileBuildSettings {
            compiler_arguments: command.command_line.into_iter().skip(1).collect(),
            working_directory: Some(command.directory),
        })
    }

    pub async fn register_for_change_notifications(&self, uri: &Url, language: &Language) {
        self.state
            .lock()
            .await
            .watched_files
            .insert(uri.clone(), language.clone());
    }

    pub async fn unregister_for_change_notifications(&self, uri: &Url) {
        self.state.lock().await.watched_files.remove(uri);
    }

    /// Reloads the database once if any event names a database file
    pub async fn files_did_change(&self, events: &[FileEvent]) {
        if events.iter().any(should_trigger_reload) {
            self.reload().await;
        }
    }

    pub async fn file_handling_capability(&self, uri: &Url) -> FileHandlingCapability {
        let Some(path) = uri_to_file_path(uri) else {
            return FileHandlingCapability::Unhandled;
        };
        match self.database_for(&path).await {
            Some(_) => FileHandlingCapability::Handled,
            None => FileHandlingCapability::Unhandled,
        }
    }

    pub async fn index_store_path(&self) -> Option<PathBuf> {
        self.state.lock().await.index_store_path()
    }

    pub async fn index_database_path(&self) -> Option<PathBuf> {
        let store = self.index_store_path().await?;
        Some(store.parent()?.join(INDEX_DATABASE_DIRECTORY))
    }

    pub async fn index_prefix_mappings(&self) -> Vec<PathPrefixMapping> {
        Vec::new()
    }

    pub async fn is_watching(&self, uri: &Url) -> bool {
        self.state.lock().await.watched_files.contains_key(uri)
    }

    /// Current database, discovering one from `path` upward if none is loaded
    async fn database_for(&self, path: &Path) -> Option<Arc<CompilationDatabase>> {
        let mut state = self.state.lock().await;
        if let Some(database) = &state.database {
            return Some(Arc::clone(database));
        }

        let start = path.to_path_buf();
        let discovered = tokio::task::spawn_blocking(move || discover(&start))
            .await
            .unwrap_or_else(|e| {
                warn!("Compilation database discovery failed: {}", e);
                None
            });

        match discovered {
            Some(database) => {
                let database = Arc::new(database);
                state.replace_database(Some(Arc::clone(&database)));
                Some(database)
            }
            None => {
                warn!("Could not open compilation database for {:?}", path);
                None
            }
        }
    }

    async fn reload(&self) {
        let (delegate, changed_files) = {
            let mut state = self.state.lock().await;
            let database = match &self.project_root {
                Some(root) => load_at_root(root.clone()).await.map(Arc::new),
                None => None,
            };
            state.replace_database(database);
            info!(
                "Reloaded compilation database (generation {})",
                state.generation
            );

            let changed_files: HashSet<Url> = state.watched_files.keys().cloned().collect();
            (state.delegate.clone(), changed_files)
        };

        match delegate {
            Some(delegate) => delegate.file_build_settings_changed(changed_files).await,
            None => debug!("No delegate registered, dropping settings change notification"),
        }
    }
}

fn should_trigger_reload(event: &FileEvent) -> bool {
    uri_to_file_path(&event.uri)
        .as_deref()
        .and_then(Path::file_name)
        .and_then(|name| name.to_str())
        .is_some_and(|name| DATABASE_FILE_NAMES.contains(&name))
}

async fn load_at_root(root: PathBuf) -> Option<CompilationDatabase> {
    tokio::task::spawn_blocking(move || match CompilationDatabase::load_from_directory(&root) {
        Ok(Some(database)) => {
            info!("Loaded compilation database from {:?}", root);
            Some(database)
        }
        Ok(None) => {
            debug!("No compilation database in {:?}", root);
            None
        }
        Err(e) => {
            warn!("Ignoring compilation database: {}", e);
            None
        }
    })
    .await
    .unwrap_or_else(|e| {
        warn!("Compilation database load failed: {}", e);
        None
    })
}

/// Walks from the parent of `path` to the file system root, returning the first
/// database found
fn discover(path: &Path) -> Option<CompilationDatabase> {
    for directory in path.ancestors().skip(1) {
        match CompilationDatabase::load_from_directory(directory) {
            Ok(Some(database)) => {
                info!("Discovered compilation database in {:?}", directory);
                return Some(database);
            }
            Ok(None) => {}
            Err(e) if e.is_permission_denied() => {
                debug!("Skipping {:?} during discovery: {}", directory, e);
            }
            Err(e) => warn!("Ignoring compilation database in {:?}: {}", directory, e),
        }
    }
    None
}
