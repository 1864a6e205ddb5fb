use std::path::PathBuf;

use clap::ValueEnum;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Returns the path to the data directory for compdb-lsp.
/// Uses $XDG_DATA_HOME/compdb-lsp if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/compdb-lsp,
/// or ./compdb-lsp if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("compdb-lsp.log")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("compdb-lsp")
}

/// Which build system backs the workspace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum BuildSystemPreference {
    /// A manifest build system if one is available, otherwise the compilation database
    #[default]
    Auto,
    CompilationDatabase,
    /// Never provide build settings
    None,
}

/// Server options, taken from the command line and overridden by the
/// client's `initializationOptions`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerOptions {
    pub build_system: BuildSystemPreference,
    /// Directory holding the compilation database, used instead of the workspace root
    pub compilation_database_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct OptionOverrides {
    build_system: Option<BuildSystemPreference>,
    compilation_database_path: Option<PathBuf>,
}

impl ServerOptions {
    /// Applies `initializationOptions` on top of these options.
    ///
    /// Unknown keys are ignored. Options that fail to parse are logged and
    /// leave the current values in place.
    pub fn merged_with(&self, initialization_options: Option<&Value>) -> ServerOptions {
        let Some(value) = initialization_options.filter(|value| !value.is_null()) else {
            return self.clone();
        };

        match serde_json::from_value::<OptionOverrides>(value.clone()) {
            Ok(overrides) => ServerOptions {
                build_system: overrides.build_system.unwrap_or(self.build_system),
                compilation_database_path: overrides
                    .compilation_database_path
                    .or_else(|| self.compilation_database_path.clone()),
            },
            Err(e) => {
                warn!("Ignoring malformed initializationOptions: {}", e);
                self.clone()
            }
        }
    }
}
