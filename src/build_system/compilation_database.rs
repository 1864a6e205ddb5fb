//! Clang compilation databases.
//!
//! Two on-disk forms are understood, looked up in this order inside a
//! directory:
//!
//! - `compile_commands.json`: an array of `{directory, file, command | arguments, output?}`.
//!   `arguments` wins over `command`; `command` is split like a POSIX shell would.
//! - `compile_flags.txt`: one flag per line, applied to every file below the
//!   directory holding it.
//!
//! A database is immutable once loaded; a change on disk produces a new one.

use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::build_system::types::normalize_path;

pub const COMPILE_COMMANDS_FILE: &str = "compile_commands.json";
pub const COMPILE_FLAGS_FILE: &str = "compile_flags.txt";

/// File names whose change invalidates a loaded database
pub const DATABASE_FILE_NAMES: [&str; 2] = [COMPILE_COMMANDS_FILE, COMPILE_FLAGS_FILE];

pub const INDEX_STORE_PATH_FLAG: &str = "-index-store-path";

/// Compiler executable synthesized for `compile_flags.txt` entries
const FIXED_DATABASE_COMPILER: &str = "clang";

#[derive(Debug, Error)]
pub enum CompilationDatabaseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("entry for {file} has neither `arguments` nor `command`")]
    MissingCommand { file: String },
}

impl CompilationDatabaseError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CompilationDatabaseError::Io { source, .. } if source.kind() == io::ErrorKind::PermissionDenied)
    }
}

/// One compiler invocation for one source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileCommand {
    /// Working directory of the invocation
    pub directory: PathBuf,
    /// Absolute, normalized path of the source file
    pub filename: PathBuf,
    /// Full argument vector, compiler executable first
    pub command_line: Vec<String>,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawCompileCommand {
    directory: String,
    file: String,
    #[serde(default)]
    arguments: Option<Vec<String>>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    output: Option<String>,
}

impl RawCompileCommand {
    fn into_command(self) -> Result<CompileCommand, CompilationDatabaseError> {
        let command_line = match (self.arguments, self.command) {
            (Some(arguments), _) => arguments,
            (None, Some(command)) => split_shell_command(&command),
            (None, None) => {
                return Err(CompilationDatabaseError::MissingCommand { file: self.file });
            }
        };

        let directory = PathBuf::from(self.directory);
        let filename = normalize_path(&directory.join(&self.file));
        let output = self.output.map(|output| directory.join(output));

        Ok(CompileCommand {
            directory,
            filename,
            command_line,
            output,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilationDatabase {
    /// Parsed `compile_commands.json`: every command in file order, plus
    /// the positions of each source file's commands
    Json {
        commands: Vec<CompileCommand>,
        by_file: IndexMap<PathBuf, Vec<usize>>,
    },
    /// `compile_flags.txt` flags shared by every file under `directory`
    Fixed {
        directory: PathBuf,
        arguments: Vec<String>,
    },
}

impl CompilationDatabase {
    /// Loads the database found directly inside `directory`.
    ///
    /// Returns `Ok(None)` when the directory holds no recognized file.
    pub fn load_from_directory(directory: &Path) -> Result<Option<Self>, CompilationDatabaseError> {
        let commands_path = directory.join(COMPILE_COMMANDS_FILE);
        if let Some(contents) = read_if_exists(&commands_path)? {
            debug!("Loading compilation database {:?}", commands_path);
            return Self::parse_json(&contents, &commands_path).map(Some);
        }

        let flags_path = directory.join(COMPILE_FLAGS_FILE);
        if let Some(contents) = read_if_exists(&flags_path)? {
            debug!("Loading compilation flags {:?}", flags_path);
            return Ok(Some(Self::parse_flags(&contents, directory)));
        }

        Ok(None)
    }

    /// Parses `compile_commands.json` contents; `path` is used for error reports
    pub fn parse_json(contents: &str, path: &Path) -> Result<Self, CompilationDatabaseError> {
        let raw: Vec<RawCompileCommand> =
            serde_json::from_str(contents).map_err(|source| CompilationDatabaseError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        let commands = raw
            .into_iter()
            .map(RawCompileCommand::into_command)
            .collect::<Result<Vec<_>, _>>()?;

        let mut by_file: IndexMap<PathBuf, Vec<usize>> = IndexMap::new();
        for (index, command) in commands.iter().enumerate() {
            by_file
                .entry(command.filename.clone())
                .or_default()
                .push(index);
        }
        Ok(CompilationDatabase::Json { commands, by_file })
    }

    /// Parses `compile_flags.txt` contents found in `directory`
    pub fn parse_flags(contents: &str, directory: &Path) -> Self {
        let arguments = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        CompilationDatabase::Fixed {
            directory: directory.to_path_buf(),
            arguments,
        }
    }

    /// All commands recorded for `path`, in database order
    pub fn commands_for(&self, path: &Path) -> Vec<CompileCommand> {
        let path = normalize_path(path);
        match self {
            CompilationDatabase::Json { commands, by_file } => by_file
                .get(&path)
                .map(|indices| {
                    indices
                        .iter()
                        .filter_map(|&i| commands.get(i).cloned())
                        .collect()
                })
                .unwrap_or_default(),
            CompilationDatabase::Fixed {
                directory,
                arguments,
            } => {
                if !path.starts_with(directory) {
                    return Vec::new();
                }
                let mut command_line = Vec::with_capacity(arguments.len() + 2);
                command_line.push(FIXED_DATABASE_COMPILER.to_string());
                command_line.extend(arguments.iter().cloned());
                command_line.push(path.to_string_lossy().into_owned());
                vec![CompileCommand {
                    directory: directory.clone(),
                    filename: path,
                    command_line,
                    output: None,
                }]
            }
        }
    }

    pub fn first_command(&self, path: &Path) -> Option<CompileCommand> {
        self.commands_for(path).into_iter().next()
    }

    /// Value of the index-store flag: the last occurrence within a command,
    /// taken from the first command that carries it. Relative values resolve
    /// against the command's working directory.
    pub fn index_store_path(&self) -> Option<PathBuf> {
        match self {
            CompilationDatabase::Json { commands, .. } => commands.iter().find_map(|command| {
                index_store_argument(&command.command_line)
                    .map(|value| normalize_path(&command.directory.join(value)))
            }),
            CompilationDatabase::Fixed {
                directory,
                arguments,
            } => index_store_argument(arguments).map(|value| normalize_path(&directory.join(value))),
        }
    }

    /// Number of source files the database describes
    pub fn len(&self) -> usize {
        match self {
            CompilationDatabase::Json { by_file, .. } => by_file.len(),
            CompilationDatabase::Fixed { .. } => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn index_store_argument(arguments: &[String]) -> Option<&str> {
    arguments
        .windows(2)
        .rev()
        .find(|pair| pair[0] == INDEX_STORE_PATH_FLAG)
        .map(|pair| pair[1].as_str())
}

fn read_if_exists(path: &Path) -> Result<Option<String>, CompilationDatabaseError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(CompilationDatabaseError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Splits a shell command line into arguments.
///
/// Handles whitespace separation, single quotes (literal), double quotes
/// (backslash escapes `"`, `\`, `$` and `` ` ``) and backslash escapes outside
/// quotes. Variable expansion and globbing are not performed.
pub fn split_shell_command(command: &str) -> Vec<String> {
    let mut arguments = Vec::new();
    let mut current = String::new();
    let mut in_argument = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_argument {
                    arguments.push(std::mem::take(&mut current));
                    in_argument = false;
                }
            }
            '\'' => {
                in_argument = true;
                for c in chars.by_ref() {
                    if c == '\'' {
                        break;
                    }
                    current.push(c);
                }
            }
            '"' => {
                in_argument = true;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => match chars.next() {
                            Some(escaped @ ('"' | '\\' | '$' | '`')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => current.push('\\'),
                        },
                        other => current.push(other),
                    }
                }
            }
            '\\' => {
                in_argument = true;
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            other => {
                in_argument = true;
                current.push(other);
            }
        }
    }

    if in_argument {
        arguments.push(current);
    }
    arguments
}
