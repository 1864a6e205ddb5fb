//! Value types shared by every build system variant

use std::fmt;
use std::path::{Component, Path, PathBuf};

use lsp_types::Url;

/// Compiler invocation needed to analyze one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBuildSettings {
    /// Arguments without the compiler executable
    pub compiler_arguments: Vec<String>,
    pub working_directory: Option<PathBuf>,
}

/// Source language a document was opened with
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Language {
    C,
    Cpp,
    ObjectiveC,
    ObjectiveCpp,
    Swift,
    Other(String),
}

impl Language {
    /// Maps an LSP `languageId`
    pub fn from_language_id(id: &str) -> Self {
        match id {
            "c" => Language::C,
            "cpp" => Language::Cpp,
            "objective-c" => Language::ObjectiveC,
            "objective-cpp" => Language::ObjectiveCpp,
            "swift" => Language::Swift,
            other => Language::Other(other.to_string()),
        }
    }

    /// Guesses the language from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?;
        match extension {
            "c" => Some(Language::C),
            "cc" | "cpp" | "cxx" | "c++" | "hpp" | "hh" | "hxx" => Some(Language::Cpp),
            "m" => Some(Language::ObjectiveC),
            "mm" => Some(Language::ObjectiveCpp),
            "swift" => Some(Language::Swift),
            _ => None,
        }
    }

    pub fn language_id(&self) -> &str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::ObjectiveC => "objective-c",
            Language::ObjectiveCpp => "objective-cpp",
            Language::Swift => "swift",
            Language::Other(id) => id,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.language_id())
    }
}

/// Whether a build system can provide settings for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileHandlingCapability {
    Unhandled,
    Handled,
}

/// Remaps a path prefix recorded in the index to the local checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixMapping {
    pub original: PathBuf,
    pub replacement: PathBuf,
}

/// Local path of a `file://` URI, `None` for any other scheme
pub fn uri_to_file_path(uri: &Url) -> Option<PathBuf> {
    if uri.scheme() != "file" {
        return None;
    }
    uri.to_file_path().ok()
}

/// Resolves `.` and `..` components without touching the file system
pub fn normalize_path(path: &Path) -> PathBuf {
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

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/proj/src/../a.c", "/proj/a.c")]
    #[case("/proj/./src/a.c", "/proj/src/a.c")]
    #[case("/proj/src/sub/../../a.c", "/proj/a.c")]
    #[case("/proj/a.c", "/proj/a.c")]
    fn normalize_path_resolves_dot_components(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_path(Path::new(input)), PathBuf::from(expected));
    }

    #[test]
    fn uri_to_file_path_rejects_non_file_schemes() {
        let file = Url::parse("file:///proj/a.c").unwrap();
        let untitled = Url::parse("untitled:Untitled-1").unwrap();

        assert_eq!(uri_to_file_path(&file), Some(PathBuf::from("/proj/a.c")));
        assert_eq!(uri_to_file_path(&untitled), None);
    }

    #[rstest]
    #[case("c", Language::C)]
    #[case("objective-cpp", Language::ObjectiveCpp)]
    #[case("rust", Language::Other("rust".to_string()))]
    fn language_from_id(#[case] id: &str, #[case] expected: Language) {
        let language = Language::from_language_id(id);
        assert_eq!(language, expected);
        assert_eq!(language.language_id(), id);
    }

    #[rstest]
    #[case("/proj/a.c", Some(Language::C))]
    #[case("/proj/a.cpp", Some(Language::Cpp))]
    #[case("/proj/a.mm", Some(Language::ObjectiveCpp))]
    #[case("/proj/README", None)]
    fn language_from_path(#[case] path: &str, #[case] expected: Option<Language>) {
        assert_eq!(Language::from_path(Path::new(path)), expected);
    }
}
