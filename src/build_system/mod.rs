// Build settings resolution
//
// A BuildSystem answers "which compiler invocation analyzes this file" and
// tells its delegate when those answers may have changed. One variant is active
// per workspace root.

pub mod compdb;
pub mod compilation_database;
pub mod delegate;
pub mod manifest;
pub mod system;
pub mod types;

pub use compdb::CompilationDatabaseBuildSystem;
pub use compilation_database::{CompilationDatabase, CompilationDatabaseError, CompileCommand};
pub use delegate::BuildSystemDelegate;
pub use manifest::ManifestBuildSystem;
pub use system::BuildSystem;
pub use types::{FileBuildSettings, FileHandlingCapability, Language, PathPrefixMapping};
