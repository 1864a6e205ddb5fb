use std::path::PathBuf;

use clap::Parser;
use compdb_lsp::config::{BuildSystemPreference, ServerOptions};
use compdb_lsp::lsp::server::run_server;

/// Language server resolving compiler invocations from compilation databases
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Build system used when the client does not choose one
    #[arg(long, value_enum, default_value_t = BuildSystemPreference::Auto)]
    build_system: BuildSystemPreference,

    /// Directory holding compile_commands.json or compile_flags.txt
    #[arg(long)]
    compilation_database_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let options = ServerOptions {
        build_system: cli.build_system,
        compilation_database_path: cli.compilation_database_path,
    };

    let exit_code = run_server(options).await?;
    // The blocking stdin reader would keep the runtime alive on return
    std::process::exit(exit_code)
}
