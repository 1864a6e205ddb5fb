use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

use crate::build_system::ManifestBuildSystem;
use crate::config::ServerOptions;
use crate::log::init;
use crate::lsp::backend::Backend;
use crate::lsp::engine::{AnalysisEngine, NullAnalysisEngine};
use crate::protocol::MessageRegistry;
use crate::transport::Connection;

/// Serves on stdin/stdout and returns the process exit code
pub async fn run_server(options: ServerOptions) -> anyhow::Result<i32> {
    let _log_guard = init()?;

    info!("Starting compdb-lsp server");

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let exit_code = serve(stdin, stdout, options, Arc::new(NullAnalysisEngine), None).await?;

    info!("compdb-lsp server stopped (exit code {})", exit_code);
    Ok(exit_code)
}

/// Runs one server session over the given streams until `exit` or end of input
pub async fn serve<I, O>(
    input: I,
    output: O,
    options: ServerOptions,
    engine: Arc<dyn AnalysisEngine>,
    manifest: Option<Arc<dyn ManifestBuildSystem>>,
) -> anyhow::Result<i32>
where
    I: AsyncRead + Unpin + Send,
    O: AsyncWrite + Unpin + Send + 'static,
{
    let connection = Connection::new(MessageRegistry::global());
    let backend = Arc::new(Backend::build(
        connection.clone(),
        options,
        engine,
        manifest,
    ));

    connection
        .serve(input, output, backend.clone())
        .await
        .context("language server connection failed")?;

    Ok(backend.exit_code())
}
