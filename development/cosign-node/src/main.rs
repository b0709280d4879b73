//! Cosign Node - Main executable

use cosign_node::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli_args = cli::parse();
    cli::execute(cli_args).await
}
