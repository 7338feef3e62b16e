use anyhow::Result;
use citron::cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = cli::parse_args();

    citron::press(cli_args).await?;

    Ok(())
}
