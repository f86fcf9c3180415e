use bedleveler::cli::{run, Cli};
use bedleveler::init_logging;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let output = run(cli).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
