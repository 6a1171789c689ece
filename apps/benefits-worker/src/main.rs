use clap::Parser;

use benefits_worker::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	benefits_worker::run(Args::parse()).await
}
