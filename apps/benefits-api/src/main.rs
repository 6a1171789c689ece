use clap::Parser;

use benefits_api::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	benefits_api::run(Args::parse()).await
}
