use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = lkg_worker::Args::parse();

	lkg_worker::run(args).await
}
