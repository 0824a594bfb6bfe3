use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = persona_worker::Args::parse();

	persona_worker::run(args).await
}
