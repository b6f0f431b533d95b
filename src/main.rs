use anyhow::Result;
use clap::Parser;

use popup_signer::cli::{Cli, Command};
use popup_signer::commands::{self, request, session};
use popup_signer::logging;

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let session = commands::open_session(&cli)?;

	match &cli.command {
		Command::Connect => session::connect(&session).await,
		Command::Request { method, params } => request::run(&session, method, params.as_deref()).await,
		Command::Select { signer } => session::select(&session, (*signer).into()).await,
		Command::Status => session::show_status(&session),
		Command::Disconnect => session::disconnect(&session),
	}
}
