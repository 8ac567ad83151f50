use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use isoforge::cli::Cli;
use isoforge::config::{self, Settings};
use isoforge::prompt::{ConsolePrompt, InputProvider, ScriptedPrompt};
use isoforge::Builder;

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("isoforge={},warn", log_level))
        .with_writer(std::io::stderr)
        .init();

    info!("isoforge v{} starting", env!("CARGO_PKG_VERSION"));

    match run(&cli) {
        Ok(output) => {
            info!("✓ Autoinstall ISO written to {}", output.display());
        }
        Err(e) => {
            error!("✗ Operation failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<std::path::PathBuf> {
    let settings = Settings::from_cli(cli)?;
    let prompt = make_prompt(&settings)?;
    let mut builder = Builder::new(settings, prompt)?;
    builder.build()
}

fn make_prompt(settings: &Settings) -> Result<Box<dyn InputProvider>> {
    let prompt: Box<dyn InputProvider> = match (&settings.answers, settings.non_interactive) {
        (Some(path), true) => Box::new(ScriptedPrompt::new(config::load_answers(path)?)),
        (Some(path), false) => Box::new(ScriptedPrompt::with_fallback(
            config::load_answers(path)?,
            Box::new(ConsolePrompt::new()),
        )),
        (None, true) => Box::new(ScriptedPrompt::new(Default::default())),
        (None, false) => Box::new(ConsolePrompt::new()),
    };
    Ok(prompt)
}
