mod args;
mod commands;
mod prompt;

use anyhow::Result;
use clap::Parser;
use songtag_core::SongTagError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use args::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = dispatch(cli).await {
        eprintln!("{}", error_line(&e));
        std::process::exit(1);
    }
}

/// Failures carry their category, e.g. `error[ConfigurationError]: ...`
fn error_line(error: &anyhow::Error) -> String {
    match error.downcast_ref::<SongTagError>() {
        Some(e) => format!("error[{}]: {}", e.category(), e),
        None => format!("error: {:#}", error),
    }
}

fn init_logging(verbose: u8) {
    // Initialize logging based on verbosity
    let filter = match verbose {
        0 => "songtag=info,songtag_core=info",
        1 => "songtag=debug,songtag_core=debug",
        2 => "songtag=trace,songtag_core=trace",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).without_time())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Doctor) => commands::doctor::run(cli.config.as_deref()).await,
        Some(Commands::Config) => commands::config::run(cli.config.as_deref()).await,
        None if cli.requests.is_empty() && cli.options.input.is_none() => {
            // Nothing to do, print help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
        None => commands::run::run(&cli.requests, &cli.options, cli.config.as_deref()).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use songtag_core::error::ConfigError;

    #[test]
    fn test_error_line_shows_category() {
        let err = anyhow::Error::from(SongTagError::from(ConfigError::MissingApiKey(
            "ACOUSTID_APPLICATION_API_KEY",
        )));
        assert_eq!(
            error_line(&err),
            "error[ConfigurationError]: Configuration error: \
             Missing required environment variable ACOUSTID_APPLICATION_API_KEY"
        );
    }

    #[test]
    fn test_error_line_without_category() {
        let err = anyhow::anyhow!("2 of 3 requests failed");
        assert_eq!(error_line(&err), "error: 2 of 3 requests failed");
    }
}
