//! `osync` entry point.

use clap::Parser;
use offline_sync::cli::commands::{self, Context};
use offline_sync::cli::{Cli, Commands};
use offline_sync::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Set up tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    // JSON when asked for, or when stdout is not a terminal
    let json = cli.json || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    match run(&cli, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info,hyper=info,reqwest=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, json: bool) -> Result<(), Error> {
    // Commands that need no config or database
    match &cli.command {
        Commands::Version => return commands::version::execute(json),
        Commands::Completions { shell } => return commands::completions::execute(shell),
        _ => {}
    }

    let ctx = Context::load(cli, json)?;

    match &cli.command {
        Commands::Init { force } => commands::init::execute(&ctx, *force),

        // Records
        Commands::Create(args) => commands::records::create(&ctx, args),
        Commands::Update(args) => commands::records::update(&ctx, args),
        Commands::Delete { entity, id } => commands::records::delete(&ctx, entity, id),
        Commands::Get { entity, id } => commands::records::get(&ctx, entity, id),
        Commands::List(args) => commands::records::list(&ctx, args),

        // Queue
        Commands::Queue(args) => commands::queue::list(&ctx, args),
        Commands::RetryFailed => commands::queue::retry_failed(&ctx),
        Commands::Prune { older_than_hours } => commands::queue::prune(&ctx, *older_than_hours),

        // Sync
        Commands::Status => commands::sync::status(&ctx),
        Commands::Sync => commands::sync::sync(&ctx),
        Commands::Daemon { health_interval } => commands::daemon::execute(&ctx, *health_interval),

        Commands::Config => commands::config::execute(&ctx),

        Commands::Version | Commands::Completions { .. } => Ok(()),
    }
}
