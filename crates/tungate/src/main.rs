mod cli;
mod commands;
mod dry_run;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tungate_config::Config;
use tungate_core::{Gateway, ProfileId, SystemHandles};

use crate::cli::{Cli, Command, LogFormat};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    init_tracing(cli.global.verbose, cli.global.log_format);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.with_target(false).init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands don't touch the gateway
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        // Shell completions generation
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "tungate", &mut std::io::stdout());
            Ok(())
        }

        // Everything else runs against a gateway
        cmd => {
            let cfg = commands::config_cmd::load(&cli.global)?;
            let gateway_config = tungate_config::to_gateway_config(&cfg)?;

            let (system, journal) = if cli.global.dry_run {
                let profiles = involved_profiles(&cmd, &cfg);
                let (system, journal) = dry_run::system(&gateway_config, &profiles);
                (system, Some(journal))
            } else {
                (SystemHandles::linux(&gateway_config), None)
            };
            let gateway = Gateway::new(gateway_config, system);

            tracing::debug!(command = ?cmd, dry_run = cli.global.dry_run, "dispatching command");
            commands::dispatch(cmd, &gateway, &cfg, &cli.global).await?;

            if let Some(journal) = journal {
                dry_run::report(&journal, &cli.global);
            }
            Ok(())
        }
    }
}

/// Profiles a command may bring up: every configured tunnel plus any
/// named on the command line.
fn involved_profiles(cmd: &Command, cfg: &Config) -> Vec<ProfileId> {
    let mut profiles = cfg.profile_ids();
    let named: Vec<ProfileId> = match cmd {
        Command::Setup(arg) | Command::Stop(arg) => vec![ProfileId::new(arg.profile.clone())],
        Command::Status(args) => args.profiles.iter().cloned().map(ProfileId::new).collect(),
        Command::Run(args) => args.profiles.iter().cloned().map(ProfileId::new).collect(),
        Command::Config(_) | Command::Completions(_) => Vec::new(),
    };
    for id in named {
        if !profiles.contains(&id) {
            profiles.push(id);
        }
    }
    profiles
}
