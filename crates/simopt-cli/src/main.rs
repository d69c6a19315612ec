use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use simopt_core::config::Config;
use simopt_core::model::{ModelDefinition, VariableContainer};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

mod cmd;
mod reports;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Model definition (JSON)
    #[arg(global = true, short, long, default_value = "model.json")]
    model: PathBuf,

    /// JSON config file; flags given on the command line win
    #[arg(global = true, long)]
    config_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Optimize in this process, one simulation at a time
    Run(cmd::run::RunArgs),
    /// Optimize with a coordinator and in-process workers
    Local(cmd::local::LocalArgs),
    /// Check a model and config without simulating anything
    Validate(cmd::validate::ValidateArgs),
}

fn main() {
    tracing_subscriber::fmt::init();

    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    info!("🚀 Initializing SimOpt...");

    info!("📂 Loading Model: {:?}", cli.model);
    let definition = ModelDefinition::load_from_file(&cli.model).unwrap_or_else(|e| {
        error!("❌ {}", e);
        process::exit(1);
    });
    let model = VariableContainer::from_definition(&definition).unwrap_or_else(|e| {
        error!("❌ {}", e);
        process::exit(1);
    });

    let (cli_config, sub_name) = match &cli.command {
        Commands::Run(args) => (&args.config, "run"),
        Commands::Local(args) => (&args.config, "local"),
        Commands::Validate(args) => (&args.config, "validate"),
    };
    let sub_matches = matches.subcommand_matches(sub_name).unwrap_or(&matches);

    let config = match &cli.config_file {
        Some(path) => {
            info!("⚙️  Loading Config from: {:?}", path);
            let mut file_config = Config::load_from_file(path).unwrap_or_else(|e| {
                error!("❌ {}", e);
                process::exit(1);
            });
            file_config.merge_from_cli(cli_config, sub_matches);
            file_config
        }
        None => cli_config.clone(),
    };
    if let Err(e) = config.validate() {
        error!("❌ {}", e);
        process::exit(1);
    }

    let result = match cli.command {
        Commands::Run(args) => cmd::run::run(args, config, model),
        Commands::Local(args) => cmd::local::run(args, config, &definition),
        Commands::Validate(args) => {
            cmd::validate::run(args, config, &definition, &model);
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("\n❌ RUN FAILED:");
        error!("   {}", e);
        process::exit(1);
    }
}
