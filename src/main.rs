use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use log::error;

use process_supervisor::{app::cli, config::DEFAULT_CONFIG_PATH, signals};

#[derive(Parser)]
#[command(version, about = "Keeps a fixed set of long-running tasks alive")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to the supervisor config file
    #[arg(short, long, global = true, env = "SUPERVISOR_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[clap(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every configured task and keep them running until interrupted
    Start,
    /// Stop the supervisor and every registered process
    #[command(visible_alias = "kill")]
    Stop,
    /// Show registered processes and whether they are alive
    #[command(visible_alias = "ls")]
    Status,
    /// Print the end of a task's log file
    Logs {
        /// Task name
        task: String,
        #[arg(
            short = 'n',
            long,
            default_value_t = 15,
            help = "Number of lines to display from the end of the log file"
        )]
        lines: usize,
    },
}

fn main() {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .parse_default_env()
        .init();

    let code = match args.command {
        Commands::Start => match signals::install() {
            Ok(control) => cli::start(&args.config, control),
            Err(e) => {
                error!("[ERROR]: Failed to install signal handling: {}", e);
                1
            }
        },
        Commands::Stop => cli::stop(&args.config),
        Commands::Status => cli::status(&args.config),
        Commands::Logs { task, lines } => cli::logs(&args.config, &task, lines),
    };

    std::process::exit(code);
}
