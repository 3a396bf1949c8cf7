mod commands;
mod overrides;
mod terminal;

use commands::{CommandLine, Commands, regen, run, stages};
use terminal::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let commands = CommandLine::parse_args();

    match &commands.command {
        Commands::Run(args) => run::run(&commands, args).await,
        Commands::RegenConfig => {
            logging::init_logging(commands.debug);
            regen::regen(&commands)
        }
        Commands::Stages => {
            logging::init_logging(commands.debug);
            stages::stages(&commands)
        }
    }
}
