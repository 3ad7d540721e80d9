use std::io::{self, BufRead};
use std::sync::Arc;

use agent_session::{init_logging, CoordinatorConfig, LogConfig, TaskCoordinator, ThreadScheduler};
use coding_agent::console::Console;
use coding_agent::providers;
use coding_agent::repl::{Flow, Repl};

const DEFAULT_LOG_FILTER: &str = "warn";

fn main() -> io::Result<()> {
    let mut log_config = LogConfig::from_env();
    if log_config.filter.is_none() {
        log_config = log_config.with_filter(DEFAULT_LOG_FILTER);
    }
    init_logging(&log_config).map_err(io::Error::other)?;

    let config = CoordinatorConfig::from_env().map_err(io::Error::other)?;
    let executor = providers::provider_from_env().map_err(io::Error::other)?;

    let console = Arc::new(Console::stdout());
    let coordinator = TaskCoordinator::new(
        executor,
        Arc::new(ThreadScheduler),
        console.clone(),
        config,
    );
    console.attach(&coordinator);
    coordinator.create_session();

    let repl = Repl::new(coordinator, console);
    repl.greet();

    for line in io::stdin().lock().lines() {
        if repl.handle_line(&line?) == Flow::Quit {
            break;
        }
    }

    Ok(())
}
