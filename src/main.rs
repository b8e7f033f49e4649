use std::path::PathBuf;

use clap::Parser;

mod agents;
mod ansi;
mod classifier;
mod config;
mod error;
mod events;
mod logging;
mod monitor;
mod pty;
mod relay;
mod session;
mod status;
mod title;

use agents::AgentTable;
use config::{Tuning, TuningOverrides};
use session::{Invocation, Orchestrator};

/// Run an AI coding agent and keep the terminal tab title showing
/// whether it is working, done, or waiting for an approval.
#[derive(Debug, Parser)]
#[command(name = "agent-title", version, about)]
struct Cli {
    /// Project name for the title (default: current directory name)
    #[arg(long, env = "AGENT_TITLE_PROJECT")]
    project: Option<String>,

    /// Minimum time between two title updates, in milliseconds
    #[arg(long, env = "AGENT_TITLE_DEBOUNCE_MS")]
    debounce_ms: Option<u64>,

    /// Silence after which a working agent counts as done, in milliseconds
    #[arg(long, env = "AGENT_TITLE_IDLE_MS")]
    idle_ms: Option<u64>,

    /// Bytes of recent output the classifier looks at
    #[arg(long, env = "AGENT_TITLE_WINDOW_BYTES")]
    window_bytes: Option<usize>,

    /// Tuning file (default: <config dir>/agent-title/config.json)
    #[arg(long, env = "AGENT_TITLE_CONFIG")]
    config: Option<PathBuf>,

    /// The agent command and its arguments
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        num_args = 1..,
        value_name = "COMMAND"
    )]
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Titles work without a log file
    let _ = logging::init();
    pty::install_panic_hook();

    let overrides = TuningOverrides {
        debounce_ms: cli.debounce_ms,
        idle_ms: cli.idle_ms,
        window_bytes: cli.window_bytes,
    };
    let config_path = cli.config.or_else(config::default_config_path);
    let tuning = Tuning::resolve(config_path.as_deref(), &overrides);

    let mut command = cli.command.into_iter();
    let Some(program) = command.next() else {
        std::process::exit(error::EXIT_INTERNAL);
    };
    let invocation = Invocation {
        command: program,
        args: command.collect(),
        project: cli.project,
    };

    let code = Orchestrator::new(AgentTable::builtin(), tuning)
        .run(invocation)
        .await;
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_flags_are_not_ours() {
        let cli = Cli::try_parse_from(["agent-title", "--project", "api", "claude", "--resume", "-p", "x"]).unwrap();
        assert_eq!(cli.project.as_deref(), Some("api"));
        assert_eq!(cli.command, vec!["claude", "--resume", "-p", "x"]);
    }

    #[test]
    fn test_command_is_required() {
        assert!(Cli::try_parse_from(["agent-title"]).is_err());
    }

    #[test]
    fn test_tuning_flags() {
        let cli = Cli::try_parse_from(["agent-title", "--idle-ms", "900", "--debounce-ms", "50", "codex"]).unwrap();
        assert_eq!(cli.idle_ms, Some(900));
        assert_eq!(cli.debounce_ms, Some(50));
        assert_eq!(cli.command, vec!["codex"]);
    }
}
