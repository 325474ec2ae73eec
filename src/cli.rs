use clap::Parser;
use std::path::PathBuf;

/// Flags left unset fall back to the config file, then to built-in defaults.
#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "kubetray",
    version,
    about = "Kubernetes context, namespace and port-forward switcher for the desktop tray."
)]
pub struct CliArgs {
    /// Pod poll interval in milliseconds
    #[arg(long)]
    pub refresh_ms: Option<u64>,

    /// Seconds a vanished pod's detail view stays open
    #[arg(long)]
    pub grace_secs: Option<u64>,

    /// Timeout for one-shot kubectl commands in milliseconds
    #[arg(long)]
    pub command_timeout_ms: Option<u64>,

    /// kubectl binary to run
    #[arg(long)]
    pub kubectl: Option<String>,

    /// Terminal emulator used for shells and logs
    #[arg(long)]
    pub terminal: Option<String>,

    /// Settings file holding ports and terminal preferences
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Seconds to wait before the first cluster query
    #[arg(long, env = "DELAY_STARTUP")]
    pub startup_delay_secs: Option<u64>,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long)]
    pub log_filter: Option<String>,
}
