use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Convert one session of a session map
#[derive(Parser, Clone, Debug)]
#[command(name = "nwb-session")]
#[command(about = "Align and convert a single recording session to a Zarr store")]
pub struct SessionArgs {
    #[arg(long, short = 'm', help = "Session map (TOML, [[sessions]] tables)")]
    pub session_map: PathBuf,

    #[arg(
        long,
        short = 's',
        help = "Session id to convert (defaults to the first session in the map)"
    )]
    pub session: Option<String>,

    #[arg(long, help = "Metadata document (TOML) merged over the built-in defaults")]
    pub metadata: Option<PathBuf>,

    #[arg(long, short = 'o', help = "Output folder for the Zarr stores", default_value = "nwbfiles")]
    pub output: PathBuf,

    #[arg(long, help = "Only convert the first trials and seconds of each stream into <output>/nwb_stub")]
    pub stub_test: bool,

    #[arg(long, short = 'v', help = "Debug-level logging")]
    pub verbose: bool,

    #[arg(long, short = 'q', help = "Minimal output mode")]
    pub quiet: bool,
}

/// Convert every session of a session map
#[derive(Parser, Clone, Debug)]
#[command(name = "nwb-dataset")]
#[command(about = "Convert every session of a session map, recording failures per session")]
pub struct DatasetArgs {
    #[arg(long, short = 'm', help = "Session map (TOML, [[sessions]] tables)")]
    pub session_map: PathBuf,

    #[arg(long, help = "Metadata document (TOML) merged over the built-in defaults")]
    pub metadata: Option<PathBuf>,

    #[arg(long, short = 'o', help = "Output folder for the Zarr stores and error files", default_value = "nwbfiles")]
    pub output: PathBuf,

    #[arg(long, help = "Only convert the first trials and seconds of each stream into <output>/nwb_stub")]
    pub stub_test: bool,

    #[arg(long, short = 'v', help = "Debug-level logging")]
    pub verbose: bool,

    #[arg(long, short = 'q', help = "Minimal output mode")]
    pub quiet: bool,
}

impl SessionArgs {
    pub fn to_run_config_json(&self) -> anyhow::Result<String> {
        let config_json = json!({
            "session_map": self.session_map.display().to_string(),
            "session": self.session,
            "metadata": self.metadata.as_ref().map(|p| p.display().to_string()),
            "output": self.output.display().to_string(),
            "stub_test": self.stub_test,
            "toolbox_version": env!("CARGO_PKG_VERSION")
        });
        Ok(serde_json::to_string_pretty(&config_json)?)
    }
}

impl DatasetArgs {
    pub fn to_run_config_json(&self) -> anyhow::Result<String> {
        let config_json = json!({
            "session_map": self.session_map.display().to_string(),
            "metadata": self.metadata.as_ref().map(|p| p.display().to_string()),
            "output": self.output.display().to_string(),
            "stub_test": self.stub_test,
            "toolbox_version": env!("CARGO_PKG_VERSION")
        });
        Ok(serde_json::to_string_pretty(&config_json)?)
    }
}

/// Install the fmt subscriber. `RUST_LOG` wins over `verbose` when set.
pub fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { Level::DEBUG } else { Level::INFO };
        EnvFilter::from_default_env().add_directive(level.into())
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
