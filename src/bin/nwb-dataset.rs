//! NWB Dataset - Convert every session of a session map
//!
//! Sessions are converted one after another. A failing session does not stop
//! the batch: its arguments and full error chain are written to
//! `<output>/ERROR_<session>.txt` and the next session starts.
//!
//! # Usage
//!
//! ```bash
//! nwb-dataset --session-map sessions.toml --metadata metadata.toml --output nwbfiles
//! nwb-dataset -m sessions.toml --stub-test
//! ```

use anyhow::Result;
use clap::Parser;

use nwb_session_toolbox::cli::{DatasetArgs, init_tracing};
use nwb_session_toolbox::config::{MetadataDocument, SessionMap};
use nwb_session_toolbox::dataset::dataset_to_stores;

fn main() -> Result<()> {
    let args = DatasetArgs::parse();

    if !args.quiet {
        nwb_session_toolbox::display_license_notice("nwb-dataset");
        init_tracing(args.verbose);

        println!("╔════════════════════════════════════════════════════════════════╗");
        println!("║              NWB Dataset Converter                             ║");
        println!("╚════════════════════════════════════════════════════════════════╝");
        println!();
        if args.verbose {
            println!("{}", args.to_run_config_json()?);
            println!();
        }
    }

    let session_map = SessionMap::load_from(&args.session_map)?;
    let metadata = match &args.metadata {
        Some(path) => MetadataDocument::load_from(path)?,
        None => MetadataDocument::default(),
    };

    let summary = dataset_to_stores(&session_map, &metadata, &args.output, args.stub_test)?;

    if !args.quiet {
        println!();
        println!("Converted {} of {} sessions", summary.converted.len(), summary.total());
        for report in &summary.converted {
            println!("  ├─ {} → {}", report.session_id, report.store_path.display());
        }
        for (label, error_file) in &summary.failed {
            println!("  ├─ FAILED {} (see {})", label, error_file.display());
        }
        println!();
    }

    Ok(())
}
