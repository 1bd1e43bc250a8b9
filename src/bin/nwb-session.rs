//! NWB Session - Align and convert a single recording session
//!
//! Reads the session from a session map, aligns its trials on the hardware
//! trial-start code, re-times every configured stream onto the aligned timeline
//! and writes one Zarr store.
//!
//! # Usage
//!
//! ```bash
//! # First session of the map
//! nwb-session --session-map sessions.toml --metadata metadata.toml
//!
//! # A specific session, stub run
//! nwb-session -m sessions.toml -s 09262024 --metadata metadata.toml --stub-test
//! ```
//!
//! Errors propagate: a failing session exits non-zero with the full error chain.

use anyhow::{Context, Result};
use clap::Parser;

use nwb_session_toolbox::cli::{SessionArgs, init_tracing};
use nwb_session_toolbox::config::{MetadataDocument, SessionMap};
use nwb_session_toolbox::session::session_to_store;

fn main() -> Result<()> {
    let args = SessionArgs::parse();

    if !args.quiet {
        nwb_session_toolbox::display_license_notice("nwb-session");
        init_tracing(args.verbose);

        println!("╔════════════════════════════════════════════════════════════════╗");
        println!("║              NWB Session Converter                             ║");
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

    let entry = match &args.session {
        Some(session_id) => session_map
            .find(session_id)
            .with_context(|| format!("Session '{}' not found in {:?}", session_id, args.session_map))?,
        None => session_map
            .sessions
            .first()
            .with_context(|| format!("No sessions in {:?}", args.session_map))?,
    };

    let report = session_to_store(entry, &metadata, &args.output, args.stub_test)?;

    if !args.quiet {
        println!();
        println!("Session:  {}", report.session_id);
        println!("Subject:  {}", report.subject_id);
        println!("Trials:   {}", report.trial_count);
        println!("Events:   {} series", report.event_series);
        if !report.skipped_codes.is_empty() {
            println!("Skipped:  codes {:?} (not in the event mapping)", report.skipped_codes);
        }
        println!("Streams:  {}", report.streams.join(", "));
        println!("Store:    {}", report.store_path.display());
    }

    Ok(())
}
