//! NWB Session Toolbox - Multi-stream alignment and conversion of recording sessions
//!
//! This crate converts neuroscience recording sessions (behavioral trial lists,
//! hardware event codes, trial-cut LFP, trial-aligned and raw FSCV, thresholded
//! spike waveforms, eye tracking)
//! into one NWB-layout Zarr store per session, with every stream placed on a
//! single session-relative timeline.
//!
//! # Overview
//!
//! Each session is recorded on several clocks. The task software logs one
//! timestamp per trial, the acquisition hardware logs TTL-coded events, and the
//! FSCV system keeps its own clock. Conversion reconciles them in four steps:
//!
//! 1. **Clock conversion** ([`clock`]) - Unix seconds to calendar time to
//!    seconds since the session start
//! 2. **Trial alignment** ([`align`]) - per trial, the hardware trial-start
//!    event closest to the software timestamp
//! 3. **Segment reconstruction** ([`reconstruct`]) - per-trial windows stitched
//!    into one continuous series, with NaN-filled gaps and trimmed overlaps
//! 4. **Cross-stream re-timing** ([`interp`]) - secondary clocks mapped onto the
//!    aligned timeline through per-trial anchors
//!
//! # Command-Line Tools
//!
//! - `nwb-session` - Convert one session of a session map
//! - `nwb-dataset` - Convert every session, writing `ERROR_<session>.txt` for failures
//! - `nwb-inspect` - Inspect a converted store
//!
//! # Quick Start
//!
//! ```bash
//! # Stub run of the whole dataset (first 100 trials per session)
//! nwb-dataset --session-map sessions.toml --metadata metadata.toml --output nwbfiles --stub-test
//!
//! # Full conversion of one session
//! nwb-session --session-map sessions.toml --session 09262024 --metadata metadata.toml
//!
//! # Inspect the result
//! nwb-inspect nwbfiles/sub-Monkey-T_ses-09262024.zarr --verbose
//! ```
//!
//! # Store Layout
//!
//! ```text
//! sub-<subject>_ses-<session>.zarr/
//! ├── zarr.json                 (NWBFile, Subject and Conversion attributes)
//! ├── trials/                   start_time, stop_time, midpoint_time
//! ├── events/<label>/times      one group per event code
//! ├── ecephys/lfp/              data, timestamps
//! ├── ecephys/thresholded_units/unit_<id>/  spike_times, waveforms [K × S]
//! ├── fscv/
//! │   ├── trial_aligned/        per-trial columns, <column>_continuous, timestamps, good
//! │   └── raw/                  excitation, response [C × N], timestamps
//! └── behavior/eye_tracking/    data [2 × N]
//! ```
//!
//! # License
//!
//! This project is licensed under the GNU General Public License v3.0.
//! See LICENSE.md for details.

pub mod align;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dataset;
pub mod error;
pub mod events;
pub mod fscv;
pub mod interp;
pub mod reconstruct;
pub mod records;
pub mod session;
pub mod trials;
pub mod units;
pub mod zarr;

use chrono::Datelike;

/// Display GPL license notice for a program
pub fn display_license_notice(program_name: &str) {
    let version = env!("CARGO_PKG_VERSION");
    let current_year = chrono::Utc::now().year();
    let copyright_year = if current_year == 2025 {
        "2025".to_string()
    } else {
        format!("2025-{}", current_year)
    };

    println!("{} {} Copyright (C) {} Raul C. Sîmpetru", program_name, version, copyright_year);
    println!("This program comes with ABSOLUTELY NO WARRANTY.");
    println!("For details see https://www.gnu.org/licenses/gpl-3.0.html#license-text.");
    println!("This is free software, and you are welcome to redistribute it under certain conditions.");
    println!();
}
