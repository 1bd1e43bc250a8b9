//! NWB Inspect - Converted session store viewer
//!
//! Displays the session metadata and every group and array of a store
//! written by `nwb-session` or `nwb-dataset`.
//!
//! # Usage
//!
//! ```bash
//! nwb-inspect nwbfiles/sub-Monkey-T_ses-09262024.zarr
//! nwb-inspect nwbfiles/sub-Monkey-T_ses-09262024.zarr --verbose
//! nwb-inspect store.zarr --group /fscv/raw
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use nwb_session_toolbox::zarr::{array_shape, list_nodes, open_session_store, read_f64, read_group_attributes};

#[derive(Parser)]
#[command(name = "nwb-inspect")]
#[command(about = "Inspect Zarr stores written by the session converter")]
#[command(version)]
struct Args {
    /// Path to the store to inspect
    store_path: PathBuf,

    /// Show attributes of every group and the time range of every timestamps array
    #[arg(short, long)]
    verbose: bool,

    /// Only show nodes below these group path(s)
    #[arg(short, long)]
    group: Option<Vec<String>>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    nwb_session_toolbox::display_license_notice("nwb-inspect");

    println!("╔════════════════════════════════════════════════════════════════╗");
    println!("║              NWB Session Store Inspector                       ║");
    println!("╚════════════════════════════════════════════════════════════════╝");
    println!();
    println!("Store: {}", args.store_path.display());
    println!();

    let store = open_session_store(&args.store_path)?;

    let root = read_group_attributes(&store, "/")?;
    if let Some(nwbfile) = root.get("NWBFile") {
        for key in ["session_id", "session_start_time", "identifier"] {
            if let Some(value) = nwbfile.get(key).and_then(|v| v.as_str()) {
                println!("{:<20} {}", key, value);
            }
        }
    }
    if let Some(subject_id) = root
        .get("Subject")
        .and_then(|s| s.get("subject_id"))
        .and_then(|v| v.as_str())
    {
        println!("{:<20} {}", "subject_id", subject_id);
    }
    if let Some(stub) = root.get("stub_test").and_then(|v| v.as_bool()) {
        println!("{:<20} {}", "stub_test", stub);
    }
    println!();

    let nodes: Vec<(String, String)> = list_nodes(&args.store_path)?
        .into_iter()
        .filter(|(path, _)| match &args.group {
            Some(groups) => groups.iter().any(|g| path.starts_with(g.as_str())),
            None => true,
        })
        .collect();

    let group_count = nodes.iter().filter(|(_, kind)| kind == "group").count();
    let array_count = nodes.len() - group_count;
    println!("NODES ({} groups, {} arrays)", group_count, array_count);
    println!();

    for (index, (path, kind)) in nodes.iter().enumerate() {
        let depth = path.matches('/').count().saturating_sub(1);
        let is_last = index + 1 == nodes.len();
        let prefix = if is_last { "└─" } else { "├─" };
        let indent = "  ".repeat(depth + 1);
        let name = path.rsplit('/').next().unwrap_or(path);

        if kind == "group" {
            println!("{}{} {}/", indent, prefix, name);
            if args.verbose
                && let Ok(attrs) = read_group_attributes(&store, path)
                && let Some(fields) = attrs.as_object()
            {
                for (key, value) in fields {
                    let rendered = value.to_string();
                    let shown = if rendered.chars().count() > 60 {
                        format!("{}…", rendered.chars().take(60).collect::<String>())
                    } else {
                        rendered
                    };
                    println!("{}   · {} = {}", indent, key, shown);
                }
            }
            continue;
        }

        match array_shape(&store, path) {
            Ok(shape) => {
                println!("{}{} {} {:?}", indent, prefix, name, shape);
                if args.verbose
                    && (name == "timestamps" || name == "times")
                    && let Ok(values) = read_f64(&store, path)
                    && let (Some(first), Some(last)) = (values.first(), values.last())
                {
                    println!("{}   Time Range: {:.6} → {:.6} ({:.3} s)", indent, first, last, last - first);
                }
            }
            Err(e) => println!("{}{} {} (unreadable: {})", indent, prefix, name, e),
        }
    }
    println!();

    Ok(())
}
