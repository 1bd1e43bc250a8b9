//! Batch conversion over a session map
//!
//! Sessions run one after another. A failing session leaves an
//! `ERROR_<session>.txt` next to the converted stores and the batch moves on.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::config::{MetadataDocument, SessionEntry, SessionMap};
use crate::session::{SessionReport, session_to_store};

#[derive(Debug, Default)]
pub struct DatasetSummary {
    pub converted: Vec<SessionReport>,
    /// Session label and the error file written for it
    pub failed: Vec<(String, PathBuf)>,
}

impl DatasetSummary {
    pub fn total(&self) -> usize {
        self.converted.len() + self.failed.len()
    }
}

/// Name used for a session in logs and error files
pub fn session_label(entry: &SessionEntry, index: usize) -> String {
    entry
        .neuralynx_folder_path
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .or_else(|| entry.session_id())
        .unwrap_or_else(|| format!("session-{}", index + 1))
}

pub fn error_file_path(output_dir: &Path, label: &str) -> PathBuf {
    output_dir.join(format!("ERROR_{}.txt", label))
}

pub fn dataset_to_stores(
    sessions: &SessionMap,
    metadata: &MetadataDocument,
    output_dir: &Path,
    stub_test: bool,
) -> Result<DatasetSummary> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output folder {:?}", output_dir))?;

    let total = sessions.sessions.len();
    let mut summary = DatasetSummary::default();
    for (index, entry) in sessions.sessions.iter().enumerate() {
        let label = session_label(entry, index);
        info!("[{}/{}] Converting session {}", index + 1, total, label);

        match session_to_store(entry, metadata, output_dir, stub_test) {
            Ok(report) => summary.converted.push(report),
            Err(err) => {
                error!("Session {} failed: {:#}", label, err);
                let path = error_file_path(output_dir, &label);
                let content = format!(
                    "session_to_store arguments:\n{:#?}\nstub_test: {}\n\n{:?}\n",
                    entry, stub_test, err
                );
                std::fs::write(&path, content)
                    .with_context(|| format!("Failed to write error file {:?}", path))?;
                summary.failed.push((label, path));
            }
        }
    }

    info!(
        "Converted {}/{} sessions ({} failed)",
        summary.converted.len(),
        summary.total(),
        summary.failed.len()
    );
    Ok(summary)
}
