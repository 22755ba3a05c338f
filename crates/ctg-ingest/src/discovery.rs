//! Session discovery over the `{group}/{folder}/{bpm,uterus}/*.csv` layout

use ctg_core::{Channel, CohortGroup, SessionDescriptor, SessionSummary};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Scan a data root and return every session keyed by session id
///
/// Missing or unreadable directories are treated as absent; the scan itself
/// never fails.
pub fn discover_sessions(root: &Path) -> BTreeMap<String, SessionDescriptor> {
    let mut sessions = BTreeMap::new();

    for group in CohortGroup::ALL {
        let group_dir = root.join(group.as_str());
        for folder in sorted_subdirectories(&group_dir) {
            let folder_dir = group_dir.join(&folder);

            let bpm_files = list_fragments(&folder_dir.join(Channel::Bpm.as_str()));
            let uterus_files = list_fragments(&folder_dir.join(Channel::Uterus.as_str()));

            if bpm_files.is_empty() && uterus_files.is_empty() {
                debug!("Skipping {}/{}: no fragments", group, folder);
                continue;
            }

            let session_id = if sessions.contains_key(&folder) {
                let qualified = format!("{}-{}", group, folder);
                warn!(
                    "Folder name {} already used by another group, registering as {}",
                    folder, qualified
                );
                qualified
            } else {
                folder.clone()
            };

            debug!(
                "Session {}: {} bpm / {} uterus fragments",
                session_id,
                bpm_files.len(),
                uterus_files.len()
            );

            sessions.insert(
                session_id.clone(),
                SessionDescriptor {
                    group,
                    folder_id: folder,
                    session_id,
                    bpm_files,
                    uterus_files,
                },
            );
        }
    }

    info!("Discovered {} sessions under {}", sessions.len(), root.display());
    sessions
}

/// Session list ordered by session id
pub fn list_sessions(root: &Path) -> Vec<SessionSummary> {
    discover_sessions(root)
        .values()
        .map(SessionDescriptor::summary)
        .collect()
}

fn sorted_subdirectories(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut names: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

/// CSV files of one channel directory, sorted by file name
fn list_fragments(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_csv(path))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    files
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"))
}
