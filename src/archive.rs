use crate::error::Error;
use log::{info, warn};
use std::fs::{self, File};
use std::io;
use std::path::Path;

/// Unpacks every zip bundle found in the per-account `statistics` folders
/// into the folder that holds it, optionally deleting the archive afterward.
///
/// Extraction is flat and overwrites on name collision, so re-running over
/// an already unpacked tree is a no-op. A malformed archive is logged and
/// skipped; it never aborts the other accounts.
pub fn extract_statistics_archives(run_dir: &Path, remove: bool) -> Result<(), Error> {
    if !run_dir.is_dir() {
        return Ok(());
    }

    for entry in fs::read_dir(run_dir)? {
        let statistics_dir = entry?.path().join("statistics");
        if !statistics_dir.is_dir() {
            continue;
        }

        for file in fs::read_dir(&statistics_dir)? {
            let path = file?.path();
            if !path.extension().is_some_and(|ext| ext == "zip") {
                continue;
            }

            match extract_archive(&path, &statistics_dir) {
                Ok(count) => {
                    info!("extracted {count} files from {}", path.display());
                    if remove {
                        if let Err(err) = fs::remove_file(&path) {
                            warn!("could not remove {}: {err}", path.display());
                        }
                    }
                }
                Err(err) => warn!("skipping archive {}: {err}", path.display()),
            }
        }
    }

    Ok(())
}

fn extract_archive(path: &Path, destination: &Path) -> Result<usize, Error> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    let mut extracted = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        // flatten: archived paths are untrusted, keep the file name only
        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_os_string()))
        else {
            continue;
        };

        let mut output = File::create(destination.join(name))?;
        io::copy(&mut entry, &mut output)?;
        extracted += 1;
    }

    Ok(extracted)
}
