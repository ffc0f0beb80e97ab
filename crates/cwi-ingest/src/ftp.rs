//! FTP mirror of the county well index distribution
//!
//! Fetches the published zip archives over anonymous FTP and unpacks them
//! next to the archive. A fetch is skipped when the local archive is at
//! least as new as the server copy, so repeated runs only move bytes when
//! the publisher has.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use suppaftp::FtpStream;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::config::{CwiConfig, FtpConfig};
use crate::error::Result;

/// Maximum number of attempts per archive.
pub const MAX_RETRIES: u32 = 3;

/// Base delay between attempts, multiplied by the attempt number.
pub const RETRY_DELAY_SECS: u64 = 5;

/// Outcome of one mirror pass.
#[derive(Debug, Clone, Default)]
pub struct MirrorReport {
    /// Archives fetched because the server copy was newer.
    pub fetched: Vec<String>,
    /// Archives skipped because the local copy was current.
    pub skipped: Vec<String>,
    /// Files unpacked from the fetched archives.
    pub extracted: usize,
}

impl MirrorReport {
    /// One-line human summary.
    pub fn summary(&self) -> String {
        format!(
            "{} archives fetched, {} up to date, {} files extracted",
            self.fetched.len(),
            self.skipped.len(),
            self.extracted
        )
    }
}

/// Mirror every configured archive into its destination directory.
pub fn mirror(config: &CwiConfig) -> Result<MirrorReport> {
    fs::create_dir_all(&config.data_dir)?;
    fs::create_dir_all(&config.locs_dir)?;

    let mut report = MirrorReport::default();
    for name in &config.ftp.files {
        let dest_dir = destination_dir(config, name);
        let local_path = dest_dir.join(name);
        let remote_path = remote_path(&config.ftp.remote_dir, name);

        match fetch_with_retry(&config.ftp, &remote_path, &local_path)? {
            None => {
                info!(archive = %name, "Archive up to date, skipping");
                report.skipped.push(name.clone());
            }
            Some(data) => {
                fs::write(&local_path, &data)?;
                info!(archive = %name, bytes = data.len(), "Archive fetched");
                report.extracted += extract_archive(&local_path, dest_dir)?;
                report.fetched.push(name.clone());
            }
        }
    }

    info!(
        fetched = report.fetched.len(),
        skipped = report.skipped.len(),
        files = report.extracted,
        "Mirror pass finished"
    );
    Ok(report)
}

/// Location archives live beside the location extracts; everything else
/// lands in the data directory.
fn destination_dir<'a>(config: &'a CwiConfig, file_name: &str) -> &'a PathBuf {
    if file_name.to_lowercase().contains("locs") {
        &config.locs_dir
    } else {
        &config.data_dir
    }
}

fn remote_path(remote_dir: &str, file_name: &str) -> String {
    format!("{}/{}", remote_dir.trim_end_matches('/'), file_name)
}

/// Fetch one archive, retrying transient failures with backoff.
///
/// Returns `None` when the local copy is current.
fn fetch_with_retry(
    ftp: &FtpConfig,
    remote_path: &str,
    local_path: &Path,
) -> Result<Option<Vec<u8>>> {
    for attempt in 1..=MAX_RETRIES {
        debug!(attempt, max = MAX_RETRIES, remote = %remote_path, "Fetching archive");
        match fetch_archive(ftp, remote_path, local_path) {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt < MAX_RETRIES {
                    let delay = RETRY_DELAY_SECS * attempt as u64;
                    warn!(
                        "Fetch attempt {}/{} for {} failed: {}. Retrying in {}s...",
                        attempt, MAX_RETRIES, remote_path, e, delay
                    );
                    thread::sleep(Duration::from_secs(delay));
                } else {
                    return Err(e);
                }
            }
        }
    }

    unreachable!("Retry loop should always return")
}

/// One FTP session: connect, compare timestamps, download when stale.
fn fetch_archive(
    ftp: &FtpConfig,
    remote_path: &str,
    local_path: &Path,
) -> Result<Option<Vec<u8>>> {
    debug!(host = %ftp.host, port = ftp.port, "Connecting to FTP server");
    let mut stream = FtpStream::connect(ftp.addr())?;

    // Extended Passive Mode works through NAT and container networks.
    stream.set_mode(suppaftp::Mode::ExtendedPassive);
    stream.login(&ftp.user, &ftp.password)?;
    stream.transfer_type(suppaftp::types::FileType::Binary)?;

    if let Ok(remote_modified) = stream.mdtm(remote_path) {
        if is_current(local_modified(local_path), remote_modified) {
            let _ = stream.quit();
            return Ok(None);
        }
        debug!(remote = %remote_path, modified = %remote_modified, "Server copy is newer");
    } else {
        debug!(remote = %remote_path, "Server does not report MDTM, fetching unconditionally");
    }

    let data = stream.retr_as_buffer(remote_path)?.into_inner();
    debug!(remote = %remote_path, bytes = data.len(), "Downloaded archive");

    if let Err(e) = stream.quit() {
        warn!("Failed to quit FTP session gracefully: {}", e);
    }

    Ok(Some(data))
}

fn local_modified(path: &Path) -> Option<NaiveDateTime> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified).naive_utc())
}

/// True when the local copy is at least as new as the server copy.
fn is_current(local: Option<NaiveDateTime>, remote: NaiveDateTime) -> bool {
    local.is_some_and(|mtime| mtime >= remote)
}

/// Unpack every entry of a zip archive into one directory.
///
/// Entry paths are flattened to their basename; the published archives
/// hold a flat file list, so nothing collides.
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> Result<usize> {
    let file = fs::File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;

    let mut extracted = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let basename = name.split('/').next_back().unwrap_or(&name).to_string();
        let out_path = dest_dir.join(&basename);
        let mut out = fs::File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        debug!(file = %basename, "Extracted");
        extracted += 1;
    }

    info!(
        archive = %archive_path.display(),
        extracted,
        "Archive unpacked"
    );
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn scratch_config() -> (tempfile::TempDir, CwiConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = CwiConfig::new()
            .with_data_dir(dir.path().join("data"))
            .with_locs_dir(dir.path().join("locs"));
        (dir, config)
    }

    #[test]
    fn test_destination_routing() {
        let (_dir, config) = scratch_config();
        assert_eq!(destination_dir(&config, "cwidata_csv.zip"), &config.data_dir);
        assert_eq!(destination_dir(&config, "cwilocs.zip"), &config.locs_dir);
        assert_eq!(destination_dir(&config, "xcwiunlocs.zip"), &config.locs_dir);
    }

    #[test]
    fn test_remote_path_joins_cleanly() {
        assert_eq!(remote_path("/pub/cwi", "cwilocs.zip"), "/pub/cwi/cwilocs.zip");
        assert_eq!(remote_path("/pub/cwi/", "cwilocs.zip"), "/pub/cwi/cwilocs.zip");
    }

    #[test]
    fn test_local_modified_missing_file() {
        assert!(local_modified(Path::new("/does/not/exist.zip")).is_none());
    }

    #[test]
    fn test_freshness_comparison() {
        let stamp = |hour| {
            chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap()
        };
        assert!(is_current(Some(stamp(13)), stamp(12)));
        assert!(is_current(Some(stamp(12)), stamp(12)));
        assert!(!is_current(Some(stamp(11)), stamp(12)));
        assert!(!is_current(None, stamp(12)));
    }

    #[test]
    fn test_extract_archive_flattens_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("bundle.zip");

        let file = fs::File::create(&archive_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer.start_file("c4ix.csv", FileOptions::default()).unwrap();
        writer.write_all(b"RELATEID\n0000000001\n").unwrap();
        writer
            .start_file("nested/wells.csv", FileOptions::default())
            .unwrap();
        writer.write_all(b"wellid\n1\n").unwrap();
        writer.finish().unwrap();

        let extracted = extract_archive(&archive_path, dir.path()).unwrap();
        assert_eq!(extracted, 2);
        assert!(dir.path().join("c4ix.csv").exists());
        assert!(dir.path().join("wells.csv").exists());
    }
}
