//! Client disk cache (§4.J): per-service JSON snapshots under
//! `cacheDir/<namespaceId>/<group@@service>@@<clusters>`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use naming_types::ServiceInfo;
use tracing::warn;

use crate::error::ClientError;

/// Sanitizes a cache key for use as a filename: the key already excludes
/// path separators (group/service/cluster names are validated upstream),
/// but this guards against accidental traversal regardless.
fn file_name_for(cache_key: &str) -> String {
    cache_key.replace(['/', '\\'], "_")
}

/// Atomically writes `service_info` to `dir/<cache_key>`, surviving a crash
/// mid-write by writing to a temp file first and renaming into place.
pub fn write(dir: &Path, service_info: &ServiceInfo) -> Result<(), ClientError> {
    fs::create_dir_all(dir)?;
    let target = dir.join(file_name_for(&service_info.cache_key()));
    let tmp = target.with_extension("tmp");

    let body = serde_json::to_vec_pretty(service_info)?;
    fs::write(&tmp, body)?;
    fs::rename(&tmp, &target)?;
    Ok(())
}

/// Reads every parseable `ServiceInfo` file in `dir`, keyed by
/// [`ServiceInfo::cache_key`]. Unparseable files are skipped and logged,
/// not treated as a hard failure.
pub fn read_all(dir: &Path) -> HashMap<String, ServiceInfo> {
    let mut result = HashMap::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return result;
    };

    for entry in entries.flatten() {
        let path: PathBuf = entry.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            continue;
        }
        match fs::read(&path).ok().and_then(|bytes| serde_json::from_slice::<ServiceInfo>(&bytes).ok()) {
            Some(info) => {
                result.insert(info.cache_key(), info);
            }
            None => warn!(path = %path.display(), "skipping unparseable disk cache entry"),
        }
    }

    result
}
