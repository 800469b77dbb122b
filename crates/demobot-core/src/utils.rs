use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};

use crate::Result;

// ============== Timestamp Helpers ==============

/// Current wall-clock time as unix seconds (the unit Telegram uses for `date`).
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// RFC3339 timestamp in UTC (for report logs).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

// ============== Locking ==============

/// Lock a std mutex, ignoring poisoning.
///
/// Every critical section in this crate is a plain collection mutation, so a
/// panic elsewhere cannot leave the data half-updated.
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============== JSON Snapshots ==============

/// Read a JSON snapshot, or `T::default()` if the file does not exist yet.
pub fn read_json_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match fs::read_to_string(path) {
        Ok(txt) if txt.trim().is_empty() => Ok(T::default()),
        Ok(txt) => Ok(serde_json::from_str(&txt)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

static SNAPSHOT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Rewrite a JSON snapshot in full (write to a sibling temp file, then rename).
///
/// Every call gets its own temp file, so overlapping writers never interleave
/// bytes; the last rename wins. Owners serialize writes of one file with a
/// write lock held across snapshot and write.
pub fn write_json_snapshot<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let body = serde_json::to_string_pretty(value)?;
    let seq = SNAPSHOT_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("json.{}-{seq}.tmp", std::process::id()));
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn snapshot_round_trips_and_missing_file_is_default() {
        let dir = std::env::temp_dir().join(format!("demobot-utils-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let path = dir.join("state.json");

        let empty: BTreeMap<String, i64> = read_json_or_default(&path).unwrap();
        assert!(empty.is_empty());

        let mut m = BTreeMap::new();
        m.insert("a".to_string(), 1i64);
        write_json_snapshot(&path, &m).unwrap();
        let back: BTreeMap<String, i64> = read_json_or_default(&path).unwrap();
        assert_eq!(back, m);
        let left: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(left, vec![std::ffi::OsString::from("state.json")]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let dir = std::env::temp_dir().join(format!("demobot-utils-bad-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.json");
        fs::write(&path, "{not json").unwrap();

        let res: Result<BTreeMap<String, i64>> = read_json_or_default(&path);
        assert!(res.is_err());

        let _ = fs::remove_dir_all(&dir);
    }
}
