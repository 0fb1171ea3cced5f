use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use common::errors::*;
use nix::fcntl::{flock, FlockArg};

use crate::error::LockBusy;
use crate::keys;

const LOCK_RETRIES: u32 = 30;
const LOCK_RETRY_PAUSE: Duration = Duration::from_millis(100);

/// Durable, single-writer, lock-coordinated map of typed keys to strings.
///
/// Backed by a flat file of `key\tvalue` records (escaped so that either may
/// contain arbitrary bytes), guarded by an flock(2)'d sibling `.lock` file.
/// Every mutation reads the whole file, applies the change in memory, and
/// replaces the file atomically via `rename`, mirroring the `dbm.gnu`-backed
/// original's "open, mutate, close" transaction shape without requiring a
/// real embedded database engine.
pub struct Db {
    data_path: PathBuf,
    lock_path: PathBuf,
}

enum LockMode {
    Shared,
    Exclusive,
}

struct HeldLock {
    file: File,
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
    }
}

impl Db {
    pub fn open(data_path: impl Into<PathBuf>) -> Self {
        let data_path = data_path.into();
        let lock_path = {
            let mut p = data_path.clone();
            let name = format!(
                "{}.lock",
                p.file_name().and_then(|n| n.to_str()).unwrap_or("ivxv-management")
            );
            p.set_file_name(name);
            p
        };
        Self { data_path, lock_path }
    }

    fn acquire(&self, mode: LockMode) -> Result<HeldLock> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.lock_path)
            .map_err(|e| format_err!("Failed to open lock file {:?}: {}", self.lock_path, e))?;

        let arg = match mode {
            LockMode::Shared => FlockArg::LockSharedNonblock,
            LockMode::Exclusive => FlockArg::LockExclusiveNonblock,
        };

        let mut attempts = 0;
        loop {
            match flock(file.as_raw_fd(), arg) {
                Ok(()) => return Ok(HeldLock { file }),
                Err(nix::errno::Errno::EWOULDBLOCK) => {
                    attempts += 1;
                    if attempts >= LOCK_RETRIES {
                        return Err(LockBusy.into());
                    }
                    sleep(LOCK_RETRY_PAUSE);
                }
                Err(e) => return Err(err_msg(format!("flock failed: {}", e))),
            }
        }
    }

    fn read_records(&self) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        let file = match File::open(&self.data_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, '\t');
            let key = parts.next().ok_or_else(|| err_msg("Corrupt database record"))?;
            let value = parts.next().ok_or_else(|| err_msg("Corrupt database record"))?;
            out.insert(unescape(key), unescape(value));
        }
        Ok(out)
    }

    fn write_records(&self, records: &BTreeMap<String, String>) -> Result<()> {
        let tmp_path = self.data_path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            for (key, value) in records {
                writeln!(tmp, "{}\t{}", escape(key), escape(value))?;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.data_path)?;
        Ok(())
    }

    /// Runs `f` against a read-only snapshot of the store under a shared lock.
    pub fn with_read<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BTreeMap<String, String>) -> Result<R>,
    {
        let _lock = self.acquire(LockMode::Shared)?;
        let records = self.read_records()?;
        f(&records)
    }

    /// Runs `f` against a mutable snapshot of the store under the exclusive
    /// writer lock. If `f` succeeds the resulting map is persisted atomically;
    /// if it fails, nothing is written.
    pub fn with_write<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> Result<R>,
    {
        let _lock = self.acquire(LockMode::Exclusive)?;
        let mut records = self.read_records()?;
        let result = f(&mut records)?;
        self.write_records(&records)?;
        Ok(result)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_read(|records| Ok(records.get(key).cloned()))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        keys::validate(key, value)?;
        self.with_write(|records| {
            records.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    /// Sets `key` only if it is still present in the store at transaction
    /// time. Used by the agent loop so that a concurrent `database.reset()`
    /// (trust-config reload) is never raced by a stale write resurrecting a
    /// row the reset just cleared.
    pub fn set_safe(&self, key: &str, value: &str) -> Result<()> {
        keys::validate(key, value)?;
        self.with_write(|records| {
            if records.contains_key(key) {
                records.insert(key.to_string(), value.to_string());
            }
            Ok(())
        })
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.with_write(|records| {
            records.remove(key);
            Ok(())
        })
    }

    pub fn keys(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        self.with_read(|records| {
            Ok(records
                .keys()
                .filter(|k| prefix.map(|p| k.starts_with(p)).unwrap_or(true))
                .cloned()
                .collect())
        })
    }

    pub fn all(&self, prefix: Option<&str>) -> Result<BTreeMap<String, String>> {
        self.with_read(|records| {
            Ok(records
                .iter()
                .filter(|(k, _)| prefix.map(|p| k.starts_with(p)).unwrap_or(true))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        })
    }

    /// Empties the store and writes the default row set, atomically.
    pub fn reset(&self, defaults: &[(&str, &str)]) -> Result<()> {
        for (key, value) in defaults {
            keys::validate(key, value)?;
        }
        self.with_write(|records| {
            records.clear();
            for (key, value) in defaults {
                records.insert(key.to_string(), value.to_string());
            }
            Ok(())
        })
    }

    pub fn path(&self) -> &Path {
        &self.data_path
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\t', "\\t").replace('\n', "\\n")
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (Db, tempfile_dir::TempDir) {
        let dir = tempfile_dir::TempDir::new();
        let db = Db::open(dir.path().join("ivxv-management.db"));
        (db, dir)
    }

    #[test]
    fn set_get_roundtrip() {
        let (db, _dir) = temp_db();
        db.set("collector/state", "NOT_INSTALLED").unwrap();
        assert_eq!(db.get("collector/state").unwrap().as_deref(), Some("NOT_INSTALLED"));
    }

    #[test]
    fn rejects_bad_key() {
        let (db, _dir) = temp_db();
        assert!(db.set("nonsense", "x").is_err());
    }

    #[test]
    fn reset_clears_and_reseeds() {
        let (db, _dir) = temp_db();
        db.set("collector/state", "CONFIGURED").unwrap();
        db.reset(&[("collector/state", "NOT_INSTALLED")]).unwrap();
        assert_eq!(db.get("collector/state").unwrap().as_deref(), Some("NOT_INSTALLED"));
        assert_eq!(db.keys(None).unwrap().len(), 1);
    }

    #[test]
    fn set_safe_skips_removed_key() {
        let (db, _dir) = temp_db();
        db.set("service/voting1/state", "CONFIGURED").unwrap();
        db.delete("service/voting1/state").unwrap();
        db.set_safe("service/voting1/state", "FAILURE").unwrap();
        assert_eq!(db.get("service/voting1/state").unwrap(), None);
    }

    #[test]
    fn values_with_tabs_and_newlines_round_trip() {
        let (db, _dir) = temp_db();
        db.set("service/voting1/bg_info", "line one\tline two\nline three").unwrap();
        assert_eq!(
            db.get("service/voting1/bg_info").unwrap().as_deref(),
            Some("line one\tline two\nline three")
        );
    }

    mod tempfile_dir {
        use std::path::{Path, PathBuf};

        pub struct TempDir(PathBuf);

        impl TempDir {
            pub fn new() -> Self {
                let mut p = std::env::temp_dir();
                let unique = format!(
                    "collector_db-test-{}-{}",
                    std::process::id(),
                    std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap()
                        .as_nanos()
                );
                p.push(unique);
                std::fs::create_dir_all(&p).unwrap();
                Self(p)
            }

            pub fn path(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }
}
