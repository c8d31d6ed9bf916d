//! Durable storage for the replicated log and the Raft hard state.
//!
//! The hard state (`current_term`, `voted_for`) must be persisted before a
//! node answers any RPC that depends on it, and log entries must be durable
//! before they are acknowledged to the leader. Both implementations honour
//! that by writing synchronously; the file implementation fsyncs every
//! write and the directory after every rename.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use notary_types::{NodeId, NotaryError, Result, constants};
use serde::{Deserialize, Serialize};

use crate::log::{Command, LogEntry, LogIndex, Term};

/// Raft state that must survive a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardState {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
}

/// Append-only log storage with suffix truncation.
///
/// Indices are 1-based and contiguous. Index 0 always has term 0.
pub trait LogStorage<C>: Send + 'static {
    fn hard_state(&self) -> HardState;

    fn save_hard_state(&mut self, state: &HardState) -> Result<()>;

    /// Index of the last entry, 0 when empty.
    fn last_index(&self) -> LogIndex;

    /// Term of the entry at `index`; `Some(0)` for index 0, `None` past the end.
    fn term_at(&self, index: LogIndex) -> Option<Term>;

    fn entry(&self, index: LogIndex) -> Option<LogEntry<C>>;

    /// Up to `max` entries starting at `from` (inclusive).
    fn entries(&self, from: LogIndex, max: usize) -> Vec<LogEntry<C>>;

    /// Append entries; the first must sit at `last_index() + 1`.
    fn append(&mut self, entries: &[LogEntry<C>]) -> Result<()>;

    /// Remove every entry at or after `index`.
    fn truncate_from(&mut self, index: LogIndex) -> Result<()>;

    fn last_term(&self) -> Term {
        self.term_at(self.last_index()).unwrap_or(0)
    }
}

fn check_contiguous<C>(last: LogIndex, entries: &[LogEntry<C>]) -> Result<()> {
    for (offset, entry) in entries.iter().enumerate() {
        let expected = last + 1 + offset as u64;
        if entry.index != expected {
            return Err(NotaryError::LogInconsistency {
                reason: format!("append expected index {expected}, got {}", entry.index),
            });
        }
    }
    Ok(())
}

fn slice_entries<C: Clone>(log: &[LogEntry<C>], from: LogIndex, max: usize) -> Vec<LogEntry<C>> {
    if from == 0 {
        return slice_entries(log, 1, max);
    }
    let start = usize::try_from(from - 1).unwrap_or(usize::MAX);
    log.iter().skip(start).take(max).cloned().collect()
}

fn term_in<C>(log: &[LogEntry<C>], index: LogIndex) -> Option<Term> {
    if index == 0 {
        return Some(0);
    }
    let pos = usize::try_from(index - 1).ok()?;
    log.get(pos).map(|e| e.term)
}

// ---------------------------------------------------------------------------
// MemoryLogStorage
// ---------------------------------------------------------------------------

/// Volatile storage for tests and single-process demos.
#[derive(Debug, Clone)]
pub struct MemoryLogStorage<C> {
    hard_state: HardState,
    log: Vec<LogEntry<C>>,
}

impl<C> MemoryLogStorage<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            hard_state: HardState::default(),
            log: Vec::new(),
        }
    }
}

impl<C> Default for MemoryLogStorage<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Command> LogStorage<C> for MemoryLogStorage<C> {
    fn hard_state(&self) -> HardState {
        self.hard_state.clone()
    }

    fn save_hard_state(&mut self, state: &HardState) -> Result<()> {
        self.hard_state = state.clone();
        Ok(())
    }

    fn last_index(&self) -> LogIndex {
        self.log.len() as u64
    }

    fn term_at(&self, index: LogIndex) -> Option<Term> {
        term_in(&self.log, index)
    }

    fn entry(&self, index: LogIndex) -> Option<LogEntry<C>> {
        let pos = usize::try_from(index.checked_sub(1)?).ok()?;
        self.log.get(pos).cloned()
    }

    fn entries(&self, from: LogIndex, max: usize) -> Vec<LogEntry<C>> {
        slice_entries(&self.log, from, max)
    }

    fn append(&mut self, entries: &[LogEntry<C>]) -> Result<()> {
        check_contiguous(self.last_index(), entries)?;
        self.log.extend_from_slice(entries);
        Ok(())
    }

    fn truncate_from(&mut self, index: LogIndex) -> Result<()> {
        let keep = usize::try_from(index.saturating_sub(1)).unwrap_or(usize::MAX);
        self.log.truncate(keep);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileLogStorage
// ---------------------------------------------------------------------------

/// File-backed storage: one JSON document per entry line, plus a hard-state
/// file replaced atomically (write temp, fsync, rename).
///
/// The whole log is cached in memory; the files are the durable copy that
/// is reloaded on restart. A final line left torn by a crash mid-append was
/// never acknowledged and is cut off on reopen; damage before the final
/// line is refused.
pub struct FileLogStorage<C> {
    dir: PathBuf,
    entries_path: PathBuf,
    state_path: PathBuf,
    entries_file: File,
    hard_state: HardState,
    log: Vec<LogEntry<C>>,
}

impl<C: Command> FileLogStorage<C> {
    /// Open (or create) the storage under `data_dir`, reloading any
    /// previously persisted state.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)?;
        let entries_path = dir.join(constants::LOG_ENTRIES_FILE);
        let state_path = dir.join(constants::HARD_STATE_FILE);

        let hard_state = if state_path.exists() {
            serde_json::from_slice(&fs::read(&state_path)?)?
        } else {
            HardState::default()
        };

        let log = if entries_path.exists() {
            Self::replay(&entries_path)?
        } else {
            Vec::new()
        };

        let entries_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&entries_path)?;
        fsync_dir(dir)?;

        tracing::info!(
            path = %dir.display(),
            term = hard_state.current_term,
            entries = log.len(),
            "Opened file log storage"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            entries_path,
            state_path,
            entries_file,
            hard_state,
            log,
        })
    }

    /// Decode every line of `path`, truncating a torn final line.
    fn replay(path: &Path) -> Result<Vec<LogEntry<C>>> {
        let bytes = fs::read(path)?;
        let mut log: Vec<LogEntry<C>> = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let rest = &bytes[offset..];
            let (line, next, terminated) = match rest.iter().position(|b| *b == b'\n') {
                Some(end) => (&rest[..end], offset + end + 1, true),
                None => (rest, bytes.len(), false),
            };
            if line.iter().all(u8::is_ascii_whitespace) {
                offset = next;
                continue;
            }

            let is_last = bytes[next..].iter().all(u8::is_ascii_whitespace);
            let decoded = if terminated {
                serde_json::from_slice::<LogEntry<C>>(line).map_err(|e| e.to_string())
            } else {
                Err("line has no terminator".to_string())
            };
            match decoded {
                Ok(entry) => {
                    check_contiguous(log.len() as u64, std::slice::from_ref(&entry))?;
                    log.push(entry);
                }
                Err(reason) if is_last => {
                    tracing::warn!(
                        path = %path.display(),
                        after_index = log.len(),
                        dropped_bytes = bytes.len() - offset,
                        reason = %reason,
                        "Truncating torn log tail"
                    );
                    let file = OpenOptions::new().write(true).open(path)?;
                    file.set_len(offset as u64)?;
                    file.sync_all()?;
                    break;
                }
                Err(reason) => {
                    return Err(NotaryError::LogStorage(format!(
                        "corrupt entry after index {} in {}: {reason}",
                        log.len(),
                        path.display()
                    )));
                }
            }
            offset = next;
        }
        Ok(log)
    }

    fn encode(entry: &LogEntry<C>) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        Ok(line)
    }
}

impl<C: Command> LogStorage<C> for FileLogStorage<C> {
    fn hard_state(&self) -> HardState {
        self.hard_state.clone()
    }

    fn save_hard_state(&mut self, state: &HardState) -> Result<()> {
        let data = serde_json::to_vec_pretty(state)?;
        let tmp_path = self.state_path.with_extension("json.tmp");
        replace_durably(&self.dir, &self.state_path, &tmp_path, &data)?;
        self.hard_state = state.clone();
        Ok(())
    }

    fn last_index(&self) -> LogIndex {
        self.log.len() as u64
    }

    fn term_at(&self, index: LogIndex) -> Option<Term> {
        term_in(&self.log, index)
    }

    fn entry(&self, index: LogIndex) -> Option<LogEntry<C>> {
        let pos = usize::try_from(index.checked_sub(1)?).ok()?;
        self.log.get(pos).cloned()
    }

    fn entries(&self, from: LogIndex, max: usize) -> Vec<LogEntry<C>> {
        slice_entries(&self.log, from, max)
    }

    fn append(&mut self, entries: &[LogEntry<C>]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        check_contiguous(self.last_index(), entries)?;
        let mut buf = Vec::new();
        for entry in entries {
            buf.extend(Self::encode(entry)?);
        }
        self.entries_file.write_all(&buf)?;
        self.entries_file.sync_data()?;
        self.log.extend_from_slice(entries);
        Ok(())
    }

    fn truncate_from(&mut self, index: LogIndex) -> Result<()> {
        let keep = usize::try_from(index.saturating_sub(1)).unwrap_or(usize::MAX);
        if keep >= self.log.len() {
            return Ok(());
        }
        self.log.truncate(keep);

        let mut buf = Vec::new();
        for entry in &self.log {
            buf.extend(Self::encode(entry)?);
        }
        replace_durably(
            &self.dir,
            &self.entries_path,
            &self.entries_path.with_extension("jsonl.tmp"),
            &buf,
        )?;
        self.entries_file = OpenOptions::new().append(true).open(&self.entries_path)?;

        tracing::warn!(from = index, remaining = self.log.len(), "Truncated log suffix");
        Ok(())
    }
}

/// Write `data` to `tmp_path`, fsync it, rename it over `path` and fsync
/// the directory.
fn replace_durably(dir: &Path, path: &Path, tmp_path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(tmp_path, path)?;
    fsync_dir(dir)
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::log::EntryPayload;

    fn entry(index: LogIndex, term: Term, cmd: &str) -> LogEntry<String> {
        LogEntry {
            index,
            term,
            leader: NodeId::from_bytes([1; 32]),
            proposed_at: Utc::now(),
            payload: EntryPayload::Command(cmd.to_string()),
        }
    }

    #[test]
    fn empty_log_sentinel() {
        let store = MemoryLogStorage::<String>::new();
        assert_eq!(store.last_index(), 0);
        assert_eq!(store.last_term(), 0);
        assert_eq!(store.term_at(0), Some(0));
        assert_eq!(store.term_at(1), None);
        assert!(store.entry(0).is_none());
    }

    #[test]
    fn append_must_be_contiguous() {
        let mut store = MemoryLogStorage::new();
        store.append(&[entry(1, 1, "a"), entry(2, 1, "b")]).unwrap();
        let err = store.append(&[entry(4, 1, "d")]).unwrap_err();
        assert!(matches!(err, NotaryError::LogInconsistency { .. }));
        assert_eq!(store.last_index(), 2);
    }

    #[test]
    fn truncate_drops_suffix() {
        let mut store = MemoryLogStorage::new();
        store
            .append(&[entry(1, 1, "a"), entry(2, 1, "b"), entry(3, 2, "c")])
            .unwrap();
        store.truncate_from(2).unwrap();
        assert_eq!(store.last_index(), 1);
        assert_eq!(store.last_term(), 1);
        store.append(&[entry(2, 3, "b'")]).unwrap();
        assert_eq!(store.term_at(2), Some(3));
    }

    #[test]
    fn entries_window() {
        let mut store = MemoryLogStorage::new();
        store
            .append(&[entry(1, 1, "a"), entry(2, 1, "b"), entry(3, 1, "c")])
            .unwrap();
        let window = store.entries(2, 10);
        assert_eq!(window.iter().map(|e| e.index).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(store.entries(1, 1).len(), 1);
        assert!(store.entries(4, 10).is_empty());
    }

    #[test]
    fn file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = FileLogStorage::<String>::open(dir.path()).unwrap();
            store
                .save_hard_state(&HardState {
                    current_term: 4,
                    voted_for: Some(NodeId::from_bytes([2; 32])),
                })
                .unwrap();
            store.append(&[entry(1, 1, "a"), entry(2, 4, "b")]).unwrap();
        }

        let store = FileLogStorage::<String>::open(dir.path()).unwrap();
        assert_eq!(store.hard_state().current_term, 4);
        assert_eq!(store.hard_state().voted_for, Some(NodeId::from_bytes([2; 32])));
        assert_eq!(store.last_index(), 2);
        assert_eq!(store.last_term(), 4);
        assert_eq!(
            store.entry(2).map(|e| e.payload),
            Some(EntryPayload::Command("b".to_string()))
        );
    }

    #[test]
    fn file_storage_truncation_is_durable() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = FileLogStorage::<String>::open(dir.path()).unwrap();
            store
                .append(&[entry(1, 1, "a"), entry(2, 1, "b"), entry(3, 1, "c")])
                .unwrap();
            store.truncate_from(2).unwrap();
            store.append(&[entry(2, 2, "x")]).unwrap();
        }

        let store = FileLogStorage::<String>::open(dir.path()).unwrap();
        assert_eq!(store.last_index(), 2);
        assert_eq!(store.term_at(2), Some(2));
        assert_eq!(
            store.entry(2).map(|e| e.payload),
            Some(EntryPayload::Command("x".to_string()))
        );
    }

    fn write_raw(dir: &Path, bytes: &[u8]) {
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.join(constants::LOG_ENTRIES_FILE))
            .unwrap();
        file.write_all(bytes).unwrap();
    }

    #[test]
    fn torn_tail_is_cut_off_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = FileLogStorage::<String>::open(dir.path()).unwrap();
            store.append(&[entry(1, 1, "a")]).unwrap();
        }
        write_raw(dir.path(), br#"{"index":2,"term":1,"lea"#);

        {
            let mut store = FileLogStorage::<String>::open(dir.path()).unwrap();
            assert_eq!(store.last_index(), 1);
            store.append(&[entry(2, 1, "b")]).unwrap();
        }

        let store = FileLogStorage::<String>::open(dir.path()).unwrap();
        assert_eq!(store.last_index(), 2);
        assert_eq!(
            store.entry(2).map(|e| e.payload),
            Some(EntryPayload::Command("b".to_string()))
        );
    }

    #[test]
    fn garbled_final_line_is_cut_off() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = FileLogStorage::<String>::open(dir.path()).unwrap();
            store.append(&[entry(1, 1, "a"), entry(2, 1, "b")]).unwrap();
        }
        write_raw(dir.path(), b"\0\0\0\0\n");

        let store = FileLogStorage::<String>::open(dir.path()).unwrap();
        assert_eq!(store.last_index(), 2);
    }

    #[test]
    fn corruption_before_the_tail_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = FileLogStorage::<String>::open(dir.path()).unwrap();
            store.append(&[entry(1, 1, "a")]).unwrap();
        }
        write_raw(dir.path(), b"not json\n");
        let mut good = serde_json::to_vec(&entry(2, 1, "b")).unwrap();
        good.push(b'\n');
        write_raw(dir.path(), &good);

        let err = FileLogStorage::<String>::open(dir.path()).err().unwrap();
        assert!(matches!(err, NotaryError::LogStorage(_)), "got {err:?}");
    }
}
