#![forbid(unsafe_code)]

use tracing::{debug, warn};

use crate::primitives::memory::MemoryTracker;
use crate::primitives::wal::scan_log;
use crate::storage::{read_meta, DatabaseLayout};

use super::error::{ConsistencyCheckIncomplete, Result};

/// Number of log frames newer than the store's last committed transaction,
/// or `None` when nothing needs replaying.
pub fn recovery_required(
    layout: &DatabaseLayout,
    memory: &MemoryTracker,
) -> crate::types::Result<Option<usize>> {
    let meta = read_meta(&layout.meta_store())?;
    let Some(tail) = scan_log(&layout.wal(), memory)? else {
        return Ok(None);
    };
    let unapplied = tail.unapplied_after(meta.last_committed_tx);
    debug!(
        last_committed_tx = meta.last_committed_tx.0,
        log_frames = tail.frames,
        unapplied,
        torn_tail = tail.torn_tail,
        "recovery.inspected"
    );
    Ok((unapplied > 0).then_some(unapplied))
}

/// Fails unless the store is fully recovered.
///
/// Runs before any store is opened for checking. Every failure, including
/// I/O errors while inspecting the log, surfaces as an incomplete check.
pub fn assert_recovered(layout: &DatabaseLayout, memory: &MemoryTracker) -> Result<()> {
    match recovery_required(layout, memory)? {
        None => Ok(()),
        Some(unapplied) => {
            warn!(
                db = %layout.dir().display(),
                unapplied,
                "consistency.recovery_required"
            );
            Err(ConsistencyCheckIncomplete::unrecovered(&layout.wal(), unapplied))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::wal::LogWriter;
    use crate::storage::StoreBuilder;
    use crate::types::TxId;
    use tempfile::tempdir;

    fn database(dir: &std::path::Path) -> DatabaseLayout {
        let layout = DatabaseLayout::new(dir.join("db"));
        let mut builder = StoreBuilder::new();
        builder.node(None);
        builder.last_committed_tx(TxId(5));
        builder.write(&layout).unwrap();
        layout
    }

    #[test]
    fn checkpointed_log_needs_no_recovery() {
        let dir = tempdir().unwrap();
        let layout = database(dir.path());
        let mut log = LogWriter::create(&layout.wal(), TxId(1)).unwrap();
        for tx in 1..=5 {
            log.append(TxId(tx), b"applied").unwrap();
        }
        log.sync().unwrap();
        assert_recovered(&layout, &MemoryTracker::unlimited()).unwrap();
    }

    #[test]
    fn newer_frames_require_recovery() {
        let dir = tempdir().unwrap();
        let layout = database(dir.path());
        let mut log = LogWriter::open_append(&layout.wal()).unwrap();
        log.append(TxId(6), b"pending").unwrap();
        log.append(TxId(7), b"pending").unwrap();
        log.sync().unwrap();

        let err = assert_recovered(&layout, &MemoryTracker::unlimited()).unwrap_err();
        assert!(err.is_unrecovered());
        assert!(err.to_string().contains("Please recover database."));
        assert!(matches!(
            err.cause(),
            super::super::IncompleteCause::Unrecovered { unapplied: 2, .. }
        ));
    }

    #[test]
    fn unreadable_log_is_incomplete_not_unrecovered() {
        let dir = tempdir().unwrap();
        let layout = database(dir.path());
        std::fs::write(layout.wal(), b"garbage that is not a log header....").unwrap();
        let err = assert_recovered(&layout, &MemoryTracker::unlimited()).unwrap_err();
        assert!(!err.is_unrecovered());
    }

    #[test]
    fn missing_log_means_nothing_to_recover() {
        let dir = tempdir().unwrap();
        let layout = database(dir.path());
        std::fs::remove_file(layout.wal()).unwrap();
        assert_eq!(
            recovery_required(&layout, &MemoryTracker::unlimited()).unwrap(),
            None
        );
    }
}
