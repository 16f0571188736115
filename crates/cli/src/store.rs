//! The ledger file: a JSON `LedgerSnapshot` loaded at start and written back
//! after commands that change it.
//!
//! The file has a single writer. Two processes that load the same file and
//! save it back race, and the later save drops the other's changes.

use std::io::{ErrorKind, Write};
use std::path::Path;
use std::sync::Arc;

use spendshield_ledger::{LedgerSnapshot, MemoryLedger};
use tracing::debug;

pub(crate) fn open(path: &Path) -> Result<Arc<MemoryLedger>, String> {
    let snapshot = match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice::<LedgerSnapshot>(&bytes)
            .map_err(|e| format!("invalid ledger file '{}': {e}", path.display()))?,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no ledger file, starting empty");
            LedgerSnapshot::default()
        }
        Err(e) => return Err(format!("error reading ledger '{}': {e}", path.display())),
    };
    let ledger = MemoryLedger::from_snapshot(snapshot)
        .map_err(|e| format!("invalid ledger file '{}': {e}", path.display()))?;
    Ok(Arc::new(ledger))
}

/// Write the ledger atomically: a temp file in the same directory, then a
/// rename over `path`.
pub(crate) async fn save(path: &Path, ledger: &MemoryLedger) -> Result<(), String> {
    let snapshot = ledger.snapshot().await;
    let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|e| e.to_string())?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let write_err = |e: std::io::Error| format!("error writing ledger '{}': {e}", path.display());
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(&bytes).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    debug!(
        path = %path.display(),
        vendors = snapshot.vendors.len(),
        flags = snapshot.flags.len(),
        "ledger saved"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spendshield_ledger::Ledger;

    #[tokio::test]
    async fn missing_file_opens_empty_and_save_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = open(&path).unwrap();
        assert!(ledger.list_audits(0).await.unwrap().is_empty());

        save(&path, &ledger).await.unwrap();
        assert!(path.exists());
        assert!(open(&path).is_ok());
    }

    #[tokio::test]
    async fn seeded_ledger_survives_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = MemoryLedger::from_snapshot(crate::seed::demo_snapshot()).unwrap();
        save(&path, &ledger).await.unwrap();

        let reopened = open(&path).unwrap();
        let vendor = reopened.find_vendor_by_id("VND004").await.unwrap().unwrap();
        assert_eq!(vendor.vendor_name, "Shady Enterprises LLC");
    }

    #[test]
    fn garbage_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "not json").unwrap();
        let err = open(&path).unwrap_err();
        assert!(err.starts_with("invalid ledger file"), "{err}");
    }
}
