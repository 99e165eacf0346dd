use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;

use segrank::error::Result;
use segrank::ranking::{InitOutcome, RankCoordinator, RankingConfig};
use segrank::storage::file::{FileCounterStore, FileCounterStoreConfig, JOURNAL_FILE};
use segrank::storage::memory::{MemoryProfileStore, MemoryScoreStore};
use segrank::storage::traits::ExactScoreStore;
use tempfile::TempDir;

fn open_coordinator(
    dir: &TempDir,
    exact: Arc<MemoryScoreStore>,
) -> Result<(RankCoordinator, Arc<FileCounterStore>)> {
    let store = Arc::new(FileCounterStore::open(
        FileCounterStoreConfig::new(dir.path()).checkpoint_interval(0),
    )?);
    let config = RankingConfig::builder().max_score(1000).min_leaf_width(100).build()?;
    let coordinator = RankCoordinator::new(
        config,
        store.clone(),
        exact,
        Arc::new(MemoryProfileStore::new()),
    )?;
    Ok((coordinator, store))
}

#[test]
fn test_counters_survive_restart() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let exact = Arc::new(MemoryScoreStore::new());
    exact.upsert("seed", 10.0)?;

    // First run: cold start, then a few score changes without a checkpoint.
    let before = {
        let (coordinator, store) = open_coordinator(&dir, exact.clone())?;
        assert!(matches!(coordinator.initialize()?, InitOutcome::Rebuilt(_)));

        for (member, score) in [("a", 50.0), ("b", 150.0), ("c", 150.0), ("d", 950.0)] {
            coordinator.on_score_change(member, score)?;
        }
        assert_eq!(store.journal_records(), 4);
        coordinator.index().leaf_counts()?
    };

    // Restart: the journal is replayed and no rebuild is needed.
    let (coordinator, store) = open_coordinator(&dir, exact)?;
    match coordinator.initialize()? {
        InitOutcome::Reused { stored_counters } => assert_eq!(stored_counters, 19),
        other => panic!("expected persisted counters, got {other:?}"),
    }
    assert_eq!(coordinator.index().leaf_counts()?, before);
    assert_eq!(coordinator.index().total_members()?, 5);
    assert_eq!(store.last_seq(), 5);
    assert!(coordinator.verify()?.is_healthy());
    Ok(())
}

#[test]
fn test_torn_batch_is_all_or_nothing() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let exact = Arc::new(MemoryScoreStore::new());

    {
        let (coordinator, _) = open_coordinator(&dir, exact.clone())?;
        coordinator.initialize()?;
        coordinator.on_score_change("a", 150.0)?;
        coordinator.on_score_change("b", 250.0)?;
    }

    // A crash in the middle of the next record leaves only part of it on disk.
    let journal = dir.path().join(JOURNAL_FILE);
    let intact = fs::read(&journal).unwrap();
    let first_len = 8 + u32::from_le_bytes(intact[0..4].try_into().unwrap()) as usize;
    let partial = intact[..first_len - 3].to_vec();
    let mut file = OpenOptions::new().append(true).open(&journal).unwrap();
    file.write_all(&partial).unwrap();
    drop(file);

    let (coordinator, _) = open_coordinator(&dir, exact)?;
    assert_eq!(coordinator.index().total_members()?, 2);
    assert!(coordinator.verify()?.is_healthy());
    assert_eq!(fs::read(&journal).unwrap(), intact);
    Ok(())
}

#[test]
fn test_rebuild_is_persisted_as_snapshot() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let exact = Arc::new(MemoryScoreStore::new());
    for i in 0..40 {
        exact.upsert(&format!("m{i}"), (i * 25) as f64)?;
    }

    {
        let (coordinator, store) = open_coordinator(&dir, exact.clone())?;
        coordinator.index().insert_member(999.0)?;
        let report = coordinator.rebuild()?;
        assert_eq!(report.members_scanned, 40);
        assert_eq!(store.journal_records(), 0);
        assert!(store.snapshot_info()?.is_some());
    }

    let (coordinator, _) = open_coordinator(&dir, exact)?;
    assert_eq!(coordinator.index().total_members()?, 40);
    let rank = coordinator.report("m39")?;
    assert_eq!((rank.rank, rank.exact), (1, true));
    Ok(())
}
