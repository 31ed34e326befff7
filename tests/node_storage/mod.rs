use std::collections::BTreeMap;

use quorum_storage::open_node_storage;
use quorum_storage::Configuration;
use quorum_storage::ConfigurationHistory;
use quorum_storage::Error;
use quorum_storage::LogEntry;
use quorum_storage::LogStorage;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use tempfile::TempDir;

use crate::common::data_entry;
use crate::common::disk_configs;
use crate::common::peer;

#[test]
fn node_state_survives_restart() -> Result<(), Error> {
    let root = TempDir::new()?;
    for (backend, config) in disk_configs(root.path()) {
        let initial = Configuration::new([peer(9081), peer(9082), peer(9083)]);
        let joint = Configuration::new([peer(9081), peer(9082), peer(9083), peer(9084)]);

        let node = open_node_storage(&config, &mut ConfigurationHistory::new())?;
        node.stable.set_term_and_votedfor(1, &peer(9081))?;
        node.log.append_entries(vec![
            LogEntry::configuration(1, 1, &initial)?,
            LogEntry::no_op(2, 1),
            data_entry(3, 1),
        ])?;
        node.stable.set_term_and_votedfor(2, &peer(9082))?;
        node.log.append_entries(vec![LogEntry::configuration(4, 2, &joint)?, data_entry(5, 2)])?;

        // The new leader at term 3 overwrites the uncommitted tail.
        node.stable.set_term(3)?;
        node.log.truncate_suffix(3)?;
        node.log.append_entry(data_entry(4, 3))?;
        drop(node);

        let mut history = ConfigurationHistory::new();
        let node = open_node_storage(&config, &mut history)?;
        assert_eq!(node.log.first_log_index(), 1, "{backend}");
        assert_eq!(node.log.last_log_index(), 4, "{backend}");
        assert_eq!(node.log.get_term(4)?, Some(3), "{backend}");
        assert_eq!(node.log.get_entry(5)?, None, "{backend}");
        assert_eq!(history.indexes(), vec![1], "{backend}");
        assert_eq!(history.last(), Some(&(1, initial)), "{backend}");
        assert_eq!(node.stable.get_term()?, 3, "{backend}");
        assert_eq!(node.stable.get_votedfor()?, None, "{backend}");
    }
    Ok(())
}

/// Drives random appends and truncations against a model, restarting the
/// node every few steps.
#[test]
fn random_workload_matches_model_across_restarts() -> Result<(), Error> {
    let root = TempDir::new()?;
    for (backend, config) in disk_configs(root.path()) {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut model: BTreeMap<u64, LogEntry> = BTreeMap::new();
        let mut first = 1u64;
        let mut term = 1u64;

        let mut node = open_node_storage(&config, &mut ConfigurationHistory::new())?;
        for step in 0..120 {
            let last = first + model.len() as u64 - 1;
            match rng.gen_range(0..10) {
                0..=5 => {
                    if rng.gen_bool(0.2) {
                        term += 1;
                    }
                    let count = rng.gen_range(1..=6);
                    let batch: Vec<LogEntry> = (last + 1..=last + count)
                        .map(|i| {
                            let len = rng.gen_range(0..200);
                            LogEntry::data(i, term, vec![(i % 251) as u8; len])
                        })
                        .collect();
                    assert_eq!(node.log.append_entries(batch.clone())?, batch.len());
                    model.extend(batch.into_iter().map(|e| (e.index, e)));
                }
                6..=7 => {
                    let keep = rng.gen_range(first - 1..=last);
                    node.log.truncate_suffix(keep)?;
                    model.retain(|i, _| *i <= keep);
                }
                _ => {
                    let keep = rng.gen_range(first..=last + 1);
                    node.log.truncate_prefix(keep)?;
                    model.retain(|i, _| *i >= keep);
                    first = first.max(keep);
                }
            }

            if step % 15 == 14 {
                drop(node);
                node = open_node_storage(&config, &mut ConfigurationHistory::new())?;
            }
            check_against_model(node.log.as_ref(), first, &model, backend, step);
        }
    }
    Ok(())
}

fn check_against_model(
    log: &dyn LogStorage,
    first: u64,
    model: &BTreeMap<u64, LogEntry>,
    backend: &str,
    step: usize,
) {
    assert_eq!(log.first_log_index(), first, "{backend} step {step}");
    assert_eq!(log.last_log_index(), first + model.len() as u64 - 1, "{backend} step {step}");
    for (index, entry) in model {
        assert_eq!(log.get_entry(*index).unwrap().as_ref(), Some(entry), "{backend} step {step}");
    }
    assert_eq!(log.get_entry(first.saturating_sub(1)).unwrap(), None);
}

#[test]
fn reset_after_snapshot_install_survives_restart() -> Result<(), Error> {
    let root = TempDir::new()?;
    for (backend, config) in disk_configs(root.path()) {
        let node = open_node_storage(&config, &mut ConfigurationHistory::new())?;
        node.log.append_entries((1..=10).map(|i| data_entry(i, 1)).collect())?;
        node.log.reset(101)?;
        node.log.append_entry(data_entry(101, 4))?;
        drop(node);

        let node = open_node_storage(&config, &mut ConfigurationHistory::new())?;
        assert_eq!(node.log.first_log_index(), 101, "{backend}");
        assert_eq!(node.log.last_log_index(), 101, "{backend}");
        assert_eq!(node.log.get_entry(10)?, None, "{backend}");
        assert_eq!(node.log.get_term(101)?, Some(4), "{backend}");
    }
    Ok(())
}
