//! Integration tests for snapshot persistence and the node runtime

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use tally_core::{AccountId, Amount, ManualClock};
use tally_node::{LedgerService, NodeConfig, NodeState, Origin, TallyNode};
use tally_storage::{LedgerSnapshot, SnapshotError};
use tempfile::TempDir;

fn config_in(dir: &TempDir) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.node.data_dir = dir.path().display().to_string();
    config
}

fn clock() -> Arc<ManualClock> {
    ManualClock::shared(Utc.with_ymd_and_hms(2025, 9, 1, 8, 0, 0).unwrap())
}

mod roundtrip_tests {
    use super::*;

    #[test]
    fn test_restored_ledger_behaves_identically() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let clock_a = clock();
        let (original, origin) = LedgerService::open(&config, clock_a.clone()).unwrap();
        assert!(matches!(origin, Origin::Genesis { .. }));

        let alice = AccountId::from("alice");
        let bob = AccountId::from("bob");
        original.mint(&alice, Amount::from_tokens(500), "seed").unwrap();
        original.transfer(&alice, &bob, Amount::from_tokens(120), "rent").unwrap();
        let position = original
            .stake(&alice, "basic", Amount::from_tokens(200), Some(7))
            .unwrap();
        clock_a.advance(Duration::days(3));

        let path = config.snapshot_path();
        original.save(&path).unwrap();

        let clock_b = clock();
        clock_b.advance(Duration::days(3));
        let (restored, origin) = LedgerService::open(&config, clock_b.clone()).unwrap();
        assert!(matches!(origin, Origin::Restored { .. }));
        assert_eq!(restored.stats().unwrap(), original.stats().unwrap());

        // Same operations, same results
        for clock in [&clock_a, &clock_b] {
            clock.advance(Duration::days(5));
        }
        assert_eq!(
            restored.pending_reward(position).unwrap(),
            original.pending_reward(position).unwrap()
        );
        let a = original.claim(&alice, None).unwrap();
        let b = restored.claim(&alice, None).unwrap();
        assert_eq!(a, b);

        let tx_a = original.transfer(&bob, &alice, Amount::from_tokens(10), "back").unwrap();
        let tx_b = restored.transfer(&bob, &alice, Amount::from_tokens(10), "back").unwrap();
        assert_eq!(tx_a, tx_b);
        assert_eq!(
            restored.get_balance(&alice).unwrap(),
            original.get_balance(&alice).unwrap()
        );
    }

    #[test]
    fn test_corrupt_snapshot_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let (service, _) = LedgerService::open(&config, clock()).unwrap();
        service.save(&config.snapshot_path()).unwrap();

        let path = config.snapshot_path();
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            LedgerService::open(&config, clock()),
            Err(SnapshotError::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_json_export_lists_accounts() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let (service, _) = LedgerService::open(&config, clock()).unwrap();
        service.save(&config.snapshot_path()).unwrap();

        let snapshot = LedgerSnapshot::read_from(&config.snapshot_path()).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&snapshot.to_json_pretty().unwrap()).unwrap();
        assert!(json["accounts"].get("system:staking_pool").is_some());
    }
}

mod runtime_tests {
    use super::*;

    #[tokio::test]
    async fn test_node_restarts_from_its_own_snapshot() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let alice = AccountId::from("alice");

        let mut node = TallyNode::new(config.clone()).await.unwrap();
        node.start();
        node.service()
            .mint(&alice, Amount::from_tokens(42), "seed")
            .unwrap();
        node.shutdown().await.unwrap();
        assert_eq!(node.state(), NodeState::Stopped);
        let sequence = node.service().stats().unwrap().sequence;
        drop(node);

        let node = TallyNode::new(config).await.unwrap();
        assert_eq!(node.origin(), &Origin::Restored { sequence });
        assert_eq!(
            node.service().get_balance(&alice).unwrap().available,
            Amount::from_tokens(52)
        );
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_aborts_start() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        std::fs::write(config.snapshot_path(), b"not a snapshot").unwrap();

        assert!(TallyNode::new(config).await.is_err());
    }
}
