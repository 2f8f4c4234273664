//! End-to-end replication between a hub and a spoke.

use anyhow::Result;
use proptest::prelude::*;

use replica::core::SessionState;
use replica::store::SqliteStore;
use replica::sync::{FetchLimits, LocalPeer, SyncConfig};
use replica::{Coordinator, CoordinatorConfig};
use replica_testkit::fixtures::{TestFixture, HUB_NODE, SPOKE_NODE};
use replica_testkit::generators;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn coordinator(fixture: &TestFixture, config: CoordinatorConfig) -> Coordinator<SqliteStore> {
    Coordinator::new(fixture.store.clone(), fixture.local.clone(), config)
}

fn peer(fixture: &TestFixture) -> LocalPeer<SqliteStore> {
    LocalPeer::new(fixture.store.clone(), fixture.local.clone())
}

fn paged(max_group_bytes_size: u64, max_msgs: u32) -> CoordinatorConfig {
    CoordinatorConfig {
        sync: SyncConfig {
            fetch: FetchLimits {
                max_group_bytes_size,
                max_msgs,
            },
            ..SyncConfig::default()
        },
    }
}

#[tokio::test]
async fn test_hub_and_spoke_converge_both_ways() -> Result<()> {
    init_tracing();
    let hub = TestFixture::new(HUB_NODE, SPOKE_NODE).await?;
    let spoke = TestFixture::new(SPOKE_NODE, HUB_NODE).await?;

    hub.put_contact("c1", "Smith", 6).await?;
    hub.put_contact("c2", "Jones", 5).await?;
    hub.put_note("n1", b"call back").await?;
    spoke.put_contact("c3", "Brown", 7).await?;
    spoke.put_note("n2", b"water the plants").await?;

    let hub_coordinator = coordinator(&hub, paged(50, 1));
    let spoke_coordinator = coordinator(&spoke, paged(50, 1));

    let pushed = hub_coordinator
        .sync_with_named("hub", "spoke1", &peer(&spoke))
        .await?;
    assert_eq!(pushed.fast_batch, 3);

    let pulled = spoke_coordinator
        .sync_with_named("spoke1", "hub", &peer(&hub))
        .await?;
    assert_eq!(pulled.queued, 2);
    assert_eq!(pulled.fast_batch, 2);

    assert!(hub_coordinator.verify_with(&spoke.store).await?.is_converged());
    assert_eq!(
        hub_coordinator.session(&hub.pair).await?.state,
        SessionState::Inactive
    );
    Ok(())
}

#[tokio::test]
async fn test_concurrent_edits_surface_as_conflict() -> Result<()> {
    init_tracing();
    let hub = TestFixture::new(HUB_NODE, SPOKE_NODE).await?;
    let spoke = TestFixture::new(SPOKE_NODE, HUB_NODE).await?;
    let hub_coordinator = coordinator(&hub, CoordinatorConfig::default());
    let spoke_coordinator = coordinator(&spoke, CoordinatorConfig::default());

    hub.put_contact("c1", "Smith", 6).await?;
    hub_coordinator.sync_with(&hub.pair, &peer(&spoke)).await?;

    // Both sides edit the same contact before either syncs again.
    hub.put_contact("c1", "Smith", 7).await?;
    spoke.put_contact("c1", "Smithe", 6).await?;

    // Neither side still holds the version the other last saw.
    let report = spoke_coordinator.sync_with(&spoke.pair, &peer(&hub)).await?;
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.fast_batch, 0);

    let report = hub_coordinator.sync_with(&hub.pair, &peer(&spoke)).await?;
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.fast_batch, 0);

    for fixture in [&hub, &spoke] {
        let state = fixture
            .store
            .peer_state(&fixture.remote, "Contact", &"c1".into())
            .await?
            .expect("peer row exists");
        assert!(state.is_conflict);
    }
    assert!(!hub_coordinator.verify_with(&spoke.store).await?.is_converged());
    Ok(())
}

#[tokio::test]
async fn test_file_backed_stores_replicate() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let hub =
        TestFixture::with_store(SqliteStore::open(dir.path().join("hub.db"))?, HUB_NODE, SPOKE_NODE)
            .await?;
    let spoke = TestFixture::with_store(
        SqliteStore::open(dir.path().join("spoke.db"))?,
        SPOKE_NODE,
        HUB_NODE,
    )
    .await?;

    for i in 0..20 {
        hub.put_contact(&format!("c{:02}", i), "Doe", 5 + i % 3).await?;
    }

    let report = coordinator(&hub, paged(200, 2))
        .sync_with(&hub.pair, &peer(&spoke))
        .await?;
    assert_eq!(report.queued, 20);
    assert_eq!(report.fast_batch, 20);
    assert!(report.batches > 1);

    // Reopen the spoke and check the records survived.
    drop(spoke);
    let reopened = SqliteStore::open(dir.path().join("spoke.db"))?;
    assert!(coordinator(&hub, CoordinatorConfig::default())
        .verify_with(&reopened)
        .await?
        .is_converged());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_any_contact_set_converges(
        contacts in generators::contacts(12),
        budget in 1u64..400,
        max_msgs in 1u32..5,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let hub = TestFixture::new(HUB_NODE, SPOKE_NODE).await.unwrap();
            let spoke = TestFixture::new(SPOKE_NODE, HUB_NODE).await.unwrap();
            for (id, last_name, height) in &contacts {
                hub.put_contact(id, last_name, *height).await.unwrap();
            }

            let report = coordinator(&hub, paged(budget, max_msgs))
                .sync_with(&hub.pair, &peer(&spoke))
                .await
                .unwrap();

            prop_assert_eq!(report.fast_batch, contacts.len());
            prop_assert_eq!(report.records_sent, contacts.len());
            let result = coordinator(&hub, CoordinatorConfig::default())
                .verify_with(&spoke.store)
                .await
                .unwrap();
            prop_assert!(result.is_converged());
            Ok(())
        })?;
    }
}
