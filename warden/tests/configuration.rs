mod common;

use color_eyre::{eyre::eyre, Result};
use warden::{
    config::{LoadState, ReloadOutcome},
    rotation::{KeyRotation, RotationOutcome},
    store::StoreExt,
};

use common::{app_json, record, world};

#[tokio::test]
async fn a_newer_revision_is_picked_up_by_subscribers() -> Result<()> {
    let w = world(1_000, app_json(100, 3600)).await?;
    let mut updates = w.config.subscribe();

    w.store.merge(&record(7, app_json(25, 120))).await?;

    let outcome = w.config.reload().await.completed().ok_or_else(|| eyre!("skipped"))??;
    assert_eq!(outcome, ReloadOutcome::Reloaded { revision: 7 });
    assert_eq!(w.config.load_state(), LoadState::Loaded);

    assert!(updates.has_changed()?);
    let snapshot = updates.borrow_and_update().clone();
    assert_eq!(snapshot.app.uma_rpt_lifetime, 120);
    assert_eq!(snapshot.app.cleanup_batch_size, 25);
    assert_eq!(snapshot.revision, Some(7));

    let again = w.config.reload().await.completed().ok_or_else(|| eyre!("skipped"))??;
    assert_eq!(again, ReloadOutcome::Current);
    Ok(())
}

#[tokio::test]
async fn rotation_builds_on_a_revision_written_elsewhere() -> Result<()> {
    let w = world(1_000, app_json(100, 3600)).await?;
    let rotation = KeyRotation::new(w.config.clone(), w.provider.clone());

    w.store.merge(&record(5, app_json(100, 3600))).await?;

    let outcome = rotation.rotate().await.completed().ok_or_else(|| eyre!("skipped"))??;
    assert_eq!(
        outcome,
        RotationOutcome::Rotated { revision: 6, generated: 1, pruned: 0 }
    );

    // The rotation was based on a revision this manager never loaded, so
    // the next check still reads the record in full.
    assert_eq!(w.config.loaded_revision(), Some(1));
    let reload = w.config.reload().await.completed().ok_or_else(|| eyre!("skipped"))??;
    assert_eq!(reload, ReloadOutcome::Reloaded { revision: 6 });
    assert_eq!(w.config.snapshot().jwks.len(), 1);
    Ok(())
}
