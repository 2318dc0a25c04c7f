use super::*;

#[test]
fn latest_preferred_when_no_version_requested() -> Result<()> {
    let (_temp, store) = new_store()?;
    let a = ingest(
        &store,
        &image_manifest("example.com/app", &[("version", "1.0")], vec![]),
        &[],
        true,
    )?;
    let b = ingest(
        &store,
        &image_manifest("example.com/app", &[("version", "2.0")], vec![]),
        &[],
        false,
    )?;

    assert_eq!(store.get_aci("example.com/app", &[])?, a);
    assert_eq!(
        store.get_aci("example.com/app", &[Label::new("version", "2.0")])?,
        b
    );
    Ok(())
}

#[test]
fn all_requested_labels_must_match() -> Result<()> {
    let (_temp, store) = new_store()?;
    ingest(
        &store,
        &image_manifest(
            "example.com/app",
            &[("version", "1.0"), ("os", "linux")],
            vec![],
        ),
        &[],
        false,
    )?;

    let err = store
        .get_aci(
            "example.com/app",
            &[Label::new("os", "linux"), Label::new("arch", "amd64")],
        )
        .unwrap_err();
    assert!(matches!(store_error(&err), StoreError::KeyNotFound(_)));

    assert!(store
        .get_aci("example.com/app", &[Label::new("os", "linux")])
        .is_ok());
    Ok(())
}

#[test]
fn unknown_name_is_not_found() -> Result<()> {
    let (_temp, store) = new_store()?;
    let err = store.get_aci("example.com/ghost", &[]).unwrap_err();
    assert!(matches!(store_error(&err), StoreError::KeyNotFound(_)));
    Ok(())
}

#[test]
fn later_import_wins_ties() -> Result<()> {
    let (_temp, store) = new_store()?;
    let older = ingest(
        &store,
        &image_manifest("example.com/app", &[("os", "linux")], vec![]),
        &[("rootfs/a", b"a")],
        false,
    )?;
    let newer = ingest(
        &store,
        &image_manifest("example.com/app", &[("os", "linux")], vec![]),
        &[("rootfs/b", b"b")],
        false,
    )?;
    // Make the ordering unambiguous regardless of clock resolution.
    store.db().do_tx(|tx| {
        tx.execute(
            "UPDATE aciinfo SET importtime = 100 WHERE blobkey = ?1",
            rusqlite::params![older],
        )?;
        tx.execute(
            "UPDATE aciinfo SET importtime = 200 WHERE blobkey = ?1",
            rusqlite::params![newer],
        )?;
        Ok(())
    })?;

    assert_eq!(store.get_aci("example.com/app", &[])?, newer);
    Ok(())
}

#[test]
fn latest_preference_is_skipped_when_version_requested() -> Result<()> {
    let (_temp, store) = new_store()?;
    let marked_latest = ingest(
        &store,
        &image_manifest("example.com/app", &[("version", "1.0")], vec![]),
        &[("rootfs/a", b"a")],
        true,
    )?;
    let newer = ingest(
        &store,
        &image_manifest("example.com/app", &[("version", "1.0")], vec![]),
        &[("rootfs/b", b"b")],
        false,
    )?;
    store.db().do_tx(|tx| {
        tx.execute(
            "UPDATE aciinfo SET importtime = 100 WHERE blobkey = ?1",
            rusqlite::params![marked_latest],
        )?;
        tx.execute(
            "UPDATE aciinfo SET importtime = 200 WHERE blobkey = ?1",
            rusqlite::params![newer],
        )?;
        Ok(())
    })?;

    // With a version label in the query, `latest` carries no weight and the
    // most recent import wins.
    assert_eq!(
        store.get_aci("example.com/app", &[Label::new("version", "1.0")])?,
        newer
    );
    // Without one, the latest-marked image is preferred even though it is
    // older.
    assert_eq!(store.get_aci("example.com/app", &[])?, marked_latest);
    Ok(())
}
