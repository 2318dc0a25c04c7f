use super::*;

#[test]
fn remove_deletes_metadata_and_disk_objects() -> Result<()> {
    let (temp, store) = new_store()?;
    let key = ingest(&store, &image_manifest("example.com/app", &[], vec![]), &[], false)?;
    assert!(blob_path(temp.path(), &key).is_file());

    store.remove_aci(&key)?;

    let err = store.resolve_key(&key).unwrap_err();
    assert!(matches!(store_error(&err), StoreError::KeyNotFound(_)));
    let err = store.get_image_manifest(&key).unwrap_err();
    assert!(matches!(store_error(&err), StoreError::KeyNotFound(_)));
    assert!(!blob_path(temp.path(), &key).exists());
    assert_eq!(store.blob_keys().count(), 0);
    Ok(())
}

#[test]
fn removing_a_missing_key_is_not_found() -> Result<()> {
    let (_temp, store) = new_store()?;
    let err = store.remove_aci(&fake_key("ab")).unwrap_err();
    assert!(matches!(store_error(&err), StoreError::KeyNotFound(_)));
    Ok(())
}

#[test]
fn removing_a_malformed_key_is_a_bad_key() -> Result<()> {
    let (_temp, store) = new_store()?;
    let err = store.remove_aci("sha512-nothex").unwrap_err();
    assert!(matches!(store_error(&err), StoreError::BadKey { .. }));
    Ok(())
}

#[test]
fn partial_erase_reports_store_removal_but_the_image_is_gone() -> Result<()> {
    let (temp, store) = new_store()?;
    let key = ingest(&store, &image_manifest("example.com/app", &[], vec![]), &[], false)?;

    // Make the blob unremovable-as-a-file: swap it for a non-empty
    // directory, so the erase fails regardless of privileges.
    let blob = blob_path(temp.path(), &key);
    fs::remove_file(&blob)?;
    fs::create_dir(&blob)?;
    fs::write(blob.join("stale"), b"x")?;

    let err = store.remove_aci(&key).unwrap_err();
    match store_error(&err) {
        StoreError::StoreRemoval { errors } => {
            assert_eq!(errors.len(), 1, "only the blob erase failed: {errors:?}");
            assert!(errors[0].starts_with("blob:"));
        }
        other => panic!("expected StoreRemoval, got {other:?}"),
    }

    // The db is authoritative: the image is removed even though a stale
    // blob entry is left behind for a future gc.
    let err = store.resolve_key(&key).unwrap_err();
    assert!(matches!(store_error(&err), StoreError::KeyNotFound(_)));
    Ok(())
}

#[test]
fn remove_does_not_block_on_readers_of_other_keys() -> Result<()> {
    let (_temp, store) = new_store()?;
    let key = ingest(&store, &image_manifest("example.com/app", &[], vec![]), &[], false)?;
    let other = ingest(&store, &image_manifest("example.com/other", &[], vec![]), &[], false)?;
    let _reader = store.read_stream(&other)?;
    store.remove_aci(&key)?;
    Ok(())
}
