use super::*;

fn base_image() -> ImageManifest {
    image_manifest("example.com/base", &[("version", "1.0")], vec![])
}

fn app_image(dep: Dependency) -> ImageManifest {
    image_manifest("example.com/app", &[("version", "1.0")], vec![dep])
}

fn dep_by_name(name: &str) -> Dependency {
    Dependency {
        image_name: name.to_string(),
        image_id: None,
        labels: vec![],
    }
}

#[test]
fn render_materializes_the_dependency_closure() -> Result<()> {
    let (_temp, store) = new_store()?;
    ingest(
        &store,
        &base_image(),
        &[
            ("rootfs/etc/base.conf", b"base"),
            ("rootfs/bin/shared", b"from-base"),
        ],
        false,
    )?;
    let manifest = app_image(dep_by_name("example.com/base"));
    let app = ingest(
        &store,
        &manifest,
        &[
            ("rootfs/app/run", b"app"),
            ("rootfs/bin/shared", b"from-app"),
        ],
        false,
    )?;

    store.render_tree_store(&app, false)?;
    assert!(store.is_rendered(&app));

    let rootfs = store.get_tree_store_rootfs(&app);
    assert_eq!(fs::read(rootfs.join("etc/base.conf"))?, b"base");
    assert_eq!(fs::read(rootfs.join("app/run"))?, b"app");
    // The dependent image's layer wins over its dependency's.
    assert_eq!(fs::read(rootfs.join("bin/shared"))?, b"from-app");

    let rendered: ImageManifest =
        serde_json::from_slice(&fs::read(store.get_tree_store_path(&app).join("manifest"))?)?;
    assert_eq!(rendered, manifest);

    store.check_tree_store(&app)?;
    Ok(())
}

#[test]
fn render_resolves_dependencies_pinned_by_image_id() -> Result<()> {
    let (_temp, store) = new_store()?;
    let base = ingest(&store, &base_image(), &[("rootfs/etc/base.conf", b"base")], false)?;
    let app = ingest(
        &store,
        &app_image(Dependency {
            image_name: "example.com/base".to_string(),
            image_id: Some(base),
            labels: vec![],
        }),
        &[],
        false,
    )?;

    store.render_tree_store(&app, false)?;
    assert!(store.get_tree_store_rootfs(&app).join("etc/base.conf").is_file());
    Ok(())
}

#[test]
fn render_is_idempotent_until_rebuild_is_requested() -> Result<()> {
    let (_temp, store) = new_store()?;
    let key = ingest(&store, &base_image(), &[("rootfs/etc/base.conf", b"base")], false)?;
    store.render_tree_store(&key, false)?;

    let sentinel = store.get_tree_store_rootfs(&key).join("sentinel");
    fs::write(&sentinel, b"left behind")?;

    store.render_tree_store(&key, false)?;
    assert!(sentinel.exists(), "second render without rebuild is a no-op");

    store.render_tree_store(&key, true)?;
    assert!(!sentinel.exists(), "rebuild drains the old entry first");
    assert!(store.is_rendered(&key));
    Ok(())
}

#[test]
fn check_detects_perturbed_contents() -> Result<()> {
    let (_temp, store) = new_store()?;
    let key = ingest(&store, &base_image(), &[("rootfs/etc/base.conf", b"base")], false)?;
    store.render_tree_store(&key, false)?;
    store.check_tree_store(&key)?;

    fs::write(
        store.get_tree_store_rootfs(&key).join("etc/base.conf"),
        b"tampered",
    )?;
    let err = store.check_tree_store(&key).unwrap_err();
    assert!(matches!(store_error(&err), StoreError::Integrity { .. }));
    Ok(())
}

#[test]
fn certification_files_look_right() -> Result<()> {
    let (_temp, store) = new_store()?;
    let key = ingest(&store, &base_image(), &[], false)?;
    store.render_tree_store(&key, false)?;

    let entry = store.get_tree_store_path(&key);
    let hash = fs::read_to_string(entry.join("hash"))?;
    assert!(hash.starts_with("sha512-"));
    assert_eq!(hash.len(), 71);
    assert_eq!(fs::metadata(entry.join("rendered"))?.len(), 0);
    Ok(())
}

#[test]
fn remove_tree_store_is_idempotent() -> Result<()> {
    let (_temp, store) = new_store()?;
    let key = ingest(&store, &base_image(), &[], false)?;
    store.render_tree_store(&key, false)?;

    store.remove_tree_store(&key)?;
    assert!(!store.is_rendered(&key));
    assert!(!store.get_tree_store_path(&key).exists());
    store.remove_tree_store(&key)?;
    Ok(())
}

#[test]
fn failed_render_leaves_no_rendered_marker() -> Result<()> {
    let (_temp, store) = new_store()?;
    let app = ingest(
        &store,
        &app_image(dep_by_name("example.com/missing")),
        &[],
        false,
    )?;

    assert!(store.render_tree_store(&app, false).is_err());
    assert!(!store.is_rendered(&app));

    // Once the dependency appears, the partial entry is drained and the
    // render succeeds.
    ingest(
        &store,
        &image_manifest("example.com/missing", &[], vec![]),
        &[("rootfs/etc/dep.conf", b"dep")],
        false,
    )?;
    store.render_tree_store(&app, false)?;
    assert!(store.is_rendered(&app));
    store.check_tree_store(&app)?;
    Ok(())
}

#[test]
fn diamond_dependencies_render_once() -> Result<()> {
    let (_temp, store) = new_store()?;
    ingest(&store, &base_image(), &[("rootfs/etc/base.conf", b"base")], false)?;
    ingest(
        &store,
        &image_manifest(
            "example.com/left",
            &[],
            vec![dep_by_name("example.com/base")],
        ),
        &[("rootfs/left", b"left")],
        false,
    )?;
    ingest(
        &store,
        &image_manifest(
            "example.com/right",
            &[],
            vec![dep_by_name("example.com/base")],
        ),
        &[("rootfs/right", b"right")],
        false,
    )?;
    let top = ingest(
        &store,
        &image_manifest(
            "example.com/top",
            &[],
            vec![
                dep_by_name("example.com/left"),
                dep_by_name("example.com/right"),
            ],
        ),
        &[],
        false,
    )?;

    store.render_tree_store(&top, false)?;
    let rootfs = store.get_tree_store_rootfs(&top);
    for file in ["etc/base.conf", "left", "right"] {
        assert!(rootfs.join(file).is_file(), "missing {file}");
    }
    Ok(())
}
