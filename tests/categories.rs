#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use iconvault_lib::config::DEFAULT_CATEGORY_NAME;
use iconvault_lib::ErrorKind;
use util::{harness, upload, BACKENDS};

#[tokio::test]
async fn create_makes_record_and_directory() {
    for kind in BACKENDS {
        let h = harness(kind).await;
        let store = h.library.categories();

        let arrows = store.create("  Arrows ").await.expect("create");
        assert_eq!(arrows.name, "Arrows");
        assert!(h.category_dir("Arrows").is_dir());
        assert_eq!(store.get(arrows.id).await.expect("get"), arrows);

        let err = store.create("Arrows").await.expect_err("duplicate");
        assert_eq!(err.kind(), ErrorKind::DuplicateName, "{kind}");

        // Names are matched exactly, so a different case is a new category.
        store.create("arrows").await.expect("case differs");
    }
}

#[tokio::test]
async fn create_adopts_existing_directory() {
    for kind in BACKENDS {
        let h = harness(kind).await;
        std::fs::create_dir_all(h.category_dir("Preexisting")).expect("mkdir");
        std::fs::write(h.category_dir("Preexisting").join("keep.txt"), b"x").expect("write");

        h.library
            .categories()
            .create("Preexisting")
            .await
            .expect("existing dir is fine");
        assert!(h.category_dir("Preexisting").join("keep.txt").exists());
    }
}

#[tokio::test]
async fn create_rejects_unsafe_names() {
    for kind in BACKENDS {
        let h = harness(kind).await;
        let store = h.library.categories();
        for name in ["..", "a/b", "..\\up"] {
            let err = store.create(name).await.expect_err("unsafe");
            assert_eq!(err.kind(), ErrorKind::PathTraversal, "{name}");
        }
        let err = store.create("   ").await.expect_err("blank");
        assert_eq!(err.kind(), ErrorKind::InvalidName);
        assert_eq!(store.list().await.expect("list").len(), 1);
    }
}

#[tokio::test]
async fn list_preserves_creation_order_and_counts_icons() {
    for kind in BACKENDS {
        let h = harness(kind).await;
        let store = h.library.categories();
        let b = store.create("B").await.expect("b");
        let a = store.create("A").await.expect("a");
        h.library
            .icons()
            .create(upload("one.png"), a.id)
            .await
            .expect("upload");
        h.library
            .icons()
            .create(upload("two.png"), a.id)
            .await
            .expect("upload");

        let names: Vec<_> = store
            .list()
            .await
            .expect("list")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec![DEFAULT_CATEGORY_NAME, "B", "A"]);

        let counts = store.list_with_counts().await.expect("counts");
        let count_of = |id: i64| {
            counts
                .iter()
                .find(|s| s.category.id == id)
                .map(|s| s.icon_count)
                .expect("summary")
        };
        assert_eq!(count_of(a.id), 2);
        assert_eq!(count_of(b.id), 0);
    }
}

#[tokio::test]
async fn rename_moves_directory_and_icon_names() {
    for kind in BACKENDS {
        let h = harness(kind).await;
        let store = h.library.categories();
        let old = store.create("Old").await.expect("create");
        let icon = h
            .library
            .icons()
            .create(upload("x.svg"), old.id)
            .await
            .expect("upload");

        let renamed = store.rename(old.id, "New").await.expect("rename");
        assert_eq!(renamed.id, old.id);
        assert_eq!(renamed.name, "New");
        assert!(!h.category_dir("Old").exists());
        assert!(h.category_dir("New").is_dir());

        let icon = h.library.icons().get(icon.id).await.expect("get");
        assert_eq!(icon.category_name, "New");
        assert!(h.file_of(&icon).is_file());
        h.assert_consistent().await;
    }
}

#[tokio::test]
async fn rename_failures_leave_everything_untouched() {
    for kind in BACKENDS {
        let h = harness(kind).await;
        let store = h.library.categories();
        let a = store.create("A").await.expect("a");
        store.create("B").await.expect("b");

        let err = store.rename(999, "Z").await.expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = store.rename(a.id, "B").await.expect_err("taken");
        assert_eq!(err.kind(), ErrorKind::DuplicateName);

        // A stray directory with the target name also blocks the rename.
        std::fs::create_dir_all(h.category_dir("Stray")).expect("mkdir");
        let err = store.rename(a.id, "Stray").await.expect_err("dir taken");
        assert_eq!(err.kind(), ErrorKind::DuplicateName);

        assert_eq!(store.get(a.id).await.expect("get").name, "A");
        assert!(h.category_dir("A").is_dir());
    }
}

#[tokio::test]
async fn rename_to_same_name_is_a_no_op() {
    for kind in BACKENDS {
        let h = harness(kind).await;
        let store = h.library.categories();
        let a = store.create("A").await.expect("a");
        let same = store.rename(a.id, "A").await.expect("same name");
        assert_eq!(same.name, "A");
        assert!(h.category_dir("A").is_dir());
    }
}

#[tokio::test]
async fn delete_reports_reassignments_and_removes_directory() {
    for kind in BACKENDS {
        let h = harness(kind).await;
        let store = h.library.categories();
        let temp = store.create("Temp").await.expect("create");
        h.library
            .icons()
            .create(upload("a.png"), temp.id)
            .await
            .expect("upload");
        h.library
            .icons()
            .create(upload("b.gif"), temp.id)
            .await
            .expect("upload");

        let deleted = store.delete(temp.id).await.expect("delete");
        assert_eq!(deleted.reassigned, 2);
        assert!(!h.category_dir("Temp").exists());
        assert_eq!(
            store.get(temp.id).await.expect_err("gone").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            store.delete(temp.id).await.expect_err("twice").kind(),
            ErrorKind::NotFound
        );
        h.assert_consistent().await;
    }
}

#[tokio::test]
async fn delete_keeps_directory_with_foreign_files() {
    for kind in BACKENDS {
        let h = harness(kind).await;
        let store = h.library.categories();
        let temp = store.create("Temp").await.expect("create");
        std::fs::write(h.category_dir("Temp").join("notes.txt"), b"untracked").expect("write");

        store.delete(temp.id).await.expect("delete still succeeds");
        assert!(h.category_dir("Temp").join("notes.txt").exists());
    }
}

#[tokio::test]
async fn delete_reassigns_icons_whose_file_is_missing() {
    for kind in BACKENDS {
        let h = harness(kind).await;
        let store = h.library.categories();
        let temp = store.create("Temp").await.expect("create");
        let icon = h
            .library
            .icons()
            .create(upload("a.png"), temp.id)
            .await
            .expect("upload");
        std::fs::remove_file(h.file_of(&icon)).expect("lose file");

        store.delete(temp.id).await.expect("delete");
        let icon = h.library.icons().get(icon.id).await.expect("get");
        assert_eq!(icon.category_id, Some(h.default_id().await));
        assert_eq!(icon.category_name, DEFAULT_CATEGORY_NAME);
    }
}

#[tokio::test]
async fn default_category_is_permanent() {
    for kind in BACKENDS {
        let h = harness(kind).await;
        let store = h.library.categories();
        let default_id = h.default_id().await;

        let err = store.delete(default_id).await.expect_err("delete default");
        assert_eq!(err.kind(), ErrorKind::IsDefaultCategory);
        let err = store.rename(default_id, "Other").await.expect_err("rename default");
        assert_eq!(err.kind(), ErrorKind::IsDefaultCategory);

        assert_eq!(store.get(default_id).await.expect("get").name, DEFAULT_CATEGORY_NAME);
        assert!(h.category_dir(DEFAULT_CATEGORY_NAME).is_dir());
    }
}

#[tokio::test]
async fn delete_suffixes_icons_that_collide_in_default_directory() {
    for kind in BACKENDS {
        let h = harness(kind).await;
        let store = h.library.categories();
        let temp = store.create("Temp").await.expect("create");
        let icon = h
            .library
            .icons()
            .create(upload("mine.png"), temp.id)
            .await
            .expect("upload");
        let occupant = h.category_dir(DEFAULT_CATEGORY_NAME).join(&icon.filename);
        std::fs::write(&occupant, b"untracked occupant").expect("occupy");

        store.delete(temp.id).await.expect("delete");

        let moved = h.library.icons().get(icon.id).await.expect("get");
        assert_eq!(moved.category_id, Some(h.default_id().await));
        assert_ne!(moved.filename, icon.filename, "{kind}");
        let stem = icon.filename.trim_end_matches(".png");
        assert!(moved.filename.starts_with(&format!("{stem}_")));
        assert!(moved.filename.ends_with(".png"));
        assert_eq!(
            std::fs::read(h.file_of(&moved)).expect("moved file"),
            upload("mine.png").bytes
        );
        assert_eq!(
            std::fs::read(&occupant).expect("occupant"),
            b"untracked occupant"
        );
        h.assert_consistent().await;
    }
}
