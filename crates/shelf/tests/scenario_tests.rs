mod common;

use anyhow::Result;
use common::{BACKENDS, Harness};
use shelf::testing::assert_dense;
use shelf_api::{ItemKey, MediaType, OrderDirective, RelationKind, ShelfError};

fn key(raw: &str) -> ItemKey {
    ItemKey::parse(raw).unwrap()
}

/// Library [A:0, B:1, C:2]; saving D pushes it to the head, deleting B closes its slot.
#[tokio::test]
async fn test_save_then_delete_keeps_library_dense() -> Result<()> {
    for backend in BACKENDS {
        let h = Harness::new(backend).await?;
        let user = h.subject().await?;
        let other = h.subject().await?;

        let c = h.create(user, "C", true).await?;
        let b = h.create(other, "B", true).await?;
        h.shelf.relations.save(user, b).await?;
        let a = h.create(user, "A", true).await?;
        assert_eq!(h.library_ids(user).await?, vec![a, b, c], "{backend:?}");

        let d = h.create(other, "D", true).await?;
        h.shelf.relations.save(user, d).await?;
        assert_eq!(h.library_ids(user).await?, vec![d, a, b, c], "{backend:?}");

        h.shelf.relations.delete_collection(other, b).await?;
        assert_eq!(h.library_ids(user).await?, vec![d, a, c], "{backend:?}");
        assert_eq!(h.library_ids(other).await?, vec![d], "{backend:?}");
    }
    Ok(())
}

/// Items [x:0, y:1, z:2]; moving x to the tail gives [y:0, z:1, x:2].
#[tokio::test]
async fn test_move_to_tail_uses_the_dense_bound() -> Result<()> {
    for backend in BACKENDS {
        let h = Harness::new(backend).await?;
        let owner = h.subject().await?;
        let collection = h.create(owner, "queue", false).await?;
        for raw in ["x", "y", "z"] {
            h.shelf
                .items
                .add_item(owner, collection, key(raw), MediaType::Movie, "en-US")
                .await?;
        }

        let view = h
            .shelf
            .items
            .move_item(owner, collection, &key("x"), OrderDirective::Last)
            .await?;

        let layout: Vec<(&str, u32)> = view
            .items
            .iter()
            .map(|item| (item.key.as_str(), item.position.value()))
            .collect();
        assert_eq!(layout, vec![("y", 0), ("z", 1), ("x", 2)], "{backend:?}");
    }
    Ok(())
}

/// Owner, collaborator and saver each lose the deleted collection independently.
#[tokio::test]
async fn test_delete_collection_compacts_every_member() -> Result<()> {
    for backend in BACKENDS {
        let h = Harness::new(backend).await?;
        let owner = h.subject().await?;
        let collaborator = h.subject().await?;
        let saver = h.subject().await?;
        let stranger = h.subject().await?;

        let owner_other = h.create(owner, "owner-other", true).await?;
        let collaborator_other = h.create(collaborator, "collab-other", true).await?;
        let saver_other = h.create(saver, "saver-other", true).await?;
        let doomed = h.create(owner, "doomed", true).await?;
        let owner_newest = h.create(owner, "owner-newest", true).await?;

        h.shelf
            .relations
            .add_collaborator(owner, collaborator, doomed)
            .await?;
        h.shelf.relations.save(saver, doomed).await?;
        let stranger_saved = h.create(stranger, "stranger", true).await?;
        h.shelf.relations.save(collaborator, stranger_saved).await?;
        h.shelf.relations.save(saver, stranger_saved).await?;

        assert_eq!(
            h.library_ids(collaborator).await?,
            vec![stranger_saved, doomed, collaborator_other]
        );

        h.shelf.relations.delete_collection(owner, doomed).await?;

        assert_eq!(h.library_ids(owner).await?, vec![owner_newest, owner_other]);
        assert_eq!(
            h.library_ids(collaborator).await?,
            vec![stranger_saved, collaborator_other]
        );
        assert_eq!(
            h.library_ids(saver).await?,
            vec![stranger_saved, saver_other]
        );
        assert_eq!(h.library_ids(stranger).await?, vec![stranger_saved]);
        assert!(h.items(doomed).await?.is_empty(), "{backend:?}");
        assert!(matches!(
            h.shelf.items.collection_view(owner, doomed).await,
            Err(ShelfError::NotFound { .. })
        ));
    }
    Ok(())
}

#[tokio::test]
async fn test_insert_then_remove_is_identity() -> Result<()> {
    for backend in BACKENDS {
        let h = Harness::new(backend).await?;
        let owner = h.subject().await?;
        let user = h.subject().await?;
        for name in ["one", "two", "three"] {
            h.create(user, name, false).await?;
        }
        let shared = h.create(owner, "shared", true).await?;
        let before = h.library(user).await?;

        h.shelf.relations.save(user, shared).await?;
        h.shelf.relations.unsave(user, shared).await?;
        assert_eq!(h.library(user).await?, before, "{backend:?}");

        h.shelf
            .relations
            .add_collaborator(owner, user, shared)
            .await?;
        h.shelf.relations.leave(user, shared).await?;
        assert_eq!(h.library(user).await?, before, "{backend:?}");

        h.shelf
            .relations
            .add_collaborator(owner, user, shared)
            .await?;
        h.shelf
            .relations
            .remove_collaborator(owner, user, shared)
            .await?;
        assert_eq!(h.library(user).await?, before, "{backend:?}");
    }
    Ok(())
}

#[tokio::test]
async fn test_collaborator_replaces_saved_edge() -> Result<()> {
    for backend in BACKENDS {
        let h = Harness::new(backend).await?;
        let owner = h.subject().await?;
        let user = h.subject().await?;
        let shared = h.create(owner, "shared", true).await?;
        h.shelf.relations.save(user, shared).await?;
        let newer = h.create(user, "newer", false).await?;
        assert_eq!(h.library_ids(user).await?, vec![newer, shared]);

        let collaborators = h
            .shelf
            .relations
            .add_collaborator(owner, user, shared)
            .await?;

        assert_eq!(collaborators, vec![user]);
        let library = h.library(user).await?;
        assert_eq!(library.len(), 2, "{backend:?}");
        assert_eq!(library[0].collection, shared);
        assert_eq!(library[0].kind, RelationKind::Collaborator);
        assert_eq!(library[1].collection, newer);

        let savers = h.shelf.relations.unsave(h.subject().await?, shared).await;
        assert!(matches!(savers, Err(ShelfError::NotFound { .. })));
        let view = h.shelf.items.collection_view(user, shared).await?;
        assert_eq!(view.viewer_relation, Some(RelationKind::Collaborator));
        assert!(!view.is_saved());
    }
    Ok(())
}

/// Every guard failure leaves all ledgers exactly as they were.
#[tokio::test]
async fn test_guard_failures_do_not_mutate() -> Result<()> {
    for backend in BACKENDS {
        let h = Harness::new(backend).await?;
        let owner = h.subject().await?;
        let user = h.subject().await?;
        let outsider = h.subject().await?;
        let public = h.create(owner, "public", true).await?;
        let private = h.create(owner, "private", false).await?;
        h.create(user, "mine", true).await?;
        h.shelf.relations.save(user, public).await?;
        for raw in ["a", "b", "c"] {
            h.shelf
                .items
                .add_item(owner, public, key(raw), MediaType::Tv, "en-US")
                .await?;
        }

        let harness = &h;
        let snapshot = move || async move {
            Ok::<_, anyhow::Error>((
                harness.library(owner).await?,
                harness.library(user).await?,
                harness.library(outsider).await?,
                harness.items(public).await?,
            ))
        };
        let before = snapshot().await?;

        let relations = &h.shelf.relations;
        let items = &h.shelf.items;
        let failures: Vec<ShelfError> = vec![
            relations.save(user, private).await.unwrap_err(),
            relations.save(owner, public).await.unwrap_err(),
            relations.save(user, public).await.unwrap_err(),
            relations.unsave(outsider, public).await.unwrap_err(),
            relations.unsave(owner, public).await.unwrap_err(),
            relations.leave(user, public).await.unwrap_err(),
            relations.leave(owner, public).await.unwrap_err(),
            relations
                .add_collaborator(user, outsider, public)
                .await
                .unwrap_err(),
            relations
                .add_collaborator(owner, owner, public)
                .await
                .unwrap_err(),
            relations
                .remove_collaborator(owner, user, public)
                .await
                .unwrap_err(),
            relations.delete_collection(user, public).await.unwrap_err(),
            relations
                .reorder_library(user, &[public])
                .await
                .unwrap_err(),
            items
                .add_item(user, public, key("d"), MediaType::Movie, "en-US")
                .await
                .unwrap_err(),
            items
                .add_item(owner, public, key("a"), MediaType::Movie, "en-US")
                .await
                .unwrap_err(),
            items
                .move_item(owner, public, &key("zz"), OrderDirective::First)
                .await
                .unwrap_err(),
            items
                .reorder_items(owner, public, &[key("c"), key("b")])
                .await
                .unwrap_err(),
            items
                .reorder_items(owner, public, &[key("a"), key("a"), key("b")])
                .await
                .unwrap_err(),
            items
                .remove_item(user, public, &key("a"))
                .await
                .unwrap_err(),
        ];

        for err in &failures {
            assert!(!err.is_retryable(), "{backend:?}: {err}");
        }
        assert_eq!(snapshot().await?, before, "{backend:?}");
    }
    Ok(())
}

#[tokio::test]
async fn test_reorder_library_and_items() -> Result<()> {
    for backend in BACKENDS {
        let h = Harness::new(backend).await?;
        let owner = h.subject().await?;
        let first = h.create(owner, "first", true).await?;
        let second = h.create(owner, "second", true).await?;
        let third = h.create(owner, "third", true).await?;

        let entries = h
            .shelf
            .relations
            .reorder_library(owner, &[first, third, second])
            .await?;
        assert_dense(entries.iter().map(|entry| entry.position));
        assert_eq!(h.library_ids(owner).await?, vec![first, third, second]);

        for raw in ["a", "b", "c", "d"] {
            h.shelf
                .items
                .add_item(owner, first, key(raw), MediaType::Movie, "en-US")
                .await?;
        }
        h.shelf.items.remove_item(owner, first, &key("b")).await?;
        let gapped: Vec<u32> = h
            .items(first)
            .await?
            .iter()
            .map(|item| item.position.value())
            .collect();
        assert_eq!(gapped, vec![0, 2, 3], "{backend:?}");

        let view = h
            .shelf
            .items
            .reorder_items(owner, first, &[key("d"), key("a"), key("c")])
            .await?;
        assert_eq!(view.item_keys(), vec![key("d"), key("a"), key("c")]);
        assert_dense(view.items.iter().map(|item| item.position));
    }
    Ok(())
}
