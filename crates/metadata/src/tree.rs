//! Size propagation over the folder hierarchy.
//!
//! Every function here operates on a caller-supplied [`TreeTransaction`], so a
//! row change and the size corrections it implies commit or roll back
//! together. Walks over parent links and subtrees are explicit loops; a
//! visited set turns a corrupt (cyclic) parent chain into an error instead of
//! an endless walk.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{FileRow, FolderRow, FolderSize};
use crate::tree_tx::TreeTransaction;
use std::collections::HashSet;

/// Add `amount` bytes to a folder and every ancestor.
///
/// Returns the number of folders updated. An amount of zero touches nothing.
pub async fn increase_size(
    tx: &mut dyn TreeTransaction,
    folder_id: i64,
    amount: i64,
) -> MetadataResult<usize> {
    let amount = canopy_core::non_negative(amount)?;
    apply_delta(tx, folder_id, amount).await
}

/// Remove `amount` bytes from a folder and every ancestor.
///
/// Returns the number of folders updated. An amount of zero touches nothing.
pub async fn decrease_size(
    tx: &mut dyn TreeTransaction,
    folder_id: i64,
    amount: i64,
) -> MetadataResult<usize> {
    let amount = canopy_core::non_negative(amount)?;
    apply_delta(tx, folder_id, -amount).await
}

async fn apply_delta(
    tx: &mut dyn TreeTransaction,
    folder_id: i64,
    delta: i64,
) -> MetadataResult<usize> {
    if delta == 0 {
        return Ok(0);
    }

    let mut visited = HashSet::new();
    let mut current = Some(folder_id);
    while let Some(id) = current {
        if !visited.insert(id) {
            return Err(corrupt_chain(folder_id, id));
        }
        let folder = tx
            .get_folder(id)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("folder {id}")))?;

        let updated = folder.size.checked_add(delta).ok_or_else(|| {
            MetadataError::InvalidArgument(format!("size of folder {id} would overflow"))
        })?;
        if updated < 0 {
            return Err(MetadataError::Internal(format!(
                "size of folder {id} would become negative ({} {delta:+})",
                folder.size
            )));
        }

        tx.add_size(id, delta).await?;
        current = folder.parent_id;
    }

    tracing::trace!(folder_id, delta, depth = visited.len(), "propagated size delta");
    Ok(visited.len())
}

/// Overwrite a single folder's size without touching its ancestors.
///
/// Only for reconciling staged sizes; a mutation that changes a folder's
/// contents must go through [`increase_size`] or [`decrease_size`].
pub async fn set_absolute_size(
    tx: &mut dyn TreeTransaction,
    folder_id: i64,
    size: i64,
) -> MetadataResult<()> {
    let size = canopy_core::non_negative(size)?;
    tx.set_size(folder_id, size).await
}

/// Overwrite many folders' sizes in one batched statement.
///
/// Each folder is set to its own absolute value. Fails with `NotFound` if any
/// listed folder does not exist, which aborts the enclosing transaction.
pub async fn batch_set_sizes(
    tx: &mut dyn TreeTransaction,
    sizes: &[FolderSize],
) -> MetadataResult<()> {
    if sizes.is_empty() {
        return Ok(());
    }

    let mut ids = HashSet::with_capacity(sizes.len());
    for entry in sizes {
        canopy_core::non_negative(entry.size)?;
        if !ids.insert(entry.id) {
            return Err(MetadataError::InvalidArgument(format!(
                "folder {} listed more than once",
                entry.id
            )));
        }
    }

    let updated = tx.set_sizes(sizes).await?;
    if updated != ids.len() as u64 {
        return Err(MetadataError::NotFound(format!(
            "{} of {} folders in size batch",
            ids.len() as u64 - updated,
            ids.len()
        )));
    }
    Ok(())
}

/// Re-parent a folder after checking that the move keeps the tree acyclic.
///
/// Walks from `new_parent_id` to the root; meeting `folder_id` on the way
/// means the folder would become its own ancestor. Only the parent pointer
/// changes here: the caller moves the folder's size between the two chains.
/// Returns the folder as it was before the move.
pub async fn move_folder(
    tx: &mut dyn TreeTransaction,
    folder_id: i64,
    new_parent_id: i64,
) -> MetadataResult<FolderRow> {
    let folder = tx
        .get_folder(folder_id)
        .await?
        .ok_or_else(|| MetadataError::NotFound(format!("folder {folder_id}")))?;

    let mut visited = HashSet::new();
    let mut current = Some(new_parent_id);
    while let Some(id) = current {
        if id == folder_id {
            return Err(MetadataError::CycleDetected {
                folder_id,
                new_parent_id,
            });
        }
        if !visited.insert(id) {
            return Err(corrupt_chain(new_parent_id, id));
        }
        let ancestor = tx
            .get_folder(id)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("folder {id}")))?;
        current = ancestor.parent_id;
    }

    tx.set_parent(folder_id, new_parent_id).await?;
    Ok(folder)
}

/// Result of removing a subtree.
#[derive(Debug, Clone)]
pub struct SubtreeDeletion {
    /// The subtree root as it was before deletion.
    pub root: FolderRow,
    /// Deleted folder ids, children before parents.
    pub folder_ids: Vec<i64>,
    /// Files removed along with their folders.
    pub files: Vec<FileRow>,
}

/// Remove a folder, all descendant folders, and the files inside them.
///
/// Folders are removed depth-first with children before their parent.
/// Completed or failed upload transactions targeting removed folders are
/// deleted too; a pending one makes the whole deletion fail with `Conflict`.
/// Sizes of the surviving ancestors are left to the caller.
pub async fn delete_subtree(
    tx: &mut dyn TreeTransaction,
    folder_id: i64,
) -> MetadataResult<SubtreeDeletion> {
    let root = tx
        .get_folder(folder_id)
        .await?
        .ok_or_else(|| MetadataError::NotFound(format!("folder {folder_id}")))?;

    // Pre-order collection; reversed it lists every child before its parent.
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![folder_id];
    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            return Err(corrupt_chain(folder_id, id));
        }
        order.push(id);
        stack.extend(tx.child_ids(id).await?);
    }
    order.reverse();

    for &id in &order {
        if tx.pending_transactions_in_folder(id).await? > 0 {
            return Err(MetadataError::Conflict(format!(
                "folder {id} is the target of a pending upload transaction"
            )));
        }
    }

    let mut files = Vec::new();
    for &id in &order {
        files.extend(tx.delete_files_in_folder(id).await?);
        tx.delete_transactions_in_folder(id).await?;
        tx.delete_folder_row(id).await?;
    }

    tracing::debug!(
        folder_id,
        folders = order.len(),
        files = files.len(),
        "deleted folder subtree"
    );

    Ok(SubtreeDeletion {
        root,
        folder_ids: order,
        files,
    })
}

/// The folder and every ancestor with current sizes, ordered root first.
pub async fn parent_chain(
    tx: &mut dyn TreeTransaction,
    folder_id: i64,
) -> MetadataResult<Vec<FolderRow>> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut current = Some(folder_id);
    while let Some(id) = current {
        if !visited.insert(id) {
            return Err(corrupt_chain(folder_id, id));
        }
        let folder = tx
            .get_folder(id)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("folder {id}")))?;
        current = folder.parent_id;
        chain.push(folder);
    }
    chain.reverse();
    Ok(chain)
}

fn corrupt_chain(start: i64, repeated: i64) -> MetadataError {
    MetadataError::Internal(format!(
        "folder hierarchy loops back to {repeated} while walking from {start}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewFile, NewFolder};
    use crate::repos::{FileRepo, FolderRepo};
    use crate::store::{MetadataStore, SqliteStore};

    async fn store() -> SqliteStore {
        SqliteStore::new(":memory:").await.unwrap()
    }

    async fn folder(store: &SqliteStore, name: &str, parent: Option<i64>) -> i64 {
        store
            .create_folder(&NewFolder {
                owner_id: 1,
                name: name.to_string(),
                parent_id: parent,
            })
            .await
            .unwrap()
            .id
    }

    async fn size_of(store: &SqliteStore, id: i64) -> i64 {
        store.get_folder(id).await.unwrap().unwrap().size
    }

    /// root -> a -> b -> c
    async fn chain(store: &SqliteStore) -> [i64; 4] {
        let root = folder(store, "root", None).await;
        let a = folder(store, "a", Some(root)).await;
        let b = folder(store, "b", Some(a)).await;
        let c = folder(store, "c", Some(b)).await;
        [root, a, b, c]
    }

    #[tokio::test]
    async fn test_increase_propagates_to_every_ancestor() {
        let store = store().await;
        let [root, a, b, c] = chain(&store).await;

        let mut tx = store.begin().await.unwrap();
        let depth = increase_size(tx.as_mut(), c, 40).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(depth, 4);
        for id in [root, a, b, c] {
            assert_eq!(size_of(&store, id).await, 40);
        }
    }

    #[tokio::test]
    async fn test_increase_then_decrease_restores_sizes() {
        let store = store().await;
        let [root, a, b, c] = chain(&store).await;

        let mut tx = store.begin().await.unwrap();
        increase_size(tx.as_mut(), b, 5).await.unwrap();
        tx.commit().await.unwrap();
        let before: Vec<i64> = sizes_of(&store, &[root, a, b, c]).await;

        let mut tx = store.begin().await.unwrap();
        increase_size(tx.as_mut(), c, 99).await.unwrap();
        decrease_size(tx.as_mut(), c, 99).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(sizes_of(&store, &[root, a, b, c]).await, before);
    }

    async fn sizes_of(store: &SqliteStore, ids: &[i64]) -> Vec<i64> {
        let mut sizes = Vec::new();
        for &id in ids {
            sizes.push(size_of(store, id).await);
        }
        sizes
    }

    #[tokio::test]
    async fn test_zero_delta_touches_nothing() {
        let store = store().await;
        let [root, ..] = chain(&store).await;
        let before = store.get_folder(root).await.unwrap().unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(decrease_size(tx.as_mut(), root, 0).await.unwrap(), 0);
        tx.commit().await.unwrap();

        assert_eq!(store.get_folder(root).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_negative_amount_is_invalid() {
        let store = store().await;
        let [root, ..] = chain(&store).await;

        let mut tx = store.begin().await.unwrap();
        let err = increase_size(tx.as_mut(), root, -1).await.unwrap_err();
        assert!(matches!(err, MetadataError::InvalidArgument(_)));
        let err = decrease_size(tx.as_mut(), root, -1).await.unwrap_err();
        assert!(matches!(err, MetadataError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_underflow_aborts_whole_walk() {
        let store = store().await;
        let [root, a, _, c] = chain(&store).await;

        let mut tx = store.begin().await.unwrap();
        increase_size(tx.as_mut(), a, 10).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = decrease_size(tx.as_mut(), c, 1).await.unwrap_err();
        assert!(matches!(err, MetadataError::Internal(_)));
        drop(tx);

        assert_eq!(size_of(&store, root).await, 10);
        assert_eq!(size_of(&store, a).await, 10);
        assert_eq!(size_of(&store, c).await, 0);
    }

    #[tokio::test]
    async fn test_rollback_discards_propagation() {
        let store = store().await;
        let [root, _, _, c] = chain(&store).await;

        let mut tx = store.begin().await.unwrap();
        increase_size(tx.as_mut(), c, 7).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(size_of(&store, root).await, 0);
        assert_eq!(size_of(&store, c).await, 0);
    }

    #[tokio::test]
    async fn test_set_absolute_size_skips_ancestors() {
        let store = store().await;
        let [root, a, ..] = chain(&store).await;

        let mut tx = store.begin().await.unwrap();
        set_absolute_size(tx.as_mut(), a, 123).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(size_of(&store, a).await, 123);
        assert_eq!(size_of(&store, root).await, 0);
    }

    #[tokio::test]
    async fn test_batch_set_sizes() {
        let store = store().await;
        let [root, a, b, c] = chain(&store).await;

        let mut tx = store.begin().await.unwrap();
        batch_set_sizes(
            tx.as_mut(),
            &[
                FolderSize { id: root, size: 30 },
                FolderSize { id: a, size: 20 },
                FolderSize { id: c, size: 10 },
            ],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(sizes_of(&store, &[root, a, b, c]).await, vec![30, 20, 0, 10]);
    }

    #[tokio::test]
    async fn test_batch_set_sizes_rejects_missing_and_duplicate_ids() {
        let store = store().await;
        let [root, ..] = chain(&store).await;

        let mut tx = store.begin().await.unwrap();
        let err = batch_set_sizes(
            tx.as_mut(),
            &[FolderSize { id: root, size: 1 }, FolderSize { id: 9999, size: 1 }],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));

        let err = batch_set_sizes(
            tx.as_mut(),
            &[FolderSize { id: root, size: 1 }, FolderSize { id: root, size: 2 }],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MetadataError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_move_into_descendant_is_cycle() {
        let store = store().await;
        let [root, a, b, c] = chain(&store).await;

        let mut tx = store.begin().await.unwrap();
        for target in [a, b, c, root] {
            let err = move_folder(tx.as_mut(), root, target).await.unwrap_err();
            assert!(matches!(err, MetadataError::CycleDetected { .. }));
        }
        drop(tx);

        let c_row = store.get_folder(c).await.unwrap().unwrap();
        assert_eq!(c_row.parent_id, Some(b));
        assert_eq!(store.get_folder(root).await.unwrap().unwrap().parent_id, None);
    }

    #[tokio::test]
    async fn test_move_rewrites_parent_only() {
        let store = store().await;
        let [root, a, b, c] = chain(&store).await;

        let mut tx = store.begin().await.unwrap();
        increase_size(tx.as_mut(), c, 8).await.unwrap();
        let before = move_folder(tx.as_mut(), c, a).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(before.parent_id, Some(b));
        assert_eq!(store.get_folder(c).await.unwrap().unwrap().parent_id, Some(a));
        // Caller has not moved the size yet.
        assert_eq!(size_of(&store, b).await, 8);
        assert_eq!(size_of(&store, root).await, 8);
    }

    #[tokio::test]
    async fn test_move_to_missing_parent() {
        let store = store().await;
        let [_, a, ..] = chain(&store).await;

        let mut tx = store.begin().await.unwrap();
        let err = move_folder(tx.as_mut(), a, 4242).await.unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_subtree_children_first_with_files() {
        let store = store().await;
        let [root, a, b, c] = chain(&store).await;
        let sibling = folder(&store, "sibling", Some(a)).await;

        let mut tx = store.begin().await.unwrap();
        for (folder_id, size) in [(c, 3), (sibling, 4), (root, 5)] {
            tx.insert_file(&NewFile {
                folder_id,
                owner_id: 1,
                name: format!("f{folder_id}"),
                url: format!("mem://{folder_id}"),
                size,
                transaction_id: None,
            })
            .await
            .unwrap();
        }
        let deletion = delete_subtree(tx.as_mut(), a).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(deletion.root.id, a);
        assert_eq!(deletion.folder_ids.len(), 4);
        assert_eq!(*deletion.folder_ids.last().unwrap(), a);
        let pos = |id| deletion.folder_ids.iter().position(|&x| x == id).unwrap();
        assert!(pos(c) < pos(b));
        assert!(pos(b) < pos(a));
        assert!(pos(sibling) < pos(a));
        assert_eq!(deletion.files.len(), 2);

        for id in [a, b, c, sibling] {
            assert!(store.get_folder(id).await.unwrap().is_none());
            assert!(store.list_files(id).await.unwrap().is_empty());
        }
        assert!(store.get_folder(root).await.unwrap().is_some());
        assert_eq!(store.list_files(root).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_parent_chain_is_root_first() {
        let store = store().await;
        let [root, a, b, c] = chain(&store).await;

        let chain = store.parent_chain(c).await.unwrap();
        let ids: Vec<i64> = chain.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![root, a, b, c]);

        let chain = store.parent_chain(root).await.unwrap();
        assert_eq!(chain.len(), 1);

        let err = store.parent_chain(777).await.unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    }
}
