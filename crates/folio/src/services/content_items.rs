//! Resume content of the signed-in user, as a flat list and as a tree.

use std::sync::Arc;

use folio_api::{
    ContentItem, Constraints, Direction, Fields, OwnedRecord, Record, StoreError,
    StoreResult as Result,
};

use crate::batch::{BatchFailure, BatchMutationEngine, BatchReport, ReorderItem};
use crate::hierarchy::{build_hierarchy, calculate_stats, descendant_ids, HierarchyStats, TreeNode};
use crate::store::{DocumentStore, Subscription};

pub type ContentTree = Vec<TreeNode<Record<ContentItem>>>;

pub struct ContentItemService {
    store: Arc<DocumentStore>,
    batch: Arc<BatchMutationEngine>,
}

impl ContentItemService {
    pub fn new(store: Arc<DocumentStore>, batch: Arc<BatchMutationEngine>) -> Self {
        Self { store, batch }
    }

    fn scope(&self) -> Result<(String, Constraints)> {
        let user_id = self.store.require_user()?;
        let constraints = Constraints::new()
            .where_eq(ContentItem::OWNER_FIELD, user_id.as_str())
            .order_by("order", Direction::Ascending);
        Ok((user_id, constraints))
    }

    /// Every item of the user, by `order`.
    pub async fn list(&self) -> Result<Vec<Record<ContentItem>>> {
        let (_, constraints) = self.scope()?;
        self.store.list::<ContentItem>(&constraints).await
    }

    pub async fn hierarchy(&self) -> Result<ContentTree> {
        build_hierarchy(self.list().await?)
    }

    pub async fn stats(&self) -> Result<HierarchyStats> {
        Ok(calculate_stats(&self.hierarchy().await?))
    }

    /// Case-insensitive substring match over the item's text fields. A blank
    /// query matches everything.
    pub async fn search(&self, text: &str) -> Result<Vec<Record<ContentItem>>> {
        let needle = text.trim().to_lowercase();
        let items = self.list().await?;
        if needle.is_empty() {
            return Ok(items);
        }
        Ok(items
            .into_iter()
            .filter(|record| {
                record
                    .data
                    .searchable_text()
                    .any(|field| field.to_lowercase().contains(&needle))
            })
            .collect())
    }

    /// Create an item for the signed-in user.
    ///
    /// A parent, if given, must exist and belong to the user. Without an
    /// explicit `order` the item goes after its current siblings.
    pub async fn create(&self, mut item: ContentItem, order: Option<i64>) -> Result<String> {
        let user_id = self.store.require_user()?;
        if item.user_id.is_empty() {
            item.user_id = user_id.clone();
        }

        if let Some(parent_id) = item.parent_id.as_deref() {
            if self.store.get_owned::<ContentItem>(parent_id).await?.is_none() {
                return Err(StoreError::invalid(format!(
                    "parent {} does not exist",
                    parent_id
                )));
            }
        }

        item.order = match order {
            Some(order) => order,
            None => {
                let siblings = self
                    .list()
                    .await?
                    .iter()
                    .filter(|record| record.data.parent_id == item.parent_id)
                    .count();
                i64::try_from(siblings).unwrap_or(i64::MAX)
            }
        };

        let id = self.store.create_owned(&item).await?;
        tracing::debug!(
            "[ContentItemService] created {} {} at order {}",
            item.item_type,
            id,
            item.order
        );
        Ok(id)
    }

    pub async fn update(&self, id: &str, patch: Fields) -> Result<()> {
        self.store.update_owned::<ContentItem>(id, patch).await
    }

    /// Delete one item. Its children are left in place and become roots.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.remove_owned::<ContentItem>(id).await
    }

    /// Delete an item and everything below it.
    pub async fn delete_with_descendants(
        &self,
        id: &str,
    ) -> std::result::Result<BatchReport, BatchFailure> {
        let (user_id, constraints) = self.scope()?;
        if self.store.get_owned::<ContentItem>(id).await?.is_none() {
            return Ok(BatchReport {
                skipped_not_found: vec![id.to_string()],
                ..BatchReport::default()
            });
        }
        let items = self.store.list::<ContentItem>(&constraints).await?;
        let ids = descendant_ids(&items, id);
        self.batch.batch_delete::<ContentItem>(&ids, &user_id).await
    }

    pub async fn reorder(
        &self,
        items: &[ReorderItem],
    ) -> std::result::Result<BatchReport, BatchFailure> {
        let user_id = self.store.require_user()?;
        self.batch.batch_reorder::<ContentItem>(items, &user_id).await
    }

    /// Live tree of the user's items. A snapshot whose parent references
    /// loop goes to `on_error` instead.
    pub async fn subscribe_hierarchy<F, E>(&self, on_tree: F, on_error: E) -> Result<Subscription>
    where
        F: Fn(ContentTree) + Send + Sync + 'static,
        E: Fn(StoreError) + Send + Sync + 'static,
    {
        let (_, constraints) = self.scope()?;
        let on_error = Arc::new(on_error);
        let tree_error = Arc::clone(&on_error);
        self.store
            .subscribe::<ContentItem, _, _>(
                &constraints,
                move |records| match build_hierarchy(records) {
                    Ok(tree) => on_tree(tree),
                    Err(e) => tree_error(e),
                },
                move |e| on_error(e),
            )
            .await
    }
}
