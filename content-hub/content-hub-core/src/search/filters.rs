//! Hit transformers that drop hits based on the hierarchy.
//!
//! Each one resolves the ancestors of a whole page at once; give them a
//! resolver with a `RequestScopedAncestorCache` in its chain so consecutive
//! pages share lookups.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use super::{HitTransformer, SearchHit};
use crate::ancestors::Ancestors;
use crate::model::ItemId;
use crate::permissions::{PermissionInheritanceFilter, PublicVisibility};
use crate::resolver::AncestorResolver;

async fn page_ancestors(resolver: &AncestorResolver, hits: &[SearchHit]) -> Result<Ancestors> {
    let ids: Vec<ItemId> = hits.iter().map(|hit| hit.item_id.clone()).collect();
    resolver.get_ancestors(&ids).await
}

/// Keeps hits the caller may access, directly or through an ancestor.
pub struct PermissionHitFilter {
    permissions: Arc<PermissionInheritanceFilter>,
    allowed_ids: HashSet<ItemId>,
    ignore_item: bool,
}

impl PermissionHitFilter {
    pub fn new(
        permissions: Arc<PermissionInheritanceFilter>,
        allowed_ids: HashSet<ItemId>,
        ignore_item: bool,
    ) -> Self {
        Self {
            permissions,
            allowed_ids,
            ignore_item,
        }
    }
}

#[async_trait]
impl HitTransformer for PermissionHitFilter {
    async fn transform(&self, hits: Vec<SearchHit>) -> Result<Vec<SearchHit>> {
        if hits.is_empty() {
            return Ok(hits);
        }
        let ancestors = page_ancestors(self.permissions.resolver(), &hits).await?;
        let ids: Vec<ItemId> = hits.iter().map(|hit| hit.item_id.clone()).collect();
        let allowed =
            self.permissions
                .filter_allowed(&ids, &self.allowed_ids, &ancestors, self.ignore_item);
        Ok(hits
            .into_iter()
            .filter(|hit| allowed.contains(&hit.item_id))
            .collect())
    }
}

/// Drops hits that are public but not advertised.
pub struct PublicVisibilityHitFilter {
    resolver: AncestorResolver,
    visibility: PublicVisibility,
}

impl PublicVisibilityHitFilter {
    pub fn new(resolver: AncestorResolver, visibility: PublicVisibility) -> Self {
        Self {
            resolver,
            visibility,
        }
    }
}

#[async_trait]
impl HitTransformer for PublicVisibilityHitFilter {
    async fn transform(&self, hits: Vec<SearchHit>) -> Result<Vec<SearchHit>> {
        if hits.is_empty() {
            return Ok(hits);
        }
        let ancestors = page_ancestors(&self.resolver, &hits).await?;
        Ok(hits
            .into_iter()
            .filter(|hit| {
                self.visibility
                    .is_visible(&hit.item_id, hit.show_in_overview, &ancestors)
            })
            .collect())
    }
}

/// Drops hits whose every path to a root crosses a hidden collection.
pub struct HiddenAncestorHitFilter {
    resolver: AncestorResolver,
}

impl HiddenAncestorHitFilter {
    pub fn new(resolver: AncestorResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl HitTransformer for HiddenAncestorHitFilter {
    async fn transform(&self, hits: Vec<SearchHit>) -> Result<Vec<SearchHit>> {
        if hits.is_empty() {
            return Ok(hits);
        }
        let ancestors = page_ancestors(&self.resolver, &hits).await?;
        Ok(hits
            .into_iter()
            .filter(|hit| ancestors.has_visible_parent_path(&hit.item_id))
            .collect())
    }
}
