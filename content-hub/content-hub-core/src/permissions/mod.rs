//! Permission inheritance over the collection hierarchy.
//!
//! A grant on a collection applies to everything below it, so deciding
//! whether an item is allowed means looking at its whole ancestor closure.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::ancestors::Ancestors;
use crate::config::PermissionConfig;
use crate::error::Error;
use crate::model::ItemId;
use crate::resolver::AncestorResolver;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Document,
    Account,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PermissionName {
    View,
    Edit,
    Review,
    Publish,
    Admin,
}

/// A set of resource ids granted as one unit.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroup {
    pub resource_type: ResourceType,
    pub ids: Vec<ItemId>,
}

/// Resource groups granted under one permission.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionMap {
    pub permission: PermissionName,
    pub resources: Vec<ResourceGroup>,
}

#[async_trait]
pub trait AuthorizationService: Send + Sync {
    async fn find_allowed_resource_groups(
        &self,
        user_id: &str,
        resource_type: ResourceType,
        permission: PermissionName,
        account_id: &str,
    ) -> Result<Vec<ResourceGroup>>;

    async fn find_public_resource_groups(
        &self,
        resource_type: ResourceType,
        permissions: &[PermissionName],
        account_ids: &[String],
    ) -> Result<Vec<PermissionMap>>;
}

/// Ids granted to the caller: `read` through their own groups, `public`
/// through public grants on the account.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllowedItems {
    pub read: HashSet<ItemId>,
    pub public: HashSet<ItemId>,
}

impl AllowedItems {
    pub fn all(&self) -> HashSet<ItemId> {
        self.read.union(&self.public).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.public.is_empty()
    }
}

pub struct PermissionInheritanceFilter {
    authorization: Arc<dyn AuthorizationService>,
    resolver: AncestorResolver,
    batch_size: usize,
}

impl PermissionInheritanceFilter {
    pub fn new(authorization: Arc<dyn AuthorizationService>, resolver: AncestorResolver) -> Self {
        Self::from_config(authorization, resolver, &PermissionConfig::default())
    }

    pub fn from_config(
        authorization: Arc<dyn AuthorizationService>,
        resolver: AncestorResolver,
        config: &PermissionConfig,
    ) -> Self {
        Self {
            authorization,
            resolver,
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn resolver(&self) -> &AncestorResolver {
        &self.resolver
    }

    /// Ids allowed directly (unless `ignore_item`) or through any ancestor.
    pub fn filter_allowed(
        &self,
        item_ids: &[ItemId],
        allowed_ids: &HashSet<ItemId>,
        ancestors: &Ancestors,
        ignore_item: bool,
    ) -> HashSet<ItemId> {
        let mut allowed = HashSet::new();
        for batch in item_ids.chunks(self.batch_size) {
            for id in batch {
                let direct = !ignore_item && allowed_ids.contains(id);
                if direct
                    || ancestors
                        .ancestor_items(id)
                        .iter()
                        .any(|ancestor| allowed_ids.contains(&ancestor.id))
                {
                    allowed.insert(id.clone());
                }
            }
        }
        allowed
    }

    /// Look up what the caller may access. Without a user only `View` can
    /// be answered, from the public grants.
    pub async fn allowed_items(
        &self,
        permission: PermissionName,
        account_id: &str,
        user_id: Option<&str>,
    ) -> Result<AllowedItems> {
        if permission != PermissionName::View && user_id.is_none() {
            return Err(Error::unsupported_filter(format!(
                "{permission:?} permission can only be checked for a user"
            )));
        }

        let read = async {
            match user_id {
                Some(user_id) => {
                    self.authorization
                        .find_allowed_resource_groups(
                            user_id,
                            ResourceType::Document,
                            permission,
                            account_id,
                        )
                        .await
                }
                None => Ok(Vec::new()),
            }
        };
        let public = async {
            if permission != PermissionName::View {
                return Ok(Vec::new());
            }
            let account_ids = [account_id.to_string()];
            self.authorization
                .find_public_resource_groups(ResourceType::Document, &[permission], &account_ids)
                .await
        };
        let (read_groups, public_maps) = futures::try_join!(read, public)?;

        let allowed = AllowedItems {
            read: read_groups.into_iter().flat_map(|group| group.ids).collect(),
            public: public_maps
                .into_iter()
                .flat_map(|map| map.resources)
                .flat_map(|group| group.ids)
                .collect(),
        };
        tracing::debug!(
            read = allowed.read.len(),
            public = allowed.public.len(),
            "fetched allowed resource groups"
        );
        Ok(allowed)
    }

    /// The subset of `item_ids` the caller may access under `permission`,
    /// in input order.
    pub async fn filter_item_ids_by_permission(
        &self,
        item_ids: &[ItemId],
        permission: PermissionName,
        account_id: &str,
        user_id: Option<&str>,
        ignore_item: bool,
    ) -> Result<Vec<ItemId>> {
        let allowed_ids = self
            .allowed_items(permission, account_id, user_id)
            .await?
            .all();
        if allowed_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for batch in item_ids.chunks(self.batch_size) {
            let ancestors = self.resolver.get_ancestors(batch).await?;
            let allowed = self.filter_allowed(batch, &allowed_ids, &ancestors, ignore_item);
            out.extend(batch.iter().filter(|id| allowed.contains(*id)).cloned());
        }
        Ok(out)
    }
}

/// "Public but not advertised" visibility for browsing surfaces.
#[derive(Clone, Debug, Default)]
pub struct PublicVisibility {
    read_ids: HashSet<ItemId>,
    public_ids: HashSet<ItemId>,
}

impl PublicVisibility {
    pub fn new(read_ids: HashSet<ItemId>, public_ids: HashSet<ItemId>) -> Self {
        Self {
            read_ids,
            public_ids,
        }
    }

    pub fn from_allowed(allowed: &AllowedItems) -> Self {
        Self::new(allowed.read.clone(), allowed.public.clone())
    }

    /// Direct read access always wins. Otherwise an item that is only
    /// reachable through public grants shows up when it, or some public
    /// ancestor, is advertised.
    pub fn is_visible(&self, id: &str, show_in_overview: bool, ancestors: &Ancestors) -> bool {
        let chain = ancestors.ancestor_items(id);
        if self.read_ids.contains(id) || chain.iter().any(|a| self.read_ids.contains(&a.id)) {
            return true;
        }
        if self.public_ids.contains(id) && !show_in_overview {
            return false;
        }
        let mut public_ancestors = chain
            .iter()
            .filter(|a| self.public_ids.contains(&a.id))
            .peekable();
        if public_ancestors.peek().is_none() {
            return true;
        }
        public_ancestors.any(|a| a.show_in_overview)
    }
}
