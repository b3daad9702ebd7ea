//! Scope-prioritized search.
//!
//! Results from inside a prioritized collection come first; only when that
//! subtree cannot fill a page is the search widened to the rest of what the
//! caller may see.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::ancestors::Ancestors;
use crate::config::SearchConfig;
use crate::error::Error;
use crate::model::{ItemId, ItemKind};
use crate::permissions::{PermissionInheritanceFilter, PermissionName};

pub mod filters;

pub use filters::{HiddenAncestorHitFilter, PermissionHitFilter, PublicVisibilityHitFilter};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub item_id: ItemId,
    pub kind: ItemKind,
    pub score: f64,
    #[serde(default = "default_show_in_overview")]
    pub show_in_overview: bool,
}

fn default_show_in_overview() -> bool {
    true
}

impl SearchHit {
    pub fn new(item_id: impl Into<ItemId>, kind: ItemKind, score: f64) -> Self {
        Self {
            item_id: item_id.into(),
            kind,
            score,
            show_in_overview: true,
        }
    }

    pub fn not_advertised(mut self) -> Self {
        self.show_in_overview = false;
        self
    }

    pub fn effective_score(&self, collection_boost: f64) -> f64 {
        match self.kind {
            ItemKind::Collection => self.score * collection_boost,
            _ => self.score,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    pub truncated_in_scope: bool,
    pub truncated_outside_scope: bool,
}

/// Free text plus any `lang:xx` restrictions pulled out of it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub strict_languages: Option<Vec<String>>,
}

impl SearchQuery {
    pub fn parse(raw: &str) -> Self {
        let mut words = Vec::new();
        let mut languages: Vec<String> = Vec::new();
        for word in raw.split_whitespace() {
            match word.to_lowercase().strip_prefix("lang:") {
                Some(code) if !code.is_empty() => {
                    let code = if code == "unknown" { "xx" } else { code };
                    if !languages.iter().any(|l| l == code) {
                        languages.push(code.to_string());
                    }
                }
                _ => words.push(word),
            }
        }
        Self {
            text: words.join(" "),
            strict_languages: (!languages.is_empty()).then_some(languages),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub size: usize,
}

/// Hierarchical restriction handed to the backend.
///
/// An id passes an include group when it, or one of its ancestors, is in the
/// group; it must pass every include group and no exclude group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub account_id: Option<String>,
    pub include_within: Vec<HashSet<ItemId>>,
    pub exclude_within: Vec<HashSet<ItemId>>,
}

impl SearchFilter {
    pub fn matches(&self, id: &str, ancestors: &Ancestors) -> bool {
        let lineage = ancestors.ancestor_ids(id);
        let within = |group: &HashSet<ItemId>| {
            group.contains(id) || lineage.iter().any(|ancestor| group.contains(ancestor))
        };
        self.include_within.iter().all(within) && !self.exclude_within.iter().any(within)
    }
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// One page of raw hits of a single kind.
    async fn search(
        &self,
        kind: ItemKind,
        query: &SearchQuery,
        page: PageRequest,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>>;
}

/// Post-filter applied to every page before it is merged.
#[async_trait]
pub trait HitTransformer: Send + Sync {
    async fn transform(&self, hits: Vec<SearchHit>) -> Result<Vec<SearchHit>>;
}

pub struct SearchRequest {
    pub query: String,
    pub account_id: String,
    pub user_id: Option<String>,
    pub kinds: Vec<ItemKind>,
    pub permission: PermissionName,
    pub prioritized_scope: Option<ItemId>,
    pub transformers: Vec<Arc<dyn HitTransformer>>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            account_id: account_id.into(),
            user_id: None,
            kinds: vec![ItemKind::Document, ItemKind::Collection, ItemKind::Publication],
            permission: PermissionName::View,
            prioritized_scope: None,
            transformers: Vec::new(),
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn kinds(mut self, kinds: Vec<ItemKind>) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn permission(mut self, permission: PermissionName) -> Self {
        self.permission = permission;
        self
    }

    pub fn within(mut self, scope: impl Into<ItemId>) -> Self {
        self.prioritized_scope = Some(scope.into());
        self
    }

    pub fn transformer(mut self, transformer: Arc<dyn HitTransformer>) -> Self {
        self.transformers.push(transformer);
        self
    }
}

/// Append `extra` to `base`, skipping hits whose item is already present.
pub fn merge_hits(mut base: Vec<SearchHit>, extra: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen: HashSet<ItemId> = base.iter().map(|hit| hit.item_id.clone()).collect();
    for hit in extra {
        if seen.insert(hit.item_id.clone()) {
            base.push(hit);
        }
    }
    base
}

/// Highest effective score first. Ties keep their order.
pub fn sort_by_effective_score(hits: &mut [SearchHit], collection_boost: f64) {
    hits.sort_by(|a, b| {
        b.effective_score(collection_boost)
            .partial_cmp(&a.effective_score(collection_boost))
            .unwrap_or(Ordering::Equal)
    });
}

pub struct ScopedSearchWidener {
    backend: Arc<dyn SearchBackend>,
    permissions: Arc<PermissionInheritanceFilter>,
    config: SearchConfig,
}

impl ScopedSearchWidener {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        permissions: Arc<PermissionInheritanceFilter>,
        config: SearchConfig,
    ) -> Self {
        Self {
            backend,
            permissions,
            config,
        }
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResult> {
        if request.kinds.is_empty() {
            return Err(Error::unsupported_filter("no item kinds requested"));
        }
        if request.permission != PermissionName::View && request.user_id.is_none() {
            return Err(Error::unsupported_filter(format!(
                "a user is required when searching with {:?} permission",
                request.permission
            )));
        }

        let allowed = self
            .permissions
            .allowed_items(request.permission, &request.account_id, request.user_id.as_deref())
            .await?
            .all();
        if allowed.is_empty() {
            debug!(account = %request.account_id, "nothing searchable for caller");
            return Ok(SearchResult::default());
        }

        let query = SearchQuery::parse(&request.query);
        let mut scoped = Vec::new();
        if let Some(scope) = &request.prioritized_scope {
            let filter = SearchFilter {
                account_id: None,
                include_within: vec![allowed.clone(), HashSet::from([scope.clone()])],
                exclude_within: Vec::new(),
            };
            scoped = self.search_until_enough(&query, request, &filter).await?;
            if self.have_enough(&scoped) {
                debug!(scope = %scope, hits = scoped.len(), "prioritized scope filled the page");
                return Ok(self.cut(scoped, true));
            }
        }

        let filter = SearchFilter {
            account_id: Some(request.account_id.clone()),
            include_within: vec![allowed],
            exclude_within: request
                .prioritized_scope
                .iter()
                .map(|scope| HashSet::from([scope.clone()]))
                .collect(),
        };
        let outside = self.search_until_enough(&query, request, &filter).await?;
        debug!(
            scoped = scoped.len(),
            outside = outside.len(),
            "widened search outside prioritized scope"
        );
        Ok(self.cut(merge_hits(scoped, outside), false))
    }

    /// Page through every kind until each has enough hits, then sort and
    /// cap the merged list.
    async fn search_until_enough(
        &self,
        query: &SearchQuery,
        request: &SearchRequest,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let desired = self.config.desired_results;
        let mut all = Vec::new();
        for kind in &request.kinds {
            let mut kind_hits = Vec::new();
            let mut offset = 0;
            for _ in 0..self.config.max_iterations {
                let page = PageRequest {
                    offset,
                    size: desired,
                };
                let raw = self.backend.search(*kind, query, page, filter).await?;
                if raw.is_empty() {
                    break;
                }
                offset += raw.len();

                let mut hits = raw;
                for transformer in &request.transformers {
                    hits = transformer.transform(hits).await?;
                }
                kind_hits = merge_hits(kind_hits, hits);
                if kind_hits.len() >= desired {
                    break;
                }
            }
            debug!(kind = kind.as_str(), hits = kind_hits.len(), raw = offset, "searched kind");
            all = merge_hits(all, kind_hits);
        }

        sort_by_effective_score(&mut all, self.config.collection_score_boost);
        all.truncate(desired);
        Ok(all)
    }

    fn have_enough(&self, hits: &[SearchHit]) -> bool {
        !hits.is_empty() && hits.len() >= self.config.desired_results
    }

    fn cut(&self, mut hits: Vec<SearchHit>, in_scope: bool) -> SearchResult {
        let truncated = self.have_enough(&hits);
        hits.truncate(self.config.desired_results);
        SearchResult {
            hits,
            truncated_in_scope: truncated && in_scope,
            truncated_outside_scope: truncated && !in_scope,
        }
    }
}
