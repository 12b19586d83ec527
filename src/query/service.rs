//! Expiration-aware read API over a [`GrantStore`].
//!
//! Listing queries drop expired records while streaming and only then cut the page, so a
//! page holds up to `page_size` live grants no matter how many expired ones sit between
//! them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::cancel::Cancellation;
use crate::cursor::{Page, PageToken};
use crate::error::GrantError;
use crate::primitives::{ActionType, GrantKey, Principal};
use crate::record::Grant;
use crate::store::core::paginate;
use crate::store::{GrantScan, GrantStore, KvBackend, MemoryBackend};

/// Paging parameters of a listing query.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PageRequest {
    /// Empty for the first page, otherwise the `next_page_token` of the previous page.
    pub page_token: String,
    /// 0 means the configured default.
    pub page_size: u32,
}

impl PageRequest {
    pub fn first(page_size: u32) -> Self {
        PageRequest { page_token: String::new(), page_size }
    }

    pub fn next(page_token: impl Into<String>, page_size: u32) -> Self {
        PageRequest { page_token: page_token.into(), page_size }
    }
}

/// Read-only query layer. Cheap to clone; clones share the store.
#[derive(Debug)]
pub struct QueryService<B: KvBackend = MemoryBackend> {
    store: Arc<GrantStore<B>>,
}

impl<B: KvBackend> Clone for QueryService<B> {
    fn clone(&self) -> Self {
        QueryService { store: Arc::clone(&self.store) }
    }
}

impl<B: KvBackend> QueryService<B> {
    pub fn new(store: Arc<GrantStore<B>>) -> Self {
        QueryService { store }
    }

    pub fn store(&self) -> &Arc<GrantStore<B>> {
        &self.store
    }

    /// Decodes a text address under the configured prefix.
    pub fn parse_principal(&self, text: &str) -> Result<Principal, GrantError> {
        Ok(Principal::parse_with_prefix(text, &self.store.config().address_prefix)?)
    }

    /// The live grant at (granter, grantee, action_type) as of `as_of` (default: now).
    ///
    /// An expired record is reported as [`GrantError::NotFound`] even before cleanup removes it.
    pub fn query_single(
        &self,
        granter: &Principal,
        grantee: &Principal,
        action_type: &ActionType,
        as_of: Option<DateTime<Utc>>,
        cancel: &dyn Cancellation,
    ) -> Result<Grant, GrantError> {
        let as_of = as_of.unwrap_or_else(Utc::now);
        cancel.check()?;
        let key = GrantKey::new(*granter, *grantee, action_type.clone());
        match self.store.get(&key)? {
            Some(record) if record.is_live(&as_of) => Ok(Grant::try_from(&record)?),
            Some(_) => {
                debug!(%granter, %grantee, action = %action_type, %as_of, "grant expired");
                Err(GrantError::NotFound)
            }
            None => {
                debug!(%granter, %grantee, action = %action_type, "no grant");
                Err(GrantError::NotFound)
            }
        }
    }

    /// Live grants from `granter` to `grantee`, ordered by action type.
    pub fn query_pair(
        &self,
        granter: &Principal,
        grantee: &Principal,
        as_of: Option<DateTime<Utc>>,
        request: &PageRequest,
        cancel: &dyn Cancellation,
    ) -> Result<Page<(ActionType, Grant)>, GrantError> {
        let as_of = as_of.unwrap_or_else(Utc::now);
        let after = PageToken::decode(&request.page_token)?;
        if let Some(token) = &after {
            let last = token.last_key();
            if last.granter != *granter || last.grantee != *grantee {
                return Err(GrantError::InvalidPageToken(
                    "token belongs to a different granter/grantee listing".into(),
                ));
            }
        }
        let scan = self
            .store
            .scan_pair_after(granter, grantee, after.as_ref().map(PageToken::last_key));
        let page = self.live_page(scan, as_of, request.page_size, cancel)?;
        debug!(%granter, %grantee, returned = page.items.len(), more = !page.is_last(), "pair query");
        Ok(Page {
            items: page
                .items
                .into_iter()
                .map(|(key, grant)| (key.action_type, grant))
                .collect(),
            next_page_token: page.next_page_token,
        })
    }

    /// Live grants issued by `granter` to anyone, ordered by (grantee, action type).
    pub fn query_granter(
        &self,
        granter: &Principal,
        as_of: Option<DateTime<Utc>>,
        request: &PageRequest,
        cancel: &dyn Cancellation,
    ) -> Result<Page<(GrantKey, Grant)>, GrantError> {
        let as_of = as_of.unwrap_or_else(Utc::now);
        let after = PageToken::decode(&request.page_token)?;
        if let Some(token) = &after {
            if token.last_key().granter != *granter {
                return Err(GrantError::InvalidPageToken(
                    "token belongs to a different granter listing".into(),
                ));
            }
        }
        let scan = self
            .store
            .scan_granter_after(granter, after.as_ref().map(PageToken::last_key));
        self.live_page(scan, as_of, request.page_size, cancel)
    }

    /// Every live grant in the store, in key order.
    pub fn query_all(
        &self,
        as_of: Option<DateTime<Utc>>,
        request: &PageRequest,
        cancel: &dyn Cancellation,
    ) -> Result<Page<(GrantKey, Grant)>, GrantError> {
        let as_of = as_of.unwrap_or_else(Utc::now);
        let after = PageToken::decode(&request.page_token)?;
        let scan = self.store.scan_all_after(after.as_ref().map(PageToken::last_key));
        self.live_page(scan, as_of, request.page_size, cancel)
    }

    fn live_page(
        &self,
        scan: GrantScan<'_, B>,
        as_of: DateTime<Utc>,
        page_size: u32,
        cancel: &dyn Cancellation,
    ) -> Result<Page<(GrantKey, Grant)>, GrantError> {
        let limit = self.store.config().effective_page_size(page_size);
        let live = scan.filter_map(|item| {
            if let Err(e) = cancel.check() {
                return Some(Err(e));
            }
            match item {
                Err(e) => Some(Err(GrantError::from(e))),
                Ok((_, record)) if record.is_expired(&as_of) => None,
                Ok((key, record)) => Some(Grant::try_from(&record).map(|grant| (key, grant)).map_err(GrantError::from)),
            }
        });
        paginate(live, limit, cancel, |(key, _)| key.clone())
    }
}
