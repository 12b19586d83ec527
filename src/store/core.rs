//!
//! Keyed grant storage on top of a [`KvBackend`].
//!
//! The store is deliberately unaware of time: `get` and the scans return expired records
//! exactly as stored. Hiding them is the query layer's job.

use std::collections::VecDeque;
use std::ops::Bound;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cancel::Cancellation;
use crate::capability::Capability;
use crate::config::StoreConfig;
use crate::cursor::{Page, PageToken};
use crate::error::{GrantError, StorageError};
use crate::keys::{
    all_grants_prefix, decode_expiry_queue_key, decode_grant_key, expiry_queue_end, expiry_queue_key,
    expiry_queue_prefix, grant_key_bytes, granter_prefix, pair_prefix, prefix_end,
};
use crate::primitives::{ActionType, GrantKey, Principal};
use crate::record::GrantRecord;
use crate::store::backend::{KvBackend, WriteBatch};
use crate::store::memory::MemoryBackend;

/// Persistent map from [`GrantKey`] to [`GrantRecord`], plus the expiry queue.
///
/// Single-key writes are atomic. Composite writes (a grant and its queue entry) go through
/// a short-lived write gate so a concurrent re-grant cannot interleave with them; the gate
/// is never held across calls and readers never take it.
#[derive(Debug)]
pub struct GrantStore<B: KvBackend = MemoryBackend> {
    backend: B,
    config: StoreConfig,
    write_gate: Mutex<()>,
}

/// What happened to one expiry-queue entry during cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueOutcome {
    /// The grant was expired and has been deleted.
    Removed,
    /// The grant was re-granted with another expiration or revoked; only the queue entry went.
    Stale,
    /// The entry is the grant's own and the grant expires later within the same
    /// microsecond; both were kept for a later pass.
    NotDue,
}

impl GrantStore<MemoryBackend> {
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }
}

impl<B: KvBackend> GrantStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, StoreConfig::default())
    }

    pub fn with_config(backend: B, config: StoreConfig) -> Self {
        GrantStore {
            backend,
            config,
            write_gate: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Inserts or overwrites the record at `key`.
    pub fn put(&self, key: &GrantKey, record: &GrantRecord) -> Result<(), StorageError> {
        let key_bytes = grant_key_bytes(key);
        let value = record.to_bytes()?;

        let _gate = self.write_gate.lock();
        let mut batch = WriteBatch::new();
        if let Some(old) = self.backend.get(&key_bytes)? {
            if let Some(exp) = queued_expiration(key, &old) {
                batch.delete(expiry_queue_key(&exp, key));
            }
        }
        batch.put(key_bytes, value);
        if let Some(exp) = &record.expiration {
            batch.put(expiry_queue_key(exp, key), Vec::new());
        }
        self.backend.write(batch)?;
        debug!(granter = %key.granter, grantee = %key.grantee, action = %key.action_type, "stored grant");
        Ok(())
    }

    /// Exact lookup. Expired records are returned as stored.
    pub fn get(&self, key: &GrantKey) -> Result<Option<GrantRecord>, StorageError> {
        self.backend
            .get(&grant_key_bytes(key))?
            .map(|bytes| GrantRecord::from_bytes(&bytes))
            .transpose()
    }

    /// Removes the record at `key`. Returns whether one was there; an absent key is not an error.
    pub fn delete(&self, key: &GrantKey) -> Result<bool, StorageError> {
        let key_bytes = grant_key_bytes(key);

        let _gate = self.write_gate.lock();
        let Some(old) = self.backend.get(&key_bytes)? else {
            return Ok(false);
        };
        let mut batch = WriteBatch::new();
        if let Some(exp) = queued_expiration(key, &old) {
            batch.delete(expiry_queue_key(&exp, key));
        }
        batch.delete(key_bytes);
        self.backend.write(batch)?;
        debug!(granter = %key.granter, grantee = %key.grantee, action = %key.action_type, "deleted grant");
        Ok(true)
    }

    /// Policy-checked write: validates `capability`, requires `expiration` to be after `now`,
    /// and requires an action-bound capability to match the key's action type.
    pub fn grant(
        &self,
        key: &GrantKey,
        capability: &Capability,
        expiration: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), GrantError> {
        if let Some(bound) = capability.bound_action_type() {
            if bound != &key.action_type {
                return Err(GrantError::InvalidGrant(format!(
                    "capability is for {bound} but the grant is keyed under {}",
                    key.action_type
                )));
            }
        }
        let record = GrantRecord::new_checked(capability, expiration, now)?;
        self.put(key, &record)?;
        Ok(())
    }

    /// Revokes a grant. Returns whether one existed.
    pub fn revoke(&self, key: &GrantKey) -> Result<bool, GrantError> {
        Ok(self.delete(key)?)
    }

    /// Every action type granted from `granter` to `grantee`, ascending. Each call starts a
    /// fresh scan.
    pub fn scan_prefix<'a>(
        &'a self,
        granter: &Principal,
        grantee: &Principal,
    ) -> impl Iterator<Item = Result<(ActionType, GrantRecord), StorageError>> + 'a {
        self.scan_pair_after(granter, grantee, None)
            .map(|item| item.map(|(key, record)| (key.action_type, record)))
    }

    /// Like [`scan_prefix`](Self::scan_prefix), yielding full keys and resuming strictly
    /// after `after` when given.
    pub fn scan_pair_after(&self, granter: &Principal, grantee: &Principal, after: Option<&GrantKey>) -> GrantScan<'_, B> {
        GrantScan::new(self, pair_prefix(granter, grantee), after)
    }

    /// Every grant issued by `granter`, in key order.
    pub fn scan_granter_after(&self, granter: &Principal, after: Option<&GrantKey>) -> GrantScan<'_, B> {
        GrantScan::new(self, granter_prefix(granter), after)
    }

    /// Every stored grant, in key order.
    pub fn scan_all_after(&self, after: Option<&GrantKey>) -> GrantScan<'_, B> {
        GrantScan::new(self, all_grants_prefix(), after)
    }

    /// One page of the full enumeration, expired records included.
    ///
    /// `page_token` is empty for the first page; `page_size` 0 uses the configured default.
    pub fn scan_all(
        &self,
        page_token: &str,
        page_size: u32,
        cancel: &dyn Cancellation,
    ) -> Result<Page<(GrantKey, GrantRecord)>, GrantError> {
        let after = PageToken::decode(page_token)?;
        let limit = self.config.effective_page_size(page_size);
        let scan = self.scan_all_after(after.as_ref().map(PageToken::last_key));
        paginate(scan.map(|item| item.map_err(GrantError::from)), limit, cancel, |(key, _)| key.clone())
    }

    /// Up to `limit` expiry-queue entries due at or before `now`, oldest first.
    pub(crate) fn due_expirations(
        &self,
        now: &DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, GrantKey)>, StorageError> {
        let start = expiry_queue_prefix();
        let end = expiry_queue_end(now);
        self.backend
            .range(Bound::Included(start.as_slice()), Bound::Excluded(end.as_slice()), limit)?
            .into_iter()
            .map(|(queue_key, _)| {
                let (_, key) = decode_expiry_queue_key(&queue_key)?;
                Ok((queue_key, key))
            })
            .collect()
    }

    /// Drops one expiry-queue entry, deleting its grant if that grant is still expired as of
    /// `now`. An entry that still belongs to a live grant is left in place.
    pub(crate) fn remove_if_expired(
        &self,
        queue_key: Vec<u8>,
        key: &GrantKey,
        now: &DateTime<Utc>,
    ) -> Result<QueueOutcome, StorageError> {
        let key_bytes = grant_key_bytes(key);

        let _gate = self.write_gate.lock();
        let current = self
            .backend
            .get(&key_bytes)?
            .map(|bytes| GrantRecord::from_bytes(&bytes))
            .transpose()?;
        let own_queue_key = current
            .as_ref()
            .and_then(|record| record.expiration.as_ref())
            .map(|exp| expiry_queue_key(exp, key));
        let mut batch = WriteBatch::new();
        let outcome = match current {
            Some(record) if record.is_expired(now) => {
                if let Some(own) = own_queue_key {
                    if own != queue_key {
                        batch.delete(own);
                    }
                }
                batch.delete(key_bytes);
                QueueOutcome::Removed
            }
            Some(_) if own_queue_key.as_deref() == Some(queue_key.as_slice()) => {
                return Ok(QueueOutcome::NotDue);
            }
            _ => QueueOutcome::Stale,
        };
        batch.delete(queue_key);
        self.backend.write(batch)?;
        Ok(outcome)
    }
}

/// Expiration recorded in the stored bytes of `key`. A record that no longer decodes is
/// logged and treated as having no queue entry, so overwriting or deleting it still works.
fn queued_expiration(key: &GrantKey, stored: &[u8]) -> Option<DateTime<Utc>> {
    match GrantRecord::from_bytes(stored) {
        Ok(record) => record.expiration,
        Err(e) => {
            warn!(granter = %key.granter, grantee = %key.grantee, action = %key.action_type, error = %e, "replacing undecodable grant record");
            None
        }
    }
}

/// Collects up to `limit` items, then peeks one further item to decide whether a next page
/// exists. The token names the last item returned, never the peeked one.
pub(crate) fn paginate<T, I>(
    mut items: I,
    limit: usize,
    cancel: &dyn Cancellation,
    key_of: impl Fn(&T) -> GrantKey,
) -> Result<Page<T>, GrantError>
where
    I: Iterator<Item = Result<T, GrantError>>,
{
    let mut page = Vec::with_capacity(limit.min(1024));
    while page.len() < limit {
        cancel.check()?;
        match items.next() {
            Some(item) => page.push(item?),
            None => {
                return Ok(Page { items: page, next_page_token: String::new() });
            }
        }
    }
    cancel.check()?;
    let more = items.next().transpose()?.is_some();
    let next_page_token = match page.last() {
        Some(last) if more => PageToken::after(key_of(last)).encode(),
        _ => String::new(),
    };
    Ok(Page { items: page, next_page_token })
}

/// Lazy ordered scan over all grant keys sharing a prefix.
///
/// Entries are fetched from the backend `scan_chunk_size` at a time; each fetch is an
/// independent consistent read and the scan resumes after the last key it saw. The
/// iterator ends after the first error.
pub struct GrantScan<'a, B: KvBackend> {
    store: &'a GrantStore<B>,
    lower: Vec<u8>,
    lower_inclusive: bool,
    upper: Option<Vec<u8>>,
    buffer: VecDeque<(Vec<u8>, Vec<u8>)>,
    done: bool,
}

impl<'a, B: KvBackend> GrantScan<'a, B> {
    fn new(store: &'a GrantStore<B>, prefix: Vec<u8>, after: Option<&GrantKey>) -> Self {
        let upper = prefix_end(&prefix);
        let (lower, lower_inclusive) = match after.map(grant_key_bytes) {
            Some(after) if after >= prefix => (after, false),
            _ => (prefix, true),
        };
        GrantScan {
            store,
            lower,
            lower_inclusive,
            upper,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    fn refill(&mut self) -> Result<(), StorageError> {
        let chunk = self.store.config.scan_chunk_size.max(1) as usize;
        let lower = if self.lower_inclusive {
            Bound::Included(self.lower.as_slice())
        } else {
            Bound::Excluded(self.lower.as_slice())
        };
        let upper = match &self.upper {
            Some(end) => Bound::Excluded(end.as_slice()),
            None => Bound::Unbounded,
        };
        let fetched = self.store.backend.range(lower, upper, chunk)?;
        if fetched.len() < chunk {
            self.done = true;
        }
        if let Some((last, _)) = fetched.last() {
            self.lower = last.clone();
            self.lower_inclusive = false;
        }
        self.buffer.extend(fetched);
        Ok(())
    }
}

impl<B: KvBackend> Iterator for GrantScan<'_, B> {
    type Item = Result<(GrantKey, GrantRecord), StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            if let Err(e) = self.refill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        let (key, value) = self.buffer.pop_front()?;
        let decoded = decode_grant_key(&key).and_then(|k| Ok((k, GrantRecord::from_bytes(&value)?)));
        if decoded.is_err() {
            self.done = true;
            self.buffer.clear();
        }
        Some(decoded)
    }
}
