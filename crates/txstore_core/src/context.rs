//! Transaction context: participant factory and completion driver.
//!
//! A [`StoreRegistry`] holds everything a transaction needs to create
//! participants (connection pool, path store, coordinator, and the storage
//! kind of every object type). A [`TransactionContext`] is one unit of work
//! against a registry: it creates and enlists participants on first use and
//! drives them through commit or rollback in enlistment order.
//!
//! ```text
//! begin ──► connection() / blob_store(key) ──► commit() or rollback()
//!                  │ create + open (enlist)          │ prepare (all Ready)
//!                  ▼                                 ▼ commit each in order,
//!            participants[]  ─────────────────────── abort the rest on failure
//! ```

use crate::blob::{BlobStore, InlineBlobStore, StagedFileBlobStore};
use crate::config::{Config, StoreKind};
use crate::connection::{BorrowedConnection, ConnectionParticipant, ConnectionPool, PooledConnection};
use crate::coordinator::Coordinator;
use crate::error::{CoreError, CoreResult};
use crate::lease::LeaseRegistry;
use crate::participant::{Participant, ParticipantState, TxnHandle};
use crate::types::{BlobKey, ObjectType, ResourceKind, ResourceManagerId, TransactionId, Vote};
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, warn};
use txstore_storage::PathStore;

/// Shared configuration every transaction context is created from.
pub struct StoreRegistry {
    /// Source of SQL connections.
    pool: Option<Arc<dyn ConnectionPool>>,
    /// Backend of staged-file stores.
    path_store: Option<Arc<dyn PathStore>>,
    /// Transaction coordinator.
    coordinator: Arc<dyn Coordinator>,
    /// Storage kind per object type.
    kinds: HashMap<ObjectType, StoreKind>,
    /// Per-object leases, when a lease timeout is configured.
    leases: Option<Arc<LeaseRegistry>>,
    /// Tuning.
    config: Config,
}

impl StoreRegistry {
    /// Starts building a registry around `coordinator`.
    #[must_use]
    pub fn builder(coordinator: Arc<dyn Coordinator>) -> StoreRegistryBuilder {
        StoreRegistryBuilder {
            pool: None,
            path_store: None,
            coordinator,
            kinds: HashMap::new(),
            config: Config::default(),
        }
    }

    /// Returns the coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<dyn Coordinator> {
        &self.coordinator
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the lease registry, if leasing is enabled.
    #[must_use]
    pub fn leases(&self) -> Option<&Arc<LeaseRegistry>> {
        self.leases.as_ref()
    }

    /// Returns the storage kind registered for `object_type`.
    #[must_use]
    pub fn kind_of(&self, object_type: &ObjectType) -> Option<&StoreKind> {
        self.kinds.get(object_type)
    }

    /// Returns every registered object type, sorted.
    #[must_use]
    pub fn object_types(&self) -> Vec<&ObjectType> {
        let mut types: Vec<_> = self.kinds.keys().collect();
        types.sort();
        types
    }

    /// Streams the committed content of `key` into `sink`, outside any
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for unregistered types and
    /// [`CoreError::NotReadable`] if there is no content.
    pub fn read(&self, key: &BlobKey, sink: &mut dyn Write) -> CoreResult<u64> {
        self.detached_store(key)?.read(sink)
    }

    /// Opens the committed content of `key` as a stream, outside any
    /// transaction.
    ///
    /// # Errors
    ///
    /// See [`StoreRegistry::read`].
    pub fn open_read(&self, key: &BlobKey) -> CoreResult<Box<dyn Read + Send>> {
        self.detached_store(key)?.open_read()
    }

    fn pool(&self) -> CoreResult<&Arc<dyn ConnectionPool>> {
        self.pool
            .as_ref()
            .ok_or_else(|| CoreError::invalid_config("no connection pool configured"))
    }

    fn path_store(&self) -> CoreResult<&Arc<dyn PathStore>> {
        self.path_store
            .as_ref()
            .ok_or_else(|| CoreError::invalid_config("no path store configured"))
    }

    fn kind(&self, key: &BlobKey) -> CoreResult<&StoreKind> {
        self.kinds.get(&key.object_type).ok_or_else(|| {
            CoreError::invalid_config(format!("object type {} is not registered", key.object_type))
        })
    }

    fn detached_store(&self, key: &BlobKey) -> CoreResult<Box<dyn BlobStore>> {
        Ok(match self.kind(key)? {
            StoreKind::Inline(column) => {
                let pool = self.pool()?;
                let rm = ResourceManagerId::new(ResourceKind::Connection, pool.name());
                Box::new(InlineBlobStore::new(
                    BorrowedConnection::detached(rm),
                    Arc::clone(pool),
                    column.clone(),
                    key.clone(),
                    &self.config,
                ))
            }
            StoreKind::StagedFile(layout) => Box::new(StagedFileBlobStore::new(
                Arc::clone(self.path_store()?),
                layout,
                key.clone(),
                &self.config,
            )),
        })
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("pool", &self.pool.as_ref().map(|p| p.name().to_string()))
            .field("path_store", &self.path_store)
            .field("kinds", &self.kinds)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`StoreRegistry`].
pub struct StoreRegistryBuilder {
    pool: Option<Arc<dyn ConnectionPool>>,
    path_store: Option<Arc<dyn PathStore>>,
    coordinator: Arc<dyn Coordinator>,
    kinds: HashMap<ObjectType, StoreKind>,
    config: Config,
}

impl StoreRegistryBuilder {
    /// Sets the connection pool.
    #[must_use]
    pub fn pool(mut self, pool: Arc<dyn ConnectionPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Sets the path store backing staged-file types.
    #[must_use]
    pub fn path_store(mut self, store: Arc<dyn PathStore>) -> Self {
        self.path_store = Some(store);
        self
    }

    /// Registers how content of `object_type` is stored.
    #[must_use]
    pub fn register(mut self, object_type: ObjectType, kind: StoreKind) -> Self {
        self.kinds.insert(object_type, kind);
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Validates the registrations and builds the registry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for invalid settings, or for a
    /// registered kind whose backend was not provided.
    pub fn build(self) -> CoreResult<Arc<StoreRegistry>> {
        self.config.validate()?;
        for (object_type, kind) in &self.kinds {
            kind.validate()?;
            let missing = match kind {
                StoreKind::Inline(_) if self.pool.is_none() => Some("a connection pool"),
                StoreKind::StagedFile(_) if self.path_store.is_none() => Some("a path store"),
                _ => None,
            };
            if let Some(what) = missing {
                return Err(CoreError::invalid_config(format!(
                    "object type {object_type} needs {what}"
                )));
            }
        }

        let leases = self.config.lease_timeout.map(|_| LeaseRegistry::new());
        Ok(Arc::new(StoreRegistry {
            pool: self.pool,
            path_store: self.path_store,
            coordinator: self.coordinator,
            kinds: self.kinds,
            leases,
            config: self.config,
        }))
    }
}

/// State of a transaction context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Accepting work.
    Active,
    /// Committed.
    Committed,
    /// Rolled back, by request or because commit failed.
    RolledBack,
}

enum ScopedStore {
    Inline(InlineBlobStore),
    Staged(StagedFileBlobStore),
}

impl ScopedStore {
    fn as_blob_store(&mut self) -> &mut dyn BlobStore {
        match self {
            Self::Inline(store) => store,
            Self::Staged(store) => store,
        }
    }

    fn as_participant(&mut self) -> &mut dyn Participant {
        match self {
            Self::Inline(store) => store,
            Self::Staged(store) => store,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Connection,
    Store(usize),
}

/// One unit of work over a [`StoreRegistry`].
///
/// Dropping an active context rolls it back.
pub struct TransactionContext {
    registry: Arc<StoreRegistry>,
    txn: TxnHandle,
    state: ContextState,
    connection: Option<ConnectionParticipant>,
    stores: Vec<ScopedStore>,
    by_key: HashMap<BlobKey, usize>,
    /// Enlistment order.
    order: Vec<Slot>,
}

impl TransactionContext {
    /// Begins a new transaction.
    #[must_use]
    pub fn begin(registry: &Arc<StoreRegistry>) -> Self {
        let id = TransactionId::generate();
        debug!(txn = %id, "transaction begun");
        Self {
            txn: TxnHandle::new(id, Arc::clone(&registry.coordinator)),
            registry: Arc::clone(registry),
            state: ContextState::Active,
            connection: None,
            stores: Vec::new(),
            by_key: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.txn.id()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Returns the handle participants are enlisted with.
    #[must_use]
    pub fn txn(&self) -> &TxnHandle {
        &self.txn
    }

    /// Returns the number of participants enlisted so far.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.order.len()
    }

    /// Returns the transaction's connection, checking it out and enlisting
    /// it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] without a pool,
    /// [`CoreError::Enlist`] if no connection can be obtained, or
    /// [`CoreError::InvalidOperation`] once the context has completed.
    pub fn connection(&mut self) -> CoreResult<&mut ConnectionParticipant> {
        self.ensure_active()?;
        if self.connection.is_none() {
            let pool = self.registry.pool()?;
            let conn = PooledConnection::checkout(pool)
                .map_err(|e| CoreError::enlist(format!("connection checkout failed: {e}")))?;
            let mut participant = ConnectionParticipant::new(conn)?;
            participant.open(&self.txn)?;
            self.order.push(Slot::Connection);
            self.connection = Some(participant);
        }
        self.connection
            .as_mut()
            .ok_or_else(|| CoreError::invalid_operation("connection slot is empty"))
    }

    /// Returns the blob store for `key`, creating and enlisting it on first
    /// use. Each key has one store per transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for unregistered types,
    /// [`CoreError::LeaseTimeout`] if another transaction keeps the key
    /// leased, or any enlistment error.
    pub fn blob_store(&mut self, key: &BlobKey) -> CoreResult<&mut dyn BlobStore> {
        let index = self.store_index(key)?;
        Ok(self.stores[index].as_blob_store())
    }

    /// Returns the staged-file store for `key`, for operations only that
    /// kind offers such as [`StagedFileBlobStore::read_backup`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `key`'s type is stored
    /// inline, or any error of [`TransactionContext::blob_store`].
    pub fn staged_store(&mut self, key: &BlobKey) -> CoreResult<&mut StagedFileBlobStore> {
        let index = self.store_index(key)?;
        match &mut self.stores[index] {
            ScopedStore::Staged(store) => Ok(store),
            ScopedStore::Inline(_) => Err(CoreError::invalid_operation(format!(
                "{key} is stored inline"
            ))),
        }
    }

    /// Marks the transaction so that it can only roll back.
    pub fn set_rollback_only(&self) {
        self.txn.set_rollback_only();
    }

    /// Returns true if the transaction can no longer commit.
    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.txn.is_rollback_only()
    }

    /// Commits every participant in enlistment order.
    ///
    /// A rollback-only transaction is rolled back instead. On the first
    /// failed participant the transaction becomes rollback-only and every
    /// remaining participant is aborted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionAborted`] for a rollback-only
    /// transaction, the first [`CoreError::CommitFailed`], or
    /// [`CoreError::InvalidOperation`] if the context already completed or
    /// a participant was not released.
    pub fn commit(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        let id = self.txn.id();
        self.registry.coordinator.begin_completion(id);

        if self.txn.is_rollback_only() {
            debug!(txn = %id, "rollback-only transaction asked to commit");
            if let Err(e) = self.abort_all() {
                warn!(txn = %id, error = %e, "rollback of rollback-only transaction failed");
            }
            self.finish(ContextState::RolledBack)?;
            return Err(CoreError::transaction_aborted(format!("{id} is rollback-only")));
        }

        for slot in self.order.clone() {
            if let Some(participant) = self.open_participant(slot) {
                let Vote::Ready = participant.prepare();
            }
        }

        let mut failure = None;
        for slot in self.order.clone() {
            let Some(participant) = self.open_participant(slot) else {
                continue;
            };
            if failure.is_none() {
                if let Err(e) = participant.commit() {
                    failure = Some(e);
                }
            } else if let Err(e) = participant.abort() {
                warn!(txn = %id, error = %e, "abort after failed commit failed");
            }
        }

        match failure {
            None => {
                self.finish(ContextState::Committed)?;
                debug!(txn = %id, "transaction committed");
                Ok(())
            }
            Some(e) => {
                self.txn.set_rollback_only();
                self.finish(ContextState::RolledBack)?;
                Err(e)
            }
        }
    }

    /// Aborts every open participant.
    ///
    /// # Errors
    ///
    /// Returns the first [`CoreError::RollbackFailed`] after every
    /// participant was attempted, or [`CoreError::InvalidOperation`] if the
    /// context already completed.
    pub fn rollback(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        self.registry.coordinator.begin_completion(self.txn.id());
        self.txn.set_rollback_only();
        let result = self.abort_all();
        self.finish(ContextState::RolledBack)?;
        debug!(txn = %self.txn.id(), "transaction rolled back");
        result
    }

    fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            ContextState::Active => Ok(()),
            state => Err(CoreError::invalid_operation(format!(
                "{} already completed ({state:?})",
                self.txn.id()
            ))),
        }
    }

    fn store_index(&mut self, key: &BlobKey) -> CoreResult<usize> {
        self.ensure_active()?;
        if let Some(index) = self.by_key.get(key) {
            return Ok(*index);
        }

        let mut store = match self.registry.kind(key)?.clone() {
            StoreKind::Inline(column) => {
                let conn = self.connection()?.borrow();
                ScopedStore::Inline(InlineBlobStore::new(
                    conn,
                    Arc::clone(self.registry.pool()?),
                    column,
                    key.clone(),
                    &self.registry.config,
                ))
            }
            StoreKind::StagedFile(layout) => {
                let mut store = StagedFileBlobStore::new(
                    Arc::clone(self.registry.path_store()?),
                    &layout,
                    key.clone(),
                    &self.registry.config,
                );
                if let (Some(leases), Some(timeout)) =
                    (&self.registry.leases, self.registry.config.lease_timeout)
                {
                    store = store.with_lease(leases.acquire(key, self.txn.id(), timeout)?);
                }
                ScopedStore::Staged(store)
            }
        };
        store.as_participant().open(&self.txn)?;

        let index = self.stores.len();
        self.stores.push(store);
        self.by_key.insert(key.clone(), index);
        self.order.push(Slot::Store(index));
        Ok(index)
    }

    fn open_participant(&mut self, slot: Slot) -> Option<&mut dyn Participant> {
        let participant: &mut dyn Participant = match slot {
            Slot::Connection => self.connection.as_mut()?,
            Slot::Store(index) => self.stores.get_mut(index)?.as_participant(),
        };
        (participant.state() == ParticipantState::Open).then_some(participant)
    }

    fn abort_all(&mut self) -> CoreResult<()> {
        let id = self.txn.id();
        let mut first = None;
        for slot in self.order.clone() {
            if let Some(participant) = self.open_participant(slot) {
                if let Err(e) = participant.abort() {
                    warn!(txn = %id, error = %e, "participant abort failed");
                    first.get_or_insert(e);
                }
            }
        }
        first.map_or(Ok(()), Err)
    }

    fn finish(&mut self, state: ContextState) -> CoreResult<()> {
        self.state = state;
        let id = self.txn.id();
        self.registry.coordinator.end(id);

        let leaked = self.txn.live_participants();
        if !leaked.is_empty() {
            warn!(txn = %id, count = leaked.len(), "participants not released");
            return Err(CoreError::invalid_operation(format!(
                "{} participant(s) of {id} were not released",
                leaked.len()
            )));
        }
        Ok(())
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if self.state == ContextState::Active {
            warn!(txn = %self.txn.id(), "active transaction dropped, rolling back");
            if let Err(e) = self.rollback() {
                warn!(txn = %self.txn.id(), error = %e, "rollback on drop failed");
            }
        }
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.txn.id())
            .field("state", &self.state)
            .field("participants", &self.order.len())
            .field("rollback_only", &self.is_rollback_only())
            .finish()
    }
}
