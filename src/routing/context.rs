//! Transaction boundary manager.
//!
//! A [`UnitOfWorkContext`] belongs to one logical execution path (one task,
//! one request). It owns the unit-of-work stack for that path, applies the
//! propagation rules on `begin`, finalizes physical transactions on `end`,
//! and hands out the connection bound to the current unit of work.
//!
//! Contexts are never shared: concurrent tasks each take their own from
//! [`PoolRegistry::context`], so the stack needs no locking. The pools behind
//! the registry are the only shared state.

use crate::db::{DbTransaction, PoolKey, PoolRegistry};
use crate::error::{RouterError, RouterResult};
use crate::models::{DatabaseType, ExecuteResult, QueryParam, Record};
use crate::routing::decision;
use crate::routing::descriptor::{
    Outcome, Propagation, TransactionDefinition, UnitOfWorkDescriptor, UnitOfWorkHandle,
};
use crate::routing::stack::UnitOfWorkStack;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A physical transaction owned by a unit of work.
#[derive(Debug)]
pub struct Binding {
    key: PoolKey,
    tx: DbTransaction,
}

/// The connection serving the current unit of work.
///
/// Borrowed from the context, so it cannot outlive the unit of work it
/// belongs to.
#[derive(Debug)]
pub struct BoundConnection<'a> {
    key: PoolKey,
    tx: &'a mut DbTransaction,
}

impl BoundConnection<'_> {
    /// The pool this connection came from.
    pub fn pool(&self) -> PoolKey {
        self.key
    }

    pub fn db_type(&self) -> DatabaseType {
        self.tx.db_type()
    }

    pub async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> RouterResult<ExecuteResult> {
        self.tx.execute(sql, params).await
    }

    pub async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> RouterResult<Vec<Record>> {
        self.tx.fetch_all(sql, params).await
    }
}

/// Unit-of-work state for one logical execution path.
#[derive(Debug)]
pub struct UnitOfWorkContext {
    id: String,
    registry: Arc<PoolRegistry>,
    stack: UnitOfWorkStack<Binding>,
    next_unit_id: u64,
}

impl UnitOfWorkContext {
    pub(crate) fn new(registry: Arc<PoolRegistry>) -> Self {
        let id = format!("ctx_{}", Uuid::new_v4().simple());
        debug!(context_id = %id, "Created unit-of-work context");
        Self {
            id,
            registry,
            stack: UnitOfWorkStack::new(),
            next_unit_id: 0,
        }
    }

    /// Context identifier used in log lines.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// The current descriptor, or `None` when no unit of work is active.
    pub fn current(&self) -> Option<&UnitOfWorkDescriptor> {
        self.stack.current()
    }

    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    pub fn is_active(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Where a connection acquired right now would come from.
    pub fn route(&self) -> PoolKey {
        decision::route(self.stack.current())
    }

    /// Begin a unit of work.
    ///
    /// - Empty stack, or `Independent`: a new owner is pushed with its own
    ///   read-only request, and a connection is bound from the pool it routes to.
    /// - `Participate` under an active unit: a child is pushed that inherits the
    ///   parent's effective read-only state and shares its connection.
    ///
    /// If no connection can be bound, nothing is pushed.
    pub async fn begin(&mut self, definition: &TransactionDefinition) -> RouterResult<UnitOfWorkHandle> {
        self.begin_in_scope(definition, None).await
    }

    async fn begin_in_scope(
        &mut self,
        definition: &TransactionDefinition,
        scope: Option<Weak<()>>,
    ) -> RouterResult<UnitOfWorkHandle> {
        self.discard_abandoned();
        self.next_unit_id += 1;
        let unit_id = self.next_unit_id;

        let participant = match definition.propagation() {
            Propagation::Participate => self
                .stack
                .current()
                .map(|parent| UnitOfWorkDescriptor::participant(unit_id, definition, parent)),
            Propagation::Independent => None,
        };

        if let Some(descriptor) = participant {
            let effective_read_only = descriptor.effective_read_only();
            let depth = self.stack.push(descriptor, None, scope);
            debug!(
                context_id = %self.id,
                unit = %definition.name(),
                propagation = %Propagation::Participate,
                requested_read_only = definition.is_read_only(),
                effective_read_only = effective_read_only,
                depth = depth,
                "Joined active unit of work"
            );
            return Ok(UnitOfWorkHandle { id: unit_id, depth });
        }

        let descriptor = UnitOfWorkDescriptor::owner(unit_id, definition);
        let key = decision::route(Some(&descriptor));
        let suspended = self.stack.current().map(|d| d.name().to_string());

        let tx = match self.registry.begin(key).await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(
                    context_id = %self.id,
                    unit = %definition.name(),
                    pool = %key,
                    error = %e,
                    "Failed to bind connection for unit of work"
                );
                return Err(e);
            }
        };

        let depth = self.stack.push(descriptor, Some(Binding { key, tx }), scope);
        debug!(
            context_id = %self.id,
            unit = %definition.name(),
            propagation = %definition.propagation(),
            read_only = definition.is_read_only(),
            pool = %key,
            depth = depth,
            suspended = ?suspended,
            "Began unit of work"
        );

        Ok(UnitOfWorkHandle { id: unit_id, depth })
    }

    /// End the current unit of work.
    ///
    /// `handle` must belong to the current (top) unit; otherwise the stack is
    /// left untouched and `StackImbalance` is returned. Ending a participant
    /// finalizes nothing, but `Rollback` marks the owning unit rollback-only.
    /// Ending an owner commits or rolls back its connection before returning.
    pub async fn end(&mut self, handle: UnitOfWorkHandle, outcome: Outcome) -> RouterResult<()> {
        self.discard_abandoned();
        match self.stack.current() {
            Some(top) if top.id() == handle.id => {}
            Some(top) => {
                let message = format!(
                    "end of unit #{} while unit #{} '{}' is current",
                    handle.id,
                    top.id(),
                    top.name()
                );
                error!(context_id = %self.id, depth = self.stack.depth(), "{}", message);
                return Err(RouterError::stack_imbalance(message));
            }
            None => {
                let message = format!("end of unit #{} with no active unit of work", handle.id);
                error!(context_id = %self.id, "{}", message);
                return Err(RouterError::stack_imbalance(message));
            }
        }

        let frame = self.stack.pop()?;
        let unit = frame.descriptor.name().to_string();

        let Some(binding) = frame.binding else {
            if outcome == Outcome::Rollback {
                if let Some(owner) = self.stack.mark_rollback_only() {
                    debug!(
                        context_id = %self.id,
                        unit = %unit,
                        owner = %owner,
                        "Participant rolled back; owner marked rollback-only"
                    );
                }
            }
            return Ok(());
        };

        let parent_suspended = !self.stack.is_empty();
        let result = match (outcome, frame.rollback_only) {
            (Outcome::Commit, false) => binding.tx.commit().await,
            (Outcome::Commit, true) => {
                warn!(
                    context_id = %self.id,
                    unit = %unit,
                    pool = %binding.key,
                    "Commit requested for rollback-only unit of work; rolling back"
                );
                match binding.tx.rollback().await {
                    Ok(()) => Err(RouterError::unexpected_rollback(&unit)),
                    Err(e) => Err(e),
                }
            }
            (Outcome::Rollback, _) => binding.tx.rollback().await,
        };

        match result {
            Ok(()) => {
                debug!(
                    context_id = %self.id,
                    unit = %unit,
                    pool = %binding.key,
                    outcome = ?outcome,
                    depth = self.stack.depth(),
                    "Ended unit of work"
                );
                Ok(())
            }
            Err(e @ RouterError::UnexpectedRollback { .. }) => Err(e),
            Err(e) if parent_suspended => {
                warn!(
                    context_id = %self.id,
                    unit = %unit,
                    pool = %binding.key,
                    error = %e,
                    "Independent unit of work failed to finalize; parent unaffected"
                );
                Err(RouterError::finalization_conflict(unit, e.to_string()))
            }
            Err(e) => {
                warn!(
                    context_id = %self.id,
                    unit = %unit,
                    pool = %binding.key,
                    error = %e,
                    "Failed to finalize unit of work"
                );
                Err(e)
            }
        }
    }

    /// The connection bound to the current unit of work, routed afresh.
    pub fn acquire_connection(&mut self) -> RouterResult<BoundConnection<'_>> {
        self.discard_abandoned();
        let key = decision::route(self.stack.current());
        let context_id = &self.id;
        let (owner, binding) = self
            .stack
            .binding_mut()
            .ok_or(RouterError::NoActiveUnitOfWork)?;

        if binding.key != key {
            return Err(RouterError::internal(format!(
                "unit '{}' is bound to {} but routes to {}",
                owner.name(),
                binding.key,
                key
            )));
        }

        debug!(context_id = %context_id, unit = %owner.name(), pool = %key, "Routed connection");
        Ok(BoundConnection {
            key,
            tx: &mut binding.tx,
        })
    }

    /// Execute a statement on the current unit of work's connection.
    pub async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> RouterResult<ExecuteResult> {
        self.acquire_connection()?.execute(sql, params).await
    }

    /// Fetch rows on the current unit of work's connection.
    pub async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> RouterResult<Vec<Record>> {
        self.acquire_connection()?.fetch_all(sql, params).await
    }

    /// Run `work` inside a unit of work.
    ///
    /// The unit is ended with `Commit` when `work` returns `Ok` and `Rollback`
    /// when it returns `Err`. When the definition has a timeout and it
    /// elapses, `work` is dropped and the unit is rolled back. Units that
    /// `work` began but did not end are rolled back first.
    ///
    /// If the returned future is itself dropped mid-flight, the units it
    /// pushed are discarded, and their transactions rolled back, the next
    /// time this context is used.
    pub async fn transactional<T, F>(&mut self, definition: TransactionDefinition, work: F) -> RouterResult<T>
    where
        F: AsyncFnOnce(&mut UnitOfWorkContext) -> RouterResult<T>,
    {
        let scope = Arc::new(());
        let handle = self
            .begin_in_scope(&definition, Some(Arc::downgrade(&scope)))
            .await?;

        let result = match definition.timeout() {
            Some(limit) => match tokio::time::timeout(limit, work(&mut *self)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        context_id = %self.id,
                        unit = %definition.name(),
                        timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                        "Unit of work timed out"
                    );
                    Err(RouterError::timeout(
                        format!("unit of work '{}'", definition.name()),
                        limit,
                    ))
                }
            },
            None => work(&mut *self).await,
        };

        if self.stack.depth() > handle.depth {
            warn!(
                context_id = %self.id,
                unit = %definition.name(),
                abandoned = self.stack.depth() - handle.depth,
                "Rolling back nested units of work left open"
            );
            if let Err(e) = self.unwind_to(handle.depth).await {
                warn!(context_id = %self.id, error = %e, "Failed to roll back nested unit of work");
            }
        }

        if self.stack.current().map(UnitOfWorkDescriptor::id) != Some(handle.id) {
            if self.stack.depth() == handle.depth {
                // `work` ended this unit and began another in its place.
                warn!(
                    context_id = %self.id,
                    unit = %definition.name(),
                    "Rolling back unit of work that replaced the scope's own"
                );
                if let Err(e) = self.unwind_to(handle.depth - 1).await {
                    warn!(context_id = %self.id, error = %e, "Failed to roll back replacement unit of work");
                }
            }
            return Err(RouterError::stack_imbalance(format!(
                "unit '{}' was ended inside its own scope",
                definition.name()
            )));
        }

        match result {
            Ok(value) => {
                self.end(handle, Outcome::Commit).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(end_error) = self.end(handle, Outcome::Rollback).await {
                    warn!(
                        context_id = %self.id,
                        unit = %definition.name(),
                        error = %end_error,
                        "Rollback after failure also failed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Roll back and pop every open unit of work.
    ///
    /// Use after a future that called [`begin`](Self::begin) directly was
    /// cancelled mid-unit; units begun by `transactional` clean up after
    /// themselves.
    pub async fn unwind(&mut self) -> RouterResult<()> {
        if !self.stack.is_empty() {
            info!(
                context_id = %self.id,
                depth = self.stack.depth(),
                "Unwinding open units of work"
            );
        }
        self.unwind_to(0).await
    }

    /// Roll back units until the stack is `depth` deep. Keeps going past
    /// failures and returns the first one.
    pub async fn unwind_to(&mut self, depth: usize) -> RouterResult<()> {
        self.discard_abandoned();
        let mut first_error = None;
        while self.stack.depth() > depth {
            let Some(id) = self.stack.current().map(UnitOfWorkDescriptor::id) else {
                break;
            };
            let handle = UnitOfWorkHandle {
                id,
                depth: self.stack.depth(),
            };
            if let Err(e) = self.end(handle, Outcome::Rollback).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl UnitOfWorkContext {
    fn discard_abandoned(&mut self) {
        let dropped = self.stack.drop_abandoned();
        if dropped > 0 {
            warn!(
                context_id = %self.id,
                dropped = dropped,
                depth = self.stack.depth(),
                "Discarded units of work left open by a cancelled scope"
            );
        }
    }
}

impl Drop for UnitOfWorkContext {
    fn drop(&mut self) {
        if !self.stack.is_empty() {
            warn!(
                context_id = %self.id,
                depth = self.stack.depth(),
                current = ?self.stack.current().map(UnitOfWorkDescriptor::name),
                "Context dropped with open units of work; their transactions roll back"
            );
        }
    }
}
