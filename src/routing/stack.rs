//! The unit-of-work context stack.
//!
//! One stack per logical execution context. Frames are pushed and popped in
//! strict LIFO order; a frame may carry the physical binding `B` it owns.
//!
//! A frame pushed inside a scope holds a weak reference to that scope's
//! liveness token. Once the token is gone (the scope's future was dropped)
//! the frame and everything above it are abandoned: they are invisible to
//! readers and removed, bindings included, on the next mutation.

use crate::error::{RouterError, RouterResult};
use crate::routing::descriptor::UnitOfWorkDescriptor;
use std::sync::Weak;
use tracing::{debug, error, warn};

#[derive(Debug)]
struct Frame<B> {
    descriptor: UnitOfWorkDescriptor,
    binding: Option<B>,
    rollback_only: bool,
    scope: Option<Weak<()>>,
}

impl<B> Frame<B> {
    fn is_abandoned(&self) -> bool {
        self.scope.as_ref().is_some_and(|s| s.strong_count() == 0)
    }
}

/// A frame removed from the stack.
#[derive(Debug)]
pub struct PoppedFrame<B> {
    pub descriptor: UnitOfWorkDescriptor,
    /// Present only when the frame owned its binding.
    pub binding: Option<B>,
    /// A participant asked for rollback while this frame owned the binding.
    pub rollback_only: bool,
}

#[derive(Debug)]
pub struct UnitOfWorkStack<B> {
    frames: Vec<Frame<B>>,
}

impl<B> Default for UnitOfWorkStack<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> UnitOfWorkStack<B> {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Push a new current descriptor. `binding` must be `Some` exactly when the
    /// descriptor owns its binding. `scope` ties the frame to a scope's token.
    pub fn push(
        &mut self,
        descriptor: UnitOfWorkDescriptor,
        binding: Option<B>,
        scope: Option<Weak<()>>,
    ) -> usize {
        debug_assert_eq!(descriptor.owns_binding(), binding.is_some());
        self.drop_abandoned();
        self.frames.push(Frame {
            descriptor,
            binding,
            rollback_only: false,
            scope,
        });
        self.frames.len()
    }

    /// Remove the current descriptor, restoring the previous one.
    ///
    /// Popping an empty stack is a boundary bug and is reported, never ignored.
    pub fn pop(&mut self) -> RouterResult<PoppedFrame<B>> {
        self.drop_abandoned();
        match self.frames.pop() {
            Some(frame) => Ok(PoppedFrame {
                descriptor: frame.descriptor,
                binding: frame.binding,
                rollback_only: frame.rollback_only,
            }),
            None => {
                error!("pop() on an empty unit-of-work stack");
                Err(RouterError::stack_imbalance(
                    "pop() on an empty unit-of-work stack",
                ))
            }
        }
    }

    /// Number of frames below the lowest abandoned one.
    fn live_len(&self) -> usize {
        self.frames
            .iter()
            .position(Frame::is_abandoned)
            .unwrap_or(self.frames.len())
    }

    /// Drop abandoned frames top-down, releasing their bindings.
    ///
    /// If an abandoned participant shared a binding with a live owner, that
    /// owner is marked rollback-only. Returns how many frames were dropped.
    pub fn drop_abandoned(&mut self) -> usize {
        let live = self.live_len();
        if live == self.frames.len() {
            return 0;
        }

        // An abandoned participant at the cut wrote through a live owner's binding.
        let joined_live_owner = self.frames[live].binding.is_none();

        let dropped = self.frames.len() - live;
        while self.frames.len() > live {
            if let Some(frame) = self.frames.pop() {
                debug!(
                    unit = %frame.descriptor.name(),
                    owns_binding = frame.binding.is_some(),
                    "Dropping abandoned unit of work"
                );
            }
        }

        if joined_live_owner {
            if let Some(owner) = self.mark_rollback_only() {
                warn!(owner = %owner, "Owner marked rollback-only after abandoned participant");
            }
        }
        dropped
    }

    /// The top descriptor, or `None` when no unit of work is active.
    pub fn current(&self) -> Option<&UnitOfWorkDescriptor> {
        self.frames[..self.live_len()].last().map(|f| &f.descriptor)
    }

    pub fn depth(&self) -> usize {
        self.live_len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    fn owner_index(&self) -> Option<usize> {
        self.frames[..self.live_len()]
            .iter()
            .rposition(|f| f.binding.is_some())
    }

    /// The binding serving the current descriptor: the nearest owner at or
    /// below the top.
    pub fn binding_mut(&mut self) -> Option<(&UnitOfWorkDescriptor, &mut B)> {
        self.drop_abandoned();
        let index = self.owner_index()?;
        let Frame {
            descriptor,
            binding,
            ..
        } = &mut self.frames[index];
        binding.as_mut().map(|b| (&*descriptor, b))
    }

    /// Mark the owner serving the current descriptor for rollback.
    /// Returns the owner's name.
    pub fn mark_rollback_only(&mut self) -> Option<&str> {
        let index = self.owner_index()?;
        let frame = &mut self.frames[index];
        frame.rollback_only = true;
        Some(frame.descriptor.name())
    }
}
