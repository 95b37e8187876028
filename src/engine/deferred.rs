//! Deferred activity contexts.
//!
//! Work still pending after the AFTER phase is queued here and drained at
//! commit. Each context records the savepoints that were established when
//! it opened so a partial rollback can discard exactly the work scheduled
//! after that savepoint, however deeply it was nested.

use tracing::{debug, info};

use crate::cache::{Triglist, TriglistNode};
use crate::error::TriggerResult;
use crate::ids::ObjectHandle;
use crate::trigger::ActionTime;

use super::state::DepthGuard;
use super::TriggerEngine;

/// One deferred context.
#[derive(Debug, Clone)]
pub(crate) struct DeferredContext {
    pub list: Triglist,
    /// Savepoint stack at scheduling time, outermost first.
    pub savepoints: Vec<String>,
}

/// A node taken off the queue, with the savepoint stack of its context.
#[derive(Debug, Clone)]
pub(crate) struct DeferredEntry {
    pub node: TriglistNode,
    pub savepoints: Vec<String>,
}

/// Ordered chain of deferred contexts. Only the last one accepts new work.
#[derive(Debug, Default)]
pub(crate) struct DeferredQueue {
    contexts: Vec<DeferredContext>,
}

fn matches(node: &TriglistNode, trigger: Option<ObjectHandle>, target: Option<ObjectHandle>) -> bool {
    trigger.map_or(true, |t| node.trigger == t)
        && target.map_or(true, |t| node.target.as_ref().and_then(|o| o.handle) == Some(t))
}

impl DeferredQueue {
    /// Queue nodes under the savepoint stack `savepoints`, opening a new
    /// context when it differs from the current context's.
    pub fn schedule(&mut self, nodes: Triglist, savepoints: Vec<String>) {
        if nodes.is_empty() {
            return;
        }
        match self.contexts.last_mut() {
            Some(ctx) if ctx.savepoints == savepoints => ctx.list.append(nodes),
            _ => self.contexts.push(DeferredContext {
                list: nodes,
                savepoints,
            }),
        }
    }

    /// Total queued nodes.
    pub fn len(&self) -> usize {
        self.contexts.iter().map(|c| c.list.len()).sum()
    }

    /// Take the oldest node, retiring contexts as they empty.
    pub fn pop_front(&mut self) -> Option<DeferredEntry> {
        while !self.contexts.is_empty() {
            let ctx = &mut self.contexts[0];
            let Some(node) = ctx.list.pop_front() else {
                self.contexts.remove(0);
                continue;
            };
            let savepoints = if ctx.list.is_empty() {
                self.contexts.remove(0).savepoints
            } else {
                ctx.savepoints.clone()
            };
            return Some(DeferredEntry { node, savepoints });
        }
        None
    }

    /// Put entries back at the head of the queue, preserving their order
    /// and the savepoint stack each was scheduled under.
    pub fn requeue_front(&mut self, entries: Vec<DeferredEntry>) {
        for DeferredEntry { node, savepoints } in entries.into_iter().rev() {
            match self.contexts.first_mut() {
                Some(ctx) if ctx.savepoints == savepoints => ctx.list.push_front(node),
                _ => self.contexts.insert(
                    0,
                    DeferredContext {
                        list: single(node),
                        savepoints,
                    },
                ),
            }
        }
    }

    /// Remove and return matching entries in queue order.
    pub fn take_matching(&mut self, trigger: Option<ObjectHandle>, target: Option<ObjectHandle>) -> Vec<DeferredEntry> {
        let mut taken = Vec::new();
        for ctx in &mut self.contexts {
            let mut kept = Triglist::new();
            for node in std::mem::take(&mut ctx.list) {
                if matches(&node, trigger, target) {
                    taken.push(DeferredEntry {
                        node,
                        savepoints: ctx.savepoints.clone(),
                    });
                } else {
                    kept.append(single(node));
                }
            }
            ctx.list = kept;
        }
        self.contexts.retain(|c| !c.list.is_empty());
        taken
    }

    /// Discard every context scheduled while `savepoint` was established.
    /// Returns the number of nodes dropped.
    pub fn rollback_to(&mut self, savepoint: &str) -> usize {
        let mut dropped = 0;
        self.contexts.retain(|c| {
            let doomed = c.savepoints.iter().any(|s| s == savepoint);
            if doomed {
                dropped += c.list.len();
            }
            !doomed
        });
        dropped
    }

    pub fn clear(&mut self) {
        self.contexts.clear();
    }
}

fn single(node: TriglistNode) -> Triglist {
    let mut list = Triglist::new();
    list.push_front(node);
    list
}

impl TriggerEngine {
    /// Run every queued deferred activity, oldest first, until the queue is
    /// empty. Activities scheduled while draining are run too.
    ///
    /// On failure the failing node goes back to the head of the queue and
    /// the error is returned.
    pub(crate) fn drain_deferred(&self) -> TriggerResult<()> {
        loop {
            let Some(entry) = self.registry()?.deferred.pop_front() else {
                return Ok(());
            };
            if let Err(e) = self.run_deferred_node(&entry.node) {
                self.registry()?.deferred.requeue_front(vec![entry]);
                return Err(e);
            }
        }
    }

    fn run_deferred_node(&self, node: &TriglistNode) -> TriggerResult<()> {
        let Some(guard) = DepthGuard::try_enter(&self.depth, self.max_depth()) else {
            return Err(self.recursion_error(Some(node.trigger)));
        };
        debug!(trigger = %node.trigger, level = guard.level(), "Executing deferred activity");
        self.fire_entry(node.trigger, ActionTime::Deferred, node.target.as_ref(), None, guard.level())
            .map(|_| ())
    }

    /// Run pending deferred activity now, optionally restricted to one
    /// trigger and/or one target object.
    ///
    /// # Errors
    /// The first activity failure; the failed node and everything after it
    /// stay queued.
    pub fn execute_deferred(&self, trigger: Option<ObjectHandle>, target: Option<ObjectHandle>) -> TriggerResult<usize> {
        let mut entries = self.registry()?.deferred.take_matching(trigger, target);
        let total = entries.len();
        let mut done = 0;
        while !entries.is_empty() {
            if let Err(e) = self.run_deferred_node(&entries[0].node) {
                self.registry()?.deferred.requeue_front(entries);
                return Err(self.escalate(e));
            }
            entries.remove(0);
            done += 1;
        }
        debug!(executed = done, requested = total, "Executed deferred activity");
        Ok(done)
    }

    /// Discard pending deferred activity, optionally restricted to one
    /// trigger and/or one target object. Returns how many were dropped.
    ///
    /// # Errors
    /// Only on a poisoned registry.
    pub fn drop_deferred(&self, trigger: Option<ObjectHandle>, target: Option<ObjectHandle>) -> TriggerResult<usize> {
        let dropped = self.registry()?.deferred.take_matching(trigger, target).len();
        if dropped > 0 {
            info!(dropped, "Dropped deferred activity");
        }
        Ok(dropped)
    }

    /// Number of queued deferred activities.
    ///
    /// # Errors
    /// Only on a poisoned registry.
    pub fn pending_deferred(&self) -> TriggerResult<usize> {
        Ok(self.registry()?.deferred.len())
    }
}
