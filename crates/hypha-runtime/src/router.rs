//! Round-robin router pool.
//!
//! A router is a supervisor that owns `N` identical workers and forwards each
//! incoming envelope to the next one in turn. The original sender rides along
//! on the forwarded envelope, so replies (including ask replies) go straight
//! back to the caller rather than through the router.

use crate::actor::supervisor::SupervisorState;
use crate::actor::{Actor, ActorContext};
use crate::error::HandlerResult;
use async_trait::async_trait;
use hypha_protocol::Payload;
use std::sync::Arc;

pub(crate) struct RouterBehavior {
    state: Arc<SupervisorState>,
    size: usize,
    next: usize,
}

impl RouterBehavior {
    pub(crate) fn new(state: Arc<SupervisorState>, size: usize) -> Self {
        Self {
            state,
            size,
            next: 0,
        }
    }
}

#[async_trait]
impl Actor for RouterBehavior {
    async fn receive(&mut self, _message: Payload, ctx: &ActorContext) -> HandlerResult {
        let Some(envelope) = ctx.current_envelope() else {
            return Ok(());
        };
        let index = self.next % self.size;
        self.next = self.next.wrapping_add(1);
        // Workers are looked up per message: a restarted worker has a fresh
        // reference under the same name.
        let name = index.to_string();
        match self.state.child(&name) {
            Some(worker) => worker.tell_envelope(envelope),
            None => {
                tracing::warn!(
                    router = %self.state.path(),
                    worker = name,
                    "router worker missing, dropping message"
                );
            }
        }
        Ok(())
    }
}
