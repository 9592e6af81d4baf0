//! Pattern and sequence correlation
//!
//! Each position of a pattern expression is a pair of processors. The
//! [`StreamPreStateProcessor`] holds correlation records waiting for its
//! stream, attaches an arriving event to them and runs them through the
//! state's condition chain. The [`StreamPostStateProcessor`] at the end of
//! that chain sees only records whose condition held, and hands them on to
//! the next state, to an `every` restart, or back to the caller as output.
//!
//! Records added while a pass is running are staged and only become pending
//! when the runtime commits the pass, so no record is evaluated twice for
//! the same event.
//!
//! ```text
//! A ──► [Pre 0] ─► filter ─► [Post 0] ──addState──► [Pre 1] ─► filter ─► [Post 1] ──► output
//!          ▲                     │
//!          └──── addEveryState ──┘   (every A -> B)
//! ```

mod post_state;
mod pre_state;
mod runtime;

pub use post_state::StreamPostStateProcessor;
pub use pre_state::StreamPreStateProcessor;
pub use runtime::{StatePlan, StateSpec, StateStreamReceiver, StateStreamRuntime};

use crate::pool::{StateEventCloner, StateEventPool, StreamEventCloner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Matching discipline of a state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateType {
    /// Unrelated events may arrive between states; a record that fails a
    /// condition stays pending and retries on later events
    Pattern,
    /// States must match on consecutive events; a record that fails is
    /// dropped
    Sequence,
}

/// Record factories shared by every state of one machine
#[derive(Debug, Clone)]
pub struct StatePools {
    pub state_pool: Arc<StateEventPool>,
    pub state_cloner: StateEventCloner,
    pub stream_cloner: StreamEventCloner,
}

impl StatePools {
    pub fn new(state_pool: Arc<StateEventPool>, stream_cloner: StreamEventCloner) -> Self {
        Self {
            state_cloner: StateEventCloner::new(state_pool.clone(), stream_cloner.clone()),
            state_pool,
            stream_cloner,
        }
    }
}
