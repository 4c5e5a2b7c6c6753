//! Participant-side session state sync
//!
//! Keeps a participant's view of a voting session current when the live
//! event channel is unreliable: a status poller with capped exponential
//! backoff and a circuit breaker, optimistic vote tracking, and the mapping
//! from session state to what the screen should say.

pub mod backoff;
pub mod error;
pub mod phase;
pub mod poller;
pub mod votes;

pub use backoff::{BackoffPolicy, CircuitBreaker, CircuitState};
pub use error::{ClientError, ClientResult};
pub use phase::SessionPhase;
pub use poller::{HttpStatusSource, PollerHandle, StatusPoller, StatusSource, StopReason};
pub use votes::{TrackedVote, VoteState, VoteTracker};
