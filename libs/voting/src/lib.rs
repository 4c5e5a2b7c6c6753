//! Round-based group restaurant voting
//!
//! A host opens a session with a pool of restaurants and shares its join
//! code. Participants like or dislike restaurants in round one, the best
//! ones move on to a shorter round two, and the round-two favourite wins.
//! Rounds end when their timer runs out or when the host closes them, and
//! every change is pushed to the session's subscribers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voting::{CreateSessionRequest, MemoryStore, RestaurantDetails, SessionEngine, VotingConfig};
//!
//! # async fn example() -> voting::VotingResult<()> {
//! let engine = SessionEngine::new(Arc::new(MemoryStore::new()), VotingConfig::default());
//!
//! let session = engine
//!     .create_session(
//!         "host",
//!         CreateSessionRequest {
//!             restaurants: vec![RestaurantDetails::named("p1", "Noodle Bar")],
//!             ..Default::default()
//!         },
//!     )
//!     .await?;
//! engine.join_session(&session.join_code, "guest").await?;
//! engine.start_session(session.id, "host").await?;
//! # Ok(())
//! # }
//! ```

pub mod broadcaster;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod joincode;
pub mod ledger;
pub mod models;
pub mod rounds;
pub mod status;
pub mod store;
pub mod timer;

pub use broadcaster::{Broadcaster, Subscription};
pub use commands::{CommandReply, HostCommand, send_host_command};
pub use config::{Bounds, TopKPolicy, VotingConfig};
pub use engine::{CreateSessionRequest, JoinOutcome, SessionEngine, SessionView, StatusSnapshot};
pub use error::{VotingError, VotingResult};
pub use events::SessionEvent;
pub use ledger::{Tally, TallyEntry, VoteLedger};
pub use models::{
    CandidateRestaurant, Participant, RestaurantDetails, Round, Session, SessionStatus, Vote,
    VoteType,
};
pub use rounds::{RankedRestaurant, RoundController, SessionOutcome};
pub use status::{VotingStatus, VotingStatusAggregator};
pub use store::{MemoryStore, PgSessionStore, SessionStore, StoreError};
