#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Live state machine of one raid session.
//!
//! A [`Session`] owns everything that happens inside one instance between
//! placement and teardown: the countdown, extraction channelling, deaths and
//! the disconnect grace window. It never touches the global registries; every
//! participant that leaves the active roster is reported as a [`Departure`] so
//! the owner can unmap it and hold the outcome message until the participant
//! returns.

mod disconnect;
mod outcome;
mod session;

pub use disconnect::{DisconnectInfo, Return};
pub use outcome::{Departure, Outcome};
pub use session::{Session, SessionPlan, SessionState, TickOutcome};
