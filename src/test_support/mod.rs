//! Helpers shared by unit tests.

pub(crate) mod range_responder;
pub(crate) mod socket_guard;
