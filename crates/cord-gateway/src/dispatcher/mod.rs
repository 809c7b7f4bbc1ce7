//! Event dispatch
//!
//! Routes decoded gateway events to the handlers registered for their name.

mod dispatcher;

pub use dispatcher::{Dispatcher, EventHandler, HandlerError, HandlerFuture};
