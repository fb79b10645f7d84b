//! Reliable patch delivery over a persistent connection.
//!
//! [`DeliveryClient`] owns at most one connection, keyed by
//! `(session, credential)`. Each `send` gets its own request id and waits for
//! the matching acknowledgement; a failed attempt is retried exactly once over
//! a fresh connection with the same id.

mod client;
pub mod envelope;
pub mod memory;
pub mod transport;
#[cfg(feature = "ws")]
pub mod ws;

use std::sync::{Mutex, MutexGuard};

pub use client::{DeliveryClient, Receipt, MAX_ATTEMPTS};
pub use envelope::Inbound;
pub use transport::{ConnectTarget, Connection, Connector, TransportError};
#[cfg(feature = "ws")]
pub use ws::WsConnector;

/// Locks a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
