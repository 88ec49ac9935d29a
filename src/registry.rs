//! Process-wide bookkeeping of open clients.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::psu::PsuClient;
use crate::transport::Opener;

/// A client behind its mutual exclusion guard.
///
/// The wire is half-duplex and the selected bus address is session state, so every caller
/// holds the lock for a whole operation.
pub type SharedClient<O, const L: usize = 128> = Arc<Mutex<PsuClient<O, L>>>;

/// Add-only list of shared clients, for batch polling.
pub struct Registry<O: Opener, const L: usize = 128> {
    clients: Mutex<Vec<SharedClient<O, L>>>,
}

impl<O: Opener, const L: usize> Default for Registry<O, L> {
    fn default() -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
        }
    }
}

impl<O: Opener, const L: usize> Registry<O, L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `client` and return the shared handle to it.
    pub fn add(&self, client: PsuClient<O, L>) -> SharedClient<O, L> {
        let shared = Arc::new(Mutex::new(client));
        self.clients.lock().push(Arc::clone(&shared));
        shared
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Snapshot of the registered clients, in insertion order.
    pub fn clients(&self) -> Vec<SharedClient<O, L>> {
        self.clients.lock().clone()
    }

    /// Run `f` on every client in turn and collect the results.
    ///
    /// The registry lock is released before any client is locked, so clients may be added
    /// while a poll runs.
    pub fn poll<R>(&self, mut f: impl FnMut(&mut PsuClient<O, L>) -> R) -> Vec<R> {
        self.clients()
            .iter()
            .map(|client| f(&mut client.lock()))
            .collect()
    }
}
