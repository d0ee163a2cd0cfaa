//! Speculative local updates that roll back when the backend disagrees.

use std::future::Future;

use tokio::sync::watch;
use tracing::debug;

pub struct OptimisticStore<T> {
    state: watch::Sender<T>,
}

impl<T: Clone + Send + Sync> OptimisticStore<T> {
    pub fn new(initial: T) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    pub fn get(&self) -> T {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.state.subscribe()
    }

    pub fn set(&self, value: T) {
        self.state.send_replace(value);
    }

    /// Applies `speculate` right away, then settles on what `confirm` returns.
    ///
    /// `Ok` replaces the state with the authoritative value. `Err` puts back
    /// the exact state seen before `speculate` ran and returns the error.
    pub async fn mutate<S, F, E>(&self, speculate: S, confirm: F) -> Result<T, E>
    where
        S: FnOnce(&mut T),
        F: Future<Output = Result<T, E>>,
    {
        let previous = self.get();
        self.state.send_modify(speculate);

        match confirm.await {
            Ok(authoritative) => {
                self.state.send_replace(authoritative.clone());
                Ok(authoritative)
            }
            Err(err) => {
                debug!("optimistic: rolling back");
                self.state.send_replace(previous);
                Err(err)
            }
        }
    }
}

impl<T: Clone + Send + Sync + Default> Default for OptimisticStore<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
