//! Deferred completion values
//!
//! A [`Completion`] is what the client hands back for work that finishes on
//! one of its background threads (starting the server, stopping it, pulling
//! diagnostics). Callers may wait on it or drop it; dropping never cancels
//! the underlying work.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

/// The sending half of a pending [`Completion`]
pub struct Completer<T> {
    tx: Sender<T>,
}

impl<T> Completer<T> {
    /// Resolve the paired completion. A no-op if nobody is listening anymore.
    pub fn complete(self, value: T) {
        let _ = self.tx.send(value);
    }
}

enum CompletionState<T> {
    Ready(Option<T>),
    Pending(Receiver<T>),
}

/// A value that becomes available later
pub struct Completion<T> {
    state: CompletionState<T>,
}

impl<T> Completion<T> {
    /// A completion that is already resolved
    pub fn ready(value: T) -> Self {
        Self {
            state: CompletionState::Ready(Some(value)),
        }
    }

    /// A pending completion plus the handle that resolves it
    pub fn pending() -> (Completer<T>, Self) {
        let (tx, rx) = mpsc::channel();
        (
            Completer { tx },
            Self {
                state: CompletionState::Pending(rx),
            },
        )
    }

    /// Block until the value is available.
    ///
    /// Returns `None` if the completer was dropped without resolving, or if
    /// the value was already taken with [`Completion::try_take`].
    pub fn wait(self) -> Option<T> {
        match self.state {
            CompletionState::Ready(value) => value,
            CompletionState::Pending(rx) => rx.recv().ok(),
        }
    }

    /// Take the value if it is available, without blocking
    pub fn try_take(&mut self) -> Option<T> {
        match &mut self.state {
            CompletionState::Ready(value) => value.take(),
            CompletionState::Pending(rx) => match rx.try_recv() {
                Ok(value) => {
                    self.state = CompletionState::Ready(None);
                    Some(value)
                }
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => {
                    self.state = CompletionState::Ready(None);
                    None
                }
            },
        }
    }

    /// True once the value is available (or can never arrive)
    pub fn is_ready(&mut self) -> bool {
        match &mut self.state {
            CompletionState::Ready(_) => true,
            CompletionState::Pending(rx) => match rx.try_recv() {
                Ok(value) => {
                    self.state = CompletionState::Ready(Some(value));
                    true
                }
                Err(TryRecvError::Empty) => false,
                Err(TryRecvError::Disconnected) => {
                    self.state = CompletionState::Ready(None);
                    true
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_ready() {
        let mut completion = Completion::ready(7);
        assert!(completion.is_ready());
        assert_eq!(completion.wait(), Some(7));
    }

    #[test]
    fn test_completed_from_other_thread() {
        let (completer, completion) = Completion::pending();
        let handle = thread::spawn(move || completer.complete("done"));
        assert_eq!(completion.wait(), Some("done"));
        handle.join().unwrap();
    }

    #[test]
    fn test_dropped_completer_resolves_to_none() {
        let (completer, mut completion) = Completion::<u32>::pending();
        assert!(!completion.is_ready());
        drop(completer);
        assert!(completion.is_ready());
        assert_eq!(completion.wait(), None);
    }

    #[test]
    fn test_try_take_only_once() {
        let (completer, mut completion) = Completion::pending();
        assert_eq!(completion.try_take(), None);
        completer.complete(1);
        assert_eq!(completion.try_take(), Some(1));
        assert_eq!(completion.try_take(), None);
    }

    #[test]
    fn test_is_ready_keeps_value() {
        let (completer, mut completion) = Completion::pending();
        completer.complete(3);
        assert!(completion.is_ready());
        assert_eq!(completion.wait(), Some(3));
    }
}
