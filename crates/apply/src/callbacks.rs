//! Pre/post observers fired around every mutation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use rekon_core::{Document, OperatorError, OperatorResult, StatusEntry};

/// What a callback is told about.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// About to be written or deleted (pre callbacks).
    Pending(&'a Document),
    /// Outcome of the attempt (post callbacks).
    Done(&'a StatusEntry),
}

impl<'a> Event<'a> {
    pub fn document(&self) -> &'a Document {
        match self {
            Event::Pending(d) => d,
            Event::Done(s) => s.document(),
        }
    }

    pub fn status(&self) -> Option<&'a StatusEntry> {
        match self {
            Event::Done(s) => Some(s),
            Event::Pending(_) => None,
        }
    }
}

pub type Callback = Arc<dyn Fn(Event<'_>, Option<&OperatorError>) -> OperatorResult<()> + Send + Sync>;

pub fn callback<F>(f: F) -> Callback
where
    F: Fn(Event<'_>, Option<&OperatorError>) -> OperatorResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Clone, Default)]
pub struct Callbacks {
    pub pre: Vec<Callback>,
    pub post: Vec<Callback>,
}

impl Callbacks {
    pub fn new() -> Self { Self::default() }

    pub fn on_pre<F>(mut self, f: F) -> Self
    where
        F: Fn(Event<'_>, Option<&OperatorError>) -> OperatorResult<()> + Send + Sync + 'static,
    {
        self.pre.push(callback(f));
        self
    }

    pub fn on_post<F>(mut self, f: F) -> Self
    where
        F: Fn(Event<'_>, Option<&OperatorError>) -> OperatorResult<()> + Send + Sync + 'static,
    {
        self.post.push(callback(f));
        self
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks").field("pre", &self.pre.len()).field("post", &self.post.len()).finish()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}

/// Run callbacks in order; only errors raised by the callbacks themselves come back.
/// A panic is caught and turned into [`OperatorError::Callback`]; either way the
/// rest of the chain is skipped.
pub(crate) fn notify(event: Event<'_>, err: Option<&OperatorError>, callbacks: &[Callback]) -> OperatorResult<()> {
    for cb in callbacks {
        match catch_unwind(AssertUnwindSafe(|| cb(event, err))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(payload) => return Err(OperatorError::Callback(panic_message(payload))),
        }
    }
    Ok(())
}

/// Fire `callbacks` with `(event, err)`. Returns the first callback failure, or
/// `err` unchanged when every callback passes.
pub fn fire_callbacks(event: Event<'_>, err: Option<OperatorError>, callbacks: &[Callback]) -> OperatorResult<()> {
    notify(event, err.as_ref(), callbacks)?;
    match err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
