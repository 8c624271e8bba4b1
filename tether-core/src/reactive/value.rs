//! Observable Values
//!
//! An [`ObservableValue`] is a container for mutable state: an [`Atom`]
//! plus the value it guards. Reading it inside a tracked run makes the run
//! depend on it; writing a different value marks every dependent stale.
//!
//! # Example
//!
//! ```
//! use tether_core::{ObservableValue, Runtime};
//!
//! let mut rt = Runtime::new();
//! let count = ObservableValue::new(&mut rt, "count", 0);
//!
//! assert_eq!(count.get(&mut rt), Ok(0));
//! count.set(&mut rt, 5).unwrap();
//! assert_eq!(count.get(&mut rt), Ok(5));
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::atom::Atom;
use super::runtime::Runtime;
use crate::error::Result;
use crate::graph::NodeId;

/// Equality used to decide whether a new value is a change.
pub type Comparer<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Comparer using `PartialEq`.
pub fn default_comparer<T: PartialEq + 'static>() -> Comparer<T> {
    Arc::new(|a: &T, b: &T| a == b)
}

struct ValueInner<T> {
    value: RwLock<T>,
    equals: Comparer<T>,
}

/// A reactive container for a value of type `T`.
///
/// Cloning the handle is cheap; every clone refers to the same atom.
pub struct ObservableValue<T> {
    atom: Atom,
    inner: Arc<ValueInner<T>>,
}

impl<T> Clone for ObservableValue<T> {
    fn clone(&self) -> Self {
        Self {
            atom: self.atom,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ObservableValue<T> {
    pub fn new(rt: &mut Runtime, name: impl Into<Arc<str>>, value: T) -> Self {
        Self::with_comparer(rt, name, value, default_comparer())
    }
}

impl<T: Clone + Send + Sync + 'static> ObservableValue<T> {
    /// Create a value whose writes are compared with `equals`.
    pub fn with_comparer(
        rt: &mut Runtime,
        name: impl Into<Arc<str>>,
        value: T,
        equals: Comparer<T>,
    ) -> Self {
        Self {
            atom: Atom::new(rt, name),
            inner: Arc::new(ValueInner {
                value: RwLock::new(value),
                equals,
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.atom.id()
    }

    pub fn atom(&self) -> Atom {
        self.atom
    }

    /// Read the value, recording the read in the running derivation.
    pub fn get(&self, rt: &mut Runtime) -> Result<T> {
        self.atom.report_observed(rt)?;
        Ok(self.inner.value.read().clone())
    }

    /// Borrow the value, recording the read like [`get`](Self::get).
    pub fn with<R>(&self, rt: &mut Runtime, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.atom.report_observed(rt)?;
        Ok(f(&*self.inner.value.read()))
    }

    /// Read the value without touching the runtime.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Store `value`.
    ///
    /// Returns `Ok(false)` if the comparer considers it equal to the current
    /// value, in which case nothing is propagated.
    pub fn set(&self, rt: &mut Runtime, value: T) -> Result<bool> {
        rt.check_state_change(self.id())?;
        {
            let mut current = self.inner.value.write();
            if (self.inner.equals)(&*current, &value) {
                return Ok(false);
            }
            *current = value;
        }
        rt.notify_changed(self.id());
        Ok(true)
    }

    /// Replace the value with `f(current)`.
    pub fn update(&self, rt: &mut Runtime, f: impl FnOnce(&T) -> T) -> Result<bool> {
        let next = f(&*self.inner.value.read());
        self.set(rt, next)
    }
}

impl<T: fmt::Debug> fmt::Debug for ObservableValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableValue")
            .field("id", &self.atom.id())
            .field("value", &*self.inner.value.read())
            .finish()
    }
}
