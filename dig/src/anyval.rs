//! Type-erased storage for resolved values.
//!
//! Adapted from `illicit::AnonRc`: the same "carry a `TypeId`, a debug
//! vtable, and a downcastable pointer together" trick, but built on `Arc`
//! with a `Send + Sync` bound instead of `Rc`, because values produced here
//! may be read back on whichever thread a `Scheduler` happens to run a
//! downstream producer on.

use std::any::{type_name, Any, TypeId};
use std::fmt::Debug;
use std::sync::Arc;

/// A reference-counted, type-erased resolved value.
#[derive(Clone)]
pub struct AnyValue {
    type_id: TypeId,
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
    debug: Arc<dyn Debug + Send + Sync>,
}

impl AnyValue {
    /// Wraps a concrete value for storage in a scope's caches.
    pub fn new<T: Debug + Send + Sync + 'static>(value: T) -> Self {
        let inner = Arc::new(value);
        Self { type_id: TypeId::of::<T>(), type_name: type_name::<T>(), debug: inner.clone(), inner }
    }

    /// The `TypeId` of the wrapped value.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The `std::any::type_name` of the wrapped value.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Downcasts to a concrete `Arc<T>`, if `T` matches the stored type.
    pub fn downcast<T: 'static>(&self) -> Option<Arc<T>> {
        self.inner.clone().downcast::<T>().ok()
    }

    /// A debug-printable view of the contained value.
    pub fn debug(&self) -> &dyn Debug {
        &*self.debug
    }
}

impl Debug for AnyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&*self.debug, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_downcast() {
        let v = AnyValue::new(42u32);
        assert_eq!(*v.downcast::<u32>().unwrap(), 42);
        assert!(v.downcast::<u8>().is_none());
    }
}
