//! A reflective dependency-injection container built from composable
//! constructor functions.
//!
//! `Container::provide` registers a constructor; `Container::invoke` runs a
//! consumer against everything registered so far, resolving and caching the
//! transitive parameter graph for you. Rust has no runtime reflection over
//! an arbitrary function's signature, so this crate gets the "describe a
//! function's dependencies without the caller spelling them out twice"
//! property from generic trait bounds instead: anything that implements
//! [`FromScope`](introspect::FromScope) can be a parameter, anything that
//! implements [`IntoResults`](introspect::IntoResults) can be a result, and
//! `#[derive(In)]` / `#[derive(Out)]` generate those impls for aggregate
//! structs field by field.
//!
//! ```
//! use dig::{Container, ProvideOptions, InvokeOptions};
//! use std::sync::Arc;
//!
//! let container = Container::new();
//! container.provide::<(), _, Arc<u32>>(|| Arc::new(7), ProvideOptions::new()).unwrap();
//! container
//!     .provide::<(Arc<u32>,), _, Arc<String>>(
//!         |n| Arc::new(format!("got {}", n)),
//!         ProvideOptions::new(),
//!     )
//!     .unwrap();
//!
//! let message = container
//!     .invoke::<(Arc<String>,), _, Arc<String>>(|m| m, InvokeOptions::new())
//!     .unwrap();
//! assert_eq!(message.map(|m| (*m).clone()), Some("got 7".to_string()));
//! ```

mod anyval;
mod clock;
mod container;
mod cycle;
mod deferred;
mod diagnostics;
mod engine;
mod error;
mod introspect;
mod key;
mod registry;
mod scheduler;
mod scope;

pub use clock::{Clock, SystemClock};
pub use container::{Container, DecorateOptions, InvokeOptions, ProvideOptions};
pub use deferred::{when_all, Deferred};
pub use diagnostics::DiagGraph;
pub use error::{BoxError, Classification, DigError, Frame, RegistrationError, ResolutionError};
pub use introspect::{
    group_field, join_values, FromScope, IntoProducerOutput, IntoResults, ParamSpec, ParamsTuple,
    ProducerFn, ResultSpec,
};
pub use key::Key;
pub use scheduler::{Parallel, Scheduler, Synchronous, Unbounded};
pub use scope::{Scope, ScopeId};

pub use dig_macros::{In, Out};

/// Re-exported for `#[derive(In)]` / `#[derive(Out)]`-generated code, which
/// needs to name these types without requiring callers to depend on the
/// crate's internals directly.
#[doc(hidden)]
pub mod derive_support {
    pub use crate::anyval::AnyValue;
    pub use crate::engine::{resolve_named, resolve_optional_named, ResolveCtx, StoreCtx};
    pub use crate::introspect::erase_value;
}
