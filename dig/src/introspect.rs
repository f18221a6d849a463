//! Decodes function signatures and aggregate records into key-level
//! descriptors.
//!
//! Rust has no runtime reflection over an opaque function's argument types,
//! so this crate favors an explicit, static registration surface: producers
//! and consumers are
//! ordinary closures, and their shape is captured through generic trait
//! bounds resolved at compile time rather than through a reflected call.
//! Every type that can appear as a parameter or a result implements
//! [`FromScope`] or [`IntoResults`]; `#[derive(dig::In)]` / `#[derive(dig::Out)]`
//! generate those impls for aggregate records field-by-field, exactly
//! mirroring the hand-written blanket impls below for atomic values.

use std::fmt::Debug;
use std::sync::Arc;

use crate::anyval::AnyValue;
use crate::deferred::Deferred;
use crate::engine::{resolve_group, resolve_optional, resolve_required, ResolveCtx, StoreCtx};
use crate::error::BoxError;
use crate::key::Key;

/// One parameter slot decoded from a producer's or consumer's signature, or
/// from a field of a `#[derive(In)]` aggregate.
#[derive(Clone, Debug)]
pub enum ParamSpec {
    /// A required single value.
    Value(Key),
    /// An optional single value; absence yields a default rather than
    /// failing resolution.
    OptionalValue(Key),
    /// An ordered collection of every contributor to a named group.
    Group(Key),
}

impl ParamSpec {
    /// The `Key` this parameter addresses.
    pub fn key(&self) -> &Key {
        match self {
            ParamSpec::Value(k) | ParamSpec::OptionalValue(k) | ParamSpec::Group(k) => k,
        }
    }
}

/// One result slot decoded from a producer's return type, or from a field
/// of a `#[derive(Out)]` aggregate.
#[derive(Clone, Debug)]
pub enum ResultSpec {
    /// A single produced value.
    Value(Key),
    /// A single contribution to a named group.
    GroupItem(Key),
    /// A sequence expanded element-wise into a named group.
    GroupFlatten(Key),
}

impl ResultSpec {
    /// The `Key` this result addresses.
    pub fn key(&self) -> &Key {
        match self {
            ResultSpec::Value(k) | ResultSpec::GroupItem(k) | ResultSpec::GroupFlatten(k) => k,
        }
    }
}

/// A type that can be resolved, as a whole, from the container: a single
/// atomic dependency (`Arc<T>`, `Option<Arc<T>>`) or a `#[derive(In)]`
/// aggregate combining several.
pub trait FromScope: Clone + Send + Sync + Debug + 'static {
    /// Appends this type's parameter slots, in declaration order.
    fn describe(out: &mut Vec<ParamSpec>);

    /// Resolves this value, type-erased, from the scope named in `ctx`.
    fn resolve_erased(ctx: &ResolveCtx) -> Deferred<AnyValue>;

    /// Resolves this value with its concrete type restored.
    fn resolve(ctx: &ResolveCtx) -> Deferred<Self> {
        let erased = Self::resolve_erased(ctx);
        let out = Deferred::new();
        let out2 = out.clone();
        erased.observe(move |result| {
            out2.resolve(result.map(|any| {
                (*any.downcast::<Self>().expect("resolved value type mismatch")).clone()
            }))
        });
        out
    }
}

impl<T: Send + Sync + Debug + 'static> FromScope for Arc<T> {
    fn describe(out: &mut Vec<ParamSpec>) {
        out.push(ParamSpec::Value(Key::value::<T>()));
    }

    fn resolve_erased(ctx: &ResolveCtx) -> Deferred<AnyValue> {
        erase(resolve_required::<T>(ctx))
    }
}

impl<T: Send + Sync + Debug + 'static> FromScope for Option<Arc<T>> {
    fn describe(out: &mut Vec<ParamSpec>) {
        out.push(ParamSpec::OptionalValue(Key::value::<T>()));
    }

    fn resolve_erased(ctx: &ResolveCtx) -> Deferred<AnyValue> {
        erase(resolve_optional::<T>(ctx))
    }
}

/// Resolves every contributor to `group` as an ordered, first-seen-order
/// sequence. Exposed for `#[derive(In)]`-generated code; not `FromScope`
/// itself, since a group slot only exists as a named aggregate field.
pub fn group_field<T: Send + Sync + Debug + 'static>(
    ctx: &ResolveCtx,
    group: &'static str,
) -> Deferred<Vec<Arc<T>>> {
    resolve_group::<T>(ctx, group)
}

fn erase<T: Send + Sync + Debug + 'static>(d: Deferred<T>) -> Deferred<AnyValue> {
    erase_value(d)
}

/// Type-erases a resolved value, wrapping it so `downcast::<T>()` recovers
/// it. Exposed for `#[derive(In)]`-generated code, which resolves fields
/// that aren't bare `FromScope` impls (e.g. a group field's `Vec<Arc<T>>`).
pub fn erase_value<T: Send + Sync + Debug + 'static>(d: Deferred<T>) -> Deferred<AnyValue> {
    let out = Deferred::new();
    let out2 = out.clone();
    d.observe(move |result| out2.resolve(result.map(AnyValue::new)));
    out
}

/// A type a producer can return, as a whole: a single atomic value
/// (`Arc<T>`) or a `#[derive(Out)]` aggregate combining several.
pub trait IntoResults: Clone + Send + 'static {
    /// Appends this type's result slots, in declaration order.
    fn describe(out: &mut Vec<ResultSpec>);

    /// Writes every field into the scope's caches/group accumulators, using
    /// `specs` for the actual destination of each slot rather than this
    /// type's own `describe`. `specs` is `describe`'s output unless a
    /// registration-time override (`ProvideOptions::name`/`group`) replaced
    /// it — a single-field type like `Arc<T>` has to consult `specs` to
    /// know about such an override, since it has no field-level directives
    /// of its own to carry one. Always runs on the resolution coordinator,
    /// never on a worker thread.
    fn store(self, ctx: &StoreCtx, specs: &[ResultSpec]);
}

impl<T: Send + Sync + Debug + 'static> IntoResults for Arc<T> {
    fn describe(out: &mut Vec<ResultSpec>) {
        out.push(ResultSpec::Value(Key::value::<T>()));
    }

    fn store(self, ctx: &StoreCtx, specs: &[ResultSpec]) {
        match &specs[0] {
            ResultSpec::Value(key) => match key.name() {
                Some(name) => ctx.store_named::<T>(name, self),
                None => ctx.store_value::<T>(self),
            },
            ResultSpec::GroupItem(key) => {
                ctx.store_group_item::<T>(key.group_name().expect("group key"), self)
            }
            ResultSpec::GroupFlatten(_) => {
                unreachable!("a bare Arc<T> result is never overridden into a flattened group")
            }
        }
    }
}

/// Converts a producer body's literal return value into the fallible form
/// the engine expects, unifying infallible (`Out`) and fallible
/// (`Result<Out, E>`) producer bodies under one call path.
pub trait IntoProducerOutput<Out: IntoResults> {
    /// Normalizes to `Result<Out, BoxError>`.
    fn into_producer_output(self) -> Result<Out, BoxError>;
}

impl<Out: IntoResults> IntoProducerOutput<Out> for Out {
    fn into_producer_output(self) -> Result<Out, BoxError> {
        Ok(self)
    }
}

impl<Out: IntoResults, E: Into<BoxError>> IntoProducerOutput<Out> for Result<Out, E> {
    fn into_producer_output(self) -> Result<Out, BoxError> {
        self.map_err(Into::into)
    }
}

/// Resolves every member of a parameter list concurrently (the scheduling
/// happens as each member's `resolve_erased` runs), then combines them,
/// preserving positional order, into one `Deferred`. The first error of any
/// member wins, mirroring [`crate::deferred::when_all`].
pub fn join_values(members: Vec<Deferred<AnyValue>>) -> Deferred<Vec<AnyValue>> {
    use parking_lot::Mutex;

    let out = Deferred::new();
    let total = members.len();
    if total == 0 {
        out.resolve(Ok(Vec::new()));
        return out;
    }

    let slots: Arc<Mutex<Vec<Option<AnyValue>>>> = Arc::new(Mutex::new(vec![None; total]));
    let remaining = Arc::new(Mutex::new(total));
    let settled = Arc::new(Mutex::new(false));

    for (index, member) in members.into_iter().enumerate() {
        let out = out.clone();
        let slots = slots.clone();
        let remaining = remaining.clone();
        let settled = settled.clone();
        member.observe(move |result| match result {
            Ok(value) => {
                slots.lock()[index] = Some(value);
                let mut left = remaining.lock();
                *left -= 1;
                if *left == 0 {
                    let mut done = settled.lock();
                    if !*done {
                        *done = true;
                        drop(done);
                        let values = slots.lock().drain(..).map(|v| v.expect("filled")).collect();
                        out.resolve(Ok(values));
                    }
                }
            }
            Err(err) => {
                let mut done = settled.lock();
                if !*done {
                    *done = true;
                    drop(done);
                    out.resolve(Err(err));
                }
            }
        });
    }
    out
}

/// A producer/consumer body, generic over its positional argument tuple.
/// Implemented for every `Fn(A1..=A6) -> R` via the macro below; tuple
/// arity disambiguates the impls, so there is no need for a marker type.
pub trait ProducerFn<Args>: Send + Sync + 'static {
    /// The literal return type of the closure.
    type Output;

    /// Invokes the closure with its positional arguments.
    fn call(&self, args: Args) -> Self::Output;
}

/// A positional argument tuple whose members each implement [`FromScope`].
pub trait ParamsTuple: Send + 'static {
    /// Appends every member's parameter slots, in positional order.
    fn describe(out: &mut Vec<ParamSpec>);

    /// Resolves every member concurrently and combines them in order.
    fn resolve(ctx: &ResolveCtx) -> Deferred<Vec<AnyValue>>;

    /// Reconstructs the tuple from resolved, type-erased members.
    fn from_values(values: Vec<AnyValue>) -> Self;
}

macro_rules! impl_arity {
    ($count:expr; $($arg:ident),*) => {
        #[allow(non_snake_case, unused_variables, unused_mut)]
        impl<$($arg: FromScope,)*> ParamsTuple for ($($arg,)*) {
            fn describe(out: &mut Vec<ParamSpec>) {
                $($arg::describe(out);)*
            }

            fn resolve(ctx: &ResolveCtx) -> Deferred<Vec<AnyValue>> {
                let members = vec![$($arg::resolve_erased(ctx)),*];
                join_values(members)
            }

            fn from_values(values: Vec<AnyValue>) -> Self {
                let mut values = values.into_iter();
                ($(
                    (*values.next().expect("arity mismatch").downcast::<$arg>().expect("resolved value type mismatch")).clone(),
                )*)
            }
        }

        #[allow(non_snake_case, unused_variables)]
        impl<F, $($arg,)* R> ProducerFn<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
        {
            type Output = R;

            fn call(&self, args: ($($arg,)*)) -> R {
                let ($($arg,)*) = args;
                (self)($($arg),*)
            }
        }
    };
}

impl_arity!(0;);
impl_arity!(1; A1);
impl_arity!(2; A1, A2);
impl_arity!(3; A1, A2, A3);
impl_arity!(4; A1, A2, A3, A4);
impl_arity!(5; A1, A2, A3, A4, A5);
impl_arity!(6; A1, A2, A3, A4, A5, A6);

/// A decorator body: the value it decorates, always first and supplied by
/// the engine rather than resolved, followed by zero or more ordinary
/// parameters resolved from the scope the decorator runs in. Implemented for
/// every `Fn(Arc<T>, A1..=A5) -> R` via the macro below, the same way
/// [`ProducerFn`] covers every positional arity.
pub trait DecoratorFn<T, Rest>: Send + Sync + 'static {
    /// The literal return type of the closure.
    type Output;

    /// Invokes the closure with the decorated value and its extra
    /// parameters.
    fn call(&self, value: Arc<T>, rest: Rest) -> Self::Output;
}

macro_rules! impl_decorator_arity {
    ($($arg:ident),*) => {
        #[allow(non_snake_case, unused_variables)]
        impl<F, T, $($arg: FromScope,)* R> DecoratorFn<T, ($($arg,)*)> for F
        where
            F: Fn(Arc<T>, $($arg),*) -> R + Send + Sync + 'static,
        {
            type Output = R;

            fn call(&self, value: Arc<T>, rest: ($($arg,)*)) -> R {
                let ($($arg,)*) = rest;
                (self)(value, $($arg),*)
            }
        }
    };
}

impl_decorator_arity!();
impl_decorator_arity!(A1);
impl_decorator_arity!(A1, A2);
impl_decorator_arity!(A1, A2, A3);
impl_decorator_arity!(A1, A2, A3, A4);
impl_decorator_arity!(A1, A2, A3, A4, A5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_spec_key_accessor() {
        let spec = ParamSpec::Value(Key::value::<u8>());
        assert_eq!(*spec.key(), Key::value::<u8>());
    }

    #[test]
    fn result_spec_key_accessor() {
        let spec = ResultSpec::GroupItem(Key::group::<u8>("g"));
        assert_eq!(*spec.key(), Key::group::<u8>("g"));
    }

    #[test]
    fn into_producer_output_normalizes_plain_and_result() {
        let plain: Arc<u8> = Arc::new(1);
        assert!(plain.clone().into_producer_output().is_ok());

        let fallible: Result<Arc<u8>, std::io::Error> = Ok(Arc::new(2));
        assert!(fallible.into_producer_output().is_ok());

        let failing: Result<Arc<u8>, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(failing.into_producer_output().is_err());
    }
}
