//! Drives a single key, or a whole parameter list, from a scope down to
//! settled values: cache lookups, decorator interposition, producer
//! execution, and group aggregation all meet here.

use std::fmt::Debug;
use std::sync::Arc;

use crate::anyval::AnyValue;
use crate::deferred::{when_all, Deferred};
use crate::diagnostics::DiagGraph;
use crate::error::{DigError, Frame, ResolutionError};
use crate::introspect::{IntoProducerOutput, IntoResults, ParamsTuple, ProducerFn, ResultSpec};
use crate::key::Key;
use crate::registry::{Decorator, Producer};
use crate::scheduler::{Scheduler, Task};
use crate::scope::Scope;

/// Everything a parameter's `resolve_erased` implementation needs: which
/// scope to resolve from, and how producer bodies should be scheduled.
#[derive(Clone)]
pub struct ResolveCtx {
    scope: Scope,
    scheduler: Arc<dyn Scheduler>,
    diagnostics: Arc<DiagGraph>,
}

impl ResolveCtx {
    /// A context rooted at `scope`, running producer bodies with
    /// `scheduler` and recording outcomes in `diagnostics`.
    pub fn new(scope: Scope, scheduler: Arc<dyn Scheduler>, diagnostics: Arc<DiagGraph>) -> Self {
        Self { scope, scheduler, diagnostics }
    }

    /// The scope this context resolves parameters from.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The scheduler producer bodies run on.
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// The diagnostics graph outcomes are recorded in.
    pub fn diagnostics(&self) -> &Arc<DiagGraph> {
        &self.diagnostics
    }

    /// The same context, rooted at a different scope — used when a
    /// producer's own dependencies must be resolved relative to where *it*
    /// was registered, not relative to whoever asked for its result.
    pub fn in_scope(&self, scope: Scope) -> Self {
        Self { scope, scheduler: self.scheduler.clone(), diagnostics: self.diagnostics.clone() }
    }
}

/// Where a key would be resolved from: the nearest scope, walking from
/// `scope` up to the root, that either decorates it or owns its producer.
/// `true` in the second element means a decorator was found.
fn resolution_scope(scope: &Scope, key: &Key) -> Option<(Scope, bool)> {
    for candidate in scope.ancestry() {
        if candidate.registry().lookup_decorator(key).is_some() {
            return Some((candidate, true));
        }
        if candidate.registry().provides(key) {
            return Some((candidate, false));
        }
    }
    None
}

/// The type-erased core of resolution: cache lookup, decorator
/// interposition, or producer execution, whichever applies.
fn produce_erased(ctx: &ResolveCtx, key: &Key) -> Deferred<AnyValue> {
    if let Some(cached) = ctx.scope().lookup_cached(key) {
        return Deferred::settled(cached);
    }

    let Some((scope, has_decorator)) = resolution_scope(ctx.scope(), key) else {
        ctx.diagnostics().add_missing(key.clone());
        return Deferred::failed(DigError::Resolution(ResolutionError::Missing { key: key.clone() }));
    };

    if has_decorator {
        let decorator = scope.registry().lookup_decorator(key).expect("decorator vanished mid-resolution");
        let ctx = ctx.clone();
        let key = key.clone();
        scope.decorator_inflight_or_insert(decorator.id, move || {
            run_decorator(&ctx, &scope, decorator, key)
        })
    } else {
        let producer = scope.registry().lookup_value(key).expect("producer vanished mid-resolution");
        let scope2 = scope.clone();
        let key2 = key.clone();
        let ctx2 = ctx.clone();
        let settle = scope.producer_inflight_or_insert(producer.id, move || {
            run_producer(&ctx2, &scope2, producer)
        });
        let out = Deferred::new();
        let out2 = out.clone();
        let scope3 = scope.clone();
        let key3 = key.clone();
        settle.observe(move |result| match result {
            Ok(()) => {
                let value = scope3
                    .lookup_cached(&key3)
                    .expect("producer completed without storing its declared result");
                out2.resolve(Ok(value));
            }
            Err(err) => out2.resolve(Err(err)),
        });
        out
    }
}

/// Runs a producer's body, resolved from its *own* registration scope, and
/// settles once every one of its declared results has been cached there.
fn run_producer(ctx: &ResolveCtx, scope: &Scope, producer: Arc<Producer>) -> Deferred<()> {
    let scoped = ctx.in_scope(scope.clone());
    (producer.run)(&scoped)
}

/// Runs a decorator: resolves the value it wraps (from this scope's own
/// producer if one exists here, else by delegating to the parent scope's
/// resolution — which may itself pass through another decorator further
/// up), then applies the decorator body on top.
fn run_decorator(ctx: &ResolveCtx, scope: &Scope, decorator: Arc<Decorator>, key: Key) -> Deferred<AnyValue> {
    let base: Deferred<AnyValue> = if let Some(producer) = scope.registry().lookup_value(&key) {
        let scope2 = scope.clone();
        let key2 = key.clone();
        let ctx2 = ctx.in_scope(scope.clone());
        let settle =
            scope.producer_inflight_or_insert(producer.id, move || run_producer(&ctx2, &scope2, producer));
        let out = Deferred::new();
        let out2 = out.clone();
        let scope3 = scope.clone();
        let key3 = key.clone();
        settle.observe(move |result| match result {
            Ok(()) => {
                let value = scope3
                    .lookup_cached(&key3)
                    .expect("producer completed without storing its declared result");
                out2.resolve(Ok(value));
            }
            Err(err) => out2.resolve(Err(err)),
        });
        out
    } else {
        match scope.parent() {
            Some(parent) => produce_erased(&ctx.in_scope(parent.clone()), &key),
            None => Deferred::failed(DigError::Resolution(ResolutionError::Missing { key: key.clone() })),
        }
    };

    let decorator_ctx = ctx.in_scope(scope.clone());
    base.then(move |value| (decorator.run)(&decorator_ctx, value))
}

/// Resolves the single required value `T`, running its producer if it has
/// not already been cached in this scope or an ancestor.
pub fn resolve_required<T: Send + Sync + Debug + 'static>(ctx: &ResolveCtx) -> Deferred<Arc<T>> {
    downcast_deferred(produce_erased(ctx, &Key::value::<T>()))
}

/// Resolves `T` by name, otherwise identical to [`resolve_required`].
pub fn resolve_named<T: Send + Sync + Debug + 'static>(
    ctx: &ResolveCtx,
    name: &'static str,
) -> Deferred<Arc<T>> {
    downcast_deferred(produce_erased(ctx, &Key::named::<T>(name)))
}

/// Resolves `T`, yielding `None` rather than failing if no producer is
/// visible from this scope. A producer that *is* visible but fails still
/// fails the whole resolution — optionality only waives absence.
pub fn resolve_optional<T: Send + Sync + Debug + 'static>(
    ctx: &ResolveCtx,
) -> Deferred<Option<Arc<T>>> {
    let key = Key::value::<T>();
    if resolution_scope(ctx.scope(), &key).is_none() {
        return Deferred::settled(None);
    }
    let inner = resolve_required::<T>(ctx);
    let out = Deferred::new();
    let out2 = out.clone();
    inner.observe(move |result| out2.resolve(result.map(Some)));
    out
}

/// As [`resolve_optional`], but for a named key.
pub fn resolve_optional_named<T: Send + Sync + Debug + 'static>(
    ctx: &ResolveCtx,
    name: &'static str,
) -> Deferred<Option<Arc<T>>> {
    let key = Key::named::<T>(name);
    if resolution_scope(ctx.scope(), &key).is_none() {
        return Deferred::settled(None);
    }
    let inner = downcast_deferred::<T>(produce_erased(ctx, &key));
    let out = Deferred::new();
    let out2 = out.clone();
    inner.observe(move |result| out2.resolve(result.map(Some)));
    out
}

/// Resolves every contributor to `group`, across the whole subtree `ctx`'s
/// scope sits in — every ancestor up to the root, plus every descendant —
/// not just the ancestor chain. A group is the one slot kind a container
/// sees regardless of which side of it a contributor was registered on.
pub fn resolve_group<T: Send + Sync + Debug + 'static>(
    ctx: &ResolveCtx,
    group: &'static str,
) -> Deferred<Vec<Arc<T>>> {
    let key = Key::group::<T>(group);
    let mut running = Vec::new();
    let mut scopes = ctx.scope().ancestry();
    scopes.extend(ctx.scope().descendants());
    for scope in scopes {
        for producer in scope.registry().lookup_group(&key) {
            let scope2 = scope.clone();
            let ctx2 = ctx.in_scope(scope.clone());
            running.push(scope.producer_inflight_or_insert(producer.id, move || {
                run_producer(&ctx2, &scope2, producer)
            }));
        }
    }

    let all = when_all(running);
    let ctx_scope = ctx.scope().clone();
    let diagnostics = ctx.diagnostics().clone();
    let key_for_failure = key.clone();
    let out = Deferred::new();
    let out2 = out.clone();
    all.observe(move |result| match result {
        Ok(_) => {
            let values = ctx_scope.collect_group(&key);
            let mut items = Vec::with_capacity(values.len());
            for value in values {
                items.push(value.downcast::<T>().expect("group contributor type mismatch"));
            }
            out2.resolve(Ok(items));
        }
        Err(err) => {
            diagnostics.fail_group(&key_for_failure, err.to_string());
            out2.resolve(Err(err));
        }
    });
    out
}

fn downcast_deferred<T: Send + Sync + Debug + 'static>(d: Deferred<AnyValue>) -> Deferred<Arc<T>> {
    let out = Deferred::new();
    let out2 = out.clone();
    d.observe(move |result| {
        out2.resolve(result.map(|any| any.downcast::<T>().expect("resolved value type mismatch")))
    });
    out
}

/// Where a producer's results get written once its body settles — always
/// the scope it was registered in, regardless of who asked for it.
pub struct StoreCtx {
    scope: Scope,
}

impl StoreCtx {
    /// A store context writing into `scope`.
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }

    /// Caches the sole value for `T`.
    pub fn store_value<T: Send + Sync + Debug + 'static>(&self, value: Arc<T>) {
        self.scope.cache_value(Key::value::<T>(), AnyValue::new(value));
    }

    /// Caches the value for `T` registered under `name`.
    pub fn store_named<T: Send + Sync + Debug + 'static>(&self, name: &'static str, value: Arc<T>) {
        self.scope.cache_value(Key::named::<T>(name), AnyValue::new(value));
    }

    /// Appends a single contribution to a named group.
    pub fn store_group_item<T: Send + Sync + Debug + 'static>(
        &self,
        group: &'static str,
        value: Arc<T>,
    ) {
        self.scope.append_group(Key::group::<T>(group), AnyValue::new(value));
    }

    /// Expands a sequence element-wise into a named group's contributors.
    pub fn store_group_flatten<T: Send + Sync + Debug + 'static>(
        &self,
        group: &'static str,
        values: Vec<Arc<T>>,
    ) {
        let key = Key::group::<T>(group);
        for value in values {
            self.scope.append_group(key.clone(), AnyValue::new(value));
        }
    }
}

/// Wraps an upstream failure as [`ResolutionError::Transitive`], attributed
/// to `key` (the producer/consumer whose own parameter resolution failed),
/// carrying the upstream error forward as `root`. Called at the first point
/// a parameter-resolution failure would otherwise cross a producer boundary
/// unchanged, so every consumer further downstream still sees the original
/// root cause via `root` while reporting its own classification correctly.
fn wrap_transitive(key: &Key, err: DigError) -> DigError {
    let trail = err.key().map(|k| vec![Frame { key: k.clone(), location: None }]).unwrap_or_default();
    DigError::Resolution(ResolutionError::Transitive { key: key.clone(), trail, root: Arc::new(err) })
}

/// Builds a producer's `run` closure: resolves `Args`, schedules the body,
/// and stores `Out`'s results once it settles successfully. A failure while
/// resolving `Args` is reported as transitive; a failure from the body
/// itself is reported as the root cause.
pub fn build_producer_run<Args, F, Out>(
    f: F,
    location: &'static str,
    result_key_for_errors: Key,
    results: Vec<ResultSpec>,
    recover_from_panics: bool,
) -> Box<dyn Fn(&ResolveCtx) -> Deferred<()> + Send + Sync>
where
    Args: ParamsTuple,
    F: ProducerFn<Args> + Clone,
    F::Output: IntoProducerOutput<Out>,
    Out: IntoResults,
{
    Box::new(move |ctx: &ResolveCtx| {
        let ctx = ctx.clone();
        let f = f.clone();
        let location = location;
        let result_key = result_key_for_errors.clone();
        let results = results.clone();
        let diagnostics = ctx.diagnostics().clone();
        let args_deferred = Args::resolve(&ctx);
        let out = Deferred::new();
        let out_for_args = out.clone();
        let result_key_for_args = result_key.clone();
        let diagnostics_for_args = diagnostics.clone();
        args_deferred.observe(move |args_result| {
            let values = match args_result {
                Ok(values) => values,
                Err(err) => {
                    let wrapped = wrap_transitive(&result_key_for_args, err);
                    diagnostics_for_args.fail_transitive(&result_key_for_args, wrapped.to_string());
                    out_for_args.resolve(Err(wrapped));
                    return;
                }
            };
            let key_for_transitive = result_key.clone();
            let store_ctx = StoreCtx::new(ctx.scope().clone());
            let scheduler = ctx.scheduler().clone();
            let task: Task = Box::new(move || {
                let args = Args::from_values(values);
                let outcome = call_with_optional_recovery(recover_from_panics, &key_for_transitive, location, || {
                    f.call(args)
                })?;
                outcome
                    .into_producer_output()
                    .map(AnyValue::new)
                    .map_err(|source| {
                        DigError::Resolution(ResolutionError::ConstructorFailed {
                            key: key_for_transitive.clone(),
                            location,
                            source: Arc::new(source),
                        })
                    })
            });
            let settled = scheduler.schedule(task);
            scheduler.flush();
            let out2 = out_for_args.clone();
            let key_for_diag = result_key.clone();
            let diagnostics2 = diagnostics.clone();
            let results2 = results.clone();
            settled.observe(move |result| match result {
                Ok(any) => {
                    let out_val = (*any.downcast::<Out>().expect("producer output type mismatch")).clone();
                    out_val.store(&store_ctx, &results2);
                    out2.resolve(Ok(()));
                }
                Err(err) => {
                    diagnostics2.fail_value(&key_for_diag, err.to_string());
                    out2.resolve(Err(err));
                }
            });
        });
        out
    })
}

/// Catches a panic from `body` and reports it as [`ResolutionError::Panicked`]
/// when `recover` is set; otherwise lets it unwind the calling (worker)
/// thread, matching a producer's ordinary Rust panic behavior.
fn call_with_optional_recovery<R>(
    recover: bool,
    key: &Key,
    location: &'static str,
    body: impl FnOnce() -> R + std::panic::UnwindSafe,
) -> Result<R, DigError> {
    if !recover {
        return Ok(body());
    }
    std::panic::catch_unwind(body).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "producer panicked with a non-string payload".to_string());
        DigError::Resolution(ResolutionError::Panicked { key: key.clone(), location, message })
    })
}

/// Runs a one-off consumer function: resolves `Args` from `ctx`'s scope and
/// calls `f`, but never caches or registers a result anywhere.
pub fn invoke<Args, F, Out>(ctx: &ResolveCtx, f: F, recover_from_panics: bool) -> Deferred<Out>
where
    Args: ParamsTuple,
    F: ProducerFn<Args> + Clone,
    F::Output: IntoProducerOutput<Out>,
    Out: IntoResults,
{
    let ctx = ctx.clone();
    let scheduler = ctx.scheduler().clone();
    let diagnostics = ctx.diagnostics().clone();
    let args_deferred = Args::resolve(&ctx);
    let out = Deferred::new();
    let out_for_args = out.clone();
    let key = Key::value::<Out>();
    let key_for_args = key.clone();
    let diagnostics_for_args = diagnostics.clone();
    args_deferred.observe(move |args_result| {
        let values = match args_result {
            Ok(values) => values,
            Err(err) => {
                let wrapped = wrap_transitive(&key_for_args, err);
                diagnostics_for_args.fail_transitive(&key_for_args, wrapped.to_string());
                out_for_args.resolve(Err(wrapped));
                return;
            }
        };
        let f = f.clone();
        let key = key.clone();
        let task: Task = Box::new(move || {
            let args = Args::from_values(values);
            let outcome =
                call_with_optional_recovery(recover_from_panics, &key, "invoke", || f.call(args))?;
            outcome.into_producer_output().map(AnyValue::new).map_err(|source| {
                DigError::Resolution(ResolutionError::ConstructorFailed {
                    key: key.clone(),
                    location: "invoke",
                    source: Arc::new(source),
                })
            })
        });
        let settled = scheduler.schedule(task);
        scheduler.flush();
        let out2 = out_for_args.clone();
        let diagnostics2 = diagnostics.clone();
        let key_for_diag = key_for_args.clone();
        settled.observe(move |result| match result {
            Ok(any) => out2.resolve(Ok((*any.downcast::<Out>().expect("invoke result type mismatch")).clone())),
            Err(err) => {
                diagnostics2.fail_value(&key_for_diag, err.to_string());
                out2.resolve(Err(err));
            }
        });
    });
    out
}
