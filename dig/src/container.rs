//! The public surface: `Container`, its `Provide`/`Invoke`/`Decorate`/`Scope`
//! operations, and their option builders.

use std::fmt::{self, Debug};
use std::sync::Arc;

use tracing::instrument;

use crate::anyval::AnyValue;
use crate::clock::{Clock, SystemClock};
use crate::cycle;
use crate::deferred::Deferred;
use crate::diagnostics::DiagGraph;
use crate::engine::{self, ResolveCtx};
use crate::error::{DigError, RegistrationError, ResolutionError};
use crate::introspect::{DecoratorFn, IntoProducerOutput, IntoResults, ParamsTuple, ProducerFn};
use crate::key::Key;
use crate::registry::{next_producer_id, Decorator, Producer};
use crate::scheduler::{Scheduler, Synchronous};
use crate::scope::Scope;

/// Options governing one `Provide` call.
#[derive(Clone, Default)]
pub struct ProvideOptions {
    name: Option<&'static str>,
    group: Option<&'static str>,
    location: Option<&'static str>,
    export: bool,
    defer_acyclic_verification: bool,
    recover_from_panics: bool,
}

impl ProvideOptions {
    /// Default options: unnamed, not grouped, registered in the calling
    /// scope, cycle-checked eagerly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the produced value under `name` rather than as the sole
    /// unnamed producer of its type.
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    /// Registers the produced value as one contributor to the `group`
    /// collection of its type, rather than as a sole value.
    pub fn group(mut self, group: &'static str) -> Self {
        self.group = Some(group);
        self
    }

    /// Overrides the auto-derived registration-site label used in error
    /// messages and diagnostics.
    pub fn location(mut self, location: &'static str) -> Self {
        self.location = Some(location);
        self
    }

    /// Registers this producer in the parent scope instead of the scope
    /// `provide` was called on — lets a subscope seed a value its own
    /// parent (and thus every sibling subscope) can see.
    pub fn export(mut self, export: bool) -> Self {
        self.export = export;
        self
    }

    /// Skips the eager cycle check at registration time. Use only when a
    /// cycle is known to be impossible for reasons this crate can't see
    /// (e.g. the dependency is resolved lazily and never actually entered).
    pub fn defer_acyclic_verification(mut self, defer: bool) -> Self {
        self.defer_acyclic_verification = defer;
        self
    }

    /// Catches a panic from this producer's body and reports it as
    /// [`crate::error::ResolutionError::Panicked`] instead of unwinding.
    pub fn recover_from_panics(mut self, recover: bool) -> Self {
        self.recover_from_panics = recover;
        self
    }
}

/// Options governing one `Decorate` call.
#[derive(Clone, Default)]
pub struct DecorateOptions {
    name: Option<&'static str>,
    location: Option<&'static str>,
    export: bool,
}

impl DecorateOptions {
    /// Default options: decorates the unnamed value, in the calling scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decorates the value registered under `name`.
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    /// Overrides the auto-derived registration-site label.
    pub fn location(mut self, location: &'static str) -> Self {
        self.location = Some(location);
        self
    }

    /// Installs this decorator in the parent scope instead of the scope
    /// `decorate` was called on.
    pub fn export(mut self, export: bool) -> Self {
        self.export = export;
        self
    }
}

/// Options governing one `Invoke` call.
#[derive(Clone, Default)]
pub struct InvokeOptions {
    recover_from_panics: bool,
    dry_run: bool,
}

impl InvokeOptions {
    /// Default options: runs the consumer for real, panics propagate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catches a panic from the consumer and reports it as
    /// [`crate::error::ResolutionError::Panicked`].
    pub fn recover_from_panics(mut self, recover: bool) -> Self {
        self.recover_from_panics = recover;
        self
    }

    /// Resolves every parameter as usual but never actually calls the
    /// consumer function — useful for checking that a graph *would*
    /// resolve without running its side effects.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// A dependency-injection container: a root [`Scope`] plus the collaborators
/// (scheduler, diagnostics graph, clock) every resolution within it shares.
pub struct Container {
    scope: Scope,
    scheduler: Arc<dyn Scheduler>,
    diagnostics: Arc<DiagGraph>,
    clock: Arc<dyn Clock>,
}

impl Container {
    /// A new, empty container: a root scope, an inline (`Synchronous`)
    /// scheduler, and the system clock.
    pub fn new() -> Self {
        Self {
            scope: Scope::root(),
            scheduler: Arc::new(Synchronous::default()),
            diagnostics: Arc::new(DiagGraph::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Installs a different execution strategy for producer bodies.
    pub fn set_scheduler(&mut self, scheduler: Arc<dyn Scheduler>) {
        self.scheduler = scheduler;
    }

    /// Installs a different clock, e.g. a deterministic one for tests.
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    /// The clock currently installed.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The root scope of this container.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The diagnostics graph recorded so far.
    pub fn diagnostics(&self) -> &Arc<DiagGraph> {
        &self.diagnostics
    }

    /// A new child scope, seeing everything this container's scope sees.
    pub fn subscope(&self, name: impl Into<Option<String>>) -> Container {
        Container {
            scope: self.scope.subscope(name),
            scheduler: self.scheduler.clone(),
            diagnostics: self.diagnostics.clone(),
            clock: self.clock.clone(),
        }
    }

    fn resolve_ctx(&self) -> ResolveCtx {
        ResolveCtx::new(self.scope.clone(), self.scheduler.clone(), self.diagnostics.clone())
    }

    fn target_scope(&self, export: bool) -> Scope {
        if export {
            self.scope.parent().cloned().unwrap_or_else(|| self.scope.clone())
        } else {
            self.scope.clone()
        }
    }

    /// Registers a producer. `f`'s parameter list is decoded via
    /// [`ParamsTuple`] and its return type via [`IntoResults`]; most
    /// producers return a bare `Arc<T>` or `Result<Arc<T>, E>`, but a
    /// `#[derive(Out)]` aggregate may contribute several result keys at
    /// once, in which case `options`'s `name`/`group` are ignored (the
    /// aggregate's own field directives take precedence).
    #[instrument(level = "debug", skip(self, f))]
    pub fn provide<Args, F, Out>(&self, f: F, options: ProvideOptions) -> Result<(), DigError>
    where
        Args: ParamsTuple,
        F: ProducerFn<Args> + Clone,
        F::Output: IntoProducerOutput<Out>,
        Out: IntoResults,
    {
        if options.name.is_some() && options.group.is_some() {
            return Err(DigError::Registration(RegistrationError::BadSignature {
                aggregate: std::any::type_name::<Out>(),
                field: "<result>",
                reason: "`name` and `group` cannot both be set on the same `ProvideOptions`",
            }));
        }

        let mut params = Vec::new();
        Args::describe(&mut params);
        let mut results = Vec::new();
        Out::describe(&mut results);

        if results.len() == 1 {
            results[0] = apply_single_result_override(results.remove(0), &options);
        }

        let location = options.location.unwrap_or("<unknown>");
        let target = self.target_scope(options.export);
        let deps: Vec<Key> = params.iter().map(|p| p.key().clone()).collect();

        if !options.defer_acyclic_verification {
            let result_keys: Vec<Key> = results.iter().map(|r| r.key().clone()).collect();
            cycle::check_for_cycle(&target, location, &result_keys, &deps)?;
        }

        let id = next_producer_id();
        let primary_key =
            results.first().map(|r| r.key().clone()).unwrap_or_else(|| Key::value::<Out>());
        let run = engine::build_producer_run::<Args, F, Out>(
            f,
            location,
            primary_key,
            results.clone(),
            options.recover_from_panics,
        );
        let producer = Arc::new(Producer { id, location, params, results: results.clone(), run });

        for spec in &results {
            self.diagnostics.add_producer(spec.key().clone(), location, deps.clone());
            if spec.key().is_group() {
                target.registry().register_group_item(spec.key().clone(), producer.clone());
            } else {
                target.registry().register_value(spec.key().clone(), producer.clone())?;
            }
        }
        Ok(())
    }

    /// Installs a decorator for the unnamed (or, with `options.name`,
    /// named) value of `T`: a function run on top of whatever the normal
    /// producer chain would have resolved, within this scope and every
    /// descendant that doesn't install its own decorator for the same key.
    /// `f` takes the decorated value first, then any number of ordinary
    /// parameters (`Rest`) resolved the same way a producer's would be.
    #[instrument(level = "debug", skip(self, f))]
    pub fn decorate<T, Rest, F>(&self, f: F, options: DecorateOptions) -> Result<(), DigError>
    where
        T: Send + Sync + Debug + 'static,
        Rest: ParamsTuple,
        F: DecoratorFn<T, Rest> + Clone,
        F::Output: IntoProducerOutput<Arc<T>>,
    {
        let key = match options.name {
            Some(name) => Key::named::<T>(name),
            None => Key::value::<T>(),
        };
        let location = options.location.unwrap_or("<unknown>");
        let target = self.target_scope(options.export);
        let id = next_producer_id();
        let key_for_run = key.clone();

        let mut params = Vec::new();
        Rest::describe(&mut params);

        let run: Box<dyn Fn(&ResolveCtx, AnyValue) -> Deferred<AnyValue> + Send + Sync> = {
            let f = f.clone();
            Box::new(move |ctx: &ResolveCtx, original: AnyValue| {
                let original = original
                    .downcast::<T>()
                    .expect("decorator received a base value of the wrong type");
                let f = f.clone();
                let location = location;
                let key_for_rest = key_for_run.clone();
                let out = Deferred::new();
                let out2 = out.clone();
                Rest::resolve(ctx).observe(move |rest_result| {
                    let rest = match rest_result {
                        Ok(rest) => rest,
                        Err(err) => {
                            out2.resolve(Err(err));
                            return;
                        }
                    };
                    let outcome = f.call(original, Rest::from_values(rest)).into_producer_output();
                    out2.resolve(outcome.map(AnyValue::new).map_err(|source| {
                        DigError::Resolution(ResolutionError::ConstructorFailed {
                            key: key_for_rest.clone(),
                            location,
                            source: Arc::new(source),
                        })
                    }));
                });
                out
            })
        };

        target
            .registry()
            .register_decorator(Decorator { id, location, key, params, run })
            .map_err(DigError::from)
    }

    /// Runs a one-off consumer function against this container's scope.
    /// Unlike `provide`, nothing it returns is cached or made visible to
    /// later calls.
    #[instrument(level = "debug", skip(self, f))]
    pub fn invoke<Args, F, Out>(&self, f: F, options: InvokeOptions) -> Result<Option<Out>, DigError>
    where
        Args: ParamsTuple,
        F: ProducerFn<Args> + Clone,
        F::Output: IntoProducerOutput<Out>,
        Out: IntoResults,
    {
        let ctx = self.resolve_ctx();
        if options.dry_run {
            let mut result = None;
            let resolved = Args::resolve(&ctx);
            resolved.observe(|r| result = Some(r.map(|_| ())));
            return result.unwrap_or(Ok(())).map(|_| None);
        }

        let mut outcome = None;
        let deferred = engine::invoke::<Args, F, Out>(&ctx, f, options.recover_from_panics);
        deferred.observe(|r| outcome = Some(r));
        match outcome {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(err)) => Err(err),
            None => Err(DigError::Resolution(ResolutionError::Missing { key: Key::value::<Out>() })),
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Container(scope={:?})", self.scope.id())
    }
}

impl fmt::Display for Container {
    /// Prints the registry and scope tree rooted at this container's scope:
    /// every key each scope in the chain provides, innermost first.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Container:")?;
        for scope in self.scope.ancestry() {
            let label = scope.name().unwrap_or("<unnamed>");
            writeln!(f, "  scope {:?} ({}):", scope.id(), label)?;
            for key in scope.registry().all_keys() {
                writeln!(f, "    {}", key)?;
            }
        }
        Ok(())
    }
}

fn apply_single_result_override(
    spec: crate::introspect::ResultSpec,
    options: &ProvideOptions,
) -> crate::introspect::ResultSpec {
    use crate::introspect::ResultSpec;
    match (options.name, options.group) {
        (Some(name), _) => match spec {
            ResultSpec::Value(key) => ResultSpec::Value(key.with_name(name)),
            other => other,
        },
        (None, Some(group)) => match spec {
            ResultSpec::Value(key) => ResultSpec::GroupItem(key.with_group(group)),
            other => other,
        },
        (None, None) => spec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn provide_then_invoke_resolves_a_chain() {
        let container = Container::new();
        container.provide::<(), _, Arc<u32>>(|| Arc::new(10u32), ProvideOptions::new()).unwrap();
        container
            .provide::<(Arc<u32>,), _, Arc<u32>>(
                |base| Arc::new(*base + 1),
                ProvideOptions::new(),
            )
            .unwrap();

        let result = container
            .invoke::<(Arc<u32>,), _, Arc<String>>(
                |value| Arc::new(value.to_string()),
                InvokeOptions::new(),
            )
            .unwrap();
        assert_eq!(result.map(|s| (*s).clone()), Some("10".to_string()));
    }

    #[test]
    fn duplicate_provide_is_rejected() {
        let container = Container::new();
        container.provide::<(), _, Arc<u8>>(|| Arc::new(1u8), ProvideOptions::new()).unwrap();
        let err = container.provide::<(), _, Arc<u8>>(|| Arc::new(2u8), ProvideOptions::new());
        assert!(err.is_err());
    }

    #[test]
    fn decorate_wraps_the_underlying_value() {
        let container = Container::new();
        container.provide::<(), _, Arc<u8>>(|| Arc::new(1u8), ProvideOptions::new()).unwrap();
        container
            .decorate::<u8, _>(|original: Arc<u8>| Arc::new(*original + 41), DecorateOptions::new())
            .unwrap();

        let result = container
            .invoke::<(Arc<u8>,), _, Arc<u8>>(|v| v, InvokeOptions::new())
            .unwrap();
        assert_eq!(result.map(|v| *v), Some(42));
    }

    #[test]
    fn subscope_decorator_does_not_leak_to_siblings() {
        let container = Container::new();
        container.provide::<(), _, Arc<u8>>(|| Arc::new(1u8), ProvideOptions::new()).unwrap();
        let decorated = container.subscope(Some("decorated".to_string()));
        decorated
            .decorate::<u8, _>(|original: Arc<u8>| Arc::new(*original + 1), DecorateOptions::new())
            .unwrap();
        let plain = container.subscope(Some("plain".to_string()));

        let from_decorated = decorated
            .invoke::<(Arc<u8>,), _, Arc<u8>>(|v| v, InvokeOptions::new())
            .unwrap();
        let from_plain =
            plain.invoke::<(Arc<u8>,), _, Arc<u8>>(|v| v, InvokeOptions::new()).unwrap();
        assert_eq!(from_decorated.map(|v| *v), Some(2));
        assert_eq!(from_plain.map(|v| *v), Some(1));
    }

    #[test]
    fn cyclic_registration_is_rejected() {
        let container = Container::new();
        container
            .provide::<(Arc<u32>,), _, Arc<u16>>(|_: Arc<u32>| Arc::new(1u16), ProvideOptions::new())
            .unwrap();
        let err = container
            .provide::<(Arc<u16>,), _, Arc<u32>>(|_: Arc<u16>| Arc::new(1u32), ProvideOptions::new());
        assert!(err.is_err());
    }

    #[test]
    fn constructor_error_propagates_to_invoke() {
        let container = Container::new();
        container
            .provide::<(), _, Arc<u8>>(
                || -> Result<Arc<u8>, std::io::Error> {
                    Err(std::io::Error::new(std::io::ErrorKind::Other, "nope"))
                },
                ProvideOptions::new(),
            )
            .unwrap();
        let err = container.invoke::<(Arc<u8>,), _, Arc<u8>>(|v| v, InvokeOptions::new());
        assert!(err.is_err());
    }

    #[test]
    fn named_values_are_independent_of_the_unnamed_slot() {
        let container = Container::new();
        container
            .provide::<(), _, Arc<u8>>(|| Arc::new(1u8), ProvideOptions::new().name("special"))
            .unwrap();
        let err = container.invoke::<(Arc<u8>,), _, Arc<u8>>(|v| v, InvokeOptions::new());
        assert!(err.is_err());
    }

    #[test]
    fn name_and_group_together_is_rejected() {
        let container = Container::new();
        let err = container.provide::<(), _, Arc<u8>>(
            || Arc::new(1u8),
            ProvideOptions::new().name("n").group("g"),
        );
        assert!(err.is_err());
    }

    #[test]
    fn invocation_count_matches_distinct_resolutions() {
        let container = Container::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        container
            .provide::<(), _, Arc<u8>>(
                move || {
                    calls2.fetch_add(1, Ordering::SeqCst);
                    Arc::new(1u8)
                },
                ProvideOptions::new(),
            )
            .unwrap();
        let _ = container.invoke::<(Arc<u8>,), _, Arc<u8>>(|v| v, InvokeOptions::new());
        let _ = container.invoke::<(Arc<u8>,), _, Arc<u8>>(|v| v, InvokeOptions::new());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
