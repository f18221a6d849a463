use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dig::{Container, DecorateOptions, InvokeOptions, ProvideOptions};

#[test]
fn simple_producer_chain_resolves_end_to_end() {
    let container = Container::new();
    container.provide::<(), _, Arc<u32>>(|| Arc::new(2), ProvideOptions::new()).unwrap();
    container
        .provide::<(Arc<u32>,), _, Arc<u32>>(|n| Arc::new(*n * 3), ProvideOptions::new())
        .unwrap();
    container
        .provide::<(Arc<u32>,), _, Arc<String>>(
            |n| Arc::new(format!("value is {}", n)),
            ProvideOptions::new(),
        )
        .unwrap();

    let result = container
        .invoke::<(Arc<String>,), _, Arc<String>>(|s| s, InvokeOptions::new())
        .unwrap();
    assert_eq!(result.map(|s| (*s).clone()), Some("value is 6".to_string()));
}

#[test]
fn constructor_error_surfaces_through_invoke() {
    let container = Container::new();
    container
        .provide::<(), _, Arc<u8>>(
            || -> Result<Arc<u8>, std::io::Error> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"))
            },
            ProvideOptions::new(),
        )
        .unwrap();
    container
        .provide::<(Arc<u8>,), _, Arc<u16>>(|n| Arc::new(*n as u16), ProvideOptions::new())
        .unwrap();

    let err = container
        .invoke::<(Arc<u16>,), _, Arc<u16>>(|n| n, InvokeOptions::new())
        .expect_err("downstream consumer of a failing producer should fail too");
    assert!(err.to_string().contains("disk on fire"));
}

#[test]
fn duplicate_unnamed_value_registration_is_rejected() {
    let container = Container::new();
    container.provide::<(), _, Arc<u8>>(|| Arc::new(1), ProvideOptions::new()).unwrap();
    let err = container.provide::<(), _, Arc<u8>>(|| Arc::new(2), ProvideOptions::new());
    assert!(err.is_err(), "second unnamed producer for the same type should be rejected");
}

#[test]
fn cyclic_registration_is_rejected_and_registry_state_is_unaffected() {
    let container = Container::new();
    container
        .provide::<(Arc<u16>,), _, Arc<u32>>(|_: Arc<u16>| Arc::new(1u32), ProvideOptions::new())
        .unwrap();

    let before = container.to_string();
    let err = container
        .provide::<(Arc<u32>,), _, Arc<u16>>(|_: Arc<u32>| Arc::new(1u16), ProvideOptions::new());
    assert!(err.is_err());

    // the rejected registration must not have left a partial trace behind.
    assert_eq!(container.to_string(), before);
}

#[test]
fn subscope_sees_parent_producers_but_not_the_reverse() {
    let root = Container::new();
    root.provide::<(), _, Arc<u8>>(|| Arc::new(9), ProvideOptions::new()).unwrap();
    let child = root.subscope(Some("child".to_string()));
    child
        .provide::<(Arc<u8>,), _, Arc<u16>>(|n| Arc::new(*n as u16 + 1), ProvideOptions::new())
        .unwrap();

    let from_child =
        child.invoke::<(Arc<u16>,), _, Arc<u16>>(|n| n, InvokeOptions::new()).unwrap();
    assert_eq!(from_child.map(|n| *n), Some(10));

    let from_root = root.invoke::<(Arc<u16>,), _, Arc<u16>>(|n| n, InvokeOptions::new());
    assert!(from_root.is_err(), "a parent must not see a child's own registrations");
}

#[test]
fn producer_runs_once_even_when_requested_from_two_child_scopes() {
    let root = Container::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    root.provide::<(), _, Arc<u8>>(
        move || {
            calls2.fetch_add(1, Ordering::SeqCst);
            Arc::new(1u8)
        },
        ProvideOptions::new(),
    )
    .unwrap();

    let a = root.subscope(Some("a".to_string()));
    let b = root.subscope(Some("b".to_string()));
    let _ = a.invoke::<(Arc<u8>,), _, Arc<u8>>(|v| v, InvokeOptions::new());
    let _ = b.invoke::<(Arc<u8>,), _, Arc<u8>>(|v| v, InvokeOptions::new());

    // the producer is owned by the root scope, so both children share its
    // single cached execution.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn decorator_wraps_every_descendant_that_does_not_shadow_it() {
    let root = Container::new();
    root.provide::<(), _, Arc<u32>>(|| Arc::new(1), ProvideOptions::new()).unwrap();
    root.decorate::<u32, _>(|n: Arc<u32>| Arc::new(*n + 10), DecorateOptions::new()).unwrap();

    let child = root.subscope(Some("child".to_string()));
    let result =
        child.invoke::<(Arc<u32>,), _, Arc<u32>>(|n| n, InvokeOptions::new()).unwrap();
    assert_eq!(result.map(|n| *n), Some(11));
}
