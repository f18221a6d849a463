use std::sync::Arc;

use dig::{Container, In, InvokeOptions, Out, ProvideOptions};

#[derive(Clone, Debug, In)]
struct Nums {
    #[dig(group = "nums")]
    values: Vec<Arc<u8>>,
}

#[test]
fn group_aggregation_preserves_registration_order() {
    let container = Container::new();
    for v in [1u8, 2, 3] {
        container
            .provide::<(), _, Arc<u8>>(move || Arc::new(v), ProvideOptions::new().group("nums"))
            .unwrap();
    }

    let result = container
        .invoke::<(Nums,), _, Arc<Vec<u8>>>(
            |n: Nums| Arc::new(n.values.iter().map(|v| **v).collect()),
            InvokeOptions::new(),
        )
        .unwrap();
    assert_eq!(result.map(|v| (*v).clone()), Some(vec![1, 2, 3]));
}

#[derive(Clone, Debug, Out)]
struct Pair {
    #[dig(name = "left")]
    left: Arc<u8>,
    #[dig(name = "right")]
    right: Arc<u8>,
}

#[derive(Clone, Debug, In)]
struct BothSides {
    #[dig(name = "left")]
    left: Arc<u8>,
    #[dig(name = "right")]
    right: Arc<u8>,
}

#[test]
fn aggregate_producer_contributes_multiple_named_results() {
    let container = Container::new();
    container
        .provide::<(), _, Pair>(
            || Pair { left: Arc::new(1), right: Arc::new(2) },
            ProvideOptions::new(),
        )
        .unwrap();

    let sum = container
        .invoke::<(BothSides,), _, Arc<u8>>(
            |both: BothSides| Arc::new(*both.left + *both.right),
            InvokeOptions::new(),
        )
        .unwrap();
    assert_eq!(sum.map(|v| *v), Some(3));
}
