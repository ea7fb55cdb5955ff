use std::sync::Once;

use ministache::{MinistacheEngine, MinistacheInterface, Value};
use rand::Rng;

static INIT: Once = Once::new();

/// Route engine logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_target(false)
            .init();
    });
}

pub fn get_engine() -> impl MinistacheInterface {
    init_tracing();
    MinistacheEngine::new()
}

/// Build a map value out of key/value pairs.
pub fn data<K, V, I>(entries: I) -> Value
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    entries.into_iter().collect()
}

pub fn generate_random_whitespace() -> String {
    let mut rng = rand::rng();
    let length = rng.random_range(0..10);
    (0..length).map(|_| ' ').collect()
}

pub fn generate_random_indent() -> String {
    let mut rng = rand::rng();
    let length = rng.random_range(1..10);
    (0..length)
        .map(|_| if rng.random_bool(0.5) { ' ' } else { '\t' })
        .collect()
}
