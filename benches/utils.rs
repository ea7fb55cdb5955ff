use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Value, json};

/// Seeded so every engine renders the same profiles.
const SEED: u64 = 42;

/// Generate `n` random user profiles shared by all benchmarks.
pub fn generate_random_contexts(n: usize) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(SEED);
    (0..n).map(|_| random_profile(&mut rng)).collect()
}

fn random_profile(rng: &mut StdRng) -> Value {
    let items: Vec<Value> = (0..rng.random_range(3..10))
        .map(|_| {
            json!({
                "name": random_word(rng, 3, 8),
                "value": rng.random_range(10..1000),
                "special": rng.random_bool(0.3),
            })
        })
        .collect();
    let tags: Vec<String> = (0..rng.random_range(0..4))
        .map(|_| random_word(rng, 2, 6))
        .collect();

    json!({
        "user": {
            "name": random_word(rng, 5, 10),
            "age": rng.random_range(18..80),
            "active": rng.random_bool(0.7),
            "bio": "<script>alert('escaped')</script>",
        },
        "items": items,
        "tags": tags,
        "show_details": rng.random_bool(0.8),
        "has_access": rng.random_bool(0.6),
    })
}

/// A lowercase word of `min..=max` letters.
fn random_word(rng: &mut StdRng, min: usize, max: usize) -> String {
    (0..rng.random_range(min..=max))
        .map(|_| char::from(rng.random_range(b'a'..=b'z')))
        .collect()
}

/// Report the size of the running bench binary.
pub fn print_binary_size() {
    let binary_path = std::env::current_exe().unwrap();
    let size_bytes = std::fs::metadata(&binary_path).unwrap().len();
    let size_kb = size_bytes as f64 / 1024.0;

    println!(
        "Binary size: {:.2} MB ({:.2} KB, {} bytes)",
        size_kb / 1024.0,
        size_kb,
        size_bytes
    );
    println!("Binary path: {}", binary_path.display());
}
