//! Operation identifier generation (spec.md §4.7).

use std::collections::HashSet;

use uuid::Uuid;

/// Produces operation ids for the client to attach to outgoing `subscribe`
/// messages.
///
/// The default implementation below yields 128 bits of entropy per id, as
/// spec.md requires. A caller-supplied generator is accepted by
/// [`crate::client::ClientConfig`]; whatever it returns is still checked
/// against currently active ids by [`generate_unique`], so a weak or
/// low-entropy custom generator degrades gracefully rather than silently
/// colliding.
pub trait IdGenerator: Send + Sync {
    /// Returns a new, not-necessarily-unique candidate id.
    fn generate(&self) -> String;
}

/// Generates RFC-4122 v4 UUIDs rendered as hyphenated strings.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn generate(&self) -> String {
        self()
    }
}

/// Invokes `generator` until it produces an id not already present in
/// `active`, regenerating on collision as spec.md §4.7 requires.
pub fn generate_unique(generator: &dyn IdGenerator, active: &HashSet<String>) -> String {
    loop {
        let candidate = generator.generate();
        if !active.contains(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn regenerates_on_collision() {
        let calls = std::cell::Cell::new(0);
        let generator = move || {
            let n = calls.get();
            calls.set(n + 1);
            if n == 0 { "dup".to_string() } else { "fresh".to_string() }
        };
        let mut active = HashSet::new();
        active.insert("dup".to_string());
        assert_eq!(generate_unique(&generator, &active), "fresh");
    }

    #[test]
    fn uuid_generator_is_unique_with_overwhelming_probability() {
        let gen = UuidGenerator;
        let a = gen.generate();
        let b = gen.generate();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
