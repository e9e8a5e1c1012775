use std::{collections::HashMap, time};

/// A `Span` times a single unit of work and can be tagged with metadata —
/// useful for identifying the root cause of a lock-acquisition timeout.
pub struct Span {
    name: &'static str,
    tags: HashMap<&'static str, String>,
    start: time::Instant,
}

impl Span {
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            tags: HashMap::new(),
            start: time::Instant::now(),
        }
    }

    pub fn tag(mut self, key: &'static str, value: impl ToString) -> Self {
        self.tags.insert(key, value.to_string());
        self
    }

    /// Finish the span and report it to `observer`.
    pub fn finish(self, observer: &dyn super::Observer) {
        let elapsed = self.start.elapsed();
        let tags: Vec<(&str, String)> = self.tags.into_iter().collect();
        observer.record(self.name, &tags, elapsed);
    }
}
