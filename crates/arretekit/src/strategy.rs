//! Ordered fallback chains
//!
//! Each strategy is a plain function from an input to an optional value.
//! A [`Chain`] runs them in registration order and stops at the first
//! value that passes the chain's acceptance check, so each fallback can be
//! tested on its own and the order is visible in one place.

/// A named extraction step
pub struct Strategy<I: ?Sized, T> {
    name: &'static str,
    run: fn(&I) -> Option<T>,
}

impl<I: ?Sized, T> Strategy<I, T> {
    /// Strategy name (for logging/debugging)
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run this strategy alone
    pub fn apply(&self, input: &I) -> Option<T> {
        (self.run)(input)
    }
}

/// Value produced by a chain, tagged with the strategy that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit<T> {
    pub value: T,
    pub strategy: &'static str,
}

/// Ordered list of strategies with an optional acceptance predicate
pub struct Chain<I: ?Sized, T> {
    strategies: Vec<Strategy<I, T>>,
    accept: Option<fn(&T) -> bool>,
}

impl<I: ?Sized, T> Default for Chain<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: ?Sized, T> Chain<I, T> {
    /// Create an empty chain
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
            accept: None,
        }
    }

    /// Append a strategy; earlier strategies win
    pub fn then(mut self, name: &'static str, run: fn(&I) -> Option<T>) -> Self {
        self.strategies.push(Strategy { name, run });
        self
    }

    /// Reject values for which `accept` returns false and keep looking
    pub fn accept(mut self, accept: fn(&T) -> bool) -> Self {
        self.accept = Some(accept);
        self
    }

    /// Names of the registered strategies, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name).collect()
    }

    /// Run the chain and return the first accepted value
    pub fn first(&self, input: &I) -> Option<Hit<T>> {
        for strategy in &self.strategies {
            let Some(value) = strategy.apply(input) else {
                continue;
            };
            if let Some(accept) = self.accept {
                if !accept(&value) {
                    tracing::trace!(strategy = strategy.name, "value rejected");
                    continue;
                }
            }
            return Some(Hit {
                value,
                strategy: strategy.name,
            });
        }
        None
    }

    /// Run the chain and drop the strategy tag
    pub fn value(&self, input: &I) -> Option<T> {
        self.first(input).map(|hit| hit.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn never(_: &str) -> Option<String> {
        None
    }

    fn upper(input: &str) -> Option<String> {
        Some(input.to_uppercase())
    }

    fn first_word(input: &str) -> Option<String> {
        input.split_whitespace().next().map(str::to_string)
    }

    #[test]
    fn test_first_match_wins() {
        let chain: Chain<str, String> = Chain::new()
            .then("never", never)
            .then("first_word", first_word)
            .then("upper", upper);

        let hit = chain.first("hello world").unwrap();
        assert_eq!(hit.value, "hello");
        assert_eq!(hit.strategy, "first_word");
        assert_eq!(chain.names(), vec!["never", "first_word", "upper"]);
    }

    #[test]
    fn test_rejected_values_fall_through() {
        let chain: Chain<str, String> = Chain::new()
            .then("first_word", first_word)
            .then("upper", upper)
            .accept(|v| v.len() > 5);

        let hit = chain.first("hello world").unwrap();
        assert_eq!(hit.strategy, "upper");
        assert_eq!(hit.value, "HELLO WORLD");
    }

    #[test]
    fn test_empty_chain() {
        let chain: Chain<str, String> = Chain::new();
        assert!(chain.first("anything").is_none());
        assert!(chain.value("anything").is_none());
    }
}
