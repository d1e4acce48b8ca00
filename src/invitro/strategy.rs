//! Ordered fallback strategies for extracting a single field.
//!
//! Each strategy is an independent function that either finds a value or
//! returns `None`. [`first_present`] runs them in order and keeps the first
//! non-empty result after whitespace normalization.

use tracing::trace;

/// A named way of finding one field in some input.
pub struct Strategy<T: ?Sized> {
    pub name: &'static str,
    pub run: fn(&T) -> Option<String>,
}

impl<T: ?Sized> Strategy<T> {
    pub const fn new(name: &'static str, run: fn(&T) -> Option<String>) -> Self {
        Self { name, run }
    }
}

impl<T: ?Sized> Clone for Strategy<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Strategy<T> {}

/// Runs `strategies` in order and returns the first non-empty normalized value,
/// or an empty string when none of them finds anything.
pub fn first_present<T: ?Sized>(field: &str, input: &T, strategies: &[Strategy<T>]) -> String {
    for strategy in strategies {
        if let Some(value) = (strategy.run)(input) {
            let value = normalize(&value);
            if !value.is_empty() {
                trace!("{}: matched by {}", field, strategy.name);
                return value;
            }
        }
    }
    trace!("{}: no strategy matched", field);
    String::new()
}

/// Collapses every whitespace run (including non-breaking spaces) into a
/// single space and trims both ends.
pub fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always_none(_: &str) -> Option<String> {
        None
    }

    fn blank(_: &str) -> Option<String> {
        Some(" \u{a0}\t".to_string())
    }

    fn echo(input: &str) -> Option<String> {
        Some(input.to_string())
    }

    fn constant(_: &str) -> Option<String> {
        Some("fallback".to_string())
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("  a \u{a0}\u{a0} b\n\tc  "), "a b c");
        assert_eq!(normalize("1\u{a0}290\u{a0}₽"), "1 290 ₽");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" \u{a0} "), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for s in ["", "x", "  a  b  ", "\u{a0}к\u{2009}д\r\n", "tab\tsep\u{a0}\u{a0}end "] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn test_first_present_takes_primary_when_present() {
        let chain = [Strategy::new("echo", echo), Strategy::new("constant", constant)];
        assert_eq!(first_present("field", "  primary  value ", &chain), "primary value");
    }

    #[test]
    fn test_first_present_skips_missing_and_blank() {
        let chain = [
            Strategy::new("none", always_none),
            Strategy::new("blank", blank),
            Strategy::new("constant", constant),
        ];
        assert_eq!(first_present("field", "ignored", &chain), "fallback");
    }

    #[test]
    fn test_first_present_empty_when_nothing_matches() {
        let chain = [Strategy::new("none", always_none), Strategy::new("blank", blank)];
        assert_eq!(first_present("field", "x", &chain), "");
        assert_eq!(first_present::<str>("field", "x", &[]), "");
    }
}
