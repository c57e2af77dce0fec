use std::collections::HashMap;

use crate::compiler::ast::Spec;

/// The labeling function for a single event: a map from variable name to its
/// textual value for this step (`"42"`, `"true"`, `"ClientHello"`, ...).
///
/// Reconstructed fresh for every event line the driver reads. Seeded at
/// construction with every enum constant's self-binding (`ClientHello` maps
/// to itself) so a formula can compare a variable against a bare constant
/// name without the adapter having to repeat it.
#[derive(Debug, Clone, Default)]
pub struct State {
    labels: HashMap<String, String>,
}

impl State {
    /// Builds an empty state pre-seeded with `spec`'s enum constants.
    pub fn new(spec: &Spec) -> Self {
        let mut labels = HashMap::new();
        for e in &spec.enums {
            for variant in &e.variants {
                labels.insert(variant.clone(), variant.clone());
            }
        }
        State { labels }
    }

    /// Adds or overwrites a label. The reference implementation asserts on a
    /// duplicate write within the same event; this is relaxed to an
    /// overwrite since `add_label` is called once per `key=value` token the
    /// driver parses off a single event line, and well-formed adapters never
    /// emit the same key twice on one line.
    pub fn add_label(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.labels.insert(name.into(), value.into());
    }

    pub fn get_label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    /// A state is sane if every declared variable has a binding. Enum
    /// constants are pre-seeded, so only the spec's `var`-declared names
    /// need checking by the caller; this just reports whether `name` is
    /// bound.
    pub fn is_sane(&self, name: &str) -> bool {
        self.labels.contains_key(name)
    }

    pub fn clear(&mut self) {
        // Enum constants are reseeded by the caller via `State::new`;
        // `clear` drops everything, including those self-bindings, so a
        // cleared state must be rebuilt from the spec, not reused bare.
        self.labels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::Parser;

    #[test]
    fn enum_constants_self_bind() {
        let spec = Parser::parse("enum M { A, B };\nM m;\nf: m == A;").unwrap();
        let state = State::new(&spec);
        assert_eq!(state.get_label("A"), Some("A"));
        assert_eq!(state.get_label("B"), Some("B"));
    }

    #[test]
    fn add_label_overwrites() {
        let spec = Spec::default();
        let mut state = State::new(&spec);
        state.add_label("seq", "1");
        state.add_label("seq", "2");
        assert_eq!(state.get_label("seq"), Some("2"));
    }

    #[test]
    fn unbound_name_is_not_sane() {
        let spec = Spec::default();
        let state = State::new(&spec);
        assert!(!state.is_sane("seq"));
    }
}
