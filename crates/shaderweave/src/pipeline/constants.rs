//! Named override values baked into a pipeline at compile time

/// Ordered list of specialization constants
///
/// Values are keyed by the name the shader source declares them with. Setting a name twice
/// replaces the earlier value while keeping its position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionConstants {
    values: Vec<(String, f64)>,
}

impl FunctionConstants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`FunctionConstants::set`]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<f64>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<f64>) {
        let name = name.into();
        let value = value.into();
        match self.values.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|(existing, _)| existing == name).map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<S: Into<String>, V: Into<f64>> FromIterator<(S, V)> for FunctionConstants {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        let mut constants = Self::new();
        for (name, value) in iter {
            constants.set(name, value);
        }
        constants
    }
}
