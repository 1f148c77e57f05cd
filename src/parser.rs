//! Registry of configured log parsers
//!
//! The aggregation job only needs parser names, to enumerate permutations.
//! Names are opaque strings.

use crate::config::ConfigError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParserRegistry {
    names: Vec<String>,
}

impl ParserRegistry {
    /// Keeps first-seen order, drops blanks and duplicates
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::default();
        for name in names {
            let name = name.into().trim().to_string();
            if !name.is_empty() && !registry.names.contains(&name) {
                registry.names.push(name);
            }
        }
        registry
    }

    pub fn list_configured_parsers(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Registry holding only `name`, which must already be configured
    pub fn restrict(&self, name: &str) -> Result<Self, ConfigError> {
        if !self.contains(name) {
            return Err(ConfigError::UnknownParser(name.to_string()));
        }
        Ok(Self {
            names: vec![name.to_string()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_order() {
        let registry = ParserRegistry::new(["Json", "Syslog", " Json ", "", "Nginx"]);
        assert_eq!(registry.list_configured_parsers(), ["Json", "Syslog", "Nginx"]);
    }

    #[test]
    fn test_restrict() {
        let registry = ParserRegistry::new(["Json", "Syslog"]);
        assert_eq!(
            registry.restrict("Syslog").unwrap().list_configured_parsers(),
            ["Syslog"]
        );
        assert_eq!(
            registry.restrict("Apache"),
            Err(ConfigError::UnknownParser("Apache".to_string()))
        );
    }
}
