use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The two metadata partitions: content shared by every application, and
/// content specific to this application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataScope {
    Shared,
    App,
}

impl MetadataScope {
    pub const ALL: [MetadataScope; 2] = [MetadataScope::Shared, MetadataScope::App];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataScope::Shared => "shared",
            MetadataScope::App => "app",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            MetadataScope::Shared => 0,
            MetadataScope::App => 1,
        }
    }
}

impl fmt::Display for MetadataScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shared" => Ok(MetadataScope::Shared),
            "app" => Ok(MetadataScope::App),
            other => Err(format!("unknown metadata scope: {}", other)),
        }
    }
}

/// Deployment environment. Controls how JSON documents are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Test,
    Staging,
    Production,
}

impl Environment {
    /// Documents are pretty-printed everywhere except production.
    pub fn pretty_json(&self) -> bool {
        !matches!(self, Environment::Production)
    }

    /// Serialize `value` in the style this environment uses.
    pub fn to_json<T: Serialize + ?Sized>(&self, value: &T) -> serde_json::Result<String> {
        if self.pretty_json() {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "test" => Ok(Environment::Test),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_round_trips_through_str() {
        for scope in MetadataScope::ALL {
            assert_eq!(scope.as_str().parse::<MetadataScope>().unwrap(), scope);
        }
        assert!("global".parse::<MetadataScope>().is_err());
    }

    #[test]
    fn test_production_json_is_compact() {
        let value = serde_json::json!({"a": 1});
        assert_eq!(Environment::Production.to_json(&value).unwrap(), r#"{"a":1}"#);
        assert!(Environment::Local.to_json(&value).unwrap().contains('\n'));
    }
}
