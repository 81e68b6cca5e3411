use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::{MetadataError, Result};
use crate::scope::MetadataScope;

/// An application-defined metadata payload with a fixed key and scope.
///
/// ```
/// use metaver_lib::{MetadataItem, MetadataScope};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct ShopConfig {
///     currency: String,
///     max_cart_items: u32,
/// }
///
/// impl MetadataItem for ShopConfig {
///     const KEY: &'static str = "ShopConfig";
///     const SCOPE: MetadataScope = MetadataScope::App;
/// }
/// ```
pub trait MetadataItem: Serialize + DeserializeOwned {
    const KEY: &'static str;
    const SCOPE: MetadataScope;
}

type Validator = fn(&str) -> serde_json::Result<()>;

fn parses_as<T: DeserializeOwned>(json: &str) -> serde_json::Result<()> {
    serde_json::from_str::<T>(json).map(|_| ())
}

#[derive(Clone, Copy)]
struct ItemType {
    scope: MetadataScope,
    validate: Validator,
}

/// Item keys an operator may upload, with the scope each belongs to and the
/// shape its content must have.
#[derive(Clone, Default)]
pub struct ItemTypeRegistry {
    types: HashMap<String, ItemType>,
}

impl ItemTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `T::KEY`. Content uploaded for that key must
    /// deserialize into `T`.
    pub fn register<T: MetadataItem>(&mut self) -> &mut Self {
        self.insert(
            T::KEY,
            ItemType {
                scope: T::SCOPE,
                validate: parses_as::<T>,
            },
        )
    }

    /// Register a key whose content only has to be well-formed JSON.
    pub fn register_untyped(&mut self, key: &str, scope: MetadataScope) -> &mut Self {
        self.insert(
            key,
            ItemType {
                scope,
                validate: parses_as::<serde_json::Value>,
            },
        )
    }

    fn insert(&mut self, key: &str, item_type: ItemType) -> &mut Self {
        if self.types.contains_key(key) {
            warn!(key, "duplicate metadata item type registration ignored");
        } else {
            self.types.insert(key.to_string(), item_type);
        }
        self
    }

    pub fn scope_of(&self, key: &str) -> Option<MetadataScope> {
        self.types.get(key).map(|t| t.scope)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.types.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Check that `key` is registered for `scope` and that `json` has its shape.
    pub fn validate(&self, scope: MetadataScope, key: &str, json: &str) -> Result<()> {
        let item_type = self
            .types
            .get(key)
            .ok_or_else(|| MetadataError::UnregisteredItem(key.to_string()))?;
        if item_type.scope != scope {
            return Err(MetadataError::WrongItemScope {
                key: key.to_string(),
                expected: item_type.scope,
                actual: scope,
            });
        }
        (item_type.validate)(json).map_err(|source| MetadataError::InvalidItemContent {
            key: key.to_string(),
            source,
        })
    }
}
