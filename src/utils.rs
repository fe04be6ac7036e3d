use std::collections::BTreeMap;

use kube::api::ResourceExt;
use serde_json::{json, Value};
use uuid::Uuid;

/// Kubernetes object names are limited to 63 characters.
pub const MAX_NAME_LEN: usize = 63;

/// Mint a fresh deploy identifier.
pub fn new_deploy_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generate a name which is no greater than 63 chars in length
/// always keeping the `prefix` and as much of `suffix` as possible, favoring its ending.
pub fn object_name(prefix: &str, suffix: &str) -> String {
    let keep = MAX_NAME_LEN.saturating_sub(prefix.len());
    let suffix = suffix
        .chars()
        .rev()
        .take(keep)
        .collect::<Vec<char>>()
        .iter()
        .rev()
        .collect::<String>();
    format!("{}{}", prefix, suffix)
}

/// Render an environment map as the list of `{name, value}` objects a container expects.
pub fn env_vars(env: &BTreeMap<String, String>) -> Vec<Value> {
    env.iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect()
}

pub fn annotation<'a, K: ResourceExt>(resource: &'a K, key: &str) -> Option<&'a str> {
    resource.annotations().get(key).map(|v| v.as_str())
}

pub fn plural_str(length: usize, word: &str) -> String {
    if length == 1 {
        word.trim_end_matches('s').to_string()
    } else {
        word.to_string()
    }
}
