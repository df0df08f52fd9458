use super::{MatchContext, ResourceUpdaterMatcher};

use kube::api::DynamicObject;
use serde_json::Value;
use std::collections::BTreeMap;

/// Top-level fields which are owned by the server.
const SERVER_FIELDS: [&'static str; 1] = ["status"];

/// Matcher for kinds without dedicated matcher.
///
/// Every top-level field of the desired object (other than `metadata` and
/// `status`) is controlled by it: objects in `desired` must be contained in
/// `actual`, arrays of the same length are compared element by element and
/// scalars must be equal. Updates merge the same way and replace everything
/// else, so fields defaulted by the server survive.
///
/// Labels and annotations are only compared if
/// [`MatchContext::consider_metadata`] is set, but updates always merge the
/// desired ones into the actual resource. A resource which matches without
/// considering metadata may therefore still yield a non-empty
/// [`update_patch`](super::update_patch), so check [`matches`] first.
///
/// [`matches`]: ResourceUpdaterMatcher::matches
pub struct GenericMatcher;

/// Whether everything present in `desired` is also present in `actual`.
fn contains(actual: &Value, desired: &Value) -> bool {
    match (actual, desired) {
        (Value::Object(actual), Value::Object(desired)) => desired.iter().all(|(key, value)| {
            actual
                .get(key)
                .map(|actual| contains(actual, value))
                .unwrap_or_else(|| value.is_null())
        }),
        // Elements may carry server defaulted fields, e.g. containers.
        (Value::Array(actual), Value::Array(desired)) => {
            actual.len() == desired.len()
                && actual.iter().zip(desired).all(|(a, d)| contains(a, d))
        }
        (actual, desired) => actual == desired,
    }
}

/// Merge `desired` into `actual`, objects recursively, everything else replaced.
fn merge(actual: &mut Value, desired: &Value) {
    match (actual, desired) {
        (Value::Object(actual), Value::Object(desired)) => {
            for (key, value) in desired {
                match actual.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        actual.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(actual), Value::Array(desired)) if actual.len() == desired.len() => {
            for (a, d) in actual.iter_mut().zip(desired) {
                merge(a, d);
            }
        }
        (actual, desired) => *actual = desired.clone(),
    }
}

fn contains_entries(
    actual: &Option<BTreeMap<String, String>>,
    desired: &Option<BTreeMap<String, String>>,
) -> bool {
    let actual = actual.as_ref();
    desired
        .iter()
        .flatten()
        .all(|(key, value)| actual.and_then(|a| a.get(key)) == Some(value))
}

fn merge_entries(
    actual: &mut Option<BTreeMap<String, String>>,
    desired: &Option<BTreeMap<String, String>>,
) {
    if let Some(desired) = desired.as_ref().filter(|d| !d.is_empty()) {
        actual
            .get_or_insert_with(Default::default)
            .extend(desired.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

fn controlled_fields(object: &DynamicObject) -> impl Iterator<Item = (&String, &Value)> {
    object
        .data
        .as_object()
        .into_iter()
        .flatten()
        .filter(|(key, _)| !SERVER_FIELDS.contains(&key.as_str()))
}

impl ResourceUpdaterMatcher<DynamicObject> for GenericMatcher {
    fn matches(&self, actual: &DynamicObject, desired: &DynamicObject, context: &MatchContext) -> bool {
        let fields_match = controlled_fields(desired).all(|(key, value)| {
            actual
                .data
                .get(key)
                .map(|actual| contains(actual, value))
                .unwrap_or_else(|| value.is_null())
        });
        fields_match
            && (!context.consider_metadata
                || (contains_entries(&actual.metadata.labels, &desired.metadata.labels)
                    && contains_entries(
                        &actual.metadata.annotations,
                        &desired.metadata.annotations,
                    )))
    }

    fn update_cloned_actual(&self, actual: &mut DynamicObject, desired: &DynamicObject) {
        if !actual.data.is_object() {
            actual.data = Value::Object(Default::default());
        }
        if let Some(data) = actual.data.as_object_mut() {
            for (key, value) in controlled_fields(desired) {
                match data.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        data.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        merge_entries(&mut actual.metadata.labels, &desired.metadata.labels);
        merge_entries(&mut actual.metadata.annotations, &desired.metadata.annotations);
    }
}
