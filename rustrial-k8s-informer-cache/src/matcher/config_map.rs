use super::{MatchContext, ResourceUpdaterMatcher};

use k8s_openapi::api::core::v1::ConfigMap;

/// Compares `data`, `binaryData` and `immutable`.
///
/// Absent `data` and `binaryData` equal an empty map, an absent `immutable`
/// flag equals `false`, as the API server does not distinguish them either.
pub struct ConfigMapMatcher;

impl ResourceUpdaterMatcher<ConfigMap> for ConfigMapMatcher {
    fn matches(&self, actual: &ConfigMap, desired: &ConfigMap, _context: &MatchContext) -> bool {
        actual.immutable.unwrap_or(false) == desired.immutable.unwrap_or(false)
            && actual.data.clone().unwrap_or_default() == desired.data.clone().unwrap_or_default()
            && actual.binary_data.clone().unwrap_or_default()
                == desired.binary_data.clone().unwrap_or_default()
    }

    fn update_cloned_actual(&self, actual: &mut ConfigMap, desired: &ConfigMap) {
        actual.data = desired.data.clone();
        actual.binary_data = desired.binary_data.clone();
        actual.immutable = desired.immutable;
    }
}
