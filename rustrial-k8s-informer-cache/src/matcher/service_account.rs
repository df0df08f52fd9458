use super::{MatchContext, ResourceUpdaterMatcher};

use k8s_openapi::api::core::v1::ServiceAccount;

/// Compares `automountServiceAccountToken`, `imagePullSecrets` and `secrets`.
///
/// Absent secret lists equal empty ones. The automount flag is compared as
/// is, an absent flag defers to the pod spec and is not the same as `false`.
pub struct ServiceAccountMatcher;

fn same_list<T: PartialEq>(left: &Option<Vec<T>>, right: &Option<Vec<T>>) -> bool {
    left.as_deref().unwrap_or_default() == right.as_deref().unwrap_or_default()
}

impl ResourceUpdaterMatcher<ServiceAccount> for ServiceAccountMatcher {
    fn matches(
        &self,
        actual: &ServiceAccount,
        desired: &ServiceAccount,
        _context: &MatchContext,
    ) -> bool {
        actual.automount_service_account_token == desired.automount_service_account_token
            && same_list(&actual.image_pull_secrets, &desired.image_pull_secrets)
            && same_list(&actual.secrets, &desired.secrets)
    }

    fn update_cloned_actual(&self, actual: &mut ServiceAccount, desired: &ServiceAccount) {
        actual.automount_service_account_token = desired.automount_service_account_token;
        actual.image_pull_secrets = desired.image_pull_secrets.clone();
        actual.secrets = desired.secrets.clone();
    }
}
