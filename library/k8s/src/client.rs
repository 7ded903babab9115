use crate::errors::ApiError;
use kube::api::ObjectMeta;
use kube::core::Resource;
use kube::Api;

/// Returns a new Kubernetes client configured for the [COMPUTE_NAMESPACE](crate::COMPUTE_NAMESPACE).
///
/// This function panics if there is any error encountered while constructing the required
/// configuration object from the environment. This is because a missing Kubernetes environment
/// is extremely terminal, for which there truly is no alternative besides crashing.
pub async fn new<K>() -> Api<K>
where
    <K as Resource>::DynamicType: Default,
    K: k8s_openapi::Metadata<Ty = ObjectMeta>,
{
    new_with_namespace(crate::COMPUTE_NAMESPACE).await
}

/// Returns a new Kubernetes client configured for the given namespace.
///
/// This function panics if there is any error encountered while constructing the required
/// configuration object from the environment.
pub async fn new_with_namespace<K, N>(namespace: N) -> Api<K>
where
    <K as Resource>::DynamicType: Default,
    K: k8s_openapi::Metadata<Ty = ObjectMeta>,
    N: AsRef<str>,
{
    Api::namespaced(
        kube::Client::try_default()
            .await
            .map_err(ApiError::from)
            .unwrap(),
        namespace.as_ref(),
    )
}
