//! kube-rs implementation of the store traits

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::config::{InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube::{Client, Config, Resource, ResourceExt};
use serde::Serialize;
use thiserror::Error;

use super::{IdentityStore, ObjectStore, PolicyStore, StoreError};
use crate::crd::{
    Bucket, BucketAccess, BucketAccessClass, BucketAccessRequest, BucketClaim, BucketClass,
};

/// Default connection timeout for API server clients
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read timeout for API server clients
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure building a kube client
#[derive(Debug, Error)]
pub enum ClientError {
    /// The kubeconfig file could not be read or loaded
    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] KubeconfigError),

    /// Neither in-cluster nor local configuration was found
    #[error("failed to infer config: {0}")]
    Infer(#[from] InferConfigError),

    /// The client could not be constructed from the config
    #[error("failed to create client: {0}")]
    Client(#[from] kube::Error),
}

/// Create a kube client from an optional kubeconfig path
///
/// Without a path the config is inferred (in-cluster service account first,
/// then the local kubeconfig).
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, ClientError> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => Config::infer().await?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Ok(Client::try_from(config)?)
}

/// Store backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a new KubeStore wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn cluster<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::ClusterResourceScope, DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Namespace of an object that must be namespaced
fn namespace_of<K: Resource>(kind: &'static str, obj: &K) -> Result<String, StoreError> {
    obj.namespace().ok_or_else(|| StoreError::NotFound {
        kind,
        name: format!("{} (no namespace)", obj.name_any()),
    })
}

/// Replace an object, carrying its resourceVersion
async fn replace<K>(api: &Api<K>, kind: &'static str, key: String, obj: &K) -> Result<K, StoreError>
where
    K: Resource + Clone + serde::de::DeserializeOwned + Serialize + std::fmt::Debug,
{
    api.replace(&obj.name_any(), &PostParams::default(), obj)
        .await
        .map_err(|e| StoreError::from_kube(kind, key, e))
}

/// Write the status subresource guarded by the object's resourceVersion
///
/// A merge patch that names `metadata.resourceVersion` is rejected with 409
/// when the stored object has moved on, giving the same optimistic semantics
/// as a full replace.
async fn replace_status<K, S>(
    api: &Api<K>,
    kind: &'static str,
    key: String,
    obj: &K,
    status: &Option<S>,
) -> Result<K, StoreError>
where
    K: Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    S: Serialize,
{
    let patch = serde_json::json!({
        "metadata": { "resourceVersion": obj.resource_version() },
        "status": status,
    });
    api.patch_status(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| StoreError::from_kube(kind, key, e))
}

async fn delete<K>(api: &Api<K>, kind: &'static str, name: &str) -> Result<(), StoreError>
where
    K: Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    api.delete(name, &DeleteParams::default())
        .await
        .map(|_| ())
        .map_err(|e| StoreError::from_kube(kind, name, e))
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_bucket_class(&self, name: &str) -> Result<BucketClass, StoreError> {
        self.cluster::<BucketClass>()
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("BucketClass", name, e))
    }

    async fn get_bucket_access_class(&self, name: &str) -> Result<BucketAccessClass, StoreError> {
        self.cluster::<BucketAccessClass>()
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("BucketAccessClass", name, e))
    }

    async fn get_bucket_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BucketClaim, StoreError> {
        self.namespaced::<BucketClaim>(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("BucketClaim", key(namespace, name), e))
    }

    async fn update_bucket_claim(&self, claim: &BucketClaim) -> Result<BucketClaim, StoreError> {
        let namespace = namespace_of("BucketClaim", claim)?;
        let api = self.namespaced::<BucketClaim>(&namespace);
        replace(&api, "BucketClaim", key(&namespace, &claim.name_any()), claim).await
    }

    async fn update_bucket_claim_status(
        &self,
        claim: &BucketClaim,
    ) -> Result<BucketClaim, StoreError> {
        let namespace = namespace_of("BucketClaim", claim)?;
        let api = self.namespaced::<BucketClaim>(&namespace);
        let key = key(&namespace, &claim.name_any());
        replace_status(&api, "BucketClaim", key, claim, &claim.status).await
    }

    async fn get_bucket(&self, name: &str) -> Result<Bucket, StoreError> {
        self.cluster::<Bucket>()
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("Bucket", name, e))
    }

    async fn create_bucket(&self, bucket: &Bucket) -> Result<Bucket, StoreError> {
        self.cluster::<Bucket>()
            .create(&PostParams::default(), bucket)
            .await
            .map_err(|e| StoreError::from_kube("Bucket", bucket.name_any(), e))
    }

    async fn update_bucket(&self, bucket: &Bucket) -> Result<Bucket, StoreError> {
        replace(&self.cluster::<Bucket>(), "Bucket", bucket.name_any(), bucket).await
    }

    async fn delete_bucket(&self, name: &str) -> Result<(), StoreError> {
        delete(&self.cluster::<Bucket>(), "Bucket", name).await
    }

    async fn get_bucket_access_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BucketAccessRequest, StoreError> {
        self.namespaced::<BucketAccessRequest>(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("BucketAccessRequest", key(namespace, name), e))
    }

    async fn update_bucket_access_request(
        &self,
        request: &BucketAccessRequest,
    ) -> Result<BucketAccessRequest, StoreError> {
        let namespace = namespace_of("BucketAccessRequest", request)?;
        let api = self.namespaced::<BucketAccessRequest>(&namespace);
        let key = key(&namespace, &request.name_any());
        replace(&api, "BucketAccessRequest", key, request).await
    }

    async fn update_bucket_access_request_status(
        &self,
        request: &BucketAccessRequest,
    ) -> Result<BucketAccessRequest, StoreError> {
        let namespace = namespace_of("BucketAccessRequest", request)?;
        let api = self.namespaced::<BucketAccessRequest>(&namespace);
        let key = key(&namespace, &request.name_any());
        replace_status(&api, "BucketAccessRequest", key, request, &request.status).await
    }

    async fn get_bucket_access(&self, name: &str) -> Result<BucketAccess, StoreError> {
        self.cluster::<BucketAccess>()
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("BucketAccess", name, e))
    }

    async fn create_bucket_access(
        &self,
        access: &BucketAccess,
    ) -> Result<BucketAccess, StoreError> {
        self.cluster::<BucketAccess>()
            .create(&PostParams::default(), access)
            .await
            .map_err(|e| StoreError::from_kube("BucketAccess", access.name_any(), e))
    }

    async fn delete_bucket_access(&self, name: &str) -> Result<(), StoreError> {
        delete(&self.cluster::<BucketAccess>(), "BucketAccess", name).await
    }
}

#[async_trait]
impl IdentityStore for KubeStore {
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ServiceAccount, StoreError> {
        self.namespaced::<ServiceAccount>(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("ServiceAccount", key(namespace, name), e))
    }
}

#[async_trait]
impl PolicyStore for KubeStore {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, StoreError> {
        self.namespaced::<ConfigMap>(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("ConfigMap", key(namespace, name), e))
    }
}
