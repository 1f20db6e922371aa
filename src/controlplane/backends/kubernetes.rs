//! Kubernetes Control Plane Adapter
//!
//! Manages `AppProject` objects through the Kubernetes API server of the
//! cluster Argo CD runs in.

use crate::crd::AppProject;
use crate::domain::ports::{RemoteError, RemoteErrorCode, RemoteResult, ResourceApi};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, PostParams};
use kube::core::ErrorResponse;
use kube::Client;
use tracing::debug;

/// Namespace Argo CD is installed into by default
pub const DEFAULT_ARGOCD_NAMESPACE: &str = "argocd";

/// `ResourceApi` for projects backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeProjectApi {
    api: Api<AppProject>,
}

impl KubeProjectApi {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }

    /// Connect using the ambient kubeconfig or in-cluster configuration
    pub async fn try_default(namespace: &str) -> RemoteResult<Self> {
        let client = Client::try_default().await.map_err(map_kube_error)?;
        Ok(Self::new(client, namespace))
    }
}

impl std::fmt::Debug for KubeProjectApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeProjectApi").finish_non_exhaustive()
    }
}

#[async_trait]
impl ResourceApi<AppProject> for KubeProjectApi {
    async fn get(&self, name: &str) -> RemoteResult<AppProject> {
        self.api.get(name).await.map_err(map_kube_error)
    }

    async fn create(&self, object: AppProject, upsert: bool) -> RemoteResult<AppProject> {
        let params = PostParams::default();
        match self.api.create(&params, &object).await.map_err(map_kube_error) {
            Err(e) if upsert && e.is_already_exists() => {
                let name = object.metadata.name.clone().unwrap_or_default();
                debug!("Project {} exists, replacing", name);
                let live = self.api.get(&name).await.map_err(map_kube_error)?;
                let mut object = object;
                object.metadata.resource_version = live.metadata.resource_version;
                self.api
                    .replace(&name, &params, &object)
                    .await
                    .map_err(map_kube_error)
            }
            result => result,
        }
    }

    async fn update(&self, object: AppProject) -> RemoteResult<AppProject> {
        let name = object.metadata.name.clone().unwrap_or_default();
        self.api
            .replace(&name, &PostParams::default(), &object)
            .await
            .map_err(map_kube_error)
    }

    async fn delete(&self, name: &str) -> RemoteResult<()> {
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(map_kube_error)
    }
}

/// Classify a kube client error by its API status
pub fn map_kube_error(err: kube::Error) -> RemoteError {
    match err {
        kube::Error::Api(response) => map_error_response(response),
        other => RemoteError::other(other.to_string()),
    }
}

fn map_error_response(response: ErrorResponse) -> RemoteError {
    let code = match (response.code, response.reason.as_str()) {
        (404, _) => RemoteErrorCode::NotFound,
        (409, "AlreadyExists") => RemoteErrorCode::AlreadyExists,
        (409, _) => RemoteErrorCode::Conflict,
        _ => RemoteErrorCode::Other,
    };
    RemoteError::new(code, response.message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(code: u16, reason: &str, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: message.into(),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn test_status_codes_classified() {
        let err = map_kube_error(response(404, "NotFound", "appprojects \"p\" not found"));
        assert_eq!(err.code, RemoteErrorCode::NotFound);

        let err = map_kube_error(response(409, "AlreadyExists", "appprojects \"p\" already exists"));
        assert_eq!(err.code, RemoteErrorCode::AlreadyExists);

        let err = map_kube_error(response(
            409,
            "Conflict",
            "Operation cannot be fulfilled on appprojects \"p\": the object has been modified",
        ));
        assert_eq!(err.code, RemoteErrorCode::Conflict);
        assert!(err.is_conflict());

        let err = map_kube_error(response(403, "Forbidden", "forbidden"));
        assert_eq!(err.code, RemoteErrorCode::Other);
        assert_eq!(err.message, "forbidden");
    }
}
