//! Shared controller helpers.
//!
//! Finalizer handling and credential lookup used by the reconciler.

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Resource, ResourceExt, api::PatchParams};
use serde::de::DeserializeOwned;

use crate::controller::error::Error;
use crate::crd::CredentialsSecretRef;

/// Add a finalizer to a resource.
pub async fn add_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let resource = api.get(name).await?;
    let mut finalizers = resource.finalizers().to_vec();
    if finalizers.iter().any(|f| f == finalizer) {
        return Ok(());
    }
    finalizers.push(finalizer.to_string());

    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    api.patch(
        name,
        &PatchParams::default(),
        &kube::api::Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Remove a specific finalizer from a resource.
pub async fn remove_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let resource = match api.get(name).await {
        Ok(r) => r,
        // Already gone
        Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let finalizers: Vec<String> = resource
        .finalizers()
        .iter()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect();
    if finalizers.len() == resource.finalizers().len() {
        return Ok(());
    }

    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    api.patch(
        name,
        &PatchParams::default(),
        &kube::api::Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Manager login read from a Secret.
#[derive(Clone)]
pub struct ManagerCredentials {
    pub username: String,
    pub password: String,
}

/// Read the manager username and password from the referenced Secret.
pub async fn read_manager_credentials(
    api: &Api<Secret>,
    secret_ref: &CredentialsSecretRef,
) -> Result<ManagerCredentials, Error> {
    let secret = match api.get(&secret_ref.name).await {
        Ok(secret) => secret,
        Err(kube::Error::Api(e)) if e.code == 404 => {
            return Err(Error::Transient(format!(
                "credentials secret '{}' not found",
                secret_ref.name
            )));
        }
        Err(e) => return Err(Error::Kube(e)),
    };
    Ok(ManagerCredentials {
        username: secret_value(&secret, &secret_ref.username_key)?,
        password: secret_value(&secret, &secret_ref.password_key)?,
    })
}

/// Decode one key of a Secret.
pub fn secret_value(secret: &Secret, key: &str) -> Result<String, Error> {
    let name = secret.name_any();
    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .ok_or_else(|| Error::Validation(format!("secret '{}' has no key '{}'", name, key)))?;
    String::from_utf8(bytes.0.clone()).map_err(|e| {
        Error::Validation(format!(
            "secret '{}' key '{}' is not valid UTF-8: {}",
            name, key, e
        ))
    })
}
