//! External resource provisioning
//!
//! Creates the provider-owned objects a control plane machine needs: a clone of
//! the infrastructure machine template and a bootstrap config. Both are
//! arbitrary provider kinds, so they are handled as [`DynamicObject`]s with the
//! API resource resolved through discovery.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DynamicObject, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use rand::Rng;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::crd::{
    BootstrapConfigSpec, CLONED_FROM_GROUPKIND_ANNOTATION, CLONED_FROM_NAME_ANNOTATION,
    CLUSTER_NAME_LABEL,
};
use crate::error::is_status;
use crate::Error;

/// Characters used for generated name suffixes (no vowels, no confusable digits)
const NAME_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

/// Length of generated name suffixes
const NAME_SUFFIX_LEN: usize = 5;

/// Maximum length of a Kubernetes object name
const MAX_NAME_LEN: usize = 63;

/// A request to clone an infrastructure template into a concrete object
#[derive(Clone, Debug, PartialEq)]
pub struct CloneRequest {
    /// The template to clone (e.g. a DockerMachineTemplate)
    pub template: ObjectReference,
    /// Namespace to create the clone in
    pub namespace: String,
    /// Name of the clone
    pub name: String,
    /// Owner of the clone
    pub owner: OwnerReference,
    /// Cluster the clone belongs to, written as a label
    pub cluster_name: String,
}

/// A request to create a bootstrap config object
#[derive(Clone, Debug, PartialEq)]
pub struct BootstrapRequest {
    /// Kind and spec of the config
    pub config: BootstrapConfigSpec,
    /// Namespace to create the config in
    pub namespace: String,
    /// Name of the config
    pub name: String,
    /// Owner of the config
    pub owner: OwnerReference,
    /// Cluster the config belongs to, written as a label
    pub cluster_name: String,
}

/// Trait abstracting creation of provider-owned resources
///
/// Neither create call is idempotent by itself; the caller bounds duplicate
/// creation by making at most one attempt per reconcile.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExternalResources: Send + Sync {
    /// Clone an infrastructure template, returning a reference to the new object
    async fn clone_template(&self, request: &CloneRequest) -> Result<ObjectReference, Error>;

    /// Create a bootstrap config, returning a reference to the new object
    async fn create_bootstrap_config(
        &self,
        request: &BootstrapRequest,
    ) -> Result<ObjectReference, Error>;

    /// Add `owner` to the owner references of `target` if it is not there yet
    ///
    /// Returns `Ok(false)` if `target` does not exist.
    async fn ensure_owner_reference(
        &self,
        target: &ObjectReference,
        namespace: &str,
        owner: &OwnerReference,
    ) -> Result<bool, Error>;
}

/// Real implementation backed by the Kubernetes API
pub struct ExternalResourcesImpl {
    client: Client,
}

impl ExternalResourcesImpl {
    /// Create a new ExternalResourcesImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Resolve the ApiResource for an apiVersion/kind pair
    ///
    /// Asks the API server first. If discovery doesn't know the kind (the
    /// provider's CRD was only just installed), falls back to pluralization.
    async fn api_resource(&self, api_version: &str, kind: &str) -> ApiResource {
        let (group, version) = parse_api_version(api_version);
        let gvk = GroupVersionKind::gvk(group, version, kind);

        match kube::discovery::pinned_kind(&self.client, &gvk).await {
            Ok((ar, _caps)) => ar,
            Err(e) => {
                debug!(
                    api_version = %api_version,
                    kind = %kind,
                    error = %e,
                    "kind not found in discovery, using fallback pluralization"
                );
                ApiResource {
                    group: group.to_string(),
                    version: version.to_string(),
                    api_version: api_version.to_string(),
                    kind: kind.to_string(),
                    plural: pluralize_kind(kind),
                }
            }
        }
    }

    async fn dynamic_api(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
    ) -> Api<DynamicObject> {
        let ar = self.api_resource(api_version, kind).await;
        Api::namespaced_with(self.client.clone(), namespace, &ar)
    }
}

#[async_trait]
impl ExternalResources for ExternalResourcesImpl {
    async fn clone_template(&self, request: &CloneRequest) -> Result<ObjectReference, Error> {
        let (api_version, kind, template_name) = reference_parts(&request.template)?;
        let template_api = self
            .dynamic_api(api_version, kind, &request.namespace)
            .await;
        let template = template_api.get(template_name).await?;

        let clone_kind = kind.strip_suffix("Template").ok_or_else(|| {
            Error::validation_for_field(
                template_name,
                "spec.machineTemplate.kind",
                format!("{} is not a template kind", kind),
            )
        })?;

        let obj = build_clone(&template, request, api_version, clone_kind)?;
        let clone_api = self
            .dynamic_api(api_version, clone_kind, &request.namespace)
            .await;
        let created = clone_api.create(&PostParams::default(), &obj).await?;

        info!(
            kind = %clone_kind,
            name = %request.name,
            template = %template_name,
            "cloned infrastructure template"
        );

        Ok(object_reference(api_version, clone_kind, &created))
    }

    async fn create_bootstrap_config(
        &self,
        request: &BootstrapRequest,
    ) -> Result<ObjectReference, Error> {
        let config = &request.config;
        let labels = BTreeMap::from([(
            CLUSTER_NAME_LABEL.to_string(),
            request.cluster_name.clone(),
        )]);
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": config.api_version,
            "kind": config.kind,
            "metadata": {
                "name": request.name,
                "namespace": request.namespace,
                "labels": labels,
                "ownerReferences": [request.owner],
            },
            "spec": config.spec,
        }))
        .map_err(|e| Error::serialization_for_kind(&config.kind, e.to_string()))?;

        let api = self
            .dynamic_api(&config.api_version, &config.kind, &request.namespace)
            .await;
        let created = api.create(&PostParams::default(), &obj).await?;

        info!(kind = %config.kind, name = %request.name, "created bootstrap config");

        Ok(object_reference(&config.api_version, &config.kind, &created))
    }

    async fn ensure_owner_reference(
        &self,
        target: &ObjectReference,
        namespace: &str,
        owner: &OwnerReference,
    ) -> Result<bool, Error> {
        let (api_version, kind, name) = reference_parts(target)?;
        let api = self.dynamic_api(api_version, kind, namespace).await;

        let mut obj = match api.get(name).await {
            Ok(obj) => obj,
            Err(e) if is_status(&e, 404) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let refs = obj.metadata.owner_references.get_or_insert_with(Vec::new);
        if !ensure_owner_ref(refs, owner) {
            return Ok(true);
        }

        // replace() sends the resourceVersion we read, so a concurrent writer
        // makes this fail with 409 instead of being overwritten
        match api.replace(name, &PostParams::default(), &obj).await {
            Ok(_) => {
                debug!(kind = %kind, name = %name, owner = %owner.name, "added owner reference");
                Ok(true)
            }
            Err(e) if is_status(&e, 409) => Err(Error::conflict(kind, name)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Build the object cloned from an infrastructure template
///
/// Copies `spec.template.spec` and `spec.template.metadata` from the template,
/// then stamps the cluster label, the cloned-from annotations and the owner.
fn build_clone(
    template: &DynamicObject,
    request: &CloneRequest,
    api_version: &str,
    clone_kind: &str,
) -> Result<DynamicObject, Error> {
    let template_body = template.data.get("spec").and_then(|s| s.get("template"));
    let spec = template_body
        .and_then(|t| t.get("spec"))
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    let mut labels: BTreeMap<String, String> = template_body
        .and_then(|t| t.pointer("/metadata/labels"))
        .and_then(|l| serde_json::from_value(l.clone()).ok())
        .unwrap_or_default();
    labels.insert(CLUSTER_NAME_LABEL.to_string(), request.cluster_name.clone());

    let mut annotations: BTreeMap<String, String> = template_body
        .and_then(|t| t.pointer("/metadata/annotations"))
        .and_then(|a| serde_json::from_value(a.clone()).ok())
        .unwrap_or_default();
    let (group, _) = parse_api_version(api_version);
    annotations.insert(
        CLONED_FROM_NAME_ANNOTATION.to_string(),
        template.name_any(),
    );
    annotations.insert(
        CLONED_FROM_GROUPKIND_ANNOTATION.to_string(),
        format!("{}Template.{}", clone_kind, group),
    );

    serde_json::from_value(serde_json::json!({
        "apiVersion": api_version,
        "kind": clone_kind,
        "metadata": {
            "name": request.name,
            "namespace": request.namespace,
            "labels": labels,
            "annotations": annotations,
            "ownerReferences": [request.owner],
        },
        "spec": spec,
    }))
    .map_err(|e| Error::serialization_for_kind(clone_kind, e.to_string()))
}

fn object_reference(api_version: &str, kind: &str, obj: &DynamicObject) -> ObjectReference {
    ObjectReference {
        api_version: Some(api_version.to_string()),
        kind: Some(kind.to_string()),
        name: Some(obj.name_any()),
        namespace: obj.namespace(),
        uid: obj.uid(),
        ..Default::default()
    }
}

/// Extract apiVersion, kind and name from a reference, all of which are required
fn reference_parts(reference: &ObjectReference) -> Result<(&str, &str, &str), Error> {
    match (
        reference.api_version.as_deref(),
        reference.kind.as_deref(),
        reference.name.as_deref(),
    ) {
        (Some(api_version), Some(kind), Some(name))
            if !api_version.is_empty() && !kind.is_empty() && !name.is_empty() =>
        {
            Ok((api_version, kind, name))
        }
        _ => Err(Error::validation(format!(
            "object reference must set apiVersion, kind and name: {:?}",
            reference
        ))),
    }
}

/// Insert or refresh `owner` in a list of owner references
///
/// References are matched by API group, kind and name, so a recreated owner
/// (same name, new UID) replaces the stale entry. Returns whether the list
/// changed.
pub fn ensure_owner_ref(refs: &mut Vec<OwnerReference>, owner: &OwnerReference) -> bool {
    let (owner_group, _) = parse_api_version(&owner.api_version);
    let existing = refs.iter_mut().find(|r| {
        r.kind == owner.kind
            && r.name == owner.name
            && parse_api_version(&r.api_version).0 == owner_group
    });

    match existing {
        Some(r) if r == owner => false,
        Some(r) => {
            *r = owner.clone();
            true
        }
        None => {
            refs.push(owner.clone());
            true
        }
    }
}

/// Generate `<prefix><5 random chars>`, the way the API server handles `generateName`
///
/// The prefix is truncated so the result fits in a Kubernetes object name.
pub fn generate_name<R: Rng>(prefix: &str, rng: &mut R) -> String {
    let max_prefix = MAX_NAME_LEN - NAME_SUFFIX_LEN;
    let prefix = if prefix.len() > max_prefix {
        // prefixes are ASCII object names, so byte truncation is safe
        &prefix[..max_prefix]
    } else {
        prefix
    };

    let suffix: String = (0..NAME_SUFFIX_LEN)
        .map(|_| NAME_ALPHABET[rng.gen_range(0..NAME_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// Parse API version into group and version components
fn parse_api_version(api_version: &str) -> (&str, &str) {
    if let Some(idx) = api_version.rfind('/') {
        (&api_version[..idx], &api_version[idx + 1..])
    } else {
        // Core API (e.g., "v1")
        ("", api_version)
    }
}

/// Plurals of provider kinds that don't follow the simple rules below
const KIND_PLURALS: &[(&str, &str)] = &[
    ("kubeadmconfig", "kubeadmconfigs"),
    ("talosconfig", "talosconfigs"),
    ("ipaddress", "ipaddresses"),
    ("ipaddressclaim", "ipaddressclaims"),
];

/// Convert a Kind to its plural resource name
///
/// Only used when discovery can't resolve the kind.
fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}
