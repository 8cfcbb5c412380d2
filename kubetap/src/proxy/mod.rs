mod mitmproxy;

use std::{fmt, str::FromStr};

use k8s_openapi::api::{apps::v1::Deployment, core::v1::Container};
use kubetap_base::consts::{self, k8s::annotations};
use snafu::Snafu;

pub use self::mitmproxy::Mitmproxy;
use crate::tap::error::{self, Error};

/// A supported tap method; ultimately determines which sidecar container is
/// injected. Only HTTP is implemented today, the rest fail fast.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    Http,
    Tcp,
    Udp,
    Grpc,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Http => "http",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Grpc => "grpc",
        };
        f.write_str(value)
    }
}

impl FromStr for Protocol {
    type Err = ParseProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "grpc" => Ok(Self::Grpc),
            _ => Err(ParseProtocolError::Invalid { value: value.to_string() }),
        }
    }
}

#[derive(Debug, Snafu)]
pub enum ParseProtocolError {
    #[snafu(display("'{value}' is not a valid protocol, supported protocols: [http, tcp, udp, grpc]"))]
    Invalid { value: String },
}

/// Proxy operating mode. Only reverse is implemented; every other mode is a
/// deliberate scope fence, not an oversight.
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProxyMode {
    Reverse,
    Regular,
    Socks5,
    Upstream,
    Transparent,
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Reverse => "reverse",
            Self::Regular => "regular",
            Self::Socks5 => "socks5",
            Self::Upstream => "upstream",
            Self::Transparent => "transparent",
        };
        f.write_str(value)
    }
}

/// Options used to configure a sidecar provider.
#[derive(Clone, Debug)]
pub struct ProxyOptions {
    /// The target Service.
    pub target: String,
    /// The namespace the Service and Deployment are in.
    pub namespace: String,
    /// Whether the target's original endpoint uses TLS.
    pub upstream_https: bool,
    /// The listening port of the target Service, already resolved to a
    /// number.
    pub upstream_port: String,
    /// The proxy mode.
    pub mode: ProxyMode,
    /// The backing Deployment, anchoring the per-target ConfigMap.
    pub deployment_name: String,
}

/// Capability interface for tap sidecars.
///
/// A provider builds the proxy container, adjusts the Deployment after the
/// container is attached, and owns the cluster resources the sidecar needs
/// but that do not live inside the Deployment.
pub trait SidecarProvider {
    /// Builds the proxy sidecar container for `deployment_name`. Image and
    /// arguments are filled in by the orchestrator.
    fn sidecar(&self, deployment_name: &str) -> Container;

    /// Post-injection Deployment adjustments, e.g. the config and scratch
    /// volumes backing the sidecar's mounts.
    fn patch_deployment(&self, deployment: &mut Deployment);

    /// Creates environment resources required by the sidecar. Nothing done
    /// here may result in code running in the cluster.
    async fn ready_env(&self, client: &kube::Client) -> Result<(), Error>;

    /// Removes the resources created by [`ready_env`](Self::ready_env).
    async fn unready_env(&self, client: &kube::Client) -> Result<(), Error>;

    /// The protocols this provider can tap.
    fn protocols(&self) -> &[Protocol];

    /// Prints the tap method, e.g. `mitmproxy`.
    fn name(&self) -> &'static str;
}

/// Appends the sidecar container and the provider's volumes to the
/// Deployment's pod template and marks the template as tapped.
///
/// Fails with `ServiceTapped` when a container carrying the reserved
/// sidecar name already exists; this is the idempotence guard against
/// double-injection. Pre-existing containers and volumes are not touched.
pub fn inject_sidecar(
    deployment: &mut Deployment,
    sidecar: Container,
    provider: &impl SidecarProvider,
) -> Result<(), Error> {
    let name = deployment.metadata.name.clone().unwrap_or_default();
    let pod_spec = deployment.spec.get_or_insert_default().template.spec.get_or_insert_default();
    if pod_spec.containers.iter().any(|container| container.name == consts::CONTAINER_NAME) {
        return error::ServiceTappedSnafu.fail();
    }
    pod_spec.containers.push(sidecar);
    provider.patch_deployment(deployment);

    let template_metadata =
        deployment.spec.get_or_insert_default().template.metadata.get_or_insert_default();
    let _previous = template_metadata
        .annotations
        .get_or_insert_default()
        .insert(annotations::TAPPED.to_string(), name);
    Ok(())
}

/// Removes the sidecar container, every kubetap-prefixed volume, and the
/// tapped annotation from the pod template. Safe on an untapped Deployment.
pub fn strip_sidecar(deployment: &mut Deployment) {
    let Some(spec) = deployment.spec.as_mut() else {
        return;
    };
    if let Some(pod_spec) = spec.template.spec.as_mut() {
        pod_spec.containers.retain(|container| container.name != consts::CONTAINER_NAME);
        if let Some(volumes) = pod_spec.volumes.as_mut() {
            volumes.retain(|volume| !volume.name.starts_with(consts::VOLUME_NAME_PREFIX));
        }
    }
    if let Some(metadata) = spec.template.metadata.as_mut()
        && let Some(annotations_map) = metadata.annotations.as_mut()
    {
        let _tapped = annotations_map.remove(annotations::TAPPED);
    }
}
