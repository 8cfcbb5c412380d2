//! The tap/untap state-transition engine.
//!
//! A tap moves through `Untapped -> Preparing -> SidecarInjected ->
//! ServiceSwapped -> Tapped`; untap walks the reverse edges. Every mutation
//! re-fetches its resource immediately before writing and is retried only on
//! optimistic-concurrency conflicts. A failure after the environment has
//! been prepared triggers a best-effort compensating untap, surfacing the
//! original error rather than the rollback's.

pub mod error;
mod locator;
mod retry;
mod service;

use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{Namespace, Service},
    },
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::{
    Api,
    api::{ListParams, PostParams},
};
use snafu::ResultExt;

pub use self::{
    error::Error,
    locator::{deployment_from_selectors, tapped_pod},
};
use crate::{
    ext::ServiceExt,
    proxy::{self, Mitmproxy, Protocol, ProxyMode, ProxyOptions, SidecarProvider},
};

/// Options for one tap operation, constructed once at the command boundary
/// and passed by parameter; core logic never consults ambient state.
#[derive(Clone, Debug)]
pub struct TapOptions {
    pub service: String,
    pub port: i32,
    pub namespace: String,
    pub https: bool,
    pub image: String,
    pub command_args: Vec<String>,
    pub protocol: Protocol,
}

/// The applied tap state handed back for interactive follow-ups.
#[derive(Clone, Debug)]
pub struct TappedTarget {
    pub deployment_name: String,
    pub selectors: BTreeMap<String, String>,
    pub proxy_name: &'static str,
}

/// Taps a Service: prepares the proxy environment, injects the sidecar into
/// the backing Deployment, and swaps the Service's ports.
pub async fn tap(client: &kube::Client, options: &TapOptions) -> Result<TappedTarget, Error> {
    ensure_namespace(client, &options.namespace).await?;

    let services = Api::<Service>::namespaced(client.clone(), &options.namespace);
    let deployments = Api::<Deployment>::namespaced(client.clone(), &options.namespace);

    // Short-circuit before any mutation.
    let target_service = services
        .get(&options.service)
        .await
        .context(error::GetServiceSnafu { name: &options.service })?;
    if target_service.is_tapped() {
        return error::ServiceTappedSnafu.fail();
    }
    let selectors =
        target_service.spec.as_ref().and_then(|spec| spec.selector.clone()).unwrap_or_default();

    let upstream_port = resolve_upstream_port(
        &deployments,
        &options.namespace,
        &target_service,
        options.port,
        &selectors,
    )
    .await?;

    let deployment =
        deployment_from_selectors(&deployments, &options.namespace, &selectors).await?;
    let deployment_name = deployment.metadata.name.clone().unwrap_or_default();

    let proxy = provider_for(options.protocol, ProxyOptions {
        target: options.service.clone(),
        namespace: options.namespace.clone(),
        upstream_https: options.https,
        upstream_port,
        mode: ProxyMode::Reverse,
        deployment_name: deployment_name.clone(),
    })?;

    // Nothing that runs code in the cluster is created here, so a failure
    // needs no rollback.
    proxy.ready_env(client).await?;

    let mut sidecar = proxy.sidecar(&deployment_name);
    sidecar.image = Some(options.image.clone());
    sidecar.args = (!options.command_args.is_empty()).then(|| options.command_args.clone());

    let injected = retry::on_conflict(|| {
        let sidecar = sidecar.clone();
        let deployments = &deployments;
        let proxy = &proxy;
        let name = deployment_name.as_str();
        async move {
            let mut deployment =
                deployments.get(name).await.context(error::GetDeploymentSnafu { name })?;
            proxy::inject_sidecar(&mut deployment, sidecar, proxy)?;
            let _updated = deployments
                .replace(name, &PostParams::default(), &deployment)
                .await
                .context(error::UpdateDeploymentSnafu { name })?;
            Ok(())
        }
    })
    .await;
    if let Err(err) = injected {
        tracing::warn!("error modifying Deployment, reverting tap");
        rollback(client, options).await;
        return Err(err);
    }

    if let Err(err) = service::tap_service(&services, &options.service, options.port).await {
        tracing::warn!("error modifying Service, reverting tap");
        rollback(client, options).await;
        return Err(err);
    }

    Ok(TappedTarget { deployment_name, selectors, proxy_name: proxy.name() })
}

/// Untaps a Service. Idempotent: calling it on an already-untapped target
/// succeeds and leaves the Service untouched.
pub async fn untap(client: &kube::Client, service_name: &str, namespace: &str) -> Result<(), Error> {
    ensure_namespace(client, namespace).await?;

    let services = Api::<Service>::namespaced(client.clone(), namespace);
    let deployments = Api::<Deployment>::namespaced(client.clone(), namespace);

    let target_service =
        services.get(service_name).await.context(error::GetServiceSnafu { name: service_name })?;
    let selectors =
        target_service.spec.as_ref().and_then(|spec| spec.selector.clone()).unwrap_or_default();

    let deployment =
        deployment_from_selectors(&deployments, namespace, &selectors).await?;
    let deployment_name = deployment.metadata.name.clone().unwrap_or_default();

    retry::on_conflict(|| {
        let deployments = &deployments;
        let name = deployment_name.as_str();
        async move {
            let mut deployment =
                deployments.get(name).await.context(error::GetDeploymentSnafu { name })?;
            proxy::strip_sidecar(&mut deployment);
            let _updated = deployments
                .replace(name, &PostParams::default(), &deployment)
                .await
                .context(error::UpdateDeploymentSnafu { name })?;
            Ok(())
        }
    })
    .await?;

    service::untap_service(&services, service_name).await?;

    let proxy = Mitmproxy::new(ProxyOptions {
        target: service_name.to_string(),
        namespace: namespace.to_string(),
        upstream_https: false,
        upstream_port: String::new(),
        mode: ProxyMode::Reverse,
        deployment_name,
    });
    match proxy.unready_env(client).await {
        // Not-already-present is a valid end state for the ConfigMap.
        Err(Error::ConfigMapNoMatch) | Ok(()) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Lists the tapped Services in `namespace`, or across all namespaces when
/// none is given.
pub async fn list_tapped_services(
    client: &kube::Client,
    namespace: Option<&str>,
) -> Result<Vec<Service>, Error> {
    let api = match namespace {
        Some(namespace) => {
            ensure_namespace(client, namespace).await?;
            Api::<Service>::namespaced(client.clone(), namespace)
        }
        None => Api::<Service>::all(client.clone()),
    };
    let services = api.list(&ListParams::default()).await.context(error::ListServicesSnafu)?;
    Ok(services.items.into_iter().filter(ServiceExt::is_tapped).collect())
}

/// Best-effort compensation after a partial tap; the original failure is
/// what the caller needs to see, so rollback errors are only logged.
async fn rollback(client: &kube::Client, options: &TapOptions) {
    if let Err(err) = untap(client, &options.service, &options.namespace).await {
        tracing::warn!("rollback failed: {err}");
    }
}

async fn ensure_namespace(client: &kube::Client, namespace: &str) -> Result<(), Error> {
    let namespaces = Api::<Namespace>::all(client.clone())
        .list(&ListParams::default())
        .await
        .context(error::ListNamespacesSnafu)?;
    if namespaces.items.iter().any(|item| item.metadata.name.as_deref() == Some(namespace)) {
        Ok(())
    } else {
        error::NamespaceNotExistSnafu { namespace }.fail()
    }
}

/// Resolves the upstream port the proxy forwards to. A numeric target port
/// is used directly; a named one is resolved against the backing
/// Deployment's container ports.
async fn resolve_upstream_port(
    deployments: &Api<Deployment>,
    namespace: &str,
    service: &Service,
    target_port: i32,
    selectors: &BTreeMap<String, String>,
) -> Result<String, Error> {
    let matched = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .and_then(|ports| ports.iter().find(|port| port.port == target_port))
        .ok_or(Error::ServiceMissingPort { port: target_port })?;

    match matched.target_port.as_ref() {
        None => Ok(matched.port.to_string()),
        Some(IntOrString::Int(port)) => Ok(port.to_string()),
        Some(IntOrString::String(name)) => {
            let deployment =
                deployment_from_selectors(deployments, namespace, selectors).await?;
            locator::container_port_by_name(&deployment, name)
                .map(|port| port.to_string())
                .ok_or(Error::DeploymentMissingPorts)
        }
    }
}

/// Selects the sidecar provider for `protocol`. There is a single provider
/// today; anything it does not list fails fast rather than falling through.
fn provider_for(protocol: Protocol, options: ProxyOptions) -> Result<Mitmproxy, Error> {
    let provider = Mitmproxy::new(options);
    if provider.protocols().contains(&protocol) {
        Ok(provider)
    } else {
        error::UnsupportedProtocolSnafu { protocol }.fail()
    }
}
