use std::collections::BTreeMap;

use k8s_openapi::api::{apps::v1::Deployment, core::v1::Pod};
use kube::{Api, api::ListParams};
use kubetap_base::consts::k8s::annotations;
use snafu::ResultExt;

use super::error::{self, Error};

/// Joins a Service's label selectors into a single AND-semantics label
/// query string, `k1=v1,k2=v2`.
pub fn selector_query(selectors: &BTreeMap<String, String>) -> Result<String, Error> {
    if selectors.is_empty() {
        return error::SelectorsMissingSnafu.fail();
    }
    Ok(selectors
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(","))
}

/// Reduces a selector query result to the single backing Deployment. Zero
/// matches and ambiguous matches are both refused; the tool never guesses.
pub fn single_match(deployments: Vec<Deployment>) -> Result<Deployment, Error> {
    let mut deployments = deployments.into_iter();
    match (deployments.next(), deployments.next()) {
        (None, _) => error::SelectorNoMatchSnafu.fail(),
        (Some(deployment), None) => Ok(deployment),
        (Some(_), Some(_)) => error::SelectorMultiMatchSnafu.fail(),
    }
}

/// Resolves the Deployment backing a Service through its label selectors.
pub async fn deployment_from_selectors(
    api: &Api<Deployment>,
    namespace: &str,
    selectors: &BTreeMap<String, String>,
) -> Result<Deployment, Error> {
    let query = selector_query(selectors)?;
    let list_params = ListParams { label_selector: Some(query), ..ListParams::default() };
    let deployments = api.list(&list_params).await.context(error::ListDeploymentsSnafu)?;
    let deployment = single_match(deployments.items)?;
    // A namespace-scoped query cannot return a foreign Deployment; if one
    // shows up anyway, refuse to touch it.
    if deployment.metadata.namespace.as_deref() != Some(namespace) {
        return error::DeploymentOutsideNamespaceSnafu { namespace }.fail();
    }
    Ok(deployment)
}

/// Finds the Pod whose tapped annotation names `deployment_name`. This is
/// how the proxy Pod is located for readiness checks and port-forwarding.
pub fn tapped_pod(pods: &[Pod], deployment_name: &str) -> Result<Pod, Error> {
    pods.iter()
        .find(|pod| {
            pod.metadata
                .annotations
                .as_ref()
                .and_then(|annotations| annotations.get(annotations::TAPPED))
                .is_some_and(|value| value == deployment_name)
        })
        .cloned()
        .ok_or_else(|| Error::PodNotFound { deployment_name: deployment_name.to_string() })
}

/// Looks up a named container port on the Deployment's pod template,
/// used to resolve a Service's named target port to a number.
pub fn container_port_by_name(deployment: &Deployment, port_name: &str) -> Option<i32> {
    deployment
        .spec
        .iter()
        .filter_map(|spec| spec.template.spec.as_ref())
        .flat_map(|pod_spec| pod_spec.containers.iter())
        .filter_map(|container| container.ports.as_ref())
        .flatten()
        .find(|port| port.name.as_deref() == Some(port_name))
        .map(|port| port.container_port)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::{
        api::{
            apps::v1::{Deployment, DeploymentSpec},
            core::v1::{Container, ContainerPort, Pod, PodSpec, PodTemplateSpec},
        },
        apimachinery::pkg::apis::meta::v1::ObjectMeta,
    };

    use super::{container_port_by_name, selector_query, single_match, tapped_pod};
    use crate::tap::error::Error;

    fn deployment(name: &str) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "someapp".to_string(),
                            ports: Some(vec![ContainerPort {
                                name: Some("http-web".to_string()),
                                container_port: 8080,
                                ..ContainerPort::default()
                            }]),
                            ..Container::default()
                        }],
                        ..PodSpec::default()
                    }),
                },
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        }
    }

    #[test]
    fn test_selector_query_joins_pairs() {
        let selectors = BTreeMap::from([
            ("app".to_string(), "myapp".to_string()),
            ("tier".to_string(), "web".to_string()),
        ]);
        assert_eq!(selector_query(&selectors).unwrap(), "app=myapp,tier=web");
    }

    #[test]
    fn test_selector_query_refuses_empty_selectors() {
        let result = selector_query(&BTreeMap::new());
        assert!(matches!(result, Err(Error::SelectorsMissing)));
    }

    #[test]
    fn test_single_match_picks_the_only_deployment() {
        let matched = single_match(vec![deployment("sample-deployment")]).unwrap();
        assert_eq!(matched.metadata.name.as_deref(), Some("sample-deployment"));
    }

    #[test]
    fn test_single_match_refuses_zero_matches() {
        assert!(matches!(single_match(Vec::new()), Err(Error::SelectorNoMatch)));
    }

    #[test]
    fn test_single_match_refuses_ambiguous_matches() {
        let result = single_match(vec![deployment("one"), deployment("two")]);
        assert!(matches!(result, Err(Error::SelectorMultiMatch)));
    }

    #[test]
    fn test_tapped_pod_scans_annotations() {
        let annotated = Pod {
            metadata: ObjectMeta {
                name: Some("sample-pod".to_string()),
                annotations: Some(BTreeMap::from([(
                    kubetap_base::consts::k8s::annotations::TAPPED.to_string(),
                    "sample-deployment".to_string(),
                )])),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        };
        let plain = Pod::default();

        let pod = tapped_pod(&[plain, annotated], "sample-deployment").unwrap();
        assert_eq!(pod.metadata.name.as_deref(), Some("sample-pod"));
    }

    #[test]
    fn test_tapped_pod_not_found() {
        let result = tapped_pod(&[Pod::default()], "sample-deployment");
        assert!(matches!(result, Err(Error::PodNotFound { .. })));
    }

    #[test]
    fn test_container_port_by_name() {
        let deployment = deployment("sample-deployment");
        assert_eq!(container_port_by_name(&deployment, "http-web"), Some(8080));
        assert_eq!(container_port_by_name(&deployment, "missing"), None);
    }
}
