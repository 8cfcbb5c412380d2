use k8s_openapi::{
    api::core::v1::{Service, ServicePort},
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::{Api, api::PostParams};
use kubetap_base::consts::{
    LISTEN_PORT_NAME, PROXY_LISTEN_PORT, PROXY_WEB_PORT, SERVICE_PORT_NAME, k8s::annotations,
};
use snafu::ResultExt;

use super::{
    error::{self, Error},
    retry,
};
use crate::ext::{ServiceExt, int_or_string_text, int_or_string_value};

/// Rewrites `service` in place so inbound traffic on `target_port` reaches
/// the proxy listen port.
///
/// The pre-tap target is recorded in the ledger annotation before any port
/// is touched, and the proxy web interface is exposed as an extra port.
/// Fails with `ServiceTapped` when the ledger annotation is already present
/// and with `ServiceMissingPort` when no port entry matches.
pub fn apply_tap(service: &mut Service, target_port: i32) -> Result<(), Error> {
    if service.is_tapped() {
        return error::ServiceTappedSnafu.fail();
    }
    let matched = service
        .spec
        .as_ref()
        .and_then(|spec| {
            spec.ports.as_ref().and_then(|ports| {
                ports.iter().find(|port| port.port == target_port).cloned()
            })
        })
        .ok_or(Error::ServiceMissingPort { port: target_port })?;

    // An absent targetPort routes to the port itself; record that effective
    // destination so restoration has a concrete value.
    let original = matched.target_port.unwrap_or(IntOrString::Int(matched.port));
    let _previous = service
        .metadata
        .annotations
        .get_or_insert_default()
        .insert(annotations::ORIGINAL_TARGET_PORT.to_string(), int_or_string_text(&original));

    let ports = service.spec.get_or_insert_default().ports.get_or_insert_default();
    ports.push(ServicePort {
        name: Some(SERVICE_PORT_NAME.to_string()),
        port: PROXY_WEB_PORT,
        target_port: Some(IntOrString::Int(PROXY_WEB_PORT)),
        ..ServicePort::default()
    });
    for port in ports.iter_mut() {
        if port.port == target_port {
            // Some environments require named ports, so an unnamed entry
            // gets the reserved listen-port name.
            if port.name.as_deref().unwrap_or_default().is_empty() {
                port.name = Some(LISTEN_PORT_NAME.to_string());
            }
            port.target_port = Some(IntOrString::Int(PROXY_LISTEN_PORT));
        }
    }
    Ok(())
}

/// Restores a Service to its pre-tap routing.
///
/// Safe on an already-untapped Service: without the ledger annotation the
/// port list is left alone, and removing an absent annotation is a no-op.
pub fn apply_untap(service: &mut Service) {
    let original = service.original_target_port();
    if let Some(ports) = service.spec.as_mut().and_then(|spec| spec.ports.as_mut()) {
        ports.retain(|port| port.name.as_deref() != Some(SERVICE_PORT_NAME));
        if let Some(original) = original {
            for port in ports.iter_mut() {
                let targets_proxy = port
                    .target_port
                    .as_ref()
                    .is_some_and(|target| int_or_string_value(target) == PROXY_LISTEN_PORT);
                if targets_proxy {
                    if port.name.as_deref() == Some(LISTEN_PORT_NAME) {
                        port.name = None;
                    }
                    port.target_port = Some(original.clone());
                }
            }
        }
    }
    if let Some(annotations_map) = service.metadata.annotations.as_mut() {
        let _original = annotations_map.remove(annotations::ORIGINAL_TARGET_PORT);
    }
}

/// Swaps the Service's ports under conflict-retry, re-fetching the Service
/// immediately before every attempt.
pub async fn tap_service(api: &Api<Service>, name: &str, target_port: i32) -> Result<(), Error> {
    retry::on_conflict(|| async {
        let mut service = api.get(name).await.context(error::GetServiceSnafu { name })?;
        apply_tap(&mut service, target_port)?;
        let _updated = api
            .replace(name, &PostParams::default(), &service)
            .await
            .context(error::UpdateServiceSnafu { name })?;
        Ok(())
    })
    .await
}

/// Restores the Service's ports under conflict-retry.
pub async fn untap_service(api: &Api<Service>, name: &str) -> Result<(), Error> {
    retry::on_conflict(|| async {
        let mut service = api.get(name).await.context(error::GetServiceSnafu { name })?;
        apply_untap(&mut service);
        let _updated = api
            .replace(name, &PostParams::default(), &service)
            .await
            .context(error::UpdateServiceSnafu { name })?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::{
        api::core::v1::{Service, ServicePort, ServiceSpec},
        apimachinery::pkg::apis::meta::v1::ObjectMeta,
        apimachinery::pkg::util::intstr::IntOrString,
    };
    use kubetap_base::consts::{
        LISTEN_PORT_NAME, PROXY_LISTEN_PORT, PROXY_WEB_PORT, SERVICE_PORT_NAME, k8s::annotations,
    };

    use super::{apply_tap, apply_untap};
    use crate::{ext::ServiceExt, tap::error::Error};

    fn sample_service(target_port: IntOrString, port_name: Option<&str>) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("sample-service".to_string()),
                namespace: Some("default".to_string()),
                annotations: Some(BTreeMap::from([(
                    "my-annotation".to_string(),
                    "some-annotation".to_string(),
                )])),
                ..ObjectMeta::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: port_name.map(ToString::to_string),
                    port: 80,
                    target_port: Some(target_port),
                    ..ServicePort::default()
                }]),
                selector: Some(BTreeMap::from([("app".to_string(), "myapp".to_string())])),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }

    fn ports(service: &Service) -> &[ServicePort] {
        service.spec.as_ref().and_then(|spec| spec.ports.as_deref()).unwrap_or_default()
    }

    #[test]
    fn test_tap_swaps_target_and_records_original() {
        let mut service = sample_service(IntOrString::Int(8080), Some("servicePortOne"));
        apply_tap(&mut service, 80).unwrap();

        let annotations_map = service.metadata.annotations.as_ref().unwrap();
        assert_eq!(
            annotations_map.get(annotations::ORIGINAL_TARGET_PORT).map(String::as_str),
            Some("8080")
        );
        // pre-existing annotations survive
        assert_eq!(annotations_map.get("my-annotation").map(String::as_str), Some("some-annotation"));

        let ports = ports(&service);
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(PROXY_LISTEN_PORT)));
        assert_eq!(ports[0].name.as_deref(), Some("servicePortOne"));
        assert_eq!(ports[1].name.as_deref(), Some(SERVICE_PORT_NAME));
        assert_eq!(ports[1].port, PROXY_WEB_PORT);
    }

    #[test]
    fn test_tap_preserves_named_target_ports() {
        let mut service = sample_service(
            IntOrString::String("http-web".to_string()),
            Some("servicePortOne"),
        );
        apply_tap(&mut service, 80).unwrap();

        let annotations_map = service.metadata.annotations.as_ref().unwrap();
        assert_eq!(
            annotations_map.get(annotations::ORIGINAL_TARGET_PORT).map(String::as_str),
            Some("http-web")
        );
    }

    #[test]
    fn test_tap_names_unnamed_ports() {
        let mut service = sample_service(IntOrString::Int(8080), None);
        apply_tap(&mut service, 80).unwrap();
        assert_eq!(ports(&service)[0].name.as_deref(), Some(LISTEN_PORT_NAME));
    }

    #[test]
    fn test_tap_refuses_a_tapped_service() {
        let mut service = sample_service(IntOrString::Int(8080), Some("servicePortOne"));
        apply_tap(&mut service, 80).unwrap();
        let before = service.clone();

        let result = apply_tap(&mut service, 80);
        assert!(matches!(result, Err(Error::ServiceTapped)));
        // zero mutations on refusal
        assert_eq!(service, before);
    }

    #[test]
    fn test_tap_refuses_a_missing_port() {
        let mut service = sample_service(IntOrString::Int(8080), Some("servicePortOne"));
        let result = apply_tap(&mut service, 9999);
        assert!(matches!(result, Err(Error::ServiceMissingPort { port: 9999 })));
        assert!(!service.is_tapped());
    }

    #[test]
    fn test_tap_then_untap_round_trips() {
        for target_port in [IntOrString::Int(8080), IntOrString::String("http-web".to_string())] {
            let pristine = sample_service(target_port, Some("servicePortOne"));
            let mut service = pristine.clone();

            apply_tap(&mut service, 80).unwrap();
            apply_untap(&mut service);

            assert_eq!(service, pristine);
        }
    }

    #[test]
    fn test_untap_strips_the_synthetic_port_name() {
        let pristine = sample_service(IntOrString::Int(8080), None);
        let mut service = pristine.clone();

        apply_tap(&mut service, 80).unwrap();
        apply_untap(&mut service);

        assert_eq!(service, pristine);
    }

    #[test]
    fn test_untap_of_an_untapped_service_is_a_no_op() {
        let pristine = sample_service(IntOrString::Int(8080), Some("servicePortOne"));
        let mut service = pristine.clone();

        apply_untap(&mut service);

        assert_eq!(service, pristine);
    }
}
