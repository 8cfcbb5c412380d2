use std::collections::BTreeMap;

use k8s_openapi::{
    ByteString,
    api::{
        apps::v1::Deployment,
        core::v1::{
            ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource,
            HTTPGetAction, Probe, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::{
    Api,
    api::{DeleteParams, ListParams, ObjectMeta, PostParams},
};
use kubetap_base::consts::{
    self, CONFIG_MAP_ANNOTATION_PREFIX, CONFIG_MAP_PREFIX, LISTEN_PORT_NAME,
    MITMPROXY_CONFIG_FILE, MITMPROXY_DATA_VOLUME, PROXY_LISTEN_PORT, PROXY_WEB_PORT,
    WEB_PORT_NAME, k8s::annotations,
};
use snafu::ResultExt;

use super::{Protocol, ProxyMode, ProxyOptions, SidecarProvider};
use crate::tap::error::{self, Error};

/// Configuration shared by every mitmproxy deployment; the mode line is
/// appended per target.
const MITMPROXY_BASE_CONFIG: &str = "listen_port: 7777
ssl_insecure: true
web_port: 2244
web_host: 0.0.0.0
web_open_browser: false
";

const PROTOCOLS: &[Protocol] = &[Protocol::Http];

/// An interactive web proxy for intercepting and modifying HTTP requests.
#[derive(Clone, Debug)]
pub struct Mitmproxy {
    options: ProxyOptions,
}

impl Mitmproxy {
    /// Initializes a new mitmproxy sidecar provider. mitmproxy only
    /// supports one mode right now.
    #[must_use]
    pub fn new(options: ProxyOptions) -> Self {
        Self { options: ProxyOptions { mode: ProxyMode::Reverse, ..options } }
    }
}

impl SidecarProvider for Mitmproxy {
    fn sidecar(&self, deployment_name: &str) -> Container {
        // Image and args are controlled by the orchestrator.
        Container {
            name: consts::CONTAINER_NAME.to_string(),
            image_pull_policy: Some("Always".to_string()),
            ports: Some(vec![
                ContainerPort {
                    name: Some(LISTEN_PORT_NAME.to_string()),
                    container_port: PROXY_LISTEN_PORT,
                    protocol: Some("TCP".to_string()),
                    ..ContainerPort::default()
                },
                ContainerPort {
                    name: Some(WEB_PORT_NAME.to_string()),
                    container_port: PROXY_WEB_PORT,
                    protocol: Some("TCP".to_string()),
                    ..ContainerPort::default()
                },
            ]),
            readiness_probe: Some(Probe {
                http_get: Some(HTTPGetAction {
                    path: Some("/".to_string()),
                    port: IntOrString::Int(PROXY_WEB_PORT),
                    scheme: Some("HTTP".to_string()),
                    ..HTTPGetAction::default()
                }),
                initial_delay_seconds: Some(5),
                period_seconds: Some(5),
                success_threshold: Some(3),
                timeout_seconds: Some(5),
                ..Probe::default()
            }),
            volume_mounts: Some(vec![
                VolumeMount {
                    name: format!("{CONFIG_MAP_PREFIX}{deployment_name}"),
                    // Config lives outside the main dir to avoid read-only
                    // mount problems with mitmproxy's chown on startup.
                    mount_path: "/home/mitmproxy/config/".to_string(),
                    ..VolumeMount::default()
                },
                VolumeMount {
                    name: MITMPROXY_DATA_VOLUME.to_string(),
                    mount_path: "/home/mitmproxy/.mitmproxy".to_string(),
                    read_only: Some(false),
                    ..VolumeMount::default()
                },
            ]),
            ..Container::default()
        }
    }

    fn patch_deployment(&self, deployment: &mut Deployment) {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let volumes = deployment
            .spec
            .get_or_insert_default()
            .template
            .spec
            .get_or_insert_default()
            .volumes
            .get_or_insert_default();
        volumes.push(Volume {
            name: format!("{CONFIG_MAP_PREFIX}{name}"),
            config_map: Some(ConfigMapVolumeSource {
                name: format!("{CONFIG_MAP_PREFIX}{name}"),
                ..ConfigMapVolumeSource::default()
            }),
            ..Volume::default()
        });
        // The emptyDir scratch volume resolves permission problems and can
        // later export flow dumps.
        volumes.push(Volume {
            name: MITMPROXY_DATA_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Volume::default()
        });
    }

    async fn ready_env(&self, client: &kube::Client) -> Result<(), Error> {
        tracing::debug!("readying proxy environment for Service {}", self.options.target);
        let api = Api::<ConfigMap>::namespaced(client.clone(), &self.options.namespace);
        if let Err(err) = create_config_map(&api, &self.options).await {
            // A stray ConfigMap left behind by an interrupted run makes the
            // create fail; purge it and try once more.
            tracing::debug!("ConfigMap creation failed, purging any stray ConfigMap: {err}");
            if let Err(err) = destroy_config_map(&api, &self.options.deployment_name).await {
                tracing::debug!("no stray ConfigMap found: {err}");
            }
            create_config_map(&api, &self.options).await?;
        }
        Ok(())
    }

    async fn unready_env(&self, client: &kube::Client) -> Result<(), Error> {
        let api = Api::<ConfigMap>::namespaced(client.clone(), &self.options.namespace);
        destroy_config_map(&api, &self.options.deployment_name).await
    }

    fn protocols(&self) -> &[Protocol] {
        PROTOCOLS
    }

    fn name(&self) -> &'static str {
        "mitmproxy"
    }
}

/// Renders the proxy configuration payload, appending the upstream
/// directive for the target's scheme and resolved port.
fn render_config(options: &ProxyOptions) -> Result<Vec<u8>, Error> {
    match options.mode {
        ProxyMode::Reverse => {
            let scheme = if options.upstream_https { "https" } else { "http" };
            let upstream_port = &options.upstream_port;
            Ok(format!("{MITMPROXY_BASE_CONFIG}mode: reverse:{scheme}://127.0.0.1:{upstream_port}")
                .into_bytes())
        }
        ProxyMode::Regular | ProxyMode::Socks5 | ProxyMode::Upstream | ProxyMode::Transparent => {
            error::UnsupportedProxyModeSnafu { mode: options.mode.to_string() }.fail()
        }
    }
}

/// Creates the per-target ConfigMap and verifies the stored payload
/// byte-for-byte against the intended one; create is not an upsert, so a
/// leftover ConfigMap under the same name surfaces as an error here.
async fn create_config_map(api: &Api<ConfigMap>, options: &ProxyOptions) -> Result<(), Error> {
    let payload = render_config(options)?;
    let name = format!("{CONFIG_MAP_PREFIX}{}", options.deployment_name);
    let config_map = ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(options.namespace.clone()),
            annotations: Some(BTreeMap::from([(
                annotations::PROXY_CONFIG.to_string(),
                format!("{CONFIG_MAP_ANNOTATION_PREFIX}{}", options.deployment_name),
            )])),
            ..ObjectMeta::default()
        },
        binary_data: Some(BTreeMap::from([(
            MITMPROXY_CONFIG_FILE.to_string(),
            ByteString(payload.clone()),
        )])),
        ..ConfigMap::default()
    };

    let created = api
        .create(&PostParams::default(), &config_map)
        .await
        .context(error::CreateConfigMapSnafu { name })?;
    let created_len = created
        .binary_data
        .as_ref()
        .and_then(|data| data.get(MITMPROXY_CONFIG_FILE))
        .map_or(0, |bytes| bytes.0.len());
    if created_len == payload.len() {
        Ok(())
    } else {
        error::CreateResourceMismatchSnafu.fail()
    }
}

/// Deletes the ConfigMap owned by the tap on `deployment_name`, located by
/// annotation since ConfigMaps cannot be queried by arbitrary attributes.
async fn destroy_config_map(api: &Api<ConfigMap>, deployment_name: &str) -> Result<(), Error> {
    let config_maps = api.list(&ListParams::default()).await.context(error::ListConfigMapsSnafu)?;
    let target = find_owned_config_map(&config_maps.items, deployment_name)?;
    let name = target.metadata.name.clone().unwrap_or_default();
    let _deleted = api
        .delete(&name, &DeleteParams::default())
        .await
        .context(error::DeleteConfigMapSnafu { name })?;
    Ok(())
}

/// Filters a ConfigMap list down to the one annotated for
/// `deployment_name`.
fn find_owned_config_map<'a>(
    config_maps: &'a [ConfigMap],
    deployment_name: &str,
) -> Result<&'a ConfigMap, Error> {
    if deployment_name.is_empty() {
        return error::EmptyTargetSnafu.fail();
    }
    let wanted = format!("{CONFIG_MAP_ANNOTATION_PREFIX}{deployment_name}");
    config_maps
        .iter()
        .find(|config_map| {
            config_map
                .metadata
                .annotations
                .as_ref()
                .and_then(|annotations| annotations.get(annotations::PROXY_CONFIG))
                .is_some_and(|value| *value == wanted)
        })
        .ok_or(Error::ConfigMapNoMatch)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use kubetap_base::consts::{CONFIG_MAP_PREFIX, k8s::annotations};

    use super::{
        MITMPROXY_BASE_CONFIG, Mitmproxy, find_owned_config_map, render_config,
    };
    use crate::{
        proxy::{ProxyMode, ProxyOptions, SidecarProvider},
        tap::error::Error,
    };

    const MAX_PORT_NAME_LEN: usize = 15;

    fn sample_options() -> ProxyOptions {
        ProxyOptions {
            target: "sample-service".to_string(),
            namespace: "default".to_string(),
            upstream_https: false,
            upstream_port: "8080".to_string(),
            mode: ProxyMode::Reverse,
            deployment_name: "sample-deployment".to_string(),
        }
    }

    fn owned_config_map(deployment_name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(format!("{CONFIG_MAP_PREFIX}{deployment_name}")),
                namespace: Some("default".to_string()),
                annotations: Some(BTreeMap::from([(
                    annotations::PROXY_CONFIG.to_string(),
                    format!("target-{deployment_name}"),
                )])),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        }
    }

    #[test]
    fn test_render_config_appends_the_reverse_upstream_line() {
        let rendered = render_config(&sample_options()).unwrap();
        let text = String::from_utf8(rendered).unwrap();
        assert!(text.starts_with(MITMPROXY_BASE_CONFIG));
        assert!(text.ends_with("mode: reverse:http://127.0.0.1:8080"));
    }

    #[test]
    fn test_render_config_uses_https_for_tls_upstreams() {
        let options = ProxyOptions { upstream_https: true, ..sample_options() };
        let text = String::from_utf8(render_config(&options).unwrap()).unwrap();
        assert!(text.ends_with("mode: reverse:https://127.0.0.1:8080"));
    }

    #[test]
    fn test_render_config_refuses_other_modes() {
        for mode in
            [ProxyMode::Regular, ProxyMode::Socks5, ProxyMode::Upstream, ProxyMode::Transparent]
        {
            let options = ProxyOptions { mode, ..sample_options() };
            let result = render_config(&options);
            assert!(matches!(result, Err(Error::UnsupportedProxyMode { .. })));
        }
    }

    #[test]
    fn test_new_forces_reverse_mode() {
        let provider = Mitmproxy::new(ProxyOptions { mode: ProxyMode::Socks5, ..sample_options() });
        assert_eq!(provider.options.mode, ProxyMode::Reverse);
    }

    #[test]
    fn test_sidecar_container_shape() {
        let provider = Mitmproxy::new(sample_options());
        let sidecar = provider.sidecar("sample-deployment");

        assert_eq!(sidecar.name, kubetap_base::consts::CONTAINER_NAME);

        let ports = sidecar.ports.as_ref().unwrap();
        assert_eq!(ports.len(), 2);
        for port in ports {
            assert!(port.name.as_ref().unwrap().len() <= MAX_PORT_NAME_LEN);
        }

        let probe = sidecar.readiness_probe.as_ref().unwrap();
        assert_eq!(probe.initial_delay_seconds, Some(5));
        assert_eq!(probe.period_seconds, Some(5));
        assert_eq!(probe.success_threshold, Some(3));
        assert_eq!(probe.timeout_seconds, Some(5));

        let mounts = sidecar.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].name, format!("{CONFIG_MAP_PREFIX}sample-deployment"));
    }

    #[test]
    fn test_find_owned_config_map_filters_by_annotation() {
        let config_maps = [owned_config_map("other-deployment"), owned_config_map("sample-deployment")];
        let found = find_owned_config_map(&config_maps, "sample-deployment").unwrap();
        assert_eq!(
            found.metadata.name.as_deref(),
            Some("kubetap-target-sample-deployment")
        );
    }

    #[test]
    fn test_find_owned_config_map_without_match() {
        let config_maps = [ConfigMap::default()];
        let result = find_owned_config_map(&config_maps, "sample-deployment");
        assert!(matches!(result, Err(Error::ConfigMapNoMatch)));
    }

    #[test]
    fn test_find_owned_config_map_refuses_an_empty_target() {
        let config_maps = [owned_config_map("sample-deployment")];
        let result = find_owned_config_map(&config_maps, "");
        assert!(matches!(result, Err(Error::EmptyTarget)));
    }
}
