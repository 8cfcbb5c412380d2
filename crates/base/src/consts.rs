pub mod k8s {
    pub mod annotations {
        /// Stores a tapped Service's pre-tap target port, either numeric or
        /// named. A Service is tapped iff this annotation is present.
        pub const ORIGINAL_TARGET_PORT: &str = "kubetap.io/original-port";

        /// Maps a proxy ConfigMap back to its target Deployment. ConfigMaps
        /// cannot be fetched by arbitrary attribute, so reverse lookup goes
        /// through list-and-filter on this key.
        pub const PROXY_CONFIG: &str = "kubetap.io/proxy-config";

        /// Marks a pod template as tapped; the value is the owning
        /// Deployment's name.
        pub const TAPPED: &str = "kubetap.io/tapped";
    }
}

/// Reserved name of the injected proxy sidecar container.
pub const CONTAINER_NAME: &str = "kubetap";

/// Name of the Service port exposing the proxy web interface.
pub const SERVICE_PORT_NAME: &str = "kubetap-web";

/// Synthetic name assigned to an unnamed tapped Service port. Must stay
/// within the platform's 15-character port-name limit.
pub const LISTEN_PORT_NAME: &str = "kubetap-listen";

/// Name of the sidecar's web-interface container port.
pub const WEB_PORT_NAME: &str = "kubetap-web";

/// Port the proxy listens on for intercepted traffic.
pub const PROXY_LISTEN_PORT: i32 = 7777;

/// Port of the proxy's web interface.
pub const PROXY_WEB_PORT: i32 = 2244;

/// Name prefix of the ConfigMaps (and ConfigMap volumes) owned by kubetap,
/// completed with the target Deployment name.
pub const CONFIG_MAP_PREFIX: &str = "kubetap-target-";

/// Value prefix of the [`k8s::annotations::PROXY_CONFIG`] annotation.
pub const CONFIG_MAP_ANNOTATION_PREFIX: &str = "target-";

/// Volumes carrying this name prefix are removed during untap.
pub const VOLUME_NAME_PREFIX: &str = "kubetap";

/// Scratch volume backing the proxy's working directory.
pub const MITMPROXY_DATA_VOLUME: &str = "kubetap-mitmproxy-data";

/// Key of the proxy configuration payload inside its ConfigMap.
pub const MITMPROXY_CONFIG_FILE: &str = "config.yaml";

pub const DEFAULT_IMAGE_HTTP: &str = "gcr.io/soluble-oss/kubetap-mitmproxy:latest";
pub const DEFAULT_IMAGE_RAW: &str = "gcr.io/soluble-oss/kubetap-raw:latest";
pub const DEFAULT_IMAGE_GRPC: &str = "gcr.io/soluble-oss/kubetap-grpc:latest";

/// Default command arguments handed to the proxy sidecar container.
pub const DEFAULT_COMMAND_ARGS: &str = "mitmweb";
