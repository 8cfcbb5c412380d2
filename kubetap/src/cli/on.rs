use std::time::Duration;

use clap::Args;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Pod};
use kube::Api;
use kubetap_base::consts;
use sigfinn::{ExitStatus, LifecycleManager};
use snafu::ResultExt;

use crate::{
    cli::{
        error::{self, Error},
        off::default_namespace,
    },
    config::Config,
    port_forwarder::PortForwarder,
    proxy::Protocol,
    readiness,
    tap::{self, TapOptions, TappedTarget},
};

/// Local/remote port pairs used by the interactive flow; the remote side
/// mirrors the fixed proxy ports.
const WEB_PORT_PAIR: (u16, u16) = (2244, 2244);
const SERVICE_PORT_PAIR: (u16, u16) = (4000, 7777);

#[derive(Args, Clone)]
pub struct OnCommand {
    #[arg(help = "Name of the Service to tap")]
    pub service: String,

    #[arg(
        short,
        long,
        help = "Kubernetes namespace of the target Service. Defaults to \"default\"."
    )]
    pub namespace: Option<String>,

    #[arg(short = 'p', long = "port", help = "Target Service port")]
    pub port: i32,

    #[arg(long = "https", help = "Enable if the target listener uses HTTPS")]
    pub https: bool,

    #[arg(
        short = 'i',
        long = "image",
        help = "Image to run in the proxy container. Defaults to the configured proxy image."
    )]
    pub image: Option<String>,

    #[arg(
        long = "command-args",
        help = "Command arguments for the proxy sidecar container. Defaults to the configured \
                arguments."
    )]
    pub command_args: Option<String>,

    #[arg(
        long = "port-forward",
        help = "Automatically port-forward to the Service and the proxy web interface"
    )]
    pub port_forward: bool,

    #[arg(
        long = "browser",
        help = "Open browser windows to the Service and the proxy web interface. Implies \
                --port-forward."
    )]
    pub browser: bool,

    #[arg(
        long = "protocol",
        default_value = "http",
        help = "Protocol of the target Service. Supported protocols: [ http ]"
    )]
    pub protocol: Protocol,
}

impl OnCommand {
    pub async fn run(self, kube_client: kube::Client, config: Config) -> Result<(), Error> {
        let Self {
            service,
            namespace,
            port,
            https,
            image,
            command_args,
            port_forward,
            browser,
            protocol,
        } = self;
        let port_forward = port_forward || browser;
        let namespace =
            namespace.filter(|namespace| !namespace.is_empty()).unwrap_or_else(default_namespace);
        let image = image
            .filter(|image| !image.is_empty())
            .unwrap_or_else(|| default_image(protocol, &config));
        let command_args = command_args
            .unwrap_or(config.command_args)
            .split_whitespace()
            .map(ToString::to_string)
            .collect();

        let options = TapOptions {
            service: service.clone(),
            port,
            namespace: namespace.clone(),
            https,
            image,
            command_args,
            protocol,
        };
        let target = tap::tap(&kube_client, &options).await.map_err(Error::from)?;
        tracing::debug!("Service {service} is backed by Deployment {}", target.deployment_name);

        if !port_forward {
            println!();
            println!("Port {port} of Service {service:?} has been tapped!");
            println!();
            println!("You can access the proxy web interface at http://127.0.0.1:2244");
            println!("after running the following command:");
            println!();
            println!("  kubectl port-forward svc/{service} -n {namespace} 2244:2244");
            println!();
            println!("If the Service is not publicly exposed through an Ingress,");
            println!("you can access it with the following command:");
            println!();
            println!("  kubectl port-forward svc/{service} -n {namespace} 4000:{port}");
            println!();
            println!(
                "In the future, you can run with --port-forward or --browser to automate this \
                 process."
            );
            return Ok(());
        }

        interactive(kube_client, &service, &namespace, https, browser, &target).await
    }
}

/// The interactive phase: wait for the proxy Pod to become ready, then keep
/// port-forward tunnels open until interrupted. An interrupt reverts the
/// tap before exiting; a readiness timeout leaves it committed.
async fn interactive(
    kube_client: kube::Client,
    service: &str,
    namespace: &str,
    https: bool,
    browser: bool,
    target: &TappedTarget,
) -> Result<(), Error> {
    println!("Establishing port-forward tunnels to Service...");

    let pods = Api::<Pod>::namespaced(kube_client.clone(), namespace);
    let deployments = Api::<Deployment>::namespaced(kube_client.clone(), namespace);

    let pod = tokio::select! {
        waited = readiness::wait_for_tapped_pod(&pods, &deployments, namespace, &target.selectors) => {
            waited.map_err(Error::from)?
        }
        interrupt = tokio::signal::ctrl_c() => {
            interrupt.context(error::InterruptSignalSnafu)?;
            println!();
            println!("Stopping kubetap...");
            tap::untap(&kube_client, service, namespace).await.map_err(Error::from)?;
            return Ok(());
        }
    };
    let pod_name = pod.metadata.name.clone().unwrap_or_default();

    let lifecycle_manager = LifecycleManager::<Error>::new();
    for (local_port, remote_port) in [WEB_PORT_PAIR, SERVICE_PORT_PAIR] {
        let forwarder = PortForwarder::new(pods.clone(), pod_name.clone(), local_port, remote_port);
        let worker_name = format!("forwarder-{local_port}/{pod_name}:{remote_port}");
        let create_fn = move |shutdown_signal| async move {
            match forwarder.run(shutdown_signal).await {
                Ok(()) => ExitStatus::Success,
                Err(err) => ExitStatus::Error(Error::from(err)),
            }
        };
        let _handle = lifecycle_manager.spawn(worker_name, create_fn);
    }

    let (web_local, _) = WEB_PORT_PAIR;
    let (service_local, _) = SERVICE_PORT_PAIR;
    let scheme = if https { "https" } else { "http" };
    println!();
    println!("Port-Forwards:");
    println!();
    println!("  {} - http://127.0.0.1:{web_local}", target.proxy_name);
    println!("  {service} - {scheme}://127.0.0.1:{service_local}");
    println!();
    println!("Use Ctrl+C to stop.");

    if browser {
        let _browser_task = tokio::spawn(async move {
            // Give the forwarders a moment to come up.
            tokio::time::sleep(Duration::from_secs(2)).await;
            for url in
                [format!("http://127.0.0.1:{web_local}"), format!("{scheme}://127.0.0.1:{service_local}")]
            {
                if let Err(err) = webbrowser::open(&url) {
                    tracing::warn!("failed to open browser for {url}: {err}");
                }
            }
        });
    }

    match lifecycle_manager.serve().await {
        Ok(Err(err)) => {
            // A broken forwarder is not a broken tap; leave the tap active.
            tracing::error!("{err}");
            Err(err)
        }
        _ => {
            println!();
            println!("Stopping kubetap...");
            tap::untap(&kube_client, service, namespace).await.map_err(Error::from)
        }
    }
}

fn default_image(protocol: Protocol, config: &Config) -> String {
    match protocol {
        Protocol::Http => config.proxy_image.clone(),
        Protocol::Tcp | Protocol::Udp => consts::DEFAULT_IMAGE_RAW.to_string(),
        Protocol::Grpc => consts::DEFAULT_IMAGE_GRPC.to_string(),
    }
}
