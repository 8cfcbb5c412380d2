//! Bridges local TCP connections to ports on the tapped Pod.

mod error;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use snafu::{IntoError, ResultExt};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

pub use self::error::Error;

/// Forwards one local port to one port on a Pod until shut down.
pub struct PortForwarder {
    api: Api<Pod>,
    pod_name: String,
    local_addr: SocketAddr,
    remote_port: u16,
}

impl PortForwarder {
    pub fn new(
        api: Api<Pod>,
        pod_name: impl Into<String>,
        local_port: u16,
        remote_port: u16,
    ) -> Self {
        Self {
            api,
            pod_name: pod_name.into(),
            local_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local_port),
            remote_port,
        }
    }

    /// Accepts local connections and bridges each to a fresh pod stream,
    /// until `shutdown_signal` resolves. Active connections are drained
    /// before returning.
    pub async fn run(
        self,
        shutdown_signal: impl Future<Output = ()> + Send + Unpin + 'static,
    ) -> Result<(), Error> {
        let Self { api, pod_name, local_addr, remote_port } = self;

        let listener = TcpListener::bind(&local_addr)
            .await
            .with_context(|_| error::BindTcpSocketSnafu { socket_address: local_addr })?;

        tracing::info!("Forwarding from: {local_addr} -> {pod_name}:{remote_port}");

        let cancel_token = CancellationToken::new();
        let mut connections = JoinSet::<Result<(), Error>>::new();

        let _watcher = connections.spawn({
            let cancel_token = cancel_token.clone();
            async move {
                shutdown_signal.await;
                cancel_token.cancel();
                Ok(())
            }
        });

        loop {
            let accepted = tokio::select! {
                () = cancel_token.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let _connection = connections.spawn(bridge(
                        api.clone(),
                        pod_name.clone(),
                        remote_port,
                        stream,
                        peer,
                        cancel_token.clone(),
                    ));
                }
                Err(source) => {
                    cancel_token.cancel();
                    return Err(error::AcceptTcpSocketSnafu { socket_address: local_addr }
                        .into_error(source));
                }
            }
        }

        while let Some(joined) = connections.join_next().await {
            if let Ok(Err(err)) = joined {
                tracing::warn!("connection closed with error: {err}");
            }
        }
        Ok(())
    }
}

/// Copies bytes both ways between a local connection and a pod stream.
async fn bridge(
    api: Api<Pod>,
    pod_name: String,
    remote_port: u16,
    mut local_stream: TcpStream,
    peer: SocketAddr,
    cancel_token: CancellationToken,
) -> Result<(), Error> {
    let mut forwarder = api.portforward(&pod_name, &[remote_port]).await.with_context(|_| {
        error::CreatePodStreamSnafu { pod_name: pod_name.clone(), remote_port }
    })?;
    let Some(mut pod_stream) = forwarder.take_stream(remote_port) else {
        return Ok(());
    };

    tracing::debug!("bridging connection: {peer} <-> {pod_name}:{remote_port}");

    tokio::select! {
        () = cancel_token.cancelled() => {
            tracing::debug!("closing connection {peer} due to shutdown");
        }
        copied = tokio::io::copy_bidirectional(&mut local_stream, &mut pod_stream) => {
            if let Err(err) = copied {
                tracing::debug!("connection {peer} closed with error: {err}");
            }
        }
    }
    Ok(())
}
