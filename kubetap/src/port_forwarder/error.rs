use std::net::SocketAddr;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to bind TCP socket {socket_address}, error: {source}"))]
    BindTcpSocket { socket_address: SocketAddr, source: std::io::Error },

    #[snafu(display("Failed to accept TCP connection on {socket_address}, error: {source}"))]
    AcceptTcpSocket { socket_address: SocketAddr, source: std::io::Error },

    #[snafu(display("Failed to create pod stream to {pod_name}:{remote_port}, error: {source}"))]
    CreatePodStream {
        pod_name: String,
        remote_port: u16,
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },
}
