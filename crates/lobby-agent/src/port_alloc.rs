use tokio::net::TcpListener;

/// Ask the OS for an ephemeral port on `host` and keep it reserved by
/// returning the bound listener alongside the port number.
pub async fn bind_ephemeral(host: &str) -> std::io::Result<(TcpListener, u16)> {
    let listener = TcpListener::bind((host, 0)).await?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}
