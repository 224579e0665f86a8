use std::{env, io};

use log::info;
use tokio::{net::TcpListener, signal};

const DEFAULT_HOST: &str = "127.0.0.1";

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let addr = format!(
        "{}:{}",
        env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
        env::var("PORT").map_err(io::Error::other)?,
    );

    let listener = TcpListener::bind(&addr).await?;
    info!("listening at {addr}");

    let (stream, peer) = listener.accept().await?;
    let ip = stream.local_addr()?.ip();
    let (rx, tx) = stream.into_split();
    info!("launcher connected from {peer}");

    tokio::select! {
        ret = worker::serve(rx, tx, ip) => {
            ret?;
            info!("wrapping up, disconnecting...");
        }
        _ = signal::ctrl_c() => {
            info!("received SIGINT");
        }
    }

    Ok(())
}
