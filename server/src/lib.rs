pub mod config;
pub mod cors;
pub mod health;
pub mod logic;
pub mod roster;
pub mod routes;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use derive_more::{Display, Error, From};
use rocket::{Build, Ignite, Rocket, Shutdown, figment::Figment, routes};
use tokio::{
    net::{TcpListener, UdpSocket},
    task::JoinHandle,
};
use tracing::{info, warn};

use minesweeper_common::session::Session;

use crate::{
    config::LobbyConfig,
    cors::create_cors,
    logic::{Lobby, SharedLobby},
    routes::{health_check, socket, socket_status, status},
};

#[derive(Debug, Display, Error, From)]
pub enum ServerError {
    #[display("invalid lobby configuration: {_0}")]
    Config(rocket::figment::Error),
    #[display("invalid CORS configuration: {_0}")]
    Cors(rocket_cors::Error),
    #[display("no free port in {first}..={last}")]
    #[from(ignore)]
    NoFreePort { first: u16, last: u16 },
    #[display("server failed: {reason}")]
    #[from(ignore)]
    Launch { reason: String },
    #[display("lobby at {url} never became reachable after {attempts} attempts")]
    #[from(ignore)]
    Unreachable { url: String, attempts: u32 },
    #[display("server task failed: {_0}")]
    Task(tokio::task::JoinError),
}

impl ServerError {
    fn launch(error: rocket::Error) -> Self {
        Self::Launch {
            reason: error.to_string(),
        }
    }
}

/// First bindable port in `port..=port + retries`.
pub async fn reserve_port(address: IpAddr, port: u16, retries: u16) -> Result<u16, ServerError> {
    let last = port.saturating_add(retries);

    for candidate in port..=last {
        match TcpListener::bind((address, candidate)).await {
            Ok(listener) => {
                let bound = listener.local_addr().map_or(candidate, |addr| addr.port());
                return Ok(bound);
            }
            Err(e) => warn!("Port {} unavailable: {}", candidate, e),
        }
    }

    Err(ServerError::NoFreePort { first: port, last })
}

/// Address other players can dial. A wildcard bind is resolved to the
/// interface that routes towards the local network, or loopback if none does.
pub async fn shareable_host(address: IpAddr) -> IpAddr {
    if !address.is_unspecified() {
        return address;
    }

    match outbound_interface().await {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            warn!("Could not resolve the local network address: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

// Connecting a UDP socket only picks a route, nothing is sent
async fn outbound_interface() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect((Ipv4Addr::new(192, 168, 0, 0), 80)).await?;
    Ok(socket.local_addr()?.ip())
}

pub fn build_rocket(
    config: &LobbyConfig,
    lobby: SharedLobby,
    figment: Figment,
) -> Result<Rocket<Build>, ServerError> {
    Ok(rocket::custom(figment)
        .attach(create_cors(config)?)
        .manage(lobby)
        .mount("/", routes![status, socket_status, health_check, socket]))
}

/// A running lobby server.
pub struct ServerHandle {
    address: IpAddr,
    host: IpAddr,
    port: u16,
    lobby: SharedLobby,
    shutdown: Shutdown,
    server: JoinHandle<Result<Rocket<Ignite>, rocket::Error>>,
}

impl ServerHandle {
    /// Address other players should use to reach this lobby.
    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn bind_address(&self) -> IpAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", SocketAddr::new(self.host, self.port))
    }

    pub fn lobby(&self) -> &SharedLobby {
        &self.lobby
    }

    pub fn disable_join(&self) {
        self.lobby.disable_join();
    }

    /// Close every peer and stop the server.
    pub async fn close(self) -> Result<(), ServerError> {
        info!("Closing lobby on port {}", self.port);
        self.lobby.close().await;
        self.shutdown.clone().notify();
        self.wait().await
    }

    /// Run until the server stops, either through `close` or because the host left.
    pub async fn wait(self) -> Result<(), ServerError> {
        match self.server.await? {
            Ok(_) => Ok(()),
            Err(e) => Err(ServerError::launch(e)),
        }
    }
}

/// Open a lobby with settings from Rocket's configuration sources.
pub async fn open(config: LobbyConfig) -> Result<ServerHandle, ServerError> {
    open_with(config, rocket::Config::figment(), Session::new()).await
}

/// Bind, launch and wait until the lobby answers its status endpoint.
pub async fn open_with(
    config: LobbyConfig,
    figment: Figment,
    session: Session,
) -> Result<ServerHandle, ServerError> {
    let port = reserve_port(config.address, config.port, config.port_retries).await?;
    let figment = figment
        .merge(("address", config.address))
        .merge(("port", port));

    let lobby = Lobby::start(config.clone(), session);
    let rocket = build_rocket(&config, lobby.clone(), figment)?
        .ignite()
        .await
        .map_err(ServerError::launch)?;
    let shutdown = rocket.shutdown();
    let server = tokio::spawn(rocket.launch());

    let host = shareable_host(config.address).await;
    let url = format!("http://{}/socket/status", SocketAddr::new(host, port));
    if let Err(e) = health::wait_until_healthy(&url).await {
        lobby.close().await;
        shutdown.notify();
        return Err(e);
    }

    let watcher_lobby = lobby.clone();
    let watcher_shutdown = shutdown.clone();
    tokio::spawn(async move {
        watcher_lobby.wait_closed().await;
        watcher_lobby.close().await;
        watcher_shutdown.notify();
    });

    info!("Lobby listening on {}:{}, reachable at {}", config.address, port, host);
    Ok(ServerHandle {
        address: config.address,
        host,
        port,
        lobby,
        shutdown,
        server,
    })
}
