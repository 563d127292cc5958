use std::{ops::Add, sync::Arc, time::Duration};

use flume::Sender;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, trace};
use rand::Rng;
use tokio::{
    net::TcpStream,
    select,
    sync::mpsc,
    time::{self, Instant},
};
use tokio_util::codec::Framed;

use crate::{
    config::ServerConfig,
    error::{Error, Result},
    mc::{MinecraftCodec, Packet, PlayState},
    model::{ClientId, Vec3d},
    server::ClientEvent,
};

const PROTOCOL_VERSION: i32 = 47;

/// Network side of one connection. Logs the client in, then shuttles packets
/// between the socket and the main loop until either side goes away.
pub struct ClientHandler {
    msg_stream: Framed<TcpStream, MinecraftCodec>,
    events: Sender<ClientEvent>,
    config: Arc<ServerConfig>,
    id: Option<ClientId>,
}

impl ClientHandler {
    pub fn new(
        msg_stream: Framed<TcpStream, MinecraftCodec>,
        events: Sender<ClientEvent>,
        config: Arc<ServerConfig>,
    ) -> ClientHandler {
        ClientHandler {
            msg_stream,
            events,
            config,
            id: None,
        }
    }

    pub async fn loop_until_disconnect(mut self) {
        match self.login().await {
            Ok(Some(unicast_rx)) => {
                if let Err(e) = self.play(unicast_rx).await {
                    error!("Connection of {:?} failed: {}", self.id, e);
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Login failed: {}", e),
        }

        if let Some(id) = self.id {
            if self.events.send(ClientEvent::Left { id }).is_err() {
                trace!("Main loop gone before {} left", id);
            }
        }
        if let Err(e) = self.msg_stream.close().await {
            trace!("Closing connection failed: {}", e);
        }
    }

    /// Returns the receiver for packets from the main loop once the client is
    /// in the play state, or `None` if it never got there.
    async fn login(&mut self) -> Result<Option<mpsc::UnboundedReceiver<Packet>>> {
        while let Some(packet) = self.msg_stream.next().await {
            match packet? {
                Packet::C00Handshake {
                    protocol_version,
                    next_state,
                    ..
                } => match next_state {
                    PlayState::Login if protocol_version != PROTOCOL_VERSION => {
                        return Err(Error::Protocol(format!(
                            "unsupported protocol version {}",
                            protocol_version
                        )));
                    }
                    PlayState::Login => self.msg_stream.codec_mut().set_state(next_state),
                    _ => {
                        debug!("Not answering status request");
                        return Ok(None);
                    }
                },
                Packet::C00LoginStart { username } => {
                    let threshold = self.config.net_compression;
                    self.msg_stream
                        .send(Packet::S03LoginCompression {
                            threshold: threshold as i32,
                        })
                        .await?;
                    self.msg_stream
                        .codec_mut()
                        .set_compression_threshold(threshold);

                    let id = ClientId::offline(&username);
                    self.msg_stream
                        .send(Packet::S02LoginSuccess {
                            uuid: id.to_string(),
                            username: username.clone(),
                        })
                        .await?;
                    self.msg_stream.codec_mut().set_state(PlayState::Play);

                    let (tx, rx) = mpsc::unbounded_channel();
                    self.events
                        .send(ClientEvent::Joined {
                            id,
                            username: username.clone(),
                            tx,
                        })
                        .map_err(|_| Error::ServerGone)?;
                    self.id = Some(id);
                    info!("{} logged in as {}", username, id);
                    return Ok(Some(rx));
                }
                packet => trace!("Ignoring {:?} before login", packet),
            }
        }
        Ok(None)
    }

    async fn play(&mut self, mut unicast_rx: mpsc::UnboundedReceiver<Packet>) -> Result<()> {
        let period = Duration::from_secs(self.config.keep_alive_secs.max(1));
        let mut keep_alive_interval = time::interval_at(Instant::now().add(period), period);

        loop {
            select! {
                packet_in = self.msg_stream.next() => {
                    match packet_in {
                        Some(packet) => self.handle_packet(packet?)?,
                        None => break,
                    }
                },
                packet_out = unicast_rx.recv() => {
                    match packet_out {
                        Some(packet) => self.msg_stream.send(packet).await?,
                        None => break,
                    }
                }
                _ = keep_alive_interval.tick() => {
                    let id: i32 = rand::thread_rng().gen();
                    self.msg_stream.send(Packet::S00KeepAlive { id }).await?;
                }
            }
        }
        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<()> {
        let id = match self.id {
            Some(id) => id,
            None => return Ok(()),
        };

        match packet {
            Packet::C04PlayerPos { x, y, z, .. } | Packet::C06PlayerPosRot { x, y, z, .. } => {
                let position = Vec3d::new(x, y, z);
                self.events
                    .send(ClientEvent::Moved { id, position })
                    .map_err(|_| Error::ServerGone)?;
            }
            Packet::C00KeepAlive { .. } => {}
            packet => trace!("Received unhandled packet: {:?}", packet),
        }
        Ok(())
    }
}
