//! Redis pub/sub transport
//!
//! Publishing goes through a multiplexed [`ConnectionManager`]; subscriptions
//! live on a dedicated pub/sub connection owned by a background driver task.
//! The driver is the only place that touches the pub/sub connection, so
//! subscribe and unsubscribe requests are sent to it as commands and
//! acknowledged over a oneshot channel. A failed Redis command therefore
//! surfaces synchronously to the caller, which needs that to roll back its own
//! bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, ConnectionManagerConfig, PubSub};
use redis::{AsyncCommands, Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::config::RedisConfig;
use crate::error::{CacheError, CacheResult};
use crate::transport::{MessageHandler, MessageTransport};

enum Command {
    Subscribe {
        topic: String,
        handler: Arc<dyn MessageHandler>,
        ack: oneshot::Sender<CacheResult<()>>,
    },
    Unsubscribe {
        topic: String,
        handler: Arc<dyn MessageHandler>,
        ack: oneshot::Sender<CacheResult<()>>,
    },
}

/// [`MessageTransport`] carried over Redis pub/sub channels.
pub struct RedisTransport {
    publisher: ConnectionManager,
    commands: mpsc::UnboundedSender<Command>,
}

impl RedisTransport {
    /// Opens the publisher connection and the pub/sub driver against the
    /// configured server.
    pub async fn connect(config: &RedisConfig) -> CacheResult<Self> {
        let client = Client::open(connection_info(config))?;

        let mut manager_config =
            ConnectionManagerConfig::new().set_connection_timeout(config.connect_timeout);
        if let Some(timeout) = config.response_timeout {
            manager_config = manager_config.set_response_timeout(timeout);
        }
        let publisher =
            ConnectionManager::new_with_config(client.clone(), manager_config).await?;

        let pubsub = client.get_async_pubsub().await?;
        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(drive(pubsub, receiver));

        Ok(Self { publisher, commands })
    }

    async fn send_command(
        &self,
        build: impl FnOnce(oneshot::Sender<CacheResult<()>>) -> Command,
    ) -> CacheResult<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(build(ack))
            .map_err(|_| CacheError::Transport("pub/sub driver is not running".to_owned()))?;
        done.await
            .map_err(|_| CacheError::Transport("pub/sub driver dropped the request".to_owned()))?
    }
}

#[async_trait]
impl MessageTransport for RedisTransport {
    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> CacheResult<()> {
        self.send_command(|ack| Command::Subscribe {
            topic: topic.to_owned(),
            handler,
            ack,
        })
        .await
    }

    async fn unsubscribe(
        &self,
        topic: &str,
        handler: &Arc<dyn MessageHandler>,
    ) -> CacheResult<()> {
        let handler = Arc::clone(handler);
        self.send_command(|ack| Command::Unsubscribe {
            topic: topic.to_owned(),
            handler,
            ack,
        })
        .await
    }

    async fn publish(&self, topic: &str, payload: &str) -> CacheResult<()> {
        let mut conn = self.publisher.clone();
        conn.publish::<_, _, ()>(topic, payload).await?;
        Ok(())
    }
}

fn connection_info(config: &RedisConfig) -> ConnectionInfo {
    ConnectionInfo {
        addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
        redis: RedisConnectionInfo {
            db: config.database,
            username: config.username.clone(),
            password: config.password.clone(),
            ..Default::default()
        },
    }
}

enum Step {
    Message { channel: String, payload: Vec<u8> },
    Command(Command),
    StreamClosed,
    CommandsClosed,
}

/// Owns the pub/sub connection: applies subscription commands and fans
/// incoming messages out to the handlers registered for their channel.
async fn drive(mut pubsub: PubSub, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut handlers: HashMap<String, Vec<Arc<dyn MessageHandler>>> = HashMap::new();

    loop {
        // `on_message` borrows the connection, so resolve the next step inside
        // this block and let the stream drop before any subscribe/unsubscribe
        // command runs against `pubsub`.
        let step = {
            let mut stream = pubsub.on_message();
            tokio::select! {
                message = stream.next() => match message {
                    Some(message) => Step::Message {
                        channel: message.get_channel_name().to_owned(),
                        payload: message.get_payload_bytes().to_vec(),
                    },
                    None => Step::StreamClosed,
                },
                command = commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => Step::CommandsClosed,
                },
            }
        };

        match step {
            Step::Message { channel, payload } => {
                if let Some(listeners) = handlers.get(&channel) {
                    for handler in listeners {
                        handler.on_message(&channel, &payload).await;
                    }
                }
            }
            Step::Command(Command::Subscribe { topic, handler, ack }) => {
                let result = if let Some(existing) = handlers.get_mut(&topic) {
                    existing.push(handler);
                    Ok(())
                } else {
                    // Redis first: a refused subscribe leaves no local state.
                    match pubsub.subscribe(&topic).await {
                        Ok(()) => {
                            debug!("subscribed to Redis channel {}", topic);
                            handlers.insert(topic, vec![handler]);
                            Ok(())
                        }
                        Err(err) => Err(CacheError::Redis(err)),
                    }
                };
                let _ = ack.send(result);
            }
            Step::Command(Command::Unsubscribe { topic, handler, ack }) => {
                let remaining = handlers.get(&topic).map(|listeners| {
                    listeners
                        .iter()
                        .filter(|subscribed| !Arc::ptr_eq(subscribed, &handler))
                        .count()
                });
                let result = match remaining {
                    None => Ok(()),
                    Some(0) => match pubsub.unsubscribe(&topic).await {
                        Ok(()) => {
                            debug!("unsubscribed from Redis channel {}", topic);
                            handlers.remove(&topic);
                            Ok(())
                        }
                        Err(err) => Err(CacheError::Redis(err)),
                    },
                    Some(_) => {
                        if let Some(listeners) = handlers.get_mut(&topic) {
                            listeners.retain(|subscribed| !Arc::ptr_eq(subscribed, &handler));
                        }
                        Ok(())
                    }
                };
                let _ = ack.send(result);
            }
            Step::StreamClosed => {
                error!("Redis pub/sub connection closed, invalidation delivery stopped");
                break;
            }
            Step::CommandsClosed => {
                debug!("transport dropped, stopping pub/sub driver");
                break;
            }
        }
    }
}
