//! Bridges listener connections to the rotation: commands in, events out.

use axum::extract::ws::{Message, WebSocket};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::{
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use crate::events::{Broadcaster, ClientCommand, RadioEvent};
use crate::rotation::RotationEngine;

/// What happens to the rotation when a listener disconnects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DisconnectPolicy {
    /// Any single disconnect stops the rotation for everyone.
    #[default]
    StopOnAny,
    /// Stop only once no listeners remain.
    StopOnLast,
}

impl FromStr for DisconnectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(Self::StopOnAny),
            "last" => Ok(Self::StopOnLast),
            other => Err(format!("expected \"any\" or \"last\", got {:?}", other)),
        }
    }
}

#[derive(Clone)]
pub struct RadioChannel {
    engine: Arc<RotationEngine>,
    broadcaster: Broadcaster,
    // Held across the disconnect stop.
    listeners: Arc<Mutex<usize>>,
    policy: DisconnectPolicy,
}

impl RadioChannel {
    pub fn new(engine: Arc<RotationEngine>, broadcaster: Broadcaster, policy: DisconnectPolicy) -> Self {
        Self {
            engine,
            broadcaster,
            listeners: Arc::new(Mutex::new(0)),
            policy,
        }
    }

    /// Registers a new connection. Nothing is sent to it until the next event.
    pub fn connect(&self) -> Listener {
        let rx = self.broadcaster.subscribe();
        let mut listeners = self.lock_listeners();
        *listeners += 1;
        info!("Listener connected (total: {})", *listeners);
        drop(listeners);
        Listener {
            channel: self.clone(),
            rx,
        }
    }

    pub fn listener_count(&self) -> usize {
        *self.lock_listeners()
    }

    fn lock_listeners(&self) -> MutexGuard<'_, usize> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn engine(&self) -> &Arc<RotationEngine> {
        &self.engine
    }
}

/// One connected listener. Dropping it counts as a disconnect.
pub struct Listener {
    channel: RadioChannel,
    rx: broadcast::Receiver<RadioEvent>,
}

impl Listener {
    /// Runs a command and returns the reply meant for this listener only.
    pub fn handle(&self, command: ClientCommand) -> RadioEvent {
        let engine = &self.channel.engine;
        match command {
            ClientCommand::Start => engine.start(),
            ClientCommand::Stop => engine.stop(),
            ClientCommand::GetStatus => {}
        }
        RadioEvent::Status(engine.status())
    }

    /// Next fanned-out event, or `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<RadioEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Listener lagged behind, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let mut listeners = self.channel.lock_listeners();
        *listeners -= 1;
        info!("Listener disconnected (remaining: {})", *listeners);

        match self.channel.policy {
            DisconnectPolicy::StopOnAny => self.channel.engine.stop(),
            DisconnectPolicy::StopOnLast if *listeners == 0 => self.channel.engine.stop(),
            DisconnectPolicy::StopOnLast => {}
        }
    }
}

/// Drives one websocket until either side goes away.
pub async fn serve_socket(socket: WebSocket, channel: RadioChannel) {
    let mut listener = channel.connect();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientCommand>(&text) {
                        Ok(command) => {
                            debug!("Received {:?}", command);
                            let reply = listener.handle(command);
                            if let Err(e) = send_event(&mut sender, &reply).await {
                                warn!("Failed to reply to listener: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring unrecognised frame {:?}: {}", text, e),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    break;
                }
            },
            event = listener.recv() => match event {
                Some(event) => {
                    if let Err(e) = send_event(&mut sender, &event).await {
                        warn!("Failed to forward event: {}", e);
                        break;
                    }
                }
                None => {
                    error!("Radio broadcaster closed");
                    break;
                }
            },
        }
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &RadioEvent) -> anyhow::Result<()> {
    let json = serde_json::to_string(event)?;
    sender.send(Message::Text(json)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::rotation::RotationSettings;

    async fn channel_with(policy: DisconnectPolicy) -> RadioChannel {
        let broadcaster = Broadcaster::new(64);
        let engine = RotationEngine::new(
            Arc::new(StaticCatalog::with_audio(["a", "b", "c"])),
            broadcaster.clone(),
            RotationSettings::default(),
        );
        engine.load_pool().await;
        RadioChannel::new(engine, broadcaster, policy)
    }

    fn drain(listener: &mut Listener) -> Vec<RadioEvent> {
        let mut events = Vec::new();
        while let Ok(event) = listener.rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn lagging_listener_skips_to_newest_event() {
        let broadcaster = Broadcaster::new(1);
        let engine = RotationEngine::new(
            Arc::new(StaticCatalog::default()),
            broadcaster.clone(),
            RotationSettings::default(),
        );
        let channel = RadioChannel::new(engine, broadcaster.clone(), DisconnectPolicy::StopOnLast);
        let mut listener = channel.connect();

        for id in ["a", "b", "c"] {
            broadcaster.broadcast(RadioEvent::Track(id.to_string()));
        }

        assert_eq!(listener.recv().await, Some(RadioEvent::Track("c".to_string())));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn last_disconnect_does_not_stop_a_listener_that_just_started() {
        let channel = channel_with(DisconnectPolicy::StopOnLast).await;

        for _ in 0..200 {
            let leaving = channel.connect();
            let disconnect = tokio::task::spawn_blocking(move || drop(leaving));

            let joining = channel.connect();
            joining.handle(ClientCommand::Start);
            disconnect.await.unwrap();

            assert!(channel.engine().status());
            assert_eq!(channel.listener_count(), 1);

            drop(joining);
            assert!(!channel.engine().status());
        }
    }

    #[test]
    fn policy_parses_from_config_values() {
        assert_eq!("any".parse::<DisconnectPolicy>().unwrap(), DisconnectPolicy::StopOnAny);
        assert_eq!("LAST".parse::<DisconnectPolicy>().unwrap(), DisconnectPolicy::StopOnLast);
        assert!("sometimes".parse::<DisconnectPolicy>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn commands_reply_with_resulting_status() {
        let channel = channel_with(DisconnectPolicy::StopOnAny).await;
        let listener = channel.connect();

        assert_eq!(listener.handle(ClientCommand::GetStatus), RadioEvent::Status(false));
        assert_eq!(listener.handle(ClientCommand::Start), RadioEvent::Status(true));
        assert_eq!(listener.handle(ClientCommand::Start), RadioEvent::Status(true));
        assert_eq!(listener.handle(ClientCommand::GetStatus), RadioEvent::Status(true));
        assert_eq!(listener.handle(ClientCommand::Stop), RadioEvent::Status(false));
        assert!(!channel.engine().status());
    }

    #[tokio::test(start_paused = true)]
    async fn engine_events_fan_out_to_all_listeners() {
        let channel = channel_with(DisconnectPolicy::StopOnAny).await;
        let mut first = channel.connect();
        let mut second = channel.connect();

        first.handle(ClientCommand::Start);
        let seen_by_first = drain(&mut first);
        let seen_by_second = drain(&mut second);

        assert_eq!(seen_by_first, seen_by_second);
        assert_eq!(seen_by_first[0], RadioEvent::Status(true));
        assert!(matches!(seen_by_first[1], RadioEvent::Track(_)));

        // Status queries are answered directly, not fanned out.
        second.handle(ClientCommand::GetStatus);
        assert!(drain(&mut first).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn any_disconnect_stops_rotation_for_everyone() {
        let channel = channel_with(DisconnectPolicy::StopOnAny).await;
        let mut staying = channel.connect();
        let leaving = channel.connect();

        staying.handle(ClientCommand::Start);
        drain(&mut staying);
        assert_eq!(channel.listener_count(), 2);

        drop(leaving);
        assert_eq!(channel.listener_count(), 1);
        assert!(!channel.engine().status());
        assert_eq!(drain(&mut staying), vec![RadioEvent::Status(false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn last_disconnect_policy_waits_for_final_listener() {
        let channel = channel_with(DisconnectPolicy::StopOnLast).await;
        let first = channel.connect();
        let second = channel.connect();

        first.handle(ClientCommand::Start);
        drop(first);
        assert!(channel.engine().status());

        drop(second);
        assert!(!channel.engine().status());
        assert_eq!(channel.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn new_listener_gets_no_replay() {
        let channel = channel_with(DisconnectPolicy::StopOnLast).await;
        let starter = channel.connect();
        starter.handle(ClientCommand::Start);

        let mut late = channel.connect();
        assert!(drain(&mut late).is_empty());
        assert!(channel.engine().current_track().is_some());
    }
}
