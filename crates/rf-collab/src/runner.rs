//! Session runner
//!
//! One task owns the [`SyncCoordinator`]. Relay events, local intents and
//! batcher deadlines are serialized through a single select loop, so no
//! handler ever runs concurrently with another.

use rf_connector::{RelayEvent, Transport};
use std::future::Future;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::{SessionEvent, SessionIdentity, SyncCoordinator};

/// Local edit run on the session task
pub type Intent = Box<dyn FnOnce(&mut SyncCoordinator) + Send>;

/// Box a closure as an [`Intent`]
pub fn intent(f: impl FnOnce(&mut SyncCoordinator) + Send + 'static) -> Intent {
    Box::new(f)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

fn log_session_event(event: &SessionEvent) {
    match event {
        SessionEvent::SnapshotApplied { tracks, solicited } => {
            log::info!("[Session] Room state loaded: {} tracks (requested: {})", tracks, solicited)
        }
        SessionEvent::FullStateApplied => log::info!("[Session] Remote undo/redo applied"),
        SessionEvent::ProjectLoaded { by } => match by {
            Some(user_id) => log::info!("[Session] Project loaded by {}", user_id),
            None => log::info!("[Session] Project loaded"),
        },
        SessionEvent::UserJoined { username, .. } => log::info!("[Session] {} is here", username),
        SessionEvent::UserLeft { user_id, released } => {
            log::info!("[Session] {} is gone ({} leases freed)", user_id, released.len())
        }
        SessionEvent::LockConflict {
            element_id,
            locked_by,
        } => match locked_by {
            Some(holder) => {
                log::warn!("[Session] {} is held by {}", element_id, holder.username())
            }
            None => log::warn!("[Session] Lost the race for {}", element_id),
        },
    }
}

/// Drive a session until `shutdown` resolves or the relay is gone for good.
///
/// Every `Connected` (re)binds the coordinator, announces us and asks for
/// the room state. On exit queued edits are flushed when the shutdown was
/// local, then the session is torn down. The coordinator is handed back.
pub async fn run_session<T, F>(
    mut coordinator: SyncCoordinator,
    identity: SessionIdentity,
    transport: T,
    mut relay_events: mpsc::UnboundedReceiver<RelayEvent>,
    mut intents: mpsc::UnboundedReceiver<Intent>,
    shutdown: F,
) -> SyncCoordinator
where
    T: Transport + Clone + 'static,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut intents_open = true;
    let mut relay_alive = true;

    loop {
        let deadline = coordinator.next_deadline();

        tokio::select! {
            _ = &mut shutdown => {
                log::info!("[Session] Shutting down");
                break;
            }

            event = relay_events.recv() => match event {
                Some(RelayEvent::Connected) => {
                    coordinator.initialize(
                        Box::new(transport.clone()),
                        identity.room_id.clone(),
                        identity.user_id.clone(),
                        identity.username.clone(),
                    );
                    coordinator.join_room();
                    coordinator.request_snapshot();
                }
                Some(RelayEvent::Message(envelope)) => {
                    coordinator.handle_inbound(envelope);
                }
                Some(RelayEvent::Disconnected { reconnecting: true }) => {
                    log::warn!("[Session] Relay lost, waiting to reconnect");
                }
                Some(RelayEvent::Disconnected { reconnecting: false }) | None => {
                    log::warn!("[Session] Relay gone");
                    relay_alive = false;
                    break;
                }
            },

            intent = intents.recv(), if intents_open => match intent {
                Some(intent) => intent(&mut coordinator),
                None => intents_open = false,
            },

            _ = sleep_until(deadline), if deadline.is_some() => {
                coordinator.tick();
            }
        }

        for event in coordinator.take_events() {
            log_session_event(&event);
        }
    }

    if relay_alive {
        coordinator.flush_all();
    }
    coordinator.cleanup();
    coordinator
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BatchIntervals;
    use parking_lot::Mutex;
    use rf_connector::{ClientEvent, ConnectorError, InboundEnvelope, OutboundEnvelope, ServerEvent};
    use rf_core::{RoomId, Track, TrackId, TrackUpdate, UserId};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<ClientEvent>>>);

    impl Transport for Sink {
        fn emit(&mut self, envelope: OutboundEnvelope) -> Result<(), ConnectorError> {
            self.0.lock().push(envelope.event);
            Ok(())
        }
    }

    fn identity() -> SessionIdentity {
        SessionIdentity::new(RoomId::new("room"), UserId::new("me"), "Me")
    }

    #[tokio::test]
    async fn test_connect_joins_and_requests_state() {
        let sink = Sink::default();
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let (_intent_tx, intent_rx) = mpsc::unbounded_channel();

        relay_tx.send(RelayEvent::Connected).unwrap();
        relay_tx
            .send(RelayEvent::Disconnected {
                reconnecting: false,
            })
            .unwrap();

        let coordinator = run_session(
            SyncCoordinator::new(&BatchIntervals::default()),
            identity(),
            sink.clone(),
            relay_rx,
            intent_rx,
            std::future::pending(),
        )
        .await;

        assert!(!coordinator.is_initialized());
        assert_eq!(
            *sink.0.lock(),
            vec![
                ClientEvent::JoinRoom {
                    username: "Me".into()
                },
                ClientEvent::RequestState,
            ]
        );
    }

    #[tokio::test]
    async fn test_intents_and_inbound_share_one_task() {
        let sink = Sink::default();
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        relay_tx.send(RelayEvent::Connected).unwrap();
        relay_tx
            .send(RelayEvent::Message(InboundEnvelope::from_user(
                "u2",
                ServerEvent::TrackAdded {
                    track: Track::audio(TrackId::new("T1"), "Drums"),
                },
            )))
            .unwrap();

        let task = tokio::spawn(run_session(
            SyncCoordinator::new(&BatchIntervals::default()),
            identity(),
            sink.clone(),
            relay_rx,
            intent_rx,
            async {
                let _ = stop_rx.await;
            },
        ));

        // Let the session task drain the queued relay events
        tokio::task::yield_now().await;

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        intent_tx
            .send(intent(move |sync| {
                let id = TrackId::new("T1");
                let applied = sync.edit_track_properties(&id, TrackUpdate::volume(0.4));
                let _ = done_tx.send(applied);
            }))
            .unwrap();
        assert!(done_rx.await.unwrap());

        stop_tx.send(()).unwrap();
        let coordinator = task.await.unwrap();

        let volume = coordinator.document().tracks.get(&TrackId::new("T1")).map(|t| t.volume);
        assert_eq!(volume, Some(0.4));

        // Graceful stop: pending update flushed, then the lease released
        let sent = sink.0.lock().clone();
        let update = sent
            .iter()
            .position(|e| matches!(e, ClientEvent::TrackUpdate { .. }))
            .unwrap();
        let release = sent
            .iter()
            .position(|e| matches!(e, ClientEvent::LockRelease { .. }))
            .unwrap();
        assert!(update < release);
    }
}
