use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use satcat_core::realtime::{self_channel, PeerTextMessage, PresenceMessage, RealtimeEvent};
use tracing::{debug, info, warn};

use super::auth::Owner;
use super::AppState;

pub async fn messaging(Owner(owner): Owner, State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session(socket, owner, state))
}

async fn presence(state: &AppState, channel: &str, owner: &str, online: bool) {
    let event = RealtimeEvent::Presence(PresenceMessage {
        owner: owner.to_string(),
        online,
        time: Utc::now(),
    });
    state.bus.publish(channel, event).await;
}

/// Forwards the owner's channel to the socket and relays inbound text back
/// onto it until either side closes.
async fn session(socket: WebSocket, owner: String, state: Arc<AppState>) {
    let channel = self_channel(&owner);
    let mut subscription = state.bus.subscribe(&channel).await;
    let subscriber = subscription.id();
    info!(owner = %owner, subscriber = %subscriber, "websocket connected");
    presence(&state, &channel, &owner, true).await;

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(owner = %owner, error = %err, "failed to encode realtime event");
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let event = RealtimeEvent::PeerText(PeerTextMessage {
                            from: owner.clone(),
                            text: text.to_string(),
                            time: Utc::now(),
                        });
                        state.bus.publish(&channel, event).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(owner = %owner, error = %err, "websocket receive failed");
                        break;
                    }
                }
            }
        }
    }

    state.bus.unsubscribe(&channel, subscriber).await;
    presence(&state, &channel, &owner, false).await;
    info!(owner = %owner, subscriber = %subscriber, "websocket disconnected");
}
