//! Push transport.
//!
//! One task per connection. It forwards queued updates to the socket and
//! answers control messages inline, so replies and updates share one
//! ordered stream.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use super::AppState;
use crate::domain::normalize::parse_key;
use crate::infrastructure::broadcast::{ClientMessage, ServerMessage};

pub(super) async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let broadcaster = &state.broadcaster;
    let (client_id, mut updates) = broadcaster.register_client();

    let welcome = ServerMessage::Welcome {
        client_id: client_id.clone(),
    };
    if sender.send(Message::Text(welcome.to_text().into())).await.is_ok() {
        loop {
            let outgoing = tokio::select! {
                update = updates.recv() => match update {
                    Some(update) => update,
                    None => break,
                },
                frame = receiver.next() => match frame {
                    Some(Ok(Message::Text(text))) => handle_client_message(&state, &client_id, text.as_str()),
                    Some(Ok(Message::Binary(_))) => ServerMessage::error("binary frames are not supported"),
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                },
            };
            if sender.send(Message::Text(outgoing.to_text().into())).await.is_err() {
                break;
            }
        }
    }

    broadcaster.remove_client(&client_id);
}

fn handle_client_message(state: &AppState, client_id: &str, text: &str) -> ServerMessage {
    match ClientMessage::parse(text) {
        Ok(message) => reply(state, client_id, message),
        Err(reason) => {
            tracing::debug!(client_id = %client_id, reason = %reason, "Rejected client message");
            ServerMessage::error(reason)
        }
    }
}

fn reply(state: &AppState, client_id: &str, message: ClientMessage) -> ServerMessage {
    let broadcaster = &state.broadcaster;
    match message {
        ClientMessage::Subscribe { symbol, indicators } => match parse_key(&symbol) {
            Some(key) => {
                broadcaster.subscribe(client_id, &key, &indicators);
                ServerMessage::Subscribed {
                    symbol: key.to_string(),
                    indicators: broadcaster.indicator_filter(client_id),
                }
            }
            None => ServerMessage::error(format!("invalid symbol: {symbol}")),
        },
        ClientMessage::Unsubscribe { symbol: None } => {
            broadcaster.unsubscribe(client_id, None);
            ServerMessage::UnsubscribedAll
        }
        ClientMessage::Unsubscribe {
            symbol: Some(symbol),
        } => match parse_key(&symbol) {
            Some(key) => {
                broadcaster.unsubscribe(client_id, Some(&key));
                ServerMessage::Unsubscribed {
                    symbol: key.to_string(),
                }
            }
            None => ServerMessage::error(format!("invalid symbol: {symbol}")),
        },
        ClientMessage::Ping => ServerMessage::Pong {
            timestamp: chrono::Utc::now().timestamp_millis(),
        },
        ClientMessage::ListSymbols => ServerMessage::SymbolList {
            symbols: state.all_symbols().iter().map(ToString::to_string).collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::ProcessingPipeline;
    use crate::infrastructure::broadcast::SubscriptionBroadcaster;
    use crate::infrastructure::config::OrchestratorSettings;
    use crate::infrastructure::orchestrator::SessionOrchestrator;
    use std::sync::Arc;

    fn state() -> AppState {
        AppState::new(
            Arc::new(SubscriptionBroadcaster::new(
                Arc::new(ProcessingPipeline::default()),
                8,
            )),
            Arc::new(SessionOrchestrator::new(OrchestratorSettings::default(), None)),
        )
    }

    #[test]
    fn subscribe_normalizes_symbol() {
        let state = state();
        let (id, _rx) = state.broadcaster.register_client();

        let reply = handle_client_message(
            &state,
            &id,
            r#"{"type":"subscribe","symbol":"binance:btcusdt","indicators":["rsi"]}"#,
        );
        assert_eq!(
            reply,
            ServerMessage::Subscribed {
                symbol: "binance:BTCUSDT".to_string(),
                indicators: vec!["rsi".to_string()],
            }
        );
    }

    #[test]
    fn unsubscribe_without_symbol_clears_all() {
        let state = state();
        let (id, _rx) = state.broadcaster.register_client();
        handle_client_message(&state, &id, r#"{"type":"subscribe","symbol":"binance:BTCUSDT"}"#);

        let reply = handle_client_message(&state, &id, r#"{"type":"unsubscribe"}"#);
        assert_eq!(reply, ServerMessage::UnsubscribedAll);
        assert!(state.broadcaster.indicator_filter(&id).is_empty());
    }

    #[test]
    fn malformed_input_gets_error_reply() {
        let state = state();
        let reply = handle_client_message(&state, "x", "{nope");
        assert!(matches!(reply, ServerMessage::Error { .. }));

        let reply = handle_client_message(&state, "x", r#"{"type":"subscribe","symbol":":"}"#);
        assert!(matches!(reply, ServerMessage::Error { .. }));
    }

    #[test]
    fn ping_and_list_symbols() {
        let state = state();
        assert!(matches!(
            handle_client_message(&state, "x", r#"{"type":"ping"}"#),
            ServerMessage::Pong { .. }
        ));
        assert_eq!(
            handle_client_message(&state, "x", r#"{"type":"list_symbols"}"#),
            ServerMessage::SymbolList { symbols: vec![] }
        );
    }
}
