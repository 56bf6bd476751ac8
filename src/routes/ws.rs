//! WebSocket upgrade + session loop. One connection is one play session and owns
//! one round engine. Client messages become engine commands; engine events are
//! forwarded to the client as they happen.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::Difficulty;
use crate::engine::{EngineError, EngineEvent, EngineHandle};
use crate::player::Player;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "heartcount_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Per-connection state. The engine is spawned on the first `new_session`.
struct WsSession {
  state: Arc<AppState>,
  player: Player,
  engine: Option<EngineHandle>,
  events: Option<mpsc::UnboundedReceiver<EngineEvent>>,
}

impl WsSession {
  fn new(state: Arc<AppState>) -> Self {
    Self { state, player: Player::guest(), engine: None, events: None }
  }

  async fn next_event(&mut self) -> Option<EngineEvent> {
    match self.events.as_mut() {
      Some(rx) => rx.recv().await,
      None => std::future::pending().await,
    }
  }

  #[instrument(level = "info", skip(self), fields(player = %self.player.display_name))]
  async fn handle(&mut self, msg: ClientWsMessage) -> Option<ServerWsMessage> {
    match msg {
      ClientWsMessage::Ping => Some(ServerWsMessage::Pong),

      ClientWsMessage::Hello { name } => {
        if self.engine.is_some() {
          return Some(error_msg("name can only be set before the first session"));
        }
        self.player = match name {
          Some(n) => Player::named(&n),
          None => Player::guest(),
        };
        Some(ServerWsMessage::Welcome { player: self.player.clone() })
      }

      ClientWsMessage::NewSession { difficulty } => Some(self.new_session(difficulty).await),

      other => {
        let Some(engine) = self.engine.clone() else {
          return Some(error_msg("no session yet; send new_session first"));
        };
        self.command(&engine, other).await
      }
    }
  }

  async fn new_session(&mut self, difficulty: Difficulty) -> ServerWsMessage {
    let engine = match &self.engine {
      Some(engine) => {
        if let Err(e) = engine.new_session(difficulty).await {
          return error_msg(&e.to_string());
        }
        engine.clone()
      }
      None => {
        let (engine, events) = self.state.spawn_engine(&self.player.display_name, difficulty);
        self.engine = Some(engine.clone());
        self.events = Some(events);
        engine
      }
    };
    info!(target: "heartcount_backend", player = %self.player.display_name, %difficulty, "Session started");

    if self.state.config.auto_advance {
      if let Err(e) = engine.start_round().await {
        return error_msg(&e.to_string());
      }
    }
    snapshot_msg(&engine).await
  }

  async fn command(&mut self, engine: &EngineHandle, msg: ClientWsMessage) -> Option<ServerWsMessage> {
    let res = match msg {
      ClientWsMessage::StartRound => engine.start_round().await.map(|_| None),
      ClientWsMessage::SubmitAnswer { value } => match engine.submit_answer(value).await {
        // The verdict itself reaches the client as an `answered` event.
        Ok(_) if self.state.config.auto_advance => engine.start_round().await.map(|_| None),
        Ok(_) => Ok(None),
        Err(e) => Err(e),
      },
      ClientWsMessage::Pause => engine.pause().await.map(|_| None),
      ClientWsMessage::Resume => engine.resume().await.map(|_| None),
      ClientWsMessage::Cancel => engine.cancel().await.map(|_| None),
      ClientWsMessage::Snapshot => return Some(snapshot_msg(engine).await),
      ClientWsMessage::Ping | ClientWsMessage::Hello { .. } | ClientWsMessage::NewSession { .. } => Ok(None),
    };
    match res {
      Ok(reply) => reply,
      Err(e @ EngineError::OrderingViolation { .. }) => Some(error_msg(&e.to_string())),
      Err(e @ EngineError::Closed) => {
        error!(target: "heartcount_backend", error = %e, "Engine gone");
        Some(error_msg(&e.to_string()))
      }
    }
  }

  /// Connection closed: stop the timer and drop any in-flight fetch.
  async fn close(self) {
    if let Some(engine) = &self.engine {
      if let Err(e) = engine.cancel().await {
        warn!(target: "heartcount_backend", error = %e, "Cancel on disconnect failed");
      }
    }
  }
}

fn error_msg(message: &str) -> ServerWsMessage {
  ServerWsMessage::Error { message: message.to_string() }
}

async fn snapshot_msg(engine: &EngineHandle) -> ServerWsMessage {
  match engine.snapshot().await {
    Ok(s) => ServerWsMessage::Snapshot { snapshot: s.into() },
    Err(e) => error_msg(&e.to_string()),
  }
}

async fn send(socket: &mut WebSocket, msg: &ServerWsMessage) -> bool {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  if let Err(e) = socket.send(Message::Text(out)).await {
    error!(target: "heartcount_backend", error = %e, "WS send error");
    return false;
  }
  true
}

#[instrument(level = "info", skip(socket, state), fields(conn = %Uuid::new_v4()))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  let mut session = WsSession::new(state);
  info!(target: "heartcount_backend", player = %session.player.display_name, "WebSocket connected");
  if !send(&mut socket, &ServerWsMessage::Welcome { player: session.player.clone() }).await {
    return;
  }

  loop {
    tokio::select! {
      incoming = socket.recv() => {
        let Some(Ok(msg)) = incoming else { break };
        match msg {
          Message::Text(txt) => {
            let reply = match serde_json::from_str::<ClientWsMessage>(&txt) {
              Ok(incoming) => {
                debug!(target: "heartcount_backend", "WS received: {:?}", &incoming);
                session.handle(incoming).await
              }
              Err(e) => Some(error_msg(&format!("Invalid JSON: {}", e))),
            };
            if let Some(reply) = reply {
              if !send(&mut socket, &reply).await { break; }
            }
          }
          Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
          Message::Close(_) => break,
          _ => {}
        }
      }
      Some(event) = session.next_event() => {
        if !send(&mut socket, &ServerWsMessage::from(event)).await { break; }
      }
    }
  }

  session.close().await;
  info!(target: "heartcount_backend", "WebSocket disconnected");
}
