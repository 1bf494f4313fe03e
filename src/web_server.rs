use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{Response, StatusCode},
    response::{Html, IntoResponse, Redirect},
    routing::{get, post},
    serve, Form, Router,
};
use futures::{sink::SinkExt, stream::SplitSink, stream::StreamExt};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chat_store::ChatStore;
use crate::clarification::ClarificationSequence;
use crate::constants;
use crate::controller::{ControllerError, ConversationController, ConversationEvent};
use crate::conversation::{ConversationConfig, ConversationSnapshot};
use crate::message::{Answer, ClarificationIntent, Message, MessageBody, MessageId};
use crate::preview::{Field, PreviewDecoration, PreviewPanel};
use crate::questions::{EXAMPLE_PROMPTS, PLACEHOLDER_PROMPTS};

/// Commands sent by the chat view over the WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Submit { text: String },
    Answer { message_id: Uuid, question: String, answer: Answer },
    FixError,
    RestoreVersion { version: u32 },
    ReportIssue { message_id: Uuid },
    SetField { field: String, value: String },
    Clear,
}

/// Events pushed to the chat view.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Message { message: Message },
    Loading { is_loading: bool },
    Composer { text: String },
    Preview {
        values: Vec<PreviewValue>,
        total: String,
        decoration: PreviewDecoration,
    },
    Sequence {
        message_id: MessageId,
        intro: String,
        questions: Vec<String>,
        outro: String,
        typing_speed_ms: u64,
    },
    /// A clarification replayed from the conversation on (re)mount.
    Clarification {
        message_id: MessageId,
        question: String,
        answer: Option<Answer>,
    },
    Cleared,
    Redirect { to: String },
    Error { reason: String },
}

#[derive(Debug, Serialize)]
pub struct PreviewValue {
    field: Field,
    label: &'static str,
    value: String,
}

impl ServerEvent {
    fn preview(panel: &PreviewPanel) -> Self {
        ServerEvent::Preview {
            values: Field::ALL
                .into_iter()
                .map(|field| PreviewValue {
                    field,
                    label: field.label(),
                    value: panel.value(field).to_string(),
                })
                .collect(),
            total: panel.display_total(),
            decoration: panel.decoration(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PromptForm {
    prompt: String,
}

// Shared application state
#[derive(Clone)]
struct AppState {
    templates: Arc<AutoReloader>,
    store: ChatStore,
    config: Arc<ConversationConfig>,
}

fn create_minijinja_env(template_dir: String) -> AutoReloader {
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&template_dir));
        notifier.watch_path(&template_dir, true);
        Ok(env)
    })
}

fn render(state: &AppState, name: &str, context: minijinja::Value) -> Result<Html<String>, Html<String>> {
    state
        .templates
        .acquire_env()
        .and_then(|env| env.get_template(name).and_then(|tmpl| tmpl.render(context)))
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template {}: {}", name, e);
            Html(format!("Internal Server Error: {}", e))
        })
}

async fn landing_handler(State(state): State<AppState>) -> Result<Html<String>, Html<String>> {
    let context = minijinja::context! {
        title => "Space",
        examples => EXAMPLE_PROMPTS,
        placeholders => PLACEHOLDER_PROMPTS,
    };
    render(&state, "index.html", context)
}

async fn prompt_handler(State(state): State<AppState>, Form(form): Form<PromptForm>) -> Redirect {
    match state.store.start_conversation(&form.prompt).await {
        Ok(()) => Redirect::to("/chat"),
        Err(e) => {
            debug!("Prompt rejected: {}", e);
            Redirect::to("/")
        }
    }
}

async fn clear_handler(State(state): State<AppState>) -> Redirect {
    state.store.clear_messages().await;
    Redirect::to("/")
}

async fn chat_handler(State(state): State<AppState>) -> Response<Body> {
    if state.store.is_empty().await {
        info!("Chat view requested with no conversation, redirecting to landing");
        return Redirect::to("/").into_response();
    }
    let context = minijinja::context! {
        title => "Space",
        fields => Field::ALL.iter().map(|f| minijinja::context! { name => f.name(), label => f.label() }).collect::<Vec<_>>(),
    };
    render(&state, "chat.html", context).into_response()
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

type WsSender = SplitSink<WebSocket, WsMessage>;

async fn send_event(sender: &mut WsSender, event: &ServerEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(WsMessage::Text(json)).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize server event: {}", e);
            true
        }
    }
}

// One socket is one mounted chat view.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let controller = match ConversationController::mount(state.store.clone(), state.config.clone()).await {
        Ok(controller) => controller,
        Err(e) => {
            info!("Chat view not mounted: {}", e);
            send_event(&mut sender, &ServerEvent::Redirect { to: "/".to_string() }).await;
            return;
        }
    };
    let mut events = controller.subscribe();
    let mut loading = controller.loading();
    let mut preview = PreviewPanel::new();

    let snapshot = controller.snapshot().await;
    for event in replay(&snapshot) {
        if !send_event(&mut sender, &event).await {
            controller.dispose().await;
            return;
        }
    }
    preview.decorate(snapshot.messages.last(), snapshot.is_loading);
    send_event(&mut sender, &ServerEvent::Composer { text: snapshot.composer }).await;
    send_event(&mut sender, &ServerEvent::preview(&preview)).await;

    if let Err(e) = controller.resume().await {
        warn!("Failed to resume conversation: {}", e);
    }

    let mut latest = snapshot.messages.last().cloned();
    loop {
        tokio::select! {
            Ok(event) = events.recv() => {
                if let ConversationEvent::TurnReleased = event {
                    match controller.resume().await {
                        Ok(started) => debug!(started, "Picked up a released turn"),
                        Err(e) => warn!("Failed to resume released turn: {}", e),
                    }
                    continue;
                }
                let outgoing = forward_event(event, &controller, &mut preview, &mut latest);
                let mut open = true;
                for event in &outgoing {
                    open &= send_event(&mut sender, event).await;
                }
                if !open {
                    warn!("WebSocket client disconnected or send error. Closing connection.");
                    break;
                }
            }

            Ok(()) = loading.changed() => {
                let is_loading = *loading.borrow_and_update();
                preview.decorate(latest.as_ref(), is_loading);
                let sent = send_event(&mut sender, &ServerEvent::Loading { is_loading }).await
                    && send_event(&mut sender, &ServerEvent::preview(&preview)).await;
                if !sent {
                    break;
                }
            }

            Some(Ok(msg)) = receiver.next() => {
                match msg {
                    WsMessage::Text(text) => {
                        let reply = handle_command(&text, &controller, &mut preview, latest.as_ref()).await;
                        if let Some(reply) = reply {
                            if !send_event(&mut sender, &reply).await {
                                break;
                            }
                        }
                    }
                    WsMessage::Binary(_) => warn!("Received unexpected binary message from client"),
                    WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                    WsMessage::Close(_) => {
                        info!("Client requested WebSocket close");
                        break;
                    }
                }
            }

            else => {
                info!("WebSocket client disconnected");
                break;
            }
        }
    }

    controller.dispose().await;
    info!("WebSocket connection closed");
}

fn forward_event(
    event: ConversationEvent,
    controller: &ConversationController,
    preview: &mut PreviewPanel,
    latest: &mut Option<Message>,
) -> Vec<ServerEvent> {
    match event {
        ConversationEvent::MessageAppended { message } => {
            let mut outgoing = Vec::with_capacity(3);
            if let MessageBody::Clarification { .. } = message.body {
                let mut rng = rand::rng();
                match ClarificationSequence::expand(&message, &controller.config().question_bank, &mut rng) {
                    Ok(sequence) => outgoing.push(ServerEvent::Sequence {
                        message_id: sequence.message_id(),
                        intro: sequence.intro().to_string(),
                        questions: sequence.questions().into_iter().map(str::to_string).collect(),
                        outro: sequence.outro().to_string(),
                        typing_speed_ms: controller.config().typing_speed.as_millis() as u64,
                    }),
                    Err(e) => warn!("Could not expand clarification: {}", e),
                }
            }
            preview.decorate(Some(&message), controller.is_loading());
            *latest = Some(message.clone());
            outgoing.insert(0, ServerEvent::Message { message });
            outgoing.push(ServerEvent::preview(preview));
            outgoing
        }
        ConversationEvent::ComposerChanged { text } => vec![ServerEvent::Composer { text }],
        ConversationEvent::Cleared => vec![
            ServerEvent::Cleared,
            ServerEvent::Redirect { to: "/".to_string() },
        ],
        ConversationEvent::Replaced => vec![ServerEvent::Redirect { to: "/chat".to_string() }],
        ConversationEvent::TurnReleased => Vec::new(),
    }
}

/// Events that rebuild the chat view from a snapshot. Clarifications are
/// shown as static questions, with the answer if one was given.
fn replay(snapshot: &ConversationSnapshot) -> Vec<ServerEvent> {
    let mut events = Vec::with_capacity(snapshot.messages.len());
    for message in &snapshot.messages {
        let clarification = message.question().map(|question| ServerEvent::Clarification {
            message_id: message.id,
            question: question.to_string(),
            answer: snapshot
                .answers
                .iter()
                .find(|a| a.message_id == message.id && a.question == question)
                .map(|a| a.answer),
        });
        events.push(ServerEvent::Message {
            message: message.clone(),
        });
        events.extend(clarification);
    }
    events
}

async fn handle_command(
    text: &str,
    controller: &ConversationController,
    preview: &mut PreviewPanel,
    latest: Option<&Message>,
) -> Option<ServerEvent> {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => command,
        Err(e) => {
            warn!("Unrecognised client command: {}", e);
            return Some(ServerEvent::Error {
                reason: format!("unrecognised command: {}", e),
            });
        }
    };
    debug!(?command, "Client command");

    let result: Result<(), ControllerError> = match command {
        ClientCommand::Submit { text } => controller.submit(&text).await.map(|_| ()),
        ClientCommand::Answer {
            message_id,
            question,
            answer,
        } => {
            let intent = ClarificationIntent {
                message_id: MessageId::from(message_id),
                question,
                answer,
            };
            controller.answer_clarification(&intent).await.map(|_| ())
        }
        ClientCommand::FixError => controller.fix_error().await.map(|_| ()),
        ClientCommand::RestoreVersion { version } => controller.restore_version(version).await.map(|_| ()),
        ClientCommand::ReportIssue { message_id } => controller.report_issue(MessageId::from(message_id)).await,
        ClientCommand::SetField { field, value } => {
            return match preview.set_field_by_name(&field, value) {
                Ok(_) => {
                    preview.decorate(latest, controller.is_loading());
                    Some(ServerEvent::preview(preview))
                }
                Err(e) => Some(ServerEvent::Error { reason: e.to_string() }),
            };
        }
        ClientCommand::Clear => controller.clear().await,
    };

    match result {
        Ok(()) => None,
        Err(e) => Some(ServerEvent::Error { reason: e.to_string() }),
    }
}

/// Builds the router; split out so tests can drive it without a listener.
pub fn router(store: ChatStore, config: Arc<ConversationConfig>) -> Router {
    let templates = create_minijinja_env(constants::TEMPLATE_DIR.clone());
    let state = AppState {
        templates: Arc::new(templates),
        store,
        config,
    };

    // Serve static files from the configured directory
    let static_files_service = ServeDir::new(constants::STATIC_DIR.as_str()).not_found_service(
        tower::service_fn(|_| async {
            Ok::<_, std::convert::Infallible>(
                Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::from("Not Found"))
                    .unwrap_or_default(),
            )
        }),
    );

    Router::new()
        .route("/", get(landing_handler))
        .route("/prompt", post(prompt_handler))
        .route("/clear", post(clear_handler))
        .route("/chat", get(chat_handler))
        .route("/ws", get(ws_handler))
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_web_server(port: u16, store: ChatStore, config: Arc<ConversationConfig>) -> Result<()> {
    let app = router(store, config);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_commands_parse() {
        let id = Uuid::new_v4();
        let json = format!(
            r#"{{"type":"answer","message_id":"{}","question":"Add charts?","answer":"Yes"}}"#,
            id
        );
        match serde_json::from_str::<ClientCommand>(&json).unwrap() {
            ClientCommand::Answer {
                message_id,
                question,
                answer,
            } => {
                assert_eq!(message_id, id);
                assert_eq!(question, "Add charts?");
                assert_eq!(answer, Answer::Yes);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(matches!(
            serde_json::from_str::<ClientCommand>(r#"{"type":"fix_error"}"#).unwrap(),
            ClientCommand::FixError
        ));
        assert!(serde_json::from_str::<ClientCommand>(r#"{"type":"launch"}"#).is_err());
    }

    #[test]
    fn test_replay_shows_clarifications_statically() {
        let mut state = crate::conversation::ConversationState::seeded("Create a carbon calculator app");
        let config = ConversationConfig::default();
        state.resume();
        state.complete_version_stage().unwrap();
        let clarification = state.complete_follow_up_stage(&config).unwrap();
        let question = clarification.question().unwrap().to_string();

        let events = replay(&state.snapshot(false));
        assert_eq!(events.len(), 4);
        match &events[3] {
            ServerEvent::Clarification { message_id, question: shown, answer } => {
                assert_eq!(*message_id, clarification.id);
                assert_eq!(shown, &question);
                assert_eq!(*answer, None);
            }
            other => panic!("expected a clarification, got {:?}", other),
        }

        state
            .answer(&ClarificationIntent {
                message_id: clarification.id,
                question: question.clone(),
                answer: Answer::No,
            })
            .unwrap();
        let json = serde_json::to_value(&replay(&state.snapshot(false))[3]).unwrap();
        assert_eq!(json["type"], "clarification");
        assert_eq!(json["question"], question.as_str());
        assert_eq!(json["answer"], "No");
    }

    #[test]
    fn test_preview_event_shape() {
        let mut panel = PreviewPanel::new();
        panel.set_field(Field::Electricity, "100");
        let json = serde_json::to_value(ServerEvent::preview(&panel)).unwrap();

        assert_eq!(json["type"], "preview");
        assert_eq!(json["total"], "50.00");
        assert_eq!(json["decoration"], "idle");
        assert_eq!(json["values"][0]["field"], "electricity");
        assert_eq!(json["values"][0]["value"], "100");
    }
}
