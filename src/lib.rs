pub mod chat;
pub mod chat_store;
pub mod clarification;
pub mod constants;
pub mod controller;
pub mod conversation;
pub mod message;
pub mod preview;
pub mod questions;
pub mod stage;
pub mod store;
pub mod web_server;

pub use chat_store::ChatStore;
pub use controller::{ControllerError, ConversationController, ConversationEvent};
pub use conversation::{ConversationConfig, ConversationSnapshot, Phase};
pub use message::{Answer, ClarificationIntent, Message, MessageBody, MessageId, Role};
pub use preview::{Field, PreviewDecoration, PreviewPanel};
