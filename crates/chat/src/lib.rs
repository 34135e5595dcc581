#![deny(unsafe_code)]

pub mod chat;
pub mod collaborators;
pub mod error;
pub mod settings;

pub use chat::{ChatIntent, ChatSession, RenderModel, SessionEvent};
pub use error::{ChatError, ChatResult};
pub use settings::{ClientSettings, SettingsStore};
