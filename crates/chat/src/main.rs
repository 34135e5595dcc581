use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use docchat::chat::{ChatSession, SessionEvent};
use docchat::settings::SettingsStore;
use docchat_transport::{EnvToken, HttpFeedbackClient, TokenProvider, create_transport};

const TOKEN_VARIABLE: &str = "DOCCHAT_TOKEN";

#[derive(Parser, Debug)]
#[command(name = "docchat")]
#[command(about = "Ask a question about your documents and watch the answer arrive")]
struct Args {
    /// Continue an existing conversation instead of starting a new one
    #[arg(long)]
    session: Option<String>,

    /// The question to ask
    #[arg(required = true, num_args = 1..)]
    query: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let query = args.query.join(" ");

    let store = SettingsStore::load();
    let settings = store.settings();
    tracing::debug!(path = ?store.config_path(), mode = ?settings.mode, "settings loaded");
    let config = settings.to_transport_config();
    let tokens: Arc<dyn TokenProvider> = Arc::new(EnvToken::new(TOKEN_VARIABLE));

    let transport = match create_transport(config.clone(), Arc::clone(&tokens)) {
        Ok(transport) => transport,
        Err(error) => {
            tracing::error!(error = %error, "failed to create transport");
            return ExitCode::FAILURE;
        }
    };

    let mut session = ChatSession::new(transport)
        .with_initial_top_margin(settings.initial_top_margin_px)
        .with_load_older_threshold(settings.load_older_threshold_px);
    match HttpFeedbackClient::new(&config, tokens) {
        Ok(client) => session = session.with_feedback_sink(Arc::new(client)),
        Err(error) => tracing::warn!(error = %error, "feedback submission disabled"),
    }
    if let Some(session_id) = args.session {
        session.open_session(session_id);
    }

    if let Err(error) = session.send(&query) {
        eprintln!("{error}");
        return ExitCode::FAILURE;
    }

    let mut stdout = std::io::stdout();
    while let Some(event) = session.next_event().await {
        match event {
            SessionEvent::PendingUpdated { delta, .. } => {
                let _ = write!(stdout, "{delta}");
                let _ = stdout.flush();
            }
            SessionEvent::SessionAssigned(session_id) => {
                tracing::info!(session_id = %session_id, "conversation established");
            }
            SessionEvent::Committed(outcome) => {
                let _ = writeln!(stdout);
                let sources = session
                    .transcript()
                    .turn(&outcome.turn_id)
                    .and_then(|turn| turn.version(outcome.version_index))
                    .map(|version| version.sources.clone())
                    .unwrap_or_default();
                for (position, source) in sources.iter().enumerate() {
                    let _ = writeln!(stdout, "[{}] {}", position + 1, source.name);
                }
                tracing::info!(
                    session_id = ?session.session_id(),
                    turn_id = %outcome.turn_id,
                    "answer complete"
                );
                return ExitCode::SUCCESS;
            }
            SessionEvent::Failed { message, .. } => {
                let _ = writeln!(stdout);
                eprintln!("{message}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_flag_and_query_words_are_separated() {
        let args = Args::try_parse_from(["docchat", "--session", "s1", "what", "is", "rust"]).unwrap();
        assert_eq!(args.session.as_deref(), Some("s1"));
        assert_eq!(args.query.join(" "), "what is rust");
    }

    #[test]
    fn session_flag_without_value_is_rejected() {
        assert!(Args::try_parse_from(["docchat", "hello", "--session"]).is_err());
    }

    #[test]
    fn query_is_required() {
        assert!(Args::try_parse_from(["docchat", "--session", "s1"]).is_err());
    }
}
