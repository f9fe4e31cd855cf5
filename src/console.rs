//! Line-oriented terminal front end: a [`View`] that draws to any writer and a
//! stdin command reader.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::models::PageUser;
use crate::notifications::Alert;
use crate::push::ConnectionState;
use crate::service::inbox_service::{Command, Status, View};
use crate::timeline::scroll::Viewport;
use crate::timeline::{ConversationTimeline, LoadState};

const DEFAULT_SCROLL_ROWS: u32 = 5;

impl Command {
    pub fn parse(line: &str) -> Result<Command, AppError> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let invalid = |message: String| AppError::InvalidCommand { message };
        let required = |what: &str| -> Result<String, AppError> {
            if rest.is_empty() {
                Err(invalid(format!("'{word}' needs {what}")))
            } else {
                Ok(rest.to_string())
            }
        };
        let number = |what: &str| -> Result<u64, AppError> {
            required(what)?.parse().map_err(|e| invalid(format!("'{rest}' is not a valid {what}: {e}")))
        };
        let rows = || -> Result<u32, AppError> {
            if rest.is_empty() {
                return Ok(DEFAULT_SCROLL_ROWS);
            }
            rest.parse().map_err(|e| invalid(format!("'{rest}' is not a row count: {e}")))
        };

        let command = match word {
            "users" => Command::Users,
            "open" => Command::Open(required("a user id")?),
            "close" => Command::Close((!rest.is_empty()).then(|| rest.to_string())),
            "up" => Command::Up(rows()?),
            "down" => Command::Down(rows()?),
            // keep the text as typed; the inbox trims and validates it
            "send" => Command::Send(rest.to_string()),
            "edit" => Command::Edit(required("a message id")?),
            "draft" => Command::Draft(rest.to_string()),
            "save" => Command::Save,
            "cancel" => Command::Cancel,
            "delete" => Command::Delete(required("a message id")?),
            "alerts" => Command::Alerts,
            "go" => Command::Go(number("alert id")?),
            "dismiss" => Command::Dismiss(number("alert id")?),
            "status" => Command::Status,
            "quit" | "exit" => Command::Quit,
            "" => return Err(invalid("empty input".to_string())),
            other => return Err(invalid(format!("unknown command '{other}'"))),
        };
        Ok(command)
    }
}

/// Reads commands from stdin until EOF or `quit`.
pub fn spawn_stdin_reader(commands: mpsc::Sender<Command>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read from stdin: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match Command::parse(&line) {
                Ok(command) => {
                    let quit = command == Command::Quit;
                    if commands.send(command).await.is_err() || quit {
                        break;
                    }
                }
                Err(e) => warn!("{e}"),
            }
        }
        info!("Command input closed");
    })
}

/// Draws a scrolling window of the active conversation, one line per message.
pub struct ConsoleView<W: Write + Send + 'static> {
    out: W,
    title: String,
    lines: Vec<String>,
    top: u32,
    rows: u32,
}

impl ConsoleView<std::io::Stdout> {
    pub fn stdout(rows: u32) -> Self {
        Self::new(std::io::stdout(), rows)
    }
}

impl<W: Write + Send + 'static> ConsoleView<W> {
    pub fn new(out: W, rows: u32) -> Self {
        Self { out, title: String::new(), lines: Vec::new(), top: 0, rows: rows.max(1) }
    }

    pub fn writer(&self) -> &W {
        &self.out
    }

    fn say(&mut self, text: &str) {
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }

    fn draw(&mut self) {
        let start = self.top as usize;
        let end = (start + self.rows as usize).min(self.lines.len());
        let mut frame = format!("── {} ──\n", self.title);
        if start > 0 {
            frame.push_str(&format!("   ↑ {start} more\n"));
        }
        for line in &self.lines[start.min(end)..end] {
            frame.push_str(line);
            frame.push('\n');
        }
        let _ = write!(self.out, "{frame}");
        let _ = self.out.flush();
    }
}

impl<W: Write + Send + 'static> Viewport for ConsoleView<W> {
    fn scroll_height(&self) -> u32 {
        self.lines.len() as u32
    }

    fn scroll_top(&self) -> u32 {
        self.top
    }

    fn set_scroll_top(&mut self, offset: u32) {
        let max = self.scroll_height().saturating_sub(self.rows);
        let offset = offset.min(max);
        if offset != self.top {
            self.top = offset;
            self.draw();
        }
    }

    fn client_height(&self) -> u32 {
        self.rows
    }
}

impl<W: Write + Send + 'static> View for ConsoleView<W> {
    fn render_timeline(&mut self, timeline: &ConversationTimeline) {
        let counterparty = timeline.conversation_id();
        self.title = format!("Conversation with {counterparty}");

        let editing = timeline.editing();
        let mut lines: Vec<String> = timeline
            .entries()
            .map(|entry| {
                let who = if entry.sent_by_page(counterparty) { "page" } else { counterparty };
                let mut line = format!(
                    "[{}] {who}: {}  ({})",
                    entry.timestamp().format("%H:%M"),
                    entry.text(),
                    entry.id()
                );
                if let Some(draft) = editing.filter(|d| d.message_id == entry.id()) {
                    line.push_str(&format!("\n      editing: {}", draft.text));
                }
                line
            })
            .flat_map(|line| line.split('\n').map(str::to_string).collect::<Vec<_>>())
            .collect();

        match timeline.load_state() {
            LoadState::Loading => lines.insert(0, "Loading messages...".to_string()),
            LoadState::Failed(reason) => lines.insert(0, format!("Could not load messages: {reason}")),
            LoadState::Ready if timeline.is_loading() => lines.insert(0, "Loading older messages...".to_string()),
            LoadState::Ready => {}
        }

        self.lines = lines;
        self.top = self.top.min(self.scroll_height().saturating_sub(self.rows));
        self.draw();
    }

    fn render_conversations(&mut self, users: &[PageUser]) {
        self.title = "Conversations".to_string();
        self.lines = if users.is_empty() {
            vec!["(no conversations yet; `users` to refresh)".to_string()]
        } else {
            users
                .iter()
                .map(|u| match &u.email {
                    Some(email) => format!("{}  {} <{email}>", u.id, u.name),
                    None => format!("{}  {}", u.id, u.name),
                })
                .collect()
        };
        self.top = 0;
        self.draw();
    }

    fn show_alert(&mut self, alert: &Alert) {
        let mut line = format!("[alert {}] {}: {}  (go {} / dismiss {})", alert.id, alert.title, alert.body, alert.id, alert.id);
        if let Some(post) = alert.post_path() {
            line.push_str(&format!("  View Post: {post}"));
        }
        self.say(&line);
    }

    fn dismiss_alert(&mut self, id: u64) {
        self.say(&format!("[alert {id}] dismissed"));
    }

    fn show_alerts(&mut self, alerts: &[Alert]) {
        if alerts.is_empty() {
            self.say("No alerts");
        }
        for alert in alerts {
            match alert.post_path() {
                Some(post) => self.say(&format!("[alert {}] {} -> {}  View Post: {post}", alert.id, alert.title, alert.target.path())),
                None => self.say(&format!("[alert {}] {} -> {}", alert.id, alert.title, alert.target.path())),
            }
        }
    }

    fn show_connectivity(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => self.say("Connected to server"),
            ConnectionState::Disconnected => self.say("Disconnected from server, attempting to reconnect..."),
            ConnectionState::Closed => self.say("Connection closed"),
            ConnectionState::Connecting => {}
        }
    }

    fn show_status(&mut self, status: &Status) {
        self.say(&format!(
            "connection: {:?} | view: {:?} | open: [{}] | alerts: {} | dead letters: {}",
            status.connection,
            status.active,
            status.open.join(", "),
            status.alerts,
            status.dead_letters
        ));
    }

    fn show_error(&mut self, message: &str) {
        self.say(&format!("error: {message}"));
    }

    fn navigate(&mut self, path: &str) {
        self.say(&format!("→ {path}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NavigationTarget;
    use crate::push::EventHub;
    use crate::timeline::history::tests::{message, page};
    use chrono::Utc;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("open 42").unwrap(), Command::Open("42".into()));
        assert_eq!(Command::parse("close").unwrap(), Command::Close(None));
        assert_eq!(Command::parse("close 42").unwrap(), Command::Close(Some("42".into())));
        assert_eq!(Command::parse("up").unwrap(), Command::Up(DEFAULT_SCROLL_ROWS));
        assert_eq!(Command::parse("down 3").unwrap(), Command::Down(3));
        assert_eq!(Command::parse("send  hello there ").unwrap(), Command::Send("hello there".into()));
        assert_eq!(Command::parse("send").unwrap(), Command::Send(String::new()));
        assert_eq!(Command::parse("go 7").unwrap(), Command::Go(7));
        assert_eq!(Command::parse("exit").unwrap(), Command::Quit);
    }

    #[test]
    fn rejects_bad_input() {
        for input in ["", "open", "go", "go seven", "up many", "fly 3"] {
            let err = Command::parse(input).unwrap_err();
            assert!(err.is_validation(), "{input:?} gave {err}");
        }
    }

    fn ready_timeline(count: u32) -> ConversationTimeline {
        let hub = EventHub::new();
        let (mut timeline, request) = ConversationTimeline::open("42", 1, &hub, |_| {});
        let messages = (0..count).rev().map(|i| message(&format!("m{i}"), i, "42")).collect();
        timeline.apply_page(&request.unwrap(), Ok(page(messages, None)));
        timeline
    }

    fn output(view: &ConsoleView<Vec<u8>>) -> String {
        String::from_utf8_lossy(view.writer()).into_owned()
    }

    #[test]
    fn measures_one_row_per_message_and_clamps_scrolling() {
        let mut view = ConsoleView::new(Vec::new(), 4);
        view.render_timeline(&ready_timeline(10));
        assert_eq!(view.scroll_height(), 10);

        view.set_scroll_top(100);
        assert_eq!(view.scroll_top(), 6);
        let drawn = output(&view);
        assert!(drawn.contains("(m9)"));
        assert!(drawn.contains("↑ 6 more"));
    }

    #[test]
    fn loading_and_alerts_are_visible() {
        let hub = EventHub::new();
        let (timeline, _request) = ConversationTimeline::open("42", 1, &hub, |_| {});
        let mut view = ConsoleView::new(Vec::new(), 4);
        view.render_timeline(&timeline);
        view.show_connectivity(ConnectionState::Disconnected);

        let drawn = output(&view);
        assert!(drawn.contains("Loading messages..."));
        assert!(drawn.contains("Disconnected from server"));
    }

    #[test]
    fn comment_alerts_show_the_post_beside_the_comments_link() {
        let alert = Alert {
            id: 3,
            title: "New Comment from 7".into(),
            body: "nice".into(),
            target: NavigationTarget::Comments("8".into()),
            post_id: Some("p1".into()),
            raised_at: Utc::now(),
        };
        let mut view = ConsoleView::new(Vec::new(), 4);
        view.show_alert(&alert);
        view.show_alerts(std::slice::from_ref(&alert));

        let drawn = output(&view);
        assert!(drawn.contains("[alert 3] New Comment from 7: nice  (go 3 / dismiss 3)  View Post: /posts/p1"));
        assert!(drawn.contains("[alert 3] New Comment from 7 -> /comments/8  View Post: /posts/p1"));
    }
}
