//! Line-oriented chat console.
//!
//! Lines starting with `/` are commands; anything else is sent to the
//! conversation that is currently open.

use anyhow::Result;
use glooo_session::{
    ChatApi, ConnectionState, Conversation, ConversationDirectory, Id, Message, SessionController,
    SessionError, SessionNotice,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Chats,
    /// 1-based position in the `/chats` listing.
    Open(usize),
    Reconnect,
    Quit,
    Help,
    Say(String),
}

pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(ConsoleCommand::Say(line.to_string())));
    };
    let mut parts = command.split_whitespace();
    let cmd = match parts.next().unwrap_or_default() {
        "chats" => ConsoleCommand::Chats,
        "open" => {
            let arg = parts.next().ok_or("usage: /open <n>")?;
            let n = arg
                .parse::<usize>()
                .map_err(|_| format!("not a number: {arg}"))?;
            ConsoleCommand::Open(n)
        }
        "reconnect" => ConsoleCommand::Reconnect,
        "quit" | "exit" => ConsoleCommand::Quit,
        "help" => ConsoleCommand::Help,
        other => return Err(format!("unknown command: /{other} (try /help)")),
    };
    Ok(Some(cmd))
}

pub fn format_directory(directory: &ConversationDirectory) -> String {
    if directory.is_empty() {
        return "No conversations.".to_string();
    }
    let mut out = String::new();
    for (i, conversation) in directory.iter().enumerate() {
        out.push_str(&format!(
            "{:>3}  {:<20} {}\n",
            i + 1,
            conversation.counterpart.name,
            conversation.preview()
        ));
    }
    out.push_str(&format!("\n{} conversation(s)", directory.len()));
    out
}

pub fn format_message(conversation: &Conversation, message: &Message) -> String {
    let pending = if message.is_optimistic() { " (sending)" } else { "" };
    format!(
        "[{}] {}{}",
        conversation.author_label(message),
        message.content,
        pending
    )
}

/// Only the start of an outage and its recovery are shown; individual
/// retries stay in the log.
fn describe_state(state: ConnectionState) -> Option<&'static str> {
    match state {
        ConnectionState::Open => Some("connected"),
        ConnectionState::Backoff { attempt: 0 } => Some("connection lost, reconnecting..."),
        _ => None,
    }
}

const HELP: &str = "\
/chats        list conversations
/open <n>     open conversation n from /chats
/reconnect    reconnect after the connection gave up
/quit         leave
<text>        send to the open conversation";

/// Drive `session` from stdin until `/quit`, end of input or the
/// connection manager going away.
pub async fn run<A: ChatApi>(session: &mut SessionController<A>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut current: Option<Id> = None;

    println!("{}", format_directory(session.directory()));
    println!("Type /help for commands.");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = match parse_line(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(msg) => {
                        println!("{msg}");
                        continue;
                    }
                };
                match command {
                    ConsoleCommand::Quit => break,
                    ConsoleCommand::Help => println!("{HELP}"),
                    ConsoleCommand::Chats => {
                        if let Err(e) = session.refresh_directory().await {
                            println!("could not refresh conversations: {e}");
                        }
                        println!("{}", format_directory(session.directory()));
                    }
                    ConsoleCommand::Open(n) => {
                        let Some(conversation) = session.directory().nth(n).cloned() else {
                            println!("no conversation #{n}");
                            continue;
                        };
                        match session.open_conversation(&conversation.id).await {
                            Ok(log) => {
                                println!("--- {} (@{}) ---", conversation.counterpart.name, conversation.counterpart.username);
                                for message in log {
                                    println!("{}", format_message(&conversation, message));
                                }
                                current = Some(conversation.id);
                            }
                            Err(e) => println!("could not load messages: {e}"),
                        }
                    }
                    ConsoleCommand::Reconnect => session.reconnect().await?,
                    ConsoleCommand::Say(text) => {
                        let Some(id) = current.clone() else {
                            println!("open a conversation first (/chats, /open <n>)");
                            continue;
                        };
                        match session.send_message(&id, &text).await {
                            Ok(()) => {}
                            Err(SessionError::NotConnected) => {
                                println!("not connected, message not delivered (/reconnect, then send again)");
                            }
                            Err(e) => println!("send failed: {e}"),
                        }
                    }
                }
            }

            notice = session.next_notice() => {
                let Some(notice) = notice else { break };
                match notice {
                    SessionNotice::MessageReceived { conversation_id, message } => {
                        match session.directory().find(&conversation_id) {
                            Some(conversation) if current.as_ref() == Some(&conversation_id) => {
                                println!("{}", format_message(conversation, &message));
                            }
                            Some(conversation) => {
                                println!("(new message from {})", conversation.counterpart.name);
                            }
                            None => println!("(new message in a conversation not listed yet, try /chats)"),
                        }
                    }
                    SessionNotice::StateChanged(state) => {
                        if let Some(text) = describe_state(state) {
                            println!("* {text}");
                        }
                    }
                    SessionNotice::ConnectionLost { attempts } => {
                        println!("* could not reconnect after {attempts} attempts, use /reconnect");
                    }
                    SessionNotice::DeliveryFailed(reason) => {
                        println!("* server could not deliver a message: {reason}");
                    }
                }
            }
        }
    }

    session.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glooo_session::Counterpart;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_line("/chats"), Ok(Some(ConsoleCommand::Chats)));
        assert_eq!(parse_line("  /open 2 "), Ok(Some(ConsoleCommand::Open(2))));
        assert_eq!(parse_line("/reconnect"), Ok(Some(ConsoleCommand::Reconnect)));
        assert_eq!(parse_line("/quit"), Ok(Some(ConsoleCommand::Quit)));
        assert_eq!(parse_line(""), Ok(None));
        assert_eq!(
            parse_line("hello there"),
            Ok(Some(ConsoleCommand::Say("hello there".to_string())))
        );
    }

    #[test]
    fn rejects_bad_commands() {
        assert!(parse_line("/open").is_err());
        assert!(parse_line("/open two").is_err());
        assert!(parse_line("/dance").is_err());
    }

    #[test]
    fn only_the_first_retry_is_announced() {
        assert_eq!(
            describe_state(ConnectionState::Backoff { attempt: 0 }),
            Some("connection lost, reconnecting...")
        );
        for attempt in 1..5 {
            assert_eq!(describe_state(ConnectionState::Backoff { attempt }), None);
        }
        assert_eq!(describe_state(ConnectionState::Connecting), None);
        assert_eq!(describe_state(ConnectionState::Exhausted), None);
        assert_eq!(describe_state(ConnectionState::Open), Some("connected"));
    }

    fn conversation() -> Conversation {
        Conversation {
            id: Id::new("C1"),
            counterpart: Counterpart {
                id: Id::new("U2"),
                name: "Bob".to_string(),
                username: "bob".to_string(),
            },
            last_message: None,
        }
    }

    #[test]
    fn formats_messages_by_author() {
        let c = conversation();
        let mine = Message::optimistic("U1".into(), "U2".into(), "C1".into(), "hi");
        let theirs = Message {
            id: Some(Id::new("m1")),
            sender_id: Some(Id::new("U2")),
            ..mine.clone()
        };
        assert_eq!(format_message(&c, &mine), "[Me] hi (sending)");
        assert_eq!(format_message(&c, &theirs), "[Bob] hi");
    }

    #[test]
    fn formats_directory() {
        let mut directory = ConversationDirectory::new();
        assert_eq!(format_directory(&directory), "No conversations.");
        directory.refresh(vec![conversation()]);
        let out = format_directory(&directory);
        assert!(out.contains("Bob"));
        assert!(out.contains("No messages yet"));
        assert!(out.ends_with("1 conversation(s)"));
    }
}
