use std::process::ExitCode;

use chrono::Local;
use murmur::chat::{TranscriptCursor, render_line, render_status};
use murmur::{ChatSession, SessionSnapshot, SettingsStore, open_session};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

const CLEAR_COMMAND: &str = "/clear";
const QUIT_COMMAND: &str = "/quit";

enum Input {
    Send(String),
    Clear,
    Quit,
}

impl Input {
    fn parse(line: &str) -> Self {
        match line.trim() {
            CLEAR_COMMAND => Self::Clear,
            QUIT_COMMAND => Self::Quit,
            _ => Self::Send(line.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings = SettingsStore::load().settings();
    let session = match open_session(&settings).await {
        Ok(session) => session,
        Err(error) => {
            tracing::error!("failed to start chat session: {}", error);
            return ExitCode::FAILURE;
        }
    };

    let result = run(&session).await;
    session.shutdown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("terminal I/O failed: {}", error);
            ExitCode::FAILURE
        }
    }
}

async fn run(session: &ChatSession) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut updates = session.subscribe();
    let mut cursor = TranscriptCursor::default();

    let banner = format!(
        "{}: type a message, {CLEAR_COMMAND} or {QUIT_COMMAND}\n",
        session.key()
    );
    stdout.write_all(banner.as_bytes()).await?;
    let initial = updates.borrow_and_update().clone();
    print_update(&mut stdout, &mut cursor, &initial).await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match Input::parse(&line) {
                    Input::Send(text) => {
                        session.send(&text);
                    }
                    Input::Clear => session.clear(),
                    Input::Quit => break,
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                print_update(&mut stdout, &mut cursor, &snapshot).await?;
            }
        }
    }

    Ok(())
}

async fn print_update(
    stdout: &mut tokio::io::Stdout,
    cursor: &mut TranscriptCursor,
    snapshot: &SessionSnapshot,
) -> std::io::Result<()> {
    let update = cursor.advance(snapshot);
    let mut output = String::new();
    if update.cleared {
        output.push_str("-- conversation cleared --\n");
    }
    for message in &update.fresh {
        output.push_str(&render_line(message, &Local));
        output.push('\n');
    }
    if let Some(status) = render_status(snapshot.state)
        && update.fresh.last().is_some_and(|message| message.sender().is_user())
    {
        output.push_str(status);
        output.push('\n');
    }

    stdout.write_all(output.as_bytes()).await?;
    stdout.flush().await
}
