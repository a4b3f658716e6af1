//! Interactive client prompt.

use crate::commands::{self, Input};
use crate::completer::EmsHelper;
use ems_client::{ClientConfig, Connection, Error};
use ems_proto::RESPONSE_ERR;
use rustyline::error::ReadlineError;
use rustyline::history::{DefaultHistory, History};
use rustyline::{Config, Editor};
use std::path::PathBuf;

/// Get the history file path.
pub fn history_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ems_history")
}

/// Build a line editor with history loaded.
pub fn editor() -> Result<Editor<EmsHelper, DefaultHistory>, ReadlineError> {
    let rl_config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();

    let mut rl: Editor<EmsHelper, DefaultHistory> = Editor::with_config(rl_config)?;
    rl.set_helper(Some(EmsHelper::new()));

    let hist_path = history_path();
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }
    Ok(rl)
}

/// Run the interactive client against one server.
pub async fn run(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "Starting up an EMS client connecting to \"{}\"...",
        config.address()
    );
    let mut connection = match Connection::establish(config).await {
        Ok(connection) => connection,
        Err(e) => {
            println!("Error: unable to connect: {}", e);
            return Ok(());
        }
    };

    let mut rl = editor()?;
    if let Some(helper) = rl.helper_mut() {
        helper.set_verbs(server_verbs(&mut connection).await);
    }

    println!("Connected. Type \"quit\" to disconnect or \"?\" for help.\n");

    loop {
        let line = match rl.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        };

        match commands::parse_input(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::ShowHistory => {
                let history = rl.history();
                let start = history.len().saturating_sub(20);
                for (i, entry) in history.iter().skip(start).enumerate() {
                    println!("{:4}  {}", start + i + 1, entry);
                }
            }
            Input::Clear => {
                // ANSI clear screen
                print!("\x1B[2J\x1B[1;1H");
            }
            Input::Command { verb, params } => {
                match connection.send_command(&verb, &params).await {
                    Ok(response) => {
                        if !response.message.trim().is_empty() {
                            println!("{}", response.message.trim_end());
                        }
                        if response.is_server_disconnect {
                            println!("Server disconnected.");
                            break;
                        }
                        if response.is_error {
                            println!("{}", RESPONSE_ERR);
                        }
                    }
                    Err(Error::Timeout) => println!("Error: timed out waiting for the server"),
                    Err(e) => {
                        println!("Error: {}", e);
                        break;
                    }
                }
                if !connection.is_connected() {
                    break;
                }
            }
        }
    }

    let _ = rl.save_history(&history_path());
    connection.close().await;
    println!("Client disconnected.");
    Ok(())
}

/// Ask the server which verbs it understands.
async fn server_verbs(connection: &mut Connection) -> Vec<String> {
    match connection.send_command("HELP", &[] as &[&str]).await {
        Ok(response) if response.is_success() => {
            response.lines().map(|line| line.trim().to_string()).collect()
        }
        Ok(_) => Vec::new(),
        Err(e) => {
            tracing::debug!(error = %e, "could not list server commands");
            Vec::new()
        }
    }
}
