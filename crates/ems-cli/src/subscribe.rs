//! Subscriber mode: print a channel's messages and broadcast typed lines.

use ems_client::{ClientConfig, Subscriber, SubscriberEvent};
use rustyline::error::ReadlineError;

use crate::commands;
use crate::repl;

/// Listen on `channel` until the user quits or the server goes away.
pub async fn run(config: ClientConfig, channel: String) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "Starting up an EMS subscriber connecting to \"{}\"...",
        config.address()
    );
    let subscriber = Subscriber::new(config);
    let mut events = subscriber.events();

    if let Err(e) = subscriber.connect(&[channel.as_str()]).await {
        println!("Error: unable to subscribe to \"{}\": {}", channel, e);
        return Ok(());
    }
    println!("Subscribed to \"{}\".", channel);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SubscriberEvent::ChannelMessage { message, .. } => println!("{}", message),
                SubscriberEvent::Disconnected(_) => {
                    println!("Disconnected - terminating.");
                    std::process::exit(0);
                }
                SubscriberEvent::Connected(_) => {}
            }
        }
    });

    println!("Listening for messages. Type \"quit\" to stop listening.");
    println!("Anything else typed here will be broadcast to that channel.");

    let mut rl = repl::editor()?;
    loop {
        let line = match rl.readline("") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if commands::is_quit(line) {
            break;
        }
        if let Err(e) = subscriber.broadcast(&channel, line).await {
            println!("Error: unable to send ({}). Disconnecting.", e);
            break;
        }
    }

    let _ = rl.save_history(&repl::history_path());
    printer.abort();
    subscriber.disconnect().await;
    Ok(())
}
