//! Interactive session: live event feed plus answers read from stdin.

use std::time::Duration;

use anyhow::Result;
use riddle_core::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use crate::session::Session;

/// How often new feed entries are printed.
const FEED_TICK: Duration = Duration::from_millis(200);

const HELP: &str = "Type an answer and press enter. Commands: /as <address>, /publish <riddle> | <answer> (bot account), /help, /quit";

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Answer(String),
    SwitchIdentity(Address),
    Publish { riddle: String, answer: String },
    Help,
    Quit,
    Empty,
}

fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Input::Answer(line.to_string()));
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, rest)| (name, rest.trim()));
    match name {
        "quit" | "exit" => Ok(Input::Quit),
        "help" => Ok(Input::Help),
        "as" => parse_address(rest)
            .map(Input::SwitchIdentity)
            .map_err(|e| format!("bad address: {e}")),
        "publish" => match rest.split_once('|') {
            Some((riddle, answer)) if !riddle.trim().is_empty() && !answer.trim().is_empty() => {
                Ok(Input::Publish {
                    riddle: riddle.trim().to_string(),
                    answer: answer.trim().to_string(),
                })
            }
            _ => Err("usage: /publish <riddle> | <answer>".to_string()),
        },
        other => Err(format!("unknown command /{other}")),
    }
}

fn print_state(state: &PuzzleState) {
    let status = if state.is_open { "open" } else { "solved" };
    println!("== {} [{status}]", state.text);
}

/// Runs until stdin closes, `/quit`, or Ctrl-C. Subscriptions are always
/// torn down before returning.
pub async fn run(session: &Session, from: Option<Address>) -> Result<()> {
    let client = session.client().clone();
    let mut identity = session.identity(from).await;
    match identity {
        Some(me) => info!(identity = %checksum_address(&me), "Playing"),
        None => warn!("No account available; answers cannot be submitted"),
    }

    let publisher = session.publisher(None).await;

    let mut manager = client.subscription_manager(EventFeed::new());
    if let Err(e) = manager.start(identity).await {
        // the failed stream already left a diagnostic in the feed
        warn!(error = %e, "Could not open every subscription");
    }
    match manager.refresh_now().await {
        Ok(state) => print_state(&state),
        Err(e) => error!(error = %e, "Could not read the riddle"),
    }
    println!("{HELP}");

    let mut state_rx = manager.watch_state();
    state_rx.borrow_and_update();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(FEED_TICK);
    let mut cursor = 0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break Ok(());
            }
            Ok(()) = state_rx.changed() => {
                let state = state_rx.borrow_and_update().clone();
                print_state(&state);
            }
            _ = ticker.tick() => {
                let entries = manager.feed().since(cursor);
                cursor += entries.len();
                for entry in entries {
                    println!("{entry}");
                }
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e.into()),
                };
                match parse_input(&line) {
                    Ok(Input::Quit) => break Ok(()),
                    Ok(Input::Empty) => {}
                    Ok(Input::Help) => println!("{HELP}"),
                    Ok(Input::Answer(answer)) => submit_in_background(&client, answer, identity),
                    Ok(Input::SwitchIdentity(me)) => {
                        identity = Some(me);
                        if let Err(e) = manager.rebind(identity).await {
                            warn!(error = %e, "Could not resubscribe");
                        }
                        println!("Now playing as {}", checksum_address(&me));
                    }
                    Ok(Input::Publish { riddle, answer }) => {
                        publish_in_background(&client, &riddle, &answer, publisher);
                    }
                    Err(message) => println!("{message}"),
                }
            }
        }
    };

    manager.shutdown();
    outcome
}

/// Submissions run on their own task so the feed keeps printing while the
/// transaction finalizes.
fn submit_in_background(client: &RiddleClient, answer: String, identity: Option<Identity>) {
    let request = match SubmissionRequest::checked(&answer, identity) {
        Ok(request) => request,
        Err(e) => {
            println!("{}", e.user_message());
            return;
        }
    };

    println!("Submitting...");
    let client = client.clone();
    tokio::spawn(async move {
        match client.submit_answer(&request).await {
            Ok(correct) => println!("{}", verdict_message(correct)),
            Err(e) => {
                error!(error = %e, "Submission failed");
                println!("{}", e.user_message());
            }
        }
    });
}

fn publish_in_background(
    client: &RiddleClient,
    riddle: &str,
    answer: &str,
    publisher: Option<Identity>,
) {
    let request = match PublishRequest::checked(riddle, answer, publisher) {
        Ok(request) => request,
        Err(e) => {
            println!("{}", e.user_message());
            return;
        }
    };

    println!("Publishing...");
    let client = client.clone();
    tokio::spawn(async move {
        if let Err(e) = client.publish_riddle(&request).await {
            error!(error = %e, "Publication failed");
            println!("Could not publish: {}", e.user_message());
        }
    });
}
