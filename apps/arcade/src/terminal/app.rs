use std::sync::Arc;

use arcade_proto::GameEntry;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::peer::webrtc::WebRtcPeerFactory;
use crate::session::{SessionController, SessionHandle};
use crate::signaling::SignalingChannel;
use crate::terminal::cli::Cli;
use crate::terminal::commands::{HELP, LineCommand, parse_line};
use crate::terminal::error::CliError;

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = cli.config();
    let signaling_config = config.signaling()?;
    let factory = WebRtcPeerFactory::new(config.ice_servers.clone())
        .map_err(|err| CliError::PeerSetup(err.to_string()))?;
    info!(
        target: "arcade::session",
        url = %signaling_config.url,
        ice_servers = ?config.ice_servers,
        "starting arcade client"
    );

    let (signaling, events) = SignalingChannel::connect(signaling_config);
    let (controller, handle) = SessionController::new(signaling, events, Arc::new(factory));
    let mut session = tokio::spawn(controller.run());
    let reporter = tokio::spawn(report(handle.clone(), cli.game.clone()));

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let finished = loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => match parse_line(&line) {
                    Ok(Some(LineCommand::Quit)) => break None,
                    Ok(Some(command)) => dispatch(&handle, command)?,
                    Ok(None) => {}
                    Err(err) => println!("{err}"),
                },
                None => {
                    debug!(target: "arcade::session", "stdin closed");
                    break None;
                }
            },
            _ = &mut ctrl_c => {
                println!();
                break None;
            }
            joined = &mut session => break Some(joined),
        }
    };

    let joined = match finished {
        Some(joined) => joined,
        None => {
            let _ = handle.shutdown();
            session.await
        }
    };
    reporter.abort();
    match joined {
        Ok(result) => Ok(result?),
        Err(err) => Err(CliError::Runtime(err.to_string())),
    }
}

fn dispatch(handle: &SessionHandle, command: LineCommand) -> Result<(), CliError> {
    match command {
        LineCommand::List => print_catalog(&handle.catalog()),
        LineCommand::Start(game) => handle.start_game(game)?,
        LineCommand::Stop => handle.stop_game()?,
        LineCommand::Key { code, pressed } => handle.key(code, pressed)?,
        LineCommand::Mouse(input) => handle.mouse(input)?,
        LineCommand::Help => println!("{HELP}"),
        LineCommand::Quit => handle.shutdown()?,
    }
    Ok(())
}

async fn report(handle: SessionHandle, mut autostart: Option<String>) {
    let mut state = handle.subscribe_state();
    let mut catalog = handle.subscribe_catalog();
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("[{}]", *state.borrow_and_update());
            }
            changed = catalog.changed() => {
                if changed.is_err() {
                    break;
                }
                let games = catalog.borrow_and_update().clone();
                print_catalog(&games);
                let listed = autostart.take_if(|game| games.iter().any(|entry| entry.name == *game));
                if let Some(game) = listed {
                    println!("starting {game}");
                    if handle.start_game(game).is_err() {
                        break;
                    }
                }
            }
        }
    }
}

fn print_catalog(games: &[GameEntry]) {
    if games.is_empty() {
        println!("no games listed yet");
        return;
    }
    println!("games:");
    for game in games {
        println!("  {}", game.name);
    }
}
