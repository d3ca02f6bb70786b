use std::io::{self, Write};

use clap::Parser;
use log::debug;
use streamchat::{Exchange, ExchangeUpdate, Session, SessionConfig};
use streamchat_cli::args::{Cli, DEFAULT_LOG_FILTER, ENV_LOG};
use streamchat_cli::commands::{parse_slash_command, SlashCommand, HELP_TEXT};
use streamchat_cli::output::{markup_reply, status_line, StreamPrinter, DISABLED_BANNER};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::new().filter_or(ENV_LOG, DEFAULT_LOG_FILTER))
        .init();

    let config = cli.session_config(SessionConfig::from_env());
    debug!("starting with {config:?}");
    let session = Session::new(config).map_err(io::Error::other)?;

    if session.is_disabled() {
        println!("{DISABLED_BANNER}");
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_slash_command(&line) {
            Some(SlashCommand::Quit) => break,
            Some(SlashCommand::Help) => println!("{HELP_TEXT}"),
            Some(SlashCommand::Transcript) => {
                for (user, assistant) in session.pairs() {
                    println!("user: {user}\nassistant: {assistant}");
                }
            }
            Some(SlashCommand::Unknown(command)) => {
                println!("unknown command {command}, try /help");
            }
            None => match session.submit(line, cli.sampling()) {
                Ok(exchange) => {
                    let last = stream_reply(exchange, cli.markup).await?;
                    println!("{}", status_line(&last));
                }
                Err(error) => println!("[{error}]"),
            },
        }
    }

    Ok(())
}

fn prompt() -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()
}

/// Print the reply as it streams and return the final snapshot. Ctrl-C
/// cancels the exchange instead of leaving.
async fn stream_reply(mut exchange: Exchange, markup: bool) -> io::Result<ExchangeUpdate> {
    let mut printer = StreamPrinter::new();
    let mut stdout = io::stdout();
    let mut last = exchange.latest();

    loop {
        let update = tokio::select! {
            update = exchange.next_update() => update,
            _ = tokio::signal::ctrl_c() => {
                exchange.cancel();
                continue;
            }
        };
        let Some(update) = update else {
            break;
        };

        if !markup {
            if let Some(delta) = printer.delta(&update) {
                write!(stdout, "{delta}")?;
                stdout.flush()?;
            }
        }
        last = update;
    }

    if markup {
        if let Some(reply) = markup_reply(&last) {
            write!(stdout, "{reply}")?;
        }
    }
    writeln!(stdout)?;
    Ok(last)
}
