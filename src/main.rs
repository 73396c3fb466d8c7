use bill_sync::args::{Args, Command};
use bill_sync::{commands, Config, Mode, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, error, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match main_inner(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args) -> Result<()> {
    trace!("{args:?}");
    let home = args.common().bills_home().path();

    // This allows for running the program without a backend. When BILLS_IN_TEST_MODE is set and
    // non-zero in length, then the mode will be Mode::Test, otherwise it will be Mode::Http.
    let mode = Mode::from_env();

    let _: () = match args.command() {
        Command::Init(init_args) => commands::init(home, init_args.api_url()).await?.print(),

        Command::Serve(serve_args) => commands::serve(serve_args.clone()).await?.print(),

        Command::Login(login_args) => {
            let config = Config::load(home).await?;
            commands::login(&config, mode, login_args.token())
                .await?
                .print()
        }

        Command::Logout => commands::logout(&Config::load(home).await?).await?.print(),

        Command::List(list_args) => {
            let config = Config::load(home).await?;
            commands::list(&config, mode, list_args.filter())
                .await?
                .print()
        }

        Command::Add(add_args) => {
            let config = Config::load(home).await?;
            commands::add(&config, mode, add_args.clone()).await?.print()
        }

        Command::Edit(edit_args) => {
            let config = Config::load(home).await?;
            commands::edit(&config, mode, edit_args.clone())
                .await?
                .print()
        }

        Command::EditGroup(edit_args) => {
            let config = Config::load(home).await?;
            commands::edit_group(&config, mode, edit_args.clone())
                .await?
                .print()
        }

        Command::Pay(pay_args) => {
            let config = Config::load(home).await?;
            commands::pay(&config, mode, pay_args.clone()).await?.print()
        }

        Command::Note(note_args) => {
            let config = Config::load(home).await?;
            commands::note(&config, mode, note_args.clone())
                .await?
                .print()
        }

        Command::Delete(id_args) => {
            let config = Config::load(home).await?;
            commands::delete(&config, mode, id_args.id()).await?.print()
        }

        Command::Summary => commands::summary(&Config::load(home).await?, mode)
            .await?
            .print(),

        Command::Sync => commands::sync(&Config::load(home).await?, mode)
            .await?
            .print(),

        Command::Watch => commands::watch(&Config::load(home).await?, mode)
            .await?
            .print(),
    };
    Ok(())
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use default log level for the library and this binary only.
            EnvFilter::new(format!(
                "{}={},{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                level,
                env!("CARGO_BIN_NAME"),
                level
            ))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
