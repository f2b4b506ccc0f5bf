mod app;
mod db;
mod utils;

use app::{App, Cli};
use clap::Parser;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let code = match App::new(cli).and_then(App::run) {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err}");
            2
        }
    };
    std::process::exit(code);
}
