//! Structured logging bootstrap (spec §4.11). Thin wrapper around
//! `env_logger` so both binaries initialize logging identically; grounded on
//! the teacher's `main.rs`, which calls `dotenvy::dotenv().ok()` then
//! `env_logger::init()` as the first two lines of `main`.

pub fn init() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
