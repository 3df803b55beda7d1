mod api;
mod app;
mod error;
mod services;
mod storage;
mod ui;
mod utils;

use adw::prelude::*;
use adw::Application;

fn main() {
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut state = crate::app::AppState::load();
    let backend = crate::app::connect_backend(&mut state);

    let app = Application::builder()
        .application_id("com.example.FirechatGtk")
        .build();
    app.connect_activate(move |app| {
        crate::app::build_ui(app, backend.clone(), state.clone());
    });
    app.run();
}
