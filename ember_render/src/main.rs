use std::process::ExitCode;

use ember_render::frame::{Application, WINDOW_HEIGHT, WINDOW_TITLE, WINDOW_WIDTH};
use ember_window::Window;
use glam::UVec2;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // The single reporting point for every fatal condition.
            error!("fatal: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let window = Window::new(WINDOW_TITLE, UVec2::new(WINDOW_WIDTH, WINDOW_HEIGHT))?;
    let mut app = Application::new(window)?;
    app.run()?;
    Ok(())
}
