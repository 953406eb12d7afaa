//! Thin windowing and input layer over `winit`.
//!
//! The renderer only consumes a small surface from the OS window: raw
//! display/window handles for surface creation, the framebuffer size, a
//! resize flag and a per-frame batch of input events. Everything else that
//! `winit` offers is intentionally not exposed.

pub mod events;

use std::time::Duration;

use events::{CameraMove, CursorMoved, WindowEvent, WindowResized};
use glam::{UVec2, Vec2};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::debug;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent as WinitWindowEvent};
use winit::event_loop::EventLoop;
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::platform::pump_events::EventLoopExtPumpEvents;
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Debug)]
pub enum Error {
    EventLoop(winit::error::EventLoopError),
    Os(winit::error::OsError),
    Handle(raw_window_handle::HandleError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EventLoop(err) => write!(f, "event loop error: {err}"),
            Self::Os(err) => write!(f, "window creation failed: {err}"),
            Self::Handle(err) => write!(f, "window handle unavailable: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::EventLoop(err) => Some(err),
            Self::Os(err) => Some(err),
            Self::Handle(err) => Some(err),
        }
    }
}

/// A single OS window driven by polling.
///
/// The window never holds a reference back to the renderer; input is drained
/// through [`poll_events`] each frame instead.
///
/// [`poll_events`]: Self::poll_events
pub struct Window {
    event_loop: EventLoop<()>,
    window: winit::window::Window,
    resized: bool,
    close_requested: bool,
}

impl Window {
    pub fn new(title: &str, size: UVec2) -> Result<Self, Error> {
        let event_loop = EventLoop::new().map_err(Error::EventLoop)?;

        let window = winit::window::WindowBuilder::new()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(size.x, size.y))
            .build(&event_loop)
            .map_err(Error::Os)?;

        Ok(Self {
            event_loop,
            window,
            resized: false,
            close_requested: false,
        })
    }

    /// The current framebuffer size in pixels.
    ///
    /// Both dimensions are zero while the window is minimized.
    pub fn inner_size(&self) -> UVec2 {
        let size = self.window.inner_size();
        UVec2::new(size.width, size.height)
    }

    pub fn raw_display_handle(&self) -> Result<RawDisplayHandle, Error> {
        Ok(self.window.display_handle().map_err(Error::Handle)?.as_raw())
    }

    pub fn raw_window_handle(&self) -> Result<RawWindowHandle, Error> {
        Ok(self.window.window_handle().map_err(Error::Handle)?.as_raw())
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    /// Returns whether a resize occurred since the last call and clears the
    /// flag.
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    /// Pumps the OS event queue without blocking and returns the input events
    /// that arrived since the last poll.
    pub fn poll_events(&mut self) -> Vec<WindowEvent> {
        let mut events = Vec::new();

        let window = &self.window;
        let resized = &mut self.resized;
        let close_requested = &mut self.close_requested;

        self.event_loop
            .pump_events(Some(Duration::ZERO), |event, _| {
                let Event::WindowEvent { window_id, event } = event else {
                    return;
                };

                if window_id != window.id() {
                    return;
                }

                match event {
                    WinitWindowEvent::CloseRequested => {
                        debug!("window close requested");
                        *close_requested = true;
                        events.push(WindowEvent::CloseRequested);
                    }
                    WinitWindowEvent::Resized(size) => {
                        *resized = true;
                        events.push(WindowEvent::Resized(WindowResized {
                            width: size.width,
                            height: size.height,
                        }));
                    }
                    WinitWindowEvent::CursorMoved { position, .. } => {
                        events.push(WindowEvent::CursorMoved(CursorMoved {
                            position: Vec2::new(position.x as f32, position.y as f32),
                        }));
                    }
                    WinitWindowEvent::KeyboardInput {
                        event:
                            KeyEvent {
                                physical_key: PhysicalKey::Code(code),
                                state: ElementState::Pressed,
                                ..
                            },
                        ..
                    } => {
                        if let Some(mv) = camera_move(code) {
                            events.push(WindowEvent::CameraMove(mv));
                        }
                    }
                    _ => (),
                }
            });

        events
    }

    /// Blocks until the OS delivers events, then processes them.
    ///
    /// Used while the window is minimized and the swapchain cannot be
    /// recreated (zero-sized framebuffer).
    pub fn wait_events(&mut self) {
        let window = &self.window;
        let resized = &mut self.resized;
        let close_requested = &mut self.close_requested;

        self.event_loop.pump_events(None, |event, _| {
            let Event::WindowEvent { window_id, event } = event else {
                return;
            };

            if window_id != window.id() {
                return;
            }

            match event {
                WinitWindowEvent::CloseRequested => *close_requested = true,
                WinitWindowEvent::Resized(_) => *resized = true,
                _ => (),
            }
        });
    }
}

fn camera_move(code: KeyCode) -> Option<CameraMove> {
    match code {
        KeyCode::KeyW => Some(CameraMove::Forward),
        KeyCode::KeyA => Some(CameraMove::Left),
        KeyCode::KeyS => Some(CameraMove::Back),
        KeyCode::KeyD => Some(CameraMove::Right),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use winit::keyboard::KeyCode;

    use super::camera_move;
    use super::events::CameraMove;

    #[test]
    fn wasd_maps_to_camera_moves() {
        assert_eq!(camera_move(KeyCode::KeyW), Some(CameraMove::Forward));
        assert_eq!(camera_move(KeyCode::KeyA), Some(CameraMove::Left));
        assert_eq!(camera_move(KeyCode::KeyS), Some(CameraMove::Back));
        assert_eq!(camera_move(KeyCode::KeyD), Some(CameraMove::Right));
        assert_eq!(camera_move(KeyCode::Space), None);
    }
}
