use glam::Vec2;

/// An input event forwarded to the active cameras.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum WindowEvent {
    CloseRequested,
    Resized(WindowResized),
    CursorMoved(CursorMoved),
    CameraMove(CameraMove),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct WindowResized {
    pub width: u32,
    pub height: u32,
}

/// The cursor moved inside the window.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CursorMoved {
    pub position: Vec2,
}

/// A camera move command derived from a WASD key press.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CameraMove {
    Left,
    Right,
    Forward,
    Back,
}
