use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::rc::Rc;
use std::time::Duration;

use frame_snap_common::bridge::Frame;
use softbuffer::{Context, Surface};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::platform::pump_events::EventLoopExtPumpEvents;
use winit::window::{Window, WindowId};

pub const KEY_ENTER: u32 = 13;
pub const KEY_ESC: u32 = 27;
pub const KEY_SPACE: u32 = 32;

/// Size of the window before the first frame arrives.
const PLACEHOLDER_SIZE: PhysicalSize<u32> = PhysicalSize::new(640, 480);

#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("failed to create event loop: {0}")]
    EventLoop(String),
    #[error("failed to create window: {0}")]
    Window(String),
    #[error("failed to draw frame: {0}")]
    Surface(String),
}

/// A visible surface that shows frames and reports key presses.
pub trait Display {
    /// Render `frame`, replacing whatever was shown before.
    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError>;

    /// Non-blocking: the next pending key press as an ASCII key code.
    fn poll_key(&mut self) -> Option<u32>;

    /// Tear the window down. Safe to call more than once.
    fn close(&mut self);
}

/// A winit window driven by pumping its event loop from the capture loop.
pub struct WindowDisplay {
    event_loop: EventLoop<()>,
    state: WindowState,
}

struct WindowState {
    title: String,
    window: Option<Rc<Window>>,
    #[allow(dead_code)]
    context: Option<Context<Rc<Window>>>,
    surface: Option<Surface<Rc<Window>, Rc<Window>>>,
    surface_size: Option<(u32, u32)>,
    keys: VecDeque<u32>,
    closed: bool,
    /// Error raised inside an event callback, surfaced by the next `show`.
    error: Option<DisplayError>,
}

impl WindowDisplay {
    /// Create the event loop and the window right away, so key presses are
    /// received before any frame has been shown.
    pub fn open(title: &str) -> Result<Self, DisplayError> {
        let event_loop = EventLoop::new().map_err(|e| DisplayError::EventLoop(e.to_string()))?;
        let mut display = Self {
            event_loop,
            state: WindowState {
                title: title.to_string(),
                window: None,
                context: None,
                surface: None,
                surface_size: None,
                keys: VecDeque::new(),
                closed: false,
                error: None,
            },
        };
        display.pump();
        if let Some(e) = display.state.error.take() {
            return Err(e);
        }
        Ok(display)
    }

    fn pump(&mut self) {
        let _ = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state);
    }
}

impl Display for WindowDisplay {
    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        self.pump();
        if let Some(e) = self.state.error.take() {
            return Err(e);
        }

        let state = &mut self.state;
        let (Some(window), Some(surface)) = (&state.window, &mut state.surface) else {
            return Ok(());
        };
        let (width, height) = frame.image.dimensions();
        let (Some(w), Some(h)) = (NonZeroU32::new(width), NonZeroU32::new(height)) else {
            return Ok(());
        };

        if state.surface_size != Some((width, height)) {
            let _ = window.request_inner_size(PhysicalSize::new(width, height));
            surface
                .resize(w, h)
                .map_err(|e| DisplayError::Surface(e.to_string()))?;
            state.surface_size = Some((width, height));
        }

        let mut buffer = surface
            .buffer_mut()
            .map_err(|e| DisplayError::Surface(e.to_string()))?;
        for (dst, px) in buffer.iter_mut().zip(frame.image.pixels()) {
            let [r, g, b] = px.0;
            *dst = (r as u32) << 16 | (g as u32) << 8 | b as u32;
        }
        buffer
            .present()
            .map_err(|e| DisplayError::Surface(e.to_string()))
    }

    fn poll_key(&mut self) -> Option<u32> {
        self.pump();
        self.state.keys.pop_front()
    }

    fn close(&mut self) {
        if self.state.closed {
            return;
        }
        self.state.closed = true;
        self.state.surface = None;
        self.state.context = None;
        self.state.window = None;
        // Let the platform process the destroyed window.
        self.pump();
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.closed {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(PLACEHOLDER_SIZE);
        let window = match event_loop.create_window(attributes) {
            Ok(w) => Rc::new(w),
            Err(e) => {
                self.error = Some(DisplayError::Window(e.to_string()));
                return;
            }
        };

        let surface = Context::new(Rc::clone(&window)).and_then(|context| {
            let surface = Surface::new(&context, Rc::clone(&window))?;
            Ok((context, surface))
        });
        match surface {
            Ok((context, surface)) => {
                self.context = Some(context);
                self.surface = Some(surface);
                self.window = Some(window);
            }
            Err(e) => self.error = Some(DisplayError::Surface(e.to_string())),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.keys.push_back(KEY_ESC),
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && !event.repeat =>
            {
                if let Some(code) = key_code(&event.logical_key) {
                    self.keys.push_back(code);
                }
            }
            _ => {}
        }
    }
}

/// Map a winit key to an ASCII key code. Non-ASCII characters have no code.
fn key_code(key: &Key) -> Option<u32> {
    match key {
        Key::Named(NamedKey::Escape) => Some(KEY_ESC),
        Key::Named(NamedKey::Space) => Some(KEY_SPACE),
        Key::Named(NamedKey::Enter) => Some(KEY_ENTER),
        Key::Character(s) => s
            .chars()
            .next()
            .and_then(|c| c.is_ascii().then_some(c as u32)),
        _ => None,
    }
}
