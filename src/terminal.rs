// SPDX-License-Identifier: GPL-3.0-only

//! Terminal-based live preview
//!
//! Renders the latest captured frame to the terminal using Unicode
//! half-block characters for improved vertical resolution. The loop waits on
//! the capture wake channel for at most one input-poll interval, takes the
//! newest frame, draws, and then drains pending key events.

use crate::capture::{
    CaptureHandle, CaptureSummary, DecodedFrame, FrameChannel, FrameConsumer, SessionInfo, Wake,
};
use crate::constants::preview;
use crate::errors::{CaptureError, CaptureResult};
use crate::format_converters::sample_rgb;
use crate::transform::TransformState;

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal, backend::CrosstermBackend, buffer::Buffer, layout::Rect, style::Color,
    widgets::Widget,
};
use std::io::{self, stdout};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interactive shortcuts, shown in `--help`
pub const SHORTCUTS: &str = "\
shortcuts:
  q, Esc, Ctrl+C: quit
  f: toggle fullscreen (hide status bar)
  r: ANGLE +90 (shift+r -90)
  m: FLIP next (shift+m prev)
  c: COLORMAP next (shift+c prev)";

/// A user command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    ToggleFullscreen,
    Rotate(i32),
    Mirror(i32),
    Colormap(i32),
}

/// Map a key press to a command
pub fn command_for(key: &KeyEvent) -> Option<Command> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    let step = preview::ROTATION_STEP_DEGREES;
    match key.code {
        KeyCode::Char('c') | KeyCode::Char('C')
            if key.modifiers.contains(KeyModifiers::CONTROL) =>
        {
            Some(Command::Quit)
        }
        KeyCode::Char('q') | KeyCode::Esc => Some(Command::Quit),
        KeyCode::Char('f') => Some(Command::ToggleFullscreen),
        KeyCode::Char('r') => Some(Command::Rotate(step)),
        KeyCode::Char('R') => Some(Command::Rotate(-step)),
        KeyCode::Char('m') => Some(Command::Mirror(1)),
        KeyCode::Char('M') => Some(Command::Mirror(-1)),
        KeyCode::Char('c') => Some(Command::Colormap(1)),
        KeyCode::Char('C') => Some(Command::Colormap(-1)),
        _ => None,
    }
}

/// Consumer-side view state
pub struct Viewer {
    pub transform: TransformState,
    pub fullscreen: bool,
    channel: FrameChannel,
    frame: Option<Arc<DecodedFrame>>,
    frames_shown: u64,
}

impl Viewer {
    pub fn new(transform: TransformState, channel: FrameChannel) -> Self {
        Self {
            transform,
            fullscreen: false,
            channel,
            frame: None,
            frames_shown: 0,
        }
    }

    /// Apply a command; returns `false` when the preview should quit
    pub fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::Quit => return false,
            Command::ToggleFullscreen => self.fullscreen = !self.fullscreen,
            Command::Rotate(delta) => self.transform.rotate(delta),
            Command::Mirror(step) => self.transform.cycle_mirror(step),
            Command::Colormap(step) => {
                self.transform.cycle_colormap(step);
                if self.channel != FrameChannel::Indexed {
                    debug!("Colormap only applies to GREY streams");
                }
            }
        }
        debug!(command = ?command, transform = ?self.transform, "Applied command");
        true
    }

    /// Show `frame` from now on; the previous one stays up until replaced
    pub fn update_frame(&mut self, frame: Arc<DecodedFrame>) {
        self.frames_shown += 1;
        self.frame = Some(frame);
    }

    pub fn frame(&self) -> Option<&DecodedFrame> {
        self.frame.as_deref()
    }
}

/// Run the preview until the user quits or capture ends
///
/// Returns the capture summary; a capture error that ended the session is
/// returned as the error. Capture is always stopped before returning.
pub fn run(
    mut handle: CaptureHandle,
    consumer: FrameConsumer,
    wakes: Receiver<Wake>,
    transform: TransformState,
) -> CaptureResult<CaptureSummary> {
    let presentation = |e: io::Error| CaptureError::Presentation(e.to_string());

    enable_raw_mode().map_err(presentation)?;
    let mut stdout = stdout();
    if let Err(e) = execute!(stdout, EnterAlternateScreen) {
        let _ = disable_raw_mode();
        return Err(presentation(e));
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = match Terminal::new(backend) {
        Ok(terminal) => terminal,
        Err(e) => {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen);
            return Err(presentation(e));
        }
    };

    let mut viewer = Viewer::new(transform, consumer.channel());
    let result = run_app(&mut terminal, &mut handle, &consumer, &wakes, &mut viewer);

    // Restore terminal
    let _ = disable_raw_mode();
    let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen);
    let _ = terminal.show_cursor();

    match result {
        Ok(Some(summary)) => Ok(summary),
        Ok(None) => handle.stop(),
        Err(e) => {
            // Capture keeps the device until stopped
            if !handle.is_joined()
                && let Err(stop_err) = handle.stop()
            {
                warn!(error = %stop_err, "Capture ended with an error");
            }
            Err(e)
        }
    }
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    handle: &mut CaptureHandle,
    consumer: &FrameConsumer,
    wakes: &Receiver<Wake>,
    viewer: &mut Viewer,
) -> CaptureResult<Option<CaptureSummary>> {
    let presentation = |e: io::Error| CaptureError::Presentation(e.to_string());
    let info = handle.info().clone();
    let mut dirty = true;

    loop {
        match wakes.recv_timeout(preview::INPUT_POLL_INTERVAL) {
            Ok(Wake::Frame(_)) | Ok(Wake::Stopped) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // Producer gone; avoid spinning until the closed check below
                std::thread::sleep(preview::INPUT_POLL_INTERVAL);
            }
        }

        if let Some(frame) = consumer.take_latest() {
            viewer.update_frame(frame);
            dirty = true;
        }

        if consumer.is_closed() {
            info!("Capture stopped, leaving preview");
            return handle.join().map(Some);
        }

        if dirty {
            let status = status_line(&info, viewer, consumer);
            terminal
                .draw(|f| {
                    let area = f.area();
                    let (frame_area, status_area) = if viewer.fullscreen {
                        (area, None)
                    } else {
                        // Reserve bottom line for status
                        (
                            Rect {
                                height: area.height.saturating_sub(1),
                                ..area
                            },
                            Some(Rect {
                                y: area.y + area.height.saturating_sub(1),
                                height: 1.min(area.height),
                                ..area
                            }),
                        )
                    };
                    f.render_widget(FrameWidget::new(viewer), frame_area);
                    if let Some(status_area) = status_area {
                        f.render_widget(StatusBar { message: &status }, status_area);
                    }
                })
                .map_err(presentation)?;
            dirty = false;
        }

        // Handle all pending input without blocking
        while event::poll(Duration::ZERO).map_err(presentation)? {
            match event::read().map_err(presentation)? {
                Event::Key(key) => {
                    if let Some(command) = command_for(&key) {
                        if !viewer.apply(command) {
                            return Ok(None);
                        }
                        dirty = true;
                    }
                }
                Event::Resize(..) => dirty = true,
                _ => {}
            }
        }
    }
}

fn status_line(info: &SessionInfo, viewer: &Viewer, consumer: &FrameConsumer) -> String {
    let stats = consumer.stats();
    let mut msg = format!(
        "{} {} | rot {}° | mirror {}",
        info.device,
        info.format,
        viewer.transform.rotation(),
        viewer.transform.mirror(),
    );
    if viewer.channel == FrameChannel::Indexed {
        msg.push_str(&format!(" | {}", viewer.transform.colormap()));
    }
    msg.push_str(&format!(
        " | shown {} dropped {} | 'q' quit 'f' full 'r' rotate 'm' mirror",
        viewer.frames_shown, stats.dropped
    ));
    if viewer.channel == FrameChannel::Indexed {
        msg.push_str(" 'c' colormap");
    }
    msg
}

/// Maps output pixels back to source pixels under rotation and mirroring
///
/// The rotated frame's bounding box is scaled to fit the output area and
/// centered. Mirroring is applied to the frame before it is rotated.
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    src_width: u32,
    src_height: u32,
    sin: f64,
    cos: f64,
    scale: f64,
    width: u32,
    height: u32,
    flip_h: bool,
    flip_v: bool,
}

/// sin/cos with exact values on the quarter turns
fn sin_cos(degrees: i32) -> (f64, f64) {
    match degrees.rem_euclid(360) {
        0 => (0.0, 1.0),
        90 => (1.0, 0.0),
        180 => (0.0, -1.0),
        270 => (-1.0, 0.0),
        d => (d as f64).to_radians().sin_cos(),
    }
}

impl Projection {
    /// Fit a `src_width` x `src_height` frame into `max_width` x `max_height`
    /// output pixels
    pub fn new(
        src_width: u32,
        src_height: u32,
        transform: &TransformState,
        max_width: u32,
        max_height: u32,
    ) -> Self {
        let (sin, cos) = sin_cos(transform.rotation());
        let (w, h) = (src_width as f64, src_height as f64);
        let box_w = w * cos.abs() + h * sin.abs();
        let box_h = w * sin.abs() + h * cos.abs();

        let scale = if box_w > 0.0 && box_h > 0.0 {
            (max_width as f64 / box_w).min(max_height as f64 / box_h)
        } else {
            0.0
        };
        let width = ((box_w * scale) as u32).min(max_width);
        let height = ((box_h * scale) as u32).min(max_height);

        Self {
            src_width,
            src_height,
            sin,
            cos,
            scale,
            width,
            height,
            flip_h: transform.mirror().flips_horizontal(),
            flip_v: transform.mirror().flips_vertical(),
        }
    }

    /// Output size in pixels
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Source pixel shown at output pixel (x, y), if any
    pub fn source(&self, x: u32, y: u32) -> Option<(u32, u32)> {
        if self.scale <= 0.0 {
            return None;
        }
        // Output pixel center relative to the output center, in source units
        let dx = (x as f64 + 0.5 - self.width as f64 / 2.0) / self.scale;
        let dy = (y as f64 + 0.5 - self.height as f64 / 2.0) / self.scale;

        // Undo the clockwise rotation
        let sx = dx * self.cos + dy * self.sin + self.src_width as f64 / 2.0;
        let sy = -dx * self.sin + dy * self.cos + self.src_height as f64 / 2.0;
        if sx < 0.0 || sy < 0.0 {
            return None;
        }
        let (mut sx, mut sy) = (sx as u32, sy as u32);
        if sx >= self.src_width || sy >= self.src_height {
            return None;
        }

        if self.flip_h {
            sx = self.src_width - 1 - sx;
        }
        if self.flip_v {
            sy = self.src_height - 1 - sy;
        }
        Some((sx, sy))
    }
}

/// Widget that renders a frame using half-block characters
struct FrameWidget<'a> {
    frame: Option<&'a DecodedFrame>,
    transform: &'a TransformState,
}

impl<'a> FrameWidget<'a> {
    fn new(viewer: &'a Viewer) -> Self {
        Self {
            frame: viewer.frame(),
            transform: &viewer.transform,
        }
    }
}

impl Widget for FrameWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let Some(frame) = self.frame else {
            // No frame yet - show placeholder
            let msg = "Waiting for camera...";
            let x = area.x + (area.width.saturating_sub(msg.len() as u16)) / 2;
            let y = area.y + area.height / 2;
            if y < area.y + area.height && x < area.x + area.width {
                buf.set_string(x, y, msg, ratatui::style::Style::default());
            }
            return;
        };

        // Each terminal cell displays 2 vertical pixels
        let projection = Projection::new(
            frame.width,
            frame.height,
            self.transform,
            area.width as u32,
            area.height as u32 * 2,
        );
        let (width, height) = projection.size();
        let rows = height.div_ceil(2);

        // Center the image
        let x_offset = area.x + (area.width.saturating_sub(width as u16)) / 2;
        let y_offset = area.y + (area.height.saturating_sub(rows as u16)) / 2;

        let palette = self.transform.colormap().palette();
        let color_at = |x: u32, y: u32| -> Color {
            match projection.source(x, y) {
                Some((sx, sy)) => {
                    let [r, g, b] = sample_rgb(frame, sx, sy, palette);
                    Color::Rgb(r, g, b)
                }
                None => Color::Black,
            }
        };

        // Upper half (▀) colored with fg, lower half with bg
        for ty in 0..rows {
            for tx in 0..width {
                let term_x = x_offset + tx as u16;
                let term_y = y_offset + ty as u16;
                let Some(cell) = buf.cell_mut((term_x, term_y)) else {
                    continue;
                };
                cell.set_char('▀');
                cell.set_fg(color_at(tx, ty * 2));
                cell.set_bg(color_at(tx, ty * 2 + 1));
            }
        }
    }
}

/// Status bar widget
struct StatusBar<'a> {
    message: &'a str,
}

impl Widget for StatusBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        // Fill background
        for x in area.x..area.x + area.width {
            if let Some(cell) = buf.cell_mut((x, area.y)) {
                cell.set_char(' ');
                cell.set_bg(Color::DarkGray);
            }
        }

        let text: String = self.message.chars().take(area.width as usize).collect();
        buf.set_string(
            area.x,
            area.y,
            text,
            ratatui::style::Style::default()
                .fg(Color::White)
                .bg(Color::DarkGray),
        );
    }
}
