use crossterm::{
    cursor, queue,
    style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor},
    terminal,
};
use glam::{Mat4, Vec4};
use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use crate::camera::Camera;
use crate::controller::FpsController;
use crate::input::state::InputState;
use crate::sorter::{DistanceData, SortClient, SortMessage};
use crate::splat::{compute_view_distances, Splat};

pub type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

pub const HALF_BLOCK: char = '\u{2584}';
pub const FRAME_TARGET: Duration = Duration::from_millis(8);
/// Physics steps are clamped so a stalled frame cannot tunnel the body
/// through a wall.
pub const MAX_PHYSICS_STEP: f32 = 0.02;

/// World-space radius a splat is billboarded at in the point view.
const SPLAT_WORLD_RADIUS: f32 = 0.045;
const MAX_SPLAT_PIXEL_RADIUS: f32 = 5.0;

pub fn rgb_to_ansi256(r: u8, g: u8, b: u8) -> u8 {
    if r == g && g == b {
        if r < 8 {
            return 16;
        }
        if r > 248 {
            return 231;
        }
        return 232 + ((r as f32 - 8.0) / 247.0 * 24.0) as u8;
    }
    let ri = (r as f32 / 255.0 * 5.0 + 0.5) as u8;
    let gi = (g as f32 / 255.0 * 5.0 + 0.5) as u8;
    let bi = (b as f32 / 255.0 * 5.0 + 0.5) as u8;
    16 + 36 * ri + 6 * gi + bi
}

pub fn make_color(r: u8, g: u8, b: u8, use_truecolor: bool) -> Color {
    if use_truecolor {
        Color::Rgb { r, g, b }
    } else {
        Color::AnsiValue(rgb_to_ansi256(r, g, b))
    }
}

#[derive(Debug)]
pub struct RenderState {
    pub framebuffer: Vec<[f32; 3]>,
    pub width: usize,
    pub height: usize,
}

pub fn resize_render_state(state: &mut RenderState, width: usize, height: usize) {
    if state.width != width || state.height != height {
        state.framebuffer.resize(width * height, [0.0; 3]);
        state.width = width;
        state.height = height;
    }
}

pub fn clear_framebuffer(state: &mut RenderState) {
    state.framebuffer.fill([0.0; 3]);
}

/// Paints splats in the order given, which the sorter guarantees to be
/// back-to-front, so plain over-compositing is correct with no depth buffer.
pub fn paint_splats(
    state: &mut RenderState,
    splats: &[Splat],
    order: &[u32],
    view_proj: &Mat4,
    focal_px: f32,
) {
    let width = state.width;
    let height = state.height;
    let half_w = width as f32 * 0.5;
    let half_h = height as f32 * 0.5;

    for &idx in order {
        let splat = match splats.get(idx as usize) {
            Some(splat) => *splat,
            None => continue,
        };
        let clip = *view_proj * Vec4::new(splat.position.x, splat.position.y, splat.position.z, 1.0);
        if clip.w <= 0.1 {
            continue;
        }
        let inv_w = 1.0 / clip.w;
        let ndc_x = clip.x * inv_w;
        let ndc_y = clip.y * inv_w;
        if ndc_x.abs() > 1.1 || ndc_y.abs() > 1.1 {
            continue;
        }

        let px = (ndc_x + 1.0) * half_w;
        let py = (1.0 - ndc_y) * half_h;
        let radius =
            (SPLAT_WORLD_RADIUS * focal_px * inv_w).clamp(1.0, MAX_SPLAT_PIXEL_RADIUS);

        let r = splat.color[0] as f32 / 255.0;
        let g = splat.color[1] as f32 / 255.0;
        let b = splat.color[2] as f32 / 255.0;
        let r2 = radius * radius;

        let x_min = (px - radius).floor().max(0.0) as usize;
        let x_max = ((px + radius).ceil() as usize).min(width.saturating_sub(1));
        let y_min = (py - radius).floor().max(0.0) as usize;
        let y_max = ((py + radius).ceil() as usize).min(height.saturating_sub(1));
        if x_min > x_max || y_min > y_max {
            continue;
        }

        for y in y_min..=y_max {
            let dy = y as f32 + 0.5 - py;
            let row = y * width;
            for x in x_min..=x_max {
                let dx = x as f32 + 0.5 - px;
                let falloff = 1.0 - (dx * dx + dy * dy) / r2;
                if falloff <= 0.0 {
                    continue;
                }
                let alpha = (splat.opacity * falloff).clamp(0.0, 1.0);
                let dst = &mut state.framebuffer[row + x];
                dst[0] = r * alpha + dst[0] * (1.0 - alpha);
                dst[1] = g * alpha + dst[1] * (1.0 - alpha);
                dst[2] = b * alpha + dst[2] * (1.0 - alpha);
            }
        }
    }
}

fn to_u8(channel: f32) -> u8 {
    (channel * 255.0).round().clamp(0.0, 255.0) as u8
}

#[derive(Debug)]
pub struct AppState {
    pub camera: Camera,
    pub controller: FpsController,
    pub splats: Vec<Splat>,
    pub sorter: SortClient,
    pub sorted: Vec<u32>,
    pub render_state: RenderState,
    pub hud_string_buf: String,
    pub input_state: InputState,
    pub show_hud: bool,
    pub frame_count: u64,
    pub last_frame_time: Instant,
    pub fps: f32,
    pub last_sort_time: Duration,
    pub last_sort_count: usize,
    pub last_render_count: usize,
    /// Feed the sorter per-splat view distances instead of letting the
    /// kernel project centers itself.
    pub use_precomputed: bool,
    pub use_truecolor: bool,
    /// Scene transforms to submit with the first sort when the sorter runs
    /// in dynamic mode.
    pub pending_transforms: Option<Vec<f32>>,
}

impl AppState {
    pub fn new(
        splats: Vec<Splat>,
        sorter: SortClient,
        controller: FpsController,
        use_truecolor: bool,
    ) -> Self {
        let eye = controller.body_position() + glam::Vec3::Y * controller.options().camera_height;
        let camera = Camera::new(eye, controller.yaw(), controller.pitch());

        Self {
            camera,
            controller,
            splats,
            sorter,
            sorted: Vec::new(),
            render_state: RenderState {
                framebuffer: Vec::new(),
                width: 0,
                height: 0,
            },
            hud_string_buf: String::new(),
            input_state: InputState::default(),
            show_hud: true,
            frame_count: 0,
            last_frame_time: Instant::now(),
            fps: 0.0,
            last_sort_time: Duration::ZERO,
            last_sort_count: 0,
            last_render_count: 0,
            use_precomputed: false,
            use_truecolor,
            pending_transforms: None,
        }
    }

    /// Runs one depth sort against the current camera and leaves the
    /// back-to-front order in `self.sorted`.
    pub fn sort_for_camera(&mut self, aspect: f32) -> AppResult<()> {
        let count = self.sorter.splat_count();
        // The candidate list is static for a single-scene walkthrough and the
        // arena keeps it between sorts, so it is submitted once: written
        // through the handle in shared mode, carried on the first sort
        // message in copy mode.
        let mut indexes_to_sort = None;
        let mut transforms = None;
        if self.frame_count == 0 && self.sorted.is_empty() {
            let identity: Vec<u32> = (0..count as u32).collect();
            if self.sorter.uses_shared_memory() {
                self.sorter.write_indexes_to_sort(&identity)?;
                if let Some(pending) = self.pending_transforms.take() {
                    self.sorter.write_transforms(&pending)?;
                }
            } else {
                indexes_to_sort = Some(identity);
                transforms = self.pending_transforms.take();
            }
        }

        let model_view_proj = self.camera.model_view_projection(aspect);
        let mut precomputed_distances = None;
        if self.use_precomputed {
            let distances = compute_view_distances(&self.splats, &model_view_proj);
            if self.sorter.uses_shared_memory() {
                self.sorter.write_precomputed_distances_f32(&distances)?;
            } else {
                precomputed_distances = Some(DistanceData::Float(distances));
            }
        }

        let done = self.sorter.request_sort(SortMessage {
            splat_sort_count: count,
            splat_render_count: count,
            model_view_proj,
            use_precomputed_distances: self.use_precomputed,
            indexes_to_sort,
            precomputed_distances,
            transforms,
        })?;
        self.last_sort_time = done.sort_time;
        self.last_sort_count = done.splat_sort_count;
        self.last_render_count = done.splat_render_count;
        self.sorter.read_sorted(&done, &mut self.sorted);
        Ok(())
    }
}

fn truncate_and_pad_in_place(text: &mut String, width: usize) {
    if width == 0 {
        text.clear();
        return;
    }

    let mut seen_chars = 0usize;
    let mut truncate_byte = None;
    for (idx, _) in text.char_indices() {
        if seen_chars == width {
            truncate_byte = Some(idx);
            break;
        }
        seen_chars += 1;
    }

    if let Some(idx) = truncate_byte {
        text.truncate(idx);
    } else {
        for _ in seen_chars..width {
            text.push(' ');
        }
    }
}

pub fn draw_hud(app_state: &mut AppState, cols: u16, rows: u16, stdout: &mut impl Write) -> io::Result<()> {
    let width = cols as usize;
    let pos = app_state.controller.body_position();
    let velocity = app_state.controller.velocity();
    let speed = (velocity.x * velocity.x + velocity.z * velocity.z).sqrt();
    let hud = &mut app_state.hud_string_buf;
    hud.clear();
    write!(
        hud,
        "FPS:{:>5.1}  Sorted:{}/{}  Sort:{:>5}us  Pos:({:>6.2},{:>6.2},{:>6.2})  Spd:{:.2}  Jump:{}  Kernel:{}  Mem:{}  Look:{}  Cores:{}",
        app_state.fps,
        app_state.last_sort_count,
        app_state.splats.len(),
        app_state.last_sort_time.as_micros(),
        pos.x,
        pos.y,
        pos.z,
        speed,
        if app_state.controller.can_jump() { "ok" } else { "air" },
        app_state.sorter.variant().name(),
        if app_state.sorter.uses_shared_memory() {
            "shared"
        } else {
            "copy"
        },
        if app_state.controller.pointer_locked() {
            "locked"
        } else {
            "free"
        },
        rayon::current_num_threads()
    )
    .map_err(|_| io::Error::other("failed to format HUD"))?;
    truncate_and_pad_in_place(hud, width);

    let tc = app_state.use_truecolor;
    queue!(
        stdout,
        cursor::MoveTo(0, 0),
        SetBackgroundColor(make_color(0, 0, 0, tc)),
        SetForegroundColor(make_color(245, 245, 245, tc)),
        Print(hud.as_str())
    )?;

    hud.clear();
    hud.push_str("WASD:Move  Mouse/Arrows:Look  Space:Jump  C:Mouse lock  Tab:HUD  Q/Esc:Quit");
    truncate_and_pad_in_place(hud, width);

    queue!(
        stdout,
        cursor::MoveTo(0, rows - 1),
        SetBackgroundColor(make_color(0, 0, 0, tc)),
        SetForegroundColor(make_color(220, 220, 220, tc)),
        Print(hud.as_str())
    )?;

    Ok(())
}

pub fn render_frame(
    app_state: &mut AppState,
    terminal_size: (u16, u16),
    stdout: &mut impl Write,
) -> AppResult<()> {
    let cols = terminal_size.0.max(1);
    let rows = terminal_size.1.max(1);
    let term_cols = cols as usize;
    let term_rows = rows as usize;

    // Halfblock cells: one terminal row is two square-ish pixels tall.
    let px_width = term_cols;
    let px_height = term_rows * 2;
    let aspect = px_width as f32 / px_height as f32;

    app_state.sort_for_camera(aspect)?;

    resize_render_state(&mut app_state.render_state, px_width, px_height);
    clear_framebuffer(&mut app_state.render_state);

    let view_proj = app_state.camera.projection_matrix(aspect) * app_state.camera.view_matrix();
    let focal_px = app_state.camera.projection_matrix(aspect).y_axis.y * px_height as f32 * 0.5;
    let order = &app_state.sorted[..app_state.last_render_count.min(app_state.sorted.len())];
    paint_splats(
        &mut app_state.render_state,
        &app_state.splats,
        order,
        &view_proj,
        focal_px,
    );

    let fb = &app_state.render_state.framebuffer;
    let mut last_bg: Option<[u8; 3]> = None;
    let mut last_fg: Option<[u8; 3]> = None;
    for term_row in 0..term_rows {
        if app_state.show_hud && (term_row == 0 || term_row == term_rows - 1) {
            last_bg = None;
            last_fg = None;
            continue;
        }

        queue!(stdout, cursor::MoveTo(0, term_row as u16))?;
        let top_y = term_row * 2;
        let bot_y = top_y + 1;
        for x in 0..term_cols {
            let top = fb[top_y * px_width + x];
            let bot = fb[bot_y * px_width + x];
            let bg = [to_u8(top[0]), to_u8(top[1]), to_u8(top[2])];
            let fg = [to_u8(bot[0]), to_u8(bot[1]), to_u8(bot[2])];

            if last_bg != Some(bg) {
                queue!(
                    stdout,
                    SetBackgroundColor(make_color(bg[0], bg[1], bg[2], app_state.use_truecolor))
                )?;
                last_bg = Some(bg);
            }
            if last_fg != Some(fg) {
                queue!(
                    stdout,
                    SetForegroundColor(make_color(fg[0], fg[1], fg[2], app_state.use_truecolor))
                )?;
                last_fg = Some(fg);
            }
            queue!(stdout, Print(HALF_BLOCK))?;
        }
    }

    if app_state.show_hud {
        draw_hud(app_state, cols, rows, stdout)?;
    }

    queue!(stdout, ResetColor)?;
    stdout.flush()?;
    Ok(())
}

pub fn run_app_loop(
    app_state: &mut AppState,
    input_rx: &crate::input::thread::InputReceiver,
    stdout: &mut io::BufWriter<io::Stdout>,
) -> AppResult<()> {
    loop {
        let frame_start = Instant::now();

        // Drain all pending input events before stepping, never skip.
        if crate::input::drain_input_events(app_state, input_rx)? {
            break;
        }

        let now = Instant::now();
        let delta_time = now
            .duration_since(app_state.last_frame_time)
            .as_secs_f32()
            .max(1e-6);
        app_state.last_frame_time = now;

        let (look_dx, look_dy) = app_state.input_state.take_look_delta();
        app_state.controller.mouse_delta(look_dx, look_dy);
        if std::mem::take(&mut app_state.input_state.jump_requested) {
            app_state.controller.jump();
        }
        app_state.controller.intent = app_state.input_state.intent();

        let pose = app_state.controller.update(delta_time.min(MAX_PHYSICS_STEP));
        app_state.camera.set_pose(&pose);

        let terminal_size = terminal::size()?;
        render_frame(app_state, terminal_size, stdout)?;

        app_state.frame_count += 1;
        let instant_fps = 1.0 / delta_time;
        app_state.fps = if app_state.fps <= 0.01 {
            instant_fps
        } else {
            0.90 * app_state.fps + 0.10 * instant_fps
        };

        let spent = frame_start.elapsed();
        if spent < FRAME_TARGET {
            std::thread::sleep(FRAME_TARGET - spent);
        }
    }

    Ok(())
}
