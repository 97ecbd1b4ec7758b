pub mod state;
pub mod thread;

use crate::render::AppState;
use crossterm::event::{Event, KeyCode, KeyEventKind, MouseEvent, MouseEventKind};
use std::sync::mpsc::{Receiver, TryRecvError};

pub type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Approximate pixel footprint of one terminal cell, used to turn coarse
/// cell-grid mouse deltas into pointer-style pixel deltas.
const MOUSE_CELL_PX_X: f32 = 10.0;
const MOUSE_CELL_PX_Y: f32 = 20.0;

pub fn drain_input_events(
    app_state: &mut AppState,
    input_rx: &Receiver<crate::input::thread::InputMessage>,
) -> AppResult<bool> {
    loop {
        match input_rx.try_recv() {
            Ok(crate::input::thread::InputMessage::Event(event)) => {
                handle_input_event(app_state, event);
                if app_state.input_state.quit_requested {
                    return Ok(true);
                }
            }
            Ok(crate::input::thread::InputMessage::ReadError(err)) => {
                return Err(format!("Input thread read failed: {err}").into());
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                return Err("Input channel disconnected".into());
            }
        }
    }

    Ok(app_state.input_state.quit_requested)
}

fn handle_mouse_event(app_state: &mut AppState, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::Moved | MouseEventKind::Drag(_) => {
            if let Some((last_col, last_row)) = app_state.input_state.last_mouse {
                let dx = (mouse.column as f32 - last_col as f32) * MOUSE_CELL_PX_X;
                let dy = (mouse.row as f32 - last_row as f32) * MOUSE_CELL_PX_Y;
                app_state.input_state.look_dx += dx;
                app_state.input_state.look_dy += dy;
            }
            app_state.input_state.last_mouse = Some((mouse.column, mouse.row));
        }
        _ => {}
    }
}

pub fn handle_input_event(app_state: &mut AppState, event: Event) {
    match event {
        Event::Key(key_event) => {
            // Track held WASD keys across press/repeat/release so movement
            // stops as soon as the key comes up.
            if let KeyCode::Char(c) = key_event.code {
                let lc = c.to_ascii_lowercase();
                if matches!(
                    key_event.kind,
                    KeyEventKind::Press | KeyEventKind::Repeat | KeyEventKind::Release
                ) {
                    let pressed = key_event.kind != KeyEventKind::Release;
                    match lc {
                        'w' => app_state.input_state.held.forward = pressed,
                        's' => app_state.input_state.held.back = pressed,
                        'a' => app_state.input_state.held.left = pressed,
                        'd' => app_state.input_state.held.right = pressed,
                        _ => {}
                    }
                }
            }

            // Discrete actions fire on press/repeat only.
            if !matches!(key_event.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
                return;
            }

            match key_event.code {
                KeyCode::Esc => app_state.input_state.quit_requested = true,
                KeyCode::Tab => app_state.show_hud = !app_state.show_hud,
                KeyCode::Char(' ') => app_state.input_state.jump_requested = true,

                // Keyboard look fallback for terminals without mouse
                // reporting; routed through the same pointer-delta path.
                KeyCode::Up => app_state.input_state.look_dy -= 3.0 * MOUSE_CELL_PX_Y,
                KeyCode::Down => app_state.input_state.look_dy += 3.0 * MOUSE_CELL_PX_Y,
                KeyCode::Left => app_state.input_state.look_dx -= 3.0 * MOUSE_CELL_PX_X,
                KeyCode::Right => app_state.input_state.look_dx += 3.0 * MOUSE_CELL_PX_X,

                KeyCode::Char(c) => match c.to_ascii_lowercase() {
                    'q' => app_state.input_state.quit_requested = true,
                    'c' => {
                        let locked = app_state.controller.pointer_locked();
                        app_state.controller.set_pointer_locked(!locked);
                        app_state.input_state.last_mouse = None;
                    }
                    _ => {}
                },
                _ => {}
            }
        }
        Event::Mouse(mouse) => handle_mouse_event(app_state, mouse),
        Event::FocusLost => {
            app_state.input_state.held = crate::input::state::HeldMovementKeys::default();
            app_state.input_state.last_mouse = None;
        }
        Event::Resize(_, _) => {}
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::tests::make_app_state;
    use crossterm::event::{KeyEvent, KeyEventState, KeyModifiers, MouseButton};
    use std::sync::mpsc;

    fn press(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn release(code: KeyCode) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Release,
            state: KeyEventState::NONE,
        })
    }

    #[test]
    fn held_keys_toggle_on_press_and_release() {
        let mut app = make_app_state();
        handle_input_event(&mut app, press(KeyCode::Char('w')));
        assert!(app.input_state.held.forward);

        handle_input_event(&mut app, release(KeyCode::Char('w')));
        assert!(!app.input_state.held.forward);
    }

    #[test]
    fn drain_consumes_all_queued_events() {
        let (tx, rx) = mpsc::channel();
        tx.send(crate::input::thread::InputMessage::Event(press(KeyCode::Char('w'))))
            .expect("send w");
        tx.send(crate::input::thread::InputMessage::Event(press(KeyCode::Char('a'))))
            .expect("send a");

        let mut app = make_app_state();
        let quit = drain_input_events(&mut app, &rx).expect("drain should succeed");
        assert!(!quit);
        assert!(app.input_state.held.forward);
        assert!(app.input_state.held.left);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn space_requests_a_jump() {
        let mut app = make_app_state();
        handle_input_event(&mut app, press(KeyCode::Char(' ')));
        assert!(app.input_state.jump_requested);
    }

    #[test]
    fn mouse_motion_accumulates_pixel_deltas() {
        let mut app = make_app_state();
        let motion = |col, row| {
            Event::Mouse(MouseEvent {
                kind: MouseEventKind::Moved,
                column: col,
                row,
                modifiers: KeyModifiers::NONE,
            })
        };

        // First report only seeds the reference position.
        handle_input_event(&mut app, motion(10, 5));
        assert_eq!(app.input_state.take_look_delta(), (0.0, 0.0));

        handle_input_event(&mut app, motion(12, 4));
        let (dx, dy) = app.input_state.take_look_delta();
        assert_eq!(dx, 2.0 * MOUSE_CELL_PX_X);
        assert_eq!(dy, -MOUSE_CELL_PX_Y);
    }

    #[test]
    fn drag_motion_also_feeds_the_look_path() {
        let mut app = make_app_state();
        handle_input_event(
            &mut app,
            Event::Mouse(MouseEvent {
                kind: MouseEventKind::Drag(MouseButton::Left),
                column: 3,
                row: 3,
                modifiers: KeyModifiers::NONE,
            }),
        );
        assert_eq!(app.input_state.last_mouse, Some((3, 3)));
    }

    #[test]
    fn capture_toggle_flips_pointer_lock() {
        let mut app = make_app_state();
        let before = app.controller.pointer_locked();
        handle_input_event(&mut app, press(KeyCode::Char('c')));
        assert_eq!(app.controller.pointer_locked(), !before);
        assert_eq!(app.input_state.last_mouse, None);
    }

    #[test]
    fn focus_lost_clears_held_movement() {
        let mut app = make_app_state();
        app.input_state.held.forward = true;
        app.input_state.held.left = true;

        handle_input_event(&mut app, Event::FocusLost);
        assert!(!app.input_state.held.forward);
        assert!(!app.input_state.held.left);
    }
}
