use crate::controller::MovementIntent;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeldMovementKeys {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
}

#[derive(Debug, Default)]
pub struct InputState {
    pub held: HeldMovementKeys,
    pub quit_requested: bool,
    pub jump_requested: bool,
    /// Accumulated look deltas in screen pixels, drained once per frame.
    pub look_dx: f32,
    pub look_dy: f32,
    /// Last reported mouse cell, for delta reconstruction from absolute
    /// terminal coordinates.
    pub last_mouse: Option<(u16, u16)>,
}

impl InputState {
    pub fn intent(&self) -> MovementIntent {
        MovementIntent {
            forward: self.held.forward,
            back: self.held.back,
            left: self.held.left,
            right: self.held.right,
        }
    }

    pub fn take_look_delta(&mut self) -> (f32, f32) {
        let delta = (self.look_dx, self.look_dy);
        self.look_dx = 0.0;
        self.look_dy = 0.0;
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_mirrors_held_keys() {
        let mut state = InputState::default();
        state.held.forward = true;
        state.held.left = true;

        let intent = state.intent();
        assert!(intent.forward);
        assert!(intent.left);
        assert!(!intent.back);
        assert!(!intent.right);
    }

    #[test]
    fn look_delta_drains_to_zero() {
        let mut state = InputState {
            look_dx: 3.0,
            look_dy: -2.0,
            ..InputState::default()
        };

        assert_eq!(state.take_look_delta(), (3.0, -2.0));
        assert_eq!(state.take_look_delta(), (0.0, 0.0));
    }
}
