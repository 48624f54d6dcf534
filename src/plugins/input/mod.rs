use bevy::{prelude::*, window::CursorGrabMode};
use leafwing_input_manager::prelude::*;

#[derive(Debug)]
pub struct InputPlugin;

impl Plugin for InputPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugin(InputManagerPlugin::<Actions>::default())
            .add_startup_system(toggle_on_start)
            .add_system(toggle_mouse_capture);
    }
}

/// Actions of the first person controller.
#[derive(Actionlike, PartialEq, Eq, Clone, Copy, Hash, Debug)]
pub enum Actions {
    Forward,
    Backwards,
    StrafeLeft,
    StrafeRight,
    Sprint,
    Jump,
    Aim,
}

pub fn default_input_map() -> InputMap<Actions> {
    let mut input_map = InputMap::new([
        (KeyCode::W, Actions::Forward),
        (KeyCode::Up, Actions::Forward),
        (KeyCode::S, Actions::Backwards),
        (KeyCode::Down, Actions::Backwards),
        (KeyCode::A, Actions::StrafeLeft),
        (KeyCode::Left, Actions::StrafeLeft),
        (KeyCode::D, Actions::StrafeRight),
        (KeyCode::Right, Actions::StrafeRight),
        (KeyCode::LShift, Actions::Sprint),
        (KeyCode::Space, Actions::Jump),
    ]);
    input_map.insert(DualAxis::mouse_motion(), Actions::Aim);
    input_map
}

fn set_cursor_capture(window: &mut Window, captured: bool) {
    window.set_cursor_visibility(!captured);
    window.set_cursor_grab_mode(if captured {
        CursorGrabMode::Locked
    } else {
        CursorGrabMode::None
    });
}

fn toggle_on_start(mut windows: ResMut<Windows>) {
    if let Some(window) = windows.get_primary_mut() {
        set_cursor_capture(window, true);
    }
}

fn toggle_mouse_capture(mut windows: ResMut<Windows>, keys: Res<Input<KeyCode>>) {
    if !keys.just_pressed(KeyCode::Tab) {
        return;
    }
    if let Some(window) = windows.get_primary_mut() {
        let captured = window.cursor_grab_mode() != CursorGrabMode::None;
        set_cursor_capture(window, !captured);
    }
}
