//! Free-flying camera, its input controller and the projection.
//!
//! The camera keeps two accumulated angles (pitch about X, yaw about Y) and a
//! cached rotation `Rx(pitch) * Ry(yaw)`. The view matrix is
//! `rotation * translate(-position)`. Movement is expressed in camera space
//! (+x right, +y up, +z forward) and mapped to world space with the inverse
//! of the cached rotation.

use std::collections::HashSet;

use cgmath::{EuclideanSpace, Matrix4, Point3, Rad, SquareMatrix, Vector2, Vector3, Zero};
use instant::Duration;
use winit::{
    event::{ElementState, KeyEvent, MouseButton, WindowEvent},
    keyboard::{KeyCode, PhysicalKey},
};

use crate::math::{self, Axis};

#[derive(Clone, Debug)]
pub struct Camera {
    position: Point3<f32>,
    pitch: Rad<f32>,
    yaw: Rad<f32>,
    rotation: Matrix4<f32>,
}

impl Camera {
    pub fn new<P: Into<Point3<f32>>>(position: P) -> Self {
        Self::with_angles(position, Rad(0.0), Rad(0.0))
    }

    pub fn with_angles<P: Into<Point3<f32>>>(position: P, yaw: Rad<f32>, pitch: Rad<f32>) -> Self {
        let mut camera = Self {
            position: position.into(),
            pitch,
            yaw,
            rotation: Matrix4::identity(),
        };
        camera.recompose();
        camera
    }

    pub fn position(&self) -> Point3<f32> {
        self.position
    }

    pub fn set_position<P: Into<Point3<f32>>>(&mut self, position: P) {
        self.position = position.into();
    }

    pub fn yaw(&self) -> Rad<f32> {
        self.yaw
    }

    pub fn pitch(&self) -> Rad<f32> {
        self.pitch
    }

    /// Moves the camera by `amount` along `local_direction` given in camera
    /// space. The direction is used as given: a non-unit vector scales the
    /// step.
    pub fn move_by(&mut self, local_direction: Vector3<f32>, amount: f32) {
        let world = math::transform(
            math::transpose(self.rotation),
            math::direction(local_direction),
        );
        self.position += world.truncate() * amount;
    }

    /// Adds `delta` to the angle about `axis`. Roll is not supported.
    pub fn rotate(&mut self, delta: Rad<f32>, axis: Axis) {
        match axis {
            Axis::X => self.pitch += delta,
            Axis::Y => self.yaw += delta,
            Axis::Z => {
                log::warn!("camera roll is not supported, ignoring {:?}", delta);
                return;
            }
        }
        self.recompose();
    }

    pub fn rotation_matrix(&self) -> Matrix4<f32> {
        self.rotation
    }

    pub fn view_matrix(&self) -> Matrix4<f32> {
        math::multiply(
            self.rotation,
            math::translation(-self.position.to_vec()),
        )
    }

    /// Applies one tick of controller input. Rotation is applied before
    /// movement so the step follows the updated heading.
    pub fn apply(&mut self, input: &CameraInput) {
        if !input.active {
            return;
        }
        if input.rotation_delta.x != 0.0 {
            self.rotate(Rad(input.rotation_delta.x), Axis::X);
        }
        if input.rotation_delta.y != 0.0 {
            self.rotate(Rad(input.rotation_delta.y), Axis::Y);
        }
        if input.move_amount != 0.0 && !input.move_direction.is_zero() {
            self.move_by(input.move_direction, input.move_amount);
        }
    }

    fn recompose(&mut self) {
        self.rotation = math::multiply(
            math::rotation(self.pitch, Axis::X),
            math::rotation(self.yaw, Axis::Y),
        );
    }
}

/// Per-tick camera control state handed to [`Camera::apply`].
///
/// `rotation_delta.x` is the pitch delta and `rotation_delta.y` the yaw delta,
/// both in radians. `move_direction` is camera-local.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraInput {
    pub active: bool,
    pub rotation_delta: Vector2<f32>,
    pub move_direction: Vector3<f32>,
    pub move_amount: f32,
}

impl Default for CameraInput {
    fn default() -> Self {
        Self {
            active: false,
            rotation_delta: Vector2::zero(),
            move_direction: Vector3::zero(),
            move_amount: 0.0,
        }
    }
}

/// Turns winit keyboard and mouse events into [`CameraInput`].
///
/// WASD moves in the horizontal camera plane, Space/Shift move up/down and
/// dragging with the right mouse button looks around.
#[derive(Debug)]
pub struct CameraController {
    speed: f32,
    sensitivity: f32,
    held: HashSet<KeyCode>,
    looking: bool,
    mouse_delta: Vector2<f32>,
}

impl CameraController {
    pub fn new(speed: f32, sensitivity: f32) -> Self {
        Self {
            speed,
            sensitivity,
            held: HashSet::new(),
            looking: false,
            mouse_delta: Vector2::zero(),
        }
    }

    pub fn handle_window_events(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state,
                        ..
                    },
                ..
            } => {
                if !Self::is_movement_key(*key) {
                    return false;
                }
                match state {
                    ElementState::Pressed => self.held.insert(*key),
                    ElementState::Released => self.held.remove(key),
                };
                true
            }
            WindowEvent::MouseInput {
                button: MouseButton::Right,
                state,
                ..
            } => {
                self.looking = state.is_pressed();
                true
            }
            WindowEvent::Focused(false) => {
                // keys released while unfocused never reach us
                self.held.clear();
                self.looking = false;
                false
            }
            _ => false,
        }
    }

    pub fn handle_mouse(&mut self, dx: f64, dy: f64) {
        if self.looking {
            self.mouse_delta += Vector2::new(dx as f32, dy as f32);
        }
    }

    /// Drains the accumulated input into one tick's worth of camera control.
    pub fn take_input(&mut self, dt: Duration) -> CameraInput {
        let mut direction = Vector3::zero();
        for key in &self.held {
            direction += match key {
                KeyCode::KeyW => Vector3::unit_z(),
                KeyCode::KeyS => -Vector3::unit_z(),
                KeyCode::KeyD => Vector3::unit_x(),
                KeyCode::KeyA => -Vector3::unit_x(),
                KeyCode::Space => Vector3::unit_y(),
                KeyCode::ShiftLeft => -Vector3::unit_y(),
                _ => Vector3::zero(),
            };
        }
        // the camera does not renormalize, diagonal input is our concern
        let direction = math::normalize(direction);

        let delta = std::mem::replace(&mut self.mouse_delta, Vector2::zero());
        // dragging right turns right (negative yaw), dragging down looks down
        let rotation_delta = Vector2::new(-delta.y, -delta.x) * self.sensitivity;

        let moving = !direction.is_zero();
        let turning = !rotation_delta.is_zero();
        CameraInput {
            active: moving || turning,
            rotation_delta,
            move_direction: direction,
            move_amount: if moving {
                self.speed * dt.as_secs_f32()
            } else {
                0.0
            },
        }
    }

    fn is_movement_key(key: KeyCode) -> bool {
        matches!(
            key,
            KeyCode::KeyW
                | KeyCode::KeyA
                | KeyCode::KeyS
                | KeyCode::KeyD
                | KeyCode::Space
                | KeyCode::ShiftLeft
        )
    }
}

/// Perspective projection that follows the window size.
#[derive(Clone, Debug)]
pub struct Projection {
    aspect: f32,
    fov_y_degrees: f32,
    near: f32,
    far: f32,
}

impl Projection {
    pub fn new(width: u32, height: u32, fov_y_degrees: f32, near: f32, far: f32) -> Self {
        Self {
            aspect: width.max(1) as f32 / height.max(1) as f32,
            fov_y_degrees,
            near,
            far,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        math::perspective(self.fov_y_degrees, self.aspect, self.near, self.far)
    }
}
