use hawk_fc::Command;

use crate::autopilot::{GuidanceDeltas, Speeds};
use crate::input::{Key, ManualInput};

pub const AXIS_LIMIT: f32 = 100.0;

/// Operator stick deflection for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ManualDeltas {
    pub left_right: f32,
    pub forward_back: f32,
    pub up_down: f32,
    pub yaw: f32,
}

impl ManualDeltas {
    /// Positive key wins when both keys of an axis are held.
    pub fn from_input(input: &dyn ManualInput, speeds: &Speeds) -> Self {
        let axis = |pos: Key, neg: Key, speed: f32| {
            if input.is_pressed(pos) {
                speed
            } else if input.is_pressed(neg) {
                -speed
            } else {
                0.0
            }
        };
        Self {
            left_right: axis(Key::D, Key::A, speeds.xy),
            forward_back: axis(Key::W, Key::S, speeds.xy),
            up_down: axis(Key::I, Key::K, speeds.z),
            yaw: axis(Key::L, Key::J, speeds.yaw),
        }
    }
}

/// Sum manual and autopilot per axis, clamp to the stick range and truncate.
pub fn mix(manual: ManualDeltas, auto: GuidanceDeltas) -> Command {
    Command {
        left_right: to_stick(manual.left_right),
        forward_back: to_stick(manual.forward_back + auto.forward_back),
        up_down: to_stick(manual.up_down + auto.up_down),
        yaw: to_stick(manual.yaw + auto.yaw),
    }
}

fn to_stick(v: f32) -> i8 {
    if v.is_nan() {
        return 0;
    }
    v.clamp(-AXIS_LIMIT, AXIS_LIMIT) as i8
}
