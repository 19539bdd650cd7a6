use crate::core_modules::geometry::Velocity;
use crate::error::VisionError;

/// The eighteen joystick actions a single Atari player can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Action {
    #[default]
    Noop,
    Fire,
    Up,
    Right,
    Left,
    Down,
    UpRight,
    UpLeft,
    DownRight,
    DownLeft,
    UpFire,
    RightFire,
    LeftFire,
    DownFire,
    UpRightFire,
    UpLeftFire,
    DownRightFire,
    DownLeftFire,
}

impl Action {
    pub const ALL: [Action; 18] = [
        Action::Noop,
        Action::Fire,
        Action::Up,
        Action::Right,
        Action::Left,
        Action::Down,
        Action::UpRight,
        Action::UpLeft,
        Action::DownRight,
        Action::DownLeft,
        Action::UpFire,
        Action::RightFire,
        Action::LeftFire,
        Action::DownFire,
        Action::UpRightFire,
        Action::UpLeftFire,
        Action::DownRightFire,
        Action::DownLeftFire,
    ];

    /// Unit joystick direction in screen space (y grows downwards).
    /// `Noop` and `Fire` have no direction.
    pub fn direction(&self) -> Velocity {
        use Action::*;
        match self {
            Noop | Fire => Velocity::new(0, 0),
            Up | UpFire => Velocity::new(0, -1),
            Down | DownFire => Velocity::new(0, 1),
            Left | LeftFire => Velocity::new(-1, 0),
            Right | RightFire => Velocity::new(1, 0),
            UpRight | UpRightFire => Velocity::new(1, -1),
            UpLeft | UpLeftFire => Velocity::new(-1, -1),
            DownRight | DownRightFire => Velocity::new(1, 1),
            DownLeft | DownLeftFire => Velocity::new(-1, 1),
        }
    }
}

impl TryFrom<u8> for Action {
    type Error = VisionError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Action::ALL
            .get(index as usize)
            .copied()
            .ok_or(VisionError::UnknownAction(index))
    }
}
