//! Status light commands.

use serde::{Deserialize, Serialize};

/// Colour of the status light around the brick buttons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightColor {
    /// Green light.
    Green,
    /// Red light.
    Red,
    /// Orange light.
    Orange,
}

/// How the status light is lit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightMode {
    /// Steady.
    On,
    /// Blinking.
    Flashing,
    /// Fading in and out.
    Pulsating,
}

/// Firmware LED pattern (0..=9).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrickLight {
    /// Light off.
    Off = 0,
    /// Steady green.
    Green = 1,
    /// Steady red.
    Red = 2,
    /// Steady orange.
    Orange = 3,
    /// Blinking green.
    GreenFlashing = 4,
    /// Blinking red.
    RedFlashing = 5,
    /// Blinking orange.
    OrangeFlashing = 6,
    /// Pulsing green.
    GreenPulsating = 7,
    /// Pulsing red.
    RedPulsating = 8,
    /// Pulsing orange.
    OrangePulsating = 9,
}

impl BrickLight {
    /// Pattern for a colour lit in the given mode.
    pub fn lit(color: LightColor, mode: LightMode) -> Self {
        match (mode, color) {
            (LightMode::On, LightColor::Green) => Self::Green,
            (LightMode::On, LightColor::Red) => Self::Red,
            (LightMode::On, LightColor::Orange) => Self::Orange,
            (LightMode::Flashing, LightColor::Green) => Self::GreenFlashing,
            (LightMode::Flashing, LightColor::Red) => Self::RedFlashing,
            (LightMode::Flashing, LightColor::Orange) => Self::OrangeFlashing,
            (LightMode::Pulsating, LightColor::Green) => Self::GreenPulsating,
            (LightMode::Pulsating, LightColor::Red) => Self::RedPulsating,
            (LightMode::Pulsating, LightColor::Orange) => Self::OrangePulsating,
        }
    }

    /// Raw pattern byte.
    pub fn pattern(self) -> u8 {
        self as u8
    }
}

/// Sub-commands of the UI write opcode (`0x82`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WriteCommand {
    /// Set the status light pattern.
    BrickLight {
        /// Pattern to show.
        light: BrickLight,
    },
}

impl WriteCommand {
    /// Sub-opcode byte.
    pub fn sub_opcode(&self) -> u8 {
        match self {
            Self::BrickLight { .. } => 0x1B,
        }
    }
}
