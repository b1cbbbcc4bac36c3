//! Display drawing commands and their geometry.

use serde::{Deserialize, Serialize};

/// Largest drawable x coordinate on the 178×128 display.
pub const DISPLAY_MAX_X: u16 = 177;
/// Largest drawable y coordinate on the 178×128 display.
pub const DISPLAY_MAX_Y: u16 = 127;

/// A point on the brick display.
///
/// Coordinates are clamped into the display on construction and again when
/// encoded, so values that arrive through deserialization are clamped too.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelLocation {
    /// Column (0..=177).
    pub x: u16,
    /// Row (0..=127).
    pub y: u16,
}

impl PixelLocation {
    /// Create a location, silently clamping out-of-range coordinates.
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            x: clamp_axis(x, DISPLAY_MAX_X),
            y: clamp_axis(y, DISPLAY_MAX_Y),
        }
    }

    /// The same location with both axes clamped into the display.
    pub fn clamped(self) -> Self {
        Self {
            x: self.x.min(DISPLAY_MAX_X),
            y: self.y.min(DISPLAY_MAX_Y),
        }
    }
}

/// Width and height of a display region, clamped like [`PixelLocation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelSize {
    /// Width (0..=177).
    pub width: u16,
    /// Height (0..=127).
    pub height: u16,
}

impl PixelSize {
    /// Create a size, silently clamping out-of-range values.
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width: clamp_axis(width, DISPLAY_MAX_X),
            height: clamp_axis(height, DISPLAY_MAX_Y),
        }
    }

    /// The same size with both axes clamped into the display.
    pub fn clamped(self) -> Self {
        Self {
            width: self.width.min(DISPLAY_MAX_X),
            height: self.height.min(DISPLAY_MAX_Y),
        }
    }
}

fn clamp_axis(value: i32, max: u16) -> u16 {
    u16::try_from(value.clamp(0, i32::from(max))).unwrap_or(0)
}

/// Pen colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayColor {
    /// Background (clears pixels).
    White = 0,
    /// Foreground (sets pixels).
    Black = 1,
}

/// Font used by subsequent text commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayFont {
    /// Regular system font.
    Normal = 0,
    /// Condensed font.
    Small = 1,
    /// Large font.
    Large = 2,
    /// Smallest font.
    Tiny = 3,
}

/// Icon sheet selector for [`DrawCommand::Icon`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IconType {
    /// Normal icons.
    Normal = 0,
    /// Small icons.
    Small = 1,
    /// Large icons.
    Large = 2,
    /// Menu icons.
    Menu = 3,
    /// Arrow icons.
    Arrow = 4,
}

/// Sub-commands of the draw opcode (`0x84`).
///
/// Every shape takes the color it is drawn in; locations are the top-left
/// corner unless named otherwise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DrawCommand {
    /// Push the drawing buffer to the screen.
    Update,
    /// Clear the drawing buffer.
    Clear,
    /// Set or clear one pixel.
    Pixel {
        /// Pen colour.
        color: DisplayColor,
        /// Top-left corner.
        location: PixelLocation,
    },
    /// Straight line between two points.
    Line {
        /// Pen colour.
        color: DisplayColor,
        /// First end point.
        start: PixelLocation,
        /// Second end point.
        stop: PixelLocation,
    },
    /// Circle outline.
    Circle {
        /// Pen colour.
        color: DisplayColor,
        /// Centre point.
        center: PixelLocation,
        /// Radius in pixels.
        radius: u16,
    },
    /// Text in the selected font.
    Text {
        /// Pen colour.
        color: DisplayColor,
        /// Top-left corner.
        location: PixelLocation,
        /// Text to draw.
        text: String,
    },
    /// Icon `number` from the `icon_type` sheet.
    Icon {
        /// Pen colour.
        color: DisplayColor,
        /// Top-left corner.
        location: PixelLocation,
        /// Icon sheet.
        icon_type: IconType,
        /// Icon index within the sheet.
        number: u8,
    },
    /// Filled rectangle.
    FillRect {
        /// Pen colour.
        color: DisplayColor,
        /// Top-left corner.
        location: PixelLocation,
        /// Width and height.
        size: PixelSize,
    },
    /// Rectangle outline.
    Rect {
        /// Pen colour.
        color: DisplayColor,
        /// Top-left corner.
        location: PixelLocation,
        /// Width and height.
        size: PixelSize,
    },
    /// Bar between `start` and `stop` filled to `value` within
    /// `min_value..=max_value`.
    VerticalBar {
        /// Pen colour.
        color: DisplayColor,
        /// First end point.
        start: PixelLocation,
        /// Second end point.
        stop: PixelLocation,
        /// Value drawn as an empty bar.
        min_value: u16,
        /// Value drawn as a full bar.
        max_value: u16,
        /// Current bar value.
        value: u16,
    },
    /// Invert every pixel inside the rectangle.
    InverseRect {
        /// Top-left corner.
        location: PixelLocation,
        /// Width and height.
        size: PixelSize,
    },
    /// Font for the following text commands.
    SelectFont {
        /// Font to select.
        font: DisplayFont,
    },
    /// Show or hide the status line at the top of the screen.
    EnableTopLine {
        /// Whether the top line is shown.
        enabled: bool,
    },
    /// Fill a horizontal band; `y` and `height` are clipped to 127.
    FillWindow {
        /// Pen colour.
        color: DisplayColor,
        /// First row of the band.
        y: u16,
        /// Rows in the band.
        height: u16,
    },
    /// Filled circle.
    FillCircle {
        /// Pen colour.
        color: DisplayColor,
        /// Centre point.
        center: PixelLocation,
        /// Radius in pixels.
        radius: u16,
    },
    /// Save the current screen into a numbered slot.
    StoreScreen {
        /// Screen slot.
        level: u8,
    },
    /// Restore a screen saved with [`DrawCommand::StoreScreen`].
    RestoreScreen {
        /// Screen slot.
        level: u8,
    },
    /// Draw a bitmap file stored on the brick.
    BmpFile {
        /// Pen colour.
        color: DisplayColor,
        /// Top-left corner.
        location: PixelLocation,
        /// Path of the bitmap on the brick.
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_clamps_into_display() {
        assert_eq!(PixelLocation::new(-5, 500), PixelLocation { x: 0, y: 127 });
        assert_eq!(PixelLocation::new(200, 64), PixelLocation { x: 177, y: 64 });
    }

    #[test]
    fn deserialized_location_clamps_on_demand() {
        let location: PixelLocation = serde_json::from_str(r#"{"x":900,"y":900}"#).unwrap();
        assert_eq!(location.clamped(), PixelLocation { x: 177, y: 127 });
    }

    #[test]
    fn size_clamps_into_display() {
        assert_eq!(
            PixelSize::new(178, -1),
            PixelSize {
                width: 177,
                height: 0
            }
        );
    }
}
