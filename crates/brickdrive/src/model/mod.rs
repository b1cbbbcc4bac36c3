//! Plain data types shared by every layer: operations, replies, conditions,
//! ports and framed commands.

pub mod command;
pub mod condition;
pub mod display;
pub mod ids;
pub mod operation;
pub mod port;
pub mod reply;
pub mod sound;
pub mod write;

pub use command::{hex, Command, CommandType};
pub use condition::{BlockCondition, Relation};
pub use display::{
    DisplayColor, DisplayFont, DrawCommand, IconType, PixelLocation, PixelSize, DISPLAY_MAX_X,
    DISPLAY_MAX_Y,
};
pub use ids::SessionId;
pub use operation::{sanitize_brick_name, MotorType, Operation, BRICK_NAME_MAX_LEN};
pub use port::{InputPort, OutputPort, Port, PortData, PortType, Telemetry, PORT_COUNT};
pub use reply::{ConnectionType, ReplyOperation, ReplyOperationReply};
pub use sound::SoundCommand;
pub use write::{BrickLight, LightColor, LightMode, WriteCommand};
