use super::{encode_operands, Operand};
use crate::model::{
    sanitize_brick_name, DisplayColor, DrawCommand, Operation, PixelLocation, PixelSize,
    SoundCommand, WriteCommand, DISPLAY_MAX_Y,
};

const POWER_RANGE: (i32, i32) = (-100, 100);
const TURN_RANGE: (i32, i32) = (-200, 200);
const VOLUME_RANGE: (i32, i32) = (0, 100);
const FREQUENCY_RANGE: (i32, i32) = (250, 10_000);

fn clamp(value: i32, (min, max): (i32, i32)) -> i32 {
    value.clamp(min, max)
}

/// Ordered operand list for one operation, opcode first.
pub fn operation_operands(operation: &Operation) -> Vec<Operand> {
    let opcode = Operand::Byte(operation.opcode());
    match operation {
        Operation::OutputSetType {
            layer,
            port,
            motor_type,
        } => vec![
            opcode,
            Operand::Int(*layer),
            Operand::Output(*port),
            Operand::Byte(motor_type.code()),
        ],
        Operation::OutputReset { layer, ports }
        | Operation::OutputStart { layer, ports }
        | Operation::OutputClearCount { layer, ports } => {
            vec![opcode, Operand::Int(*layer), Operand::Outputs(ports.clone())]
        }
        Operation::OutputStop {
            layer,
            ports,
            brake,
        } => vec![
            opcode,
            Operand::Int(*layer),
            Operand::Outputs(ports.clone()),
            Operand::Bool(*brake),
        ],
        Operation::OutputSpeed {
            layer,
            ports,
            power,
        } => vec![
            opcode,
            Operand::Int(*layer),
            Operand::Outputs(ports.clone()),
            Operand::Int(clamp(*power, POWER_RANGE)),
        ],
        Operation::OutputStepSpeed {
            layer,
            ports,
            power,
            ramp_up,
            continue_for,
            ramp_down,
            brake,
        }
        | Operation::OutputTimeSpeed {
            layer,
            ports,
            power,
            ramp_up,
            continue_for,
            ramp_down,
            brake,
        } => vec![
            opcode,
            Operand::Int(*layer),
            Operand::Outputs(ports.clone()),
            Operand::Int(clamp(*power, POWER_RANGE)),
            Operand::Int(*ramp_up),
            Operand::Int(*continue_for),
            Operand::Int(*ramp_down),
            Operand::Bool(*brake),
        ],
        Operation::OutputStepSync {
            layer,
            ports,
            power,
            turn,
            tacho_count: amount,
            brake,
        }
        | Operation::OutputTimeSync {
            layer,
            ports,
            power,
            turn,
            duration_ms: amount,
            brake,
        } => vec![
            opcode,
            Operand::Int(*layer),
            Operand::Outputs(ports.clone()),
            Operand::Int(clamp(*power, POWER_RANGE)),
            Operand::Int(clamp(*turn, TURN_RANGE)),
            Operand::Int(*amount),
            Operand::Bool(*brake),
        ],
        Operation::Sound { command } => {
            let mut operands = vec![opcode];
            operands.extend(sound_operands(command));
            operands
        }
        Operation::Draw { command } => {
            let mut operands = vec![opcode];
            operands.extend(draw_operands(command));
            operands
        }
        Operation::Write { command } => {
            let mut operands = vec![opcode];
            operands.extend(write_operands(command));
            operands
        }
        Operation::SetBrickName { name } => vec![
            opcode,
            Operand::Byte(0x08),
            Operand::Str(sanitize_brick_name(name)),
        ],
        Operation::InputDeviceClearAll => vec![opcode, Operand::Byte(0x0A), Operand::Int(-1)],
        Operation::InputDeviceClearChanges { layer, port } => vec![
            opcode,
            Operand::Byte(0x1A),
            Operand::Int(*layer),
            Operand::Input(*port),
        ],
    }
}

/// Bytecode for one operation.
pub fn encode_operation(operation: &Operation) -> Vec<u8> {
    encode_operands(&operation_operands(operation))
}

/// Bytecode for several operations, back to back.
pub fn encode_operations(operations: &[Operation]) -> Vec<u8> {
    operations.iter().flat_map(encode_operation).collect()
}

fn sound_operands(command: &SoundCommand) -> Vec<Operand> {
    let Some(sub) = command.sub_opcode() else {
        return Vec::new();
    };
    let sub = Operand::Byte(sub);
    match command {
        SoundCommand::Break | SoundCommand::Test => vec![sub],
        SoundCommand::Tone {
            volume,
            frequency,
            duration_ms,
        } => vec![
            sub,
            Operand::Int(clamp(i32::from(*volume), VOLUME_RANGE)),
            Operand::Int(clamp(i32::from(*frequency), FREQUENCY_RANGE)),
            Operand::Int(i32::from(*duration_ms)),
        ],
        SoundCommand::Play { volume, name } | SoundCommand::Repeat { volume, name } => vec![
            sub,
            Operand::Int(clamp(i32::from(*volume), VOLUME_RANGE)),
            Operand::Str(name.clone()),
        ],
    }
}

fn write_operands(command: &WriteCommand) -> Vec<Operand> {
    match command {
        WriteCommand::BrickLight { light } => vec![
            Operand::Byte(command.sub_opcode()),
            Operand::Byte(light.pattern()),
        ],
    }
}

fn color(color: DisplayColor) -> Operand {
    Operand::Int(i32::from(color as u8))
}

fn location(location: PixelLocation) -> [Operand; 2] {
    let location = location.clamped();
    [
        Operand::Int(i32::from(location.x)),
        Operand::Int(i32::from(location.y)),
    ]
}

fn size(size: PixelSize) -> [Operand; 2] {
    let size = size.clamped();
    [
        Operand::Int(i32::from(size.width)),
        Operand::Int(i32::from(size.height)),
    ]
}

fn number(value: u16) -> Operand {
    Operand::Int(i32::from(value))
}

/// Draw sub-command byte followed by its operands.
fn draw_operands(command: &DrawCommand) -> Vec<Operand> {
    let mut operands = vec![Operand::Byte(draw_sub_opcode(command))];
    match command {
        DrawCommand::Update | DrawCommand::Clear => {}
        DrawCommand::Pixel { color: c, location: at } => {
            operands.push(color(*c));
            operands.extend(location(*at));
        }
        DrawCommand::Line {
            color: c,
            start,
            stop,
        } => {
            operands.push(color(*c));
            operands.extend(location(*start));
            operands.extend(location(*stop));
        }
        DrawCommand::Circle {
            color: c,
            center,
            radius,
        }
        | DrawCommand::FillCircle {
            color: c,
            center,
            radius,
        } => {
            operands.push(color(*c));
            operands.extend(location(*center));
            operands.push(number(*radius));
        }
        DrawCommand::Text {
            color: c,
            location: at,
            text: name,
        }
        | DrawCommand::BmpFile {
            color: c,
            location: at,
            name,
        } => {
            operands.push(color(*c));
            operands.extend(location(*at));
            operands.push(Operand::Str(name.clone()));
        }
        DrawCommand::Icon {
            color: c,
            location: at,
            icon_type,
            number: icon,
        } => {
            operands.push(color(*c));
            operands.extend(location(*at));
            operands.push(Operand::Int(i32::from(*icon_type as u8)));
            operands.push(Operand::Int(i32::from(*icon)));
        }
        DrawCommand::FillRect {
            color: c,
            location: at,
            size: extent,
        }
        | DrawCommand::Rect {
            color: c,
            location: at,
            size: extent,
        } => {
            operands.push(color(*c));
            operands.extend(location(*at));
            operands.extend(size(*extent));
        }
        DrawCommand::VerticalBar {
            color: c,
            start,
            stop,
            min_value,
            max_value,
            value,
        } => {
            operands.push(color(*c));
            operands.extend(location(*start));
            operands.extend(location(*stop));
            operands.extend([number(*min_value), number(*max_value), number(*value)]);
        }
        DrawCommand::InverseRect {
            location: at,
            size: extent,
        } => {
            operands.extend(location(*at));
            operands.extend(size(*extent));
        }
        DrawCommand::SelectFont { font } => operands.push(Operand::Int(i32::from(*font as u8))),
        DrawCommand::EnableTopLine { enabled } => operands.push(Operand::Bool(*enabled)),
        DrawCommand::FillWindow {
            color: c,
            y,
            height,
        } => {
            operands.push(color(*c));
            operands.push(number((*y).min(DISPLAY_MAX_Y)));
            operands.push(number((*height).min(DISPLAY_MAX_Y)));
        }
        DrawCommand::StoreScreen { level } | DrawCommand::RestoreScreen { level } => {
            operands.push(Operand::Int(i32::from(*level)));
        }
    }
    operands
}

/// Draw sub-opcode byte.
fn draw_sub_opcode(command: &DrawCommand) -> u8 {
    match command {
        DrawCommand::Update => 0x00,
        DrawCommand::Clear => 0x01,
        DrawCommand::Pixel { .. } => 0x02,
        DrawCommand::Line { .. } => 0x03,
        DrawCommand::Circle { .. } => 0x04,
        DrawCommand::Text { .. } => 0x05,
        DrawCommand::Icon { .. } => 0x06,
        DrawCommand::FillRect { .. } => 0x09,
        DrawCommand::Rect { .. } => 0x0A,
        DrawCommand::VerticalBar { .. } => 0x0F,
        DrawCommand::InverseRect { .. } => 0x10,
        DrawCommand::SelectFont { .. } => 0x11,
        DrawCommand::EnableTopLine { .. } => 0x12,
        DrawCommand::FillWindow { .. } => 0x13,
        DrawCommand::FillCircle { .. } => 0x18,
        DrawCommand::StoreScreen { .. } => 0x19,
        DrawCommand::RestoreScreen { .. } => 0x1A,
        DrawCommand::BmpFile { .. } => 0x1C,
    }
}
