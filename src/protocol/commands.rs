/// Command constants for the SVS subwoofer control protocol.
/// Opcodes are sent in the order listed here, not as a little-endian integer.

/// Sentinel byte starting every frame.
pub const PREAMBLE: u8 = 0xAA;

/// Memory-write command (MEMWRITE).
pub const CMD_MEMWRITE: CommandId = [0xF0, 0x1F];

/// Bytes of framing around the payload: preamble, opcode, length, checksum.
pub const FRAME_OVERHEAD: usize = 7;

// DSP parameter block; level and phase share the same block ID
pub const PARAM_ID_DSP: u8 = 0x04;

// Offsets inside the DSP block
pub const OFFSET_VOLUME: u8 = 0x2C;
pub const OFFSET_PHASE: u8 = 0x2E;

/// Every parameter value is a signed 16-bit word.
pub const VALUE_BYTE_COUNT: u8 = 2;

/// Helper type for command IDs
pub type CommandId = [u8; 2];
