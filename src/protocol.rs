//! Wire constants for the Cloud9 protocol
//!
//! All multi-byte integers on the wire are big-endian. These tables are the
//! bit-exact contract with the server; keep the numeric values stable.

/// Fixed magic prefix both peers send immediately after connecting.
pub const MAGIC: &[u8; 6] = &[0x89, 0x0D, 0x0A, 0x1A, 0xC1, 0xD9];

/// Protocol release code, appended to the magic as a u16 BE.
pub const RELEASE_CODE: u16 = 2;

/// Full handshake header: magic + release code.
pub const HEADER_LEN: usize = MAGIC.len() + 2;

pub const DEFAULT_PORT: u16 = 909;

/// Raw size of a node identifier on the wire.
pub const NODE_ID_SIZE: usize = 16;

/// Name length is a u8 prefix on the wire.
pub const MAX_NAME_LEN: usize = 255;

/// Chunk cap for long transfers (640 KiB). The protocol itself does not
/// negotiate a chunk size; this bounds each FD_READ/FD_WRITE request body.
pub const TRANSFER_CHUNK: usize = 640 * 1024;

/// Capacity of the buffering transport decorator.
pub const SEND_BUFFER_SIZE: usize = 64 * 1024;

/// Upper bound on a single response body (64MB) - prevents memory
/// exhaustion from a corrupt or hostile length field.
pub const MAX_BODY_SIZE: u64 = 64 * 1024 * 1024;

// Path syntax reserved characters
pub const PATH_SEP: char = '/';
pub const PATH_HOME: char = '~';
pub const PATH_NODE: char = '#';

// Init commands: sent once after the handshake, before the session is live
pub mod init_cmd {
    pub const AUTH: u16 = 1;
    pub const REGISTER: u16 = 2;
    pub const TOKEN: u16 = 3;
}

// Init status codes (u16 reply to an init command)
pub mod init_status {
    pub const OK: u16 = 0;
    pub const BODY_TOO_LARGE: u16 = 1;
    pub const INVALID_CMD: u16 = 2;
    pub const AUTH_FAILED: u16 = 3;
    pub const MALFORMED_CMD: u16 = 4;
    pub const INVALID_INVITE_CODE: u16 = 5;
    pub const USER_EXISTS: u16 = 6;
    pub const INVALID_USERNAME: u16 = 7;
    pub const INVALID_TOKEN: u16 = 8;
}

// Request commands (keep numeric stable for compat with the server)
pub mod cmd {
    pub const GET_HOME: u16 = 1;
    pub const LIST_DIRECTORY: u16 = 2;
    pub const GOODBYE: u16 = 3;
    pub const GET_PARENT: u16 = 4;
    pub const MAKE_NODE: u16 = 5;
    pub const GET_NODE_OWNER: u16 = 6;
    pub const FD_OPEN: u16 = 7;
    pub const FD_CLOSE: u16 = 8;
    pub const FD_READ: u16 = 9;
    pub const FD_WRITE: u16 = 10;
    pub const GET_NODE_INFO: u16 = 11;
    // Long-transfer commands exist in the protocol but this client chunks
    // bulk I/O through bounded FD_READ/FD_WRITE requests instead.
    pub const FD_READ_LONG: u16 = 12;
    pub const FD_WRITE_LONG: u16 = 13;
    pub const SET_NODE_RIGHTS: u16 = 14;
    pub const GET_NODE_GROUP: u16 = 15;
    pub const SET_NODE_GROUP: u16 = 16;
    pub const GROUP_INVITE: u16 = 17;
    pub const REMOVE_NODE: u16 = 18;
    pub const GROUP_KICK: u16 = 19;
    pub const GROUP_LIST: u16 = 20;
    pub const COPY_NODE: u16 = 21;
    pub const MOVE_NODE: u16 = 22;
    pub const RENAME_NODE: u16 = 23;
    pub const GET_TOKEN: u16 = 24;
}

// Request status codes (u16 in every response frame)
pub mod status {
    pub const OK: u16 = 0;
    pub const BODY_TOO_LARGE: u16 = 1;
    pub const INVALID_CMD: u16 = 2;
    pub const MALFORMED_CMD: u16 = 3;
    pub const NOT_FOUND: u16 = 4;
    pub const NOT_A_DIRECTORY: u16 = 5;
    pub const FORBIDDEN: u16 = 6;
    pub const INVALID_NAME: u16 = 7;
    pub const INVALID_TYPE: u16 = 8;
    pub const EXISTS: u16 = 9;
    pub const BUSY: u16 = 10;
    pub const NOT_A_FILE: u16 = 11;
    pub const TOO_MANY_FDS: u16 = 12;
    pub const BAD_FD: u16 = 13;
    pub const END_OF_FILE: u16 = 14;
    pub const NOT_SUPPORTED: u16 = 15;
    pub const READ_BLOCK_TOO_LARGE: u16 = 16;
    pub const SWITCH_OK: u16 = 17;
    pub const DIRECTORY_NOT_EMPTY: u16 = 18;

    /// Human-readable tag for a request status, for logs and CLI output.
    pub fn describe(code: u16) -> &'static str {
        match code {
            OK => "ok",
            BODY_TOO_LARGE => "body too large",
            INVALID_CMD => "invalid command",
            MALFORMED_CMD => "malformed command",
            NOT_FOUND => "not found",
            NOT_A_DIRECTORY => "not a directory",
            FORBIDDEN => "forbidden",
            INVALID_NAME => "invalid name",
            INVALID_TYPE => "invalid type",
            EXISTS => "already exists",
            BUSY => "busy",
            NOT_A_FILE => "not a file",
            TOO_MANY_FDS => "too many descriptors",
            BAD_FD => "bad descriptor",
            END_OF_FILE => "end of file",
            NOT_SUPPORTED => "not supported",
            READ_BLOCK_TOO_LARGE => "read block too large",
            SWITCH_OK => "switch ok",
            DIRECTORY_NOT_EMPTY => "directory not empty",
            _ => "unknown status",
        }
    }
}

// File descriptor open modes (combinable bits)
pub mod fd_mode {
    pub const READ: u8 = 0b10;
    pub const WRITE: u8 = 0b01;
}

// Node access rights bits
pub mod rights {
    pub const GROUP_READ: u8 = 0b1000;
    pub const GROUP_WRITE: u8 = 0b0100;
    pub const ALL_READ: u8 = 0b0010;
    pub const ALL_WRITE: u8 = 0b0001;
}

pub mod node_type {
    pub const FILE: u8 = 0x0;
    pub const DIRECTORY: u8 = 0x1;
}
