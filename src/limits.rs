use crate::model::Ms;

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0; // 1970-01-01
pub const MAX_VALID_TIMESTAMP_MS: Ms = 32_503_680_000_000; // 3000-01-01

pub const MAX_DURATION_MINUTES: u32 = 24 * 60;
pub const MAX_SEARCH_WINDOW_MS: Ms = 31 * 24 * 3_600_000;

pub const MAX_SLOTS_RETURNED: usize = 20;
pub const MAX_ALTERNATIVES: usize = 5;

pub const MAX_ID_LEN: usize = 64;
pub const MAX_TEXT_LEN: usize = 4_096;
pub const MIN_ISSUE_DESCRIPTION_LEN: usize = 5;

pub const MAX_APPOINTMENTS: usize = 1_000_000;
pub const MAX_CLAIMS: usize = 1_000_000;

pub const MAX_MCP_LINE_BYTES: usize = 1 << 20;
