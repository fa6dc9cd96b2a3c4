//! Hard caps on input sizes. Everything user-controlled is bounded.

pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_COMMITMENTS_PER_RESOURCE: usize = 50_000;
pub const MAX_FACULTY: usize = 50_000;
pub const MAX_ASSIGNMENTS_PER_FACULTY: usize = 1_000;

/// Resource, faculty and event identifiers.
pub const MAX_ID_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 256;
/// Purpose / subject / owner free text.
pub const MAX_TEXT_LEN: usize = 1024;

pub const MAX_RESOURCE_CAPACITY: u32 = 100_000;
pub const MAX_CAPACITY_POINTS: u32 = 1_000_000;
pub const MAX_EVENT_POINTS: u32 = 10_000;
