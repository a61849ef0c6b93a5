/// Rooms in the catalog.
pub const MAX_ROOMS: usize = 10_000;

/// Restrictions (bookings + blocks) held per room calendar.
pub const MAX_RESTRICTIONS_PER_ROOM: usize = 100_000;

/// Longest bookable stay, in nights.
pub const MAX_STAY_NIGHTS: i64 = 366;

/// Widest availability query window, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3_660;

pub const MAX_ROOM_NAME_LEN: usize = 256;

/// Applies to each guest field (names, email, phone).
pub const MAX_GUEST_FIELD_LEN: usize = 256;

pub const MIN_FIRST_NAME_LEN: usize = 3;

/// Live booking drafts across all sessions.
pub const MAX_DRAFTS: usize = 100_000;

pub const MAX_SESSION_ID_LEN: usize = 256;
