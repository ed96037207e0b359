pub const READ_BUFFER_SIZE: usize = 2048;
pub const WRITE_BUFFER_SIZE: usize = 1024;

// admission ceiling and slot table size
pub const MAX_CONNECTIONS: usize = 65535;
pub const MAX_EVENTS: usize = 10000;

pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_QUEUE_DEPTH: usize = 10000;

pub const LISTEN_BACKLOG: i32 = 1024;
pub const DEFAULT_DOC_ROOT: &str = "root";
