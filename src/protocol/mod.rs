//! HTTP/1.1 request parsing and response rendering

pub mod http1;
pub mod response;

pub use http1::{CheckState, Method, ParseStatus, RequestParser};
pub use response::{HttpCode, WriteBuf};
