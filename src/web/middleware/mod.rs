//! Tower middleware layered onto the Admission API router.

pub mod request_id;
pub mod security_headers;
