//! Core Infrastructure
//!
//! HTTP transport shared by the token manager and the resilient client.

pub mod transport;

pub use transport::{
    send_with_deadline, HttpMethod, HttpRequest, HttpResponse, HttpTransport, MockHttpTransport,
    MockReply, ReqwestHttpTransport,
};
