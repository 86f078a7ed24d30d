//! Tower layers composed into the transport stack by
//! [`HttpClientBuilder`](crate::HttpClientBuilder).

mod user_agent;

pub use user_agent::{UserAgentLayer, UserAgentService};
