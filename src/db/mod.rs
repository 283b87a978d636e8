mod membership;
mod metrics;
mod pull_request;
mod reviewer;
mod team;
pub mod types;
mod user;

pub use membership::*;
pub use metrics::*;
pub use pull_request::*;
pub use reviewer::*;
pub use team::*;
pub use types::*;
pub use user::*;
