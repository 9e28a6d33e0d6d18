pub mod config;
pub mod db;
pub mod exception;
pub mod field;
pub mod param;
pub mod request;
pub mod response;
pub mod router;

pub use config::Config;
pub use db::TodoStore;
pub use exception::Exception;
pub use param::{HttpRequestMethod, HttpVersion};
pub use request::Request;
pub use response::Response;
