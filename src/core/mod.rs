pub mod cgi;
pub mod matcher;
pub mod proxy;
pub mod resolver;
pub mod router;

pub use cgi::{CgiBinding, CgiRegistry};
pub use matcher::RequestView;
pub use resolver::{FileResolver, Resolution};
pub use router::{DispatchGraph, RouterBuilder};
