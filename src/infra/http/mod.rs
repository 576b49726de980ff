mod middleware;
mod proxy;

pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use proxy::{ProxyState, SOURCE_HEADER, build_router};
