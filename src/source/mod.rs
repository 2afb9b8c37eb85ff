// Transport abstraction: pluggable HTTP backends for search and image requests.

pub mod http_source;
pub mod traits;
