pub mod forward;
pub mod mime;
pub mod path;
pub mod range;
pub mod relay;
pub mod request;
pub mod route_table;

pub use forward::{ForwardedRequest, Scheme, TargetError, UpstreamTarget};
pub use relay::{RelayEnd, RelayReport, RelaySession, relay};
pub use request::RequestHead;
pub use route_table::{MethodFilter, RouteEntry, RouteError, RouteTable};
