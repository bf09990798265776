pub mod link;
pub mod visit;

pub use link::{CreateLinkRequest, Link, ShortLink};
pub use visit::{BrowserFact, IpLocation, NewVisit, RequestInfo, Visit};
