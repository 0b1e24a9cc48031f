pub mod fanout;
pub mod queue;
pub mod session;
pub mod sweeper;
pub mod sync;
pub mod visits;

pub use fanout::*;
pub use queue::*;
pub use session::*;
pub use sweeper::*;
pub use sync::*;
pub use visits::*;
