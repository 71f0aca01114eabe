pub use crate::config::ExecutorConfig;
pub use crate::error::ExecError;
pub use crate::executor::resolver::TcpResolver;
pub use crate::executor::socket::{TcpSocket, TlsSocket};
pub use crate::executor::timer::DeadlineTimer;
pub use crate::executor::{CloseMode, EventLoopExecutor};
pub use crate::pool::ExecutorPool;
pub use crate::reactor::timer::{WaitCanceled, WaitResult};
pub use crate::reactor::{Reactor, WorkGuard};
pub use crate::utils::{HealthFlag, TimeBudget};
