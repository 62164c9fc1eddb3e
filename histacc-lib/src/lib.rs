pub mod bins;
pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod session;
pub mod timing;
pub mod transport;
pub mod upload;

pub use bins::{BinAddress, BinCount};
pub use command::Command;
pub use config::{DriverConfig, SerialConfig};
pub use driver::Driver;
pub use error::HistError;
pub use session::HistogramSession;
pub use timing::{SessionTiming, UploadTimer};
pub use transport::Transport;
pub use upload::{Histogram, RawUpload, decode_samples};

// Re-exported so callers can cancel waits without depending on tokio-util directly
pub use tokio_util::sync::CancellationToken;
