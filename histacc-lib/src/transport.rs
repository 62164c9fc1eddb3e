use crate::config::SerialConfig;
use crate::error::HistError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::info;

/// Byte-stream link to a peripheral.
///
/// Anything that can be read and written asynchronously qualifies: a serial
/// port in production, an in-memory duplex pipe in tests.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Open and configure the serial port described by `config`.
pub fn open(config: &SerialConfig) -> Result<SerialStream, HistError> {
    info!(port = %config.port, baud = config.baud_rate, "Opening serial port");
    let stream = tokio_serial::new(&config.port, config.baud_rate)
        .timeout(config.read_timeout)
        .open_native_async()
        .map_err(|source| HistError::TransportUnavailable {
            port: config.port.clone(),
            source,
        })?;
    info!(port = %config.port, "Serial port open");
    Ok(stream)
}
