//! Transaction sequencing for the histogram peripheral.
//!
//! Every operation is one transaction: the opcode, any data bytes, then
//! END_COMMAND, each separated by a settle delay, followed by a bounded wait
//! for the peripheral's answer. Plain commands are answered by a single
//! END_COMMAND byte. Uploads are answered by `1 + 2 * bins` bytes and are
//! complete once that many bytes have arrived, whatever their values.
//!
//! Transactions never overlap: every operation takes `&mut self`.

use crate::bins::{BinAddress, BinCount};
use crate::command::Command;
use crate::config::DriverConfig;
use crate::error::HistError;
use crate::session::HistogramSession;
use crate::timing::{SessionTiming, UploadTimer};
use crate::transport::Transport;
use crate::upload::{Histogram, RawUpload};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Protocol driver owning the link to one peripheral.
pub struct Driver<T: Transport> {
    transport: T,
    config: DriverConfig,
    bin_count: BinCount,
    bin_address: BinAddress,
    timing: SessionTiming,
    cancel: CancellationToken,
}

impl<T: Transport> Driver<T> {
    pub fn new(transport: T, config: DriverConfig) -> Self {
        Self {
            transport,
            bin_count: BinCount(config.default_bin_count),
            bin_address: BinAddress::default(),
            config,
            timing: SessionTiming::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use `token` to abort response waits and settle delays from outside.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Bin count the next upload will expect.
    pub fn bin_count(&self) -> BinCount {
        self.bin_count
    }

    pub fn bin_address(&self) -> BinAddress {
        self.bin_address
    }

    /// Timing of every upload performed through this driver.
    pub fn timing(&self) -> &SessionTiming {
        &self.timing
    }

    pub async fn start_histogram(&mut self) -> Result<(), HistError> {
        self.command(Command::StartHist, &[]).await
    }

    pub async fn stop_histogram(&mut self) -> Result<(), HistError> {
        self.command(Command::StopHist, &[]).await
    }

    pub async fn clear_results(&mut self) -> Result<(), HistError> {
        self.command(Command::ClearResults, &[]).await
    }

    /// Configure how many bins uploads return. Takes effect locally only once acknowledged.
    pub async fn set_bin_count(&mut self, lsb: u8, msb: u8) -> Result<(), HistError> {
        self.command(Command::SetNumBins, &[lsb, msb]).await?;
        self.bin_count = BinCount::from_le_bytes(lsb, msb);
        info!("Bin count set to {}", self.bin_count);
        Ok(())
    }

    /// Configure the first bin uploads start from.
    pub async fn set_bin_address(&mut self, lsb: u8, msb: u8) -> Result<(), HistError> {
        self.command(Command::SetBinAddr, &[lsb, msb]).await?;
        self.bin_address = BinAddress::from_le_bytes(lsb, msb);
        info!("Bin address set to {}", self.bin_address);
        Ok(())
    }

    pub async fn configure(&mut self, bins: BinCount, start: BinAddress) -> Result<(), HistError> {
        let [lsb, msb] = bins.to_le_bytes();
        self.set_bin_count(lsb, msb).await?;
        let [lsb, msb] = start.to_le_bytes();
        self.set_bin_address(lsb, msb).await
    }

    /// Request every configured bin and collect the raw reply.
    pub async fn start_upload(&mut self) -> Result<RawUpload, HistError> {
        let (raw, _) = self.timed_upload().await?;
        Ok(raw)
    }

    /// Upload and decode one histogram.
    pub async fn upload_histogram(&mut self) -> Result<Histogram, HistError> {
        let bins = self.bin_count;
        let (raw, elapsed) = self.timed_upload().await?;
        let histogram = Histogram::from_raw(&raw, bins, self.bin_address)?.with_elapsed(elapsed);
        Ok(if self.config.keep_raw_uploads {
            histogram.with_raw(&raw)
        } else {
            histogram
        })
    }

    /// Perform `uploads` consecutive uploads, pausing between them.
    ///
    /// Restarts the driver's upload timing, so afterwards [`Driver::timing`]
    /// covers exactly this session.
    pub async fn collect_session(&mut self, uploads: usize) -> Result<HistogramSession, HistError> {
        let mut session = HistogramSession::new();
        self.timing.reset();
        for i in 0..uploads {
            if i > 0 {
                self.settle(self.config.session_settle_cycles).await?;
            }
            session.push(self.upload_histogram().await?);
        }
        session.timing = self.timing.clone();
        info!(
            "Time taken to receive responses from requested bins: {:.3} seconds",
            session.timing.total.as_secs_f64()
        );
        Ok(session)
    }

    /// Start accumulation, let it run for `accumulate`, then stop it.
    ///
    /// A cancellation during the hold returns [`HistError::Cancelled`] with the
    /// peripheral still accumulating.
    pub async fn acquire(&mut self, accumulate: Duration) -> Result<(), HistError> {
        self.start_histogram().await?;
        info!("Accumulating for {:.3} s", accumulate.as_secs_f64());
        self.hold("accumulation", accumulate).await?;
        self.stop_histogram().await
    }

    /// Discard whatever the peripheral is still sending.
    ///
    /// Returns once nothing has arrived for `drain_quiet`. Meant for use after a
    /// timeout or cancellation, before retrying.
    pub async fn resync(&mut self) -> Result<usize, HistError> {
        let mut scratch = [0u8; 64];
        let mut drained = 0;
        loop {
            match tokio::time::timeout(self.config.drain_quiet, self.transport.read(&mut scratch)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => {
                    debug!(bytes = hex::encode(&scratch[..n]), "Drained");
                    drained += n;
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
        if drained > 0 {
            warn!("Discarded {} stale byte(s) while resynchronizing", drained);
        }
        Ok(drained)
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Flush and shut down the link.
    pub async fn close(mut self) -> Result<(), HistError> {
        self.transport.flush().await?;
        self.transport.shutdown().await?;
        info!("Transport closed");
        Ok(())
    }

    async fn command(&mut self, cmd: Command, data: &[u8]) -> Result<(), HistError> {
        self.write_command(cmd, data, self.config.command_settle_cycles).await?;
        self.wait_for_end_command(cmd).await?;
        info!("Transaction for {} complete", cmd);
        Ok(())
    }

    async fn timed_upload(&mut self) -> Result<(RawUpload, Duration), HistError> {
        let expected = self.bin_count.expected_upload_len();
        info!("Calculated expected transfers: {}", expected);
        self.write_command(Command::StartUpload, &[], self.config.upload_settle_cycles)
            .await?;

        let timer = UploadTimer::start();
        let raw = self.read_upload(expected).await?;
        let elapsed = timer.elapsed();

        self.timing.record(elapsed);
        info!(
            "Time taken to receive {} responses: {:.3} seconds (total {:.3} s over {} upload(s))",
            expected,
            elapsed.as_secs_f64(),
            self.timing.total.as_secs_f64(),
            self.timing.upload_count()
        );
        Ok((raw, elapsed))
    }

    async fn write_command(&mut self, cmd: Command, data: &[u8], settle_cycles: u32) -> Result<(), HistError> {
        info!("Sending command: {}", cmd);
        self.write_byte(cmd.encode()).await?;
        for &byte in data {
            self.settle(settle_cycles).await?;
            self.write_byte(byte).await?;
            debug!("Sending Byte: {}", byte);
        }
        self.settle(settle_cycles).await?;
        self.write_byte(Command::EndCommand.encode()).await
    }

    async fn write_byte(&mut self, byte: u8) -> Result<(), HistError> {
        trace!(byte = hex::encode([byte]), "Serial Write");
        self.transport.write_all(&[byte]).await?;
        self.transport.flush().await?;
        Ok(())
    }

    /// Wait for the single END_COMMAND acknowledging `cmd`.
    ///
    /// Stray opcodes are logged and skipped; the whole wait shares one deadline
    /// so a chattering line still times out. A byte outside the command set
    /// means the link is out of step and ends the wait with
    /// [`HistError::UnknownCommand`].
    async fn wait_for_end_command(&mut self, cmd: Command) -> Result<(), HistError> {
        let operation: &'static str = cmd.into();
        let deadline = Instant::now() + self.config.response_timeout;
        loop {
            let byte = bounded(&self.cancel, deadline, operation, 0, 1, self.transport.read_u8()).await?;
            if Command::is_terminator(byte) {
                debug!("Received END_COMMAND");
                return Ok(());
            }
            let other = Command::parse(byte)?;
            warn!("Skipping {} byte while waiting for {} acknowledgement", other, cmd);
        }
    }

    /// Collect exactly `expected` bytes. The final byte is never inspected: the
    /// count alone completes the upload.
    async fn read_upload(&mut self, expected: usize) -> Result<RawUpload, HistError> {
        let operation: &'static str = Command::StartUpload.into();
        let mut buf = vec![0u8; expected];
        let mut received = 0;
        while received < expected {
            let deadline = Instant::now() + self.config.response_timeout;
            let n = bounded(
                &self.cancel,
                deadline,
                operation,
                received,
                expected,
                self.transport.read(&mut buf[received..]),
            )
            .await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("link closed after {received} of {expected} upload bytes"),
                )
                .into());
            }
            trace!(bytes = hex::encode(&buf[received..received + n]), "Serial Read");
            received += n;
        }
        debug!("Upload complete: {} bytes", received);
        Ok(RawUpload::new(buf))
    }

    async fn settle(&self, cycles: u32) -> Result<(), HistError> {
        self.hold("settle delay", self.config.cycles(cycles)).await
    }

    async fn hold(&self, operation: &'static str, duration: Duration) -> Result<(), HistError> {
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(HistError::Cancelled { operation }),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Run one read under the deadline and the cancellation token.
async fn bounded<F, O>(
    cancel: &CancellationToken,
    deadline: Instant,
    operation: &'static str,
    received: usize,
    expected: usize,
    read: F,
) -> Result<O, HistError>
where
    F: Future<Output = io::Result<O>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HistError::Cancelled { operation }),
        res = tokio::time::timeout_at(deadline, read) => match res {
            Ok(read) => Ok(read?),
            Err(_) => Err(HistError::Timeout { operation, received, expected }),
        },
    }
}
